use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://storage-api.cloudfm.dev";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    NotFound,
    Rejected,
    Transient,
    Permanent,
}

/// Client for the per-application storage API.
///
/// Every call is addressed by the numeric application id that owns the
/// storage scope; file names travel as query parameters so no escaping is
/// needed on the caller's side.
#[derive(Clone)]
pub struct CloudClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl CloudClient {
    pub fn with_base_url(base_url: &str, token: impl Into<String>) -> Result<Self, ApiError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            token: token.into(),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, ApiError> {
        self.http = Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    pub async fn get_scope(&self, app_id: u32) -> Result<ScopeInfo, ApiError> {
        let mut url = self.endpoint("/v1/storage")?;
        url.query_pairs_mut()
            .append_pair("app_id", &app_id.to_string());
        let response = self.authorized(self.http.get(url)).send().await?;
        Self::handle_response(response).await
    }

    pub async fn list_files(
        &self,
        app_id: u32,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<FileList, ApiError> {
        let mut url = self.endpoint("/v1/storage/files")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("app_id", &app_id.to_string());
            if let Some(limit) = limit {
                query.append_pair("limit", &limit.to_string());
            }
            if let Some(offset) = offset {
                query.append_pair("offset", &offset.to_string());
            }
        }
        let response = self.authorized(self.http.get(url)).send().await?;
        Self::handle_response(response).await
    }

    pub async fn list_files_all(
        &self,
        app_id: u32,
        page_size: u32,
    ) -> Result<Vec<FileEntry>, ApiError> {
        let page_size = page_size.max(1);
        let mut offset = 0u32;
        let mut items = Vec::new();
        loop {
            let page = self
                .list_files(app_id, Some(page_size), Some(offset))
                .await?;
            let received = page.items.len() as u32;
            offset = offset.saturating_add(received);
            let total = page.total;
            items.extend(page.items);
            debug!(app_id, offset, total, "fetched listing page");
            if offset >= total || received == 0 {
                break;
            }
        }
        Ok(items)
    }

    pub async fn get_file(&self, app_id: u32, name: &str) -> Result<FileEntry, ApiError> {
        let url = self.file_endpoint("/v1/storage/file", app_id, name)?;
        let response = self.authorized(self.http.get(url)).send().await?;
        Self::handle_response(response).await
    }

    pub async fn download(&self, app_id: u32, name: &str) -> Result<Vec<u8>, ApiError> {
        let url = self.file_endpoint("/v1/storage/file/content", app_id, name)?;
        let response = self.authorized(self.http.get(url)).send().await?;
        let response = Self::check_status(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    pub async fn upload(&self, app_id: u32, name: &str, data: Vec<u8>) -> Result<(), ApiError> {
        let url = self.file_endpoint("/v1/storage/file/content", app_id, name)?;
        let response = self
            .authorized(self.http.put(url))
            .body(data)
            .send()
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }

    pub async fn delete_file(&self, app_id: u32, name: &str) -> Result<(), ApiError> {
        let url = self.file_endpoint("/v1/storage/file", app_id, name)?;
        let response = self.authorized(self.http.delete(url)).send().await?;
        Self::check_status(response).await?;
        Ok(())
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("Authorization", self.auth_header_value())
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base_url.join(path)?)
    }

    fn file_endpoint(&self, path: &str, app_id: u32, name: &str) -> Result<Url, ApiError> {
        let mut url = self.endpoint(path)?;
        url.query_pairs_mut()
            .append_pair("app_id", &app_id.to_string())
            .append_pair("name", name);
        Ok(url)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::Api { status, body })
        }
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let response = Self::check_status(response).await?;
        Ok(response.json::<T>().await?)
    }
}

impl ApiError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            ApiError::Api { status, .. } => Some(classify_api_status(*status)),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.classification(), Some(ApiErrorClass::NotFound))
    }

    /// The backend understood the request and refused it.
    pub fn is_rejection(&self) -> bool {
        matches!(self.classification(), Some(ApiErrorClass::Rejected))
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if status == StatusCode::UNAUTHORIZED {
        ApiErrorClass::Auth
    } else if status == StatusCode::NOT_FOUND {
        ApiErrorClass::NotFound
    } else if matches!(
        status,
        StatusCode::FORBIDDEN
            | StatusCode::CONFLICT
            | StatusCode::PAYLOAD_TOO_LARGE
            | StatusCode::INSUFFICIENT_STORAGE
    ) {
        ApiErrorClass::Rejected
    } else if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS | StatusCode::TOO_EARLY
        )
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScopeInfo {
    pub app_id: u32,
    pub total_bytes: u64,
    pub available_bytes: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileEntry {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub modified: Option<String>,
    #[serde(default = "default_true")]
    pub persisted: bool,
    #[serde(default = "default_true")]
    pub exists: bool,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct FileList {
    pub items: Vec<FileEntry>,
    pub limit: u32,
    pub offset: u32,
    pub total: u32,
}

fn default_true() -> bool {
    true
}
