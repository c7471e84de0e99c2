use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use cloudfm_core::{ApiError, CloudClient, DEFAULT_BASE_URL};
use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::storage::{HttpConnector, LocalConnector, StorageConnector};

const APP_DIR_NAME: &str = "cloudfm";
const DEFAULT_LOCAL_QUOTA_BYTES: u64 = 100 * 1024 * 1024;
const DEFAULT_PAGE_SIZE: u32 = 100;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;
const REDACTED: &str = "<redacted>";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown backend {0:?}, expected \"http\" or \"local\"")]
    UnknownBackend(String),
    #[error("CLOUDFM_TOKEN is required for the http backend")]
    MissingToken,
    #[error("cannot build storage client: {0}")]
    Client(#[from] ApiError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Http,
    Local,
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "local" => Ok(Self::Local),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => f.write_str("http"),
            Self::Local => f.write_str("local"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppConfig {
    pub backend: BackendKind,
    pub api_url: String,
    #[serde(serialize_with = "redact_token")]
    pub token: Option<String>,
    pub local_root: PathBuf,
    pub local_quota_bytes: u64,
    pub page_size: u32,
    pub http_timeout_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        let data_dir = dirs::data_dir().unwrap_or_else(|| home.join(".local/share"));
        let config = Self::from_vars(|name| std::env::var(name).ok(), &home, &data_dir)?;
        Ok(config)
    }

    /// Resolves the configuration from `vars`; unset or unparsable numbers
    /// fall back to their defaults.
    pub fn from_vars(
        vars: impl Fn(&str) -> Option<String>,
        home: &Path,
        data_dir: &Path,
    ) -> Result<Self, ConfigError> {
        let backend = match vars("CLOUDFM_BACKEND") {
            Some(value) if !value.trim().is_empty() => value.parse()?,
            _ => BackendKind::Http,
        };
        let api_url = vars("CLOUDFM_API_URL")
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let token = vars("CLOUDFM_TOKEN").filter(|value| !value.trim().is_empty());
        let local_root = vars("CLOUDFM_LOCAL_ROOT")
            .map(|value| expand_with_home(&value, home))
            .unwrap_or_else(|| data_dir.join(APP_DIR_NAME));
        let local_quota_bytes = read_u64_env(
            &vars,
            "CLOUDFM_LOCAL_QUOTA_BYTES",
            DEFAULT_LOCAL_QUOTA_BYTES,
        );
        let page_size = u32::try_from(read_u64_env(
            &vars,
            "CLOUDFM_PAGE_SIZE",
            u64::from(DEFAULT_PAGE_SIZE),
        ))
        .unwrap_or(DEFAULT_PAGE_SIZE);
        let http_timeout_secs =
            read_u64_env(&vars, "CLOUDFM_HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS);

        Ok(Self {
            backend,
            api_url,
            token,
            local_root,
            local_quota_bytes,
            page_size,
            http_timeout_secs,
        })
    }

    pub fn connector(&self) -> Result<Arc<dyn StorageConnector>, ConfigError> {
        let connector: Arc<dyn StorageConnector> = match self.backend {
            BackendKind::Http => {
                let token = self.token.as_deref().ok_or(ConfigError::MissingToken)?;
                let client = CloudClient::with_base_url(&self.api_url, token)?
                    .with_timeout(Duration::from_secs(self.http_timeout_secs))?;
                Arc::new(HttpConnector::new(client).with_page_size(self.page_size))
            }
            BackendKind::Local => Arc::new(LocalConnector::new(
                self.local_root.clone(),
                self.local_quota_bytes,
            )),
        };
        Ok(connector)
    }
}

fn redact_token<S: Serializer>(token: &Option<String>, serializer: S) -> Result<S::Ok, S::Error> {
    token.as_ref().map(|_| REDACTED).serialize(serializer)
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn read_u64_env(vars: &impl Fn(&str) -> Option<String>, name: &str, default: u64) -> u64 {
    vars(name)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn resolve(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_vars(
            |name| vars.get(name).cloned(),
            Path::new("/tmp/home-user"),
            Path::new("/tmp/home-user/.local/share"),
        )
    }

    #[test]
    fn defaults_apply_without_environment() {
        let config = resolve(&[]).unwrap();
        assert_eq!(config.backend, BackendKind::Http);
        assert_eq!(config.api_url, DEFAULT_BASE_URL);
        assert_eq!(config.token, None);
        assert_eq!(
            config.local_root,
            PathBuf::from("/tmp/home-user/.local/share/cloudfm")
        );
        assert_eq!(config.local_quota_bytes, 100 * 1024 * 1024);
        assert_eq!(config.page_size, 100);
        assert_eq!(config.http_timeout_secs, 60);
    }

    #[test]
    fn expands_tilde_in_local_root() {
        let config = resolve(&[
            ("CLOUDFM_BACKEND", "Local"),
            ("CLOUDFM_LOCAL_ROOT", "~/saves"),
        ])
        .unwrap();
        assert_eq!(config.backend, BackendKind::Local);
        assert_eq!(config.local_root, PathBuf::from("/tmp/home-user/saves"));
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let config = resolve(&[
            ("CLOUDFM_PAGE_SIZE", "0"),
            ("CLOUDFM_LOCAL_QUOTA_BYTES", "lots"),
            ("CLOUDFM_HTTP_TIMEOUT_SECS", " 15 "),
        ])
        .unwrap();
        assert_eq!(config.page_size, 100);
        assert_eq!(config.local_quota_bytes, 100 * 1024 * 1024);
        assert_eq!(config.http_timeout_secs, 15);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        assert!(matches!(
            resolve(&[("CLOUDFM_BACKEND", "ftp")]),
            Err(ConfigError::UnknownBackend(name)) if name == "ftp"
        ));
    }

    #[test]
    fn http_backend_requires_token() {
        let config = resolve(&[]).unwrap();
        assert!(matches!(
            config.connector(),
            Err(ConfigError::MissingToken)
        ));

        let config = resolve(&[("CLOUDFM_TOKEN", "secret")]).unwrap();
        assert!(config.connector().is_ok());
    }

    #[test]
    fn serialized_config_hides_token() {
        let config = resolve(&[("CLOUDFM_TOKEN", "secret")]).unwrap();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["token"], "<redacted>");
        assert_eq!(json["backend"], "http");
        assert!(!json.to_string().contains("secret"));

        let json = serde_json::to_value(resolve(&[]).unwrap()).unwrap();
        assert!(json["token"].is_null());
    }
}
