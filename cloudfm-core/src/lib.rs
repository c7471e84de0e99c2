mod client;

pub use client::{
    ApiError, ApiErrorClass, CloudClient, DEFAULT_BASE_URL, FileEntry, FileList, ScopeInfo,
};
