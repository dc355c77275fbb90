use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::models::describe_failure_reason;

#[derive(Error, Debug)]
pub enum UpdaterError {
    #[error("Storage permission not granted")]
    PermissionDenied,
    #[error("An update download is already in progress")]
    AlreadyInProgress,
    #[error("Download submission failed: {0}")]
    Submission(String),
    #[error("Download query failed: {0}")]
    QueryFailed(String),
    /// Terminal failure reported by the download service; `reason` is the
    /// decoded text for `code`.
    #[error("{reason}")]
    DownloadFailed { code: i32, reason: String },
    #[error("Update file not found: {}", .0.display())]
    FileMissing(PathBuf),
    #[error("Update file is empty: {}", .0.display())]
    FileEmpty(PathBuf),
    #[error("Could not launch the installer: {0}")]
    InstallLaunch(String),
    #[error("Installing apps from this source is not allowed. Enable it in settings and retry")]
    InstallSourceNotPermitted,
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

impl UpdaterError {
    pub fn download_failed(code: i32) -> Self {
        UpdaterError::DownloadFailed {
            code,
            reason: describe_failure_reason(code),
        }
    }
}

pub type Result<T> = std::result::Result<T, UpdaterError>;
