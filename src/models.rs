use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const APK_MIME_TYPE: &str = "application/vnd.android.package-archive";
pub const ACTION_VIEW: &str = "android.intent.action.VIEW";
pub const FLAG_GRANT_READ_URI_PERMISSION: u32 = 0x0000_0001;
pub const FLAG_ACTIVITY_NEW_TASK: u32 = 0x1000_0000;

pub const ERROR_UNKNOWN: i32 = 1000;
pub const ERROR_FILE_ERROR: i32 = 1001;
pub const ERROR_UNHANDLED_HTTP_CODE: i32 = 1002;
pub const ERROR_HTTP_DATA_ERROR: i32 = 1004;
pub const ERROR_TOO_MANY_REDIRECTS: i32 = 1005;
pub const ERROR_INSUFFICIENT_SPACE: i32 = 1006;
pub const ERROR_DEVICE_NOT_FOUND: i32 = 1007;
pub const ERROR_CANNOT_RESUME: i32 = 1008;
pub const ERROR_FILE_ALREADY_EXISTS: i32 = 1009;

/// Opaque handle the download service hands out on submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DownloadId(pub i64);

impl fmt::Display for DownloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Discriminants are the platform's status codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum DownloadStatus {
    Pending = 1,
    Running = 2,
    Paused = 4,
    Successful = 8,
    Failed = 16,
}

impl DownloadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, DownloadStatus::Successful | DownloadStatus::Failed)
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DownloadStatus::Pending => "pending",
            DownloadStatus::Running => "running",
            DownloadStatus::Paused => "paused",
            DownloadStatus::Successful => "successful",
            DownloadStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum NotificationVisibility {
    Visible = 0,
    #[default]
    VisibleNotifyCompleted = 1,
    Hidden = 2,
    VisibleNotifyOnlyCompletion = 3,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    pub url: String,
    pub destination: PathBuf,
    pub title: String,
    pub description: String,
    pub notification_visibility: NotificationVisibility,
    pub allow_metered: bool,
    pub allow_roaming: bool,
}

/// One row of the download service's status table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRecord {
    pub id: DownloadId,
    pub status: DownloadStatus,
    /// `-1` until the server reports a length.
    pub total_bytes: i64,
    pub bytes_so_far: i64,
    /// Failure reason for `Failed`, paused reason for `Paused`, otherwise 0.
    pub reason: i32,
    pub local_path: Option<PathBuf>,
}

impl DownloadRecord {
    pub fn new(id: DownloadId, local_path: Option<PathBuf>) -> Self {
        Self {
            id,
            status: DownloadStatus::Pending,
            total_bytes: -1,
            bytes_so_far: 0,
            reason: 0,
            local_path,
        }
    }

    pub fn progress_percent(&self) -> Option<u8> {
        if self.total_bytes <= 0 {
            return None;
        }
        let downloaded = self.bytes_so_far.max(0) as i128;
        let percent = downloaded * 100 / self.total_bytes as i128;
        Some(percent.clamp(0, 100) as u8)
    }
}

pub fn describe_failure_reason(code: i32) -> String {
    match code {
        ERROR_UNKNOWN => "Unknown error".to_string(),
        ERROR_FILE_ERROR => "File error: storage issue while writing the download".to_string(),
        ERROR_UNHANDLED_HTTP_CODE => "Unhandled HTTP response code".to_string(),
        ERROR_HTTP_DATA_ERROR => "HTTP data error: data transfer was interrupted".to_string(),
        ERROR_TOO_MANY_REDIRECTS => "Too many redirects".to_string(),
        ERROR_INSUFFICIENT_SPACE => "Insufficient storage space".to_string(),
        ERROR_DEVICE_NOT_FOUND => "Storage device not found".to_string(),
        ERROR_CANNOT_RESUME => "Download cannot be resumed".to_string(),
        ERROR_FILE_ALREADY_EXISTS => "Destination file already exists".to_string(),
        400..=599 => format!("HTTP error {}", code),
        other => format!("Download failed (reason {})", other),
    }
}

pub fn describe_paused_reason(code: i32) -> &'static str {
    match code {
        1 => "waiting to retry",
        2 => "waiting for network",
        3 => "queued for wifi",
        _ => "paused for unknown reason",
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallIntent {
    pub action: String,
    pub data_uri: String,
    pub mime_type: String,
    pub flags: u32,
}

impl InstallIntent {
    pub fn for_package(data_uri: String, grant_read: bool) -> Self {
        let mut flags = FLAG_ACTIVITY_NEW_TASK;
        if grant_read {
            flags |= FLAG_GRANT_READ_URI_PERMISSION;
        }
        Self {
            action: ACTION_VIEW.to_string(),
            data_uri,
            mime_type: APK_MIME_TYPE.to_string(),
            flags,
        }
    }

    pub fn grants_read(&self) -> bool {
        self.flags & FLAG_GRANT_READ_URI_PERMISSION != 0
    }
}

/// Everything the update flow reports to the presentation layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum UpdateEvent {
    Started,
    Progress(u8),
    Completed,
    Failed(String),
    InstallationInitiated,
    Error(String),
    Dismissed,
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(total: i64, so_far: i64) -> DownloadRecord {
        DownloadRecord {
            total_bytes: total,
            bytes_so_far: so_far,
            status: DownloadStatus::Running,
            ..DownloadRecord::new(DownloadId(1), None)
        }
    }

    #[test]
    fn progress_is_floored_and_clamped() {
        assert_eq!(record(3, 2).progress_percent(), Some(66));
        assert_eq!(record(100, 150).progress_percent(), Some(100));
        assert_eq!(record(100, -5).progress_percent(), Some(0));
        assert_eq!(record(-1, 10).progress_percent(), None);
        assert_eq!(record(0, 0).progress_percent(), None);
    }

    #[test]
    fn progress_handles_large_files_without_overflow() {
        let total = i64::MAX / 2;
        assert_eq!(record(total, total / 2).progress_percent(), Some(49));
    }

    #[test]
    fn failure_reasons_are_stable() {
        assert_eq!(describe_failure_reason(1006), "Insufficient storage space");
        assert_eq!(describe_failure_reason(1009), "Destination file already exists");
        assert_eq!(describe_failure_reason(404), "HTTP error 404");
        assert_eq!(describe_failure_reason(7), "Download failed (reason 7)");
        assert_eq!(describe_failure_reason(1004), describe_failure_reason(1004));
    }

    #[test]
    fn only_successful_and_failed_are_terminal() {
        assert_eq!(DownloadStatus::Successful as i32, 8);
        assert_eq!(DownloadStatus::Failed as i32, 16);
        assert!(DownloadStatus::Failed.is_terminal());
        assert!(DownloadStatus::Successful.is_terminal());
        assert!(!DownloadStatus::Paused.is_terminal());
        assert!(!DownloadStatus::Running.is_terminal());
    }

    #[test]
    fn install_intent_sets_flags() {
        let intent = InstallIntent::for_package("content://x/app.apk".to_string(), true);
        assert!(intent.grants_read());
        assert_eq!(intent.mime_type, APK_MIME_TYPE);
        assert_ne!(intent.flags & FLAG_ACTIVITY_NEW_TASK, 0);

        let legacy = InstallIntent::for_package("file:///sdcard/app.apk".to_string(), false);
        assert!(!legacy.grants_read());
    }
}
