//! Seams to the operating system services the update flow drives.
//!
//! On a device these are thin bindings to the download manager, the package
//! installer and the permission service. Desktop builds use
//! [`HttpDownloadService`](crate::services::HttpDownloadService) and
//! [`AdbInstaller`](crate::services::AdbInstaller).

use std::path::Path;

use tokio::sync::broadcast;

use crate::errors::Result;
use crate::models::{DownloadId, DownloadRecord, DownloadRequest, InstallIntent};

pub trait DownloadBackend: Send + Sync {
    fn enqueue(&self, request: &DownloadRequest) -> Result<DownloadId>;

    /// `Ok(None)` when the service has no row for `id`.
    fn query(&self, id: DownloadId) -> Result<Option<DownloadRecord>>;

    fn remove(&self, id: DownloadId) -> Result<()>;

    /// New receiver for the "download complete" broadcast. Fires once per
    /// download on any terminal outcome.
    fn completions(&self) -> broadcast::Receiver<DownloadId>;
}

pub trait PermissionProvider: Send + Sync {
    fn sdk_int(&self) -> u32;
    fn is_granted(&self, permission: &str) -> bool;
}

pub trait InstallerPlatform: Send + Sync {
    fn sdk_int(&self) -> u32;

    fn can_request_package_installs(&self) -> bool;

    /// Opens the screen where the user allows installs from this app.
    fn open_install_source_settings(&self) -> Result<()>;

    /// Content URI for `path` under the given file-provider authority.
    fn share_uri(&self, authority: &str, path: &Path) -> Result<String>;

    fn start_activity(&self, intent: &InstallIntent) -> Result<()>;
}

/// Fixed answers, for desktop runs where nothing needs to be asked.
#[derive(Clone, Debug)]
pub struct StaticPermissions {
    sdk_int: u32,
    granted: bool,
}

impl StaticPermissions {
    pub fn new(sdk_int: u32, granted: bool) -> Self {
        Self { sdk_int, granted }
    }
}

impl PermissionProvider for StaticPermissions {
    fn sdk_int(&self) -> u32 {
        self.sdk_int
    }

    fn is_granted(&self, _permission: &str) -> bool {
        self.granted
    }
}
