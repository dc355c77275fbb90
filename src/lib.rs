pub mod commands;
pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod services;
pub mod state;
pub mod utils;

use std::sync::Arc;

use crate::config::UpdaterConfig;
use crate::services::{
    ApkInstaller, DownloadBackend, InstallerPlatform, PermissionGate, PermissionProvider,
    UpdateDownloadManager, UpdatePresenter,
};
use crate::utils::file::FileManager;
use crate::utils::paths::resolve_download_dir;

/// Everything the update screen's commands need, wired once at startup.
pub struct AppState {
    pub config: UpdaterConfig,
    pub downloads: UpdateDownloadManager,
    pub presenter: UpdatePresenter,
    pub files: FileManager,
}

impl AppState {
    /// Must be called inside a tokio runtime; the presenter spawns its pump.
    pub fn new(
        config: UpdaterConfig,
        backend: Arc<dyn DownloadBackend>,
        permissions: Arc<dyn PermissionProvider>,
        installer_platform: Arc<dyn InstallerPlatform>,
    ) -> Self {
        let files = FileManager::new(resolve_download_dir(&config.download_dir));
        let installer = ApkInstaller::new(installer_platform, config.file_provider_authority.clone());
        let downloads = UpdateDownloadManager::new(
            backend,
            PermissionGate::new(permissions),
            installer,
            files.clone(),
            config.clone(),
        );
        Self {
            config,
            downloads,
            presenter: UpdatePresenter::spawn(),
            files,
        }
    }
}

impl AppState {
    /// Stops tracking and drops the completion subscription. A download still
    /// in flight is removed from the service. Safe to call more than once.
    pub fn shutdown(&self) {
        if let Err(err) = self.downloads.cancel() {
            tracing::warn!("update shutdown incomplete: {}", err);
        }
    }
}

impl Drop for AppState {
    fn drop(&mut self) {
        self.shutdown();
    }
}
