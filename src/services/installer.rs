#[cfg(target_os = "windows")]
use std::os::windows::process::CommandExt;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use crate::errors::{Result, UpdaterError};
use crate::models::InstallIntent;
use crate::services::platform::InstallerPlatform;
use crate::utils::file::file_len;

/// Android 7, first release that rejects `file://` URIs across apps.
const FILE_PROVIDER_SDK: u32 = 24;
/// Android 8, first release with the per-app "install unknown apps" switch.
const INSTALL_SOURCE_SDK: u32 = 26;
#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x08000000;

#[inline]
fn hide_console_window(command: &mut Command) {
    #[cfg(target_os = "windows")]
    {
        command.creation_flags(CREATE_NO_WINDOW);
    }
}

#[derive(Clone)]
pub struct ApkInstaller {
    platform: Arc<dyn InstallerPlatform>,
    authority: String,
}

impl ApkInstaller {
    pub fn new(platform: Arc<dyn InstallerPlatform>, authority: impl Into<String>) -> Self {
        Self {
            platform,
            authority: authority.into(),
        }
    }

    pub fn install(&self, path: &Path) -> Result<()> {
        match file_len(path) {
            None => return Err(UpdaterError::FileMissing(path.to_path_buf())),
            Some(0) => return Err(UpdaterError::FileEmpty(path.to_path_buf())),
            Some(_) => {}
        }

        let sdk = self.platform.sdk_int();
        if sdk >= INSTALL_SOURCE_SDK && !self.platform.can_request_package_installs() {
            tracing::warn!("package installs from this source are blocked, opening settings");
            if let Err(err) = self.platform.open_install_source_settings() {
                tracing::warn!("could not open install source settings: {}", err);
            }
            return Err(UpdaterError::InstallSourceNotPermitted);
        }

        let intent = if sdk >= FILE_PROVIDER_SDK {
            let uri = self.platform.share_uri(&self.authority, path)?;
            InstallIntent::for_package(uri, true)
        } else {
            InstallIntent::for_package(format!("file://{}", path.display()), false)
        };

        self.platform
            .start_activity(&intent)
            .map_err(|err| match err {
                UpdaterError::InstallLaunch(_) => err,
                other => UpdaterError::InstallLaunch(other.to_string()),
            })?;
        tracing::info!("installer launched uri={}", intent.data_uri);
        Ok(())
    }
}

/// Installs on a USB/TCP attached device through `adb install -r`.
#[derive(Clone, Debug)]
pub struct AdbInstaller {
    adb_path: String,
    sdk_int: u32,
}

impl AdbInstaller {
    pub fn new(adb_path: Option<String>, sdk_int: u32) -> Self {
        Self {
            adb_path: adb_path.unwrap_or_else(|| "adb".to_string()),
            sdk_int,
        }
    }
}

impl InstallerPlatform for AdbInstaller {
    fn sdk_int(&self) -> u32 {
        self.sdk_int
    }

    fn can_request_package_installs(&self) -> bool {
        // adb side-loads do not go through the unknown-sources check
        true
    }

    fn open_install_source_settings(&self) -> Result<()> {
        let mut command = Command::new(&self.adb_path);
        command.args([
            "shell",
            "am",
            "start",
            "-a",
            "android.settings.MANAGE_UNKNOWN_APP_SOURCES",
        ]);
        hide_console_window(&mut command);
        let status = command.status()?;
        if !status.success() {
            return Err(UpdaterError::InstallLaunch(format!(
                "adb could not open settings: {}",
                status
            )));
        }
        Ok(())
    }

    fn share_uri(&self, _authority: &str, path: &Path) -> Result<String> {
        let absolute = std::fs::canonicalize(path)?;
        Ok(absolute.display().to_string())
    }

    fn start_activity(&self, intent: &InstallIntent) -> Result<()> {
        let mut command = Command::new(&self.adb_path);
        command.args(["install", "-r", intent.data_uri.trim_start_matches("file://")]);
        hide_console_window(&mut command);
        let output = command
            .output()
            .map_err(|err| UpdaterError::InstallLaunch(format!("adb not available: {}", err)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(UpdaterError::InstallLaunch(format!(
                "adb install failed: {}",
                stderr.trim()
            )));
        }
        Ok(())
    }
}
