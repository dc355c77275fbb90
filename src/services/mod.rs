pub mod completion_notifier;
pub mod download_attempt;
pub mod download_manager;
pub mod download_service;
pub mod installer;
pub mod listener;
pub mod permission_gate;
pub mod platform;
pub mod presenter;
pub mod progress_tracker;

#[cfg(test)]
pub(crate) mod testing;

pub use completion_notifier::CompletionNotifier;
pub use download_attempt::DownloadAttempt;
pub use download_manager::UpdateDownloadManager;
pub use download_service::HttpDownloadService;
pub use installer::{AdbInstaller, ApkInstaller};
pub use listener::{ChannelListener, UpdateListener};
pub use permission_gate::PermissionGate;
pub use platform::{DownloadBackend, InstallerPlatform, PermissionProvider, StaticPermissions};
pub use presenter::UpdatePresenter;
pub use progress_tracker::ProgressTracker;
