use std::sync::{Arc, Mutex};

use crate::config::UpdaterConfig;
use crate::errors::{Result, UpdaterError};
use crate::models::{DownloadId, DownloadRequest};
use crate::services::completion_notifier::CompletionNotifier;
use crate::services::download_attempt::DownloadAttempt;
use crate::services::installer::ApkInstaller;
use crate::services::listener::UpdateListener;
use crate::services::permission_gate::PermissionGate;
use crate::services::platform::DownloadBackend;
use crate::services::progress_tracker::ProgressTracker;
use crate::utils::file::FileManager;

/// Owns the single in-flight update download: submission, tracking, completion
/// and cancellation.
#[derive(Clone)]
pub struct UpdateDownloadManager {
    backend: Arc<dyn DownloadBackend>,
    permissions: PermissionGate,
    installer: ApkInstaller,
    tracker: ProgressTracker,
    notifier: CompletionNotifier,
    files: FileManager,
    config: UpdaterConfig,
    current: Arc<Mutex<Option<Arc<DownloadAttempt>>>>,
}

impl UpdateDownloadManager {
    pub fn new(
        backend: Arc<dyn DownloadBackend>,
        permissions: PermissionGate,
        installer: ApkInstaller,
        files: FileManager,
        config: UpdaterConfig,
    ) -> Self {
        let tracker = ProgressTracker::new(
            backend.clone(),
            config.poll_interval(),
            config.max_query_misses,
        );
        let notifier = CompletionNotifier::new(backend.clone());
        Self {
            backend,
            permissions,
            installer,
            tracker,
            notifier,
            files,
            config,
            current: Arc::new(Mutex::new(None)),
        }
    }

    /// Submits `url` for download into `file_name` under the download directory.
    ///
    /// Any failure other than [`UpdaterError::AlreadyInProgress`] has already
    /// been passed to `listener.on_error` when this returns `Err`.
    pub fn start_download(
        &self,
        url: &str,
        file_name: &str,
        listener: Arc<dyn UpdateListener>,
    ) -> Result<DownloadId> {
        let result = self.submit(url, file_name, listener.clone());
        match &result {
            Err(UpdaterError::AlreadyInProgress) => {
                // the listener belongs to the running download's screen
                tracing::info!("update download already running, ignoring start url={}", url);
            }
            Err(err) => {
                tracing::warn!("update download not started url={} error={}", url, err);
                listener.on_error(&err.to_string());
            }
            Ok(_) => {}
        }
        result
    }

    fn submit(
        &self,
        url: &str,
        file_name: &str,
        listener: Arc<dyn UpdateListener>,
    ) -> Result<DownloadId> {
        let mut current = self
            .current
            .lock()
            .map_err(|_| UpdaterError::Config("update download lock poisoned".to_string()))?;
        if current.as_ref().is_some_and(|attempt| attempt.is_live()) {
            return Err(UpdaterError::AlreadyInProgress);
        }
        if !self.permissions.has_required_permissions() {
            return Err(UpdaterError::PermissionDenied);
        }

        let url = validate_url(url)?;
        let destination = self.files.destination_for(file_name);
        if self.files.remove_stale(&destination)? {
            tracing::info!("removed stale update file path={}", destination.display());
        }

        let request = DownloadRequest {
            url,
            destination: destination.clone(),
            title: self.config.title.clone(),
            description: self.config.description.clone(),
            notification_visibility: self.config.notification_visibility,
            allow_metered: self.config.allow_metered,
            allow_roaming: self.config.allow_roaming,
        };

        let completions = self.backend.completions();
        let id = self.backend.enqueue(&request).map_err(|err| match err {
            UpdaterError::Submission(_) => err,
            other => UpdaterError::Submission(other.to_string()),
        })?;
        tracing::info!(
            "update download submitted id={} url={} path={}",
            id,
            request.url,
            destination.display()
        );
        listener.on_download_started();

        let attempt = Arc::new(DownloadAttempt::new(
            id,
            destination,
            listener,
            self.installer.clone(),
        ));
        *current = Some(attempt.clone());
        drop(current);

        self.notifier.subscribe(completions, attempt.clone());
        if !self.tracker.start(attempt)? {
            tracing::warn!("progress tracker busy, id={} relies on completion broadcast", id);
        }
        Ok(id)
    }

    /// Stops tracking, drops the completion subscription and removes the
    /// download from the service. No callback fires for it afterwards.
    pub fn cancel(&self) -> Result<()> {
        self.tracker.cancel();
        self.notifier.unsubscribe();

        let attempt = self
            .current
            .lock()
            .map_err(|_| UpdaterError::Config("update download lock poisoned".to_string()))?
            .take();
        let Some(attempt) = attempt else {
            return Ok(());
        };

        let finished = attempt.is_terminal();
        attempt.cancel();
        if !finished {
            if let Err(err) = self.backend.remove(attempt.id()) {
                tracing::warn!("could not remove update download id={}: {}", attempt.id(), err);
            }
        }
        tracing::info!("update download cancelled id={}", attempt.id());
        Ok(())
    }

    pub fn active_download(&self) -> Option<DownloadId> {
        self.current
            .lock()
            .ok()
            .and_then(|current| current.as_ref().filter(|a| a.is_live()).map(|a| a.id()))
    }

    pub fn is_downloading(&self) -> bool {
        self.active_download().is_some()
    }
}

fn validate_url(url: &str) -> Result<String> {
    let trimmed = url.trim();
    let parsed = reqwest::Url::parse(trimmed)
        .map_err(|err| UpdaterError::Submission(format!("invalid download url '{}': {}", trimmed, err)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed.to_string()),
        other => Err(UpdaterError::Submission(format!(
            "unsupported download url scheme: {}",
            other
        ))),
    }
}
