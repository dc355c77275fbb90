use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use crate::errors::UpdaterError;
use crate::models::DownloadId;
use crate::services::installer::ApkInstaller;
use crate::services::listener::UpdateListener;

/// State shared by the tracker and the completion notifier for one submitted
/// download. Whichever of them sees the terminal status first reports it;
/// the other finds the gate closed and stays silent.
pub struct DownloadAttempt {
    id: DownloadId,
    destination: PathBuf,
    listener: Arc<dyn UpdateListener>,
    installer: ApkInstaller,
    cancelled: AtomicBool,
    terminal: AtomicBool,
    last_progress: Mutex<Option<u8>>,
    expected_bytes: AtomicI64,
}

impl DownloadAttempt {
    pub fn new(
        id: DownloadId,
        destination: PathBuf,
        listener: Arc<dyn UpdateListener>,
        installer: ApkInstaller,
    ) -> Self {
        Self {
            id,
            destination,
            listener,
            installer,
            cancelled: AtomicBool::new(false),
            terminal: AtomicBool::new(false),
            last_progress: Mutex::new(None),
            expected_bytes: AtomicI64::new(-1),
        }
    }

    pub fn id(&self) -> DownloadId {
        self.id
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal.load(Ordering::SeqCst)
    }

    /// Neither cancelled nor finished.
    pub fn is_live(&self) -> bool {
        !self.is_cancelled() && !self.is_terminal()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn note_expected_bytes(&self, total_bytes: i64) {
        if total_bytes > 0 {
            self.expected_bytes.store(total_bytes, Ordering::SeqCst);
        }
    }

    pub fn expected_bytes(&self) -> Option<u64> {
        let value = self.expected_bytes.load(Ordering::SeqCst);
        (value > 0).then_some(value as u64)
    }

    /// Forwards `percent` only when it is higher than anything sent before.
    pub fn emit_progress(&self, percent: u8) {
        let percent = percent.min(100);
        let Ok(mut last) = self.last_progress.lock() else {
            return;
        };
        if self.is_cancelled() {
            return;
        }
        if matches!(*last, Some(previous) if previous >= percent) {
            return;
        }
        *last = Some(percent);
        self.listener.on_download_progress(percent);
    }

    fn close_gate(&self) -> bool {
        if self.is_cancelled() {
            return false;
        }
        self.terminal
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Reports success and hands the file to the installer. Returns `false`
    /// when another observer already reported a terminal outcome.
    pub fn complete(&self) -> bool {
        if !self.close_gate() {
            return false;
        }
        tracing::info!(
            "update download complete id={} path={}",
            self.id,
            self.destination.display()
        );
        self.emit_progress(100);
        self.listener.on_download_completed();

        match self.installer.install(&self.destination) {
            Ok(()) => self.listener.on_installation_initiated(),
            Err(err) => {
                tracing::error!("update install failed id={} error={}", self.id, err);
                self.listener.on_error(&err.to_string());
            }
        }
        true
    }

    /// Fails with the service's reason `code`.
    pub fn fail_download(&self, code: i32) -> bool {
        if !self.close_gate() {
            return false;
        }
        let err = UpdaterError::download_failed(code);
        tracing::warn!("update download failed id={} code={} reason={}", self.id, code, err);
        self.listener.on_download_failed(&err.to_string());
        true
    }

    pub fn fail(&self, reason: &str) -> bool {
        if !self.close_gate() {
            return false;
        }
        tracing::warn!("update download failed id={} reason={}", self.id, reason);
        self.listener.on_download_failed(reason);
        true
    }
}
