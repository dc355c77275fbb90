use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;

use crate::errors::{Result, UpdaterError};
use crate::models::{describe_paused_reason, DownloadId, DownloadStatus};
use crate::services::download_attempt::DownloadAttempt;
use crate::services::platform::DownloadBackend;
use crate::utils::file::file_len;

pub const QUERY_FAILED_REASON: &str = "Download query failed repeatedly";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TrackerControl {
    Running,
    Cancelled,
}

struct ActiveLoop {
    attempt: Arc<DownloadAttempt>,
    control: watch::Sender<TrackerControl>,
}

/// Polls the download service for one attempt at a time.
#[derive(Clone)]
pub struct ProgressTracker {
    backend: Arc<dyn DownloadBackend>,
    poll_interval: Duration,
    max_query_misses: u32,
    active: Arc<Mutex<Option<ActiveLoop>>>,
}

impl ProgressTracker {
    pub fn new(
        backend: Arc<dyn DownloadBackend>,
        poll_interval: Duration,
        max_query_misses: u32,
    ) -> Self {
        Self {
            backend,
            poll_interval,
            max_query_misses: max_query_misses.max(1),
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// Spawns the polling loop. Returns `Ok(false)` without doing anything when a
    /// loop for a live attempt is already running.
    pub fn start(&self, attempt: Arc<DownloadAttempt>) -> Result<bool> {
        let mut active = self
            .active
            .lock()
            .map_err(|_| UpdaterError::Config("progress tracker lock poisoned".to_string()))?;

        if let Some(current) = active.as_ref() {
            if current.attempt.is_live() && !current.control.is_closed() {
                tracing::debug!(
                    "progress tracker already running id={} requested={}",
                    current.attempt.id(),
                    attempt.id()
                );
                return Ok(false);
            }
            let _ = current.control.send(TrackerControl::Cancelled);
        }

        let (control_tx, control_rx) = watch::channel(TrackerControl::Running);
        *active = Some(ActiveLoop {
            attempt: attempt.clone(),
            control: control_tx,
        });
        drop(active);

        let tracker = self.clone();
        tokio::spawn(async move {
            let id = attempt.id();
            tracker.run(attempt, control_rx).await;
            tracker.release(id);
        });
        Ok(true)
    }

    /// Stops the loop and silences its attempt. Safe to call when idle.
    pub fn cancel(&self) {
        let taken = self.active.lock().ok().and_then(|mut active| active.take());
        if let Some(active) = taken {
            active.attempt.cancel();
            let _ = active.control.send(TrackerControl::Cancelled);
            tracing::info!("progress tracking cancelled id={}", active.attempt.id());
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.active
            .lock()
            .map(|active| {
                active
                    .as_ref()
                    .is_some_and(|current| !current.control.is_closed())
            })
            .unwrap_or(false)
    }

    fn release(&self, id: DownloadId) {
        if let Ok(mut active) = self.active.lock() {
            if active
                .as_ref()
                .is_some_and(|current| current.attempt.id() == id)
            {
                active.take();
            }
        }
    }

    async fn run(&self, attempt: Arc<DownloadAttempt>, mut control: watch::Receiver<TrackerControl>) {
        tracing::info!(
            "tracking update download id={} interval_ms={}",
            attempt.id(),
            self.poll_interval.as_millis()
        );
        let mut misses = 0u32;

        loop {
            if *control.borrow() == TrackerControl::Cancelled || !attempt.is_live() {
                break;
            }
            if !self.poll_once(&attempt, &mut misses) {
                break;
            }

            tokio::select! {
                _ = sleep(self.poll_interval) => {}
                changed = control.changed() => {
                    if changed.is_err() || *control.borrow() == TrackerControl::Cancelled {
                        break;
                    }
                }
            }
        }
        tracing::debug!("tracking loop finished id={}", attempt.id());
    }

    /// One query. Returns whether polling should continue.
    fn poll_once(&self, attempt: &DownloadAttempt, misses: &mut u32) -> bool {
        let record = match self.backend.query(attempt.id()) {
            Ok(Some(record)) => record,
            Ok(None) => return self.record_miss(attempt, misses, "no record for id"),
            Err(err) => return self.record_miss(attempt, misses, &err.to_string()),
        };

        *misses = 0;
        attempt.note_expected_bytes(record.total_bytes);
        match record.status {
            DownloadStatus::Running => {
                if let Some(percent) = record.progress_percent() {
                    attempt.emit_progress(percent);
                }
                true
            }
            DownloadStatus::Pending => {
                tracing::debug!("update download pending id={}", attempt.id());
                true
            }
            DownloadStatus::Paused => {
                tracing::debug!(
                    "update download paused id={} reason={}",
                    attempt.id(),
                    describe_paused_reason(record.reason)
                );
                true
            }
            DownloadStatus::Successful => {
                // the completion broadcast drives installation
                attempt.emit_progress(100);
                false
            }
            DownloadStatus::Failed => {
                attempt.fail_download(record.reason);
                false
            }
        }
    }

    fn record_miss(&self, attempt: &DownloadAttempt, misses: &mut u32, detail: &str) -> bool {
        *misses += 1;
        tracing::warn!(
            "update download query missed id={} attempt={}/{} detail={}",
            attempt.id(),
            misses,
            self.max_query_misses,
            detail
        );
        if *misses < self.max_query_misses {
            return true;
        }
        self.settle_from_disk(attempt);
        false
    }

    /// Last resort once the service stops answering: accept the file only when it
    /// matches the size the service last reported.
    fn settle_from_disk(&self, attempt: &DownloadAttempt) {
        let on_disk = file_len(attempt.destination());
        match (on_disk, attempt.expected_bytes()) {
            (Some(len), Some(expected)) if len > 0 && len == expected => {
                tracing::info!(
                    "update download inferred complete from disk id={} bytes={}",
                    attempt.id(),
                    len
                );
                attempt.complete();
            }
            (on_disk, expected) => {
                tracing::warn!(
                    "update download unresolved id={} on_disk={:?} expected={:?}",
                    attempt.id(),
                    on_disk,
                    expected
                );
                attempt.fail(QUERY_FAILED_REASON);
            }
        }
    }
}
