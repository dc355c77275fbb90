use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::models::{DownloadId, DownloadRecord, DownloadStatus};
use crate::services::download_attempt::DownloadAttempt;
use crate::services::platform::DownloadBackend;

/// Listens for the service's "download complete" broadcast on behalf of one
/// attempt and confirms the outcome with a single query. A lagged or closed
/// channel falls back to the status table so the attempt cannot hang.
#[derive(Clone)]
pub struct CompletionNotifier {
    backend: Arc<dyn DownloadBackend>,
    subscription: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl CompletionNotifier {
    pub fn new(backend: Arc<dyn DownloadBackend>) -> Self {
        Self {
            backend,
            subscription: Arc::new(Mutex::new(None)),
        }
    }

    /// `receiver` must be taken before the download is submitted so a fast
    /// completion cannot slip past.
    pub fn subscribe(&self, mut receiver: broadcast::Receiver<DownloadId>, attempt: Arc<DownloadAttempt>) {
        self.unsubscribe();

        let backend = self.backend.clone();
        let handle = tokio::spawn(async move {
            loop {
                match next_signal(&mut receiver, attempt.id()).await {
                    Signal::Completed => {
                        drop(receiver);
                        confirm_completion(backend.as_ref(), &attempt, |status| {
                            format!("Download reported complete while {}", status)
                        });
                        return;
                    }
                    Signal::Lagged => {
                        if recheck_after_lag(backend.as_ref(), &attempt) {
                            return;
                        }
                    }
                    Signal::Closed => {
                        drop(receiver);
                        confirm_completion(backend.as_ref(), &attempt, |_| {
                            "Download service stopped before the download finished".to_string()
                        });
                        return;
                    }
                }
            }
        });

        if let Ok(mut subscription) = self.subscription.lock() {
            *subscription = Some(handle);
        }
    }

    pub fn unsubscribe(&self) {
        let handle = self
            .subscription
            .lock()
            .ok()
            .and_then(|mut subscription| subscription.take());
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription
            .lock()
            .map(|subscription| {
                subscription
                    .as_ref()
                    .is_some_and(|handle| !handle.is_finished())
            })
            .unwrap_or(false)
    }
}

enum Signal {
    Completed,
    Lagged,
    Closed,
}

async fn next_signal(receiver: &mut broadcast::Receiver<DownloadId>, id: DownloadId) -> Signal {
    loop {
        match receiver.recv().await {
            Ok(completed) if completed == id => return Signal::Completed,
            Ok(other) => {
                tracing::debug!("ignoring completion broadcast id={} waiting_for={}", other, id);
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("completion broadcast lagged skipped={} waiting_for={}", skipped, id);
                return Signal::Lagged;
            }
            Err(broadcast::error::RecvError::Closed) => {
                tracing::warn!("completion broadcast closed before id={} finished", id);
                return Signal::Closed;
            }
        }
    }
}

/// Reports a terminal record. Returns `false` for any other status.
fn settle_record(attempt: &DownloadAttempt, record: &DownloadRecord) -> bool {
    attempt.note_expected_bytes(record.total_bytes);
    match record.status {
        DownloadStatus::Successful => {
            attempt.complete();
            true
        }
        DownloadStatus::Failed => {
            attempt.fail_download(record.reason);
            true
        }
        _ => false,
    }
}

/// A lagged receiver may have dropped our id; the status table still has it.
/// Returns whether the attempt is settled.
fn recheck_after_lag(backend: &dyn DownloadBackend, attempt: &DownloadAttempt) -> bool {
    match backend.query(attempt.id()) {
        Ok(Some(record)) if record.status.is_terminal() => settle_record(attempt, &record),
        Ok(Some(_)) => false,
        Ok(None) => {
            attempt.fail("Download was cancelled");
            true
        }
        Err(err) => {
            tracing::warn!("could not recheck download id={} after lag: {}", attempt.id(), err);
            false
        }
    }
}

fn confirm_completion(
    backend: &dyn DownloadBackend,
    attempt: &DownloadAttempt,
    unfinished: impl FnOnce(DownloadStatus) -> String,
) {
    match backend.query(attempt.id()) {
        Ok(Some(record)) => {
            if !settle_record(attempt, &record) {
                attempt.fail(&unfinished(record.status));
            }
        }
        Ok(None) => {
            attempt.fail("Download was cancelled");
        }
        Err(err) => {
            attempt.fail(&format!("Could not confirm download: {}", err));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    use crate::services::installer::ApkInstaller;
    use crate::services::testing::{
        temp_dir, FakeInstallerPlatform, QueryStep, RecordingListener, ScriptedBackend,
    };

    fn attempt(listener: Arc<RecordingListener>, id: i64, destination: PathBuf) -> Arc<DownloadAttempt> {
        let installer = ApkInstaller::new(Arc::new(FakeInstallerPlatform::new(34)), "test.provider");
        Arc::new(DownloadAttempt::new(DownloadId(id), destination, listener, installer))
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn other_ids_cause_no_transition() {
        let backend = Arc::new(ScriptedBackend::new(vec![QueryStep::successful(4)]));
        let notifier = CompletionNotifier::new(backend.clone());
        let listener = Arc::new(RecordingListener::default());

        notifier.subscribe(backend.completions(), attempt(listener.clone(), 42, PathBuf::from("x.apk")));
        backend.broadcast(DownloadId(7));
        backend.broadcast(DownloadId(43));
        settle().await;

        assert!(listener.names().is_empty());
        assert_eq!(backend.query_count(), 0);
        assert!(notifier.is_subscribed());
        notifier.unsubscribe();
    }

    #[tokio::test(start_paused = true)]
    async fn first_matching_broadcast_installs_and_unsubscribes() {
        let dir = temp_dir("notifier-success");
        let apk = dir.join("app.apk");
        std::fs::write(&apk, b"PK\x03\x04").expect("write apk");
        let backend = Arc::new(ScriptedBackend::new(vec![QueryStep::successful(4)]));
        let notifier = CompletionNotifier::new(backend.clone());
        let listener = Arc::new(RecordingListener::default());

        notifier.subscribe(backend.completions(), attempt(listener.clone(), 42, apk));
        backend.broadcast(DownloadId(42));
        settle().await;

        assert_eq!(
            listener.names(),
            vec!["progress(100)", "completed", "installation_initiated"]
        );
        assert!(!notifier.is_subscribed());
        assert_eq!(backend.subscriber_count(), 0);

        backend.broadcast(DownloadId(42));
        settle().await;
        assert_eq!(listener.names().len(), 3);
        assert_eq!(backend.query_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_download_reports_decoded_reason() {
        let backend = Arc::new(ScriptedBackend::new(vec![QueryStep::failed(1001)]));
        let notifier = CompletionNotifier::new(backend.clone());
        let listener = Arc::new(RecordingListener::default());

        notifier.subscribe(backend.completions(), attempt(listener.clone(), 42, PathBuf::from("x.apk")));
        backend.broadcast(DownloadId(42));
        settle().await;

        assert_eq!(
            listener.names(),
            vec!["failed(File error: storage issue while writing the download)"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn removed_download_is_reported_as_cancelled() {
        let backend = Arc::new(ScriptedBackend::new(vec![QueryStep::Missing]));
        let notifier = CompletionNotifier::new(backend.clone());
        let listener = Arc::new(RecordingListener::default());

        notifier.subscribe(backend.completions(), attempt(listener.clone(), 42, PathBuf::from("x.apk")));
        backend.broadcast(DownloadId(42));
        settle().await;

        assert_eq!(listener.names(), vec!["failed(Download was cancelled)"]);
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribe_is_idempotent() {
        let backend = Arc::new(ScriptedBackend::new(vec![QueryStep::successful(4)]));
        let notifier = CompletionNotifier::new(backend.clone());
        let listener = Arc::new(RecordingListener::default());

        notifier.unsubscribe();
        notifier.subscribe(backend.completions(), attempt(listener.clone(), 42, PathBuf::from("x.apk")));
        notifier.unsubscribe();
        notifier.unsubscribe();
        settle().await;

        backend.broadcast(DownloadId(42));
        settle().await;
        assert!(listener.names().is_empty());
        assert_eq!(backend.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn lagged_receiver_rechecks_the_status_table() {
        let dir = temp_dir("notifier-lagged");
        let apk = dir.join("app.apk");
        std::fs::write(&apk, b"PK\x03\x04").expect("write apk");
        let backend = Arc::new(ScriptedBackend::new(vec![
            QueryStep::running(2, 4),
            QueryStep::successful(4),
        ]));
        let notifier = CompletionNotifier::new(backend.clone());
        let listener = Arc::new(RecordingListener::default());
        let (tx, rx) = broadcast::channel(2);
        for id in [3, 5, 6] {
            tx.send(DownloadId(id)).expect("receiver alive");
        }

        notifier.subscribe(rx, attempt(listener.clone(), 42, apk));
        settle().await;
        assert!(listener.names().is_empty());
        assert_eq!(backend.query_count(), 1);
        assert!(notifier.is_subscribed());

        for id in [7, 8, 9] {
            tx.send(DownloadId(id)).expect("receiver alive");
        }
        settle().await;
        assert_eq!(
            listener.names(),
            vec!["progress(100)", "completed", "installation_initiated"]
        );
        assert_eq!(backend.query_count(), 2);
        assert!(!notifier.is_subscribed());
    }

    #[tokio::test(start_paused = true)]
    async fn closed_broadcast_reports_the_recorded_outcome() {
        let backend = Arc::new(ScriptedBackend::new(vec![QueryStep::failed(1001)]));
        let notifier = CompletionNotifier::new(backend.clone());
        let listener = Arc::new(RecordingListener::default());
        let (tx, rx) = broadcast::channel(4);

        notifier.subscribe(rx, attempt(listener.clone(), 42, PathBuf::from("x.apk")));
        drop(tx);
        settle().await;

        assert_eq!(
            listener.names(),
            vec!["failed(File error: storage issue while writing the download)"]
        );
        assert!(!notifier.is_subscribed());
    }

    #[tokio::test(start_paused = true)]
    async fn closed_broadcast_fails_an_unfinished_download() {
        let backend = Arc::new(ScriptedBackend::new(vec![QueryStep::running(1, 4)]));
        let notifier = CompletionNotifier::new(backend.clone());
        let listener = Arc::new(RecordingListener::default());
        let (tx, rx) = broadcast::channel(4);

        notifier.subscribe(rx, attempt(listener.clone(), 42, PathBuf::from("x.apk")));
        drop(tx);
        settle().await;

        assert_eq!(
            listener.names(),
            vec!["failed(Download service stopped before the download finished)"]
        );
    }
}
