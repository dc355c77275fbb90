//! Scripted stand-ins for the platform services.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::errors::{Result, UpdaterError};
use crate::models::{
    DownloadId, DownloadRecord, DownloadRequest, DownloadStatus, InstallIntent,
};
use crate::services::listener::UpdateListener;
use crate::services::platform::{DownloadBackend, InstallerPlatform};

pub fn temp_dir(label: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("apk-updater-{}-{}", label, Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create temp directory");
    dir
}

#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<String>>,
}

impl RecordingListener {
    fn push(&self, name: String) {
        self.events.lock().expect("listener lock").push(name);
    }

    pub fn names(&self) -> Vec<String> {
        self.events.lock().expect("listener lock").clone()
    }

    pub fn progress_values(&self) -> Vec<u8> {
        self.names()
            .iter()
            .filter_map(|name| {
                name.strip_prefix("progress(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .and_then(|value| value.parse().ok())
            })
            .collect()
    }
}

impl UpdateListener for RecordingListener {
    fn on_download_started(&self) {
        self.push("started".to_string());
    }

    fn on_download_progress(&self, percent: u8) {
        self.push(format!("progress({})", percent));
    }

    fn on_download_completed(&self) {
        self.push("completed".to_string());
    }

    fn on_download_failed(&self, reason: &str) {
        self.push(format!("failed({})", reason));
    }

    fn on_installation_initiated(&self) {
        self.push("installation_initiated".to_string());
    }

    fn on_error(&self, message: &str) {
        self.push(format!("error({})", message));
    }
}

#[derive(Clone, Debug)]
pub enum QueryStep {
    Record {
        status: DownloadStatus,
        so_far: i64,
        total: i64,
        reason: i32,
    },
    Missing,
    Error,
}

impl QueryStep {
    pub fn running(so_far: i64, total: i64) -> Self {
        QueryStep::Record {
            status: DownloadStatus::Running,
            so_far,
            total,
            reason: 0,
        }
    }

    pub fn successful(total: i64) -> Self {
        QueryStep::Record {
            status: DownloadStatus::Successful,
            so_far: total,
            total,
            reason: 0,
        }
    }

    pub fn failed(reason: i32) -> Self {
        QueryStep::Record {
            status: DownloadStatus::Failed,
            so_far: 0,
            total: -1,
            reason,
        }
    }
}

/// Answers queries from a script; the last step repeats once the script runs out.
pub struct ScriptedBackend {
    script: Mutex<VecDeque<QueryStep>>,
    last: Mutex<Option<QueryStep>>,
    next_id: AtomicI64,
    queries: AtomicUsize,
    reject_enqueue: bool,
    requests: Mutex<Vec<DownloadRequest>>,
    removed: Mutex<Vec<DownloadId>>,
    completions: broadcast::Sender<DownloadId>,
}

impl ScriptedBackend {
    pub fn new(steps: Vec<QueryStep>) -> Self {
        let (completions, _) = broadcast::channel(16);
        Self {
            script: Mutex::new(steps.into()),
            last: Mutex::new(None),
            next_id: AtomicI64::new(41),
            queries: AtomicUsize::new(0),
            reject_enqueue: false,
            requests: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            completions,
        }
    }

    pub fn rejecting() -> Self {
        Self {
            reject_enqueue: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn push_steps(&self, steps: Vec<QueryStep>) {
        self.script.lock().expect("script lock").extend(steps);
    }

    pub fn broadcast(&self, id: DownloadId) {
        let _ = self.completions.send(id);
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<DownloadRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn removed(&self) -> Vec<DownloadId> {
        self.removed.lock().expect("removed lock").clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.completions.receiver_count()
    }
}

impl DownloadBackend for ScriptedBackend {
    fn enqueue(&self, request: &DownloadRequest) -> Result<DownloadId> {
        if self.reject_enqueue {
            return Err(UpdaterError::Submission("download service unavailable".to_string()));
        }
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        Ok(DownloadId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1))
    }

    fn query(&self, id: DownloadId) -> Result<Option<DownloadRecord>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let step = {
            let mut script = self.script.lock().expect("script lock");
            let mut last = self.last.lock().expect("last lock");
            if let Some(next) = script.pop_front() {
                *last = Some(next);
            }
            last.clone().unwrap_or(QueryStep::Missing)
        };
        match step {
            QueryStep::Record {
                status,
                so_far,
                total,
                reason,
            } => Ok(Some(DownloadRecord {
                status,
                total_bytes: total,
                bytes_so_far: so_far,
                reason,
                ..DownloadRecord::new(id, None)
            })),
            QueryStep::Missing => Ok(None),
            QueryStep::Error => Err(UpdaterError::QueryFailed("cursor closed".to_string())),
        }
    }

    fn remove(&self, id: DownloadId) -> Result<()> {
        self.removed.lock().expect("removed lock").push(id);
        Ok(())
    }

    fn completions(&self) -> broadcast::Receiver<DownloadId> {
        self.completions.subscribe()
    }
}

pub struct FakeInstallerPlatform {
    sdk_int: u32,
    install_source_allowed: bool,
    fail_launch: bool,
    launched: Mutex<Vec<InstallIntent>>,
    settings_opened: AtomicUsize,
}

impl FakeInstallerPlatform {
    pub fn new(sdk_int: u32) -> Self {
        Self {
            sdk_int,
            install_source_allowed: true,
            fail_launch: false,
            launched: Mutex::new(Vec::new()),
            settings_opened: AtomicUsize::new(0),
        }
    }

    pub fn deny_install_source(mut self) -> Self {
        self.install_source_allowed = false;
        self
    }

    pub fn fail_launch(mut self) -> Self {
        self.fail_launch = true;
        self
    }

    pub fn launched(&self) -> Vec<InstallIntent> {
        self.launched.lock().expect("launched lock").clone()
    }

    pub fn settings_opened(&self) -> usize {
        self.settings_opened.load(Ordering::SeqCst)
    }
}

impl InstallerPlatform for FakeInstallerPlatform {
    fn sdk_int(&self) -> u32 {
        self.sdk_int
    }

    fn can_request_package_installs(&self) -> bool {
        self.install_source_allowed
    }

    fn open_install_source_settings(&self) -> Result<()> {
        self.settings_opened.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn share_uri(&self, authority: &str, path: &Path) -> Result<String> {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(format!("content://{}/updates/{}", authority, name))
    }

    fn start_activity(&self, intent: &InstallIntent) -> Result<()> {
        if self.fail_launch {
            return Err(UpdaterError::InstallLaunch(
                "no activity found to handle intent".to_string(),
            ));
        }
        self.launched
            .lock()
            .expect("launched lock")
            .push(intent.clone());
        Ok(())
    }
}
