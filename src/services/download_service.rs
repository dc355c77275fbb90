use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use sysinfo::Disks;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::UpdaterConfig;
use crate::errors::{Result, UpdaterError};
use crate::models::{
    describe_failure_reason, DownloadId, DownloadRecord, DownloadRequest, DownloadStatus,
    ERROR_FILE_ALREADY_EXISTS, ERROR_FILE_ERROR, ERROR_HTTP_DATA_ERROR, ERROR_INSUFFICIENT_SPACE,
    ERROR_TOO_MANY_REDIRECTS, ERROR_UNHANDLED_HTTP_CODE,
};
use crate::services::platform::DownloadBackend;

const COMPLETION_CHANNEL_CAPACITY: usize = 32;
/// Finished rows kept around for late queries.
const MAX_FINISHED_RECORDS: usize = 16;
const PARTIAL_SUFFIX: &str = "part";

struct TransferFailure {
    code: i32,
    detail: String,
}

impl TransferFailure {
    fn new(code: i32, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }

    fn file(err: std::io::Error) -> Self {
        Self::new(ERROR_FILE_ERROR, err.to_string())
    }

    fn transport(err: reqwest::Error) -> Self {
        let code = if err.is_redirect() {
            ERROR_TOO_MANY_REDIRECTS
        } else {
            ERROR_HTTP_DATA_ERROR
        };
        Self::new(code, err.to_string())
    }
}

/// Desktop stand-in for the platform download manager: downloads over HTTP on
/// background tasks and exposes the same id / status-table / broadcast surface.
#[derive(Clone)]
pub struct HttpDownloadService {
    client: reqwest::Client,
    records: Arc<Mutex<HashMap<DownloadId, DownloadRecord>>>,
    tasks: Arc<Mutex<HashMap<DownloadId, JoinHandle<()>>>>,
    next_id: Arc<AtomicI64>,
    completions: broadcast::Sender<DownloadId>,
}

impl HttpDownloadService {
    pub fn new(config: &UpdaterConfig) -> Result<Self> {
        let mut client_builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_seconds))
            .connect_timeout(Duration::from_secs(config.http_connect_timeout_seconds))
            .tcp_nodelay(true);

        if config.disable_system_proxy {
            client_builder = client_builder.no_proxy();
        }

        if let Some(proxy_url) = config.proxy.as_deref() {
            match reqwest::Proxy::all(proxy_url) {
                Ok(proxy) => {
                    client_builder = client_builder.proxy(proxy);
                    tracing::info!("using updater proxy: {}", proxy_url);
                }
                Err(err) => tracing::warn!("invalid updater proxy '{}': {}", proxy_url, err),
            }
        }

        let client = client_builder.build()?;
        let (completions, _) = broadcast::channel(COMPLETION_CHANNEL_CAPACITY);

        Ok(Self {
            client,
            records: Arc::new(Mutex::new(HashMap::new())),
            tasks: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicI64::new(0)),
            completions,
        })
    }

    fn update_record(&self, id: DownloadId, apply: impl FnOnce(&mut DownloadRecord)) {
        if let Ok(mut records) = self.records.lock() {
            if let Some(record) = records.get_mut(&id) {
                apply(record);
            }
        }
    }

    async fn run(&self, id: DownloadId, request: DownloadRequest) {
        let partial = partial_path(&request.destination);
        match self.transfer(id, &request, &partial).await {
            Ok(written) => {
                self.update_record(id, |record| {
                    record.status = DownloadStatus::Successful;
                    record.bytes_so_far = written as i64;
                    if record.total_bytes < 0 {
                        record.total_bytes = written as i64;
                    }
                });
                tracing::info!("http download finished id={} bytes={}", id, written);
            }
            Err(failure) => {
                let _ = tokio::fs::remove_file(&partial).await;
                tracing::warn!(
                    "http download failed id={} reason={} detail={}",
                    id,
                    describe_failure_reason(failure.code),
                    failure.detail
                );
                self.update_record(id, |record| {
                    record.status = DownloadStatus::Failed;
                    record.reason = failure.code;
                });
            }
        }
        let _ = self.completions.send(id);
    }

    async fn transfer(
        &self,
        id: DownloadId,
        request: &DownloadRequest,
        partial: &Path,
    ) -> std::result::Result<u64, TransferFailure> {
        if request.destination.exists() {
            return Err(TransferFailure::new(
                ERROR_FILE_ALREADY_EXISTS,
                format!("{} already exists", request.destination.display()),
            ));
        }
        if let Some(parent) = request.destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(TransferFailure::file)?;
        }
        if !request.allow_metered || !request.allow_roaming {
            tracing::debug!(
                "network type restrictions are not enforced on desktop id={}",
                id
            );
        }

        self.update_record(id, |record| record.status = DownloadStatus::Running);
        let response = self
            .client
            .get(&request.url)
            .send()
            .await
            .map_err(TransferFailure::transport)?;

        let status = response.status();
        if !status.is_success() {
            let code = i32::from(status.as_u16());
            let reason = if (400..600).contains(&code) {
                code
            } else {
                ERROR_UNHANDLED_HTTP_CODE
            };
            return Err(TransferFailure::new(reason, format!("HTTP {}", code)));
        }

        let total = response.content_length();
        if let Some(total) = total {
            self.update_record(id, |record| record.total_bytes = total as i64);
            if let Some(available) = available_disk_space(&request.destination) {
                if available < total {
                    return Err(TransferFailure::new(
                        ERROR_INSUFFICIENT_SPACE,
                        format!("need {} bytes, {} available", total, available),
                    ));
                }
            }
        }

        let mut file = tokio::fs::File::create(partial)
            .await
            .map_err(TransferFailure::file)?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(TransferFailure::transport)?;
            file.write_all(&bytes).await.map_err(TransferFailure::file)?;
            written += bytes.len() as u64;
            self.update_record(id, |record| record.bytes_so_far = written as i64);
        }
        file.flush().await.map_err(TransferFailure::file)?;
        file.sync_all().await.map_err(TransferFailure::file)?;
        drop(file);

        if let Some(total) = total {
            if written != total {
                return Err(TransferFailure::new(
                    ERROR_HTTP_DATA_ERROR,
                    format!("received {} of {} bytes", written, total),
                ));
            }
        }

        tokio::fs::rename(partial, &request.destination)
            .await
            .map_err(TransferFailure::file)?;
        Ok(written)
    }
}

impl DownloadBackend for HttpDownloadService {
    fn enqueue(&self, request: &DownloadRequest) -> Result<DownloadId> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            UpdaterError::Submission("download service needs a running tokio runtime".to_string())
        })?;

        let id = DownloadId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        {
            let mut records = self
                .records
                .lock()
                .map_err(|_| UpdaterError::Config("download records lock poisoned".to_string()))?;
            prune_finished(&mut records, MAX_FINISHED_RECORDS);
            records.insert(id, DownloadRecord::new(id, Some(request.destination.clone())));
        }

        let service = self.clone();
        let request = request.clone();
        let handle = runtime.spawn(async move { service.run(id, request).await });

        let mut tasks = self
            .tasks
            .lock()
            .map_err(|_| UpdaterError::Config("download tasks lock poisoned".to_string()))?;
        tasks.retain(|_, task| !task.is_finished());
        tasks.insert(id, handle);
        Ok(id)
    }

    fn query(&self, id: DownloadId) -> Result<Option<DownloadRecord>> {
        let records = self
            .records
            .lock()
            .map_err(|_| UpdaterError::QueryFailed("download records lock poisoned".to_string()))?;
        Ok(records.get(&id).cloned())
    }

    fn remove(&self, id: DownloadId) -> Result<()> {
        if let Some(task) = self
            .tasks
            .lock()
            .map_err(|_| UpdaterError::Config("download tasks lock poisoned".to_string()))?
            .remove(&id)
        {
            task.abort();
        }

        let record = self
            .records
            .lock()
            .map_err(|_| UpdaterError::Config("download records lock poisoned".to_string()))?
            .remove(&id)
            .ok_or_else(|| UpdaterError::NotFound(format!("download {}", id)))?;

        if let Some(path) = record.local_path.as_deref() {
            let _ = std::fs::remove_file(partial_path(path));
        }
        tracing::info!("http download removed id={}", id);
        Ok(())
    }

    fn completions(&self) -> broadcast::Receiver<DownloadId> {
        self.completions.subscribe()
    }
}

/// Drops the oldest finished rows so at most `keep` of them remain.
fn prune_finished(records: &mut HashMap<DownloadId, DownloadRecord>, keep: usize) {
    let mut finished: Vec<DownloadId> = records
        .values()
        .filter(|record| record.status.is_terminal())
        .map(|record| record.id)
        .collect();
    if finished.len() <= keep {
        return;
    }
    finished.sort_unstable();
    let excess = finished.len() - keep;
    for id in finished.into_iter().take(excess) {
        records.remove(&id);
    }
    tracing::debug!("pruned {} finished download records", excess);
}

fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    destination.with_file_name(name)
}

fn nearest_existing_path(path: &Path) -> PathBuf {
    let mut candidate = path.to_path_buf();
    while !candidate.exists() {
        if !candidate.pop() {
            return PathBuf::from(".");
        }
    }
    candidate
}

fn available_disk_space(path: &Path) -> Option<u64> {
    let target = nearest_existing_path(path);
    let target = std::fs::canonicalize(&target).unwrap_or(target);
    let disks = Disks::new_with_refreshed_list();

    let mut best: Option<(usize, u64)> = None;
    for disk in disks.list() {
        let mount = disk.mount_point();
        if target.starts_with(mount) {
            let score = mount.as_os_str().len();
            match best {
                Some((best_score, _)) if best_score >= score => {}
                _ => best = Some((score, disk.available_space())),
            }
        }
    }

    best.map(|(_, available)| available)
}
