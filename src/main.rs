use std::process::ExitCode;
use std::sync::Arc;

use apk_updater::commands::update::{cancel_update, start_update};
use apk_updater::config::UpdaterConfig;
use apk_updater::logging;
use apk_updater::services::{AdbInstaller, HttpDownloadService, StaticPermissions};
use apk_updater::state::{UpdatePhase, UpdateUiState};
use apk_updater::utils::paths::resolve_log_dir;
use apk_updater::AppState;

const USAGE: &str = "usage: apk-updater <url> [file-name]";

fn env_truthy(key: &str) -> bool {
    std::env::var(key)
        .map(|value| {
            let value = value.trim().to_ascii_lowercase();
            value == "1" || value == "true" || value == "yes"
        })
        .unwrap_or(false)
}

fn print_state(state: &UpdateUiState) {
    match serde_json::to_string(state) {
        Ok(line) => println!("{}", line),
        Err(err) => tracing::warn!("could not serialize update state: {}", err),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let mut args = std::env::args().skip(1);
    let Some(url) = args.next() else {
        eprintln!("{}", USAGE);
        return ExitCode::from(2);
    };
    let file_name = args.next();

    let config = match UpdaterConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("invalid updater config: {}", err);
            return ExitCode::from(2);
        }
    };
    if let Err(err) = logging::init(&resolve_log_dir(), true) {
        eprintln!("logging disabled: {}", err);
    }

    let backend = match HttpDownloadService::new(&config) {
        Ok(backend) => Arc::new(backend),
        Err(err) => {
            tracing::error!("download service unavailable: {}", err);
            eprintln!("download service unavailable: {}", err);
            return ExitCode::FAILURE;
        }
    };
    let permissions = Arc::new(StaticPermissions::new(
        config.sdk_int,
        !env_truthy("UPDATER_DENY_STORAGE"),
    ));
    let adb = std::env::var("UPDATER_ADB").ok().filter(|value| !value.trim().is_empty());
    let installer = Arc::new(AdbInstaller::new(adb, config.sdk_int));

    let state = AppState::new(config, backend, permissions, installer);
    tracing::info!("apk updater started download_dir={}", state.files.download_dir().display());

    // Failures are already in the presenter; the loop below reports them.
    let _ = start_update(&state, &url, file_name.as_deref());

    let code = follow_update(&state).await;
    state.shutdown();
    code
}

async fn follow_update(state: &AppState) -> ExitCode {
    let mut updates = state.presenter.subscribe();
    loop {
        let snapshot = updates.borrow_and_update().clone();
        if snapshot.updated_at != 0 {
            print_state(&snapshot);
        }
        if snapshot.phase == UpdatePhase::Failed {
            return ExitCode::FAILURE;
        }
        if snapshot.installer_launched {
            return ExitCode::SUCCESS;
        }

        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    tracing::error!("update presenter stopped");
                    return ExitCode::FAILURE;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, cancelling update download");
                if let Err(err) = cancel_update(state) {
                    tracing::warn!("cancel failed: {}", err);
                }
                return ExitCode::from(130);
            }
        }
    }
}
