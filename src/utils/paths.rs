use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "updater.config.json";

fn ensure_dir(path: &Path) -> Option<PathBuf> {
    if path.as_os_str().is_empty() {
        return None;
    }
    if std::fs::create_dir_all(path).is_ok() {
        return Some(path.to_path_buf());
    }
    None
}

fn env_dir(key: &str) -> Option<PathBuf> {
    let value = std::env::var(key).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    ensure_dir(Path::new(trimmed))
}

pub fn resolve_root_dir() -> PathBuf {
    if let Some(dir) = env_dir("UPDATER_ROOT_DIR") {
        return dir;
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if dir.join(CONFIG_FILE_NAME).exists() {
                return dir.to_path_buf();
            }
        }
    }

    let fallback = std::env::temp_dir().join("apk-updater");
    ensure_dir(&fallback).unwrap_or(fallback)
}

/// `UPDATER_CONFIG_FILE` when set, otherwise `updater.config.json` in the root
/// directory if one is there.
pub fn resolve_config_file() -> Option<PathBuf> {
    if let Ok(value) = std::env::var("UPDATER_CONFIG_FILE") {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    let candidate = resolve_root_dir().join(CONFIG_FILE_NAME);
    candidate.is_file().then_some(candidate)
}

/// Where downloaded packages land when the config does not name a directory.
pub fn resolve_download_dir(configured: &Path) -> PathBuf {
    if let Some(dir) = ensure_dir(configured) {
        return dir;
    }
    let root = resolve_root_dir();
    let downloads = root.join("downloads");
    ensure_dir(&downloads).unwrap_or(root)
}

pub fn resolve_log_dir() -> PathBuf {
    if let Some(dir) = env_dir("UPDATER_LOG_DIR") {
        return dir;
    }

    let root_logs = resolve_root_dir().join("logs");
    if let Some(found) = ensure_dir(&root_logs) {
        return found;
    }

    PathBuf::from("logs")
}
