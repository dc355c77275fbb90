use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug)]
pub struct FileManager {
    download_dir: PathBuf,
}

impl FileManager {
    pub fn new(download_dir: PathBuf) -> Self {
        Self { download_dir }
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    pub fn destination_for(&self, file_name: &str) -> PathBuf {
        self.download_dir.join(sanitize_file_name(file_name))
    }

    /// Deletes a leftover file so the download service does not refuse the
    /// destination. Returns whether something was removed.
    pub fn remove_stale(&self, path: &Path) -> io::Result<bool> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }
}

/// Size of a regular file, `None` when it is missing or not a file.
pub fn file_len(path: &Path) -> Option<u64> {
    fs::metadata(path)
        .ok()
        .filter(|meta| meta.is_file())
        .map(|meta| meta.len())
}

pub fn sanitize_file_name(value: &str) -> String {
    let base = value
        .rsplit(|ch: char| ch == '/' || ch == '\\')
        .next()
        .unwrap_or_default()
        .trim();
    let cleaned: String = base
        .chars()
        .map(|ch| match ch {
            ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            ch if ch.is_control() => '_',
            _ => ch,
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        return "update.apk".to_string();
    }
    cleaned
}
