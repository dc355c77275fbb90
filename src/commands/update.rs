use crate::models::{DownloadId, UpdateEvent};
use crate::state::UpdateUiState;
use crate::utils::file::sanitize_file_name;
use crate::AppState;

const DEFAULT_APK_NAME: &str = "update.apk";

/// File name for a download when the caller does not pick one: the last
/// path segment of the URL, or `update.apk`.
pub fn file_name_from_url(url: &str) -> String {
    let segment = reqwest::Url::parse(url.trim()).ok().and_then(|parsed| {
        parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back().map(str::to_string))
            .filter(|segment| !segment.is_empty())
    });
    match segment {
        Some(segment) => sanitize_file_name(&segment),
        None => DEFAULT_APK_NAME.to_string(),
    }
}

pub fn start_update(
    state: &AppState,
    url: &str,
    file_name: Option<&str>,
) -> Result<DownloadId, String> {
    let file_name = match file_name.map(str::trim).filter(|name| !name.is_empty()) {
        Some(name) => name.to_string(),
        None => file_name_from_url(url),
    };
    state
        .downloads
        .start_download(url, &file_name, state.presenter.listener())
        .map_err(|err| err.to_string())
}

pub fn cancel_update(state: &AppState) -> Result<(), String> {
    let was_downloading = state.downloads.is_downloading();
    state.downloads.cancel().map_err(|err| err.to_string())?;
    if was_downloading {
        state.presenter.dispatch(UpdateEvent::Cancelled);
    }
    Ok(())
}

pub fn dismiss_update_error(state: &AppState) {
    state.presenter.dispatch(UpdateEvent::Dismissed);
}

pub fn get_update_state(state: &AppState) -> UpdateUiState {
    state.presenter.snapshot()
}
