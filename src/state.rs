use serde::Serialize;

use crate::models::UpdateEvent;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePhase {
    #[default]
    Idle,
    Downloading,
    Installing,
    Failed,
}

/// What the update screen renders.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUiState {
    pub phase: UpdatePhase,
    pub is_downloading: bool,
    pub progress: u8,
    pub status: Option<String>,
    pub error: Option<String>,
    pub installer_launched: bool,
    pub updated_at: i64,
}

/// Next state for `event`. Events that make no sense in the current phase
/// return an unchanged copy, `updated_at` included.
pub fn reduce(state: &UpdateUiState, event: &UpdateEvent) -> UpdateUiState {
    let mut next = match (state.phase, event) {
        (
            UpdatePhase::Idle | UpdatePhase::Failed | UpdatePhase::Installing,
            UpdateEvent::Started,
        ) => UpdateUiState {
            phase: UpdatePhase::Downloading,
            is_downloading: true,
            status: Some("Downloading update".to_string()),
            ..UpdateUiState::default()
        },
        (UpdatePhase::Downloading, UpdateEvent::Progress(percent)) => {
            let percent = (*percent).min(100);
            if percent <= state.progress {
                return state.clone();
            }
            UpdateUiState {
                progress: percent,
                status: Some(format!("Downloading update {}%", percent)),
                ..state.clone()
            }
        }
        (UpdatePhase::Downloading, UpdateEvent::Completed) => UpdateUiState {
            phase: UpdatePhase::Installing,
            is_downloading: false,
            progress: 100,
            status: Some("Download complete, starting installer".to_string()),
            ..state.clone()
        },
        (UpdatePhase::Installing, UpdateEvent::InstallationInitiated) => UpdateUiState {
            status: Some("Installer launched".to_string()),
            installer_launched: true,
            ..state.clone()
        },
        (UpdatePhase::Downloading | UpdatePhase::Installing, UpdateEvent::Failed(reason)) => {
            failed(state, format!("Download failed: {}", reason))
        }
        // a running download reports through Failed; an Error here belongs to
        // a rejected start and must not hide it
        (UpdatePhase::Downloading, UpdateEvent::Error(_)) => return state.clone(),
        (_, UpdateEvent::Error(message)) => failed(state, message.clone()),
        (UpdatePhase::Failed, UpdateEvent::Dismissed) => UpdateUiState::default(),
        (UpdatePhase::Downloading, UpdateEvent::Cancelled) => UpdateUiState {
            status: Some("Update cancelled".to_string()),
            ..UpdateUiState::default()
        },
        _ => return state.clone(),
    };
    next.updated_at = chrono::Utc::now().timestamp_millis();
    next
}

fn failed(state: &UpdateUiState, error: String) -> UpdateUiState {
    UpdateUiState {
        phase: UpdatePhase::Failed,
        is_downloading: false,
        status: None,
        error: Some(error),
        ..state.clone()
    }
}
