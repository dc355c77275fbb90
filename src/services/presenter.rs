use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::models::UpdateEvent;
use crate::services::listener::{ChannelListener, UpdateListener};
use crate::state::{reduce, UpdateUiState};

/// Folds update callbacks into [`UpdateUiState`] on a single task, so the
/// screen sees events in the order they were fired.
#[derive(Clone)]
pub struct UpdatePresenter {
    tx: mpsc::UnboundedSender<UpdateEvent>,
    state: watch::Receiver<UpdateUiState>,
    pump: Arc<JoinHandle<()>>,
}

impl UpdatePresenter {
    /// Must be called inside a tokio runtime.
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<UpdateEvent>();
        let (state_tx, state_rx) = watch::channel(UpdateUiState::default());

        let pump = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                state_tx.send_if_modified(|state| {
                    let next = reduce(state, &event);
                    if next == *state {
                        tracing::debug!("update event ignored in phase {:?}: {:?}", state.phase, event);
                        return false;
                    }
                    *state = next;
                    true
                });
            }
        });

        Self {
            tx,
            state: state_rx,
            pump: Arc::new(pump),
        }
    }

    pub fn listener(&self) -> Arc<dyn UpdateListener> {
        Arc::new(ChannelListener::new(self.tx.clone()))
    }

    /// For events that do not come from the download flow, like dismissing
    /// an error.
    pub fn dispatch(&self, event: UpdateEvent) {
        if self.tx.send(event).is_err() {
            tracing::warn!("update presenter stopped; event dropped");
        }
    }

    pub fn snapshot(&self) -> UpdateUiState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<UpdateUiState> {
        self.state.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.pump.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::UpdatePhase;

    async fn wait_until(
        rx: &mut watch::Receiver<UpdateUiState>,
        done: impl Fn(&UpdateUiState) -> bool,
    ) -> UpdateUiState {
        loop {
            let state = rx.borrow_and_update().clone();
            if done(&state) {
                return state;
            }
            rx.changed().await.expect("presenter alive");
        }
    }

    async fn wait_for(rx: &mut watch::Receiver<UpdateUiState>, phase: UpdatePhase) -> UpdateUiState {
        wait_until(rx, |state| state.phase == phase).await
    }

    #[tokio::test]
    async fn listener_callbacks_drive_the_state() {
        let presenter = UpdatePresenter::spawn();
        let mut rx = presenter.subscribe();
        let listener = presenter.listener();

        listener.on_download_started();
        listener.on_download_progress(40);
        listener.on_download_progress(100);
        listener.on_download_completed();
        listener.on_installation_initiated();

        let state = wait_until(&mut rx, |state| state.installer_launched).await;
        assert_eq!(state.phase, UpdatePhase::Installing);
        assert_eq!(state.progress, 100);
        assert_eq!(presenter.snapshot(), state);
        assert!(presenter.is_running());
    }

    #[tokio::test]
    async fn dismiss_clears_a_failure() {
        let presenter = UpdatePresenter::spawn();
        let mut rx = presenter.subscribe();

        presenter.listener().on_error("Storage permission not granted");
        let failed = wait_for(&mut rx, UpdatePhase::Failed).await;
        assert_eq!(failed.error.as_deref(), Some("Storage permission not granted"));

        presenter.dispatch(UpdateEvent::Dismissed);
        let idle = wait_for(&mut rx, UpdatePhase::Idle).await;
        assert_eq!(idle.error, None);
    }

    #[tokio::test]
    async fn ignored_events_do_not_notify_subscribers() {
        let presenter = UpdatePresenter::spawn();
        let mut rx = presenter.subscribe();
        rx.borrow_and_update();

        presenter.dispatch(UpdateEvent::Completed);
        presenter.dispatch(UpdateEvent::Dismissed);
        presenter.listener().on_download_started();

        rx.changed().await.expect("presenter alive");
        assert_eq!(rx.borrow_and_update().phase, UpdatePhase::Downloading);
    }
}
