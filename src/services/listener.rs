use tokio::sync::mpsc;

use crate::models::UpdateEvent;

/// Callbacks fired by the update flow. Implementations must not block; the
/// tracker and notifier call them from their own tasks.
pub trait UpdateListener: Send + Sync {
    fn on_download_started(&self);
    fn on_download_progress(&self, percent: u8);
    fn on_download_completed(&self);
    fn on_download_failed(&self, reason: &str);
    fn on_installation_initiated(&self);
    fn on_error(&self, message: &str);
}

/// Forwards every callback as an [`UpdateEvent`] to a single consumer.
#[derive(Clone)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<UpdateEvent>,
}

impl ChannelListener {
    pub fn new(tx: mpsc::UnboundedSender<UpdateEvent>) -> Self {
        Self { tx }
    }

    fn forward(&self, event: UpdateEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("update event dropped: presenter closed");
        }
    }
}

impl UpdateListener for ChannelListener {
    fn on_download_started(&self) {
        self.forward(UpdateEvent::Started);
    }

    fn on_download_progress(&self, percent: u8) {
        self.forward(UpdateEvent::Progress(percent));
    }

    fn on_download_completed(&self) {
        self.forward(UpdateEvent::Completed);
    }

    fn on_download_failed(&self, reason: &str) {
        self.forward(UpdateEvent::Failed(reason.to_string()));
    }

    fn on_installation_initiated(&self) {
        self.forward(UpdateEvent::InstallationInitiated);
    }

    fn on_error(&self, message: &str) {
        self.forward(UpdateEvent::Error(message.to_string()));
    }
}
