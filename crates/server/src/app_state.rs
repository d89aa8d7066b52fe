use server_api::ApiContext;
use shared::{domain::ClientId, protocol::Notification};
use tokio::sync::broadcast;

/// A notification together with the client whose tree it describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Published {
    pub(crate) owner: ClientId,
    pub(crate) notification: Notification,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) api: ApiContext,
    pub(crate) events: broadcast::Sender<Published>,
}

impl AppState {
    pub(crate) fn new(api: ApiContext, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self { api, events }
    }

    /// Fans a notification out to every socket; each socket keeps only its
    /// own client's notifications for its subscribed path.
    pub(crate) fn publish(&self, owner: ClientId, notification: Notification) {
        let receivers = self
            .events
            .send(Published {
                owner,
                notification,
            })
            .unwrap_or(0);
        tracing::debug!(receivers, "ws: notification published");
    }
}
