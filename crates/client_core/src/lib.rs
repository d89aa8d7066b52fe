//! Real-time folder synchronization client.
//!
//! A [`SyncClient`] keeps one WebSocket connection to the folder service,
//! subscribes it to the folder being viewed and keeps a local listing of
//! that folder current from the server's `ADDED`/`DELETED`/`RENAMED`
//! notifications. Independent consumers can observe raw notifications
//! through [`SyncClient::on`]; renderers follow the reconciled listing
//! through [`SyncClient::subscribe_listing`].

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod folder_api;
pub mod listing;
pub mod registry;
pub mod transport;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use shared::{
    domain::{ClientId, FolderRef, Item},
    protocol::{Notification, NotificationKind},
};
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

pub use config::SyncConfig;
pub use connection::{ConnectionManager, ConnectionState};
pub use dispatcher::{DispatchReport, NotificationDispatcher};
pub use error::SyncError;
pub use folder_api::{FolderApi, HttpFolderApi};
pub use listing::{ApplyOutcome, ListingEvent, ListingReconciler};
pub use registry::{EventRegistry, Observer, Registration};
pub use transport::{Connector, TransportConnection, WsConnector};

const LISTING_EVENT_CAPACITY: usize = 256;

/// Reconciled listing plus the plumbing to (re-)seed it.
struct ListingState {
    reconciler: Mutex<ListingReconciler>,
    events: broadcast::Sender<ListingEvent>,
    folder_api: Arc<dyn FolderApi>,
}

impl ListingState {
    fn lock(&self) -> MutexGuard<'_, ListingReconciler> {
        self.reconciler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: ListingEvent) {
        // No receivers is fine; the snapshot stays available via `listing()`.
        let _ = self.events.send(event);
    }

    fn apply(&self, notification: &Notification) {
        let mut reconciler = self.lock();
        let outcome = reconciler.apply(notification);
        debug!(
            kind = notification.kind().as_str(),
            path = notification.path(),
            item_id = %notification.item_id(),
            ?outcome,
            "sync: notification reconciled"
        );
        let event = match (outcome, notification) {
            (ApplyOutcome::Added, Notification::Added { item, .. }) => {
                ListingEvent::Added(item.clone())
            }
            (ApplyOutcome::Renamed, Notification::Renamed { item, .. }) => {
                ListingEvent::Renamed(item.clone())
            }
            (ApplyOutcome::Removed, Notification::Deleted { item_id, .. }) => {
                ListingEvent::Removed(item_id.clone())
            }
            _ => return,
        };
        self.publish(event);
    }

    fn rebind(&self, folder: FolderRef) -> u64 {
        let mut reconciler = self.lock();
        let generation = reconciler.rebind(folder.clone());
        self.publish(ListingEvent::Reset {
            folder,
            items: Vec::new(),
        });
        generation
    }

    /// Fetches `folder` and seeds the reconciler unless a newer navigation
    /// or refresh superseded `generation` meanwhile.
    async fn fetch_and_seed(&self, generation: u64, folder: FolderRef) -> Result<(), SyncError> {
        let fetched = self
            .folder_api
            .list_folder(&folder.id)
            .await
            .map_err(|cause| SyncError::ListingFetch {
                folder_id: folder.id.clone(),
                cause,
            })?;

        let mut reconciler = self.lock();
        if !reconciler.seed(generation, fetched) {
            debug!(folder_id = %folder.id, generation, "sync: discarding superseded listing");
            return Ok(());
        }
        let items = reconciler.items().to_vec();
        info!(folder_id = %folder.id, path = %folder.path, items = items.len(), "sync: listing seeded");
        self.publish(ListingEvent::Reset { folder, items });
        Ok(())
    }

    async fn refresh(&self) -> Result<(), SyncError> {
        let Some((generation, folder)) = self.lock().begin_refresh() else {
            return Ok(());
        };
        self.fetch_and_seed(generation, folder).await
    }
}

/// Registered for every notification kind; feeds the reconciler.
struct ListingObserver {
    listing: Arc<ListingState>,
}

impl Observer for ListingObserver {
    fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        self.listing.apply(notification);
        Ok(())
    }
}

pub struct SyncClient {
    registry: Arc<EventRegistry>,
    connection: ConnectionManager,
    listing: Arc<ListingState>,
    state_watcher: JoinHandle<()>,
}

impl SyncClient {
    /// Wires registry, dispatcher, connection manager and reconciler. Must
    /// be called from within a tokio runtime.
    pub fn new(
        config: &SyncConfig,
        connector: Arc<dyn Connector>,
        folder_api: Arc<dyn FolderApi>,
    ) -> Self {
        let registry = Arc::new(EventRegistry::new());
        let dispatcher = Arc::new(NotificationDispatcher::new(Arc::clone(&registry)));
        let (events, _) = broadcast::channel(LISTING_EVENT_CAPACITY);
        let listing = Arc::new(ListingState {
            reconciler: Mutex::new(ListingReconciler::new()),
            events,
            folder_api,
        });

        let observer: Arc<dyn Observer> = Arc::new(ListingObserver {
            listing: Arc::clone(&listing),
        });
        for kind in NotificationKind::ALL {
            registry.on(kind, Arc::clone(&observer));
        }

        let connection = ConnectionManager::spawn(config, connector, dispatcher);
        let state_watcher = tokio::spawn(watch_connection(
            connection.watch_state(),
            Arc::clone(&listing),
        ));

        Self {
            registry,
            connection,
            listing,
            state_watcher,
        }
    }

    /// Client over the WebSocket transport and the REST folder API.
    pub fn from_config(config: &SyncConfig) -> Result<Self, SyncError> {
        let folder_api = Arc::new(HttpFolderApi::new(config)?);
        Ok(Self::new(config, Arc::new(WsConnector), folder_api))
    }

    pub fn open(&self, client_id: ClientId) -> Result<(), SyncError> {
        self.connection.open(client_id)
    }

    pub fn close(&self) -> Result<(), SyncError> {
        self.connection.close()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn watch_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    pub fn on(&self, kind: NotificationKind, observer: Arc<dyn Observer>) -> Registration {
        self.registry.on(kind, observer)
    }

    pub fn off(&self, registration: &Registration) -> bool {
        self.registry.off(registration)
    }

    /// Switches the listing to `folder`: clears it, subscribes the
    /// connection to the folder's path and seeds it from a full fetch.
    ///
    /// On a fetch error the listing stays bound and empty apart from live
    /// additions; the next reopen or [`refresh`](Self::refresh) re-seeds it.
    pub async fn navigate(&self, folder: FolderRef) -> Result<(), SyncError> {
        info!(folder_id = %folder.id, path = %folder.path, "sync: navigating");
        let generation = self.listing.rebind(folder.clone());
        self.connection.set_subscription(folder.path.clone())?;
        self.listing.fetch_and_seed(generation, folder).await
    }

    /// Re-fetches the bound folder without clearing the listing first.
    pub async fn refresh(&self) -> Result<(), SyncError> {
        self.listing.refresh().await
    }

    pub fn current_folder(&self) -> Option<FolderRef> {
        self.listing.lock().folder().cloned()
    }

    pub fn listing(&self) -> Vec<Item> {
        self.listing.lock().items().to_vec()
    }

    pub fn subscribe_listing(&self) -> broadcast::Receiver<ListingEvent> {
        self.listing.events.subscribe()
    }

    pub fn subscription(&self) -> Option<String> {
        self.connection.subscription()
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        self.state_watcher.abort();
    }
}

/// Re-seeds after every open (notifications in flight during a drop are
/// lost) and reports terminal connection failure to listing subscribers.
async fn watch_connection(
    mut state: watch::Receiver<ConnectionState>,
    listing: Arc<ListingState>,
) {
    while state.changed().await.is_ok() {
        let current = *state.borrow_and_update();
        match current {
            ConnectionState::Open => {
                if let Err(err) = listing.refresh().await {
                    warn!(%err, "sync: listing refresh after reconnect failed");
                }
            }
            ConnectionState::Failed => {
                warn!("sync: connection failed, waiting for an explicit open");
                listing.publish(ListingEvent::ConnectionFailed);
            }
            ConnectionState::Connecting | ConnectionState::Disconnected => {}
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
