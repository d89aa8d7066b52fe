//! Per-kind observer bookkeeping for inbound notifications.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use shared::protocol::{Notification, NotificationKind};

/// Something that reacts to dispatched notifications.
///
/// Returning an error only affects this observer; the dispatcher logs it and
/// keeps delivering to the rest.
pub trait Observer: Send + Sync {
    fn notify(&self, notification: &Notification) -> anyhow::Result<()>;
}

impl<F> Observer for F
where
    F: Fn(&Notification) -> anyhow::Result<()> + Send + Sync,
{
    fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        self(notification)
    }
}

/// Handle for one registration, returned by [`EventRegistry::on`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Registration {
    kind: NotificationKind,
    id: u64,
}

impl Registration {
    pub fn kind(&self) -> NotificationKind {
        self.kind
    }
}

#[derive(Default)]
struct RegistryState {
    next_id: u64,
    observers: HashMap<NotificationKind, Vec<(u64, Arc<dyn Observer>)>>,
}

#[derive(Default)]
pub struct EventRegistry {
    state: RwLock<RegistryState>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `observer` to the list for `kind`. Registering the same
    /// observer again creates a second, independent registration.
    pub fn on(&self, kind: NotificationKind, observer: Arc<dyn Observer>) -> Registration {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.next_id += 1;
        let id = state.next_id;
        state.observers.entry(kind).or_default().push((id, observer));
        Registration { kind, id }
    }

    /// Removes exactly the registration behind `registration`.
    /// Returns false if it was already removed.
    pub fn off(&self, registration: &Registration) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let Some(list) = state.observers.get_mut(&registration.kind) else {
            return false;
        };
        match list.iter().position(|(id, _)| *id == registration.id) {
            Some(index) => {
                list.remove(index);
                true
            }
            None => false,
        }
    }

    /// Removes the earliest registration of this very observer for `kind`.
    pub fn off_observer(&self, kind: NotificationKind, observer: &Arc<dyn Observer>) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let Some(list) = state.observers.get_mut(&kind) else {
            return false;
        };
        match list
            .iter()
            .position(|(_, registered)| Arc::ptr_eq(registered, observer))
        {
            Some(index) => {
                list.remove(index);
                true
            }
            None => false,
        }
    }

    /// Snapshot of the observers for `kind` in registration order. Taken
    /// before delivery so observers may (un)register while being notified.
    pub fn observers(&self, kind: NotificationKind) -> Vec<Arc<dyn Observer>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .observers
            .get(&kind)
            .map(|list| list.iter().map(|(_, observer)| Arc::clone(observer)).collect())
            .unwrap_or_default()
    }

    pub fn len(&self, kind: NotificationKind) -> usize {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.observers.get(&kind).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        NotificationKind::ALL.iter().all(|kind| self.len(*kind) == 0)
    }
}

#[cfg(test)]
#[path = "tests/registry_tests.rs"]
mod tests;
