//! Local copy of the subscribed folder's contents.
//!
//! The reconciler is bound to one folder at a time. Live notifications are
//! applied by item id, so re-deliveries and echoes of this client's own
//! mutations never duplicate an entry. A full listing fetch (after a folder
//! switch or a reconnect) is merged with whatever arrived live while the
//! fetch was in flight.

use std::collections::{HashMap, HashSet};

use shared::{
    domain::{FolderRef, Item, ItemId},
    protocol::Notification,
};

/// Change to the visible listing, published for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingEvent {
    /// The whole collection was replaced: after a folder switch (empty) and
    /// after each seeding fetch.
    Reset { folder: FolderRef, items: Vec<Item> },
    Added(Item),
    Removed(ItemId),
    Renamed(Item),
    /// Reconnection gave up; a new `open` is needed.
    ConnectionFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Added,
    Removed,
    Renamed,
    /// `ADDED` for an id already present.
    Duplicate,
    /// `DELETED`/`RENAMED` for an id not present.
    Missing,
    /// Tagged with a path other than the bound folder's.
    OtherPath,
    Unbound,
}

impl ApplyOutcome {
    pub fn changed(self) -> bool {
        matches!(self, Self::Added | Self::Removed | Self::Renamed)
    }
}

/// Live traffic observed while a listing fetch is in flight.
#[derive(Debug, Default)]
struct PendingFetch {
    /// Items added or renamed live; their live copy wins over the fetch.
    touched: HashSet<ItemId>,
    /// Renames for items not materialized yet, patched into the fetch.
    renamed: HashMap<ItemId, Item>,
    removed: HashSet<ItemId>,
}

#[derive(Debug, Default)]
pub struct ListingReconciler {
    folder: Option<FolderRef>,
    items: Vec<Item>,
    generation: u64,
    pending: Option<PendingFetch>,
}

impl ListingReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// A reconciler already bound to `folder` with nothing to seed.
    pub fn bound_to(folder: FolderRef) -> Self {
        Self {
            folder: Some(folder),
            ..Self::default()
        }
    }

    pub fn folder(&self) -> Option<&FolderRef> {
        self.folder.as_ref()
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_seeding(&self) -> bool {
        self.pending.is_some()
    }

    /// Binds to `folder`, clearing the collection. Returns the generation a
    /// subsequent [`seed`](Self::seed) must carry to be accepted.
    pub fn rebind(&mut self, folder: FolderRef) -> u64 {
        self.folder = Some(folder);
        self.items.clear();
        self.start_fetch()
    }

    /// Starts a re-fetch of the bound folder without clearing the collection.
    /// Live traffic already tracked for an in-flight fetch carries over to
    /// the new one.
    pub fn begin_refresh(&mut self) -> Option<(u64, FolderRef)> {
        let folder = self.folder.clone()?;
        let pending = self.pending.take().unwrap_or_default();
        self.generation += 1;
        self.pending = Some(pending);
        Some((self.generation, folder))
    }

    /// Replaces the collection with `fetched`, merged with live traffic seen
    /// since the fetch started. Returns `false` for a superseded fetch.
    pub fn seed(&mut self, generation: u64, fetched: Vec<Item>) -> bool {
        if generation != self.generation {
            return false;
        }
        let Some(pending) = self.pending.take() else {
            return false;
        };

        let live: Vec<Item> = self
            .items
            .drain(..)
            .filter(|item| pending.touched.contains(&item.id))
            .collect();

        let mut merged = Vec::with_capacity(fetched.len() + live.len());
        let mut seen = HashSet::with_capacity(fetched.len());
        for item in fetched {
            if pending.removed.contains(&item.id) || !seen.insert(item.id.clone()) {
                continue;
            }
            let item = live
                .iter()
                .find(|candidate| candidate.id == item.id)
                .cloned()
                .or_else(|| pending.renamed.get(&item.id).cloned())
                .unwrap_or(item);
            merged.push(item);
        }
        // Live additions the fetch predates keep their arrival order.
        merged.extend(live.into_iter().filter(|item| !seen.contains(&item.id)));

        self.items = merged;
        true
    }

    pub fn apply(&mut self, notification: &Notification) -> ApplyOutcome {
        let Some(folder) = self.folder.as_ref() else {
            return ApplyOutcome::Unbound;
        };
        if notification.path() != folder.path {
            return ApplyOutcome::OtherPath;
        }

        match notification {
            Notification::Added { item, .. } => {
                if self.position(&item.id).is_some() {
                    return ApplyOutcome::Duplicate;
                }
                self.items.push(item.clone());
                if let Some(pending) = self.pending.as_mut() {
                    pending.removed.remove(&item.id);
                    pending.touched.insert(item.id.clone());
                }
                ApplyOutcome::Added
            }
            Notification::Deleted { item_id, .. } => {
                if let Some(pending) = self.pending.as_mut() {
                    pending.touched.remove(item_id);
                    pending.renamed.remove(item_id);
                    pending.removed.insert(item_id.clone());
                }
                match self.position(item_id) {
                    Some(index) => {
                        self.items.remove(index);
                        ApplyOutcome::Removed
                    }
                    None => ApplyOutcome::Missing,
                }
            }
            Notification::Renamed { item, .. } => match self.position(&item.id) {
                Some(index) => {
                    self.items[index] = item.clone();
                    if let Some(pending) = self.pending.as_mut() {
                        pending.touched.insert(item.id.clone());
                    }
                    ApplyOutcome::Renamed
                }
                None => {
                    if let Some(pending) = self.pending.as_mut() {
                        pending.renamed.insert(item.id.clone(), item.clone());
                    }
                    ApplyOutcome::Missing
                }
            },
        }
    }

    fn start_fetch(&mut self) -> u64 {
        self.generation += 1;
        self.pending = Some(PendingFetch::default());
        self.generation
    }

    fn position(&self, id: &ItemId) -> Option<usize> {
        self.items.iter().position(|item| &item.id == id)
    }
}

#[cfg(test)]
#[path = "tests/listing_tests.rs"]
mod tests;
