use super::*;
use shared::domain::ItemId;

fn noop() -> Arc<dyn Observer> {
    Arc::new(|_: &Notification| -> anyhow::Result<()> { Ok(()) })
}

fn deleted(id: &str) -> Notification {
    Notification::Deleted {
        path: String::new(),
        item_id: ItemId::new(id),
    }
}

#[test]
fn registrations_are_kept_per_kind_in_order() {
    let registry = EventRegistry::new();
    let first = noop();
    let second = noop();
    registry.on(NotificationKind::Added, Arc::clone(&first));
    registry.on(NotificationKind::Added, Arc::clone(&second));
    registry.on(NotificationKind::Deleted, noop());

    let added = registry.observers(NotificationKind::Added);
    assert_eq!(added.len(), 2);
    assert!(Arc::ptr_eq(&added[0], &first));
    assert!(Arc::ptr_eq(&added[1], &second));
    assert_eq!(registry.len(NotificationKind::Deleted), 1);
    assert_eq!(registry.len(NotificationKind::Renamed), 0);
}

#[test]
fn double_registration_needs_two_removals() {
    let registry = EventRegistry::new();
    let observer = noop();
    let a = registry.on(NotificationKind::Renamed, Arc::clone(&observer));
    let b = registry.on(NotificationKind::Renamed, Arc::clone(&observer));
    assert_ne!(a, b);

    assert!(registry.off(&a));
    assert_eq!(registry.len(NotificationKind::Renamed), 1);
    assert!(!registry.off(&a), "handle is single-use");
    assert!(registry.off(&b));
    assert!(registry.is_empty());
}

#[test]
fn off_observer_removes_first_match_only() {
    let registry = EventRegistry::new();
    let observer = noop();
    let other = noop();
    registry.on(NotificationKind::Added, Arc::clone(&observer));
    registry.on(NotificationKind::Added, Arc::clone(&other));
    registry.on(NotificationKind::Added, Arc::clone(&observer));

    assert!(registry.off_observer(NotificationKind::Added, &observer));
    let remaining = registry.observers(NotificationKind::Added);
    assert_eq!(remaining.len(), 2);
    assert!(Arc::ptr_eq(&remaining[0], &other));
    assert!(Arc::ptr_eq(&remaining[1], &observer));

    assert!(!registry.off_observer(NotificationKind::Deleted, &observer));
}

#[test]
fn off_with_handle_of_other_kind_is_noop() {
    let registry = EventRegistry::new();
    let added = registry.on(NotificationKind::Added, noop());
    registry.on(NotificationKind::Deleted, noop());
    assert!(registry.off(&added));
    assert_eq!(registry.len(NotificationKind::Deleted), 1);
}

#[test]
fn closures_act_as_observers() {
    let registry = EventRegistry::new();
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    registry.on(
        NotificationKind::Deleted,
        Arc::new(move |n: &Notification| -> anyhow::Result<()> {
            sink.lock().expect("lock").push(n.item_id().clone());
            Ok(())
        }),
    );

    for observer in registry.observers(NotificationKind::Deleted) {
        observer.notify(&deleted("7")).expect("notify");
    }
    assert_eq!(*seen.lock().expect("lock"), vec![ItemId::new("7")]);
}
