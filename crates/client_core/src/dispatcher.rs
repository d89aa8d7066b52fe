//! Decodes inbound frames and hands each notification to its observers.

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use shared::protocol::{Notification, NotificationKind};
use tracing::{debug, warn};

use crate::registry::EventRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub kind: NotificationKind,
    pub delivered: usize,
    pub failed: usize,
}

/// Decodes inbound frames and fans them out to the registered observers.
pub struct NotificationDispatcher {
    registry: Arc<EventRegistry>,
}

impl NotificationDispatcher {
    pub fn new(registry: Arc<EventRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<EventRegistry> {
        &self.registry
    }

    /// Returns `None` when the frame was dropped as unparseable.
    pub fn dispatch_frame(&self, frame: &str) -> Option<DispatchReport> {
        match Notification::from_frame(frame) {
            Ok(notification) => Some(self.dispatch(&notification)),
            Err(err) => {
                warn!(%err, frame_len = frame.len(), "sync: dropping unparseable frame");
                None
            }
        }
    }

    pub fn dispatch(&self, notification: &Notification) -> DispatchReport {
        let kind = notification.kind();
        let mut report = DispatchReport {
            kind,
            delivered: 0,
            failed: 0,
        };

        for (index, observer) in self.registry.observers(kind).into_iter().enumerate() {
            match panic::catch_unwind(AssertUnwindSafe(|| observer.notify(notification))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(err)) => {
                    report.failed += 1;
                    warn!(kind = kind.as_str(), observer = index, %err, "sync: observer failed");
                }
                Err(payload) => {
                    report.failed += 1;
                    warn!(
                        kind = kind.as_str(),
                        observer = index,
                        panic = panic_message(payload.as_ref()),
                        "sync: observer panicked"
                    );
                }
            }
        }

        debug!(
            kind = kind.as_str(),
            path = notification.path(),
            delivered = report.delivered,
            failed = report.failed,
            "sync: notification dispatched"
        );
        report
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
#[path = "tests/dispatcher_tests.rs"]
mod tests;
