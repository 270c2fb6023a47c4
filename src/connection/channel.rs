use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;

/// What a change-notification channel hands to its subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelSignal {
    /// One raw notification, not yet validated.
    Message(JsonValue),
    /// The subscriber fell behind and `n` notifications were lost.
    Lagged(u64),
    /// The channel is gone; nothing further will be delivered.
    Closed,
}

pub type SignalHandler = Arc<dyn Fn(ChannelSignal) + Send + Sync>;

/// Push channel of change notifications, scoped per resource type.
///
/// Signals for one subscription are delivered in order. Reconnecting after a
/// drop is the implementation's concern; subscribers only see what arrives
/// while connected.
pub trait Channel: Send + Sync {
    fn subscribe(&self, resource: &str, on_signal: SignalHandler) -> Subscription;
}

/// Live subscription handle. Dropping it unsubscribes.
pub struct Subscription {
    resource: String,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(resource: impl Into<String>, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            resource: resource.into(),
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("resource", &self.resource)
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_cancel_runs_once() {
        let cancelled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&cancelled);
        let subscription = Subscription::new("printer", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(subscription.resource(), "printer");

        subscription.unsubscribe();
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let cancelled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&cancelled);
        {
            let _subscription = Subscription::new("printer", move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    }
}
