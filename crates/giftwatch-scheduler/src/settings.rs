//! Monitor settings handle: publishes immutable snapshots to the poller.
//!
//! Admin edits build a new `MonitorSettings` and swap it in; a tick that is
//! already running keeps the snapshot it started with.

use std::sync::Arc;

use giftwatch_core::MonitorSettings;
use giftwatch_core::error::Result;
use tokio::sync::watch;

/// Shared, cloneable handle to the current monitor settings.
#[derive(Clone)]
pub struct SettingsHandle {
    tx: Arc<watch::Sender<Arc<MonitorSettings>>>,
}

impl SettingsHandle {
    pub fn new(initial: MonitorSettings) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self { tx: Arc::new(tx) }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<MonitorSettings> {
        self.tx.borrow().clone()
    }

    /// Receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<MonitorSettings>> {
        self.tx.subscribe()
    }

    /// Apply `f` atomically; `None` means nothing changed and nobody is woken.
    fn update<F>(&self, f: F) -> Arc<MonitorSettings>
    where
        F: FnOnce(&MonitorSettings) -> Option<MonitorSettings>,
    {
        self.tx.send_if_modified(|current| match f(&**current) {
            Some(next) => {
                *current = Arc::new(next);
                true
            }
            None => false,
        });
        self.snapshot()
    }

    /// Start watching a channel. Already watched: no-op.
    pub fn add_channel(&self, channel_id: i64) -> Arc<MonitorSettings> {
        self.update(|current| {
            if current.is_watched(channel_id) {
                return None;
            }
            tracing::info!("📡 Channel {channel_id} added to monitoring");
            Some(current.with_channel(channel_id))
        })
    }

    /// Stop watching a channel. Not watched: no-op.
    pub fn remove_channel(&self, channel_id: i64) -> Arc<MonitorSettings> {
        self.update(|current| {
            if !current.is_watched(channel_id) {
                return None;
            }
            tracing::info!("📡 Channel {channel_id} removed from monitoring");
            Some(current.without_channel(channel_id))
        })
    }

    pub fn set_price_limit(&self, max_gift_price: f64) -> Result<Arc<MonitorSettings>> {
        // Validate up front so the closure below cannot fail.
        self.snapshot().with_price_limit(max_gift_price)?;
        let next = self.update(|current| current.with_price_limit(max_gift_price).ok());
        tracing::info!("💰 Price limit updated to {max_gift_price}");
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_remove_idempotent() {
        let handle = SettingsHandle::new(MonitorSettings::default());
        let first = handle.add_channel(-100);
        let second = handle.add_channel(-100);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(handle.snapshot().channels, vec![-100]);

        let untouched = handle.remove_channel(-5);
        assert!(Arc::ptr_eq(&untouched, &second));

        handle.remove_channel(-100);
        assert!(handle.snapshot().channels.is_empty());
    }

    #[test]
    fn test_old_snapshot_is_unchanged() {
        let handle = SettingsHandle::new(MonitorSettings::default());
        let before = handle.snapshot();
        handle.set_price_limit(10.0).unwrap();
        assert!((before.max_gift_price - 5000.0).abs() < f64::EPSILON);
        assert!((handle.snapshot().max_gift_price - 10.0).abs() < f64::EPSILON);
        assert!(handle.set_price_limit(0.0).is_err());
    }

    #[test]
    fn test_subscribers_see_updates() {
        let handle = SettingsHandle::new(MonitorSettings::default());
        let mut rx = handle.subscribe();
        handle.clone().add_channel(-9);
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_watched(-9));
    }
}
