//! # GiftWatch Scheduler
//!
//! The two loops and everything they share.
//!
//! ## Architecture
//! ```text
//! SourcePoller (every CHECK_INTERVAL, 60s cooldown after a failed tick)
//!   └── for each watched channel
//!         fetch_recent(50) → GiftClassifier → GiftDb::append (idempotent)
//!
//! NotificationScheduler (every SCHEDULER_TICK)
//!   └── for each enabled recipient that is due
//!         GiftDb::list_since(checkpoint) → digest → DeliverySink
//!         └── advance checkpoint only if delivered (or nothing to send)
//! ```
//!
//! The loops never talk to each other; they only share the store.

pub mod classifier;
pub mod engine;
pub mod notify;
pub mod persistence;
pub mod poller;
pub mod settings;

#[cfg(test)]
pub(crate) mod testing;

pub use classifier::{ExtractedGift, GiftClassifier, SkipReason};
pub use engine::{NotificationScheduler, RecipientOutcome, ScheduleReport, SchedulerConfig};
pub use persistence::GiftDb;
pub use poller::{PollerConfig, PollerState, SourcePoller, TickReport};
pub use settings::SettingsHandle;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeSource, RecordingSink, message};
    use chrono::{Duration, Utc};
    use giftwatch_core::MonitorSettings;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_message_to_notification() {
        let now = Utc::now();
        let source = Arc::new(FakeSource::with(
            -100,
            vec![message(-100, 77, "🎁 Подарок дня\nКубок чемпиона\n1500 руб", 1)],
        ));
        let db = Arc::new(GiftDb::open_in_memory().unwrap());
        let sink = Arc::new(RecordingSink::default());
        let settings = SettingsHandle::new(MonitorSettings {
            channels: vec![-100],
            ..MonitorSettings::default()
        });

        let poller = SourcePoller::new(source, db.clone(), settings, PollerConfig::default());
        let scheduler = NotificationScheduler::new(
            db.clone(),
            db.clone(),
            sink.clone(),
            SchedulerConfig::default(),
        );

        db.set_check_interval(1, 60).unwrap();
        db.set_checkpoint(1, now - Duration::hours(2)).unwrap();

        assert_eq!(poller.tick(Utc::now()).await.unwrap().new_gifts, 1);
        assert_eq!(db.gift_count().unwrap(), 1);

        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let tick_at = Utc::now();
        let report = scheduler.tick(tick_at).await.unwrap();
        assert_eq!(report.delivered, 1);
        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("Подарок дня - 1500 руб."));
        assert_eq!(
            db.checkpoint(1).unwrap().last_checkpoint.timestamp_micros(),
            tick_at.timestamp_micros() - 1
        );

        // Replay on the next poll tick: still exactly one gift, nothing new to send.
        assert_eq!(poller.tick(Utc::now()).await.unwrap().new_gifts, 0);
        assert_eq!(db.gift_count().unwrap(), 1);
        let later = tick_at + Duration::minutes(61);
        scheduler.tick(later).await.unwrap();
        assert_eq!(sink.sent().len(), 1);
    }
}
