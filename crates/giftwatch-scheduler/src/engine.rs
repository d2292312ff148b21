//! Notification scheduler: the loop that brings each recipient up to date.
//! Uses tokio::interval for ticking; every recipient is judged against its
//! own interval, so recipients are never processed in lockstep.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use giftwatch_core::GiftWatchConfig;
use giftwatch_core::error::Result;
use giftwatch_core::traits::{CheckpointStore, DeliverySink, GiftStore};
use giftwatch_core::types::RecipientCheckpoint;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::notify::format_digest;

/// Scheduler timing and digest size.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick: Duration,
    /// Gifts listed per digest.
    pub max_entries: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(60),
            max_entries: 5,
        }
    }
}

impl From<&GiftWatchConfig> for SchedulerConfig {
    fn from(config: &GiftWatchConfig) -> Self {
        Self {
            tick: Duration::from_secs(config.notifications.tick_secs),
            max_entries: config.notifications.max_entries,
        }
    }
}

/// What happened to one recipient in one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipientOutcome {
    NotDue,
    /// Due, nothing new; checkpoint advanced.
    NothingNew,
    /// Digest with this many gifts delivered; checkpoint advanced.
    Delivered(usize),
    /// Sink refused; checkpoint left alone so the next tick retries.
    DeliveryFailed,
    StoreFailed,
}

/// Tick summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScheduleReport {
    pub evaluated: usize,
    pub due: usize,
    pub delivered: usize,
    pub delivery_failures: usize,
    pub store_failures: usize,
}

impl ScheduleReport {
    fn record(&mut self, outcome: &RecipientOutcome) {
        self.evaluated += 1;
        match outcome {
            RecipientOutcome::NotDue => {}
            RecipientOutcome::NothingNew => self.due += 1,
            RecipientOutcome::Delivered(_) => {
                self.due += 1;
                self.delivered += 1;
            }
            RecipientOutcome::DeliveryFailed => {
                self.due += 1;
                self.delivery_failures += 1;
            }
            RecipientOutcome::StoreFailed => {
                self.due += 1;
                self.store_failures += 1;
            }
        }
    }
}

/// Delivers per-recipient gift deltas on each recipient's own cadence.
pub struct NotificationScheduler {
    gifts: Arc<dyn GiftStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    sink: Arc<dyn DeliverySink>,
    config: SchedulerConfig,
}

impl NotificationScheduler {
    pub fn new(
        gifts: Arc<dyn GiftStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        sink: Arc<dyn DeliverySink>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            gifts,
            checkpoints,
            sink,
            config,
        }
    }

    /// Evaluate every enabled recipient against `now`.
    /// Fails only when the recipient list itself cannot be read.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<ScheduleReport> {
        let recipients = self.checkpoints.list_enabled().await?;
        let mut report = ScheduleReport::default();
        for checkpoint in &recipients {
            let outcome = self.evaluate(checkpoint, now).await;
            report.record(&outcome);
        }
        Ok(report)
    }

    /// Bring one recipient up to date if due. Failures stay with this recipient.
    pub async fn evaluate(&self, checkpoint: &RecipientCheckpoint, now: DateTime<Utc>) -> RecipientOutcome {
        let recipient = checkpoint.recipient_id;
        if !checkpoint.is_due(now) {
            return RecipientOutcome::NotDue;
        }

        let gifts = match self.gifts.list_since(checkpoint.last_checkpoint, None).await {
            Ok(gifts) => gifts,
            Err(e) => {
                tracing::warn!("⚠️ Could not load gifts for {recipient}: {e}");
                return RecipientOutcome::StoreFailed;
            }
        };

        if !gifts.is_empty() {
            let text = format_digest(&gifts, self.config.max_entries);
            if let Err(e) = self.sink.deliver(recipient, &text).await {
                tracing::warn!(
                    "⚠️ Notification to {recipient} via {} failed, will retry: {e}",
                    self.sink.name()
                );
                return RecipientOutcome::DeliveryFailed;
            }
        }

        // One microsecond back: a gift stamped in the same microsecond as
        // `now` may have been written after the query and must stay reachable.
        let checkpoint_at = now - chrono::Duration::microseconds(1);
        if let Err(e) = self.checkpoints.advance_checkpoint(recipient, checkpoint_at).await {
            tracing::warn!("⚠️ Could not advance checkpoint for {recipient}: {e}");
            return RecipientOutcome::StoreFailed;
        }

        if gifts.is_empty() {
            RecipientOutcome::NothingNew
        } else {
            tracing::info!("📣 Sent {} new gifts to {recipient}", gifts.len());
            RecipientOutcome::Delivered(gifts.len())
        }
    }

    /// Run until `shutdown` flips to true (or its sender is dropped).
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "⏰ Notification scheduler started (check every {}s)",
            self.config.tick.as_secs()
        );

        let mut interval = tokio::time::interval(self.config.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            if *shutdown.borrow() {
                break;
            }

            let outcome = AssertUnwindSafe(self.tick(Utc::now())).catch_unwind().await;
            match outcome {
                Ok(Ok(report)) if report.due > 0 => {
                    tracing::info!(
                        "⏰ Notification tick: {} due, {} delivered, {} delivery failures, {} store failures",
                        report.due,
                        report.delivered,
                        report.delivery_failures,
                        report.store_failures
                    );
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::error!("❌ Notification tick failed: {e}"),
                Err(_) => tracing::error!("❌ Notification tick panicked"),
            }
        }

        tracing::info!("⏰ Notification scheduler stopped");
    }

    /// Spawn the scheduler loop as a background tokio task.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}
