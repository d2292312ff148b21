//! Source poller: samples every watched channel and feeds the gift log.
//!
//! Lifecycle: `Stopped → Running → Stopping → Stopped`. `stop()` is
//! cooperative and takes effect at the next tick boundary (including the
//! sleep between ticks), never in the middle of a fetch.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use giftwatch_core::GiftWatchConfig;
use giftwatch_core::error::{GiftWatchError, Result};
use giftwatch_core::traits::{GiftStore, SourceClient};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::classifier::GiftClassifier;
use crate::settings::SettingsHandle;

/// Poller lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Stopped,
    Running,
    Stopping,
}

impl std::fmt::Display for PollerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PollerState::Stopped => write!(f, "stopped"),
            PollerState::Running => write!(f, "running"),
            PollerState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Timing and batch size for the poll loop.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Pause after a successful tick.
    pub check_interval: Duration,
    /// Pause after a failed tick.
    pub error_cooldown: Duration,
    /// Messages fetched per channel.
    pub fetch_limit: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(300),
            error_cooldown: Duration::from_secs(60),
            fetch_limit: 50,
        }
    }
}

impl From<&GiftWatchConfig> for PollerConfig {
    fn from(config: &GiftWatchConfig) -> Self {
        Self {
            check_interval: Duration::from_secs(config.monitor.check_interval_secs),
            error_cooldown: Duration::from_secs(config.monitor.error_cooldown_secs),
            fetch_limit: config.monitor.fetch_limit,
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub channels_polled: usize,
    pub channels_failed: usize,
    pub messages_seen: usize,
    pub candidates: usize,
    pub new_gifts: usize,
    pub store_errors: usize,
}

/// Periodically fetches channel messages, classifies them and appends gifts.
pub struct SourcePoller {
    source: Arc<dyn SourceClient>,
    store: Arc<dyn GiftStore>,
    settings: SettingsHandle,
    config: PollerConfig,
    state: watch::Sender<PollerState>,
}

impl SourcePoller {
    pub fn new(
        source: Arc<dyn SourceClient>,
        store: Arc<dyn GiftStore>,
        settings: SettingsHandle,
        config: PollerConfig,
    ) -> Self {
        let (state, _rx) = watch::channel(PollerState::Stopped);
        Self {
            source,
            store,
            settings,
            config,
            state,
        }
    }

    pub fn state(&self) -> PollerState {
        *self.state.borrow()
    }

    /// `Stopped → Running`. Returns false if the poller was not stopped.
    pub fn start(&self) -> bool {
        self.state.send_if_modified(|s| {
            if *s == PollerState::Stopped {
                *s = PollerState::Running;
                true
            } else {
                false
            }
        })
    }

    /// Request `Running → Stopping`. No-op in any other state.
    pub fn stop(&self) {
        let requested = self.state.send_if_modified(|s| {
            if *s == PollerState::Running {
                *s = PollerState::Stopping;
                true
            } else {
                false
            }
        });
        if requested {
            tracing::info!("🛑 Monitoring stop requested");
        }
    }

    /// Resolves once the loop has exited.
    pub async fn stopped(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| *s == PollerState::Stopped).await;
    }

    /// Start and run the loop on a background task.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        // Transition before spawning so an immediate stop() is not lost.
        self.start();
        tokio::spawn(async move { self.run_loop().await })
    }

    /// Start and run the loop on the current task until stopped.
    pub async fn run(&self) {
        self.start();
        self.run_loop().await;
    }

    async fn run_loop(&self) {
        tracing::info!(
            "📡 Starting monitoring for {} channels via {} (every {}s)",
            self.settings.snapshot().channels.len(),
            self.source.name(),
            self.config.check_interval.as_secs()
        );

        while self.state() == PollerState::Running {
            let outcome = AssertUnwindSafe(self.tick(Utc::now())).catch_unwind().await;
            let pause = match outcome {
                Ok(Ok(report)) => {
                    if report.new_gifts > 0 || report.channels_failed > 0 {
                        tracing::info!(
                            "📡 Poll tick: {} channels ({} failed), {} messages, {} new gifts",
                            report.channels_polled,
                            report.channels_failed,
                            report.messages_seen,
                            report.new_gifts
                        );
                    } else {
                        tracing::debug!("📡 Poll tick: nothing new ({:?})", report);
                    }
                    self.config.check_interval
                }
                Ok(Err(e)) => {
                    tracing::error!("❌ Monitoring error: {e}");
                    self.config.error_cooldown
                }
                Err(_) => {
                    tracing::error!("❌ Monitoring tick panicked");
                    self.config.error_cooldown
                }
            };
            self.pause(pause).await;
        }

        self.state.send_replace(PollerState::Stopped);
        tracing::info!("📡 Monitoring stopped");
    }

    /// Sleep, waking early if a stop is requested.
    async fn pause(&self, duration: Duration) {
        let mut rx = self.state.subscribe();
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = rx.wait_for(|s| *s != PollerState::Running) => {}
        }
    }

    /// One pass over every watched channel.
    ///
    /// Fetch failures are isolated per channel. Store failures are isolated
    /// per message but fail the tick once all channels were processed, so
    /// the loop backs off.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let settings = self.settings.snapshot();
        let classifier = GiftClassifier::from_settings(&settings);
        let mut report = TickReport::default();
        let mut store_error: Option<GiftWatchError> = None;

        for &channel_id in &settings.channels {
            report.channels_polled += 1;
            let messages = match self
                .source
                .fetch_recent(channel_id, self.config.fetch_limit)
                .await
            {
                Ok(messages) => messages,
                Err(e) => {
                    tracing::warn!("⚠️ Error processing channel {channel_id}: {e}");
                    report.channels_failed += 1;
                    continue;
                }
            };
            report.messages_seen += messages.len();

            for message in &messages {
                let candidate = match classifier.classify_message(message, now) {
                    Ok(candidate) => candidate,
                    Err(reason) => {
                        tracing::trace!(
                            "skip {}/{}: {reason}",
                            message.channel_id,
                            message.message_id
                        );
                        continue;
                    }
                };
                report.candidates += 1;

                match self.store.append(&candidate).await {
                    Ok(outcome) if outcome.is_new() => {
                        report.new_gifts += 1;
                        tracing::info!(
                            "🎁 New gift found: {} - {} руб. (channel {})",
                            candidate.name,
                            candidate.price,
                            candidate.channel_id
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("⚠️ Failed to save gift {}: {e}", candidate.gift_id());
                        report.store_errors += 1;
                        store_error.get_or_insert(e);
                    }
                }
            }
        }

        match store_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}
