//! In-process fakes for the source and delivery collaborators.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use giftwatch_core::error::{GiftWatchError, Result};
use giftwatch_core::traits::{DeliverySink, SourceClient};
use giftwatch_core::types::SourceMessage;

/// In-memory source: per-channel messages, or a failure.
#[derive(Default)]
pub struct FakeSource {
    pub channels: Mutex<HashMap<i64, Vec<SourceMessage>>>,
    pub failing: Vec<i64>,
    pub panics: bool,
    pub calls: AtomicUsize,
}

impl FakeSource {
    pub fn with(channel_id: i64, messages: Vec<SourceMessage>) -> Self {
        let source = Self::default();
        source.channels.lock().unwrap().insert(channel_id, messages);
        source
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceClient for FakeSource {
    fn name(&self) -> &str {
        "fake"
    }

    async fn fetch_recent(&self, channel_id: i64, limit: usize) -> Result<Vec<SourceMessage>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panics {
            panic!("source exploded");
        }
        if self.failing.contains(&channel_id) {
            return Err(GiftWatchError::SourceFetch(format!("{channel_id} unreachable")));
        }
        let channels = self.channels.lock().unwrap();
        Ok(channels
            .get(&channel_id)
            .map(|m| m.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

/// Records deliveries; can be told to fail.
#[derive(Default)]
pub struct RecordingSink {
    pub sent: Mutex<Vec<(i64, String)>>,
    pub fail: AtomicBool,
    pub fail_for: Vec<i64>,
}

impl RecordingSink {
    pub fn sent(&self) -> Vec<(i64, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl DeliverySink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn deliver(&self, recipient_id: i64, text: &str) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) || self.fail_for.contains(&recipient_id) {
            return Err(GiftWatchError::Delivery("bot was blocked".into()));
        }
        self.sent.lock().unwrap().push((recipient_id, text.to_string()));
        Ok(())
    }
}

/// Sink whose every delivery panics; counts attempts.
#[derive(Default)]
pub struct PanickingSink {
    calls: AtomicUsize,
}

impl PanickingSink {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeliverySink for PanickingSink {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn deliver(&self, _recipient_id: i64, _text: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        panic!("sink exploded");
    }
}

pub fn message(channel_id: i64, message_id: i64, text: &str, age_hours: i64) -> SourceMessage {
    SourceMessage {
        channel_id,
        message_id,
        text: text.into(),
        timestamp: Utc::now() - chrono::Duration::hours(age_hours),
    }
}
