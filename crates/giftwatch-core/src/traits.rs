//! Collaborator traits: the seams between the two loops and the outside world.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{AppendOutcome, Gift, GiftCandidate, GiftStats, RecipientCheckpoint, SourceMessage};

/// Fetches recent messages from a watched channel.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Source name for logs.
    fn name(&self) -> &str;

    /// Up to `limit` most recent messages from `channel_id`, newest first.
    async fn fetch_recent(&self, channel_id: i64, limit: usize) -> Result<Vec<SourceMessage>>;
}

/// Delivers a text to a recipient.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, recipient_id: i64, text: &str) -> Result<()>;
}

/// Append-only gift log.
#[async_trait]
pub trait GiftStore: Send + Sync {
    /// Persist a candidate, assigning its creation time.
    /// Idempotent on (channel, message): a repeat returns the stored record.
    async fn append(&self, candidate: &GiftCandidate) -> Result<AppendOutcome>;

    /// Gifts created strictly after `since`, newest first.
    async fn list_since(&self, since: DateTime<Utc>, limit: Option<usize>) -> Result<Vec<Gift>>;

    /// Newest gifts regardless of age.
    async fn recent(&self, limit: usize) -> Result<Vec<Gift>>;

    async fn stats(&self) -> Result<GiftStats>;
}

/// One record per recipient; mutations are atomic per recipient.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Read-with-default-insert.
    async fn get(&self, recipient_id: i64) -> Result<RecipientCheckpoint>;

    async fn set_enabled(&self, recipient_id: i64, enabled: bool) -> Result<RecipientCheckpoint>;

    /// Flip the enabled flag and return the new value.
    async fn toggle_enabled(&self, recipient_id: i64) -> Result<bool>;

    /// Rejects zero with `GiftWatchError::Validation`.
    async fn set_interval(&self, recipient_id: i64, minutes: u32) -> Result<RecipientCheckpoint>;

    async fn advance_checkpoint(&self, recipient_id: i64, at: DateTime<Utc>) -> Result<()>;

    /// All recipients with notifications enabled.
    async fn list_enabled(&self) -> Result<Vec<RecipientCheckpoint>>;
}
