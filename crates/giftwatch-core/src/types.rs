//! Data model: gifts, candidates, source messages and recipient checkpoints.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Maximum display-name length, in characters.
pub const MAX_NAME_CHARS: usize = 100;

/// Placeholder name when no line of the message names the gift.
pub const UNKNOWN_GIFT_NAME: &str = "Неизвестный подарок";

/// A message as returned by a [`crate::SourceClient`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMessage {
    pub channel_id: i64,
    pub message_id: i64,
    pub text: String,
    /// When the message was posted in the channel.
    pub timestamp: DateTime<Utc>,
}

/// Provisional extraction result, validated but not yet persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GiftCandidate {
    pub name: String,
    pub price: f64,
    pub channel_id: i64,
    pub message_id: i64,
}

impl GiftCandidate {
    /// Stable identity string: `{channel_id}_{message_id}`.
    pub fn gift_id(&self) -> String {
        gift_id(self.channel_id, self.message_id)
    }
}

/// A persisted gift. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gift {
    /// Stable identity string: `{channel_id}_{message_id}`.
    pub gift_id: String,
    pub name: String,
    pub price: f64,
    pub channel_id: i64,
    pub message_id: i64,
    /// Assigned by the store when the gift was first persisted.
    pub created_at: DateTime<Utc>,
}

/// Build the identity string for a (channel, message) pair.
pub fn gift_id(channel_id: i64, message_id: i64) -> String {
    format!("{channel_id}_{message_id}")
}

/// Result of an idempotent append.
#[derive(Debug, Clone, PartialEq)]
pub enum AppendOutcome {
    /// First sighting: a new record was written.
    Inserted(Gift),
    /// A gift with this identity already existed; nothing was written.
    Existing(Gift),
}

impl AppendOutcome {
    pub fn gift(&self) -> &Gift {
        match self {
            Self::Inserted(g) | Self::Existing(g) => g,
        }
    }

    pub fn into_gift(self) -> Gift {
        match self {
            Self::Inserted(g) | Self::Existing(g) => g,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}

/// Aggregate view over the gift log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GiftStats {
    pub count: u64,
    /// Rounded to two decimals; 0.0 when the log is empty.
    pub average_price: f64,
    pub distinct_channels: u64,
}

/// Preset check intervals offered to recipients.
/// Any positive number of minutes is accepted by the store; these are the menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckInterval {
    QuarterHour,
    Hourly,
    ThreeHours,
    Daily,
}

impl CheckInterval {
    pub const ALL: [CheckInterval; 4] = [
        CheckInterval::QuarterHour,
        CheckInterval::Hourly,
        CheckInterval::ThreeHours,
        CheckInterval::Daily,
    ];

    pub fn minutes(&self) -> u32 {
        match self {
            Self::QuarterHour => 15,
            Self::Hourly => 60,
            Self::ThreeHours => 180,
            Self::Daily => 1440,
        }
    }

    pub fn from_minutes(minutes: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|i| i.minutes() == minutes)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::QuarterHour => "every 15 minutes",
            Self::Hourly => "every hour",
            Self::ThreeHours => "every 3 hours",
            Self::Daily => "once a day",
        }
    }
}

impl std::fmt::Display for CheckInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Default interval for recipients seen for the first time.
pub const DEFAULT_INTERVAL_MINUTES: u32 = 60;

/// Per-recipient notification state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipientCheckpoint {
    pub recipient_id: i64,
    pub notifications_enabled: bool,
    /// Always > 0.
    pub interval_minutes: u32,
    /// Last time the recipient was brought up to date. Epoch means never.
    pub last_checkpoint: DateTime<Utc>,
}

impl RecipientCheckpoint {
    /// A fresh record: enabled, hourly, never checked.
    pub fn new(recipient_id: i64) -> Self {
        Self::with_interval(recipient_id, DEFAULT_INTERVAL_MINUTES)
    }

    pub fn with_interval(recipient_id: i64, interval_minutes: u32) -> Self {
        Self {
            recipient_id,
            notifications_enabled: true,
            interval_minutes: interval_minutes.max(1),
            last_checkpoint: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::minutes(i64::from(self.interval_minutes))
    }

    /// When the recipient next becomes due.
    pub fn next_due(&self) -> DateTime<Utc> {
        self.last_checkpoint + self.interval()
    }

    /// Whether at least one full interval has elapsed since the checkpoint.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now - self.last_checkpoint >= self.interval()
    }

    pub fn has_never_been_checked(&self) -> bool {
        self.last_checkpoint == DateTime::<Utc>::UNIX_EPOCH
    }
}
