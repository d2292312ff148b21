//! Error types shared across GiftWatch crates.

use thiserror::Error;

/// Every failure the monitor, scheduler and front end can surface.
///
/// A message that simply fails a classifier filter is not an error; see
/// `giftwatch_scheduler::classifier::SkipReason`.
#[derive(Debug, Error)]
pub enum GiftWatchError {
    /// Fetching recent messages from one channel failed.
    #[error("Source fetch error: {0}")]
    SourceFetch(String),

    /// The persistence layer rejected or failed an operation.
    #[error("Store error: {0}")]
    Store(String),

    /// The outbound transport did not accept a message.
    #[error("Delivery error: {0}")]
    Delivery(String),

    /// Missing or invalid settings. Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An argument failed validation (zero interval, negative price, ...).
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Transport-level failure talking to the messaging platform.
    #[error("Channel error: {0}")]
    Channel(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GiftWatchError {
    /// Whether the next tick may reasonably succeed where this one failed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::SourceFetch(_) | Self::Store(_) | Self::Delivery(_) | Self::Channel(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, GiftWatchError>;
