//! # GiftWatch Core
//!
//! Shared data model, collaborator traits, configuration and errors.
//! Every other GiftWatch crate depends on this one and nothing here does I/O
//! beyond reading the config file.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{GiftWatchConfig, MonitorSettings};
pub use error::{GiftWatchError, Result};
pub use traits::{CheckpointStore, DeliverySink, GiftStore, SourceClient};
pub use types::{
    AppendOutcome, CheckInterval, Gift, GiftCandidate, GiftStats, RecipientCheckpoint,
    SourceMessage,
};
