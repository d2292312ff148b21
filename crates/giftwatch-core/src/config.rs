//! GiftWatch configuration system.
//!
//! Loaded from `~/.giftwatch/config.toml` (or an explicit path), then
//! overridden by environment variables, then validated. The result is
//! immutable; runtime changes go through `MonitorSettings` snapshots.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{GiftWatchError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GiftWatchConfig {
    /// Bot API token used for delivery and the command front end.
    #[serde(default)]
    pub bot_token: String,
    /// Users allowed to run admin commands.
    #[serde(default)]
    pub admin_ids: Vec<i64>,
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub source: SourceConfig,
}

fn default_database_path() -> String { "~/.giftwatch/gifts.db".into() }

impl Default for GiftWatchConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            admin_ids: Vec::new(),
            database_path: default_database_path(),
            monitor: MonitorConfig::default(),
            notifications: NotificationConfig::default(),
            source: SourceConfig::default(),
        }
    }
}

impl GiftWatchConfig {
    /// Load config from the default path, falling back to defaults when absent.
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GiftWatchError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| GiftWatchError::Config(format!("Failed to parse config: {e}")))
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the GiftWatch home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".giftwatch")
    }

    /// Database path with `~` expanded.
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.database_path).to_string())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(token) = var("BOT_TOKEN") {
            self.bot_token = token;
        }
        if let Some(ids) = var("ADMIN_IDS") {
            self.admin_ids = parse_id_list("ADMIN_IDS", &ids)?;
        }
        if let Some(channels) = var("TARGET_CHANNELS") {
            self.monitor.channels = parse_id_list("TARGET_CHANNELS", &channels)?;
        }
        if let Some(secs) = var("CHECK_INTERVAL") {
            self.monitor.check_interval_secs = parse_number("CHECK_INTERVAL", &secs)?;
        }
        if let Some(secs) = var("SCHEDULER_TICK") {
            self.notifications.tick_secs = parse_number("SCHEDULER_TICK", &secs)?;
        }
        if let Some(price) = var("MAX_GIFT_PRICE") {
            self.monitor.max_gift_price = parse_number("MAX_GIFT_PRICE", &price)?;
        }
        if let Some(path) = var("DATABASE_PATH") {
            self.database_path = path;
        }
        if let Some(token) = var("SOURCE_BOT_TOKEN") {
            self.source.bot_token = Some(token);
        }
        Ok(())
    }

    /// Reject settings the loops cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.bot_token.trim().is_empty() {
            return Err(GiftWatchError::Config(
                "bot_token is required (set BOT_TOKEN)".into(),
            ));
        }
        if self.monitor.check_interval_secs == 0 {
            return Err(GiftWatchError::Config("monitor.check_interval_secs must be > 0".into()));
        }
        if self.monitor.fetch_limit == 0 {
            return Err(GiftWatchError::Config("monitor.fetch_limit must be > 0".into()));
        }
        if !self.monitor.max_gift_price.is_finite() || self.monitor.max_gift_price <= 0.0 {
            return Err(GiftWatchError::Config("monitor.max_gift_price must be > 0".into()));
        }
        if self.notifications.tick_secs == 0 {
            return Err(GiftWatchError::Config("notifications.tick_secs must be > 0".into()));
        }
        if self.notifications.default_interval_minutes == 0 {
            return Err(GiftWatchError::Config(
                "notifications.default_interval_minutes must be > 0".into(),
            ));
        }
        if self.notifications.max_entries == 0 {
            return Err(GiftWatchError::Config("notifications.max_entries must be > 0".into()));
        }
        Ok(())
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_ids.contains(&user_id)
    }

    /// Token used to read channel posts: the dedicated reader bot if configured.
    pub fn source_token(&self) -> &str {
        self.source
            .bot_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(&self.bot_token)
    }

    /// Initial runtime snapshot for the poller.
    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            channels: self.monitor.channels.clone(),
            max_gift_price: self.monitor.max_gift_price,
            recency_window_hours: self.monitor.recency_window_hours,
        }
    }

    /// Copy with secrets blanked, for printing.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.bot_token.is_empty() {
            copy.bot_token = "***".into();
        }
        if copy.source.bot_token.is_some() {
            copy.source.bot_token = Some("***".into());
        }
        copy
    }
}

fn parse_id_list(key: &str, raw: &str) -> Result<Vec<i64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .map_err(|e| GiftWatchError::Config(format!("{key}: invalid id '{s}': {e}")))
        })
        .collect()
}

fn parse_number<T>(key: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| GiftWatchError::Config(format!("{key}: invalid value '{raw}': {e}")))
}

/// Source poller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Channel ids to watch.
    #[serde(default)]
    pub channels: Vec<i64>,
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    /// Messages fetched per channel per tick.
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,
    #[serde(default = "default_max_gift_price")]
    pub max_gift_price: f64,
    #[serde(default = "default_recency_window")]
    pub recency_window_hours: u32,
    /// Pause after a failed tick.
    #[serde(default = "default_error_cooldown")]
    pub error_cooldown_secs: u64,
}

fn default_check_interval() -> u64 { 300 }
fn default_fetch_limit() -> usize { 50 }
fn default_max_gift_price() -> f64 { 5000.0 }
fn default_recency_window() -> u32 { 24 }
fn default_error_cooldown() -> u64 { 60 }

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            check_interval_secs: default_check_interval(),
            fetch_limit: default_fetch_limit(),
            max_gift_price: default_max_gift_price(),
            recency_window_hours: default_recency_window(),
            error_cooldown_secs: default_error_cooldown(),
        }
    }
}

/// Notification scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_tick")]
    pub tick_secs: u64,
    /// Interval given to recipients seen for the first time.
    #[serde(default = "default_interval_minutes")]
    pub default_interval_minutes: u32,
    /// Gifts listed per digest.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

fn default_tick() -> u64 { 60 }
fn default_interval_minutes() -> u32 { 60 }
fn default_max_entries() -> usize { 5 }

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick(),
            default_interval_minutes: default_interval_minutes(),
            max_entries: default_max_entries(),
        }
    }
}

/// Channel-post source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Separate reader bot; the main bot is used when unset.
    #[serde(default)]
    pub bot_token: Option<String>,
    /// Posts kept in memory per channel.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    /// Long-poll timeout for getUpdates.
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
}

fn default_buffer_capacity() -> usize { 200 }
fn default_poll_timeout() -> u64 { 30 }

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            buffer_capacity: default_buffer_capacity(),
            poll_timeout_secs: default_poll_timeout(),
        }
    }
}

/// Immutable runtime snapshot consumed by each poll tick.
///
/// Admin edits never mutate a snapshot in place; they produce a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSettings {
    pub channels: Vec<i64>,
    pub max_gift_price: f64,
    pub recency_window_hours: u32,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        MonitorConfig::default().into()
    }
}

impl From<MonitorConfig> for MonitorSettings {
    fn from(config: MonitorConfig) -> Self {
        Self {
            channels: config.channels,
            max_gift_price: config.max_gift_price,
            recency_window_hours: config.recency_window_hours,
        }
    }
}

impl MonitorSettings {
    pub fn is_watched(&self, channel_id: i64) -> bool {
        self.channels.contains(&channel_id)
    }

    /// Snapshot with `channel_id` watched. Adding a watched channel is a no-op.
    pub fn with_channel(&self, channel_id: i64) -> Self {
        let mut next = self.clone();
        if !next.is_watched(channel_id) {
            next.channels.push(channel_id);
        }
        next
    }

    /// Snapshot without `channel_id`. Removing an absent channel is a no-op.
    pub fn without_channel(&self, channel_id: i64) -> Self {
        let mut next = self.clone();
        next.channels.retain(|c| *c != channel_id);
        next
    }

    pub fn with_price_limit(&self, max_gift_price: f64) -> Result<Self> {
        if !max_gift_price.is_finite() || max_gift_price <= 0.0 {
            return Err(GiftWatchError::Validation(format!(
                "price limit must be a positive number, got {max_gift_price}"
            )));
        }
        Ok(Self {
            max_gift_price,
            ..self.clone()
        })
    }
}
