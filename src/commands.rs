//! Bot command front end: turns private messages into store reads and
//! settings edits. Every reply is a plain string; sending is the caller's job.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use giftwatch_core::error::Result;
use giftwatch_core::traits::{CheckpointStore, GiftStore};
use giftwatch_core::types::CheckInterval;
use giftwatch_scheduler::SettingsHandle;
use giftwatch_scheduler::notify::{format_price, format_recent, format_stats, truncate_message};

/// Reply length cap, a little under Telegram's own limit.
pub const MAX_REPLY_CHARS: usize = 4000;
/// Minimum gap between two commands from the same user.
pub const THROTTLE_WINDOW: Duration = Duration::from_millis(500);
/// Gifts listed by `/gifts`.
const RECENT_GIFTS: usize = 5;

const ACCESS_DENIED: &str = "⛔ Access denied";
const STORE_UNAVAILABLE: &str = "⚠️ Data is temporarily unavailable, please try again later";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Gifts,
    Stats,
    Notify,
    Frequency(Option<String>),
    Settings,
    Admin,
    Channels,
    AddChannel(Option<String>),
    RemoveChannel(Option<String>),
    PriceLimit(Option<String>),
    Unknown(String),
}

impl Command {
    /// Parse `/name[@bot] [arg]`. Anything not starting with `/` is not a command.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let rest = text.strip_prefix('/')?;
        let mut parts = rest.splitn(2, char::is_whitespace);
        let head = parts.next().unwrap_or_default();
        let name = head.split('@').next().unwrap_or_default().to_lowercase();
        let arg = parts
            .next()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(String::from);

        Some(match name.as_str() {
            "start" | "help" => Self::Start,
            "gifts" => Self::Gifts,
            "stats" => Self::Stats,
            "notify" => Self::Notify,
            "frequency" => Self::Frequency(arg),
            "settings" => Self::Settings,
            "admin" => Self::Admin,
            "channels" => Self::Channels,
            "addchannel" => Self::AddChannel(arg),
            "removechannel" => Self::RemoveChannel(arg),
            "pricelimit" => Self::PriceLimit(arg),
            _ => Self::Unknown(name),
        })
    }

    fn requires_admin(&self) -> bool {
        matches!(
            self,
            Self::Admin
                | Self::Channels
                | Self::AddChannel(_)
                | Self::RemoveChannel(_)
                | Self::PriceLimit(_)
        )
    }
}

pub struct CommandHandler {
    gifts: Arc<dyn GiftStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    settings: SettingsHandle,
    admin_ids: Vec<i64>,
    last_seen: Mutex<HashMap<i64, Instant>>,
}

impl CommandHandler {
    pub fn new(
        gifts: Arc<dyn GiftStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        settings: SettingsHandle,
        admin_ids: Vec<i64>,
    ) -> Self {
        Self {
            gifts,
            checkpoints,
            settings,
            admin_ids,
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    fn is_admin(&self, user_id: i64) -> bool {
        self.admin_ids.contains(&user_id)
    }

    /// Record the command time; false if the previous one was too recent.
    /// Entries outside the window no longer throttle anyone and are dropped.
    fn admit(&self, user_id: i64, now: Instant) -> bool {
        let Ok(mut seen) = self.last_seen.lock() else {
            return true;
        };
        match seen.get(&user_id) {
            Some(prev) if now.duration_since(*prev) < THROTTLE_WINDOW => false,
            _ => {
                seen.retain(|_, prev| now.duration_since(*prev) < THROTTLE_WINDOW);
                seen.insert(user_id, now);
                true
            }
        }
    }

    /// Reply for `text` from `user_id`. `None`: not a command, or throttled.
    pub async fn handle(&self, user_id: i64, text: &str, now: Instant) -> Option<String> {
        let command = Command::parse(text)?;
        if !self.admit(user_id, now) {
            tracing::debug!("Throttled command from {user_id}");
            return None;
        }
        tracing::info!("📨 Command {command:?} from {user_id}");

        if command.requires_admin() && !self.is_admin(user_id) {
            return Some(ACCESS_DENIED.into());
        }

        let reply = match self.execute(user_id, command).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!("Command from {user_id} failed: {e}");
                STORE_UNAVAILABLE.into()
            }
        };
        Some(truncate_message(&reply, MAX_REPLY_CHARS))
    }

    async fn execute(&self, user_id: i64, command: Command) -> Result<String> {
        match command {
            Command::Start => Ok(self.help(user_id)),
            Command::Gifts => {
                let gifts = self.gifts.recent(RECENT_GIFTS).await?;
                Ok(format_recent(&gifts))
            }
            Command::Stats => {
                let stats = self.gifts.stats().await?;
                Ok(format_stats(&stats))
            }
            Command::Notify => {
                let enabled = self.checkpoints.toggle_enabled(user_id).await?;
                Ok(if enabled {
                    "🔔 Notifications enabled".into()
                } else {
                    "🔕 Notifications disabled".into()
                })
            }
            Command::Frequency(arg) => self.frequency(user_id, arg.as_deref()).await,
            Command::Settings => {
                let cp = self.checkpoints.get(user_id).await?;
                let last = if cp.has_never_been_checked() {
                    "never".to_string()
                } else {
                    cp.last_checkpoint.format("%Y-%m-%d %H:%M UTC").to_string()
                };
                Ok(format!(
                    "⚙️ Your settings\n\nNotifications: {}\nInterval: {}\nLast check: {}",
                    if cp.notifications_enabled { "on" } else { "off" },
                    interval_label(cp.interval_minutes),
                    last
                ))
            }
            Command::Admin => Ok("🛠 Admin commands\n\n\
                 /channels - watched channels and price limit\n\
                 /addchannel <id> - watch a channel\n\
                 /removechannel <id> - stop watching a channel\n\
                 /pricelimit <value> - maximum gift price"
                .into()),
            Command::Channels => {
                let snapshot = self.settings.snapshot();
                let channels = if snapshot.channels.is_empty() {
                    "none".to_string()
                } else {
                    snapshot
                        .channels
                        .iter()
                        .map(i64::to_string)
                        .collect::<Vec<_>>()
                        .join("\n")
                };
                Ok(format!(
                    "📡 Watched channels:\n{channels}\n\n💰 Price limit: {} руб.",
                    format_price(snapshot.max_gift_price)
                ))
            }
            Command::AddChannel(arg) => Ok(match parse_channel(arg.as_deref()) {
                Some(id) => {
                    self.settings.add_channel(id);
                    format!("✅ Channel {id} is now watched")
                }
                None => "Usage: /addchannel <channel_id>".into(),
            }),
            Command::RemoveChannel(arg) => Ok(match parse_channel(arg.as_deref()) {
                Some(id) => {
                    self.settings.remove_channel(id);
                    format!("✅ Channel {id} is no longer watched")
                }
                None => "Usage: /removechannel <channel_id>".into(),
            }),
            Command::PriceLimit(arg) => {
                let parsed = arg.as_deref().and_then(|a| a.replace(',', ".").parse::<f64>().ok());
                Ok(match parsed.map(|p| self.settings.set_price_limit(p)) {
                    Some(Ok(snapshot)) => format!(
                        "✅ Price limit set to {} руб.",
                        format_price(snapshot.max_gift_price)
                    ),
                    _ => "Usage: /pricelimit <positive number>".into(),
                })
            }
            Command::Unknown(name) => Ok(format!("Unknown command /{name}. Try /start")),
        }
    }

    async fn frequency(&self, user_id: i64, arg: Option<&str>) -> Result<String> {
        match arg.and_then(|a| a.parse::<u32>().ok()).filter(|m| *m > 0) {
            Some(minutes) => {
                let cp = self.checkpoints.set_interval(user_id, minutes).await?;
                Ok(format!(
                    "✅ You will be notified {}",
                    interval_label(cp.interval_minutes)
                ))
            }
            None => {
                let cp = self.checkpoints.get(user_id).await?;
                let presets: Vec<String> = CheckInterval::ALL
                    .iter()
                    .map(|i| format!("/frequency {} - {}", i.minutes(), i.label()))
                    .collect();
                Ok(format!(
                    "⏱ Current interval: {}\n\nChoose one:\n{}",
                    interval_label(cp.interval_minutes),
                    presets.join("\n")
                ))
            }
        }
    }

    fn help(&self, user_id: i64) -> String {
        let mut text = String::from(
            "🎁 GiftWatch\n\n\
             I watch gift channels and tell you about new gifts.\n\n\
             /gifts - latest gifts\n\
             /stats - statistics\n\
             /notify - turn notifications on or off\n\
             /frequency <minutes> - how often to notify\n\
             /settings - your settings",
        );
        if self.is_admin(user_id) {
            text.push_str("\n/admin - admin commands");
        }
        text
    }
}

fn parse_channel(arg: Option<&str>) -> Option<i64> {
    arg?.parse().ok()
}

fn interval_label(minutes: u32) -> String {
    match CheckInterval::from_minutes(minutes) {
        Some(preset) => preset.label().to_string(),
        None => format!("every {minutes} minutes"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use giftwatch_core::MonitorSettings;
    use giftwatch_core::types::GiftCandidate;
    use giftwatch_scheduler::GiftDb;

    const ADMIN: i64 = 1;
    const USER: i64 = 2;

    fn handler() -> (CommandHandler, Arc<GiftDb>, SettingsHandle) {
        let db = Arc::new(GiftDb::open_in_memory().unwrap());
        let settings = SettingsHandle::new(MonitorSettings::default());
        let handler = CommandHandler::new(db.clone(), db.clone(), settings.clone(), vec![ADMIN]);
        (handler, db, settings)
    }

    /// Far enough apart that the throttle never triggers.
    fn at(step: u64) -> Instant {
        static BASE: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
        *BASE.get_or_init(Instant::now) + Duration::from_secs(step)
    }

    #[test]
    fn test_parse() {
        assert_eq!(Command::parse("/gifts"), Some(Command::Gifts));
        assert_eq!(Command::parse("/gifts@GiftWatchBot"), Some(Command::Gifts));
        assert_eq!(
            Command::parse("/frequency  15 "),
            Some(Command::Frequency(Some("15".into())))
        );
        assert_eq!(Command::parse("/frequency"), Some(Command::Frequency(None)));
        assert_eq!(Command::parse("hello"), None);
        assert_eq!(Command::parse("/nope"), Some(Command::Unknown("nope".into())));
    }

    #[tokio::test]
    async fn test_gifts_and_stats() {
        let (h, db, _) = handler();
        assert_eq!(
            h.handle(USER, "/gifts", at(0)).await.unwrap(),
            "🎁 No gifts found yet"
        );
        db.append_gift(&GiftCandidate {
            name: "Подарок дня".into(),
            price: 1500.0,
            channel_id: -100,
            message_id: 1,
        })
        .unwrap();
        let gifts = h.handle(USER, "/gifts", at(1)).await.unwrap();
        assert!(gifts.contains("Подарок дня - 1500 руб."));
        let stats = h.handle(USER, "/stats", at(2)).await.unwrap();
        assert!(stats.contains("Gifts found: 1"));
    }

    #[tokio::test]
    async fn test_notify_toggles() {
        let (h, db, _) = handler();
        let reply = h.handle(USER, "/notify", at(0)).await.unwrap();
        assert!(reply.contains("disabled"));
        assert!(!db.checkpoint(USER).unwrap().notifications_enabled);
        let reply = h.handle(USER, "/notify", at(1)).await.unwrap();
        assert!(reply.contains("enabled"));
    }

    #[tokio::test]
    async fn test_frequency() {
        let (h, db, _) = handler();
        let menu = h.handle(USER, "/frequency", at(0)).await.unwrap();
        assert!(menu.contains("/frequency 1440 - once a day"));
        let menu = h.handle(USER, "/frequency 0", at(1)).await.unwrap();
        assert!(menu.contains("Choose one"));

        let reply = h.handle(USER, "/frequency 15", at(2)).await.unwrap();
        assert!(reply.contains("every 15 minutes"));
        assert_eq!(db.checkpoint(USER).unwrap().interval_minutes, 15);

        let reply = h.handle(USER, "/frequency 45", at(3)).await.unwrap();
        assert!(reply.contains("every 45 minutes"));
    }

    #[tokio::test]
    async fn test_settings_reports_checkpoint() {
        let (h, _, _) = handler();
        let reply = h.handle(USER, "/settings", at(0)).await.unwrap();
        assert!(reply.contains("Notifications: on"));
        assert!(reply.contains("Interval: every hour"));
        assert!(reply.contains("Last check: never"));
    }

    #[tokio::test]
    async fn test_admin_commands_gated() {
        let (h, _, settings) = handler();
        let commands = ["/admin", "/channels", "/addchannel -100", "/removechannel -100", "/pricelimit 10"];
        for (step, cmd) in commands.into_iter().enumerate() {
            assert_eq!(h.handle(USER, cmd, at(step as u64)).await.unwrap(), ACCESS_DENIED);
        }
        assert!(settings.snapshot().channels.is_empty());
        assert!((settings.snapshot().max_gift_price - 5000.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_admin_edits_settings() {
        let (h, _, settings) = handler();
        let reply = h.handle(ADMIN, "/addchannel -100", at(0)).await.unwrap();
        assert!(reply.contains("-100"));
        assert!(settings.snapshot().is_watched(-100));

        let reply = h.handle(ADMIN, "/pricelimit 250,5", at(1)).await.unwrap();
        assert!(reply.contains("250.50"));
        let reply = h.handle(ADMIN, "/pricelimit -3", at(2)).await.unwrap();
        assert!(reply.starts_with("Usage"));

        let channels = h.handle(ADMIN, "/channels", at(3)).await.unwrap();
        assert!(channels.contains("-100"));
        assert!(channels.contains("250.50 руб."));

        h.handle(ADMIN, "/removechannel -100", at(4)).await.unwrap();
        assert!(settings.snapshot().channels.is_empty());
        let reply = h.handle(ADMIN, "/addchannel abc", at(5)).await.unwrap();
        assert!(reply.starts_with("Usage"));
    }

    #[tokio::test]
    async fn test_throttle_per_user() {
        let (h, _, _) = handler();
        let t0 = at(100);
        assert!(h.handle(USER, "/start", t0).await.is_some());
        assert!(h.handle(USER, "/start", t0 + Duration::from_millis(200)).await.is_none());
        assert!(h.handle(ADMIN, "/start", t0 + Duration::from_millis(200)).await.is_some());
        assert!(h.handle(USER, "/start", t0 + Duration::from_millis(700)).await.is_some());
        // Plain text is not a command and does not count.
        assert!(h.handle(USER, "hi", t0 + Duration::from_millis(800)).await.is_none());
    }

    #[tokio::test]
    async fn test_throttle_forgets_quiet_users() {
        let (h, _, _) = handler();
        let t0 = at(200);
        for user in 10..20 {
            h.handle(user, "/start", t0).await.unwrap();
        }
        assert_eq!(h.last_seen.lock().unwrap().len(), 10);

        h.handle(USER, "/start", t0 + Duration::from_secs(1)).await.unwrap();
        let seen = h.last_seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen.contains_key(&USER));
    }

    #[tokio::test]
    async fn test_store_failure_reported() {
        let (h, db, _) = handler();
        db.close().unwrap();
        let reply = h.handle(USER, "/gifts", at(0)).await.unwrap();
        assert_eq!(reply, STORE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_help_mentions_admin_for_admins() {
        let (h, _, _) = handler();
        assert!(!h.handle(USER, "/start", at(0)).await.unwrap().contains("/admin"));
        assert!(h.handle(ADMIN, "/start", at(1)).await.unwrap().contains("/admin"));
    }
}
