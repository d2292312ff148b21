//! Gift classifier: decides whether a channel message announces a gift.
//!
//! Pure: text + timestamps in, structured gift (or a skip reason) out.
//! No I/O, so every rule is covered by plain unit tests below.

use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use giftwatch_core::MonitorSettings;
use giftwatch_core::types::{GiftCandidate, MAX_NAME_CHARS, SourceMessage, UNKNOWN_GIFT_NAME};
use regex::Regex;

/// Lowercase tokens that mark a message as a gift announcement.
pub const TRIGGER_TOKENS: [&str; 2] = ["подарок", "gift"];

/// Trigger, then anything (across lines), then a 1–6 digit amount with an
/// optional `.`/`,` fraction, then a currency marker. The amount must not be
/// glued to a preceding digit, so a 7-digit number never matches its tail.
/// The marker is a whole token: "р" in "2 ребят" is not a currency.
static PRICE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)(?:подаро?к|gift)(?:.*?[^0-9.,])?([0-9]{1,6}(?:[.,][0-9]{1,2})?)\s?(?:руб(?:л[а-яё]*)?|р|₽)(?:[^\p{L}\p{N}]|$)",
    )
    .expect("price pattern is valid")
});

/// Why a message did not produce a candidate. Not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    EmptyText,
    /// Older than the recency window.
    Stale,
    NoTrigger,
    NoPrice,
    NonPositivePrice(f64),
    OverPriceLimit(f64),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyText => write!(f, "empty text"),
            Self::Stale => write!(f, "outside recency window"),
            Self::NoTrigger => write!(f, "no trigger token"),
            Self::NoPrice => write!(f, "no price"),
            Self::NonPositivePrice(p) => write!(f, "non-positive price {p}"),
            Self::OverPriceLimit(p) => write!(f, "price {p} over limit"),
        }
    }
}

/// Name and price pulled out of a message.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedGift {
    pub name: String,
    pub price: f64,
}

/// Filters and extracts gifts under a given price ceiling and recency window.
#[derive(Debug, Clone)]
pub struct GiftClassifier {
    max_price: f64,
    recency_window: Duration,
}

impl GiftClassifier {
    pub fn new(max_price: f64, recency_window_hours: u32) -> Self {
        Self {
            max_price,
            recency_window: Duration::hours(i64::from(recency_window_hours)),
        }
    }

    pub fn from_settings(settings: &MonitorSettings) -> Self {
        Self::new(settings.max_gift_price, settings.recency_window_hours)
    }

    pub fn max_price(&self) -> f64 {
        self.max_price
    }

    /// `Some` when the message is a qualifying gift announcement.
    pub fn classify(
        &self,
        text: &str,
        timestamp: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<ExtractedGift> {
        self.evaluate(text, timestamp, now).ok()
    }

    /// Like [`Self::classify`] but says why a message was skipped.
    pub fn evaluate(
        &self,
        text: &str,
        timestamp: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ExtractedGift, SkipReason> {
        if text.trim().is_empty() {
            return Err(SkipReason::EmptyText);
        }
        if now - timestamp > self.recency_window {
            return Err(SkipReason::Stale);
        }
        if !contains_trigger(text) {
            return Err(SkipReason::NoTrigger);
        }

        let price = extract_price(text).ok_or(SkipReason::NoPrice)?;
        if price <= 0.0 {
            return Err(SkipReason::NonPositivePrice(price));
        }
        if price > self.max_price {
            return Err(SkipReason::OverPriceLimit(price));
        }

        Ok(ExtractedGift {
            name: extract_name(text),
            price,
        })
    }

    /// Classify a fetched message into a candidate carrying its identity.
    pub fn classify_message(
        &self,
        message: &SourceMessage,
        now: DateTime<Utc>,
    ) -> Result<GiftCandidate, SkipReason> {
        let extracted = self.evaluate(&message.text, message.timestamp, now)?;
        Ok(GiftCandidate {
            name: extracted.name,
            price: extracted.price,
            channel_id: message.channel_id,
            message_id: message.message_id,
        })
    }
}

impl From<&MonitorSettings> for GiftClassifier {
    fn from(settings: &MonitorSettings) -> Self {
        Self::from_settings(settings)
    }
}

fn contains_trigger(text: &str) -> bool {
    let lower = text.to_lowercase();
    TRIGGER_TOKENS.iter().any(|t| lower.contains(t))
}

/// First price match, with `,` normalised to `.`.
pub fn extract_price(text: &str) -> Option<f64> {
    let caps = PRICE_PATTERN.captures(text)?;
    let raw = caps.get(1)?.as_str().replace(',', ".");
    raw.parse::<f64>().ok()
}

/// First non-empty line containing a trigger token, with leading decoration
/// (emoji, bullets) stripped and capped at [`MAX_NAME_CHARS`].
pub fn extract_name(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && contains_trigger(line))
        .map(|line| line.trim_start_matches(|c: char| !c.is_alphanumeric()).trim_end())
        .find(|line| !line.is_empty())
        .unwrap_or(UNKNOWN_GIFT_NAME)
        .chars()
        .take(MAX_NAME_CHARS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> GiftClassifier {
        GiftClassifier::new(5000.0, 24)
    }

    fn hours_ago(now: DateTime<Utc>, h: i64) -> DateTime<Utc> {
        now - Duration::hours(h)
    }

    #[test]
    fn test_announcement_across_lines() {
        let now = Utc::now();
        let text = "🎁 Подарок дня\nКубок чемпиона\n1500 руб";
        let gift = classifier().classify(text, hours_ago(now, 1), now).unwrap();
        assert_eq!(gift.name, "Подарок дня");
        assert!((gift.price - 1500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_english_and_symbol_currency() {
        let now = Utc::now();
        let gift = classifier()
            .classify("New GIFT: teddy bear for 250₽", now, now)
            .unwrap();
        assert_eq!(gift.name, "New GIFT: teddy bear for 250₽");
        assert!((gift.price - 250.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_decimal_comma_normalised() {
        let now = Utc::now();
        let gift = classifier()
            .classify("Подарок: роза за 99,50 руб", now, now)
            .unwrap();
        assert!((gift.price - 99.5).abs() < 1e-9);

        let gift = classifier().classify("gift 12.5р", now, now).unwrap();
        assert!((gift.price - 12.5).abs() < 1e-9);
    }

    #[test]
    fn test_empty_text() {
        let now = Utc::now();
        assert_eq!(classifier().evaluate("   ", now, now), Err(SkipReason::EmptyText));
    }

    #[test]
    fn test_stale_message_never_qualifies() {
        let now = Utc::now();
        let text = "Подарок дня\n100 руб";
        assert_eq!(
            classifier().evaluate(text, hours_ago(now, 25), now),
            Err(SkipReason::Stale)
        );
        assert!(classifier().classify(text, hours_ago(now, 23), now).is_some());
    }

    #[test]
    fn test_requires_trigger_token() {
        let now = Utc::now();
        assert_eq!(
            classifier().evaluate("Скидка 500 руб", now, now),
            Err(SkipReason::NoTrigger)
        );
    }

    #[test]
    fn test_requires_price() {
        let now = Utc::now();
        assert_eq!(
            classifier().evaluate("Подарок без цены", now, now),
            Err(SkipReason::NoPrice)
        );
        assert_eq!(
            classifier().evaluate("gift 1234567 руб", now, now),
            Err(SkipReason::NoPrice)
        );
    }

    #[test]
    fn test_currency_marker_is_whole_token() {
        let now = Utc::now();
        assert_eq!(
            classifier().evaluate("Подарок для 2 ребят", now, now),
            Err(SkipReason::NoPrice)
        );
        assert_eq!(
            classifier().evaluate("Gift 3 раза в неделю", now, now),
            Err(SkipReason::NoPrice)
        );

        for text in ["Подарок за 300 рублей", "gift 300 руб.", "gift 300р, спешите", "Подарок 300 ₽!"] {
            let gift = classifier().classify(text, now, now).unwrap();
            assert!((gift.price - 300.0).abs() < f64::EPSILON, "{text}");
        }
    }

    #[test]
    fn test_price_bounds() {
        let now = Utc::now();
        assert_eq!(
            classifier().evaluate("gift for 0 руб", now, now),
            Err(SkipReason::NonPositivePrice(0.0))
        );
        assert_eq!(
            classifier().evaluate("gift for 5001 руб", now, now),
            Err(SkipReason::OverPriceLimit(5001.0))
        );
        assert!(classifier().classify("gift for 5000 руб", now, now).is_some());
        assert!(GiftClassifier::new(100.0, 24).classify("gift for 150 руб", now, now).is_none());
    }

    #[test]
    fn test_name_falls_back_when_trigger_not_on_a_line() {
        // Trigger split across a line break: nothing names the gift.
        assert_eq!(extract_name("под\nарок 10 руб"), UNKNOWN_GIFT_NAME);
    }

    #[test]
    fn test_name_truncated() {
        let long = format!("gift {}", "я".repeat(200));
        let name = extract_name(&long);
        assert_eq!(name.chars().count(), MAX_NAME_CHARS);
    }

    #[test]
    fn test_deterministic() {
        let now = Utc::now();
        let ts = hours_ago(now, 2);
        let text = "🎁 Подарок дня\n1500 руб";
        let c = classifier();
        assert_eq!(c.evaluate(text, ts, now), c.evaluate(text, ts, now));
    }

    #[test]
    fn test_classify_message_carries_identity() {
        let now = Utc::now();
        let msg = SourceMessage {
            channel_id: -100777,
            message_id: 12,
            text: "Gift: mug 300 руб".into(),
            timestamp: now,
        };
        let candidate = classifier().classify_message(&msg, now).unwrap();
        assert_eq!(candidate.channel_id, -100777);
        assert_eq!(candidate.message_id, 12);
        assert_eq!(candidate.gift_id(), "-100777_12");
    }
}
