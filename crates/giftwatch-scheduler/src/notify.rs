//! Notification texts: gift digests and list formatting.
//! Plain text, no parse mode: gift names come straight from channel posts.

use giftwatch_core::types::{Gift, GiftStats};

/// Telegram rejects longer messages.
pub const MAX_MESSAGE_CHARS: usize = 4096;

/// `1500` for whole amounts, `99.50` otherwise.
pub fn format_price(price: f64) -> String {
    if price.fract() == 0.0 {
        format!("{price:.0}")
    } else {
        format!("{price:.2}")
    }
}

/// One list line for a gift.
pub fn format_gift_line(gift: &Gift) -> String {
    format!(
        "{} - {} руб. (channel: {})",
        gift.name,
        format_price(gift.price),
        gift.channel_id
    )
}

/// Digest for a recipient: the newest `max_entries` of `gifts` (already
/// sorted newest first), plus a count of the rest.
pub fn format_digest(gifts: &[Gift], max_entries: usize) -> String {
    let shown = gifts.len().min(max_entries);
    let mut text = format!("🎁 New gifts ({}):\n\n", gifts.len());
    let lines: Vec<String> = gifts.iter().take(shown).map(format_gift_line).collect();
    text.push_str(&lines.join("\n"));
    if gifts.len() > shown {
        text.push_str(&format!("\n…and {} more", gifts.len() - shown));
    }
    truncate_message(&text, MAX_MESSAGE_CHARS)
}

/// Latest-gifts listing for interactive reads.
pub fn format_recent(gifts: &[Gift]) -> String {
    if gifts.is_empty() {
        return "🎁 No gifts found yet".into();
    }
    let lines: Vec<String> = gifts.iter().map(format_gift_line).collect();
    format!("🎁 Latest gifts:\n\n{}", lines.join("\n"))
}

pub fn format_stats(stats: &GiftStats) -> String {
    format!(
        "📊 Statistics\n\nGifts found: {}\nAverage price: {} руб.\nChannels with gifts: {}",
        stats.count,
        format_price(stats.average_price),
        stats.distinct_channels
    )
}

/// Cut to `max_chars` characters, never splitting a code point.
pub fn truncate_message(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn gift(message_id: i64, name: &str, price: f64) -> Gift {
        Gift {
            gift_id: format!("-1_{message_id}"),
            name: name.into(),
            price,
            channel_id: -1,
            message_id,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_format_price() {
        assert_eq!(format_price(1500.0), "1500");
        assert_eq!(format_price(99.5), "99.50");
    }

    #[test]
    fn test_digest_caps_entries() {
        let gifts: Vec<Gift> = (1..=7).rev().map(|i| gift(i, &format!("g{i}"), 10.0)).collect();
        let text = format_digest(&gifts, 5);
        assert!(text.starts_with("🎁 New gifts (7):"));
        assert!(text.contains("g7 - 10 руб."));
        assert!(text.contains("g3"));
        assert!(!text.contains("g2 "));
        assert!(text.ends_with("…and 2 more"));
    }

    #[test]
    fn test_digest_without_overflow() {
        let text = format_digest(&[gift(1, "Подарок дня", 1500.0)], 5);
        assert_eq!(text, "🎁 New gifts (1):\n\nПодарок дня - 1500 руб. (channel: -1)");
    }

    #[test]
    fn test_recent_and_stats() {
        assert_eq!(format_recent(&[]), "🎁 No gifts found yet");
        let stats = GiftStats {
            count: 3,
            average_price: 100.11,
            distinct_channels: 2,
        };
        assert!(format_stats(&stats).contains("Average price: 100.11 руб."));
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        assert_eq!(truncate_message("привет", 3), "при");
        assert_eq!(truncate_message("hi", 10), "hi");
    }
}
