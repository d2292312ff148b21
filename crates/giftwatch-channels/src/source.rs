//! Channel-post buffer: the bot's view of its channels, readable as a source.
//!
//! Telegram pushes `channel_post` updates to bots that administer a channel;
//! the buffer keeps the newest posts per channel so the poller can sample
//! them like a history fetch.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use giftwatch_core::error::{GiftWatchError, Result};
use giftwatch_core::traits::SourceClient;
use giftwatch_core::types::SourceMessage;

pub struct ChannelPostBuffer {
    posts: Mutex<HashMap<i64, VecDeque<SourceMessage>>>,
    capacity: usize,
}

impl ChannelPostBuffer {
    /// Keep at most `capacity` posts per channel (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            posts: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Record a post. A post already buffered under the same id is replaced.
    pub fn push(&self, message: SourceMessage) {
        let Ok(mut posts) = self.posts.lock() else {
            tracing::error!("Channel post buffer poisoned, dropping post");
            return;
        };
        let queue = posts.entry(message.channel_id).or_default();
        if let Some(existing) = queue
            .iter_mut()
            .find(|m| m.message_id == message.message_id)
        {
            *existing = message;
            return;
        }
        queue.push_back(message);
        while queue.len() > self.capacity {
            queue.pop_front();
        }
    }

    /// Buffered post count for a channel.
    pub fn len(&self, channel_id: i64) -> usize {
        self.posts
            .lock()
            .map(|p| p.get(&channel_id).map_or(0, VecDeque::len))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, channel_id: i64) -> bool {
        self.len(channel_id) == 0
    }
}

#[async_trait]
impl SourceClient for ChannelPostBuffer {
    fn name(&self) -> &str {
        "telegram-channel-posts"
    }

    async fn fetch_recent(&self, channel_id: i64, limit: usize) -> Result<Vec<SourceMessage>> {
        let posts = self
            .posts
            .lock()
            .map_err(|_| GiftWatchError::SourceFetch("channel post buffer poisoned".into()))?;
        Ok(posts
            .get(&channel_id)
            .map(|queue| queue.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn post(channel_id: i64, message_id: i64, text: &str) -> SourceMessage {
        SourceMessage {
            channel_id,
            message_id,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_newest_first_with_limit() {
        let buffer = ChannelPostBuffer::new(10);
        for id in 1..=4 {
            buffer.push(post(-1, id, "x"));
        }
        let ids: Vec<i64> = buffer
            .fetch_recent(-1, 3)
            .await
            .unwrap()
            .iter()
            .map(|m| m.message_id)
            .collect();
        assert_eq!(ids, vec![4, 3, 2]);
    }

    #[tokio::test]
    async fn test_unknown_channel_is_empty() {
        let buffer = ChannelPostBuffer::new(10);
        buffer.push(post(-1, 1, "x"));
        assert!(buffer.fetch_recent(-2, 50).await.unwrap().is_empty());
        assert!(buffer.is_empty(-2));
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let buffer = ChannelPostBuffer::new(2);
        buffer.push(post(-1, 1, "a"));
        buffer.push(post(-1, 2, "b"));
        buffer.push(post(-1, 3, "c"));
        assert_eq!(buffer.len(-1), 2);
        let posts = buffer.posts.lock().unwrap();
        assert_eq!(posts[&-1].front().unwrap().message_id, 2);
    }

    #[tokio::test]
    async fn test_same_post_replaced() {
        let buffer = ChannelPostBuffer::new(5);
        buffer.push(post(-1, 1, "old"));
        buffer.push(post(-1, 1, "new"));
        let posts = buffer.fetch_recent(-1, 5).await.unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].text, "new");
    }
}
