//! Per-conversation message logs
//!
//! [`ConversationCache`] owns one ordered, duplicate-free log per
//! conversation. Every producer (history fetch, push stream, send
//! confirmation) goes through [`ConversationCache::merge`] or
//! [`ConversationCache::seed`], which together keep two invariants:
//!
//! - no two entries in a log share an `id`;
//! - a log is sorted by timestamp, ties broken by id
//!   ([`Message::timeline_cmp`]).
//!
//! `merge` is commutative and idempotent, so the final log does not depend
//! on the order in which concurrent completions arrive.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::types::{ChatId, Message, MessageId};

#[derive(Debug, Default, Clone)]
struct ConversationLog {
    entries: Vec<Message>,
    ids: HashSet<MessageId>,
}

impl ConversationLog {
    fn from_messages(messages: Vec<Message>) -> Self {
        let mut ids = HashSet::with_capacity(messages.len());
        let mut entries: Vec<Message> = messages
            .into_iter()
            .filter(|m| ids.insert(m.id))
            .collect();
        entries.sort_by(Message::timeline_cmp);
        Self { entries, ids }
    }

    fn insert(&mut self, message: Message) -> bool {
        if !self.ids.insert(message.id) {
            return false;
        }
        let pos = self
            .entries
            .partition_point(|existing| existing.timeline_cmp(&message) == Ordering::Less);
        self.entries.insert(pos, message);
        true
    }
}

/// Ordered, duplicate-free message logs keyed by conversation id.
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use parley::sync::ConversationCache;
/// use parley::types::Message;
///
/// let msg = |id, secs| Message {
///     id,
///     chat_id: 1,
///     sender_id: 1,
///     content: format!("m{id}"),
///     timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
/// };
///
/// let mut cache = ConversationCache::new();
/// cache.seed(1, vec![msg(2, 20), msg(1, 10)]);
/// assert!(!cache.merge(1, msg(2, 20)));
/// assert!(cache.merge(1, msg(3, 5)));
///
/// let ids: Vec<i64> = cache.get(1).iter().map(|m| m.id).collect();
/// assert_eq!(ids, vec![3, 1, 2]);
/// ```
#[derive(Debug, Default, Clone)]
pub struct ConversationCache {
    logs: HashMap<ChatId, ConversationLog>,
}

impl ConversationCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the log for `chat_id` with `messages`.
    ///
    /// Input order does not matter; entries are sorted by the timeline
    /// ordering. When the input repeats an id, the first occurrence wins.
    /// Seeding twice with the same input leaves identical state.
    pub fn seed(&mut self, chat_id: ChatId, messages: Vec<Message>) {
        let log = ConversationLog::from_messages(messages);
        tracing::debug!(chat_id, count = log.entries.len(), "seeded conversation log");
        self.logs.insert(chat_id, log);
    }

    /// Insert `message` at its sorted position in the log for `chat_id`.
    ///
    /// Returns `false` without touching the log when an entry with the same
    /// id is already present.
    pub fn merge(&mut self, chat_id: ChatId, message: Message) -> bool {
        let id = message.id;
        let inserted = self.logs.entry(chat_id).or_default().insert(message);
        if !inserted {
            tracing::debug!(chat_id, message_id = id, "duplicate message ignored");
        }
        inserted
    }

    /// Snapshot of the ordered log for `chat_id` (empty when unknown).
    pub fn get(&self, chat_id: ChatId) -> Vec<Message> {
        self.logs
            .get(&chat_id)
            .map(|log| log.entries.clone())
            .unwrap_or_default()
    }

    /// Newest message in the log, if any.
    pub fn latest(&self, chat_id: ChatId) -> Option<&Message> {
        self.logs.get(&chat_id).and_then(|log| log.entries.last())
    }

    /// Number of messages cached for `chat_id`.
    pub fn len(&self, chat_id: ChatId) -> usize {
        self.logs.get(&chat_id).map_or(0, |log| log.entries.len())
    }

    /// Returns `true` when no conversation has been cached.
    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }

    /// Returns `true` when `message_id` is present in the log for `chat_id`.
    pub fn contains(&self, chat_id: ChatId, message_id: MessageId) -> bool {
        self.logs
            .get(&chat_id)
            .is_some_and(|log| log.ids.contains(&message_id))
    }

    /// Ids of every conversation with a log, in ascending order.
    pub fn conversation_ids(&self) -> Vec<ChatId> {
        let mut ids: Vec<ChatId> = self.logs.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Drop the log for a single conversation.
    pub fn remove(&mut self, chat_id: ChatId) {
        self.logs.remove(&chat_id);
    }

    /// Drop every log.
    pub fn clear(&mut self) {
        self.logs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn msg(id: MessageId, ts: i64) -> Message {
        Message {
            id,
            chat_id: 1,
            sender_id: 1,
            content: format!("message {id}"),
            timestamp: Utc.timestamp_opt(ts, 0).unwrap(),
        }
    }

    fn ids(cache: &ConversationCache, chat_id: ChatId) -> Vec<MessageId> {
        cache.get(chat_id).iter().map(|m| m.id).collect()
    }

    fn assert_sorted(log: &[Message]) {
        for pair in log.windows(2) {
            assert_eq!(
                pair[0].timeline_cmp(&pair[1]),
                Ordering::Less,
                "log out of order: {:?}",
                log.iter().map(|m| (m.id, m.timestamp)).collect::<Vec<_>>()
            );
        }
    }

    #[test]
    fn test_merge_existing_id_is_noop() {
        let mut cache = ConversationCache::new();
        cache.seed(1, vec![msg(1, 10), msg(2, 20)]);

        assert!(!cache.merge(1, msg(2, 20)));
        assert_eq!(cache.len(1), 2);
        assert_eq!(ids(&cache, 1), vec![1, 2]);
    }

    #[test]
    fn test_merge_older_message_goes_first() {
        let mut cache = ConversationCache::new();
        cache.seed(1, vec![msg(1, 10), msg(2, 20)]);

        assert!(cache.merge(1, msg(3, 5)));
        let timestamps: Vec<i64> = cache.get(1).iter().map(|m| m.timestamp.timestamp()).collect();
        assert_eq!(timestamps, vec![5, 10, 20]);
    }

    #[test]
    fn test_merge_into_unknown_conversation_creates_log() {
        let mut cache = ConversationCache::new();
        assert!(cache.merge(42, msg(1, 10)));
        assert_eq!(cache.len(42), 1);
        assert_eq!(cache.conversation_ids(), vec![42]);
    }

    #[test]
    fn test_equal_timestamps_ordered_by_id() {
        let mut cache = ConversationCache::new();
        cache.merge(1, msg(9, 10));
        cache.merge(1, msg(4, 10));
        cache.merge(1, msg(6, 10));
        assert_eq!(ids(&cache, 1), vec![4, 6, 9]);
    }

    #[test]
    fn test_seed_sorts_and_dedups_input() {
        let mut cache = ConversationCache::new();
        cache.seed(1, vec![msg(3, 30), msg(1, 10), msg(3, 30), msg(2, 20)]);
        assert_eq!(ids(&cache, 1), vec![1, 2, 3]);
    }

    #[test]
    fn test_seed_is_idempotent() {
        let input = vec![msg(5, 50), msg(1, 10), msg(2, 10)];
        let mut cache = ConversationCache::new();
        cache.seed(1, input.clone());
        let first = cache.get(1);
        cache.seed(1, input);
        assert_eq!(cache.get(1), first);
    }

    #[test]
    fn test_seed_replaces_previous_log() {
        let mut cache = ConversationCache::new();
        cache.seed(1, vec![msg(1, 10), msg(2, 20)]);
        cache.seed(1, vec![msg(7, 70)]);
        assert_eq!(ids(&cache, 1), vec![7]);
        assert!(!cache.contains(1, 1));
        assert!(cache.merge(1, msg(1, 10)));
    }

    #[test]
    fn test_every_interleaving_converges() {
        // Three producers delivering overlapping messages in every order.
        let history = vec![msg(1, 10), msg(2, 20), msg(3, 30)];
        let pushes = vec![msg(3, 30), msg(4, 40), msg(2, 20)];
        let sends = vec![msg(4, 40), msg(5, 35)];

        let streams = [&history, &pushes, &sends];
        let orders: [[usize; 3]; 6] = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];

        let mut results = Vec::new();
        for order in orders {
            let mut cache = ConversationCache::new();
            for idx in order {
                for m in streams[idx].iter().rev() {
                    cache.merge(1, m.clone());
                }
            }
            let log = cache.get(1);
            assert_sorted(&log);
            results.push(log);
        }

        for log in &results[1..] {
            assert_eq!(log, &results[0]);
        }
        assert_eq!(
            results[0].iter().map(|m| m.id).collect::<Vec<_>>(),
            vec![1, 2, 3, 5, 4]
        );
    }

    #[test]
    fn test_repeated_ids_appear_once() {
        let mut cache = ConversationCache::new();
        for round in 0..5 {
            for id in 1..=10 {
                cache.merge(1, msg(id, (id * 7 + round) % 13));
            }
        }
        let log = cache.get(1);
        assert_eq!(log.len(), 10);
        let unique: HashSet<_> = log.iter().map(|m| m.id).collect();
        assert_eq!(unique.len(), 10);
        assert_sorted(&log);
    }

    #[test]
    fn test_get_unknown_is_empty_and_latest_tracks_newest() {
        let mut cache = ConversationCache::new();
        assert!(cache.get(3).is_empty());
        assert!(cache.latest(3).is_none());

        cache.merge(3, msg(1, 10));
        cache.merge(3, msg(2, 5));
        assert_eq!(cache.latest(3).map(|m| m.id), Some(1));
    }

    #[test]
    fn test_logs_are_independent_per_conversation() {
        let mut cache = ConversationCache::new();
        cache.merge(1, msg(1, 10));
        cache.merge(2, msg(1, 10));
        assert_eq!(cache.len(1), 1);
        assert_eq!(cache.len(2), 1);

        cache.remove(1);
        assert_eq!(cache.len(1), 0);
        assert_eq!(cache.len(2), 1);

        cache.clear();
        assert!(cache.is_empty());
    }
}
