//! Conversation memory
//!
//! A [`ConversationContext`] is a bounded, chronological list of turns. The
//! voice session owns exactly one; API mode keeps one per `context_id` in a
//! [`ConversationStore`].

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

/// One completed exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationTurn {
    pub timestamp: DateTime<Utc>,
    /// Transcribed or submitted user text
    pub text: String,
    /// Module that handled the turn, if any
    pub module: Option<String>,
    pub response: String,
}

impl ConversationTurn {
    /// Create a turn stamped with the current time
    #[must_use]
    pub fn now(
        text: impl Into<String>,
        module: Option<String>,
        response: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            text: text.into(),
            module,
            response: response.into(),
        }
    }
}

/// Bounded history of turns, oldest evicted first
#[derive(Debug, Clone)]
pub struct ConversationContext {
    turns: VecDeque<ConversationTurn>,
    max_turns: usize,
}

impl ConversationContext {
    /// Create an empty context keeping at most `max_turns`
    ///
    /// A limit of zero keeps no history at all.
    #[must_use]
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(max_turns.min(64)),
            max_turns,
        }
    }

    /// Append a turn, evicting from the front to stay within the limit
    pub fn push(&mut self, turn: ConversationTurn) {
        if self.max_turns == 0 {
            return;
        }
        while self.turns.len() >= self.max_turns {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    /// Turns in chronological order
    pub fn turns(&self) -> impl ExactSizeIterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    #[must_use]
    pub const fn max_turns(&self) -> usize {
        self.max_turns
    }

    #[must_use]
    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.back()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

/// Shared handle to one conversation
pub type SharedContext = Arc<RwLock<ConversationContext>>;

/// LRU-bounded set of conversations keyed by id
#[derive(Debug)]
pub struct ConversationStore {
    contexts: Mutex<LruCache<String, SharedContext>>,
    max_turns: usize,
}

impl ConversationStore {
    /// Create a store holding at most `max_contexts` conversations
    #[must_use]
    pub fn new(max_contexts: usize, max_turns: usize) -> Self {
        let capacity = NonZeroUsize::new(max_contexts).unwrap_or(NonZeroUsize::MIN);
        Self {
            contexts: Mutex::new(LruCache::new(capacity)),
            max_turns,
        }
    }

    /// Get the context for `id`, creating it when unknown
    ///
    /// Creating a context may evict the least recently used one.
    pub async fn get_or_create(&self, id: &str) -> SharedContext {
        let mut contexts = self.contexts.lock().await;
        if let Some(context) = contexts.get(id) {
            return Arc::clone(context);
        }

        let context = Arc::new(RwLock::new(ConversationContext::new(self.max_turns)));
        if let Some((evicted, _)) = contexts.push(id.to_string(), Arc::clone(&context)) {
            tracing::debug!(context_id = %evicted, "conversation evicted");
        }
        context
    }

    /// Number of live conversations
    pub async fn len(&self) -> usize {
        self.contexts.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.contexts.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(n: usize) -> ConversationTurn {
        ConversationTurn::now(format!("q{n}"), None, format!("a{n}"))
    }

    #[test]
    fn test_context_evicts_oldest() {
        let mut context = ConversationContext::new(3);
        for n in 0..5 {
            context.push(turn(n));
        }

        let texts: Vec<&str> = context.turns().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["q2", "q3", "q4"]);
        assert_eq!(context.len(), 3);
    }

    #[test]
    fn test_zero_limit_keeps_nothing() {
        let mut context = ConversationContext::new(0);
        context.push(turn(0));
        assert!(context.is_empty());
    }

    #[tokio::test]
    async fn test_store_reuses_context() {
        let store = ConversationStore::new(4, 10);
        let a = store.get_or_create("kitchen").await;
        a.write().await.push(turn(1));

        let again = store.get_or_create("kitchen").await;
        assert_eq!(again.read().await.len(), 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_store_is_lru_bounded() {
        let store = ConversationStore::new(2, 10);
        store.get_or_create("a").await;
        store.get_or_create("b").await;
        store.get_or_create("a").await;
        store.get_or_create("c").await;

        assert_eq!(store.len().await, 2);
        // "b" was least recently used
        assert!(store.get_or_create("b").await.read().await.is_empty());
        assert_eq!(store.len().await, 2);
    }
}
