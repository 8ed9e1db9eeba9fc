//! Bounded in-process dialogue windows.
//!
//! The window is a cache over durable message rows: it can be evicted at any
//! time without data loss, and it is rebuilt from the store on a cold start.
//! A user/assistant exchange is appended atomically under the cache lock so
//! rapid redelivery for the same chat cannot interleave history. The cache
//! is a capability, not a map: multi-instance deployments swap in a shared
//! external store behind the same trait.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// External message ids remembered per conversation for duplicate delivery
/// detection.
const RECENT_MESSAGE_ID_CAPACITY: usize = 128;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `MemoryRole` values.
pub enum MemoryRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Public struct `MemoryTurn` used across Coral components.
pub struct MemoryTurn {
    pub role: MemoryRole,
    pub content: String,
}

impl MemoryTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MemoryRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MemoryRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Public struct `WindowLimits` used across Coral components.
///
/// The window is bounded by turn count and an approximate token budget;
/// whichever binds first wins.
pub struct WindowLimits {
    pub max_turns: usize,
    pub max_tokens: usize,
}

impl Default for WindowLimits {
    fn default() -> Self {
        Self {
            max_turns: 20,
            max_tokens: 4000,
        }
    }
}

/// Rough token estimate used for the window budget (~4 chars per token).
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Trims `turns` to the limits, keeping the most recent turns in original
/// order.
pub fn trim_window(turns: &mut Vec<MemoryTurn>, limits: &WindowLimits) {
    if limits.max_turns == 0 {
        turns.clear();
        return;
    }

    let mut kept = 0usize;
    let mut budget = 0usize;
    for turn in turns.iter().rev() {
        if kept >= limits.max_turns {
            break;
        }
        let cost = estimate_tokens(&turn.content);
        if kept > 0 && limits.max_tokens > 0 && budget.saturating_add(cost) > limits.max_tokens {
            break;
        }
        budget = budget.saturating_add(cost);
        kept += 1;
    }
    let drop = turns.len().saturating_sub(kept);
    if drop > 0 {
        turns.drain(..drop);
    }
}

#[async_trait]
/// Trait contract for `ConversationCache` behavior.
pub trait ConversationCache: Send + Sync {
    /// Returns the cached window, or `None` on a cold start.
    async fn window(&self, conversation_id: &str) -> Option<Vec<MemoryTurn>>;

    /// Seeds the window, typically after rebuilding it from durable rows.
    async fn replace_window(&self, conversation_id: &str, turns: Vec<MemoryTurn>);

    /// Appends one user/assistant exchange atomically, trimming to the
    /// window bound.
    async fn append_exchange(
        &self,
        conversation_id: &str,
        user_turn: MemoryTurn,
        assistant_turn: MemoryTurn,
    );

    /// Evicts the window; safe at any time since durable rows are the source
    /// of truth.
    async fn clear(&self, conversation_id: &str);

    /// True when the external message id was already processed for this
    /// conversation, i.e. the delivery is a duplicate.
    async fn seen_external_message(
        &self,
        conversation_id: &str,
        external_message_id: &str,
    ) -> bool;

    /// Records an external message id after a successful run. Failed runs
    /// are deliberately not marked: platform redelivery is the implicit
    /// retry mechanism.
    async fn mark_external_message(&self, conversation_id: &str, external_message_id: &str);
}

#[derive(Debug, Default)]
struct CacheEntry {
    window: Option<Vec<MemoryTurn>>,
    recent_message_ids: VecDeque<String>,
}

/// Process-local `ConversationCache` backed by a keyed map.
#[derive(Debug)]
pub struct InProcessConversationCache {
    limits: WindowLimits,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl InProcessConversationCache {
    pub fn new(limits: WindowLimits) -> Self {
        Self {
            limits,
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InProcessConversationCache {
    fn default() -> Self {
        Self::new(WindowLimits::default())
    }
}

#[async_trait]
impl ConversationCache for InProcessConversationCache {
    async fn window(&self, conversation_id: &str) -> Option<Vec<MemoryTurn>> {
        let entries = self.entries.lock().await;
        entries
            .get(conversation_id)
            .and_then(|entry| entry.window.clone())
    }

    async fn replace_window(&self, conversation_id: &str, mut turns: Vec<MemoryTurn>) {
        trim_window(&mut turns, &self.limits);
        let mut entries = self.entries.lock().await;
        entries
            .entry(conversation_id.to_string())
            .or_default()
            .window = Some(turns);
    }

    async fn append_exchange(
        &self,
        conversation_id: &str,
        user_turn: MemoryTurn,
        assistant_turn: MemoryTurn,
    ) {
        let mut entries = self.entries.lock().await;
        let entry = entries.entry(conversation_id.to_string()).or_default();
        let window = entry.window.get_or_insert_with(Vec::new);
        window.push(user_turn);
        window.push(assistant_turn);
        trim_window(window, &self.limits);
    }

    async fn clear(&self, conversation_id: &str) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(conversation_id) {
            entry.window = None;
        }
    }

    async fn seen_external_message(
        &self,
        conversation_id: &str,
        external_message_id: &str,
    ) -> bool {
        let entries = self.entries.lock().await;
        entries
            .get(conversation_id)
            .map(|entry| {
                entry
                    .recent_message_ids
                    .iter()
                    .any(|seen| seen == external_message_id)
            })
            .unwrap_or(false)
    }

    async fn mark_external_message(&self, conversation_id: &str, external_message_id: &str) {
        let mut entries = self.entries.lock().await;
        let entry = entries.entry(conversation_id.to_string()).or_default();
        if entry
            .recent_message_ids
            .iter()
            .any(|seen| seen == external_message_id)
        {
            return;
        }
        entry
            .recent_message_ids
            .push_back(external_message_id.to_string());
        while entry.recent_message_ids.len() > RECENT_MESSAGE_ID_CAPACITY {
            entry.recent_message_ids.pop_front();
        }
    }
}
