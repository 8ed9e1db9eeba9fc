use std::sync::atomic::{AtomicU64, Ordering};

use crate::time_utils::current_unix_timestamp_ms;

static ID_COUNTER: AtomicU64 = AtomicU64::new(1);

fn mint(prefix: &str) -> String {
    let millis = current_unix_timestamp_ms();
    let count = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{millis}-{count}")
}

/// Mints a process-unique conversation row identifier.
pub fn new_conversation_id() -> String {
    mint("conv")
}

/// Mints a process-unique message row identifier.
pub fn new_message_id() -> String {
    mint("msg")
}

/// Mints a process-unique broadcast event identifier.
pub fn new_event_id() -> String {
    mint("evt")
}

#[cfg(test)]
mod tests {
    use super::{new_conversation_id, new_message_id};

    #[test]
    fn ids_are_unique_and_prefixed() {
        let a = new_message_id();
        let b = new_message_id();
        assert_ne!(a, b);
        assert!(a.starts_with("msg-"));
        assert!(new_conversation_id().starts_with("conv-"));
    }
}
