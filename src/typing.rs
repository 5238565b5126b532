use crate::types::message::UserId;
use dashmap::DashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// How long a typing flag lives without a refresh.
pub const TYPING_TTL: Duration = Duration::from_secs(3);

/// Minimum gap between locally-sent typing-start events.
pub const TYPING_DEBOUNCE: Duration = Duration::from_millis(2500);

/// Tracks which remote users are typing. The only state with a hard TTL and
/// no durable persistence: entries expire on their own whether or not a
/// typing-stop event ever arrives.
pub struct TypingTracker {
    entries: DashMap<UserId, Instant>,
    ttl: Duration,
}

impl Default for TypingTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl TypingTracker {
    pub fn new() -> Self {
        Self::with_ttl(TYPING_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Apply a remote typing event. Returns `true` if the visible set of
    /// typing users changed.
    pub fn apply(&self, user_id: &str, is_typing: bool) -> bool {
        if is_typing {
            let was_typing = self
                .entries
                .insert(user_id.to_string(), Instant::now())
                .is_some_and(|prev| prev.elapsed() < self.ttl);
            !was_typing
        } else {
            self.entries.remove(user_id).is_some()
        }
    }

    /// Users whose flag has not yet expired, sorted for stable snapshots.
    pub fn typing_users(&self) -> Vec<UserId> {
        let ttl = self.ttl;
        let mut users: Vec<UserId> = self
            .entries
            .iter()
            .filter(|entry| entry.value().elapsed() < ttl)
            .map(|entry| entry.key().clone())
            .collect();
        users.sort();
        users
    }

    /// Drop expired entries. Returns `true` if any entry was removed; the
    /// sweep loop emits an update only in that case.
    pub fn sweep(&self) -> bool {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries.retain(|_, started| started.elapsed() < ttl);
        self.entries.len() != before
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

/// Send-side debounce for the local user's typing signal: start events are
/// rate-limited, stop is always sent eagerly (on blur or send).
pub struct LocalTypingState {
    last_start: Mutex<Option<Instant>>,
    debounce: Duration,
}

impl Default for LocalTypingState {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalTypingState {
    pub fn new() -> Self {
        Self::with_debounce(TYPING_DEBOUNCE)
    }

    pub fn with_debounce(debounce: Duration) -> Self {
        Self {
            last_start: Mutex::new(None),
            debounce,
        }
    }

    /// Whether a typing-start event should go on the wire now.
    pub fn should_send_start(&self) -> bool {
        let mut last = self.last_start.lock().expect("typing debounce poisoned");
        match *last {
            Some(at) if at.elapsed() < self.debounce => false,
            _ => {
                *last = Some(Instant::now());
                true
            }
        }
    }

    /// Reset so the next keystroke sends a fresh start.
    pub fn reset(&self) {
        *self.last_start.lock().expect("typing debounce poisoned") = None;
    }
}
