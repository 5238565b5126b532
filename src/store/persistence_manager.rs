use crate::store::error::Result;
use crate::store::traits::Backend;
use log::warn;
use std::sync::Arc;

/// Owns the storage backend shared by every conversation opened in a
/// session and carries the engine's write policies.
///
/// Two policies exist and are deliberately distinct:
/// - the optimistic send pipeline requires its initial write to succeed
///   (durability precedes transmission), so those calls propagate errors;
/// - inbound reconciliation writes are best-effort: in-memory state has
///   already advanced so the UI stays responsive, and the failure is logged
///   for the repair pass instead of being silently swallowed.
pub struct PersistenceManager {
    backend: Arc<dyn Backend>,
}

impl PersistenceManager {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> Arc<dyn Backend> {
        self.backend.clone()
    }

    /// Named best-effort policy: log and continue. Use for inbound-side
    /// writes where the in-memory state is authoritative for this session.
    pub fn best_effort<T>(&self, context: &'static str, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(target: "Store", "Best-effort write failed ({context}): {e}");
                None
            }
        }
    }
}
