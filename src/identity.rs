use crate::types::message::UserId;
use std::sync::Arc;

/// Supplies the current local user id at call time. Authentication itself
/// is an external collaborator; the engine only fails fast when no identity
/// is present.
pub trait IdentityProvider: Send + Sync {
    fn current_user_id(&self) -> Option<UserId>;
}

/// A fixed, already-authenticated identity.
pub struct StaticIdentity {
    user_id: UserId,
}

impl StaticIdentity {
    pub fn new(user_id: impl Into<UserId>) -> Arc<Self> {
        Arc::new(Self {
            user_id: user_id.into(),
        })
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user_id(&self) -> Option<UserId> {
        Some(self.user_id.clone())
    }
}

#[cfg(test)]
pub struct NoIdentity;

#[cfg(test)]
impl IdentityProvider for NoIdentity {
    fn current_user_id(&self) -> Option<UserId> {
        None
    }
}
