//! Scoped lock ownership.

use std::sync::Arc;

use latchkey_types::lock::LockKey;

use super::context::ContextId;
use super::manager::{ManagerInner, SessionSlot};
use crate::pool::{LockSession, SessionPool};

enum GuardState<P: SessionPool> {
    /// Held elsewhere, or the wait was abandoned.
    Unavailable,
    /// The context already held the lock; the outer guard owns it.
    Reentrant,
    Owned {
        manager: Arc<ManagerInner<P>>,
        context: ContextId,
        slot: SessionSlot<P::Session>,
    },
    Released,
}

/// Result of an acquisition attempt.
///
/// When [`is_acquired`](Self::is_acquired) is true the guard owns the lock
/// until [`release`](Self::release) is awaited or the guard is dropped.
/// Dropping an owned guard untracks the lock immediately and finishes the
/// store-side unlock on a spawned task, so early returns, `?` and task
/// cancellation all release.
pub struct LockGuard<P: SessionPool> {
    workflow_id: String,
    key: LockKey,
    state: GuardState<P>,
}

impl<P: SessionPool> LockGuard<P> {
    pub(crate) fn unavailable(workflow_id: &str, key: LockKey) -> Self {
        Self {
            workflow_id: workflow_id.to_string(),
            key,
            state: GuardState::Unavailable,
        }
    }

    pub(crate) fn reentrant(workflow_id: &str, key: LockKey) -> Self {
        Self {
            workflow_id: workflow_id.to_string(),
            key,
            state: GuardState::Reentrant,
        }
    }

    pub(crate) fn owned(
        manager: Arc<ManagerInner<P>>,
        context: ContextId,
        workflow_id: &str,
        key: LockKey,
        slot: SessionSlot<P::Session>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.to_string(),
            key,
            state: GuardState::Owned {
                manager,
                context,
                slot,
            },
        }
    }

    /// Whether the caller may run the protected section.
    pub fn is_acquired(&self) -> bool {
        matches!(self.state, GuardState::Owned { .. } | GuardState::Reentrant)
    }

    /// Acquired through re-entrancy; releasing it leaves the lock held.
    pub fn is_reentrant(&self) -> bool {
        matches!(self.state, GuardState::Reentrant)
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn key(&self) -> LockKey {
        self.key
    }

    /// Release now and wait for the store-side unlock.
    ///
    /// Never fails: an unlock error is logged and tracking is cleared anyway.
    pub async fn release(mut self) {
        if let GuardState::Owned {
            manager,
            context,
            slot,
        } = std::mem::replace(&mut self.state, GuardState::Released)
        {
            manager
                .release(context, self.key, &self.workflow_id, &slot)
                .await;
        }
    }
}

impl<P: SessionPool> Drop for LockGuard<P> {
    fn drop(&mut self) {
        let GuardState::Owned {
            manager,
            context,
            slot,
        } = std::mem::replace(&mut self.state, GuardState::Released)
        else {
            return;
        };

        manager.untrack(context, self.key, &slot);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let key = self.key;
                let workflow_id = std::mem::take(&mut self.workflow_id);
                handle.spawn(async move {
                    manager.unlock_slot(&slot, key, &workflow_id).await;
                });
            }
            Err(_) => {
                // No runtime to unlock on: closing the session releases the lock.
                if let Ok(mut held) = slot.try_lock() {
                    if let Some(session) = held.take() {
                        session.discard();
                    }
                }
                tracing::warn!(
                    workflow_id = %self.workflow_id,
                    lock_key = %self.key,
                    "lock guard dropped outside a runtime, session discarded"
                );
            }
        }
    }
}
