//! At-most-one lifecycle run per session.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

/// Sessions with a lifecycle run in flight.
#[derive(Clone, Default)]
pub struct RunRegistry {
    active: Arc<Mutex<HashSet<i64>>>,
}

impl RunRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the run slot for `session_id`. `None` when a run is already
    /// in flight. The slot is released when the permit is dropped.
    #[must_use]
    pub fn try_acquire(&self, session_id: i64) -> Option<RunPermit> {
        let inserted = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id);
        inserted.then(|| RunPermit {
            session_id,
            active: Arc::clone(&self.active),
        })
    }

    /// Whether a run is in flight for `session_id`.
    #[must_use]
    pub fn is_active(&self, session_id: i64) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&session_id)
    }
}

/// Proof of an in-flight run; releases the slot on drop.
pub struct RunPermit {
    session_id: i64,
    active: Arc<Mutex<HashSet<i64>>>,
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.session_id);
    }
}
