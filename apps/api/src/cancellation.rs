//! In-flight generation registry.
//!
//! Each long-running session operation holds an `InFlightGuard`. Starting a new
//! operation on the same session aborts the previous one, `cancel` aborts it on
//! request, and dropping the guard (handler finished or client went away)
//! releases it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct InFlight {
    active: Mutex<HashMap<Uuid, (u64, CancellationToken)>>,
    next_ticket: AtomicU64,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    fn active(&self) -> MutexGuard<'_, HashMap<Uuid, (u64, CancellationToken)>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a fresh token for `session_id`, superseding any running operation.
    pub fn begin(self: &Arc<Self>, session_id: Uuid) -> InFlightGuard {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        if let Some((_, previous)) = self.active().insert(session_id, (ticket, token.clone())) {
            debug!("Superseding in-flight generation for session {session_id}");
            previous.cancel();
        }
        InFlightGuard {
            registry: Arc::clone(self),
            session_id,
            ticket,
            token,
        }
    }

    /// Aborts the running operation for `session_id`. Returns whether one was running.
    pub fn cancel(&self, session_id: Uuid) -> bool {
        match self.active().remove(&session_id) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub fn is_active(&self, session_id: Uuid) -> bool {
        self.active().contains_key(&session_id)
    }
}

pub struct InFlightGuard {
    registry: Arc<InFlight>,
    session_id: Uuid,
    ticket: u64,
    token: CancellationToken,
}

impl InFlightGuard {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.token.cancel();
        let mut active = self.registry.active();
        if active
            .get(&self.session_id)
            .is_some_and(|(ticket, _)| *ticket == self.ticket)
        {
            active.remove(&self.session_id);
        }
    }
}
