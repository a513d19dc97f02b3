//! Lifecycle workers: scheduled dedup, summarization, expiry, backup
//! verification, and stale-session closure (spec §4.5).
//!
//! Each worker runs as an independent, cooperatively scheduled task
//! (grounded on the teacher's `sync::worker::SyncWorker` mpsc-command loop,
//! generalized from one sync worker to a named-lease-per-`(kind, user_id)`
//! registry since this engine's workers are per-tenant and must not
//! overlap runs for the same tenant, per spec §5).

pub mod backup;
pub mod dedup;
pub mod expiry;
pub mod session_closure;
pub mod summarize;

use dashmap::DashMap;
use std::sync::Arc;

use crate::error::{MemoriaError, Result};

/// Holds a named lease for the lifetime of one worker run; releases on drop.
pub struct LeaseGuard {
    registry: Arc<LeaseRegistry>,
    key: (String, String),
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.registry.leases.remove(&self.key);
    }
}

/// One lease per `(worker_kind, user_id)` (spec §5): a second concurrent
/// invocation for the same tenant and worker returns `AlreadyRunning`.
#[derive(Default)]
pub struct LeaseRegistry {
    leases: DashMap<(String, String), ()>,
}

impl LeaseRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn acquire(self: &Arc<Self>, worker_kind: &str, user_id: &str) -> Result<LeaseGuard> {
        let key = (worker_kind.to_string(), user_id.to_string());
        if self.leases.insert(key.clone(), ()).is_some() {
            // insert() overwrote an existing lease; put it back and fail.
            return Err(MemoriaError::Conflict(format!(
                "{} already running for {}",
                worker_kind, user_id
            )));
        }
        Ok(LeaseGuard {
            registry: self.clone(),
            key,
        })
    }
}
