//! Named lease locks guarding scheduled refresh tasks.
//!
//! A lease expires on its own after its TTL so a crashed holder never blocks
//! a task forever. Failing to acquire is not an error; the caller skips the run.

use anyhow::Result;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::debug;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Proof of holding the lock `name`; `token` identifies this holder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    pub name: String,
    pub token: String,
}

impl LockLease {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            token: Uuid::new_v4().to_string(),
        }
    }
}

#[async_trait]
pub trait LockManager: Send + Sync {
    /// `Ok(None)` when another holder owns an unexpired lease.
    async fn try_acquire(&self, name: &str, ttl: Duration) -> Result<Option<LockLease>>;

    /// Releases `lease` if it is still the current holder.
    async fn release(&self, lease: &LockLease) -> Result<()>;
}

/// Lock name of a refresh task.
pub fn refresh_lock_name(task: &str) -> String {
    format!("refresh:{}", task)
}

/// Process-local leases for single-instance deployments and tests.
#[derive(Debug, Default)]
pub struct LocalLockManager {
    leases: DashMap<String, (String, Instant)>,
}

impl LocalLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, name: &str) -> bool {
        self.leases
            .get(name)
            .map(|entry| entry.1 > Instant::now())
            .unwrap_or(false)
    }
}

#[async_trait]
impl LockManager for LocalLockManager {
    async fn try_acquire(&self, name: &str, ttl: Duration) -> Result<Option<LockLease>> {
        let now = Instant::now();
        let lease = LockLease::new(name);
        match self.leases.entry(name.to_string()) {
            Entry::Occupied(mut held) => {
                if held.get().1 > now {
                    debug!("🔒 Lock {} is held", name);
                    return Ok(None);
                }
                held.insert((lease.token.clone(), now + ttl));
            }
            Entry::Vacant(slot) => {
                slot.insert((lease.token.clone(), now + ttl));
            }
        }
        Ok(Some(lease))
    }

    async fn release(&self, lease: &LockLease) -> Result<()> {
        self.leases
            .remove_if(&lease.name, |_, (token, _)| *token == lease.token);
        Ok(())
    }
}
