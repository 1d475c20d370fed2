use {
    super::retry::RetryPolicy,
    crate::domain::{error::PipelineError, store::LockStore},
    chrono::Utc,
    std::{sync::Arc, time::Duration},
    uuid::Uuid,
};

/// Proof of a held lock. Release goes through [`LockManager::release`].
#[derive(Debug)]
pub struct LockHandle {
    name: String,
    owner: String,
}

impl LockHandle {
    pub fn owner(&self) -> &str {
        &self.owner
    }
}

/// Named mutual exclusion over the lock table, shared by every process that
/// talks to the same store.
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn LockStore>,
    ttl: Duration,
    policy: RetryPolicy,
}

impl LockManager {
    pub fn new(store: Arc<dyn LockStore>, ttl: Duration, policy: RetryPolicy) -> Self {
        Self { store, ttl, policy }
    }

    pub async fn acquire(&self, name: &str) -> Result<LockHandle, PipelineError> {
        let owner = owner_token();
        let ttl = chrono::Duration::from_std(self.ttl)
            .map_err(|e| PipelineError::Configuration(format!("lock ttl out of range: {e}")))?;

        for attempt in 1..=self.policy.max_attempts {
            let now = Utc::now();
            self.store.purge_expired_locks(now).await?;

            if self.store.try_insert_lock(name, &owner, now + ttl).await? {
                tracing::debug!(lock = name, attempt, "lock acquired");
                return Ok(LockHandle {
                    name: name.to_string(),
                    owner,
                });
            }

            if attempt < self.policy.max_attempts {
                tokio::time::sleep(self.policy.delay_for(attempt)).await;
            }
        }

        tracing::info!(lock = name, attempts = self.policy.max_attempts, "lock busy");
        Err(PipelineError::LockUnavailable(name.to_string()))
    }

    /// `Ok(false)` means the row was already gone, usually reaped after
    /// the TTL ran out.
    pub async fn release(&self, handle: LockHandle) -> Result<bool, PipelineError> {
        let deleted = self.store.delete_lock(&handle.name, &handle.owner).await?;
        if !deleted {
            tracing::warn!(lock = %handle.name, "lock expired before release");
        }
        Ok(deleted)
    }
}

fn owner_token() -> String {
    format!("{}:{}", std::process::id(), Uuid::now_v7())
}
