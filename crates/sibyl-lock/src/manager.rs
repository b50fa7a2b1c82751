//! Distributed per-tenant, per-entity lock manager backed by Redis
//! `SET NX EX` plus Lua compare-and-delete/compare-and-extend scripts,
//! grounded on `sibyl.locks.EntityLockManager` (§4.2).

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::errors::LockError;

/// Default TTL a lock is held for before it auto-expires, guarding against
/// a crashed holder wedging an entity forever.
pub const LOCK_TTL_SECONDS: u64 = 30;
/// Default time a blocking `acquire` will poll before giving up.
pub const LOCK_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Compare-and-delete: only release if the stored value still matches the
/// token we were handed, so a caller can never release a lock it doesn't
/// own (e.g. after its own TTL expired and someone else acquired it).
const RELEASE_SCRIPT: &str = r"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
";

/// Compare-and-extend: only refresh the TTL if we still own the lock.
const EXTEND_SCRIPT: &str = r"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('expire', KEYS[1], ARGV[2])
else
    return 0
end
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired(LockToken),
    Busy,
    TimedOut,
}

pub struct LockManager {
    conn: ConnectionManager,
    instance_id: String,
}

impl LockManager {
    pub fn new(conn: ConnectionManager) -> Self {
        let full = Uuid::new_v4().simple().to_string();
        Self {
            conn,
            instance_id: full[..8].to_string(),
        }
    }

    fn lock_key(organization_id: &str, entity_id: &str) -> String {
        format!("sibyl:lock:{organization_id}:{entity_id}")
    }

    fn lock_value(&self) -> String {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        format!("{}:{now}", self.instance_id)
    }

    /// Attempt to acquire the lock. Non-blocking (`wait_timeout = None`)
    /// returns `Busy` immediately on contention; blocking polls at
    /// `POLL_INTERVAL` until `wait_timeout` elapses, then returns
    /// `TimedOut`.
    #[instrument(skip(self))]
    pub async fn acquire(
        &self,
        organization_id: &str,
        entity_id: &str,
        wait_timeout: Option<Duration>,
    ) -> Result<AcquireOutcome, LockError> {
        require_tenant(organization_id)?;
        let key = Self::lock_key(organization_id, entity_id);
        let value = self.lock_value();
        let deadline = wait_timeout.map(|d| tokio::time::Instant::now() + d);

        loop {
            let mut conn = self.conn.clone();
            let acquired: bool = redis::cmd("SET")
                .arg(&key)
                .arg(&value)
                .arg("NX")
                .arg("EX")
                .arg(LOCK_TTL_SECONDS)
                .query_async::<Option<String>>(&mut conn)
                .await
                .map_err(|e| LockError::Backend(e.to_string()))?
                .is_some();

            if acquired {
                debug!(organization_id, entity_id, "lock acquired");
                return Ok(AcquireOutcome::Acquired(LockToken(value)));
            }

            let Some(deadline) = deadline else {
                return Ok(AcquireOutcome::Busy);
            };
            if tokio::time::Instant::now() >= deadline {
                warn!(organization_id, entity_id, "lock acquisition timed out");
                return Ok(AcquireOutcome::TimedOut);
            }
            let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..30));
            tokio::time::sleep(POLL_INTERVAL + jitter).await;
        }
    }

    #[instrument(skip(self, token))]
    pub async fn release(
        &self,
        organization_id: &str,
        entity_id: &str,
        token: &LockToken,
    ) -> Result<bool, LockError> {
        require_tenant(organization_id)?;
        let key = Self::lock_key(organization_id, entity_id);
        let mut conn = self.conn.clone();
        let released: i64 = Script::new(RELEASE_SCRIPT)
            .key(&key)
            .arg(&token.0)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| LockError::Backend(e.to_string()))?;
        Ok(released == 1)
    }

    #[instrument(skip(self, token))]
    pub async fn extend(
        &self,
        organization_id: &str,
        entity_id: &str,
        token: &LockToken,
        ttl: Duration,
    ) -> Result<bool, LockError> {
        require_tenant(organization_id)?;
        let key = Self::lock_key(organization_id, entity_id);
        let mut conn = self.conn.clone();
        let extended: i64 = Script::new(EXTEND_SCRIPT)
            .key(&key)
            .arg(&token.0)
            .arg(ttl.as_secs())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| LockError::Backend(e.to_string()))?;
        Ok(extended == 1)
    }

    /// Acquire the lock, run `f`, then release unconditionally — released
    /// whether `f` succeeds or fails, matching the source's async
    /// context-manager semantics.
    pub async fn with_lock<T, Fut, F>(
        self: &Arc<Self>,
        organization_id: &str,
        entity_id: &str,
        wait_timeout: Option<Duration>,
        f: F,
    ) -> Result<T, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let token = match self.acquire(organization_id, entity_id, wait_timeout).await? {
            AcquireOutcome::Acquired(token) => token,
            AcquireOutcome::Busy | AcquireOutcome::TimedOut => {
                return Err(LockError::Acquisition {
                    entity_id: entity_id.to_string(),
                    organization_id: organization_id.to_string(),
                    reason: "timeout".to_string(),
                })
            }
        };

        let result = f().await;
        if let Err(err) = self.release(organization_id, entity_id, &token).await {
            warn!(organization_id, entity_id, error = %err, "failed to release lock after scoped work");
        }
        Ok(result)
    }
}

fn require_tenant(organization_id: &str) -> Result<(), LockError> {
    if organization_id.trim().is_empty() {
        return Err(LockError::TenantMissing);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_key_matches_source_format() {
        assert_eq!(
            LockManager::lock_key("org_123", "entity_456"),
            "sibyl:lock:org_123:entity_456"
        );
    }

    #[test]
    fn require_tenant_rejects_blank() {
        assert!(matches!(require_tenant(""), Err(LockError::TenantMissing)));
        assert!(require_tenant("org_1").is_ok());
    }

    #[test]
    fn acquire_outcome_variants_are_distinct() {
        let a = AcquireOutcome::Acquired(LockToken("abc:1.0".into()));
        let b = AcquireOutcome::Busy;
        let c = AcquireOutcome::TimedOut;
        assert_ne!(a, b);
        assert_ne!(b, c);
    }
}
