//! Optional leader lock around apply cycles.
//!
//! Without a lock, several processes may run cycles over the same events;
//! per-aggregate checkpoints bound the damage to duplicate attempts. With a
//! lock, a cycle that cannot acquire it returns without doing anything.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres, Row};
use thiserror::Error;
use tokio::runtime::Handle;

use crate::pg;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("apply lock error: {0}")]
    Storage(String),
}

pub trait ApplyLock: Send + Sync {
    /// `Ok(false)` when another holder has the lock.
    fn try_acquire(&self) -> Result<bool, LockError>;
    fn release(&self) -> Result<(), LockError>;
}

impl<L> ApplyLock for Arc<L>
where
    L: ApplyLock + ?Sized,
{
    fn try_acquire(&self) -> Result<bool, LockError> {
        (**self).try_acquire()
    }

    fn release(&self) -> Result<(), LockError> {
        (**self).release()
    }
}

/// Process-local lock; share it through an `Arc` between projectors.
#[derive(Debug, Default)]
pub struct InMemoryApplyLock {
    held: AtomicBool,
}

impl InMemoryApplyLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

impl ApplyLock for InMemoryApplyLock {
    fn try_acquire(&self) -> Result<bool, LockError> {
        Ok(self
            .held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok())
    }

    fn release(&self) -> Result<(), LockError> {
        self.held.store(false, Ordering::Release);
        Ok(())
    }
}

/// Session-level Postgres advisory lock.
///
/// The connection that took the lock is kept out of the pool until release,
/// since advisory locks belong to the session.
#[derive(Debug)]
pub struct PostgresApplyLock {
    pool: PgPool,
    runtime: Handle,
    lock_id: i64,
    session: Mutex<Option<PoolConnection<Postgres>>>,
}

impl PostgresApplyLock {
    pub fn new(pool: PgPool, runtime: Handle, lock_id: i64) -> Self {
        Self {
            pool,
            runtime,
            lock_id,
            session: Mutex::new(None),
        }
    }

    async fn acquire_session(&self) -> Result<Option<PoolConnection<Postgres>>, LockError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| LockError::Storage(e.to_string()))?;
        let row = sqlx::query("SELECT pg_try_advisory_lock($1) AS locked")
            .bind(self.lock_id)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| LockError::Storage(e.to_string()))?;
        let locked: bool = row
            .try_get("locked")
            .map_err(|e| LockError::Storage(e.to_string()))?;
        Ok(locked.then_some(conn))
    }

    async fn release_session(&self, mut conn: PoolConnection<Postgres>) -> Result<(), LockError> {
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(self.lock_id)
            .execute(&mut *conn)
            .await
            .map_err(|e| LockError::Storage(e.to_string()))?;
        Ok(())
    }
}

impl ApplyLock for PostgresApplyLock {
    fn try_acquire(&self) -> Result<bool, LockError> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| LockError::Storage("lock poisoned".to_string()))?;
        if session.is_some() {
            return Ok(false);
        }
        let acquired = pg::block_on(&self.runtime, self.acquire_session())?;
        let locked = acquired.is_some();
        *session = acquired;
        Ok(locked)
    }

    fn release(&self) -> Result<(), LockError> {
        let conn = self
            .session
            .lock()
            .map_err(|_| LockError::Storage("lock poisoned".to_string()))?
            .take();
        match conn {
            Some(conn) => pg::block_on(&self.runtime, self.release_session(conn)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_lock_is_exclusive_until_released() {
        let lock = InMemoryApplyLock::new();
        assert!(lock.try_acquire().unwrap());
        assert!(!lock.try_acquire().unwrap());
        lock.release().unwrap();
        assert!(lock.try_acquire().unwrap());
    }
}
