use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use chronicle_core::{Aggregate, AggregateKey, RecordId};

use super::{AggregateRepository, AggregateStoreError, ProjectorWrite, SaveError};
use crate::audit::{AuditSink, InMemoryAuditTrail};

/// In-memory aggregate store for tests/dev.
///
/// "Applied" audit records go to the sink given to [`with_audit`]; pass the
/// projector's own audit sink so cold starts can resume from it.
///
/// [`with_audit`]: InMemoryAggregateStore::with_audit
pub struct InMemoryAggregateStore<A> {
    inner: RwLock<Inner<A>>,
    audit: Arc<dyn AuditSink>,
}

#[derive(Debug)]
struct Inner<A> {
    rows: HashMap<AggregateKey, A>,
    next_record: u64,
}

impl<A> InMemoryAggregateStore<A> {
    /// Store with a private audit trail.
    pub fn new() -> Self {
        Self::with_audit(Arc::new(InMemoryAuditTrail::new()))
    }

    pub fn with_audit(audit: Arc<dyn AuditSink>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                rows: HashMap::new(),
                next_record: 1,
            }),
            audit,
        }
    }
}

impl<A> Default for InMemoryAggregateStore<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: fmt::Debug> fmt::Debug for InMemoryAggregateStore<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryAggregateStore")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl<A: Aggregate> InMemoryAggregateStore<A> {
    /// Every stored aggregate, ordered by record id.
    pub fn all(&self) -> Vec<A> {
        let Ok(inner) = self.inner.read() else {
            return vec![];
        };
        let mut rows: Vec<A> = inner.rows.values().cloned().collect();
        rows.sort_by_key(|a| a.state().record_id());
        rows
    }
}

impl<A: Aggregate> AggregateRepository<A> for InMemoryAggregateStore<A> {
    fn find_by_key(&self, key: &AggregateKey) -> Result<Option<A>, AggregateStoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| AggregateStoreError::Storage("lock poisoned".to_string()))?;
        Ok(inner.rows.get(key).cloned())
    }

    fn save(&self, aggregate: &mut A, write: &ProjectorWrite) -> Result<RecordId, SaveError> {
        aggregate.validate().map_err(SaveError::Rejected)?;

        // The write lock is held across the audit append and the row insert.
        let mut inner = self
            .inner
            .write()
            .map_err(|_| AggregateStoreError::Storage("lock poisoned".to_string()))?;

        let (record_id, fresh) = match aggregate.state().record_id() {
            Some(id) => (id, false),
            None => (RecordId::new(inner.next_record), true),
        };
        self.audit
            .record_applied(write.event_id(), A::TYPE_NAME, record_id)
            .map_err(|e| AggregateStoreError::Storage(e.to_string()))?;

        if fresh {
            inner.next_record += 1;
        }
        aggregate.state_mut().mark_persisted(record_id);
        inner.rows.insert(aggregate.key().clone(), aggregate.clone());
        Ok(record_id)
    }

    fn count(&self) -> Result<usize, AggregateStoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| AggregateStoreError::Storage("lock poisoned".to_string()))?;
        Ok(inner.rows.len())
    }
}
