use std::sync::RwLock;

use chrono::Utc;

use chronicle_core::{EventId, RecordId};

use super::{AppliedRecord, AuditError, AuditSink, FailedRecord};

#[derive(Debug, Default)]
pub struct InMemoryAuditTrail {
    applied: RwLock<Vec<AppliedRecord>>,
    failed: RwLock<Vec<FailedRecord>>,
}

impl InMemoryAuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn applied(&self) -> Vec<AppliedRecord> {
        self.applied.read().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn failed(&self) -> Vec<FailedRecord> {
        self.failed.read().map(|r| r.clone()).unwrap_or_default()
    }
}

impl AuditSink for InMemoryAuditTrail {
    fn record_applied(
        &self,
        event_id: EventId,
        aggregate_type: &str,
        record_id: RecordId,
    ) -> Result<(), AuditError> {
        let mut applied = self
            .applied
            .write()
            .map_err(|_| AuditError::Storage("lock poisoned".to_string()))?;
        applied.push(AppliedRecord {
            event_id,
            aggregate_type: aggregate_type.to_string(),
            record_id,
            recorded_at: Utc::now(),
        });
        Ok(())
    }

    fn record_failed(
        &self,
        event_id: EventId,
        aggregate_type: &str,
        record_id: Option<RecordId>,
        error: &str,
    ) -> Result<(), AuditError> {
        let mut failed = self
            .failed
            .write()
            .map_err(|_| AuditError::Storage("lock poisoned".to_string()))?;
        failed.push(FailedRecord {
            event_id,
            aggregate_type: aggregate_type.to_string(),
            record_id,
            error: error.to_string(),
            recorded_at: Utc::now(),
        });
        Ok(())
    }

    fn max_applied_event_id(&self) -> Result<Option<EventId>, AuditError> {
        let applied = self
            .applied
            .read()
            .map_err(|_| AuditError::Storage("lock poisoned".to_string()))?;
        Ok(applied.iter().map(|r| r.event_id).max())
    }

    fn applied_events(
        &self,
        aggregate_type: &str,
        record_id: RecordId,
    ) -> Result<Vec<EventId>, AuditError> {
        let applied = self
            .applied
            .read()
            .map_err(|_| AuditError::Storage("lock poisoned".to_string()))?;
        let mut ids: Vec<EventId> = applied
            .iter()
            .filter(|r| r.aggregate_type == aggregate_type && r.record_id == record_id)
            .map(|r| r.event_id)
            .collect();
        ids.sort();
        Ok(ids)
    }
}
