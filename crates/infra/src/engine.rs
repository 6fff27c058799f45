//! Wiring of the write path and the projector.

use std::sync::Arc;

use thiserror::Error;

use chronicle_core::AggregateKey;
use chronicle_events::{DomainEvent, Event, NewEvent};

use crate::audit::AuditSink;
use crate::checkpoint::CheckpointStore;
use crate::event_store::EventStore;
use crate::projector::{ApplyOutcome, Projector, ProjectorError};
use crate::writer::{EventWriter, WriteError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Write(#[from] WriteError),

    /// The event was committed but the apply cycle it triggered failed.
    #[error("event #{} written but apply failed: {source}", event.id)]
    Apply {
        event: Box<Event>,
        #[source]
        source: ProjectorError,
    },
}

/// Owns one writer and one projector over the same log.
///
/// Every successful write triggers one synchronous apply cycle.
pub struct EventEngine<S, C, U> {
    writer: EventWriter<S>,
    projector: Arc<Projector<S, C, U>>,
}

impl<S, C, U> EventEngine<S, C, U>
where
    S: EventStore,
    C: CheckpointStore,
    U: AuditSink,
{
    pub fn new(writer: EventWriter<S>, projector: Arc<Projector<S, C, U>>) -> Self {
        Self { writer, projector }
    }

    pub fn writer(&self) -> &EventWriter<S> {
        &self.writer
    }

    pub fn projector(&self) -> &Arc<Projector<S, C, U>> {
        &self.projector
    }

    /// Write `new` and run one apply cycle.
    pub fn save_and_apply(&self, new: NewEvent) -> Result<(Event, ApplyOutcome), EngineError> {
        let event = self.writer.write(new)?;
        match self.projector.apply() {
            Ok(outcome) => Ok((event, outcome)),
            Err(source) => Err(EngineError::Apply {
                event: Box::new(event),
                source,
            }),
        }
    }

    pub fn save_typed<E: DomainEvent>(
        &self,
        event: &E,
        uuid: Option<AggregateKey>,
    ) -> Result<(Event, ApplyOutcome), EngineError> {
        let mut new = NewEvent::typed(event).map_err(WriteError::from)?;
        new.uuid = uuid;
        self.save_and_apply(new)
    }

    pub fn apply(&self) -> Result<ApplyOutcome, ProjectorError> {
        self.projector.apply()
    }
}
