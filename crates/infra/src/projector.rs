//! The apply loop.
//!
//! A [`Projector`] pulls events past its checkpoint from the event store in
//! id order and hands each one to every aggregate type listening to the
//! event's domain. Per (event, aggregate) pair:
//!
//! 1. skip if the type has no handler for the event type,
//! 2. resolve (load or seed) the aggregate instance,
//! 3. skip if the aggregate has already seen the event,
//! 4. run the handler, stamp timestamps, advance every checkpoint,
//! 5. save; the repository commits the "applied" audit record with the
//!    aggregate, a validation rejection is recorded as "failed".
//!
//! Checkpoints advance before the save outcome is known: a rejected save is
//! reported through the audit trail, not retried.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use chronicle_core::{Aggregate, EventId};
use chronicle_events::{
    AggregateType, Event, EventHandlers, HandlerError, HandlerRegistry, HandlerTable, KeyRoutes,
    RegistryError,
};

use crate::aggregate_store::{AggregateRepository, AggregateStoreError, ProjectorWrite, SaveError};
use crate::audit::{AuditError, AuditSink};
use crate::checkpoint::{CheckpointError, CheckpointStore, RESET_SENTINEL};
use crate::config::{HandlerFailurePolicy, ProjectorConfig};
use crate::event_store::{EventStore, EventStoreError};
use crate::lock::{ApplyLock, LockError};
use crate::resolver::{AggregateResolver, KeySource, ResolveError};

#[derive(Debug, Error)]
pub enum ProjectorError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    EventStore(#[from] EventStoreError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Audit(#[from] AuditError),

    #[error(transparent)]
    AggregateStore(#[from] AggregateStoreError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("handler for {event_type} #{event_id} on {aggregate_type} failed: {source}")]
    Handler {
        event_id: EventId,
        event_type: String,
        aggregate_type: &'static str,
        #[source]
        source: HandlerError,
    },
}

/// Result of one `apply()` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Completed(ApplyReport),
    /// `apply()` was re-entered from inside a running cycle; nothing was done.
    AlreadyApplying,
    /// Another process holds the apply lock; nothing was done.
    LockHeld,
}

impl ApplyOutcome {
    pub fn report(&self) -> Option<&ApplyReport> {
        match self {
            ApplyOutcome::Completed(report) => Some(report),
            _ => None,
        }
    }
}

/// Counts for one completed cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Checkpoint the cycle started from.
    pub from: EventId,
    /// Checkpoint the cycle ended at.
    pub to: EventId,
    pub events: usize,
    /// Handlers run (and saved, when persisting).
    pub applied: usize,
    /// Handlers not run because the aggregate had already seen the event.
    pub skipped: usize,
    /// Saves rejected by validation plus handler errors recorded under
    /// [`HandlerFailurePolicy::RecordAndContinue`].
    pub failed: usize,
}

/// Per-type status line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeInfo {
    pub aggregate_type: &'static str,
    pub domains: Vec<&'static str>,
    pub last_processed: Option<EventId>,
    pub stored: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handled {
    NoHandler,
    Skipped,
    Applied,
    Failed,
}

struct DispatchContext<'a> {
    resolver: AggregateResolver<'a, dyn AggregateBinding>,
    registry: &'a HandlerRegistry<dyn AggregateBinding>,
    audit: &'a dyn AuditSink,
    persist: bool,
    policy: HandlerFailurePolicy,
    advance: &'a dyn Fn(EventId) -> Result<(), ProjectorError>,
}

/// An aggregate type with its handler table and repository, type-erased so
/// the registry can hold every bound type.
trait AggregateBinding: AggregateType {
    fn dispatch(&self, event: &Event, ctx: &DispatchContext<'_>) -> Result<Handled, ProjectorError>;

    fn stored(&self) -> Result<usize, AggregateStoreError>;
}

struct Binding<A, R> {
    repository: R,
    handlers: HandlerTable<A>,
}

impl<A, R> AggregateType for Binding<A, R>
where
    A: EventHandlers,
    R: AggregateRepository<A>,
{
    fn type_name(&self) -> &'static str {
        A::TYPE_NAME
    }

    fn listen_domains(&self) -> &'static [&'static str] {
        A::LISTEN_DOMAINS
    }
}

impl<A, R> AggregateBinding for Binding<A, R>
where
    A: EventHandlers,
    R: AggregateRepository<A>,
{
    fn dispatch(&self, event: &Event, ctx: &DispatchContext<'_>) -> Result<Handled, ProjectorError> {
        let Some(handler) = self.handlers.lookup(&event.event_type) else {
            return Ok(Handled::NoHandler);
        };

        let mut aggregate: A = ctx
            .resolver
            .resolve_or_create(KeySource::Event(event), &self.repository)?;

        let fresh = event.id > aggregate.state().last_event_id() && A::listens_to(&event.domain);
        if !fresh {
            aggregate.state_mut().advance_to(event.id);
            debug!(
                event_id = %event.id,
                aggregate_type = A::TYPE_NAME,
                key = %aggregate.key(),
                "event already applied; skipping"
            );
            return Ok(Handled::Skipped);
        }

        if let Err(source) = handler(&mut aggregate, event) {
            return match ctx.policy {
                HandlerFailurePolicy::Halt => Err(ProjectorError::Handler {
                    event_id: event.id,
                    event_type: event.event_type.clone(),
                    aggregate_type: A::TYPE_NAME,
                    source,
                }),
                HandlerFailurePolicy::RecordAndContinue => {
                    warn!(
                        event_id = %event.id,
                        aggregate_type = A::TYPE_NAME,
                        error = %source,
                        "handler failed; recording and continuing"
                    );
                    if ctx.persist {
                        ctx.audit.record_failed(
                            event.id,
                            A::TYPE_NAME,
                            aggregate.state().record_id(),
                            &source.to_string(),
                        )?;
                    }
                    Ok(Handled::Failed)
                }
            };
        }

        let state = aggregate.state_mut();
        state.touch(event.created_at);
        state.advance_to(event.id);
        ctx.registry.record_progress(A::TYPE_NAME, event.id);
        (ctx.advance)(event.id)?;

        if !ctx.persist {
            return Ok(Handled::Applied);
        }

        match self.repository.save(&mut aggregate, &ProjectorWrite::new(event.id)) {
            Ok(record_id) => {
                debug!(
                    event_id = %event.id,
                    aggregate_type = A::TYPE_NAME,
                    record_id = %record_id,
                    "event applied"
                );
                Ok(Handled::Applied)
            }
            Err(SaveError::Rejected(errors)) => {
                warn!(
                    event_id = %event.id,
                    aggregate_type = A::TYPE_NAME,
                    key = %aggregate.key(),
                    errors = %errors,
                    "save rejected by validation"
                );
                ctx.audit.record_failed(
                    event.id,
                    A::TYPE_NAME,
                    aggregate.state().record_id(),
                    &errors.to_json(),
                )?;
                Ok(Handled::Failed)
            }
            Err(SaveError::Store(e)) => Err(e.into()),
        }
    }

    fn stored(&self) -> Result<usize, AggregateStoreError> {
        self.repository.count()
    }
}

/// Collects aggregate bindings and key routes for a [`Projector`].
pub struct ProjectorBuilder {
    config: ProjectorConfig,
    bindings: Vec<Arc<dyn AggregateBinding>>,
    routes: KeyRoutes,
    lock: Option<Arc<dyn ApplyLock>>,
}

impl ProjectorBuilder {
    /// Drive aggregate type `A`, persisted in `repository`.
    ///
    /// `repository` appends its "applied" records to the audit trail the
    /// projector is built with; cold starts resume from that trail.
    pub fn bind<A, R>(mut self, repository: R) -> Self
    where
        A: EventHandlers,
        R: AggregateRepository<A> + 'static,
    {
        self.bindings.push(Arc::new(Binding {
            repository,
            handlers: A::handlers(),
        }));
        self
    }

    pub fn key_routes(mut self, routes: KeyRoutes) -> Self {
        self.routes = std::mem::take(&mut self.routes).merge(routes);
        self
    }

    /// Guard every cycle with a leader lock.
    pub fn lock(mut self, lock: Arc<dyn ApplyLock>) -> Self {
        self.lock = Some(lock);
        self
    }

    pub fn build<S, C, U>(self, store: S, checkpoints: C, audit: U) -> Result<Projector<S, C, U>, RegistryError>
    where
        S: EventStore,
        C: CheckpointStore,
        U: AuditSink,
    {
        let mut registry: HandlerRegistry<dyn AggregateBinding> = HandlerRegistry::new();
        for binding in self.bindings {
            registry.register(binding)?;
        }
        info!(
            environment = %self.config.environment,
            domains = ?registry.summary(),
            "projector configured"
        );

        Ok(Projector {
            checkpoint_key: self.config.checkpoint_key(),
            config: self.config,
            registry,
            routes: self.routes,
            store,
            checkpoints,
            audit,
            lock: self.lock,
            applying: AtomicBool::new(false),
            last_id: AtomicU64::new(0),
        })
    }
}

/// Replays unprocessed events against the bound aggregate types.
///
/// Cycles are strictly sequential; a call to [`Projector::apply`] while a
/// cycle is running (e.g. from a handler side effect) returns
/// [`ApplyOutcome::AlreadyApplying`].
pub struct Projector<S, C, U> {
    config: ProjectorConfig,
    checkpoint_key: String,
    registry: HandlerRegistry<dyn AggregateBinding>,
    routes: KeyRoutes,
    store: S,
    checkpoints: C,
    audit: U,
    lock: Option<Arc<dyn ApplyLock>>,
    applying: AtomicBool,
    last_id: AtomicU64,
}

struct ApplyingGuard<'a>(&'a AtomicBool);

impl Drop for ApplyingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct LockGuard<'a>(&'a dyn ApplyLock);

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.0.release() {
            warn!(error = %e, "failed to release apply lock");
        }
    }
}

impl Projector<(), (), ()> {
    pub fn builder(config: ProjectorConfig) -> ProjectorBuilder {
        ProjectorBuilder {
            config,
            bindings: Vec::new(),
            routes: KeyRoutes::new(),
            lock: None,
        }
    }
}

impl<S, C, U> Projector<S, C, U>
where
    S: EventStore,
    C: CheckpointStore,
    U: AuditSink,
{
    pub fn config(&self) -> &ProjectorConfig {
        &self.config
    }

    /// In-memory checkpoint: the last event id this projector processed.
    pub fn last_id(&self) -> EventId {
        EventId::new(self.last_id.load(Ordering::Acquire))
    }

    pub fn is_applying(&self) -> bool {
        self.applying.load(Ordering::Acquire)
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        self.registry.is_registered(type_name)
    }

    /// `domain => [type, ...]`.
    pub fn routing(&self) -> std::collections::BTreeMap<String, Vec<&'static str>> {
        self.registry.summary()
    }

    pub fn handlers_for(&self, domain: &str) -> Result<Vec<&'static str>, RegistryError> {
        Ok(self
            .registry
            .handlers_for(domain)?
            .iter()
            .map(|b| b.type_name())
            .collect())
    }

    /// Status of every bound type, in registration order.
    pub fn info(&self) -> Result<Vec<TypeInfo>, ProjectorError> {
        self.registry
            .types()
            .iter()
            .map(|b| {
                Ok(TypeInfo {
                    aggregate_type: b.type_name(),
                    domains: b.listen_domains().to_vec(),
                    last_processed: self.registry.last_processed(b.type_name()),
                    stored: b.stored()?,
                })
            })
            .collect()
    }

    /// Run one apply cycle.
    pub fn apply(&self) -> Result<ApplyOutcome, ProjectorError> {
        if self
            .applying
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("apply() re-entered while applying; ignoring");
            return Ok(ApplyOutcome::AlreadyApplying);
        }
        let _applying = ApplyingGuard(&self.applying);

        let _lock = match &self.lock {
            Some(lock) => {
                if !lock.try_acquire()? {
                    debug!("apply lock held elsewhere; skipping cycle");
                    return Ok(ApplyOutcome::LockHeld);
                }
                Some(LockGuard(lock.as_ref()))
            }
            None => None,
        };

        self.run_cycle().map(ApplyOutcome::Completed)
    }

    /// Step 1: reconcile the in-memory checkpoint with the shared one.
    fn sync_checkpoint(&self) -> Result<EventId, ProjectorError> {
        let shared = match self.checkpoints.get(&self.checkpoint_key)? {
            Some(value) => value,
            None => self
                .audit
                .max_applied_event_id()?
                .map(EventId::as_checkpoint)
                .unwrap_or(RESET_SENTINEL),
        };

        match EventId::from_checkpoint(shared) {
            None => {
                info!(checkpoint = shared, "checkpoint reset; rescanning from the start");
                self.last_id.store(0, Ordering::Release);
            }
            Some(shared) => {
                self.last_id.fetch_max(shared.get(), Ordering::AcqRel);
            }
        }
        Ok(self.last_id())
    }

    fn run_cycle(&self) -> Result<ApplyReport, ProjectorError> {
        let from = self.sync_checkpoint()?;
        let mut report = ApplyReport {
            from,
            to: from,
            ..ApplyReport::default()
        };

        let advance = |id: EventId| self.advance(id);
        let ctx = DispatchContext {
            resolver: AggregateResolver::new(&self.registry, &self.routes),
            registry: &self.registry,
            audit: &self.audit,
            persist: self.config.persist,
            policy: self.config.on_handler_error,
            advance: &advance,
        };

        let mut cursor = from;
        let mut flushed = from;
        loop {
            let page = self
                .store
                .fetch_after(cursor, self.config.domains.as_deref(), self.config.batch_size)?;
            let Some(last) = page.last() else {
                break;
            };
            let page_end = last.id;

            for event in &page {
                if let Err(e) = self.dispatch(event, &ctx, &mut report) {
                    self.pin_before(event.id);
                    warn!(event_id = %event.id, error = %e, "apply cycle halted");
                    return Err(e);
                }
                self.last_id.fetch_max(event.id.get(), Ordering::AcqRel);
                report.events += 1;
            }

            let reached = self.last_id();
            if reached > flushed {
                self.checkpoints
                    .set(&self.checkpoint_key, reached.as_checkpoint())?;
                flushed = reached;
            }
            cursor = page_end;
        }

        report.to = self.last_id();
        if report.events > 0 {
            info!(
                from = %report.from,
                to = %report.to,
                events = report.events,
                applied = report.applied,
                skipped = report.skipped,
                failed = report.failed,
                "apply cycle finished"
            );
        }
        Ok(report)
    }

    /// Hand one event to every type listening to its domain.
    fn dispatch(
        &self,
        event: &Event,
        ctx: &DispatchContext<'_>,
        report: &mut ApplyReport,
    ) -> Result<(), ProjectorError> {
        for binding in self.registry.handlers_for(&event.domain)? {
            match binding.dispatch(event, ctx)? {
                Handled::NoHandler => {}
                Handled::Skipped => report.skipped += 1,
                Handled::Applied => report.applied += 1,
                Handled::Failed => report.failed += 1,
            }
        }
        Ok(())
    }

    /// Step (e): move the in-memory and shared checkpoints to `id`.
    fn advance(&self, id: EventId) -> Result<(), ProjectorError> {
        let previous = self.last_id.fetch_max(id.get(), Ordering::AcqRel);
        if id.get() > previous {
            self.checkpoints.set(&self.checkpoint_key, id.as_checkpoint())?;
        }
        Ok(())
    }

    /// Leave both checkpoints just before `id` so the next cycle retries it.
    fn pin_before(&self, id: EventId) {
        let pinned = id.prev();
        self.last_id.store(pinned.get(), Ordering::Release);
        if let Err(e) = self.checkpoints.set(&self.checkpoint_key, pinned.as_checkpoint()) {
            warn!(event_id = %id, error = %e, "could not pin shared checkpoint");
        }
    }
}
