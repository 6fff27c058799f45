//! Integration tests for the full pipeline.
//!
//! Write → checksum chain → apply cycle → registry → resolver → handler →
//! save → audit → checkpoints, over the in-memory adapters and the sales
//! domain.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use serde_json::json;

use chronicle_core::{Aggregate, AggregateKey, EventId, RecordId};
use chronicle_events::{checksum, verify_chain, Event, NewEvent, RegistryError};
use chronicle_sales::{
    key_routes, LineAdded, Payment, Sale, SaleCreated, Wallet, WalletDeposited, WalletOpened,
};

use crate::aggregate_store::{
    AggregateRepository, AggregateStoreError, InMemoryAggregateStore, ProjectorWrite, SaveError,
};
use crate::audit::{AuditError, AuditSink, InMemoryAuditTrail};
use crate::checkpoint::{CheckpointStore, InMemoryCheckpointStore, RESET_SENTINEL};
use crate::config::{ProjectorConfig, WriterConfig};
use crate::engine::{EngineError, EventEngine};
use crate::event_store::{EventStore, InMemoryEventStore};
use crate::lock::{ApplyLock, InMemoryApplyLock};
use crate::projector::{ApplyOutcome, ApplyReport, Projector, ProjectorError};
use crate::writer::EventWriter;

type TestProjector =
    Projector<Arc<InMemoryEventStore>, Arc<InMemoryCheckpointStore>, Arc<InMemoryAuditTrail>>;

struct Harness {
    store: Arc<InMemoryEventStore>,
    checkpoints: Arc<InMemoryCheckpointStore>,
    audit: Arc<InMemoryAuditTrail>,
    sales: Arc<InMemoryAggregateStore<Sale>>,
    wallets: Arc<InMemoryAggregateStore<Wallet>>,
    engine: EventEngine<Arc<InMemoryEventStore>, Arc<InMemoryCheckpointStore>, Arc<InMemoryAuditTrail>>,
}

impl Harness {
    fn new(config: ProjectorConfig) -> Self {
        let store = Arc::new(InMemoryEventStore::new());
        let checkpoints = Arc::new(InMemoryCheckpointStore::new());
        let audit = Arc::new(InMemoryAuditTrail::new());
        let sales = Arc::new(InMemoryAggregateStore::with_audit(audit_sink(&audit)));
        let wallets = Arc::new(InMemoryAggregateStore::with_audit(audit_sink(&audit)));

        let projector = Projector::builder(config)
            .bind::<Sale, _>(Arc::clone(&sales))
            .bind::<Wallet, _>(Arc::clone(&wallets))
            .key_routes(key_routes())
            .build(Arc::clone(&store), Arc::clone(&checkpoints), Arc::clone(&audit))
            .unwrap();
        let writer = EventWriter::new(Arc::clone(&store), WriterConfig::default());

        Self {
            store,
            checkpoints,
            audit,
            sales,
            wallets,
            engine: EventEngine::new(writer, Arc::new(projector)),
        }
    }

    fn checkpoint(&self) -> Option<i64> {
        let key = self.engine.projector().config().checkpoint_key();
        self.checkpoints.get(&key).unwrap()
    }

    fn set_checkpoint(&self, value: i64) {
        let key = self.engine.projector().config().checkpoint_key();
        self.checkpoints.set(&key, value).unwrap();
    }

    fn apply(&self) -> ApplyReport {
        self.engine.apply().unwrap().report().cloned().unwrap()
    }

    fn sale(&self, key: &AggregateKey) -> Sale {
        self.sales.find_by_key(key).unwrap().unwrap()
    }

    fn wallet(&self, key: &AggregateKey) -> Wallet {
        self.wallets.find_by_key(key).unwrap().unwrap()
    }

    /// Write a sale with one line; returns its key.
    fn seed_sale(&self, customer: &str, unit_price: i64) -> AggregateKey {
        let (created, _) = self
            .engine
            .save_typed(&SaleCreated { customer: customer.into() }, None)
            .unwrap();
        self.engine
            .save_typed(
                &LineAdded { sku: "A-1".into(), quantity: 1, unit_price },
                Some(created.uuid.clone()),
            )
            .unwrap();
        created.uuid
    }

    fn seed_wallet(&self, owner: &str, deposit: i64) -> AggregateKey {
        let (opened, _) = self
            .engine
            .save_typed(&WalletOpened { owner: owner.into() }, None)
            .unwrap();
        self.engine
            .save_typed(&WalletDeposited { amount: deposit }, Some(opened.uuid.clone()))
            .unwrap();
        opened.uuid
    }
}

fn audit_sink<S: AuditSink + 'static>(audit: &Arc<S>) -> Arc<dyn AuditSink> {
    Arc::clone(audit) as Arc<dyn AuditSink>
}

fn all_events(store: &InMemoryEventStore) -> Vec<Event> {
    store.fetch_after(EventId::ZERO, None, usize::MAX).unwrap()
}

#[test]
fn scenario_a_first_sale_is_created_and_applied_once() {
    let h = Harness::new(ProjectorConfig::default());
    assert_eq!(h.checkpoint(), None);

    let (event, outcome) = h
        .engine
        .save_and_apply(NewEvent::new("Sale.Created", json!({ "customer": "acme" })).in_domain("sales"))
        .unwrap();

    assert_eq!(event.id, EventId::new(1));
    assert_eq!(event.checksum.as_deref(), Some(checksum::compute(&event, None).as_str()));

    let report = outcome.report().unwrap();
    assert_eq!(report.from, EventId::ZERO);
    assert_eq!(report.to, EventId::new(1));
    assert_eq!(report.applied, 1);
    assert_eq!(h.checkpoint(), Some(1));

    let sale = h.sale(&event.uuid);
    assert_eq!(sale.customer(), "acme");
    assert_eq!(sale.state().last_event_id(), EventId::new(1));
    assert_eq!(sale.state().created_at(), Some(event.created_at));

    let applied = h.audit.applied();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].event_id, EventId::new(1));
    assert_eq!(applied[0].aggregate_type, "Sale");
    assert_eq!(Some(applied[0].record_id), sale.state().record_id());
}

#[test]
fn scenario_b_reset_rescans_without_reapplying() {
    let h = Harness::new(ProjectorConfig::default());
    let sale_key = h.seed_sale("acme", 1200);
    let before = h.sale(&sale_key);
    let audited = h.audit.applied().len();

    h.set_checkpoint(RESET_SENTINEL);
    let report = h.apply();

    assert_eq!(report.from, EventId::ZERO);
    assert_eq!(report.events, 2);
    assert_eq!(report.skipped, 2);
    assert_eq!(report.applied, 0);
    assert_eq!(h.audit.applied().len(), audited);
    assert_eq!(h.sale(&sale_key), before);
    assert_eq!(h.checkpoint(), Some(2));
}

#[test]
fn scenario_c_unhandled_event_type_is_skipped_but_passed() {
    let h = Harness::new(ProjectorConfig::default());

    let (_, outcome) = h
        .engine
        .save_and_apply(NewEvent::new("Sale.Archived", json!({})).in_domain("sales"))
        .unwrap();

    let report = outcome.report().unwrap();
    assert_eq!(report.events, 1);
    assert_eq!(report.applied + report.skipped + report.failed, 0);
    assert!(h.audit.applied().is_empty());
    assert!(h.audit.failed().is_empty());
    assert_eq!(h.engine.projector().last_id(), EventId::new(1));
    assert_eq!(h.checkpoint(), Some(1));
}

#[test]
fn events_in_unregistered_domains_fail_the_cycle() {
    let h = Harness::new(ProjectorConfig::default());
    h.seed_sale("acme", 100);

    let err = h
        .engine
        .save_and_apply(NewEvent::new("Invoice.Issued", json!({})).in_domain("billing"))
        .unwrap_err();

    match err {
        EngineError::Apply { event, source } => {
            assert_eq!(event.id, EventId::new(3));
            assert!(matches!(
                source,
                ProjectorError::Registry(RegistryError::NoHandlers(ref d)) if d == "billing"
            ));
        }
        other => panic!("expected apply failure, got {other:?}"),
    }
    // The event is committed and will be retried.
    assert_eq!(h.store.len(), 3);
    assert_eq!(h.checkpoint(), Some(2));
}

#[test]
fn events_without_a_domain_land_in_the_default_domain() {
    let h = Harness::new(ProjectorConfig::default());
    let err = h
        .engine
        .save_and_apply(NewEvent::new("Mystery.Happened", json!({})))
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Apply { source: ProjectorError::Registry(RegistryError::NoHandlers(ref d)), .. }
            if d == "unknown"
    ));
}

#[test]
fn partial_failures_are_recorded_per_aggregate_and_the_batch_continues() {
    let h = Harness::new(ProjectorConfig::default());
    let sale_key = h.seed_sale("acme", 500);
    let wallet_key = h.seed_wallet("ada", 100);

    // Write without applying, then run one cycle over both events.
    let writer = h.engine.writer();
    writer
        .write_typed(
            &Payment {
                sale_uuid: sale_key.to_string(),
                wallet_uuid: wallet_key.to_string(),
                amount: 300,
            },
            None,
        )
        .unwrap();
    writer
        .write_typed(&WalletDeposited { amount: 50 }, Some(wallet_key.clone()))
        .unwrap();

    let report = h.apply();
    assert_eq!(report.events, 2);
    assert_eq!(report.applied, 2);
    assert_eq!(report.failed, 1);

    assert_eq!(h.sale(&sale_key).paid(), 300);
    assert_eq!(h.wallet(&wallet_key).balance(), 150);

    let failed = h.audit.failed();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].event_id, EventId::new(5));
    assert_eq!(failed[0].aggregate_type, "Wallet");
    assert_eq!(failed[0].error, r#"{"balance":["must be greater than or equal to 0"]}"#);
    assert!(h
        .audit
        .applied()
        .iter()
        .any(|r| r.event_id == EventId::new(5) && r.aggregate_type == "Sale"));
}

#[test]
fn replaying_into_fresh_stores_reproduces_the_same_state() {
    let h = Harness::new(ProjectorConfig::default());
    let sale_key = h.seed_sale("acme", 400);
    let wallet_key = h.seed_wallet("ada", 1000);
    h.engine
        .save_typed(
            &Payment {
                sale_uuid: sale_key.to_string(),
                wallet_uuid: wallet_key.to_string(),
                amount: 400,
            },
            None,
        )
        .unwrap();

    let sales = Arc::new(InMemoryAggregateStore::<Sale>::new());
    let wallets = Arc::new(InMemoryAggregateStore::<Wallet>::new());
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());
    let replay = Projector::builder(ProjectorConfig::default())
        .bind::<Sale, _>(Arc::clone(&sales))
        .bind::<Wallet, _>(Arc::clone(&wallets))
        .key_routes(key_routes())
        .build(
            Arc::clone(&h.store),
            Arc::clone(&checkpoints),
            Arc::new(InMemoryAuditTrail::new()),
        )
        .unwrap();

    replay.apply().unwrap();
    let once = (sales.all(), wallets.all());

    checkpoints
        .set(&replay.config().checkpoint_key(), RESET_SENTINEL)
        .unwrap();
    let second = replay.apply().unwrap().report().cloned().unwrap();
    assert_eq!(second.applied, 0);
    assert_eq!((sales.all(), wallets.all()), once);

    assert_eq!(sales.find_by_key(&sale_key).unwrap().unwrap(), h.sale(&sale_key));
    assert_eq!(wallets.find_by_key(&wallet_key).unwrap().unwrap(), h.wallet(&wallet_key));
}

#[test]
fn aggregate_checkpoints_never_move_backwards() {
    let h = Harness::new(ProjectorConfig::default());
    let sale_key = h.seed_sale("acme", 100);
    let mut seen = vec![h.sale(&sale_key).state().last_event_id()];

    for round in 0..3 {
        h.engine
            .save_typed(
                &LineAdded { sku: format!("B-{round}"), quantity: 1, unit_price: 10 },
                Some(sale_key.clone()),
            )
            .unwrap();
        h.set_checkpoint(RESET_SENTINEL);
        h.apply();
        seen.push(h.sale(&sale_key).state().last_event_id());
    }

    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(*seen.last().unwrap(), EventId::new(5));
    assert_eq!(h.sale(&sale_key).lines().len(), 4);
}

#[test]
fn cold_start_resumes_from_the_audit_trail() {
    let h = Harness::new(ProjectorConfig::default());
    h.seed_sale("acme", 100);

    let resumed = Projector::builder(ProjectorConfig::default())
        .bind::<Sale, _>(Arc::clone(&h.sales))
        .bind::<Wallet, _>(Arc::clone(&h.wallets))
        .build(
            Arc::clone(&h.store),
            Arc::new(InMemoryCheckpointStore::new()),
            Arc::clone(&h.audit),
        )
        .unwrap();

    let report = resumed.apply().unwrap().report().cloned().unwrap();
    assert_eq!(h.audit.max_applied_event_id().unwrap(), Some(EventId::new(2)));
    assert_eq!(report.from, EventId::new(2));
    assert_eq!(report.events, 0);
}

#[test]
fn domain_allow_list_limits_what_is_fetched() {
    let h = Harness::new(ProjectorConfig::default().with_domains(["wallet"]));
    let sale_key = h.seed_sale("acme", 100);
    let wallet_key = h.seed_wallet("ada", 100);

    assert!(h.sales.find_by_key(&sale_key).unwrap().is_none());
    assert_eq!(h.wallet(&wallet_key).balance(), 100);
    assert_eq!(h.engine.projector().last_id(), EventId::new(4));
}

#[test]
fn held_lock_skips_the_cycle() {
    let store = Arc::new(InMemoryEventStore::new());
    let sales = Arc::new(InMemoryAggregateStore::<Sale>::new());
    let lock = Arc::new(InMemoryApplyLock::new());
    let projector = Projector::builder(ProjectorConfig::default())
        .bind::<Sale, _>(Arc::clone(&sales))
        .lock(Arc::clone(&lock) as Arc<dyn ApplyLock>)
        .build(
            Arc::clone(&store),
            Arc::new(InMemoryCheckpointStore::new()),
            Arc::new(InMemoryAuditTrail::new()),
        )
        .unwrap();
    EventWriter::new(Arc::clone(&store), WriterConfig::default())
        .write_typed(&SaleCreated { customer: "acme".into() }, None)
        .unwrap();

    assert!(lock.try_acquire().unwrap());
    assert_eq!(projector.apply().unwrap(), ApplyOutcome::LockHeld);
    assert_eq!(sales.count().unwrap(), 0);

    lock.release().unwrap();
    assert!(matches!(projector.apply().unwrap(), ApplyOutcome::Completed(_)));
    assert_eq!(sales.count().unwrap(), 1);
    assert!(!lock.is_held());
}

/// Repository whose save calls back into the projector, like a handler side
/// effect that writes another event.
struct ReentrantSales {
    inner: InMemoryAggregateStore<Sale>,
    projector: OnceLock<Weak<TestProjector>>,
    nested: Mutex<Vec<ApplyOutcome>>,
}

impl AggregateRepository<Sale> for ReentrantSales {
    fn find_by_key(&self, key: &AggregateKey) -> Result<Option<Sale>, AggregateStoreError> {
        self.inner.find_by_key(key)
    }

    fn save(&self, aggregate: &mut Sale, write: &ProjectorWrite) -> Result<RecordId, SaveError> {
        if let Some(projector) = self.projector.get().and_then(Weak::upgrade) {
            let outcome = projector.apply().unwrap();
            self.nested.lock().unwrap().push(outcome);
        }
        self.inner.save(aggregate, write)
    }

    fn count(&self) -> Result<usize, AggregateStoreError> {
        self.inner.count()
    }
}

#[test]
fn apply_is_not_reentrant() {
    let store = Arc::new(InMemoryEventStore::new());
    let sales = Arc::new(ReentrantSales {
        inner: InMemoryAggregateStore::new(),
        projector: OnceLock::new(),
        nested: Mutex::new(Vec::new()),
    });
    let projector: Arc<TestProjector> = Arc::new(
        Projector::builder(ProjectorConfig::default())
            .bind::<Sale, _>(Arc::clone(&sales))
            .build(
                Arc::clone(&store),
                Arc::new(InMemoryCheckpointStore::new()),
                Arc::new(InMemoryAuditTrail::new()),
            )
            .unwrap(),
    );
    let _ = sales.projector.set(Arc::downgrade(&projector));

    EventWriter::new(Arc::clone(&store), WriterConfig::default())
        .write_typed(&SaleCreated { customer: "acme".into() }, None)
        .unwrap();

    let outcome = projector.apply().unwrap();
    assert_eq!(outcome.report().unwrap().applied, 1);
    assert_eq!(*sales.nested.lock().unwrap(), vec![ApplyOutcome::AlreadyApplying]);
    assert!(!projector.is_applying());
}

#[test]
fn written_log_forms_a_verifiable_chain() {
    let h = Harness::new(ProjectorConfig::default());
    let sale_key = h.seed_sale("acme", 100);
    h.seed_wallet("ada", 100);

    let mut events = all_events(&h.store);
    assert_eq!(verify_chain(&events), Ok(4));

    events[1].payload = json!({ "sku": "A-1", "quantity": 99, "unit_price": 100 });
    let broken = verify_chain(&events).unwrap_err();
    assert_eq!(broken.event_id(), EventId::new(2));

    assert_eq!(h.store.events_for_key(&sale_key).unwrap().len(), 2);
    assert_eq!(h.store.recent(1).unwrap()[0].id, EventId::new(4));
}

#[test]
fn applied_events_and_info_describe_progress() {
    let h = Harness::new(ProjectorConfig::default());
    let sale_key = h.seed_sale("acme", 100);
    let record_id = h.sale(&sale_key).state().record_id().unwrap();

    assert_eq!(
        h.audit.applied_events("Sale", record_id).unwrap(),
        vec![EventId::new(1), EventId::new(2)]
    );

    let projector = h.engine.projector();
    assert_eq!(projector.handlers_for("tx").unwrap(), vec!["Sale", "Wallet"]);
    assert!(projector.is_registered("Wallet"));

    let info = projector.info().unwrap();
    assert_eq!(info[0].aggregate_type, "Sale");
    assert_eq!(info[0].last_processed, Some(EventId::new(2)));
    assert_eq!(info[0].stored, 1);
    assert_eq!(info[1].aggregate_type, "Wallet");
    assert_eq!(info[1].stored, 0);
}

/// Audit trail whose first "applied" append fails.
#[derive(Default)]
struct FlakyAudit {
    trail: InMemoryAuditTrail,
    tripped: AtomicBool,
}

impl AuditSink for FlakyAudit {
    fn record_applied(&self, event_id: EventId, aggregate_type: &str, record_id: RecordId) -> Result<(), AuditError> {
        if !self.tripped.swap(true, Ordering::SeqCst) {
            return Err(AuditError::Storage("transient".to_string()));
        }
        self.trail.record_applied(event_id, aggregate_type, record_id)
    }

    fn record_failed(
        &self,
        event_id: EventId,
        aggregate_type: &str,
        record_id: Option<RecordId>,
        error: &str,
    ) -> Result<(), AuditError> {
        self.trail.record_failed(event_id, aggregate_type, record_id, error)
    }

    fn max_applied_event_id(&self) -> Result<Option<EventId>, AuditError> {
        self.trail.max_applied_event_id()
    }

    fn applied_events(&self, aggregate_type: &str, record_id: RecordId) -> Result<Vec<EventId>, AuditError> {
        self.trail.applied_events(aggregate_type, record_id)
    }
}

#[test]
fn failed_audit_append_rolls_back_the_save_and_is_retried() {
    let store = Arc::new(InMemoryEventStore::new());
    let audit = Arc::new(FlakyAudit::default());
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());
    let sales = Arc::new(InMemoryAggregateStore::<Sale>::with_audit(audit_sink(&audit)));
    let projector = Projector::builder(ProjectorConfig::default())
        .bind::<Sale, _>(Arc::clone(&sales))
        .build(Arc::clone(&store), Arc::clone(&checkpoints), Arc::clone(&audit))
        .unwrap();
    let sale_key = EventWriter::new(Arc::clone(&store), WriterConfig::default())
        .write_typed(&SaleCreated { customer: "acme".into() }, None)
        .unwrap()
        .uuid;

    let err = projector.apply().unwrap_err();
    assert!(matches!(err, ProjectorError::AggregateStore(AggregateStoreError::Storage(_))));
    assert!(sales.find_by_key(&sale_key).unwrap().is_none());
    assert_eq!(projector.last_id(), EventId::ZERO);
    assert_eq!(checkpoints.get(&projector.config().checkpoint_key()).unwrap(), Some(0));

    let report = projector.apply().unwrap().report().cloned().unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(report.skipped, 0);

    let sale = sales.find_by_key(&sale_key).unwrap().unwrap();
    assert_eq!(sale.state().last_event_id(), EventId::new(1));
    let record_id = sale.state().record_id().unwrap();
    assert_eq!(audit.applied_events("Sale", record_id).unwrap(), vec![EventId::new(1)]);
    assert_eq!(audit.max_applied_event_id().unwrap(), Some(EventId::new(1)));
}
