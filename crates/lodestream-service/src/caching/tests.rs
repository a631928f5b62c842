use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;

use lodestream_paths::{PathResolver, ResourcePath};
use lodestream_test::setup;

use crate::config::Config;
use crate::transport::{CompletionSender, FetchCompletion, FetchRequest, Transport};

use super::*;

/// A transport that parks every fetch until the test delivers it.
#[derive(Default)]
struct MockTransport {
    inflight: Mutex<Vec<(FetchRequest, CompletionSender)>>,
    fetches: AtomicUsize,
}

impl Transport for MockTransport {
    fn fetch(&self, request: FetchRequest, completions: CompletionSender) {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.inflight.lock().unwrap().push((request, completions));
    }
}

impl MockTransport {
    fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Completes all parked fetches with the outcome `f` produces for them.
    fn deliver_all(&self, f: impl Fn(&FetchRequest) -> ResourceResult<Bytes>) {
        for (request, completions) in self.inflight.lock().unwrap().drain(..) {
            let outcome = f(&request);
            completions
                .send(FetchCompletion {
                    path: request.path.clone(),
                    generation: request.generation,
                    outcome,
                })
                .ok();
        }
    }

    /// Completes only the oldest parked fetch, leaving the rest in flight.
    fn deliver_next(&self, f: impl FnOnce(&FetchRequest) -> ResourceResult<Bytes>) {
        let (request, completions) = self.inflight.lock().unwrap().remove(0);
        let outcome = f(&request);
        completions
            .send(FetchCompletion {
                path: request.path.clone(),
                generation: request.generation,
                outcome,
            })
            .ok();
    }
}

fn test_engine(config: Config) -> (CacheEngine, Arc<MockTransport>) {
    let transport = Arc::new(MockTransport::default());
    let mut resolver = PathResolver::new();
    resolver
        .register_path("res", "https://cdn.example/")
        .unwrap();
    let engine = CacheEngine::new(config, resolver, transport.clone());
    (engine, transport)
}

/// Atomic preparer producing the payload length as the "object".
struct LenPreparer;

impl Preparer for LenPreparer {
    fn prepare(&mut self, _path: &ResourcePath, payload: &Bytes) -> ResourceResult<PrepareOutcome> {
        Ok(PrepareOutcome::Done(Arc::new(payload.len())))
    }
}

fn len_factory() -> impl PreparerFactory + 'static {
    || Box::new(LenPreparer) as Box<dyn Preparer>
}

/// Resumable preparer needing a fixed number of invocations to finish.
struct StepPreparer {
    remaining: usize,
    invocations: Arc<AtomicUsize>,
}

impl Preparer for StepPreparer {
    fn prepare(&mut self, _path: &ResourcePath, payload: &Bytes) -> ResourceResult<PrepareOutcome> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.remaining -= 1;
        if self.remaining == 0 {
            Ok(PrepareOutcome::Done(Arc::new(payload.len())))
        } else {
            Ok(PrepareOutcome::Pending)
        }
    }
}

/// Atomic preparer that burns wall-clock time before finishing.
struct SlowPreparer(Duration);

impl Preparer for SlowPreparer {
    fn prepare(&mut self, _path: &ResourcePath, payload: &Bytes) -> ResourceResult<PrepareOutcome> {
        std::thread::sleep(self.0);
        Ok(PrepareOutcome::Done(Arc::new(payload.len())))
    }
}

/// Preparer rejecting every payload.
struct RejectingPreparer;

impl Preparer for RejectingPreparer {
    fn prepare(&mut self, _path: &ResourcePath, _payload: &Bytes) -> ResourceResult<PrepareOutcome> {
        Err(ResourceError::Malformed("does not parse".into()))
    }
}

/// Shared recorder for resolve/reject callbacks.
#[derive(Default, Clone)]
struct Outcomes {
    resolved: Arc<Mutex<Vec<usize>>>,
    rejected: Arc<Mutex<Vec<ResourceError>>>,
}

impl Outcomes {
    fn waiter_for(&self, engine: &mut CacheEngine, path: &str) {
        let resolved = self.resolved.clone();
        let rejected = self.rejected.clone();
        engine.get_object(
            path,
            move |object| {
                let len = *object.downcast::<usize>().ok().unwrap();
                resolved.lock().unwrap().push(len);
            },
            move |error| {
                rejected.lock().unwrap().push(error);
            },
        );
    }

    fn resolved(&self) -> Vec<usize> {
        self.resolved.lock().unwrap().clone()
    }

    fn rejected(&self) -> Vec<ResourceError> {
        self.rejected.lock().unwrap().clone()
    }
}

#[test]
fn test_dedupe_single_fetch_fan_out() {
    setup();
    let (mut engine, transport) = test_engine(Config::default());
    engine.register_extension("mesh", len_factory());

    let outcomes = Outcomes::default();
    outcomes.waiter_for(&mut engine, "res:/ship.mesh");
    outcomes.waiter_for(&mut engine, "res:/Ship.Mesh");

    // both callers attach to the same in-flight record
    assert_eq!(transport.fetch_count(), 1);
    assert!(outcomes.resolved().is_empty());

    transport.deliver_all(|request| {
        assert_eq!(request.url.as_str(), "https://cdn.example/ship.mesh");
        Ok(Bytes::from_static(b"exactly 12 b"))
    });
    engine.tick(0.016);

    assert_eq!(outcomes.resolved(), vec![12, 12]);
    assert!(outcomes.rejected().is_empty());
    assert_eq!(transport.fetch_count(), 1);
    assert_eq!(engine.pending_loads(), 0);
}

#[test]
fn test_waiters_fire_exactly_once() {
    setup();
    let (mut engine, transport) = test_engine(Config::default());
    engine.register_extension("mesh", len_factory());

    let outcomes = Outcomes::default();
    outcomes.waiter_for(&mut engine, "res:/ship.mesh");

    transport.deliver_all(|_| Ok(Bytes::from_static(b"12345")));
    engine.tick(0.016);
    engine.tick(0.016);
    engine.tick(0.016);

    assert_eq!(outcomes.resolved(), vec![5]);

    // a waiter attached after resolution fires immediately, once
    outcomes.waiter_for(&mut engine, "res:/ship.mesh");
    assert_eq!(outcomes.resolved(), vec![5, 5]);
    assert_eq!(transport.fetch_count(), 1);
}

#[test]
fn test_at_most_one_outstanding_fetch() {
    setup();
    let (mut engine, transport) = test_engine(Config::default());
    engine.register_extension("mesh", len_factory());

    let first = engine.get_resource("res:/ship.mesh").unwrap();
    let second = engine.get_resource("res:/ship.mesh").unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    // reloading mid-flight must not double up the fetch either
    engine.reload_resource(&first);
    assert_eq!(transport.fetch_count(), 1);
}

#[test]
fn test_get_resource_polls_to_ready() {
    setup();
    let (mut engine, transport) = test_engine(Config::default());
    engine.register_extension("mesh", len_factory());

    let record = engine.get_resource("res:/ship.mesh").unwrap();
    assert!(!record.is_good());
    assert_eq!(engine.pending_loads(), 1);

    transport.deliver_all(|_| Ok(Bytes::from_static(b"payload")));
    engine.tick(0.016);

    assert!(record.is_good());
    assert_eq!(record.object_as::<usize>().as_deref(), Some(&7));
    assert_eq!(engine.pending_loads(), 0);
}

#[test]
fn test_budget_processes_strict_prefix() {
    setup();
    let config = Config {
        max_prepare_time: Duration::from_millis(1),
        ..Default::default()
    };
    let (mut engine, transport) = test_engine(config);
    engine.register_extension("slow", || {
        Box::new(SlowPreparer(Duration::from_millis(5))) as Box<dyn Preparer>
    });

    let records = [
        engine.get_resource("res:/a.slow").unwrap(),
        engine.get_resource("res:/b.slow").unwrap(),
        engine.get_resource("res:/c.slow").unwrap(),
    ];
    transport.deliver_all(|_| Ok(Bytes::from_static(b"x")));

    // every item overruns the budget on its own, so each tick finishes
    // exactly one and leaves the rest queued
    engine.tick(0.016);
    assert_eq!(engine.stats().prepared, 1);
    engine.tick(0.016);
    assert_eq!(engine.stats().prepared, 2);
    engine.tick(0.016);
    assert_eq!(engine.stats().prepared, 3);

    for record in &records {
        assert!(record.is_good());
    }

    // nothing lost, nothing duplicated
    engine.tick(0.016);
    assert_eq!(engine.stats().prepared, 3);
}

#[test]
fn test_resumable_invoked_exactly_k_times() {
    setup();
    let (mut engine, transport) = test_engine(Config::default());

    let invocations = Arc::new(AtomicUsize::new(0));
    let factory_invocations = invocations.clone();
    engine.register_extension("scene", move || {
        Box::new(StepPreparer {
            remaining: 7,
            invocations: factory_invocations.clone(),
        }) as Box<dyn Preparer>
    });

    let record = engine.get_resource("res:/level.scene").unwrap();
    transport.deliver_all(|_| Ok(Bytes::from_static(b"entities")));

    // a generous budget finishes all resumption steps within one tick
    engine.tick(0.016);
    assert!(record.is_good());
    assert_eq!(invocations.load(Ordering::SeqCst), 7);
}

#[test]
fn test_resumable_spread_across_ticks() {
    setup();
    let config = Config {
        // a zero budget stops draining after every single step
        max_prepare_time: Duration::ZERO,
        ..Default::default()
    };
    let (mut engine, transport) = test_engine(config);

    let invocations = Arc::new(AtomicUsize::new(0));
    let factory_invocations = invocations.clone();
    engine.register_extension("scene", move || {
        Box::new(StepPreparer {
            remaining: 3,
            invocations: factory_invocations.clone(),
        }) as Box<dyn Preparer>
    });
    engine.register_extension("mesh", len_factory());

    let scene = engine.get_resource("res:/level.scene").unwrap();
    let mesh = engine.get_resource("res:/ship.mesh").unwrap();
    transport.deliver_all(|_| Ok(Bytes::from_static(b"x")));

    // the resumable record holds the queue head; the mesh behind it has to
    // wait out all three steps (accepted unfairness)
    engine.tick(0.016);
    assert!(!scene.is_good());
    assert!(!mesh.is_good());
    engine.tick(0.016);
    assert!(!scene.is_good());
    engine.tick(0.016);
    assert!(scene.is_good());
    assert!(!mesh.is_good());
    engine.tick(0.016);
    assert!(mesh.is_good());

    assert_eq!(invocations.load(Ordering::SeqCst), 3);
}

#[test]
fn test_waiter_attached_during_resumable_parse() {
    setup();
    let config = Config {
        max_prepare_time: Duration::ZERO,
        ..Default::default()
    };
    let (mut engine, transport) = test_engine(config);

    let invocations = Arc::new(AtomicUsize::new(0));
    let factory_invocations = invocations.clone();
    engine.register_extension("scene", move || {
        Box::new(StepPreparer {
            remaining: 3,
            invocations: factory_invocations.clone(),
        }) as Box<dyn Preparer>
    });

    let outcomes = Outcomes::default();
    outcomes.waiter_for(&mut engine, "res:/level.scene");
    transport.deliver_all(|_| Ok(Bytes::from_static(b"entities")));
    engine.tick(0.016);
    assert!(outcomes.resolved().is_empty());

    // a second caller arrives while the parse is mid-flight; it attaches
    // to the queued record instead of triggering anything new
    outcomes.waiter_for(&mut engine, "res:/level.scene");
    engine.tick(0.016);
    engine.tick(0.016);

    assert_eq!(outcomes.resolved(), vec![8, 8]);
    assert_eq!(transport.fetch_count(), 1);
    assert_eq!(invocations.load(Ordering::SeqCst), 3);
}

#[test]
fn test_orphaned_completion_after_clear() {
    setup();
    let (mut engine, transport) = test_engine(Config::default());
    engine.register_extension("mesh", len_factory());

    engine.get_resource("res:/ship.mesh").unwrap();
    engine.clear();
    let record = engine.get_resource("res:/ship.mesh").unwrap();
    assert_eq!(transport.fetch_count(), 2);

    // the orphaned first fetch answers before the live one; it must not
    // satisfy the fresh record
    transport.deliver_next(|_| Ok(Bytes::from_static(b"old")));
    engine.tick(0.016);
    assert!(!record.is_good());

    transport.deliver_next(|_| Ok(Bytes::from_static(b"fresh!")));
    engine.tick(0.016);
    assert!(record.is_good());
    assert_eq!(record.object_as::<usize>().as_deref(), Some(&6));
}

#[test]
fn test_preparer_error_isolation() {
    setup();
    let (mut engine, transport) = test_engine(Config::default());
    engine.register_extension("bad", || Box::new(RejectingPreparer) as Box<dyn Preparer>);
    engine.register_extension("mesh", len_factory());

    let outcomes = Outcomes::default();
    outcomes.waiter_for(&mut engine, "res:/a.bad");
    outcomes.waiter_for(&mut engine, "res:/b.mesh");
    outcomes.waiter_for(&mut engine, "res:/c.mesh");

    transport.deliver_all(|_| Ok(Bytes::from_static(b"1234")));
    engine.tick(0.016);

    assert_eq!(outcomes.resolved(), vec![4, 4]);
    assert_eq!(
        outcomes.rejected(),
        vec![ResourceError::Malformed("does not parse".into())]
    );
}

#[test]
fn test_transport_failure_rejects_waiters() {
    setup();
    let (mut engine, transport) = test_engine(Config::default());
    engine.register_extension("mesh", len_factory());

    let outcomes = Outcomes::default();
    outcomes.waiter_for(&mut engine, "res:/gone.mesh");
    let record = engine.get_resource("res:/gone.mesh").unwrap();

    transport.deliver_all(|_| Err(ResourceError::NotFound));
    engine.tick(0.016);

    assert_eq!(outcomes.rejected(), vec![ResourceError::NotFound]);
    assert!(!record.is_good());
    assert_eq!(record.errors(), vec![ResourceError::NotFound]);
    assert_eq!(engine.pending_loads(), 0);

    // a late waiter on the failed record is rejected immediately
    outcomes.waiter_for(&mut engine, "res:/gone.mesh");
    assert_eq!(
        outcomes.rejected(),
        vec![ResourceError::NotFound, ResourceError::NotFound]
    );
    assert_eq!(transport.fetch_count(), 1);
}

#[test]
fn test_purge_and_reload_round_trip() {
    setup();
    let config = Config {
        purge_time: Duration::from_secs(2),
        ..Default::default()
    };
    let (mut engine, transport) = test_engine(config);
    engine.register_extension("mesh", len_factory());

    let record = engine.get_resource("res:/ship.mesh").unwrap();
    transport.deliver_all(|_| Ok(Bytes::from_static(b"payload")));
    engine.tick(1.0);
    assert!(record.is_good());
    assert_eq!(engine.cached_resources(), 1);

    // four more untouched seconds trip the 5s purge cadence; the record is
    // then 4 frames stale against a 2 frame distance
    for _ in 0..4 {
        engine.tick(1.0);
    }

    assert!(record.is_purged());
    assert_eq!(engine.cached_resources(), 0);

    // requesting the path again goes through exactly one new fetch
    let reloaded = engine.get_resource("res:/ship.mesh").unwrap();
    assert_eq!(transport.fetch_count(), 2);
    transport.deliver_all(|_| Ok(Bytes::from_static(b"payload")));
    engine.tick(0.016);
    assert!(reloaded.is_good());
}

#[test]
fn test_pinned_records_survive_purge() {
    setup();
    let config = Config {
        purge_time: Duration::from_secs(2),
        ..Default::default()
    };
    let (mut engine, transport) = test_engine(config);
    engine.register_extension("mesh", len_factory());

    let record = engine.get_resource("res:/video.mesh").unwrap();
    transport.deliver_all(|_| Ok(Bytes::from_static(b"frames")));
    engine.tick(1.0);
    record.pin();

    for _ in 0..9 {
        engine.tick(1.0);
    }
    assert!(record.is_good());
    assert_eq!(engine.cached_resources(), 1);

    // unpinning exposes it to the next pass again
    record.unpin();
    for _ in 0..5 {
        engine.tick(1.0);
    }
    assert!(record.is_purged());
    assert_eq!(engine.cached_resources(), 0);
}

#[test]
fn test_out_of_band_unload_reloads_in_place() {
    setup();
    let config = Config {
        auto_purge: false,
        ..Default::default()
    };
    let (mut engine, transport) = test_engine(config);
    engine.register_extension("mesh", len_factory());

    let record = engine.get_resource("res:/ship.mesh").unwrap();
    transport.deliver_all(|_| Ok(Bytes::from_static(b"payload")));
    engine.tick(0.016);
    assert!(record.is_good());

    assert!(record.unload());
    assert!(record.is_purged());
    assert!(record.object().is_none());

    // the purged record keeps its identity through the reload
    let reloaded = engine.get_resource("res:/ship.mesh").unwrap();
    assert!(Arc::ptr_eq(&record, &reloaded));
    assert_eq!(transport.fetch_count(), 2);

    transport.deliver_all(|_| Ok(Bytes::from_static(b"payload")));
    engine.tick(0.016);
    assert!(record.is_good());
}

#[test]
fn test_auto_purge_disabled_keeps_records() {
    setup();
    let config = Config {
        auto_purge: false,
        purge_time: Duration::from_secs(1),
        ..Default::default()
    };
    let (mut engine, transport) = test_engine(config);
    engine.register_extension("mesh", len_factory());

    let record = engine.get_resource("res:/ship.mesh").unwrap();
    transport.deliver_all(|_| Ok(Bytes::from_static(b"payload")));
    for _ in 0..20 {
        engine.tick(1.0);
    }

    assert!(record.is_good());
    assert_eq!(engine.cached_resources(), 1);
}

#[test]
fn test_literal_payload_path() {
    setup();
    let (mut engine, transport) = test_engine(Config::default());
    engine.register_extension("mesh", len_factory());

    let outcomes = Outcomes::default();
    outcomes.waiter_for(&mut engine, "str:/mesh/Hello World");
    engine.tick(0.016);

    // the payload comes out of the path itself; nothing hits the transport
    assert_eq!(outcomes.resolved(), vec![11]);
    assert_eq!(transport.fetch_count(), 0);
    assert_eq!(engine.stats().fetches, 0);
    assert_eq!(engine.stats().literals, 1);
    assert_eq!(engine.pending_loads(), 0);
}

#[test]
fn test_unknown_extension_is_an_error() {
    setup();
    let (mut engine, _transport) = test_engine(Config::default());
    engine.register_extension("mesh", len_factory());

    assert_eq!(
        engine.get_resource("res:/ship.noext").unwrap_err(),
        ResourceError::ExtensionUnregistered("noext".into())
    );
    assert_eq!(
        engine.get_resource("res:/ship").unwrap_err(),
        ResourceError::ExtensionUndefined("res:/ship".into())
    );

    let outcomes = Outcomes::default();
    outcomes.waiter_for(&mut engine, "res:/ship.noext");
    assert_eq!(
        outcomes.rejected(),
        vec![ResourceError::ExtensionUnregistered("noext".into())]
    );
}

#[test]
fn test_unregistered_prefix_attaches_to_record() {
    setup();
    let (mut engine, transport) = test_engine(Config::default());
    engine.register_extension("mesh", len_factory());

    let record = engine.get_resource("tex:/ship.mesh").unwrap();
    assert!(!record.is_good());
    assert_eq!(
        record.last_error(),
        Some(ResourceError::PrefixUnregistered("tex".into()))
    );
    assert_eq!(transport.fetch_count(), 0);

    let outcomes = Outcomes::default();
    outcomes.waiter_for(&mut engine, "tex:/ship.mesh");
    assert_eq!(
        outcomes.rejected(),
        vec![ResourceError::PrefixUnregistered("tex".into())]
    );
}

#[test]
fn test_clear_forgets_without_unloading() {
    setup();
    let (mut engine, transport) = test_engine(Config::default());
    engine.register_extension("mesh", len_factory());

    let record = engine.get_resource("res:/ship.mesh").unwrap();
    transport.deliver_all(|_| Ok(Bytes::from_static(b"payload")));
    engine.tick(0.016);

    engine.clear();
    assert_eq!(engine.cached_resources(), 0);
    // the live handle is untouched
    assert!(record.is_good());

    // the path now starts over with a fresh identity
    let fresh = engine.get_resource("res:/ship.mesh").unwrap();
    assert!(!Arc::ptr_eq(&record, &fresh));
    assert_eq!(transport.fetch_count(), 2);
}

#[test]
fn test_unload_and_clear_releases_records() {
    setup();
    let (mut engine, transport) = test_engine(Config::default());
    engine.register_extension("mesh", len_factory());

    let record = engine.get_resource("res:/ship.mesh").unwrap();
    transport.deliver_all(|_| Ok(Bytes::from_static(b"payload")));
    engine.tick(0.016);

    engine.unload_and_clear();
    assert_eq!(engine.cached_resources(), 0);
    assert!(record.is_purged());
    assert!(record.object().is_none());
}

#[test]
fn test_error_history_is_capped_and_deduped() {
    setup();
    let config = Config {
        max_errors_per_record: 2,
        auto_purge: false,
        ..Default::default()
    };
    let (mut engine, transport) = test_engine(config);
    engine.register_extension("mesh", len_factory());

    let record = engine.get_resource("res:/flaky.mesh").unwrap();
    transport.deliver_all(|_| Err(ResourceError::NotFound));
    engine.tick(0.016);

    // consecutive identical errors collapse
    engine.reload_resource(&record);
    transport.deliver_all(|_| Err(ResourceError::NotFound));
    engine.tick(0.016);
    assert_eq!(record.errors(), vec![ResourceError::NotFound]);

    engine.reload_resource(&record);
    transport.deliver_all(|_| Err(ResourceError::Status(500)));
    engine.tick(0.016);

    engine.reload_resource(&record);
    transport.deliver_all(|_| Err(ResourceError::Status(502)));
    engine.tick(0.016);

    // the cap keeps the history bounded
    assert_eq!(
        record.errors(),
        vec![ResourceError::NotFound, ResourceError::Status(500)]
    );
}
