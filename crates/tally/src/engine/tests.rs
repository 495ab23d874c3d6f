use crate::{
    BatchProgress, ConnectionFactory, CountConnection, CountEngine, CountRequestItem, CountResult,
    EngineConfig, EngineState, EntityTarget, Error, ItemResponse, RunObserver, RunStatus,
    RunSummary, TransportError, executor::MISMATCHED_RESPONSE,
};
use core::time::Duration;
use std::collections::{HashMap, HashSet};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Stats {
    calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

/// Scripted remote behaviour shared by every clone of a [`MockConnection`].
#[derive(Default)]
struct Behavior {
    counts: HashMap<String, u64>,
    faults: HashMap<String, String>,
    /// Entity keys the remote answers with instead of the submitted name.
    rename: HashMap<String, String>,
    /// Fails the whole call for any batch containing this entity.
    fail_on: Option<String>,
    delay: Option<Duration>,
    /// Announces each call before blocking on `gate`.
    started: Option<mpsc::UnboundedSender<usize>>,
    gate: Option<Arc<Semaphore>>,
}

#[derive(Clone, Default)]
struct MockConnection {
    stats: Arc<Stats>,
    behavior: Arc<Behavior>,
}

impl MockConnection {
    fn new(behavior: Behavior) -> Self {
        Self {
            stats: Arc::default(),
            behavior: Arc::new(behavior),
        }
    }

    fn respond(&self, item: &CountRequestItem) -> ItemResponse {
        let name = &item.logical_name;
        if let Some(message) = self.behavior.faults.get(name) {
            return ItemResponse::fault(message.clone());
        }
        let key = self.behavior.rename.get(name).unwrap_or(name);
        let count = self.behavior.counts.get(name).copied().unwrap_or(42);
        ItemResponse::count(key.clone(), count)
    }
}

impl CountConnection for MockConnection {
    async fn execute_multiple(
        &self,
        items: &[CountRequestItem],
    ) -> Result<Vec<ItemResponse>, TransportError> {
        self.stats.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak.fetch_max(now, Ordering::SeqCst);

        if let Some(started) = &self.behavior.started {
            let _ = started.send(items.len());
        }
        if let Some(gate) = &self.behavior.gate {
            let _permit = gate.acquire().await;
        }
        if let Some(delay) = self.behavior.delay {
            tokio::time::sleep(delay).await;
        }

        self.stats.active.fetch_sub(1, Ordering::SeqCst);

        if let Some(poison) = &self.behavior.fail_on {
            if items.iter().any(|item| &item.logical_name == poison) {
                return Err(TransportError::Request("connection reset".to_string()));
            }
        }
        Ok(items.iter().map(|item| self.respond(item)).collect())
    }
}

struct MockFactory {
    connection: MockConnection,
    clones: bool,
    cloned: AtomicUsize,
}

impl MockFactory {
    fn new(connection: MockConnection) -> Self {
        Self {
            connection,
            clones: true,
            cloned: AtomicUsize::new(0),
        }
    }

    fn never_clones(connection: MockConnection) -> Self {
        Self {
            clones: false,
            ..Self::new(connection)
        }
    }
}

impl ConnectionFactory for MockFactory {
    type Connection = MockConnection;

    fn try_clone(&self) -> Option<Self::Connection> {
        if !self.clones {
            return None;
        }
        self.cloned.fetch_add(1, Ordering::SeqCst);
        Some(self.connection.clone())
    }

    fn shared(&self) -> &Self::Connection {
        &self.connection
    }
}

#[derive(Default)]
struct Recorder {
    started: Option<(usize, usize)>,
    progress: Vec<BatchProgress>,
    finished: Option<RunSummary>,
}

impl RunObserver for Recorder {
    fn run_started(&mut self, entities: usize, batches: usize) {
        self.started = Some((entities, batches));
    }

    fn batch_completed(&mut self, progress: &BatchProgress) {
        self.progress.push(progress.clone());
    }

    fn run_finished(&mut self, summary: &RunSummary) {
        self.finished = Some(summary.clone());
    }
}

fn entities(n: usize) -> Vec<EntityTarget> {
    (0..n)
        .map(|i| EntityTarget::selected(format!("entity_{i:03}")))
        .collect()
}

fn named(names: &[&str]) -> Vec<EntityTarget> {
    names.iter().copied().map(EntityTarget::selected).collect()
}

fn config(batch_size: usize, max_parallel: usize) -> EngineConfig {
    EngineConfig::default()
        .with_batch_size(batch_size)
        .with_max_parallel(max_parallel)
}

fn by_name(results: &[CountResult]) -> HashMap<&str, &CountResult> {
    results
        .iter()
        .map(|result| (result.logical_name.as_str(), result))
        .collect()
}

fn run_publishes_exactly_one_result_per_entity(factory: MockFactory) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async {
        let targets = entities(250);
        let engine = CountEngine::new(factory, config(100, 10)).unwrap();
        let mut sink: Vec<CountResult> = Vec::new();
        let mut recorder = Recorder::default();

        let summary = engine
            .run(&targets, &mut sink, &mut recorder, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.batches_total, 3);
        assert_eq!(summary.batches_completed, 3);
        assert_eq!(summary.published, 250);
        assert_eq!(summary.succeeded(), 250);
        assert_eq!(sink.len(), 250);

        let published: HashSet<_> = sink.iter().map(|r| r.logical_name.clone()).collect();
        let expected: HashSet<_> = targets.iter().map(|t| t.logical_name.clone()).collect();
        assert_eq!(published, expected);

        let mut sizes: Vec<_> = recorder.progress.iter().map(|p| p.items).collect();
        sizes.sort_unstable();
        assert_eq!(sizes, [50, 100, 100]);
        assert_eq!(recorder.started, Some((250, 3)));
        assert_eq!(recorder.finished, Some(summary));
        assert_eq!(engine.state(), EngineState::Finished(RunStatus::Completed));
    });
}

#[test]
fn run_with_cloned_connections() {
    run_publishes_exactly_one_result_per_entity(MockFactory::new(MockConnection::default()));
}

#[test]
fn run_with_shared_fallback_connection() {
    run_publishes_exactly_one_result_per_entity(MockFactory::never_clones(
        MockConnection::default(),
    ));
}

#[tokio::test]
async fn workers_lease_their_own_connection() {
    let factory = Arc::new(MockFactory::new(MockConnection::default()));
    let engine = CountEngine::with_shared_factory(Arc::clone(&factory), config(10, 3)).unwrap();

    engine
        .run(&entities(100), &mut Vec::<CountResult>::new(), &mut (), CancellationToken::new())
        .await
        .unwrap();

    // One lease per worker, not per batch.
    assert_eq!(factory.cloned.load(Ordering::SeqCst), 3);
    assert_eq!(factory.connection.stats.calls.load(Ordering::SeqCst), 10);
}

#[tokio::test]
async fn per_item_fault_completes_with_errors() {
    let connection = MockConnection::new(Behavior {
        counts: HashMap::from([("contact".to_string(), 1523)]),
        faults: HashMap::from([("lead".to_string(), "insufficient privileges".to_string())]),
        ..Behavior::default()
    });
    let engine = CountEngine::new(MockFactory::new(connection), EngineConfig::default()).unwrap();
    let mut sink: Vec<CountResult> = Vec::new();

    let summary = engine
        .run(
            &named(&["contact", "lead"]),
            &mut sink,
            &mut (),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(summary.status, RunStatus::CompletedWithErrors);
    assert_eq!(summary.faulted, 1);
    assert_eq!(
        sink,
        [
            CountResult::success("contact", 1523),
            CountResult::fault("lead", "insufficient privileges"),
        ]
    );
}

#[tokio::test]
async fn faults_stay_attributed_to_their_position() {
    let connection = MockConnection::new(Behavior {
        counts: HashMap::from([("a".to_string(), 1), ("c".to_string(), 3)]),
        faults: HashMap::from([("b".to_string(), "b failed".to_string())]),
        ..Behavior::default()
    });
    let engine = CountEngine::new(MockFactory::new(connection), config(3, 1)).unwrap();
    let mut sink: Vec<CountResult> = Vec::new();

    engine
        .run(&named(&["a", "b", "c"]), &mut sink, &mut (), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        sink,
        [
            CountResult::success("a", 1),
            CountResult::fault("b", "b failed"),
            CountResult::success("c", 3),
        ]
    );
}

#[tokio::test]
async fn transport_failure_marks_whole_batch() {
    let connection = MockConnection::new(Behavior {
        fail_on: Some("e".to_string()),
        ..Behavior::default()
    });
    let engine = CountEngine::new(MockFactory::new(connection), config(3, 2)).unwrap();
    let mut sink: Vec<CountResult> = Vec::new();
    let mut recorder = Recorder::default();

    let summary = engine
        .run(
            &named(&["a", "b", "c", "d", "e", "f"]),
            &mut sink,
            &mut recorder,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(summary.status, RunStatus::CompletedWithErrors);
    assert_eq!(summary.published, 6);
    assert_eq!(summary.faulted, 3);

    let results = by_name(&sink);
    for name in ["a", "b", "c"] {
        assert_eq!(results[name].count(), Some(42));
    }
    for name in ["d", "e", "f"] {
        assert_eq!(results[name].error(), Some("Request failed: connection reset"));
    }

    let failed: Vec<_> = recorder
        .progress
        .iter()
        .filter(|p| p.transport_failed)
        .map(|p| (p.index, p.faulted))
        .collect();
    assert_eq!(failed, [(1, 3)]);
}

#[tokio::test(start_paused = true)]
async fn batch_timeout_is_a_transport_failure() {
    let connection = MockConnection::new(Behavior {
        delay: Some(Duration::from_secs(5)),
        ..Behavior::default()
    });
    let config = config(2, 1).with_batch_timeout(Some(Duration::from_secs(1)));
    let engine = CountEngine::new(MockFactory::new(connection), config).unwrap();
    let mut sink: Vec<CountResult> = Vec::new();

    let summary = engine
        .run(&named(&["a", "b"]), &mut sink, &mut (), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.status, RunStatus::CompletedWithErrors);
    assert!(
        sink.iter()
            .all(|r| r.error() == Some("Batch timed out after 1s"))
    );
}

#[tokio::test(start_paused = true)]
async fn parallelism_is_bounded() {
    let connection = MockConnection::new(Behavior {
        delay: Some(Duration::from_millis(20)),
        ..Behavior::default()
    });
    let stats = Arc::clone(&connection.stats);
    let engine = CountEngine::new(MockFactory::new(connection), config(1, 4)).unwrap();

    let summary = engine
        .run(&entities(30), &mut Vec::<CountResult>::new(), &mut (), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.batches_completed, 30);
    assert_eq!(stats.calls.load(Ordering::SeqCst), 30);
    assert_eq!(stats.peak.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn fewer_batches_than_workers() {
    let connection = MockConnection::default();
    let factory = Arc::new(MockFactory::new(connection));
    let engine = CountEngine::with_shared_factory(Arc::clone(&factory), config(100, 10)).unwrap();

    let summary = engine
        .run(&entities(5), &mut Vec::<CountResult>::new(), &mut (), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.batches_total, 1);
    assert_eq!(factory.cloned.load(Ordering::SeqCst), 1);
}

/// Forwards the final status to the test body.
struct StatusForward(mpsc::UnboundedSender<RunStatus>);

impl RunObserver for StatusForward {
    fn run_finished(&mut self, summary: &RunSummary) {
        let _ = self.0.send(summary.status);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_drains_started_batches_only() {
    let (started_tx, mut started_rx) = mpsc::unbounded_channel();
    let gate = Arc::new(Semaphore::new(0));
    let connection = MockConnection::new(Behavior {
        started: Some(started_tx),
        gate: Some(Arc::clone(&gate)),
        ..Behavior::default()
    });
    let engine = Arc::new(CountEngine::new(MockFactory::new(connection), config(1, 2)).unwrap());
    let (result_tx, mut result_rx) = mpsc::unbounded_channel();
    let (status_tx, mut status_rx) = mpsc::unbounded_channel();

    let handle = engine.spawn(
        named(&["a", "b", "c", "d", "e"]),
        result_tx,
        StatusForward(status_tx),
        CancellationToken::new(),
    );

    // Both workers are now blocked inside their first batch.
    started_rx.recv().await.unwrap();
    started_rx.recv().await.unwrap();
    assert_eq!(engine.state(), EngineState::Running);

    handle.cancel();
    gate.add_permits(5);

    let summary = handle.join().await.unwrap();
    assert_eq!(summary.status, RunStatus::Cancelled);
    assert_eq!(summary.batches_completed, 2);
    assert_eq!(summary.batches_skipped, 3);
    assert_eq!(summary.published, 2);

    let mut published = Vec::new();
    while let Some(result) = result_rx.recv().await {
        published.push(result.logical_name);
    }
    published.sort();
    assert_eq!(published, ["a", "b"]);
    assert_eq!(status_rx.recv().await, Some(RunStatus::Cancelled));
    assert!(started_rx.try_recv().is_err());
    assert_eq!(engine.state(), EngineState::Finished(RunStatus::Cancelled));
}

#[tokio::test]
async fn cancellation_before_start_publishes_nothing() {
    let engine = CountEngine::new(MockFactory::new(MockConnection::default()), config(2, 2)).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let mut sink: Vec<CountResult> = Vec::new();

    let summary = engine
        .run(&entities(6), &mut sink, &mut (), cancel)
        .await
        .unwrap();

    assert_eq!(summary.status, RunStatus::Cancelled);
    assert_eq!(summary.batches_skipped, 3);
    assert!(sink.is_empty());
}

#[tokio::test]
async fn case_mismatched_response_key_faults_the_submitted_entity() {
    let connection = MockConnection::new(Behavior {
        rename: HashMap::from([("lead".to_string(), "Lead".to_string())]),
        ..Behavior::default()
    });
    let engine = CountEngine::new(MockFactory::new(connection), EngineConfig::default()).unwrap();
    let mut sink: Vec<CountResult> = Vec::new();

    let summary = engine
        .run(
            &named(&["contact", "lead"]),
            &mut sink,
            &mut (),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(summary.status, RunStatus::CompletedWithErrors);
    assert_eq!(summary.published, 2);
    assert_eq!(summary.dropped, 1);
    let results = by_name(&sink);
    assert_eq!(results["contact"].count(), Some(42));
    assert_eq!(results["lead"].error(), Some(MISMATCHED_RESPONSE));
}

#[tokio::test]
async fn response_keyed_by_another_requested_entity_is_not_reattributed() {
    let connection = MockConnection::new(Behavior {
        counts: HashMap::from([("a".to_string(), 1), ("c".to_string(), 99)]),
        rename: HashMap::from([("a".to_string(), "c".to_string())]),
        ..Behavior::default()
    });
    let engine = CountEngine::new(MockFactory::new(connection), config(1, 1)).unwrap();
    let mut sink: Vec<CountResult> = Vec::new();

    let summary = engine
        .run(&named(&["a", "c"]), &mut sink, &mut (), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.status, RunStatus::CompletedWithErrors);
    assert_eq!(summary.published, 2);
    assert_eq!(summary.faulted, 1);
    assert_eq!(summary.dropped, 1);
    let results = by_name(&sink);
    assert_eq!(results["c"].count(), Some(99));
    assert_eq!(results["a"].error(), Some(MISMATCHED_RESPONSE));
}

#[tokio::test]
async fn only_selected_entities_are_counted() {
    let engine =
        CountEngine::new(MockFactory::new(MockConnection::default()), EngineConfig::default())
            .unwrap();
    let targets = vec![
        EntityTarget::new("account", "Account").with_selected(true),
        EntityTarget::new("contact", "Contact"),
        EntityTarget::selected("lead"),
    ];
    let mut sink: Vec<CountResult> = Vec::new();

    engine
        .run(&targets, &mut sink, &mut (), CancellationToken::new())
        .await
        .unwrap();

    let names: Vec<_> = sink.iter().map(|r| r.logical_name.as_str()).collect();
    assert_eq!(names, ["account", "lead"]);
}

#[tokio::test]
async fn rejects_invalid_selections() {
    let engine =
        CountEngine::new(MockFactory::new(MockConnection::default()), EngineConfig::default())
            .unwrap();
    let run = |targets: Vec<EntityTarget>| {
        let engine = &engine;
        async move {
            engine
                .run(&targets, &mut Vec::<CountResult>::new(), &mut (), CancellationToken::new())
                .await
        }
    };

    assert!(matches!(run(Vec::new()).await, Err(Error::NoSelection)));
    assert!(matches!(
        run(vec![EntityTarget::new("account", "Account")]).await,
        Err(Error::NoSelection)
    ));
    assert!(matches!(
        run(named(&["account", "contact", "account"])).await,
        Err(Error::DuplicateEntity { name }) if name == "account"
    ));
    assert!(matches!(
        run(named(&["account", " "])).await,
        Err(Error::InvalidArgument { .. })
    ));

    assert_eq!(engine.state(), EngineState::Idle);
    assert_eq!(engine.factory().connection.stats.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn rejects_invalid_config() {
    let factory = || MockFactory::new(MockConnection::default());
    assert!(matches!(
        CountEngine::new(factory(), config(0, 1)),
        Err(Error::InvalidArgument { .. })
    ));
    assert!(matches!(
        CountEngine::new(factory(), config(1, 0)),
        Err(Error::InvalidArgument { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_concurrent_run_is_rejected() {
    let (started_tx, mut started_rx) = mpsc::unbounded_channel();
    let gate = Arc::new(Semaphore::new(0));
    let connection = MockConnection::new(Behavior {
        started: Some(started_tx),
        gate: Some(Arc::clone(&gate)),
        ..Behavior::default()
    });
    let engine = Arc::new(CountEngine::new(MockFactory::new(connection), config(10, 1)).unwrap());

    let handle = engine.spawn(named(&["a"]), Vec::<CountResult>::new(), (), CancellationToken::new());
    started_rx.recv().await.unwrap();

    let second = engine
        .run(&named(&["b"]), &mut Vec::<CountResult>::new(), &mut (), CancellationToken::new())
        .await;
    assert!(matches!(second, Err(Error::AlreadyRunning)));

    gate.add_permits(1);
    let summary = handle.join().await.unwrap();
    assert_eq!(summary.status, RunStatus::Completed);

    // Finished engines accept new runs.
    gate.add_permits(1);
    let summary = engine
        .run(&named(&["b"]), &mut Vec::<CountResult>::new(), &mut (), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.published, 1);
}

#[tokio::test]
async fn dropped_run_leaves_engine_idle() {
    let gate = Arc::new(Semaphore::new(0));
    let connection = MockConnection::new(Behavior {
        gate: Some(Arc::clone(&gate)),
        ..Behavior::default()
    });
    let engine = CountEngine::new(MockFactory::new(connection), config(1, 1)).unwrap();
    let targets = named(&["a", "b"]);
    let mut sink: Vec<CountResult> = Vec::new();

    let mut observer = ();

    let run = engine.run(&targets, &mut sink, &mut observer, CancellationToken::new());
    let timed_out = tokio::time::timeout(Duration::from_millis(20), run).await;

    assert!(timed_out.is_err());
    assert_eq!(engine.state(), EngineState::Idle);
}

#[tokio::test]
async fn closure_sink_receives_every_result() {
    let engine = CountEngine::new(MockFactory::new(MockConnection::default()), config(7, 3)).unwrap();
    let mut total = 0u64;
    let mut sink = |result: &CountResult| total += result.count().unwrap_or_default();

    engine
        .run(&entities(20), &mut sink, &mut (), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(total, 20 * 42);
}
