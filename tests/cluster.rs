use std::sync::Arc;
use std::time::{Duration, Instant};

use chandy_bank::common::SnapshotError;
use chandy_bank::network::{FileRegistry, MemoryRegistry, Registry};
use chandy_bank::observer::{SnapshotSummary, TransferLine};
use chandy_bank::{
    BranchConfig, GlobalSnapshot, Observer, ObserverConfig, ObserverEvent, RetryConfig,
    RunningBranch, TransferConfig,
};
use tokio::sync::broadcast::{self, error::RecvError};

const WAIT: Duration = Duration::from_secs(10);

fn retry_fast() -> RetryConfig {
    RetryConfig {
        initial_backoff_ms: 5,
        max_backoff_ms: 100,
        timeout_ms: 10_000,
    }
}

fn busy_transfers() -> TransferConfig {
    TransferConfig {
        tick_ms: 2,
        probability: 0.8,
        min_amount: 1,
        max_amount: 50,
        max_sends: None,
    }
}

fn idle_transfers() -> TransferConfig {
    TransferConfig {
        max_sends: Some(0),
        ..TransferConfig::default()
    }
}

fn branch_config(
    observer_addr: &str,
    n_branches: usize,
    balance: i64,
    transfer: TransferConfig,
) -> BranchConfig {
    BranchConfig {
        initial_balance: balance,
        listen_addr: "127.0.0.1:0".to_string(),
        observer_addr: observer_addr.to_string(),
        n_branches,
        transfer,
        retry: retry_fast(),
        ..BranchConfig::default()
    }
}

async fn start_observer(n_branches: usize) -> (Arc<Observer>, String) {
    let observer = Observer::new(ObserverConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        n_branches,
        money_unit: "Rupees".to_string(),
    });
    let listener = observer.bind().await.expect("bind observer");
    let addr = listener.local_addr().expect("observer addr").to_string();
    tokio::spawn(observer.clone().run(listener));
    (observer, addr)
}

async fn next_snapshot(rx: &mut broadcast::Receiver<GlobalSnapshot>) -> GlobalSnapshot {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("snapshot timed out")
        .expect("snapshot feed closed")
}

async fn next_summary(rx: &mut broadcast::Receiver<ObserverEvent>) -> SnapshotSummary {
    let deadline = Instant::now() + WAIT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, rx.recv()).await.expect("summary timed out") {
            Ok(ObserverEvent::Snapshot(summary)) => return summary,
            Ok(ObserverEvent::Transfer(_)) | Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => panic!("observer feed closed"),
        }
    }
}

async fn next_transfer(rx: &mut broadcast::Receiver<ObserverEvent>) -> TransferLine {
    let deadline = Instant::now() + WAIT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, rx.recv()).await.expect("transfer timed out") {
            Ok(ObserverEvent::Transfer(line)) => return line,
            Ok(ObserverEvent::Snapshot(_)) | Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => panic!("observer feed closed"),
        }
    }
}

async fn wait_for_registrations(registry: &dyn Registry, count: usize) {
    let deadline = Instant::now() + WAIT;
    while registry.records().expect("records").len() < count {
        assert!(Instant::now() < deadline, "branch never registered");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_snapshots_conserve_money_under_traffic() {
    chandy_bank::common::telemetry::init_tracing();
    let (observer, observer_addr) = start_observer(3).await;
    let mut events = observer.subscribe();
    let registry = MemoryRegistry::new();
    let config = branch_config(&observer_addr, 3, 10_000, busy_transfers());

    let (a, b, c) = tokio::join!(
        RunningBranch::launch(&config, &registry),
        RunningBranch::launch(&config, &registry),
        RunningBranch::launch(&config, &registry),
    );
    let branches = [a.expect("branch a"), b.expect("branch b"), c.expect("branch c")];
    let mut handles: Vec<_> = branches.iter().map(RunningBranch::handle).collect();
    handles.sort_by_key(|handle| handle.id());

    // Let money start moving.
    tokio::time::sleep(Duration::from_millis(200)).await;

    for initiator in [0, 2, 0] {
        let handle = &handles[initiator];
        let mut feed = handle.subscribe();
        handle.initiate_snapshot().await.expect("initiate");

        let snapshot = next_snapshot(&mut feed).await;
        assert_eq!(snapshot.initiator, initiator);
        assert_eq!(snapshot.reports.len(), 3);
        assert_eq!(snapshot.total(), 30_000);
        assert!(snapshot.reports.iter().all(|report| report.balance >= 0));

        let summary = next_summary(&mut events).await;
        assert_eq!(summary.total(), 30_000);
    }

    for handle in &handles {
        assert!(handle.balance().await >= 0);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_simultaneous_initiators_both_conserve() {
    let (_observer, observer_addr) = start_observer(3).await;
    let registry = MemoryRegistry::new();
    let config = branch_config(&observer_addr, 3, 10_000, busy_transfers());

    let (a, b, c) = tokio::join!(
        RunningBranch::launch(&config, &registry),
        RunningBranch::launch(&config, &registry),
        RunningBranch::launch(&config, &registry),
    );
    let branches = [a.expect("branch a"), b.expect("branch b"), c.expect("branch c")];
    let mut handles: Vec<_> = branches.iter().map(RunningBranch::handle).collect();
    handles.sort_by_key(|handle| handle.id());
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut both_started = 0;
    for _ in 0..5 {
        let (mut feed0, mut feed2) = (handles[0].subscribe(), handles[2].subscribe());

        // Act: start epochs on 0 and 2 at the same moment
        let (r0, r2) = tokio::join!(
            handles[0].initiate_snapshot(),
            handles[2].initiate_snapshot()
        );

        // Assert: every epoch that started completes with the full total. A
        // branch already recording for the other initiator refuses to start.
        if r0.is_ok() && r2.is_ok() {
            both_started += 1;
        }
        for (result, feed, initiator) in [(r0, &mut feed0, 0), (r2, &mut feed2, 2)] {
            match result {
                Ok(()) => {
                    let snapshot = next_snapshot(feed).await;
                    assert_eq!(snapshot.initiator, initiator);
                    assert_eq!(snapshot.reports.len(), 3);
                    assert_eq!(snapshot.total(), 30_000);
                }
                Err(err) => assert!(matches!(err, SnapshotError::AlreadyActive)),
            }
        }
    }
    assert!(both_started > 0, "no round ran both epochs at once");
}

#[tokio::test]
async fn test_transfer_is_credited_and_correlated() {
    let (observer, observer_addr) = start_observer(2).await;
    let mut events = observer.subscribe();
    let registry = Arc::new(MemoryRegistry::new());

    // Launch in order so the first branch gets id 0.
    let first = {
        let registry = registry.clone();
        let config = branch_config(&observer_addr, 2, 1_000, idle_transfers());
        tokio::spawn(async move { RunningBranch::launch(&config, registry.as_ref()).await })
    };
    wait_for_registrations(registry.as_ref(), 1).await;
    let config = branch_config(&observer_addr, 2, 500, idle_transfers());
    let second = RunningBranch::launch(&config, registry.as_ref()).await.expect("branch 1");
    let first = first.await.expect("join").expect("branch 0");

    let (sender, receiver) = (first.handle(), second.handle());
    assert_eq!((sender.id(), receiver.id()), (0, 1));

    sender.transfer(100, 1).await.expect("transfer");

    let line = next_transfer(&mut events).await;
    assert_eq!((line.sender_id, line.receiver_id, line.amount), (0, 1, 100));
    assert_eq!(sender.balance().await, 900);
    assert_eq!(receiver.balance().await, 600);
}

#[tokio::test]
async fn test_file_registry_cluster_takes_snapshot() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("bank").join("bank.json");
    let registry = FileRegistry::new(&path).expect("registry");
    let (_observer, observer_addr) = start_observer(2).await;
    let mut config = branch_config(&observer_addr, 2, 2_500, busy_transfers());
    config.registry_path = path.display().to_string();

    let (a, b) = tokio::join!(
        RunningBranch::launch(&config, &registry),
        RunningBranch::launch(&config, &registry),
    );
    let (a, b) = (a.expect("branch a"), b.expect("branch b"));
    assert_eq!(registry.records().expect("records").len(), 2);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let handle = b.handle();
    let mut feed = handle.subscribe();
    handle.initiate_snapshot().await.expect("initiate");

    let snapshot = next_snapshot(&mut feed).await;
    assert_eq!(snapshot.total(), 5_000);
    drop(a);
}
