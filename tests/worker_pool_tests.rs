
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use lamb_fleet::coordinator::ParameterSet;
use lamb_fleet::worker::{WorkerContext, WorkerPool};
use test_harness::{
    assert_eventually, write_script, write_summary_engine, FakeCoordinator, FIND_OUTPUT_ARG,
};

fn context(fake: &Arc<FakeCoordinator>, engine: &Path, output_dir: &Path) -> WorkerContext {
    WorkerContext {
        api: fake.clone(),
        node_id: "node-0".to_string(),
        node_name: "rig".to_string(),
        engine_path: engine.to_path_buf(),
        output_dir: output_dir.to_path_buf(),
        batch_pause: Duration::from_millis(20),
        crash_backoff: Duration::from_millis(20),
    }
}

fn finished_workers(fake: &FakeCoordinator) -> HashSet<u32> {
    fake.reports()
        .iter()
        .filter(|r| r.status == "finished")
        .filter_map(|r| r.worker)
        .collect()
}

#[tokio::test]
async fn test_pool_runs_one_loop_per_slot() {
    let dir = tempfile::tempdir().unwrap();
    let engine = write_summary_engine(dir.path(), 10, 1234);
    let out = dir.path().join("out");
    std::fs::create_dir(&out).unwrap();
    let fake = Arc::new(FakeCoordinator::default());
    let shutdown = CancellationToken::new();

    let pool = WorkerPool::start(
        3,
        context(&fake, &engine, &out),
        ParameterSet::default(),
        shutdown.clone(),
    );
    assert_eq!(pool.size(), 3);

    assert_eventually(
        || async { finished_workers(&fake) == HashSet::from([0, 1, 2]) },
        Duration::from_secs(10),
        "every slot should finish a batch",
    )
    .await;

    shutdown.cancel();
    pool.join().await;
    assert!(!fake.uploads().is_empty());
}

#[tokio::test]
async fn test_crashing_batches_never_shrink_the_pool() {
    let dir = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeCoordinator::default());
    let shutdown = CancellationToken::new();

    let mut pool = WorkerPool::start(
        2,
        context(&fake, &dir.path().join("missing-engine"), dir.path()),
        ParameterSet::default(),
        shutdown.clone(),
    );

    assert_eventually(
        || async {
            let crashed: HashSet<u32> = fake
                .reports()
                .iter()
                .filter(|r| r.status.starts_with("crashed: "))
                .filter_map(|r| r.worker)
                .collect();
            crashed == HashSet::from([0, 1])
        },
        Duration::from_secs(10),
        "both slots should report crashes",
    )
    .await;

    // Loops survive crashes, so supervision has nothing to replace.
    assert_eq!(pool.supervise().await, 0);
    assert_eq!(pool.size(), 2);

    let crashes_before = fake.reports().len();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(fake.reports().len() > crashes_before, "loops keep retrying");

    shutdown.cancel();
    pool.join().await;
}

#[tokio::test]
async fn test_parameter_change_applies_to_next_batch() {
    let dir = tempfile::tempdir().unwrap();
    let games_log = dir.path().join("games.log");
    let engine = write_script(
        dir.path(),
        "engine.sh",
        &format!(
            "echo \"$3\" >> '{}'\n{FIND_OUTPUT_ARG}\nprintf x > \"$out\"\necho \"games=$3 positions=1\"",
            games_log.display()
        ),
    );
    let fake = Arc::new(FakeCoordinator::default());
    let shutdown = CancellationToken::new();

    let pool = WorkerPool::start(
        1,
        context(&fake, &engine, dir.path()),
        ParameterSet::default(),
        shutdown.clone(),
    );

    let read_games = || std::fs::read_to_string(&games_log).unwrap_or_default();
    assert_eventually(
        || async { read_games().lines().any(|l| l == "10") },
        Duration::from_secs(10),
        "first batch should use the initial parameters",
    )
    .await;

    fake.set_parameters(ParameterSet {
        games: 77,
        ..ParameterSet::default()
    });

    assert_eventually(
        || async { read_games().lines().any(|l| l == "77") },
        Duration::from_secs(10),
        "a later batch should pick up the new parameters",
    )
    .await;

    shutdown.cancel();
    pool.join().await;
}

#[tokio::test]
async fn test_fetch_failure_falls_back_to_last_good_parameters() {
    let dir = tempfile::tempdir().unwrap();
    let games_log = dir.path().join("games.log");
    let engine = write_script(
        dir.path(),
        "engine.sh",
        &format!("echo \"$3\" >> '{}'", games_log.display()),
    );
    let fake = Arc::new(FakeCoordinator::default());
    fake.fail_params.store(true, Ordering::SeqCst);
    let shutdown = CancellationToken::new();
    let initial = ParameterSet {
        games: 33,
        ..ParameterSet::default()
    };

    let pool = WorkerPool::start(1, context(&fake, &engine, dir.path()), initial, shutdown.clone());

    assert_eventually(
        || async {
            let log = std::fs::read_to_string(&games_log).unwrap_or_default();
            log.lines().count() >= 2 && log.lines().all(|l| l == "33")
        },
        Duration::from_secs(10),
        "batches should keep running with the last good parameters",
    )
    .await;

    shutdown.cancel();
    pool.join().await;
}

#[tokio::test]
async fn test_shutdown_lets_running_batch_finish() {
    let dir = tempfile::tempdir().unwrap();
    let done = dir.path().join("done");
    let engine = write_script(
        dir.path(),
        "engine.sh",
        &format!("sleep 0.3\ntouch '{}'", done.display()),
    );
    let fake = Arc::new(FakeCoordinator::default());
    let shutdown = CancellationToken::new();

    let pool = WorkerPool::start(
        1,
        context(&fake, &engine, dir.path()),
        ParameterSet::default(),
        shutdown.clone(),
    );

    assert_eventually(
        || async { fake.reports().iter().any(|r| r.status == "starting") },
        Duration::from_secs(10),
        "batch should start",
    )
    .await;
    shutdown.cancel();
    pool.join().await;

    assert!(done.exists(), "engine run completed before the loop exited");
}
