use std::net::SocketAddr;

use lamb_fleet::config::CoordinatorConfig;
use lamb_fleet::coordinator::CoordinatorState;
use lamb_fleet::digest::sha256_hex;
use lamb_fleet::protocol::ProgressReport;

fn config(dir: &std::path::Path) -> CoordinatorConfig {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    CoordinatorConfig::new(addr, dir)
}

#[tokio::test]
async fn test_registry_and_history_survive_restart() {
    let dir = tempfile::tempdir().unwrap();

    let node_id = {
        let state = CoordinatorState::open(&config(dir.path())).unwrap();
        let node = state
            .register("rig-a".to_string(), Some("10.0.0.5".to_string()))
            .await
            .unwrap();
        let id = node.id.to_string();
        let report = ProgressReport::new(id.clone(), "finished")
            .with_counts(10, 1234)
            .with_output_file(Some("data_a.bin".to_string()))
            .with_worker(0);
        assert!(state.report_progress(report, None).await.unwrap().is_some());
        id
    };

    let state = CoordinatorState::open(&config(dir.path())).unwrap();
    {
        let nodes = state.nodes.read().await;
        let node = nodes.get(&node_id).expect("node restored");
        assert_eq!(node.name, "rig-a");
        assert_eq!(node.address.as_deref(), Some("10.0.0.5"));
        assert_eq!(node.status, "finished");
    }

    // A restored node keeps reporting without re-registering.
    let report = ProgressReport::new(node_id.clone(), "starting").with_worker(1);
    assert!(state.report_progress(report, None).await.unwrap().is_some());

    let (runs, totals) = state.latest_runs().await.unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].run.status, "starting");
    assert_eq!(runs[1].run.games, 10);
    assert_eq!(totals.games, 10);
    assert_eq!(totals.reporters, 2);
    assert_eq!(state.history.run_count().unwrap(), 2);
}

#[tokio::test]
async fn test_latest_runs_take_newest_row_per_reporter() {
    let dir = tempfile::tempdir().unwrap();
    let state = CoordinatorState::ephemeral(dir.path()).unwrap();
    let node = state.register("rig".to_string(), None).await.unwrap();
    let id = node.id.to_string();

    for (status, games) in [("starting", 0), ("finished", 10), ("starting", 0)] {
        let report = ProgressReport::new(id.clone(), status)
            .with_counts(games, games * 2)
            .with_worker(0);
        state.report_progress(report, None).await.unwrap();
    }
    state
        .report_progress(ProgressReport::new(id.clone(), "waiting for parameter change"), None)
        .await
        .unwrap();

    // The node-level report stays in history and on the node record, but
    // the latest-runs view only lists the worker slot.
    let (runs, totals) = state.latest_runs().await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run.worker, Some(0));
    assert_eq!(runs[0].run.status, "starting");
    assert_eq!(totals.games, 0);
    assert_eq!(totals.reporters, 1);
    assert_eq!(state.history.runs_for_node(&id, 10).unwrap().len(), 4);
    assert_eq!(
        state.nodes.read().await.get(&id).unwrap().status,
        "waiting for parameter change"
    );
}

#[tokio::test]
async fn test_latest_runs_capped_at_page_size() {
    let dir = tempfile::tempdir().unwrap();
    let state = CoordinatorState::ephemeral(dir.path()).unwrap();
    let node = state.register("rig".to_string(), None).await.unwrap();

    for worker in 0..25 {
        let report = ProgressReport::new(node.id.to_string(), "finished")
            .with_counts(1, 1)
            .with_worker(worker);
        state.report_progress(report, None).await.unwrap();
    }

    let (runs, totals) = state.latest_runs().await.unwrap();
    assert_eq!(runs.len(), 20);
    assert_eq!(totals.games, 20);
    assert_eq!(runs[0].run.worker, Some(24));
}

#[tokio::test]
async fn test_engine_binary_registered_at_startup_persists() {
    let dir = tempfile::tempdir().unwrap();
    let binary = dir.path().join("lamb");
    std::fs::write(&binary, b"engine-v1").unwrap();

    {
        let state =
            CoordinatorState::open(&config(&dir.path().join("data")).with_engine_binary(&binary))
                .unwrap();
        let info = state.engine.read().await.info();
        assert_eq!(info.hash, Some(sha256_hex(b"engine-v1")));
    }

    let state = CoordinatorState::open(&config(&dir.path().join("data"))).unwrap();
    let info = state.engine.read().await.info();
    assert_eq!(info.hash, Some(sha256_hex(b"engine-v1")));
    assert_eq!(info.size, Some(9));
}

#[tokio::test]
async fn test_uploaded_engine_persists_and_serves_previous_until_swapped() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("data");

    {
        let state = CoordinatorState::open(&config(&data)).unwrap();
        state
            .replace_engine(axum::body::Bytes::from_static(b"engine-v1"))
            .await
            .unwrap();

        // Readers are not held off while the next upload is hashed and written.
        let upload = {
            let state = state.clone();
            tokio::spawn(async move {
                state
                    .replace_engine(axum::body::Bytes::from(vec![7u8; 4 * 1024 * 1024]))
                    .await
            })
        };
        let served = state.engine.read().await.info();
        assert!(served.size == Some(9) || served.size == Some(4 * 1024 * 1024));

        let info = upload.await.unwrap().unwrap();
        assert_eq!(info.size, Some(4 * 1024 * 1024));
        assert_eq!(info.hash, Some(sha256_hex(&vec![7u8; 4 * 1024 * 1024])));
    }

    let state = CoordinatorState::open(&config(&data)).unwrap();
    let info = state.engine.read().await.info();
    assert_eq!(info.hash, Some(sha256_hex(&vec![7u8; 4 * 1024 * 1024])));
    assert!(!data.join("engine").join("engine.bin.tmp").exists());
}
