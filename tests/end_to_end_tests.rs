//! Coordinator and node agent talking over real HTTP.


use std::time::Duration;

use axum::body::Bytes;
use tokio_util::sync::CancellationToken;

use lamb_fleet::config::NodeConfig;
use lamb_fleet::digest::sha256_hex;
use lamb_fleet::node::{CoordinatorApi, CoordinatorClient, NodeAgent, STATUS_WAITING};
use test_harness::{assert_eventually, write_summary_engine, TestServer};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_four_loops_report_to_coordinator() {
    let server_dir = tempfile::tempdir().unwrap();
    let node_dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(&server_dir.path().join("games")).await;

    // Register the engine with the coordinator; the node downloads it.
    let script = write_summary_engine(server_dir.path(), 10, 1234);
    let engine_bytes = std::fs::read(&script).unwrap();
    server
        .state
        .engine
        .write()
        .await
        .replace(Bytes::from(engine_bytes.clone()))
        .unwrap();

    let mut config = NodeConfig::new("rig-e2e", server.url())
        .with_concurrency(4)
        .with_engine_path(node_dir.path().join("lamb"))
        .with_output_dir(node_dir.path().join("data"))
        .with_state_dir(node_dir.path().join("state"));
    // Polls keep ticking at a realistic cadence; each loop runs one batch.
    config.poll_interval = Duration::from_millis(200);
    config.batch_pause = Duration::from_secs(3600);

    let shutdown = CancellationToken::new();
    let agent = NodeAgent::new(config.clone()).unwrap();
    let handle = tokio::spawn(agent.run(shutdown.clone()));

    let state = server.state.clone();
    assert_eventually(
        || async {
            let Ok((runs, _)) = state.latest_runs().await else {
                return false;
            };
            runs.len() == 4 && runs.iter().all(|r| r.run.status == "finished")
        },
        Duration::from_secs(20),
        "four loops should each report a finished batch",
    )
    .await;

    // Let the agent send node-level reports after the batches finished.
    assert_eventually(
        || async {
            let nodes = state.nodes.read().await;
            nodes
                .all()
                .iter()
                .any(|n| n.status == STATUS_WAITING)
        },
        Duration::from_secs(10),
        "idle polls should report waiting",
    )
    .await;

    let (runs, totals) = server.state.latest_runs().await.unwrap();
    assert_eq!(runs.len(), 4);
    assert_eq!(totals.reporters, 4);
    assert!(runs.iter().all(|r| r.run.games == 10 && r.run.positions == 1234));
    assert!(runs.iter().all(|r| r.name.as_deref() == Some("rig-e2e")));
    let mut workers: Vec<u32> = runs.iter().filter_map(|r| r.run.worker).collect();
    workers.sort();
    assert_eq!(workers, vec![0, 1, 2, 3]);
    assert_eq!(totals.games, 40);
    assert_eq!(totals.positions, 4 * 1234);

    // Installed engine matches what the coordinator served.
    assert_eq!(
        std::fs::read(node_dir.path().join("lamb")).unwrap(),
        engine_bytes
    );

    // Every reported artifact reaches the coordinator.
    let games_dir = server_dir.path().join("games");
    assert_eventually(
        || async {
            runs.iter().all(|r| {
                r.run
                    .output_file
                    .as_ref()
                    .is_some_and(|f| games_dir.join(f).is_file())
            })
        },
        Duration::from_secs(10),
        "artifacts should be uploaded",
    )
    .await;

    shutdown.cancel();
    handle.await.unwrap().unwrap();
    server.stop().await;
}

#[tokio::test]
async fn test_http_client_round_trip() {
    let server_dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(&server_dir.path().join("games")).await;
    let client = CoordinatorClient::new(&server.url(), Default::default()).unwrap();

    let node_id = client.register("rig").await.unwrap();
    assert!(server.state.nodes.read().await.get(&node_id).is_some());

    let snapshot = client.fetch_parameters().await.unwrap();
    assert!(snapshot.changed);
    assert_eq!(snapshot.version, 1);
    assert!(!client.fetch_parameters().await.unwrap().changed);

    assert_eq!(client.engine_hash().await.unwrap(), None);
    assert!(client.download_engine().await.is_err());

    server
        .state
        .engine
        .write()
        .await
        .replace(Bytes::from_static(b"engine"))
        .unwrap();
    assert_eq!(
        client.engine_hash().await.unwrap(),
        Some(sha256_hex(b"engine"))
    );
    assert_eq!(client.download_engine().await.unwrap(), b"engine");

    let artifact = server_dir.path().join("upload-src.bin");
    std::fs::write(&artifact, b"payload").unwrap();
    let resp = client.upload_artifact(&artifact).await.unwrap();
    assert_eq!(resp.status, "saved");
    assert_eq!(resp.filename, "upload-src.bin");

    let report = lamb_fleet::protocol::ProgressReport::new(node_id.clone(), "finished")
        .with_counts(2, 3)
        .with_worker(0);
    client.report_progress(&report).await.unwrap();
    let (runs, _) = server.state.latest_runs().await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].address.as_deref(), Some("127.0.0.1"));

    server.stop().await;
}
