//! Multi-node deployment and fetch scenarios

use mooring_core::bundle::CHUNK_SIZE;
use mooring_core::testing::TestNetwork;
use mooring_core::{
    CacheStrategy, IntegrityError, LoadState, MooringError, NodeEvent, SourceFile,
};

const MANIFEST_REQUEST: u8 = 0x02;
const CHUNK_REQUEST: u8 = 0x04;

fn site() -> Vec<SourceFile> {
    vec![
        SourceFile::new("index.html", vec![b'x'; 500]),
        SourceFile::new("data.bin", pattern(600 * 1024)),
    ]
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn test_deploy_then_load_on_peer() {
    let network = TestNetwork::with_nodes(2).await.unwrap();
    let deployer = network.node(0);

    let outcome = deployer
        .deploy(site(), deployer.build_options("chat"))
        .await
        .unwrap();
    let manifest = &outcome.manifest;

    let index = manifest.file("index.html").unwrap();
    assert!(index.is_inline());
    let data = manifest.file("data.bin").unwrap();
    assert_eq!(data.chunk_list().len(), 3);
    assert_eq!(data.chunk_list()[2].size, (600 * 1024 - 2 * CHUNK_SIZE) as u64);

    assert!(network.wait_for_app(1, &manifest.app_id).await);
    // only the manifest travels with the announcement
    assert_eq!(network.node(1).stats().await.unwrap().chunks, 0);

    let app = network.node(1).load("mooring://chat/data.bin").await.unwrap();
    assert_eq!(app.manifest.app_id, manifest.app_id);
    assert_eq!(app.mime_type, "application/octet-stream");
    assert_eq!(app.document, pattern(600 * 1024));
    assert_eq!(network.node(1).stats().await.unwrap().chunks, 3);

    network.shutdown().await;
}

#[tokio::test]
async fn test_deployment_event_reaches_subscribers() {
    let network = TestNetwork::with_nodes(2).await.unwrap();
    let mut events = network.node(1).subscribe();

    let deployer = network.node(0);
    let outcome = deployer
        .deploy(site(), deployer.build_options("chat").with_version(4))
        .await
        .unwrap();

    let event = tokio::time::timeout(std::time::Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    match event {
        NodeEvent::AppDeployed(e) => {
            assert_eq!(e.app_id, outcome.manifest.app_id);
            assert_eq!(e.version, 4);
            assert_eq!(e.deployed_by, deployer.address());
        }
        other => panic!("unexpected event: {:?}", other),
    }

    network.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_loads_share_one_manifest_request() {
    let network = TestNetwork::with_nodes(2).await.unwrap();
    let deployer = network.node(0);

    // keep the announcement from reaching node 1
    network.set_unreachable(1, true);
    deployer
        .deploy(site(), deployer.build_options("chat"))
        .await
        .unwrap();
    network.set_unreachable(1, false);
    network.network().reset_counters();

    let loader = network.node(1);
    let (a, b) = tokio::join!(
        loader.load("mooring://chat/data.bin"),
        loader.load("mooring://chat/data.bin")
    );
    assert_eq!(a.unwrap().document, b.unwrap().document);

    assert_eq!(network.network().delivered_with_tag(MANIFEST_REQUEST), 1);
    assert_eq!(network.network().delivered_with_tag(CHUNK_REQUEST), 3);

    network.shutdown().await;
}

#[tokio::test]
async fn test_corrupt_chunk_from_peer_is_rejected() {
    let network = TestNetwork::with_nodes(2).await.unwrap();
    let deployer = network.node(0);

    let outcome = deployer
        .deploy(site(), deployer.build_options("chat"))
        .await
        .unwrap();
    assert!(network.wait_for_app(1, &outcome.manifest.app_id).await);

    // damage every chunk the deployer would serve
    {
        let db = deployer.cache().db().lock().await;
        db.execute("UPDATE cached_chunks SET data = zeroblob(length(data))", [])
            .unwrap();
    }

    let (tx, rx) = tokio::sync::watch::channel(LoadState::CheckingCache);
    let err = network
        .node(1)
        .load_with_progress("mooring://chat/data.bin", &tx)
        .await
        .unwrap_err();
    assert!(
        matches!(err, MooringError::Integrity(IntegrityError::ChunkHash { .. })),
        "got {:?}",
        err
    );
    assert!(matches!(*rx.borrow(), LoadState::Error(_)));
    // nothing unverified was admitted
    assert_eq!(network.node(1).stats().await.unwrap().chunks, 0);

    network.shutdown().await;
}

#[tokio::test]
async fn test_local_corruption_is_repaired_from_peer() {
    let network = TestNetwork::with_nodes(2).await.unwrap();
    let deployer = network.node(0);

    let outcome = deployer
        .deploy(site(), deployer.build_options("chat"))
        .await
        .unwrap();
    assert!(network.wait_for_app(1, &outcome.manifest.app_id).await);

    let loader = network.node(1);
    loader.load("mooring://chat/data.bin").await.unwrap();
    {
        let db = loader.cache().db().lock().await;
        db.execute("UPDATE cached_chunks SET data = zeroblob(length(data))", [])
            .unwrap();
    }

    let app = loader.load("mooring://chat/data.bin").await.unwrap();
    assert_eq!(app.document, pattern(600 * 1024));
    assert!(loader.cache().is_fully_cached(&app.manifest).await.unwrap());

    network.shutdown().await;
}

#[tokio::test]
async fn test_corrupt_local_chunk_without_peers_is_integrity_error() {
    let network = TestNetwork::with_nodes(1).await.unwrap();
    let node = network.node(0);
    node.deploy(site(), node.build_options("chat")).await.unwrap();
    {
        let db = node.cache().db().lock().await;
        db.execute("UPDATE cached_chunks SET data = zeroblob(length(data))", [])
            .unwrap();
    }

    let err = node.load("mooring://chat/data.bin").await.unwrap_err();
    assert_eq!(err.kind(), "integrity");
    assert!(matches!(
        err,
        MooringError::Integrity(IntegrityError::ChunkHash { .. })
    ));

    network.shutdown().await;
}

#[tokio::test]
async fn test_chunk_repair_keeps_cache_expiry() {
    let network = TestNetwork::with_nodes(2).await.unwrap();
    let deployer = network.node(0);
    let outcome = deployer
        .deploy(site(), deployer.build_options("chat").with_cache_duration_ms(10_000))
        .await
        .unwrap();
    let app_id = outcome.manifest.app_id.clone();
    assert!(network.wait_for_app(1, &app_id).await);

    let holder = network.node(1);
    holder.load("mooring://chat/data.bin").await.unwrap();
    let before = holder.cache().peek_app(&app_id).await.unwrap().unwrap();

    // lose one chunk, then repair it later from the deployer
    let lost = outcome.manifest.chunk_infos().next().unwrap().hash;
    assert!(holder.cache().discard_chunk(&lost).await.unwrap());
    network.advance(5_000);

    let app = holder.load("mooring://chat/data.bin").await.unwrap();
    assert_eq!(app.document, pattern(600 * 1024));
    assert!(holder.cache().is_fully_cached(&app.manifest).await.unwrap());

    let after = holder.cache().peek_app(&app_id).await.unwrap().unwrap();
    assert_eq!(after.installed_at, before.installed_at);
    assert_eq!(after.cache_expiry, before.cache_expiry);

    network.shutdown().await;
}

#[tokio::test]
async fn test_load_without_peers_is_not_found() {
    let network = TestNetwork::with_nodes(1).await.unwrap();

    let (tx, rx) = tokio::sync::watch::channel(LoadState::CheckingCache);
    let err = network
        .node(0)
        .load_with_progress("mooring://chat", &tx)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "not_found");
    assert!(matches!(*rx.borrow(), LoadState::Error(_)));

    network.shutdown().await;
}

#[tokio::test]
async fn test_unreachable_peer_does_not_block_announcement() {
    let network = TestNetwork::with_nodes(3).await.unwrap();
    network.set_unreachable(2, true);

    let deployer = network.node(0);
    let outcome = deployer
        .deploy(site(), deployer.build_options("chat"))
        .await
        .unwrap();

    assert_eq!(outcome.report.delivered, vec![network.peer_id(1)]);
    assert_eq!(outcome.report.failed.len(), 1);
    assert_eq!(outcome.report.attempted(), 2);
    assert!(network.wait_for_app(1, &outcome.manifest.app_id).await);

    network.shutdown().await;
}

#[tokio::test]
async fn test_network_first_picks_up_newer_version() {
    let network = TestNetwork::with_nodes(2).await.unwrap();
    let deployer = network.node(0);
    let options = || {
        deployer
            .build_options("news")
            .with_cache_strategy(CacheStrategy::NetworkFirst)
    };

    deployer
        .deploy(vec![SourceFile::new("index.html", "<p>one</p>")], options())
        .await
        .unwrap();
    let loader = network.node(1);
    let first = loader.load("mooring://news").await.unwrap();
    assert_eq!(first.manifest.version, 1);

    // node 1 misses the announcement and has to ask
    network.set_unreachable(1, true);
    network.advance(10);
    deployer
        .deploy(
            vec![SourceFile::new("index.html", "<p>two</p>")],
            options().with_version(2),
        )
        .await
        .unwrap();
    network.set_unreachable(1, false);

    let second = loader.load("mooring://news").await.unwrap();
    assert_eq!(second.manifest.version, 2);
    assert_eq!(second.document, b"<p>two</p>");

    network.shutdown().await;
}

#[tokio::test]
async fn test_expired_app_is_not_served_until_refetched() {
    let network = TestNetwork::with_nodes(2).await.unwrap();
    let deployer = network.node(0);

    let outcome = deployer
        .deploy(site(), deployer.build_options("tmp").with_cache_duration_ms(1_000))
        .await
        .unwrap();
    let app_id = outcome.manifest.app_id.clone();
    assert!(network.wait_for_app(1, &app_id).await);

    let holder = network.node(1);
    holder.load("mooring://tmp/data.bin").await.unwrap();

    network.advance(1_001);
    assert!(holder.cache().get_cached_app(&app_id).await.unwrap().is_none());
    assert!(holder.cache().peek_app(&app_id).await.unwrap().is_some());
    // chunks stay until cleanup runs
    assert_eq!(holder.stats().await.unwrap().chunks, 3);

    let report = holder.cleanup_expired().await.unwrap();
    assert_eq!(report.removed_apps, vec![app_id.clone()]);
    assert_eq!(report.removed_chunks, 3);
    assert_eq!(holder.stats().await.unwrap().chunks, 0);

    network.shutdown().await;
}
