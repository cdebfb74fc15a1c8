//! Names, capability bridge and shared state across nodes

use std::time::Duration;

use mooring_core::loader::BridgeError;
use mooring_core::naming;
use mooring_core::testing::TestNetwork;
use mooring_core::{ClaimOutcome, NodeEvent, Permission, SourceFile};

fn page() -> Vec<SourceFile> {
    vec![
        SourceFile::new(
            "index.html",
            r#"<html><head><link rel="stylesheet" href="style.css"></head><body><script src="app.js"></script></body></html>"#,
        ),
        SourceFile::new("style.css", "body { margin: 0 }"),
        SourceFile::new("app.js", "window.ready = true;"),
    ]
}

#[tokio::test]
async fn test_claims_are_local_to_each_node() {
    let network = TestNetwork::with_nodes(2).await.unwrap();
    let (a, b) = (network.node(0), network.node(1));

    let first = a.claim_name("chat").await.unwrap();
    let second = b.claim_name("CHAT").await.unwrap();
    assert!(matches!(first, ClaimOutcome::Claimed(_)));
    assert!(matches!(second, ClaimOutcome::Claimed(_)));

    let on_a = a.resolve("mooring://chat").await.unwrap();
    let on_b = b.resolve("mooring://chat").await.unwrap();
    // same address, different local owners
    assert_eq!(on_a.app_id, naming::encode("chat").unwrap());
    assert_eq!(on_a.app_id, on_b.app_id);
    assert_eq!(on_a.claim.unwrap().owner_address, a.address());
    assert_eq!(on_b.claim.unwrap().owner_address, b.address());

    network.shutdown().await;
}

#[tokio::test]
async fn test_loaded_html_is_self_contained() {
    let network = TestNetwork::with_nodes(2).await.unwrap();
    let deployer = network.node(0);
    let outcome = deployer
        .deploy(page(), deployer.build_options("chat"))
        .await
        .unwrap();
    assert!(network.wait_for_app(1, &outcome.manifest.app_id).await);

    let app = network.node(1).load("mooring://chat/").await.unwrap();
    assert_eq!(app.path, "index.html");
    assert_eq!(app.mime_type, "text/html");
    let html = String::from_utf8(app.document).unwrap();
    assert!(html.contains("<style>body { margin: 0 }</style>"));
    assert!(html.contains("window.ready = true;"));
    assert!(!html.contains("src=\"app.js\""));

    network.shutdown().await;
}

#[tokio::test]
async fn test_bridge_enforces_manifest_permissions() {
    let network = TestNetwork::with_nodes(1).await.unwrap();
    let node = network.node(0);
    node.deploy(page(), node.build_options("chat")).await.unwrap();

    let app = node.load("mooring://chat").await.unwrap();
    let bridge = &app.bridge;
    assert!(bridge.permissions().is_empty());

    assert!(matches!(
        bridge.set_state("k", b"v").await,
        Err(BridgeError::PermissionDenied { permission: Permission::Storage, .. })
    ));
    assert!(matches!(
        bridge.broadcast("k", b"v").await,
        Err(BridgeError::PermissionDenied { permission: Permission::Broadcast, .. })
    ));
    assert!(bridge.subscribe().is_err());
    assert!(node.cache().list_state(bridge.app_id()).await.unwrap().is_empty());

    network.shutdown().await;
}

#[tokio::test]
async fn test_storage_only_app_keeps_state_local() {
    let network = TestNetwork::with_nodes(2).await.unwrap();
    let node = network.node(0);
    let outcome = node
        .deploy(
            page(),
            node.build_options("chat").with_permission(Permission::Storage),
        )
        .await
        .unwrap();
    assert!(network.wait_for_app(1, &outcome.manifest.app_id).await);

    let app = node.load("mooring://chat").await.unwrap();
    assert!(app.bridge.set_state("draft", b"hi").await.unwrap());
    assert_eq!(app.bridge.get_state("draft").await.unwrap(), Some(b"hi".to_vec()));

    let remote = network.node(1).cache().get_state(&outcome.manifest.app_id, "draft").await;
    assert!(remote.unwrap().is_none());

    network.shutdown().await;
}

#[tokio::test]
async fn test_broadcast_state_reaches_peers() {
    let network = TestNetwork::with_nodes(3).await.unwrap();
    let deployer = network.node(0);
    let outcome = deployer
        .deploy(
            page(),
            deployer
                .build_options("chat")
                .with_permission(Permission::Storage)
                .with_permission(Permission::Broadcast),
        )
        .await
        .unwrap();
    let app_id = outcome.manifest.app_id.clone();
    for i in 1..3 {
        assert!(network.wait_for_app(i, &app_id).await);
    }

    let listener = network.node(2).load("mooring://chat").await.unwrap();
    let mut updates = listener.bridge.subscribe().unwrap();

    let app = deployer.load("mooring://chat").await.unwrap();
    let report = app.bridge.broadcast("score", b"7").await.unwrap();
    assert_eq!(report.delivered.len(), 2);

    assert!(network.wait_for_state(1, &app_id, "score", b"7").await);
    let update = tokio::time::timeout(Duration::from_secs(2), updates.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(update.key, "score");
    assert_eq!(update.data, b"7");
    assert_eq!(update.origin, deployer.address());

    // a later write from another node wins everywhere
    network.advance(5);
    let other = network.node(1).load("mooring://chat").await.unwrap();
    other.bridge.broadcast("score", b"9").await.unwrap();
    assert!(network.wait_for_state(0, &app_id, "score", b"9").await);
    assert!(network.wait_for_state(2, &app_id, "score", b"9").await);

    // an older write loses
    let stale = network.node(0).cache().now() - 1_000;
    let applied = network
        .node(0)
        .cache()
        .set_state(&app_id, "score", b"1", stale)
        .await
        .unwrap();
    assert!(!applied);
    assert_eq!(app.bridge.get_state("score").await.unwrap(), Some(b"9".to_vec()));

    network.shutdown().await;
}

#[tokio::test]
async fn test_state_update_for_app_without_broadcast_is_dropped() {
    let network = TestNetwork::with_nodes(2).await.unwrap();
    let deployer = network.node(0);
    let outcome = deployer
        .deploy(page(), deployer.build_options("chat"))
        .await
        .unwrap();
    let app_id = outcome.manifest.app_id.clone();
    assert!(network.wait_for_app(1, &app_id).await);

    let mut events = network.node(1).subscribe();
    // bypass the bridge check on the sender
    deployer
        .distribution()
        .publish_state(&app_id, "k", b"v")
        .await
        .unwrap();

    assert!(!network.wait_for_state(1, &app_id, "k", b"v").await);
    assert!(!matches!(events.try_recv(), Ok(NodeEvent::StateUpdated(_))));

    network.shutdown().await;
}

#[tokio::test]
async fn test_deployed_name_is_loadable_by_that_name() {
    let network = TestNetwork::with_nodes(1).await.unwrap();
    let node = network.node(0);

    // "demo" holds an 'O', which the alphabet excludes
    let err = node
        .deploy(page(), node.build_options("demo"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation");
    assert_eq!(node.stats().await.unwrap().apps, 0);

    let outcome = node.deploy(page(), node.build_options("news")).await.unwrap();
    let app = node.load("mooring://news").await.unwrap();
    assert_eq!(app.manifest.app_id, outcome.manifest.app_id);

    network.shutdown().await;
}
