//! Central-side lifecycle scenarios against the mock airspace

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use aerolink_core::{
    AdvertisedIdentity, CentralConfig, CentralTask, CharacteristicId, PeerAddress, ServiceId,
    SessionConfig, SessionState, SessionStatus,
};
use aerolink_harness::{MockAirspace, MockCharacteristic, MockNodeSpec};

const SERVICE_A: ServiceId = ServiceId::from_u128(0xA0);
const CHARACTERISTIC_A: CharacteristicId = CharacteristicId::from_u128(0xA1);
const SERVICE_B: ServiceId = ServiceId::from_u128(0xB0);
const CHARACTERISTIC_B: CharacteristicId = CharacteristicId::from_u128(0xB1);

fn identity_a() -> AdvertisedIdentity {
    AdvertisedIdentity::new(SERVICE_A, CHARACTERISTIC_A)
}

fn identity_b() -> AdvertisedIdentity {
    AdvertisedIdentity::new(SERVICE_B, CHARACTERISTIC_B)
}

fn addr(byte: u8) -> PeerAddress {
    PeerAddress::new([byte; 6])
}

fn fast_config() -> CentralConfig {
    CentralConfig::new()
        .with_tick_interval(Duration::from_millis(10))
        .with_session(
            SessionConfig::new()
                .with_backoff(Duration::from_millis(60), Duration::from_millis(500)),
        )
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Wait until a status matching the predicate arrives
async fn wait_for(
    statuses: &mut mpsc::UnboundedReceiver<SessionStatus>,
    predicate: impl Fn(&SessionStatus) -> bool,
) -> SessionStatus {
    timeout(Duration::from_secs(5), async {
        loop {
            match statuses.recv().await {
                Some(status) if predicate(&status) => return status,
                Some(_) => continue,
                None => panic!("status channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for session status")
}

#[tokio::test(flavor = "multi_thread")]
async fn collector_subscribes_to_both_tracked_nodes() {
    init_tracing();
    let air = MockAirspace::new();
    air.add_node(MockNodeSpec::new(addr(1)).with_identity(identity_a()));
    air.add_node(MockNodeSpec::new(addr(2)).with_identity(identity_b()));

    let (updates_tx, mut updates_rx) = mpsc::unbounded_channel();
    let mut task = CentralTask::new(
        air.central(),
        vec![identity_a(), identity_b()],
        fast_config(),
        updates_tx,
    );
    let mut statuses = task.status_events();
    let handle = task.handle();
    tokio::spawn(async move { task.run().await });

    // Establishment order depends on which advertisement lands first, so
    // collect both in one pass
    let mut established = std::collections::HashMap::new();
    timeout(Duration::from_secs(5), async {
        while established.len() < 2 {
            match statuses.recv().await {
                Some(status) if status.state == SessionState::Subscribed => {
                    established.insert(status.service, status);
                }
                Some(_) => {}
                None => panic!("status channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for both sessions");

    let status_a = established[&SERVICE_A];
    let status_b = established[&SERVICE_B];
    assert_ne!(status_a.session, status_b.session);
    assert_eq!(status_a.retry_count, 0);
    assert_eq!(status_b.retry_count, 0);

    // Each node's updates arrive tagged with its own session
    air.notify_from(addr(1), CHARACTERISTIC_A, b"alpha");
    air.notify_from(addr(2), CHARACTERISTIC_B, b"bravo");

    let mut seen = Vec::new();
    for _ in 0..2 {
        let update = timeout(Duration::from_secs(5), updates_rx.recv())
            .await
            .expect("timed out waiting for update")
            .expect("update channel closed");
        seen.push(update);
    }
    assert!(seen.contains(&(status_a.session, b"alpha".to_vec())));
    assert!(seen.contains(&(status_b.session, b"bravo".to_vec())));

    handle.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn peer_with_other_service_never_creates_a_session() {
    init_tracing();
    let air = MockAirspace::new();
    // The node advertises and exposes only service A
    air.add_node(MockNodeSpec::new(addr(1)).with_identity(identity_a()));

    let (updates_tx, _updates_rx) = mpsc::unbounded_channel();
    let mut task = CentralTask::new(
        air.central(),
        vec![identity_a(), identity_b()],
        fast_config(),
        updates_tx,
    );
    let mut statuses = task.status_events();
    let handle = task.handle();
    tokio::spawn(async move { task.run().await });

    wait_for(&mut statuses, |s| {
        s.service == SERVICE_A && s.state == SessionState::Subscribed
    })
    .await;

    // Give the driver time to misbehave, then check nothing ever touched B
    sleep(Duration::from_millis(300)).await;
    let mut b_statuses = 0;
    while let Ok(status) = statuses.try_recv() {
        if status.service == SERVICE_B {
            b_statuses += 1;
        }
    }
    assert_eq!(b_statuses, 0, "session for service B should stay untouched");

    handle.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn write_only_characteristic_yields_connected_session() {
    init_tracing();
    let air = MockAirspace::new();
    air.add_node(
        MockNodeSpec::new(addr(1))
            .advertising(SERVICE_A)
            .with_service(
                SERVICE_A,
                vec![MockCharacteristic::write_only(CHARACTERISTIC_A)],
            ),
    );

    let (updates_tx, _updates_rx) = mpsc::unbounded_channel();
    let mut task = CentralTask::new(
        air.central(),
        vec![identity_a()],
        fast_config(),
        updates_tx,
    );
    let mut statuses = task.status_events();
    let handle = task.handle();
    tokio::spawn(async move { task.run().await });

    // No notification support still gives an established session
    let status = wait_for(&mut statuses, |s| s.state == SessionState::Connected).await;
    assert_eq!(status.retry_count, 0);
    assert!(air.is_attached(addr(1)));

    handle.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_service_reconnects_and_resumes_scanning_once() {
    init_tracing();
    let air = MockAirspace::new();
    // Advertises service A but exposes no services at all
    air.add_node(MockNodeSpec::new(addr(1)).advertising(SERVICE_A));

    let (updates_tx, _updates_rx) = mpsc::unbounded_channel();
    let mut task = CentralTask::new(
        air.central(),
        vec![identity_a()],
        fast_config(),
        updates_tx,
    );
    let mut statuses = task.status_events();
    let handle = task.handle();
    tokio::spawn(async move { task.run().await });

    let status = wait_for(&mut statuses, |s| s.state == SessionState::Reconnecting).await;
    assert_eq!(status.retry_count, 1);

    // Keep the node silent so the cycle does not repeat, then verify the
    // scan was resumed exactly once after the failure
    air.set_advertising(addr(1), false);
    wait_for(&mut statuses, |s| s.state == SessionState::Idle).await;
    sleep(Duration::from_millis(200)).await;

    let stats = air.stats();
    assert_eq!(
        stats.start_scan_calls, 2,
        "one initial scan plus exactly one resume"
    );
    // The dead-end link was torn down
    assert_eq!(stats.disconnects, 1);
    assert!(!air.is_attached(addr(1)));

    handle.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn refused_connections_grow_the_retry_count() {
    init_tracing();
    let air = MockAirspace::new();
    air.add_node(
        MockNodeSpec::new(addr(1))
            .with_identity(identity_a())
            .refusing_connections(),
    );

    let (updates_tx, _updates_rx) = mpsc::unbounded_channel();
    let mut task = CentralTask::new(
        air.central(),
        vec![identity_a()],
        fast_config(),
        updates_tx,
    );
    let mut statuses = task.status_events();
    let handle = task.handle();
    tokio::spawn(async move { task.run().await });

    let first = wait_for(&mut statuses, |s| s.state == SessionState::Reconnecting).await;
    assert_eq!(first.retry_count, 1);

    // Each failed cycle raises the counter; it never goes back down
    let second = wait_for(&mut statuses, |s| {
        s.state == SessionState::Reconnecting && s.retry_count > 1
    })
    .await;
    assert_eq!(second.retry_count, 2);
    assert_eq!(second.session, first.session);

    handle.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn live_session_survives_competing_discovery() {
    init_tracing();
    let air = MockAirspace::new();
    air.add_node(MockNodeSpec::new(addr(1)).with_identity(identity_a()));

    let (updates_tx, _updates_rx) = mpsc::unbounded_channel();
    let mut task = CentralTask::new(
        air.central(),
        vec![identity_a()],
        fast_config(),
        updates_tx,
    );
    let mut statuses = task.status_events();
    let handle = task.handle();
    tokio::spawn(async move { task.run().await });

    let established = wait_for(&mut statuses, |s| s.state == SessionState::Subscribed).await;

    // A second node starts advertising the same service
    air.add_node(MockNodeSpec::new(addr(2)).with_identity(identity_a()));
    air.advertise_node(addr(2));
    sleep(Duration::from_millis(300)).await;

    // The live session is untouched: still attached to the first node,
    // no new session was minted
    assert!(air.is_attached(addr(1)));
    assert!(!air.is_attached(addr(2)));
    while let Ok(status) = statuses.try_recv() {
        assert_eq!(status.session, established.session);
    }

    handle.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn abandon_releases_the_link_and_later_discovery_starts_fresh() {
    init_tracing();
    let air = MockAirspace::new();
    air.add_node(MockNodeSpec::new(addr(1)).with_identity(identity_a()));

    let (updates_tx, _updates_rx) = mpsc::unbounded_channel();
    let mut task = CentralTask::new(
        air.central(),
        vec![identity_a()],
        fast_config(),
        updates_tx,
    );
    let mut statuses = task.status_events();
    let handle = task.handle();
    tokio::spawn(async move { task.run().await });

    let original = wait_for(&mut statuses, |s| s.state == SessionState::Subscribed).await;

    handle.abandon(SERVICE_A);

    // The node keeps advertising, so a brand new session forms; it must
    // not be the abandoned one
    let fresh = wait_for(&mut statuses, |s| {
        s.state == SessionState::Subscribed && s.session != original.session
    })
    .await;
    assert_eq!(fresh.service, SERVICE_A);
    assert_eq!(fresh.retry_count, 0);

    handle.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn lost_link_recovers_through_rediscovery() {
    init_tracing();
    let air = MockAirspace::new();
    air.add_node(MockNodeSpec::new(addr(1)).with_identity(identity_a()));

    let (updates_tx, _updates_rx) = mpsc::unbounded_channel();
    let mut task = CentralTask::new(
        air.central(),
        vec![identity_a()],
        fast_config(),
        updates_tx,
    );
    let mut statuses = task.status_events();
    let handle = task.handle();
    tokio::spawn(async move { task.run().await });

    let established = wait_for(&mut statuses, |s| s.state == SessionState::Subscribed).await;

    air.drop_link_to(addr(1));

    let lost = wait_for(&mut statuses, |s| s.state == SessionState::Reconnecting).await;
    assert_eq!(lost.session, established.session);
    assert_eq!(lost.retry_count, 1);

    // Same session object re-establishes and the counter resets
    let recovered = wait_for(&mut statuses, |s| s.state == SessionState::Subscribed).await;
    assert_eq!(recovered.session, established.session);
    assert_eq!(recovered.retry_count, 0);
    assert!(air.is_attached(addr(1)));

    handle.shutdown();
}
