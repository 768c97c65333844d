use alloy::primitives::U256;
use load_tester::{
    constants::COLLISION_WINDOW,
    identity::Identity,
    metrics::LoadMetrics,
    pending::PendingSet,
    tasks::{
        confirm::{ConfirmationTracker, TrackerSet},
        health::HealthMonitor,
        submit::{SenderThrottle, SubmitError, Submitter, TransferParams},
    },
    test_utils::{MOCK_CHAIN_ID, MockRpc, setup_logging},
};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

struct Harness {
    rpc: Arc<MockRpc>,
    metrics: Arc<LoadMetrics>,
    pending: Arc<PendingSet>,
    submitter: Submitter<MockRpc>,
    trackers: TrackerSet,
    cancel: CancellationToken,
}

impl Harness {
    fn new(rpc: MockRpc) -> Self {
        setup_logging();
        let rpc = Arc::new(rpc.with_confirm_latency(Duration::from_millis(5)));
        let metrics = Arc::new(LoadMetrics::new());
        let pending = Arc::new(PendingSet::new());
        let health = HealthMonitor::new(rpc.clone(), metrics.clone());
        let tracker = ConfirmationTracker::new(rpc.clone(), metrics.clone(), pending.clone());
        let cancel = CancellationToken::new();
        let submitter = Submitter::new(
            rpc.clone(),
            metrics.clone(),
            health,
            tracker,
            TransferParams { chain_id: MOCK_CHAIN_ID, value: U256::from(1_000), gas_limit: 21_000 },
            cancel.clone(),
        );
        Self { rpc, metrics, pending, submitter, trackers: TrackerSet::new(), cancel }
    }

    fn throttle(&self) -> SenderThrottle {
        SenderThrottle::new()
    }
}

#[tokio::test]
async fn successful_submission_is_tracked() {
    let mut h = Harness::new(MockRpc::new());
    let (sender, receiver) = (Identity::random(), Identity::random());
    let mut throttle = h.throttle();

    let handle = h.submitter.submit(&sender, &receiver, &mut throttle, &mut h.trackers).await.unwrap();
    assert_eq!(handle.sender, sender.address());
    assert!(h.pending.contains(&handle.tx_hash));

    h.trackers.drain(Duration::from_secs(5)).await;
    assert!(h.pending.is_empty());

    let snapshot = h.metrics.snapshot();
    assert_eq!(snapshot.sent, 1);
    assert_eq!(snapshot.succeeded, 1);
    assert_eq!(snapshot.failed, 0);
}

#[tokio::test]
async fn same_sender_is_spaced_by_the_collision_window() {
    let mut h = Harness::new(MockRpc::new());
    let (sender, receiver) = (Identity::random(), Identity::random());
    let mut throttle = h.throttle();

    for _ in 0..3 {
        h.submitter.submit(&sender, &receiver, &mut throttle, &mut h.trackers).await.unwrap();
    }

    let attempts = h.rpc.attempts();
    assert_eq!(attempts.len(), 3);
    for pair in attempts.windows(2) {
        assert!(pair[1].at.duration_since(pair[0].at) >= COLLISION_WINDOW);
        assert_eq!(pair[1].nonce, pair[0].nonce + 1);
    }
    h.trackers.drain(Duration::from_secs(5)).await;
    assert_eq!(h.metrics.snapshot().succeeded, 3);
}

#[tokio::test]
async fn collision_window_runs_from_dispatch() {
    // the first sequence number lookup is slow, the second is instant
    let mut h = Harness::new(MockRpc::new().with_nonce_delays([Duration::from_millis(90)]));
    let (sender, receiver) = (Identity::random(), Identity::random());
    let mut throttle = h.throttle();

    h.submitter.submit(&sender, &receiver, &mut throttle, &mut h.trackers).await.unwrap();
    h.submitter.submit(&sender, &receiver, &mut throttle, &mut h.trackers).await.unwrap();

    let attempts = h.rpc.attempts();
    assert_eq!(attempts.len(), 2);
    assert!(attempts[1].at.duration_since(attempts[0].at) >= COLLISION_WINDOW);
    h.trackers.drain(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn stalled_endpoint_yields_to_cancellation() {
    let mut h = Harness::new(MockRpc::new());
    h.rpc.stall_gas_price();
    let (sender, receiver) = (Identity::random(), Identity::random());
    let mut throttle = h.throttle();

    let cancel = h.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        h.submitter.submit(&sender, &receiver, &mut throttle, &mut h.trackers),
    )
    .await
    .unwrap()
    .unwrap_err();
    assert!(matches!(err, SubmitError::Cancelled));
    assert!(h.rpc.attempts().is_empty());
    assert_eq!(h.metrics.snapshot().sent, 0);
}

#[tokio::test]
async fn other_senders_are_not_held_back() {
    let mut h = Harness::new(MockRpc::new());
    let (a, b, receiver) = (Identity::random(), Identity::random(), Identity::random());
    let mut throttle = h.throttle();

    h.submitter.submit(&a, &receiver, &mut throttle, &mut h.trackers).await.unwrap();
    h.submitter.submit(&b, &receiver, &mut throttle, &mut h.trackers).await.unwrap();

    let attempts = h.rpc.attempts();
    assert!(attempts[1].at.duration_since(attempts[0].at) < COLLISION_WINDOW);
    h.trackers.drain(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn taken_sequence_number_is_a_collision() {
    let mut h = Harness::new(MockRpc::new());
    let (sender, receiver) = (Identity::random(), Identity::random());
    let mut throttle = h.throttle();
    h.rpc.collide_next(sender.address());

    let err = h
        .submitter
        .submit(&sender, &receiver, &mut throttle, &mut h.trackers)
        .await
        .unwrap_err();
    assert!(err.is_collision());
    assert!(matches!(err, SubmitError::SequenceCollision { nonce: 0, .. }));
    assert!(h.trackers.is_empty());
    assert!(h.pending.is_empty());

    let snapshot = h.metrics.snapshot();
    assert_eq!(snapshot.sent, 1);
    assert_eq!(snapshot.failed, 1);
    assert_eq!(snapshot.collisions, 1);
}

#[tokio::test]
async fn rejected_sender_is_not_a_collision() {
    let mut h = Harness::new(MockRpc::new());
    let (sender, receiver) = (Identity::random(), Identity::random());
    let mut throttle = h.throttle();
    h.rpc.fail_sender(sender.address());

    let err = h
        .submitter
        .submit(&sender, &receiver, &mut throttle, &mut h.trackers)
        .await
        .unwrap_err();
    assert!(matches!(err, SubmitError::Submission(ref e) if e.is_rejection()));
    assert!(h.pending.is_empty());

    let snapshot = h.metrics.snapshot();
    assert_eq!(snapshot.sent, 1);
    assert_eq!(snapshot.failed, 1);
    assert_eq!(snapshot.collisions, 0);
}

#[tokio::test]
async fn disconnected_endpoint_skips_submission() {
    let mut h = Harness::new(MockRpc::new().with_probe_script([false]));
    let (sender, receiver) = (Identity::random(), Identity::random());
    let mut throttle = h.throttle();

    let err = h
        .submitter
        .submit(&sender, &receiver, &mut throttle, &mut h.trackers)
        .await
        .unwrap_err();
    assert!(matches!(err, SubmitError::Disconnected));
    assert!(h.rpc.attempts().is_empty());

    let snapshot = h.metrics.snapshot();
    assert_eq!(snapshot.sent, 1);
    assert_eq!(snapshot.failed, 1);
    assert_eq!(snapshot.disconnected, 1);
    assert!(!snapshot.connected);
}

#[tokio::test]
async fn cancellation_before_dispatch_is_not_counted() {
    let mut h = Harness::new(MockRpc::new());
    let (sender, receiver) = (Identity::random(), Identity::random());
    let mut throttle = h.throttle();

    h.submitter.submit(&sender, &receiver, &mut throttle, &mut h.trackers).await.unwrap();
    h.cancel.cancel();

    let err = h
        .submitter
        .submit(&sender, &receiver, &mut throttle, &mut h.trackers)
        .await
        .unwrap_err();
    assert!(matches!(err, SubmitError::Cancelled));
    assert_eq!(h.rpc.attempts().len(), 1);

    h.trackers.drain(Duration::from_secs(5)).await;
    let snapshot = h.metrics.snapshot();
    assert_eq!(snapshot.sent, 1);
    assert_eq!(snapshot.failed, 0);
    assert_eq!(snapshot.unresolved(), 0);
}
