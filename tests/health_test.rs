use load_tester::{
    metrics::LoadMetrics,
    tasks::health::{HealthError, HealthMonitor},
    test_utils::{MockRpc, setup_logging},
};
use std::{sync::Arc, time::Duration};

fn monitor(rpc: MockRpc) -> (HealthMonitor<MockRpc>, Arc<LoadMetrics>) {
    setup_logging();
    let metrics = Arc::new(LoadMetrics::new());
    (HealthMonitor::new(Arc::new(rpc), metrics.clone()), metrics)
}

#[tokio::test]
async fn probe_sets_connectivity_gauge() {
    let (health, metrics) = monitor(MockRpc::new().with_probe_script([false, true]));

    assert!(!health.check().await);
    assert!(!metrics.is_connected());

    assert!(health.check().await);
    assert!(metrics.is_connected());
    assert_eq!(metrics.snapshot().probe_failures, 1);
}

#[tokio::test]
async fn ready_after_transient_failures() {
    let (health, metrics) = monitor(MockRpc::new().with_probe_script([false, false, true]));

    health.wait_until_ready(5, Duration::from_millis(1)).await.unwrap();
    assert!(metrics.is_connected());
    assert_eq!(metrics.snapshot().probe_failures, 2);
}

#[tokio::test]
async fn unreachable_endpoint_exhausts_attempts() {
    let (health, metrics) = monitor(MockRpc::new().with_probe_script([false; 4]));

    let err = health.wait_until_ready(3, Duration::from_millis(1)).await.unwrap_err();
    assert_eq!(err, HealthError::ConnectionUnavailable { attempts: 3 });
    assert_eq!(metrics.snapshot().probe_failures, 3);
}
