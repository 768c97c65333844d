use alloy::node_bindings::Anvil;
use load_tester::{
    metrics::LoadMetrics,
    rpc::ChainRpc,
    tasks::scheduler::{BatchScheduler, SchedulerState},
    test_utils::{setup_logging, test_config},
};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

#[ignore = "integration test. Requires the anvil binary on PATH."]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bounded_run_against_anvil() -> eyre::Result<()> {
    setup_logging();
    let anvil = Anvil::new().block_time(1).try_spawn()?;

    let mut config = test_config();
    config.rpc_url = anvil.endpoint_url();
    config.batch_interval_ms = 500;

    let rpc = Arc::new(config.connect_rpc().with_poll_interval(Duration::from_millis(100)));
    let metrics = Arc::new(LoadMetrics::new());
    let mut scheduler =
        BatchScheduler::new(config, rpc.clone(), metrics, CancellationToken::new())
            .with_confirm_timeout(Duration::from_secs(30));

    let summary = scheduler.run().await?;

    assert_eq!(scheduler.state(), SchedulerState::Stopped);
    assert_eq!(summary.funding.funded, 3);
    assert_eq!(summary.metrics.sent, 10);
    assert_eq!(summary.metrics.unresolved(), 0);
    assert!(summary.metrics.succeeded > 0);
    assert!(rpc.block_number().await? > 0);

    Ok(())
}
