use init4_bin_base::{
    deps::tracing::{info, info_span, warn},
    utils::from_env::FromEnv,
};
use load_tester::{
    config::LoadTestConfig, metrics::LoadMetrics, service::serve_healthcheck,
    tasks::scheduler::BatchScheduler,
};
use std::sync::Arc;
use tokio::{select, signal::ctrl_c};
use tokio_util::sync::CancellationToken;

// Note: Must be set to `multi_thread` to support async tasks.
// See: https://docs.rs/tokio/latest/tokio/attr.main.html
#[tokio::main(flavor = "multi_thread")]
async fn main() -> eyre::Result<()> {
    let _guard = init4_bin_base::init4();
    let init_span_guard = info_span!("load tester initialization").entered();

    // Pull the configuration from the environment
    let config = LoadTestConfig::from_env()?;
    config.log_summary();

    let metrics = Arc::new(LoadMetrics::new());
    let rpc = Arc::new(config.connect_rpc());
    let cancel = CancellationToken::new();

    // Start the healthcheck server, if configured
    let server = config
        .healthcheck_port
        .map(|port| serve_healthcheck(([0, 0, 0, 0], port), metrics.clone()));

    let mut scheduler = BatchScheduler::new(config, rpc, metrics, cancel.clone());
    let mut run = tokio::spawn(async move { scheduler.run().await });

    drop(init_span_guard);

    let summary = select! {
        result = &mut run => result??,
        _ = ctrl_c() => {
            info!("interrupt received, stopping load test");
            cancel.cancel();
            run.await??
        }
    };

    if let Some(server) = server {
        server.abort();
    }

    let metrics = summary.metrics;
    info!(
        rounds = summary.rounds,
        funded = summary.funding.funded,
        sent = metrics.sent,
        succeeded = metrics.succeeded,
        failed = metrics.failed,
        collisions = metrics.collisions,
        disconnected = metrics.disconnected,
        abandoned = summary.drained.abandoned,
        "load test completed"
    );
    if metrics.unresolved() > 0 {
        warn!(unresolved = metrics.unresolved(), "counters do not balance");
    }

    Ok(())
}
