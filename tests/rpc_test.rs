use load_tester::{
    rpc::{ChainRpc, RpcError},
    test_utils::{setup_logging, test_config},
};
use std::time::Duration;
use tokio::{net::TcpListener, time::Instant};

/// Accepts connections and never answers.
async fn silent_endpoint() -> eyre::Result<url::Url> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    Ok(format!("http://{addr}").parse()?)
}

#[tokio::test]
async fn stalled_requests_time_out() -> eyre::Result<()> {
    setup_logging();
    let mut config = test_config();
    config.rpc_url = silent_endpoint().await?;
    let timeout = Duration::from_millis(200);
    let rpc = config.connect_rpc().with_request_timeout(timeout);

    let started = Instant::now();
    let gas_price = rpc.gas_price().await;
    let nonce = rpc.sequence_number(alloy::primitives::Address::ZERO, true).await;

    assert!(matches!(gas_price, Err(RpcError::Timeout(t)) if t == timeout));
    assert!(matches!(nonce, Err(RpcError::Timeout(_))));
    assert!(started.elapsed() < Duration::from_secs(5));
    Ok(())
}
