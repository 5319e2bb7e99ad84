//! Helpers shared by the integration tests.

use std::time::Duration;

use msge_shared::config::EngineConfig;

/// Installs a test-writer subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Loopback config on `port` that broadcasts and uploads every tick.
pub fn loopback_config(port: u16) -> EngineConfig {
    EngineConfig {
        server_host: "127.0.0.1".into(),
        handshake_port: port,
        send_interval_ms: 0,
        controller_send_interval_ms: 0,
        handshake_timeout_ms: 2000,
        ..EngineConfig::default()
    }
}

/// Polls `cond` every few milliseconds until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    while !cond() {
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("condition not met within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    Ok(())
}
