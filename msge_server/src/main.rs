//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p msge_server -- [--config engine.json] [--addr 127.0.0.1] [--port 5204]
//!                               [--tick-hz 60] [--level level.json]
//!
//! The server accepts handshakes on the well-known port, redirects every
//! client to its own port, runs a fixed timestep simulation and broadcasts
//! world snapshots.

use std::env;

use anyhow::Context;
use msge_server::server::GameServer;
use msge_shared::config::EngineConfig;
use tracing::info;

fn parse_args() -> anyhow::Result<EngineConfig> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => EngineConfig::from_json_file(&args[i + 1])?,
        _ => EngineConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_host = args[i + 1].clone();
                i += 2;
            }
            "--port" if i + 1 < args.len() => {
                cfg.handshake_port = args[i + 1].parse().context("--port")?;
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().unwrap_or(60);
                i += 2;
            }
            "--level" if i + 1 < args.len() => {
                cfg.level_path = Some(args[i + 1].clone());
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(
        addr = %cfg.handshake_addr(),
        tick_hz = cfg.tick_hz,
        send_interval_ms = cfg.send_interval_ms,
        "Starting server"
    );

    let tick_interval = cfg.tick_interval();
    let mut server = GameServer::start(cfg).await.context("create server")?;
    info!(local = %server.local_addr(), "Server listening");

    // Main server loop.
    let mut next_tick = tokio::time::Instant::now();
    loop {
        server.step(tick_interval.as_secs_f32());

        next_tick += tick_interval;
        tokio::time::sleep_until(next_tick).await;
    }
}
