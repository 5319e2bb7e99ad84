//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p msge_client -- [--config engine.json] [--addr 127.0.0.1] [--port 5204]
//!                               [--tick-hz 60] [--hold w]...
//!
//! The client performs the redirect handshake, applies received world
//! snapshots, renders them headlessly and sends its controller state. Keys
//! given with `--hold` are reported as held for the whole session.

use std::env;

use anyhow::Context;
use msge_client::{client::GameClient, input::InputState};
use msge_shared::{cancel::CancelToken, config::EngineConfig};
use tracing::{info, warn};

fn parse_args() -> anyhow::Result<(EngineConfig, InputState)> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => EngineConfig::from_json_file(&args[i + 1])?,
        _ => EngineConfig::default(),
    };
    let mut input = InputState::default();

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
            "--hold" if i + 1 < args.len() => {
                if !input.press(&args[i + 1]) {
                    warn!(key = %args[i + 1], "unknown key ignored");
                }
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok((cfg, input))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let (cfg, input) = parse_args()?;
    info!(server = %cfg.handshake_addr(), "Starting client");

    let tick_interval = cfg.tick_interval();
    let cancel = CancelToken::new();
    let mut client = GameClient::connect(cfg, &cancel).await.context("connect")?;
    info!(port = client.server_port(), "Connected to server");

    let mut next_tick = tokio::time::Instant::now();
    let mut last_report = 0;
    while client.is_connected() {
        client
            .update(tick_interval.as_secs_f32(), input.buttons())
            .await?;

        let applied = client.snapshots_applied();
        if applied >= last_report + 50 {
            last_report = applied;
            let entities = client.shared().lock().map(|m| m.len()).unwrap_or(0);
            info!(snapshots = applied, entities, "Snapshot");
        }

        next_tick += tick_interval;
        tokio::time::sleep_until(next_tick).await;
    }

    println!("Disconnected from server.");
    Ok(())
}
