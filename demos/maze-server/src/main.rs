//! Standalone maze race server.
//!
//! ```text
//! MAZERACE_ADDR=0.0.0.0:9000 RUST_LOG=mazerace=debug cargo run -p maze-server
//! ```
//!
//! Optional overrides: `MAZERACE_TICK_MS`, `MAZERACE_SPRINT_SECS`,
//! `MAZERACE_RACE_TARGET`.

use std::str::FromStr;
use std::time::Duration;

use mazerace::prelude::*;
use tracing_subscriber::EnvFilter;

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(var = name, value = %raw, "ignoring unparsable override");
            default
        }),
        Err(_) => default,
    }
}

fn game_config() -> GameConfig {
    let defaults = GameConfig::default();
    GameConfig {
        tick_interval: Duration::from_millis(env_or(
            "MAZERACE_TICK_MS",
            defaults.tick_interval.as_millis() as u64,
        )),
        sprint_round_length: Duration::from_secs(env_or(
            "MAZERACE_SPRINT_SECS",
            defaults.sprint_round_length.as_secs(),
        )),
        race_level_target: env_or("MAZERACE_RACE_TARGET", defaults.race_level_target),
        ..defaults
    }
}

#[tokio::main]
async fn main() -> Result<(), MazeError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let addr = env_or("MAZERACE_ADDR", "127.0.0.1:8080".to_string());
    let server = MazeServer::builder()
        .bind(&addr)
        .game_config(game_config())
        .build()
        .await?;

    tracing::info!(addr = ?server.local_addr().ok(), "listening");
    server.run().await
}
