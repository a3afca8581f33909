//! Forge supervisor daemon.
//!
//! Reference binding for the command/event surface: commands arrive as one
//! JSON object per stdin line, responses and events leave as JSON lines on
//! stdout. A UI embeds the same surface over its own IPC channel instead.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin forged
//! echo '{"cmd":"workspace.list"}' | cargo run --bin forged
//! ```

use forge_supervisor::{spawn_supervisor, Command, SupervisorConfig};
use tokio::io::AsyncBufReadExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging goes to stderr; stdout carries the protocol.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,forge_supervisor=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = SupervisorConfig::new(SupervisorConfig::default_db_path());
    tracing::info!(db = %config.db_path.display(), "starting forge supervisor");
    let (handle, mut events) = spawn_supervisor(config)?;

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "unserializable event dropped"),
            }
        }
    });

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let reply = match serde_json::from_str::<Command>(line) {
            Ok(cmd) => match handle.command(cmd).await {
                Ok(response) => serde_json::json!({ "ok": response }),
                Err(e) => serde_json::json!({ "error": e.to_string() }),
            },
            Err(e) => serde_json::json!({ "error": format!("unparseable command: {e}") }),
        };
        println!("{reply}");
    }

    tracing::info!("stdin closed, shutting down");
    Ok(())
}
