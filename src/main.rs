// tether - multi-session streaming core
//
// Architecture:
// - Router: expands the single inbound message channel into typed topics
// - Handlers: per-type logic that writes the session store and asks the UI
//   to render only when the message belongs to the active session
// - Reconstruction: rebuilds a session's view from the store on switch
// - Engine: wires the above onto one synchronous event bus
//
// The binary replays recorded conversations through the engine; hosts embed
// the library and call `Engine::deliver` / `Engine::tick` themselves.

use anyhow::{Context, Result};
use clap::Parser;
use tether::cli::{self, Cli, Commands};
use tether::engine::EngineOptions;
use tether::events::SessionId;
use tether::replay::{Replay, ReplayOptions};
use tokio::io::{AsyncBufRead, BufReader};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Config { show, path, init } => cli::handle_config(&cli, *show, *path, *init),
        Commands::Replay {
            file,
            active,
            realtime,
        } => {
            let config = cli.load_config()?;
            let _log_guard = tether::logging::init(&config.logging)?;
            tracing::info!(version = tether::config::VERSION, file = %file.display(), "Starting replay");

            let input: Box<dyn AsyncBufRead + Unpin> = if file.as_os_str() == "-" {
                Box::new(BufReader::new(tokio::io::stdin()))
            } else {
                let f = tokio::fs::File::open(file)
                    .await
                    .with_context(|| format!("cannot open {}", file.display()))?;
                Box::new(BufReader::new(f))
            };

            let mut replay = Replay::new(
                EngineOptions::from(&config),
                ReplayOptions {
                    active: active.clone().map(SessionId::from),
                    realtime: *realtime,
                    tick_interval: config.runtime.tick_interval,
                },
            );
            let mut stdout = std::io::stdout().lock();
            replay.run(input, &mut stdout).await?;
            replay.engine().shutdown();
            Ok(())
        }
    }
}
