//! linbot: a OneBot v11 QQ bot.
//!
//! Listens for the gateway's reverse WebSocket connection and answers
//! commands with the built-in plugins.
//!
//! # Usage
//!
//! ```bash
//! linbot --config linbot.toml --port 8082
//! ```
//!
//! The process exits with the code requested by a command: `关机` exits
//! with 1 and `重启` with 0, so a supervisor configured to restart on 0 and
//! stop on 1 brings the bot back only after a restart.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use linbot_runtime::config::LogLevel;
use linbot_runtime::{ConfigLoader, LinbotRuntime, logging};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "linbot", version, about = "OneBot v11 QQ bot")]
struct Cli {
    /// Configuration file (default: search for linbot.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Plugin state file
    #[arg(long)]
    state: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<LogLevel>,
}

impl Cli {
    fn loader(&self) -> ConfigLoader {
        let mut loader = ConfigLoader::new();
        if let Some(path) = &self.config {
            loader = loader.file(path);
        }
        if let Some(host) = &self.host {
            loader = loader.set("server.host", host);
        }
        if let Some(port) = self.port {
            loader = loader.set("server.port", port);
        }
        if let Some(state) = &self.state {
            loader = loader.set("state.path", state);
        }
        if let Some(level) = self.log_level {
            loader = loader.set("logging.level", level);
        }
        loader
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.loader().load()?;
    logging::init_from_config(&config.logging);

    info!(
        addr = %config.server.addr(),
        path = %config.server.path,
        state = %config.state.path.display(),
        "Starting linbot"
    );

    let runtime = LinbotRuntime::new(config, linbot_plugins::BUILTIN_GROUPS);
    let code = runtime.run().await?;
    std::process::exit(code);
}
