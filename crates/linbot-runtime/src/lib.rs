//! linbot runtime: the process around the core.
//!
//! This crate provides:
//! - Layered configuration (`figment`): defaults, `linbot.toml`, `LINBOT_*`
//!   environment variables, command line overrides
//! - Logging setup (`tracing-subscriber`, `tracing-appender`)
//! - The reverse WebSocket server the OneBot gateway connects to (`axum`)
//! - Inbound frame routing into the broker and the dispatcher
//! - [`LinbotRuntime`], which assembles everything and returns the process
//!   exit code when it stops
//!
//! ```ignore
//! use linbot_runtime::{ConfigLoader, LinbotRuntime, logging};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::new().load()?;
//!     logging::init_from_config(&config.logging);
//!
//!     let runtime = LinbotRuntime::new(config, linbot_plugins::BUILTIN_GROUPS);
//!     let code = runtime.run().await?;
//!     std::process::exit(code);
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod router;
pub mod runtime;
pub mod server;

// Re-exports
pub use config::{ConfigError, ConfigLoader, ConfigResult, LinbotConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use router::{FrameRouter, RouterOptions};
pub use runtime::LinbotRuntime;
pub use server::{ConnectionHandler, GatewayServer};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
