//! Main runtime orchestration.
//!
//! [`LinbotRuntime`] wires the pieces together: state store, plugin
//! registry, correlation broker, dispatcher and frame router. It then serves
//! the gateway until a signal arrives or a handler requests an exit.
//!
//! ```rust,ignore
//! use linbot_runtime::{ConfigLoader, LinbotRuntime, logging};
//!
//! let config = ConfigLoader::new().load()?;
//! logging::init_from_config(&config.logging);
//! let runtime = LinbotRuntime::new(config, linbot_plugins::BUILTIN_GROUPS);
//! let code = runtime.run().await?;
//! std::process::exit(code);
//! ```

use std::future::Future;
use std::sync::Arc;

use linbot_core::{
    ConnectionSlot, CorrelationBroker, Dispatcher, JsonFileStore, PluginEnv, PluginGroup,
    PluginRegistry, ProcessControl, SessionTable, StateStore,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::LinbotConfig;
use crate::error::RuntimeResult;
use crate::router::{FrameRouter, RouterOptions};
use crate::server::{ConnectionHandler, GatewayServer};

/// The assembled bot.
pub struct LinbotRuntime {
    config: LinbotConfig,
    registry: PluginRegistry,
    broker: Arc<CorrelationBroker>,
    control: ProcessControl,
    router: FrameRouter,
}

impl LinbotRuntime {
    /// Builds the runtime with a [`JsonFileStore`] at `config.state.path`.
    pub fn new(config: LinbotConfig, groups: &[&PluginGroup]) -> Self {
        let store = Arc::new(JsonFileStore::new(config.state.path.clone()));
        Self::with_store(config, groups, store)
    }

    /// Builds the runtime around an explicit state store.
    pub fn with_store(
        config: LinbotConfig,
        groups: &[&PluginGroup],
        store: Arc<dyn StateStore>,
    ) -> Self {
        let slot = Arc::new(ConnectionSlot::new());
        let broker = Arc::new(CorrelationBroker::new(slot.clone()));
        let registry = PluginRegistry::new(store);
        let control = ProcessControl::new();

        let env = PluginEnv::new(
            Arc::clone(&broker),
            SessionTable::new(),
            control.clone(),
            registry.catalog(),
        )
        .with_timeouts(config.api.timeouts())
        .with_plugin_configs(config.plugins_value());

        registry.load(groups, &env);

        let options = RouterOptions {
            fallback_reply: config.dispatch.fallback_reply,
            roster_timeout: config.api.timeouts().roster,
            fetch_roster_on_connect: config.api.fetch_roster_on_connect,
        };
        let router = FrameRouter::new(
            slot,
            Arc::clone(&broker),
            Dispatcher::new(registry.clone()),
            options,
        );

        Self {
            config,
            registry,
            broker,
            control,
            router,
        }
    }

    /// Returns a reference to the configuration.
    pub fn config(&self) -> &LinbotConfig {
        &self.config
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn control(&self) -> &ProcessControl {
        &self.control
    }

    pub fn broker(&self) -> &Arc<CorrelationBroker> {
        &self.broker
    }

    /// Serves until Ctrl+C, SIGTERM or a handler-requested exit.
    ///
    /// Returns the process exit code.
    pub async fn run(&self) -> RuntimeResult<i32> {
        self.run_until(wait_for_shutdown()).await
    }

    /// Like [`run`](Self::run) with a custom shutdown future.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<i32>
    where
        F: Future<Output = ()>,
    {
        let server = GatewayServer::bind(&self.config.server).await?;
        self.serve(server, shutdown).await
    }

    /// Serves an already bound server.
    pub async fn serve<F>(&self, server: GatewayServer, shutdown: F) -> RuntimeResult<i32>
    where
        F: Future<Output = ()>,
    {
        let stop = CancellationToken::new();
        let handler: Arc<dyn ConnectionHandler> = Arc::new(self.router.clone());
        let serving = server.serve(handler, stop.clone());
        tokio::pin!(serving);

        tokio::select! {
            result = &mut serving => {
                result?;
                warn!("WebSocket server stopped on its own");
            }
            _ = shutdown => {
                info!("Shutdown signal received");
                stop.cancel();
                serving.await?;
            }
            _ = self.control.cancelled() => {
                info!(code = self.control.exit_code(), "Exit requested by a command");
                stop.cancel();
                serving.await?;
            }
        }

        self.broker.reject_all();
        let code = self.control.exit_code();
        info!(code, "Runtime stopped");
        Ok(code)
    }
}

/// Waits for Ctrl+C or SIGTERM.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c() => {
                        info!("Received Ctrl+C, shutting down");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, shutting down");
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler");
                ctrl_c().await;
                info!("Received Ctrl+C, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c().await;
        info!("Received Ctrl+C, shutting down");
    }
}

async fn ctrl_c() {
    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}
