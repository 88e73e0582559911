//! Server lifecycle: bind, serve, sweep idle sessions, shut down.

use std::future::Future;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use gatemcp_protocol::types::Implementation;
use gatemcp_transport_traits::CloseReason;

use crate::config::ServerConfig;
use crate::dispatch::McpDispatcher;
use crate::error::ServerResult;
use crate::registry::SessionRegistry;
use crate::router::{AppState, build_router};
use crate::tools::ToolHandler;

/// The authenticated MCP server.
#[derive(Debug)]
pub struct GateServer {
    state: AppState,
}

impl GateServer {
    /// Create a server with the built-in tools.
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        let info = Implementation::new(config.server_name.clone(), config.server_version.clone());
        Self::with_dispatcher(config, McpDispatcher::new(info))
    }

    /// Create a server with a custom dispatcher.
    pub fn with_dispatcher(config: ServerConfig, dispatcher: McpDispatcher) -> ServerResult<Self> {
        config.validate()?;
        Ok(Self {
            state: AppState::new(config, dispatcher),
        })
    }

    /// Register an additional tool.
    pub fn with_tool(self, tool: impl ToolHandler + 'static) -> Self {
        self.state.dispatcher.tools().register(tool);
        self
    }

    /// Effective configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Live sessions.
    pub fn registry(&self) -> &SessionRegistry {
        &self.state.registry
    }

    /// The HTTP router, for embedding or in-process testing.
    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> ServerResult<TcpListener> {
        let addr = self.state.config.socket_addr()?;
        Ok(TcpListener::bind(addr).await?)
    }

    /// Serve on `listener` until `shutdown` resolves.
    ///
    /// On shutdown every session is closed with [`CloseReason::Shutdown`],
    /// which also ends open streams so in-flight connections can drain.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        let config = &self.state.config;
        info!(
            %addr,
            bindings = ?config.bindings,
            event_stream_path = %config.transport.event_stream_path,
            multiplexed_path = %config.transport.multiplexed_path,
            "MCP server listening"
        );

        let sweeper = spawn_sweeper(self.state.clone());
        let registry = self.state.registry.clone();
        let app = self.router();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.await;
                let closed = registry.close_all(CloseReason::Shutdown);
                info!(closed, "Shutting down, sessions closed");
            })
            .await?;

        sweeper.abort();
        // Sessions created while connections drained
        self.state.registry.close_all(CloseReason::Shutdown);
        info!("Server stopped");
        Ok(())
    }

    /// Bind and serve until ctrl-c or SIGTERM.
    pub async fn run(self) -> ServerResult<()> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown_signal()).await
    }
}

fn spawn_sweeper(state: AppState) -> JoinHandle<()> {
    let period = (state.registry.idle_timeout() / 4)
        .clamp(Duration::from_secs(1), Duration::from_secs(60));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let expired = state.registry.sweep_idle();
            let purged = state.issuer.purge_expired();
            if expired > 0 || purged > 0 {
                debug!(expired, purged, "Sweep finished");
            }
        }
    })
}

/// Resolves on ctrl-c, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Ctrl+C received, initiating shutdown"),
        _ = terminate => info!("SIGTERM received, initiating shutdown"),
    }
}
