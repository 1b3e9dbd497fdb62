//! Gateway runtime.
//!
//! [`ServerHandle`] owns the whole process lifecycle: metrics recorder,
//! database, gateway context, the station-facing WebSocket listener, the
//! HTTP API, the orphan monitor and graceful shutdown.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use sea_orm::{DatabaseConnection, DbErr};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::application::charging::commands::CommandDispatcher;
use crate::application::charging::context::{GatewayContext, SharedGatewayContext};
use crate::application::relay::{CommandRelay, InMemoryCommandRelay};
use crate::config::AppConfig;
use crate::domain::RepositoryProvider;
use crate::infrastructure::{init_database, SeaOrmRepositoryProvider};
use crate::interfaces::http::{create_api_router, ApiState};
use crate::interfaces::ws::OcppGateway;
use crate::shared::shutdown::{ShutdownCoordinator, ShutdownSignal};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
    #[error("Failed to bind listener: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to install metrics recorder: {0}")]
    Metrics(String),
}

/// The global recorder can only be installed once per process; later
/// starts reuse its handle.
fn prometheus_handle() -> Result<PrometheusHandle, ServerError> {
    static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
    if let Some(handle) = HANDLE.get() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ServerError::Metrics(e.to_string()))?;
    describe_metrics();
    info!("📊 Prometheus metrics recorder installed");
    Ok(HANDLE.get_or_init(|| handle).clone())
}

fn describe_metrics() {
    metrics::describe_counter!(
        "gateway_connections_total",
        "Station WebSocket connections accepted"
    );
    metrics::describe_counter!(
        "gateway_commands_total",
        "Commands sent to stations, by command"
    );
    metrics::describe_histogram!(
        "gateway_command_latency_seconds",
        metrics::Unit::Seconds,
        "Time from sending a command to the station's reply"
    );
    metrics::describe_counter!(
        "gateway_settlements_total",
        "Settlement attempts, by outcome"
    );
    metrics::describe_counter!(
        "gateway_meter_regressions_total",
        "Meter readings below the transaction's start value"
    );
}

/// Handle to a running gateway.
pub struct ServerHandle {
    pub ctx: SharedGatewayContext,
    pub dispatcher: Arc<CommandDispatcher>,
    pub config: AppConfig,
    /// Bound WebSocket address (useful when the configured port is 0)
    pub ws_addr: SocketAddr,
    pub api_addr: SocketAddr,

    db: DatabaseConnection,
    shutdown: ShutdownCoordinator,
    ws_task: JoinHandle<()>,
    api_task: JoinHandle<()>,
}

impl ServerHandle {
    pub async fn start(config: AppConfig) -> Result<Self, ServerError> {
        info!("Starting charge gateway...");

        let metrics = prometheus_handle()?;

        let db = init_database(&config.database_config()).await?;
        let repos: Arc<dyn RepositoryProvider> = Arc::new(SeaOrmRepositoryProvider::new(db.clone()));

        let relay: Arc<dyn CommandRelay> =
            InMemoryCommandRelay::shared(config.gateway.transaction_log_capacity);
        let ctx = GatewayContext::new(
            config.gateway_settings(),
            relay.clone(),
            repos.clone(),
            config.settlement_retry(),
        );
        info!(
            duplicate_policy = ?ctx.settings.duplicate_policy,
            heartbeat_interval = ctx.settings.heartbeat_interval,
            orphan_grace_secs = ctx.settings.orphan_grace_period.as_secs(),
            "Gateway context ready"
        );

        let shutdown = ShutdownCoordinator::new(config.server.shutdown_timeout);
        let signal = shutdown.signal();

        ctx.orphans.spawn(config.orphan_check_interval(), signal.clone());

        // ── Station-facing WebSocket gateway ───────────────────
        let ws_listener = TcpListener::bind(config.ws_address()).await?;
        let ws_addr = ws_listener.local_addr()?;
        info!("🔌 OCPP 1.6 gateway listening on ws://{}/ocpp/{{station_id}}", ws_addr);

        let gateway = OcppGateway::new(ctx.clone()).with_shutdown(signal.clone());
        let ws_task = tokio::spawn(async move {
            if let Err(e) = gateway.serve(ws_listener).await {
                error!(error = %e, "WebSocket gateway error");
            }
        });

        // ── HTTP API ───────────────────────────────────────────
        let dispatcher = Arc::new(CommandDispatcher::new(
            relay,
            repos,
            config.relay_outcome_timeout(),
        ));
        let router = create_api_router(ApiState::new(
            dispatcher.clone(),
            config.jwt_config(),
            metrics,
        ));

        let api_listener = TcpListener::bind(config.api_address()).await?;
        let api_addr = api_listener.local_addr()?;
        info!("REST API listening on http://{}", api_addr);

        let api_shutdown = signal.clone();
        let api_task = tokio::spawn(async move {
            let server = axum::serve(api_listener, router).with_graceful_shutdown(async move {
                api_shutdown.wait().await;
                info!("🛑 REST API received shutdown signal");
            });
            if let Err(e) = server.await {
                error!(error = %e, "REST API error");
            }
        });

        info!("🚀 Gateway started");

        Ok(Self {
            ctx,
            dispatcher,
            config,
            ws_addr,
            api_addr,
            db,
            shutdown,
            ws_task,
            api_task,
        })
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.signal()
    }

    /// SIGTERM / SIGINT trigger shutdown.
    pub fn install_signal_handler(&self) {
        self.shutdown.start_signal_listener();
    }

    pub fn trigger_shutdown(&self) {
        self.shutdown.signal().trigger();
    }

    /// Wait for shutdown to be triggered, drain listeners and in-flight
    /// settlements, then close the database.
    pub async fn wait(self) {
        let ctx = self.ctx.clone();
        let ws_task = self.ws_task;
        let api_task = self.api_task;

        let clean = self
            .shutdown
            .shutdown_with_cleanup(|| async move {
                if let Err(e) = ws_task.await {
                    error!(error = %e, "WebSocket gateway task panicked");
                }
                if let Err(e) = api_task.await {
                    error!(error = %e, "REST API task panicked");
                }
                // Station actors finish their teardown after the accept loop.
                while ctx.registry.count() > 0 {
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                }
                ctx.settlement.wait_for_settlements().await;
            })
            .await;

        if !clean {
            warn!(
                stations = self.ctx.registry.count(),
                orphans = self.ctx.orphans.len(),
                "Shutdown timed out with work still pending"
            );
        }
        if !self.ctx.orphans.is_empty() {
            warn!(
                orphans = self.ctx.orphans.len(),
                "Active transactions left open; their sessions stay started"
            );
        }

        if let Err(e) = self.db.close().await {
            warn!(error = %e, "Error closing database connection");
        } else {
            info!("✅ Database connection closed");
        }

        info!("👋 Charge gateway shutdown complete");
    }

    pub async fn shutdown(self) {
        info!("🛑 Shutting down charge gateway...");
        self.trigger_shutdown();
        self.wait().await;
    }
}

/// Install the tracing subscriber. `RUST_LOG` overrides the configured level.
///
/// Call once at process startup, before [`ServerHandle::start`].
pub fn init_tracing(config: &AppConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    match config.logging.format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.server.ws_host = "127.0.0.1".to_string();
        config.server.ws_port = 0;
        config.server.api_host = "127.0.0.1".to_string();
        config.server.api_port = 0;
        config.server.shutdown_timeout = 5;
        config.database.url = "sqlite::memory:".to_string();
        config
    }

    #[tokio::test]
    async fn starts_and_shuts_down_cleanly() {
        let handle = ServerHandle::start(test_config()).await.unwrap();
        assert_ne!(handle.ws_addr.port(), 0);
        assert_ne!(handle.api_addr.port(), 0);

        let health = tokio::net::TcpStream::connect(handle.api_addr).await;
        assert!(health.is_ok());

        tokio::time::timeout(Duration::from_secs(10), handle.shutdown())
            .await
            .unwrap();
    }
}
