//! Application startup and lifecycle management.

use crate::config::{RelayConfig, StoreConfig};
use crate::handlers::health::{health_check, metrics_handler, readiness_check};
use crate::handlers::ws::relay_socket;
use crate::relay::{CoordinatorSettings, RelayCoordinator, RelayDependencies};
use crate::services::upstream::anthropic::AnthropicClient;
use crate::services::{
    ConnectionRegistry, InMemoryQuotaStore, InMemorySessionStore, RedisSessionStore, RelayDb,
    SessionStore, StaticIdentityResolver, TemplateRenderer,
};
use axum::{routing::get, Router};
use service_core::error::AppError;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<RelayCoordinator>,
    pub registry: Arc<ConnectionRegistry>,
    pub sessions: Arc<dyn SessionStore>,
    /// Absent with the in-memory store backend.
    pub db: Option<RelayDb>,
}

impl AppState {
    pub async fn check_stores(&self) -> Result<(), anyhow::Error> {
        if let Some(db) = &self.db {
            db.health_check()
                .await
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        }
        self.sessions.health_check().await
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(relay_socket))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Connect the stores, build the coordinator and bind the listener.
    pub async fn build(config: RelayConfig) -> Result<Self, AppError> {
        let registry = Arc::new(ConnectionRegistry::new(config.relay.outbound_buffer));

        let upstream = Arc::new(AnthropicClient::new(config.upstream.clone())?);
        let renderer = Arc::new(TemplateRenderer::new(&config.templates).map_err(|e| {
            tracing::error!(error = %e, "Failed to compile prompt templates");
            AppError::ConfigError(anyhow::anyhow!("invalid prompt template: {}", e))
        })?);

        let settings = CoordinatorSettings::from_config(&config.upstream, &config.relay);

        let (deps, sessions, db) = match &config.store {
            StoreConfig::External {
                mongodb_uri,
                mongodb_database,
                redis_url,
                session_ttl_secs,
            } => {
                let db = RelayDb::connect(mongodb_uri, mongodb_database).await?;
                db.initialize_indexes().await.map_err(|e| {
                    tracing::error!("Failed to initialize database indexes: {}", e);
                    e
                })?;

                let sessions: Arc<dyn SessionStore> = Arc::new(
                    RedisSessionStore::new(redis_url, *session_ttl_secs)
                        .await
                        .map_err(AppError::InternalError)?,
                );
                let db_handle = Arc::new(db.clone());

                let deps = RelayDependencies {
                    identity: db_handle.clone(),
                    quota: db_handle,
                    sessions: sessions.clone(),
                    transport: registry.clone(),
                    upstream,
                    renderer,
                };
                (deps, sessions, Some(db))
            }
            StoreConfig::Memory { identities } => {
                tracing::warn!(
                    identities = identities.len(),
                    "Using in-memory stores, state is lost on restart"
                );
                let resolver = StaticIdentityResolver::new();
                let quota = InMemoryQuotaStore::new();
                for seed in identities {
                    resolver.insert(&seed.credential, &seed.identity);
                    quota.set(&seed.identity, seed.remaining);
                }
                let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());

                let deps = RelayDependencies {
                    identity: Arc::new(resolver),
                    quota: Arc::new(quota),
                    sessions: sessions.clone(),
                    transport: registry.clone(),
                    upstream,
                    renderer,
                };
                (deps, sessions, None)
            }
        };

        let state = AppState {
            coordinator: Arc::new(RelayCoordinator::new(deps, settings)),
            registry,
            sessions,
            db,
        };

        Self::bind(config.common.port, state).await
    }

    /// Bind around pre-built state. Port 0 picks a random port.
    pub async fn bind(port: u16, state: AppState) -> Result<Self, AppError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "Relay service listener bound");

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Serve until Ctrl-C or SIGTERM.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        tracing::info!(
            service = "relay-service",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            "Service ready to accept connections"
        );

        axum::serve(self.listener, router(self.state))
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "HTTP server error");
                std::io::Error::other(format!("HTTP server error: {}", e))
            })
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
