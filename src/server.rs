use crate::admission::AdmissionGate;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::handlers::{index, limit_info, optimize, test_prompt, AppState, SharedState};
use crate::middleware::logging_middleware;
use crate::provider::{ProviderClient, ProviderConfig};
use crate::quota::{now_ms, QuotaConfig, QuotaStore};
use axum::routing::{get, post};
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Assemble the router over already-constructed state.
pub fn create_app(state: SharedState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/optimize", post(optimize))
        .route("/test-prompt", post(test_prompt))
        .route("/limit-info", get(limit_info))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(logging_middleware)),
        )
}

pub struct Server {
    config: Config,
    store: Arc<QuotaStore>,
    state: SharedState,
}

impl Server {
    /// Resolve the provider and build all shared state. Fails fast on an
    /// unknown provider or missing credentials.
    pub fn new(config: Config) -> Result<Self> {
        let provider_config = ProviderConfig::resolve(&config)?;
        tracing::info!(
            provider = provider_config.kind.name(),
            model = %provider_config.model,
            "resolved upstream provider"
        );

        let client = ProviderClient::new(provider_config, config.upstream_timeout)?;
        let store = Arc::new(QuotaStore::new(QuotaConfig::new(config.daily_limit)));

        let state = Arc::new(AppState {
            gate: AdmissionGate::new(Arc::clone(&store)),
            generator: Arc::new(client),
        });

        Ok(Self {
            config,
            store,
            state,
        })
    }

    pub async fn run(self) -> Result<()> {
        let app = create_app(Arc::clone(&self.state));

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|e| {
                Error::Configuration(format!("failed to bind {}: {}", self.config.bind_addr, e))
            })?;

        tracing::info!("Refiner server starting on {}", self.config.bind_addr);
        tracing::info!(
            "Rate limit: local unlimited, remote {} requests/day",
            self.config.daily_limit
        );

        // Periodic memory reclamation; correctness relies on lazy reset, not
        // on this task.
        let sweeper = tokio::spawn(sweep_loop(
            Arc::clone(&self.store),
            self.config.cleanup_interval,
        ));

        let result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await;

        sweeper.abort();

        result.map_err(|e| Error::Configuration(format!("server error: {}", e)))
    }
}

async fn sweep_loop(store: Arc<QuotaStore>, interval: std::time::Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // first tick fires immediately; skip it

    loop {
        ticker.tick().await;
        let removed = store.sweep_expired(now_ms());
        if removed > 0 {
            tracing::debug!(removed, live = store.len(), "swept expired quota records");
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => tracing::error!("failed to install signal handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
