//! HTTP surface for the sandbox service.
//!
//! Exposes health, the language registry and the execute endpoint over JSON.
//! All execution goes through `SandboxService`, which owns validation and
//! the concurrency limit; the handlers here only translate between HTTP and
//! the service.

pub mod error;

pub use error::{Result, ServerError};

use axum::extract::{DefaultBodyLimit, Json as AxumJson, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::{middleware, Router};
use sandbox_core::config::ServerSection;
use sandbox_core::{SandboxError, SandboxRequest, SandboxResponse, SandboxService};
use serde_json::json;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Configuration for the HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Enable CORS
    pub enable_cors: bool,
    /// Maximum request body size in bytes
    pub max_body_size: usize,
    /// Enable request logging
    pub enable_logging: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            enable_cors: true,
            max_body_size: 1024 * 1024, // 1MB
            enable_logging: true,
        }
    }
}

impl ServerConfig {
    /// Create a new server configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the `server` section of the sandbox configuration.
    pub fn from_section(section: &ServerSection) -> Result<Self> {
        Self::new()
            .with_bind_addr_str(&section.bind_addr)
            .map(|config| {
                config
                    .with_cors(section.enable_cors)
                    .with_max_body_size(section.max_body_size)
            })
    }

    /// Set the bind address.
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Parse and set the bind address from a string.
    pub fn with_bind_addr_str(mut self, addr: &str) -> Result<Self> {
        self.bind_addr = addr
            .parse()
            .map_err(|e| ServerError::config_error(format!("Invalid bind address: {}", e)))?;
        Ok(self)
    }

    /// Enable or disable CORS.
    pub fn with_cors(mut self, enable: bool) -> Self {
        self.enable_cors = enable;
        self
    }

    /// Set maximum request body size.
    pub fn with_max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    /// Enable or disable request logging.
    pub fn with_logging(mut self, enable: bool) -> Self {
        self.enable_logging = enable;
        self
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub service: SandboxService,
}

type HandlerError = (StatusCode, Json<serde_json::Value>);

/// Handler for the /health GET endpoint.
async fn health_handler(State(app_state): State<AppState>) -> Json<serde_json::Value> {
    let health = app_state.service.health().await;
    let status = if health.executor_available {
        "healthy"
    } else {
        "degraded"
    };
    Json(json!({
        "status": status,
        "executor": health.executor,
        "executor_available": health.executor_available,
        "available_permits": health.available_permits,
        "max_concurrent": health.max_concurrent,
        "timestamp": chrono::Utc::now(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Handler for the /languages GET endpoint.
async fn languages_handler(State(app_state): State<AppState>) -> Json<serde_json::Value> {
    let languages: Vec<serde_json::Value> = app_state
        .service
        .languages()
        .into_iter()
        .map(|compiler| {
            json!({
                "language": compiler.language,
                "aliases": compiler.aliases,
                "compiler": compiler.compiler,
                "source_file": compiler.source_file,
                "output_file": compiler.output_file,
            })
        })
        .collect();
    Json(json!(languages))
}

/// Handler for the /execute POST endpoint.
async fn execute_handler(
    State(app_state): State<AppState>,
    AxumJson(request): AxumJson<SandboxRequest>,
) -> std::result::Result<Json<SandboxResponse>, HandlerError> {
    log::info!(
        "Received execute request for language '{}' (id: {:?})",
        request.language,
        request.id
    );

    match app_state.service.execute(request).await {
        Ok(response) => Ok(Json(response)),
        Err(e) => {
            let mut status = error::status_for(&e);
            if matches!(e, SandboxError::ExecutorError(_))
                && !app_state.service.executor().is_available().await
            {
                status = StatusCode::SERVICE_UNAVAILABLE;
            }

            if status.is_client_error() {
                log::warn!("Rejected execute request: {}", e);
            } else {
                log::error!("Execution failed: {}", e);
            }
            Err((
                status,
                Json(json!({
                    "error": error_label(status),
                    "details": e.to_string(),
                    "timestamp": chrono::Utc::now()
                })),
            ))
        }
    }
}

fn error_label(status: StatusCode) -> &'static str {
    match status {
        StatusCode::BAD_REQUEST => "Invalid request",
        StatusCode::CONFLICT => "Sandbox id in use",
        StatusCode::SERVICE_UNAVAILABLE => "Executor unavailable",
        _ => "Execution failed",
    }
}

/// The sandbox HTTP server.
pub struct SandboxServer {
    service: SandboxService,
    config: ServerConfig,
}

impl SandboxServer {
    /// Create a new server with the given service and default configuration.
    pub fn new(service: SandboxService) -> Self {
        Self {
            service,
            config: ServerConfig::default(),
        }
    }

    /// Create a new server with custom configuration.
    pub fn with_config(service: SandboxService, config: ServerConfig) -> Self {
        Self { service, config }
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Build the Axum router with all routes and middleware.
    pub fn build_router(&self) -> Router {
        let state = AppState {
            service: self.service.clone(),
        };

        let mut router = Router::new()
            .route("/health", get(health_handler))
            .route("/languages", get(languages_handler))
            // OPTIONS answers CORS preflight
            .route(
                "/execute",
                post(execute_handler).options(|| async { StatusCode::OK }),
            )
            .layer(DefaultBodyLimit::max(self.config.max_body_size))
            .with_state(state);

        if self.config.enable_logging {
            router = router.layer(middleware::from_fn(
                |request: axum::http::Request<axum::body::Body>,
                 next: axum::middleware::Next| async {
                    let request_id = uuid::Uuid::new_v4().to_string();
                    let method = request.method().clone();
                    let uri = request.uri().clone();

                    // health checks are polled; keep them out of info logs
                    if uri.path() == "/health" {
                        log::debug!("Request {} {} {}", request_id, method, uri);
                    } else {
                        log::info!("Request {} {} {}", request_id, method, uri);
                    }

                    let start = std::time::Instant::now();
                    let response = next.run(request).await;
                    let duration = start.elapsed();

                    if uri.path() == "/health" {
                        log::debug!("Response {} completed in {:?}", request_id, duration);
                    } else {
                        log::info!(
                            "Response {} {} completed in {:?}",
                            request_id,
                            response.status(),
                            duration
                        );
                    }

                    response
                },
            ));
        }

        router = router.layer(TraceLayer::new_for_http());

        if self.config.enable_cors {
            router = router.layer(CorsLayer::permissive());
        }

        router
    }

    /// Start the server with graceful shutdown support.
    ///
    /// The server will shut down when the provided shutdown signal is received.
    pub async fn serve_with_shutdown<F>(self, shutdown_signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let router = self.build_router();
        let listener = TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|e| {
                ServerError::config_error(format!(
                    "Failed to bind to {}: {}",
                    self.config.bind_addr, e
                ))
            })?;

        log::info!(
            "Sandbox server starting on {} (executor: {})",
            self.config.bind_addr,
            self.service.executor().name()
        );
        log::info!("Health check: http://{}/health", self.config.bind_addr);
        log::info!("Languages: http://{}/languages", self.config.bind_addr);
        log::info!("Execute endpoint: http://{}/execute", self.config.bind_addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ServerError::internal(format!("Server error: {}", e)))?;

        log::info!("Sandbox server shut down gracefully");
        Ok(())
    }
}

/// Utility function to create a shutdown signal from Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            log::info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            log::info!("Received SIGTERM, shutting down...");
        },
    }
}
