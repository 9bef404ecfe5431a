use crate::routes::{self, ApiState};
use axum::Router;
use std::sync::Arc;
use tracing::info;

/// Default HTTP port.
pub const DEFAULT_HTTP_PORT: u16 = 9000;
/// Default prefix of the API routes; `/health` is never prefixed.
pub const DEFAULT_ROUTES_PREFIX: &str = "/api/v1";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Failed to bind HTTP server on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("HTTP server failed with error: {source}")]
    Serve {
        #[source]
        source: std::io::Error,
    },
}

/// HTTP server with its routes mounted.
#[derive(Debug)]
pub struct HttpServer {
    router: Router,
    port: u16,
}

impl HttpServer {
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Binds `0.0.0.0:{port}` and serves until the task is cancelled.
    pub async fn start_server(self) -> Result<(), Error> {
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", self.port))
            .await
            .map_err(|source| Error::Bind {
                port: self.port,
                source,
            })?;
        info!("Starting HTTP server on port {}", self.port);
        axum::serve(listener, self.router)
            .await
            .map_err(|source| Error::Serve { source })
    }
}

/// Builder for [`HttpServer`].
pub struct HttpServerBuilder {
    state: Arc<ApiState>,
    routes_prefix: String,
    port: u16,
}

impl HttpServerBuilder {
    pub fn new(state: Arc<ApiState>) -> Self {
        Self {
            state,
            routes_prefix: DEFAULT_ROUTES_PREFIX.to_string(),
            port: DEFAULT_HTTP_PORT,
        }
    }

    pub fn routes_prefix(mut self, routes_prefix: String) -> Self {
        self.routes_prefix = routes_prefix;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn build(self) -> HttpServer {
        let prefix = self.routes_prefix.trim_end_matches('/');
        let api = routes::api_router();
        let router = if prefix.is_empty() {
            routes::health_router().merge(api)
        } else {
            let prefix = if prefix.starts_with('/') {
                prefix.to_string()
            } else {
                format!("/{prefix}")
            };
            info!("Mounting API routes under {}", prefix);
            routes::health_router().nest(&prefix, api)
        };

        HttpServer {
            router: router.with_state(self.state),
            port: self.port,
        }
    }
}
