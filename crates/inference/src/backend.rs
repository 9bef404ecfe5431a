use genbus_core::retry::RetryConfig;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{info, warn};

/// Default request timeout for model server calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Errors raised while talking to a model server.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Invalid model server endpoint {endpoint}: {source}")]
    Endpoint {
        endpoint: String,
        #[source]
        source: url::ParseError,
    },
    #[error("Failed to build HTTP client with error: {source}")]
    ClientBuild {
        #[source]
        source: reqwest::Error,
    },
    #[error("Request to {url} failed with error: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Request to {url} returned status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("Missing required builder attribute: {}", _0)]
    MissingRequiredAttribute(String),
}

/// An HTTP model server with a memoised readiness gate.
#[derive(Debug)]
pub struct Backend {
    client: reqwest::Client,
    base: String,
    retry: RetryConfig,
    loaded: OnceCell<()>,
}

impl Backend {
    pub fn endpoint(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path)
    }

    /// Waits until `GET {endpoint}/health` succeeds.
    ///
    /// Probing is retried per the configured policy; after the first success
    /// further calls return immediately.
    pub async fn load(&self) -> Result<(), Error> {
        self.loaded
            .get_or_try_init(|| async move {
                let url = self.url("health");
                let url = url.as_str();
                self.retry
                    .retry(|| async move {
                        let result = self.probe(url).await;
                        if let Err(ref err) = result {
                            warn!("Model server not ready yet: {}", err);
                        }
                        result
                    })
                    .await?;
                info!("Model server at {} is ready", self.base);
                Ok::<(), Error>(())
            })
            .await
            .map(|_| ())
    }

    async fn probe(&self, url: &str) -> Result<(), Error> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| Error::Request {
                url: url.to_string(),
                source,
            })?;
        check_status(url, response.status())
    }

    pub async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, Error>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = self.url(path);
        let request = self.client.post(&url).json(body);
        send(url, request).await
    }

    pub async fn post_bytes<R: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        body: Vec<u8>,
    ) -> Result<R, Error> {
        let url = self.url(path);
        let request = self
            .client
            .post(&url)
            .query(query)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body);
        send(url, request).await
    }
}

fn check_status(url: &str, status: reqwest::StatusCode) -> Result<(), Error> {
    if status.is_success() {
        return Ok(());
    }
    Err(Error::Status {
        url: url.to_string(),
        status,
    })
}

async fn send<R: DeserializeOwned>(
    url: String,
    request: reqwest::RequestBuilder,
) -> Result<R, Error> {
    let response = request.send().await.map_err(|source| Error::Request {
        url: url.clone(),
        source,
    })?;
    check_status(&url, response.status())?;
    response
        .json::<R>()
        .await
        .map_err(|source| Error::Request { url, source })
}

/// Builder for [`Backend`].
#[derive(Debug, Clone, Default)]
pub struct BackendBuilder {
    endpoint: Option<String>,
    timeout: Option<Duration>,
    retry: Option<RetryConfig>,
}

impl BackendBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn build(self) -> Result<Backend, Error> {
        let endpoint = self
            .endpoint
            .ok_or_else(|| Error::MissingRequiredAttribute("endpoint".to_string()))?;
        url::Url::parse(&endpoint).map_err(|source| Error::Endpoint {
            endpoint: endpoint.clone(),
            source,
        })?;

        let client = reqwest::Client::builder()
            .timeout(self.timeout.unwrap_or(DEFAULT_TIMEOUT))
            .build()
            .map_err(|source| Error::ClientBuild { source })?;

        Ok(Backend {
            client,
            base: endpoint.trim_end_matches('/').to_string(),
            retry: self.retry.unwrap_or_default(),
            loaded: OnceCell::new(),
        })
    }
}

/// Serves `router` on an ephemeral local port and returns its base URL.
#[cfg(test)]
pub(crate) async fn serve(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::StatusCode, routing::get, Router};
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    fn fast_retry(max_attempts: usize) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_backoff_ms: 2,
            max_backoff_ms: 5,
        }
    }

    /// Health endpoint that reports unavailable for the first `failures` probes.
    fn health_router(hits: Arc<AtomicUsize>, failures: usize) -> Router {
        Router::new()
            .route(
                "/health",
                get(
                    move |State(hits): State<Arc<AtomicUsize>>| async move {
                        if hits.fetch_add(1, Ordering::SeqCst) < failures {
                            StatusCode::SERVICE_UNAVAILABLE
                        } else {
                            StatusCode::OK
                        }
                    },
                ),
            )
            .with_state(hits)
    }

    #[test]
    fn test_builder_requires_endpoint() {
        let err = BackendBuilder::new().build().unwrap_err();
        assert!(matches!(err, Error::MissingRequiredAttribute(attr) if attr == "endpoint"));
    }

    #[test]
    fn test_builder_rejects_invalid_endpoint() {
        let err = BackendBuilder::new().endpoint("not a url").build().unwrap_err();
        assert!(matches!(err, Error::Endpoint { .. }));
    }

    #[test]
    fn test_builder_trims_trailing_slash() {
        let backend = BackendBuilder::new()
            .endpoint("http://localhost:8080/")
            .build()
            .unwrap();
        assert_eq!(backend.endpoint(), "http://localhost:8080");
        assert_eq!(backend.url("generate"), "http://localhost:8080/generate");
    }

    #[tokio::test]
    async fn test_load_is_memoised() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = serve(health_router(hits.clone(), 0)).await;
        let backend = BackendBuilder::new().endpoint(base).build().unwrap();

        backend.load().await.unwrap();
        backend.load().await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_load_retries_until_ready() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = serve(health_router(hits.clone(), 2)).await;
        let backend = BackendBuilder::new()
            .endpoint(base)
            .retry(fast_retry(3))
            .build()
            .unwrap();

        backend.load().await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_load_reports_last_failure() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = serve(health_router(hits.clone(), usize::MAX)).await;
        let backend = BackendBuilder::new()
            .endpoint(base)
            .retry(fast_retry(2))
            .build()
            .unwrap();

        let err = backend.load().await.unwrap_err();

        assert!(matches!(err, Error::Status { status, .. } if status == StatusCode::SERVICE_UNAVAILABLE));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
