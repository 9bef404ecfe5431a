use crate::backend::{self, Backend};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Default token budget for a scene caption.
pub const DEFAULT_MAX_NEW_TOKENS: u32 = 30;

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Failed to read image at {path}: {source}")]
    ReadImage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Backend(#[from] backend::Error),
}

/// Image captioning collaborator.
#[async_trait::async_trait]
pub trait Captioner: Send + Sync {
    async fn load(&self) -> Result<(), backend::Error>;

    /// Describes the scene in the image at `image_path`, trimmed and lowercased.
    async fn caption(&self, image_path: &Path) -> Result<String, Error>;
}

#[derive(Deserialize)]
struct CaptionResponse {
    caption: String,
}

/// Captioning client that uploads the raw image bytes to a model server.
#[derive(Debug)]
pub struct HttpCaptioner {
    backend: Backend,
    max_new_tokens: u32,
}

impl HttpCaptioner {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
        }
    }

    pub fn max_new_tokens(mut self, max_new_tokens: u32) -> Self {
        self.max_new_tokens = max_new_tokens;
        self
    }
}

#[async_trait::async_trait]
impl Captioner for HttpCaptioner {
    async fn load(&self) -> Result<(), backend::Error> {
        self.backend.load().await
    }

    async fn caption(&self, image_path: &Path) -> Result<String, Error> {
        let image = tokio::fs::read(image_path)
            .await
            .map_err(|source| Error::ReadImage {
                path: image_path.to_path_buf(),
                source,
            })?;

        let response: CaptionResponse = self
            .backend
            .post_bytes(
                "caption",
                &[("max_new_tokens", self.max_new_tokens.to_string())],
                image,
            )
            .await?;

        let caption = response.caption.trim().to_lowercase();
        info!("Caption generated for {}: {}", image_path.display(), caption);
        Ok(caption)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{serve, BackendBuilder};
    use axum::{body::Bytes, extract::Query, routing::post, Json, Router};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::io::Write;

    fn caption_router() -> Router {
        Router::new().route(
            "/caption",
            post(
                |Query(params): Query<HashMap<String, String>>, body: Bytes| async move {
                    Json(json!({
                        "caption": format!(
                            "  A Beach At Sunset ({} bytes, {} tokens) ",
                            body.len(),
                            params.get("max_new_tokens").cloned().unwrap_or_default()
                        )
                    }))
                },
            ),
        )
    }

    #[tokio::test]
    async fn test_caption_uploads_image_and_normalises() {
        let base = serve(caption_router()).await;
        let captioner = HttpCaptioner::new(BackendBuilder::new().endpoint(base).build().unwrap())
            .max_new_tokens(12);
        let mut image = tempfile::NamedTempFile::new().unwrap();
        image.write_all(b"fakejpeg").unwrap();

        let caption = captioner.caption(image.path()).await.unwrap();

        assert_eq!(caption, "a beach at sunset (8 bytes, 12 tokens)");
    }

    #[tokio::test]
    async fn test_caption_missing_file() {
        let captioner = HttpCaptioner::new(
            BackendBuilder::new()
                .endpoint("http://127.0.0.1:1")
                .build()
                .unwrap(),
        );

        let err = captioner
            .caption(Path::new("/nonexistent/image.jpg"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ReadImage { .. }));
    }

    #[tokio::test]
    async fn test_caption_server_error() {
        let router = Router::new().route(
            "/caption",
            post(|| async { (axum::http::StatusCode::INTERNAL_SERVER_ERROR, Json(Value::Null)) }),
        );
        let base = serve(router).await;
        let captioner = HttpCaptioner::new(BackendBuilder::new().endpoint(base).build().unwrap());
        let image = tempfile::NamedTempFile::new().unwrap();

        let err = captioner.caption(image.path()).await.unwrap_err();

        assert!(matches!(err, Error::Backend(backend::Error::Status { .. })));
    }
}
