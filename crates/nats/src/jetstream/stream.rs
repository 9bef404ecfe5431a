use super::config::StreamOptions;
use async_nats::jetstream::{self, stream::Config};
use tracing::info;

/// Errors that can occur during stream operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Failed to create JetStream stream.
    #[error("Failed to create JetStream stream {name}: {source}")]
    CreateStream {
        name: String,
        #[source]
        source: async_nats::jetstream::context::CreateStreamError,
    },
    /// Stream options are unusable.
    #[error("Invalid stream options: {0}")]
    InvalidOptions(String),
}

/// Outcome of [`ensure_stream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    /// The stream was already present and left untouched.
    Existing,
    /// The stream was created by this call.
    Created,
}

/// Minimal stream administration surface used for provisioning.
#[async_trait::async_trait]
pub trait StreamCatalog: Send + Sync {
    async fn exists(&self, name: &str) -> bool;
    async fn create(&self, config: Config) -> Result<(), Error>;
}

#[async_trait::async_trait]
impl StreamCatalog for jetstream::Context {
    async fn exists(&self, name: &str) -> bool {
        self.get_stream(name).await.is_ok()
    }

    async fn create(&self, config: Config) -> Result<(), Error> {
        let name = config.name.clone();
        self.create_stream(config)
            .await
            .map(|_| ())
            .map_err(|source| Error::CreateStream { name, source })
    }
}

/// Creates the stream described by `options` unless one with that name already exists.
///
/// Safe to call redundantly from several workers: when a concurrent caller
/// wins the race and creation fails, the stream is checked again and treated
/// as existing.
pub async fn ensure_stream<C: StreamCatalog + ?Sized>(
    catalog: &C,
    options: &StreamOptions,
) -> Result<Provisioned, Error> {
    if options.name.is_empty() {
        return Err(Error::InvalidOptions("stream name is empty".to_string()));
    }
    if options.subjects.is_empty() {
        return Err(Error::InvalidOptions(format!(
            "stream {} has no subjects",
            options.name
        )));
    }

    if catalog.exists(&options.name).await {
        info!("Stream '{}' already exists", options.name);
        return Ok(Provisioned::Existing);
    }

    match catalog.create(options.to_stream_config()).await {
        Ok(()) => {
            info!(
                "Created JetStream stream '{}' (subjects={:?}, max_messages={})",
                options.name, options.subjects, options.max_messages
            );
            Ok(Provisioned::Created)
        }
        Err(err) if catalog.exists(&options.name).await => {
            info!(
                "Stream '{}' was created concurrently ({}), reusing it",
                options.name, err
            );
            Ok(Provisioned::Existing)
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_nats::jetstream::context::CreateStreamErrorKind;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryCatalog {
        streams: Mutex<HashMap<String, Config>>,
        create_calls: Mutex<usize>,
    }

    #[async_trait::async_trait]
    impl StreamCatalog for MemoryCatalog {
        async fn exists(&self, name: &str) -> bool {
            self.streams.lock().unwrap().contains_key(name)
        }

        async fn create(&self, config: Config) -> Result<(), Error> {
            *self.create_calls.lock().unwrap() += 1;
            let mut streams = self.streams.lock().unwrap();
            if streams.contains_key(&config.name) {
                return Err(Error::CreateStream {
                    name: config.name,
                    source: CreateStreamErrorKind::Response.into(),
                });
            }
            streams.insert(config.name.clone(), config);
            Ok(())
        }
    }

    /// Catalog whose existence check always misses the first time, as if
    /// another worker created the stream between check and create.
    struct RacingCatalog {
        inner: MemoryCatalog,
        checks: Mutex<usize>,
    }

    #[async_trait::async_trait]
    impl StreamCatalog for RacingCatalog {
        async fn exists(&self, name: &str) -> bool {
            let mut checks = self.checks.lock().unwrap();
            *checks += 1;
            *checks > 1 && self.inner.streams.lock().unwrap().contains_key(name)
        }

        async fn create(&self, config: Config) -> Result<(), Error> {
            self.inner.create(config).await
        }
    }

    fn options() -> StreamOptions {
        StreamOptions::new("GENBUS", vec!["monthly.posts.*".to_string()])
    }

    #[tokio::test]
    async fn test_ensure_stream_is_idempotent() {
        let catalog = MemoryCatalog::default();

        let first = ensure_stream(&catalog, &options()).await.unwrap();
        let second = ensure_stream(&catalog, &options()).await.unwrap();

        assert_eq!(first, Provisioned::Created);
        assert_eq!(second, Provisioned::Existing);
        assert_eq!(catalog.streams.lock().unwrap().len(), 1);
        assert_eq!(*catalog.create_calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ensure_stream_applies_bounded_retention() {
        let catalog = MemoryCatalog::default();
        ensure_stream(&catalog, &options()).await.unwrap();

        let streams = catalog.streams.lock().unwrap();
        let config = streams.get("GENBUS").unwrap();
        assert_eq!(config.max_messages, 10_000);
        assert_eq!(config.subjects, vec!["monthly.posts.*"]);
        assert_eq!(
            config.retention,
            async_nats::jetstream::stream::RetentionPolicy::Limits
        );
    }

    #[tokio::test]
    async fn test_ensure_stream_tolerates_concurrent_creation() {
        let catalog = RacingCatalog {
            inner: MemoryCatalog::default(),
            checks: Mutex::new(0),
        };
        catalog
            .inner
            .streams
            .lock()
            .unwrap()
            .insert("GENBUS".to_string(), options().to_stream_config());

        let result = ensure_stream(&catalog, &options()).await.unwrap();
        assert_eq!(result, Provisioned::Existing);
    }

    #[tokio::test]
    async fn test_create_failure_keeps_broker_error() {
        let catalog = MemoryCatalog::default();
        catalog
            .streams
            .lock()
            .unwrap()
            .insert("GENBUS".to_string(), options().to_stream_config());

        let err = catalog
            .create(options().to_stream_config())
            .await
            .unwrap_err();
        let source = std::error::Error::source(&err)
            .and_then(|source| source.downcast_ref::<async_nats::jetstream::context::CreateStreamError>())
            .unwrap();
        assert_eq!(source.kind(), CreateStreamErrorKind::Response);
    }

    #[tokio::test]
    async fn test_ensure_stream_rejects_empty_subjects() {
        let catalog = MemoryCatalog::default();
        let result = ensure_stream(&catalog, &StreamOptions::new("GENBUS", vec![])).await;
        assert!(matches!(result, Err(Error::InvalidOptions(_))));
        assert_eq!(*catalog.create_calls.lock().unwrap(), 0);
    }
}
