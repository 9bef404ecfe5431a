use crate::client::Connection;
use bytes::Bytes;
use tracing::debug;

/// Serializable representation of a NATS JetStream publish acknowledgment.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PublishAck {
    pub stream: String,
    pub sequence: u64,
    pub domain: Option<String>,
    pub duplicate: bool,
}

impl From<async_nats::jetstream::publish::PublishAck> for PublishAck {
    fn from(ack: async_nats::jetstream::publish::PublishAck) -> Self {
        Self {
            stream: ack.stream,
            sequence: ack.sequence,
            domain: Some(ack.domain).filter(|domain| !domain.is_empty()),
            duplicate: ack.duplicate,
        }
    }
}

/// Errors that can occur during publishing.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Failed to hand a core NATS message to the connection.
    #[error("Failed to publish message to {subject}: {source}")]
    Publish {
        subject: String,
        #[source]
        source: async_nats::PublishError,
    },
    /// JetStream rejected the message or never acknowledged it.
    #[error("Failed to publish message to JetStream subject {subject}: {source}")]
    DurablePublish {
        subject: String,
        #[source]
        source: async_nats::jetstream::context::PublishError,
    },
}

/// Fire-and-forget publishing of raw payloads.
///
/// Workers publish replies and pipeline output through this trait so the
/// handlers can be exercised without a broker.
#[async_trait::async_trait]
pub trait Publish: Send + Sync {
    async fn publish(&self, subject: String, payload: Bytes) -> Result<(), Error>;
}

#[async_trait::async_trait]
impl Publish for Connection {
    async fn publish(&self, subject: String, payload: Bytes) -> Result<(), Error> {
        self.client()
            .publish(subject.clone(), payload)
            .await
            .map_err(|source| Error::Publish {
                subject: subject.clone(),
                source,
            })?;
        debug!("Published to {}", subject);
        Ok(())
    }
}

/// Publishing that returns only once the stream has persisted the message.
#[async_trait::async_trait]
pub trait PublishDurable: Send + Sync {
    async fn publish_durable(&self, subject: String, payload: Bytes) -> Result<PublishAck, Error>;
}

#[async_trait::async_trait]
impl PublishDurable for Connection {
    async fn publish_durable(&self, subject: String, payload: Bytes) -> Result<PublishAck, Error> {
        let durable_error = |source| Error::DurablePublish {
            subject: subject.clone(),
            source,
        };

        let ack = self
            .jetstream()
            .publish(subject.clone(), payload)
            .await
            .map_err(durable_error)?
            .await
            .map_err(durable_error)?;

        debug!(
            "Published to JetStream {} (stream={}, sequence={})",
            subject, ack.stream, ack.sequence
        );
        Ok(ack.into())
    }
}
