use bytes::Bytes;
use futures::StreamExt;
use genbus_core::task::runner::Runner;
use genbus_inference::{backend, caption::Captioner};
use genbus_nats::{
    client::Connection,
    jetstream::{self, config::DurableOptions},
    message::InboundMessage,
    publisher::{self, Publish, PublishDurable},
    subscriber::{self, MessageHandler},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{path::Path, sync::Arc};
use tracing::{error, info, warn, Instrument};

/// Default number of items captioned at once within a batch.
pub const DEFAULT_CONCURRENCY: usize = 1;

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Failed to decode batch on {subject}: {source}")]
    Decode {
        subject: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to serialize batch with error: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Publish(#[from] publisher::Error),
    #[error(transparent)]
    Subscribe(#[from] subscriber::Error),
    #[error(transparent)]
    DurableSubscribe(#[from] jetstream::subscriber::Error),
    #[error("Captioning service failed to load: {source}")]
    Load {
        #[source]
        source: backend::Error,
    },
    #[error("Batch task failed: {source}")]
    Join {
        #[source]
        source: tokio::task::JoinError,
    },
}

/// An incoming post; fields other than `image_path` pass through untouched.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct InputPost {
    #[serde(rename = "_id", default)]
    pub id: Value,
    #[serde(default)]
    pub image_path: Value,
    #[serde(default)]
    pub caption: Value,
    #[serde(default)]
    pub emotion: Value,
    #[serde(rename = "emotionScore", default)]
    pub emotion_score: Value,
    #[serde(rename = "qualityScore", default)]
    pub quality_score: Value,
}

impl InputPost {
    fn image_path(&self) -> Option<&str> {
        self.image_path.as_str().filter(|path| !path.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct InputBatch {
    #[serde(default)]
    pub month: Value,
    #[serde(default)]
    pub posts: Vec<InputPost>,
}

/// A post enriched with its scene caption.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedPost {
    #[serde(rename = "_id")]
    pub id: Value,
    pub caption: Value,
    /// `None` when captioning failed for this item.
    pub image_blip_caption: Option<String>,
    pub emotion: Value,
    #[serde(rename = "emotionScore")]
    pub emotion_score: Value,
    #[serde(rename = "qualityScore")]
    pub quality_score: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedBatch {
    pub month: Value,
    pub posts: Vec<EnrichedPost>,
}

/// Captions every post that references an image, keeping input order.
///
/// Posts without an image are left out. A post whose captioning fails is kept
/// with a null caption.
pub async fn enrich_batch(
    captioner: &dyn Captioner,
    batch: InputBatch,
    concurrency: usize,
) -> EnrichedBatch {
    let captionable = batch.posts.into_iter().filter(|post| {
        let has_image = post.image_path().is_some();
        if !has_image {
            warn!("Post {} has no image_path, skipping", post.id);
        }
        has_image
    });

    let posts: Vec<EnrichedPost> = futures::stream::iter(captionable)
        .map(|post| async move {
            let path = post.image_path().unwrap_or_default().to_string();
            let image_blip_caption = match captioner.caption(Path::new(&path)).await {
                Ok(caption) => Some(caption),
                Err(err) => {
                    error!("Failed to caption post {}: {}", post.id, err);
                    None
                }
            };
            EnrichedPost {
                id: post.id,
                caption: post.caption,
                image_blip_caption,
                emotion: post.emotion,
                emotion_score: post.emotion_score,
                quality_score: post.quality_score,
            }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    EnrichedBatch {
        month: batch.month,
        posts,
    }
}

/// Where enriched batches go.
#[derive(Clone)]
pub enum Output {
    /// Core publish, no persistence guarantee.
    Plain(Arc<dyn Publish>),
    /// JetStream publish, returns once the stream stored the batch.
    Durable(Arc<dyn PublishDurable>),
}

impl Output {
    async fn send(&self, subject: String, payload: Bytes) -> Result<(), publisher::Error> {
        match self {
            Output::Plain(publisher) => publisher.publish(subject, payload).await,
            Output::Durable(publisher) => {
                let ack = publisher.publish_durable(subject, payload).await?;
                info!("Batch stored in {} at sequence {}", ack.stream, ack.sequence);
                Ok(())
            }
        }
    }
}

/// Handles one batch per message and forwards the result downstream.
pub struct BatchHandler {
    captioner: Arc<dyn Captioner>,
    output: Output,
    output_subject: String,
    concurrency: usize,
}

impl BatchHandler {
    pub fn new(
        captioner: Arc<dyn Captioner>,
        output: Output,
        output_subject: impl Into<String>,
        concurrency: usize,
    ) -> Self {
        Self {
            captioner,
            output,
            output_subject: output_subject.into(),
            concurrency,
        }
    }
}

#[async_trait::async_trait]
impl MessageHandler for BatchHandler {
    type Error = Error;

    async fn handle(&self, message: InboundMessage) -> Result<(), Error> {
        let batch: InputBatch =
            serde_json::from_slice(&message.payload).map_err(|source| Error::Decode {
                subject: message.subject.clone(),
                source,
            })?;
        info!("Received {} posts for captioning", batch.posts.len());

        // Captioning runs in its own task, away from the subscription loop.
        let captioner = Arc::clone(&self.captioner);
        let concurrency = self.concurrency;
        let enriched = tokio::spawn(
            async move { enrich_batch(captioner.as_ref(), batch, concurrency).await }
                .instrument(tracing::Span::current()),
        )
        .await
        .map_err(|source| Error::Join { source })?;

        let count = enriched.posts.len();
        let payload = serde_json::to_vec(&enriched).map_err(|source| Error::Serialize { source })?;
        self.output
            .send(self.output_subject.clone(), Bytes::from(payload))
            .await?;
        info!("Published {} posts to {}", count, self.output_subject);
        Ok(())
    }
}

/// Long-running pipeline stage from the input subject to the output subject.
pub struct PipelineWorker {
    pub name: String,
    pub input_subject: String,
    pub output_subject: String,
    pub captioner: Arc<dyn Captioner>,
    pub connection: Connection,
    pub concurrency: usize,
    pub durable_output: bool,
    /// Consume the input through this durable consumer instead of a plain subscription.
    pub durable_input: Option<DurableOptions>,
}

impl Runner for PipelineWorker {
    type Error = Error;

    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(skip(self), fields(worker = %self.name, subject = %self.input_subject))]
    async fn run(self) -> Result<(), Error> {
        info!("Starting {} worker", self.name);
        self.captioner
            .load()
            .await
            .map_err(|source| Error::Load { source })?;

        let connection = Arc::new(self.connection.clone());
        let output = if self.durable_output {
            Output::Durable(connection)
        } else {
            Output::Plain(connection)
        };
        let handler = Arc::new(BatchHandler::new(
            self.captioner,
            output,
            self.output_subject.clone(),
            self.concurrency,
        ));

        let subscription = match self.durable_input {
            Some(options) => {
                let options = DurableOptions {
                    subject: self.input_subject.clone(),
                    ..options
                };
                jetstream::subscriber::subscribe_durable(&self.connection, &options, handler)
                    .await?
            }
            None => {
                subscriber::subscribe_plain(&self.connection, &self.input_subject, handler).await?
            }
        };
        info!(
            "{} worker forwarding {} to {}",
            self.name, self.input_subject, self.output_subject
        );

        let handled = subscription.await.map_err(|source| Error::Join { source })?;
        info!("{} worker stopped after {} batches", self.name, handled);
        Ok(())
    }
}
