use super::config::DurableOptions;
use crate::{client::Connection, message::InboundMessage, subscriber::MessageHandler};
use async_nats::jetstream::{self, consumer::pull};
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn, Instrument};

/// Errors that can occur during NATS JetStream subscription operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// JetStream consumer operation error.
    #[error(transparent)]
    Consumer(#[from] async_nats::jetstream::stream::ConsumerError),
    /// JetStream consumer stream error.
    #[error(transparent)]
    ConsumerStream(#[from] async_nats::jetstream::consumer::StreamError),
    /// Failed to get JetStream stream.
    #[error(transparent)]
    GetStream(#[from] async_nats::jetstream::context::GetStreamError),
    /// Failed to retrieve consumer configuration information.
    #[error("Consumer configuration check failed: {0}")]
    ConsumerInfo(#[source] async_nats::jetstream::context::ConsumerInfoError),
    /// Consumer exists with conflicting filter subject configuration.
    #[error("Consumer '{consumer}' exists with different filter subject '{existing}', expected '{expected}'. Please delete the existing consumer or use a different durable name")]
    ConsumerFilterMismatch {
        consumer: String,
        existing: String,
        expected: String,
    },
    /// The broker did not accept the acknowledgment.
    #[error("Failed to acknowledge message: {0}")]
    Ack(#[source] async_nats::Error),
}

/// Explicit acknowledgment of one delivered message.
#[async_trait::async_trait]
pub trait Acknowledge: Send + Sync {
    async fn ack(&self) -> Result<(), Error>;
}

#[async_trait::async_trait]
impl Acknowledge for jetstream::Message {
    async fn ack(&self) -> Result<(), Error> {
        jetstream::Message::ack(self)
            .await
            .map_err(Error::Ack)
    }
}

/// What happened to a single durable delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Handler succeeded and the broker removed the message from the pending set.
    Acked,
    /// Handler failed; the message stays pending and the broker will redeliver it.
    Unacked(String),
    /// Handler succeeded but the ack was lost; the broker may redeliver it.
    AckFailed(String),
}

/// Runs `handler` for one durable delivery and acknowledges it only on success.
pub async fn deliver<H, A>(handler: &H, message: InboundMessage, acker: &A) -> Delivery
where
    H: MessageHandler + ?Sized,
    A: Acknowledge + ?Sized,
{
    let subject = message.subject.clone();
    if let Err(err) = handler.handle(message).await {
        error!(
            "Durable handler for {} failed, leaving message unacknowledged: {}",
            subject, err
        );
        return Delivery::Unacked(err.to_string());
    }

    match acker.ack().await {
        Ok(()) => {
            debug!("Message on {} acknowledged", subject);
            Delivery::Acked
        }
        Err(err) => {
            warn!("Ack for message on {} failed: {}", subject, err);
            Delivery::AckFailed(err.to_string())
        }
    }
}

/// Registers `handler` under a named durable consumer with at-least-once delivery.
///
/// The consumer is created on first use and reused afterwards; an existing
/// consumer with a different filter subject is rejected. Failed messages are
/// left unacknowledged and redelivered by the broker after `ack_wait_secs`.
pub async fn subscribe_durable<H: MessageHandler>(
    connection: &Connection,
    options: &DurableOptions,
    handler: Arc<H>,
) -> Result<JoinHandle<usize>, Error> {
    let stream = connection.jetstream().get_stream(&options.stream).await?;

    let consumer: jetstream::consumer::Consumer<pull::Config> =
        match stream.get_consumer(&options.durable_name).await {
            Ok(mut existing_consumer) => {
                let current_filter = existing_consumer
                    .info()
                    .await
                    .map_err(Error::ConsumerInfo)?
                    .config
                    .filter_subject
                    .clone();

                if current_filter != options.subject {
                    return Err(Error::ConsumerFilterMismatch {
                        consumer: options.durable_name.clone(),
                        existing: current_filter,
                        expected: options.subject.clone(),
                    });
                }
                existing_consumer
            }
            Err(_) => {
                stream
                    .create_consumer(pull::Config {
                        durable_name: Some(options.durable_name.clone()),
                        filter_subject: options.subject.clone(),
                        ack_policy: jetstream::consumer::AckPolicy::Explicit,
                        ack_wait: Duration::from_secs(options.ack_wait_secs),
                        max_deliver: options.max_deliver,
                        ..Default::default()
                    })
                    .await?
            }
        };

    let mut messages = consumer.messages().await?;
    info!(
        "Subscribed to {} | durable={}",
        options.subject, options.durable_name
    );

    let subject = options.subject.clone();
    Ok(tokio::spawn(
        async move {
            let mut delivered = 0;
            while let Some(next) = messages.next().await {
                match next {
                    Ok(message) => {
                        delivered += 1;
                        let inbound = InboundMessage::from(&message);
                        debug!("Received durable message on {}: {}", subject, inbound.payload_lossy());
                        deliver(handler.as_ref(), inbound, &message).await;
                    }
                    Err(err) => warn!("Durable consumer on {} reported: {}", subject, err),
                }
            }
            info!("Durable subscription to {} closed", subject);
            delivered
        }
        .instrument(tracing::Span::current()),
    ))
}
