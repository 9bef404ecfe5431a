use crate::{client::Connection, message::InboundMessage};
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, Instrument};

/// Errors that can occur while subscribing.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Failed to subscribe to NATS subject.
    #[error("Failed to subscribe to {subject}: {source}")]
    Subscribe {
        subject: String,
        #[source]
        source: async_nats::SubscribeError,
    },
}

/// Handler invoked once per inbound message.
///
/// An `Err` is logged by the dispatch loop and never ends the subscription.
#[async_trait::async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    type Error: std::fmt::Display + Send;
    async fn handle(&self, message: InboundMessage) -> Result<(), Self::Error>;
}

/// Feeds every message of `messages` to `handler` in arrival order.
///
/// Returns the number of messages dispatched once the stream ends.
pub async fn dispatch<S, H>(subject: &str, mut messages: S, handler: Arc<H>) -> usize
where
    S: Stream<Item = InboundMessage> + Unpin,
    H: MessageHandler,
{
    let mut dispatched = 0;
    while let Some(message) = messages.next().await {
        dispatched += 1;
        debug!("Received message on {}: {}", subject, message.payload_lossy());
        if let Err(err) = handler.handle(message).await {
            error!("Handler for {} failed: {}", subject, err);
        }
    }
    dispatched
}

/// Registers `handler` for every message on `subject` with at-most-once delivery.
///
/// Messages on this subject are handled one after another; each subscription
/// gets its own task, so different subjects are handled concurrently. The
/// returned handle resolves when the subscription is closed, e.g. by a drain.
pub async fn subscribe_plain<H: MessageHandler>(
    connection: &Connection,
    subject: &str,
    handler: Arc<H>,
) -> Result<JoinHandle<usize>, Error> {
    let subscriber = connection
        .client()
        .subscribe(subject.to_string())
        .await
        .map_err(|source| Error::Subscribe {
            subject: subject.to_string(),
            source,
        })?;
    info!("Subscribed to {}", subject);

    let subject = subject.to_string();
    let messages = subscriber.map(InboundMessage::from);
    Ok(tokio::spawn(
        async move {
            let dispatched = dispatch(&subject, messages, handler).await;
            info!(
                "Subscription to {} closed after {} messages",
                subject, dispatched
            );
            dispatched
        }
        .instrument(tracing::Span::current()),
    ))
}
