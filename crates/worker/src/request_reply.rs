use crate::envelope::{ErrorKind, Reply, ReplyError};
use bytes::Bytes;
use genbus_core::task::runner::Runner;
use genbus_inference::backend;
use genbus_nats::{
    client::Connection,
    message::InboundMessage,
    publisher::{self, Publish},
    subscriber::{self, MessageHandler},
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::{sync::Arc, time::Instant};
use tracing::{error, info, warn};

/// Errors that can occur while serving requests.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Request on {subject} has no reply subject")]
    MissingReply { subject: String },
    #[error(transparent)]
    Publish(#[from] publisher::Error),
    #[error("Failed to serialize reply with error: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Subscribe(#[from] subscriber::Error),
    #[error("Collaborator failed to load: {source}")]
    Load {
        #[source]
        source: backend::Error,
    },
    #[error("Subscription task failed: {source}")]
    Join {
        #[source]
        source: tokio::task::JoinError,
    },
}

/// One request-reply pattern: a typed request, its validation and its processing.
#[async_trait::async_trait]
pub trait Service: Send + Sync + 'static {
    type Request: Send + 'static;
    type Body: Serialize + Send + 'static;

    /// Readiness gate for the collaborators the service calls.
    async fn load(&self) -> Result<(), backend::Error>;

    /// Reads the request fields. Runs before any collaborator call.
    fn validate(&self, fields: &Map<String, Value>) -> Result<Self::Request, ReplyError>;

    async fn process(&self, request: Self::Request) -> Result<Self::Body, ReplyError>;
}

/// Decodes, validates and processes one request payload into its reply.
///
/// Latency covers `process` only.
pub async fn respond<S: Service + ?Sized>(service: &S, payload: &[u8]) -> Reply<S::Body> {
    let fields = match serde_json::from_slice::<Value>(payload) {
        Ok(Value::Object(fields)) => fields,
        Ok(other) => {
            warn!("Request payload is not a JSON object: {}", other);
            return Reply::failure(&ReplyError::invalid_json("payload is not an object"));
        }
        Err(err) => {
            warn!("Invalid JSON received: {}", err);
            return Reply::failure(&ReplyError::invalid_json(err));
        }
    };
    let request_id = fields.get("request_id").filter(|id| !id.is_null()).cloned();

    let request = match service.validate(&fields) {
        Ok(request) => request,
        Err(err) => {
            warn!("Rejected request {:?}: {}", request_id, err);
            return Reply::failure(&err);
        }
    };

    let started = Instant::now();
    match service.process(request).await {
        Ok(body) => {
            let reply = Reply::success(request_id, started.elapsed(), body);
            if let Reply::Success {
                request_id,
                latency_sec,
                ..
            } = &reply
            {
                info!("Request {:?} processed in {}s", request_id, latency_sec);
            }
            reply
        }
        Err(err) => {
            match err.kind {
                ErrorKind::Internal => error!("Request {:?} failed: {}", request_id, err),
                _ => warn!("Request {:?} failed: {}", request_id, err),
            }
            Reply::failure(&err)
        }
    }
}

/// Answers each request on its reply subject.
pub struct ReplyHandler<S> {
    service: Arc<S>,
    publisher: Arc<dyn Publish>,
}

impl<S: Service> ReplyHandler<S> {
    pub fn new(service: Arc<S>, publisher: Arc<dyn Publish>) -> Self {
        Self { service, publisher }
    }
}

#[async_trait::async_trait]
impl<S: Service> MessageHandler for ReplyHandler<S> {
    type Error = Error;

    async fn handle(&self, message: InboundMessage) -> Result<(), Error> {
        let InboundMessage {
            subject,
            payload,
            reply,
        } = message;
        let reply_to = reply.ok_or_else(|| Error::MissingReply {
            subject: subject.clone(),
        })?;

        // A panic while processing still produces a reply.
        let service = Arc::clone(&self.service);
        let reply = match tokio::spawn(async move { respond(service.as_ref(), &payload).await }).await
        {
            Ok(reply) => reply,
            Err(err) => {
                error!("Request handler on {} aborted: {}", subject, err);
                Reply::failure(&ReplyError::internal(err))
            }
        };

        let payload = serde_json::to_vec(&reply).map_err(|source| Error::Serialize { source })?;
        self.publisher
            .publish(reply_to.clone(), Bytes::from(payload))
            .await?;
        info!("Replied on {} to request from {}", reply_to, subject);
        Ok(())
    }
}

/// Long-running worker that binds a [`Service`] to a plain subscription.
pub struct RequestReplyWorker<S> {
    name: String,
    subject: String,
    service: Arc<S>,
    connection: Connection,
}

impl<S: Service> RequestReplyWorker<S> {
    pub fn new(
        name: impl Into<String>,
        subject: impl Into<String>,
        service: Arc<S>,
        connection: Connection,
    ) -> Self {
        Self {
            name: name.into(),
            subject: subject.into(),
            service,
            connection,
        }
    }
}

impl<S: Service> Runner for RequestReplyWorker<S> {
    type Error = Error;

    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(skip(self), fields(worker = %self.name, subject = %self.subject))]
    async fn run(self) -> Result<(), Error> {
        info!("Starting {} worker", self.name);
        self.service
            .load()
            .await
            .map_err(|source| Error::Load { source })?;

        let handler = Arc::new(ReplyHandler::new(
            Arc::clone(&self.service),
            Arc::new(self.connection.clone()),
        ));
        let subscription =
            subscriber::subscribe_plain(&self.connection, &self.subject, handler).await?;
        info!("{} worker listening on subject: {}", self.name, self.subject);

        let handled = subscription.await.map_err(|source| Error::Join { source })?;
        info!("{} worker stopped after {} requests", self.name, handled);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    /// Publisher that records every message instead of sending it.
    #[derive(Default)]
    pub(crate) struct RecordingPublisher {
        pub(crate) sent: Mutex<Vec<(String, Value)>>,
    }

    impl RecordingPublisher {
        pub(crate) fn sent(&self) -> Vec<(String, Value)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Publish for RecordingPublisher {
        async fn publish(&self, subject: String, payload: Bytes) -> Result<(), publisher::Error> {
            let value = serde_json::from_slice(&payload).unwrap();
            self.sent.lock().unwrap().push((subject, value));
            Ok(())
        }
    }

    #[derive(Serialize)]
    struct Echo {
        echo: String,
    }

    #[derive(Default)]
    struct EchoService {
        processed: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Service for EchoService {
        type Request = String;
        type Body = Echo;

        async fn load(&self) -> Result<(), backend::Error> {
            Ok(())
        }

        fn validate(&self, fields: &Map<String, Value>) -> Result<String, ReplyError> {
            match fields.get("text") {
                Some(Value::String(text)) => Ok(text.clone()),
                Some(_) => Err(ReplyError::validation("`text` must be a string")),
                None => Err(ReplyError::validation("missing_required_fields")),
            }
        }

        async fn process(&self, text: String) -> Result<Echo, ReplyError> {
            self.processed.fetch_add(1, Ordering::SeqCst);
            match text.as_str() {
                "fail" => Err(ReplyError::internal("collaborator exploded")),
                "panic" => panic!("processing panicked"),
                _ => Ok(Echo { echo: text }),
            }
        }
    }

    async fn reply_value(service: &EchoService, payload: &str) -> Value {
        serde_json::to_value(respond(service, payload.as_bytes()).await).unwrap()
    }

    #[tokio::test]
    async fn test_invalid_json_skips_processing() {
        let service = EchoService::default();
        for payload in ["not json", "{\"text\": ", "[1, 2]", "\"text\""] {
            assert_eq!(
                reply_value(&service, payload).await,
                serde_json::json!({"error": "invalid_json"})
            );
        }
        assert_eq!(service.processed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_validation_failure_skips_processing() {
        let service = EchoService::default();
        assert_eq!(
            reply_value(&service, r#"{"request_id": "r1"}"#).await,
            serde_json::json!({"error": "missing_required_fields"})
        );
        assert_eq!(
            reply_value(&service, r#"{"text": 3}"#).await,
            serde_json::json!({"error": "`text` must be a string"})
        );
        assert_eq!(service.processed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_success_echoes_request_id() {
        let service = EchoService::default();
        let reply = reply_value(&service, r#"{"request_id": 7, "text": "hello"}"#).await;
        assert_eq!(reply["request_id"], 7);
        assert_eq!(reply["echo"], "hello");
        assert!(reply["latency_sec"].is_f64());
        assert!(reply.get("error").is_none());
    }

    #[tokio::test]
    async fn test_processing_failure_is_internal_error() {
        let service = EchoService::default();
        assert_eq!(
            reply_value(&service, r#"{"request_id": "r2", "text": "fail"}"#).await,
            serde_json::json!({"error": "internal_error"})
        );
    }

    #[tokio::test]
    async fn test_handler_replies_on_reply_subject() {
        let publisher = Arc::new(RecordingPublisher::default());
        let handler = ReplyHandler::new(Arc::new(EchoService::default()), publisher.clone());

        handler
            .handle(
                InboundMessage::new("echo.request", r#"{"text": "hi"}"#).with_reply("_INBOX.1"),
            )
            .await
            .unwrap();

        let sent = publisher.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "_INBOX.1");
        assert_eq!(sent[0].1["echo"], "hi");
    }

    #[tokio::test]
    async fn test_handler_replies_when_processing_panics() {
        let publisher = Arc::new(RecordingPublisher::default());
        let handler = ReplyHandler::new(Arc::new(EchoService::default()), publisher.clone());

        handler
            .handle(
                InboundMessage::new("echo.request", r#"{"text": "panic"}"#).with_reply("_INBOX.2"),
            )
            .await
            .unwrap();

        assert_eq!(
            publisher.sent(),
            vec![("_INBOX.2".to_string(), serde_json::json!({"error": "internal_error"}))]
        );
    }

    #[tokio::test]
    async fn test_handler_without_reply_subject() {
        let publisher = Arc::new(RecordingPublisher::default());
        let service = Arc::new(EchoService::default());
        let handler = ReplyHandler::new(service.clone(), publisher.clone());

        let err = handler
            .handle(InboundMessage::new("echo.request", r#"{"text": "hi"}"#))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::MissingReply { subject } if subject == "echo.request"));
        assert!(publisher.sent().is_empty());
        assert_eq!(service.processed.load(Ordering::SeqCst), 0);
    }
}
