use bytes::Bytes;
use std::borrow::Cow;

/// A message received from the broker, independent of the subscription kind.
///
/// `reply` is the respond-to subject the sender attached for request-reply;
/// it is carried explicitly so handlers never reach for the raw broker message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub subject: String,
    pub payload: Bytes,
    pub reply: Option<String>,
}

impl InboundMessage {
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            payload: payload.into(),
            reply: None,
        }
    }

    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = Some(reply.into());
        self
    }

    /// Payload as text for logging; invalid UTF-8 is replaced.
    pub fn payload_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

impl From<async_nats::Message> for InboundMessage {
    fn from(message: async_nats::Message) -> Self {
        Self {
            subject: message.subject.to_string(),
            payload: message.payload,
            reply: message.reply.map(|reply| reply.to_string()),
        }
    }
}

impl From<&async_nats::jetstream::Message> for InboundMessage {
    fn from(message: &async_nats::jetstream::Message) -> Self {
        let inner: &async_nats::Message = message;
        inner.clone().into()
    }
}
