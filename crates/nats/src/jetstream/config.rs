use serde::{Deserialize, Serialize};

/// Default cap on the number of messages a stream retains.
pub const DEFAULT_MAX_MESSAGES: i64 = 10_000;

/// Stream provisioning options.
#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamOptions {
    /// Stream name.
    pub name: String,
    /// Optional stream description.
    pub description: Option<String>,
    /// Subject patterns the stream accepts (wildcards allowed).
    pub subjects: Vec<String>,
    /// Maximum number of messages in the stream before eviction.
    pub max_messages: i64,
    /// Retention policy for the stream.
    pub retention: RetentionPolicy,
    /// Discard policy for when stream limits are reached.
    pub discard: DiscardPolicy,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: None,
            subjects: Vec::new(),
            max_messages: DEFAULT_MAX_MESSAGES,
            retention: RetentionPolicy::default(),
            discard: DiscardPolicy::default(),
        }
    }
}

impl StreamOptions {
    pub fn new(name: impl Into<String>, subjects: Vec<String>) -> Self {
        Self {
            name: name.into(),
            subjects,
            ..Default::default()
        }
    }

    /// Broker stream configuration for these options.
    pub fn to_stream_config(&self) -> async_nats::jetstream::stream::Config {
        async_nats::jetstream::stream::Config {
            name: self.name.clone(),
            description: self.description.clone(),
            subjects: self.subjects.clone(),
            max_messages: self.max_messages,
            retention: self.retention.clone().into(),
            discard: self.discard.clone().into(),
            ..Default::default()
        }
    }
}

/// NATS JetStream retention policies.
#[derive(PartialEq, Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionPolicy {
    /// Limits retention based on stream limits (messages, bytes, age).
    #[default]
    Limits,
    /// Retains messages based on consumer interest.
    Interest,
    /// Retains messages until explicitly deleted.
    WorkQueue,
}

impl From<RetentionPolicy> for async_nats::jetstream::stream::RetentionPolicy {
    fn from(policy: RetentionPolicy) -> Self {
        match policy {
            RetentionPolicy::Limits => Self::Limits,
            RetentionPolicy::Interest => Self::Interest,
            RetentionPolicy::WorkQueue => Self::WorkQueue,
        }
    }
}

/// NATS JetStream discard policies.
#[derive(PartialEq, Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscardPolicy {
    /// Discard old messages when stream is full.
    #[default]
    Old,
    /// Discard new messages when stream is full.
    New,
}

impl From<DiscardPolicy> for async_nats::jetstream::stream::DiscardPolicy {
    fn from(policy: DiscardPolicy) -> Self {
        match policy {
            DiscardPolicy::Old => Self::Old,
            DiscardPolicy::New => Self::New,
        }
    }
}

/// Durable consumer settings.
#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct DurableOptions {
    /// Stream the consumer reads from.
    pub stream: String,
    /// Subject filter of the consumer.
    pub subject: String,
    /// Durable consumer name shared by every instance of a worker.
    pub durable_name: String,
    /// Seconds the broker waits for an ack before redelivering.
    pub ack_wait_secs: u64,
    /// Maximum deliveries per message, `-1` for unlimited.
    pub max_deliver: i64,
}

impl Default for DurableOptions {
    fn default() -> Self {
        Self {
            stream: String::new(),
            subject: String::new(),
            durable_name: String::new(),
            ack_wait_secs: 30,
            max_deliver: -1,
        }
    }
}
