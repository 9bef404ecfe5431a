//! Configuration structures for the genbus process.
//!
//! Read from an optional file at `CONFIG_PATH` (TOML, JSON or YAML by
//! extension) and then from `GENBUS_*` environment variables, where `__`
//! separates nested keys, e.g. `GENBUS_NATS__URL` or `GENBUS_HTTP_SERVER__PORT`.
//! Every field has a default, so an empty configuration is valid.

use genbus_core::retry::RetryConfig;
use genbus_nats::{
    client::DEFAULT_NATS_URL,
    jetstream::config::{DurableOptions, StreamOptions},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Prefix of configuration environment variables.
pub const ENV_PREFIX: &str = "GENBUS";
/// Separator between nested keys in environment variable names.
pub const ENV_SEPARATOR: &str = "__";

/// Errors that can occur while loading configuration.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Failed to load configuration: {source}")]
    Load {
        #[source]
        source: ::config::ConfigError,
    },
}

/// Main application configuration.
#[derive(PartialEq, Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppOptions,
    pub nats: NatsOptions,
    pub subjects: SubjectOptions,
    pub generation: GenerationOptions,
    pub captioning: CaptioningOptions,
    pub prompts: PromptOptions,
    pub pipeline: PipelineOptions,
    pub http_server: HttpServerOptions,
}

impl AppConfig {
    /// Loads the file at `path`, if any, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        Self::load_with_env(path, None)
    }

    /// Like [`AppConfig::load`], reading overrides from `env` instead of the process environment.
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<::config::Map<String, String>>,
    ) -> Result<Self, Error> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path));
        }
        builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator(ENV_SEPARATOR)
                    .source(env),
            )
            .build()
            .and_then(|config| config.try_deserialize())
            .map_err(|source| Error::Load { source })
    }
}

/// Process identity reported by the health route.
#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct AppOptions {
    pub name: String,
    pub version: String,
    /// development, staging or production.
    pub environment: String,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            name: "AI Recommender System".to_string(),
            version: "0.1.0".to_string(),
            environment: "development".to_string(),
        }
    }
}

/// Broker connection options.
#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct NatsOptions {
    /// Server URL or comma-separated list of URLs.
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    /// JSON credentials file with `nkey`, `host`, `user` and `password`.
    pub credentials_path: Option<PathBuf>,
    pub connect_timeout_secs: u64,
    pub reconnect_delay_secs: u64,
    /// Retry policy of the initial connect.
    pub retry: Option<RetryConfig>,
    /// Stream provisioned at startup.
    pub stream: Option<StreamOptions>,
}

impl Default for NatsOptions {
    fn default() -> Self {
        Self {
            url: DEFAULT_NATS_URL.to_string(),
            user: None,
            password: None,
            credentials_path: None,
            connect_timeout_secs: 2,
            reconnect_delay_secs: 2,
            retry: None,
            stream: None,
        }
    }
}

#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SubjectOptions {
    pub chat_recommendation: String,
    pub reminder_notification: String,
    pub monthly_posts_input: String,
    pub monthly_posts_output: String,
}

impl Default for SubjectOptions {
    fn default() -> Self {
        Self {
            chat_recommendation: "chat.recommendation.request".to_string(),
            reminder_notification: "reminder.notification.request".to_string(),
            monthly_posts_input: "monthly.posts.blip".to_string(),
            monthly_posts_output: "monthly.posts.qwen".to_string(),
        }
    }
}

/// Text generation server.
#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct GenerationOptions {
    pub endpoint: String,
    pub timeout_secs: u64,
    /// Retry policy of the readiness probe.
    pub retry: Option<RetryConfig>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080".to_string(),
            timeout_secs: 120,
            retry: None,
        }
    }
}

/// Image captioning server.
#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct CaptioningOptions {
    pub endpoint: String,
    pub timeout_secs: u64,
    pub max_new_tokens: u32,
    pub retry: Option<RetryConfig>,
}

impl Default for CaptioningOptions {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8081".to_string(),
            timeout_secs: 60,
            max_new_tokens: genbus_inference::caption::DEFAULT_MAX_NEW_TOKENS,
            retry: None,
        }
    }
}

#[derive(PartialEq, Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PromptOptions {
    /// Directory of `*.hbs` files overriding the built-in prompt templates.
    pub dir: Option<PathBuf>,
}

/// Monthly posts pipeline stage.
#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineOptions {
    /// Items captioned at once within a batch; output order always follows input order.
    pub concurrency: usize,
    /// Publish enriched batches through JetStream and wait for the stream ack.
    pub durable_output: bool,
    /// Read batches through this durable consumer instead of a plain subscription.
    pub durable_input: Option<DurableOptions>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            concurrency: genbus_worker::pipeline::DEFAULT_CONCURRENCY,
            durable_output: false,
            durable_input: None,
        }
    }
}

#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpServerOptions {
    pub enabled: bool,
    pub port: u16,
    /// Prefix of the API routes; `/health` is always at the root.
    pub routes_prefix: String,
}

impl Default for HttpServerOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            port: genbus_http::server::DEFAULT_HTTP_PORT,
            routes_prefix: genbus_http::server::DEFAULT_ROUTES_PREFIX.to_string(),
        }
    }
}
