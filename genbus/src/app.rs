use crate::config::{AppConfig, NatsOptions};
use genbus_core::{retry::RetryConfig, task::runner::Runner};
use genbus_http::{
    routes::{ApiState, ServiceInfo},
    server::HttpServerBuilder,
};
use genbus_inference::{
    backend::{self, Backend, BackendBuilder},
    caption::{Captioner, HttpCaptioner},
    generation::{Generator, HttpGenerator},
    prompt::{self, PromptBuilder},
};
use genbus_nats::{
    client::{ClientBuilder, ConnectionManager},
    jetstream::stream,
};
use genbus_worker::{
    chat::{ChatRecommender, ChatService},
    pipeline::PipelineWorker,
    reminder::ReminderService,
    request_reply::RequestReplyWorker,
};
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tracing::{error, info, warn, Instrument};

/// Errors that abort startup.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Failed to prepare prompt templates: {source}")]
    Prompt {
        #[source]
        source: prompt::Error,
    },
    #[error("Failed to configure {collaborator} backend: {source}")]
    Backend {
        collaborator: &'static str,
        #[source]
        source: backend::Error,
    },
    #[error("The {collaborator} model failed to load: {source}")]
    Load {
        collaborator: &'static str,
        #[source]
        source: backend::Error,
    },
    #[error(transparent)]
    Nats(#[from] genbus_nats::client::Error),
    #[error(transparent)]
    Stream(#[from] stream::Error),
}

/// Orchestrator that wires collaborators, the broker connection, the HTTP surface and every worker.
pub struct App {
    pub config: AppConfig,
}

impl App {
    /// Loads models, connects to NATS, provisions the stream and runs workers until shutdown.
    ///
    /// A model that fails to load or a broker that cannot be reached is fatal.
    /// Once running, a failing worker is logged and its siblings keep going.
    #[tracing::instrument(skip(self), name = "app")]
    pub async fn start(self) -> Result<(), Error> {
        let config = self.config;

        let mut prompts = PromptBuilder::new().map_err(|source| Error::Prompt { source })?;
        if let Some(dir) = &config.prompts.dir {
            info!("Loading prompt overrides from {:?}", dir);
            prompts = prompts
                .with_overrides(dir)
                .map_err(|source| Error::Prompt { source })?;
        }
        let prompts = Arc::new(prompts);

        let generation = &config.generation;
        let generator: Arc<dyn Generator> = Arc::new(HttpGenerator::new(
            build_backend(
                &generation.endpoint,
                generation.timeout_secs,
                generation.retry.as_ref(),
            )
            .map_err(|source| Error::Backend {
                collaborator: "generation",
                source,
            })?,
        ));
        let captioning = &config.captioning;
        let captioner: Arc<dyn Captioner> = Arc::new(
            HttpCaptioner::new(
                build_backend(
                    &captioning.endpoint,
                    captioning.timeout_secs,
                    captioning.retry.as_ref(),
                )
                .map_err(|source| Error::Backend {
                    collaborator: "captioning",
                    source,
                })?,
            )
            .max_new_tokens(captioning.max_new_tokens),
        );

        generator.load().await.map_err(|source| Error::Load {
            collaborator: "generation",
            source,
        })?;
        captioner.load().await.map_err(|source| Error::Load {
            collaborator: "captioning",
            source,
        })?;

        let manager = ConnectionManager::new(
            client_builder(&config.nats, &config.app.name),
            config.nats.retry.clone().unwrap_or_default(),
        );
        let connection = manager.connect().await?;

        if let Some(stream_options) = &config.nats.stream {
            stream::ensure_stream(connection.jetstream(), stream_options).await?;
        }

        let chat = ChatRecommender::new(Arc::clone(&generator), Arc::clone(&prompts));
        let mut handles = Vec::new();

        if config.http_server.enabled {
            let state = Arc::new(ApiState {
                info: service_info(&config),
                generator: Arc::clone(&generator),
                prompts: Arc::clone(&prompts),
                chat: chat.clone(),
            });
            let server = HttpServerBuilder::new(state)
                .routes_prefix(config.http_server.routes_prefix.clone())
                .port(config.http_server.port)
                .build();
            let span = tracing::Span::current();
            handles.push(tokio::spawn(
                async move {
                    if let Err(e) = server.start_server().await {
                        error!("Failed to start HTTP Server: {}", e);
                    }
                }
                .instrument(span),
            ));
        }

        let subjects = &config.subjects;
        handles.push(spawn_worker(RequestReplyWorker::new(
            "chat_recommendation",
            &subjects.chat_recommendation,
            Arc::new(ChatService::new(chat)),
            connection.clone(),
        )));
        handles.push(spawn_worker(RequestReplyWorker::new(
            "reminder_notification",
            &subjects.reminder_notification,
            Arc::new(ReminderService::new(
                Arc::clone(&generator),
                Arc::clone(&prompts),
            )),
            connection.clone(),
        )));
        handles.push(spawn_worker(PipelineWorker {
            name: "monthly_posts".to_string(),
            input_subject: subjects.monthly_posts_input.clone(),
            output_subject: subjects.monthly_posts_output.clone(),
            captioner,
            connection,
            concurrency: config.pipeline.concurrency,
            durable_output: config.pipeline.durable_output,
            durable_input: config.pipeline.durable_input.clone(),
        }));

        info!("{} started with {} background task(s)", config.app.name, handles.len());

        tokio::select! {
            results = futures_util::future::join_all(handles) => {
                for result in results {
                    if let Err(e) = result {
                        error!("Background task panicked: {}", e);
                    }
                }
                warn!("All background tasks stopped");
            }
            signal = tokio::signal::ctrl_c() => match signal {
                Ok(()) => info!("Shutdown signal received"),
                Err(e) => error!("Failed to listen for shutdown signal: {}", e),
            },
        }

        manager.drain().await?;
        Ok(())
    }
}

/// Runs `runner` on its own task; its outcome is logged and never propagated to siblings.
pub fn spawn_worker<R>(runner: R) -> JoinHandle<()>
where
    R: Runner + Send + 'static,
{
    let name = runner.name().to_string();
    let span = tracing::Span::current();
    tokio::spawn(
        async move {
            match runner.run().await {
                Ok(()) => info!("Worker {} stopped", name),
                Err(e) => error!("Worker {} failed: {}", name, e),
            }
        }
        .instrument(span),
    )
}

fn client_builder(options: &NatsOptions, name: &str) -> ClientBuilder {
    let mut builder = ClientBuilder::new()
        .servers([options.url.as_str()])
        .connect_timeout(Duration::from_secs(options.connect_timeout_secs))
        .reconnect_delay(Duration::from_secs(options.reconnect_delay_secs))
        .name(name.to_string());
    if let (Some(user), Some(password)) = (&options.user, &options.password) {
        builder = builder.user_and_password(user.clone(), password.clone());
    }
    if let Some(path) = &options.credentials_path {
        builder = builder.credentials_path(path.clone());
    }
    builder
}

fn build_backend(
    endpoint: &str,
    timeout_secs: u64,
    retry: Option<&RetryConfig>,
) -> Result<Backend, backend::Error> {
    let mut builder = BackendBuilder::new()
        .endpoint(endpoint)
        .timeout(Duration::from_secs(timeout_secs));
    if let Some(retry) = retry {
        builder = builder.retry(retry.clone());
    }
    builder.build()
}

fn service_info(config: &AppConfig) -> ServiceInfo {
    ServiceInfo {
        service: config.app.name.clone(),
        version: config.app.version.clone(),
        environment: config.app.environment.clone(),
    }
}
