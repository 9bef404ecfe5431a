use genbus_core::{client::Client as _, retry::RetryConfig};
use std::fs;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Default NATS Server address.
pub const DEFAULT_NATS_URL: &str = "nats://localhost:4222";

/// Default time allowed for the initial TCP and handshake exchange.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Default delay between reconnect attempts once connected.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Used to store NATS Client credentials.
#[derive(serde::Deserialize, Debug, Default)]
struct Credentials {
    /// nKey seed string.
    nkey: Option<String>,
    /// Optional host value, overrides the configured servers.
    host: Option<String>,
    /// Optional user name for user/password authentication.
    user: Option<String>,
    /// Optional password for user/password authentication.
    password: Option<String>,
}

/// Errors that can occur during NATS client operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Failed to open or read the credentials file.
    #[error("Failed to read credentials file at {path}: {source}")]
    OpenFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Failed to parse credentials JSON file.
    #[error(transparent)]
    ParseCredentials(#[from] serde_json::Error),
    /// A configured server address could not be parsed.
    #[error("Invalid server address {addr}: {source}")]
    ServerAddr {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    /// Failed to establish connection to server.
    #[error(transparent)]
    Connect(#[from] async_nats::ConnectError),
    /// Failed to drain the connection on shutdown.
    #[error("Failed to drain NATS connection: {0}")]
    Drain(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// Client connected but no connection handle was produced.
    #[error("Client is missing or not initialized properly")]
    MissingConnection(),
    /// A connect attempt failed; every caller waiting on it shares the error.
    #[error(transparent)]
    Shared(Arc<Error>),
}

/// Authentication method resolved from configuration and credentials file.
#[derive(Clone, Debug, PartialEq)]
enum Auth {
    None,
    UserPassword { user: String, password: String },
    NKey(String),
}

/// A live broker connection plus its derived JetStream context.
///
/// Cloning is cheap and every clone refers to the same underlying connection.
#[derive(Clone)]
pub struct Connection {
    client: async_nats::Client,
    jetstream: async_nats::jetstream::Context,
}

impl Connection {
    fn new(client: async_nats::Client) -> Self {
        let jetstream = async_nats::jetstream::new(client.clone());
        Self { client, jetstream }
    }

    /// Core NATS client for plain publish/subscribe.
    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }

    /// JetStream context for streams and durable consumers.
    pub fn jetstream(&self) -> &async_nats::jetstream::Context {
        &self.jetstream
    }

    /// Whether the underlying connection is currently connected.
    pub fn is_connected(&self) -> bool {
        self.client.connection_state() == async_nats::connection::State::Connected
    }
}

/// NATS client that performs exactly one physical connect.
#[derive(Clone, Debug)]
pub struct Client {
    servers: Vec<async_nats::ServerAddr>,
    auth: Auth,
    connect_timeout: Duration,
    reconnect_delay: Duration,
    name: Option<String>,
    /// Established connection, `None` until `connect` succeeds.
    pub connection: Option<Connection>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.client.connection_state())
            .finish()
    }
}

impl genbus_core::client::Client for Client {
    type Error = Error;

    /// Connect to the NATS Server with provided options.
    async fn connect(mut self) -> Result<Self, Error> {
        let reconnect_delay = self.reconnect_delay;
        let mut connect_options = match &self.auth {
            Auth::NKey(seed) => async_nats::ConnectOptions::with_nkey(seed.clone()),
            Auth::UserPassword { user, password } => {
                async_nats::ConnectOptions::with_user_and_password(user.clone(), password.clone())
            }
            Auth::None => async_nats::ConnectOptions::new(),
        }
        .connection_timeout(self.connect_timeout)
        .reconnect_delay_callback(move |_| reconnect_delay);

        if let Some(name) = &self.name {
            connect_options = connect_options.name(name);
        }

        let nats_client = connect_options.connect(self.servers.as_slice()).await?;

        self.connection = Some(Connection::new(nats_client));
        Ok(self)
    }
}

/// Builder for configuring and creating NATS clients.
#[derive(Clone, Debug, Default)]
pub struct ClientBuilder {
    servers: Vec<String>,
    user: Option<String>,
    password: Option<String>,
    credentials_path: Option<PathBuf>,
    connect_timeout: Option<Duration>,
    reconnect_delay: Option<Duration>,
    name: Option<String>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        ClientBuilder::default()
    }

    /// Server URLs; a single comma separated string is split into several servers.
    pub fn servers<I, S>(mut self, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.servers = servers
            .into_iter()
            .flat_map(|s| {
                s.as_ref()
                    .split(',')
                    .map(|part| part.trim().to_string())
                    .collect::<Vec<_>>()
            })
            .filter(|s| !s.is_empty())
            .collect();
        self
    }

    pub fn user_and_password(mut self, user: String, password: String) -> Self {
        self.user = Some(user);
        self.password = Some(password);
        self
    }

    /// Pass credentials file as path to the file.
    pub fn credentials_path(mut self, credentials_path: PathBuf) -> Self {
        self.credentials_path = Some(credentials_path);
        self
    }

    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = Some(connect_timeout);
        self
    }

    pub fn reconnect_delay(mut self, reconnect_delay: Duration) -> Self {
        self.reconnect_delay = Some(reconnect_delay);
        self
    }

    /// Connection name reported to the server.
    pub fn name(mut self, name: String) -> Self {
        self.name = Some(name);
        self
    }

    /// Generates a new NATS Client or returns an error when addresses or credentials are invalid.
    pub fn build(&self) -> Result<Client, Error> {
        let credentials = match &self.credentials_path {
            Some(path) => {
                let contents = fs::read_to_string(path).map_err(|source| Error::OpenFile {
                    path: path.clone(),
                    source,
                })?;
                serde_json::from_str::<Credentials>(&contents)?
            }
            None => Credentials::default(),
        };

        let servers = match credentials.host {
            Some(host) => vec![host],
            None if self.servers.is_empty() => vec![DEFAULT_NATS_URL.to_string()],
            None => self.servers.clone(),
        };

        let servers = servers
            .into_iter()
            .map(|addr| {
                addr.parse::<async_nats::ServerAddr>()
                    .map_err(|source| Error::ServerAddr { addr, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let user = credentials.user.or_else(|| self.user.clone());
        let password = credentials.password.or_else(|| self.password.clone());
        let auth = match (credentials.nkey, user, password) {
            (Some(seed), _, _) => Auth::NKey(seed),
            (None, Some(user), Some(password)) => Auth::UserPassword { user, password },
            _ => Auth::None,
        };

        Ok(Client {
            servers,
            auth,
            connect_timeout: self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            reconnect_delay: self.reconnect_delay.unwrap_or(DEFAULT_RECONNECT_DELAY),
            name: self.name.clone(),
            connection: None,
        })
    }
}

/// Mutually exclusive slot holding at most one live value.
///
/// Concurrent callers serialize on the slot's lock, so at most one `connect`
/// future runs at a time. A caller that waited while an attempt ran observes
/// that attempt's outcome: the value it produced or the error it failed with.
#[derive(Debug)]
pub(crate) struct SharedSlot<T, E> {
    inner: Mutex<SlotState<T, E>>,
    /// Finished connect attempts, bumped under the lock.
    attempts: AtomicU64,
}

#[derive(Debug)]
struct SlotState<T, E> {
    value: Option<T>,
    last_failure: Option<Arc<E>>,
}

/// How a value was obtained from a [`SharedSlot`].
#[derive(Debug, PartialEq)]
pub(crate) enum Acquired<T> {
    Reused(T),
    Created(T),
}

impl<T> Acquired<T> {
    pub(crate) fn into_inner(self) -> T {
        match self {
            Acquired::Reused(value) | Acquired::Created(value) => value,
        }
    }
}

impl<T: Clone, E> SharedSlot<T, E> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(SlotState {
                value: None,
                last_failure: None,
            }),
            attempts: AtomicU64::new(0),
        }
    }

    /// Returns the stored value when `is_live` accepts it, otherwise replaces it with `connect()`.
    ///
    /// When an attempt failed while this caller was waiting for the lock, its
    /// error is returned instead of starting another attempt.
    pub(crate) async fn get_or_try_connect<F, Fut>(
        &self,
        is_live: impl Fn(&T) -> bool,
        connect: F,
    ) -> Result<Acquired<T>, Arc<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let seen = self.attempts.load(Ordering::SeqCst);
        let mut state = self.inner.lock().await;
        if let Some(existing) = state.value.as_ref() {
            if is_live(existing) {
                return Ok(Acquired::Reused(existing.clone()));
            }
        }
        if self.attempts.load(Ordering::SeqCst) != seen {
            if let Some(failure) = &state.last_failure {
                return Err(Arc::clone(failure));
            }
        }

        let result = connect().await;
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match result {
            Ok(value) => {
                state.value = Some(value.clone());
                state.last_failure = None;
                Ok(Acquired::Created(value))
            }
            Err(err) => {
                let err = Arc::new(err);
                state.value = None;
                state.last_failure = Some(Arc::clone(&err));
                Err(err)
            }
        }
    }

    /// Removes the stored value so the next caller connects afresh.
    pub(crate) async fn take(&self) -> Option<T> {
        self.inner.lock().await.value.take()
    }
}

/// Owner of the single process-wide broker connection.
///
/// Created once at startup and handed to every worker by `Arc`; `connect` is
/// idempotent and `drain` tears the connection down at shutdown.
#[derive(Debug)]
pub struct ConnectionManager {
    builder: ClientBuilder,
    retry: RetryConfig,
    slot: SharedSlot<Connection, Error>,
}

impl ConnectionManager {
    pub fn new(builder: ClientBuilder, retry: RetryConfig) -> Arc<Self> {
        Arc::new(Self {
            builder,
            retry,
            slot: SharedSlot::new(),
        })
    }

    /// Returns the shared connection, establishing it first when none is live.
    ///
    /// A connect failure is returned to every waiting caller.
    pub async fn connect(&self) -> Result<Connection, Error> {
        let acquired = self
            .slot
            .get_or_try_connect(Connection::is_connected, || async move {
                info!("Creating new NATS connection");
                let client = self.builder.build()?;
                let client = self.retry.retry(|| client.clone().connect()).await?;
                let connection = client.connection.ok_or_else(Error::MissingConnection)?;
                info!("Connected to NATS and JetStream");
                Ok::<_, Error>(connection)
            })
            .await
            .map_err(Error::Shared)?;

        if let Acquired::Reused(_) = &acquired {
            info!("Reusing existing NATS connection");
        }
        Ok(acquired.into_inner())
    }

    /// Flushes in-flight messages, closes the shared connection and resets the slot.
    pub async fn drain(&self) -> Result<(), Error> {
        match self.slot.take().await {
            Some(connection) => {
                connection
                    .client
                    .drain()
                    .await
                    .map_err(|e| Error::Drain(Box::new(e)))?;
                info!("NATS connection drained");
            }
            None => warn!("Drain requested without a live NATS connection"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_client_builder_default_server() {
        let client = ClientBuilder::new().build().unwrap();
        assert_eq!(client.servers.len(), 1);
        assert_eq!(client.auth, Auth::None);
        assert_eq!(client.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(client.reconnect_delay, DEFAULT_RECONNECT_DELAY);
        assert!(client.connection.is_none());
    }

    #[test]
    fn test_client_builder_splits_servers() {
        let client = ClientBuilder::new()
            .servers(["nats://a:4222, nats://b:4222", "nats://c:4222"])
            .build()
            .unwrap();
        assert_eq!(client.servers.len(), 3);
    }

    #[test]
    fn test_client_builder_invalid_server() {
        let result = ClientBuilder::new().servers(["http://[::1"]).build();
        assert!(matches!(result, Err(Error::ServerAddr { .. })));
    }

    #[test]
    fn test_client_builder_user_password() {
        let client = ClientBuilder::new()
            .user_and_password("app".to_string(), "secret".to_string())
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        assert_eq!(
            client.auth,
            Auth::UserPassword {
                user: "app".to_string(),
                password: "secret".to_string()
            }
        );
        assert_eq!(client.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_credentials_file_overrides_host_and_auth() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"nkey": "SUAEXAMPLESEED", "host": "nats://nats.example.com:4222"}}"#
        )
        .unwrap();

        let client = ClientBuilder::new()
            .servers(["nats://ignored:4222"])
            .user_and_password("app".to_string(), "secret".to_string())
            .credentials_path(file.path().to_path_buf())
            .build()
            .unwrap();

        assert_eq!(client.servers.len(), 1);
        assert_eq!(client.auth, Auth::NKey("SUAEXAMPLESEED".to_string()));
    }

    #[test]
    fn test_credentials_missing_file() {
        let result = ClientBuilder::new()
            .credentials_path(PathBuf::from("/definitely/not/here.json"))
            .build();
        assert!(matches!(result, Err(Error::OpenFile { .. })));
    }

    #[test]
    fn test_credentials_optional_fields() {
        let creds: Credentials = serde_json::from_str("{}").unwrap();
        assert!(creds.nkey.is_none());
        assert!(creds.host.is_none());
        assert!(creds.user.is_none());
        assert!(creds.password.is_none());
    }

    #[tokio::test]
    async fn test_shared_slot_connects_once_under_contention() {
        let slot = Arc::new(SharedSlot::<u32, &str>::new());
        let attempts = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let slot = Arc::clone(&slot);
            let attempts = Arc::clone(&attempts);
            handles.push(tokio::spawn(async move {
                slot.get_or_try_connect(
                    |_| true,
                    || async move {
                        attempts.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Ok::<_, &str>(7)
                    },
                )
                .await
                .unwrap()
                .into_inner()
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 7);
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shared_slot_failure_reaches_every_waiter() {
        let slot = Arc::new(SharedSlot::<u32, &str>::new());
        let attempts = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let slot = Arc::clone(&slot);
            let attempts = Arc::clone(&attempts);
            handles.push(tokio::spawn(async move {
                slot.get_or_try_connect(
                    |_| true,
                    || async move {
                        attempts.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Err::<u32, _>("broker unreachable")
                    },
                )
                .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Err(Arc::new("broker unreachable")));
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shared_slot_replaces_dead_value() {
        let slot = SharedSlot::<u32, &str>::new();
        let first = slot
            .get_or_try_connect(|_| true, || async { Ok::<_, &str>(1) })
            .await
            .unwrap();
        assert_eq!(first, Acquired::Created(1));

        let reused = slot
            .get_or_try_connect(|_| true, || async { Ok::<_, &str>(2) })
            .await
            .unwrap();
        assert_eq!(reused, Acquired::Reused(1));

        let replaced = slot
            .get_or_try_connect(|_| false, || async { Ok::<_, &str>(3) })
            .await
            .unwrap();
        assert_eq!(replaced, Acquired::Created(3));
    }

    #[tokio::test]
    async fn test_shared_slot_error_leaves_slot_empty() {
        let slot = SharedSlot::<u32, &str>::new();
        let result = slot
            .get_or_try_connect(|_| true, || async { Err::<u32, _>("unreachable") })
            .await;
        assert_eq!(result, Err(Arc::new("unreachable")));

        let next = slot
            .get_or_try_connect(|_| true, || async { Ok::<_, &str>(9) })
            .await
            .unwrap();
        assert_eq!(next, Acquired::Created(9));
    }

    #[tokio::test]
    async fn test_shared_slot_take_resets() {
        let slot = SharedSlot::<u32, &str>::new();
        slot.get_or_try_connect(|_| true, || async { Ok::<_, &str>(4) })
            .await
            .unwrap();
        assert_eq!(slot.take().await, Some(4));
        assert_eq!(slot.take().await, None);
    }

    #[tokio::test]
    async fn test_manager_connect_failure_propagates() {
        let manager = ConnectionManager::new(
            ClientBuilder::new()
                .servers(["nats://127.0.0.1:1"])
                .connect_timeout(Duration::from_millis(200)),
            RetryConfig::once(),
        );
        let result = manager.connect().await;
        match result {
            Err(Error::Shared(inner)) => assert!(matches!(*inner, Error::Connect(_))),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_manager_drain_without_connection() {
        let manager = ConnectionManager::new(ClientBuilder::new(), RetryConfig::once());
        assert!(manager.drain().await.is_ok());
    }
}
