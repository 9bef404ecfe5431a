use genbus::{app::App, config::AppConfig};
use std::{env, path::PathBuf, process};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Install global log collector.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = env::var("CONFIG_PATH").ok().map(PathBuf::from);

    let config = AppConfig::load(config_path.as_deref()).unwrap_or_else(|err| {
        error!("{}", err);
        process::exit(1);
    });

    App { config }.start().await.unwrap_or_else(|err| {
        error!("{}", err);
        process::exit(1);
    });
}
