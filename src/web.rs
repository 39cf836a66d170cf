use sheetcharts::app;
use sheetcharts::config::AppConfig;

/// Main entry point for the web application
///
/// Loads an optional `.env`, installs logging (default filter `info`, see
/// `RUST_LOG`), reads the configuration from the environment and serves the
/// HTTP API until the process is stopped.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::from_env()?;
    log::info!(
        "data directory {}, upload limit {} bytes",
        config.data_dir.display(),
        config.max_upload_bytes
    );

    app::run(config).await
}
