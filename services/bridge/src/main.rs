use bridge::bridge::Bridge;
use bridge::config::BridgeConfig;
use tracing::info;

#[tokio::main]
async fn main() {
    let config = BridgeConfig::from_args();

    let env_filter = if config.verbose {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    match &config.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .unwrap_or_else(|e| {
                    eprintln!("FATAL: failed to open log file '{}': {e}", path.display());
                    std::process::exit(1);
                });
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(file)
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(env_filter).init();
        }
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        serial_port = %config.serial_port.display(),
        websocket_url = %config.websocket_url,
        "bridge starting"
    );

    if let Err(e) = Bridge::new(config).run().await {
        eprintln!("FATAL: {e}");
        std::process::exit(1);
    }
}
