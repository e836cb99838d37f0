use hls_relay::{config::Config, server};
use tracing::{Level, error, info};

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // Setup logging; DEBUG=true turns on diagnostics
    let level = match &config {
        Ok(c) if c.debug => Level::DEBUG,
        _ => Level::INFO,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    info!("🚀 Starting hls-relay {}", env!("CARGO_PKG_VERSION"));

    let config = match config {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Cache backend: {}, TTL: {}s, max recursion: {}, {} user agent(s), access gate {}",
        config.cache_backend.as_str(),
        config.cache_ttl_secs,
        config.max_recursion,
        config.user_agents.len(),
        if config.password.is_some() { "on" } else { "off" }
    );

    if let Err(e) = server::start(config).await {
        error!("Failed to start server: {}", e);
        std::process::exit(1);
    }
}
