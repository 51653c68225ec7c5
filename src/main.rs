use clap::Parser;

use casino::config::ServerConfig;
use casino::server;

#[tokio::main]
async fn main() {
    // Initialize logger
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let config = ServerConfig::parse();
    log::info!(
        "Starting casino backend v{} (join policy: {:?})",
        casino::VERSION,
        config.join_policy
    );

    if let Err(e) = server::serve(config).await {
        log::error!("Server stopped: {}", e);
        std::process::exit(1);
    }
}
