// QueryDesk Server entrypoint
//!
//! The heavy lifting (initialization, middleware wiring, graceful shutdown)
//! lives in dedicated modules so this file remains a thin orchestrator.

use anyhow::Result;
use log::info;
use querydesk_server::config::ServerConfig;
use querydesk_server::lifecycle::{bootstrap, run};
use querydesk_server::logging;

#[actix_web::main]
async fn main() -> Result<()> {
    // Load configuration (fall back to defaults when config file missing)
    let config_path = "config.toml";
    let config = if std::path::Path::new(config_path).exists() {
        match ServerConfig::from_file(config_path) {
            Ok(cfg) => {
                eprintln!(
                    "✅ Loaded config from: {}",
                    std::fs::canonicalize(config_path)
                        .unwrap_or_else(|_| std::path::PathBuf::from(config_path))
                        .display()
                );
                cfg
            }
            Err(e) => {
                eprintln!("❌ FATAL: Failed to load config.toml: {}", e);
                eprintln!("❌ Server cannot start without valid configuration");
                std::process::exit(1);
            }
        }
    } else {
        eprintln!("No config.toml found, using default configuration");
        ServerConfig::default()
    };

    // Logging before any other side effects
    logging::init_logging(
        &config.logging.level,
        &config.logging.file_path,
        config.logging.log_to_console,
        &config.logging.format,
    )?;

    info!("QueryDesk Server v{}", env!("CARGO_PKG_VERSION"));
    info!("Host: {}  Port: {}", config.server.host, config.server.port);

    // Build application state and kick off background services
    let components = bootstrap(&config).await?;

    // Run HTTP server until termination signal is received
    run(&config, components).await
}
