//! Server lifecycle management helpers.
//!
//! This module encapsulates the heavy lifting otherwise handled directly in
//! `main.rs`: bootstrapping the engine and its background services, wiring
//! the HTTP server, and coordinating graceful shutdown.

use crate::{config::ServerConfig, middleware};
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use log::{debug, info};
use querydesk_api::handlers::AppState;
use querydesk_api::routes;
use querydesk_core::connection::simulator::SimulatorProvider;
use querydesk_core::{ConnectionProvider, QueryEngine, SessionReaper};
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

/// Aggregated application components shared across the HTTP server and
/// shutdown handling.
pub struct ApplicationComponents {
    pub engine: Arc<QueryEngine>,
    pub reaper: Option<Arc<SessionReaper>>,
}

/// Build the engine, its connection provider, and the optional idle-session
/// reaper.
pub async fn bootstrap(config: &ServerConfig) -> Result<ApplicationComponents> {
    let phase_start = std::time::Instant::now();

    let provider: Arc<dyn ConnectionProvider> = if config.session.allowed_servers.is_empty() {
        Arc::new(SimulatorProvider::new())
    } else {
        debug!(
            "Restricting connections to servers: {:?}",
            config.session.allowed_servers
        );
        Arc::new(SimulatorProvider::with_servers(
            config.session.allowed_servers.iter().cloned(),
        ))
    };

    let engine = Arc::new(QueryEngine::new(provider));
    debug!(
        "Query engine initialized ({:.2}ms)",
        phase_start.elapsed().as_secs_f64() * 1000.0
    );

    let reaper = if config.session.idle_timeout_seconds > 0 {
        let reaper = Arc::new(SessionReaper::new(
            Arc::clone(&engine),
            Duration::from_secs(config.session.idle_timeout_seconds),
            Duration::from_secs(config.session.reaper_interval_seconds),
        ));
        reaper.start();
        Some(reaper)
    } else {
        info!("Idle-session reaper disabled (idle_timeout_seconds = 0)");
        None
    };

    Ok(ApplicationComponents { engine, reaper })
}

/// Start the HTTP server and manage graceful shutdown.
pub async fn run(config: &ServerConfig, components: ApplicationComponents) -> Result<()> {
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Starting HTTP server on {}", bind_addr);
    debug!(
        "Endpoints: POST /v1/query/initialize/{{server}}/{{database}}, \
         POST /v1/query/{{id}}/start, GET /v1/query/{{id}}/poll, DELETE /v1/query/{{id}}"
    );

    let engine = components.engine.clone();
    let cors_config = config.clone();

    let server = HttpServer::new(move || {
        App::new()
            .wrap(middleware::request_logger())
            .wrap(middleware::build_cors_from_config(&cors_config))
            .app_data(web::Data::new(AppState {
                engine: engine.clone(),
            }))
            .configure(routes::configure_routes)
    })
    .workers(if config.server.workers == 0 {
        num_cpus::get()
    } else {
        config.server.workers
    })
    .keep_alive(Duration::from_secs(config.server.keepalive_timeout))
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            if let Err(e) = result {
                log::error!("Server task failed: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating graceful shutdown...");

            // Stop accepting new HTTP connections
            server_handle.stop(true).await;

            if let Some(reaper) = &components.reaper {
                reaper.stop();
            }

            let open_sessions = components.engine.session_count();
            if open_sessions > 0 {
                info!("Dropping {} open session(s) on shutdown", open_sessions);
            }

            debug!("Graceful shutdown complete");
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// A running HTTP server instance intended for integration tests.
///
/// This starts the same Actix app wiring as the production server
/// (middleware stack, route registration, app_data wiring) but binds to an
/// ephemeral port and provides an explicit shutdown handle.
pub struct RunningTestHttpServer {
    pub base_url: String,
    pub bind_addr: SocketAddr,
    pub engine: Arc<QueryEngine>,
    server_handle: actix_web::dev::ServerHandle,
    server_task: tokio::task::JoinHandle<std::io::Result<()>>,
}

impl RunningTestHttpServer {
    pub async fn shutdown(self) {
        self.server_handle.stop(false).await;
        let _ = self.server_task.await;
    }
}

/// Start the HTTP server for integration tests on a random available port.
///
/// Notes:
/// - Does not install Ctrl+C handling.
/// - Caller must invoke `shutdown()` to stop the server.
pub async fn run_for_tests(
    config: &ServerConfig,
    components: ApplicationComponents,
) -> Result<RunningTestHttpServer> {
    let bind_ip = if config.server.host.is_empty() {
        "127.0.0.1"
    } else {
        config.server.host.as_str()
    };

    let listener = TcpListener::bind((bind_ip, 0))?;
    let bind_addr = listener.local_addr()?;

    let engine = components.engine.clone();
    let cors_config = config.clone();

    let server = HttpServer::new(move || {
        App::new()
            .wrap(middleware::request_logger())
            .wrap(middleware::build_cors_from_config(&cors_config))
            .app_data(web::Data::new(AppState {
                engine: engine.clone(),
            }))
            .configure(routes::configure_routes)
    })
    .workers(1)
    .listen(listener)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);
    let base_url = format!("http://{}", bind_addr);

    Ok(RunningTestHttpServer {
        base_url,
        bind_addr,
        engine: components.engine,
        server_handle,
        server_task,
    })
}
