//! Server-wide middleware configuration helpers.
//!
//! Keeps the Actix application setup focused by providing
//! reusable constructors for the CORS and logging layers.

use crate::config::ServerConfig;
use actix_cors::Cors;
use actix_web::middleware;
use log::debug;

/// Build CORS middleware from server configuration using actix-cors.
///
/// An empty `allowed_origins` list (or a `*` entry) allows any origin, which
/// is what a locally hosted admin tool wants by default.
pub fn build_cors_from_config(config: &ServerConfig) -> Cors {
    let cors_config = &config.cors;

    let mut cors = Cors::default()
        .allow_any_method()
        .allow_any_header()
        .max_age(cors_config.max_age as usize);

    if cors_config.allowed_origins.is_empty()
        || cors_config.allowed_origins.contains(&"*".to_string())
    {
        cors = cors.allow_any_origin();
        debug!("CORS: Allowing any origin");
    } else {
        for origin in &cors_config.allowed_origins {
            cors = cors.allowed_origin(origin);
        }
        debug!("CORS: Allowed origins: {:?}", cors_config.allowed_origins);
    }

    cors
}

/// Build the request logger middleware.
pub fn request_logger() -> middleware::Logger {
    middleware::Logger::default()
}
