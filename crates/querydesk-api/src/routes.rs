//! API routes configuration
//!
//! This module configures all HTTP routes for the QueryDesk API.

use crate::handlers;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Configure API routes for QueryDesk
///
/// All endpoints use the /v1 version prefix:
/// - POST   /v1/query/initialize/{server}/{database} - Open a session
/// - POST   /v1/query/{transaction_id}/start         - Submit a SQL batch
/// - GET    /v1/query/{transaction_id}/poll          - Poll status, notices and rows
/// - DELETE /v1/query/{transaction_id}               - Close the session
/// - GET    /v1/api/healthcheck                      - Health check endpoint
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/v1")
            .service(
                web::scope("/query")
                    .service(handlers::initialize_session)
                    .service(handlers::start_query)
                    .service(handlers::poll_query)
                    .service(handlers::close_session),
            )
            .service(
                web::scope("/api").route("/healthcheck", web::get().to(healthcheck_handler)),
            ),
    );
}

/// Health check endpoint handler
async fn healthcheck_handler() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "api_version": "v1"
    }))
}
