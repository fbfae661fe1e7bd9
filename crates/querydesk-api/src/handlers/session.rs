//! Session endpoints: initialize, start, poll, close.
//!
//! All endpoints are keyed by transaction id. `start` returns as soon as the
//! batch is accepted; progress, notices and rows are observed via `poll`.

use actix_web::{delete, get, post, web, HttpResponse, Responder};
use log::{debug, error};
use querydesk_core::{EngineError, ExecutionStatus, QueryEngine, RowWindow, TransactionId};
use std::sync::Arc;
use std::time::Instant;

use crate::models::{
    CloseResponse, ErrorCode, ErrorResponse, InitializeResponse, PollParams, PollResponse,
    StartRequest, StartResponse,
};

/// Shared application state for the query-tool endpoints
pub struct AppState {
    pub engine: Arc<QueryEngine>,
}

fn took_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Maps an engine error to the HTTP response the client sees.
fn engine_error_response(error: &EngineError, took: f64) -> HttpResponse {
    let code = ErrorCode::from(error);
    let body = ErrorResponse::new(code, &error.to_string(), took);
    match error {
        EngineError::SessionNotFound(_) | EngineError::NoActiveQuery(_) => {
            HttpResponse::NotFound().json(body)
        }
        EngineError::ExecutionInProgress | EngineError::Cancelled(_) => {
            HttpResponse::Conflict().json(body)
        }
        EngineError::Statement(_) => HttpResponse::BadRequest().json(body),
        EngineError::Connection(_) | EngineError::Internal(_) => {
            HttpResponse::InternalServerError().json(body)
        }
    }
}

/// Opens a session against a server/database pair and returns its
/// transaction id.
#[post("/initialize/{server}/{database}")]
pub async fn initialize_session(
    path: web::Path<(String, String)>,
    state: web::Data<AppState>,
) -> impl Responder {
    let start = Instant::now();
    let (server, database) = path.into_inner();
    debug!("Initializing session for {}/{}", server, database);

    match state.engine.initialize(&server, &database).await {
        Ok(transaction_id) => HttpResponse::Ok().json(InitializeResponse {
            status: "success".to_string(),
            transaction_id: transaction_id.to_string(),
            took: took_ms(start),
        }),
        Err(e) => {
            error!("Failed to initialize session for {}/{}: {}", server, database, e);
            engine_error_response(&e, took_ms(start))
        }
    }
}

/// Accepts a SQL batch for asynchronous execution on the session.
#[post("/{transaction_id}/start")]
pub async fn start_query(
    path: web::Path<String>,
    request: web::Json<StartRequest>,
    state: web::Data<AppState>,
) -> impl Responder {
    let start = Instant::now();
    let transaction_id = TransactionId::from(path.into_inner());

    if request.sql.trim().is_empty() {
        return HttpResponse::BadRequest().json(ErrorResponse::new(
            ErrorCode::InvalidInput,
            "SQL batch cannot be empty",
            took_ms(start),
        ));
    }

    debug!("Starting query on session {}", transaction_id);
    match state.engine.start(&transaction_id, &request.sql) {
        Ok(()) => HttpResponse::Ok().json(StartResponse {
            status: "accepted".to_string(),
            transaction_id: transaction_id.to_string(),
            took: took_ms(start),
        }),
        Err(e) => engine_error_response(&e, took_ms(start)),
    }
}

/// Observes the session's current execution: status, accumulated notices,
/// and, once completed, the result rows inside the requested window.
///
/// A failed execution answers with 500 and the full poll body, so the
/// client still receives the notices emitted before the failure.
#[get("/{transaction_id}/poll")]
pub async fn poll_query(
    path: web::Path<String>,
    params: web::Query<PollParams>,
    state: web::Data<AppState>,
) -> impl Responder {
    let start = Instant::now();
    let transaction_id = TransactionId::from(path.into_inner());
    let window = RowWindow::new(params.offset, params.limit);

    match state.engine.poll(&transaction_id, window) {
        Ok(result) => {
            let failed = result.status == ExecutionStatus::Failed;
            let body = PollResponse::from_result(result, took_ms(start));
            if failed {
                HttpResponse::InternalServerError().json(body)
            } else {
                HttpResponse::Ok().json(body)
            }
        }
        Err(e) => engine_error_response(&e, took_ms(start)),
    }
}

/// Closes a session, cancelling any in-flight execution and releasing its
/// connection. Idempotent: closing an unknown id still answers 200.
#[delete("/{transaction_id}")]
pub async fn close_session(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> impl Responder {
    let start = Instant::now();
    let transaction_id = TransactionId::from(path.into_inner());
    state.engine.close(&transaction_id).await;
    HttpResponse::Ok().json(CloseResponse {
        status: "closed".to_string(),
        took: took_ms(start),
    })
}
