//! API module for the HMIS service
//!
//! Everything lives under `/api`. Handlers are thin: they extract, call the
//! `Hospital` service and serialise the result. Errors of every origin leave
//! as the same `{"error", "message"}` JSON body.

use actix_web::{web, HttpRequest, HttpResponse, ResponseError};

use crate::auth::Authenticator;
use crate::core::integrations::IntegrationService;
use crate::error::AppError;
use crate::hmis::Hospital;

pub mod handlers;
pub mod middleware;
pub mod routes;

pub use routes::configure;

/// Shared per-process state handed to every handler as `web::Data<AppState>`.
pub struct AppState {
    pub hospital: Hospital,
    pub auth: Authenticator,
    pub integrations: IntegrationService,
}

/// Largest import upload accepted.
pub const IMPORT_LIMIT_BYTES: usize = 10 * 1024 * 1024;

// ===== Error boundary =====

pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        AppError::BadRequest(err.to_string()).into()
    })
}

pub fn path_config() -> web::PathConfig {
    web::PathConfig::default().error_handler(|err, _req| {
        AppError::BadRequest(format!("invalid path: {}", err)).into()
    })
}

pub fn query_config() -> web::QueryConfig {
    web::QueryConfig::default().error_handler(|err, _req| {
        AppError::BadRequest(format!("invalid query: {}", err)).into()
    })
}

/// Fallback for unknown routes.
pub async fn not_found(req: HttpRequest) -> HttpResponse {
    let err = AppError::NotFound(format!("no route for {} {}", req.method(), req.path()));
    err.error_response()
}

/// Fallback for a known path called with a method it does not serve.
pub async fn method_not_allowed(req: HttpRequest) -> HttpResponse {
    let err = AppError::MethodNotAllowed(format!("{} is not supported on {}", req.method(), req.path()));
    err.error_response()
}
