use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::api::AppState;
use crate::auth::LoginRequest;
use crate::error::AppResult;

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn login(state: web::Data<AppState>, body: web::Json<LoginRequest>) -> AppResult<HttpResponse> {
    let session = state.auth.login(&body)?;
    Ok(HttpResponse::Ok().json(session))
}
