use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::api::middleware::AuthUser;
use crate::api::AppState;
use crate::core::integrations::LetterRequest;
use crate::error::{AppError, AppResult};

#[derive(Debug, Deserialize)]
pub struct LookupQuery {
    #[serde(default)]
    pub q: String,
}

pub async fn patient_lookup(
    state: web::Data<AppState>,
    _user: AuthUser,
    query: web::Query<LookupQuery>,
) -> AppResult<HttpResponse> {
    let search = query.q.trim();
    if search.is_empty() {
        return Err(AppError::Validation("q is required".into()));
    }
    let found = state.integrations.lookup_patient(search).await?;
    Ok(HttpResponse::Ok().json(found))
}

pub async fn letters(
    state: web::Data<AppState>,
    _user: AuthUser,
    body: web::Json<LetterRequest>,
) -> AppResult<HttpResponse> {
    let letter = state.integrations.generate_letter(&body).await?;
    Ok(HttpResponse::Ok().json(letter))
}
