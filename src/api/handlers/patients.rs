use actix_web::{web, HttpResponse};
use uuid::Uuid;

use super::{upload_text, SearchQuery};
use crate::api::middleware::AuthUser;
use crate::api::AppState;
use crate::core::import::ImportOptions;
use crate::error::AppResult;
use crate::models::NewPatient;

pub async fn list(
    state: web::Data<AppState>,
    _user: AuthUser,
    query: web::Query<SearchQuery>,
) -> AppResult<HttpResponse> {
    let patients = state.hospital.search_patients(query.into_inner().into_search()).await?;
    Ok(HttpResponse::Ok().json(patients))
}

pub async fn create(
    state: web::Data<AppState>,
    _user: AuthUser,
    body: web::Json<NewPatient>,
) -> AppResult<HttpResponse> {
    let patient = state.hospital.register_patient(body.into_inner()).await?;
    Ok(HttpResponse::Created().json(patient))
}

pub async fn get(state: web::Data<AppState>, _user: AuthUser, id: web::Path<Uuid>) -> AppResult<HttpResponse> {
    let patient = state.hospital.patient(id.into_inner()).await?;
    Ok(HttpResponse::Ok().json(patient))
}

pub async fn update(
    state: web::Data<AppState>,
    _user: AuthUser,
    id: web::Path<Uuid>,
    body: web::Json<NewPatient>,
) -> AppResult<HttpResponse> {
    let patient = state.hospital.update_patient(id.into_inner(), body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(patient))
}

pub async fn delete(state: web::Data<AppState>, _user: AuthUser, id: web::Path<Uuid>) -> AppResult<HttpResponse> {
    state.hospital.delete_patient(id.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn import(
    state: web::Data<AppState>,
    _user: AuthUser,
    options: web::Query<ImportOptions>,
    body: web::Bytes,
) -> AppResult<HttpResponse> {
    let data = upload_text(body)?;
    let report = state.hospital.import_patients(&data, &options).await?;
    Ok(HttpResponse::Ok().json(report))
}
