use actix_web::http::header::ContentType;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

use super::SearchQuery;
use crate::api::middleware::AuthUser;
use crate::api::AppState;
use crate::core::forms::FormKind;
use crate::error::AppResult;
use crate::models::{LinkKind, NewVisit, SanctionStatus, VisitLink, VisitUpdate};

#[derive(Debug, Deserialize)]
pub struct SanctionBody {
    pub status: SanctionStatus,
}

/// Flattened visit rows, newest first.
pub async fn list(
    state: web::Data<AppState>,
    _user: AuthUser,
    query: web::Query<SearchQuery>,
) -> AppResult<HttpResponse> {
    let rows = state.hospital.visit_rows(query.into_inner().into_search()).await?;
    Ok(HttpResponse::Ok().json(rows))
}

/// Flattened visit rows keyed by surgery category.
pub async fn grouped(
    state: web::Data<AppState>,
    _user: AuthUser,
    query: web::Query<SearchQuery>,
) -> AppResult<HttpResponse> {
    let groups = state.hospital.grouped_visit_rows(query.into_inner().into_search()).await?;
    Ok(HttpResponse::Ok().json(groups))
}

pub async fn create(
    state: web::Data<AppState>,
    _user: AuthUser,
    body: web::Json<NewVisit>,
) -> AppResult<HttpResponse> {
    let visit = state.hospital.create_visit(body.into_inner()).await?;
    Ok(HttpResponse::Created().json(visit))
}

pub async fn get(state: web::Data<AppState>, _user: AuthUser, id: web::Path<Uuid>) -> AppResult<HttpResponse> {
    let detail = state.hospital.visit_detail(id.into_inner()).await?;
    Ok(HttpResponse::Ok().json(detail))
}

pub async fn update(
    state: web::Data<AppState>,
    _user: AuthUser,
    id: web::Path<Uuid>,
    body: web::Json<VisitUpdate>,
) -> AppResult<HttpResponse> {
    let visit = state.hospital.update_visit(id.into_inner(), body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(visit))
}

pub async fn delete(state: web::Data<AppState>, _user: AuthUser, id: web::Path<Uuid>) -> AppResult<HttpResponse> {
    state.hospital.delete_visit(id.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn link(
    state: web::Data<AppState>,
    _user: AuthUser,
    id: web::Path<Uuid>,
    body: web::Json<VisitLink>,
) -> AppResult<HttpResponse> {
    let detail = state.hospital.link(id.into_inner(), body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(detail))
}

pub async fn unlink(
    state: web::Data<AppState>,
    _user: AuthUser,
    path: web::Path<(Uuid, String, Uuid)>,
) -> AppResult<HttpResponse> {
    let (visit_id, kind, master_id) = path.into_inner();
    let kind: LinkKind = kind.parse()?;
    state.hospital.unlink(visit_id, kind, master_id).await?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn set_sanction(
    state: web::Data<AppState>,
    _user: AuthUser,
    path: web::Path<(Uuid, Uuid)>,
    body: web::Json<SanctionBody>,
) -> AppResult<HttpResponse> {
    let (visit_id, surgery_id) = path.into_inner();
    state
        .hospital
        .set_sanction_status(visit_id, surgery_id, body.status)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn print(
    state: web::Data<AppState>,
    _user: AuthUser,
    path: web::Path<(Uuid, String)>,
) -> AppResult<HttpResponse> {
    let (visit_id, form) = path.into_inner();
    let form: FormKind = form.parse()?;
    let html = state.hospital.print(visit_id, form).await?;
    Ok(HttpResponse::Ok().content_type(ContentType::html()).body(html))
}
