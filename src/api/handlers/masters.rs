use actix_web::{web, HttpResponse};
use serde_json::Value;
use uuid::Uuid;

use super::{upload_text, SearchQuery};
use crate::api::middleware::AuthUser;
use crate::api::AppState;
use crate::core::import::ImportOptions;
use crate::error::AppResult;
use crate::models::MasterKind;

pub async fn list(
    state: web::Data<AppState>,
    _user: AuthUser,
    kind: web::Path<String>,
    query: web::Query<SearchQuery>,
) -> AppResult<HttpResponse> {
    let kind: MasterKind = kind.parse()?;
    let docs = state.hospital.list_masters(kind, query.into_inner().into_search()).await?;
    Ok(HttpResponse::Ok().json(docs))
}

pub async fn create(
    state: web::Data<AppState>,
    _user: AuthUser,
    kind: web::Path<String>,
    body: web::Json<Value>,
) -> AppResult<HttpResponse> {
    let kind: MasterKind = kind.parse()?;
    let doc = state.hospital.create_master(kind, body.into_inner()).await?;
    Ok(HttpResponse::Created().json(doc))
}

pub async fn get(
    state: web::Data<AppState>,
    _user: AuthUser,
    path: web::Path<(String, Uuid)>,
) -> AppResult<HttpResponse> {
    let (kind, id) = path.into_inner();
    let doc = state.hospital.master(kind.parse()?, id).await?;
    Ok(HttpResponse::Ok().json(doc))
}

pub async fn update(
    state: web::Data<AppState>,
    _user: AuthUser,
    path: web::Path<(String, Uuid)>,
    body: web::Json<Value>,
) -> AppResult<HttpResponse> {
    let (kind, id) = path.into_inner();
    let doc = state.hospital.update_master(kind.parse()?, id, body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(doc))
}

pub async fn delete(
    state: web::Data<AppState>,
    _user: AuthUser,
    path: web::Path<(String, Uuid)>,
) -> AppResult<HttpResponse> {
    let (kind, id) = path.into_inner();
    state.hospital.delete_master(kind.parse()?, id).await?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn import(
    state: web::Data<AppState>,
    _user: AuthUser,
    kind: web::Path<String>,
    options: web::Query<ImportOptions>,
    body: web::Bytes,
) -> AppResult<HttpResponse> {
    let kind: MasterKind = kind.parse()?;
    let data = upload_text(body)?;
    let report = state.hospital.import_masters(kind, &data, &options).await?;
    Ok(HttpResponse::Ok().json(report))
}
