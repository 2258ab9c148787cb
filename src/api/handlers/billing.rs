use actix_web::{web, HttpResponse};
use uuid::Uuid;

use crate::api::middleware::AuthUser;
use crate::api::AppState;
use crate::error::AppResult;
use crate::hmis::BillingStatusRequest;
use crate::models::{BillDraft, GatePassRequest};

/// The status → sub-status table that drives the two dropdowns.
pub async fn statuses(state: web::Data<AppState>, _user: AuthUser) -> HttpResponse {
    HttpResponse::Ok().json(state.hospital.billing_statuses())
}

/// Accepts the selection right away; the write happens after the debounce window.
pub async fn select_status(
    state: web::Data<AppState>,
    _user: AuthUser,
    id: web::Path<Uuid>,
    body: web::Json<BillingStatusRequest>,
) -> AppResult<HttpResponse> {
    let accepted = state
        .hospital
        .select_billing_status(id.into_inner(), body.into_inner())
        .await?;
    Ok(HttpResponse::Accepted().json(accepted))
}

pub async fn get_bill(state: web::Data<AppState>, _user: AuthUser, id: web::Path<Uuid>) -> AppResult<HttpResponse> {
    let bill = state.hospital.bill(id.into_inner()).await?;
    Ok(HttpResponse::Ok().json(bill))
}

pub async fn save_bill(
    state: web::Data<AppState>,
    _user: AuthUser,
    id: web::Path<Uuid>,
    body: web::Json<BillDraft>,
) -> AppResult<HttpResponse> {
    let bill = state.hospital.save_bill(id.into_inner(), body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(bill))
}

pub async fn get_gate_pass(
    state: web::Data<AppState>,
    _user: AuthUser,
    id: web::Path<Uuid>,
) -> AppResult<HttpResponse> {
    let pass = state.hospital.gate_pass(id.into_inner()).await?;
    Ok(HttpResponse::Ok().json(pass))
}

pub async fn issue_gate_pass(
    state: web::Data<AppState>,
    user: AuthUser,
    id: web::Path<Uuid>,
    body: web::Json<GatePassRequest>,
) -> AppResult<HttpResponse> {
    let pass = state
        .hospital
        .issue_gate_pass(id.into_inner(), body.into_inner(), user.username())
        .await?;
    Ok(HttpResponse::Created().json(pass))
}
