//! End-to-end tests of the HTTP surface against the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use actix_web::http::header::AUTHORIZATION;
use actix_web::http::StatusCode;
use actix_web::{test, web, App};
use serde_json::{json, Value};

use hmis::api::{self, AppState};
use hmis::auth::{hash_password, Authenticator, LoginRequest};
use hmis::config::{AuthConfig, IntegrationsConfig, UserCredential};
use hmis::core::integrations::IntegrationService;
use hmis::db::MemoryStore;
use hmis::hmis::Hospital;

fn state(debounce: Duration) -> web::Data<AppState> {
    let auth = AuthConfig {
        jwt_secret: "integration-secret".into(),
        session_ttl_minutes: 30,
        users: vec![UserCredential {
            username: "reception".into(),
            password_hash: hash_password("front-desk").unwrap(),
            role: "reception".into(),
            hospital: Some("hope".into()),
        }],
    };
    web::Data::new(AppState {
        hospital: Hospital::new(Arc::new(MemoryStore::new()), debounce),
        auth: Authenticator::new(&auth),
        integrations: IntegrationService::new(IntegrationsConfig::default()),
    })
}

fn bearer(state: &web::Data<AppState>) -> (actix_web::http::header::HeaderName, String) {
    let session = state
        .auth
        .login(&LoginRequest {
            username: "reception".into(),
            password: "front-desk".into(),
        })
        .unwrap();
    (AUTHORIZATION, format!("Bearer {}", session.token))
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data($state.clone())
                .configure(api::configure)
                .default_service(web::to(api::not_found)),
        )
        .await
    };
}

#[actix_web::test]
async fn health_is_public_and_everything_else_needs_a_token() {
    let state = state(Duration::from_millis(2000));
    let app = app!(state);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/api/health").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/api/patients").to_request()).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "unauthorized");
}

#[actix_web::test]
async fn login_over_http() {
    let state = state(Duration::from_millis(2000));
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/api/auth/login")
        .set_json(json!({"username": "reception", "password": "front-desk"}))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["hospital"], "hope");

    let req = test::TestRequest::post()
        .uri("/api/auth/login")
        .set_json(json!({"username": "reception", "password": "guess"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn unknown_routes_and_bad_bodies_get_json_errors() {
    let state = state(Duration::from_millis(2000));
    let auth = bearer(&state);
    let app = app!(state);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/nowhere").to_request()).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "not_found");

    let req = test::TestRequest::post()
        .uri("/api/patients")
        .insert_header(auth.clone())
        .insert_header(("content-type", "application/json"))
        .set_payload("{not json")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "bad_request");

    let req = test::TestRequest::get()
        .uri("/api/patients/not-a-uuid")
        .insert_header(auth.clone())
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

    let req = test::TestRequest::get()
        .uri("/api/masters/wards")
        .insert_header(auth)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn wrong_method_gets_a_json_405() {
    let state = state(Duration::from_millis(2000));
    let auth = bearer(&state);
    let app = app!(state);

    for req in [
        test::TestRequest::delete().uri("/api/billing-statuses"),
        test::TestRequest::patch().uri("/api/patients"),
        test::TestRequest::get().uri("/api/patients/import"),
    ] {
        let resp = test::call_service(&app, req.insert_header(auth.clone()).to_request()).await;
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "method_not_allowed");
        assert!(body["message"].as_str().unwrap().contains("not supported"));
    }
}

#[actix_web::test]
async fn registration_rejects_bad_phone() {
    let state = state(Duration::from_millis(2000));
    let auth = bearer(&state);
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/api/patients")
        .insert_header(auth)
        .set_json(json!({"name": "Ravi Kumar", "phone": "12345"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = test::read_body_json(resp).await;
    assert!(body["message"].as_str().unwrap().starts_with("phone"));
}

#[actix_web::test]
async fn visits_are_flattened_and_grouped_by_surgery_category() {
    let state = state(Duration::from_millis(2000));
    let auth = bearer(&state);
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/api/patients")
        .insert_header(auth.clone())
        .set_json(json!({"name": "Ravi Kumar", "phone": "9876543210", "age": 42}))
        .to_request();
    let patient: Value = test::call_and_read_body_json(&app, req).await;

    let mut visit_ids = Vec::new();
    for day in ["2024-06-14", "2024-06-15"] {
        let req = test::TestRequest::post()
            .uri("/api/visits")
            .insert_header(auth.clone())
            .set_json(json!({
                "patient_id": patient["id"],
                "visit_type": "IPD",
                "visit_date": day,
                "admission_date": day
            }))
            .to_request();
        let visit: Value = test::call_and_read_body_json(&app, req).await;
        visit_ids.push(visit["id"].as_str().unwrap().to_string());
    }

    let req = test::TestRequest::post()
        .uri("/api/masters/surgeries")
        .insert_header(auth.clone())
        .set_json(json!({"name": "Lap Cholecystectomy", "code": "S-101", "category": "General Surgery"}))
        .to_request();
    let surgery: Value = test::call_and_read_body_json(&app, req).await;

    let req = test::TestRequest::post()
        .uri(&format!("/api/visits/{}/links", visit_ids[1]))
        .insert_header(auth.clone())
        .set_json(json!({"kind": "surgery", "id": surgery["id"], "is_primary": true}))
        .to_request();
    let detail: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(detail["surgeries"].as_array().unwrap().len(), 1);

    let req = test::TestRequest::get()
        .uri("/api/visits")
        .insert_header(auth.clone())
        .to_request();
    let rows: Value = test::call_and_read_body_json(&app, req).await;
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["visit_date"], "2024-06-15");
    assert_eq!(rows[0]["surgery"], "Lap Cholecystectomy");
    assert_eq!(rows[1]["surgery"], "No Surgery Assigned");

    let req = test::TestRequest::get()
        .uri("/api/visits/grouped")
        .insert_header(auth)
        .to_request();
    let groups: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(groups["General Surgery"].as_array().unwrap().len(), 1);
    assert_eq!(groups["Uncategorized"].as_array().unwrap().len(), 1);
}

#[actix_web::test]
async fn master_import_with_missing_column_imports_nothing() {
    let state = state(Duration::from_millis(2000));
    let auth = bearer(&state);
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/api/masters/diagnoses/import")
        .insert_header(auth.clone())
        .insert_header(("content-type", "text/csv"))
        .set_payload("code,description\nK80,Gallstones\n")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "import_error");

    let req = test::TestRequest::get()
        .uri("/api/masters/diagnoses")
        .insert_header(auth.clone())
        .to_request();
    let docs: Value = test::call_and_read_body_json(&app, req).await;
    assert!(docs.as_array().unwrap().is_empty());

    let req = test::TestRequest::post()
        .uri("/api/masters/diagnoses/import")
        .insert_header(auth)
        .insert_header(("content-type", "text/tab-separated-values"))
        .set_payload("Name\tCode\nCholelithiasis\tK80\nAppendicitis\tK35\n")
        .to_request();
    let report: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(report["imported"], 2);
    assert_eq!(report["total_rows"], 2);
}

#[actix_web::test]
async fn billing_status_is_accepted_then_written_after_the_quiet_period() {
    let state = state(Duration::from_millis(50));
    let auth = bearer(&state);
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/api/patients")
        .insert_header(auth.clone())
        .set_json(json!({"name": "Asha"}))
        .to_request();
    let patient: Value = test::call_and_read_body_json(&app, req).await;
    let req = test::TestRequest::post()
        .uri("/api/visits")
        .insert_header(auth.clone())
        .set_json(json!({"patient_id": patient["id"], "visit_type": "OPD", "visit_date": "2024-06-15"}))
        .to_request();
    let visit: Value = test::call_and_read_body_json(&app, req).await;
    let uri = format!("/api/visits/{}/billing-status", visit["id"].as_str().unwrap());

    let req = test::TestRequest::put()
        .uri(&uri)
        .insert_header(auth.clone())
        .set_json(json!({"sub_status": "Payment Received"}))
        .to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::UNPROCESSABLE_ENTITY
    );

    let req = test::TestRequest::put()
        .uri(&uri)
        .insert_header(auth.clone())
        .set_json(json!({"status": "Submitted"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let req = test::TestRequest::put()
        .uri(&uri)
        .insert_header(auth.clone())
        .set_json(json!({"sub_status": "Under Query"}))
        .to_request();
    let accepted: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(accepted["selection"]["status"], "Submitted");
    assert_eq!(accepted["selection"]["sub_status"], "Under Query");

    tokio::time::sleep(Duration::from_millis(400)).await;

    let req = test::TestRequest::get()
        .uri(&format!("/api/visits/{}", visit["id"].as_str().unwrap()))
        .insert_header(auth)
        .to_request();
    let detail: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(detail["visit"]["billing_status"], "Submitted");
    assert_eq!(detail["visit"]["billing_sub_status"], "Under Query");
}

#[actix_web::test]
async fn bill_totals_are_computed_server_side() {
    let state = state(Duration::from_millis(2000));
    let auth = bearer(&state);
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/api/patients")
        .insert_header(auth.clone())
        .set_json(json!({"name": "Asha"}))
        .to_request();
    let patient: Value = test::call_and_read_body_json(&app, req).await;
    let req = test::TestRequest::post()
        .uri("/api/visits")
        .insert_header(auth.clone())
        .set_json(json!({"patient_id": patient["id"], "visit_type": "IPD", "visit_date": "2024-06-15"}))
        .to_request();
    let visit: Value = test::call_and_read_body_json(&app, req).await;
    let uri = format!("/api/visits/{}/bill", visit["id"].as_str().unwrap());

    let req = test::TestRequest::get().uri(&uri).insert_header(auth.clone()).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

    let req = test::TestRequest::put()
        .uri(&uri)
        .insert_header(auth.clone())
        .set_json(json!({
            "category": "ESIC",
            "sections": [
                {"title": "Room", "items": [{"description": "General ward", "rate": 1500.0, "quantity": 3.0}]},
                {"title": "Pharmacy", "items": [{"description": "IV fluids", "rate": 85.5, "quantity": 2.0}]}
            ]
        }))
        .to_request();
    let bill: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(bill["total_amount"], 4671.0);
    assert_eq!(bill["sections"][0]["subtotal"], 4500.0);
    assert!(bill["bill_no"].as_str().unwrap().starts_with("BL-IH"));

    let req = test::TestRequest::get().uri(&uri).insert_header(auth).to_request();
    let stored: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(stored["id"], bill["id"]);
}

#[actix_web::test]
async fn gate_pass_flow_and_printing() {
    let state = state(Duration::from_millis(2000));
    let auth = bearer(&state);
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/api/patients")
        .insert_header(auth.clone())
        .set_json(json!({"name": "Kiran <Das>"}))
        .to_request();
    let patient: Value = test::call_and_read_body_json(&app, req).await;
    let req = test::TestRequest::post()
        .uri("/api/visits")
        .insert_header(auth.clone())
        .set_json(json!({
            "patient_id": patient["id"],
            "visit_type": "IPD",
            "visit_date": "2024-06-10",
            "admission_date": "2024-06-10"
        }))
        .to_request();
    let visit: Value = test::call_and_read_body_json(&app, req).await;
    let id = visit["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::post()
        .uri(&format!("/api/visits/{}/gate-pass", id))
        .insert_header(auth.clone())
        .set_json(json!({}))
        .to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::UNPROCESSABLE_ENTITY
    );

    let req = test::TestRequest::put()
        .uri(&format!("/api/visits/{}", id))
        .insert_header(auth.clone())
        .set_json(json!({"discharge_date": "2024-06-14"}))
        .to_request();
    let updated: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(updated["status"], "discharged");

    let req = test::TestRequest::post()
        .uri(&format!("/api/visits/{}/gate-pass", id))
        .insert_header(auth.clone())
        .set_json(json!({"attendant_name": "Meena", "vehicle_no": "MH31AB1234"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let pass: Value = test::read_body_json(resp).await;
    assert_eq!(pass["issued_by"], "reception");
    assert!(pass["gate_pass_no"].as_str().unwrap().starts_with("GP-"));

    let req = test::TestRequest::post()
        .uri(&format!("/api/visits/{}/gate-pass", id))
        .insert_header(auth.clone())
        .set_json(json!({}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);

    let req = test::TestRequest::get()
        .uri(&format!("/api/visits/{}/print/gate-pass", id))
        .insert_header(auth.clone())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let html = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
    assert!(html.contains(pass["gate_pass_no"].as_str().unwrap()));
    assert!(html.contains("Kiran &lt;Das&gt;"));

    let req = test::TestRequest::get()
        .uri(&format!("/api/visits/{}/print/consent", id))
        .insert_header(auth)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
}
