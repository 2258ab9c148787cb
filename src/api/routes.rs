use actix_web::{web, Resource};

use super::handlers::{billing, integrations, masters, patients, system, visits};
use super::{json_config, method_not_allowed, not_found, path_config, query_config, IMPORT_LIMIT_BYTES};

/// A resource that answers unsupported methods with a JSON 405.
fn resource(path: &str) -> Resource {
    web::resource(path).default_service(web::to(method_not_allowed))
}

/// Configure API routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .app_data(path_config())
        .app_data(query_config())
        .app_data(web::PayloadConfig::new(IMPORT_LIMIT_BYTES))
        .service(
            web::scope("/api")
                // System
                .service(resource("/health").route(web::get().to(system::health)))
                .service(resource("/auth/login").route(web::post().to(system::login)))
                // Patients
                .service(
                    resource("/patients")
                        .route(web::get().to(patients::list))
                        .route(web::post().to(patients::create)),
                )
                .service(resource("/patients/import").route(web::post().to(patients::import)))
                .service(
                    resource("/patients/{id}")
                        .route(web::get().to(patients::get))
                        .route(web::put().to(patients::update))
                        .route(web::delete().to(patients::delete)),
                )
                // Visits
                .service(
                    resource("/visits")
                        .route(web::get().to(visits::list))
                        .route(web::post().to(visits::create)),
                )
                .service(resource("/visits/grouped").route(web::get().to(visits::grouped)))
                .service(
                    resource("/visits/{id}")
                        .route(web::get().to(visits::get))
                        .route(web::put().to(visits::update))
                        .route(web::delete().to(visits::delete)),
                )
                .service(resource("/visits/{id}/links").route(web::post().to(visits::link)))
                .service(
                    resource("/visits/{id}/links/{kind}/{master_id}").route(web::delete().to(visits::unlink)),
                )
                .service(
                    resource("/visits/{id}/surgeries/{surgery_id}/sanction")
                        .route(web::put().to(visits::set_sanction)),
                )
                .service(resource("/visits/{id}/print/{form}").route(web::get().to(visits::print)))
                // Billing
                .service(resource("/billing-statuses").route(web::get().to(billing::statuses)))
                .service(resource("/visits/{id}/billing-status").route(web::put().to(billing::select_status)))
                .service(
                    resource("/visits/{id}/bill")
                        .route(web::get().to(billing::get_bill))
                        .route(web::put().to(billing::save_bill)),
                )
                .service(
                    resource("/visits/{id}/gate-pass")
                        .route(web::get().to(billing::get_gate_pass))
                        .route(web::post().to(billing::issue_gate_pass)),
                )
                // Master data
                .service(
                    resource("/masters/{kind}")
                        .route(web::get().to(masters::list))
                        .route(web::post().to(masters::create)),
                )
                .service(resource("/masters/{kind}/import").route(web::post().to(masters::import)))
                .service(
                    resource("/masters/{kind}/{id}")
                        .route(web::get().to(masters::get))
                        .route(web::put().to(masters::update))
                        .route(web::delete().to(masters::delete)),
                )
                // External services
                .service(
                    resource("/integrations/patient-lookup").route(web::get().to(integrations::patient_lookup)),
                )
                .service(resource("/integrations/letters").route(web::post().to(integrations::letters)))
                .default_service(web::to(not_found)),
        );
}
