//! HMIS service
//!
//! Main entry point. `hmis hash-password <password>` prints an Argon2 hash for
//! the credential table instead of starting the server.

use std::time::Duration;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use tracing::info;
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;

use hmis::api::{self, AppState};
use hmis::auth::{self, Authenticator};
use hmis::core::integrations::IntegrationService;
use hmis::hmis::Hospital;
use hmis::{config, db};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = cfg!(feature = "json-logs") || std::env::var("HMIS_LOG_JSON").map_or(false, |v| v == "1");
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before anything reads the environment
    dotenv::dotenv().ok();

    // Initialize logger
    init_tracing();

    let mut args = std::env::args().skip(1);
    if args.next().as_deref() == Some("hash-password") {
        let password = args.next().context("usage: hmis hash-password <password>")?;
        println!("{}", auth::hash_password(&password)?);
        return Ok(());
    }

    // Load configuration
    let config = config::load_config().context("failed to load configuration")?;

    // Connect to the store and run migrations
    let store = db::open_store(&config.database)
        .await
        .context("failed to open the store")?;

    // Create app state
    let state = web::Data::new(AppState {
        hospital: Hospital::new(store, Duration::from_millis(config.billing.debounce_ms)),
        auth: Authenticator::new(&config.auth),
        integrations: IntegrationService::new(config.integrations.clone()),
    });

    let bind = (config.server.host.clone(), config.server.port);
    info!("Starting HMIS on {}:{}", bind.0, bind.1);

    // Start HTTP server
    let server_state = state.clone();
    HttpServer::new(move || {
        App::new()
            .app_data(server_state.clone())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header()
                    .max_age(3600),
            )
            .wrap(TracingLogger::default())
            .configure(api::configure)
            .default_service(web::to(api::not_found))
    })
    .bind(bind)?
    .run()
    .await?;

    // Write out billing selections still inside their debounce window
    state.hospital.shutdown().await?;
    info!("HMIS stopped");
    Ok(())
}
