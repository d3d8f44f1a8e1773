use std::sync::Arc;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{App, HttpServer, web};
use risk_api::model::ModelLoader;
use risk_api::{ResultStore, ScoringService, ServiceConfig, configure_routes};

const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

fn startup_error<E: std::fmt::Display>(context: &str, e: E) -> std::io::Error {
    log::error!("{}: {}", context, e);
    std::io::Error::other(format!("{}: {}", context, e))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = ServiceConfig::load().map_err(|e| startup_error("Invalid configuration", e))?;

    if let Ok(current_dir) = std::env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    }

    let scoring = match ModelLoader::load(&config.model_path) {
        Ok(model) => ScoringService::new(Arc::new(model)),
        Err(e) if config.require_model => {
            return Err(startup_error("Model loading failed", e));
        }
        Err(e) => {
            log::error!("Failed to load model: {}", e);
            log::warn!("Starting without a model; scoring endpoints will answer 503");
            ScoringService::unavailable()
        }
    };

    let store = ResultStore::new(&config.results_dir, config.result_ttl())
        .map_err(|e| startup_error("Results directory unusable", e))?;
    log::info!(
        "Batch results stored in {} (expire after {}s)",
        store.dir().display(),
        store.ttl().as_secs()
    );
    if let Err(e) = store.purge_expired() {
        log::warn!("Initial purge of expired results failed: {}", e);
    }

    let sweeper = store.clone();
    let sweep_every = config.result_ttl().clamp(Duration::from_secs(1), MAX_SWEEP_INTERVAL);
    actix_web::rt::spawn(async move {
        let mut interval = actix_web::rt::time::interval(sweep_every);
        loop {
            interval.tick().await;
            if let Err(e) = sweeper.purge_expired() {
                log::warn!("Purging expired results failed: {}", e);
            }
        }
    });

    let bind_address = config.bind_address();
    let workers = config.workers;
    let scoring = web::Data::new(scoring);
    let store = web::Data::new(store);
    let config = web::Data::new(config);

    log::info!("Starting server on {}", bind_address);

    let mut server = HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .wrap(Logger::default())
            .app_data(scoring.clone())
            .app_data(store.clone())
            .app_data(config.clone())
            .configure(configure_routes)
    });
    if let Some(workers) = workers {
        server = server.workers(workers);
    }

    server.bind(&bind_address)?.run().await
}
