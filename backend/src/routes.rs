use std::io::Read;

use actix_multipart::Multipart;
use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::{HttpResponse, web};
use futures::{StreamExt, TryStreamExt};
use log::{error, info};
use risk_shared::{CreditApplication, ServiceMessage};
use serde::Deserialize;

use crate::config::ServiceConfig;
use crate::errors::ApiError;
use crate::scoring::ScoringService;
use crate::storage::ResultStore;

pub const DOWNLOAD_FILE_NAME: &str = "credit_risk_results.csv";
const UPLOAD_FIELD: &str = "file";

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    let json_config = web::JsonConfig::default()
        .error_handler(|err, _req| ApiError::BadRequest(err.to_string()).into());
    let query_config = web::QueryConfig::default()
        .error_handler(|err, _req| ApiError::BadRequest(err.to_string()).into());

    cfg.app_data(json_config)
        .app_data(query_config)
        .service(web::resource("/").route(web::get().to(root)))
        .service(web::resource("/model-info").route(web::get().to(model_info)))
        .service(web::resource("/predict").route(web::post().to(predict)))
        .service(web::resource("/batch-predict").route(web::post().to(batch_predict)))
        .service(web::resource("/download-results").route(web::get().to(download_results)));
}

async fn root() -> HttpResponse {
    HttpResponse::Ok().json(ServiceMessage {
        message: "Zentro Credit Risk Prediction API".to_string(),
    })
}

async fn model_info(scoring: web::Data<ScoringService>) -> Result<HttpResponse, ApiError> {
    let info = scoring.model_info()?;
    Ok(HttpResponse::Ok().json(info))
}

async fn predict(
    scoring: web::Data<ScoringService>,
    application: web::Json<CreditApplication>,
) -> Result<HttpResponse, ApiError> {
    let result = scoring.predict(&application)?;
    info!("Prediction served: p={:.4} level={}", result.default_probability, result.risk_level);
    Ok(HttpResponse::Ok().json(result))
}

async fn batch_predict(
    scoring: web::Data<ScoringService>,
    store: web::Data<ResultStore>,
    config: web::Data<ServiceConfig>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    scoring.classifier()?;

    let mut upload: Option<Vec<u8>> = None;
    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        let is_upload = upload.is_none() && field.name() == Some(UPLOAD_FIELD);
        let mut data = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk =
                chunk.map_err(|e| ApiError::BadRequest(format!("Failed to read upload: {}", e)))?;
            if !is_upload {
                continue;
            }
            if data.len() + chunk.len() > config.max_upload_bytes {
                return Err(ApiError::BadRequest(format!(
                    "Uploaded file exceeds {} bytes",
                    config.max_upload_bytes
                )));
            }
            data.extend_from_slice(&chunk);
        }
        if is_upload {
            upload = Some(data);
        }
    }
    let upload = upload.ok_or_else(|| {
        ApiError::BadRequest(format!("Missing upload field '{}'", UPLOAD_FIELD))
    })?;

    info!("Batch upload received: {} bytes", upload.len());
    let scoring = scoring.clone();
    let store = store.clone();
    let result = web::block(move || scoring.batch_predict(&store, &upload))
        .await
        .map_err(|e| {
            error!("Batch worker failed: {}", e);
            ApiError::Internal("Batch processing failed".to_string())
        })??;

    info!(
        "Batch scored: {} records ({} high, {} medium, {} low)",
        result.total_records, result.high_risk, result.medium_risk, result.low_risk
    );
    Ok(HttpResponse::Ok().json(result))
}

#[derive(Deserialize)]
struct DownloadQuery {
    path: String,
}

/// Hand out a stored result exactly once. The file is claimed and read
/// whole before responding, so the body is always the complete table.
async fn download_results(
    store: web::Data<ResultStore>,
    query: web::Query<DownloadQuery>,
) -> Result<HttpResponse, ApiError> {
    let store = store.clone();
    let reference = query.into_inner().path;
    let body = web::block(move || -> Result<Vec<u8>, ApiError> {
        let mut file = store.claim(&reference)?;
        let mut body = Vec::new();
        file.read_to_end(&mut body).map_err(|e| {
            error!("Failed to read results {}: {}", reference, e);
            ApiError::Internal("Failed to read results".to_string())
        })?;
        Ok(body)
    })
    .await
    .map_err(|e| {
        error!("Download worker failed: {}", e);
        ApiError::Internal("Failed to read results".to_string())
    })??;

    Ok(HttpResponse::Ok()
        .content_type("text/csv")
        .insert_header(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(DOWNLOAD_FILE_NAME.to_string())],
        })
        .body(body))
}
