use std::sync::Arc;
use std::time::Duration;

use actix_web::http::StatusCode;
use actix_web::http::header::CONTENT_TYPE;
use actix_web::{App, test, web};
use ndarray::{Array2, ArrayView2};
use risk_api::model::{Classifier, InferenceError};
use risk_api::scoring::classify_risk;
use risk_api::{ResultStore, ScoringService, ServiceConfig, configure_routes};
use risk_shared::{BatchResult, ModelInfo, PredictionResult, RiskLevel};
use serde_json::{Value, json};

const BOUNDARY: &str = "----risk-api-test-boundary";

/// Always answers the same default probability.
struct FixedProbability(f64);

impl Classifier for FixedProbability {
    fn model_type(&self) -> &str {
        "FixedProbability"
    }

    fn n_features_in(&self) -> usize {
        6
    }

    fn predict_proba(&self, features: ArrayView2<'_, f64>) -> Result<Array2<f64>, InferenceError> {
        let mut out = Array2::zeros((features.nrows(), 2));
        out.column_mut(0).fill(1.0 - self.0);
        out.column_mut(1).fill(self.0);
        Ok(out)
    }
}

/// Uses the debt-to-income ratio directly as the default probability.
struct DebtRatio;

impl Classifier for DebtRatio {
    fn model_type(&self) -> &str {
        "DebtRatio"
    }

    fn n_features_in(&self) -> usize {
        6
    }

    fn predict_proba(&self, features: ArrayView2<'_, f64>) -> Result<Array2<f64>, InferenceError> {
        let mut out = Array2::zeros((features.nrows(), 2));
        for (i, row) in features.outer_iter().enumerate() {
            let p = row[5].clamp(0.0, 1.0);
            out[[i, 0]] = 1.0 - p;
            out[[i, 1]] = p;
        }
        Ok(out)
    }
}

struct Harness {
    tmp: tempfile::TempDir,
    scoring: web::Data<ScoringService>,
    store: web::Data<ResultStore>,
    config: web::Data<ServiceConfig>,
}

impl Harness {
    fn new(scoring: ScoringService) -> Self {
        let tmp = tempfile::tempdir().expect("tmpdir");
        let store = ResultStore::new(tmp.path().join("results"), Duration::from_secs(60))
            .expect("store");
        let config = ServiceConfig {
            results_dir: store.dir().to_path_buf(),
            max_upload_bytes: 4096,
            ..ServiceConfig::default()
        };
        Self {
            tmp,
            scoring: web::Data::new(scoring),
            store: web::Data::new(store),
            config: web::Data::new(config),
        }
    }

    fn with_model<C: Classifier + 'static>(model: C) -> Self {
        Self::new(ScoringService::new(Arc::new(model)))
    }

    fn result_files(&self) -> usize {
        std::fs::read_dir(self.store.dir()).unwrap().count()
    }
}

macro_rules! init_app {
    ($harness:expr) => {
        test::init_service(
            App::new()
                .app_data($harness.scoring.clone())
                .app_data($harness.store.clone())
                .app_data($harness.config.clone())
                .configure(configure_routes),
        )
        .await
    };
}

fn multipart_body(field: &str, filename: &str, content: &str) -> Vec<u8> {
    format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\
         Content-Type: text/csv\r\n\r\n{content}\r\n--{b}--\r\n",
        b = BOUNDARY,
    )
    .into_bytes()
}

fn upload_request(content: &str) -> test::TestRequest {
    test::TestRequest::post()
        .uri("/batch-predict")
        .insert_header((
            CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        ))
        .set_payload(multipart_body("file", "applications.csv", content))
}

fn sample_application() -> Value {
    json!({
        "age": 35,
        "income": 50000,
        "loan_amount": 10000,
        "credit_history": 5,
        "employment_length": 3,
        "debt_to_income": 0.2
    })
}

const BATCH_CSV: &str = "applicant,age,income,loan_amount,credit_history,\
                         employment_length,debt_to_income\n\
                         a,35,50000,10000,5,3,0.2\n\
                         b,41,42000,15000,8,6,0.55\n\
                         c,29,18000,12000,1,1,0.9\n\
                         d,60,90000,5000,30,25,0.05\n\
                         e,38,30000,9000,4,2,0.7\n";

fn link_reference(link: &str) -> &str {
    link.strip_prefix("/download-results?path=")
        .expect("download link format")
}

#[actix_web::test]
async fn root_identifies_the_service() {
    let harness = Harness::with_model(FixedProbability(0.1));
    let app = init_app!(harness);

    let req = test::TestRequest::get().uri("/").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["message"], "Zentro Credit Risk Prediction API");
}

#[actix_web::test]
async fn model_info_reports_feature_layout() {
    let harness = Harness::with_model(FixedProbability(0.1));
    let app = init_app!(harness);

    let req = test::TestRequest::get().uri("/model-info").to_request();
    let info: ModelInfo = test::call_and_read_body_json(&app, req).await;
    assert_eq!(info.model_type, "FixedProbability");
    assert_eq!(info.expected_features, 6);
    assert_eq!(
        info.required_features,
        vec![
            "age",
            "income",
            "loan_amount",
            "credit_history",
            "employment_length",
            "debt_to_income"
        ]
    );
}

#[actix_web::test]
async fn predict_maps_fixed_probability_to_high_risk() {
    let harness = Harness::with_model(FixedProbability(0.85));
    let app = init_app!(harness);

    let req = test::TestRequest::post()
        .uri("/predict")
        .set_json(sample_application())
        .to_request();
    let result: PredictionResult = test::call_and_read_body_json(&app, req).await;
    assert_eq!(result.default_probability, 0.85);
    assert_eq!(result.risk_level, RiskLevel::High);
    assert_eq!(result.risk_score, 3);
}

#[actix_web::test]
async fn predict_rejects_incomplete_application() {
    let harness = Harness::with_model(FixedProbability(0.85));
    let app = init_app!(harness);

    let mut body = sample_application();
    body.as_object_mut().unwrap().remove("loan_amount");
    let req = test::TestRequest::post()
        .uri("/predict")
        .set_json(body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert!(body["detail"].as_str().unwrap().contains("loan_amount"));

    let req = test::TestRequest::post()
        .uri("/predict")
        .set_json(json!({"age": "thirty", "income": 1, "loan_amount": 1,
                         "credit_history": 1, "employment_length": 1, "debt_to_income": 0.1}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn predict_surfaces_model_failures_as_client_errors() {
    struct WrongWidth;

    impl Classifier for WrongWidth {
        fn model_type(&self) -> &str {
            "WrongWidth"
        }

        fn n_features_in(&self) -> usize {
            4
        }

        fn predict_proba(
            &self,
            features: ArrayView2<'_, f64>,
        ) -> Result<Array2<f64>, InferenceError> {
            Err(InferenceError::FeatureCountMismatch {
                expected: 4,
                found: features.ncols(),
            })
        }
    }

    let harness = Harness::with_model(WrongWidth);
    let app = init_app!(harness);

    let req = test::TestRequest::post()
        .uri("/predict")
        .set_json(sample_application())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(
        body["detail"],
        "Model inference failed: Model expects 4 features, got 6"
    );
}

#[actix_web::test]
async fn endpoints_answer_503_without_a_model() {
    let harness = Harness::new(ScoringService::unavailable());
    let app = init_app!(harness);

    let req = test::TestRequest::get().uri("/model-info").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["detail"], "Model not loaded");

    let req = test::TestRequest::post()
        .uri("/predict")
        .set_json(sample_application())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    let resp = test::call_service(&app, upload_request(BATCH_CSV).to_request()).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    let req = test::TestRequest::get().uri("/").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[actix_web::test]
async fn batch_missing_income_names_the_column() {
    let harness = Harness::with_model(FixedProbability(0.5));
    let app = init_app!(harness);

    let csv = "age,loan_amount,credit_history,employment_length,debt_to_income\n35,1,1,1,0.1\n";
    let resp = test::call_service(&app, upload_request(csv).to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["detail"], "Missing required columns: income");
    assert_eq!(harness.result_files(), 0);
}

#[actix_web::test]
async fn batch_counts_cover_every_record() {
    let harness = Harness::with_model(DebtRatio);
    let app = init_app!(harness);

    let result: BatchResult =
        test::call_and_read_body_json(&app, upload_request(BATCH_CSV).to_request()).await;
    assert_eq!(result.total_records, 5);
    assert_eq!(result.high_risk, 2);
    assert_eq!(result.medium_risk, 1);
    assert_eq!(result.low_risk, 2);
    assert_eq!(
        result.high_risk + result.medium_risk + result.low_risk,
        result.total_records
    );
    assert_eq!(harness.result_files(), 1);
}

#[actix_web::test]
async fn batch_output_tiers_match_their_probabilities() {
    let harness = Harness::with_model(DebtRatio);
    let app = init_app!(harness);

    let result: BatchResult =
        test::call_and_read_body_json(&app, upload_request(BATCH_CSV).to_request()).await;
    let req = test::TestRequest::get()
        .uri(&result.download_link)
        .to_request();
    let body = test::call_and_read_body(&app, req).await;

    let mut reader = csv::Reader::from_reader(body.as_ref());
    let headers = reader.headers().unwrap().clone();
    assert_eq!(
        headers.iter().collect::<Vec<_>>(),
        vec![
            "age",
            "income",
            "loan_amount",
            "credit_history",
            "employment_length",
            "debt_to_income",
            "default_probability",
            "risk_level"
        ]
    );

    let mut rows = 0;
    for record in reader.records() {
        let record = record.unwrap();
        let probability: f64 = record[6].parse().unwrap();
        let (level, _) = classify_risk(probability);
        assert_eq!(record[7], level.to_string());
        assert_eq!(record[5], record[6]);
        rows += 1;
    }
    assert_eq!(rows, result.total_records);
}

#[actix_web::test]
async fn download_reference_is_single_use() {
    let harness = Harness::with_model(FixedProbability(0.2));
    let app = init_app!(harness);

    let result: BatchResult =
        test::call_and_read_body_json(&app, upload_request(BATCH_CSV).to_request()).await;
    let reference = link_reference(&result.download_link).to_string();
    assert!(!reference.contains('/'));

    let req = test::TestRequest::get()
        .uri(&result.download_link)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let disposition = resp
        .headers()
        .get("content-disposition")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.starts_with("attachment"));
    assert!(disposition.contains("credit_risk_results.csv"));
    let body = test::read_body(resp).await;
    assert!(body.starts_with(b"age,income"));
    assert_eq!(harness.result_files(), 0);

    let req = test::TestRequest::get()
        .uri(&result.download_link)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["detail"], "Results file not found");
}

#[actix_web::test]
async fn ranged_download_still_returns_the_whole_file() {
    let harness = Harness::with_model(FixedProbability(0.2));
    let app = init_app!(harness);

    let result: BatchResult =
        test::call_and_read_body_json(&app, upload_request(BATCH_CSV).to_request()).await;
    let req = test::TestRequest::get()
        .uri(&result.download_link)
        .insert_header(("range", "bytes=0-9"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = test::read_body(resp).await;
    let text = std::str::from_utf8(&body).unwrap();
    assert!(text.starts_with("age,income"));
    assert!(text.lines().next().unwrap().ends_with("risk_level"));
    assert_eq!(text.lines().count(), result.total_records + 1);

    let req = test::TestRequest::get()
        .uri(&result.download_link)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn download_without_reference_is_a_json_bad_request() {
    let harness = Harness::with_model(FixedProbability(0.2));
    let app = init_app!(harness);

    let req = test::TestRequest::get().uri("/download-results").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert!(body["detail"].as_str().unwrap().contains("path"));
}

#[actix_web::test]
async fn download_ignores_paths_outside_the_store() {
    let harness = Harness::with_model(FixedProbability(0.2));
    let app = init_app!(harness);

    let outside = harness.tmp.path().join("credit_risk_private.csv");
    std::fs::write(&outside, "secret").unwrap();

    let req = test::TestRequest::get()
        .uri(&format!("/download-results?path={}", outside.display()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert!(outside.exists());
}

#[actix_web::test]
async fn batch_upload_is_validated_before_scoring() {
    let harness = Harness::with_model(FixedProbability(0.2));
    let app = init_app!(harness);

    let req = test::TestRequest::post()
        .uri("/batch-predict")
        .insert_header((
            CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        ))
        .set_payload(multipart_body("document", "a.csv", BATCH_CSV))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["detail"], "Missing upload field 'file'");

    let oversized = format!(
        "age,income,loan_amount,credit_history,employment_length,debt_to_income\n{}",
        "35,50000,10000,5,3,0.2\n".repeat(400)
    );
    let resp = test::call_service(&app, upload_request(&oversized).to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let header_only = "age,income,loan_amount,credit_history,employment_length,debt_to_income\n";
    let resp = test::call_service(&app, upload_request(header_only).to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(harness.result_files(), 0);
}

#[actix_web::test]
async fn bundled_model_scores_sample_application() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../ml_zentro/zentro_rf_pipeline.json");
    let model = risk_api::model::ModelLoader::load(&path).expect("bundled model");
    let harness = Harness::with_model(model);
    let app = init_app!(harness);

    let req = test::TestRequest::post()
        .uri("/predict")
        .set_json(sample_application())
        .to_request();
    let result: PredictionResult = test::call_and_read_body_json(&app, req).await;
    assert!((0.0..=1.0).contains(&result.default_probability));
    let (level, score) = classify_risk(result.default_probability);
    assert_eq!(result.risk_level, level);
    assert_eq!(result.risk_score, score);
}
