mod config;
mod export;
mod extract;
mod fetch;
mod http;
mod intake;
mod jobs;
mod metrics;
mod models;
mod pipeline;
mod render;

use axum::{
    Form, Json, Router,
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use eyre::WrapErr;
use export::ExportError;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{ApiError, RunReport, ScrapeRequest};
use pipeline::{Pipeline, PipelineError, PipelineErrorKind};
use serde::Serialize;
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

const EMPTY_INPUT_MESSAGE: &str = "Please enter at least one TCIN to scrape.";

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "tcin.api", "server crashed: {err:#}");
    }
}

async fn run() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let pipeline = Pipeline::from_env();
    info!(
        target = "tcin.api",
        concurrency = pipeline.config().concurrency,
        timeout_ms = pipeline.config().timeout.as_millis() as u64,
        "scraper configured"
    );
    let (queue, _worker) = jobs::JobQueue::spawn(pipeline.clone());
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .wrap_err("installing prometheus recorder")?;

    let state = AppState {
        pipeline,
        queue,
        openapi: Arc::new(load_openapi()),
        prometheus_handle,
    };
    let app = app(state);

    let port: u16 = config::env_parse("PORT").unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "tcin.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("binding {addr}"))?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    pipeline: Pipeline,
    queue: jobs::JobQueue,
    openapi: Arc<serde_json::Value>,
    prometheus_handle: PrometheusHandle,
}

fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    Router::new()
        .route("/", get(index))
        .route("/scrape", post(scrape_form))
        .nest(
            "/api",
            Router::new()
                .route("/scrape", post(scrape_json))
                .route("/export", post(export_file)),
        )
        .nest(
            "/jobs",
            Router::new()
                .route("/scrape", post(enqueue_scrape_job))
                .route("/{id}", get(get_job_status)),
        )
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit_from_env()))
}

fn load_openapi() -> serde_json::Value {
    serde_yaml::from_str(include_str!("../docs/openapi.yaml"))
        .unwrap_or(json!({"openapi": "3.0.3"}))
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "target-pdp-scraper",
    }))
}

async fn index() -> Html<String> {
    crate::metrics::inc_requests("/");
    Html(render::form_page(
        None,
        "",
        models::DataSource::default(),
        models::ExportFormat::default(),
    ))
}

/// Form submit from `/`. Renders the results table with download links, or
/// the form again with a message when nothing was entered.
async fn scrape_form(
    State(state): State<AppState>,
    Form(req): Form<ScrapeRequest>,
) -> Result<Html<String>, AppError> {
    crate::metrics::inc_requests("/scrape");
    if req.tcins.trim().is_empty() {
        return Ok(Html(render::form_page(
            Some(EMPTY_INPUT_MESSAGE),
            "",
            req.source,
            req.format,
        )));
    }
    match state.pipeline.run(&req.tcins, req.source).await {
        Ok(report) => Ok(Html(render::results_page(&report, &req.tcins, req.format))),
        Err(err) if err.kind() == PipelineErrorKind::InvalidInput => Ok(Html(
            render::form_page(Some(err.detail()), &req.tcins, req.source, req.format),
        )),
        Err(err) => Err(err.into()),
    }
}

/// Run a scrape and return the report.
///
/// - Method: `POST`
/// - Path: `/api/scrape`
/// - Body: `ScrapeRequest`
/// - Response: `RunReport`
async fn scrape_json(
    State(state): State<AppState>,
    Json(req): Json<ScrapeRequest>,
) -> Result<Json<RunReport>, AppError> {
    crate::metrics::inc_requests("/api/scrape");
    let report = state.pipeline.run(&req.tcins, req.source).await?;
    Ok(Json(report))
}

/// Run a scrape and answer with the exported file as an attachment.
async fn export_file(
    State(state): State<AppState>,
    Json(req): Json<ScrapeRequest>,
) -> Result<Response, AppError> {
    crate::metrics::inc_requests("/api/export");
    let report = state.pipeline.run(&req.tcins, req.source).await?;
    let bytes = export::export(&report.rows, req.format)?;
    let disposition = format!("attachment; filename=\"{}\"", req.format.file_name());
    Ok((
        [
            (header::CONTENT_TYPE, req.format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

#[derive(Debug, Serialize)]
struct EnqueueResponse {
    job_id: String,
}

async fn enqueue_scrape_job(
    State(state): State<AppState>,
    Json(req): Json<ScrapeRequest>,
) -> Result<Json<EnqueueResponse>, AppError> {
    crate::metrics::inc_requests("/jobs/scrape");
    let id = state
        .queue
        .enqueue(req.tcins, req.source)
        .await
        .map_err(|err| AppError::Pipeline(PipelineError::internal("enqueue", err.error)))?;
    Ok(Json(EnqueueResponse {
        job_id: id.to_string(),
    }))
}

async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<jobs::JobInfo>, AppError> {
    let Ok(uuid) = uuid::Uuid::parse_str(&id) else {
        return Err(AppError::Pipeline(PipelineError::invalid_input(
            "jobs",
            "invalid_job_id",
        )));
    };
    state
        .queue
        .get(uuid)
        .await
        .map(Json)
        .ok_or(AppError::NotFound("job"))
}

async fn openapi_json(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json((*state.openapi).clone())
}

async fn swagger_ui() -> Html<&'static str> {
    Html(
        r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>Target PDP Scraper API Docs</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#,
    )
}

fn body_limit_from_env() -> usize {
    config::env_parse::<usize>("REQUEST_MAX_BYTES")
        .filter(|v| *v > 0)
        .unwrap_or(256 * 1024)
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

#[derive(Debug)]
enum AppError {
    Pipeline(PipelineError),
    Export(ExportError),
    NotFound(&'static str),
}

impl From<PipelineError> for AppError {
    fn from(value: PipelineError) -> Self {
        Self::Pipeline(value)
    }
}

impl From<ExportError> for AppError {
    fn from(value: ExportError) -> Self {
        Self::Export(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, payload) = match self {
            AppError::Pipeline(err) => {
                let status = match err.kind() {
                    PipelineErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                    PipelineErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (
                    status,
                    ApiError {
                        error: err.stage().to_string(),
                        detail: Some(err.detail().to_string()),
                    },
                )
            }
            AppError::Export(err) => {
                error!(target = "tcin.api", error = %err, "export_failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError {
                        error: "export".into(),
                        detail: Some(err.to_string()),
                    },
                )
            }
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                ApiError {
                    error: "not_found".into(),
                    detail: Some(format!("{what} not found")),
                },
            ),
        };
        (status, Json(payload)).into_response()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScraperConfig;
    use crate::fetch::testing::spawn_upstream;
    use axum::{body::Body, http::Request};
    use std::time::Duration;
    use tower::ServiceExt;

    const PRODUCT_HTML: &str = r#"<html><head><script type="application/ld+json">{"name":"Desk Lamp","offers":{"price":19.99},"image":["https://img/1.jpg"]}</script></head><body></body></html>"#;

    async fn test_app() -> Router {
        let base = spawn_upstream(Router::new().route(
            "/p/-/{slug}",
            get(|| async { Html(PRODUCT_HTML) }),
        ))
        .await;
        let mut config = ScraperConfig::default();
        config.page_base_url = format!("{base}/p/-/A-");
        config.aggregation.url = format!("{base}/unreachable");
        let pipeline = Pipeline::new(config);
        let (queue, _worker) = jobs::JobQueue::spawn(pipeline.clone());
        app(AppState {
            pipeline,
            queue,
            openapi: Arc::new(load_openapi()),
            prometheus_handle: PrometheusBuilder::new().build_recorder().handle(),
        })
    }

    fn json_request(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn form_request(tcins: &str, source: &str, format: &str) -> Request<Body> {
        let body = format!(
            "tcins={}&source={source}&format={format}",
            urlencoding::encode(tcins)
        );
        Request::builder()
            .method("POST")
            .uri("/scrape")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        serde_json::from_str(&body_text(response).await).unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let response = test_app()
            .await
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn index_serves_form() {
        let response = test_app()
            .await
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;
        assert!(html.contains("<textarea id='tcins' name='tcins'>"));
        assert!(html.contains("Scrape Target Products"));
    }

    #[tokio::test]
    async fn api_scrape_returns_rows() {
        let response = test_app()
            .await
            .oneshot(json_request(
                "/api/scrape",
                json!({"tcins": "12345\n\n12345\n 67890 ", "source": "page"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let report = body_json(response).await;
        let rows = report["rows"].as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["identifier"], "12345");
        assert_eq!(rows[0]["title"], "Desk Lamp");
        assert_eq!(rows[1]["identifier"], "67890");
        assert_eq!(report["succeeded"], 2);
    }

    #[tokio::test]
    async fn api_scrape_rejects_empty_input() {
        let response = test_app()
            .await
            .oneshot(json_request("/api/scrape", json!({"tcins": " \n "})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "intake");
        assert_eq!(body["detail"], "no identifiers provided");
    }

    #[tokio::test]
    async fn api_scrape_reports_batch_failure_notice() {
        let response = test_app()
            .await
            .oneshot(json_request(
                "/api/scrape",
                json!({"tcins": "1\n2", "source": "aggregation"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let report = body_json(response).await;
        assert_eq!(report["failed"], 2);
        assert!(report["notice"].as_str().unwrap().contains("HTTP 404"));
    }

    #[tokio::test]
    async fn api_export_sends_attachment() {
        let response = test_app()
            .await
            .oneshot(json_request(
                "/api/export",
                json!({"tcins": "12345", "format": "excel"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
        );
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"target_product_data.xlsx\""
        );
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(bytes.starts_with(b"PK"));
    }

    #[tokio::test]
    async fn api_export_csv_has_header_and_row() {
        let response = test_app()
            .await
            .oneshot(json_request("/api/export", json!({"tcins": "12345"})))
            .await
            .unwrap();
        let csv = body_text(response).await;
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("identifier,title,brand,regular_price,sale_price,review_count,star_rating,image_urls,error")
        );
        assert_eq!(
            lines.next(),
            Some(r#"12345,Desk Lamp,,19.99,19.99,,,"[""https://img/1.jpg""]","#)
        );
    }

    #[tokio::test]
    async fn form_submit_renders_results() {
        let response = test_app()
            .await
            .oneshot(form_request("12345\n67890", "page", "csv"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;
        assert!(html.contains("<td>Desk Lamp</td>"));
        assert!(html.contains("target_product_data.csv"));
        assert!(html.contains("target_product_data.xlsx"));
    }

    #[tokio::test]
    async fn form_submit_without_input_shows_message() {
        let response = test_app()
            .await
            .oneshot(form_request("  \n", "page", "csv"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains(EMPTY_INPUT_MESSAGE));
    }

    #[tokio::test]
    async fn job_runs_to_completion() {
        let app = test_app().await;
        let response = app
            .clone()
            .oneshot(json_request("/jobs/scrape", json!({"tcins": "1\n2\n3"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let job_id = body_json(response).await["job_id"]
            .as_str()
            .unwrap()
            .to_string();

        let mut last = serde_json::Value::Null;
        for _ in 0..100 {
            let response = app
                .clone()
                .oneshot(
                    Request::get(format!("/jobs/{job_id}"))
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            last = body_json(response).await;
            if last["state"] == "completed" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(last["state"], "completed");
        assert_eq!(last["completed"], 3);
        assert_eq!(last["total"], 3);
        assert_eq!(last["result"]["rows"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn job_lookup_errors() {
        let app = test_app().await;
        let bad = app
            .clone()
            .oneshot(Request::get("/jobs/not-a-uuid").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

        let missing = app
            .oneshot(
                Request::get(format!("/jobs/{}", uuid::Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn openapi_document_loads() {
        let response = test_app()
            .await
            .oneshot(Request::get("/openapi.json").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let doc = body_json(response).await;
        assert!(doc["paths"]["/api/scrape"].is_object());
    }
}
