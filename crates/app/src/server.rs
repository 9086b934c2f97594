use anyhow::Context;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use passage_search_core::{SearchCoordinator, SearchError, SearchHit, DEFAULT_TOP_K};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{error, info, warn};

pub const MAX_QUERY_CHARS: usize = 600;
pub const MAX_TOP_K: i64 = 10;

/// Local UI dev and preview servers.
const UI_ORIGINS: [&str; 4] = [
    "http://127.0.0.1:5173",
    "http://localhost:5173",
    "http://127.0.0.1:4173",
    "http://localhost:4173",
];

#[derive(Clone)]
pub struct AppState {
    coordinator: Arc<SearchCoordinator>,
}

impl AppState {
    pub fn new(coordinator: Arc<SearchCoordinator>) -> Self {
        Self { coordinator }
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    query: String,
    #[serde(default = "default_top_k")]
    top_k: i64,
    #[serde(default = "default_rerank")]
    rerank: bool,
}

fn default_top_k() -> i64 {
    DEFAULT_TOP_K as i64
}

fn default_rerank() -> bool {
    true
}

impl SearchRequest {
    /// Trimmed query and checked `top_k`.
    fn validate(&self) -> Result<(String, usize), String> {
        let query = self.query.trim();
        if query.is_empty() {
            return Err("query must not be empty".to_string());
        }
        if query.chars().count() > MAX_QUERY_CHARS {
            return Err(format!("query must be at most {MAX_QUERY_CHARS} characters"));
        }
        if !(1..=MAX_TOP_K).contains(&self.top_k) {
            return Err(format!("top_k must be between 1 and {MAX_TOP_K}"));
        }
        Ok((query.to_string(), self.top_k as usize))
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/search", post(search))
        .layer(cors_layer())
        .with_state(state)
}

fn cors_layer() -> CorsLayer {
    let origins = UI_ORIGINS
        .into_iter()
        .map(HeaderValue::from_static)
        .collect::<Vec<_>>();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

pub async fn serve(coordinator: Arc<SearchCoordinator>, bind: &str) -> anyhow::Result<()> {
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid bind address {bind}"))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "retrieval api listening");

    axum::serve(listener, router(AppState::new(coordinator)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server shutdown")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "failed to listen for ctrl-c");
    }
    info!("shutting down");
}

async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

async fn search(
    State(state): State<AppState>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<Vec<SearchHit>>, (StatusCode, Json<ErrorBody>)> {
    let Json(request) = payload.map_err(|rejection| bad_request(rejection.body_text()))?;
    let (query, top_k) = request.validate().map_err(bad_request)?;
    let rerank = request.rerank;
    let coordinator = Arc::clone(&state.coordinator);

    let hits = tokio::task::spawn_blocking(move || coordinator.search(&query, top_k, rerank))
        .await
        .map_err(|join_error| {
            error!(%join_error, "search task did not complete");
            internal_error()
        })?
        .map_err(search_failure)?;
    Ok(Json(hits))
}

fn search_failure(error: SearchError) -> (StatusCode, Json<ErrorBody>) {
    match error {
        SearchError::InvalidArgument(message) => bad_request(message),
        SearchError::MissingArtifacts(message) => {
            warn!(%message, "retrieval artifacts missing");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorBody {
                    detail: format!("retrieval artifacts missing: {message}"),
                }),
            )
        }
        other => {
            error!(error = %other, "unexpected retrieval failure");
            internal_error()
        }
    }
}

fn bad_request(message: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            detail: message.into(),
        }),
    )
}

fn internal_error() -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            detail: "Retrieval failed.".to_string(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, Response};
    use passage_search_core::{
        build_chunk_file, build_index, ArtifactPaths, ArtifactStore, CharacterNgramEmbedder,
        ChunkingConfig, EmbedderConfig, OptionalReranker,
    };
    use serde_json::{json, Value};
    use std::fs;
    use std::path::Path;
    use tower::ServiceExt;

    const PAGES: [&str; 6] = [
        "Pressure gauges read in bar.",
        "Relief valves vent to tank.",
        "Pumps move hydraulic fluid.",
        "Filters trap fine particles.",
        "Hoses are rated for pressure.",
        "Seals keep the fluid inside.",
    ];

    fn build_corpus(root: &Path) -> ArtifactPaths {
        let paths = ArtifactPaths::from_root(root);
        fs::create_dir_all(root.join("data")).unwrap();
        let lines = PAGES
            .iter()
            .enumerate()
            .map(|(position, text)| json!({ "page": position + 1, "text": text }).to_string())
            .collect::<Vec<_>>();
        fs::write(&paths.pages, lines.join("\n")).unwrap();

        let config = ChunkingConfig {
            target_chars: 30,
            min_chars: 10,
            overlap_ratio: 0.0,
            ..ChunkingConfig::default()
        };
        build_chunk_file(&paths.pages, &paths.chunks, &config).unwrap();
        build_index(&paths, &CharacterNgramEmbedder { dimensions: 32 }, 4).unwrap();
        paths
    }

    fn app(paths: ArtifactPaths) -> Router {
        let store = ArtifactStore::new(paths, EmbedderConfig::CharacterNgram { dimensions: 32 });
        let coordinator = SearchCoordinator::new(Arc::new(store), OptionalReranker::disabled());
        router(AppState::new(Arc::new(coordinator)))
    }

    fn search_request(body: Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/api/search")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: Response<Body>) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(ArtifactPaths::from_root(dir.path()))
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn search_defaults_to_five_hits() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(build_corpus(dir.path()))
            .oneshot(search_request(json!({ "query": "  hydraulic fluid  " })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let hits = json_body(response).await;
        let hits = hits.as_array().unwrap();
        assert_eq!(hits.len(), 5);
        for hit in hits {
            let keys = hit.as_object().unwrap().keys().cloned().collect::<Vec<_>>();
            assert_eq!(
                keys.len(),
                7,
                "unexpected result shape: {keys:?}"
            );
            assert!(hit.get("text").is_none());
            assert!(hit.get("rank").is_none());
        }
        let scores = hits
            .iter()
            .map(|hit| hit["score"].as_f64().unwrap())
            .collect::<Vec<_>>();
        assert!(scores.windows(2).all(|pair| pair[0] >= pair[1]));
    }

    #[tokio::test]
    async fn explicit_top_k_and_rerank_flag_are_honoured() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(build_corpus(dir.path()))
            .oneshot(search_request(
                json!({ "query": "relief valves", "top_k": 2, "rerank": false }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn invalid_requests_are_bad_requests() {
        let dir = tempfile::tempdir().unwrap();
        let paths = build_corpus(dir.path());
        let too_long = "x".repeat(MAX_QUERY_CHARS + 1);

        for body in [
            json!({ "query": "   " }),
            json!({ "query": too_long }),
            json!({ "query": "pumps", "top_k": 0 }),
            json!({ "query": "pumps", "top_k": 11 }),
            json!({ "query": "pumps", "top_k": -3 }),
            json!({ "query": "pumps", "top_k": "abc" }),
            json!({ "query": "pumps", "top_k": 2.5 }),
            json!({ "top_k": 2 }),
            json!({ "query": "pumps", "rerank": null }),
        ] {
            let response = app(paths.clone())
                .oneshot(search_request(body.clone()))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
            assert!(json_body(response).await["detail"].is_string());
        }
    }

    #[tokio::test]
    async fn missing_artifacts_are_service_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(ArtifactPaths::from_root(dir.path()))
            .oneshot(search_request(json!({ "query": "pumps" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn internal_failures_do_not_leak_details() {
        let dir = tempfile::tempdir().unwrap();
        let paths = build_corpus(dir.path());
        fs::write(&paths.ids, r#"["chunk-000000", "no-such-chunk"]"#).unwrap();

        let response = app(paths)
            .oneshot(search_request(json!({ "query": "pumps" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            json_body(response).await,
            json!({ "detail": "Retrieval failed." })
        );
    }

    #[tokio::test]
    async fn local_ui_origins_pass_cors_preflight() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(ArtifactPaths::from_root(dir.path()))
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/api/search")
                    .header(header::ORIGIN, "http://localhost:5173")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .and_then(|value| value.to_str().ok()),
            Some("http://localhost:5173")
        );
    }
}
