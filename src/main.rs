use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use strategy_engine::{
    model, ConfidencePolicy, DirectPrediction, Engine, EngineConfig, EngineError, FeatureVector,
    Maneuver, RaceStateSnapshot, RankedRecommendation,
};

// ---------- Request types ----------

#[derive(Deserialize, Debug)]
struct EvaluateRequest {
    snapshot: RaceStateSnapshot,
    // falls back to the server's default config when absent
    config: Option<EngineConfig>,
}

#[derive(Deserialize, Debug)]
struct PredictRequest {
    // keyed by feature name, e.g. {"tire_delta": -0.4, "track_gap": 1.2, ...}
    features: HashMap<String, f64>,
    #[serde(default)]
    confidence: Option<ConfidencePolicy>,
}

#[derive(Deserialize, Debug)]
struct ReloadRequest {
    model_path: String,
    #[serde(default)]
    meta_path: Option<String>,
}

type ApiError = (StatusCode, Json<serde_json::Value>);

// ---------- Server state ----------

#[derive(Clone)]
struct AppState {
    engine: Arc<Engine>,
    default_config: Arc<EngineConfig>,
}

fn engine_error(e: EngineError) -> ApiError {
    let status = if e.is_retryable() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    (status, Json(json!({ "error": e.to_string(), "code": e.code() })))
}

fn load_bundle(model_path: &str, meta_path: Option<&str>) -> anyhow::Result<model::ModelBundle> {
    match meta_path {
        #[cfg(feature = "torch")]
        Some(meta) => model::torch::load_torch(model_path, meta),
        #[cfg(not(feature = "torch"))]
        Some(_) => anyhow::bail!("META_PATH given but built without the `torch` feature"),
        None => model::load_logistic(model_path),
    }
}

// ---------- Handlers ----------

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "ok": true, "model_loaded": state.engine.model_loaded() }))
}

async fn evaluate(
    State(state): State<AppState>,
    Json(req): Json<EvaluateRequest>,
) -> Result<Json<RankedRecommendation>, ApiError> {
    let cfg = req.config.unwrap_or_else(|| (*state.default_config).clone());
    let engine = state.engine.clone();
    // scoring is CPU-bound and fans out on rayon; keep it off the async workers
    let out = tokio::task::spawn_blocking(move || engine.evaluate(&req.snapshot, &cfg))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))))?
        .map_err(engine_error)?;
    Ok(Json(out))
}

async fn predict(
    State(state): State<AppState>,
    Path(maneuver): Path<Maneuver>,
    Json(req): Json<PredictRequest>,
) -> Result<Json<DirectPrediction>, ApiError> {
    // input shape errors come from the request body, not the loaded model
    let fv = FeatureVector::from_named(&req.features).map_err(|e| {
        (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({ "error": e.to_string(), "code": e.code() })))
    })?;
    let policy = req.confidence.unwrap_or(state.default_config.confidence);
    let out = state.engine.predict(maneuver, &fv, policy).map_err(engine_error)?;
    Ok(Json(out))
}

async fn reload(
    State(state): State<AppState>,
    Json(req): Json<ReloadRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let bundle = load_bundle(&req.model_path, req.meta_path.as_deref()).map_err(|e| {
        tracing::warn!("reload failed: {:#}", e);
        (StatusCode::BAD_REQUEST, Json(json!({ "error": format!("{:#}", e) })))
    })?;
    state.engine.reload_model(bundle).map_err(engine_error)?;
    tracing::info!("reloaded model from {}", req.model_path);
    Ok(Json(json!({ "ok": true })))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let model_path = std::env::var("MODEL_PATH").ok();
    let meta_path = std::env::var("META_PATH").ok();
    let port: u16 = std::env::var("PORT").ok().and_then(|s| s.parse().ok()).unwrap_or(8080);

    let default_config = match std::env::var("ENGINE_CONFIG") {
        Ok(path) => EngineConfig::load(&path)?,
        Err(_) => EngineConfig::default(),
    };

    let engine = Engine::new();
    match model_path {
        Some(path) => {
            let bundle = load_bundle(&path, meta_path.as_deref())?;
            tracing::info!("loaded model {:?}; feat_list[{}]: {:?}", path, bundle.feat_list.len(), &bundle.feat_list);
            engine.reload_model(bundle)?;
        }
        None => tracing::warn!("MODEL_PATH not set; /evaluate returns model_unavailable until /model/reload"),
    }

    let state = AppState {
        engine: Arc::new(engine),
        default_config: Arc::new(default_config),
    };

    let app = axum::Router::new()
        .route("/health", get(health))
        .route("/evaluate", post(evaluate))
        .route("/predict/:maneuver", post(predict))
        .route("/model/reload", post(reload))
        .with_state(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
