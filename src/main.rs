//! Shipment Merge - HTTP front for the per-client grouping and reconciliation pipelines.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use shipment_merge::config::{ConfigStore, PipelineConfig, Settings};
use shipment_merge::dedup::{DuplicateIndex, DuplicateMatch};
use shipment_merge::fragments::collect_by_key;
use shipment_merge::reconcile::{reconcile_with_stats, ReconcileStats};
use shipment_merge::{group_and_merge, sheet_parser, Record, ReconcileSpec};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    configs: Arc<ConfigStore>,
}

type ApiError = (StatusCode, String);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "shipment_merge=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env();
    let configs = ConfigStore::load_from_dir(std::path::Path::new(&settings.config_dir))?;
    info!("Loaded {} configs: {:?}", configs.list().len(), configs.list());

    let state = AppState {
        configs: Arc::new(configs),
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/configs", get(list_configs))
        .route("/configs/:name", get(get_config))
        .route("/group", post(group_records))
        .route("/reconcile", post(reconcile_fragments))
        .route("/fragments", post(collect_fragments))
        .route("/duplicates", post(find_duplicate))
        .route("/sheets", post(parse_sheets))
        .layer(DefaultBodyLimit::max(50 * 1024 * 1024)) // 50MB
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    info!("Server listening on http://{}", settings.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> &'static str {
    "ok"
}

async fn list_configs(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.configs.list())
}

async fn get_config(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<PipelineConfig>, StatusCode> {
    state.configs.get(&name).map(Json).ok_or(StatusCode::NOT_FOUND)
}

#[derive(Deserialize)]
struct ConfigQuery {
    config: Option<String>,
}

#[derive(Serialize)]
struct RecordsResponse {
    run_id: String,
    config: String,
    input_count: usize,
    records: Vec<Record>,
}

#[derive(Deserialize)]
struct GroupRequest {
    records: Vec<Record>,
    #[serde(default)]
    threshold: Option<f64>,
}

/// Group invoices by consignee address and merge each group.
async fn group_records(
    State(state): State<AppState>,
    Query(query): Query<ConfigQuery>,
    Json(request): Json<GroupRequest>,
) -> Result<Json<RecordsResponse>, ApiError> {
    let config = resolve_config(&state, &query)?;
    let mut rules = config.grouping.clone();
    if let Some(threshold) = request.threshold {
        rules.threshold = threshold;
    }

    let input_count = request.records.len();
    let scorer = rules.scorer.build();
    let records = group_and_merge(request.records, &rules, scorer.as_ref())
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    Ok(Json(RecordsResponse {
        run_id: new_run_id("grp"),
        config: config.name,
        input_count,
        records,
    }))
}

#[derive(Deserialize)]
struct ReconcileRequest {
    primary: Vec<Record>,
    secondary: Vec<Record>,
    #[serde(default)]
    spec: Option<ReconcileSpec>,
}

#[derive(Serialize)]
struct ReconcileResponse {
    run_id: String,
    config: String,
    stats: ReconcileStats,
    records: Vec<Record>,
}

/// Join invoice lines to container / weighing records and split values by weight.
async fn reconcile_fragments(
    State(state): State<AppState>,
    Query(query): Query<ConfigQuery>,
    Json(request): Json<ReconcileRequest>,
) -> Result<Json<ReconcileResponse>, ApiError> {
    let config = resolve_config(&state, &query)?;
    let spec = request
        .spec
        .or_else(|| config.reconcile.clone())
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                format!("Config '{}' has no reconcile spec and none was supplied", config.name),
            )
        })?;

    let (records, stats) = reconcile_with_stats(request.primary, &request.secondary, &spec)
        .map_err(|e| {
            error!("Reconciliation failed: {}", e);
            (StatusCode::BAD_REQUEST, e.to_string())
        })?;

    Ok(Json(ReconcileResponse {
        run_id: new_run_id("rec"),
        config: config.name,
        stats,
        records,
    }))
}

#[derive(Deserialize)]
struct FragmentsRequest {
    records: Vec<Record>,
}

/// Collapse partial extractions that share the profile's fragment key.
async fn collect_fragments(
    State(state): State<AppState>,
    Query(query): Query<ConfigQuery>,
    Json(request): Json<FragmentsRequest>,
) -> Result<Json<RecordsResponse>, ApiError> {
    let config = resolve_config(&state, &query)?;
    let key = config.fragment_key.clone().ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            format!("Config '{}' has no fragment_key", config.name),
        )
    })?;

    let input_count = request.records.len();
    let records = collect_by_key(request.records, &key, &config.fragment_list_fields);

    Ok(Json(RecordsResponse {
        run_id: new_run_id("frg"),
        config: config.name,
        input_count,
        records,
    }))
}

#[derive(Deserialize)]
struct KnownItem {
    id: String,
    text: String,
}

#[derive(Deserialize)]
struct DuplicateRequest {
    text: String,
    known: Vec<KnownItem>,
}

#[derive(Serialize)]
struct DuplicateResponse {
    duplicate: Option<DuplicateMatch>,
}

/// Check an inbound message against already-handled ones.
async fn find_duplicate(
    State(state): State<AppState>,
    Query(query): Query<ConfigQuery>,
    Json(request): Json<DuplicateRequest>,
) -> Result<Json<DuplicateResponse>, ApiError> {
    let config = resolve_config(&state, &query)?;
    let mut index = DuplicateIndex::new(config.duplicate_scorer.build(), config.duplicate_threshold);
    for item in &request.known {
        index.insert(item.id.clone(), &item.text);
    }
    Ok(Json(DuplicateResponse {
        duplicate: index.find_duplicate(&request.text),
    }))
}

#[derive(Serialize)]
struct SheetRecords {
    name: String,
    records: Vec<Record>,
}

/// Upload a CSV / Excel attachment and get its rows back as records.
async fn parse_sheets(mut multipart: Multipart) -> Result<Json<Vec<SheetRecords>>, ApiError> {
    let mut filename = String::new();
    let mut file_data = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        (StatusCode::BAD_REQUEST, format!("Multipart error: {}", e))
    })? {
        if field.name() == Some("file") {
            filename = field.file_name().unwrap_or("upload.csv").to_string();
            file_data = field
                .bytes()
                .await
                .map_err(|e| (StatusCode::BAD_REQUEST, format!("Failed to read file: {}", e)))?
                .to_vec();
            break;
        }
    }

    if file_data.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "No file uploaded".to_string()));
    }
    info!("Received file: {} ({} bytes)", filename, file_data.len());

    let sheets = sheet_parser::parse_file(&filename, &file_data).map_err(|e| {
        error!("Sheet parsing failed: {:#}", e);
        (StatusCode::UNPROCESSABLE_ENTITY, format!("{:#}", e))
    })?;

    Ok(Json(
        sheets
            .iter()
            .map(|s| SheetRecords {
                name: s.name.clone(),
                records: s.to_records(),
            })
            .collect(),
    ))
}

// ============================================================================
// Helper functions
// ============================================================================

fn resolve_config(state: &AppState, query: &ConfigQuery) -> Result<PipelineConfig, ApiError> {
    let name = query.config.as_deref().unwrap_or("default");
    state.configs.get(name).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            format!("Unknown config: {}. Available: {:?}", name, state.configs.list()),
        )
    })
}

fn new_run_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}
