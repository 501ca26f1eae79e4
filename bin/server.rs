// Pantry Monitor - Dashboard Server
// Read-only REST API + static dashboard with Axum

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use clap::Parser;
use pantry_monitor::{db, Config, ImageStore, LatestImage, PantryResult};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const RECENT_SCANS: usize = 10;

#[derive(Parser)]
#[command(name = "pantry-server", version, about = "Pantry inventory dashboard")]
struct Args {
    /// JSON config file (defaults to ./pantry.json when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, overrides the config file
    #[arg(long)]
    bind: Option<String>,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
    images: Arc<ImageStore>,
}

impl AppState {
    /// Handlers only read, so a connection poisoned by a panicking reader is still usable
    fn with_db<T>(&self, f: impl FnOnce(&Connection) -> PantryResult<T>) -> PantryResult<T> {
        let conn = self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&conn)
    }
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

fn respond<T: Serialize>(endpoint: &str, result: PantryResult<T>) -> Response {
    match result {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::ok(data))).into_response(),
        Err(e) if e.is_not_found() => {
            (StatusCode::NOT_FOUND, Json(ApiResponse::<T>::err(e.to_string()))).into_response()
        }
        Err(e) => {
            error!(endpoint, error = %e, "request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::<T>::err(e.to_string())),
            )
                .into_response()
        }
    }
}

// ============================================================================
// Response bodies
// ============================================================================

#[derive(Debug, Serialize)]
struct InventoryEntry {
    id: i64,
    name: String,
    category: String,
    quantity: i64,
    first_detected: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    days_in_pantry: i64,
}

#[derive(Debug, Serialize)]
struct ScanEntry {
    id: i64,
    date: DateTime<Utc>,
    cost: f64,
    input_tokens: i64,
    output_tokens: i64,
}

#[derive(Debug, Serialize)]
struct StatisticsBody {
    total_scans: i64,
    active_items: i64,
    total_api_cost: f64,
    changes_last_week: i64,
    change_breakdown: HashMap<String, i64>,
}

#[derive(Debug, Serialize)]
struct HistoryEntry {
    change_type: &'static str,
    details: Option<String>,
    detected_at: DateTime<Utc>,
    scan_date: DateTime<Utc>,
}

fn inventory(conn: &Connection, now: DateTime<Utc>) -> PantryResult<Vec<InventoryEntry>> {
    let items = db::get_current_inventory(conn)?;
    Ok(items
        .into_iter()
        .map(|item| InventoryEntry {
            days_in_pantry: item.days_in_pantry(now),
            id: item.id,
            category: item.category.unwrap_or_else(|| "Uncategorized".to_string()),
            name: item.name,
            quantity: item.quantity,
            first_detected: item.first_seen,
            last_seen: item.last_seen,
        })
        .collect())
}

fn recent_scans(conn: &Connection) -> PantryResult<Vec<ScanEntry>> {
    let scans = db::get_recent_scans(conn, RECENT_SCANS)?;
    Ok(scans
        .into_iter()
        .map(|scan| ScanEntry {
            id: scan.id,
            date: scan.scanned_at,
            cost: scan.api_cost,
            input_tokens: scan.input_tokens,
            output_tokens: scan.output_tokens,
        })
        .collect())
}

fn statistics(conn: &Connection, now: DateTime<Utc>) -> PantryResult<StatisticsBody> {
    let stats = db::get_statistics(conn, now)?;
    Ok(StatisticsBody {
        total_scans: stats.total_scans,
        active_items: stats.active_items,
        total_api_cost: stats.total_api_cost,
        changes_last_week: stats.changes_last_week,
        change_breakdown: stats.change_breakdown,
    })
}

fn item_history(conn: &Connection, item_id: i64) -> PantryResult<Vec<HistoryEntry>> {
    let (_item, history) = db::get_item_with_history(conn, item_id)?;
    Ok(history
        .into_iter()
        .map(|entry| HistoryEntry {
            change_type: entry.kind.as_str(),
            details: entry.details,
            detected_at: entry.detected_at,
            scan_date: entry.scan_date,
        })
        .collect())
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/inventory - Active items ordered by name
async fn get_inventory(State(state): State<AppState>) -> Response {
    respond("inventory", state.with_db(|conn| inventory(conn, Utc::now())))
}

/// GET /api/recent-scans - Latest scans, newest first
async fn get_recent_scans(State(state): State<AppState>) -> Response {
    respond("recent-scans", state.with_db(recent_scans))
}

/// GET /api/statistics - Totals plus the 7-day change breakdown
async fn get_statistics(State(state): State<AppState>) -> Response {
    respond("statistics", state.with_db(|conn| statistics(conn, Utc::now())))
}

/// GET /api/latest-image
async fn get_latest_image(State(state): State<AppState>) -> Json<ApiResponse<LatestImage>> {
    Json(ApiResponse::ok(state.images.latest_image()))
}

/// GET /api/item-history/:id - 404 when the item id is unknown
async fn get_item_history(State(state): State<AppState>, Path(item_id): Path<i64>) -> Response {
    respond("item-history", state.with_db(|conn| item_history(conn, item_id)))
}

/// GET / - Serve index.html
async fn serve_index() -> impl IntoResponse {
    Html(include_str!("../web/index.html"))
}

// ============================================================================
// Main Server
// ============================================================================

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/inventory", get(get_inventory))
        .route("/recent-scans", get(get_recent_scans))
        .route("/statistics", get(get_statistics))
        .route("/latest-image", get(get_latest_image))
        .route("/item-history/:id", get(get_item_history))
        .with_state(state.clone());

    Router::new()
        .route("/", get(serve_index))
        .nest("/api", api_routes)
        .nest_service("/image", ServeDir::new(state.images.dir()))
        .layer(CorsLayer::permissive())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }

    if !config.database_path.exists() {
        anyhow::bail!(
            "database not found at {} (run `pantry-monitor setup` first)",
            config.database_path.display()
        );
    }

    let conn = Connection::open(&config.database_path)
        .with_context(|| format!("failed to open database: {}", config.database_path.display()))?;
    db::setup_database(&conn)?;
    info!(path = %config.database_path.display(), "database opened");

    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
        images: Arc::new(ImageStore::from_config(&config)),
    };

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    info!(addr = %config.bind_addr, "dashboard listening");
    axum::serve(listener, router(state))
        .await
        .context("server error")?;

    Ok(())
}
