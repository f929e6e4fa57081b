// Circulation Reconciliation - Read API
// REST API with Axum over the snapshot store

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;
use circulation_recon::{
    db::money, get_import_log, get_market_rates, get_rate_distribution, get_snapshots_for_date,
    latest_snapshot_date, setup_database, ImportLogEntry, MarketRateEntry, RateDistributionRow,
    ReconConfig, SnapshotRow,
};

const RECENT_IMPORTS: usize = 20;

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Response {
        (
            StatusCode::OK,
            Json(Self {
                success: true,
                data: Some(data),
                error: None,
            }),
        )
            .into_response()
    }
}

fn error_response(status: StatusCode, message: String) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(message),
        }),
    )
        .into_response()
}

/// Market rate with amounts as 2-decimal strings, the same text the store holds
#[derive(Serialize)]
struct MarketRateResponse {
    paper_code: String,
    subscription_length: String,
    market_rate: String,
    rate_name: String,
    annualized_rate: String,
}

impl From<MarketRateEntry> for MarketRateResponse {
    fn from(entry: MarketRateEntry) -> Self {
        Self {
            paper_code: entry.publication,
            subscription_length: entry.length,
            market_rate: money(entry.rate),
            rate_name: entry.description,
            annualized_rate: money(entry.annualized),
        }
    }
}

#[derive(Serialize)]
struct SnapshotResponse {
    snapshot_date: NaiveDate,
    publications: Vec<SnapshotRow>,
}

/// Run a store query under the connection lock
fn with_conn<T, F>(state: &AppState, what: &str, query: F) -> Response
where
    T: Serialize,
    F: FnOnce(&Connection) -> anyhow::Result<T>,
{
    let conn = match state.db.lock() {
        Ok(conn) => conn,
        Err(_) => {
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "database lock poisoned".to_string(),
            )
        }
    };

    match query(&conn) {
        Ok(data) => ApiResponse::ok(data),
        Err(e) => {
            log::error!("Error getting {}: {:#}", what, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e))
        }
    }
}

/// "latest" or YYYY-MM-DD
fn parse_date_param(conn: &Connection, raw: &str) -> anyhow::Result<Option<NaiveDate>> {
    if raw == "latest" {
        return latest_snapshot_date(conn);
    }
    Ok(Some(NaiveDate::parse_from_str(raw, "%Y-%m-%d")?))
}

fn is_date_param(raw: &str) -> bool {
    raw == "latest" || NaiveDate::parse_from_str(raw, "%Y-%m-%d").is_ok()
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    ApiResponse::ok("OK")
}

/// GET /api/snapshots/:date - All publications for one day
async fn get_snapshot(State(state): State<AppState>, Path(date): Path<String>) -> Response {
    if !is_date_param(&date) {
        return error_response(StatusCode::BAD_REQUEST, format!("invalid date '{}'", date));
    }

    with_conn(&state, "snapshot", |conn| {
        let snapshot = match parse_date_param(conn, &date)? {
            Some(day) => Some(SnapshotResponse {
                snapshot_date: day,
                publications: get_snapshots_for_date(conn, day)?,
            }),
            None => None,
        };
        Ok(snapshot)
    })
}

/// GET /api/snapshots/:date/:paper/rates - Rate distribution for one publication
async fn get_snapshot_rates(
    State(state): State<AppState>,
    Path((date, paper)): Path<(String, String)>,
) -> Response {
    if !is_date_param(&date) {
        return error_response(StatusCode::BAD_REQUEST, format!("invalid date '{}'", date));
    }

    with_conn(&state, "rate distribution", |conn| {
        let rows: Vec<RateDistributionRow> = match parse_date_param(conn, &date)? {
            Some(day) => get_rate_distribution(conn, day, &paper.to_uppercase())?,
            None => Vec::new(),
        };
        Ok(rows)
    })
}

/// GET /api/market-rates - Every stored market rate
async fn get_all_market_rates(State(state): State<AppState>) -> Response {
    with_conn(&state, "market rates", |conn| {
        let rates: Vec<MarketRateResponse> = get_market_rates(conn, None)?
            .into_iter()
            .map(|entry| entry.into())
            .collect();
        Ok(rates)
    })
}

/// GET /api/market-rates/:paper - Market rates for one publication
async fn get_paper_market_rates(
    State(state): State<AppState>,
    Path(paper): Path<String>,
) -> Response {
    with_conn(&state, "market rates", |conn| {
        let code = paper.to_uppercase();
        let rates: Vec<MarketRateResponse> = get_market_rates(conn, Some(code.as_str()))?
            .into_iter()
            .map(|entry| entry.into())
            .collect();
        Ok(rates)
    })
}

/// GET /api/imports - Latest import runs
async fn get_imports(State(state): State<AppState>) -> Response {
    with_conn(&state, "import log", |conn| {
        let entries: Vec<ImportLogEntry> = get_import_log(conn, RECENT_IMPORTS)?;
        Ok(entries)
    })
}

fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/snapshots/:date", get(get_snapshot))
        .route("/snapshots/:date/:paper/rates", get(get_snapshot_rates))
        .route("/market-rates", get(get_all_market_rates))
        .route("/market-rates/:paper", get(get_paper_market_rates))
        .route("/imports", get(get_imports))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    println!("🌐 Circulation Reconciliation - Read API");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // CIRC_CONFIG points at a config file; otherwise built-in defaults
    let config = match std::env::var("CIRC_CONFIG") {
        Ok(path) => ReconConfig::from_file(path)?,
        Err(_) => ReconConfig::default(),
    };
    let db_path = config.files.database.clone();

    if !db_path.exists() {
        eprintln!("❌ Database not found at {:?}", db_path);
        eprintln!("   Run: circulation-recon import");
        eprintln!("   to store a snapshot first.");
        std::process::exit(1);
    }

    let conn = Connection::open(&db_path)?;
    setup_database(&conn)?;
    println!("✓ Database opened: {:?}", db_path);

    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
    };
    let app = router(state);

    let addr = std::env::var("CIRC_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    println!("\n🚀 Server running on http://{}", addr);
    println!("   API: http://{}/api/snapshots/latest", addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app).await?;

    Ok(())
}
