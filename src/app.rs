use axum::{
    Extension, Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State, multipart::MultipartError},
    http::{HeaderValue, Method, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::analysis::{self, AnalysisReport};
use crate::config::AppConfig;
use crate::downloader;
use crate::error::AppError;
use crate::graph::{self, GraphOptions};
use crate::ingest::{self, Upload};
use crate::loader::LoaderOptions;
use crate::login::{self, AccountView, CurrentUser, SessionStore};
use crate::mailer::{LogNotifier, Mailer, ResetNotifier};
use crate::metrics::{EventKind, InMemoryMetrics, MetricsSink};
use crate::saving;
use crate::series::{self, ChartRequest, ChartSeries};
use crate::spreadsheet::{self, RowObject};
use crate::store::{ChartDraft, ChartKey, ChartRecord, FileRecord, FileSummary, JsonStore, RecordStore, Upsert};

/// Database snapshot file inside the data directory.
pub const DATABASE_FILE: &str = "database.json.gz";

/// Multipart framing allowance on top of the upload cap.
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

/// Shared state handed to every handler.
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn RecordStore>,
    pub sessions: SessionStore,
    pub metrics: Arc<dyn MetricsSink>,
    pub notifier: Arc<dyn ResetNotifier>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn RecordStore>,
        metrics: Arc<dyn MetricsSink>,
        notifier: Arc<dyn ResetNotifier>,
    ) -> Self {
        let sessions = SessionStore::new(config.session_ttl);
        Self {
            config,
            store,
            sessions,
            metrics,
            notifier,
        }
    }

    /// Opens the on-disk store and picks a reset notifier from the config.
    pub fn from_config(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let store = JsonStore::open(config.data_dir.join(DATABASE_FILE))?;

        let notifier: Arc<dyn ResetNotifier> = match &config.smtp {
            Some(smtp) => Arc::new(Mailer::new(smtp).map_err(|e| e.to_string())?),
            None => {
                warn!("SMTP_HOST is not set; password reset codes will only be logged");
                Arc::new(LogNotifier)
            }
        };

        Ok(Self::new(
            config,
            Arc::new(store),
            Arc::new(InMemoryMetrics::default()),
            notifier,
        ))
    }

    fn loader_options(&self) -> LoaderOptions {
        LoaderOptions {
            max_rows_per_sheet: self.config.max_sheet_rows,
        }
    }
}

pub async fn run(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState::from_config(config)?);
    let app = build_router(state);

    let listener = TcpListener::bind(&bind_addr).await?;
    info!("Listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Builds the full HTTP API over `state`.
pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = (state.config.max_upload_bytes + MULTIPART_OVERHEAD) as usize;

    let admin = Router::new()
        .route("/api/admin/users", get(admin_list_users))
        .route("/api/admin/users/:username", axum::routing::delete(admin_delete_user))
        .route("/api/admin/files", get(admin_list_files))
        .route("/api/admin/files/:id", axum::routing::delete(admin_delete_file))
        .route("/api/admin/stats", get(admin_stats))
        .route_layer(middleware::from_fn(login::require_admin));

    let protected = Router::new()
        .route("/api/me", get(login::handle_me).delete(login::handle_delete_account))
        .route("/api/auth/change-password", post(login::handle_change_password))
        .route("/api/files", get(list_files).post(upload_file))
        .route("/api/files/:id", get(get_file).delete(delete_file))
        .route("/api/files/:id/series", post(build_file_series))
        .route("/api/files/:id/analysis", post(analyze_file))
        .route("/api/charts", get(list_charts).post(save_chart))
        .route("/api/charts/:id", get(get_chart).delete(delete_chart))
        .route("/api/charts/:id/image", get(chart_image))
        .route("/api/charts/:id/export", get(export_chart))
        .merge(admin)
        .route_layer(middleware::from_fn_with_state(state.clone(), login::require_auth));

    Router::new()
        .route("/health", get(health))
        .route("/api/auth/register", post(login::handle_register))
        .route("/api/auth/login", post(login::handle_login))
        .route("/api/auth/logout", post(login::handle_logout))
        .route("/api/auth/forgot-password", post(login::handle_forgot_password))
        .route("/api/auth/reset-password", post(login::handle_reset_password))
        .merge(protected)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors_layer(&state.config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    if config.cors_origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

// ---------------------------------------------------------------------------
// Files

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SheetOverview {
    name: String,
    columns: Vec<String>,
    row_count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileDetail {
    #[serde(flatten)]
    summary: FileSummary,
    sheets: Vec<SheetOverview>,
    preview: Vec<RowObject>,
}

impl FileDetail {
    fn of(record: &FileRecord) -> Self {
        Self {
            summary: record.summary(),
            sheets: record
                .sheets
                .iter()
                .map(|sheet| SheetOverview {
                    name: sheet.name.clone(),
                    columns: sheet.columns(),
                    row_count: sheet.data_rows.len(),
                })
                .collect(),
            preview: spreadsheet::preview(&record.sheets),
        }
    }
}

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(e.body_text())
    } else {
        AppError::BadRequest(e.body_text())
    }
}

async fn upload_file(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut upload = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() == Some("file") {
            let file_name = field.file_name().unwrap_or("upload").to_string();
            let content_type = field.content_type().map(str::to_string);
            let bytes = field.bytes().await.map_err(multipart_error)?;
            upload = Some((file_name, content_type, bytes));
            break;
        }
    }
    let (file_name, content_type, bytes) =
        upload.ok_or_else(|| AppError::BadRequest("No file uploaded".to_string()))?;

    let format = ingest::precheck(
        &Upload {
            file_name: &file_name,
            content_type: content_type.as_deref(),
            size: bytes.len() as u64,
        },
        state.config.max_upload_bytes,
    )?;

    let id = Uuid::new_v4().to_string();
    let storage_path = saving::store_upload(
        &state.config.data_dir,
        &user.username,
        &id,
        format.extension(),
        &bytes,
    )
    .map_err(|e| AppError::Internal(format!("failed to store upload: {}", e)))?;

    let options = state.loader_options();
    let owner = user.username.clone();
    let record = tokio::task::spawn_blocking(move || {
        ingest::build_file_record(
            id,
            &owner,
            &file_name,
            storage_path.to_string_lossy().into_owned(),
            &bytes,
            format,
            &options,
        )
    })
    .await
    .map_err(|e| AppError::Internal(e.to_string()))?;

    let kind = if record.processed {
        EventKind::Upload
    } else {
        EventKind::UploadFailed
    };
    state.metrics.record_event(
        kind,
        json!({ "user": user.username, "file": record.id, "bytes": record.size_bytes }),
    );

    let detail = FileDetail::of(&record);
    let storage_path = record.storage_path.clone();
    if let Err(e) = state.store.insert_file(record) {
        if let Err(rm) = saving::remove_upload(&storage_path) {
            warn!("failed to remove upload {}: {}", storage_path, rm);
        }
        return Err(e.into());
    }
    Ok((StatusCode::CREATED, Json(detail)).into_response())
}

/// A file the caller owns; anything else reads as missing.
fn owned_file(state: &AppState, user: &CurrentUser, id: &str) -> Result<FileRecord, AppError> {
    match state.store.get_file(id)? {
        Some(file) if file.owner_id == user.username => Ok(file),
        _ => Err(AppError::NotFound("file")),
    }
}

async fn list_files(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<Vec<FileSummary>>, AppError> {
    Ok(Json(state.store.list_files(Some(&user.username))?))
}

async fn get_file(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let file = owned_file(&state, &user, &id)?;
    Ok(Json(FileDetail::of(&file)))
}

async fn delete_file(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    owned_file(&state, &user, &id)?;
    remove_file(&state, &id)?;
    Ok(StatusCode::NO_CONTENT)
}

fn remove_file(state: &AppState, id: &str) -> Result<(), AppError> {
    let file = state.store.delete_file(id)?.ok_or(AppError::NotFound("file"))?;
    if let Err(e) = saving::remove_upload(&file.storage_path) {
        error!("failed to remove {}: {}", file.storage_path, e);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Series and analysis

/// A chart request against one sheet of a file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeriesBody {
    #[serde(flatten)]
    request: ChartRequest,
    /// Sheet name; the first sheet when absent.
    #[serde(default)]
    sheet: Option<String>,
}

/// Row objects of the named sheet, or of the first sheet.
fn sheet_rows(file: &FileRecord, sheet: Option<&str>) -> Result<Vec<RowObject>, AppError> {
    let selected = match sheet {
        Some(name) => Some(
            file.sheets
                .iter()
                .find(|s| s.name == name)
                .ok_or(AppError::NotFound("sheet"))?,
        ),
        None => file.sheets.first(),
    };
    Ok(selected
        .map(|s| spreadsheet::normalize_sheet(s).row_objects)
        .unwrap_or_default())
}

fn build_for(file: &FileRecord, body: &SeriesBody) -> Result<ChartSeries, AppError> {
    let rows = sheet_rows(file, body.sheet.as_deref())?;
    Ok(series::build_series(&rows, &body.request))
}

async fn build_file_series(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(body): Json<SeriesBody>,
) -> Result<Json<ChartSeries>, AppError> {
    let file = owned_file(&state, &user, &id)?;
    let series = build_for(&file, &body)?;

    state.metrics.record_event(
        EventKind::SeriesBuilt,
        json!({ "user": user.username, "file": id, "chartType": body.request.chart_type }),
    );
    Ok(Json(series))
}

#[derive(Debug, Serialize)]
struct AnalysisResponse {
    series: ChartSeries,
    analysis: AnalysisReport,
}

async fn analyze_file(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(body): Json<SeriesBody>,
) -> Result<Json<AnalysisResponse>, AppError> {
    let file = owned_file(&state, &user, &id)?;
    let series = build_for(&file, &body)?;
    let analysis = analysis::analyze(&series, &body.request);

    state.metrics.record_event(
        EventKind::Analysis,
        json!({ "user": user.username, "file": id, "chartType": body.request.chart_type }),
    );
    Ok(Json(AnalysisResponse { series, analysis }))
}

// ---------------------------------------------------------------------------
// Charts

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveChartBody {
    file_id: String,
    #[serde(flatten)]
    request: ChartRequest,
    #[serde(default)]
    sheet: Option<String>,
    /// Store the built series with the chart for exact replay.
    #[serde(default)]
    cache_series: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartListQuery {
    file_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChartView {
    chart: ChartRecord,
    series: ChartSeries,
}

async fn save_chart(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Json(body): Json<SaveChartBody>,
) -> Result<impl IntoResponse, AppError> {
    let file = owned_file(&state, &user, &body.file_id)?;

    // Charts are rebuilt from the first sheet, so a chart over another sheet
    // always keeps its series.
    let series = if body.cache_series || body.sheet.is_some() {
        let rows = sheet_rows(&file, body.sheet.as_deref())?;
        Some(series::build_series(&rows, &body.request))
    } else {
        None
    };

    let request = &body.request;
    let draft = ChartDraft {
        key: ChartKey {
            owner_id: user.username.clone(),
            file_id: file.id.clone(),
            chart_type: request.chart_type,
            x_column: request.x_column.clone(),
            y_column: request.y_column.clone(),
        },
        title: request
            .title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| format!("{} by {}", request.y_column, request.x_column)),
        description: request.description.clone().unwrap_or_default(),
        series,
    };

    let (chart, outcome) = state.store.upsert_chart(draft)?;
    state.metrics.record_event(
        EventKind::ChartSaved,
        json!({ "user": user.username, "chart": chart.id, "created": outcome == Upsert::Created }),
    );

    let status = match outcome {
        Upsert::Created => StatusCode::CREATED,
        Upsert::Updated => StatusCode::OK,
    };
    Ok((status, Json(chart)))
}

async fn list_charts(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<ChartListQuery>,
) -> Result<Json<Vec<ChartRecord>>, AppError> {
    let mut charts = state
        .store
        .list_charts(&user.username, query.file_id.as_deref())?;
    // Listings stay light; the series comes with a single chart.
    for chart in &mut charts {
        chart.series = None;
    }
    Ok(Json(charts))
}

fn owned_chart(state: &AppState, user: &CurrentUser, id: &str) -> Result<ChartRecord, AppError> {
    match state.store.get_chart(id)? {
        Some(chart) if chart.owner_id == user.username => Ok(chart),
        _ => Err(AppError::NotFound("chart")),
    }
}

/// The cached series of a chart, or one rebuilt from its file.
fn chart_series(state: &AppState, chart: &mut ChartRecord) -> Result<ChartSeries, AppError> {
    if let Some(series) = chart.series.take() {
        return Ok(series);
    }

    let file = state
        .store
        .get_file(&chart.file_id)?
        .ok_or(AppError::NotFound("file"))?;
    let rows = sheet_rows(&file, None)?;
    let request = ChartRequest::new(chart.x_column.clone(), chart.y_column.clone(), chart.chart_type);
    Ok(series::build_series(&rows, &request))
}

async fn get_chart(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<ChartView>, AppError> {
    let mut chart = owned_chart(&state, &user, &id)?;
    let series = chart_series(&state, &mut chart)?;
    Ok(Json(ChartView { chart, series }))
}

async fn delete_chart(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    owned_chart(&state, &user, &id)?;
    state
        .store
        .delete_chart(&id)?
        .ok_or(AppError::NotFound("chart"))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn chart_image(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let mut chart = owned_chart(&state, &user, &id)?;
    let series = chart_series(&state, &mut chart)?;
    let options = GraphOptions::for_series(&series, &chart.title);

    let png = tokio::task::spawn_blocking(move || {
        graph::render_png(&series, &options).map_err(|e| e.to_string())
    })
    .await
    .map_err(|e| AppError::Internal(e.to_string()))?
    .map_err(|e| AppError::Internal(format!("failed to render chart: {}", e)))?;

    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

#[derive(Debug, Deserialize)]
struct ExportQuery {
    format: Option<String>,
}

fn download_name(title: &str, extension: &str) -> String {
    let stem: String = title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    let stem = if stem.is_empty() { "chart".to_string() } else { stem };
    format!("{}.{}", stem, extension)
}

async fn export_chart(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, AppError> {
    let mut chart = owned_chart(&state, &user, &id)?;
    let series = chart_series(&state, &mut chart)?;

    let format = query.format.as_deref().unwrap_or("csv").to_ascii_lowercase();
    let (content_type, body) = match format.as_str() {
        "csv" => (
            "text/csv; charset=utf-8",
            downloader::series_to_csv(&series)
                .map(String::into_bytes)
                .map_err(|e| AppError::Internal(e.to_string()))?,
        ),
        "xlsx" => (
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            downloader::series_to_xlsx(&series).map_err(|e| AppError::Internal(e.to_string()))?,
        ),
        other => {
            return Err(AppError::BadRequest(format!(
                "Unsupported export format: {}",
                other
            )));
        }
    };

    state.metrics.record_event(
        EventKind::Export,
        json!({ "user": user.username, "chart": chart.id, "format": format }),
    );

    let disposition = format!(
        "attachment; filename=\"{}\"",
        download_name(&chart.title, &format)
    );
    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// Admin

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AdminUserView {
    #[serde(flatten)]
    account: AccountView,
    file_count: usize,
}

async fn admin_list_users(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<AdminUserView>>, AppError> {
    let files = state.store.list_files(None)?;
    let users = state
        .store
        .list_users()?
        .iter()
        .map(|user| AdminUserView {
            account: AccountView::new(user, state.config.is_admin(&user.username)),
            file_count: files.iter().filter(|f| f.owner_id == user.username).count(),
        })
        .collect();
    Ok(Json(users))
}

async fn admin_delete_user(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<CurrentUser>,
    Path(username): Path<String>,
) -> Result<StatusCode, AppError> {
    if username == admin.username {
        return Err(AppError::BadRequest(
            "Use the account endpoint to delete your own account".to_string(),
        ));
    }
    if !login::delete_account(&state, &username)? {
        return Err(AppError::NotFound("user"));
    }
    info!("admin {} deleted user {}", admin.username, username);
    Ok(StatusCode::NO_CONTENT)
}

async fn admin_list_files(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<FileSummary>>, AppError> {
    Ok(Json(state.store.list_files(None)?))
}

async fn admin_delete_file(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    remove_file(&state, &id)?;
    info!("admin {} deleted file {}", admin.username, id);
    Ok(StatusCode::NO_CONTENT)
}

/// Ten years.
const MAX_STATS_WINDOW_HOURS: u64 = 10 * 366 * 24;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatsQuery {
    window_hours: Option<u64>,
}

async fn admin_stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let hours = query.window_hours.unwrap_or(24);
    if hours > MAX_STATS_WINDOW_HOURS {
        return Err(AppError::BadRequest(format!(
            "windowHours must be at most {}",
            MAX_STATS_WINDOW_HOURS
        )));
    }
    let window = Duration::from_secs(hours * 60 * 60);
    let usage = state.metrics.query_stats(window);
    let users = state.store.list_users()?.len();
    let files = state.store.list_files(None)?;
    let failed = files.iter().filter(|f| !f.processed).count();

    Ok(Json(json!({
        "users": users,
        "files": files.len(),
        "failedFiles": failed,
        "usage": usage,
    })))
}
