use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use server_api::{
    delete_invoice_lines, delete_invoices, delete_requisitions, invoice_detail, list_invoices,
    list_requisitions, update_invoice_lines, ApiContext,
};
use shared::{
    domain::{InvoiceKind, InvoiceRow, RequisitionRow},
    error::{ApiError, ErrorCode},
    protocol::{
        DeleteRequest, DeleteResponse, InvoiceDetail, InvoiceListQuery, UpdateLinesRequest,
        UpdateResponse,
    },
};
use storage::Storage;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, prepare_database_url};

#[derive(Clone)]
struct AppState {
    api: ApiContext,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    let state = AppState {
        api: ApiContext { storage },
    };
    let app = build_router(Arc::new(state), settings.request_body_limit_bytes);

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>, body_limit_bytes: usize) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/invoices", get(http_list_invoices))
        .route("/invoices/:kind/:number", get(http_invoice_detail))
        .route("/invoices/delete", post(http_delete_invoices))
        .route("/invoice-lines/delete", post(http_delete_invoice_lines))
        .route("/invoice-lines/update", post(http_update_invoice_lines))
        .route("/requisitions", get(http_list_requisitions))
        .route("/requisitions/delete", post(http_delete_requisitions))
        .layer(RequestBodyLimitLayer::new(body_limit_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> Result<&'static str, StatusCode> {
    state
        .api
        .storage
        .health_check()
        .await
        .map_err(|error| {
            error!(%error, "health check failed");
            StatusCode::SERVICE_UNAVAILABLE
        })?;
    Ok("ok")
}

async fn http_list_invoices(
    State(state): State<Arc<AppState>>,
    Query(query): Query<InvoiceListQuery>,
) -> ApiResult<Vec<InvoiceRow>> {
    list_invoices(&state.api, query.kind)
        .await
        .map(Json)
        .map_err(api_error_response)
}

async fn http_invoice_detail(
    State(state): State<Arc<AppState>>,
    Path((kind, number)): Path<(String, i64)>,
) -> ApiResult<InvoiceDetail> {
    let kind = InvoiceKind::parse(&kind).ok_or_else(|| {
        api_error_response(ApiError::new(
            ErrorCode::Validation,
            format!("unknown invoice kind '{kind}'"),
        ))
    })?;
    invoice_detail(&state.api, kind, number)
        .await
        .map(Json)
        .map_err(api_error_response)
}

async fn http_delete_invoices(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeleteRequest>,
) -> ApiResult<DeleteResponse> {
    delete_invoices(&state.api, &req.targets)
        .await
        .map(Json)
        .map_err(api_error_response)
}

async fn http_delete_invoice_lines(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeleteRequest>,
) -> ApiResult<DeleteResponse> {
    delete_invoice_lines(&state.api, &req.targets)
        .await
        .map(Json)
        .map_err(api_error_response)
}

async fn http_update_invoice_lines(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpdateLinesRequest>,
) -> ApiResult<UpdateResponse> {
    update_invoice_lines(&state.api, &req.lines)
        .await
        .map(Json)
        .map_err(api_error_response)
}

async fn http_list_requisitions(State(state): State<Arc<AppState>>) -> ApiResult<Vec<RequisitionRow>> {
    list_requisitions(&state.api)
        .await
        .map(Json)
        .map_err(api_error_response)
}

async fn http_delete_requisitions(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeleteRequest>,
) -> ApiResult<DeleteResponse> {
    delete_requisitions(&state.api, &req.targets)
        .await
        .map(Json)
        .map_err(api_error_response)
}

fn api_error_response(error: ApiError) -> (StatusCode, Json<ApiError>) {
    let status = match error.code {
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::Internal => {
            error!(message = %error.message, "internal api error");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(error))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
