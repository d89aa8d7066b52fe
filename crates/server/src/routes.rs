use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, put},
    Json, Router,
};
use server_api::{create_item, delete_item, list_folder, rename_item};
use shared::{
    domain::{ClientId, Item, ItemId},
    error::{ApiError, ErrorCode},
    protocol::{CreateItemRequest, DeleteItemResponse, RenameItemRequest, CLIENT_ID_HEADER},
};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::error;

use crate::{app_state::AppState, ws::ws_handler};

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

pub(crate) fn build_router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/folder/:folder_id", get(http_list_folder).post(http_create_item))
        .route("/item/:item_id", put(http_rename_item).delete(http_delete_item))
        .route("/ws/:client_id", get(ws_handler))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> Result<&'static str, StatusCode> {
    state.api.storage.health_check().await.map_err(|err| {
        error!(%err, "healthz: storage unavailable");
        StatusCode::SERVICE_UNAVAILABLE
    })?;
    Ok("ok")
}

async fn http_list_folder(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(folder_id): Path<String>,
) -> ApiResult<Json<Vec<Item>>> {
    let items = list_folder(&state.api, &owner(&headers), &ItemId(folder_id))
        .await
        .map_err(reject)?;
    Ok(Json(items))
}

async fn http_create_item(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(folder_id): Path<String>,
    Json(req): Json<CreateItemRequest>,
) -> ApiResult<(StatusCode, Json<Item>)> {
    let applied = create_item(&state.api, &owner(&headers), &ItemId(folder_id), req)
        .await
        .map_err(reject)?;
    state.publish(applied.owner, applied.notification);
    Ok((StatusCode::CREATED, Json(applied.response)))
}

async fn http_rename_item(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(item_id): Path<String>,
    Json(req): Json<RenameItemRequest>,
) -> ApiResult<Json<Item>> {
    let applied = rename_item(&state.api, &owner(&headers), &ItemId(item_id), req)
        .await
        .map_err(reject)?;
    state.publish(applied.owner, applied.notification);
    Ok(Json(applied.response))
}

async fn http_delete_item(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(item_id): Path<String>,
) -> ApiResult<Json<DeleteItemResponse>> {
    let applied = delete_item(&state.api, &owner(&headers), &ItemId(item_id))
        .await
        .map_err(reject)?;
    state.publish(applied.owner, applied.notification);
    Ok(Json(applied.response))
}

/// The client named by the `x-client-id` header, or the default client.
fn owner(headers: &HeaderMap) -> ClientId {
    headers
        .get(CLIENT_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ClientId::new)
        .unwrap_or_default()
}

fn reject(err: ApiError) -> (StatusCode, Json<ApiError>) {
    let status = match err.code {
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!(message = %err.message, "api: internal error");
    }
    (status, Json(err))
}

#[cfg(test)]
#[path = "tests/routes_tests.rs"]
mod tests;
