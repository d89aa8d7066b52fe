use super::*;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, put},
    Json, Router,
};
use shared::error::ErrorCode;
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct StubState {
    requests: Arc<Mutex<Vec<String>>>,
}

fn item(id: &str, name: &str, kind: ItemKind) -> Item {
    Item {
        id: ItemId::new(id),
        parent_id: ItemId::root(),
        name: name.to_string(),
        kind,
        path: name.to_string(),
        depth: 0,
    }
}

async fn list(
    State(state): State<StubState>,
    headers: HeaderMap,
    Path(folder_id): Path<String>,
) -> Json<Vec<Item>> {
    let client = headers
        .get(CLIENT_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-")
        .to_string();
    state
        .requests
        .lock()
        .expect("lock")
        .push(format!("GET {folder_id} as {client}"));
    Json(vec![
        item("2", "docs", ItemKind::Folder),
        item("1", "a.txt", ItemKind::File),
    ])
}

async fn create(
    Path(folder_id): Path<String>,
    Json(body): Json<CreateItemRequest>,
) -> Result<(StatusCode, Json<Item>), (StatusCode, Json<ApiError>)> {
    if body.name == "taken" {
        return Err((
            StatusCode::CONFLICT,
            Json(ApiError::new(ErrorCode::Conflict, "name already exists")),
        ));
    }
    let mut created = item("9", &body.name, body.kind);
    created.parent_id = ItemId::new(folder_id);
    Ok((StatusCode::CREATED, Json(created)))
}

async fn rename(Path(item_id): Path<String>, Json(body): Json<RenameItemRequest>) -> Json<Item> {
    Json(item(&item_id, &body.name, ItemKind::File))
}

async fn delete(Path(item_id): Path<String>) -> Result<Json<DeleteItemResponse>, StatusCode> {
    if item_id == "missing" {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(DeleteItemResponse {
        message: "Item deleted successfully".to_string(),
        item_id: ItemId::new(item_id),
    }))
}

async fn spawn_folder_server() -> anyhow::Result<(HttpFolderApi, StubState)> {
    spawn_folder_server_for(ClientId::default()).await
}

async fn spawn_folder_server_for(
    client_id: ClientId,
) -> anyhow::Result<(HttpFolderApi, StubState)> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let state = StubState::default();
    let app = Router::new()
        .route("/folder/:folder_id", get(list).post(create))
        .route("/item/:item_id", put(rename).delete(delete))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    let config = SyncConfig::new(format!("http://{addr}")).with_client_id(client_id);
    let api = HttpFolderApi::new(&config)?;
    Ok((api, state))
}

#[tokio::test]
async fn list_folder_fetches_by_id_and_keeps_server_order() {
    let (api, state) = spawn_folder_server().await.expect("spawn server");

    let items = api.list_folder(&ItemId::root()).await.expect("list");
    let names: Vec<&str> = items.iter().map(|item| item.name.as_str()).collect();
    assert_eq!(names, vec!["docs", "a.txt"]);
    assert_eq!(
        *state.requests.lock().expect("lock"),
        vec!["GET ROOT as default"]
    );
}

#[tokio::test]
async fn requests_name_the_configured_client() {
    let (api, state) = spawn_folder_server_for(ClientId::new("alice"))
        .await
        .expect("spawn server");

    api.list_folder(&ItemId::new("7")).await.expect("list");
    assert_eq!(
        *state.requests.lock().expect("lock"),
        vec!["GET 7 as alice"]
    );
}

#[tokio::test]
async fn mutations_round_trip_through_the_rest_surface() {
    let (api, _state) = spawn_folder_server().await.expect("spawn server");

    let created = api
        .create_item(&ItemId::new("7"), "notes.md", ItemKind::File)
        .await
        .expect("create");
    assert_eq!(created.parent_id, ItemId::new("7"));
    assert_eq!(created.name, "notes.md");

    let renamed = api
        .rename_item(&ItemId::new("9"), "todo.md")
        .await
        .expect("rename");
    assert_eq!(renamed.name, "todo.md");

    let deleted = api.delete_item(&ItemId::new("9")).await.expect("delete");
    assert_eq!(deleted.item_id, ItemId::new("9"));
}

#[tokio::test]
async fn api_errors_decode_into_rejected() {
    let (api, _state) = spawn_folder_server().await.expect("spawn server");

    let err = api
        .create_item(&ItemId::root(), "taken", ItemKind::Folder)
        .await
        .expect_err("conflict");
    match err.downcast_ref::<SyncError>() {
        Some(SyncError::Rejected { status, code, .. }) => {
            assert_eq!(*status, 409);
            assert_eq!(*code, Some(ErrorCode::Conflict));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let err = api
        .delete_item(&ItemId::new("missing"))
        .await
        .expect_err("not found");
    match err.downcast_ref::<SyncError>() {
        Some(SyncError::Rejected { status, code, .. }) => {
            assert_eq!(*status, 404);
            assert_eq!(*code, None);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_server_is_an_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let api = HttpFolderApi::new(&SyncConfig::new(format!("http://{addr}"))).expect("api");
    assert!(api.list_folder(&ItemId::root()).await.is_err());
}
