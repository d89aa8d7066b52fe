use shared::{
    domain::{join_path, ClientId, Item, ItemId, ItemKind, MAX_FOLDER_DEPTH},
    error::{ApiError, ErrorCode},
    protocol::{CreateItemRequest, DeleteItemResponse, Notification, RenameItemRequest},
};
use storage::{NameTaken, Storage};
use tracing::info;

const MAX_NAME_BYTES: usize = 255;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
}

/// Result of a mutation: what to return to the caller and what to push to
/// the owner's subscribers of the affected folder.
#[derive(Debug, Clone)]
pub struct Applied<T> {
    pub response: T,
    pub owner: ClientId,
    pub notification: Notification,
}

struct ParentFolder {
    id: ItemId,
    path: String,
    child_depth: u8,
}

pub async fn list_folder(
    ctx: &ApiContext,
    owner: &ClientId,
    folder_id: &ItemId,
) -> Result<Vec<Item>, ApiError> {
    resolve_folder(ctx, owner, folder_id).await?;
    let children = ctx
        .storage
        .list_children(owner, folder_id)
        .await
        .map_err(storage_error)?;
    Ok(children.into_iter().map(|stored| stored.item).collect())
}

pub async fn create_item(
    ctx: &ApiContext,
    owner: &ClientId,
    folder_id: &ItemId,
    request: CreateItemRequest,
) -> Result<Applied<Item>, ApiError> {
    let name = validate_name(&request.name)?;
    let parent = resolve_folder(ctx, owner, folder_id).await?;
    if parent.child_depth > MAX_FOLDER_DEPTH {
        return Err(ApiError::new(
            ErrorCode::Validation,
            format!("folders can be nested at most {} levels deep", MAX_FOLDER_DEPTH + 1),
        ));
    }

    let item = Item {
        id: ItemId::generate(),
        parent_id: parent.id,
        name: name.to_string(),
        kind: request.kind,
        path: join_path(&parent.path, name),
        depth: parent.child_depth,
    };
    ctx.storage
        .insert_item(owner, &item)
        .await
        .map_err(storage_error)?;
    info!(%owner, item_id = %item.id, path = %item.path, kind = item.kind.as_str(), "api: item created");

    Ok(Applied {
        notification: Notification::Added {
            path: parent.path,
            item: item.clone(),
        },
        owner: owner.clone(),
        response: item,
    })
}

pub async fn rename_item(
    ctx: &ApiContext,
    owner: &ClientId,
    item_id: &ItemId,
    request: RenameItemRequest,
) -> Result<Applied<Item>, ApiError> {
    let name = validate_name(&request.name)?;
    let existing = load_item(ctx, owner, item_id).await?;

    let folder_path = existing.folder_path().to_string();
    let new_path = join_path(&folder_path, name);
    let item = ctx
        .storage
        .rename_item(owner, item_id, name, &new_path)
        .await
        .map_err(storage_error)?
        .ok_or_else(|| not_found(item_id))?
        .item;
    info!(%owner, item_id = %item.id, from = %existing.name, to = %item.name, "api: item renamed");

    Ok(Applied {
        notification: Notification::Renamed {
            path: folder_path,
            item: item.clone(),
        },
        owner: owner.clone(),
        response: item,
    })
}

pub async fn delete_item(
    ctx: &ApiContext,
    owner: &ClientId,
    item_id: &ItemId,
) -> Result<Applied<DeleteItemResponse>, ApiError> {
    let existing = load_item(ctx, owner, item_id).await?;
    let removed = ctx
        .storage
        .delete_subtree(owner, item_id)
        .await
        .map_err(storage_error)?;
    info!(%owner, item_id = %item_id, removed, "api: item deleted");

    Ok(Applied {
        notification: Notification::Deleted {
            path: existing.folder_path().to_string(),
            item_id: item_id.clone(),
        },
        owner: owner.clone(),
        response: DeleteItemResponse {
            message: "Item deleted successfully".to_string(),
            item_id: item_id.clone(),
        },
    })
}

/// Every owner has an implicit root folder with id `ROOT` and path `""`.
async fn resolve_folder(
    ctx: &ApiContext,
    owner: &ClientId,
    folder_id: &ItemId,
) -> Result<ParentFolder, ApiError> {
    if folder_id.is_root() {
        return Ok(ParentFolder {
            id: ItemId::root(),
            path: String::new(),
            child_depth: 0,
        });
    }
    let folder = load_item(ctx, owner, folder_id).await?;
    if folder.kind != ItemKind::Folder {
        return Err(ApiError::new(
            ErrorCode::Validation,
            format!("item {folder_id} is not a folder"),
        ));
    }
    Ok(ParentFolder {
        id: folder.id,
        path: folder.path,
        child_depth: folder.depth.saturating_add(1),
    })
}

async fn load_item(ctx: &ApiContext, owner: &ClientId, item_id: &ItemId) -> Result<Item, ApiError> {
    ctx.storage
        .get_item(owner, item_id)
        .await
        .map_err(storage_error)?
        .map(|stored| stored.item)
        .ok_or_else(|| not_found(item_id))
}

fn validate_name(raw: &str) -> Result<&str, ApiError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "name must not be empty"));
    }
    if name.len() > MAX_NAME_BYTES {
        return Err(ApiError::new(
            ErrorCode::Validation,
            format!("name exceeds {MAX_NAME_BYTES} bytes"),
        ));
    }
    if name.contains('/') {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "name must not contain '/'",
        ));
    }
    Ok(name)
}

fn not_found(item_id: &ItemId) -> ApiError {
    ApiError::new(ErrorCode::NotFound, format!("item {item_id} not found"))
}

/// Sibling-name collisions come back from the unique constraint, so
/// concurrent writers of the same name see `Conflict` rather than a 500.
fn storage_error(err: anyhow::Error) -> ApiError {
    match err.downcast_ref::<NameTaken>() {
        Some(taken) => ApiError::new(
            ErrorCode::Conflict,
            format!("an item named '{}' already exists in this folder", taken.name),
        ),
        None => ApiError::new(ErrorCode::Internal, format!("{err:#}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> ApiContext {
        let storage = Storage::new("sqlite::memory:").await.expect("db");
        ApiContext { storage }
    }

    fn alice() -> ClientId {
        ClientId::new("alice")
    }

    fn create(name: &str, kind: ItemKind) -> CreateItemRequest {
        CreateItemRequest {
            name: name.to_string(),
            kind,
        }
    }

    #[tokio::test]
    async fn created_item_is_announced_on_parent_path() {
        let ctx = setup().await;
        let docs = create_item(&ctx, &alice(), &ItemId::root(), create("docs", ItemKind::Folder))
            .await
            .expect("docs");
        assert_eq!(docs.notification.path(), "");

        let file = create_item(&ctx, &alice(), &docs.response.id, create("a.txt", ItemKind::File))
            .await
            .expect("file");
        assert_eq!(file.response.path, "docs/a.txt");
        assert_eq!(file.response.depth, 1);
        assert!(matches!(
            file.notification,
            Notification::Added { ref path, .. } if path == "docs"
        ));
    }

    #[tokio::test]
    async fn duplicate_sibling_name_is_a_conflict() {
        let ctx = setup().await;
        create_item(&ctx, &alice(), &ItemId::root(), create("a.txt", ItemKind::File))
            .await
            .expect("first");
        let err = create_item(&ctx, &alice(), &ItemId::root(), create(" a.txt ", ItemKind::File))
            .await
            .expect_err("should fail");
        assert_eq!(err.code, ErrorCode::Conflict);
    }

    #[tokio::test]
    async fn nesting_deeper_than_limit_is_rejected() {
        let ctx = setup().await;
        let mut parent = ItemId::root();
        for level in 0..=MAX_FOLDER_DEPTH {
            parent = create_item(&ctx, &alice(), &parent, create(&format!("l{level}"), ItemKind::Folder))
                .await
                .expect("folder within limit")
                .response
                .id;
        }
        let err = create_item(&ctx, &alice(), &parent, create("too-deep", ItemKind::File))
            .await
            .expect_err("should fail");
        assert_eq!(err.code, ErrorCode::Validation);
    }

    #[tokio::test]
    async fn rename_emits_full_item_state() {
        let ctx = setup().await;
        let created = create_item(&ctx, &alice(), &ItemId::root(), create("a.txt", ItemKind::File))
            .await
            .expect("create");
        let renamed = rename_item(
            &ctx,
            &alice(),
            &created.response.id,
            RenameItemRequest {
                name: "b.txt".into(),
            },
        )
        .await
        .expect("rename");
        assert_eq!(renamed.response.id, created.response.id);
        match renamed.notification {
            Notification::Renamed { path, item } => {
                assert_eq!(path, "");
                assert_eq!(item.name, "b.txt");
                assert_eq!(item.path, "b.txt");
            }
            other => panic!("unexpected notification {other:?}"),
        }
    }

    #[tokio::test]
    async fn deleting_unknown_item_is_not_found() {
        let ctx = setup().await;
        let err = delete_item(&ctx, &alice(), &ItemId::new("nope"))
            .await
            .expect_err("should fail");
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn listing_a_file_is_a_validation_error() {
        let ctx = setup().await;
        let file = create_item(&ctx, &alice(), &ItemId::root(), create("a.txt", ItemKind::File))
            .await
            .expect("create");
        let err = list_folder(&ctx, &alice(), &file.response.id)
            .await
            .expect_err("should fail");
        assert_eq!(err.code, ErrorCode::Validation);
    }

    #[tokio::test]
    async fn sibling_inserted_behind_the_api_still_maps_to_conflict() {
        let ctx = setup().await;
        // Another writer won the race for the name.
        ctx.storage
            .insert_item(
                &alice(),
                &Item {
                    id: ItemId::new("other-writer"),
                    parent_id: ItemId::root(),
                    name: "report.pdf".into(),
                    kind: ItemKind::File,
                    path: "report.pdf".into(),
                    depth: 0,
                },
            )
            .await
            .expect("direct insert");

        let err = create_item(&ctx, &alice(), &ItemId::root(), create("report.pdf", ItemKind::File))
            .await
            .expect_err("should fail");
        assert_eq!(err.code, ErrorCode::Conflict);

        let other = create_item(&ctx, &alice(), &ItemId::root(), create("draft.pdf", ItemKind::File))
            .await
            .expect("create");
        let err = rename_item(
            &ctx,
            &alice(),
            &other.response.id,
            RenameItemRequest {
                name: "report.pdf".into(),
            },
        )
        .await
        .expect_err("should fail");
        assert_eq!(err.code, ErrorCode::Conflict);
    }

    #[tokio::test]
    async fn renaming_to_the_current_name_is_allowed() {
        let ctx = setup().await;
        let created = create_item(&ctx, &alice(), &ItemId::root(), create("a.txt", ItemKind::File))
            .await
            .expect("create");
        let renamed = rename_item(
            &ctx,
            &alice(),
            &created.response.id,
            RenameItemRequest {
                name: "a.txt".into(),
            },
        )
        .await
        .expect("same name");
        assert_eq!(renamed.response.name, "a.txt");
    }

    #[tokio::test]
    async fn other_owners_cannot_see_or_touch_items() {
        let ctx = setup().await;
        let bob = ClientId::new("bob");
        let docs = create_item(&ctx, &alice(), &ItemId::root(), create("docs", ItemKind::Folder))
            .await
            .expect("docs");
        assert_eq!(docs.owner, alice());

        assert!(list_folder(&ctx, &bob, &ItemId::root())
            .await
            .expect("bob's root")
            .is_empty());
        let err = list_folder(&ctx, &bob, &docs.response.id)
            .await
            .expect_err("foreign folder");
        assert_eq!(err.code, ErrorCode::NotFound);
        let err = delete_item(&ctx, &bob, &docs.response.id)
            .await
            .expect_err("foreign item");
        assert_eq!(err.code, ErrorCode::NotFound);

        create_item(&ctx, &bob, &ItemId::root(), create("docs", ItemKind::Folder))
            .await
            .expect("same name in another tree");
    }
}
