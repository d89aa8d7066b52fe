use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use thiserror::Error;

use shared::domain::{ClientId, Item, ItemId, ItemKind};

/// Every tree is private to its owner: item lookups, sibling names and
/// subtree paths are all scoped by `owner_id`.
#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct StoredItem {
    pub owner: ClientId,
    pub item: Item,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A write collided with an existing sibling of the same name.
#[derive(Debug, Error)]
#[error("an item named '{name}' already exists in folder {parent_id}")]
pub struct NameTaken {
    pub parent_id: ItemId,
    pub name: String,
}

const ITEM_COLUMNS: &str =
    "item_id, owner_id, parent_id, name, item_type, path, depth, created_at, updated_at";

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn get_item(&self, owner: &ClientId, item_id: &ItemId) -> Result<Option<StoredItem>> {
        let row = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE owner_id = ?1 AND item_id = ?2"
        ))
        .bind(owner.as_str())
        .bind(item_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to load item {item_id}"))?;

        row.map(stored_item_from_row).transpose()
    }

    /// Direct children of `parent_id`, folders first, then by name.
    pub async fn list_children(
        &self,
        owner: &ClientId,
        parent_id: &ItemId,
    ) -> Result<Vec<StoredItem>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ITEM_COLUMNS}
            FROM items
            WHERE owner_id = ?1 AND parent_id = ?2
            ORDER BY CASE item_type WHEN 'FOLDER' THEN 0 ELSE 1 END, name
            "#
        ))
        .bind(owner.as_str())
        .bind(parent_id.as_str())
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("failed to list children of {parent_id}"))?;

        rows.into_iter().map(stored_item_from_row).collect()
    }

    /// Fails with [`NameTaken`] when a sibling already uses `item.name`.
    pub async fn insert_item(&self, owner: &ClientId, item: &Item) -> Result<StoredItem> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO items (item_id, owner_id, parent_id, name, item_type, path, depth, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
            "#,
        )
        .bind(item.id.as_str())
        .bind(owner.as_str())
        .bind(item.parent_id.as_str())
        .bind(&item.name)
        .bind(item.kind.as_str())
        .bind(&item.path)
        .bind(i64::from(item.depth))
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|err| {
            write_error(err, &item.parent_id, &item.name)
                .context(format!("failed to insert item '{}'", item.name))
        })?;

        Ok(StoredItem {
            owner: owner.clone(),
            item: item.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Renames an item and rewrites the path of every descendant.
    /// Returns `None` when the item does not exist; fails with [`NameTaken`]
    /// when a sibling already uses `new_name`.
    pub async fn rename_item(
        &self,
        owner: &ClientId,
        item_id: &ItemId,
        new_name: &str,
        new_path: &str,
    ) -> Result<Option<StoredItem>> {
        let Some(existing) = self.get_item(owner, item_id).await? else {
            return Ok(None);
        };
        let old_path = existing.item.path.clone();
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE items SET name = ?1, path = ?2, updated_at = ?3 WHERE owner_id = ?4 AND item_id = ?5",
        )
        .bind(new_name)
        .bind(new_path)
        .bind(now)
        .bind(owner.as_str())
        .bind(item_id.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|err| {
            write_error(err, &existing.item.parent_id, new_name)
                .context(format!("failed to rename item {item_id}"))
        })?;

        if existing.item.kind == ItemKind::Folder {
            sqlx::query(
                r#"
                UPDATE items
                SET path = ?1 || substr(path, length(?2) + 1), updated_at = ?3
                WHERE owner_id = ?4 AND substr(path, 1, length(?2) + 1) = ?2 || '/'
                "#,
            )
            .bind(new_path)
            .bind(&old_path)
            .bind(now)
            .bind(owner.as_str())
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to rewrite descendant paths of {item_id}"))?;
        }
        tx.commit().await?;

        let mut item = existing.item;
        item.name = new_name.to_string();
        item.path = new_path.to_string();
        Ok(Some(StoredItem {
            owner: existing.owner,
            item,
            created_at: existing.created_at,
            updated_at: now,
        }))
    }

    /// Deletes an item together with everything below it.
    /// Returns the number of removed rows, 0 when the item was unknown.
    pub async fn delete_subtree(&self, owner: &ClientId, item_id: &ItemId) -> Result<u64> {
        let Some(existing) = self.get_item(owner, item_id).await? else {
            return Ok(0);
        };

        let mut tx = self.pool.begin().await?;
        let mut removed = 0;
        if existing.item.kind == ItemKind::Folder {
            removed += sqlx::query(
                "DELETE FROM items WHERE owner_id = ?1 AND substr(path, 1, length(?2) + 1) = ?2 || '/'",
            )
            .bind(owner.as_str())
            .bind(&existing.item.path)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to delete descendants of {item_id}"))?
            .rows_affected();
        }
        removed += sqlx::query("DELETE FROM items WHERE owner_id = ?1 AND item_id = ?2")
            .bind(owner.as_str())
            .bind(item_id.as_str())
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to delete item {item_id}"))?
            .rows_affected();
        tx.commit().await?;
        Ok(removed)
    }
}

fn write_error(err: sqlx::Error, parent_id: &ItemId, name: &str) -> anyhow::Error {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => NameTaken {
            parent_id: parent_id.clone(),
            name: name.to_string(),
        }
        .into(),
        _ => err.into(),
    }
}

fn stored_item_from_row(row: SqliteRow) -> Result<StoredItem> {
    let raw_kind: String = row.try_get("item_type")?;
    let kind = ItemKind::parse(&raw_kind)
        .ok_or_else(|| anyhow!("unknown item type '{raw_kind}' in items table"))?;
    let depth: i64 = row.try_get("depth")?;
    Ok(StoredItem {
        owner: ClientId(row.try_get("owner_id")?),
        item: Item {
            id: ItemId(row.try_get("item_id")?),
            parent_id: ItemId(row.try_get("parent_id")?),
            name: row.try_get("name")?,
            kind,
            path: row.try_get("path")?,
            depth: u8::try_from(depth).context("item depth out of range")?,
        },
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
