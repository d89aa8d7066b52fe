use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{ClientId, Item, ItemId, ItemKind},
    error::ApiError,
    protocol::{CreateItemRequest, DeleteItemResponse, RenameItemRequest, CLIENT_ID_HEADER},
};
use tracing::debug;
use url::Url;

use crate::{config::SyncConfig, error::SyncError};

/// Listing source used to seed the local collection.
#[async_trait]
pub trait FolderApi: Send + Sync {
    /// Items currently in `folder_id`, in display order.
    async fn list_folder(&self, folder_id: &ItemId) -> Result<Vec<Item>>;
}

/// REST client for the folder service, acting on one client's tree.
///
/// Non-2xx responses surface as [`SyncError::Rejected`] inside the returned
/// `anyhow::Error`; callers can `downcast_ref` to inspect the error code.
#[derive(Clone)]
pub struct HttpFolderApi {
    http: Client,
    base: Url,
    client_id: ClientId,
}

impl HttpFolderApi {
    pub fn new(config: &SyncConfig) -> Result<Self, SyncError> {
        Ok(Self::with_client(Client::new(), config.http_base()?, config.client_id.clone()))
    }

    pub fn with_client(http: Client, base: Url, client_id: ClientId) -> Self {
        Self {
            http,
            base,
            client_id,
        }
    }

    pub async fn create_item(
        &self,
        parent_id: &ItemId,
        name: &str,
        kind: ItemKind,
    ) -> Result<Item> {
        let response = self
            .http
            .post(self.endpoint(&["folder", parent_id.as_str()])?)
            .header(CLIENT_ID_HEADER, self.client_id.as_str())
            .json(&CreateItemRequest {
                name: name.to_string(),
                kind,
            })
            .send()
            .await
            .with_context(|| format!("failed to create `{name}` in folder {parent_id}"))?;
        decode(response).await
    }

    pub async fn rename_item(&self, item_id: &ItemId, name: &str) -> Result<Item> {
        let response = self
            .http
            .put(self.endpoint(&["item", item_id.as_str()])?)
            .header(CLIENT_ID_HEADER, self.client_id.as_str())
            .json(&RenameItemRequest {
                name: name.to_string(),
            })
            .send()
            .await
            .with_context(|| format!("failed to rename item {item_id}"))?;
        decode(response).await
    }

    pub async fn delete_item(&self, item_id: &ItemId) -> Result<DeleteItemResponse> {
        let response = self
            .http
            .delete(self.endpoint(&["item", item_id.as_str()])?)
            .header(CLIENT_ID_HEADER, self.client_id.as_str())
            .send()
            .await
            .with_context(|| format!("failed to delete item {item_id}"))?;
        decode(response).await
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow::anyhow!("server url cannot be a base: {}", self.base))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl FolderApi for HttpFolderApi {
    async fn list_folder(&self, folder_id: &ItemId) -> Result<Vec<Item>> {
        let url = self.endpoint(&["folder", folder_id.as_str()])?;
        debug!(%url, "sync: fetching folder listing");
        let response = self
            .http
            .get(url)
            .header(CLIENT_ID_HEADER, self.client_id.as_str())
            .send()
            .await
            .with_context(|| format!("failed to fetch listing of folder {folder_id}"))?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return response
            .json()
            .await
            .with_context(|| format!("invalid response body (status {status})"));
    }

    let body = response.text().await.unwrap_or_default();
    let rejected = match serde_json::from_str::<ApiError>(&body) {
        Ok(api_error) => SyncError::Rejected {
            status: status.as_u16(),
            code: Some(api_error.code),
            message: api_error.message,
        },
        Err(_) => SyncError::Rejected {
            status: status.as_u16(),
            code: None,
            message: body,
        },
    };
    Err(rejected.into())
}

#[cfg(test)]
#[path = "tests/folder_api_tests.rs"]
mod tests;
