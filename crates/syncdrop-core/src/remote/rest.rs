//! PostgREST-compatible HTTP backend (e.g. a Supabase project's `/rest/v1`).
//!
//! The table change feed is approximated by polling: every
//! `poll_interval_ms` the owner's rows are fingerprinted and a change fires
//! when the fingerprint moves.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{millis_to_timestamp, ChangeHandler, DropRow, RemoteStore};
use crate::config::RemoteConfig;
use crate::error::{SyncError, SyncResult};
use crate::types::{CollectionId, Drop, DropId};

const DROPS_PATH: &str = "drops";
const DEVICES_PATH: &str = "devices";

/// HTTP adapter for a PostgREST endpoint
#[derive(Debug, Clone)]
pub struct RestRemote {
    client: reqwest::Client,
    config: RemoteConfig,
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Debug, Deserialize, PartialEq)]
struct FingerprintRow {
    id: String,
    collection_id: String,
    deleted_at: Option<String>,
}

impl RestRemote {
    pub fn new(config: RemoteConfig) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SyncError::Remote(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.url.trim_end_matches('/'), path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let bearer = self
            .config
            .access_token
            .as_deref()
            .unwrap_or(&self.config.api_key);
        self.client
            .request(method, self.url(path))
            .header("apikey", &self.config.api_key)
            .header("Authorization", format!("Bearer {bearer}"))
    }

    async fn send(builder: reqwest::RequestBuilder) -> SyncResult<reqwest::Response> {
        let response = builder.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "Remote returned error");
            return Err(SyncError::Remote(format!("HTTP {status}: {body}")));
        }
        Ok(response)
    }

    async fn fingerprint(&self, owner_id: &str) -> SyncResult<Vec<FingerprintRow>> {
        let query = vec![
            ("select", "id,collection_id,deleted_at".to_string()),
            ("user_id", format!("eq.{owner_id}")),
            ("order", "id.asc".to_string()),
        ];
        let response = Self::send(self.request(reqwest::Method::GET, DROPS_PATH).query(&query)).await?;
        Ok(response.json().await?)
    }
}

/// PostgREST query parameters for one listing
pub(crate) fn list_query(
    owner_id: &str,
    collection: Option<CollectionId>,
    trashed: bool,
) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("select", "*".to_string()),
        ("user_id", format!("eq.{owner_id}")),
    ];
    if let Some(collection) = collection {
        query.push(("collection_id", format!("eq.{collection}")));
    }
    let tombstone = if trashed { "not.is.null" } else { "is.null" };
    query.push(("deleted_at", tombstone.to_string()));
    query.push(("order", "created_at.desc".to_string()));
    query
}

fn row_filter(owner_id: &str, id: &DropId) -> [(&'static str, String); 2] {
    [
        ("id", format!("eq.{}", id.as_str())),
        ("user_id", format!("eq.{owner_id}")),
    ]
}

#[async_trait]
impl RemoteStore for RestRemote {
    async fn list(
        &self,
        owner_id: &str,
        collection: Option<CollectionId>,
        trashed: bool,
    ) -> SyncResult<Vec<Drop>> {
        let query = list_query(owner_id, collection, trashed);
        let response = Self::send(self.request(reqwest::Method::GET, DROPS_PATH).query(&query)).await?;
        let rows: Vec<DropRow> = response.json().await?;
        Ok(rows.into_iter().map(DropRow::into_drop).collect())
    }

    async fn insert(&self, drop: &Drop, owner_id: &str, device_id: &str) -> SyncResult<()> {
        self.insert_many(std::slice::from_ref(drop), owner_id, device_id)
            .await
    }

    async fn insert_many(&self, drops: &[Drop], owner_id: &str, device_id: &str) -> SyncResult<()> {
        let rows = drops
            .iter()
            .map(|d| DropRow::from_drop(d, owner_id, device_id))
            .collect::<SyncResult<Vec<_>>>()?;
        debug!(count = rows.len(), owner = owner_id, "Inserting rows");
        Self::send(
            self.request(reqwest::Method::POST, DROPS_PATH)
                .header("Prefer", "resolution=merge-duplicates,return=minimal")
                .json(&rows),
        )
        .await?;
        Ok(())
    }

    async fn soft_delete(&self, owner_id: &str, id: &DropId, deleted_at: i64) -> SyncResult<()> {
        let at = millis_to_timestamp(deleted_at)?;
        Self::send(
            self.request(reqwest::Method::PATCH, DROPS_PATH)
                .query(&row_filter(owner_id, id))
                .json(&json!({ "deleted_at": at })),
        )
        .await?;
        Ok(())
    }

    async fn restore(&self, owner_id: &str, id: &DropId) -> SyncResult<()> {
        Self::send(
            self.request(reqwest::Method::PATCH, DROPS_PATH)
                .query(&row_filter(owner_id, id))
                .json(&json!({ "deleted_at": null })),
        )
        .await?;
        Ok(())
    }

    async fn hard_delete(&self, owner_id: &str, id: &DropId) -> SyncResult<()> {
        Self::send(
            self.request(reqwest::Method::DELETE, DROPS_PATH)
                .query(&row_filter(owner_id, id)),
        )
        .await?;
        Ok(())
    }

    async fn move_to(&self, owner_id: &str, id: &DropId, collection: CollectionId) -> SyncResult<()> {
        Self::send(
            self.request(reqwest::Method::PATCH, DROPS_PATH)
                .query(&row_filter(owner_id, id))
                .json(&json!({ "collection_id": collection })),
        )
        .await?;
        Ok(())
    }

    fn watch(&self, owner_id: &str, on_change: ChangeHandler) -> JoinHandle<()> {
        let remote = self.clone();
        let owner = owner_id.to_string();
        let interval = Duration::from_millis(self.config.poll_interval_ms.max(100));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut last: Option<Vec<FingerprintRow>> = None;
            loop {
                ticker.tick().await;
                match remote.fingerprint(&owner).await {
                    Ok(current) => {
                        if last.as_ref().is_some_and(|prev| *prev != current) {
                            on_change();
                        }
                        last = Some(current);
                    }
                    Err(e) => debug!(error = %e, "Change poll failed"),
                }
            }
        })
    }

    async fn ensure_device(&self, owner_id: &str, device_key: &str, label: &str) -> SyncResult<String> {
        let query = [
            ("select", "id".to_string()),
            ("user_id", format!("eq.{owner_id}")),
            ("device_key", format!("eq.{device_key}")),
            ("limit", "1".to_string()),
        ];
        let response = Self::send(self.request(reqwest::Method::GET, DEVICES_PATH).query(&query)).await?;
        let existing: Vec<IdOnly> = response.json().await?;
        if let Some(device) = existing.into_iter().next() {
            return Ok(device.id);
        }

        let response = Self::send(
            self.request(reqwest::Method::POST, DEVICES_PATH)
                .header("Prefer", "return=representation")
                .json(&json!([{
                    "user_id": owner_id,
                    "device_key": device_key,
                    "name": label,
                }])),
        )
        .await?;
        let created: Vec<IdOnly> = response.json().await?;
        created
            .into_iter()
            .next()
            .map(|d| d.id)
            .ok_or_else(|| SyncError::Remote("device insert returned no row".to_string()))
    }
}
