//! SRC-R adapter: a PostgREST-style HTTP interface over the relational
//! datastore (§10.6). Also owns the two relational-only concerns with no
//! sheet-side analogue: `load_cars` join rows (§4.4) and `system_sync_runs`
//! bookkeeping (§4.7, §6.4).

use crate::error::{SyncError, SyncResult};
use crate::models::{EntityKind, LoadCarRow, Record};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use super::RemoteStoreAdapter;

#[derive(Debug, Clone)]
pub struct RelationalConfig {
    pub base_url: String,
    pub service_key: String,
}

pub struct RelationalAdapter {
    client: Client,
    config: RelationalConfig,
}

impl RelationalAdapter {
    pub fn new(client: Client, config: RelationalConfig) -> Self {
        Self { client, config }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.config.base_url.trim_end_matches('/'), table)
    }

    fn auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("apikey", &self.config.service_key)
            .header("Authorization", format!("Bearer {}", self.config.service_key))
    }

    async fn rows_to_records(resp: reqwest::Response) -> SyncResult<Vec<Record>> {
        check_status(&resp)?;
        let rows: Vec<Map<String, Value>> = resp
            .json()
            .await
            .map_err(|e| SyncError::Adapter(format!("decoding relational response: {e}")))?;
        Ok(rows.into_iter().map(|fields| Record { fields }).collect())
    }

    /// Fetches every `load_cars` join row (§4.4); only rows the caller later
    /// filters by `is_assigned` matter, but all rows are returned so the
    /// cross-ref builder can decide.
    pub async fn fetch_load_cars(&self) -> SyncResult<Vec<LoadCarRow>> {
        let resp = self
            .auth(self.client.get(self.table_url("load_cars")))
            .send()
            .await
            .map_err(|e| SyncError::Transient(e.to_string()))?;
        check_status(&resp)?;
        let rows: Vec<Map<String, Value>> = resp
            .json()
            .await
            .map_err(|e| SyncError::Adapter(format!("decoding load_cars response: {e}")))?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let load_id = row.get("load_id")?.as_str()?.to_string();
                let car_id = row.get("car_id")?.as_str()?.to_string();
                let car_airtable_id =
                    row.get("car_airtable_id").and_then(Value::as_str).map(str::to_string);
                let is_assigned = row.get("is_assigned").cloned().unwrap_or(Value::Bool(false));
                let last_changed_for_sync = row
                    .get("last_changed_for_sync")
                    .and_then(crate::util::parse_timestamp);
                Some(LoadCarRow { load_id, car_id, car_airtable_id, is_assigned, last_changed_for_sync })
            })
            .collect())
    }

    /// Opens a `system_sync_runs` row (§4.7); returns the new row's id.
    /// Failures here are logged by the caller and do not abort the run.
    pub async fn open_sync_run(
        &self,
        table_name: &str,
        direction: &str,
        run_type: &str,
        started_at: chrono::DateTime<chrono::Utc>,
    ) -> SyncResult<String> {
        let body = json!({
            "table_name": table_name,
            "direction": direction,
            "type": run_type,
            "started_at": started_at.to_rfc3339(),
            "processed": 0,
            "updated": 0,
            "errors": 0,
        });
        let resp = self
            .auth(self.client.post(self.table_url("system_sync_runs")))
            .header("Prefer", "return=representation")
            .json(&body)
            .send()
            .await
            .map_err(|e| SyncError::Transient(e.to_string()))?;
        check_status(&resp)?;
        let rows: Vec<Map<String, Value>> = resp
            .json()
            .await
            .map_err(|e| SyncError::Adapter(format!("decoding sync_run response: {e}")))?;
        rows.into_iter()
            .next()
            .and_then(|r| r.get("id").and_then(Value::as_str).map(str::to_string))
            .ok_or_else(|| SyncError::Adapter("sync_run insert returned no id".into()))
    }

    /// Closes out a `system_sync_runs` row with final stats (§4.7).
    pub async fn close_sync_run(
        &self,
        run_id: &str,
        processed: u64,
        updated: u64,
        errors: u64,
        finished_at: chrono::DateTime<chrono::Utc>,
    ) -> SyncResult<()> {
        let body = json!({
            "processed": processed,
            "updated": updated,
            "errors": errors,
            "finished_at": finished_at.to_rfc3339(),
        });
        let url = format!("{}?id=eq.{}", self.table_url("system_sync_runs"), run_id);
        let resp = self
            .auth(self.client.patch(url))
            .json(&body)
            .send()
            .await
            .map_err(|e| SyncError::Transient(e.to_string()))?;
        check_status(&resp)?;
        Ok(())
    }
}

fn check_status(resp: &reqwest::Response) -> SyncResult<()> {
    let status = resp.status();
    if status.is_server_error() {
        return Err(SyncError::Transient(format!("relational store returned {status}")));
    }
    if !status.is_success() {
        return Err(SyncError::Adapter(format!("relational store returned {status}")));
    }
    Ok(())
}

#[async_trait]
impl RemoteStoreAdapter for RelationalAdapter {
    async fn fetch_all(&self, entity: EntityKind) -> SyncResult<Vec<Record>> {
        let resp = self
            .auth(self.client.get(self.table_url(entity.table_name())))
            .send()
            .await
            .map_err(|e| SyncError::Transient(e.to_string()))?;
        Self::rows_to_records(resp).await
    }

    async fn create(&self, entity: EntityKind, mut payload: Map<String, Value>) -> SyncResult<Record> {
        // §4.6.d: honor an id the source already referenced; otherwise mint
        // a fresh one so the row's primary key is known before the insert
        // round-trips, matching the teacher's pattern of generating ids
        // client-side before a write.
        payload.entry("id".to_string()).or_insert_with(|| json!(Uuid::new_v4().to_string()));

        let resp = self
            .auth(self.client.post(self.table_url(entity.table_name())))
            .header("Prefer", "return=representation")
            .json(&payload)
            .send()
            .await
            .map_err(|e| SyncError::Transient(e.to_string()))?;
        let mut rows = Self::rows_to_records(resp).await?;
        rows.pop().ok_or_else(|| SyncError::Adapter("create returned no row".into()))
    }

    async fn update(&self, entity: EntityKind, id: &str, payload: Map<String, Value>) -> SyncResult<Record> {
        if payload.is_empty() {
            return self.fetch_one(entity, id).await;
        }
        let url = format!("{}?id=eq.{}", self.table_url(entity.table_name()), id);
        let resp = self
            .auth(self.client.patch(url))
            .header("Prefer", "return=representation")
            .json(&payload)
            .send()
            .await
            .map_err(|e| SyncError::Transient(e.to_string()))?;
        let mut rows = Self::rows_to_records(resp).await?;
        rows.pop().ok_or_else(|| SyncError::Adapter("update returned no row".into()))
    }
}

#[async_trait]
impl super::LoadCarsSource for RelationalAdapter {
    async fn fetch_load_cars(&self) -> SyncResult<Vec<LoadCarRow>> {
        RelationalAdapter::fetch_load_cars(self).await
    }
}

impl RelationalAdapter {
    async fn fetch_one(&self, entity: EntityKind, id: &str) -> SyncResult<Record> {
        let url = format!("{}?id=eq.{}", self.table_url(entity.table_name()), id);
        let resp = self
            .auth(self.client.get(url))
            .send()
            .await
            .map_err(|e| SyncError::Transient(e.to_string()))?;
        let mut rows = Self::rows_to_records(resp).await?;
        rows.pop().ok_or_else(|| SyncError::Adapter("record not found".into()))
    }
}
