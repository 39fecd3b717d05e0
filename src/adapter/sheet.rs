//! SRC-S adapter: field-id/field-name dual addressing and invalid-field
//! recovery against an Airtable-style REST API (§4.5, the critical subpart).

use crate::error::{SyncError, SyncResult};
use crate::models::{EntityKind, Record, RESERVED_SHEET_KEYS};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::warn;

use super::RemoteStoreAdapter;

/// A single field's dual addressing: the preferred name and/or the
/// fallback field-id (§6.3, §9's `FieldRef` idea).
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct FieldMapEntry {
    pub id: Option<String>,
    pub name: Option<String>,
}

pub type EntityFieldMap = HashMap<String, FieldMapEntry>;

/// Per-entity table addressing: table id and/or table name (§6.3, "at least
/// one").
#[derive(Debug, Clone, Default)]
pub struct SheetTable {
    pub id: Option<String>,
    pub name: Option<String>,
}

impl SheetTable {
    fn reference(&self) -> SyncResult<&str> {
        self.id
            .as_deref()
            .or(self.name.as_deref())
            .ok_or_else(|| SyncError::Config("sheet table has neither id nor name configured".into()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct SheetConfig {
    pub base_url: String,
    pub token: String,
    pub base_id: String,
    pub tables: HashMap<EntityKind, SheetTable>,
    pub field_maps: HashMap<EntityKind, EntityFieldMap>,
}

pub struct SheetAdapter {
    client: Client,
    config: SheetConfig,
}

impl SheetAdapter {
    pub fn new(client: Client, config: SheetConfig) -> Self {
        Self { client, config }
    }

    fn table(&self, entity: EntityKind) -> SyncResult<&SheetTable> {
        self.config
            .tables
            .get(&entity)
            .ok_or_else(|| SyncError::Config(format!("no sheet table configured for {entity}")))
    }

    fn list_url(&self, table_ref: &str, by_field_id: bool, offset: Option<&str>) -> String {
        let mut url = format!(
            "{}/v0/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.base_id,
            table_ref
        );
        let mut params = Vec::new();
        if by_field_id {
            params.push("returnFieldsByFieldId=true".to_string());
        }
        if let Some(offset) = offset {
            params.push(format!("offset={offset}"));
        }
        if !params.is_empty() {
            url.push('?');
            url.push_str(&params.join("&"));
        }
        url
    }

    fn record_url(&self, table_ref: &str, id: &str) -> String {
        format!(
            "{}/v0/{}/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.base_id,
            table_ref,
            id
        )
    }

    async fn list_records(
        &self,
        table_ref: &str,
        by_field_id: bool,
    ) -> SyncResult<HashMap<String, Map<String, Value>>> {
        let mut out = HashMap::new();
        let mut offset: Option<String> = None;
        loop {
            let url = self.list_url(table_ref, by_field_id, offset.as_deref());
            let resp = self
                .client
                .get(&url)
                .bearer_auth(&self.config.token)
                .send()
                .await
                .map_err(|e| SyncError::Transient(e.to_string()))?;
            let status = resp.status();
            if status.is_server_error() {
                return Err(SyncError::Transient(format!("sheet store returned {status}")));
            }
            if !status.is_success() {
                return Err(SyncError::Adapter(format!("sheet store returned {status}")));
            }
            let body: Value = resp
                .json()
                .await
                .map_err(|e| SyncError::Adapter(format!("decoding sheet list response: {e}")))?;
            let records = body.get("records").and_then(Value::as_array).cloned().unwrap_or_default();
            for rec in records {
                let id = rec.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
                let fields = rec
                    .get("fields")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                out.insert(id, fields);
            }
            offset = body.get("offset").and_then(Value::as_str).map(str::to_string);
            if offset.is_none() {
                break;
            }
        }
        Ok(out)
    }

    fn uses_field_ids(&self, entity: EntityKind) -> bool {
        self.config
            .field_maps
            .get(&entity)
            .map(|m| m.values().any(|e| e.id.is_some()))
            .unwrap_or(false)
    }

    /// Resolves one configured sheet key's preferred name (§4.5 write):
    /// configured name, else the key itself.
    fn preferred_name(entity_map: Option<&EntityFieldMap>, key: &str) -> String {
        entity_map
            .and_then(|m| m.get(key))
            .and_then(|e| e.name.clone())
            .unwrap_or_else(|| key.to_string())
    }

    fn fallback_id(entity_map: Option<&EntityFieldMap>, key: &str) -> Option<String> {
        entity_map.and_then(|m| m.get(key)).and_then(|e| e.id.clone())
    }

    async fn send_write(
        &self,
        table_ref: &str,
        id: Option<&str>,
        fields: &Map<String, Value>,
    ) -> Result<Record, WriteFailure> {
        let body = json!({ "fields": fields });
        let resp = match id {
            Some(id) => self.client.patch(self.record_url(table_ref, id)),
            None => self.client.post(format!(
                "{}/v0/{}/{}",
                self.config.base_url.trim_end_matches('/'),
                self.config.base_id,
                table_ref
            )),
        }
        .bearer_auth(&self.config.token)
        .json(&body)
        .send()
        .await
        .map_err(|e| WriteFailure::Transport(e.to_string()))?;

        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();

        if status.is_success() {
            let parsed: Value = serde_json::from_str(&body_text)
                .map_err(|e| WriteFailure::Transport(format!("decoding sheet write response: {e}")))?;
            let airtable_id = parsed.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
            let raw_fields = parsed.get("fields").and_then(Value::as_object).cloned().unwrap_or_default();
            let mut record = Record::new();
            record.set("airtable_id", json!(airtable_id));
            record.set("raw_fields", Value::Object(raw_fields.clone()));
            for (k, v) in raw_fields {
                record.set(&k, v);
            }
            return Ok(record);
        }

        if status.as_u16() == 422 {
            return Err(classify_422(&body_text));
        }
        if status.is_server_error() {
            return Err(WriteFailure::Transient(format!("sheet store returned {status}")));
        }
        Err(WriteFailure::Transport(format!("sheet store returned {status}: {body_text}")))
    }

    async fn write_record(
        &self,
        entity: EntityKind,
        id: Option<&str>,
        payload: Map<String, Value>,
    ) -> SyncResult<Record> {
        let table_ref = self.table(entity)?.reference()?.to_string();
        let field_map = self.config.field_maps.get(&entity);
        let (preferred, fallback_by_id) = build_write_payloads(&payload, field_map);

        match self.send_write(&table_ref, id, &preferred).await {
            Ok(record) => return Ok(record),
            Err(WriteFailure::UnknownField) => {
                match self.send_write(&table_ref, id, &fallback_by_id).await {
                    Ok(record) => return Ok(record),
                    Err(WriteFailure::InvalidValue(msg)) => {
                        return self.sanitize_and_retry(&table_ref, id, &payload, field_map, &msg).await;
                    }
                    Err(other) => return Err(other.into_sync_error()),
                }
            }
            Err(WriteFailure::InvalidValue(msg)) => {
                return self.sanitize_and_retry(&table_ref, id, &payload, field_map, &msg).await;
            }
            Err(other) => return Err(other.into_sync_error()),
        }
    }

    async fn sanitize_and_retry(
        &self,
        table_ref: &str,
        id: Option<&str>,
        payload: &Map<String, Value>,
        field_map: Option<&EntityFieldMap>,
        error_message: &str,
    ) -> SyncResult<Record> {
        let offending = extract_offending_fields(error_message);
        if offending.is_empty() {
            return Err(SyncError::InvalidValue(vec![]));
        }
        let sanitized = drop_offending_fields(payload, &offending, field_map);
        warn!(dropped = ?offending, "sheet adapter dropping fields rejected by invalid-value response");
        let (preferred, _) = build_write_payloads(&sanitized, field_map);
        self.send_write(table_ref, id, &preferred)
            .await
            .map_err(|_| SyncError::InvalidValue(offending))
    }
}

enum WriteFailure {
    UnknownField,
    InvalidValue(String),
    Transient(String),
    Transport(String),
}

impl WriteFailure {
    fn into_sync_error(self) -> SyncError {
        match self {
            WriteFailure::UnknownField => SyncError::UnknownField(vec![]),
            WriteFailure::InvalidValue(msg) => SyncError::InvalidValue(extract_offending_fields(&msg)),
            WriteFailure::Transient(msg) => SyncError::Transient(msg),
            WriteFailure::Transport(msg) => SyncError::Adapter(msg),
        }
    }
}

static UNKNOWN_FIELD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)unknown_field_name|unknown field").unwrap());

/// §4.5: "retry the same write using the field-id payload" triggers on 422
/// with reason UNKNOWN_FIELD_NAME or matching text.
fn classify_422(body_text: &str) -> WriteFailure {
    if UNKNOWN_FIELD_RE.is_match(body_text) {
        WriteFailure::UnknownField
    } else {
        WriteFailure::InvalidValue(body_text.to_string())
    }
}

static OFFENDING_FIELD_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r#"[Ff]ield\s+"([^"]+)"\s+cannot accept the provided value"#).unwrap(),
        Regex::new(r#"[Ii]nvalid value for field\s+"([^"]+)""#).unwrap(),
    ]
});

/// Extracts offending field names from a human-readable error message using
/// the fixed list of patterns in §4.5/§9.
fn extract_offending_fields(message: &str) -> Vec<String> {
    let mut found = Vec::new();
    for pattern in OFFENDING_FIELD_PATTERNS.iter() {
        for cap in pattern.captures_iter(message) {
            if let Some(name) = cap.get(1) {
                let name = name.as_str().to_string();
                if !found.contains(&name) {
                    found.push(name);
                }
            }
        }
    }
    found
}

/// Builds the preferred (name-keyed) and fallback (id-keyed) write payloads
/// for one candidate, skipping reserved keys (§4.5).
fn build_write_payloads(
    payload: &Map<String, Value>,
    field_map: Option<&EntityFieldMap>,
) -> (Map<String, Value>, Map<String, Value>) {
    let mut preferred = Map::new();
    let mut fallback = Map::new();
    for (key, value) in payload {
        if RESERVED_SHEET_KEYS.contains(&key.as_str()) {
            continue;
        }
        let name = SheetAdapter::preferred_name(field_map, key);
        preferred.insert(name, value.clone());

        match SheetAdapter::fallback_id(field_map, key) {
            Some(id) => {
                fallback.insert(id, value.clone());
            }
            None => {
                fallback.insert(SheetAdapter::preferred_name(field_map, key), value.clone());
            }
        }
    }
    (preferred, fallback)
}

/// Drops offending keys from the candidate payload, matching both by their
/// preferred name and by their mapped field id (§4.5: "drop the offending
/// keys from both the preferred and fallback payloads (also by mapped id)").
fn drop_offending_fields(
    payload: &Map<String, Value>,
    offending: &[String],
    field_map: Option<&EntityFieldMap>,
) -> Map<String, Value> {
    payload
        .iter()
        .filter(|(key, _)| {
            let name = SheetAdapter::preferred_name(field_map, key);
            let id = SheetAdapter::fallback_id(field_map, key);
            !offending.contains(key) && !offending.contains(&name) && id.as_ref().map(|i| !offending.contains(i)).unwrap_or(true)
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[async_trait]
impl RemoteStoreAdapter for SheetAdapter {
    async fn fetch_all(&self, entity: EntityKind) -> SyncResult<Vec<Record>> {
        let table_ref = self.table(entity)?.reference()?.to_string();
        let name_keyed = self.list_records(&table_ref, false).await?;
        let by_id_keyed = if self.uses_field_ids(entity) {
            self.list_records(&table_ref, true).await?
        } else {
            HashMap::new()
        };
        let field_map = self.config.field_maps.get(&entity);

        let mut out = Vec::with_capacity(name_keyed.len());
        for (airtable_id, raw_fields) in name_keyed {
            let mut record = Record::new();
            record.set("airtable_id", json!(airtable_id.clone()));
            record.set("raw_fields", Value::Object(raw_fields.clone()));
            if let Some(by_id_fields) = by_id_keyed.get(&airtable_id) {
                record.set("raw_fields_by_id", Value::Object(by_id_fields.clone()));
            }

            if let Some(map) = field_map {
                for (key, entry) in map {
                    let candidate_name = entry.name.clone().unwrap_or_else(|| key.clone());
                    let mut value = raw_fields.get(&candidate_name).cloned();
                    if matches!(value, None | Some(Value::Null)) {
                        if let (Some(id), Some(by_id_fields)) =
                            (&entry.id, by_id_keyed.get(&airtable_id))
                        {
                            if let Some(v) = by_id_fields.get(id) {
                                value = Some(v.clone());
                            }
                        }
                    }
                    if let Some(v) = value {
                        record.set(key, v);
                    }
                }
            } else {
                for (k, v) in &raw_fields {
                    record.set(k, v.clone());
                }
            }
            out.push(record);
        }
        Ok(out)
    }

    async fn create(&self, entity: EntityKind, payload: Map<String, Value>) -> SyncResult<Record> {
        self.write_record(entity, None, payload).await
    }

    async fn update(&self, entity: EntityKind, id: &str, payload: Map<String, Value>) -> SyncResult<Record> {
        if payload.is_empty() {
            return Err(SyncError::Adapter("update called with an empty payload".into()));
        }
        self.write_record(entity, Some(id), payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_map() -> EntityFieldMap {
        let mut m = HashMap::new();
        m.insert(
            "make".to_string(),
            FieldMapEntry { id: Some("fldMake123".to_string()), name: Some("Make".to_string()) },
        );
        m.insert("model".to_string(), FieldMapEntry { id: None, name: None });
        m
    }

    #[test]
    fn preferred_name_uses_configured_name_else_key() {
        let map = field_map();
        assert_eq!(SheetAdapter::preferred_name(Some(&map), "make"), "Make");
        assert_eq!(SheetAdapter::preferred_name(Some(&map), "model"), "model");
        assert_eq!(SheetAdapter::preferred_name(None, "model"), "model");
    }

    #[test]
    fn build_write_payloads_splits_name_and_id_keyed() {
        let map = field_map();
        let mut candidate = Map::new();
        candidate.insert("make".to_string(), json!("Ford"));
        candidate.insert("model".to_string(), json!("F150"));
        candidate.insert("airtable_id".to_string(), json!("recShouldBeDropped"));

        let (preferred, fallback) = build_write_payloads(&candidate, Some(&map));
        assert_eq!(preferred.get("Make"), Some(&json!("Ford")));
        assert_eq!(preferred.get("model"), Some(&json!("F150")));
        assert!(!preferred.contains_key("airtable_id"));
        assert_eq!(fallback.get("fldMake123"), Some(&json!("Ford")));
        assert_eq!(fallback.get("model"), Some(&json!("F150")));
    }

    #[test]
    fn classifies_unknown_field_error() {
        let body = r#"{"error":{"type":"UNKNOWN_FIELD_NAME","message":"Unknown field name: \"Foo\""}}"#;
        assert!(matches!(classify_422(body), WriteFailure::UnknownField));
    }

    #[test]
    fn classifies_invalid_value_error() {
        let body = r#"{"error":{"type":"INVALID_VALUE_FOR_COLUMN","message":"Invalid value for field \"Rate\""}}"#;
        assert!(matches!(classify_422(body), WriteFailure::InvalidValue(_)));
    }

    #[test]
    fn extracts_offending_field_from_cannot_accept_pattern() {
        let msg = r#"Field "Rate" cannot accept the provided value"#;
        assert_eq!(extract_offending_fields(msg), vec!["Rate".to_string()]);
    }

    #[test]
    fn extracts_offending_field_from_invalid_value_pattern() {
        let msg = r#"Invalid value for field "Distance""#;
        assert_eq!(extract_offending_fields(msg), vec!["Distance".to_string()]);
    }

    #[test]
    fn extracts_multiple_offending_fields() {
        let msg = r#"Field "Rate" cannot accept the provided value. Invalid value for field "Distance""#;
        let found = extract_offending_fields(msg);
        assert_eq!(found, vec!["Rate".to_string(), "Distance".to_string()]);
    }

    #[test]
    fn no_match_returns_empty() {
        assert!(extract_offending_fields("totally unrelated failure").is_empty());
    }

    #[test]
    fn drop_offending_fields_matches_by_key_name_or_id() {
        let map = field_map();
        let mut candidate = Map::new();
        candidate.insert("make".to_string(), json!("Ford"));
        candidate.insert("model".to_string(), json!("F150"));
        let sanitized = drop_offending_fields(&candidate, &["Make".to_string()], Some(&map));
        assert!(!sanitized.contains_key("make"));
        assert!(sanitized.contains_key("model"));
    }
}
