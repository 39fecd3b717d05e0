//! Per entity × direction: fetch both sides, build the cross-ref indexes,
//! iterate source records and upsert the target (§4.6).

use crate::adapter::{LoadCarsSource, RemoteStoreAdapter};
use crate::conflict_resolver::{self, Decision, SideState, Tolerances};
use crate::cross_ref::{build_load_cars_index, CrossRefIndex};
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::field_mapper;
use crate::models::{Direction, EntityKind, Record, SecondaryKey, AIRTABLE_ID_NAME_LABEL, RAW_FIELDS, SUPABASE_ID};
use crate::payload_preparer::{self, BlankOverwriteRules};
use crate::util::{extract_linked_ids, normalize_id};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{info, info_span, warn};

/// Per-(entity, direction) outcome counters (§4.6 step 4).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntityStats {
    pub processed: u64,
    pub created: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub skipped: u64,
    pub errors: u64,
}

/// One row of the run-level error summary, keyed by (entity, direction,
/// error kind, message); `record_ids` accumulates every record that hit it
/// (§4.6 "on per-record exception").
#[derive(Debug, Clone)]
pub struct ErrorSummaryEntry {
    pub entity: EntityKind,
    pub direction: Direction,
    pub kind: ErrorKind,
    pub message: String,
    pub record_ids: Vec<String>,
}

fn record_error(
    errors: &mut Vec<ErrorSummaryEntry>,
    entity: EntityKind,
    direction: Direction,
    err: &SyncError,
    record_id: String,
) {
    let kind = err.kind();
    let message = err.to_string();
    match errors
        .iter_mut()
        .find(|e| e.entity == entity && e.direction == direction && e.kind == kind && e.message == message)
    {
        Some(existing) if !existing.record_ids.contains(&record_id) => existing.record_ids.push(record_id),
        Some(_) => {}
        None => errors.push(ErrorSummaryEntry { entity, direction, kind, message, record_ids: vec![record_id] }),
    }
}

/// True when this side's own id is the sheet's `airtable_id`; false when
/// it's the relational `id`.
fn side_is_sheet(direction: Direction, is_source: bool) -> bool {
    match (direction, is_source) {
        (Direction::SheetToRelational, true) => true,
        (Direction::SheetToRelational, false) => false,
        (Direction::RelationalToSheet, true) => false,
        (Direction::RelationalToSheet, false) => true,
    }
}

fn own_id(is_sheet_side: bool, rec: &Record) -> Option<String> {
    let raw = if is_sheet_side { rec.airtable_id() } else { rec.relational_id() };
    raw.map(normalize_id).filter(|s| !s.is_empty())
}

/// §4.6.a's per-entity secondary-key fallback.
fn secondary_key_value(key: SecondaryKey, rec: &Record) -> Option<String> {
    match key {
        SecondaryKey::ExternalId => rec.get_str("external_id").map(normalize_id).filter(|s| !s.is_empty()),
        SecondaryKey::AirtableId => rec.airtable_id().map(normalize_id).filter(|s| !s.is_empty()),
        SecondaryKey::TrimmedLowerName => {
            rec.get_str("name").map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty())
        }
        SecondaryKey::TrimmedLoadNumber => {
            rec.get_str("load_number").map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        }
        SecondaryKey::LowerEmail => rec.get_str("email").map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty()),
    }
}

async fn fetch_link_indexes(
    relational: &dyn RemoteStoreAdapter,
    sheet: &dyn RemoteStoreAdapter,
    targets: &[EntityKind],
) -> SyncResult<HashMap<EntityKind, CrossRefIndex>> {
    let mut out = HashMap::new();
    for &target in targets {
        let (sheet_records, relational_records) =
            tokio::try_join!(sheet.fetch_all(target), relational.fetch_all(target))?;
        out.insert(target, CrossRefIndex::build(&sheet_records, &relational_records));
    }
    Ok(out)
}

/// Runs one (entity, direction) pass end to end (§4.6).
pub async fn sync_entity(
    relational: &dyn RemoteStoreAdapter,
    sheet: &dyn RemoteStoreAdapter,
    load_cars_source: &dyn LoadCarsSource,
    entity: EntityKind,
    direction: Direction,
    tolerances: Tolerances,
    rules: &BlankOverwriteRules,
) -> SyncResult<(EntityStats, Vec<ErrorSummaryEntry>)> {
    let _span = info_span!("sync", entity = %entity, direction = %direction).entered();
    let spec = entity.spec();

    let (sheet_records, relational_records) =
        tokio::try_join!(sheet.fetch_all(entity), relational.fetch_all(entity))?;

    let mut own_cross_ref = CrossRefIndex::build(&sheet_records, &relational_records);

    let mut link_targets: Vec<EntityKind> = spec.links.iter().map(|l| l.target).collect();
    link_targets.sort();
    link_targets.dedup();
    let link_indexes = fetch_link_indexes(relational, sheet, &link_targets).await?;

    // Load-only: aggregate `load_cars` rows into a link index keyed by the
    // relational load id, using Car's own cross-ref (Car is never a `links`
    // entry on Load, so it is not already in `link_indexes`).
    let mut load_cars_index: Option<HashMap<String, Vec<String>>> = None;
    let mut load_cars_lc_by_load: HashMap<String, DateTime<Utc>> = HashMap::new();
    if entity == EntityKind::Load {
        let car_cross_ref = match link_indexes.get(&EntityKind::Car) {
            Some(idx) => idx.clone(),
            None => {
                let (sheet_cars, relational_cars) =
                    tokio::try_join!(sheet.fetch_all(EntityKind::Car), relational.fetch_all(EntityKind::Car))?;
                CrossRefIndex::build(&sheet_cars, &relational_cars)
            }
        };
        let rows = load_cars_source.fetch_load_cars().await?;
        for row in &rows {
            if let Some(lc) = row.last_changed_for_sync {
                let key = normalize_id(&row.load_id);
                load_cars_lc_by_load
                    .entry(key)
                    .and_modify(|existing| {
                        if lc > *existing {
                            *existing = lc;
                        }
                    })
                    .or_insert(lc);
            }
        }
        load_cars_index = Some(build_load_cars_index(&rows, &car_cross_ref));
    }

    let source_is_sheet = side_is_sheet(direction, true);
    let target_is_sheet = side_is_sheet(direction, false);
    let source_records = if source_is_sheet { &sheet_records } else { &relational_records };
    let target_records = if target_is_sheet { &sheet_records } else { &relational_records };

    let target_by_own_id: HashMap<String, &Record> = target_records
        .iter()
        .filter_map(|r| own_id(target_is_sheet, r).map(|id| (id, r)))
        .collect();
    let target_by_secondary: HashMap<String, &Record> = target_records
        .iter()
        .filter_map(|r| secondary_key_value(spec.secondary_key, r).map(|k| (k, r)))
        .collect();

    let source_tolerance_ms = if source_is_sheet { tolerances.sheet_ms } else { tolerances.relational_ms };
    let target_tolerance_ms = if target_is_sheet { tolerances.sheet_ms } else { tolerances.relational_ms };

    let source_adapter: &dyn RemoteStoreAdapter = if source_is_sheet { sheet } else { relational };
    let target_adapter: &dyn RemoteStoreAdapter = if target_is_sheet { sheet } else { relational };

    let mut stats = EntityStats::default();
    let mut errors: Vec<ErrorSummaryEntry> = Vec::new();

    for source in source_records {
        let Some(source_own_id) = own_id(source_is_sheet, source) else {
            warn!("source record has no usable id, skipping");
            continue;
        };

        let translated = if source_is_sheet {
            own_cross_ref.relational_for_sheet(&source_own_id).map(str::to_string)
        } else {
            own_cross_ref.sheet_for_relational(&source_own_id).map(str::to_string)
        };

        let target = translated
            .as_deref()
            .and_then(|id| target_by_own_id.get(id))
            .or_else(|| {
                secondary_key_value(spec.secondary_key, source).and_then(|k| target_by_secondary.get(&k))
            })
            .copied();

        let mut source_side = SideState {
            last_changed_for_sync: source.last_changed_for_sync(),
            last_synced: source.last_synced(),
        };
        let target_side = SideState {
            last_changed_for_sync: target.and_then(|t| t.last_changed_for_sync()),
            last_synced: target.and_then(|t| t.last_synced()),
        };

        let mut this_load_cars: Vec<String> = Vec::new();
        if entity == EntityKind::Load && direction == Direction::RelationalToSheet {
            if let Some(rows_lc_max) = load_cars_lc_by_load.get(&source_own_id) {
                source_side.last_changed_for_sync = std::cmp::max(source_side.last_changed_for_sync, Some(*rows_lc_max));
            }
            this_load_cars =
                load_cars_index.as_ref().and_then(|idx| idx.get(&source_own_id)).cloned().unwrap_or_default();
        }

        let mut decision =
            conflict_resolver::resolve(source_side, source_tolerance_ms, target_side, target_tolerance_ms, tolerances.sheet_ms);

        if entity == EntityKind::Load && direction == Direction::RelationalToSheet && !decision.should_proceed() {
            let current: Vec<String> = target.and_then(|t| t.get("load_cars")).map(extract_linked_ids).unwrap_or_default();
            let mut a = this_load_cars.clone();
            a.sort();
            let mut b = current;
            b.sort();
            if a != b {
                decision = Decision::Proceed;
            }
        }

        match decision {
            Decision::Unchanged => {
                stats.unchanged += 1;
                continue;
            }
            Decision::SkipDestinationNewer | Decision::SkipBothChangedDestinationNewer => {
                stats.skipped += 1;
                continue;
            }
            Decision::Proceed => {}
        }

        let mut candidate = field_mapper::map_record(spec, direction, source, &link_indexes, load_cars_index.as_ref());

        // The mapper never emits `airtable_id` (it's metadata, not a per-entity
        // field); on sheet->relational it has to be carried over explicitly so
        // the relational twin's own airtable_id matches the sheet source's,
        // both on creation and if it was ever missing/stale on an existing row.
        if source_is_sheet {
            candidate.insert(crate::models::AIRTABLE_ID.to_string(), json!(source_own_id.clone()));
        }

        if target.is_none() {
            let mut missing_field = None;
            for &field in spec.required {
                if !candidate.contains_key(field) {
                    missing_field = Some(field);
                    break;
                }
            }
            if let Some(missing) = missing_field {
                let err = SyncError::MissingRequiredField { entity: spec.kind.table_name(), field: missing };
                record_error(&mut errors, entity, direction, &err, source_own_id.clone());
                stats.errors += 1;
                continue;
            }
        }

        let mut prepared =
            payload_preparer::prepare_payload(&candidate, target.map(|t| &t.fields), direction, entity, rules);

        if target.is_none() && direction == Direction::SheetToRelational {
            if let Some(id) = source.get_str(SUPABASE_ID) {
                let id = normalize_id(id);
                if !id.is_empty() {
                    prepared.entry("id".to_string()).or_insert(json!(id));
                }
            }
        }

        if prepared.is_empty() && target.is_some() {
            stats.unchanged += 1;
            // Step e (back-link, §4.6.e) is independent of step d's "payload
            // non-empty" gate: a record already identical on both sides can
            // still be missing its reverse-id pointer.
            if let Some(result_record) = target {
                write_backlink_and_stamp(
                    relational,
                    sheet,
                    source_adapter,
                    source_is_sheet,
                    target_is_sheet,
                    entity,
                    source,
                    &source_own_id,
                    source_side,
                    result_record,
                    &mut own_cross_ref,
                )
                .await;
            }
            continue;
        }

        let is_create = target.is_none();
        let write_result = match target.and_then(|t| own_id(target_is_sheet, t)) {
            Some(target_id) if !is_create => target_adapter.update(entity, &target_id, prepared).await,
            _ => target_adapter.create(entity, prepared).await,
        };

        let result_record = match write_result {
            Ok(r) => r,
            Err(err) => {
                warn!(record_id = source_own_id.as_str(), error = %err, "record sync failed");
                record_error(&mut errors, entity, direction, &err, source_own_id.clone());
                stats.errors += 1;
                continue;
            }
        };

        stats.processed += 1;
        if is_create {
            stats.created += 1;
        } else {
            stats.updated += 1;
        }

        write_backlink_and_stamp(
            relational,
            sheet,
            source_adapter,
            source_is_sheet,
            target_is_sheet,
            entity,
            source,
            &source_own_id,
            source_side,
            &result_record,
            &mut own_cross_ref,
        )
        .await;
    }

    info!(
        processed = stats.processed,
        created = stats.created,
        updated = stats.updated,
        unchanged = stats.unchanged,
        skipped = stats.skipped,
        errors = stats.errors,
        "entity pass complete"
    );

    Ok((stats, errors))
}

/// Step e (§4.6.e): writes the reverse-id pointer on the other side if it is
/// missing or stale, seeds the cross-ref for later records in this same
/// loop, then stamps the source side's `last_synced` (step f).
#[allow(clippy::too_many_arguments)]
async fn write_backlink_and_stamp(
    relational: &dyn RemoteStoreAdapter,
    sheet: &dyn RemoteStoreAdapter,
    source_adapter: &dyn RemoteStoreAdapter,
    source_is_sheet: bool,
    target_is_sheet: bool,
    entity: EntityKind,
    source: &Record,
    source_own_id: &str,
    source_side: SideState,
    result_record: &Record,
    own_cross_ref: &mut CrossRefIndex,
) {
    let Some(new_target_id) = own_id(target_is_sheet, result_record) else {
        warn!("target record has no usable id, skipping back-link");
        return;
    };

    if source_is_sheet {
        let current = source.get_str(SUPABASE_ID).map(normalize_id);
        if current.as_deref() != Some(new_target_id.as_str()) {
            if let Err(err) = sheet
                .update(entity, source_own_id, [(SUPABASE_ID.to_string(), json!(new_target_id))].into_iter().collect())
                .await
            {
                warn!(record_id = source_own_id, error = %err, "back-link write failed");
            }
        }
    } else {
        let current = source.airtable_id().map(normalize_id);
        if current.as_deref() != Some(new_target_id.as_str()) {
            let label = result_record
                .get(RAW_FIELDS)
                .and_then(|rf| rf.get("id"))
                .cloned()
                .or_else(|| result_record.get(AIRTABLE_ID_NAME_LABEL).cloned())
                .unwrap_or_else(|| json!(new_target_id));
            let payload = [
                (crate::models::AIRTABLE_ID.to_string(), json!(new_target_id)),
                (AIRTABLE_ID_NAME_LABEL.to_string(), label),
            ]
            .into_iter()
            .collect();
            if let Err(err) = relational.update(entity, source_own_id, payload).await {
                warn!(record_id = source_own_id, error = %err, "back-link write failed");
            }
        }
    }

    own_cross_ref.seed(
        if source_is_sheet { &new_target_id } else { source_own_id },
        if source_is_sheet { source_own_id } else { &new_target_id },
    );

    let now = Utc::now();
    let stamp = conflict_resolver::stamp_last_synced(source_side, now);
    if let Err(err) = source_adapter
        .update(entity, source_own_id, [(crate::models::LAST_SYNCED.to_string(), json!(stamp.to_rfc3339()))].into_iter().collect())
        .await
    {
        warn!(record_id = source_own_id, error = %err, "last_synced stamp failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(fields: &[(&str, Value)]) -> Record {
        let mut r = Record::new();
        for (k, v) in fields {
            r.set(k, v.clone());
        }
        r
    }

    #[test]
    fn side_is_sheet_matrix() {
        assert!(side_is_sheet(Direction::SheetToRelational, true));
        assert!(!side_is_sheet(Direction::SheetToRelational, false));
        assert!(!side_is_sheet(Direction::RelationalToSheet, true));
        assert!(side_is_sheet(Direction::RelationalToSheet, false));
    }

    #[test]
    fn own_id_picks_airtable_or_relational_id() {
        let r = rec(&[("id", json!("u1")), ("airtable_id", json!("recA"))]);
        assert_eq!(own_id(true, &r), Some("recA".to_string()));
        assert_eq!(own_id(false, &r), Some("u1".to_string()));
    }

    #[test]
    fn secondary_key_lowercases_name_and_email() {
        let company = rec(&[("name", json!("  Acme Freight  "))]);
        assert_eq!(secondary_key_value(SecondaryKey::TrimmedLowerName, &company), Some("acme freight".to_string()));

        let user = rec(&[("email", json!("Jane@Example.com"))]);
        assert_eq!(secondary_key_value(SecondaryKey::LowerEmail, &user), Some("jane@example.com".to_string()));
    }

    #[test]
    fn record_error_groups_by_kind_and_message_and_dedupes_ids() {
        let mut errors = Vec::new();
        let err = SyncError::Transient("boom".into());
        record_error(&mut errors, EntityKind::Car, Direction::SheetToRelational, &err, "recA".into());
        record_error(&mut errors, EntityKind::Car, Direction::SheetToRelational, &err, "recA".into());
        record_error(&mut errors, EntityKind::Car, Direction::SheetToRelational, &err, "recB".into());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].record_ids, vec!["recA".to_string(), "recB".to_string()]);
    }
}
