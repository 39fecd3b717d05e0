//! Builds the per-run id maps (§4.4): `{airtable_id ↔ supabase_id}` per
//! entity, plus the `load_id → [car_airtable_id]` list derived from
//! `load_cars` rows.

use crate::models::{LoadCarRow, Record, AIRTABLE_ID, SUPABASE_ID};
use crate::util::normalize_id;
use std::collections::HashMap;

/// The bijection between relational UUIDs and sheet record-ids for one
/// entity, materialized fresh at the start of each entity-direction pass.
#[derive(Debug, Clone, Default)]
pub struct CrossRefIndex {
    pub sheet_to_relational: HashMap<String, String>,
    pub relational_to_sheet: HashMap<String, String>,
}

impl CrossRefIndex {
    /// Builds the index from both sides' fetched records.
    ///
    /// Sources, in order (§4.4): sheet records' `supabase_id`, then
    /// relational records' `airtable_id` — union into `sheet_to_relational`;
    /// `relational_to_sheet` is the inverse, first-write wins on conflict.
    pub fn build(sheet_records: &[Record], relational_records: &[Record]) -> Self {
        let mut sheet_to_relational = HashMap::new();
        let mut relational_to_sheet = HashMap::new();

        for rec in sheet_records {
            let (Some(sheet_id), Some(rel_id)) = (rec.airtable_id(), rec.get_str(SUPABASE_ID))
            else {
                continue;
            };
            let (sheet_id, rel_id) = (normalize_id(sheet_id), normalize_id(rel_id));
            if sheet_id.is_empty() || rel_id.is_empty() {
                continue;
            }
            sheet_to_relational.insert(sheet_id.clone(), rel_id.clone());
            relational_to_sheet.entry(rel_id).or_insert(sheet_id);
        }

        for rec in relational_records {
            let (Some(rel_id), Some(sheet_id)) = (rec.relational_id(), rec.get_str(AIRTABLE_ID))
            else {
                continue;
            };
            let (rel_id, sheet_id) = (normalize_id(rel_id), normalize_id(sheet_id));
            if rel_id.is_empty() || sheet_id.is_empty() {
                continue;
            }
            sheet_to_relational.entry(sheet_id.clone()).or_insert_with(|| rel_id.clone());
            relational_to_sheet.entry(rel_id).or_insert(sheet_id);
        }

        Self { sheet_to_relational, relational_to_sheet }
    }

    pub fn relational_for_sheet(&self, sheet_id: &str) -> Option<&str> {
        self.sheet_to_relational.get(sheet_id).map(String::as_str)
    }

    pub fn sheet_for_relational(&self, relational_id: &str) -> Option<&str> {
        self.relational_to_sheet.get(relational_id).map(String::as_str)
    }

    /// Seeds a just-created pairing so later records within the same
    /// entity-direction loop can resolve it without a re-fetch (§5 "seed
    /// newly-created pairs for later records within the same entity loop").
    pub fn seed(&mut self, relational_id: &str, sheet_id: &str) {
        let (relational_id, sheet_id) = (normalize_id(relational_id), normalize_id(sheet_id));
        self.sheet_to_relational.insert(sheet_id.clone(), relational_id.clone());
        self.relational_to_sheet.insert(relational_id, sheet_id);
    }
}

/// Derives `relational_load_id → [sheet_car_id]` from `load_cars` rows
/// (§4.4): only affirmatively-assigned rows contribute, a row's car id is
/// resolved preferentially from an embedded `car_airtable_id`, else via the
/// car cross-ref, and the result is deduplicated per load.
pub fn build_load_cars_index(
    rows: &[LoadCarRow],
    car_cross_ref: &CrossRefIndex,
) -> HashMap<String, Vec<String>> {
    let mut index: HashMap<String, Vec<String>> = HashMap::new();
    for row in rows {
        if !row.is_assigned() {
            continue;
        }
        let car_sheet_id = row
            .car_airtable_id
            .as_deref()
            .map(normalize_id)
            .filter(|s| !s.is_empty())
            .or_else(|| car_cross_ref.sheet_for_relational(&row.car_id).map(normalize_id));

        let Some(car_sheet_id) = car_sheet_id else { continue };
        let entry = index.entry(normalize_id(&row.load_id)).or_default();
        if !entry.contains(&car_sheet_id) {
            entry.push(car_sheet_id);
        }
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Record;
    use serde_json::json;

    fn sheet_rec(airtable_id: &str, supabase_id: Option<&str>) -> Record {
        let mut r = Record::new();
        r.set("airtable_id", json!(airtable_id));
        if let Some(id) = supabase_id {
            r.set("supabase_id", json!(id));
        }
        r
    }

    fn rel_rec(id: &str, airtable_id: Option<&str>) -> Record {
        let mut r = Record::new();
        r.set("id", json!(id));
        if let Some(a) = airtable_id {
            r.set("airtable_id", json!(a));
        }
        r
    }

    #[test]
    fn builds_bijection_from_both_sides() {
        let sheet = vec![sheet_rec("recA", Some("u1")), sheet_rec("recB", None)];
        let rel = vec![rel_rec("u2", Some("recB"))];
        let idx = CrossRefIndex::build(&sheet, &rel);
        assert_eq!(idx.relational_for_sheet("recA"), Some("u1"));
        assert_eq!(idx.relational_for_sheet("recB"), Some("u2"));
        assert_eq!(idx.sheet_for_relational("u1"), Some("recA"));
        assert_eq!(idx.sheet_for_relational("u2"), Some("recB"));
    }

    #[test]
    fn missing_pairing_returns_none() {
        let idx = CrossRefIndex::build(&[], &[]);
        assert_eq!(idx.relational_for_sheet("recZ"), None);
    }

    #[test]
    fn seed_makes_new_pair_resolvable() {
        let mut idx = CrossRefIndex::build(&[], &[]);
        idx.seed("u9", "recZ");
        assert_eq!(idx.relational_for_sheet("recZ"), Some("u9"));
        assert_eq!(idx.sheet_for_relational("u9"), Some("recZ"));
    }

    #[test]
    fn load_cars_aggregation_excludes_unassigned() {
        let car_idx = {
            let mut idx = CrossRefIndex::default();
            idx.seed("c2-rel", "recC2");
            idx
        };
        let rows = vec![
            LoadCarRow {
                load_id: "L1".into(),
                car_id: "c1-rel".into(),
                car_airtable_id: Some("recC1".into()),
                is_assigned: json!(true),
                last_changed_for_sync: None,
            },
            LoadCarRow {
                load_id: "L1".into(),
                car_id: "c2-rel".into(),
                car_airtable_id: None,
                is_assigned: json!(false),
                last_changed_for_sync: None,
            },
        ];
        let agg = build_load_cars_index(&rows, &car_idx);
        assert_eq!(agg.get("L1").unwrap(), &vec!["recC1".to_string()]);
    }

    #[test]
    fn load_cars_dedupes_repeat_rows() {
        let rows = vec![
            LoadCarRow {
                load_id: "L1".into(),
                car_id: "c1".into(),
                car_airtable_id: Some("recC1".into()),
                is_assigned: json!(true),
                last_changed_for_sync: None,
            },
            LoadCarRow {
                load_id: "L1".into(),
                car_id: "c1".into(),
                car_airtable_id: Some("recC1".into()),
                is_assigned: json!("Y"),
                last_changed_for_sync: None,
            },
        ];
        let agg = build_load_cars_index(&rows, &CrossRefIndex::default());
        assert_eq!(agg.get("L1").unwrap().len(), 1);
    }
}
