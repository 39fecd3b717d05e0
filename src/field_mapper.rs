//! Produces, for a given entity and direction, the candidate payload for the
//! target side from a source record (§4.1).

use crate::cross_ref::CrossRefIndex;
use crate::models::{Direction, EntityKind, EntitySpec, Record, AIRTABLE_ID, AIRTABLE_ID_NAME_LABEL, RAW_FIELDS};
use crate::util::{extract_linked_ids, format_date_only, normalize_id};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tracing::warn;

/// Maps one source record into a candidate target payload.
///
/// `link_indexes` holds one `CrossRefIndex` per entity kind a link field may
/// point at — a link's translation always goes through the *target*
/// entity's index, never the source entity's own (§4.4 builds one index per
/// entity; a car's `pickup_location_id` link is resolved through
/// `Location`'s index, not `Car`'s). `load_cars_index` is only consulted for
/// `EntityKind::Load` in the relational→sheet direction (§4.1 last bullet);
/// pass `None` for every other call.
pub fn map_record(
    spec: &EntitySpec,
    direction: Direction,
    source: &Record,
    link_indexes: &HashMap<EntityKind, CrossRefIndex>,
    load_cars_index: Option<&HashMap<String, Vec<String>>>,
) -> Map<String, Value> {
    let mut out = Map::new();

    for &field in spec.fields {
        let Some(raw) = source.get(field) else { continue };
        let is_required = spec.required.contains(&field);
        let is_numeric = spec.numeric.contains(&field);
        if let Some(normalized) = normalize_value(raw, is_required, is_numeric) {
            out.insert(field.to_string(), normalized);
        }
    }

    for link in spec.links {
        let Some(raw) = source.get(link.key) else { continue };
        let target_index = link_indexes.get(&link.target);
        match direction {
            Direction::SheetToRelational => {
                let ids = extract_linked_ids(raw);
                if let Some(sheet_id) = ids.first() {
                    match target_index.and_then(|idx| idx.relational_for_sheet(sheet_id)) {
                        Some(rel_id) => {
                            out.insert(link.key.to_string(), json!(rel_id));
                        }
                        None => {
                            warn!(field = link.key, sheet_id, "link target not in cross-ref, omitting field");
                        }
                    }
                }
                // empty list on the sheet side: sheet→relational has no
                // "explicit clear" semantics (§4.1), so nothing is written.
            }
            Direction::RelationalToSheet => {
                let scalar = raw.as_str().map(normalize_id).filter(|s| !s.is_empty());
                match scalar {
                    Some(rel_id) => match target_index.and_then(|idx| idx.sheet_for_relational(&rel_id)) {
                        Some(sheet_id) => {
                            out.insert(link.key.to_string(), json!([sheet_id]));
                        }
                        None => {
                            warn!(field = link.key, relational_id = rel_id.as_str(), "link target has no sheet twin, clearing field");
                            out.insert(link.key.to_string(), json!([]));
                        }
                    },
                    None => {
                        out.insert(link.key.to_string(), json!([]));
                    }
                }
            }
        }
    }

    if direction == Direction::SheetToRelational {
        if let Some(label) = compute_name_label(source) {
            out.insert(AIRTABLE_ID_NAME_LABEL.to_string(), label);
        }
    }

    if direction == Direction::RelationalToSheet {
        for &field in spec.date_only {
            if let Some(value) = out.get(field).cloned() {
                out.insert(field.to_string(), format_date_only(&value));
            }
        }

        if spec.kind == crate::models::EntityKind::Load {
            out.remove("load_number");
            let cars = source
                .relational_id()
                .and_then(|id| load_cars_index.and_then(|idx| idx.get(id)))
                .cloned()
                .unwrap_or_default();
            let mut deduped: Vec<String> = Vec::new();
            for car in cars {
                let car = normalize_id(&car);
                if !car.is_empty() && !deduped.contains(&car) {
                    deduped.push(car);
                }
            }
            out.insert("load_cars".to_string(), json!(deduped));
        }
    }

    out
}

/// §4.1's value normalization: trim strings; empty string → null unless
/// required (then the key is omitted, modeled as `None`); numeric fields
/// parse trimmed strings, finite → number else null; everything else passes
/// through unchanged.
fn normalize_value(value: &Value, is_required: bool, is_numeric: bool) -> Option<Value> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if is_numeric {
                if trimmed.is_empty() {
                    return Some(Value::Null);
                }
                return Some(match trimmed.parse::<f64>() {
                    Ok(n) if n.is_finite() => json!(n),
                    _ => Value::Null,
                });
            }
            if trimmed.is_empty() {
                if is_required {
                    None
                } else {
                    Some(Value::Null)
                }
            } else {
                Some(Value::String(trimmed.to_string()))
            }
        }
        Value::Null => {
            if is_required {
                None
            } else {
                Some(Value::Null)
            }
        }
        other => Some(other.clone()),
    }
}

/// §4.1 name-label fallback chain: `airtable_id_name_label`, else `id`, else
/// `raw_fields.id`, else `airtable_id`.
fn compute_name_label(source: &Record) -> Option<Value> {
    source
        .get(AIRTABLE_ID_NAME_LABEL)
        .cloned()
        .or_else(|| source.get("id").cloned())
        .or_else(|| source.get(RAW_FIELDS).and_then(|rf| rf.get("id")).cloned())
        .or_else(|| source.get(AIRTABLE_ID).cloned())
}
