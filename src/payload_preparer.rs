//! Turns a candidate payload into the minimal update payload (§4.2).

use crate::models::{Direction, EntityKind};
use crate::util::{is_blank, normalize_for_compare};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// `(direction, entity) → [field...]` allowlist for blank overwrites
/// (§6.5's `allowBlankOverwrite`).
#[derive(Debug, Clone, Default)]
pub struct BlankOverwriteRules {
    pub prevent_blank_overwrite: bool,
    pub allow: HashMap<(Direction, EntityKind), Vec<String>>,
}

impl BlankOverwriteRules {
    fn allows(&self, direction: Direction, entity: EntityKind, field: &str) -> bool {
        self.allow
            .get(&(direction, entity))
            .map(|fields| fields.iter().any(|f| f == field))
            .unwrap_or(false)
    }
}

/// Diffs `candidate` against `target` (absent for a creation) and returns the
/// minimal payload to write (§4.2).
pub fn prepare_payload(
    candidate: &Map<String, Value>,
    target: Option<&Map<String, Value>>,
    direction: Direction,
    entity: EntityKind,
    rules: &BlankOverwriteRules,
) -> Map<String, Value> {
    let Some(target) = target else {
        // Creation: pass-through (step 2). Candidate already excludes
        // undefined keys by construction (the mapper never inserts them).
        return candidate.clone();
    };

    let mut out = Map::new();
    for (field, value) in candidate {
        let current = target.get(field);

        if let Some(current) = current {
            if normalize_for_compare(value) == normalize_for_compare(current) {
                continue;
            }
        }

        if rules.prevent_blank_overwrite && is_blank(value) {
            let target_is_blank = current.map(is_blank).unwrap_or(true);
            if rules.allows(direction, entity, field) || target_is_blank {
                out.insert(field.clone(), value.clone());
            }
            // otherwise dropped: blank candidate over a non-blank target.
            continue;
        }

        out.insert(field.clone(), value.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn creation_is_pass_through() {
        let candidate = map(&[("make", json!("Ford"))]);
        let out = prepare_payload(&candidate, None, Direction::SheetToRelational, EntityKind::Car, &BlankOverwriteRules::default());
        assert_eq!(out, candidate);
    }

    #[test]
    fn unchanged_field_is_dropped() {
        let candidate = map(&[("make", json!(" Ford "))]);
        let target = map(&[("make", json!("Ford"))]);
        let out = prepare_payload(&candidate, Some(&target), Direction::SheetToRelational, EntityKind::Car, &BlankOverwriteRules::default());
        assert!(out.is_empty());
    }

    #[test]
    fn array_order_does_not_count_as_a_change() {
        let candidate = map(&[("load_cars", json!(["recB", "recA"]))]);
        let target = map(&[("load_cars", json!(["recA", "recB"]))]);
        let out = prepare_payload(&candidate, Some(&target), Direction::RelationalToSheet, EntityKind::Load, &BlankOverwriteRules::default());
        assert!(out.is_empty());
    }

    #[test]
    fn blank_guard_drops_blank_over_nonblank_target_by_default() {
        let candidate = map(&[("special_instructions", json!(""))]);
        let target = map(&[("special_instructions", json!("handle with care"))]);
        let rules = BlankOverwriteRules { prevent_blank_overwrite: true, allow: HashMap::new() };
        let out = prepare_payload(&candidate, Some(&target), Direction::RelationalToSheet, EntityKind::Car, &rules);
        assert!(out.is_empty(), "blank must not overwrite a non-blank target");
    }

    #[test]
    fn blank_guard_allows_when_target_already_blank() {
        let candidate = map(&[("special_instructions", json!(""))]);
        let target = map(&[("special_instructions", Value::Null)]);
        let rules = BlankOverwriteRules { prevent_blank_overwrite: true, allow: HashMap::new() };
        let out = prepare_payload(&candidate, Some(&target), Direction::RelationalToSheet, EntityKind::Car, &rules);
        assert_eq!(out.get("special_instructions"), Some(&json!("")));
    }

    #[test]
    fn blank_guard_allowlist_permits_write() {
        let candidate = map(&[("special_instructions", json!(""))]);
        let target = map(&[("special_instructions", json!("handle with care"))]);
        let mut allow = HashMap::new();
        allow.insert((Direction::RelationalToSheet, EntityKind::Car), vec!["special_instructions".to_string()]);
        let rules = BlankOverwriteRules { prevent_blank_overwrite: true, allow };
        let out = prepare_payload(&candidate, Some(&target), Direction::RelationalToSheet, EntityKind::Car, &rules);
        assert_eq!(out.get("special_instructions"), Some(&json!("")));
    }

    #[test]
    fn blank_guard_disabled_writes_blank_anyway() {
        let candidate = map(&[("special_instructions", json!(""))]);
        let target = map(&[("special_instructions", json!("handle with care"))]);
        let out = prepare_payload(&candidate, Some(&target), Direction::RelationalToSheet, EntityKind::Car, &BlankOverwriteRules::default());
        assert_eq!(out.get("special_instructions"), Some(&json!("")));
    }
}
