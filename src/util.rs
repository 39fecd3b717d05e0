//! Small, independent helpers shared by the field mapper, payload preparer,
//! and conflict resolver: id normalization, timestamp parsing, linked-record
//! extraction, blank detection, and a deep merge for raw-field fallbacks.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

/// Trims a record id and lower-cases nothing (ids are case-sensitive on both
/// sides); whitespace-only input normalizes to an empty string.
pub fn normalize_id(raw: &str) -> String {
    raw.trim().to_string()
}

/// Parses a timestamp out of a loosely-typed field value. Accepts RFC3339
/// strings (the shape both SRC-R and SRC-S emit) and passes through already
/// numeric epoch-millis values. Returns `None` rather than erroring: a
/// missing/unparseable timestamp is treated as "changed" by the conflict
/// resolver (§4.3), not as a hard failure.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(|ms| DateTime::from_timestamp_millis(ms)),
        _ => None,
    }
}

/// Reformats a value already known to be a date-only field (§I5) as
/// `YYYY-MM-DD`. Returns the original value unparsed (spec says "left
/// untouched") if it cannot be read as a date or timestamp.
pub fn format_date_only(value: &Value) -> Value {
    let parsed = match value {
        Value::String(s) => {
            let s = s.trim();
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive()))
        }
        _ => None,
    };
    match parsed {
        Some(d) => Value::String(d.format("%Y-%m-%d").to_string()),
        None => value.clone(),
    }
}

/// Extracts linked-record ids from a sheet-side link value, which is always
/// an array of record ids (possibly of length 0 or 1 per §I6, but the engine
/// tolerates longer arrays defensively).
pub fn extract_linked_ids(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(normalize_id))
            .filter(|s| !s.is_empty())
            .collect(),
        Value::String(s) if !s.trim().is_empty() => vec![normalize_id(s)],
        _ => Vec::new(),
    }
}

/// True for the blank-value family used by the blank-overwrite guard (§4.2):
/// undefined is modeled by the key's absence from the map, so this only needs
/// to judge `null`, empty string, empty array, empty object.
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// Normalized comparison form for §4.2 step 3a: trims strings, and produces a
/// stable textual encoding for arrays (order-independent) and objects so
/// structurally-equal-but-differently-ordered values compare equal.
pub fn normalize_for_compare(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Array(items) => {
            let mut rendered: Vec<String> = items.iter().map(normalize_for_compare).collect();
            rendered.sort();
            serde_json::to_string(&rendered).unwrap_or_default()
        }
        Value::Object(_) => {
            // serde_json::Map preserves insertion order; re-serialize through
            // a BTreeMap so key order never affects equality.
            let as_map: std::collections::BTreeMap<String, Value> =
                serde_json::from_value(value.clone()).unwrap_or_default();
            serde_json::to_string(&as_map).unwrap_or_default()
        }
        other => other.to_string(),
    }
}

/// Shallow-keys-deep-values merge used when stitching a name-keyed fetch and
/// an id-keyed fetch of the same sheet record together (§4.5): values already
/// present in `base` win, `other` only fills gaps.
pub fn deep_merge(base: &mut Value, other: &Value) {
    match (base, other) {
        (Value::Object(base_map), Value::Object(other_map)) => {
            for (k, v) in other_map {
                match base_map.get_mut(k) {
                    Some(existing) if !existing.is_null() => deep_merge(existing, v),
                    _ => {
                        base_map.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_whitespace_ids() {
        assert_eq!(normalize_id("  recABC  "), "recABC");
    }

    #[test]
    fn parses_rfc3339_timestamp() {
        let v = json!("2024-01-02T10:00:00Z");
        let parsed = parse_timestamp(&v).unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-01-02T10:00:00+00:00");
    }

    #[test]
    fn unparseable_timestamp_is_none() {
        assert!(parse_timestamp(&json!("not-a-date")).is_none());
        assert!(parse_timestamp(&Value::Null).is_none());
    }

    #[test]
    fn formats_date_only_from_rfc3339() {
        let v = json!("2024-03-05T00:00:00Z");
        assert_eq!(format_date_only(&v), json!("2024-03-05"));
    }

    #[test]
    fn leaves_unparseable_date_untouched() {
        let v = json!("next tuesday");
        assert_eq!(format_date_only(&v), v);
    }

    #[test]
    fn extracts_linked_ids_from_array() {
        let v = json!(["recA", "recB"]);
        assert_eq!(extract_linked_ids(&v), vec!["recA".to_string(), "recB".to_string()]);
    }

    #[test]
    fn empty_link_array_is_empty() {
        assert!(extract_linked_ids(&json!([])).is_empty());
    }

    #[test]
    fn blank_detection() {
        assert!(is_blank(&Value::Null));
        assert!(is_blank(&json!("")));
        assert!(is_blank(&json!("   ")));
        assert!(is_blank(&json!([])));
        assert!(is_blank(&json!({})));
        assert!(!is_blank(&json!("hi")));
        assert!(!is_blank(&json!(0)));
    }

    #[test]
    fn array_comparison_is_order_independent() {
        let a = json!(["recB", "recA"]);
        let b = json!(["recA", "recB"]);
        assert_eq!(normalize_for_compare(&a), normalize_for_compare(&b));
    }

    #[test]
    fn deep_merge_fills_gaps_only() {
        let mut base = json!({"a": 1, "b": null});
        let other = json!({"a": 2, "b": 3, "c": 4});
        deep_merge(&mut base, &other);
        assert_eq!(base, json!({"a": 1, "b": 3, "c": 4}));
    }
}
