//! Environment-driven configuration: the suffix-cascade credential lookup
//! (§6.3), per-entity sheet table/field-map loading, tolerance defaults, and
//! the optional sync-rules file (§6.5).

use crate::adapter::relational::RelationalConfig;
use crate::adapter::sheet::{EntityFieldMap, FieldMapEntry, SheetConfig, SheetTable};
use crate::conflict_resolver::Tolerances;
use crate::error::{SyncError, SyncResult};
use crate::models::{Direction, EntityKind};
use crate::payload_preparer::BlankOverwriteRules;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fs;

const RELATIONAL_TOLERANCE_DEFAULT_MS: i64 = 1000;
const RELATIONAL_TOLERANCE_FLOOR_MS: i64 = 5000;
const SHEET_TOLERANCE_DEFAULT_MS: i64 = 60_000;
const SHEET_TOLERANCE_FLOOR_MS: i64 = 5000;

/// Reads `ENV` (default `dev`) and tries, in order, `<NAME>_<ENV_UPPER>`,
/// `<NAME>_<env_lower>`, `<ENV_UPPER>_<NAME>`, `<env_lower>_<NAME>`, then the
/// bare `NAME` (§6.3).
pub fn env_var(name: &str) -> Option<String> {
    let env_name = env::var("ENV").unwrap_or_else(|_| "dev".to_string());
    let upper = env_name.to_uppercase();
    let lower = env_name.to_lowercase();
    let candidates = [
        format!("{name}_{upper}"),
        format!("{name}_{lower}"),
        format!("{upper}_{name}"),
        format!("{lower}_{name}"),
        name.to_string(),
    ];
    candidates.into_iter().find_map(|key| env::var(&key).ok())
}

fn required_env(name: &str, errors: &mut Vec<String>) -> Option<String> {
    match env_var(name) {
        Some(v) if !v.trim().is_empty() => Some(v),
        _ => {
            errors.push(name.to_string());
            None
        }
    }
}

/// The fully resolved configuration an `EntitySyncer`/`RunCoordinator`
/// needs to run.
pub struct AppConfig {
    pub relational: RelationalConfig,
    pub sheet: SheetConfig,
    pub tolerances: Tolerances,
    pub rules: BlankOverwriteRules,
    pub interval_minutes: u64,
}

/// Loads every setting, collecting every missing piece of configuration
/// before failing, so an operator sees the whole gap in one run (§10.3).
pub fn load() -> SyncResult<AppConfig> {
    let mut missing = Vec::new();

    let relational_url = required_env("SUPABASE_URL", &mut missing);
    let relational_key = required_env("SUPABASE_SERVICE_KEY", &mut missing);
    let sheet_token = required_env("AIRTABLE_TOKEN", &mut missing);
    let sheet_base_id = required_env("AIRTABLE_BASE_ID", &mut missing);

    let mut tables = HashMap::new();
    for entity in EntityKind::ALL {
        let table = load_table(entity);
        if table.id.is_none() && table.name.is_none() {
            missing.push(format!("AIRTABLE_TABLE_{}", entity.table_name().to_uppercase()));
        }
        tables.insert(entity, table);
    }

    if !missing.is_empty() {
        return Err(SyncError::Config(format!("missing configuration: {}", missing.join(", "))));
    }

    let field_maps = load_field_maps()?;

    let relational = RelationalConfig {
        base_url: relational_url.unwrap(),
        service_key: relational_key.unwrap(),
    };
    let sheet = SheetConfig {
        base_url: env_var("AIRTABLE_BASE_URL").unwrap_or_else(|| "https://api.airtable.com".to_string()),
        token: sheet_token.unwrap(),
        base_id: sheet_base_id.unwrap(),
        tables,
        field_maps,
    };

    let tolerances = load_tolerances();
    let rules = load_sync_rules()?;
    let interval_minutes = env_var("SYNC_INTERVAL_MINUTES").and_then(|v| v.parse().ok()).unwrap_or(15);

    Ok(AppConfig { relational, sheet, tolerances, rules, interval_minutes })
}

fn load_table(entity: EntityKind) -> SheetTable {
    let upper = entity.table_name().to_uppercase();
    SheetTable {
        id: env_var(&format!("AIRTABLE_TABLE_ID_{upper}")),
        name: env_var(&format!("AIRTABLE_TABLE_NAME_{upper}")).or_else(|| env_var(&format!("AIRTABLE_TABLE_{upper}"))),
    }
}

/// Parses `KEY=fieldId[|fieldName]` pairs, comma-separated, from
/// `AIRTABLE_FIELD_MAP_<ENTITY>`; falls back to `AIRTABLE_FIELD_MAP_FILE`
/// (a JSON file shaped `{env_name: {entity: {key: {id, name}}}}`) for any
/// entity not covered inline.
fn load_field_maps() -> SyncResult<HashMap<EntityKind, EntityFieldMap>> {
    let mut maps = HashMap::new();

    for entity in EntityKind::ALL {
        let upper = entity.table_name().to_uppercase();
        if let Some(inline) = env_var(&format!("AIRTABLE_FIELD_MAP_{upper}")) {
            maps.insert(entity, parse_inline_field_map(&inline));
        }
    }

    if let Some(path) = env_var("AIRTABLE_FIELD_MAP_FILE") {
        let contents = fs::read_to_string(&path)
            .map_err(|e| SyncError::Config(format!("reading {path}: {e}")))?;
        let file: FieldMapFile = serde_json::from_str(&contents)
            .map_err(|e| SyncError::Config(format!("parsing {path}: {e}")))?;
        let env_name = env::var("ENV").unwrap_or_else(|_| "dev".to_string());
        if let Some(per_entity) = file.0.get(&env_name) {
            for entity in EntityKind::ALL {
                if maps.contains_key(&entity) {
                    continue;
                }
                if let Some(fields) = per_entity.get(entity.table_name()) {
                    maps.insert(entity, fields.clone());
                }
            }
        }
    }

    Ok(maps)
}

#[derive(Debug, Deserialize)]
struct FieldMapFile(HashMap<String, HashMap<String, EntityFieldMap>>);

fn parse_inline_field_map(raw: &str) -> EntityFieldMap {
    let mut map = EntityFieldMap::new();
    for pair in raw.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let Some((key, rest)) = pair.split_once('=') else { continue };
        let mut parts = rest.splitn(2, '|');
        let id = parts.next().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
        let name = parts.next().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
        map.insert(key.trim().to_string(), FieldMapEntry { id, name });
    }
    map
}

/// The floor is enforced unconditionally (§6.3): a misconfigured tiny
/// tolerance would make the resolver treat nearly every record as changed.
fn load_tolerances() -> Tolerances {
    let relational_ms = env_var("SYNC_RELATIONAL_TOLERANCE_MS")
        .and_then(|v| v.parse().ok())
        .unwrap_or(RELATIONAL_TOLERANCE_DEFAULT_MS)
        .max(RELATIONAL_TOLERANCE_FLOOR_MS);
    let sheet_ms = env_var("SYNC_SHEET_TOLERANCE_MS")
        .and_then(|v| v.parse().ok())
        .unwrap_or(SHEET_TOLERANCE_DEFAULT_MS)
        .max(SHEET_TOLERANCE_FLOOR_MS);

    Tolerances { relational_ms, sheet_ms }
}

#[derive(Debug, Deserialize, Default)]
struct SyncRulesFile {
    #[serde(default, rename = "preventBlankOverwrite")]
    prevent_blank_overwrite: bool,
    #[serde(default, rename = "allowBlankOverwrite")]
    allow_blank_overwrite: AllowBlankOverwriteFile,
}

#[derive(Debug, Deserialize, Default)]
struct AllowBlankOverwriteFile {
    #[serde(default, rename = "airtableToSupabase")]
    airtable_to_supabase: HashMap<String, Vec<String>>,
    #[serde(default, rename = "supabaseToAirtable")]
    supabase_to_airtable: HashMap<String, Vec<String>>,
}

fn load_sync_rules() -> SyncResult<BlankOverwriteRules> {
    let Some(path) = env_var("SYNC_RULES_FILE").or_else(|| {
        fs::metadata("sync-rules.json").ok().map(|_| "sync-rules.json".to_string())
    }) else {
        return Ok(BlankOverwriteRules::default());
    };

    let contents = match fs::read_to_string(&path) {
        Ok(c) => c,
        Err(_) => return Ok(BlankOverwriteRules::default()),
    };
    let file: SyncRulesFile =
        serde_json::from_str(&contents).map_err(|e| SyncError::Config(format!("parsing {path}: {e}")))?;

    let mut allow = HashMap::new();
    for (entity_name, fields) in file.allow_blank_overwrite.airtable_to_supabase {
        if let Some(kind) = EntityKind::parse_cli_name(&entity_name) {
            allow.insert((Direction::SheetToRelational, kind), fields);
        }
    }
    for (entity_name, fields) in file.allow_blank_overwrite.supabase_to_airtable {
        if let Some(kind) = EntityKind::parse_cli_name(&entity_name) {
            allow.insert((Direction::RelationalToSheet, kind), fields);
        }
    }

    Ok(BlankOverwriteRules { prevent_blank_overwrite: file.prevent_blank_overwrite, allow })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_field_map_parses_id_and_name() {
        let map = parse_inline_field_map("make=fldAAA|Make, model=fldBBB");
        assert_eq!(map.get("make").unwrap().id.as_deref(), Some("fldAAA"));
        assert_eq!(map.get("make").unwrap().name.as_deref(), Some("Make"));
        assert_eq!(map.get("model").unwrap().id.as_deref(), Some("fldBBB"));
        assert_eq!(map.get("model").unwrap().name, None);
    }

    #[test]
    fn inline_field_map_skips_blank_pairs() {
        let map = parse_inline_field_map("make=fldAAA,,  ");
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn sync_rules_file_parses_allowlists() {
        let raw = r#"{
            "preventBlankOverwrite": true,
            "allowBlankOverwrite": {
                "supabaseToAirtable": { "cars": ["special_instructions"] }
            }
        }"#;
        let file: SyncRulesFile = serde_json::from_str(raw).unwrap();
        assert!(file.prevent_blank_overwrite);
        assert_eq!(
            file.allow_blank_overwrite.supabase_to_airtable.get("cars").unwrap(),
            &vec!["special_instructions".to_string()]
        );
    }
}
