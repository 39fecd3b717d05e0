//! Entity structs and the per-entity field tables (§3, §4.1 contract inputs).
//!
//! A record on either side is represented uniformly as a flat key→value map
//! (`Record`), mirroring the shape the sheet adapter already returns:
//! `{airtable_id, last_modified, raw_fields, <field-key>: value, …}` (§4.5).
//! The relational side populates the same shape minus the sheet-only
//! bookkeeping keys (`last_modified`, `raw_fields`, `raw_fields_by_id`).

use serde_json::{Map, Value};
use std::fmt;

/// One of the seven syncable kinds. `load_cars` is a join table, not a
/// syncable entity, so it is not a variant here (see `LoadCarRow` below).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Location,
    Company,
    User,
    Car,
    Load,
    Booking,
    Request,
}

impl EntityKind {
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Location,
        EntityKind::Company,
        EntityKind::User,
        EntityKind::Car,
        EntityKind::Load,
        EntityKind::Booking,
        EntityKind::Request,
    ];

    /// The table/collection name on both sides.
    pub fn table_name(self) -> &'static str {
        match self {
            EntityKind::Location => "locations",
            EntityKind::Company => "companies",
            EntityKind::User => "users",
            EntityKind::Car => "cars",
            EntityKind::Load => "loads",
            EntityKind::Booking => "bookings",
            EntityKind::Request => "requests",
        }
    }

    /// Parses a CLI entity argument (§6.1); accepts the plural table name.
    pub fn parse_cli_name(name: &str) -> Option<EntityKind> {
        EntityKind::ALL.into_iter().find(|k| k.table_name() == name)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

/// Sync direction (§6.4's `direction` column spelling is kept verbatim for
/// persistence; `Display` below matches it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    SheetToRelational,
    RelationalToSheet,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Direction::SheetToRelational => "airtable_to_supabase",
            Direction::RelationalToSheet => "supabase_to_airtable",
        };
        f.write_str(s)
    }
}

/// A secondary-key fallback strategy used when cross-ref lookup misses
/// (§4.6.a).
#[derive(Debug, Clone, Copy)]
pub enum SecondaryKey {
    ExternalId,
    AirtableId,
    TrimmedLowerName,
    TrimmedLoadNumber,
    LowerEmail,
}

/// A link field: its key on both sides and the entity kind it points at.
#[derive(Debug, Clone, Copy)]
pub struct LinkField {
    pub key: &'static str,
    pub target: EntityKind,
}

/// The declarative per-entity mapping table the `FieldMapper` is driven by
/// (§4.1 contract). One static instance per `EntityKind`.
#[derive(Debug, Clone, Copy)]
pub struct EntitySpec {
    pub kind: EntityKind,
    /// Plain value fields (excludes link fields and metadata keys).
    pub fields: &'static [&'static str],
    pub numeric: &'static [&'static str],
    pub required: &'static [&'static str],
    pub date_only: &'static [&'static str],
    pub links: &'static [LinkField],
    pub secondary_key: SecondaryKey,
}

pub const LOCATION: EntitySpec = EntitySpec {
    kind: EntityKind::Location,
    fields: &[
        "address_line1",
        "address_line2",
        "city",
        "state_region",
        "postal_code",
        "country_code",
        "latitude",
        "longitude",
        "created_at",
    ],
    numeric: &["latitude", "longitude"],
    required: &["address_line1", "city", "country_code"],
    date_only: &["created_at"],
    links: &[],
    secondary_key: SecondaryKey::AirtableId,
};

pub const COMPANY: EntitySpec = EntitySpec {
    kind: EntityKind::Company,
    fields: &["name", "website", "phone", "notes"],
    numeric: &[],
    required: &["name"],
    date_only: &[],
    links: &[],
    secondary_key: SecondaryKey::TrimmedLowerName,
};

pub const USER: EntitySpec = EntitySpec {
    kind: EntityKind::User,
    fields: &["email", "full_name", "created_at"],
    numeric: &[],
    required: &["email"],
    date_only: &["created_at"],
    links: &[LinkField { key: "company_id", target: EntityKind::Company }],
    secondary_key: SecondaryKey::LowerEmail,
};

pub const CAR: EntitySpec = EntitySpec {
    kind: EntityKind::Car,
    fields: &[
        "make",
        "model",
        "external_id",
        "vin",
        "special_instructions",
        "carrier_rate",
        "customer_rate",
        "distance",
        "pickup_date",
        "pickup_appointment_date",
        "delivery_date",
        "delivery_appointment_date",
        "available_date",
    ],
    numeric: &["carrier_rate", "customer_rate", "distance"],
    required: &["make", "model"],
    date_only: &[
        "pickup_date",
        "pickup_appointment_date",
        "delivery_date",
        "delivery_appointment_date",
        "available_date",
    ],
    links: &[
        LinkField { key: "pickup_location_id", target: EntityKind::Location },
        LinkField { key: "dropoff_location_id", target: EntityKind::Location },
    ],
    secondary_key: SecondaryKey::ExternalId,
};

pub const LOAD: EntitySpec = EntitySpec {
    kind: EntityKind::Load,
    fields: &["load_number", "total_distance_km", "estimated_duration_hours", "transport_rate", "created_at"],
    numeric: &["total_distance_km", "estimated_duration_hours", "transport_rate"],
    required: &["load_number"],
    date_only: &["created_at"],
    links: &[
        LinkField { key: "company_id", target: EntityKind::Company },
        LinkField { key: "origin_location_id", target: EntityKind::Location },
        LinkField { key: "destination_location_id", target: EntityKind::Location },
    ],
    secondary_key: SecondaryKey::TrimmedLoadNumber,
};

pub const BOOKING: EntitySpec = EntitySpec {
    kind: EntityKind::Booking,
    fields: &["status", "quoted_price", "final_price", "margin_percentage", "quoted_at"],
    numeric: &["quoted_price", "final_price", "margin_percentage"],
    required: &[],
    date_only: &["quoted_at"],
    links: &[
        LinkField { key: "load_id", target: EntityKind::Load },
        LinkField { key: "company_id", target: EntityKind::Company },
    ],
    secondary_key: SecondaryKey::AirtableId,
};

pub const REQUEST: EntitySpec = EntitySpec {
    kind: EntityKind::Request,
    fields: &["requested_service", "status", "notes"],
    numeric: &[],
    required: &[],
    date_only: &[],
    links: &[LinkField { key: "company_id", target: EntityKind::Company }],
    secondary_key: SecondaryKey::AirtableId,
};

impl EntityKind {
    pub fn spec(self) -> &'static EntitySpec {
        match self {
            EntityKind::Location => &LOCATION,
            EntityKind::Company => &COMPANY,
            EntityKind::User => &USER,
            EntityKind::Car => &CAR,
            EntityKind::Load => &LOAD,
            EntityKind::Booking => &BOOKING,
            EntityKind::Request => &REQUEST,
        }
    }
}

/// Keys that are bookkeeping, not domain fields, and therefore must never be
/// sent in a write payload to the sheet side (§4.5 "reserved keys").
pub const RESERVED_SHEET_KEYS: [&str; 4] =
    ["airtable_id", "last_modified", "raw_fields", "raw_fields_by_id"];

/// Metadata keys common to every entity (§3), kept out of `EntitySpec::fields`
/// because the mapper/preparer treat them specially rather than iterating
/// them generically.
pub const ID: &str = "id";
pub const AIRTABLE_ID: &str = "airtable_id";
pub const AIRTABLE_ID_NAME_LABEL: &str = "airtable_id_name_label";
pub const LAST_CHANGED_FOR_SYNC: &str = "last_changed_for_sync";
pub const LAST_SYNCED: &str = "last_synced";
pub const SUPABASE_ID: &str = "supabase_id";
pub const RAW_FIELDS: &str = "raw_fields";
pub const RAW_FIELDS_BY_ID: &str = "raw_fields_by_id";

/// A flat, loosely-typed record as fetched from either side.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self { fields: Map::new() }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.fields.insert(key.to_string(), value);
    }

    pub fn relational_id(&self) -> Option<&str> {
        self.get_str(ID)
    }

    pub fn airtable_id(&self) -> Option<&str> {
        self.get_str(AIRTABLE_ID)
    }

    pub fn last_changed_for_sync(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.get(LAST_CHANGED_FOR_SYNC).and_then(crate::util::parse_timestamp)
    }

    pub fn last_synced(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.get(LAST_SYNCED).and_then(crate::util::parse_timestamp)
    }
}

/// A row of the `load_cars` join table (§3, §4.4).
#[derive(Debug, Clone)]
pub struct LoadCarRow {
    pub load_id: String,
    pub car_id: String,
    /// Present when the sheet side embeds the linked car's record id
    /// directly, avoiding a cross-ref lookup (§4.4).
    pub car_airtable_id: Option<String>,
    pub is_assigned: Value,
    pub last_changed_for_sync: Option<chrono::DateTime<chrono::Utc>>,
}

impl LoadCarRow {
    /// §4.4: boolean true, non-zero number, or case-insensitive
    /// {"yes","y","true","1"}.
    pub fn is_assigned(&self) -> bool {
        match &self.is_assigned {
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
            Value::String(s) => {
                matches!(s.trim().to_lowercase().as_str(), "yes" | "y" | "true" | "1")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_cli_names() {
        assert_eq!(EntityKind::parse_cli_name("cars"), Some(EntityKind::Car));
        assert_eq!(EntityKind::parse_cli_name("bogus"), None);
    }

    #[test]
    fn direction_display_matches_persisted_spelling() {
        assert_eq!(Direction::SheetToRelational.to_string(), "airtable_to_supabase");
        assert_eq!(Direction::RelationalToSheet.to_string(), "supabase_to_airtable");
    }

    #[test]
    fn load_car_is_assigned_truthy_variants() {
        let mut row = LoadCarRow {
            load_id: "l1".into(),
            car_id: "c1".into(),
            car_airtable_id: None,
            is_assigned: json!("Yes"),
            last_changed_for_sync: None,
        };
        assert!(row.is_assigned());
        row.is_assigned = json!(0);
        assert!(!row.is_assigned());
        row.is_assigned = json!(1);
        assert!(row.is_assigned());
        row.is_assigned = json!("false");
        assert!(!row.is_assigned());
    }

    #[test]
    fn car_spec_has_five_date_only_fields() {
        assert_eq!(CAR.date_only.len(), 5);
        assert_eq!(CAR.required, &["make", "model"]);
    }
}
