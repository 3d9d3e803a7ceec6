//! Substance records: the sectioned wire shape, the flat display projection,
//! and the write payload.
//!
//! A record is a small identity block (`primary_name_ru`, `cas_number`,
//! `status`, `updated_at`) plus named sections, each a mapping of field name
//! to scalar. Sections stay opaque key/value groups here; [`SectionId`] only
//! declares which section owns which field.
//!
//! # Two projections
//!
//! - [`flatten`] merges every section into one field map for table display.
//!   When two sections carry the same field name the later section (in wire
//!   order) wins, and the overwrite is recorded in [`FlatRecord::collisions`].
//! - [`submission_payload`] serializes the full sectioned record for
//!   create/update. A [`FlatRecord`] cannot be turned into a payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::models::ElementStatus;

/// A substance passport as exchanged with `/registry/elements/`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SubstanceRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default)]
    pub primary_name_ru: String,
    #[serde(default)]
    pub cas_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ElementStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Sections and any other top-level fields, in wire order.
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl SubstanceRecord {
    /// Sections (top-level mappings) in wire order.
    pub fn sections(&self) -> impl Iterator<Item = (&str, &Map<String, Value>)> {
        self.rest
            .iter()
            .filter_map(|(k, v)| v.as_object().map(|m| (k.as_str(), m)))
    }

    pub fn section(&self, name: &str) -> Option<&Map<String, Value>> {
        self.rest.get(name).and_then(Value::as_object)
    }
}

// ============ Section ownership ============

macro_rules! sections {
    ($( $variant:ident => $key:literal [ $($field:literal),* $(,)? ] ),* $(,)?) => {
        /// Passport sections, in passport chapter order.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum SectionId {
            $( $variant, )*
        }

        impl SectionId {
            pub const ALL: &'static [SectionId] = &[ $( SectionId::$variant, )* ];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $( SectionId::$variant => $key, )*
                }
            }

            /// Fields this section owns.
            pub fn fields(&self) -> &'static [&'static str] {
                match self {
                    $( SectionId::$variant => &[ $($field),* ], )*
                }
            }
        }
    };
}

sections! {
    Identification => "sec1_identification" [
        "synonyms", "molecular_formula", "structural_formula", "ec_number",
        "iupac_name_ru", "iupac_name_en", "tnved_code",
    ],
    Physical => "sec2_physical" [
        "appearance", "odor", "color", "ph", "mol_mass", "melting_point",
        "boiling_point", "auto_ignition", "density", "solubility_water",
    ],
    Sanpin => "sec3_sanpin" [
        "state_in_air", "pdk_workzone", "ld50_stomach", "ld50_skin", "lc50_air",
        "kvio", "zone_acute", "zone_chronic",
    ],
    Air => "sec4_air" [
        "limit_sign", "pdk_max_single", "pdk_daily_avg", "pdk_month_avg", "pdk_year_avg",
    ],
    AcuteToxicity => "sec5_acute" [
        "inhalation_lc50_effect", "inhalation_lc50_val", "dermal_ld50_effect",
        "dermal_ld50_val", "oral_ld50_effect", "oral_ld50_val",
    ],
    Risks => "sec6_risks" [
        "skin_corr", "eye_dmg", "sensitization", "mutagenicity", "carcinogenicity",
        "repro_tox", "aspiration_hazard",
    ],
    Ecotoxicity => "sec8_ecotox" [
        "ld50_mammals", "ld50_fish", "ld50_bees", "ld50_birds", "bioaccumulation",
        "phytotoxicity",
    ],
    Soil => "sec9_soil" [
        "pdk_soil", "odk_soil", "persistence", "sorption", "migration",
    ],
    Water => "sec10_water" [
        "acute_fish", "acute_algae", "chronic_fish", "bioacc_logkow",
    ],
    Classification => "sec11_class" [
        "sanpin_class", "gost_body_class", "gost_env_class",
    ],
    Ghs => "sec12_ghs" [
        "phys_hazard", "chem_hazard", "env_hazard",
    ],
    Labelling => "sec13_label" [
        "signal_word", "pictogram_code", "h_phrases", "p_phrases",
    ],
    Safety => "sec14_safety" [
        "prevent_health", "first_aid", "prevent_env",
    ],
    Storage => "sec15_storage" [
        "temp_conditions", "humidity", "shelf_life", "storage_reqs", "incompatible",
    ],
    Waste => "sec16_waste" [
        "collection", "transport", "disposal", "burial",
    ],
    Incidents => "sec17_incidents" [
        "accident_history",
    ],
    International => "sec18_intl" [
        "ozone_destroying", "pops", "pic", "mercury", "basel",
    ],
    Documents => "sec20_docs" [
        "gost_standards", "intl_docs",
    ],
    Companies => "sec21_companies" [
        "info",
    ],
    Volumes => "sec22_volumes" [
        "vol_production", "vol_import", "vol_export",
    ],
    Extra => "sec23_extra" [
        "recommendations",
    ],
}

impl SectionId {
    pub fn from_key(key: &str) -> Option<SectionId> {
        SectionId::ALL.iter().copied().find(|s| s.as_str() == key)
    }
}

/// The section that declares `field`, if any.
pub fn owning_section(field: &str) -> Option<SectionId> {
    SectionId::ALL
        .iter()
        .copied()
        .find(|s| s.fields().contains(&field))
}

// ============ Flat projection ============

/// One field overwritten during [`flatten`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldCollision {
    pub field: String,
    /// Where the discarded value came from (`None` = top level).
    pub shadowed: Option<String>,
    /// Section whose value was kept.
    pub winner: String,
}

/// Display-only view of a record: one value per field name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatRecord {
    pub values: Map<String, Value>,
    pub collisions: Vec<FieldCollision>,
}

impl FlatRecord {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// Display string for a column, `—` when missing.
    pub fn display(&self, field: &str) -> String {
        self.values
            .get(field)
            .map(format_value)
            .unwrap_or_else(|| EMPTY_MARK.to_string())
    }
}

/// Merge every section of `record` into one field map.
pub fn flatten(record: &SubstanceRecord) -> FlatRecord {
    let mut flat = FlatRecord::default();
    let mut origin: HashMap<&str, &str> = HashMap::new();

    if let Some(id) = record.id {
        flat.values.insert("id".into(), Value::from(id));
    }
    flat.values.insert(
        "primary_name_ru".into(),
        Value::String(record.primary_name_ru.clone()),
    );
    flat.values.insert(
        "cas_number".into(),
        record
            .cas_number
            .clone()
            .map(Value::String)
            .unwrap_or(Value::Null),
    );
    if let Some(status) = record.status {
        flat.values.insert(
            "status".into(),
            serde_json::to_value(status).unwrap_or(Value::Null),
        );
    }
    if let Some(updated) = record.updated_at {
        flat.values
            .insert("updated_at".into(), Value::String(updated.to_rfc3339()));
    }

    for (key, value) in &record.rest {
        if !value.is_object() {
            flat.values.insert(key.clone(), value.clone());
        }
    }

    for (section, fields) in record.sections() {
        for (field, value) in fields {
            if flat.values.contains_key(field) {
                flat.collisions.push(FieldCollision {
                    field: field.clone(),
                    shadowed: origin.get(field.as_str()).map(|s| s.to_string()),
                    winner: section.to_string(),
                });
            }
            flat.values.insert(field.clone(), value.clone());
            origin.insert(field.as_str(), section);
        }
    }

    flat
}

// ============ Write payload ============

/// Body for create/update: the full sectioned record with `cas_number`
/// normalized. An empty or whitespace CAS number becomes `null` because the
/// server enforces uniqueness only on non-null values.
pub fn submission_payload(record: &SubstanceRecord) -> Value {
    let mut payload = record.clone();
    payload.cas_number = normalize_identifier(payload.cas_number.as_deref());
    // id and updated_at are owned by the server.
    payload.id = None;
    payload.updated_at = None;
    serde_json::to_value(&payload).unwrap_or(Value::Null)
}

fn normalize_identifier(raw: Option<&str>) -> Option<String> {
    match raw.map(str::trim) {
        Some(s) if !s.is_empty() => Some(s.to_string()),
        _ => None,
    }
}

// ============ Display ============

pub const EMPTY_MARK: &str = "—";

/// Render a field value for display.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Null => EMPTY_MARK.to_string(),
        Value::String(s) if s.trim().is_empty() => EMPTY_MARK.to_string(),
        Value::String(s) => display_code(s)
            .map(str::to_string)
            .unwrap_or_else(|| s.clone()),
        Value::Bool(true) => "yes".to_string(),
        Value::Bool(false) => "no".to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items
            .iter()
            .map(format_value)
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(_) => value.to_string(),
    }
}

fn display_code(code: &str) -> Option<&'static str> {
    Some(match code {
        "SOLID" => "Solid",
        "LIQUID" => "Liquid",
        "GAS" => "Gas",
        "VAPOR" => "Vapor",
        "AEROSOL" => "Aerosol",
        "NONE" => "None",
        "SHARP" => "Sharp",
        "SPECIFIC" => "Specific",
        "FRUIT" => "Fruity",
        "OTHER" => "Other",
        "NC" => "Not classified",
        "UNKNOWN" => "Unknown",
        _ => return None,
    })
}
