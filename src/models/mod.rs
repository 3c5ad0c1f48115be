//! Typed records decoded from store documents.
//!
//! Documents are untyped JSON; everything that does arithmetic works on the
//! records in this module instead. Unset attributes come back as `null` from
//! the store, so numeric and list fields go through [`null_default`].

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};

use crate::store::Document;

pub mod analytics;
pub mod cost;
pub mod daily_stat;
pub mod log_event;
pub mod marketplace;
pub mod paid_ad;

/// Collection identifiers in the marketplace database.
pub mod collections {
    pub const PAID_ADS: &str = "anuncios_pago";
    pub const PAID_AD_STATS: &str = "anuncios_pago_stats";
    pub const LOGS: &str = "logs";
    pub const COST_PER_VIEW: &str = "costo_por_vista";
    pub const COST_PER_CLICK: &str = "costo_por_click";
    pub const LISTINGS: &str = "anuncios";
    pub const ORDERS: &str = "pedidos";
    pub const REVIEWS: &str = "reviews";
    pub const RESIDENTIALS: &str = "residenciales";
    pub const CATEGORIES: &str = "categorias";
}

/// Deserialize `null` (or a missing attribute, with `#[serde(default)]`) as `T::default()`.
pub(crate) fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A relationship attribute: either a bare document id or the expanded document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reference {
    Id(String),
    Expanded {
        #[serde(rename = "$id")]
        id: String,
        #[serde(default)]
        nombre: Option<String>,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        slug: Option<String>,
    },
}

impl Reference {
    pub fn id(&self) -> &str {
        match self {
            Reference::Id(id) => id,
            Reference::Expanded { id, .. } => id,
        }
    }

    /// Display name carried by an expanded document, if any.
    pub fn display_name(&self) -> Option<&str> {
        match self {
            Reference::Id(_) => None,
            Reference::Expanded { nombre, name, .. } => nombre.as_deref().or(name.as_deref()),
        }
    }

    /// True when the reference names `key` by id or by slug.
    pub fn matches(&self, key: &str) -> bool {
        match self {
            Reference::Id(id) => id == key,
            Reference::Expanded { id, slug, .. } => id == key || slug.as_deref() == Some(key),
        }
    }
}

/// Store timestamp format: RFC 3339, millisecond precision, `Z` suffix.
pub fn iso(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a request/date attribute: full RFC 3339, or a bare `YYYY-MM-DD`
/// (taken as UTC midnight).
pub fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Records that belong to a period by their own timestamp.
pub trait Timestamped {
    fn timestamp(&self) -> Option<DateTime<Utc>>;
}

/// Decode a single document into a typed record.
pub fn decode<T: DeserializeOwned>(doc: Document) -> Result<T, serde_json::Error> {
    serde_json::from_value(serde_json::Value::Object(doc))
}

/// Decode a batch, skipping (and logging) documents that do not fit the schema.
pub fn decode_all<T: DeserializeOwned>(collection: &str, docs: Vec<Document>) -> Vec<T> {
    docs.into_iter()
        .filter_map(|doc| {
            let id = doc
                .get("$id")
                .and_then(|v| v.as_str())
                .unwrap_or("?")
                .to_string();
            match decode::<T>(doc) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!(collection, id = %id, error = %e, "skipping malformed document");
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reference_accepts_id_or_document() {
        let id: Reference = serde_json::from_value(json!("cat1")).unwrap();
        assert_eq!(id.id(), "cat1");
        assert!(id.display_name().is_none());

        let doc: Reference =
            serde_json::from_value(json!({ "$id": "cat2", "nombre": "Comida", "slug": "comida" }))
                .unwrap();
        assert_eq!(doc.id(), "cat2");
        assert_eq!(doc.display_name(), Some("Comida"));
        assert!(doc.matches("comida"));
        assert!(doc.matches("cat2"));
        assert!(!doc.matches("otra"));
    }

    #[test]
    fn test_parse_instant_accepts_dates_and_timestamps() {
        let day = parse_instant("2026-03-01").unwrap();
        assert_eq!(iso(day), "2026-03-01T00:00:00.000Z");
        let ts = parse_instant("2026-03-01T12:30:00-06:00").unwrap();
        assert_eq!(iso(ts), "2026-03-01T18:30:00.000Z");
        assert!(parse_instant("yesterday").is_none());
    }

    #[test]
    fn test_decode_all_skips_malformed() {
        #[derive(Deserialize)]
        struct Row {
            #[allow(dead_code)]
            n: u32,
        }
        let docs = vec![
            json!({ "$id": "a", "n": 1 }),
            json!({ "$id": "b", "n": "nope" }),
        ]
        .into_iter()
        .map(|v| match v {
            serde_json::Value::Object(m) => m,
            _ => unreachable!(),
        })
        .collect();
        let rows: Vec<Row> = decode_all("c", docs);
        assert_eq!(rows.len(), 1);
    }
}
