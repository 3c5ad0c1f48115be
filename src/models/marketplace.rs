use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{null_default, Reference, Timestamped};

pub const NO_CATEGORY: &str = "Sin categoría";
pub const NO_RESIDENTIAL: &str = "Sin residencial";

/// Organic marketplace listing (`anuncios`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    #[serde(rename = "$id")]
    pub id: String,
    #[serde(default, deserialize_with = "null_default")]
    pub activo: bool,
    #[serde(default, deserialize_with = "null_default")]
    pub categorias: Vec<Reference>,
    /// Legacy single-category attribute.
    #[serde(default)]
    pub categoria: Option<Reference>,
    #[serde(default)]
    pub residencial_id: Option<Reference>,
    #[serde(default)]
    pub anunciante_id: Option<Reference>,
    #[serde(default)]
    pub dias_vigencia: Option<f64>,
    #[serde(rename = "$createdAt", default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(rename = "$updatedAt", default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Listing {
    /// First entry of `categorias`, else the legacy `categoria`.
    pub fn primary_category(&self) -> Option<&Reference> {
        self.categorias.first().or(self.categoria.as_ref())
    }

    pub fn residential_key(&self) -> &str {
        self.residencial_id
            .as_ref()
            .map(Reference::id)
            .unwrap_or(NO_RESIDENTIAL)
    }

    pub fn advertiser(&self) -> Option<&str> {
        self.anunciante_id.as_ref().map(Reference::id)
    }

    /// Listings expire `dias_vigencia` days after their last update.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let days = self.dias_vigencia.filter(|d| *d > 0.0)?;
        let updated = self.updated_at?;
        let millis = (days * 86_400_000.0) as i64;
        Some(updated + chrono::Duration::milliseconds(millis))
    }
}

impl Timestamped for Listing {
    fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    #[serde(rename = "$id")]
    pub id: String,
    #[serde(default, deserialize_with = "null_default")]
    pub total: f64,
    #[serde(default)]
    pub estado: Option<String>,
    #[serde(default)]
    pub residencial_id: Option<Reference>,
    #[serde(rename = "$createdAt", default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn status(&self) -> &str {
        self.estado
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or("pendiente")
    }
}

impl Timestamped for Order {
    fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    #[serde(rename = "$id")]
    pub id: String,
    #[serde(default, deserialize_with = "null_default")]
    pub puntuacion: f64,
    #[serde(rename = "$createdAt", default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Timestamped for Review {
    fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Residential {
    #[serde(rename = "$id")]
    pub id: String,
    #[serde(default)]
    pub nombre: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    #[serde(rename = "$id")]
    pub id: String,
    #[serde(default)]
    pub nombre: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_listing_falls_back_to_legacy_category() {
        let l: Listing = serde_json::from_value(json!({
            "$id": "l1",
            "categorias": null,
            "categoria": { "$id": "c9", "nombre": "Servicios" },
            "residencial_id": "r1",
        }))
        .unwrap();
        assert_eq!(l.primary_category().unwrap().id(), "c9");
        assert_eq!(l.residential_key(), "r1");
        assert!(l.advertiser().is_none());
    }

    #[test]
    fn test_listing_expiry_from_last_update() {
        let l: Listing = serde_json::from_value(json!({
            "$id": "l1",
            "dias_vigencia": 3,
            "$updatedAt": "2026-01-01T00:00:00.000Z",
        }))
        .unwrap();
        assert_eq!(
            l.expires_at().unwrap().to_rfc3339(),
            "2026-01-04T00:00:00+00:00"
        );
    }

    #[test]
    fn test_order_status_defaults_to_pending() {
        let o: Order = serde_json::from_value(json!({ "$id": "o1", "total": null })).unwrap();
        assert_eq!(o.status(), "pendiente");
        assert_eq!(o.total, 0.0);
    }
}
