use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{iso, null_default, parse_instant, Reference, Timestamped};

/// A sponsored listing with a credit budget.
///
/// Only the attributes the engine reasons about are typed; everything else in
/// the document rides along in `extra` so listings can be served verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaidAd {
    #[serde(rename = "$id")]
    pub id: String,

    /// Remaining credit balance.
    #[serde(default, deserialize_with = "null_default")]
    pub creditos: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fecha_inicio: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fecha_fin: Option<DateTime<Utc>>,

    #[serde(default, deserialize_with = "null_default")]
    pub active: bool,

    #[serde(default, deserialize_with = "null_default")]
    pub vistas: u64,

    #[serde(default, deserialize_with = "null_default")]
    pub clicks: u64,

    /// Placement: `banner`, `embedded` or `cross`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, deserialize_with = "null_default")]
    pub categories: Vec<Reference>,

    /// Older documents carry the Spanish attribute name.
    #[serde(default, deserialize_with = "null_default", skip_serializing_if = "Vec::is_empty")]
    pub categorias: Vec<Reference>,

    #[serde(default, deserialize_with = "null_default")]
    pub residenciales: Vec<Reference>,

    #[serde(rename = "$createdAt", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PaidAd {
    fn category_targets(&self) -> &[Reference] {
        if self.categorias.is_empty() {
            &self.categories
        } else {
            &self.categorias
        }
    }

    /// Ads without category targets are shown in every category.
    pub fn targets_category(&self, category: &str) -> bool {
        let targets = self.category_targets();
        targets.is_empty() || targets.iter().any(|c| c.matches(category))
    }

    /// Ads without residential targets are shown in every residential.
    pub fn targets_residential(&self, residential_id: &str) -> bool {
        self.residenciales.is_empty() || self.residenciales.iter().any(|r| r.id() == residential_id)
    }

    /// Whether `now` falls inside the campaign window.
    pub fn is_running(&self, now: DateTime<Utc>) -> bool {
        let started = self.fecha_inicio.map_or(true, |start| start <= now);
        let not_ended = self.fecha_fin.map_or(true, |end| end >= now);
        started && not_ended
    }
}

impl Timestamped for PaidAd {
    fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }
}

/// Body of `POST /api/paid-ads/create`. Field names follow the admin console.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaidAdRequest {
    pub titulo: Option<String>,
    pub descripcion: Option<String>,
    pub link: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub imagen: Option<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub creditos: Option<f64>,
    pub fecha_inicio: Option<String>,
    pub fecha_fin: Option<String>,
    #[serde(default)]
    pub categorias: Vec<String>,
    #[serde(default)]
    pub residenciales: Vec<String>,
}

impl CreatePaidAdRequest {
    /// Validate and map to the stored document shape.
    pub fn into_document(self) -> Result<Value, String> {
        let titulo = self
            .titulo
            .filter(|t| !t.trim().is_empty())
            .ok_or("missing required fields (titulo, fechaInicio, fechaFin)")?;
        let raw_start = self
            .fecha_inicio
            .ok_or("missing required fields (titulo, fechaInicio, fechaFin)")?;
        let raw_end = self
            .fecha_fin
            .ok_or("missing required fields (titulo, fechaInicio, fechaFin)")?;

        let start = parse_instant(&raw_start).ok_or_else(|| format!("invalid fechaInicio: {}", raw_start))?;
        let end = parse_instant(&raw_end).ok_or_else(|| format!("invalid fechaFin: {}", raw_end))?;
        if end < start {
            return Err("fechaFin must not be before fechaInicio".into());
        }

        let creditos = self.creditos.unwrap_or(0.0);
        if !creditos.is_finite() || creditos < 0.0 {
            return Err("creditos must be a non-negative number".into());
        }

        Ok(serde_json::json!({
            "titulo": titulo,
            "descripcion": self.descripcion,
            "link": self.link,
            "type": self.kind,
            "image_url": self.imagen,
            "active": self.active && creditos > 0.0,
            "creditos": creditos,
            "fecha_inicio": iso(start),
            "fecha_fin": iso(end),
            "categories": self.categorias,
            "residenciales": self.residenciales,
            "vistas": 0,
            "clicks": 0,
        }))
    }
}

/// Normalise an admin PATCH body: map console keys to stored attributes, drop
/// system attributes, and keep the balance invariant (`creditos >= 0`, zero
/// balance means inactive).
pub fn sanitize_patch(mut body: Map<String, Value>) -> Result<Map<String, Value>, String> {
    for (from, to) in [("fechaInicio", "fecha_inicio"), ("fechaFin", "fecha_fin")] {
        if let Some(raw) = body.remove(from) {
            let raw = raw.as_str().ok_or_else(|| format!("{} must be a date string", from))?.to_string();
            let dt = parse_instant(&raw).ok_or_else(|| format!("invalid {}: {}", from, raw))?;
            body.insert(to.to_string(), Value::String(iso(dt)));
        }
    }
    if let Some(img) = body.remove("imagen") {
        body.insert("image_url".to_string(), img);
    }

    body.retain(|k, _| !k.starts_with('$'));
    body.remove("dailyImpact");

    if let Some(credits) = body.get("creditos") {
        let credits = credits
            .as_f64()
            .filter(|c| c.is_finite())
            .ok_or("creditos must be a number")?;
        if credits < 0.0 {
            return Err("creditos must be a non-negative number".into());
        }
        if credits == 0.0 {
            body.insert("active".to_string(), Value::Bool(false));
        }
    }

    Ok(body)
}

/// A sanitized patch that switches the ad on without funding it. The stored
/// balance decides whether that is allowed.
pub fn activates_without_credits(patch: &Map<String, Value>) -> bool {
    patch.get("active") == Some(&Value::Bool(true)) && !patch.contains_key("creditos")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ad(v: Value) -> PaidAd {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_decodes_nulls_and_keeps_extra_attributes() {
        let a = ad(json!({
            "$id": "ad1",
            "creditos": null,
            "vistas": null,
            "residenciales": null,
            "titulo": "Pizza 2x1",
            "fecha_inicio": "2026-01-01T00:00:00.000+00:00",
        }));
        assert_eq!(a.creditos, 0.0);
        assert_eq!(a.vistas, 0);
        assert!(a.residenciales.is_empty());

        let back = serde_json::to_value(&a).unwrap();
        assert_eq!(back["titulo"], "Pizza 2x1");
        assert_eq!(back["$id"], "ad1");
    }

    #[test]
    fn test_residential_targeting() {
        let targeted = ad(json!({ "$id": "a", "residenciales": ["A", { "$id": "C" }] }));
        assert!(targeted.targets_residential("A"));
        assert!(targeted.targets_residential("C"));
        assert!(!targeted.targets_residential("B"));

        let everywhere = ad(json!({ "$id": "b", "residenciales": [] }));
        assert!(everywhere.targets_residential("B"));
    }

    #[test]
    fn test_category_targeting_by_id_or_slug() {
        let a = ad(json!({ "$id": "a", "categories": [{ "$id": "c1", "slug": "comida" }] }));
        assert!(a.targets_category("comida"));
        assert!(a.targets_category("c1"));
        assert!(!a.targets_category("ropa"));

        let legacy = ad(json!({ "$id": "b", "categorias": ["ropa"] }));
        assert!(legacy.targets_category("ropa"));

        let untargeted = ad(json!({ "$id": "c" }));
        assert!(untargeted.targets_category("anything"));
    }

    #[test]
    fn test_create_request_requires_title_and_dates() {
        let req: CreatePaidAdRequest =
            serde_json::from_value(json!({ "titulo": "x", "fechaInicio": "2026-01-01" })).unwrap();
        assert!(req.into_document().is_err());

        let req: CreatePaidAdRequest = serde_json::from_value(json!({
            "titulo": "x",
            "fechaInicio": "2026-01-01",
            "fechaFin": "2026-01-10",
            "creditos": 300,
            "active": true,
            "imagen": "https://cdn/img.png"
        }))
        .unwrap();
        let doc = req.into_document().unwrap();
        assert_eq!(doc["fecha_inicio"], "2026-01-01T00:00:00.000Z");
        assert_eq!(doc["image_url"], "https://cdn/img.png");
        assert_eq!(doc["active"], true);
        assert_eq!(doc["vistas"], 0);
    }

    #[test]
    fn test_patch_rejects_negative_credits_and_deactivates_on_zero() {
        let body = json!({ "creditos": -1 }).as_object().unwrap().clone();
        assert!(sanitize_patch(body).is_err());

        let body = json!({ "creditos": 0, "$id": "x", "fechaFin": "2026-02-01" })
            .as_object()
            .unwrap()
            .clone();
        let patch = sanitize_patch(body).unwrap();
        assert_eq!(patch["active"], false);
        assert!(!patch.contains_key("$id"));
        assert_eq!(patch["fecha_fin"], "2026-02-01T00:00:00.000Z");
    }

    #[test]
    fn test_activation_without_credits_needs_the_stored_balance() {
        let patch = |v: Value| sanitize_patch(v.as_object().unwrap().clone()).unwrap();
        assert!(activates_without_credits(&patch(json!({ "active": true }))));
        assert!(!activates_without_credits(&patch(json!({ "active": true, "creditos": 50 }))));
        assert!(!activates_without_credits(&patch(json!({ "active": false }))));
        // a zero balance in the same patch already forces the ad off
        assert!(!activates_without_credits(&patch(json!({ "active": true, "creditos": 0 }))));
    }
}
