//! Risk polygon layer loader
//!
//! Reads a GeoJSON-style FeatureCollection:
//!
//! ```json
//! {
//!   "type": "FeatureCollection",
//!   "crs": {"type": "name", "properties": {"name": "EPSG:2231"}},
//!   "features": [
//!     {"type": "Feature", "id": "buffer-1",
//!      "properties": {"risk": "high"},
//!      "geometry": {"type": "Polygon", "coordinates": [[[x, y], ...]]}}
//!   ]
//! }
//! ```
//!
//! `crs` may also be a plain string. Without it the configured default
//! applies. Feature order is preserved; it is the overlap tie-break.

use crate::error::{EtlError, EtlResult};
use crate::models::{Crs, PolygonSet, RiskPolygon};
use geo::{Coord, LineString, MultiPolygon, Polygon};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use wnv_common::config::PolygonConfig;

type Position = Vec<f64>;
type Ring = Vec<Position>;

#[derive(Debug, Deserialize)]
struct FeatureCollectionFile {
    #[serde(default)]
    crs: Option<CrsMember>,
    #[serde(default)]
    features: Vec<FeatureEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CrsMember {
    Code(String),
    Named { properties: CrsName },
}

#[derive(Debug, Deserialize)]
struct CrsName {
    name: String,
}

#[derive(Debug, Deserialize)]
struct FeatureEntry {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    properties: Option<serde_json::Map<String, Value>>,
    #[serde(default)]
    geometry: Option<GeometryEntry>,
}

#[derive(Debug, Deserialize)]
struct GeometryEntry {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    coordinates: Value,
}

/// Read and parse a polygon layer file
pub fn load_polygons(path: &Path, config: &PolygonConfig) -> EtlResult<PolygonSet> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        EtlError::PolygonLoad(format!("Read {} failed: {}", path.display(), e))
    })?;

    let set = parse_polygons(&content, config)?;

    tracing::info!(
        path = %path.display(),
        polygons = set.len(),
        crs = %set.crs,
        categories = ?set.categories(),
        "Risk polygons loaded"
    );

    Ok(set)
}

/// Parse a polygon layer from FeatureCollection JSON text
pub fn parse_polygons(json: &str, config: &PolygonConfig) -> EtlResult<PolygonSet> {
    let file: FeatureCollectionFile = serde_json::from_str(json)
        .map_err(|e| EtlError::PolygonLoad(format!("Invalid FeatureCollection: {}", e)))?;

    let crs_name = match &file.crs {
        Some(CrsMember::Code(code)) => code.as_str(),
        Some(CrsMember::Named { properties }) => properties.name.as_str(),
        None => config.default_crs.as_str(),
    };
    let crs: Crs = crs_name
        .parse()
        .map_err(|e: String| EtlError::ReprojectionMismatch(format!("Polygon layer: {}", e)))?;

    let mut polygons = Vec::with_capacity(file.features.len());
    for (index, feature) in file.features.into_iter().enumerate() {
        polygons.push(build_polygon(index, feature, &config.category_property)?);
    }

    Ok(PolygonSet::new(crs, polygons))
}

fn build_polygon(index: usize, feature: FeatureEntry, category_property: &str) -> EtlResult<RiskPolygon> {
    let properties = feature.properties.unwrap_or_default();

    let id = feature
        .id
        .as_ref()
        .or_else(|| properties.get("id"))
        .and_then(scalar_to_string)
        .unwrap_or_else(|| format!("polygon-{}", index + 1));

    let risk_category = properties
        .get(category_property)
        .and_then(scalar_to_string)
        .ok_or_else(|| {
            EtlError::PolygonLoad(format!(
                "Feature {} has no '{}' property",
                id, category_property
            ))
        })?;

    let geometry = match feature.geometry {
        Some(geometry) => build_geometry(&id, geometry)?,
        None => {
            return Err(EtlError::PolygonLoad(format!("Feature {} has no geometry", id)))
        }
    };

    Ok(RiskPolygon::new(id, risk_category, geometry))
}

fn build_geometry(id: &str, geometry: GeometryEntry) -> EtlResult<MultiPolygon<f64>> {
    let bad_coordinates = |e: serde_json::Error| {
        EtlError::PolygonLoad(format!("Feature {} has malformed coordinates: {}", id, e))
    };

    match geometry.kind.as_str() {
        "Polygon" => {
            let rings: Vec<Ring> =
                serde_json::from_value(geometry.coordinates).map_err(bad_coordinates)?;
            Ok(MultiPolygon(vec![build_part(id, rings)?]))
        }
        "MultiPolygon" => {
            let parts: Vec<Vec<Ring>> =
                serde_json::from_value(geometry.coordinates).map_err(bad_coordinates)?;
            let parts = parts
                .into_iter()
                .map(|rings| build_part(id, rings))
                .collect::<EtlResult<Vec<_>>>()?;
            Ok(MultiPolygon(parts))
        }
        other => Err(EtlError::PolygonLoad(format!(
            "Feature {} is a {}, expected Polygon or MultiPolygon",
            id, other
        ))),
    }
}

/// First ring is the exterior, the rest are holes
fn build_part(id: &str, rings: Vec<Ring>) -> EtlResult<Polygon<f64>> {
    let mut rings = rings.into_iter();
    let exterior = match rings.next() {
        Some(ring) => build_ring(id, ring)?,
        None => return Err(EtlError::PolygonLoad(format!("Feature {} has an empty polygon", id))),
    };
    let holes = rings
        .map(|ring| build_ring(id, ring))
        .collect::<EtlResult<Vec<_>>>()?;
    Ok(Polygon::new(exterior, holes))
}

fn build_ring(id: &str, ring: Ring) -> EtlResult<LineString<f64>> {
    let mut coords = Vec::with_capacity(ring.len());
    for position in ring {
        match position.as_slice() {
            [x, y, ..] if x.is_finite() && y.is_finite() => coords.push(Coord { x: *x, y: *y }),
            _ => {
                return Err(EtlError::PolygonLoad(format!(
                    "Feature {} has an invalid position {:?}",
                    id, position
                )))
            }
        }
    }

    // Closed ring needs three distinct vertices plus the closing one
    let open_len = if coords.first() == coords.last() {
        coords.len().saturating_sub(1)
    } else {
        coords.len()
    };
    if open_len < 3 {
        return Err(EtlError::PolygonLoad(format!(
            "Feature {} has a ring with fewer than 3 vertices",
            id
        )));
    }

    Ok(LineString::new(coords))
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
