//! Risk polygon reference data
//!
//! Loaded once before a run and shared read-only across workers.

use super::Crs;
use geo::{BoundingRect, MultiPolygon, Rect};

/// Geographic boundary tagged with a risk classification
#[derive(Debug, Clone, PartialEq)]
pub struct RiskPolygon {
    pub id: String,
    pub risk_category: String,
    /// One or more parts, each an exterior ring with optional holes
    pub geometry: MultiPolygon<f64>,
}

impl RiskPolygon {
    pub fn new(
        id: impl Into<String>,
        risk_category: impl Into<String>,
        geometry: MultiPolygon<f64>,
    ) -> Self {
        Self {
            id: id.into(),
            risk_category: risk_category.into(),
            geometry,
        }
    }

    pub fn bounding_rect(&self) -> Option<Rect<f64>> {
        self.geometry.bounding_rect()
    }
}

/// Ordered polygon layer in a single reference system
///
/// Order is the tie-break for overlapping polygons: the first polygon
/// containing a point wins.
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonSet {
    pub crs: Crs,
    pub polygons: Vec<RiskPolygon>,
}

impl PolygonSet {
    pub fn new(crs: Crs, polygons: Vec<RiskPolygon>) -> Self {
        Self { crs, polygons }
    }

    pub fn len(&self) -> usize {
        self.polygons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    /// Distinct categories in first-seen order
    pub fn categories(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for polygon in &self.polygons {
            if !seen.contains(&polygon.risk_category.as_str()) {
                seen.push(polygon.risk_category.as_str());
            }
        }
        seen
    }
}
