//! Polygon containment engine
//!
//! Answers "which risk polygon contains this point?" for a loaded layer.
//!
//! - Closed-set semantics: a point on any ring (exterior or hole) of a
//!   polygon is inside it; a point strictly inside a hole is not.
//! - Overlapping polygons: the earliest polygon in layer order wins.
//! - Bounding boxes are indexed in an R-tree; index hits are re-sorted into
//!   layer order so the answer equals a linear scan.

use super::spatial_converter::ConversionError;
use crate::models::{Crs, PolygonSet, ProjectedPoint};
use geo::coordinate_position::{CoordPos, CoordinatePosition};
use geo::{Coord, MultiPolygon};
use rstar::{RTree, AABB};
use std::sync::Arc;

/// Result of a containment query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Containment {
    Inside {
        polygon_id: String,
        risk_category: String,
    },
    NoMatch,
}

impl Containment {
    /// `(polygon_id, risk_category)` when inside some polygon
    pub fn into_match(self) -> Option<(String, String)> {
        match self {
            Containment::Inside {
                polygon_id,
                risk_category,
            } => Some((polygon_id, risk_category)),
            Containment::NoMatch => None,
        }
    }

    pub fn risk_category(&self) -> Option<&str> {
        match self {
            Containment::Inside { risk_category, .. } => Some(risk_category),
            Containment::NoMatch => None,
        }
    }
}

/// Bounding box of one polygon, keyed by its layer position
#[derive(Debug, Clone, Copy)]
struct IndexedEnvelope {
    position: usize,
    aabb: AABB<[f64; 2]>,
}

impl rstar::RTreeObject for IndexedEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

/// Indexed, read-only view over a polygon layer
pub struct ContainmentEngine {
    polygons: Arc<PolygonSet>,
    index: RTree<IndexedEnvelope>,
}

impl ContainmentEngine {
    pub fn new(polygons: Arc<PolygonSet>) -> Self {
        let envelopes: Vec<IndexedEnvelope> = polygons
            .polygons
            .iter()
            .enumerate()
            .filter_map(|(position, polygon)| {
                polygon.bounding_rect().map(|rect| IndexedEnvelope {
                    position,
                    aabb: AABB::from_corners(
                        [rect.min().x, rect.min().y],
                        [rect.max().x, rect.max().y],
                    ),
                })
            })
            .collect();

        tracing::debug!(
            polygons = polygons.len(),
            indexed = envelopes.len(),
            crs = %polygons.crs,
            "Built polygon index"
        );

        Self {
            polygons,
            index: RTree::bulk_load(envelopes),
        }
    }

    pub fn crs(&self) -> Crs {
        self.polygons.crs
    }

    pub fn polygons(&self) -> &PolygonSet {
        &self.polygons
    }

    /// Find the first polygon (in layer order) containing `point`
    pub fn contain(&self, point: &ProjectedPoint) -> Result<Containment, ConversionError> {
        if point.crs != self.polygons.crs {
            return Err(ConversionError::ReprojectionMismatch {
                point: point.crs,
                polygons: self.polygons.crs,
            });
        }

        let coord = Coord {
            x: point.x,
            y: point.y,
        };

        let mut candidates: Vec<usize> = self
            .index
            .locate_in_envelope_intersecting(&AABB::from_point([point.x, point.y]))
            .map(|envelope| envelope.position)
            .collect();
        candidates.sort_unstable();

        for position in candidates {
            let polygon = &self.polygons.polygons[position];
            if multipolygon_contains(&polygon.geometry, coord) {
                return Ok(Containment::Inside {
                    polygon_id: polygon.id.clone(),
                    risk_category: polygon.risk_category.clone(),
                });
            }
        }

        Ok(Containment::NoMatch)
    }
}

/// Unindexed reference query, first containing polygon in layer order
pub fn linear_scan(polygons: &PolygonSet, point: &ProjectedPoint) -> Containment {
    let coord = Coord {
        x: point.x,
        y: point.y,
    };

    polygons
        .polygons
        .iter()
        .find(|p| multipolygon_contains(&p.geometry, coord))
        .map(|p| Containment::Inside {
            polygon_id: p.id.clone(),
            risk_category: p.risk_category.clone(),
        })
        .unwrap_or(Containment::NoMatch)
}

/// Any part contains the coordinate, boundary included
fn multipolygon_contains(geometry: &MultiPolygon<f64>, coord: Coord<f64>) -> bool {
    geometry.0.iter().any(|part| {
        matches!(
            part.coordinate_position(&coord),
            CoordPos::Inside | CoordPos::OnBoundary
        )
    })
}
