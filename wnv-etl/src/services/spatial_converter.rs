//! Spatial point converter
//!
//! Converts a geocoded (latitude, longitude) in degrees into a point in the
//! reference system of the risk polygon layer.
//!
//! | Target      | Units       | Method                                          |
//! |-------------|-------------|-------------------------------------------------|
//! | EPSG:4326   | degrees     | identity, x = longitude, y = latitude           |
//! | EPSG:3857   | metres      | spherical Web Mercator                          |
//! | EPSG:2231   | US survey ft| Lambert Conformal Conic 2SP on GRS80 (CO North) |
//! | EPSG:3743   | metres      | Transverse Mercator on GRS80 (UTM zone 13N)     |
//!
//! Out-of-range input is rejected, never clamped.

use crate::models::{Coordinate, Crs, FailureReason, ProjectedPoint, PolygonSet};
use std::f64::consts::FRAC_PI_4;
use thiserror::Error;

/// Web Mercator sphere radius (metres)
const WEB_MERCATOR_RADIUS: f64 = 6_378_137.0;

/// Latitude beyond which Web Mercator is undefined in practice
pub const WEB_MERCATOR_MAX_LATITUDE: f64 = 85.051_128_78;

/// US survey feet per metre
const US_FEET_PER_METRE: f64 = 3937.0 / 1200.0;

/// Per-point conversion failure
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConversionError {
    #[error("coordinate ({latitude}, {longitude}) is outside the valid range for {crs}")]
    InvalidCoordinate {
        latitude: f64,
        longitude: f64,
        crs: Crs,
    },

    #[error("point is in {point} but polygons are in {polygons}")]
    ReprojectionMismatch { point: Crs, polygons: Crs },
}

impl ConversionError {
    pub fn reason(&self) -> FailureReason {
        match self {
            ConversionError::InvalidCoordinate { .. } => FailureReason::InvalidCoordinate,
            ConversionError::ReprojectionMismatch { .. } => FailureReason::ReprojectionMismatch,
        }
    }
}

/// Lambert Conformal Conic with two standard parallels, output in US survey feet
///
/// Formulas follow Snyder, "Map Projections: A Working Manual", §15.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LambertConformalConic {
    eccentricity: f64,
    central_meridian: f64,
    n: f64,
    af: f64,
    rho0: f64,
    false_easting_ft: f64,
    false_northing_ft: f64,
}

impl LambertConformalConic {
    /// Build from ellipsoid and projection parameters (angles in degrees)
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        semi_major: f64,
        inverse_flattening: f64,
        standard_parallel_1: f64,
        standard_parallel_2: f64,
        latitude_of_origin: f64,
        central_meridian: f64,
        false_easting_ft: f64,
        false_northing_ft: f64,
    ) -> Self {
        let f = 1.0 / inverse_flattening;
        let e = (2.0 * f - f * f).sqrt();

        let phi1 = standard_parallel_1.to_radians();
        let phi2 = standard_parallel_2.to_radians();

        let m1 = lcc_m(phi1, e);
        let m2 = lcc_m(phi2, e);
        let t1 = lcc_t(phi1, e);
        let t2 = lcc_t(phi2, e);
        let t0 = lcc_t(latitude_of_origin.to_radians(), e);

        let n = (m1.ln() - m2.ln()) / (t1.ln() - t2.ln());
        let big_f = m1 / (n * t1.powf(n));
        let af = semi_major * big_f;

        Self {
            eccentricity: e,
            central_meridian: central_meridian.to_radians(),
            n,
            af,
            rho0: af * t0.powf(n),
            false_easting_ft,
            false_northing_ft,
        }
    }

    /// NAD83 / Colorado North (ftUS), EPSG:2231
    pub fn colorado_north() -> Self {
        Self::new(
            6_378_137.0,
            298.257_222_101,
            40.0 + 47.0 / 60.0,
            39.0 + 43.0 / 60.0,
            39.0 + 20.0 / 60.0,
            -105.5,
            3_000_000.0,
            1_000_000.0,
        )
    }

    /// Forward projection, degrees in, feet out
    pub fn project(&self, latitude: f64, longitude: f64) -> (f64, f64) {
        let rho = self.af * lcc_t(latitude.to_radians(), self.eccentricity).powf(self.n);
        let theta = self.n * (longitude.to_radians() - self.central_meridian);

        let x = rho * theta.sin() * US_FEET_PER_METRE + self.false_easting_ft;
        let y = (self.rho0 - rho * theta.cos()) * US_FEET_PER_METRE + self.false_northing_ft;
        (x, y)
    }
}

fn lcc_m(phi: f64, e: f64) -> f64 {
    let s = phi.sin();
    phi.cos() / (1.0 - e * e * s * s).sqrt()
}

fn lcc_t(phi: f64, e: f64) -> f64 {
    let es = e * phi.sin();
    (FRAC_PI_4 - phi / 2.0).tan() / ((1.0 - es) / (1.0 + es)).powf(e / 2.0)
}

/// Transverse Mercator, output in metres
///
/// Series expansion from Snyder §8; accurate to millimetres within a
/// UTM zone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransverseMercator {
    semi_major: f64,
    e2: f64,
    ep2: f64,
    scale: f64,
    central_meridian: f64,
    m0: f64,
    false_easting: f64,
    false_northing: f64,
}

impl TransverseMercator {
    /// Build from ellipsoid and projection parameters (angles in degrees)
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        semi_major: f64,
        inverse_flattening: f64,
        scale: f64,
        latitude_of_origin: f64,
        central_meridian: f64,
        false_easting: f64,
        false_northing: f64,
    ) -> Self {
        let f = 1.0 / inverse_flattening;
        let e2 = f * (2.0 - f);
        Self {
            semi_major,
            e2,
            ep2: e2 / (1.0 - e2),
            scale,
            central_meridian: central_meridian.to_radians(),
            m0: meridian_arc(semi_major, e2, latitude_of_origin.to_radians()),
            false_easting,
            false_northing,
        }
    }

    /// NAD83(HARN) / UTM zone 13N, EPSG:3743
    pub fn utm_zone_13n() -> Self {
        Self::new(6_378_137.0, 298.257_222_101, 0.9996, 0.0, -105.0, 500_000.0, 0.0)
    }

    /// Forward projection, degrees in, metres out
    pub fn project(&self, latitude: f64, longitude: f64) -> (f64, f64) {
        let phi = latitude.to_radians();
        let (sin, cos) = phi.sin_cos();

        let n = self.semi_major / (1.0 - self.e2 * sin * sin).sqrt();
        let t = phi.tan().powi(2);
        let c = self.ep2 * cos * cos;
        let a = (longitude.to_radians() - self.central_meridian) * cos;
        let m = meridian_arc(self.semi_major, self.e2, phi);

        let x = self.scale
            * n
            * (a + (1.0 - t + c) * a.powi(3) / 6.0
                + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * self.ep2) * a.powi(5) / 120.0);
        let y = self.scale
            * (m - self.m0
                + n * phi.tan()
                    * (a * a / 2.0
                        + (5.0 - t + 9.0 * c + 4.0 * c * c) * a.powi(4) / 24.0
                        + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * self.ep2) * a.powi(6)
                            / 720.0));

        (x + self.false_easting, y + self.false_northing)
    }
}

/// Distance along the meridian from the equator to `phi`
fn meridian_arc(semi_major: f64, e2: f64, phi: f64) -> f64 {
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    semi_major
        * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
            - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
            + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
            - (35.0 * e6 / 3072.0) * (6.0 * phi).sin())
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Projection {
    Identity,
    WebMercator,
    Conic(LambertConformalConic),
    Transverse(TransverseMercator),
}

/// Converter bound to one target reference system
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialConverter {
    target: Crs,
    projection: Projection,
}

impl SpatialConverter {
    pub fn new(target: Crs) -> Self {
        let projection = match target {
            Crs::Wgs84 => Projection::Identity,
            Crs::WebMercator => Projection::WebMercator,
            Crs::ColoradoNorthFtUs => Projection::Conic(LambertConformalConic::colorado_north()),
            Crs::Utm13N => Projection::Transverse(TransverseMercator::utm_zone_13n()),
        };
        Self { target, projection }
    }

    /// Converter targeting the reference system of a polygon layer
    pub fn for_polygons(polygons: &PolygonSet) -> Self {
        Self::new(polygons.crs)
    }

    pub fn target(&self) -> Crs {
        self.target
    }

    /// Check that points from this converter can be tested against `polygons`
    pub fn ensure_compatible(&self, polygons: &PolygonSet) -> Result<(), ConversionError> {
        if self.target != polygons.crs {
            return Err(ConversionError::ReprojectionMismatch {
                point: self.target,
                polygons: polygons.crs,
            });
        }
        Ok(())
    }

    /// Convert a geographic coordinate into the target system
    pub fn convert(&self, coordinate: Coordinate) -> Result<ProjectedPoint, ConversionError> {
        let invalid = || ConversionError::InvalidCoordinate {
            latitude: coordinate.latitude,
            longitude: coordinate.longitude,
            crs: self.target,
        };

        if !coordinate.is_valid() {
            return Err(invalid());
        }

        let Coordinate {
            latitude,
            longitude,
        } = coordinate;

        let (x, y) = match self.projection {
            Projection::Identity => (longitude, latitude),
            Projection::WebMercator => {
                if latitude.abs() > WEB_MERCATOR_MAX_LATITUDE {
                    return Err(invalid());
                }
                let x = WEB_MERCATOR_RADIUS * longitude.to_radians();
                let y = WEB_MERCATOR_RADIUS
                    * (FRAC_PI_4 + latitude.to_radians() / 2.0).tan().ln();
                (x, y)
            }
            Projection::Conic(lcc) => {
                // Poles are singular for a cone tangent in the north
                if latitude.abs() >= 90.0 {
                    return Err(invalid());
                }
                lcc.project(latitude, longitude)
            }
            Projection::Transverse(tm) => {
                if latitude.abs() >= 90.0 {
                    return Err(invalid());
                }
                tm.project(latitude, longitude)
            }
        };

        if !(x.is_finite() && y.is_finite()) {
            return Err(invalid());
        }

        Ok(ProjectedPoint::new(x, y, self.target))
    }
}
