//! Coordinate reference systems known to the pipeline

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Reference system a point or polygon layer is expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Crs {
    /// Geographic WGS84 degrees, x = longitude, y = latitude
    Wgs84,
    /// Spherical Web Mercator, metres
    WebMercator,
    /// NAD83 / Colorado North state plane, US survey feet
    ColoradoNorthFtUs,
    /// NAD83(HARN) / UTM zone 13N, metres
    Utm13N,
}

impl Crs {
    /// EPSG code
    pub fn epsg(&self) -> u32 {
        match self {
            Crs::Wgs84 => 4326,
            Crs::WebMercator => 3857,
            Crs::ColoradoNorthFtUs => 2231,
            Crs::Utm13N => 3743,
        }
    }

    /// Look up by EPSG code
    pub fn from_epsg(code: u32) -> Option<Self> {
        match code {
            4326 => Some(Crs::Wgs84),
            3857 | 900913 => Some(Crs::WebMercator),
            2231 => Some(Crs::ColoradoNorthFtUs),
            3743 => Some(Crs::Utm13N),
            _ => None,
        }
    }

    /// True for systems measured in degrees rather than linear units
    pub fn is_geographic(&self) -> bool {
        matches!(self, Crs::Wgs84)
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

impl FromStr for Crs {
    type Err = String;

    /// Accepts `EPSG:2231`, `2231`, `urn:ogc:def:crs:EPSG::2231`, and the
    /// GeoJSON default `urn:ogc:def:crs:OGC:1.3:CRS84`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let upper = trimmed.to_ascii_uppercase();

        if upper.ends_with("CRS84") {
            return Ok(Crs::Wgs84);
        }

        let code = upper
            .rsplit(':')
            .next()
            .unwrap_or(upper.as_str())
            .parse::<u32>()
            .map_err(|_| format!("unrecognized reference system '{}'", trimmed))?;

        Crs::from_epsg(code).ok_or_else(|| format!("unsupported reference system EPSG:{}", code))
    }
}

impl TryFrom<String> for Crs {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Crs> for String {
    fn from(crs: Crs) -> Self {
        crs.to_string()
    }
}
