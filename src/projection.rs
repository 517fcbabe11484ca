//! Reprojection of geographic footprints into a local metric frame.
//!
//! Areas and distances are only meaningful in metres, so every footprint and
//! the query point pass through the UTM zone covering the fetched data before
//! any geometry is measured.

use crate::types::{BuildingFeature, Coordinate, ViabilityError};
use geo::{BoundingRect, MapCoords};
use geo_types::{Coord, MultiPolygon};

const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1.0 / 298.257_223_563;
const UTM_SCALE: f64 = 0.9996;
const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtmZone {
    pub number: u8,
    pub north: bool,
}

impl UtmZone {
    pub fn containing(coordinate: Coordinate) -> Self {
        let Coordinate { lat, lon } = coordinate;
        let mut number = (((lon + 180.0) / 6.0).floor() as i32 + 1).clamp(1, 60) as u8;

        // South-west Norway and Svalbard deviate from the regular grid.
        if (56.0..64.0).contains(&lat) && (3.0..12.0).contains(&lon) {
            number = 32;
        } else if (72.0..84.0).contains(&lat) {
            number = match lon {
                l if (0.0..9.0).contains(&l) => 31,
                l if (9.0..21.0).contains(&l) => 33,
                l if (21.0..33.0).contains(&l) => 35,
                l if (33.0..42.0).contains(&l) => 37,
                _ => number,
            };
        }

        Self {
            number,
            north: lat >= 0.0,
        }
    }

    pub fn epsg(&self) -> u32 {
        let base = if self.north { 32600 } else { 32700 };
        base + self.number as u32
    }

    pub fn central_meridian(&self) -> f64 {
        (self.number as f64 - 1.0) * 6.0 - 180.0 + 3.0
    }
}

pub struct LocalProjection {
    zone: UtmZone,
    #[cfg(feature = "proj")]
    proj: proj::Proj,
}

impl LocalProjection {
    pub fn new(zone: UtmZone) -> Result<Self, ViabilityError> {
        #[cfg(feature = "proj")]
        {
            let target = format!("EPSG:{}", zone.epsg());
            let proj = proj::Proj::new_known_crs("EPSG:4326", &target, None)
                .map_err(|e| ViabilityError::Projection(e.to_string()))?;
            Ok(Self { zone, proj })
        }
        #[cfg(not(feature = "proj"))]
        {
            Ok(Self { zone })
        }
    }

    /// Picks the zone from the centre of the features' combined extent, the
    /// query point standing in when no feature has an extent.
    pub fn for_features(
        features: &[BuildingFeature],
        query: Coordinate,
    ) -> Result<Self, ViabilityError> {
        let extent = features
            .iter()
            .filter_map(|f| f.footprint.bounding_rect())
            .reduce(|a, b| {
                geo_types::Rect::new(
                    Coord {
                        x: a.min().x.min(b.min().x),
                        y: a.min().y.min(b.min().y),
                    },
                    Coord {
                        x: a.max().x.max(b.max().x),
                        y: a.max().y.max(b.max().y),
                    },
                )
            });

        let centre = extent
            .map(|rect| Coordinate::new(rect.center().y, rect.center().x))
            .unwrap_or(query);

        Self::new(UtmZone::containing(centre))
    }

    pub fn zone(&self) -> UtmZone {
        self.zone
    }

    /// Projects a geographic coordinate (x = lon, y = lat) to easting/northing.
    pub fn project_coord(&self, coord: Coord<f64>) -> Result<Coord<f64>, ViabilityError> {
        #[cfg(feature = "proj")]
        {
            let (x, y) = self
                .proj
                .convert((coord.x, coord.y))
                .map_err(|e| ViabilityError::Projection(e.to_string()))?;
            Ok(Coord { x, y })
        }
        #[cfg(not(feature = "proj"))]
        {
            Ok(transverse_mercator(coord.y, coord.x, &self.zone))
        }
    }

    pub fn project_point(&self, coordinate: Coordinate) -> Result<Coord<f64>, ViabilityError> {
        self.project_coord(Coord {
            x: coordinate.lon,
            y: coordinate.lat,
        })
    }

    pub fn project_footprint(
        &self,
        footprint: &MultiPolygon<f64>,
    ) -> Result<MultiPolygon<f64>, ViabilityError> {
        footprint.try_map_coords(|c| self.project_coord(c))
    }
}

/// Forward transverse Mercator on the WGS84 ellipsoid (Snyder, USGS PP 1395).
#[cfg_attr(feature = "proj", allow(dead_code))]
fn transverse_mercator(lat: f64, lon: f64, zone: &UtmZone) -> Coord<f64> {
    let e2 = WGS84_F * (2.0 - WGS84_F);
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    let ep2 = e2 / (1.0 - e2);

    let phi = lat.to_radians();
    let (sin_phi, cos_phi) = phi.sin_cos();
    let tan_phi = phi.tan();

    let n = WGS84_A / (1.0 - e2 * sin_phi * sin_phi).sqrt();
    let t = tan_phi * tan_phi;
    let c = ep2 * cos_phi * cos_phi;
    let a = cos_phi * (lon - zone.central_meridian()).to_radians();

    let m = WGS84_A
        * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
            - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
            + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
            - (35.0 * e6 / 3072.0) * (6.0 * phi).sin());

    let easting = UTM_SCALE
        * n
        * (a + (1.0 - t + c) * a.powi(3) / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a.powi(5) / 120.0)
        + FALSE_EASTING;

    let mut northing = UTM_SCALE
        * (m + n
            * tan_phi
            * (a * a / 2.0
                + (5.0 - t + 9.0 * c + 4.0 * c * c) * a.powi(4) / 24.0
                + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a.powi(6) / 720.0));

    if !zone.north {
        northing += FALSE_NORTHING_SOUTH;
    }

    Coord {
        x: easting,
        y: northing,
    }
}
