use crate::config::OverpassConfig;
use crate::types::{BuildingAttributes, BuildingFeature, Coordinate, ViabilityError};
use async_trait::async_trait;
use geo::Contains;
use geo_types::{Coord, LineString, MultiPolygon, Point, Polygon};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

const METERS_PER_DEGREE: f64 = 111_320.0;

/// Source of building footprints around a point.
#[async_trait]
pub trait FeatureProvider: Send + Sync {
    async fn fetch_buildings(
        &self,
        coordinate: Coordinate,
        radius_m: f64,
    ) -> Result<Vec<BuildingFeature>, ViabilityError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn around(center: Coordinate, radius_m: f64) -> Self {
        let (lat_deg, lon_deg) = meters_to_degrees(radius_m, center.lat);
        Self {
            min_lat: (center.lat - lat_deg).max(-90.0),
            min_lon: center.lon - lon_deg,
            max_lat: (center.lat + lat_deg).min(90.0),
            max_lon: center.lon + lon_deg,
        }
    }

    /// Overpass order: south, west, north, east.
    fn to_overpass(self) -> String {
        format!(
            "{:.7},{:.7},{:.7},{:.7}",
            self.min_lat, self.min_lon, self.max_lat, self.max_lon
        )
    }
}

// 1 degree of latitude is ~111,320 m everywhere; a degree of longitude
// shrinks with cos(latitude).
fn meters_to_degrees(meters: f64, latitude: f64) -> (f64, f64) {
    let lat_deg = meters / METERS_PER_DEGREE;
    let lon_meters_per_degree = METERS_PER_DEGREE * latitude.to_radians().cos().max(1e-6);
    (lat_deg, meters / lon_meters_per_degree)
}

pub struct OverpassClient {
    client: reqwest::Client,
    url: String,
    timeout_secs: u64,
}

impl OverpassClient {
    pub fn new(config: &OverpassConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs + 5))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            url: config.url.clone(),
            timeout_secs: config.timeout_secs,
        }
    }

    pub fn build_query(&self, bbox: BoundingBox) -> String {
        let bbox = bbox.to_overpass();
        format!(
            "[out:json][timeout:{}];\n(\n  way[\"building\"]({bbox});\n  relation[\"building\"]({bbox});\n);\nout geom;",
            self.timeout_secs
        )
    }
}

#[async_trait]
impl FeatureProvider for OverpassClient {
    async fn fetch_buildings(
        &self,
        coordinate: Coordinate,
        radius_m: f64,
    ) -> Result<Vec<BuildingFeature>, ViabilityError> {
        let query = self.build_query(BoundingBox::around(coordinate, radius_m));
        tracing::debug!(url = %self.url, "querying Overpass");

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "text/plain")
            .body(query)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ViabilityError::Upstream {
                service: "Overpass",
                message: format!("HTTP {}", response.status()),
            });
        }

        let payload: OverpassResponse = response.json().await?;
        check_remark(&payload)?;
        let features = parse_response(payload);
        tracing::info!(count = features.len(), "fetched building footprints");
        Ok(features)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct OverpassResponse {
    #[serde(default)]
    elements: Vec<OverpassElement>,
    #[serde(default)]
    remark: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OverpassElement {
    #[serde(rename = "type")]
    kind: String,
    id: i64,
    geometry: Option<Vec<Option<OverpassGeometryPoint>>>,
    members: Option<Vec<OverpassMember>>,
    tags: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct OverpassMember {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    role: String,
    geometry: Option<Vec<Option<OverpassGeometryPoint>>>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct OverpassGeometryPoint {
    lat: f64,
    lon: f64,
}

/// Overpass reports query timeouts and memory exhaustion as a `remark` on an
/// otherwise successful response.
pub(crate) fn check_remark(response: &OverpassResponse) -> Result<(), ViabilityError> {
    match response.remark.as_deref() {
        Some(remark) if remark.trim_start().starts_with("runtime error") => {
            Err(ViabilityError::Upstream {
                service: "Overpass",
                message: remark.trim().to_string(),
            })
        }
        _ => Ok(()),
    }
}

pub(crate) fn parse_response(response: OverpassResponse) -> Vec<BuildingFeature> {
    response
        .elements
        .into_iter()
        .filter_map(|element| {
            let footprint = match element.kind.as_str() {
                "way" => element
                    .geometry
                    .as_deref()
                    .and_then(closed_ring)
                    .map(|ring| MultiPolygon(vec![Polygon::new(ring, vec![])])),
                "relation" => element.members.as_deref().and_then(relation_footprint),
                _ => None,
            };
            let Some(footprint) = footprint else {
                tracing::debug!(id = element.id, kind = %element.kind, "skipping element without closed footprint");
                return None;
            };

            let tags = element.tags.unwrap_or_default();
            Some(BuildingFeature {
                id: element.id,
                footprint,
                attributes: BuildingAttributes {
                    height: tags.get("height").cloned(),
                    levels: tags.get("building:levels").cloned(),
                },
            })
        })
        .collect()
}

fn way_coords(points: &[Option<OverpassGeometryPoint>]) -> Option<Vec<Coord<f64>>> {
    points
        .iter()
        .map(|p| p.as_ref().map(|p| Coord { x: p.lon, y: p.lat }))
        .collect()
}

fn is_closed(coords: &[Coord<f64>]) -> bool {
    coords.len() >= 4 && coords.first() == coords.last()
}

fn closed_ring(points: &[Option<OverpassGeometryPoint>]) -> Option<LineString<f64>> {
    way_coords(points)
        .filter(|coords| is_closed(coords))
        .map(LineString::new)
}

/// Joins member ways end to end into closed rings. Ways are reversed as
/// needed; chains that never close are dropped.
fn assemble_rings(mut segments: Vec<Vec<Coord<f64>>>) -> Vec<LineString<f64>> {
    segments.retain(|segment| segment.len() >= 2);
    segments.reverse();
    let mut rings = Vec::new();

    while let Some(mut chain) = segments.pop() {
        while !is_closed(&chain) {
            let Some(&end) = chain.last() else {
                break;
            };
            let Some(idx) = segments
                .iter()
                .position(|s| s.first() == Some(&end) || s.last() == Some(&end))
            else {
                break;
            };
            let mut next = segments.remove(idx);
            if next.first() != Some(&end) {
                next.reverse();
            }
            chain.extend(next.into_iter().skip(1));
        }

        if is_closed(&chain) {
            rings.push(LineString::new(chain));
        } else {
            tracing::debug!(points = chain.len(), "dropping unclosed relation ring");
        }
    }

    rings
}

/// Outer members become polygons; inner members become holes of the outer
/// ring that contains them. Rings split across several ways are joined first.
fn relation_footprint(members: &[OverpassMember]) -> Option<MultiPolygon<f64>> {
    let mut outer_segments = Vec::new();
    let mut inner_segments = Vec::new();

    for member in members.iter().filter(|m| m.kind == "way") {
        let Some(coords) = member.geometry.as_deref().and_then(way_coords) else {
            continue;
        };
        match member.role.as_str() {
            "inner" => inner_segments.push(coords),
            _ => outer_segments.push(coords),
        }
    }

    let mut outers: Vec<Polygon<f64>> = assemble_rings(outer_segments)
        .into_iter()
        .map(|ring| Polygon::new(ring, vec![]))
        .collect();
    if outers.is_empty() {
        return None;
    }

    for inner in assemble_rings(inner_segments) {
        let Some(first) = inner.0.first().copied() else {
            continue;
        };
        if let Some(outer) = outers
            .iter_mut()
            .find(|outer| outer.contains(&Point::from(first)))
        {
            outer.interiors_push(inner);
        }
    }

    Some(MultiPolygon(outers))
}
