use crate::types::{GeoBoundingBox, GreenError, GreenResult};
use geo::{BoundingRect, LineString, MultiPolygon, Polygon};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Municipality record as stored in the city registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CityRecord {
    pub city: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default, deserialize_with = "lenient_coordinate")]
    pub latitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient_coordinate")]
    pub longitude: Option<f64>,
    /// GeoJSON Feature or bare Geometry
    #[serde(default)]
    pub polygon_geojson: Option<Value>,
}

impl CityRecord {
    pub fn new(city: &str, country: &str) -> Self {
        Self {
            city: city.to_string(),
            country: country.to_string(),
            state: None,
            latitude: None,
            longitude: None,
            polygon_geojson: None,
        }
    }

    pub fn with_coordinates(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }

    pub fn with_polygon(mut self, geojson: Value) -> Self {
        self.polygon_geojson = Some(geojson);
        self
    }

    pub fn display_name(&self) -> String {
        let mut parts = vec![self.city.as_str()];
        if let Some(state) = self.state.as_deref().filter(|s| !s.is_empty()) {
            parts.push(state);
        }
        if !self.country.is_empty() {
            parts.push(self.country.as_str());
        }
        parts.join(", ")
    }

    /// Parse the record's polygon into geo types; Polygon and MultiPolygon only
    pub fn polygon(&self) -> GreenResult<Option<MultiPolygon<f64>>> {
        let raw = match &self.polygon_geojson {
            Some(Value::Null) | None => return Ok(None),
            Some(raw) => raw,
        };
        let geometry_value = match raw.get("geometry") {
            Some(geometry) => geometry.clone(),
            None => raw.clone(),
        };

        let geometry: geojson::Geometry = serde_json::from_value(geometry_value)
            .map_err(|e| GreenError::BoundsResolution(format!("invalid GeoJSON geometry: {}", e)))?;
        let shape: geo::Geometry<f64> = (&geometry)
            .try_into()
            .map_err(|e: geojson::Error| GreenError::BoundsResolution(e.to_string()))?;

        let polygons = match shape {
            geo::Geometry::Polygon(polygon) => MultiPolygon(vec![polygon]),
            geo::Geometry::MultiPolygon(multi) => multi,
            other => {
                return Err(GreenError::BoundsResolution(format!(
                    "unsupported geometry for {}: {}",
                    self.city,
                    geometry_kind(&other)
                )))
            }
        };

        let usable = polygons
            .0
            .into_iter()
            .filter(|p| p.exterior().0.len() >= 4)
            .collect::<Vec<_>>();
        if usable.is_empty() {
            return Err(GreenError::BoundsResolution(format!(
                "polygon for {} has no closed exterior ring",
                self.city
            )));
        }
        Ok(Some(MultiPolygon(usable)))
    }
}

fn geometry_kind(geometry: &geo::Geometry<f64>) -> &'static str {
    match geometry {
        geo::Geometry::Point(_) => "Point",
        geo::Geometry::Line(_) => "Line",
        geo::Geometry::LineString(_) => "LineString",
        geo::Geometry::MultiPoint(_) => "MultiPoint",
        geo::Geometry::MultiLineString(_) => "MultiLineString",
        geo::Geometry::GeometryCollection(_) => "GeometryCollection",
        geo::Geometry::Rect(_) => "Rect",
        geo::Geometry::Triangle(_) => "Triangle",
        geo::Geometry::Polygon(_) => "Polygon",
        geo::Geometry::MultiPolygon(_) => "MultiPolygon",
    }
}

/// Accepts numbers, numeric strings, empty strings and null
fn lenient_coordinate<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid coordinate '{}'", s))),
        Some(other) => Err(serde::de::Error::custom(format!("invalid coordinate {}", other))),
    }
}

/// City outline used for both the bounding box and the pixel mask
#[derive(Debug, Clone, PartialEq)]
pub struct CityPolygon {
    pub polygons: MultiPolygon<f64>,
}

impl CityPolygon {
    pub fn new(polygons: MultiPolygon<f64>) -> Self {
        Self { polygons }
    }

    /// Polygon covering exactly the given box
    pub fn from_bbox(bbox: &GeoBoundingBox) -> Self {
        let ring = LineString::from(vec![
            (bbox.west, bbox.south),
            (bbox.east, bbox.south),
            (bbox.east, bbox.north),
            (bbox.west, bbox.north),
            (bbox.west, bbox.south),
        ]);
        Self::new(MultiPolygon(vec![Polygon::new(ring, vec![])]))
    }

    /// Envelope of all exterior rings, without padding
    pub fn envelope(&self) -> GreenResult<GeoBoundingBox> {
        let rect = self
            .polygons
            .bounding_rect()
            .ok_or_else(|| GreenError::BoundsResolution("empty polygon".into()))?;
        GeoBoundingBox::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
            .map_err(|e| GreenError::BoundsResolution(e.to_string()))
    }

    /// Mean of the first exterior ring's vertices as (lat, lon)
    pub fn vertex_centroid(&self) -> Option<(f64, f64)> {
        let ring = self.polygons.0.first()?.exterior();
        let n = ring.0.len();
        if n == 0 {
            return None;
        }
        let (sx, sy) = ring.coords().fold((0.0, 0.0), |(sx, sy), c| (sx + c.x, sy + c.y));
        Some((sy / n as f64, sx / n as f64))
    }
}

/// Bounds and outline for one processing run
#[derive(Debug, Clone)]
pub struct ResolvedCity {
    pub name: String,
    pub bbox: GeoBoundingBox,
    pub polygon: CityPolygon,
    /// False when the outline is the coordinate fallback square
    pub from_polygon: bool,
    pub center_lat: f64,
    pub center_lon: f64,
}

/// Derives the geographic bounding box of a city
#[derive(Debug, Clone)]
pub struct BoundsResolver {
    buffer_degrees: f64,
}

impl BoundsResolver {
    pub fn new(buffer_degrees: f64) -> Self {
        Self { buffer_degrees }
    }

    /// Envelope of the polygon, or a square of `buffer_degrees` around the coordinates
    pub fn resolve(&self, city: &CityRecord) -> GreenResult<ResolvedCity> {
        let name = city.display_name();

        let parsed = match city.polygon() {
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!("Ignoring polygon for {}: {}", name, e);
                None
            }
        };

        if let Some(polygons) = parsed {
            let polygon = CityPolygon::new(polygons);
            let bbox = polygon.envelope()?;
            let (center_lat, center_lon) = match (city.latitude, city.longitude) {
                (Some(lat), Some(lon)) => (lat, lon),
                _ => polygon.vertex_centroid().unwrap_or_else(|| bbox.center()),
            };
            log::info!(
                "Resolved {} from polygon: W={:.6} S={:.6} E={:.6} N={:.6}",
                name, bbox.west, bbox.south, bbox.east, bbox.north
            );
            return Ok(ResolvedCity {
                name,
                bbox,
                polygon,
                from_polygon: true,
                center_lat,
                center_lon,
            });
        }

        let (lat, lon) = match (city.latitude, city.longitude) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => {
                return Err(GreenError::BoundsResolution(format!(
                    "{} has neither a polygon nor coordinates",
                    name
                )))
            }
        };

        let b = self.buffer_degrees;
        let bbox = GeoBoundingBox::new(lon - b, lat - b, lon + b, lat + b)
            .map_err(|e| GreenError::BoundsResolution(e.to_string()))?;
        log::info!("Resolved {} from coordinates ({:.4}, {:.4}) with {}° buffer", name, lat, lon, b);

        Ok(ResolvedCity {
            name,
            bbox,
            polygon: CityPolygon::from_bbox(&bbox),
            from_polygon: false,
            center_lat: lat,
            center_lon: lon,
        })
    }
}

impl Default for BoundsResolver {
    fn default() -> Self {
        Self::new(0.05)
    }
}
