use crate::types::{GeoBoundingBox, ProjectedBounds};

// WGS84 ellipsoid
const SEMI_MAJOR: f64 = 6_378_137.0;
const FLATTENING: f64 = 1.0 / 298.257_223_563;
const ECC2: f64 = 2.0 * FLATTENING - FLATTENING * FLATTENING;
const ECC2_PRIME: f64 = ECC2 / (1.0 - ECC2);
const UTM_SCALE: f64 = 0.9996;
const UTM_FALSE_EASTING: f64 = 500_000.0;
const UTM_FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// Samples per bbox edge when projecting a box into a scene CRS
pub const EDGE_SAMPLES: usize = 16;

/// Coordinate systems a scene may be delivered in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneCrs {
    /// EPSG:4326
    Geographic,
    /// EPSG:326xx / 327xx
    Utm { zone: u32, north: bool },
}

impl SceneCrs {
    pub fn from_epsg(epsg: u32) -> Option<Self> {
        match epsg {
            4326 => Some(SceneCrs::Geographic),
            32601..=32660 => Some(SceneCrs::Utm { zone: epsg - 32600, north: true }),
            32701..=32760 => Some(SceneCrs::Utm { zone: epsg - 32700, north: false }),
            _ => None,
        }
    }

    pub fn epsg(&self) -> u32 {
        match self {
            SceneCrs::Geographic => 4326,
            SceneCrs::Utm { zone, north: true } => 32600 + zone,
            SceneCrs::Utm { zone, north: false } => 32700 + zone,
        }
    }

    /// Project WGS84 (lon, lat) degrees into this CRS
    pub fn forward(&self, lon: f64, lat: f64) -> (f64, f64) {
        match *self {
            SceneCrs::Geographic => (lon, lat),
            SceneCrs::Utm { zone, north } => utm_forward(lon, lat, zone, north),
        }
    }

    /// Envelope of the box in this CRS, sampled along every edge
    pub fn project_bbox(&self, bbox: &GeoBoundingBox) -> ProjectedBounds {
        let points: Vec<(f64, f64)> = bbox
            .densified_ring(EDGE_SAMPLES)
            .into_iter()
            .map(|(lon, lat)| self.forward(lon, lat))
            .collect();
        // densified_ring always yields at least four corners
        ProjectedBounds::envelope(&points).unwrap_or(ProjectedBounds::new(0.0, 0.0, 0.0, 0.0))
    }
}

/// Transverse Mercator forward projection (Snyder, USGS PP 1395)
fn utm_forward(lon_deg: f64, lat_deg: f64, zone: u32, north: bool) -> (f64, f64) {
    let phi = lat_deg.to_radians();
    let central_meridian = (zone as f64 * 6.0 - 183.0).to_radians();

    let (sin_phi, cos_phi) = phi.sin_cos();
    let tan_phi = phi.tan();

    let nu = SEMI_MAJOR / (1.0 - ECC2 * sin_phi * sin_phi).sqrt();
    let t = tan_phi * tan_phi;
    let c = ECC2_PRIME * cos_phi * cos_phi;
    let a = cos_phi * (lon_deg.to_radians() - central_meridian);
    let a2 = a * a;
    let a3 = a2 * a;
    let a4 = a2 * a2;
    let a5 = a4 * a;
    let a6 = a4 * a2;

    let x = UTM_SCALE
        * nu
        * (a + (1.0 - t + c) * a3 / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ECC2_PRIME) * a5 / 120.0)
        + UTM_FALSE_EASTING;

    let y = UTM_SCALE
        * (meridian_distance(phi)
            + nu * tan_phi
                * (a2 / 2.0
                    + (5.0 - t + 9.0 * c + 4.0 * c * c) * a4 / 24.0
                    + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ECC2_PRIME) * a6 / 720.0));

    if north {
        (x, y)
    } else {
        (x, y + UTM_FALSE_NORTHING_SOUTH)
    }
}

fn meridian_distance(phi: f64) -> f64 {
    let e4 = ECC2 * ECC2;
    let e6 = e4 * ECC2;
    SEMI_MAJOR
        * ((1.0 - ECC2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
            - (3.0 * ECC2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
            + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
            - (35.0 * e6 / 3072.0) * (6.0 * phi).sin())
}
