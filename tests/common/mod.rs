//! Shared fixtures: an in-memory catalog and geographic tiles over lon 10.0-10.2, lat 50.0-50.2

#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use greenspace::io::catalog::{CatalogQuery, ImageryCatalog};
use greenspace::io::raster::{MemoryFetcher, MemoryRaster};
use greenspace::{BandId, CityRecord, GeoTransform, GreenResult, ProcessingConfig, SceneCandidate};
use ndarray::Array2;
use serde_json::json;
use std::sync::Mutex;

pub const TILE_SIZE: usize = 200;
pub const PIXEL_DEG: f64 = 0.001;

/// Catalog returning fixed scenes below the requested cloud ceiling
pub struct FixedCatalog {
    pub scenes: Vec<SceneCandidate>,
    pub queries: Mutex<Vec<CatalogQuery>>,
}

impl FixedCatalog {
    pub fn new(scenes: Vec<SceneCandidate>) -> Self {
        Self { scenes, queries: Mutex::new(Vec::new()) }
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().unwrap().len()
    }
}

impl ImageryCatalog for FixedCatalog {
    fn search(&self, query: &CatalogQuery) -> GreenResult<Vec<SceneCandidate>> {
        self.queries.lock().unwrap().push(query.clone());
        Ok(self
            .scenes
            .iter()
            .filter(|s| s.cloud_cover < query.cloud_cover_lt)
            .cloned()
            .collect())
    }
}

pub fn tile_transform() -> GeoTransform {
    GeoTransform {
        top_left_x: 10.0,
        pixel_width: PIXEL_DEG,
        rotation_x: 0.0,
        top_left_y: 50.2,
        rotation_y: 0.0,
        pixel_height: -PIXEL_DEG,
    }
}

/// Tile whose value depends on (row, col)
pub fn tile<F: Fn(usize, usize) -> f32>(f: F) -> MemoryRaster {
    MemoryRaster::new(
        4326,
        tile_transform(),
        Array2::from_shape_fn((TILE_SIZE, TILE_SIZE), |(r, c)| f(r, c)),
    )
}

pub fn constant(value: f32) -> MemoryRaster {
    tile(move |_, _| value)
}

pub fn candidate(id: &str, cloud_cover: f64) -> SceneCandidate {
    SceneCandidate {
        id: id.to_string(),
        acquired: Utc.with_ymd_and_hms(2024, 6, 12, 10, 30, 0).unwrap(),
        cloud_cover,
        assets: [BandId::Red, BandId::Green, BandId::Blue, BandId::Nir, BandId::Scl]
            .iter()
            .map(|b| (*b, locator(id, *b)))
            .collect(),
        footprint: None,
    }
}

pub fn locator(scene: &str, band: BandId) -> String {
    format!("mem://{}/{}", scene, band)
}

/// Registers all five bands of a scene; `red` and `nir` vary, the rest are constant
pub fn register(fetcher: &mut MemoryFetcher, scene: &str, red: MemoryRaster, nir: MemoryRaster) {
    fetcher.insert(&locator(scene, BandId::Red), red);
    fetcher.insert(&locator(scene, BandId::Nir), nir);
    fetcher.insert(&locator(scene, BandId::Green), constant(0.08));
    fetcher.insert(&locator(scene, BandId::Blue), constant(0.05));
    fetcher.insert(&locator(scene, BandId::Scl), constant(4.0));
}

/// Constant UTM 33N tile, 20 m pixels over easting 495-505 km, northing 5535-5545 km
pub fn utm_constant(value: f32) -> MemoryRaster {
    let transform = GeoTransform {
        top_left_x: 495_000.0,
        pixel_width: 20.0,
        rotation_x: 0.0,
        top_left_y: 5_545_000.0,
        rotation_y: 0.0,
        pixel_height: -20.0,
    };
    MemoryRaster::new(32633, transform, Array2::from_elem((500, 500), value))
}

/// Square municipality over lon 14.97-15.03, lat 49.98-50.02, inside the UTM tiles
pub fn meridian_city() -> CityRecord {
    CityRecord::new("Meridianstadt", "Czechia").with_polygon(json!({
        "type": "Polygon",
        "coordinates": [[
            [14.97, 49.98], [15.03, 49.98], [15.03, 50.02], [14.97, 50.02], [14.97, 49.98]
        ]]
    }))
}

/// Square municipality over lon 10.05-10.15, lat 50.05-50.15
pub fn square_city() -> CityRecord {
    CityRecord::new("Testburg", "Germany").with_polygon(json!({
        "type": "Polygon",
        "coordinates": [[
            [10.05, 50.05], [10.15, 50.05], [10.15, 50.15], [10.05, 50.15], [10.05, 50.05]
        ]]
    }))
}

/// Right triangle filling the lower-left half of the same envelope
pub fn triangle_city() -> CityRecord {
    CityRecord::new("Dreieck", "Germany").with_polygon(json!({
        "type": "Polygon",
        "coordinates": [[
            [10.05, 50.05], [10.15, 50.05], [10.05, 50.15], [10.05, 50.05]
        ]]
    }))
}

/// 40x40 output grid, 0.0025 degree pixels over the city envelope
pub fn small_config() -> ProcessingConfig {
    ProcessingConfig {
        target_width: 40,
        target_height: 40,
        band_workers: 2,
        ..ProcessingConfig::default()
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
