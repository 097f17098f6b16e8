//! I/O modules for catalogs, rasters and result artifacts

pub mod catalog;
pub mod city;
pub mod output;
pub mod raster;
pub mod render;

pub use catalog::{CatalogSearcher, DateRange, ImageryCatalog, StacCatalog};
pub use city::{BoundsResolver, CityPolygon, CityRecord, ResolvedCity};
pub use output::{ResultEmitter, VegetationSummary};
pub use raster::{AssetFetcher, GdalFetcher, MemoryFetcher, MemoryRaster, RasterSource};
