/*!
 * Geo-indexing and resumable batch processing for GOES-R fixed grid files.
 *
 * The geo-indexer maps latitude-longitude boxes to pixel windows in the satellite's fixed grid,
 * caches those mappings per grid configuration, and splits large areas into overlapping tiles.
 * The batch scheduler walks ranges of days, hands every time instant of satellite files to a
 * processing function, and keeps a checkpoint log so an interrupted run resumes where it left off.
 */
pub use archive::{
    hour_directory, parse_scan_start, BandFile, BlobLookup, FileRef, GridDataset, Grouping,
    LocalArchive,
};
pub use catalog::{
    regions_from_json, regions_to_json, tiles_from_json, tiles_to_json, RegionCache,
    RegionCatalog, RegionSet,
};
pub use error::{GoesGridError, GoesGridResult};
pub use geo::GeoBox;
pub use grid::{
    GridKey, IndexWindow, LatLonGrid, MajorOrder, ProjectionGrid, SweepAxis, PROJECTION_VARIABLE,
};
#[cfg(feature = "netcdf")]
pub use netcdf::NetCdfDataset;
pub use resolver::{resolve, resolve_for_grid, ResolvedRegion};
pub use satellite::{Band, Product, ProductBand, Satellite};
pub use scheduler::{
    BatchScheduler, CancelToken, CheckpointLog, DateRange, DayFailure, DayReport, HourRange,
    RangeOutcome, RangeReport, WorkUnit,
};
pub use storage::{BlobStorage, LocalStorage, MemoryStorage};
pub use tiles::{Tile, TileSet};

/**************************************************************************************************
 * Private Implementation
 *************************************************************************************************/
mod archive;
mod catalog;
mod error;
mod geo;
mod grid;
#[cfg(feature = "netcdf")]
mod netcdf;
mod resolver;
mod satellite;
mod scheduler;
mod storage;
mod tiles;
