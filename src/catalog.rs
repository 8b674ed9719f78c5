/*!
 * Persisting resolved regions and tiles, and the in-process cache of resolved regions.
 *
 * The persisted form is JSON. Resolved regions are keyed by the canonical string of their
 * [GridKey], tiles by their `(lat_index, lon_index)` pair. Both formats are shared with other
 * tools, so field names are fixed.
 */
use crate::{
    archive::{BlobLookup, GridDataset},
    geo::GeoBox,
    grid::{GridKey, IndexWindow, ProjectionGrid},
    resolver::{self, ResolvedRegion},
    satellite::ProductBand,
    storage::{parent_path, BlobStorage},
    tiles::{parse_tile_key, Tile, TileSet},
    GoesGridError, GoesGridResult,
};
use chrono::NaiveDate;
use log::{debug, info, warn};
use once_cell::sync::OnceCell;
use rustc_hash::FxHashMap as HashMap;
use serde::{ser::SerializeMap, Deserialize, Serialize, Serializer};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
    thread,
};

/*-------------------------------------------------------------------------------------------------
 *                                        Region Sets
 *-----------------------------------------------------------------------------------------------*/

/// A collection of resolved regions keyed by the canonical form of their grid key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionSet {
    regions: BTreeMap<String, ResolvedRegion>,
}

impl RegionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a region, replacing any region already stored for the same grid.
    pub fn insert(&mut self, region: ResolvedRegion) -> Option<ResolvedRegion> {
        self.regions.insert(region.grid_key().canonical(), region)
    }

    pub fn get(&self, key: &GridKey) -> Option<&ResolvedRegion> {
        self.regions.get(&key.canonical())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResolvedRegion> {
        self.regions.values()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

impl FromIterator<ResolvedRegion> for RegionSet {
    fn from_iter<I: IntoIterator<Item = ResolvedRegion>>(iter: I) -> Self {
        let mut set = RegionSet::new();
        for region in iter {
            set.insert(region);
        }
        set
    }
}

/// Serialize a region set as pretty printed JSON.
pub fn regions_to_json(regions: &RegionSet) -> GoesGridResult<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(&regions.regions)?)
}

/**
 * Parse a region set.
 *
 * Entries are keyed again by the canonical form of the grid key found inside them. A stored key
 * that disagrees with it is only warned about, older tools formatted the numbers differently.
 */
pub fn regions_from_json(bytes: &[u8]) -> GoesGridResult<RegionSet> {
    let raw: BTreeMap<String, ResolvedRegion> = serde_json::from_slice(bytes)?;

    let mut set = RegionSet::new();
    for (key, region) in raw {
        let canonical = region.grid_key().canonical();
        if key != canonical {
            warn!(
                target: "goesgrid::catalog",
                "region stored as {} has grid key {}",
                key,
                canonical
            );
        }
        set.insert(region);
    }

    Ok(set)
}

/*-------------------------------------------------------------------------------------------------
 *                                          Tiles
 *-----------------------------------------------------------------------------------------------*/

/// One tile as stored on disk. The window fields are absent until the tile is resolved.
#[derive(Debug, Serialize, Deserialize)]
struct TileRecord {
    lat_south: f64,
    lat_north: f64,
    lon_west: f64,
    lon_east: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    x_min: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    x_max: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    y_min: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    y_max: Option<usize>,
}

impl From<&Tile> for TileRecord {
    fn from(tile: &Tile) -> Self {
        TileRecord {
            lat_south: tile.area.south(),
            lat_north: tile.area.north(),
            lon_west: tile.area.west(),
            lon_east: tile.area.east(),
            x_min: tile.window.map(|w| w.x_min),
            x_max: tile.window.map(|w| w.x_max),
            y_min: tile.window.map(|w| w.y_min),
            y_max: tile.window.map(|w| w.y_max),
        }
    }
}

impl TileRecord {
    fn into_tile(self, key: &str) -> GoesGridResult<Tile> {
        let (lat_index, lon_index) = parse_tile_key(key)?;
        let area = GeoBox::new(self.lat_south, self.lat_north, self.lon_west, self.lon_east)?;

        let window = match (self.x_min, self.x_max, self.y_min, self.y_max) {
            (Some(x_min), Some(x_max), Some(y_min), Some(y_max)) => Some(IndexWindow {
                x_min,
                x_max,
                y_min,
                y_max,
            }),
            (None, None, None, None) => None,
            _ => {
                return Err(GoesGridError::Config(format!(
                    "tile {} has a partial index window",
                    key
                )))
            }
        };

        Ok(Tile {
            lat_index,
            lon_index,
            area,
            window,
        })
    }
}

/// Serializes the tiles as a map in generation order.
struct OrderedTiles<'a>(&'a TileSet);

impl<'a> Serialize for OrderedTiles<'a> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for tile in self.0.iter() {
            map.serialize_entry(&tile.key(), &TileRecord::from(tile))?;
        }
        map.end()
    }
}

/// Serialize a tile set as pretty printed JSON.
pub fn tiles_to_json(tiles: &TileSet) -> GoesGridResult<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(&OrderedTiles(tiles))?)
}

/// Parse a tile set.
pub fn tiles_from_json(bytes: &[u8]) -> GoesGridResult<TileSet> {
    let raw: BTreeMap<String, TileRecord> = serde_json::from_slice(bytes)?;

    let tiles = raw
        .into_iter()
        .map(|(key, record)| record.into_tile(&key))
        .collect::<GoesGridResult<Vec<_>>>()?;

    Ok(TileSet::from_tiles(tiles))
}

/*-------------------------------------------------------------------------------------------------
 *                                         Catalog
 *-----------------------------------------------------------------------------------------------*/

/// Reads and writes region and tile collections through a blob store.
#[derive(Clone)]
pub struct RegionCatalog {
    storage: Arc<dyn BlobStorage>,
}

impl RegionCatalog {
    pub fn new(storage: Arc<dyn BlobStorage>) -> Self {
        RegionCatalog { storage }
    }

    pub fn save_regions(&self, regions: &RegionSet, path: &str) -> GoesGridResult<()> {
        let bytes = regions_to_json(regions)?;
        self.upload(&bytes, path)?;
        info!(target: "goesgrid::catalog", "saved {} regions to {}", regions.len(), path);
        Ok(())
    }

    pub fn load_regions(&self, path: &str) -> GoesGridResult<RegionSet> {
        let bytes = self.storage.download_bytes(path)?;
        regions_from_json(&bytes)
    }

    pub fn save_tiles(&self, tiles: &TileSet, path: &str) -> GoesGridResult<()> {
        let bytes = tiles_to_json(tiles)?;
        self.upload(&bytes, path)?;
        info!(target: "goesgrid::catalog", "saved {} tiles to {}", tiles.len(), path);
        Ok(())
    }

    pub fn load_tiles(&self, path: &str) -> GoesGridResult<TileSet> {
        let bytes = self.storage.download_bytes(path)?;
        tiles_from_json(&bytes)
    }

    fn upload(&self, bytes: &[u8], path: &str) -> GoesGridResult<()> {
        if let Some(parent) = parent_path(path) {
            self.storage.mkdir(parent)?;
        }
        self.storage.upload_bytes(bytes, path)
    }
}

/*-------------------------------------------------------------------------------------------------
 *                                       Region Cache
 *-----------------------------------------------------------------------------------------------*/

/**
 * Lazily resolved regions for one geographic area, one per grid configuration.
 *
 * The first lookup of a grid key runs the expensive resolution, concurrent lookups of the same
 * key wait for it instead of repeating it. Failures are not cached, the next lookup tries again.
 */
#[derive(Debug)]
pub struct RegionCache {
    area: GeoBox,
    entries: Mutex<HashMap<String, Arc<OnceCell<ResolvedRegion>>>>,
}

impl RegionCache {
    pub fn new(area: GeoBox) -> Self {
        RegionCache {
            area,
            entries: Mutex::new(HashMap::default()),
        }
    }

    /// Start from previously saved regions. Regions for a different area are ignored.
    pub fn with_regions(area: GeoBox, regions: &RegionSet) -> Self {
        let cache = Self::new(area);
        if let Ok(mut entries) = cache.entries.lock() {
            for region in regions.iter() {
                if *region.area() != area {
                    warn!(
                        target: "goesgrid::catalog",
                        "ignoring region for {} resolved for area {}",
                        region.grid_key(),
                        region.area()
                    );
                    continue;
                }
                entries.insert(
                    region.grid_key().canonical(),
                    Arc::new(OnceCell::with_value(region.clone())),
                );
            }
        }
        cache
    }

    pub fn area(&self) -> &GeoBox {
        &self.area
    }

    /// The region for `key` if it has already been resolved.
    pub fn get(&self, key: &GridKey) -> Option<ResolvedRegion> {
        let entries = self.entries.lock().ok()?;
        let region = entries
            .get(&key.canonical())
            .and_then(|cell| cell.get())
            .cloned();
        region
    }

    /**
     * The region for `key`, resolving it if this is the first time the grid is seen.
     *
     * `load_grid` is only called on a miss. The grid it returns must have the requested key.
     */
    pub fn get_or_resolve<F>(&self, key: &GridKey, load_grid: F) -> GoesGridResult<ResolvedRegion>
    where
        F: FnOnce() -> GoesGridResult<ProjectionGrid>,
    {
        let cell = {
            let mut entries = self
                .entries
                .lock()
                .map_err(|_| GoesGridError::Pool("region cache lock poisoned".to_owned()))?;
            Arc::clone(entries.entry(key.canonical()).or_default())
        };

        if let Some(region) = cell.get() {
            debug!(target: "goesgrid::catalog", "cache hit for {}", key);
            return Ok(region.clone());
        }

        let region = cell.get_or_try_init(|| {
            let grid = load_grid()?;
            if grid.key() != key {
                return Err(GoesGridError::MalformedGrid(format!(
                    "expected grid {} but loaded {}",
                    key,
                    grid.key()
                )));
            }
            resolver::resolve_for_grid(&grid, &self.area)
        })?;

        Ok(region.clone())
    }

    /// The region for the grid a dataset is on. The axis arrays are only read on a miss.
    pub fn region_for_dataset(&self, dataset: &dyn GridDataset) -> GoesGridResult<ResolvedRegion> {
        let key = GridKey::from_dataset(dataset)?;
        self.get_or_resolve(&key, || ProjectionGrid::from_dataset(dataset))
    }

    /// Copy of every region resolved so far.
    pub fn snapshot(&self) -> RegionSet {
        match self.entries.lock() {
            Ok(entries) => entries.values().filter_map(|cell| cell.get().cloned()).collect(),
            Err(_) => RegionSet::new(),
        }
    }

    /**
     * Resolve the area for every band, using the first file of each band in `hour` of `date`.
     *
     * Bands are spread over up to `workers` threads. Bands that share a grid are only resolved
     * once. Returns every region in the cache afterwards.
     */
    pub fn populate(
        &self,
        lookup: &dyn BlobLookup,
        bands: &[ProductBand],
        date: NaiveDate,
        hour: u32,
        workers: usize,
    ) -> GoesGridResult<RegionSet> {
        let (band_tx, band_rx) = crossbeam_channel::unbounded::<ProductBand>();
        for &band in bands {
            band_tx
                .send(band)
                .map_err(|e| GoesGridError::Pool(e.to_string()))?;
        }
        drop(band_tx);

        let num_threads = workers.max(1).min(bands.len());

        let results: Vec<GoesGridResult<()>> = thread::scope(|s| {
            let mut handles = Vec::with_capacity(num_threads);
            for i in 0..num_threads {
                let band_rx = band_rx.clone();
                let handle = thread::Builder::new()
                    .name(format!("populate-{}", i))
                    .spawn_scoped(s, move || -> GoesGridResult<()> {
                        for band in band_rx {
                            self.populate_band(lookup, band, date, hour)?;
                        }
                        Ok(())
                    })
                    .map_err(|e| GoesGridError::Pool(e.to_string()));
                handles.push(handle);
            }

            handles
                .into_iter()
                .map(|handle| -> GoesGridResult<()> {
                    handle?.join().map_err(|_| {
                        GoesGridError::Pool("populate thread panicked".to_owned())
                    })?
                })
                .collect()
        });

        for res in results {
            res?;
        }

        Ok(self.snapshot())
    }

    fn populate_band(
        &self,
        lookup: &dyn BlobLookup,
        band: ProductBand,
        date: NaiveDate,
        hour: u32,
    ) -> GoesGridResult<()> {
        let groupings = lookup.grouped_blobs_for_day(date, &[hour], &[band])?;
        let file = groupings
            .iter()
            .find_map(|g| g.file_for(band))
            .ok_or_else(|| {
                GoesGridError::Lookup(format!("no {} files for {} hour {}", band, date, hour))
            })?;

        let dataset = lookup.open_dataset(file)?;
        let region = self.region_for_dataset(dataset.as_ref()).map_err(|err| match err {
            GoesGridError::OutsideCoverage(msg) => {
                GoesGridError::OutsideCoverage(format!("{}: {}", band, msg))
            }
            other => other,
        })?;

        info!(
            target: "goesgrid::catalog",
            "{} is on grid {} window {}",
            band,
            region.grid_key(),
            region.window()
        );
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{grid::SweepAxis, storage::MemoryStorage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(x_size: usize) -> GridKey {
        GridKey {
            height: 35_786_023.0,
            origin_longitude: -75.2,
            sweep: SweepAxis::X,
            x_size,
            y_size: x_size,
        }
    }

    /// A small grid straddling the sub-satellite point.
    fn grid(size: usize) -> ProjectionGrid {
        let step = 0.0004;
        let half = (size as f64 - 1.0) / 2.0;
        let x: Vec<f64> = (0..size).map(|i| (i as f64 - half) * step).collect();
        let y: Vec<f64> = (0..size).map(|i| (half - i as f64) * step).collect();
        ProjectionGrid::new(key(size), x, y).unwrap()
    }

    fn sample_regions() -> RegionSet {
        let area = GeoBox::new(-45.25, -40.125, -75.5, -70.000001).unwrap();
        let window = IndexWindow {
            x_min: 120,
            x_max: 431,
            y_min: 7,
            y_max: 999,
        };
        vec![
            ResolvedRegion::new(key(5424), area, window),
            ResolvedRegion::new(key(21696), area, window),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_regions_round_trip() {
        let regions = sample_regions();
        let bytes = regions_to_json(&regions).unwrap();
        assert_eq!(regions_from_json(&bytes).unwrap(), regions);
    }

    /// Uniform values in `[lo, hi)` from a fixed xorshift sequence.
    struct Sampler(u64);

    impl Sampler {
        fn next(&mut self, lo: f64, hi: f64) -> f64 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 17;
            let unit = (self.0 >> 11) as f64 / (1u64 << 53) as f64;
            lo + unit * (hi - lo)
        }

        fn geo_box(&mut self) -> GeoBox {
            let south = self.next(-80.0, 70.0);
            let north = south + self.next(0.001, 10.0);
            let west = self.next(-180.0, 170.0);
            let east = west + self.next(0.001, 10.0);
            GeoBox::new(south, north, west, east).unwrap()
        }
    }

    #[test]
    fn test_arbitrary_floats_survive_round_trip() {
        let mut sampler = Sampler(0x9E37_79B9_7F4A_7C15);
        let window = IndexWindow {
            x_min: 1,
            x_max: 2,
            y_min: 3,
            y_max: 4,
        };

        let regions: RegionSet = (0..2000)
            .map(|_| {
                let key = GridKey {
                    height: sampler.next(35_700_000.0, 35_800_000.0),
                    origin_longitude: sampler.next(-180.0, 180.0),
                    sweep: SweepAxis::X,
                    x_size: 5424,
                    y_size: 5424,
                };
                ResolvedRegion::new(key, sampler.geo_box(), window)
            })
            .collect();
        assert_eq!(regions.len(), 2000);

        let bytes = regions_to_json(&regions).unwrap();
        let loaded = regions_from_json(&bytes).unwrap();
        for region in regions.iter() {
            let back = loaded.get(region.grid_key()).unwrap();
            assert_eq!(back.area().north().to_bits(), region.area().north().to_bits());
            assert_eq!(back.area().west().to_bits(), region.area().west().to_bits());
        }
        assert_eq!(loaded, regions);

        let tiles = TileSet::from_tiles(
            (0..2000)
                .map(|i| Tile {
                    lat_index: i % 50,
                    lon_index: i / 50,
                    area: sampler.geo_box(),
                    window: None,
                })
                .collect(),
        );
        let bytes = tiles_to_json(&tiles).unwrap();
        assert_eq!(tiles_from_json(&bytes).unwrap(), tiles);
    }

    #[test]
    fn test_regions_json_layout() {
        let json = r#"{
          "35786023.0#-75.2#x#5424#5424": {
            "sat_band_key": {
              "sat_height": 35786023.0,
              "sat_lon": -75.2,
              "sat_sweep": "x",
              "x_size": 5424,
              "y_size": 5424
            },
            "lan_lot_area": {
              "lat_south": -45.25,
              "lat_north": -40.125,
              "lon_west": -75.5,
              "lon_east": -70.000001
            },
            "indexes": {
              "x_min": 120,
              "x_max": 431,
              "y_min": 7,
              "y_max": 999
            }
          }
        }"#;

        let regions = regions_from_json(json.as_bytes()).unwrap();
        assert_eq!(regions.len(), 1);
        let region = regions.get(&key(5424)).unwrap();
        assert_eq!(region.window().y_max, 999);
        assert_eq!(region.area().east(), -70.000001);

        let value: serde_json::Value =
            serde_json::from_slice(&regions_to_json(&regions).unwrap()).unwrap();
        assert_eq!(
            value["35786023.0#-75.2#x#5424#5424"]["sat_band_key"]["sat_sweep"],
            "x"
        );
    }

    #[test]
    fn test_tiles_round_trip_with_windows() {
        let area = GeoBox::new(-43.5, -33.25, -75.0, -70.0).unwrap();
        let unresolved = TileSet::generate(&area, 5.0, 2.5, 0.5, 0.75).unwrap();

        let bytes = tiles_to_json(&unresolved).unwrap();
        assert!(!String::from_utf8_lossy(&bytes).contains("x_min"));
        assert_eq!(tiles_from_json(&bytes).unwrap(), unresolved);

        let resolved: Vec<Tile> = unresolved
            .iter()
            .map(|t| Tile {
                window: Some(IndexWindow {
                    x_min: t.lon_index,
                    x_max: t.lon_index + 3,
                    y_min: t.lat_index,
                    y_max: t.lat_index + 2,
                }),
                ..*t
            })
            .collect();
        let resolved = TileSet::from_tiles(resolved);

        let bytes = tiles_to_json(&resolved).unwrap();
        assert_eq!(tiles_from_json(&bytes).unwrap(), resolved);
    }

    #[test]
    fn test_tiles_accept_null_windows() {
        let json = r#"{
            "(1, 0)": {"lat_south": 1.0, "lat_north": 2.0, "lon_west": 0.0, "lon_east": 1.0,
                       "x_min": null, "x_max": null, "y_min": null, "y_max": null},
            "(0, 0)": {"lat_south": 0.0, "lat_north": 1.0, "lon_west": 0.0, "lon_east": 1.0}
        }"#;

        let tiles = tiles_from_json(json.as_bytes()).unwrap();
        let keys: Vec<_> = tiles.iter().map(|t| t.key()).collect();
        assert_eq!(keys, ["(0, 0)", "(1, 0)"]);
        assert!(tiles.iter().all(|t| t.window.is_none()));

        let partial = r#"{"(0, 0)": {"lat_south": 0.0, "lat_north": 1.0, "lon_west": 0.0,
                                    "lon_east": 1.0, "x_min": 3}}"#;
        assert!(tiles_from_json(partial.as_bytes()).is_err());
    }

    #[test]
    fn test_catalog_through_storage() {
        let storage = Arc::new(MemoryStorage::new());
        let catalog = RegionCatalog::new(storage.clone());

        let regions = sample_regions();
        catalog.save_regions(&regions, "areas/patagonia.json").unwrap();
        assert_eq!(storage.list("areas").unwrap(), vec!["patagonia.json"]);
        assert_eq!(catalog.load_regions("areas/patagonia.json").unwrap(), regions);

        let err = catalog.load_tiles("areas/missing.json").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_cache_resolves_once_per_key() {
        let area = GeoBox::new(-0.3, 0.3, -75.5, -74.9).unwrap();
        let cache = RegionCache::new(area);
        let loads = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    let region = cache
                        .get_or_resolve(&key(41), || {
                            loads.fetch_add(1, Ordering::SeqCst);
                            Ok(grid(41))
                        })
                        .unwrap();
                    assert_eq!(region.grid_key(), &key(41));
                });
            }
        });

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.snapshot().len(), 1);
        assert!(cache.get(&key(41)).is_some());
    }

    #[test]
    fn test_cache_does_not_keep_failures() {
        let area = GeoBox::new(-0.3, 0.3, -75.5, -74.9).unwrap();
        let cache = RegionCache::new(area);

        let err = cache
            .get_or_resolve(&key(41), || {
                Err(GoesGridError::MalformedGrid("no x".to_owned()))
            })
            .unwrap_err();
        assert!(matches!(err, GoesGridError::MalformedGrid(_)));
        assert!(cache.get(&key(41)).is_none());

        // A grid with a different key than requested is refused.
        assert!(cache.get_or_resolve(&key(41), || Ok(grid(5))).is_err());

        assert!(cache.get_or_resolve(&key(41), || Ok(grid(41))).is_ok());
        assert!(cache.get(&key(41)).is_some());
    }

    #[test]
    fn test_cache_seeded_from_regions() {
        let regions = sample_regions();
        let area = *regions.iter().next().unwrap().area();
        let cache = RegionCache::with_regions(area, &regions);

        let region = cache
            .get_or_resolve(&key(5424), || panic!("should not load a seeded grid"))
            .unwrap();
        assert_eq!(region.window().x_min, 120);
        assert_eq!(cache.snapshot(), regions);

        let other = GeoBox::new(0.0, 1.0, 0.0, 1.0).unwrap();
        assert!(RegionCache::with_regions(other, &regions).snapshot().is_empty());
    }
}
