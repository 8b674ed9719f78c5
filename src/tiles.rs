/*!
 * Partition a large area into a grid of smaller, overlapping tiles.
 */
use crate::{
    geo::GeoBox,
    grid::{IndexWindow, LatLonGrid},
    resolver, GoesGridError, GoesGridResult,
};
use std::fmt::{self, Display};

/// A named piece of a larger area, optionally resolved against a grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tile {
    /// Position of the tile counting north from the southern edge of the parent area.
    pub lat_index: usize,
    /// Position of the tile counting east from the western edge of the parent area.
    pub lon_index: usize,
    pub area: GeoBox,
    pub window: Option<IndexWindow>,
}

impl Tile {
    /// The key used for this tile in persisted catalogs, e.g. `(2, 0)`.
    pub fn key(&self) -> String {
        tile_key(self.lat_index, self.lon_index)
    }
}

pub(crate) fn tile_key(lat_index: usize, lon_index: usize) -> String {
    format!("({}, {})", lat_index, lon_index)
}

/// Parse a key of the form `(lat_index, lon_index)`.
pub(crate) fn parse_tile_key(key: &str) -> GoesGridResult<(usize, usize)> {
    let bad_key = || GoesGridError::Config(format!("invalid tile key: {}", key));

    let inner = key
        .trim()
        .strip_prefix('(')
        .and_then(|k| k.strip_suffix(')'))
        .ok_or_else(bad_key)?;

    let mut parts = inner.split(',');
    let lat_index = parts
        .next()
        .and_then(|p| p.trim().parse().ok())
        .ok_or_else(bad_key)?;
    let lon_index = parts
        .next()
        .and_then(|p| p.trim().parse().ok())
        .ok_or_else(bad_key)?;

    if parts.next().is_some() {
        return Err(bad_key());
    }

    Ok((lat_index, lon_index))
}

/**
 * A collection of tiles covering a parent area.
 *
 * Tiles are kept in generation order: longitude index in the outer loop, latitude index in the
 * inner loop.
 */
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TileSet {
    tiles: Vec<Tile>,
}

impl TileSet {
    /**
     * Generate the tiles for `area`.
     *
     * Base tiles are `lat_step` by `lon_step` degrees, starting at the south-west corner. The
     * last row and column may stick out past the north and east edges when the steps do not
     * divide the area evenly. Every base tile is then grown by the overlaps on every side.
     */
    pub fn generate(
        area: &GeoBox,
        lat_step: f64,
        lon_step: f64,
        lat_overlap: f64,
        lon_overlap: f64,
    ) -> GoesGridResult<Self> {
        if !(lat_step > 0.0) || !(lon_step > 0.0) {
            return Err(GoesGridError::Config(format!(
                "tile steps must be positive: lat_step={} lon_step={}",
                lat_step, lon_step
            )));
        }

        if !(lat_overlap >= 0.0) || !(lon_overlap >= 0.0) {
            return Err(GoesGridError::Config(format!(
                "tile overlaps must not be negative: lat_overlap={} lon_overlap={}",
                lat_overlap, lon_overlap
            )));
        }

        let num_lats = sample_count(area.south(), area.north(), lat_step);
        let num_lons = sample_count(area.west(), area.east(), lon_step);
        if num_lats * num_lons > MAX_TILES {
            return Err(GoesGridError::Config(format!(
                "{} x {} tiles is more than the limit of {}: lat_step={} lon_step={}",
                num_lats, num_lons, MAX_TILES, lat_step, lon_step
            )));
        }

        let lats = samples(area.south(), lat_step, num_lats as usize);
        let lons = samples(area.west(), lon_step, num_lons as usize);

        let mut tiles = Vec::with_capacity(lats.len() * lons.len());
        for (lon_index, &lon) in lons.iter().enumerate() {
            for (lat_index, &lat) in lats.iter().enumerate() {
                let base = GeoBox::new(lat, lat + lat_step, lon, lon + lon_step)?;
                tiles.push(Tile {
                    lat_index,
                    lon_index,
                    area: base.expand(lat_overlap, lon_overlap)?,
                    window: None,
                });
            }
        }

        Ok(TileSet { tiles })
    }

    /// Build a set from already existing tiles, putting them in generation order.
    pub fn from_tiles(mut tiles: Vec<Tile>) -> Self {
        tiles.sort_by_key(|t| (t.lon_index, t.lat_index));
        TileSet { tiles }
    }

    /// Attach to every tile the pixel window covering it in `coords`.
    pub fn resolve_windows(&mut self, coords: &LatLonGrid) -> GoesGridResult<()> {
        for tile in self.tiles.iter_mut() {
            let window = resolver::resolve(&tile.area, coords).map_err(|err| match err {
                GoesGridError::OutsideCoverage(msg) => {
                    GoesGridError::OutsideCoverage(format!("tile {}: {}", tile.key(), msg))
                }
                other => other,
            })?;
            tile.window = Some(window);
        }

        Ok(())
    }

    pub fn get(&self, lat_index: usize, lon_index: usize) -> Option<&Tile> {
        self.tiles
            .iter()
            .find(|t| t.lat_index == lat_index && t.lon_index == lon_index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.iter()
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

impl Display for TileSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for tile in &self.tiles {
            write!(f, "{:>8} {}", tile.key(), tile.area)?;
            if let Some(window) = tile.window {
                write!(f, " {}", window)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Most tiles a single set may hold.
const MAX_TILES: f64 = 1.0e6;

/// How many of `start, start + step, ...` are strictly less than `stop`.
fn sample_count(start: f64, stop: f64, step: f64) -> f64 {
    ((stop - start) / step).ceil().max(0.0)
}

fn samples(start: f64, step: f64, count: usize) -> Vec<f64> {
    (0..count).map(|i| start + i as f64 * step).collect()
}
