/*!
 * Find the pixel window in a fixed grid that covers a geographic box.
 *
 * Each corner of the box is matched with the grid cell nearest to it, measured as squared
 * planar distance in degrees. The search is brute force over the whole grid. That is slow for a
 * full disk, but it only happens once per distinct grid configuration and the result is cached.
 */
use crate::{
    geo::GeoBox,
    grid::{GridKey, IndexWindow, LatLonGrid, ProjectionGrid},
    GoesGridError, GoesGridResult,
};
use log::info;
use serde::{Deserialize, Serialize};

/**
 * The resolved mapping from a geographic box to a pixel window for one grid configuration.
 *
 * These are created once per distinct [GridKey](crate::GridKey) and never mutated afterwards.
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRegion {
    #[serde(rename = "sat_band_key")]
    grid_key: GridKey,
    #[serde(rename = "lan_lot_area")]
    area: GeoBox,
    #[serde(rename = "indexes")]
    window: IndexWindow,
}

impl ResolvedRegion {
    pub fn new(grid_key: GridKey, area: GeoBox, window: IndexWindow) -> Self {
        ResolvedRegion {
            grid_key,
            area,
            window,
        }
    }

    pub fn grid_key(&self) -> &GridKey {
        &self.grid_key
    }

    pub fn area(&self) -> &GeoBox {
        &self.area
    }

    pub fn window(&self) -> &IndexWindow {
        &self.window
    }
}

/**
 * Find the window of cells covering `area`.
 *
 * The corners are matched to their nearest cells, and the window is the min/max of the
 * matched columns (`x`) and rows (`y`). Ties go to the first cell in flattened storage order.
 *
 * If a corner's nearest cell is farther away than the local grid spacing, the corner is not on
 * the grid and this is an error rather than a meaningless window.
 */
pub fn resolve(area: &GeoBox, coords: &LatLonGrid) -> GoesGridResult<IndexWindow> {
    let mut window: Option<IndexWindow> = None;

    for (lat, lon) in area.corners() {
        let (row, col) = nearest_cell(lat, lon, coords).ok_or_else(|| {
            GoesGridError::OutsideCoverage(format!("no grid cell sees ({}, {})", lat, lon))
        })?;

        check_within_spacing(lat, lon, row, col, coords)?;

        window = Some(match window {
            None => IndexWindow {
                x_min: col,
                x_max: col,
                y_min: row,
                y_max: row,
            },
            Some(w) => IndexWindow {
                x_min: w.x_min.min(col),
                x_max: w.x_max.max(col),
                y_min: w.y_min.min(row),
                y_max: w.y_max.max(row),
            },
        });
    }

    // A GeoBox always has four corners.
    window.ok_or_else(|| GoesGridError::OutsideCoverage(format!("empty area {}", area)))
}

/// Compute the coordinates of the whole grid and resolve `area` against them.
pub fn resolve_for_grid(grid: &ProjectionGrid, area: &GeoBox) -> GoesGridResult<ResolvedRegion> {
    let coords = grid.coordinates_for(None)?;
    let window = resolve(area, &coords).map_err(|err| match err {
        GoesGridError::OutsideCoverage(msg) => {
            GoesGridError::OutsideCoverage(format!("grid {}: {}", grid.key(), msg))
        }
        other => other,
    })?;

    info!(target: "goesgrid::resolver", "{} -> {} for grid {}", area, window, grid.key());

    Ok(ResolvedRegion::new(*grid.key(), *area, window))
}

/// Index (row, col) of the cell nearest to (lat, lon), or `None` if no cell has coordinates.
fn nearest_cell(lat: f64, lon: f64, coords: &LatLonGrid) -> Option<(usize, usize)> {
    let mut best: Option<(usize, f64)> = None;

    for (idx, (&clat, &clon)) in coords.lats().iter().zip(coords.lons()).enumerate() {
        let dist = squared_distance(lat, lon, clat, clon);

        // NaN never compares less, so off-disk cells are never picked.
        match best {
            Some((_, best_dist)) if !(dist < best_dist) => {}
            None if dist.is_nan() => {}
            _ => best = Some((idx, dist)),
        }
    }

    best.map(|(idx, _)| coords.unravel(idx))
}

fn check_within_spacing(
    lat: f64,
    lon: f64,
    row: usize,
    col: usize,
    coords: &LatLonGrid,
) -> GoesGridResult<()> {
    let (clat, clon) = coords.at(row, col);
    let dist = squared_distance(lat, lon, clat, clon).sqrt();

    let mut spacing: f64 = 0.0;
    let neighbors = [
        (row.checked_sub(1), Some(col)),
        (Some(row + 1), Some(col)),
        (Some(row), col.checked_sub(1)),
        (Some(row), Some(col + 1)),
    ];
    for (nrow, ncol) in neighbors {
        if let (Some(nrow), Some(ncol)) = (nrow, ncol) {
            if nrow < coords.rows() && ncol < coords.cols() {
                let (nlat, nlon) = coords.at(nrow, ncol);
                let step = squared_distance(clat, clon, nlat, nlon).sqrt();
                if step.is_finite() {
                    spacing = spacing.max(step);
                }
            }
        }
    }

    // With a single cell there is no spacing to go by, so only an exact hit counts.
    if dist <= spacing || dist == 0.0 {
        Ok(())
    } else {
        Err(GoesGridError::OutsideCoverage(format!(
            "nearest cell (row {}, col {}) at ({:.4}, {:.4}) is {:.4} degrees from ({}, {}), \
             grid spacing is {:.4}",
            row, col, clat, clon, dist, lat, lon, spacing
        )))
    }
}

#[inline]
fn squared_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    (lat1 - lat2) * (lat1 - lat2) + (lon1 - lon2) * (lon1 - lon2)
}
