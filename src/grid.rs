/*!
 * The GOES-R fixed grid and the inverse geostationary projection.
 *
 * A fixed grid is described by the scan angles of its columns (`x`) and rows (`y`) along with the
 * satellite position. Multiplying the scan angles by the satellite height gives the projected
 * coordinates, and the inverse projection takes those to latitude and longitude.
 */
use crate::{archive::GridDataset, GoesGridError, GoesGridResult};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use strum::{Display as StrumDisplay, EnumString, IntoStaticStr};

/// Name of the variable holding the projection attributes in GOES-R files.
pub const PROJECTION_VARIABLE: &str = "goes_imager_projection";

/// Semi-major axis of the GRS80 ellipsoid in meters.
const GRS80_SEMI_MAJOR: f64 = 6_378_137.0;
/// Inverse flattening of the GRS80 ellipsoid.
const GRS80_INV_FLATTENING: f64 = 298.257_222_101;

/** The axis the scan mirror sweeps along. GOES-R uses `x`, Meteosat and Himawari use `y`. */
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString, IntoStaticStr, Serialize,
    Deserialize,
)]
pub enum SweepAxis {
    #[strum(serialize = "x")]
    #[serde(rename = "x")]
    X,
    #[strum(serialize = "y")]
    #[serde(rename = "y")]
    Y,
}

/**
 * Identifies one distinct fixed grid configuration: the satellite position plus the resolution.
 *
 * Two grids with identical keys are interchangeable regardless of which file they came from, so
 * this is what resolved regions are cached by.
 */
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridKey {
    /// Perspective point height of the satellite above the ellipsoid in meters.
    #[serde(rename = "sat_height")]
    pub height: f64,
    /// Longitude of the sub-satellite point in degrees.
    #[serde(rename = "sat_lon")]
    pub origin_longitude: f64,
    #[serde(rename = "sat_sweep")]
    pub sweep: SweepAxis,
    pub x_size: usize,
    pub y_size: usize,
}

impl GridKey {
    /// Read the key from the projection metadata and dimensions of a dataset.
    pub fn from_dataset(dataset: &dyn GridDataset) -> GoesGridResult<Self> {
        let height = dataset.attribute_f64(PROJECTION_VARIABLE, "perspective_point_height")?;
        let origin_longitude =
            dataset.attribute_f64(PROJECTION_VARIABLE, "longitude_of_projection_origin")?;
        let sweep_text = dataset.attribute_text(PROJECTION_VARIABLE, "sweep_angle_axis")?;
        let sweep: SweepAxis = sweep_text.trim().parse().map_err(|_| {
            GoesGridError::MalformedGrid(format!("unknown sweep angle axis '{}'", sweep_text))
        })?;

        let x_size = dataset.dimension_len("x")?;
        let y_size = dataset.dimension_len("y")?;

        Ok(GridKey {
            height,
            origin_longitude,
            sweep,
            x_size,
            y_size,
        })
    }

    /**
     * The canonical string form used as a key in persisted catalogs.
     *
     * The fields are joined with `#` in a fixed order, e.g. `35786023.0#-89.5#x#21696#21696`.
     */
    pub fn canonical(&self) -> String {
        format!(
            "{:?}#{:?}#{}#{}#{}",
            self.height, self.origin_longitude, self.sweep, self.x_size, self.y_size
        )
    }
}

impl Display for GridKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/**
 * Pixel bounds in a fixed grid.
 *
 * The `x` bounds are column numbers and the `y` bounds are row numbers. As produced by the
 * resolver both ends are inclusive.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexWindow {
    pub x_min: usize,
    pub x_max: usize,
    pub y_min: usize,
    pub y_max: usize,
}

impl IndexWindow {
    /// Number of columns covered when used as a half-open slice.
    pub fn width(&self) -> usize {
        self.x_max.saturating_sub(self.x_min)
    }

    /// Number of rows covered when used as a half-open slice.
    pub fn height(&self) -> usize {
        self.y_max.saturating_sub(self.y_min)
    }
}

impl Display for IndexWindow {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "x[{}..{}] y[{}..{}]",
            self.x_min, self.x_max, self.y_min, self.y_max
        )
    }
}

/// How a 2-D array is laid out in a flat buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MajorOrder {
    /// Rows are contiguous, like C and NumPy's default.
    Row,
    /// Columns are contiguous, like Fortran.
    Column,
}

/**
 * Latitude and longitude for every cell of a (possibly windowed) fixed grid.
 *
 * Cells that do not see the Earth hold `NaN`.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct LatLonGrid {
    lats: Vec<f64>,
    lons: Vec<f64>,
    rows: usize,
    cols: usize,
    order: MajorOrder,
}

impl LatLonGrid {
    /// Wrap flat arrays, checking they agree with the shape.
    pub fn new(
        lats: Vec<f64>,
        lons: Vec<f64>,
        rows: usize,
        cols: usize,
        order: MajorOrder,
    ) -> GoesGridResult<Self> {
        if lats.len() != rows * cols || lons.len() != rows * cols {
            return Err(GoesGridError::MalformedGrid(format!(
                "coordinate arrays of length {} and {} do not match shape {}x{}",
                lats.len(),
                lons.len(),
                rows,
                cols
            )));
        }

        Ok(LatLonGrid {
            lats,
            lons,
            rows,
            cols,
            order,
        })
    }

    pub fn lats(&self) -> &[f64] {
        &self.lats
    }

    pub fn lons(&self) -> &[f64] {
        &self.lons
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn order(&self) -> MajorOrder {
        self.order
    }

    /// Convert a flat index into (row, col) according to the storage order.
    pub fn unravel(&self, index: usize) -> (usize, usize) {
        match self.order {
            MajorOrder::Row => (index / self.cols, index % self.cols),
            MajorOrder::Column => (index % self.rows, index / self.rows),
        }
    }

    /// Convert (row, col) into a flat index according to the storage order.
    pub fn ravel(&self, row: usize, col: usize) -> usize {
        match self.order {
            MajorOrder::Row => row * self.cols + col,
            MajorOrder::Column => col * self.rows + row,
        }
    }

    /// The (lat, lon) of a cell.
    pub fn at(&self, row: usize, col: usize) -> (f64, f64) {
        let idx = self.ravel(row, col);
        (self.lats[idx], self.lons[idx])
    }
}

/**
 * A fixed grid: the key plus the scan angle samples along each axis.
 *
 * The samples are in radians, as stored in the `x` and `y` variables of a GOES-R file after
 * applying the scale factor and offset.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionGrid {
    key: GridKey,
    x: Vec<f64>,
    y: Vec<f64>,
}

impl ProjectionGrid {
    /// Build a grid, checking that the axis samples are present and match the key.
    pub fn new(key: GridKey, x: Vec<f64>, y: Vec<f64>) -> GoesGridResult<Self> {
        if x.is_empty() || y.is_empty() {
            return Err(GoesGridError::MalformedGrid(format!(
                "grid {} is missing its axis samples",
                key
            )));
        }

        if x.len() != key.x_size || y.len() != key.y_size {
            return Err(GoesGridError::MalformedGrid(format!(
                "grid {} has {} x samples and {} y samples",
                key,
                x.len(),
                y.len()
            )));
        }

        Ok(ProjectionGrid { key, x, y })
    }

    /// Load the grid description from a dataset.
    pub fn from_dataset(dataset: &dyn GridDataset) -> GoesGridResult<Self> {
        let key = GridKey::from_dataset(dataset)?;
        let x = dataset.variable_values("x")?;
        let y = dataset.variable_values("y")?;

        Self::new(key, x, y)
    }

    pub fn key(&self) -> &GridKey {
        &self.key
    }

    /**
     * Compute latitude and longitude for the whole grid, or just the cells inside `window`.
     *
     * The window is used as a half-open slice, columns `x_min..x_max` and rows `y_min..y_max`.
     * The result is row-major with rows following `y` and columns following `x`.
     */
    pub fn coordinates_for(&self, window: Option<&IndexWindow>) -> GoesGridResult<LatLonGrid> {
        let (xs, ys) = match window {
            None => (&self.x[..], &self.y[..]),
            Some(w) => {
                if w.x_min > w.x_max
                    || w.y_min > w.y_max
                    || w.x_max > self.x.len()
                    || w.y_max > self.y.len()
                {
                    return Err(GoesGridError::Config(format!(
                        "window {} does not fit in grid {}",
                        w, self.key
                    )));
                }
                (&self.x[w.x_min..w.x_max], &self.y[w.y_min..w.y_max])
            }
        };

        let tran = CoordTransform::new(&self.key);

        let mut lats = Vec::with_capacity(xs.len() * ys.len());
        let mut lons = Vec::with_capacity(xs.len() * ys.len());
        for &y in ys {
            for &x in xs {
                let (lat, lon) = tran.scan_to_latlon(x, y);
                lats.push(lat);
                lons.push(lon);
            }
        }

        LatLonGrid::new(lats, lons, ys.len(), xs.len(), MajorOrder::Row)
    }
}

/// Projection information required to convert from scan angles to lat-lon.
#[derive(Debug, Clone, Copy)]
struct CoordTransform {
    /// Distance from the Earth's center to the satellite in units of the equatorial radius.
    radius_g: f64,
    /// Polar radius in units of the equatorial radius.
    radius_p: f64,
    /// Longitude of the nadir point in degrees.
    lon0: f64,
    sweep: SweepAxis,
}

impl CoordTransform {
    fn new(key: &GridKey) -> Self {
        let flattening = 1.0 / GRS80_INV_FLATTENING;
        let es = flattening * (2.0 - flattening);

        CoordTransform {
            radius_g: 1.0 + key.height / GRS80_SEMI_MAJOR,
            radius_p: (1.0 - es).sqrt(),
            lon0: key.origin_longitude,
            sweep: key.sweep,
        }
    }

    /**
     * Intersect the line of sight for scan angles `x` and `y` (radians) with the ellipsoid.
     *
     * Returns (lat, lon) in degrees, or NaNs if the line of sight misses the Earth.
     */
    fn scan_to_latlon(&self, x: f64, y: f64) -> (f64, f64) {
        // Components of the vector from the satellite to the surface point.
        let vx = -1.0;
        let (vy, vz) = match self.sweep {
            SweepAxis::X => {
                let vz = y.tan();
                (x.tan() * vz.hypot(1.0), vz)
            }
            SweepAxis::Y => {
                let vy = x.tan();
                (vy, y.tan() * vy.hypot(1.0))
            }
        };

        let scaled_z = vz / self.radius_p;
        let a = vy * vy + scaled_z * scaled_z + vx * vx;
        let b = 2.0 * self.radius_g * vx;
        let c = self.radius_g * self.radius_g - 1.0;

        let det = b * b - 4.0 * a * c;
        if det < 0.0 {
            return (f64::NAN, f64::NAN);
        }

        let k = (-b - det.sqrt()) / (2.0 * a);
        let sx = self.radius_g + k * vx;
        let sy = k * vy;
        let sz = k * vz;

        let lam = sy.atan2(sx);
        let phi = (sz * lam.cos() / sx).atan();
        let phi = (phi.tan() / (self.radius_p * self.radius_p)).atan();

        (phi.to_degrees(), wrap_longitude(lam.to_degrees() + self.lon0))
    }
}

fn wrap_longitude(lon: f64) -> f64 {
    if lon > 180.0 {
        lon - 360.0
    } else if lon < -180.0 {
        lon + 360.0
    } else {
        lon
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn goes16_key(size: usize) -> GridKey {
        GridKey {
            height: 35786023.0,
            origin_longitude: -75.0,
            sweep: SweepAxis::X,
            x_size: size,
            y_size: size,
        }
    }

    #[test]
    fn test_canonical_key() {
        let key = GridKey {
            height: 35786023.0,
            origin_longitude: -89.5,
            sweep: SweepAxis::X,
            x_size: 21696,
            y_size: 21696,
        };
        assert_eq!(key.canonical(), "35786023.0#-89.5#x#21696#21696");
        assert_eq!(goes16_key(5424).canonical(), "35786023.0#-75.0#x#5424#5424");
    }

    #[test]
    fn test_nadir_projects_to_sub_satellite_point() {
        let tran = CoordTransform::new(&goes16_key(1));
        let (lat, lon) = tran.scan_to_latlon(0.0, 0.0);
        assert!(lat.abs() < 1.0e-9, "lat = {}", lat);
        assert!((lon + 75.0).abs() < 1.0e-9, "lon = {}", lon);
    }

    #[test]
    fn test_matches_product_users_guide_example() {
        // Worked example from the GOES-R PUG volume 3, section 5.1.2.8.1.
        let tran = CoordTransform::new(&goes16_key(1));
        let (lat, lon) = tran.scan_to_latlon(-0.024052, 0.095340);
        assert!((lat - 33.846162).abs() < 1.0e-3, "lat = {}", lat);
        assert!((lon + 84.690932).abs() < 1.0e-3, "lon = {}", lon);
    }

    #[test]
    fn test_off_disk_is_nan() {
        let tran = CoordTransform::new(&goes16_key(1));
        let (lat, lon) = tran.scan_to_latlon(0.2, 0.2);
        assert!(lat.is_nan());
        assert!(lon.is_nan());
    }

    #[test]
    fn test_sweep_axes_agree_on_axes() {
        // Along either axis alone the sweep convention makes no difference.
        let x_sweep = CoordTransform::new(&goes16_key(1));
        let mut key = goes16_key(1);
        key.sweep = SweepAxis::Y;
        let y_sweep = CoordTransform::new(&key);

        let (lat1, lon1) = x_sweep.scan_to_latlon(0.05, 0.0);
        let (lat2, lon2) = y_sweep.scan_to_latlon(0.05, 0.0);
        assert!((lat1 - lat2).abs() < 1.0e-9);
        assert!((lon1 - lon2).abs() < 1.0e-9);

        let (lat1, _) = x_sweep.scan_to_latlon(0.05, 0.05);
        let (lat2, _) = y_sweep.scan_to_latlon(0.05, 0.05);
        assert!((lat1 - lat2).abs() > 1.0e-6);
    }

    #[test]
    fn test_coordinates_for_window() {
        let xs: Vec<f64> = (0..5).map(|i| -0.002 + 0.001 * i as f64).collect();
        let ys: Vec<f64> = (0..4).map(|j| 0.0015 - 0.001 * j as f64).collect();
        let grid = ProjectionGrid::new(
            GridKey {
                x_size: 5,
                y_size: 4,
                ..goes16_key(0)
            },
            xs,
            ys,
        )
        .unwrap();

        let full = grid.coordinates_for(None).unwrap();
        assert_eq!((full.rows(), full.cols()), (4, 5));

        // Rows go north to south, columns go west to east.
        assert!(full.at(0, 0).0 > full.at(3, 0).0);
        assert!(full.at(0, 0).1 < full.at(0, 4).1);

        let window = IndexWindow {
            x_min: 1,
            x_max: 4,
            y_min: 2,
            y_max: 4,
        };
        let part = grid.coordinates_for(Some(&window)).unwrap();
        assert_eq!((part.rows(), part.cols()), (2, 3));
        assert_eq!(part.at(0, 0), full.at(2, 1));
        assert_eq!(part.at(1, 2), full.at(3, 3));

        let too_big = IndexWindow {
            x_min: 0,
            x_max: 6,
            y_min: 0,
            y_max: 1,
        };
        assert!(grid.coordinates_for(Some(&too_big)).is_err());
    }

    #[test]
    fn test_missing_axis_samples() {
        let err = ProjectionGrid::new(goes16_key(3), vec![], vec![0.0, 0.1, 0.2]).unwrap_err();
        assert!(matches!(err, GoesGridError::MalformedGrid(_)));

        let err = ProjectionGrid::new(goes16_key(3), vec![0.0], vec![0.0, 0.1, 0.2]).unwrap_err();
        assert!(matches!(err, GoesGridError::MalformedGrid(_)));
    }

    #[test]
    fn test_unravel_orders() {
        let row = LatLonGrid::new(vec![0.0; 6], vec![0.0; 6], 2, 3, MajorOrder::Row).unwrap();
        assert_eq!(row.unravel(4), (1, 1));
        assert_eq!(row.unravel(2), (0, 2));
        assert_eq!(row.ravel(1, 2), 5);

        let col = LatLonGrid::new(vec![0.0; 6], vec![0.0; 6], 2, 3, MajorOrder::Column).unwrap();
        assert_eq!(col.unravel(4), (0, 2));
        assert_eq!(col.unravel(1), (1, 0));
        assert_eq!(col.ravel(1, 2), 5);

        assert!(LatLonGrid::new(vec![0.0; 5], vec![0.0; 6], 2, 3, MajorOrder::Row).is_err());
    }
}
