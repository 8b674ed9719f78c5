/*!
 * Finding satellite files and opening them.
 *
 * The [BlobLookup] trait is what the batch scheduler and the region cache use to find files for
 * a time period and to open them as a [GridDataset]. [LocalArchive] implements it for a directory
 * tree laid out like the NOAA Big Data buckets:
 *
 * ```text
 *   ABI-L2-CMIPF/2020/238/15/OR_ABI-L2-CMIPF-M6C13_G16_s20202381500212_e..._c....nc
 *   PRODUCT     /YEAR/DOY/HOUR/files
 * ```
 */
use crate::{
    satellite::{ProductBand, Satellite},
    GoesGridError, GoesGridResult,
};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use log::{debug, trace};
use rustc_hash::FxHashMap as HashMap;
use std::{
    fmt::{self, Display},
    io,
    path::{Path, PathBuf},
};

/**
 * Read access to the parts of a GOES-R NetCDF file the geo-indexer needs.
 *
 * Decoding the actual imagery is somebody else's job.
 */
pub trait GridDataset {
    /// Length of a named dimension.
    fn dimension_len(&self, name: &str) -> GoesGridResult<usize>;

    /// All values of a 1-D variable, with any scale factor and offset applied.
    fn variable_values(&self, name: &str) -> GoesGridResult<Vec<f64>>;

    /// A numeric attribute of a variable.
    fn attribute_f64(&self, variable: &str, attribute: &str) -> GoesGridResult<f64>;

    /// A text attribute of a variable.
    fn attribute_text(&self, variable: &str, attribute: &str) -> GoesGridResult<String>;
}

/// A reference to one file, as a `/` separated path relative to the archive root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileRef(String);

impl FileRef {
    pub fn new<S: Into<String>>(path: S) -> Self {
        FileRef(path.into())
    }

    pub fn path(&self) -> &str {
        &self.0
    }

    /// The last component of the path.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl Display for FileRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A file holding one band of one product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BandFile {
    pub band: ProductBand,
    pub file: FileRef,
}

/// All the requested bands observed at the same time instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grouping {
    /// Observation start, truncated to the minute.
    pub start: NaiveDateTime,
    pub files: Vec<BandFile>,
}

impl Grouping {
    /// The file for a band, if it is part of this grouping.
    pub fn file_for(&self, band: ProductBand) -> Option<&FileRef> {
        self.files.iter().find(|f| f.band == band).map(|f| &f.file)
    }
}

/**
 * The satellite file index.
 *
 * Implementations are shared by all the worker threads of a batch run.
 */
pub trait BlobLookup: Send + Sync {
    /**
     * Find every time instant in `hours` of `date` at which all of `bands` were observed.
     *
     * The groupings are returned in time order.
     */
    fn grouped_blobs_for_day(
        &self,
        date: NaiveDate,
        hours: &[u32],
        bands: &[ProductBand],
    ) -> GoesGridResult<Vec<Grouping>>;

    /// Open a file for reading its grid metadata.
    fn open_dataset(&self, file: &FileRef) -> GoesGridResult<Box<dyn GridDataset>>;
}

/*-------------------------------------------------------------------------------------------------
 *                                        File Names
 *-----------------------------------------------------------------------------------------------*/

/// Directory holding the files for a product and hour, e.g. `ABI-L2-CMIPF/2020/238/15`.
pub fn hour_directory(product_band: ProductBand, date: NaiveDate, hour: u32) -> String {
    format!(
        "{}/{:04}/{:03}/{:02}",
        product_band.product.code(),
        date.year(),
        date.ordinal(),
        hour
    )
}

/// Check if a file name is for the given satellite, product and band, in any scan mode.
pub fn file_name_matches(file_name: &str, satellite: Satellite, product_band: ProductBand) -> bool {
    let prefix = format!("OR_{}-M", product_band.product.code());
    let channel = format!("C{:02}_{}_s", product_band.band.number(), satellite.name());

    file_name.starts_with(&prefix)
        && file_name[prefix.len()..].contains(&channel)
        && (file_name.ends_with(".nc") || file_name.ends_with(".zip"))
}

/**
 * Parse the observation start time from a file name.
 *
 * The start is encoded as `_sYYYYJJJHHMMSSs` where `JJJ` is the day of the year and the final
 * digit is tenths of a second, which are ignored.
 */
pub fn parse_scan_start(file_name: &str) -> GoesGridResult<NaiveDateTime> {
    const TIME_FORMAT: &str = "%Y%j%H%M%S";
    const LEN: usize = 13;

    let bad_name = || GoesGridError::Lookup(format!("no scan start in file name: {}", file_name));

    let start = file_name.find("_s").ok_or_else(bad_name)? + 2;
    let digits = file_name.get(start..start + LEN).ok_or_else(bad_name)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad_name());
    }

    NaiveDateTime::parse_from_str(digits, TIME_FORMAT).map_err(|_| bad_name())
}

fn truncate_to_minute(time: NaiveDateTime) -> NaiveDateTime {
    time.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(time)
}

/*-------------------------------------------------------------------------------------------------
 *                                       Local Archive
 *-----------------------------------------------------------------------------------------------*/

/// Satellite files stored in a local directory tree.
#[derive(Debug, Clone)]
pub struct LocalArchive {
    root: PathBuf,
    satellite: Satellite,
}

impl LocalArchive {
    pub fn new<P: AsRef<Path>>(root: P, satellite: Satellite) -> Self {
        LocalArchive {
            root: root.as_ref().to_path_buf(),
            satellite,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Files for one band in one hour, keyed by scan start truncated to the minute.
    fn files_for_hour(
        &self,
        product_band: ProductBand,
        date: NaiveDate,
        hour: u32,
    ) -> GoesGridResult<Vec<(NaiveDateTime, FileRef)>> {
        let dir = hour_directory(product_band, date, hour);
        let full_dir = self.root.join(&dir);

        match std::fs::metadata(&full_dir) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(GoesGridError::storage(
                    &dir,
                    io::Error::new(io::ErrorKind::Other, "not a directory"),
                ))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                trace!(target: "goesgrid::archive", "no directory {}", full_dir.display());
                return Ok(vec![]);
            }
            Err(err) => return Err(GoesGridError::storage(&dir, err)),
        }

        let mut files = vec![];
        for entry in walkdir::WalkDir::new(&full_dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|err| GoesGridError::storage(&dir, err.into()))?;

            // Ignore directories.
            if !entry.file_type().is_file() {
                continue;
            }

            let fname = entry.file_name().to_string_lossy().to_string();
            if !file_name_matches(&fname, self.satellite, product_band) {
                continue;
            }

            match parse_scan_start(&fname) {
                Ok(start) => {
                    files.push((
                        truncate_to_minute(start),
                        FileRef::new(format!("{}/{}", dir, fname)),
                    ));
                }
                Err(err) => debug!(target: "goesgrid::archive", "skipping {}: {}", fname, err),
            }
        }

        Ok(files)
    }
}

impl BlobLookup for LocalArchive {
    fn grouped_blobs_for_day(
        &self,
        date: NaiveDate,
        hours: &[u32],
        bands: &[ProductBand],
    ) -> GoesGridResult<Vec<Grouping>> {
        let mut groupings = vec![];

        if bands.is_empty() {
            return Ok(groupings);
        }

        for &hour in hours {
            if hour > 23 {
                return Err(GoesGridError::Config(format!("invalid hour {}", hour)));
            }

            let mut by_start: HashMap<NaiveDateTime, Vec<BandFile>> = HashMap::default();
            for &band in bands {
                for (start, file) in self.files_for_hour(band, date, hour)? {
                    let files = by_start.entry(start).or_default();
                    // Keep one file per band, the first one by name.
                    match files.iter_mut().find(|f| f.band == band) {
                        Some(existing) if existing.file <= file => {}
                        Some(existing) => existing.file = file,
                        None => files.push(BandFile { band, file }),
                    }
                }
            }

            for (start, mut files) in by_start {
                if files.len() == bands.len() {
                    // Same order as the requested bands.
                    files.sort_by_key(|f| bands.iter().position(|b| *b == f.band));
                    groupings.push(Grouping { start, files });
                } else {
                    debug!(
                        target: "goesgrid::archive",
                        "incomplete grouping at {}: {} of {} bands",
                        start,
                        files.len(),
                        bands.len()
                    );
                }
            }
        }

        groupings.sort_by_key(|g| g.start);
        Ok(groupings)
    }

    fn open_dataset(&self, file: &FileRef) -> GoesGridResult<Box<dyn GridDataset>> {
        open_netcdf(&self.root.join(file.path()))
    }
}

#[cfg(feature = "netcdf")]
fn open_netcdf(path: &Path) -> GoesGridResult<Box<dyn GridDataset>> {
    Ok(Box::new(crate::netcdf::NetCdfDataset::open(path)?))
}

#[cfg(not(feature = "netcdf"))]
fn open_netcdf(path: &Path) -> GoesGridResult<Box<dyn GridDataset>> {
    Err(GoesGridError::Dataset(format!(
        "cannot open {}: built without netcdf support",
        path.display()
    )))
}
