use clap::Parser;
use goesgrid::{
    BatchScheduler, BlobLookup, DateRange, GeoBox, GoesGridError, GoesGridResult, LocalArchive,
    LocalStorage, ProductBand, RangeOutcome, RegionCache, RegionCatalog, RegionSet, Satellite,
    WorkUnit,
};
use log::{debug, error, info, warn, LevelFilter};
use serde::Deserialize;
use simple_logger::SimpleLogger;
use std::{
    error::Error,
    fmt::{self, Display},
    path::PathBuf,
    sync::Arc,
};

/*-------------------------------------------------------------------------------------------------
 *                                     Command Line Options
 *-----------------------------------------------------------------------------------------------*/

///
/// Run a batch job over a local satellite archive.
///
/// Every time instant at which all the job's bands are available is visited, day by day, and
/// each completed day is written to a checkpoint log. Running the same job again continues after
/// the last completed day of each range.
///
#[derive(Debug, Parser)]
#[clap(bin_name = "goesbatch")]
#[clap(author, version, about)]
struct GoesBatchOptionsInit {
    /// The JSON job file.
    job_file: PathBuf,

    /// The satellite to use, G16, G17 or G18.
    #[clap(long, parse(try_from_str=parse_satellite))]
    #[clap(default_value_t=Satellite::G16)]
    sat: Satellite,

    /// The root of the satellite archive.
    ///
    /// If this is not specified, then the program will check for it in the "SAT_ARCHIVE"
    /// environment variable.
    #[clap(short, long)]
    #[clap(env = "SAT_ARCHIVE")]
    archive: PathBuf,

    /// The root of the store for checkpoint logs and regions.
    ///
    /// If this is not specified, then the program will check for it in the "GOESGRID_STORE"
    /// environment variable.
    #[clap(short, long)]
    #[clap(env = "GOESGRID_STORE")]
    store: PathBuf,

    /// Open every file and resolve the job's area on its grid.
    #[clap(short, long)]
    resolve: bool,

    /// Verbose output
    #[clap(short, long)]
    verbose: bool,
}

fn parse_satellite(sat: &str) -> Result<Satellite, String> {
    Satellite::string_contains_satellite(sat)
        .ok_or_else(|| format!("Argument is not a valid satellite name: {}", sat))
}

/// The contents of a job file.
#[derive(Debug, Deserialize)]
struct Job {
    bands: Vec<ProductBand>,
    #[serde(default = "num_cpus::get")]
    workers: usize,
    #[serde(default = "default_log_dir")]
    log_dir: String,
    ranges: Vec<DateRange>,
    /// The area to resolve with `--resolve`.
    #[serde(default)]
    area: Option<GeoBox>,
    /// Where resolved regions are kept, relative to the store root.
    #[serde(default = "default_regions")]
    regions: String,
}

fn default_log_dir() -> String {
    "logs".to_owned()
}

fn default_regions() -> String {
    "areas/areas.json".to_owned()
}

#[derive(Debug)]
struct GoesBatchOptionsChecked {
    job: Job,
    sat: Satellite,
    archive: PathBuf,
    store: PathBuf,
    /// The area to resolve, if resolving.
    resolve: Option<GeoBox>,
    verbose: bool,
}

impl Display for GoesBatchOptionsChecked {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        writeln!(f, "\n")?; // yes, two blank lines.
        writeln!(f, "   Satellite: {}", self.sat.name())?;
        writeln!(f, "     Archive: {}", self.archive.display())?;
        writeln!(f, "       Store: {}", self.store.display())?;
        writeln!(f, "    Log dir.: {}", self.job.log_dir)?;
        writeln!(f, "     Workers: {}", self.job.workers)?;
        for band in &self.job.bands {
            writeln!(f, "        Band: {}", band)?;
        }
        for range in &self.job.ranges {
            writeln!(f, "       Range: {}", range)?;
        }
        if let Some(area) = &self.resolve {
            writeln!(f, "     Resolve: {}", area)?;
            writeln!(f, "     Regions: {}", self.job.regions)?;
        }
        writeln!(f, "\n")?; // yes, two blank lines.

        Ok(())
    }
}

/// Get the command line arguments, load the job file and check them.
fn parse_args() -> Result<GoesBatchOptionsChecked, Box<dyn Error>> {
    let GoesBatchOptionsInit {
        job_file,
        sat,
        archive,
        store,
        resolve,
        verbose,
    } = GoesBatchOptionsInit::parse();

    let job_text = std::fs::read_to_string(&job_file)?;
    let job: Job = serde_json::from_str(&job_text)?;

    if job.ranges.is_empty() {
        return Err(format!("no ranges in {}", job_file.display()).into());
    }

    let resolve = match (resolve, job.area) {
        (true, Some(area)) => Some(area),
        (true, None) => {
            return Err(format!("--resolve needs an area in {}", job_file.display()).into())
        }
        (false, _) => None,
    };

    Ok(GoesBatchOptionsChecked {
        job,
        sat,
        archive,
        store,
        resolve,
        verbose,
    })
}

/*-------------------------------------------------------------------------------------------------
 *                                        Processing
 *-----------------------------------------------------------------------------------------------*/

/// Resolve the area for every file of a unit, returning how many files were checked.
fn resolve_unit(
    unit: &WorkUnit,
    archive: &LocalArchive,
    cache: &RegionCache,
) -> GoesGridResult<usize> {
    for band_file in &unit.files {
        let dataset = archive.open_dataset(&band_file.file)?;
        let region = cache
            .region_for_dataset(dataset.as_ref())
            .map_err(|err| match err {
                GoesGridError::OutsideCoverage(msg) => {
                    GoesGridError::OutsideCoverage(format!("{}: {}", band_file.file, msg))
                }
                other => other,
            })?;

        debug!(
            "{} {} -> {}",
            band_file.band,
            band_file.file.file_name(),
            region.window()
        );
    }

    Ok(unit.files.len())
}

/*-------------------------------------------------------------------------------------------------
 *                                             MAIN
 *-----------------------------------------------------------------------------------------------*/
fn main() -> Result<(), Box<dyn Error>> {
    let opts = parse_args()?;

    let level = if opts.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .with_module_level("goesgrid", level)
        .with_module_level("goesbatch", level)
        .init()?;

    info!("{}", opts);

    let storage = Arc::new(LocalStorage::new(&opts.store));
    let archive = Arc::new(LocalArchive::new(&opts.archive, opts.sat));
    let catalog = RegionCatalog::new(storage.clone());

    let cache = match opts.resolve {
        Some(area) => {
            let existing = match catalog.load_regions(&opts.job.regions) {
                Ok(regions) => regions,
                Err(err) if err.is_not_found() => RegionSet::new(),
                Err(err) => {
                    warn!("Ignoring unreadable regions at {}: {}", opts.job.regions, err);
                    RegionSet::new()
                }
            };
            Some(RegionCache::with_regions(area, &existing))
        }
        None => None,
    };

    let scheduler = BatchScheduler::new(
        archive.clone(),
        storage,
        opts.job.bands.clone(),
        opts.job.ranges.clone(),
    )?
    .with_workers(opts.job.workers)
    .with_log_dir(&opts.job.log_dir);

    let reports = scheduler.run(|unit| {
        debug!(
            "{} {:02}:{:02}Z {} files",
            unit.date,
            unit.hour,
            unit.minute,
            unit.files.len()
        );

        match &cache {
            Some(cache) => resolve_unit(unit, &archive, cache),
            None => Ok(unit.files.len()),
        }
    })?;

    if let Some(cache) = &cache {
        catalog.save_regions(&cache.snapshot(), &opts.job.regions)?;
    }

    let mut all_complete = true;
    for report in &reports {
        match &report.outcome {
            RangeOutcome::NothingToDo => info!("{}: nothing to do", report.name),
            RangeOutcome::Processed {
                days,
                failures,
                cancelled,
            } => {
                let files: usize = days.iter().flat_map(|d| d.results.iter()).sum();
                info!(
                    "{}: {} days, {} files, {} failed{}",
                    report.name,
                    days.len(),
                    files,
                    failures.len(),
                    if *cancelled { ", cancelled" } else { "" }
                );
                for failure in failures {
                    error!("{} {}: {}", report.name, failure.date, failure.error);
                }
            }
        }

        all_complete &= report.is_complete();
    }

    if all_complete {
        Ok(())
    } else {
        Err("some days did not complete, run the job again to retry them".into())
    }
}
