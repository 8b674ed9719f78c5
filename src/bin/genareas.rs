use chrono::NaiveDate;
use clap::Parser;
use goesgrid::{
    GeoBox, LocalArchive, LocalStorage, ProductBand, RegionCache, RegionCatalog, RegionSet,
    Satellite,
};
use log::{info, warn, LevelFilter};
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
/// Resolve an area to pixel windows for every grid a list of bands is published on.
///
/// The first file of each band in the given hour is used to find its grid. Regions already saved
/// at the output path for the same area are reused, new ones are added.
///
#[derive(Debug, Parser)]
#[clap(bin_name = "genareas")]
#[clap(author, version, about)]
struct GenAreasOptionsInit {
    /// Southern edge of the area in degrees.
    #[clap(long, allow_hyphen_values = true)]
    south: f64,

    /// Northern edge of the area in degrees.
    #[clap(long, allow_hyphen_values = true)]
    north: f64,

    /// Western edge of the area in degrees.
    #[clap(long, allow_hyphen_values = true)]
    west: f64,

    /// Eastern edge of the area in degrees.
    #[clap(long, allow_hyphen_values = true)]
    east: f64,

    /// Degrees of latitude added to the north and south of the area before resolving it.
    #[clap(long, default_value_t = 0.0)]
    lat_pad: f64,

    /// Degrees of longitude added to the east and west of the area before resolving it.
    #[clap(long, default_value_t = 0.0)]
    lon_pad: f64,

    /// A band to resolve the area for, e.g. ABI-L2-CMIPF/C13. May be given more than once.
    #[clap(short, long, required = true)]
    band: Vec<ProductBand>,

    /// The day to take the sample files from, e.g. 2020-08-25.
    #[clap(short, long)]
    date: NaiveDate,

    /// The hour to take the sample files from.
    #[clap(long, default_value_t = 12)]
    hour: u32,

    /// The satellite to use, G16, G17 or G18.
    #[clap(parse(try_from_str=parse_satellite))]
    #[clap(default_value_t=Satellite::G16)]
    sat: Satellite,

    /// The root of the satellite archive.
    ///
    /// If this is not specified, then the program will check for it in the "SAT_ARCHIVE"
    /// environment variable.
    #[clap(short, long)]
    #[clap(env = "SAT_ARCHIVE")]
    archive: PathBuf,

    /// The root of the store to save the regions in.
    ///
    /// If this is not specified, then the program will check for it in the "GOESGRID_STORE"
    /// environment variable.
    #[clap(short, long)]
    #[clap(env = "GOESGRID_STORE")]
    store: PathBuf,

    /// Where to save the regions, relative to the store root.
    #[clap(short, long, default_value = "areas/areas.json")]
    output: String,

    /// Number of bands to resolve at once. Defaults to the number of CPUs.
    #[clap(short, long)]
    workers: Option<usize>,

    /// Verbose output
    #[clap(short, long)]
    verbose: bool,
}

fn parse_satellite(sat: &str) -> Result<Satellite, String> {
    Satellite::string_contains_satellite(sat)
        .ok_or_else(|| format!("Argument is not a valid satellite name: {}", sat))
}

#[derive(Debug)]
struct GenAreasOptionsChecked {
    /// The area after padding.
    area: GeoBox,
    bands: Vec<ProductBand>,
    date: NaiveDate,
    hour: u32,
    sat: Satellite,
    archive: PathBuf,
    store: PathBuf,
    output: String,
    workers: usize,
    verbose: bool,
}

impl Display for GenAreasOptionsChecked {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        writeln!(f, "\n")?; // yes, two blank lines.
        writeln!(f, "        Area: {}", self.area)?;
        for band in &self.bands {
            writeln!(f, "        Band: {}", band)?;
        }
        writeln!(f, "      Sample: {} {:02}Z", self.date, self.hour)?;
        writeln!(f, "   Satellite: {}", self.sat.name())?;
        writeln!(f, "     Archive: {}", self.archive.display())?;
        writeln!(f, "       Store: {}", self.store.display())?;
        writeln!(f, "      Output: {}", self.output)?;
        writeln!(f, "     Workers: {}", self.workers)?;
        writeln!(f, "\n")?; // yes, two blank lines.

        Ok(())
    }
}

/// Get the command line arguments and check them.
fn parse_args() -> Result<GenAreasOptionsChecked, Box<dyn Error>> {
    let GenAreasOptionsInit {
        south,
        north,
        west,
        east,
        lat_pad,
        lon_pad,
        band,
        date,
        hour,
        sat,
        archive,
        store,
        output,
        workers,
        verbose,
    } = GenAreasOptionsInit::parse();

    if hour > 23 {
        return Err(format!("invalid hour: {}", hour).into());
    }

    let area = GeoBox::new(south, north, west, east)?.expand(lat_pad, lon_pad)?;

    Ok(GenAreasOptionsChecked {
        area,
        bands: band,
        date,
        hour,
        sat,
        archive,
        store,
        output,
        workers: workers.unwrap_or_else(num_cpus::get).max(1),
        verbose,
    })
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
        .with_module_level("genareas", level)
        .init()?;

    info!("{}", opts);

    let catalog = RegionCatalog::new(Arc::new(LocalStorage::new(&opts.store)));
    let existing = match catalog.load_regions(&opts.output) {
        Ok(regions) => regions,
        Err(err) if err.is_not_found() => RegionSet::new(),
        Err(err) => {
            warn!("Ignoring unreadable regions at {}: {}", opts.output, err);
            RegionSet::new()
        }
    };

    let cache = RegionCache::with_regions(opts.area, &existing);
    let archive = LocalArchive::new(&opts.archive, opts.sat);

    let regions = cache.populate(&archive, &opts.bands, opts.date, opts.hour, opts.workers)?;

    for region in regions.iter() {
        info!("{} -> {}", region.grid_key(), region.window());
    }

    catalog.save_regions(&regions, &opts.output)?;

    Ok(())
}
