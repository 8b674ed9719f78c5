use clap::Parser;
use goesgrid::{
    BlobLookup, FileRef, GeoBox, LocalArchive, LocalStorage, ProjectionGrid, RegionCatalog,
    Satellite, TileSet,
};
use log::{info, LevelFilter};
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
/// Split an area into overlapping tiles and save them.
///
/// The tiles are saved as JSON keyed by "(lat_index, lon_index)". If a grid file is given, each
/// tile also gets the pixel window covering it in that file's fixed grid.
///
#[derive(Debug, Parser)]
#[clap(bin_name = "gentiles")]
#[clap(author, version, about)]
struct GenTilesOptionsInit {
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

    /// Height of a tile in degrees of latitude.
    #[clap(long, default_value_t = 5.0)]
    lat_step: f64,

    /// Width of a tile in degrees of longitude.
    #[clap(long, default_value_t = 5.0)]
    lon_step: f64,

    /// Degrees of latitude added to the north and south of every tile.
    #[clap(long, default_value_t = 0.0)]
    lat_overlap: f64,

    /// Degrees of longitude added to the east and west of every tile.
    #[clap(long, default_value_t = 0.0)]
    lon_overlap: f64,

    /// The root of the store to save the tiles in.
    ///
    /// If this is not specified, then the program will check for it in the "GOESGRID_STORE"
    /// environment variable.
    #[clap(short, long)]
    #[clap(env = "GOESGRID_STORE")]
    store: PathBuf,

    /// Where to save the tiles, relative to the store root.
    #[clap(short, long, default_value = "tiles/tiles.json")]
    output: String,

    /// A satellite file, relative to the archive root, whose grid the tiles are resolved on.
    #[clap(short, long)]
    grid_file: Option<String>,

    /// The root of the satellite archive.
    ///
    /// Only needed with a grid file. If this is not specified, then the program will check for
    /// it in the "SAT_ARCHIVE" environment variable.
    #[clap(short, long)]
    #[clap(env = "SAT_ARCHIVE")]
    archive: Option<PathBuf>,

    /// Verbose output
    #[clap(short, long)]
    verbose: bool,
}

#[derive(Debug)]
struct GenTilesOptionsChecked {
    area: GeoBox,
    lat_step: f64,
    lon_step: f64,
    lat_overlap: f64,
    lon_overlap: f64,
    store: PathBuf,
    output: String,
    /// The archive root and the file in it.
    grid: Option<(PathBuf, String)>,
    verbose: bool,
}

impl Display for GenTilesOptionsChecked {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        writeln!(f, "\n")?; // yes, two blank lines.
        writeln!(f, "        Area: {}", self.area)?;
        writeln!(f, "       Steps: {} x {}", self.lat_step, self.lon_step)?;
        writeln!(f, "    Overlaps: {} x {}", self.lat_overlap, self.lon_overlap)?;
        writeln!(f, "       Store: {}", self.store.display())?;
        writeln!(f, "      Output: {}", self.output)?;
        if let Some((archive, file)) = &self.grid {
            writeln!(f, "   Grid file: {}/{}", archive.display(), file)?;
        }
        writeln!(f, "\n")?; // yes, two blank lines.

        Ok(())
    }
}

/// Get the command line arguments and check them.
fn parse_args() -> Result<GenTilesOptionsChecked, Box<dyn Error>> {
    let GenTilesOptionsInit {
        south,
        north,
        west,
        east,
        lat_step,
        lon_step,
        lat_overlap,
        lon_overlap,
        store,
        output,
        grid_file,
        archive,
        verbose,
    } = GenTilesOptionsInit::parse();

    let area = GeoBox::new(south, north, west, east)?;

    let grid = match (grid_file, archive) {
        (Some(file), Some(archive)) => Some((archive, file)),
        (Some(_), None) => return Err("a grid file needs the satellite archive root".into()),
        (None, _) => None,
    };

    Ok(GenTilesOptionsChecked {
        area,
        lat_step,
        lon_step,
        lat_overlap,
        lon_overlap,
        store,
        output,
        grid,
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
        .with_module_level("gentiles", level)
        .init()?;

    info!("{}", opts);

    let mut tiles = TileSet::generate(
        &opts.area,
        opts.lat_step,
        opts.lon_step,
        opts.lat_overlap,
        opts.lon_overlap,
    )?;
    info!("Generated {} tiles.", tiles.len());

    if let Some((archive, file)) = &opts.grid {
        // The satellite does not matter for opening a single file.
        let archive = LocalArchive::new(archive, Satellite::G16);
        let dataset = archive.open_dataset(&FileRef::new(file.as_str()))?;
        let grid = ProjectionGrid::from_dataset(dataset.as_ref())?;
        info!("Resolving tiles on grid {}", grid.key());

        let coords = grid.coordinates_for(None)?;
        tiles.resolve_windows(&coords)?;
    }

    if opts.verbose {
        info!("\n{}", tiles);
    }

    let catalog = RegionCatalog::new(Arc::new(LocalStorage::new(&opts.store)));
    catalog.save_tiles(&tiles, &opts.output)?;

    Ok(())
}
