/*! Contains all the information about satellites, their products, and their bands. */

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

/** The GOES satellites this library works with. */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString, IntoStaticStr)]
pub enum Satellite {
    /// GOES-16 (formerly GOES-R), or commonly known as GOES East
    G16,
    /// GOES-17 (formerly GOES-S), the first GOES West
    G17,
    /// GOES-18 (formerly GOES-T), the current GOES West
    G18,
}

impl Satellite {
    /// Get a string representing the name of the satellite.
    ///
    /// This is the abbreviation used in the NOAA Big Data file naming scheme.
    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// Scan the string for the occurence of a satellite name.
    pub fn string_contains_satellite(string: &str) -> Option<Satellite> {
        Satellite::iter().find(|sat| string.contains(sat.name()))
    }
}

/**
 * The products published for the GOES-R series.
 *
 * The string form is the product code used in the directory layout and file names, e.g.
 * `ABI-L2-CMIPF`.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString, IntoStaticStr)]
pub enum Product {
    /// Clear Sky Mask
    #[strum(serialize = "ABI-L2-ACMF")]
    ACMF,
    /// Cloud Top Height
    #[strum(serialize = "ABI-L2-ACHAF")]
    ACHAF,
    /// Cloud Top Temperature
    #[strum(serialize = "ABI-L2-ACHTF")]
    ACHTF,
    /// Cloud Top Phase
    #[strum(serialize = "ABI-L2-ACTPF")]
    ACTPF,
    /// Aerosol Detection (including Smoke and Dust)
    #[strum(serialize = "ABI-L2-ADPF")]
    ADPF,
    /// Aerosol Optical Depth
    #[strum(serialize = "ABI-L2-AODF")]
    AODF,
    /// Cloud and Moisture Imagery, Full Disk
    #[strum(serialize = "ABI-L2-CMIPF")]
    CMIPF,
    /// Cloud Optical Depth
    #[strum(serialize = "ABI-L2-CODF")]
    CODF,
    /// Cloud Particle Size Distribution
    #[strum(serialize = "ABI-L2-CPSF")]
    CPSF,
    /// Derived Stability Indices
    #[strum(serialize = "ABI-L2-DSIF")]
    DSIF,
    /// Derived Motion Winds
    #[strum(serialize = "ABI-L2-DMWF")]
    DMWF,
    /// Fire / Hot Spot Characterization
    #[strum(serialize = "ABI-L2-FDCF")]
    FDCF,
    /// Snow Cover
    #[strum(serialize = "ABI-L2-FSCF")]
    FSCF,
    /// Land Surface Temperature (Skin)
    #[strum(serialize = "ABI-L2-LSTF")]
    LSTF,
    /// Rainfall Rate / QPE
    #[strum(serialize = "ABI-L2-RRQPEF")]
    RRQPEF,
    /// Sea Surface Temperature (Skin)
    #[strum(serialize = "ABI-L2-SSTF")]
    SSTF,
    /// Total Precipitable Water
    #[strum(serialize = "ABI-L2-TPWF")]
    TPWF,
    /// Volcanic Ash
    #[strum(serialize = "ABI-L2-VAAF")]
    VAAF,
    /// Lightning Cluster Filter Algorithm
    #[strum(serialize = "GLM-L2-LCFA")]
    LCFA,
    /// Radiances, CONUS
    #[strum(serialize = "ABI-L1b-RadC")]
    RadC,
    /// Radiances, Full Disk
    #[strum(serialize = "ABI-L1b-RadF")]
    RadF,
    /// Radiances, Meso-sector
    #[strum(serialize = "ABI-L1b-RadM")]
    RadM,
}

impl Product {
    /// The product code as it appears in paths and file names.
    pub fn code(&self) -> &'static str {
        self.into()
    }
}

impl Serialize for Product {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

impl<'de> Deserialize<'de> for Product {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        code.parse()
            .map_err(|_| de::Error::custom(format!("unknown product code: {}", code)))
    }
}

/** The 16 channels of the Advanced Baseline Imager. */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, IntoStaticStr)]
#[repr(u8)]
pub enum Band {
    Blue = 1,
    Red = 2,
    Veggie = 3,
    Cirrus = 4,
    SnowIce = 5,
    CloudParticleSize = 6,
    ShortwaveWindow = 7,
    UpperLevelTroposphericWaterVapor = 8,
    MidLevelTroposphericWaterVapor = 9,
    LowerLevelWaterVapor = 10,
    CloudTopPhase = 11,
    Ozone = 12,
    CleanLongwaveWindow = 13,
    IrLongwaveWindow = 14,
    DirtyLongwaveWindow = 15,
    Co2LongwaveInfrared = 16,
}

impl Band {
    /// The ABI channel number, 1 through 16.
    pub fn number(self) -> u8 {
        self as u8
    }

    /// Look up a band by its channel number.
    pub fn from_number(number: u8) -> Option<Band> {
        Band::iter().find(|band| band.number() == number)
    }
}

impl Serialize for Band {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.number())
    }
}

impl<'de> Deserialize<'de> for Band {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let number = u8::deserialize(deserializer)?;
        Band::from_number(number)
            .ok_or_else(|| de::Error::custom(format!("no ABI channel numbered {}", number)))
    }
}

/** A single band of a single product, the unit files are published in. */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductBand {
    pub product: Product,
    pub band: Band,
}

impl ProductBand {
    pub fn new(product: Product, band: Band) -> Self {
        ProductBand { product, band }
    }
}

impl std::fmt::Display for ProductBand {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}/C{:02}", self.product, self.band.number())
    }
}

/// Parse the form written by `Display`, e.g. `ABI-L2-CMIPF/C13`. The `C` is optional.
impl std::str::FromStr for ProductBand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (product, band) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| format!("expected PRODUCT/CNN, found '{}'", s))?;

        let product: Product = product
            .parse()
            .map_err(|_| format!("unknown product '{}'", product))?;

        let band = band.strip_prefix(['C', 'c']).unwrap_or(band);
        let band = band
            .parse::<u8>()
            .ok()
            .and_then(Band::from_number)
            .ok_or_else(|| format!("unknown ABI channel '{}'", band))?;

        Ok(ProductBand { product, band })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_satellite_names() {
        assert_eq!(Satellite::G16.name(), "G16");
        assert_eq!(
            Satellite::string_contains_satellite("OR_ABI-L2-CMIPF-M6C13_G17_s20221001200206"),
            Some(Satellite::G17)
        );
        assert_eq!(Satellite::string_contains_satellite("no satellite"), None);
    }

    #[test]
    fn test_product_codes() {
        assert_eq!(Product::CMIPF.code(), "ABI-L2-CMIPF");
        assert_eq!(Product::RadF.code(), "ABI-L1b-RadF");
        assert_eq!("GLM-L2-LCFA".parse::<Product>().unwrap(), Product::LCFA);
        assert!("ABI-L2-NOPE".parse::<Product>().is_err());
    }

    #[test]
    fn test_band_numbers() {
        assert_eq!(Band::Blue.number(), 1);
        assert_eq!(Band::CleanLongwaveWindow.number(), 13);
        assert_eq!(Band::from_number(16), Some(Band::Co2LongwaveInfrared));
        assert_eq!(Band::from_number(0), None);
        assert_eq!(Band::from_number(17), None);
    }

    #[test]
    fn test_product_band_from_str() {
        let pb = ProductBand::new(Product::CMIPF, Band::CleanLongwaveWindow);
        assert_eq!("ABI-L2-CMIPF/C13".parse::<ProductBand>().unwrap(), pb);
        assert_eq!("ABI-L2-CMIPF/13".parse::<ProductBand>().unwrap(), pb);
        assert_eq!(pb.to_string().parse::<ProductBand>().unwrap(), pb);
        assert!("ABI-L2-CMIPF".parse::<ProductBand>().is_err());
        assert!("ABI-L2-CMIPF/C17".parse::<ProductBand>().is_err());
    }

    #[test]
    fn test_product_band_json() {
        let pb = ProductBand::new(Product::CMIPF, Band::CleanLongwaveWindow);
        let json = serde_json::to_string(&pb).unwrap();
        assert_eq!(json, r#"{"product":"ABI-L2-CMIPF","band":13}"#);

        let back: ProductBand = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pb);

        assert!(serde_json::from_str::<ProductBand>(r#"{"product":"ABI-L2-CMIPF","band":42}"#)
            .is_err());
    }
}
