/*!
 * Geographic bounding boxes.
 *
 * All the geography in this crate is done with simple latitude-longitude boxes in degrees. There
 * is no attempt at geodesic accuracy, at the resolution of the satellite grids a planar
 * approximation is good enough.
 */
use crate::{GoesGridError, GoesGridResult};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/**
 * A geographic bounding box in degrees.
 *
 * It is always the case that `south < north` and `west < east`, the constructor enforces it.
 */
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawGeoBox")]
pub struct GeoBox {
    #[serde(rename = "lat_south")]
    south: f64,
    #[serde(rename = "lat_north")]
    north: f64,
    #[serde(rename = "lon_west")]
    west: f64,
    #[serde(rename = "lon_east")]
    east: f64,
}

impl GeoBox {
    /// Create a new box, checking that the edges are in the right order.
    pub fn new(south: f64, north: f64, west: f64, east: f64) -> GoesGridResult<Self> {
        if !(south < north) || !(west < east) {
            return Err(GoesGridError::Config(format!(
                "invalid box: south={} north={} west={} east={}",
                south, north, west, east
            )));
        }

        Ok(GeoBox {
            south,
            north,
            west,
            east,
        })
    }

    pub fn south(&self) -> f64 {
        self.south
    }

    pub fn north(&self) -> f64 {
        self.north
    }

    pub fn west(&self) -> f64 {
        self.west
    }

    pub fn east(&self) -> f64 {
        self.east
    }

    /// Height of the box in degrees of latitude.
    pub fn lat_span(&self) -> f64 {
        self.north - self.south
    }

    /// Width of the box in degrees of longitude.
    pub fn lon_span(&self) -> f64 {
        self.east - self.west
    }

    /**
     * Grow the box symmetrically on every side.
     *
     * Negative margins shrink it, and shrinking past zero width or height is an error.
     */
    pub fn expand(&self, lat_margin: f64, lon_margin: f64) -> GoesGridResult<Self> {
        GeoBox::new(
            self.south - lat_margin,
            self.north + lat_margin,
            self.west - lon_margin,
            self.east + lon_margin,
        )
    }

    /// The corners as (lat, lon) pairs in the order north-west, north-east, south-west,
    /// south-east.
    pub fn corners(&self) -> [(f64, f64); 4] {
        [
            (self.north, self.west),
            (self.north, self.east),
            (self.south, self.west),
            (self.south, self.east),
        ]
    }
}

impl Display for GeoBox {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "[{}, {}] x [{}, {}]",
            self.south, self.north, self.west, self.east
        )
    }
}

#[derive(Deserialize)]
struct RawGeoBox {
    lat_south: f64,
    lat_north: f64,
    lon_west: f64,
    lon_east: f64,
}

impl TryFrom<RawGeoBox> for GeoBox {
    type Error = GoesGridError;

    fn try_from(raw: RawGeoBox) -> Result<Self, Self::Error> {
        GeoBox::new(raw.lat_south, raw.lat_north, raw.lon_west, raw.lon_east)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_new_rejects_inverted_edges() {
        assert!(GeoBox::new(-40.0, -45.0, -75.0, -70.0).is_err());
        assert!(GeoBox::new(-45.0, -40.0, -70.0, -75.0).is_err());
        assert!(GeoBox::new(-45.0, -45.0, -75.0, -70.0).is_err());
        assert!(GeoBox::new(f64::NAN, -40.0, -75.0, -70.0).is_err());
        assert!(GeoBox::new(-45.0, -40.0, -75.0, -70.0).is_ok());
    }

    #[test]
    fn test_expand_and_shrink() {
        let area = GeoBox::new(-45.0, -20.0, -75.0, -45.0).unwrap();

        for margin in [0.0, 0.5, 1.0, 1.5, 2.25] {
            let grown = area.expand(margin, margin).unwrap();
            assert_eq!(grown.expand(-margin, -margin).unwrap(), area);
        }

        let grown = area.expand(1.5, 2.0).unwrap();
        assert_eq!(grown.south(), -46.5);
        assert_eq!(grown.north(), -18.5);
        assert_eq!(grown.west(), -77.0);
        assert_eq!(grown.east(), -43.0);

        // Shrinking away the whole box is not allowed.
        assert!(area.expand(-12.5, 0.0).is_err());
    }

    #[test]
    fn test_corner_order() {
        let area = GeoBox::new(-45.0, -40.0, -75.0, -70.0).unwrap();
        assert_eq!(
            area.corners(),
            [(-40.0, -75.0), (-40.0, -70.0), (-45.0, -75.0), (-45.0, -70.0)]
        );
    }
}
