// ============================================================
// Layer 3 — Raster Domain Types
// ============================================================
// A raster is a grid of pixel values plus the information that
// pins that grid to the Earth:
//
//   - a coordinate reference system (CRS)
//   - an affine transform from (col, row) to CRS coordinates
//   - the grid dimensions
//
// Those three together are the "georeference". A prediction is
// only spatially valid if it carries the exact georeference of
// the raster it was computed from, so PredictionRaster can only
// be built from a RasterSample and copies it verbatim.
//
// Pixel arrays are channel-major: band 0 rows first, then band 1
// rows, and so on ([bands, height, width] flattened).

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

// GeoTIFF key ids used to identify a CRS
#[cfg(test)]
const GT_MODEL_TYPE_KEY: u16 = 1024;
#[cfg(test)]
const GT_RASTER_TYPE_KEY: u16 = 1025;
const GEOGRAPHIC_TYPE_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_KEY: u16 = 3072;
const USER_DEFINED: u16 = 32767;

// ─── GeoTransform ─────────────────────────────────────────────────────────────
/// Six-coefficient affine transform, rasterio ordering:
///
///   x = a * col + b * row + c
///   y = d * col + e * row + f
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl GeoTransform {
    pub const IDENTITY: Self = Self { a: 1.0, b: 0.0, c: 0.0, d: 0.0, e: 1.0, f: 0.0 };

    pub fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    /// Transform for a north-up grid whose top-left corner sits at
    /// (origin_x, origin_y). Pixel sizes are positive; y decreases
    /// as the row index grows.
    pub fn north_up(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self::new(pixel_width, 0.0, origin_x, 0.0, -pixel_height, origin_y)
    }

    /// Map a pixel-grid coordinate to CRS coordinates
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.a * col + self.b * row + self.c,
            self.d * col + self.e * row + self.f,
        )
    }

    /// True when the grid has no rotation or shear terms
    pub fn is_north_up(&self) -> bool {
        self.b == 0.0 && self.d == 0.0
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

// ─── Bounds ───────────────────────────────────────────────────────────────────
/// Axis-aligned extent of a raster in its CRS
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub left:   f64,
    pub bottom: f64,
    pub right:  f64,
    pub top:    f64,
}

// ─── Crs ──────────────────────────────────────────────────────────────────────
/// Coordinate reference system as stored in a GeoTIFF.
///
/// The raw key directory and parameter tables are kept as-is,
/// so copying a Crs from one file to another is lossless even
/// for user-defined projections we cannot name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Crs {
    /// GeoKeyDirectory: 4-value header then 4 values per key
    pub geo_keys:      Vec<u16>,
    pub double_params: Vec<f64>,
    pub ascii_params:  Option<String>,
}

impl Crs {
    /// Build a minimal key directory for an EPSG code.
    /// Codes in 4000..5000 are treated as geographic, everything
    /// else as projected.
    #[cfg(test)]
    pub fn from_epsg(code: u16) -> Self {
        let geographic = (4000..5000).contains(&code);
        let (model_type, type_key) = if geographic {
            (2, GEOGRAPHIC_TYPE_KEY)
        } else {
            (1, PROJECTED_CS_TYPE_KEY)
        };

        let geo_keys = vec![
            1, 1, 0, 3,
            GT_MODEL_TYPE_KEY,  0, 1, model_type,
            GT_RASTER_TYPE_KEY, 0, 1, 1, // PixelIsArea
            type_key,           0, 1, code,
        ];

        Self { geo_keys, double_params: Vec::new(), ascii_params: None }
    }

    /// EPSG code of the projected CRS, or of the geographic CRS
    /// when the raster is not projected.
    pub fn epsg(&self) -> Option<u16> {
        self.key_value(PROJECTED_CS_TYPE_KEY)
            .or_else(|| self.key_value(GEOGRAPHIC_TYPE_KEY))
            .filter(|&code| code != USER_DEFINED)
    }

    /// Inline value of a key, if the key is present and stored
    /// directly in the directory (location 0).
    fn key_value(&self, key: u16) -> Option<u16> {
        self.geo_keys
            .get(4..)?
            .chunks_exact(4)
            .find(|entry| entry[0] == key && entry[1] == 0)
            .map(|entry| entry[3])
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.epsg() {
            Some(code) => write!(f, "EPSG:{code}"),
            None       => write!(f, "custom"),
        }
    }
}

// ─── Georeference ─────────────────────────────────────────────────────────────
/// The (CRS, transform, dimensions) triple that ties a pixel grid
/// to the ground. Equality is exact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Georeference {
    pub crs:       Option<Crs>,
    pub transform: GeoTransform,
    pub width:     usize,
    pub height:    usize,
}

impl Georeference {
    pub fn new(crs: Option<Crs>, transform: GeoTransform, width: usize, height: usize) -> Self {
        Self { crs, transform, width, height }
    }

    /// Number of pixels in one band
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// Extent covered by the four outer corners of the grid
    pub fn bounds(&self) -> Bounds {
        let (w, h) = (self.width as f64, self.height as f64);
        let corners = [
            self.transform.apply(0.0, 0.0),
            self.transform.apply(w, 0.0),
            self.transform.apply(0.0, h),
            self.transform.apply(w, h),
        ];

        let mut bounds = Bounds {
            left:   f64::INFINITY,
            bottom: f64::INFINITY,
            right:  f64::NEG_INFINITY,
            top:    f64::NEG_INFINITY,
        };
        for (x, y) in corners {
            bounds.left   = bounds.left.min(x);
            bounds.right  = bounds.right.max(x);
            bounds.bottom = bounds.bottom.min(y);
            bounds.top    = bounds.top.max(y);
        }
        bounds
    }
}

// ─── RasterSample ─────────────────────────────────────────────────────────────
/// One georeferenced raster read from disk.
///
/// Fields are private: a sample is immutable once read, and the
/// pixel buffer length is checked against the georeference on
/// construction.
#[derive(Debug, Clone)]
pub struct RasterSample {
    path:   PathBuf,
    pixels: Vec<f32>,
    bands:  usize,
    georef: Georeference,
    bounds: Bounds,
}

impl RasterSample {
    pub fn new(
        path:   impl Into<PathBuf>,
        pixels: Vec<f32>,
        bands:  usize,
        georef: Georeference,
    ) -> Result<Self> {
        let path = path.into();
        ensure!(bands > 0, "raster '{}' has no bands", path.display());
        ensure!(
            pixels.len() == bands * georef.pixel_count(),
            "raster '{}': {} values do not fill {} bands of {}x{}",
            path.display(),
            pixels.len(),
            bands,
            georef.width,
            georef.height,
        );

        let bounds = georef.bounds();
        Ok(Self { path, pixels, bands, georef, bounds })
    }

    pub fn path(&self) -> &Path { &self.path }

    /// Channel-major pixel values, [bands, height, width]
    pub fn pixels(&self) -> &[f32] { &self.pixels }

    pub fn bands(&self) -> usize { self.bands }

    pub fn georef(&self) -> &Georeference { &self.georef }

    pub fn bounds(&self) -> Bounds { self.bounds }

    pub fn crs(&self) -> Option<&Crs> { self.georef.crs.as_ref() }

    pub fn width(&self) -> usize { self.georef.width }

    pub fn height(&self) -> usize { self.georef.height }

    /// Shape as [bands, height, width]
    pub fn shape(&self) -> [usize; 3] {
        [self.bands, self.georef.height, self.georef.width]
    }

    /// File name without its extension, used to name outputs
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string())
    }
}

// ─── PredictionRaster ─────────────────────────────────────────────────────────
/// Model output aligned to the grid of the sample it came from.
#[derive(Debug, Clone)]
pub struct PredictionRaster {
    pixels: Vec<f32>,
    bands:  usize,
    georef: Georeference,
}

impl PredictionRaster {
    /// Wrap a model output for `source`. The output must cover the
    /// source grid exactly; the georeference is cloned from it.
    pub fn from_source(source: &RasterSample, pixels: Vec<f32>, bands: usize) -> Result<Self> {
        ensure!(bands > 0, "prediction for '{}' has no bands", source.path().display());
        ensure!(
            pixels.len() == bands * source.georef().pixel_count(),
            "prediction for '{}' has {} values, expected {} bands of {}x{}",
            source.path().display(),
            pixels.len(),
            bands,
            source.width(),
            source.height(),
        );

        Ok(Self { pixels, bands, georef: source.georef().clone() })
    }

    pub fn pixels(&self) -> &[f32] { &self.pixels }

    pub fn bands(&self) -> usize { self.bands }

    pub fn georef(&self) -> &Georeference { &self.georef }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn utm_georef(width: usize, height: usize) -> Georeference {
        Georeference::new(
            Some(Crs::from_epsg(32633)),
            GeoTransform::north_up(500_000.0, 4_600_000.0, 10.0, 10.0),
            width,
            height,
        )
    }

    #[test]
    fn test_north_up_bounds() {
        let bounds = utm_georef(100, 50).bounds();
        assert_eq!(bounds.left,   500_000.0);
        assert_eq!(bounds.right,  501_000.0);
        assert_eq!(bounds.top,    4_600_000.0);
        assert_eq!(bounds.bottom, 4_599_500.0);
    }

    #[test]
    fn test_epsg_lookup() {
        assert_eq!(Crs::from_epsg(32633).epsg(), Some(32633));
        assert_eq!(Crs::from_epsg(4326).epsg(),  Some(4326));
        assert_eq!(Crs::from_epsg(4326).to_string(), "EPSG:4326");

        let custom = Crs { geo_keys: vec![1, 1, 0, 0], double_params: vec![], ascii_params: None };
        assert_eq!(custom.epsg(), None);
        assert_eq!(custom.to_string(), "custom");
    }

    #[test]
    fn test_sample_rejects_short_buffer() {
        let result = RasterSample::new("a.tif", vec![0.0; 10], 3, utm_georef(4, 4));
        assert!(result.is_err());
    }

    #[test]
    fn test_prediction_copies_georeference() {
        let sample = RasterSample::new("tiles/a.tif", vec![1.0; 3 * 16], 3, utm_georef(4, 4)).unwrap();
        let pred   = PredictionRaster::from_source(&sample, vec![0.5; 2 * 16], 2).unwrap();

        assert_eq!(pred.georef(), sample.georef());
        assert_eq!(pred.bands(), 2);
        assert_eq!(sample.stem(), "a");
    }

    #[test]
    fn test_prediction_rejects_wrong_grid() {
        let sample = RasterSample::new("a.tif", vec![1.0; 16], 1, utm_georef(4, 4)).unwrap();
        assert!(PredictionRaster::from_source(&sample, vec![0.0; 9], 1).is_err());
    }
}
