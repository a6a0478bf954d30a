// ============================================================
// Layer 6 — GeoTIFF Codec
// ============================================================
// Reads and writes GeoTIFF files with the `tiff` crate.
//
// A GeoTIFF is an ordinary TIFF with a few extra tags:
//
//   33550 ModelPixelScale      (sx, sy, sz)
//   33922 ModelTiepoint        (i, j, k, x, y, z)  pixel ↔ world anchor
//   34264 ModelTransformation  4x4 matrix, used for rotated grids
//   34735 GeoKeyDirectory      CRS definition as a key table
//   34736 GeoDoubleParams      float values referenced by keys
//   34737 GeoAsciiParams       string values referenced by keys
//
// Reading:
//   any sample type → f32, pixel-interleaved → channel-major,
//   optionally keeping only the leading bands.
//
// Writing:
//   f32 samples, pixel-interleaved, fixed-size square tiles,
//   each tile LZW-compressed (weezl, the codec `tiff` itself
//   decodes with). Edge tiles are zero-padded as TIFF requires.
//   North-up grids are written as scale + tiepoint, anything
//   else as a full ModelTransformation.
//
// A file written here and read back yields the same
// Georeference, bit for bit.

use std::fs::{self, File};
use std::io::{BufReader, Cursor, Read, Seek, Write};
use std::path::Path;

use anyhow::{anyhow, bail, ensure, Context, Result};
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::{DirectoryEncoder, TiffEncoder, TiffKind};
use tiff::tags::Tag;
use tiff::ColorType;

use crate::domain::raster::{Crs, GeoTransform, Georeference, PredictionRaster, RasterSample};
use crate::domain::traits::{PredictionSink, RasterSource};

const MODEL_PIXEL_SCALE:    u16 = 33550;
const MODEL_TIEPOINT:       u16 = 33922;
const MODEL_TRANSFORMATION: u16 = 34264;
const GEO_KEY_DIRECTORY:    u16 = 34735;
const GEO_DOUBLE_PARAMS:    u16 = 34736;
const GEO_ASCII_PARAMS:     u16 = 34737;

const COMPRESSION_LZW:           u16 = 5;
const PHOTOMETRIC_BLACK_IS_ZERO: u16 = 1;
const PLANAR_CHUNKY:             u16 = 1;
const SAMPLE_FORMAT_IEEEFP:      u16 = 3;
const EXTRA_SAMPLE_UNSPECIFIED:  u16 = 0;

/// Resolve a numeric tag through the crate's table so lookups
/// match whatever variant the decoder produced for it.
fn geo_tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

// ─── Options ──────────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct GeoTiffReadOptions {
    /// Keep at most this many leading bands (None = all)
    pub band_limit: Option<usize>,

    /// Upper bound on the decoded buffer for one raster
    pub max_decode_bytes: usize,
}

impl Default for GeoTiffReadOptions {
    fn default() -> Self {
        Self { band_limit: Some(3), max_decode_bytes: 512 * 1024 * 1024 }
    }
}

#[derive(Debug, Clone)]
pub struct GeoTiffWriteOptions {
    /// Tile edge in pixels; TIFF requires a multiple of 16
    pub block_size: u32,
}

impl Default for GeoTiffWriteOptions {
    fn default() -> Self {
        Self { block_size: 256 }
    }
}

// ─── Reading ──────────────────────────────────────────────────────────────────
/// Decode a GeoTIFF into a channel-major RasterSample.
pub fn read_geotiff(path: &Path, options: &GeoTiffReadOptions) -> Result<RasterSample> {
    let file = File::open(path)
        .with_context(|| format!("Cannot open '{}'", path.display()))?;

    let mut limits = Limits::default();
    limits.decoding_buffer_size = options.max_decode_bytes;

    let mut decoder = Decoder::new(BufReader::new(file))
        .with_context(|| format!("'{}' is not a TIFF file", path.display()))?
        .with_limits(limits);

    let (width, height) = decoder.dimensions()?;
    let (width, height) = (width as usize, height as usize);
    let samples = samples_per_pixel(decoder.colortype()?)?;

    // Tags first: read_image() leaves the decoder positioned on pixel data
    let georef = read_georeference(&mut decoder, width, height)
        .with_context(|| format!("Bad georeferencing in '{}'", path.display()))?;

    let interleaved = to_f32(decoder.read_image()?)?;
    let pixel_count = width * height;
    ensure!(
        interleaved.len() == samples * pixel_count,
        "'{}' decoded to {} values, expected {} ({} bands of {}x{}); planar-separate files are not supported",
        path.display(),
        interleaved.len(),
        samples * pixel_count,
        samples,
        width,
        height,
    );

    let keep   = options.band_limit.map_or(samples, |limit| samples.min(limit));
    let pixels = deinterleave(&interleaved, samples, keep, pixel_count);

    let sample = RasterSample::new(path, pixels, keep, georef)?;
    tracing::debug!(
        "Read '{}': {}x{} px, {} of {} bands, {} {:?}",
        path.display(),
        width,
        height,
        keep,
        samples,
        sample.crs().map_or("no CRS".to_string(), |crs| crs.to_string()),
        sample.bounds(),
    );
    Ok(sample)
}

fn samples_per_pixel(color: ColorType) -> Result<usize> {
    Ok(match color {
        ColorType::Gray(_)  => 1,
        ColorType::GrayA(_) => 2,
        ColorType::RGB(_)   => 3,
        ColorType::RGBA(_) | ColorType::CMYK(_) => 4,
        ColorType::Multiband { num_samples, .. } => num_samples as usize,
        other => bail!("unsupported colour type {other:?}"),
    })
}

#[allow(unreachable_patterns)]
fn to_f32(result: DecodingResult) -> Result<Vec<f32>> {
    Ok(match result {
        DecodingResult::U8(v)  => v.into_iter().map(f32::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I8(v)  => v.into_iter().map(f32::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
        _ => bail!("unsupported sample format"),
    })
}

/// [h*w pixels × samples] interleaved → [keep bands × h*w] planar
fn deinterleave(interleaved: &[f32], samples: usize, keep: usize, pixel_count: usize) -> Vec<f32> {
    let mut planar = vec![0.0f32; keep * pixel_count];
    for (px, pixel) in interleaved.chunks_exact(samples).enumerate() {
        for band in 0..keep {
            planar[band * pixel_count + px] = pixel[band];
        }
    }
    planar
}

fn read_georeference<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    width:   usize,
    height:  usize,
) -> Result<Georeference> {
    let transform = read_transform(decoder)?;
    let crs       = read_crs(decoder)?;
    Ok(Georeference::new(crs, transform, width, height))
}

fn read_f64_tag<R: Read + Seek>(decoder: &mut Decoder<R>, code: u16) -> Result<Option<Vec<f64>>> {
    match decoder.find_tag(geo_tag(code))? {
        Some(value) => Ok(Some(value.into_f64_vec()?)),
        None        => Ok(None),
    }
}

fn read_transform<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<GeoTransform> {
    if let Some(m) = read_f64_tag(decoder, MODEL_TRANSFORMATION)? {
        ensure!(m.len() >= 8, "ModelTransformation has {} values", m.len());
        return Ok(GeoTransform::new(m[0], m[1], m[3], m[4], m[5], m[7]));
    }

    let scale = read_f64_tag(decoder, MODEL_PIXEL_SCALE)?;
    let tie   = read_f64_tag(decoder, MODEL_TIEPOINT)?;
    match (scale, tie) {
        (Some(scale), Some(tie)) => {
            ensure!(scale.len() >= 2, "ModelPixelScale has {} values", scale.len());
            ensure!(tie.len()   >= 6, "ModelTiepoint has {} values", tie.len());

            let (sx, sy)       = (scale[0], scale[1]);
            let (i, j, x, y)   = (tie[0], tie[1], tie[3], tie[4]);
            // Tiepoint anchors pixel (i, j) at (x, y); shift the anchor to (0, 0)
            Ok(GeoTransform::north_up(x - i * sx, y + j * sy, sx, sy))
        }
        _ => Ok(GeoTransform::IDENTITY),
    }
}

fn read_crs<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<Option<Crs>> {
    let Some(keys) = decoder.find_tag(geo_tag(GEO_KEY_DIRECTORY))? else {
        return Ok(None);
    };
    let geo_keys      = keys.into_u16_vec()?;
    let double_params = read_f64_tag(decoder, GEO_DOUBLE_PARAMS)?.unwrap_or_default();
    let ascii_params  = match decoder.find_tag(geo_tag(GEO_ASCII_PARAMS))? {
        Some(value) => Some(value.into_string()?),
        None        => None,
    };

    Ok(Some(Crs { geo_keys, double_params, ascii_params }))
}

// ─── Writing ──────────────────────────────────────────────────────────────────
/// Write a channel-major f32 raster as a tiled, LZW-compressed GeoTIFF.
/// Parent directories are created as needed.
pub fn write_geotiff(
    path:    &Path,
    pixels:  &[f32],
    bands:   usize,
    georef:  &Georeference,
    options: &GeoTiffWriteOptions,
) -> Result<()> {
    ensure!(bands > 0, "cannot write a raster with no bands");
    ensure!(
        pixels.len() == bands * georef.pixel_count(),
        "{} values do not fill {} bands of {}x{}",
        pixels.len(), bands, georef.width, georef.height,
    );
    ensure!(
        options.block_size > 0 && options.block_size % 16 == 0,
        "tile size {} is not a positive multiple of 16",
        options.block_size,
    );

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create directory '{}'", parent.display()))?;
    }

    let tiles = encode_tiles(pixels, bands, georef.width, georef.height, options.block_size as usize)?;

    // Encoded in memory, then written to disk in one call
    let mut buf = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut buf)?;
        let mut dir     = encoder.new_directory()?;

        // Tile payloads go first so their offsets are known when the IFD is written
        let mut offsets     = Vec::with_capacity(tiles.len());
        let mut byte_counts = Vec::with_capacity(tiles.len());
        for tile in &tiles {
            let offset = dir.write_data(tile.as_slice())?;
            offsets.push(u32::try_from(offset).context("output exceeds 4 GiB; BigTIFF is not supported")?);
            byte_counts.push(u32::try_from(tile.len())?);
        }

        let samples = u16::try_from(bands).context("too many bands for one TIFF")?;
        dir.write_tag(Tag::ImageWidth,  u32::try_from(georef.width)?)?;
        dir.write_tag(Tag::ImageLength, u32::try_from(georef.height)?)?;
        dir.write_tag(Tag::BitsPerSample, &vec![32u16; bands][..])?;
        dir.write_tag(Tag::Compression, COMPRESSION_LZW)?;
        dir.write_tag(Tag::PhotometricInterpretation, PHOTOMETRIC_BLACK_IS_ZERO)?;
        dir.write_tag(Tag::SamplesPerPixel, samples)?;
        dir.write_tag(Tag::PlanarConfiguration, PLANAR_CHUNKY)?;
        dir.write_tag(Tag::TileWidth,  options.block_size)?;
        dir.write_tag(Tag::TileLength, options.block_size)?;
        dir.write_tag(Tag::TileOffsets,    &offsets[..])?;
        dir.write_tag(Tag::TileByteCounts, &byte_counts[..])?;
        dir.write_tag(Tag::SampleFormat, &vec![SAMPLE_FORMAT_IEEEFP; bands][..])?;
        if bands > 1 {
            dir.write_tag(Tag::ExtraSamples, &vec![EXTRA_SAMPLE_UNSPECIFIED; bands - 1][..])?;
        }
        write_georeference(&mut dir, georef)?;
        dir.finish()?;
    }
    fs::write(path, buf.into_inner())
        .with_context(|| format!("Cannot write '{}'", path.display()))?;

    tracing::debug!(
        "Wrote '{}': {}x{} px, {} bands, {} tiles",
        path.display(), georef.width, georef.height, bands, tiles.len()
    );
    Ok(())
}

/// Cut the raster into row-major tiles and LZW-compress each one.
fn encode_tiles(
    pixels: &[f32],
    bands:  usize,
    width:  usize,
    height: usize,
    block:  usize,
) -> Result<Vec<Vec<u8>>> {
    let plane        = width * height;
    let tiles_across = width.div_ceil(block);
    let tiles_down   = height.div_ceil(block);

    let mut tiles = Vec::with_capacity(tiles_across * tiles_down);
    let mut tile  = vec![0.0f32; block * block * bands];

    for ty in 0..tiles_down {
        for tx in 0..tiles_across {
            tile.fill(0.0);
            let (x0, y0) = (tx * block, ty * block);
            let rows     = block.min(height - y0);
            let cols     = block.min(width - x0);

            for r in 0..rows {
                for c in 0..cols {
                    let src = (y0 + r) * width + (x0 + c);
                    let dst = (r * block + c) * bands;
                    for b in 0..bands {
                        tile[dst + b] = pixels[b * plane + src];
                    }
                }
            }

            // The encoder writes a native-endian header, so samples follow suit
            let bytes: Vec<u8> = tile.iter().flat_map(|v| v.to_ne_bytes()).collect();
            let compressed = weezl::encode::Encoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8)
                .encode(&bytes)
                .map_err(|e| anyhow!("LZW encoding failed: {e}"))?;
            tiles.push(compressed);
        }
    }

    Ok(tiles)
}

fn write_georeference<W: Write + Seek, K: TiffKind>(
    dir:    &mut DirectoryEncoder<'_, W, K>,
    georef: &Georeference,
) -> Result<()> {
    let t = &georef.transform;
    if t.is_north_up() {
        dir.write_tag(geo_tag(MODEL_PIXEL_SCALE), &[t.a, -t.e, 0.0][..])?;
        dir.write_tag(geo_tag(MODEL_TIEPOINT), &[0.0, 0.0, 0.0, t.c, t.f, 0.0][..])?;
    } else {
        let matrix = [
            t.a, t.b, 0.0, t.c,
            t.d, t.e, 0.0, t.f,
            0.0, 0.0, 0.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ];
        dir.write_tag(geo_tag(MODEL_TRANSFORMATION), &matrix[..])?;
    }

    if let Some(crs) = &georef.crs {
        dir.write_tag(geo_tag(GEO_KEY_DIRECTORY), crs.geo_keys.as_slice())?;
        if !crs.double_params.is_empty() {
            dir.write_tag(geo_tag(GEO_DOUBLE_PARAMS), crs.double_params.as_slice())?;
        }
        if let Some(ascii) = &crs.ascii_params {
            dir.write_tag(geo_tag(GEO_ASCII_PARAMS), ascii.as_str())?;
        }
    }
    Ok(())
}

// ─── Source / Sink ────────────────────────────────────────────────────────────
/// Single-attempt GeoTIFF reader
#[derive(Debug, Clone, Default)]
pub struct GeoTiffSource {
    options: GeoTiffReadOptions,
}

impl GeoTiffSource {
    pub fn new(options: GeoTiffReadOptions) -> Self {
        Self { options }
    }
}

impl RasterSource for GeoTiffSource {
    fn read(&self, path: &Path) -> Result<RasterSample> {
        read_geotiff(path, &self.options)
    }
}

/// Writes predictions as tiled GeoTIFFs
#[derive(Debug, Clone, Default)]
pub struct GeoTiffSink {
    options: GeoTiffWriteOptions,
}

impl GeoTiffSink {
    pub fn new(options: GeoTiffWriteOptions) -> Self {
        Self { options }
    }
}

impl PredictionSink for GeoTiffSink {
    fn write(&self, raster: &PredictionRaster, path: &Path) -> Result<()> {
        write_geotiff(path, raster.pixels(), raster.bands(), raster.georef(), &self.options)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ramp(bands: usize, width: usize, height: usize) -> Vec<f32> {
        (0..bands * width * height).map(|i| i as f32 * 0.25).collect()
    }

    fn utm(width: usize, height: usize) -> Georeference {
        Georeference::new(
            Some(Crs::from_epsg(32633)),
            GeoTransform::north_up(399_960.0, 5_000_040.0, 10.0, 10.0),
            width,
            height,
        )
    }

    #[test]
    fn test_write_then_read_preserves_pixels_and_georeference() {
        let tmp    = TempDir::new().unwrap();
        let path   = tmp.path().join("nested/dir/scene.tif");
        // 300 px wide spans two tiles horizontally, exercising edge padding
        let georef = utm(300, 20);
        let pixels = ramp(2, 300, 20);

        write_geotiff(&path, &pixels, 2, &georef, &GeoTiffWriteOptions::default()).unwrap();

        let options = GeoTiffReadOptions { band_limit: None, ..Default::default() };
        let sample  = read_geotiff(&path, &options).unwrap();

        assert_eq!(sample.georef(), &georef);
        assert_eq!(sample.bands(), 2);
        assert_eq!(sample.pixels(), pixels.as_slice());
    }

    #[test]
    fn test_band_limit_keeps_leading_bands() {
        let tmp    = TempDir::new().unwrap();
        let path   = tmp.path().join("four_band.tif");
        let georef = utm(8, 6);
        let pixels = ramp(4, 8, 6);
        write_geotiff(&path, &pixels, 4, &georef, &GeoTiffWriteOptions::default()).unwrap();

        let sample = read_geotiff(&path, &GeoTiffReadOptions::default()).unwrap();

        assert_eq!(sample.bands(), 3);
        assert_eq!(sample.pixels(), &pixels[..3 * 48]);
    }

    #[test]
    fn test_fewer_bands_than_limit_are_read_in_full() {
        let tmp  = TempDir::new().unwrap();
        let path = tmp.path().join("two_band.tif");
        write_geotiff(&path, &ramp(2, 5, 5), 2, &utm(5, 5), &GeoTiffWriteOptions::default()).unwrap();

        let sample = read_geotiff(&path, &GeoTiffReadOptions::default()).unwrap();
        assert_eq!(sample.bands(), 2);
    }

    #[test]
    fn test_rotated_transform_round_trips() {
        let tmp    = TempDir::new().unwrap();
        let path   = tmp.path().join("rotated.tif");
        let georef = Georeference::new(
            Some(Crs::from_epsg(4326)),
            GeoTransform::new(0.5, 0.1, 12.0, 0.1, -0.5, 45.0),
            4,
            4,
        );
        write_geotiff(&path, &ramp(1, 4, 4), 1, &georef, &GeoTiffWriteOptions::default()).unwrap();

        let sample = read_geotiff(&path, &GeoTiffReadOptions::default()).unwrap();
        assert_eq!(sample.georef(), &georef);
    }

    #[test]
    fn test_garbage_file_is_an_error() {
        let tmp  = TempDir::new().unwrap();
        let path = tmp.path().join("broken.tif");
        fs::write(&path, b"definitely not a tiff").unwrap();

        assert!(read_geotiff(&path, &GeoTiffReadOptions::default()).is_err());
    }

    #[test]
    fn test_rejects_bad_tile_size() {
        let tmp     = TempDir::new().unwrap();
        let options = GeoTiffWriteOptions { block_size: 100 };
        let result  = write_geotiff(&tmp.path().join("x.tif"), &ramp(1, 4, 4), 1, &utm(4, 4), &options);
        assert!(result.is_err());
    }

    #[test]
    fn test_default_output_is_256_tiles_with_lzw() {
        let tmp  = TempDir::new().unwrap();
        let path = tmp.path().join("tiled.tif");
        write_geotiff(&path, &ramp(1, 300, 300), 1, &utm(300, 300), &GeoTiffWriteOptions::default()).unwrap();

        let mut decoder = Decoder::new(File::open(&path).unwrap()).unwrap();
        assert_eq!(decoder.get_tag_u32(Tag::TileWidth).unwrap(), 256);
        assert_eq!(decoder.get_tag_u32(Tag::TileLength).unwrap(), 256);
        assert_eq!(decoder.get_tag_u32(Tag::Compression).unwrap(), 5);
        // 300x300 needs a 2x2 tile grid
        assert_eq!(decoder.get_tag_u32_vec(Tag::TileOffsets).unwrap().len(), 4);
    }

    #[test]
    fn test_write_error_is_reported() {
        let tmp  = TempDir::new().unwrap();
        let path = tmp.path().join("taken");
        fs::create_dir(&path).unwrap();

        let err = write_geotiff(&path, &ramp(1, 4, 4), 1, &utm(4, 4), &GeoTiffWriteOptions::default()).unwrap_err();
        assert!(err.to_string().contains("Cannot write"), "{err}");
    }
}
