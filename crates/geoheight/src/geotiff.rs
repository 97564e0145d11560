//! Single-band GeoTIFF elevation cells.

use crate::cell::{CellOpener, ElevationCell};
use crate::cell_db::CellKey;
use crate::geo::{GeoPoint, GeoRect};
use crate::{ElevationError, Result};
use std::path::Path;
use std::sync::Arc;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;

/// GeoTIFF ModelPixelScale tag.
const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
/// GeoTIFF ModelTiepoint tag.
const TAG_MODEL_TIEPOINT: u16 = 33922;
/// GDAL_NODATA tag, stored as an ASCII string.
const TAG_GDAL_NODATA: u16 = 42113;
/// Null value assumed when a file carries no GDAL_NODATA tag.
const DEFAULT_NO_DATA: f32 = -999_999.0;

/// An elevation cell decoded from a north-up GeoTIFF.
///
/// The whole raster is held in memory; the cell cache bounds how many of
/// these exist at once.
#[derive(Debug)]
pub struct GeoTiffCell {
    /// Elevation data in row-major order (north to south, west to east).
    data: Vec<f32>,
    /// Width of the raster in pixels.
    width: u32,
    /// Height of the raster in pixels.
    height: u32,
    /// Geographic bounds.
    bounds: GeoRect,
    /// Elevations equal to this are treated as missing.
    no_data_value: Option<f32>,
}

impl GeoTiffCell {
    /// Load a cell from a GeoTIFF file.
    ///
    /// Bounds come from the ModelTiepoint/ModelPixelScale tags, falling back
    /// to a `n48w123`-style cell name in the filename.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut decoder = Self::decoder(path)?;
        let bounds = Self::read_geotransform(&mut decoder, path)?;
        Self::decode(decoder, bounds)
    }

    fn decoder(path: &Path) -> Result<Decoder<std::fs::File>> {
        let file = std::fs::File::open(path)?;

        // 1/3 arc-second cells are 10812 x 10812 f32 pixels (~466 MB)
        let mut limits = Limits::default();
        limits.decoding_buffer_size = 1024 * 1024 * 1024;
        limits.intermediate_buffer_size = 1024 * 1024 * 1024;
        limits.ifd_value_size = 1024 * 1024 * 1024;

        Ok(Decoder::new(file)?.with_limits(limits))
    }

    fn decode<R: std::io::Read + std::io::Seek>(
        mut decoder: Decoder<R>,
        bounds: GeoRect,
    ) -> Result<Self> {
        let (width, height) = decoder.dimensions()?;
        if width < 2 || height < 2 {
            return Err(ElevationError::InvalidGeoTiff(format!(
                "raster too small: {}x{}",
                width, height
            )));
        }
        let no_data_value = Self::read_nodata_value(&mut decoder);
        let data = Self::decode_elevation_data(&mut decoder)?;
        if data.len() != (width as usize) * (height as usize) {
            return Err(ElevationError::InvalidGeoTiff(format!(
                "expected a single band of {}x{} samples, got {}",
                width,
                height,
                data.len()
            )));
        }

        Ok(Self {
            data,
            width,
            height,
            bounds,
            no_data_value,
        })
    }

    /// Read the geographic bounds from GeoTIFF tags.
    fn read_geotransform<R: std::io::Read + std::io::Seek>(
        decoder: &mut Decoder<R>,
        path: &Path,
    ) -> Result<GeoRect> {
        let tiepoint = decoder.get_tag_f64_vec(Tag::from_u16_exhaustive(TAG_MODEL_TIEPOINT));
        let pixel_scale = decoder.get_tag_f64_vec(Tag::from_u16_exhaustive(TAG_MODEL_PIXEL_SCALE));

        if let (Ok(tiepoint), Ok(scale)) = (tiepoint, pixel_scale) {
            if tiepoint.len() >= 6 && scale.len() >= 2 {
                // Tiepoint is [i, j, k, x, y, z]; the raster origin is the north-west corner
                let tie_lon = tiepoint[3];
                let tie_lat = tiepoint[4];
                let (width, height) = decoder.dimensions()?;

                return Ok(GeoRect {
                    min_lat: tie_lat - (height as f64 * scale[1]),
                    max_lat: tie_lat,
                    min_lon: tie_lon,
                    max_lon: tie_lon + (width as f64 * scale[0]),
                });
            }
        }

        Self::bounds_from_filename(path)
    }

    /// Bounds of a 1x1 degree cell named like `USGS_13_n48w123_*.tif`.
    fn bounds_from_filename(path: &Path) -> Result<GeoRect> {
        let filename = path
            .file_name()
            .and_then(|s| s.to_str())
            .ok_or_else(|| ElevationError::InvalidFilename(path.display().to_string()))?;

        CellKey::from_filename(filename)
            .map(|key| key.bounds())
            .ok_or_else(|| ElevationError::InvalidFilename(filename.to_string()))
    }

    fn decode_elevation_data<R: std::io::Read + std::io::Seek>(
        decoder: &mut Decoder<R>,
    ) -> Result<Vec<f32>> {
        let result = decoder.read_image()?;

        match result {
            DecodingResult::F32(data) => Ok(data),
            DecodingResult::F64(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
            DecodingResult::I16(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
            DecodingResult::I32(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
            DecodingResult::U16(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
            DecodingResult::U32(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
            DecodingResult::I8(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
            DecodingResult::I64(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
            DecodingResult::U8(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
            DecodingResult::U64(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
        }
    }

    fn read_nodata_value<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>) -> Option<f32> {
        match decoder.get_tag_ascii_string(Tag::from_u16_exhaustive(TAG_GDAL_NODATA)) {
            Ok(value) => value.trim().trim_end_matches('\0').parse().ok(),
            Err(_) => Some(DEFAULT_NO_DATA),
        }
    }

    /// Sample at a pixel, `None` for null posts.
    fn pixel(&self, x: u32, y: u32) -> Option<f32> {
        let value = self.data[(y as usize) * (self.width as usize) + x as usize];
        match self.no_data_value {
            Some(nodata) if (value - nodata).abs() < 0.001 => None,
            _ if value.is_nan() => None,
            _ => Some(value),
        }
    }

    /// Bilinear interpolation between the four surrounding posts.
    fn interpolate(&self, lat: f64, lon: f64) -> Option<f64> {
        // Row 0 is the north edge
        let lat_range = self.bounds.max_lat - self.bounds.min_lat;
        let lon_range = self.bounds.max_lon - self.bounds.min_lon;

        let x = ((lon - self.bounds.min_lon) / lon_range) * (self.width - 1) as f64;
        let y = ((self.bounds.max_lat - lat) / lat_range) * (self.height - 1) as f64;

        let x0 = (x.floor() as u32).min(self.width - 1);
        let y0 = (y.floor() as u32).min(self.height - 1);
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);

        let fx = x - x0 as f64;
        let fy = y - y0 as f64;

        let v00 = self.pixel(x0, y0)? as f64;
        let v10 = self.pixel(x1, y0)? as f64;
        let v01 = self.pixel(x0, y1)? as f64;
        let v11 = self.pixel(x1, y1)? as f64;

        Some(
            v00 * (1.0 - fx) * (1.0 - fy)
                + v10 * fx * (1.0 - fy)
                + v01 * (1.0 - fx) * fy
                + v11 * fx * fy,
        )
    }

    /// Get the dimensions of this cell in pixels.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl ElevationCell for GeoTiffCell {
    fn bounding_rect(&self) -> GeoRect {
        self.bounds
    }

    fn height_above_msl(&self, point: &GeoPoint) -> f64 {
        if !self.bounds.contains_point(point) {
            return f64::NAN;
        }
        self.interpolate(point.lat, point.lon).unwrap_or(f64::NAN)
    }
}

/// Opens `.tif` / `.tiff` files as [`GeoTiffCell`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeoTiffOpener;

impl CellOpener for GeoTiffOpener {
    fn open(&self, path: &Path) -> Result<Arc<dyn ElevationCell>> {
        Ok(Arc::new(GeoTiffCell::from_file(path)?))
    }

    fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("tif") || ext.eq_ignore_ascii_case("tiff"))
    }
}
