//! Single-band `f64` rasters on a north-up grid.

use image::{ImageBuffer, Luma};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::engine::{BandStatistics, RasterInfo};
use crate::error::EngineError;
use crate::types::{Crs, Extent};

/// Band storage.
pub type Band = ImageBuffer<Luma<f64>, Vec<f64>>;

/// Cell counts within this fraction of a whole number are rounded.
const CELL_EPSILON: f64 = 1e-9;

/// Origin, resolution, size and CRS of a raster grid. Rows run from the
/// top edge down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    /// Left edge.
    pub xmin: f64,
    /// Top edge.
    pub ymax: f64,
    /// Pixel width.
    pub x_res: f64,
    /// Pixel height.
    pub y_res: f64,
    /// Columns.
    pub cols: u32,
    /// Rows.
    pub rows: u32,
    /// Coordinate reference system.
    #[serde(default)]
    pub crs: Crs,
}

impl GridSpec {
    /// Grid with the given resolution covering `extent`. A partial
    /// trailing cell is extended to a whole one.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidGrid`] when the resolution is not positive
    /// or the extent is empty or not finite.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn new(extent: &Extent, x_res: f64, y_res: f64, crs: Crs) -> Result<Self, EngineError> {
        if !(x_res.is_finite() && y_res.is_finite() && x_res > 0.0 && y_res > 0.0) {
            return Err(EngineError::InvalidGrid(format!(
                "resolution {x_res} x {y_res} is not positive"
            )));
        }
        if !extent.is_valid() {
            return Err(EngineError::InvalidGrid(format!("extent {extent} is not valid")));
        }
        let cols = (extent.width() / x_res - CELL_EPSILON).ceil();
        let rows = (extent.height() / y_res - CELL_EPSILON).ceil();
        if cols < 1.0 || rows < 1.0 || cols > f64::from(u32::MAX) || rows > f64::from(u32::MAX) {
            return Err(EngineError::InvalidGrid(format!(
                "extent {extent} at {x_res} x {y_res} gives {cols} x {rows} cells"
            )));
        }
        Ok(Self {
            xmin: extent.xmin,
            ymax: extent.ymax,
            x_res,
            y_res,
            cols: cols as u32,
            rows: rows as u32,
            crs,
        })
    }

    /// Bounding box of the grid.
    #[must_use]
    pub fn extent(&self) -> Extent {
        Extent::new(
            self.xmin,
            self.xmin + self.x_res * f64::from(self.cols),
            self.ymax - self.y_res * f64::from(self.rows),
            self.ymax,
        )
    }

    /// Map coordinates of a cell's centre.
    #[must_use]
    pub fn cell_center(&self, col: u32, row: u32) -> (f64, f64) {
        (
            self.xmin + self.x_res * (f64::from(col) + 0.5),
            self.ymax - self.y_res * (f64::from(row) + 0.5),
        )
    }

    /// Cell containing a map coordinate, if it lies on the grid.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn locate(&self, x: f64, y: f64) -> Option<(u32, u32)> {
        let col = ((x - self.xmin) / self.x_res).floor();
        let row = ((self.ymax - y) / self.y_res).floor();
        if col < 0.0 || row < 0.0 || col >= f64::from(self.cols) || row >= f64::from(self.rows) {
            return None;
        }
        Some((col as u32, row as u32))
    }

    /// Number of cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cols as usize * self.rows as usize
    }

    /// Whether the grid has no cells.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.cols == 0 || self.rows == 0
    }
}

/// A single-band raster with an optional nodata tag. NaN pixels are
/// always nodata.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    grid: GridSpec,
    nodata: Option<f64>,
    band: Band,
}

impl Raster {
    /// Raster with every pixel set to `value`.
    #[must_use]
    pub fn filled(grid: GridSpec, nodata: Option<f64>, value: f64) -> Self {
        let band = ImageBuffer::from_pixel(grid.cols, grid.rows, Luma([value]));
        Self { grid, nodata, band }
    }

    /// Raster from row-major pixel values.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidGrid`] when the value count does not match
    /// the grid.
    pub fn from_values(
        grid: GridSpec,
        nodata: Option<f64>,
        values: Vec<f64>,
    ) -> Result<Self, EngineError> {
        let count = values.len();
        let band = ImageBuffer::from_raw(grid.cols, grid.rows, values).ok_or_else(|| {
            EngineError::InvalidGrid(format!(
                "{count} values for a {} x {} grid",
                grid.cols, grid.rows
            ))
        })?;
        Ok(Self { grid, nodata, band })
    }

    /// Raster whose pixels are computed from their centre coordinates.
    /// `None` becomes the nodata tag, or NaN when there is none.
    pub fn from_fn<F>(grid: GridSpec, nodata: Option<f64>, mut pixel: F) -> Self
    where
        F: FnMut(f64, f64) -> Option<f64>,
    {
        let fallback = nodata.unwrap_or(f64::NAN);
        let band = ImageBuffer::from_fn(grid.cols, grid.rows, |col, row| {
            let (x, y) = grid.cell_center(col, row);
            Luma([pixel(x, y).unwrap_or(fallback)])
        });
        Self { grid, nodata, band }
    }

    /// The grid.
    #[must_use]
    pub const fn grid(&self) -> &GridSpec {
        &self.grid
    }

    /// The nodata tag.
    #[must_use]
    pub const fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    /// Raw pixel value, nodata included.
    #[must_use]
    pub fn get(&self, col: u32, row: u32) -> f64 {
        self.band.get_pixel(col, row).0[0]
    }

    /// Whether `value` is nodata for this raster.
    #[must_use]
    pub fn is_nodata(&self, value: f64) -> bool {
        #[allow(clippy::float_cmp)]
        let tagged = self.nodata.is_some_and(|n| n == value);
        value.is_nan() || tagged
    }

    /// Pixel value, or `None` for nodata.
    #[must_use]
    pub fn value(&self, col: u32, row: u32) -> Option<f64> {
        let v = self.get(col, row);
        (!self.is_nodata(v)).then_some(v)
    }

    /// Value of the cell containing a map coordinate. `None` for nodata
    /// and for points off the grid.
    #[must_use]
    pub fn sample(&self, x: f64, y: f64) -> Option<f64> {
        let (col, row) = self.grid.locate(x, y)?;
        self.value(col, row)
    }

    /// Row-major raw values.
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.band.pixels().map(|p| p.0[0])
    }

    /// Row-major values with nodata as `None`.
    pub fn valid_values(&self) -> impl Iterator<Item = Option<f64>> + '_ {
        self.values().map(|v| (!self.is_nodata(v)).then_some(v))
    }

    /// The same pixels under a new nodata tag. Pixels that were nodata
    /// under the old tag take the new value.
    #[must_use]
    pub fn with_nodata(&self, nodata: f64) -> Self {
        let mut band = self.band.clone();
        for pixel in band.pixels_mut() {
            if self.is_nodata(pixel.0[0]) {
                pixel.0[0] = nodata;
            }
        }
        Self {
            grid: self.grid.clone(),
            nodata: Some(nodata),
            band,
        }
    }

    /// Metadata as reported to the pipeline.
    #[must_use]
    pub fn info(&self) -> RasterInfo {
        RasterInfo {
            extent: self.grid.extent(),
            x_res: self.grid.x_res,
            y_res: self.grid.y_res,
            width: self.grid.cols as usize,
            height: self.grid.rows as usize,
            crs: self.grid.crs.clone(),
            nodata: self.nodata,
        }
    }

    /// Min, max and mean of the valid pixels, or `None` when there are
    /// none.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn statistics(&self) -> Option<BandStatistics> {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        let mut valid_count = 0_usize;
        for v in self.valid_values().flatten() {
            min = min.min(v);
            max = max.max(v);
            sum += v;
            valid_count += 1;
        }
        (valid_count > 0).then(|| BandStatistics {
            min,
            max,
            mean: sum / valid_count as f64,
            valid_count,
        })
    }
}

/// Serde proxy for [`Raster`]. Pixels are either listed row by row in
/// `values` or given as a constant `fill`.
#[derive(Serialize, Deserialize)]
struct RasterProxy {
    grid: GridSpec,
    #[serde(default)]
    nodata: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    values: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fill: Option<f64>,
}

impl Serialize for Raster {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let fallback = self.nodata.unwrap_or(crate::types::NODATA);
        let values = self
            .values()
            .map(|v| if v.is_nan() { fallback } else { v })
            .collect();
        RasterProxy {
            grid: self.grid.clone(),
            nodata: self.nodata,
            values: Some(values),
            fill: None,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Raster {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let proxy = RasterProxy::deserialize(deserializer)?;
        match (proxy.values, proxy.fill) {
            (Some(values), None) => {
                Self::from_values(proxy.grid, proxy.nodata, values).map_err(serde::de::Error::custom)
            }
            (None, Some(fill)) => Ok(Self::filled(proxy.grid, proxy.nodata, fill)),
            _ => Err(serde::de::Error::custom(
                "raster needs exactly one of `values` or `fill`",
            )),
        }
    }
}
