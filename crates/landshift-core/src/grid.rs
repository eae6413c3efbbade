use serde::{Deserialize, Serialize};

/// Raster geometry shared by every layer of one run.
///
/// Affine, axis-aligned: `origin` is the outer corner of cell (0, 0) and
/// `pixel_height` is negative for north-up rasters. Coordinate math uses f64.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridFrame {
    pub width: usize,
    pub height: usize,
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
    /// Coordinate reference system identifier, e.g. "EPSG:3035".
    #[serde(default)]
    pub crs: Option<String>,
}

impl GridFrame {
    pub fn new(
        width: usize,
        height: usize,
        origin_x: f64,
        origin_y: f64,
        pixel_width: f64,
        pixel_height: f64,
    ) -> Self {
        Self {
            width,
            height,
            origin_x,
            origin_y,
            pixel_width,
            pixel_height,
            crs: None,
        }
    }

    /// Unit-pixel north-up frame anchored at (0, height).
    pub fn unit(width: usize, height: usize) -> Self {
        Self::new(width, height, 0.0, height as f64, 1.0, -1.0)
    }

    pub fn with_crs(mut self, crs: impl Into<String>) -> Self {
        self.crs = Some(crs.into());
        self
    }

    /// Number of cells.
    #[inline]
    pub fn len(&self) -> usize {
        self.width * self.height
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn index(&self, row: usize, col: usize) -> usize {
        row * self.width + col
    }

    #[inline]
    pub fn row_col(&self, index: usize) -> (usize, usize) {
        (index / self.width, index % self.width)
    }

    /// Map coordinates of the centre of cell (row, col).
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.origin_x + (col as f64 + 0.5) * self.pixel_width,
            self.origin_y + (row as f64 + 0.5) * self.pixel_height,
        )
    }

    /// Inverse transform: the cell containing map point (x, y), if inside.
    pub fn cell_at(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        if self.pixel_width == 0.0 || self.pixel_height == 0.0 {
            return None;
        }
        let fc = (x - self.origin_x) / self.pixel_width;
        let fr = (y - self.origin_y) / self.pixel_height;
        if fc < 0.0 || fr < 0.0 {
            return None;
        }
        let (row, col) = (fr.floor() as usize, fc.floor() as usize);
        (row < self.height && col < self.width).then_some((row, col))
    }

    /// Describe the first difference to `other`, or None if the frames are
    /// identical. Exact comparison: alignment is the ingestion layer's job.
    pub fn mismatch(&self, other: &GridFrame) -> Option<String> {
        if self.width != other.width || self.height != other.height {
            return Some(format!(
                "shape {}x{} vs {}x{}",
                other.width, other.height, self.width, self.height
            ));
        }
        if self.origin_x != other.origin_x || self.origin_y != other.origin_y {
            return Some(format!(
                "origin ({}, {}) vs ({}, {})",
                other.origin_x, other.origin_y, self.origin_x, self.origin_y
            ));
        }
        if self.pixel_width != other.pixel_width || self.pixel_height != other.pixel_height {
            return Some(format!(
                "resolution ({}, {}) vs ({}, {})",
                other.pixel_width, other.pixel_height, self.pixel_width, self.pixel_height
            ));
        }
        if self.crs != other.crs {
            return Some(format!("crs {:?} vs {:?}", other.crs, self.crs));
        }
        None
    }
}

/// Cell value types that can carry a nodata marker.
pub trait NodataValue: Copy + PartialEq {
    fn is_nodata(self, nodata: Option<Self>) -> bool {
        nodata == Some(self)
    }
}

impl NodataValue for u8 {}
impl NodataValue for u16 {}
impl NodataValue for i32 {}

impl NodataValue for f32 {
    fn is_nodata(self, nodata: Option<Self>) -> bool {
        self.is_nan() || nodata == Some(self)
    }
}

/// A single-band raster, row-major, row 0 at the frame origin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grid<T> {
    pub frame: GridFrame,
    pub data: Vec<T>,
    #[serde(default)]
    pub nodata: Option<T>,
}

/// Raw land-cover codes.
pub type ClassGrid = Grid<i32>;
/// Continuous or categorical-encoded covariates.
pub type CovariateGrid = Grid<f32>;
/// Land mask; `1` marks usable cells.
pub type MaskGrid = Grid<u8>;

impl<T: NodataValue> Grid<T> {
    /// Create a grid filled with `fill`.
    pub fn filled(frame: GridFrame, fill: T) -> Self {
        let data = vec![fill; frame.len()];
        Self {
            frame,
            data,
            nodata: None,
        }
    }

    /// Wrap existing row-major data. Length is checked when the grid enters
    /// the feature matrix builder.
    pub fn from_vec(frame: GridFrame, data: Vec<T>) -> Self {
        Self {
            frame,
            data,
            nodata: None,
        }
    }

    pub fn with_nodata(mut self, nodata: T) -> Self {
        self.nodata = Some(nodata);
        self
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> T {
        self.data[self.frame.index(row, col)]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, val: T) {
        let idx = self.frame.index(row, col);
        self.data[idx] = val;
    }

    #[inline]
    pub fn is_nodata_at(&self, index: usize) -> bool {
        self.data[index].is_nodata(self.nodata)
    }
}
