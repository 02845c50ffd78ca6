use serde::Serialize;
use thiserror::Error;

/// Raised when bin-wise combination sees histograms with different binning.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("cannot combine {left} with {right}: binning differs")]
pub struct BinningError {
    pub left: String,
    pub right: String,
}

/// Fixed-width axis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Axis {
    pub nbins: usize,
    pub min: f64,
    pub max: f64,
    pub label: String,
}

impl Axis {
    pub fn new(nbins: usize, min: f64, max: f64, label: impl Into<String>) -> Self {
        Self {
            nbins: nbins.max(1),
            min,
            max,
            label: label.into(),
        }
    }

    /// Returns the in-range bin index for `x`, or `None` for under/overflow.
    pub fn find_bin(&self, x: f64) -> Option<usize> {
        if !(x >= self.min && x < self.max) {
            return None;
        }
        let width = (self.max - self.min) / self.nbins as f64;
        let idx = ((x - self.min) / width) as usize;
        Some(idx.min(self.nbins - 1))
    }

    pub fn bin_center(&self, idx: usize) -> f64 {
        let width = (self.max - self.min) / self.nbins as f64;
        self.min + width * (idx as f64 + 0.5)
    }

    fn same_binning(&self, other: &Axis) -> bool {
        self.nbins == other.nbins && self.min == other.min && self.max == other.max
    }
}

/// Binned 1-D or 2-D distribution.
///
/// Contents are stored for in-range bins only, x-major
/// (`ix * ny + iy`); fills outside the axes go to `overflow`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Histogram {
    pub name: String,
    pub title: String,
    pub x: Axis,
    pub y: Option<Axis>,
    /// Label of the bin-content axis of a 1-D histogram.
    pub value_label: String,
    contents: Vec<f64>,
    overflow: f64,
    entries: u64,
}

impl Histogram {
    pub fn new_1d(name: impl Into<String>, title: impl Into<String>, x: Axis) -> Self {
        let n = x.nbins;
        Self {
            name: name.into(),
            title: title.into(),
            x,
            y: None,
            value_label: String::new(),
            contents: vec![0.0; n],
            overflow: 0.0,
            entries: 0,
        }
    }

    pub fn new_2d(name: impl Into<String>, title: impl Into<String>, x: Axis, y: Axis) -> Self {
        let n = x.nbins * y.nbins;
        Self {
            name: name.into(),
            title: title.into(),
            x,
            y: Some(y),
            value_label: String::new(),
            contents: vec![0.0; n],
            overflow: 0.0,
            entries: 0,
        }
    }

    /// 1 or 2.
    pub fn dimension(&self) -> u8 {
        if self.y.is_some() {
            2
        } else {
            1
        }
    }

    pub fn nbins_x(&self) -> usize {
        self.x.nbins
    }

    /// Number of y bins; 1 for a 1-D histogram.
    pub fn nbins_y(&self) -> usize {
        self.y.as_ref().map_or(1, |y| y.nbins)
    }

    pub fn with_value_label(mut self, label: impl Into<String>) -> Self {
        self.value_label = label.into();
        self
    }

    /// Y axis label, or the value label for a 1-D histogram.
    pub fn y_label(&self) -> &str {
        self.y
            .as_ref()
            .map_or(self.value_label.as_str(), |y| y.label.as_str())
    }

    /// Number of fill calls, summed across `add`.
    pub fn entries(&self) -> u64 {
        self.entries
    }

    pub fn overflow(&self) -> f64 {
        self.overflow
    }

    /// Credits entries for contents written with `set_bin_content`.
    pub fn add_entries(&mut self, n: u64) {
        self.entries += n;
    }

    pub fn fill(&mut self, x: f64) {
        self.entries += 1;
        let ny = self.nbins_y();
        match self.x.find_bin(x) {
            Some(ix) => self.contents[ix * ny] += 1.0,
            None => self.overflow += 1.0,
        }
    }

    pub fn fill_2d(&mut self, x: f64, y: f64) {
        self.entries += 1;
        let iy = match &self.y {
            Some(axis) => axis.find_bin(y),
            None => Some(0),
        };
        match (self.x.find_bin(x), iy) {
            (Some(ix), Some(iy)) => {
                let ny = self.nbins_y();
                self.contents[ix * ny + iy] += 1.0;
            }
            _ => self.overflow += 1.0,
        }
    }

    pub fn bin_content(&self, ix: usize) -> f64 {
        self.bin_content_2d(ix, 0)
    }

    pub fn bin_content_2d(&self, ix: usize, iy: usize) -> f64 {
        if ix >= self.nbins_x() || iy >= self.nbins_y() {
            return 0.0;
        }
        self.contents[ix * self.nbins_y() + iy]
    }

    pub fn set_bin_content(&mut self, ix: usize, content: f64) {
        self.set_bin_content_2d(ix, 0, content);
    }

    /// Out-of-range indices are ignored.
    pub fn set_bin_content_2d(&mut self, ix: usize, iy: usize, content: f64) {
        let ny = self.nbins_y();
        if ix < self.nbins_x() && iy < ny {
            self.contents[ix * ny + iy] = content;
        }
    }

    /// Sum of in-range bin contents.
    pub fn integral(&self) -> f64 {
        self.contents.iter().sum()
    }

    /// Content-weighted mean of x bin centres; 0 when empty.
    pub fn mean(&self) -> f64 {
        let ny = self.nbins_y();
        let mut sum_w = 0.0;
        let mut sum_wx = 0.0;
        for ix in 0..self.nbins_x() {
            let w: f64 = self.contents[ix * ny..(ix + 1) * ny].iter().sum();
            sum_w += w;
            sum_wx += w * self.x.bin_center(ix);
        }
        if sum_w == 0.0 {
            0.0
        } else {
            sum_wx / sum_w
        }
    }

    pub fn same_binning(&self, other: &Histogram) -> bool {
        self.x.same_binning(&other.x)
            && match (&self.y, &other.y) {
                (None, None) => true,
                (Some(a), Some(b)) => a.same_binning(b),
                _ => false,
            }
    }

    /// Bin-wise sum of `other` into `self`.
    pub fn add(&mut self, other: &Histogram) -> Result<(), BinningError> {
        if !self.same_binning(other) {
            return Err(BinningError {
                left: self.name.clone(),
                right: other.name.clone(),
            });
        }
        for (dst, src) in self.contents.iter_mut().zip(&other.contents) {
            *dst += *src;
        }
        self.overflow += other.overflow;
        self.entries += other.entries;
        Ok(())
    }
}
