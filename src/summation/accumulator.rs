use crate::store::Handle;

use super::histogram::Histogram;

/// Contents of one table slot: a per-event counter or a bound histogram.
///
/// A slot keeps its kind for the whole run; stage 1 only ever creates
/// counters lazily, histograms come from booking or harvesting.
#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    Counter(u64),
    Histogram {
        histogram: Histogram,
        /// Store handle once the histogram has been published.
        handle: Option<Handle>,
    },
}

impl Accumulator {
    pub fn histogram(histogram: Histogram) -> Self {
        Self::Histogram {
            histogram,
            handle: None,
        }
    }

    pub fn bound(histogram: Histogram, handle: Handle) -> Self {
        Self::Histogram {
            histogram,
            handle: Some(handle),
        }
    }

    pub fn is_counter(&self) -> bool {
        matches!(self, Self::Counter(_))
    }

    /// Counter value; histograms report their entry count.
    pub fn count(&self) -> u64 {
        match self {
            Self::Counter(n) => *n,
            Self::Histogram { histogram, .. } => histogram.entries(),
        }
    }

    pub fn as_histogram(&self) -> Option<&Histogram> {
        match self {
            Self::Histogram { histogram, .. } => Some(histogram),
            Self::Counter(_) => None,
        }
    }

    pub fn as_histogram_mut(&mut self) -> Option<&mut Histogram> {
        match self {
            Self::Histogram { histogram, .. } => Some(histogram),
            Self::Counter(_) => None,
        }
    }

    pub fn handle(&self) -> Option<Handle> {
        match self {
            Self::Histogram { handle, .. } => *handle,
            Self::Counter(_) => None,
        }
    }

    /// Records one sample with 0, 1 or 2 axis values.
    /// Counters only count; the values are ignored.
    pub fn fill(&mut self, dimensions: u8, x: f64, y: f64) {
        match self {
            Self::Counter(n) => *n += 1,
            Self::Histogram { histogram, .. } => match dimensions {
                0 => histogram.fill(0.0),
                1 => histogram.fill(x),
                _ => histogram.fill_2d(x, y),
            },
        }
    }
}
