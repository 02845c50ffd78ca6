//! Persistence collaborator: receives published histograms and serves them
//! back to harvesting.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::summation::histogram::Histogram;

/// Opaque reference to a histogram registered in a [`Store`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Handle(pub usize);

/// Storage for published histograms, addressed by `<folder><name>` paths.
pub trait Store {
    /// Registers `histogram` (binning, labels and contents) under `folder`.
    fn book(&mut self, folder: &str, histogram: &Histogram) -> Handle;

    /// Replaces the stored contents behind `handle`.
    fn update(&mut self, handle: Handle, histogram: &Histogram);

    /// Looks up a stored histogram by full path.
    fn get(&self, path: &str) -> Option<(Handle, Histogram)>;
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredHistogram {
    pub path: String,
    pub histogram: Histogram,
}

/// In-memory store, serializable for inspection.
#[derive(Debug, Default, Serialize)]
pub struct MemoryStore {
    entries: Vec<StoredHistogram>,
    #[serde(skip)]
    by_path: BTreeMap<String, Handle>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn histogram(&self, path: &str) -> Option<&Histogram> {
        let handle = self.by_path.get(path)?;
        self.entries.get(handle.0).map(|e| &e.histogram)
    }

    /// Stored paths in lexical order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.by_path.keys().map(String::as_str)
    }

    pub fn entries(&self) -> &[StoredHistogram] {
        &self.entries
    }
}

impl Store for MemoryStore {
    /// Booking an existing path rebinds it to the new histogram.
    fn book(&mut self, folder: &str, histogram: &Histogram) -> Handle {
        let path = format!("{folder}{}", histogram.name);
        if let Some(&handle) = self.by_path.get(&path) {
            self.entries[handle.0].histogram = histogram.clone();
            return handle;
        }
        let handle = Handle(self.entries.len());
        self.entries.push(StoredHistogram {
            path: path.clone(),
            histogram: histogram.clone(),
        });
        self.by_path.insert(path, handle);
        handle
    }

    fn update(&mut self, handle: Handle, histogram: &Histogram) {
        if let Some(entry) = self.entries.get_mut(handle.0) {
            entry.histogram.clone_from(histogram);
        }
    }

    fn get(&self, path: &str) -> Option<(Handle, Histogram)> {
        let &handle = self.by_path.get(path)?;
        let entry = self.entries.get(handle.0)?;
        Some((handle, entry.histogram.clone()))
    }
}
