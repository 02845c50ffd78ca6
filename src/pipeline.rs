//! End-to-end driver: books every manager, replays recorded samples event
//! by event, then persists and harvests into one store.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::Config;
use crate::geometry::{ModuleId, Source, StaticGeometry};
use crate::store::MemoryStore;
use crate::summation::HistogramManager;

/// Recorded samples, grouped by event.
#[derive(Debug, Default, Deserialize)]
pub struct SampleFile {
    #[serde(default)]
    pub events: Vec<EventSamples>,
}

#[derive(Debug, Deserialize)]
pub struct EventSamples {
    pub id: u64,

    #[serde(default)]
    pub fills: Vec<FillRecord>,
}

/// One sample for one manager.
#[derive(Debug, Deserialize)]
pub struct FillRecord {
    pub manager: String,
    pub module: u32,
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
    #[serde(default)]
    pub col: i32,
    #[serde(default)]
    pub row: i32,
}

impl SampleFile {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading sample file {}", path.display()))?;
        Self::from_yaml(&data).with_context(|| format!("parsing sample file {}", path.display()))
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        serde_yaml::from_str(data).context("decoding yaml")
    }
}

pub struct Pipeline {
    geometry: StaticGeometry,
    managers: Vec<HistogramManager>,
    by_name: HashMap<String, usize>,
    store: MemoryStore,
}

impl Pipeline {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let geometry = cfg.build_geometry().context("building geometry")?;
        let managers = cfg.build_managers(&geometry)?;
        let by_name = managers
            .iter()
            .enumerate()
            .map(|(i, m)| (m.name().to_string(), i))
            .collect();
        Ok(Self {
            geometry,
            managers,
            by_name,
            store: MemoryStore::new(),
        })
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn book(&mut self) -> Result<()> {
        for manager in &mut self.managers {
            manager.book(&mut self.geometry, &mut self.store)?;
        }
        info!(histograms = self.store.len(), "booking complete");
        Ok(())
    }

    /// Fills every sample of one event, then runs the per-event harvest.
    pub fn process_event(&mut self, event: &EventSamples) -> Result<()> {
        for fill in &event.fills {
            let &index = self
                .by_name
                .get(&fill.manager)
                .with_context(|| format!("event {}: unknown manager {}", event.id, fill.manager))?;
            let manager = &mut self.managers[index];
            let source = Source {
                module: ModuleId(fill.module),
                event: event.id,
                col: fill.col,
                row: fill.row,
            };
            let result = match (manager.params().template.dimensions, fill.x, fill.y) {
                (0, _, _) => manager.fill_count(&source, &self.geometry),
                (1, Some(x), _) => manager.fill_1d(x, &source, &self.geometry),
                (2, Some(x), Some(y)) => manager.fill(x, y, &source, &self.geometry),
                (dimensions, _, _) => bail!(
                    "event {}: manager {} needs {dimensions} values per sample",
                    event.id,
                    fill.manager
                ),
            };
            result.with_context(|| format!("event {}: filling {}", event.id, fill.manager))?;
        }
        for manager in &mut self.managers {
            manager.harvest_per_event().with_context(|| {
                format!("event {}: per-event harvest of {}", event.id, manager.name())
            })?;
        }
        debug!(event = event.id, fills = event.fills.len(), "event processed");
        Ok(())
    }

    pub fn replay(&mut self, samples: &SampleFile) -> Result<()> {
        for event in &samples.events {
            self.process_event(event)?;
        }
        info!(events = samples.events.len(), "replay complete");
        Ok(())
    }

    /// Runs post-run harvesting (which persists live histograms first) and
    /// returns the store.
    pub fn finish(mut self) -> Result<MemoryStore> {
        for manager in &mut self.managers {
            manager.harvest(&mut self.geometry, &mut self.store)?;
        }
        info!(histograms = self.store.len(), "harvesting complete");
        Ok(self.store)
    }

    /// Program descriptions per manager.
    pub fn describe(&self) -> Vec<(String, Vec<String>)> {
        self.managers
            .iter()
            .map(|m| (m.name().to_string(), m.describe(&self.geometry)))
            .collect()
    }
}
