//! Declarative multi-stage histogram summation.
//!
//! A [`HistogramManager`] owns a set of step programs, one table per
//! program, and drives them through booking, per-sample filling,
//! per-event harvesting and post-run harvesting.

pub mod accumulator;
pub mod booking;
pub mod column;
pub mod harvest;
pub mod histogram;
pub mod key;
pub mod stage1;
pub mod step;
pub mod table;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::geometry::{Geometry, ModuleId, Source};
use crate::store::Store;

pub use accumulator::Accumulator;
pub use booking::{AxisRange, HistogramTemplate};
pub use column::{Column, Value, UNDEFINED};
pub use harvest::{CustomHandler, HarvestError};
pub use histogram::{Axis, Histogram};
pub use key::Key;
pub use stage1::FillError;
pub use step::{SpecError, Stage, Step, StepType, SummationSpec};
pub use table::{SlotId, Table};

use booking::BookingContext;
use stage1::{execute_step1, Stage1Context};

/// Per-manager settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerParams {
    /// A disabled manager ignores booking, filling and harvesting.
    pub enabled: bool,
    /// Book keys with UNDEFINED components, and treat unbooked keys as bugs.
    pub book_undefined: bool,
    pub top_folder_name: String,
    pub template: HistogramTemplate,
}

/// Runs a set of step programs over one stream of samples.
pub struct HistogramManager {
    params: ManagerParams,
    specs: Vec<SummationSpec>,
    tables: Vec<Table>,
    /// Seed values extracted for `last_source`, one key per program.
    significant: Vec<Key>,
    fastpath: Vec<Option<SlotId>>,
    last_source: Option<Source>,
    scratch: Key,
    custom: Option<CustomHandler>,
}

impl HistogramManager {
    pub fn new(params: ManagerParams) -> Self {
        Self {
            params,
            specs: Vec::new(),
            tables: Vec::new(),
            significant: Vec::new(),
            fastpath: Vec::new(),
            last_source: None,
            scratch: Key::new(),
            custom: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.params.template.name
    }

    pub fn params(&self) -> &ManagerParams {
        &self.params
    }

    pub fn enabled(&self) -> bool {
        self.params.enabled
    }

    pub fn specs(&self) -> &[SummationSpec] {
        &self.specs
    }

    pub fn table(&self, index: usize) -> Option<&Table> {
        self.tables.get(index)
    }

    /// Registers a program after checking it against the manager's
    /// sample dimensionality.
    pub fn add_spec(&mut self, spec: SummationSpec) -> Result<(), SpecError> {
        spec.check_dimensions(self.params.template.dimensions)?;
        self.significant
            .push(Key::with_capacity(spec.seed_columns().len()));
        self.specs.push(spec);
        self.tables.push(Table::new());
        self.fastpath.push(None);
        self.last_source = None;
        Ok(())
    }

    /// Installs the transform run by CUSTOM steps.
    pub fn set_custom_handler(&mut self, handler: impl FnMut(&Step, &mut Table) + 'static) {
        self.custom = Some(Box::new(handler));
    }

    /// Fills a two-dimensional sample.
    pub fn fill(
        &mut self,
        x: f64,
        y: f64,
        source: &Source,
        geometry: &dyn Geometry,
    ) -> Result<(), FillError> {
        self.check_arity(2)?;
        self.fill_internal(x, y, source, geometry)
    }

    pub fn fill_1d(
        &mut self,
        x: f64,
        source: &Source,
        geometry: &dyn Geometry,
    ) -> Result<(), FillError> {
        self.check_arity(1)?;
        self.fill_internal(x, 0.0, source, geometry)
    }

    /// Records one occurrence without a value.
    pub fn fill_count(
        &mut self,
        source: &Source,
        geometry: &dyn Geometry,
    ) -> Result<(), FillError> {
        self.check_arity(0)?;
        self.fill_internal(0.0, 0.0, source, geometry)
    }

    fn check_arity(&self, got: u8) -> Result<(), FillError> {
        let expected = self.params.template.dimensions;
        if expected != got {
            return Err(FillError::Arity {
                manager: self.params.template.name.clone(),
                expected,
                got,
            });
        }
        Ok(())
    }

    fn stage1_context(&self) -> Stage1Context {
        Stage1Context {
            dimensions: self.params.template.dimensions,
            book_undefined: self.params.book_undefined,
        }
    }

    fn fill_internal(
        &mut self,
        x: f64,
        y: f64,
        source: &Source,
        geometry: &dyn Geometry,
    ) -> Result<(), FillError> {
        if !self.params.enabled {
            return Ok(());
        }
        let cached = source.module != ModuleId::NONE && self.last_source.as_ref() == Some(source);
        if !cached {
            for (spec, key) in self.specs.iter().zip(self.significant.iter_mut()) {
                key.clear();
                geometry.extract_columns(spec.seed_columns(), source, key);
            }
            self.fastpath.iter_mut().for_each(|slot| *slot = None);
            self.last_source = Some(*source);
        }

        let ctx = self.stage1_context();
        for (((spec, table), key), fastpath) in self
            .specs
            .iter()
            .zip(self.tables.iter_mut())
            .zip(self.significant.iter())
            .zip(self.fastpath.iter_mut())
        {
            self.scratch.clone_from(key);
            execute_step1(ctx, x, y, &mut self.scratch, spec, table, Stage::PerEvent, fastpath)?;
        }
        Ok(())
    }

    /// End-of-event pass: turns every per-event counter into one sample
    /// of its grouped histogram and resets it.
    pub fn harvest_per_event(&mut self) -> Result<(), FillError> {
        if !self.params.enabled {
            return Ok(());
        }
        let ctx = self.stage1_context();
        for (spec, table) in self.specs.iter().zip(self.tables.iter_mut()) {
            let seed_len = spec.seed_columns().len();
            let counters: Vec<(Key, SlotId)> = table
                .slots()
                .filter(|(key, id)| key.len() == seed_len && table.slot(*id).is_counter())
                .map(|(key, id)| (key.clone(), id))
                .collect();
            for (key, id) in counters {
                self.scratch.clone_from(&key);
                let mut slot = Some(id);
                execute_step1(
                    ctx,
                    0.0,
                    0.0,
                    &mut self.scratch,
                    spec,
                    table,
                    Stage::PerEventHarvest,
                    &mut slot,
                )?;
            }
        }
        Ok(())
    }

    /// Pre-declares every histogram the programs can reach.
    pub fn book(&mut self, geometry: &mut dyn Geometry, store: &mut dyn Store) -> Result<()> {
        if !self.params.enabled {
            return Ok(());
        }
        if !geometry.loaded() {
            geometry.load().context("loading geometry for booking")?;
        }
        let ctx = BookingContext {
            template: &self.params.template,
            top_folder: &self.params.top_folder_name,
            book_undefined: self.params.book_undefined,
        };
        let mut booked = 0;
        for (index, (spec, table)) in self.specs.iter().zip(self.tables.iter_mut()).enumerate() {
            booked += booking::book_spec(ctx, spec, table, &*geometry, store)
                .with_context(|| format!("booking {} program {index}", self.params.template.name))?;
        }
        info!(manager = %self.params.template.name, booked, "booked histograms");
        Ok(())
    }

    /// Copies the contents of every published histogram into `store`.
    pub fn persist(&self, store: &mut dyn Store) -> usize {
        let mut written = 0;
        for table in &self.tables {
            for (_, acc) in table.iter() {
                if let (Some(handle), Some(histogram)) = (acc.handle(), acc.as_histogram()) {
                    store.update(handle, histogram);
                    written += 1;
                }
            }
        }
        debug!(manager = %self.params.template.name, written, "persisted histograms");
        written
    }

    /// Persists the live histograms, reloads every program's histograms
    /// from `store` and runs the post-run steps over them.
    pub fn harvest(&mut self, geometry: &mut dyn Geometry, store: &mut dyn Store) -> Result<()> {
        if !self.params.enabled {
            return Ok(());
        }
        if !geometry.loaded() {
            geometry.load().context("loading geometry for harvesting")?;
        }
        self.persist(store);
        for spec in &self.specs {
            info!(
                manager = %self.params.template.name,
                spec = %spec.describe(&*geometry),
                "harvesting"
            );
        }

        let ctx = BookingContext {
            template: &self.params.template,
            top_folder: &self.params.top_folder_name,
            book_undefined: self.params.book_undefined,
        };
        let mut tables = Vec::with_capacity(self.specs.len());
        for (index, spec) in self.specs.iter().enumerate() {
            let mut table = Table::new();
            let loaded = booking::load_spec(ctx, spec, &mut table, &*geometry, &*store)
                .with_context(|| format!("reloading {} program {index}", ctx.template.name))?;
            debug!(manager = %ctx.template.name, program = index, loaded, "reloaded histograms");
            tables.push(table);
        }

        for (index, (spec, table)) in self.specs.iter().zip(tables.iter_mut()).enumerate() {
            harvest::run_post_run(ctx, spec, table, &*geometry, store, &mut self.custom)
                .with_context(|| format!("harvesting {} program {index}", ctx.template.name))?;
        }

        self.tables = tables;
        self.fastpath.iter_mut().for_each(|slot| *slot = None);
        self.last_source = None;
        Ok(())
    }

    /// One line per program, e.g. `GROUPBY(Layer/Module)@per_event COUNT@per_event`.
    pub fn describe(&self, geometry: &dyn Geometry) -> Vec<String> {
        self.specs.iter().map(|s| s.describe(geometry)).collect()
    }
}
