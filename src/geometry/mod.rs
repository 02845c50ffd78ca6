//! Value extraction: maps a sample's source to the column values that
//! place it in the summation tables.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use tracing::debug;

use crate::summation::column::{Column, Value, UNDEFINED};
use crate::summation::key::Key;

/// Identifier of a measurement source (e.g. a detector module).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleId(pub u32);

impl ModuleId {
    /// Carries no information; never treated as a cache hit.
    pub const NONE: ModuleId = ModuleId(0);
}

/// Identity of one sample's origin. Two consecutive samples with equal
/// sources extract equal keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Source {
    pub module: ModuleId,
    pub event: u64,
    pub col: i32,
    pub row: i32,
}

impl Source {
    pub const fn module(module: ModuleId) -> Self {
        Self {
            module,
            event: 0,
            col: 0,
            row: 0,
        }
    }

    pub const fn in_event(module: ModuleId, event: u64) -> Self {
        Self {
            module,
            event,
            col: 0,
            row: 0,
        }
    }
}

/// Column value extraction and labelling metadata.
pub trait Geometry {
    fn loaded(&self) -> bool;

    /// One-time initialization; called before booking if not yet loaded.
    fn load(&mut self) -> Result<()>;

    /// Appends one value per requested column to `out`.
    fn extract_columns(&self, columns: &[Column], source: &Source, out: &mut Key);

    /// Every source booking must account for.
    fn all_sources(&self) -> Vec<Source>;

    fn pretty(&self, column: Column) -> &str;

    fn min_value(&self, column: Column) -> i32;

    fn max_value(&self, column: Column) -> i32;

    /// Resolves a column by its configured name.
    fn column(&self, name: &str) -> Option<Column>;
}

/// Column metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub pretty: String,
    pub min: i32,
    pub max: i32,
}

/// In-memory geometry: a fixed column catalogue and a module table.
#[derive(Debug, Default)]
pub struct StaticGeometry {
    columns: Vec<ColumnDef>,
    modules: BTreeMap<ModuleId, BTreeMap<Column, i32>>,
    loaded: bool,
}

impl StaticGeometry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a column and returns its id.
    pub fn add_column(&mut self, def: ColumnDef) -> Column {
        let id = Column(self.columns.len() as u16);
        self.columns.push(def);
        id
    }

    /// Registers a module; columns not listed are UNDEFINED for it.
    pub fn add_module(
        &mut self,
        module: ModuleId,
        values: impl IntoIterator<Item = (Column, i32)>,
    ) -> Result<()> {
        if module == ModuleId::NONE {
            bail!("module id 0 is reserved");
        }
        if self.modules.contains_key(&module) {
            bail!("duplicate module {}", module.0);
        }
        self.modules.insert(module, values.into_iter().collect());
        Ok(())
    }

    pub fn column_def(&self, column: Column) -> Option<&ColumnDef> {
        self.columns.get(usize::from(column.0))
    }
}

impl Geometry for StaticGeometry {
    fn loaded(&self) -> bool {
        self.loaded
    }

    fn load(&mut self) -> Result<()> {
        if self.columns.is_empty() {
            bail!("geometry has no columns");
        }
        debug!(
            columns = self.columns.len(),
            modules = self.modules.len(),
            "geometry loaded"
        );
        self.loaded = true;
        Ok(())
    }

    fn extract_columns(&self, columns: &[Column], source: &Source, out: &mut Key) {
        let module = self.modules.get(&source.module);
        for &column in columns {
            let value = module
                .and_then(|m| m.get(&column))
                .copied()
                .unwrap_or(UNDEFINED);
            out.put(Value::new(column, value));
        }
    }

    fn all_sources(&self) -> Vec<Source> {
        self.modules.keys().map(|&m| Source::module(m)).collect()
    }

    fn pretty(&self, column: Column) -> &str {
        self.column_def(column).map_or("", |d| d.pretty.as_str())
    }

    fn min_value(&self, column: Column) -> i32 {
        self.column_def(column).map_or(0, |d| d.min)
    }

    fn max_value(&self, column: Column) -> i32 {
        self.column_def(column).map_or(0, |d| d.max)
    }

    fn column(&self, name: &str) -> Option<Column> {
        self.columns
            .iter()
            .position(|d| d.name == name)
            .map(|i| Column(i as u16))
    }
}
