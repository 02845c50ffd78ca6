use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::geometry::{ColumnDef, Geometry, ModuleId, StaticGeometry};
use crate::summation::{
    AxisRange, HistogramManager, HistogramTemplate, ManagerParams, Stage, Step, StepType,
    SummationSpec,
};

/// Top-level configuration for dimsum.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Column catalogue and module table.
    #[serde(default)]
    pub geometry: GeometryConfig,

    /// Histogram managers, each with its own step programs.
    #[serde(default)]
    pub managers: Vec<ManagerConfig>,
}

/// Static geometry description.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct GeometryConfig {
    #[serde(default)]
    pub columns: Vec<ColumnConfig>,

    #[serde(default)]
    pub modules: Vec<ModuleConfig>,
}

/// One categorical column.
#[derive(Debug, Clone, Deserialize)]
pub struct ColumnConfig {
    pub name: String,

    /// Name used in folders and labels. Default: the column name.
    #[serde(default)]
    pub pretty: Option<String>,

    /// Smallest value the column takes.
    pub min: i32,

    /// Largest value the column takes.
    pub max: i32,
}

/// Column values of one module.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleConfig {
    /// Module id; 0 is reserved.
    pub id: u32,

    /// Column name to value. Missing columns are UNDEFINED.
    #[serde(default)]
    pub values: BTreeMap<String, i32>,
}

/// One histogram manager.
#[derive(Debug, Clone, Deserialize)]
pub struct ManagerConfig {
    /// Default: true.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Book keys with UNDEFINED values and treat unbooked keys as fatal. Default: true.
    #[serde(default = "default_true")]
    pub book_undefined: bool,

    /// Default: "Summation".
    #[serde(default = "default_top_folder_name")]
    pub top_folder_name: String,

    pub name: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub xlabel: String,

    #[serde(default)]
    pub ylabel: String,

    /// Number of values per sample (0, 1 or 2). Default: 1.
    #[serde(default = "default_dimensions")]
    pub dimensions: u8,

    /// Default: 100.
    #[serde(default = "default_range_nbins")]
    pub range_nbins: usize,

    /// Default: 0.
    #[serde(default)]
    pub range_min: f64,

    /// Default: 100.
    #[serde(default = "default_range_max")]
    pub range_max: f64,

    /// Default: 1.
    #[serde(default = "default_range_y_nbins")]
    pub range_y_nbins: usize,

    /// Default: 0.
    #[serde(default)]
    pub range_y_min: f64,

    /// Default: 1.
    #[serde(default = "default_range_y_max")]
    pub range_y_max: f64,

    #[serde(default)]
    pub specs: Vec<SpecConfig>,
}

/// One step program.
#[derive(Debug, Clone, Deserialize)]
pub struct SpecConfig {
    /// Default: true.
    #[serde(default = "default_true")]
    pub enabled: bool,

    pub steps: Vec<StepConfig>,
}

/// One step of a program.
#[derive(Debug, Clone, Deserialize)]
pub struct StepConfig {
    #[serde(rename = "type")]
    pub step_type: StepType,

    pub stage: Stage,

    /// Column names.
    #[serde(default)]
    pub columns: Vec<String>,

    /// Reduction name for REDUCE.
    #[serde(default)]
    pub arg: Option<String>,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_top_folder_name() -> String {
    "Summation".to_string()
}

fn default_dimensions() -> u8 {
    1
}

fn default_range_nbins() -> usize {
    100
}

fn default_range_max() -> f64 {
    100.0
}

fn default_range_y_nbins() -> usize {
    1
}

fn default_range_y_max() -> f64 {
    1.0
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            geometry: GeometryConfig::default(),
            managers: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg = Self::from_yaml(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        Ok(cfg)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(data: &str) -> Result<Self> {
        let cfg: Config = serde_yaml::from_str(data).context("decoding yaml")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        let mut columns = HashSet::new();
        for column in &self.geometry.columns {
            if column.name.is_empty() {
                bail!("geometry column name is required");
            }
            if !columns.insert(column.name.as_str()) {
                bail!("duplicate geometry column: {}", column.name);
            }
            if column.min > column.max {
                bail!("geometry column {}: min must not exceed max", column.name);
            }
        }

        let mut modules = HashSet::new();
        for module in &self.geometry.modules {
            if module.id == 0 {
                bail!("module id 0 is reserved");
            }
            if !modules.insert(module.id) {
                bail!("duplicate module id: {}", module.id);
            }
            for name in module.values.keys() {
                if !columns.contains(name.as_str()) {
                    bail!("module {}: unknown column {name}", module.id);
                }
            }
        }

        let mut names = HashSet::new();
        for manager in &self.managers {
            if manager.name.is_empty() {
                bail!("manager name is required");
            }
            if !names.insert(manager.name.as_str()) {
                bail!("duplicate manager name: {}", manager.name);
            }
            if manager.dimensions > 2 {
                bail!("manager {}: dimensions must be 0, 1 or 2", manager.name);
            }
            if manager.range_nbins == 0 {
                bail!("manager {}: range_nbins must be positive", manager.name);
            }
            if manager.range_min >= manager.range_max {
                bail!("manager {}: range_min must be below range_max", manager.name);
            }
            if manager.dimensions == 2 {
                if manager.range_y_nbins == 0 {
                    bail!("manager {}: range_y_nbins must be positive", manager.name);
                }
                if manager.range_y_min >= manager.range_y_max {
                    bail!("manager {}: range_y_min must be below range_y_max", manager.name);
                }
            }
            for (index, spec) in manager.specs.iter().enumerate() {
                if spec.steps.is_empty() {
                    bail!("manager {}: spec {index} has no steps", manager.name);
                }
                for step in &spec.steps {
                    for column in &step.columns {
                        if !columns.contains(column.as_str()) {
                            bail!(
                                "manager {}: spec {index} uses unknown column {column}",
                                manager.name
                            );
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Builds the in-memory geometry described by the config.
    pub fn build_geometry(&self) -> Result<StaticGeometry> {
        let mut geometry = StaticGeometry::new();
        for column in &self.geometry.columns {
            geometry.add_column(ColumnDef {
                name: column.name.clone(),
                pretty: column.pretty.clone().unwrap_or_else(|| column.name.clone()),
                min: column.min,
                max: column.max,
            });
        }
        for module in &self.geometry.modules {
            let mut values = Vec::with_capacity(module.values.len());
            for (name, &value) in &module.values {
                let column = geometry
                    .column(name)
                    .with_context(|| format!("module {}: unknown column {name}", module.id))?;
                values.push((column, value));
            }
            geometry.add_module(ModuleId(module.id), values)?;
        }
        Ok(geometry)
    }

    /// Builds every configured manager against `geometry`.
    pub fn build_managers(&self, geometry: &dyn Geometry) -> Result<Vec<HistogramManager>> {
        self.managers
            .iter()
            .map(|m| m.build(geometry).with_context(|| format!("building manager {}", m.name)))
            .collect()
    }
}

impl ManagerConfig {
    fn params(&self) -> ManagerParams {
        ManagerParams {
            enabled: self.enabled,
            book_undefined: self.book_undefined,
            top_folder_name: self.top_folder_name.clone(),
            template: HistogramTemplate {
                name: self.name.clone(),
                title: self.title.clone(),
                xlabel: self.xlabel.clone(),
                ylabel: self.ylabel.clone(),
                dimensions: self.dimensions,
                x: AxisRange {
                    nbins: self.range_nbins,
                    min: self.range_min,
                    max: self.range_max,
                },
                y: AxisRange {
                    nbins: self.range_y_nbins,
                    min: self.range_y_min,
                    max: self.range_y_max,
                },
            },
        }
    }

    /// Creates the manager and registers its enabled step programs.
    pub fn build(&self, geometry: &dyn Geometry) -> Result<HistogramManager> {
        let mut manager = HistogramManager::new(self.params());
        for (index, spec) in self.specs.iter().enumerate() {
            if !spec.enabled {
                continue;
            }
            let mut steps = Vec::with_capacity(spec.steps.len());
            for step in &spec.steps {
                let mut columns = Vec::with_capacity(step.columns.len());
                for name in &step.columns {
                    let column = geometry
                        .column(name)
                        .with_context(|| format!("spec {index}: unknown column {name}"))?;
                    columns.push(column);
                }
                let mut built = Step::new(step.step_type, step.stage, columns);
                built.arg = step.arg.clone();
                steps.push(built);
            }
            let spec = SummationSpec::new(steps).with_context(|| format!("spec {index}"))?;
            manager
                .add_spec(spec)
                .with_context(|| format!("spec {index}"))?;
        }
        Ok(manager)
    }
}
