//! Step programs: the declarative description of how samples collapse into
//! histograms (stage 1) and how those histograms are combined (stage 2).

use std::collections::BTreeSet;
use std::fmt;

use serde::Deserialize;
use thiserror::Error;

use crate::geometry::Geometry;

use super::column::Column;

/// When a step is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Once per sample, during data taking.
    PerEvent,
    /// Once per event, over the per-event counters.
    PerEventHarvest,
    /// Once per run, after data taking.
    PostRun,
}

impl Stage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PerEvent => "per_event",
            Self::PerEventHarvest => "per_event_harvest",
            Self::PostRun => "post_run",
        }
    }

    pub const fn is_stage1(self) -> bool {
        matches!(self, Self::PerEvent | Self::PerEventHarvest)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Save,
    Count,
    ExtendX,
    ExtendY,
    GroupBy,
    Reduce,
    Custom,
}

impl StepType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Save => "SAVE",
            Self::Count => "COUNT",
            Self::ExtendX => "EXTEND_X",
            Self::ExtendY => "EXTEND_Y",
            Self::GroupBy => "GROUPBY",
            Self::Reduce => "REDUCE",
            Self::Custom => "CUSTOM",
        }
    }

    /// Type x stage legality table.
    const fn legal_in(self, stage: Stage) -> bool {
        match self {
            Self::Count => stage.is_stage1(),
            Self::Reduce | Self::Custom => matches!(stage, Stage::PostRun),
            Self::Save | Self::ExtendX | Self::ExtendY | Self::GroupBy => true,
        }
    }
}

/// One instruction of a step program.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub step_type: StepType,
    pub stage: Stage,
    pub columns: Vec<Column>,
    pub arg: Option<String>,
}

impl Step {
    pub fn new(step_type: StepType, stage: Stage, columns: Vec<Column>) -> Self {
        Self {
            step_type,
            stage,
            columns,
            arg: None,
        }
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.arg = Some(arg.into());
        self
    }

    /// The single column an EXTEND step promotes.
    pub fn extend_column(&self) -> Column {
        self.columns[0]
    }

    pub fn arg(&self) -> &str {
        self.arg.as_deref().unwrap_or("")
    }
}

/// Structural errors in a step program.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpecError {
    #[error("step program is empty")]
    Empty,

    #[error("step {index}: {step_type} is not allowed at stage {stage}")]
    IllegalStep {
        index: usize,
        step_type: &'static str,
        stage: &'static str,
    },

    #[error("step {index}: stage {stage} after stage {previous}")]
    StageOrder {
        index: usize,
        stage: &'static str,
        previous: &'static str,
    },

    #[error("step {index}: GROUPBY at per_event is only allowed as the first step")]
    GroupByNotSeed { index: usize },

    #[error("step {index}: per_event_harvest GROUPBY must directly follow a per_event COUNT")]
    GroupByNotAfterCount { index: usize },

    #[error("step {index}: per_event_harvest GROUPBY over all seed columns aliases the counter")]
    GroupByAliasesCounter { index: usize },

    #[error("step {index}: {step_type} in stage 1 must follow a COUNT")]
    ExtendWithoutCount {
        index: usize,
        step_type: &'static str,
    },

    #[error("step {index}: {step_type} needs exactly one column, got {got}")]
    ExtendColumns {
        index: usize,
        step_type: &'static str,
        got: usize,
    },

    #[error("step {index}: REDUCE needs a reduction name")]
    MissingReduction { index: usize },

    #[error("step {index}: {step_type} is not possible on {dimensions}-dimensional samples")]
    Dimensions {
        index: usize,
        step_type: &'static str,
        dimensions: u8,
    },
}

/// Validated, immutable step program.
#[derive(Debug, Clone, PartialEq)]
pub struct SummationSpec {
    /// Columns the geometry must extract for every sample.
    seed: Vec<Column>,
    /// Index of the first step the executors interpret.
    first: usize,
    steps: Vec<Step>,
}

impl SummationSpec {
    /// Validates `steps` against the stage legality rules.
    ///
    /// A leading per-event GROUPBY only declares the seed columns; any
    /// other leading step seeds with its own columns.
    pub fn new(steps: Vec<Step>) -> Result<Self, SpecError> {
        let first_step = steps.first().ok_or(SpecError::Empty)?;
        let seed = first_step.columns.clone();
        let first = usize::from(
            first_step.step_type == StepType::GroupBy && first_step.stage == Stage::PerEvent,
        );
        let seed_set: BTreeSet<Column> = seed.iter().copied().collect();

        let mut previous = Stage::PerEvent;
        let mut counted = false;
        for (index, step) in steps.iter().enumerate() {
            if !step.step_type.legal_in(step.stage) {
                return Err(SpecError::IllegalStep {
                    index,
                    step_type: step.step_type.as_str(),
                    stage: step.stage.as_str(),
                });
            }
            if step.stage < previous {
                return Err(SpecError::StageOrder {
                    index,
                    stage: step.stage.as_str(),
                    previous: previous.as_str(),
                });
            }
            previous = step.stage;

            match (step.step_type, step.stage) {
                (StepType::GroupBy, Stage::PerEvent) if index != 0 => {
                    return Err(SpecError::GroupByNotSeed { index });
                }
                (StepType::GroupBy, Stage::PerEventHarvest) => {
                    let after_count = index > 0
                        && steps[index - 1].step_type == StepType::Count
                        && steps[index - 1].stage == Stage::PerEvent;
                    if !after_count {
                        return Err(SpecError::GroupByNotAfterCount { index });
                    }
                    let grouped: BTreeSet<Column> = step.columns.iter().copied().collect();
                    if grouped == seed_set {
                        return Err(SpecError::GroupByAliasesCounter { index });
                    }
                }
                (StepType::Count, s) if s.is_stage1() => counted = true,
                (StepType::ExtendX | StepType::ExtendY, s) => {
                    if step.columns.len() != 1 {
                        return Err(SpecError::ExtendColumns {
                            index,
                            step_type: step.step_type.as_str(),
                            got: step.columns.len(),
                        });
                    }
                    if s.is_stage1() && !counted {
                        return Err(SpecError::ExtendWithoutCount {
                            index,
                            step_type: step.step_type.as_str(),
                        });
                    }
                }
                (StepType::Reduce, _) if step.arg.as_deref().map_or(true, str::is_empty) => {
                    return Err(SpecError::MissingReduction { index });
                }
                _ => {}
            }
        }

        Ok(Self { seed, first, steps })
    }

    /// Checks the stage-1 dimensionality flow for a manager filling
    /// `dimensions`-valued samples.
    pub fn check_dimensions(&self, dimensions: u8) -> Result<(), SpecError> {
        let mut dims = dimensions;
        for (index, step) in self.steps().filter(|(_, s)| s.stage.is_stage1()) {
            let before = dims;
            let ok = match step.step_type {
                StepType::Count => {
                    dims = 0;
                    true
                }
                StepType::ExtendX => {
                    dims = 1;
                    before == 0
                }
                StepType::ExtendY => {
                    dims = 2;
                    before < 2
                }
                StepType::GroupBy => {
                    dims = 1;
                    before == 0
                }
                _ => true,
            };
            if !ok {
                return Err(SpecError::Dimensions {
                    index,
                    step_type: step.step_type.as_str(),
                    dimensions: before,
                });
            }
        }
        Ok(())
    }

    pub fn seed_columns(&self) -> &[Column] {
        &self.seed
    }

    /// All steps, including a seed declaration.
    pub fn all_steps(&self) -> &[Step] {
        &self.steps
    }

    /// Interpreted steps with their program index.
    pub fn steps(&self) -> impl Iterator<Item = (usize, &Step)> {
        self.steps.iter().enumerate().skip(self.first)
    }

    /// The step at `index`, if any.
    pub fn step(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    /// Human-readable program, e.g. `GROUPBY(layer/module)@per_event COUNT@per_event`.
    pub fn describe(&self, geometry: &dyn Geometry) -> String {
        let mut out = String::new();
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            out.push_str(step.step_type.as_str());
            if !step.columns.is_empty() {
                let names: Vec<&str> = step.columns.iter().map(|c| geometry.pretty(*c)).collect();
                out.push('(');
                out.push_str(&names.join("/"));
                out.push(')');
            }
            if let Some(arg) = &step.arg {
                out.push('[');
                out.push_str(arg);
                out.push(']');
            }
            out.push('@');
            out.push_str(step.stage.as_str());
        }
        out
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.step_type.as_str(), self.stage.as_str())
    }
}
