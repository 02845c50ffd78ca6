//! Per-sample interpretation of a step program.
//!
//! This is the hot path: with a cached slot it performs no table lookups
//! and no allocations.

use thiserror::Error;

use super::accumulator::Accumulator;
use super::column::Value;
use super::key::Key;
use super::step::{Stage, StepType, SummationSpec};
use super::table::{SlotId, Table};

/// Fatal stage-1 conditions. All of them point at a broken program or a
/// booking bug, never at bad data.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FillError {
    #[error("no histogram booked for key {key}, but every key should have been booked")]
    Unbooked { key: String },

    #[error("step {index}: {step_type} cannot run at stage {stage}")]
    IllegalStep {
        index: usize,
        step_type: &'static str,
        stage: &'static str,
    },

    #[error("stage {stage} is not a stage-1 stage")]
    IllegalStage { stage: &'static str },

    #[error("slot for key {key} holds a histogram where a counter is expected")]
    NotACounter { key: String },

    #[error("{manager}: fill with {got} values, but the manager has {expected} dimensions")]
    Arity {
        manager: String,
        expected: u8,
        got: u8,
    },
}

/// Manager-level parameters the executor needs.
#[derive(Debug, Clone, Copy)]
pub struct Stage1Context {
    /// Dimensionality of incoming samples before any step runs.
    pub dimensions: u8,
    /// Every reachable key was booked; a missing one is a bug.
    pub book_undefined: bool,
}

/// Runs the `stage` steps of `spec` for one sample.
///
/// `key` holds the extracted seed values and is rewritten in place.
/// `fastpath` caches the slot selected by a previous call with the same
/// key; it is consulted instead of looking the key up, set after a lookup,
/// and cleared whenever a step changes the key.
#[allow(clippy::too_many_arguments)]
pub fn execute_step1(
    ctx: Stage1Context,
    mut x: f64,
    mut y: f64,
    key: &mut Key,
    spec: &SummationSpec,
    table: &mut Table,
    stage: Stage,
    fastpath: &mut Option<SlotId>,
) -> Result<(), FillError> {
    if !stage.is_stage1() {
        return Err(FillError::IllegalStage {
            stage: stage.as_str(),
        });
    }

    let mut dimensions = ctx.dimensions;
    for (index, step) in spec.steps() {
        if step.stage != stage {
            continue;
        }
        match step.step_type {
            // Publishing happens at harvest time.
            StepType::Save => {}
            StepType::Count => {
                x = 0.0;
                y = 0.0;
                dimensions = 0;
                let per_event = spec.step(index + 1).is_some_and(|next| {
                    next.stage == Stage::PerEventHarvest && next.step_type == StepType::GroupBy
                });
                if per_event {
                    let slot = match *fastpath {
                        Some(slot) => slot,
                        None => {
                            let slot = table.entry_or_insert_with(key, || Accumulator::Counter(0));
                            *fastpath = Some(slot);
                            slot
                        }
                    };
                    match table.slot_mut(slot) {
                        Accumulator::Counter(n) => *n += 1,
                        Accumulator::Histogram { .. } => {
                            return Err(FillError::NotACounter {
                                key: key.to_string(),
                            })
                        }
                    }
                    return Ok(());
                }
            }
            StepType::ExtendX => {
                let column = step.extend_column();
                x = f64::from(key.erase(column).unwrap_or(Value::undefined(column)).value);
                dimensions = if dimensions == 0 { 1 } else { 2 };
            }
            StepType::ExtendY => {
                let column = step.extend_column();
                y = f64::from(key.erase(column).unwrap_or(Value::undefined(column)).value);
                dimensions = 2;
            }
            StepType::GroupBy if stage == Stage::PerEventHarvest => {
                let slot = match fastpath.take() {
                    Some(slot) => slot,
                    None => table.entry_or_insert_with(key, || Accumulator::Counter(0)),
                };
                match table.slot_mut(slot) {
                    Accumulator::Counter(n) => {
                        x = *n as f64;
                        *n = 0;
                    }
                    Accumulator::Histogram { .. } => {
                        return Err(FillError::NotACounter {
                            key: key.to_string(),
                        })
                    }
                }
                dimensions = 1;
                *key = key.project(&step.columns);
            }
            StepType::GroupBy | StepType::Reduce | StepType::Custom => {
                return Err(FillError::IllegalStep {
                    index,
                    step_type: step.step_type.as_str(),
                    stage: stage.as_str(),
                });
            }
        }
    }

    let slot = match *fastpath {
        Some(slot) => slot,
        None => match table.find(key) {
            Some(slot) => {
                *fastpath = Some(slot);
                slot
            }
            None if ctx.book_undefined => {
                return Err(FillError::Unbooked {
                    key: key.to_string(),
                });
            }
            // Sparse population: unbooked keys are dropped.
            None => return Ok(()),
        },
    };
    table.slot_mut(slot).fill(dimensions, x, y);
    Ok(())
}
