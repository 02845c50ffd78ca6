//! Stage 2: post-run transformation of the reloaded tables.
//!
//! Every step replaces its table wholesale; slot ids taken from the old
//! table are meaningless afterwards.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};

use thiserror::Error;
use tracing::{error, warn};

use crate::geometry::Geometry;
use crate::store::Store;

use super::accumulator::Accumulator;
use super::booking::{make_path, BookingContext};
use super::histogram::{Axis, BinningError, Histogram};
use super::key::Key;
use super::step::{Stage, Step, StepType, SummationSpec};
use super::table::Table;

/// Externally supplied transform for CUSTOM steps.
pub type CustomHandler = Box<dyn FnMut(&Step, &mut Table)>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HarvestError {
    #[error("{step_type} cannot run at harvest time")]
    IllegalStep { step_type: &'static str },

    #[error("{step_type}: key {key} mixes 1-D and 2-D histograms")]
    MixedDimensions { step_type: &'static str, key: String },

    #[error("{step_type}: key {key} merges histograms with {expected} and {got} orthogonal bins")]
    IncompatibleAxes {
        step_type: &'static str,
        key: String,
        expected: usize,
        got: usize,
    },

    #[error("{step_type}: key {key} holds a counter where a histogram is expected")]
    NotAHistogram { step_type: &'static str, key: String },

    #[error("GROUPBY: key {key} merges a counter with a histogram")]
    MixedAccumulators { key: String },

    #[error("SAVE: key {key} has neither a published histogram nor histogram content")]
    NothingToSave { key: String },

    #[error(transparent)]
    Binning(#[from] BinningError),
}

/// Publishes every entry that has no store handle yet. Returns the number
/// of newly published histograms; a second call without changes publishes
/// nothing.
///
/// Bare counters carry no histogram: fatal when everything is booked,
/// skipped otherwise.
pub fn execute_save(
    ctx: BookingContext<'_>,
    table: &mut Table,
    geometry: &dyn Geometry,
    store: &mut dyn Store,
) -> Result<usize, HarvestError> {
    let mut published = 0;
    for (key, acc) in table.iter_mut() {
        if acc.handle().is_some() {
            continue;
        }
        let Some(histogram) = acc.as_histogram().cloned() else {
            if ctx.book_undefined {
                return Err(HarvestError::NothingToSave {
                    key: key.to_string(),
                });
            }
            continue;
        };
        let folder = make_path(ctx.top_folder, key, geometry);
        let handle = store.book(&folder, &histogram);
        *acc = Accumulator::bound(histogram, handle);
        published += 1;
    }
    Ok(published)
}

/// Derived entries are new distributions and must be published again.
fn unbound(acc: Accumulator) -> Accumulator {
    match acc {
        Accumulator::Histogram { histogram, .. } => Accumulator::histogram(histogram),
        counter => counter,
    }
}

/// Regroups by the step's columns, summing entries that collapse together.
pub fn execute_group_by(step: &Step, table: &mut Table) -> Result<(), HarvestError> {
    let mut out = Table::new();
    for (key, acc) in std::mem::take(table).into_entries() {
        let grouped = key.project(&step.columns);
        let Some(slot) = out.find(&grouped) else {
            out.insert(grouped, unbound(acc));
            continue;
        };
        match (out.slot_mut(slot), &acc) {
            (Accumulator::Counter(n), Accumulator::Counter(m)) => *n += m,
            (
                Accumulator::Histogram { histogram, .. },
                Accumulator::Histogram { histogram: other, .. },
            ) => histogram.add(other)?,
            _ => {
                return Err(HarvestError::MixedAccumulators {
                    key: grouped.to_string(),
                })
            }
        }
    }
    *table = out;
    Ok(())
}

/// Replaces every histogram by a single-bin summary.
pub fn execute_reduce(step: &Step, table: &mut Table) {
    let reduction = step.arg();
    if !matches!(reduction, "MEAN" | "COUNT") {
        error!(reduction, "reduction not implemented, entries left unreduced");
        return;
    }
    for (_, acc) in table.iter_mut() {
        let Some(h) = acc.as_histogram() else {
            continue;
        };
        let (value, name, label) = if reduction == "MEAN" {
            (h.mean(), format!("mean_{}", h.name), format!("mean of {}", h.x.label))
        } else {
            (
                h.entries() as f64,
                format!("num_{}", h.name),
                format!("# of {} entries", h.x.label),
            )
        };
        let mut reduced = Histogram::new_1d(name, h.title.clone(), Axis::new(1, 0.0, 1.0, ""))
            .with_value_label(label);
        reduced.set_bin_content(0, value);
        *acc = Accumulator::histogram(reduced);
    }
}

struct MergedShape {
    dimension: u8,
    extended: usize,
    orthogonal: usize,
}

fn counting_axis(nbins: usize, label: impl Into<String>) -> Axis {
    Axis::new(nbins, 0.5, nbins as f64 + 0.5, label)
}

fn extended_histogram(h: &Histogram, nbins: usize, is_x: bool, colname: &str) -> Histogram {
    let title = format!("{} per {colname}", h.title);
    if is_x && h.dimension() == 1 {
        Histogram::new_1d(&h.name, title, counting_axis(nbins, format!("{colname}/{}", h.x.label)))
            .with_value_label(h.y_label())
    } else if is_x {
        Histogram::new_2d(
            &h.name,
            title,
            counting_axis(nbins, format!("{colname}/{}", h.x.label)),
            counting_axis(h.nbins_y(), h.y_label()),
        )
    } else {
        Histogram::new_2d(
            &h.name,
            title,
            counting_axis(h.nbins_x(), h.x.label.as_str()),
            counting_axis(nbins, format!("{colname}/{}", h.y_label())),
        )
    }
}

/// Concatenates histograms that differ only in the step's column, in
/// ascending order of that column's value.
pub fn execute_extend(
    step: &Step,
    table: &mut Table,
    is_x: bool,
    geometry: &dyn Geometry,
) -> Result<(), HarvestError> {
    let column = step.extend_column();
    let colname = geometry.pretty(column);
    let step_type = step.step_type.as_str();

    let mut shapes: BTreeMap<Key, MergedShape> = BTreeMap::new();
    for (key, acc) in table.iter() {
        let h = acc.as_histogram().ok_or_else(|| HarvestError::NotAHistogram {
            step_type,
            key: key.to_string(),
        })?;
        let (extended, orthogonal) = if is_x {
            (h.nbins_x(), h.nbins_y())
        } else {
            (h.nbins_y(), h.nbins_x())
        };
        let mut merged = key.clone();
        merged.erase(column);
        match shapes.entry(merged) {
            Entry::Vacant(v) => {
                v.insert(MergedShape {
                    dimension: h.dimension(),
                    extended,
                    orthogonal,
                });
            }
            Entry::Occupied(mut o) => {
                let (dimension, expected) = (o.get().dimension, o.get().orthogonal);
                if dimension != h.dimension() {
                    return Err(HarvestError::MixedDimensions {
                        step_type,
                        key: o.key().to_string(),
                    });
                }
                if expected != orthogonal {
                    return Err(HarvestError::IncompatibleAxes {
                        step_type,
                        key: o.key().to_string(),
                        expected,
                        got: orthogonal,
                    });
                }
                o.get_mut().extended += extended;
            }
        }
    }

    let mut out = Table::new();
    let mut cursors: HashMap<Key, usize> = HashMap::new();
    for (key, acc) in std::mem::take(table).into_entries() {
        let Accumulator::Histogram { histogram: h, .. } = acc else {
            continue;
        };
        let mut merged = key;
        merged.erase(column);
        let slot = match out.find(&merged) {
            Some(slot) => slot,
            None => {
                let nbins = shapes.get(&merged).map_or(0, |s| s.extended);
                let histogram = extended_histogram(&h, nbins, is_x, colname);
                out.insert(merged.clone(), Accumulator::histogram(histogram))
            }
        };
        let at = cursors.entry(merged).or_insert(0);
        let Some(dst) = out.slot_mut(slot).as_histogram_mut() else {
            continue;
        };
        if is_x {
            for ix in 0..h.nbins_x() {
                for iy in 0..h.nbins_y() {
                    dst.set_bin_content_2d(*at, iy, h.bin_content_2d(ix, iy));
                }
                *at += 1;
            }
        } else {
            for iy in 0..h.nbins_y() {
                for ix in 0..h.nbins_x() {
                    dst.set_bin_content_2d(ix, *at, h.bin_content_2d(ix, iy));
                }
                *at += 1;
            }
        }
        dst.add_entries(h.entries());
    }
    *table = out;
    Ok(())
}

/// Runs the post-run steps of `spec`, in program order, over `table`.
pub fn run_post_run(
    ctx: BookingContext<'_>,
    spec: &SummationSpec,
    table: &mut Table,
    geometry: &dyn Geometry,
    store: &mut dyn Store,
    custom: &mut Option<CustomHandler>,
) -> Result<(), HarvestError> {
    for step in spec.all_steps().iter().filter(|s| s.stage == Stage::PostRun) {
        match step.step_type {
            StepType::Save => {
                execute_save(ctx, table, geometry, store)?;
            }
            StepType::GroupBy => execute_group_by(step, table)?,
            StepType::Reduce => execute_reduce(step, table),
            StepType::ExtendX => execute_extend(step, table, true, geometry)?,
            StepType::ExtendY => execute_extend(step, table, false, geometry)?,
            StepType::Custom => match custom.as_mut() {
                Some(handler) => handler(step, table),
                None => warn!(step = %step, "no custom handler registered, step skipped"),
            },
            StepType::Count => {
                return Err(HarvestError::IllegalStep {
                    step_type: step.step_type.as_str(),
                })
            }
        }
    }
    Ok(())
}
