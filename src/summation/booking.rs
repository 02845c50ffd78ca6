//! Pre-declaration of accumulators.
//!
//! Booking replays the stage-1 walk for every source the geometry knows,
//! without samples, to learn the final key and the histogram shape each
//! source would fill. Harvesting replays the same walk to find the
//! persisted histograms again.

use tracing::{debug, error};

use crate::geometry::{Geometry, Source};
use crate::store::Store;

use super::accumulator::Accumulator;
use super::column::value_suffix;
use super::histogram::{Axis, Histogram};
use super::key::Key;
use super::stage1::FillError;
use super::step::{Stage, StepType, SummationSpec};
use super::table::Table;

/// Binning of one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisRange {
    pub nbins: usize,
    pub min: f64,
    pub max: f64,
}

impl AxisRange {
    pub const UNIT: AxisRange = AxisRange {
        nbins: 1,
        min: 0.0,
        max: 1.0,
    };

    /// One bin per integer value in `[min, max]`.
    pub fn per_value(min: i32, max: i32) -> Self {
        let lo = f64::from(min) - 0.5;
        let hi = f64::from(max) + 0.5;
        Self {
            nbins: (hi - lo) as usize,
            min: lo,
            max: hi,
        }
    }

    fn axis(&self, label: &str) -> Axis {
        Axis::new(self.nbins, self.min, self.max, label)
    }
}

/// Base naming and binning shared by every histogram of one manager.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramTemplate {
    pub name: String,
    pub title: String,
    pub xlabel: String,
    pub ylabel: String,
    pub dimensions: u8,
    pub x: AxisRange,
    pub y: AxisRange,
}

/// Final key and histogram shape for one source.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingPlan {
    pub key: Key,
    pub dimensions: u8,
    pub name: String,
    pub title: String,
    pub xlabel: String,
    pub ylabel: String,
    pub x: AxisRange,
    pub y: AxisRange,
}

impl BookingPlan {
    /// Empty histogram with the planned shape; 0-D plans book a 1-D histogram.
    pub fn histogram(&self) -> Histogram {
        if self.dimensions < 2 {
            Histogram::new_1d(&self.name, &self.title, self.x.axis(&self.xlabel))
                .with_value_label(&self.ylabel)
        } else {
            Histogram::new_2d(
                &self.name,
                &self.title,
                self.x.axis(&self.xlabel),
                self.y.axis(&self.ylabel),
            )
        }
    }
}

/// Replays the stage-1 steps of `spec` on `seed` without samples.
pub fn simulate(
    template: &HistogramTemplate,
    spec: &SummationSpec,
    seed: Key,
    geometry: &dyn Geometry,
) -> Result<BookingPlan, FillError> {
    let mut plan = BookingPlan {
        key: seed,
        dimensions: template.dimensions,
        name: template.name.clone(),
        title: template.title.clone(),
        xlabel: template.xlabel.clone(),
        ylabel: template.ylabel.clone(),
        x: template.x,
        y: template.y,
    };

    for (index, step) in spec.steps() {
        if !step.stage.is_stage1() {
            continue;
        }
        match step.step_type {
            StepType::Save => {}
            StepType::Count => {
                plan.dimensions = 0;
                plan.title = format!("Count of {}", plan.title);
                plan.name = format!("num_{}", plan.name);
                plan.ylabel = format!("#{}", plan.xlabel);
                plan.xlabel.clear();
                plan.x = AxisRange::UNIT;
                plan.y = AxisRange::UNIT;
            }
            StepType::ExtendX | StepType::ExtendY => {
                let column = step.extend_column();
                let colname = geometry.pretty(column);
                let (min, max) = (geometry.min_value(column), geometry.max_value(column));
                let range = AxisRange::per_value(min, max);
                plan.title = format!("{} per {colname}", plan.title);
                plan.name = format!("{}_per_{colname}", plan.name);
                if step.step_type == StepType::ExtendX {
                    plan.dimensions = if plan.dimensions == 0 { 1 } else { 2 };
                    plan.xlabel = colname.to_string();
                    plan.x = range;
                } else {
                    plan.dimensions = 2;
                    plan.ylabel = colname.to_string();
                    plan.y = range;
                }
                plan.key.erase(column);
            }
            StepType::GroupBy if step.stage == Stage::PerEventHarvest => {
                plan.dimensions = 1;
                plan.x = template.x;
                let mut xlabel = format!("{} per Event", plan.ylabel);
                if let Some(&last) = spec.seed_columns().last() {
                    xlabel.push_str(" and ");
                    xlabel.push_str(geometry.pretty(last));
                }
                plan.xlabel = xlabel;
                plan.ylabel = "#Entries".to_string();
                plan.key = plan.key.project(&step.columns);
            }
            StepType::GroupBy | StepType::Reduce | StepType::Custom => {
                return Err(FillError::IllegalStep {
                    index,
                    step_type: step.step_type.as_str(),
                    stage: step.stage.as_str(),
                });
            }
        }
    }
    Ok(plan)
}

/// Folder for a key: `<top>/<Pretty>_<value>/...`.
pub fn make_path(top_folder: &str, key: &Key, geometry: &dyn Geometry) -> String {
    let mut dir = format!("{top_folder}/");
    for v in key.iter() {
        let name = geometry.pretty(v.column);
        // Nameless columns only disambiguate; they do not show up in paths.
        if name.is_empty() {
            continue;
        }
        dir.push_str(name);
        dir.push_str(&value_suffix(v.value));
        dir.push('/');
    }
    dir
}

/// Where and how one manager's histograms are booked.
#[derive(Debug, Clone, Copy)]
pub struct BookingContext<'a> {
    pub template: &'a HistogramTemplate,
    pub top_folder: &'a str,
    pub book_undefined: bool,
}

fn seed_key(spec: &SummationSpec, geometry: &dyn Geometry, source: &Source) -> Key {
    let mut seed = Key::with_capacity(spec.seed_columns().len());
    geometry.extract_columns(spec.seed_columns(), source, &mut seed);
    seed
}

/// Books every histogram `spec` can reach. Counters are left to stage 1.
/// Returns the number of newly booked histograms.
pub fn book_spec(
    ctx: BookingContext<'_>,
    spec: &SummationSpec,
    table: &mut Table,
    geometry: &dyn Geometry,
    store: &mut dyn Store,
) -> Result<usize, FillError> {
    let mut booked = 0;
    for source in geometry.all_sources() {
        let seed = seed_key(spec, geometry, &source);
        if !ctx.book_undefined && seed.has_undefined() {
            continue;
        }
        let plan = simulate(ctx.template, spec, seed, geometry)?;
        if table.get(&plan.key).is_some_and(|acc| acc.handle().is_some()) {
            continue;
        }
        let folder = make_path(ctx.top_folder, &plan.key, geometry);
        let histogram = plan.histogram();
        let handle = store.book(&folder, &histogram);
        table.insert(plan.key, Accumulator::bound(histogram, handle));
        booked += 1;
    }
    Ok(booked)
}

/// Rebuilds `table` from persisted histograms, recomputing every key
/// exactly as booking did. Returns the number of histograms loaded.
pub fn load_spec(
    ctx: BookingContext<'_>,
    spec: &SummationSpec,
    table: &mut Table,
    geometry: &dyn Geometry,
    store: &dyn Store,
) -> Result<usize, FillError> {
    let mut loaded = 0;
    for source in geometry.all_sources() {
        let seed = seed_key(spec, geometry, &source);
        let plan = simulate(ctx.template, spec, seed, geometry)?;
        if table.find(&plan.key).is_some() {
            continue;
        }
        let path = make_path(ctx.top_folder, &plan.key, geometry) + &plan.name;
        match store.get(&path) {
            Some((handle, histogram)) => {
                table.insert(plan.key, Accumulator::bound(histogram, handle));
                loaded += 1;
            }
            None if ctx.book_undefined => error!(path = %path, "histogram not found in store"),
            None => debug!(path = %path, "histogram not booked"),
        }
    }
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{ColumnDef, ModuleId, StaticGeometry};
    use crate::store::MemoryStore;
    use crate::summation::column::{Column, Value, UNDEFINED};
    use crate::summation::step::Step;

    fn def(name: &str, min: i32, max: i32) -> ColumnDef {
        ColumnDef {
            name: name.to_string(),
            pretty: name.to_string(),
            min,
            max,
        }
    }

    /// Layers 1..=2 with modules 1..=3 each, plus one module without a layer.
    fn geometry() -> (StaticGeometry, Column, Column) {
        let mut g = StaticGeometry::new();
        let layer = g.add_column(def("Layer", 1, 2));
        let module = g.add_column(def("Module", 1, 3));
        let mut id = 1;
        for l in 1..=2 {
            for m in 1..=3 {
                g.add_module(ModuleId(id), [(layer, l), (module, m)]).unwrap();
                id += 1;
            }
        }
        g.add_module(ModuleId(100), [(module, 1)]).unwrap();
        (g, layer, module)
    }

    fn template(dimensions: u8) -> HistogramTemplate {
        HistogramTemplate {
            name: "digis".to_string(),
            title: "Digis".to_string(),
            xlabel: "digis".to_string(),
            ylabel: "#entries".to_string(),
            dimensions,
            x: AxisRange {
                nbins: 50,
                min: 0.0,
                max: 50.0,
            },
            y: AxisRange::UNIT,
        }
    }

    fn ctx(t: &HistogramTemplate, book_undefined: bool) -> BookingContext<'_> {
        BookingContext {
            template: t,
            top_folder: "Top",
            book_undefined,
        }
    }

    #[test]
    fn test_per_value_range() {
        let r = AxisRange::per_value(1, 3);
        assert_eq!(r.nbins, 3);
        assert_eq!(r.min, 0.5);
        assert_eq!(r.max, 3.5);
    }

    #[test]
    fn test_simulate_count_extend() {
        let (g, layer, module) = geometry();
        let spec = SummationSpec::new(vec![
            Step::new(StepType::GroupBy, Stage::PerEvent, vec![layer, module]),
            Step::new(StepType::Count, Stage::PerEvent, vec![]),
            Step::new(StepType::ExtendX, Stage::PerEvent, vec![module]),
        ])
        .unwrap();
        let seed = Key::from_values([Value::new(layer, 2), Value::new(module, 3)]);
        let plan = simulate(&template(1), &spec, seed, &g).unwrap();
        assert_eq!(plan.key, Key::from_values([Value::new(layer, 2)]));
        assert_eq!(plan.dimensions, 1);
        assert_eq!(plan.name, "num_digis_per_Module");
        assert_eq!(plan.title, "Count of Digis per Module");
        assert_eq!(plan.xlabel, "Module");
        assert_eq!(plan.ylabel, "#digis");
        assert_eq!(plan.x, AxisRange::per_value(1, 3));
    }

    #[test]
    fn test_simulate_per_event_groupby() {
        let (g, layer, module) = geometry();
        let spec = SummationSpec::new(vec![
            Step::new(StepType::GroupBy, Stage::PerEvent, vec![layer, module]),
            Step::new(StepType::Count, Stage::PerEvent, vec![]),
            Step::new(StepType::GroupBy, Stage::PerEventHarvest, vec![layer]),
        ])
        .unwrap();
        let seed = Key::from_values([Value::new(layer, 1), Value::new(module, 2)]);
        let plan = simulate(&template(0), &spec, seed, &g).unwrap();
        assert_eq!(plan.key, Key::from_values([Value::new(layer, 1)]));
        assert_eq!(plan.dimensions, 1);
        assert_eq!(plan.xlabel, "#digis per Event and Module");
        assert_eq!(plan.ylabel, "#Entries");
        assert_eq!(plan.x.nbins, 50);
    }

    #[test]
    fn test_make_path() {
        let (g, layer, module) = geometry();
        let key = Key::from_values([Value::new(layer, 1), Value::new(module, 0)]);
        assert_eq!(make_path("Top", &key, &g), "Top/Layer_1/Module/");
        let undefined = Key::from_values([Value::new(layer, UNDEFINED)]);
        assert_eq!(make_path("Top", &undefined, &g), "Top/Layer_UNDEFINED/");
        let nameless = Key::from_values([Value::new(Column(9), 4)]);
        assert_eq!(make_path("Top", &nameless, &g), "Top/");
    }

    #[test]
    fn test_book_skips_undefined_unless_configured() {
        let (g, layer, module) = geometry();
        let seed = Step::new(StepType::GroupBy, Stage::PerEvent, vec![layer, module]);
        let spec = SummationSpec::new(vec![seed]).unwrap();
        let t = template(1);

        let mut table = Table::new();
        let mut store = MemoryStore::new();
        let n = book_spec(ctx(&t, false), &spec, &mut table, &g, &mut store).unwrap();
        assert_eq!(n, 6);
        assert_eq!(store.len(), 6);
        assert!(store.histogram("Top/Layer_2/Module_3/digis").is_some());

        let mut table = Table::new();
        let mut store = MemoryStore::new();
        let n = book_spec(ctx(&t, true), &spec, &mut table, &g, &mut store).unwrap();
        assert_eq!(n, 7);
        assert!(store.histogram("Top/Layer_UNDEFINED/Module_1/digis").is_some());
    }

    #[test]
    fn test_book_grouped_histograms_without_counters() {
        let (g, layer, module) = geometry();
        let spec = SummationSpec::new(vec![
            Step::new(StepType::GroupBy, Stage::PerEvent, vec![layer, module]),
            Step::new(StepType::Count, Stage::PerEvent, vec![]),
            Step::new(StepType::GroupBy, Stage::PerEventHarvest, vec![layer]),
        ])
        .unwrap();
        let t = template(0);
        let mut table = Table::new();
        let mut store = MemoryStore::new();
        let n = book_spec(ctx(&t, false), &spec, &mut table, &g, &mut store).unwrap();
        // One histogram per layer, shared by three modules each.
        assert_eq!(n, 2);
        assert_eq!(table.len(), 2);
        assert!(table.iter().all(|(_, a)| !a.is_counter()));
        assert!(store.histogram("Top/Layer_1/num_digis").is_some());
    }

    #[test]
    fn test_load_recomputes_keys() {
        let (g, layer, module) = geometry();
        let spec = SummationSpec::new(vec![
            Step::new(StepType::GroupBy, Stage::PerEvent, vec![layer, module]),
            Step::new(StepType::Count, Stage::PerEvent, vec![]),
            Step::new(StepType::ExtendX, Stage::PerEvent, vec![module]),
        ])
        .unwrap();
        let t = template(1);
        let mut booked = Table::new();
        let mut store = MemoryStore::new();
        book_spec(ctx(&t, false), &spec, &mut booked, &g, &mut store).unwrap();

        let mut reloaded = Table::new();
        let n = load_spec(ctx(&t, false), &spec, &mut reloaded, &g, &store).unwrap();
        assert_eq!(n, 2);
        let key = Key::from_values([Value::new(layer, 1)]);
        let acc = reloaded.get(&key).unwrap();
        assert!(acc.handle().is_some());
        assert_eq!(acc.as_histogram().unwrap().name, "num_digis_per_Module");
    }
}
