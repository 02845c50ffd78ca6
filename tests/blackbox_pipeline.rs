use dimsum::config::Config;
use dimsum::geometry::{ColumnDef, ModuleId, Source, StaticGeometry};
use dimsum::pipeline::{Pipeline, SampleFile};
use dimsum::store::{MemoryStore, Store};
use dimsum::summation::{
    Accumulator, AxisRange, Column, HistogramManager, HistogramTemplate, Key, ManagerParams, Stage,
    Step, StepType, SummationSpec, Value,
};

/// Two layers with three modules each. Module ids are `10 * layer + module`.
fn geometry() -> (StaticGeometry, Column, Column) {
    let mut g = StaticGeometry::new();
    let layer = g.add_column(ColumnDef {
        name: "layer".into(),
        pretty: "Layer".into(),
        min: 1,
        max: 2,
    });
    let module = g.add_column(ColumnDef {
        name: "module".into(),
        pretty: "Module".into(),
        min: 1,
        max: 3,
    });
    for l in 1..=2 {
        for m in 1..=3 {
            g.add_module(ModuleId((10 * l + m) as u32), [(layer, l), (module, m)])
                .unwrap();
        }
    }
    (g, layer, module)
}

fn manager(dimensions: u8, steps: Vec<Step>) -> HistogramManager {
    let mut m = HistogramManager::new(ManagerParams {
        enabled: true,
        book_undefined: true,
        top_folder_name: "Pixel".into(),
        template: HistogramTemplate {
            name: "digis".into(),
            title: "Digis".into(),
            xlabel: "digis".into(),
            ylabel: "#entries".into(),
            dimensions,
            x: AxisRange {
                nbins: 20,
                min: 0.0,
                max: 20.0,
            },
            y: AxisRange::UNIT,
        },
    });
    m.add_spec(SummationSpec::new(steps).unwrap()).unwrap();
    m
}

fn layer_key(layer: Column, value: i32) -> Key {
    Key::from_values([Value::new(layer, value)])
}

#[test]
fn per_event_count_grouped_by_layer() {
    let (mut g, layer, module) = geometry();
    let mut m = manager(
        0,
        vec![
            Step::new(StepType::GroupBy, Stage::PerEvent, vec![layer, module]),
            Step::new(StepType::Count, Stage::PerEvent, vec![]),
            Step::new(StepType::GroupBy, Stage::PerEventHarvest, vec![layer]),
            Step::new(StepType::Save, Stage::PostRun, vec![]),
        ],
    );
    let mut store = MemoryStore::new();
    m.book(&mut g, &mut store).unwrap();

    for _ in 0..5 {
        m.fill_count(&Source::in_event(ModuleId(11), 1), &g).unwrap();
    }
    for _ in 0..3 {
        m.fill_count(&Source::in_event(ModuleId(22), 1), &g).unwrap();
    }
    m.harvest_per_event().unwrap();

    let table = m.table(0).unwrap();
    let seed = |l: i32, md: i32| Key::from_values([Value::new(layer, l), Value::new(module, md)]);
    assert_eq!(table.get(&seed(1, 1)), Some(&Accumulator::Counter(0)));
    assert_eq!(table.get(&seed(2, 2)), Some(&Accumulator::Counter(0)));

    m.persist(&mut store);
    m.harvest(&mut g, &mut store).unwrap();

    let l1 = store.histogram("Pixel/Layer_1/num_digis").unwrap();
    assert_eq!(l1.entries(), 1);
    assert_eq!(l1.bin_content(5), 1.0);
    assert_eq!(l1.x.label, "#digis per Event and Module");
    let l2 = store.histogram("Pixel/Layer_2/num_digis").unwrap();
    assert_eq!(l2.entries(), 1);
    assert_eq!(l2.bin_content(3), 1.0);
}

#[test]
fn extend_x_fills_one_bin_per_module() {
    let (mut g, layer, module) = geometry();
    let mut m = manager(
        1,
        vec![
            Step::new(StepType::GroupBy, Stage::PerEvent, vec![layer, module]),
            Step::new(StepType::Count, Stage::PerEvent, vec![]),
            Step::new(StepType::ExtendX, Stage::PerEvent, vec![module]),
        ],
    );
    let mut store = MemoryStore::new();
    m.book(&mut g, &mut store).unwrap();

    let h = store.histogram("Pixel/Layer_1/num_digis_per_Module").unwrap();
    assert_eq!(h.nbins_x(), 3);
    assert_eq!(h.x.min, 0.5);
    assert_eq!(h.x.max, 3.5);

    for (md, times) in [(1, 1), (2, 2), (3, 4)] {
        for _ in 0..times {
            m.fill_1d(99.0, &Source::module(ModuleId(10 + md)), &g).unwrap();
        }
    }
    let h = m
        .table(0)
        .unwrap()
        .get(&layer_key(layer, 1))
        .and_then(Accumulator::as_histogram)
        .unwrap();
    assert_eq!(h.bin_content(0), 1.0);
    assert_eq!(h.bin_content(1), 2.0);
    assert_eq!(h.bin_content(2), 4.0);
}

#[test]
fn post_run_group_by_then_extend() {
    let (mut g, layer, module) = geometry();
    let mut m = manager(
        1,
        vec![
            Step::new(StepType::GroupBy, Stage::PerEvent, vec![layer, module]),
            Step::new(StepType::GroupBy, Stage::PostRun, vec![layer]),
            Step::new(StepType::ExtendX, Stage::PostRun, vec![layer]),
            Step::new(StepType::Save, Stage::PostRun, vec![]),
        ],
    );
    let mut store = MemoryStore::new();
    m.book(&mut g, &mut store).unwrap();
    m.fill_1d(0.5, &Source::module(ModuleId(11)), &g).unwrap();
    m.fill_1d(0.5, &Source::module(ModuleId(12)), &g).unwrap();
    m.fill_1d(1.5, &Source::module(ModuleId(23)), &g).unwrap();
    m.persist(&mut store);
    m.harvest(&mut g, &mut store).unwrap();

    // Two layers of 20 bins each, concatenated.
    let h = store.histogram("Pixel/digis").unwrap();
    assert_eq!(h.nbins_x(), 40);
    assert_eq!(h.bin_content(0), 2.0);
    assert_eq!(h.bin_content(21), 1.0);
    assert_eq!(h.title, "Digis per Layer");
    assert_eq!(h.x.label, "Layer/digis");
}

#[test]
fn cached_and_uncached_fills_agree() {
    let (mut g, layer, module) = geometry();
    let steps = || {
        vec![
            Step::new(StepType::GroupBy, Stage::PerEvent, vec![layer, module]),
            Step::new(StepType::Count, Stage::PerEvent, vec![]),
            Step::new(StepType::ExtendX, Stage::PerEvent, vec![module]),
        ]
    };
    let mut cached = manager(1, steps());
    let mut uncached = manager(1, steps());
    let mut store = MemoryStore::new();
    cached.book(&mut g, &mut store).unwrap();
    uncached.book(&mut g, &mut store).unwrap();

    let modules = [11, 11, 11, 12, 12, 21, 23, 23];
    for (n, id) in modules.into_iter().enumerate() {
        cached.fill_1d(1.0, &Source::module(ModuleId(id)), &g).unwrap();
        // A fresh event id on every call forces re-extraction.
        let fresh = Source::in_event(ModuleId(id), n as u64);
        uncached.fill_1d(1.0, &fresh, &g).unwrap();
    }

    let dump = |m: &HistogramManager| {
        m.table(0)
            .unwrap()
            .iter()
            .map(|(k, a)| (k.clone(), a.as_histogram().map(|h| h.integral())))
            .collect::<Vec<_>>()
    };
    assert_eq!(dump(&cached), dump(&uncached));
}

#[test]
fn harvest_reloads_from_store_in_separate_pass() {
    let (mut g, layer, module) = geometry();
    let steps = vec![
        Step::new(StepType::GroupBy, Stage::PerEvent, vec![layer, module]),
        Step::new(StepType::Reduce, Stage::PostRun, vec![]).with_arg("COUNT"),
        Step::new(StepType::Save, Stage::PostRun, vec![]),
    ];
    let mut filler = manager(1, steps.clone());
    let mut store = MemoryStore::new();
    filler.book(&mut g, &mut store).unwrap();
    for _ in 0..4 {
        filler.fill_1d(2.0, &Source::module(ModuleId(13)), &g).unwrap();
    }
    filler.persist(&mut store);

    // A fresh manager with no stage-1 state harvests from the store alone.
    let mut harvester = manager(1, steps);
    harvester.harvest(&mut g, &mut store).unwrap();
    let reduced = store
        .get("Pixel/Layer_1/Module_3/num_digis")
        .map(|(_, h)| h)
        .unwrap();
    assert_eq!(reduced.bin_content(0), 4.0);
}

#[test]
fn yaml_config_end_to_end() {
    let cfg = Config::from_yaml(
        r#"
geometry:
  columns:
    - { name: layer, pretty: Layer, min: 1, max: 2 }
    - { name: module, pretty: Module, min: 1, max: 2 }
  modules:
    - { id: 1, values: { layer: 1, module: 1 } }
    - { id: 2, values: { layer: 1, module: 2 } }
    - { id: 3, values: { layer: 2, module: 1 } }
managers:
  - name: clusters
    top_folder_name: Pixel
    dimensions: 0
    range_nbins: 10
    range_max: 10
    specs:
      - steps:
          - { type: group_by, stage: per_event, columns: [layer, module] }
          - { type: count, stage: per_event }
          - { type: group_by, stage: per_event_harvest, columns: [layer] }
          - { type: save, stage: post_run }
"#,
    )
    .unwrap();
    let samples = SampleFile::from_yaml(
        r#"
events:
  - id: 1
    fills:
      - { manager: clusters, module: 1 }
      - { manager: clusters, module: 1 }
      - { manager: clusters, module: 3 }
  - id: 2
    fills:
      - { manager: clusters, module: 1 }
"#,
    )
    .unwrap();

    let mut pipeline = Pipeline::from_config(&cfg).unwrap();
    pipeline.book().unwrap();
    pipeline.replay(&samples).unwrap();
    let store = pipeline.finish().unwrap();

    // Layer 1: event 1 counted 2, event 2 counted 1.
    let l1 = store.histogram("Pixel/Layer_1/num_clusters").unwrap();
    assert_eq!(l1.entries(), 2);
    assert_eq!(l1.bin_content(1), 1.0);
    assert_eq!(l1.bin_content(2), 1.0);
    // Layer 2: event 1 counted 1, event 2 counted 0 for the module seen before.
    let l2 = store.histogram("Pixel/Layer_2/num_clusters").unwrap();
    assert_eq!(l2.entries(), 2);
    assert_eq!(l2.bin_content(0), 1.0);
    assert_eq!(l2.bin_content(1), 1.0);

    let json = serde_json::to_value(&store).unwrap();
    assert!(json["entries"].as_array().unwrap().len() >= 2);
}
