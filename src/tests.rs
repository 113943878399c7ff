//! Cross-module scenario tests: small landscapes exercised through the full
//! yearly phase sequence.

use crate::climate::Climate;
use crate::climate::ClimateRow;
use crate::climate::tests::synthetic_rows;
use crate::config::Parameters;
use crate::config::Settings;
use crate::config::WaterSettings;
use crate::grid::Grid;
use crate::light;
use crate::light::HeightCell;
use crate::light::LightBuffer;
use crate::model::Model;
use crate::species::DispersalSink;
use crate::species::SpeciesSet;
use crate::species::test_def;
use crate::stamp::Stamp;
use crate::stamp::StampContainer;
use crate::tree::Tree;
use crate::water::WaterCycle;
use std::sync::Arc;
use std::sync::Mutex;

fn settings(world: (f64, f64), multithreaded: bool) -> Settings {
    let mut params = Parameters::new();
    params.insert(
        "model.worldRectangle",
        format!("0,0,{},{}", world.0, world.1),
    );
    params.insert("model.latitude", "48");
    params.insert("model.seed", "7");
    params.insert("model.multithreaded", if multithreaded { "true" } else { "false" });
    Settings::from_params(&params).unwrap()
}

/// one species with a 5x5 constant writer stamp and a matching uniform
/// reader, the fixture of the light scenarios
fn species_set(stamp_value: f32, seed_year_interval: u32) -> SpeciesSet {
    let mut readers = StampContainer::new("readers");
    let mut reader = Stamp::new_reader(5).unwrap();
    for y in 0..5 {
        for x in 0..5 {
            reader.set_value(x, y, 1.);
        }
    }
    readers.add_reader(reader, 2.).unwrap();
    readers.finalize();
    let mut set = SpeciesSet::new(readers);
    let mut writers = StampContainer::new("writers");
    let mut writer = Stamp::new_writer(5).unwrap();
    for y in 0..5 {
        for x in 0..5 {
            writer.set_value(x, y, stamp_value);
        }
    }
    writers.add_writer(writer, 20., 75., 2.).unwrap();
    writers.finalize();
    let mut def = test_def("pa");
    def.seed_year_interval = seed_year_interval;
    // scenario trees must survive their year: dead trees are dropped from
    // the RU vectors at year end
    def.prob_intrinsic = 0.999999;
    set.add(&def, writers).unwrap();
    set
}

fn climate() -> Climate {
    Climate::from_rows(
        "synthetic",
        &synthetic_rows(2000, false),
        48f64.to_radians(),
        &Default::default(),
    )
    .unwrap()
}

fn model(world: (f64, f64), multithreaded: bool) -> Model {
    Model::build(
        settings(world, multithreaded),
        species_set(0.8, 1000),
        climate(),
        Vec::new(),
    )
    .unwrap()
}

#[test]
fn empty_landscape_stays_unshaded_and_conserves_water() {
    let mut model = model((100., 100.), true);
    model.setup_complete().unwrap();
    model.run_year().unwrap();
    assert!(model.light_grid().iter().all(|&v| v == 1.));
    let ru = &model.resource_units()[0];
    let balance = ru.water.balance();
    assert!(balance.precipitation > 0.);
    assert!(balance.residual().abs() < 1e-6);
    assert!(ru.water.content() <= ru.water.field_capacity());
}

#[test]
fn single_tree_reads_the_stamp_mean() {
    let mut model = model((100., 100.), true);
    model.add_tree(50., 50., "pa", 20., 15.).unwrap();
    model.setup_complete().unwrap();
    model.run_year().unwrap();
    let tree = &model.resource_units()[0].trees[0];
    assert!((tree.light_resource_index() - 0.8).abs() < 1e-6);
    // every LIF cell stays in [0, 1]
    assert!(model.light_grid().iter().all(|&v| (0. ..=1.).contains(&v)));
    let shaded = model.light_grid().iter().filter(|&&v| v < 1.).count();
    assert_eq!(shaded, 25);
}

#[test]
fn twin_trees_agree_and_overlap_lowers_light() {
    let mut apart = model((200., 100.), true);
    apart.add_tree(40., 50., "pa", 20., 15.).unwrap();
    apart.add_tree(160., 50., "pa", 20., 15.).unwrap();
    apart.setup_complete().unwrap();
    apart.run_year().unwrap();
    let lri_apart: Vec<f32> = apart
        .resource_units()
        .iter()
        .flat_map(|ru| ru.trees.iter().map(|t| t.light_resource_index()))
        .collect();
    assert_eq!(lri_apart.len(), 2);
    assert_eq!(lri_apart[0], lri_apart[1]);

    let mut close = model((200., 100.), true);
    close.add_tree(50., 50., "pa", 20., 15.).unwrap();
    close.add_tree(54., 50., "pa", 20., 15.).unwrap();
    close.setup_complete().unwrap();
    close.run_year().unwrap();
    let lri_close: Vec<f32> = close.resource_units()[0]
        .trees
        .iter()
        .map(|t| t.light_resource_index())
        .collect();
    assert_eq!(lri_close[0], lri_close[1]);
    assert!(lri_close[0] < lri_apart[0]);
    // overlapped cells hold the product of both stamps
    let min = close.light_grid().iter().cloned().fold(1f32, f32::min);
    assert!((min - 0.64).abs() < 1e-6);
}

#[test]
fn single_and_multi_threaded_runs_are_bit_identical() {
    let build = |multithreaded: bool| {
        let mut m = model((400., 400.), multithreaded);
        let mut id = 0;
        for ix in 0..4 {
            for iy in 0..4 {
                for t in 0..5 {
                    let x = ix as f64 * 100. + 10. + t as f64 * 17.;
                    let y = iy as f64 * 100. + 30. + t as f64 * 9.;
                    m.add_tree(x, y, "pa", 20. + t as f32, 15.).unwrap();
                    id += 1;
                }
            }
        }
        assert_eq!(id, 80);
        m.setup_complete().unwrap();
        for _ in 0..3 {
            m.run_year().unwrap();
        }
        m
    };
    let parallel = build(true);
    let serial = build(false);
    // bit-identical light grids
    let pa: Vec<u32> = parallel.light_grid().iter().map(|v| v.to_bits()).collect();
    let se: Vec<u32> = serial.light_grid().iter().map(|v| v.to_bits()).collect();
    assert_eq!(pa, se);
    // identical tree states and water states
    for (a, b) in parallel
        .resource_units()
        .iter()
        .zip(serial.resource_units())
    {
        assert_eq!(a.water.content().to_bits(), b.water.content().to_bits());
        assert_eq!(a.trees.len(), b.trees.len());
        for (ta, tb) in a.trees.iter().zip(&b.trees) {
            assert_eq!(ta.id(), tb.id());
            assert_eq!(ta.dbh().to_bits(), tb.dbh().to_bits());
            assert_eq!(ta.height().to_bits(), tb.height().to_bits());
            assert_eq!(ta.age(), tb.age());
            assert_eq!(ta.is_alive(), tb.is_alive());
            assert_eq!(
                ta.light_resource_index().to_bits(),
                tb.light_resource_index().to_bits()
            );
        }
    }
}

#[test]
fn checkerboard_set_order_does_not_change_the_lif() {
    // two RUs of the same checkerboard set, 200 m apart, applied in both
    // orders onto fresh grids
    let species = species_set(0.7, 1000);
    let make_grids = || {
        let mut lif: Grid<f32> = Grid::with_size(2., 150, 50);
        lif.fill(1.);
        let height: Grid<HeightCell> = Grid::with_size(10., 30, 10);
        (lif, height)
    };
    let tree_a = Tree::new(1, (50., 50.), 0, 0, 20., 15.);
    let tree_b = Tree::new(2, (250., 50.), 0, 2, 20., 15.);
    let apply = |order: [&Tree; 2]| {
        let (mut lif, mut height) = make_grids();
        {
            let buffer = LightBuffer::new(&mut lif, &mut height);
            for tree in order {
                light::apply_tree(tree, &species, &buffer);
            }
        }
        lif.iter().map(|v| v.to_bits()).collect::<Vec<u32>>()
    };
    assert_eq!(apply([&tree_a, &tree_b]), apply([&tree_b, &tree_a]));
}

#[test]
fn year_begin_is_idempotent() {
    let run = |double_begin: bool| {
        let mut m = model((100., 100.), false);
        m.add_tree(50., 50., "pa", 20., 15.).unwrap();
        m.setup_complete().unwrap();
        m.year_begin().unwrap();
        if double_begin {
            m.year_begin().unwrap();
        }
        m.run_year().unwrap();
        (
            m.climate().current_year(),
            m.light_grid().iter().map(|v| v.to_bits()).collect::<Vec<u32>>(),
            m.resource_units()[0].trees[0].dbh().to_bits(),
        )
    };
    assert_eq!(run(false), run(true));
}

#[test]
fn pulse_of_rain_reaches_the_bucket_and_balances() {
    const DAYS: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    let mut rows = Vec::new();
    let mut doy = 0;
    for (m, &days) in DAYS.iter().enumerate() {
        for d in 1..=days {
            rows.push(ClimateRow {
                year: 2000,
                month: m as u32 + 1,
                day: d,
                min_temperature: 5.,
                max_temperature: 5.,
                precipitation: if doy == 100 { 10. } else { 0. },
                radiation: 8.,
                vpd: 0.4,
            });
            doy += 1;
        }
    }
    let climate = Climate::from_rows("pulse", &rows, 48f64.to_radians(), &Default::default())
        .unwrap();
    let species = SpeciesSet::new(StampContainer::new("readers"));
    let mut cycle = WaterCycle::setup(&WaterSettings::default()).unwrap();
    cycle.set_content(cycle.field_capacity() / 2.);
    let before = cycle.content();
    cycle
        .run_year(&species, &[], 0., climate.days(), climate.sun(), 0)
        .unwrap();
    let balance = cycle.balance();
    assert_eq!(balance.precipitation, 10.);
    // the pulse reached the ground on day 100 (bare ground, no canopy)
    assert_eq!(cycle.water_to_ground()[100], 10.);
    assert_eq!(cycle.water_to_ground()[99], 0.);
    // water_in - water_out = delta content + delta snow
    assert!(balance.residual().abs() < 1e-6);
    assert!(cycle.content() < before + 10.);
}

#[test]
fn mature_trees_report_to_the_dispersal_sink() {
    #[derive(Clone)]
    struct Recorder(Arc<Mutex<Vec<(usize, usize)>>>);
    impl DispersalSink for Recorder {
        fn clear(&mut self) {
            self.0.lock().unwrap().clear();
        }
        fn set_mature_tree(&mut self, position_index: (usize, usize)) {
            self.0.lock().unwrap().push(position_index);
        }
    }
    let recorder = Recorder(Arc::new(Mutex::new(Vec::new())));
    let mut m = Model::build(
        settings((100., 100.), true),
        species_set(0.8, 1), // every year is a seed year
        climate(),
        Vec::new(),
    )
    .unwrap();
    m.species_mut().set_dispersal(0, Box::new(recorder.clone()));
    // mature (estimated age from height) and tall enough
    m.add_tree(50., 50., "pa", 30., 25.).unwrap();
    // too short to produce seeds
    m.add_tree(20., 20., "pa", 5., 3.).unwrap();
    m.setup_complete().unwrap();
    m.run_year().unwrap();
    let reports = recorder.0.lock().unwrap();
    assert_eq!(reports.as_slice(), &[(25, 25)]);
}

#[test]
fn cancellation_aborts_the_year() {
    let mut m = model((200., 200.), true);
    m.add_tree(50., 50., "pa", 20., 15.).unwrap();
    m.setup_complete().unwrap();
    m.cancel_flag()
        .store(true, std::sync::atomic::Ordering::Relaxed);
    let err = m.run_year().unwrap_err();
    assert_eq!(err.exit_code(), 4);
}

#[test]
fn trees_outside_the_world_are_rejected() {
    let mut m = model((100., 100.), true);
    assert!(m.add_tree(150., 50., "pa", 20., 15.).is_err());
    assert!(m.add_tree(50., 50., "oak", 20., 15.).is_err());
    // the boundary itself belongs to no RU (upper-right exclusive)
    assert!(m.add_tree(100., 100., "pa", 20., 15.).is_err());
    assert!(m.add_tree(0., 0., "pa", 20., 15.).is_ok());
}
