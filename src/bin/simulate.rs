//! Host binary around the simulation core: loads a JSON scenario (flat
//! parameter map, species definitions, climate rows, initial trees), builds
//! the model, and runs it for a number of years.
//!
//! Exit codes: 0 success, 2 configuration/input error, 3 runtime error,
//! 4 canceled.

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;
use sylva::climate::Climate;
use sylva::climate::ClimateRow;
use sylva::config::Parameters;
use sylva::config::Settings;
use sylva::error::SylvaError;
use sylva::model::Model;
use sylva::phenology::Phenology;
use sylva::species::SpeciesDef;
use sylva::species::SpeciesSet;
use sylva::stamp::StampContainer;

#[derive(Parser)]
#[command(name = "simulate", about = "Run a forest landscape simulation scenario")]
struct Args {
    /// scenario JSON file
    scenario: std::path::PathBuf,
    /// number of years to simulate
    #[arg(short, long, default_value_t = 10)]
    years: u32,
    /// worker threads (0 = one per core)
    #[arg(long, default_value_t = 0)]
    threads: usize,
    /// force the single-threaded dispatcher (determinism checks)
    #[arg(long)]
    single_threaded: bool,
}

#[derive(Deserialize)]
struct Scenario {
    /// flat keyed parameter map (the configuration surface)
    parameters: serde_json::Value,
    /// species definitions; each names its writer stamp file
    species: Vec<SpeciesDef>,
    /// path of the shared reader stamp library
    reader_stamps: String,
    /// climate rows: year, month, day, min temp, max temp, precipitation,
    /// radiation, vpd
    climate: Vec<(i32, u32, u32, f64, f64, f64, f64, f64)>,
    /// initial trees: x, y, species id, dbh (cm), height (m)
    #[serde(default)]
    trees: Vec<(f64, f64, String, f32, f32)>,
}

fn main() {
    sylva::init();
    let args = Args::parse();
    match run(args) {
        Ok(()) => {}
        Err(error) => {
            log::error!("{:#}", error);
            let code = error
                .downcast_ref::<SylvaError>()
                .map(|e| e.exit_code())
                .unwrap_or(3);
            std::process::exit(code);
        }
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    if args.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.threads)
            .build_global()
            .context("configure worker pool")?;
    }
    let text = std::fs::read_to_string(&args.scenario)
        .with_context(|| format!("read scenario {}", args.scenario.display()))?;
    let scenario: Scenario = serde_json::from_str(&text).context("parse scenario")?;

    let params = Parameters::from_json(&scenario.parameters.to_string())?;
    let mut settings = Settings::from_params(&params)?;
    if args.single_threaded {
        settings.multithreaded = false;
    }

    let readers = StampContainer::load_file(&scenario.reader_stamps)?;
    let mut species = SpeciesSet::new(readers);
    for def in &scenario.species {
        if def.lip_file.is_empty() {
            anyhow::bail!(SylvaError::config(format!(
                "species {}: no stamp file",
                def.id
            )));
        }
        let stamps = StampContainer::load_file(&def.lip_file)?;
        species.add(def, stamps)?;
    }

    let rows: Vec<ClimateRow> = scenario
        .climate
        .iter()
        .map(
            |&(year, month, day, min_temperature, max_temperature, precipitation, radiation, vpd)| {
                ClimateRow {
                    year,
                    month,
                    day,
                    min_temperature,
                    max_temperature,
                    precipitation,
                    radiation,
                    vpd,
                }
            },
        )
        .collect();
    let climate = Climate::from_rows(
        settings.climate.table_name.clone(),
        &rows,
        settings.latitude_rad,
        &settings.climate,
    )?;

    let phenology = vec![
        Phenology::evergreen(),
        Phenology::new(1, 0.9, 4.1, 2., 9., 10., 11.),
    ];
    let mut model = Model::build(settings, species, climate, phenology)?;
    for &(x, y, ref species_id, dbh, height) in &scenario.trees {
        model.add_tree(x, y, species_id, dbh, height)?;
    }
    model.setup_complete()?;
    log::info!(
        "scenario loaded: {} trees on {} resource units",
        scenario.trees.len(),
        model.resource_units().len()
    );

    for _ in 0..args.years {
        model.run_year()?;
        let (trees, volume, basal_area): (usize, f64, f64) = model
            .resource_units()
            .iter()
            .map(|ru| {
                let stats = ru.statistics();
                (stats.tree_count, stats.volume, stats.basal_area)
            })
            .fold((0, 0., 0.), |acc, s| (acc.0 + s.0, acc.1 + s.1, acc.2 + s.2));
        log::info!(
            "year {:>4}: {} trees, basal area {:.2} m2, volume {:.2} m3",
            model.year(),
            trees,
            basal_area,
            volume
        );
    }
    Ok(())
}
