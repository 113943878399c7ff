pub mod climate;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod expr;
pub mod grid;
pub mod light;
pub mod model;
pub mod phenology;
pub mod resunit;
pub mod species;
pub mod stamp;
pub mod tree;
pub mod water;

#[cfg(test)]
mod tests;

/// dimensional analysis types
pub type LightValue = f32;
pub type Meters = f64;
pub type Millimeters = f64;
pub type KiloPascal = f64;
pub type Response = f64;

// landscape geometry (m)
pub const LIGHT_CELL_SIZE: Meters = 2.;
pub const HEIGHT_CELL_SIZE: Meters = 10.;
pub const RU_CELL_SIZE: Meters = 100.;
pub const LIGHT_CELLS_PER_HEIGHT_CELL: usize = 5;
pub const LIGHT_CELLS_PER_RU: usize = 50;

// stamp classification parameters
pub const DBH_CLASS_LOW: f32 = 4.;
pub const DBH_CLASS_COUNT: usize = 70;
pub const HD_CLASS_LOW: f32 = 35.;
pub const HD_CLASS_WIDTH: f32 = 10.;
pub const HD_CLASS_COUNT: usize = 16;

// stamp binary format
pub const STAMP_MAGIC: u32 = 0xFEED0001;
pub const STAMP_VERSION: u16 = 100;

// water cycle parameters
pub const SNOW_MELT_COEFFICIENT: f64 = 0.7; // mm per degree-day
pub const PSI_PERMANENT_WILTING_POINT: KiloPascal = -4000.;
pub const PSI_FIELD_CAPACITY: KiloPascal = -15.;
pub const LATENT_HEAT_OF_VAPORIZATION: f64 = 2_460_000.; // J/kg
pub const GROUND_VEGETATION_CONDUCTANCE: f64 = 0.02; // m/s

// expression engine parameters
pub const EXPRESSION_STACK_SIZE: usize = 32;
pub const LINEARIZATION_STEPS: usize = 1024;

// regeneration parameters
pub const SEED_PRODUCTION_MIN_HEIGHT: f32 = 4.; // m

/// clamp a value into [lo, hi]
pub(crate) fn limit(value: f64, lo: f64, hi: f64) -> f64 {
    value.max(lo).min(hi)
}

/// initialize logging: terminal (info) plus a timestamped file under logs/
pub fn init() {
    std::fs::create_dir_all("logs").expect("create logs directory");
    let config = simplelog::ConfigBuilder::new()
        .set_location_level(log::LevelFilter::Off)
        .set_target_level(log::LevelFilter::Off)
        .set_thread_level(log::LevelFilter::Off)
        .build();
    let time = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("time moves slow")
        .as_secs();
    let file = simplelog::WriteLogger::new(
        log::LevelFilter::Debug,
        config.clone(),
        std::fs::File::create(format!("logs/{}.log", time)).expect("create log file"),
    );
    let term = simplelog::TermLogger::new(
        log::LevelFilter::Info,
        config.clone(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );
    simplelog::CombinedLogger::init(vec![term, file]).expect("initialize logger");
    log::info!("{} logical cores available", num_cpus::get());
}
