//! The model: landscape assembly and the yearly phase sequence.
//!
//! A simulated year walks a fixed ladder of phase barriers: climate advance
//! and yearly resets, the per-RU water cycle, light pass A over the two
//! checkerboard sets, light pass B, growth/mortality/regeneration, and the
//! statistics refresh. External modules (management, disturbance) hook in
//! between pass B and growth through the tree-marking interface.

use crate::climate::Climate;
use crate::config::Settings;
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::error::SylvaError;
use crate::grid::Grid;
use crate::grid::Rect;
use crate::light;
use crate::light::HeightCell;
use crate::light::LightBuffer;
use crate::phenology::Phenology;
use crate::resunit::ResourceUnit;
use crate::species::SpeciesSet;
use crate::tree::DeathCause;
use crate::tree::GrowthEnvironment;
use crate::tree::Tree;
use crate::water::WaterCycle;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// per-year context passed into the phases; replaces any global state
#[derive(Debug, Clone, Copy)]
pub struct YearContext {
    pub year: i32,
    pub co2_ppm: f64,
}

pub struct Model {
    settings: Settings,
    species: SpeciesSet,
    climate: Climate,
    phenology: Vec<Phenology>,
    rus: Vec<ResourceUnit>,
    ru_grid: Grid<Option<usize>>,
    lif: Grid<f32>,
    height: Grid<HeightCell>,
    dispatcher: Dispatcher,
    year: i32,
    begun: i32,
    next_tree_id: u32,
    rng: SmallRng,
}

impl Model {
    /// assemble the landscape: grids over the world rectangle, one resource
    /// unit per 100 m tile, the checkerboard partition
    pub fn build(
        settings: Settings,
        species: SpeciesSet,
        climate: Climate,
        phenology: Vec<Phenology>,
    ) -> Result<Self> {
        if species.is_empty() {
            return Err(SylvaError::config("no species configured"));
        }
        let world = settings.world_rect;
        let mut lif: Grid<f32> = Grid::with_rect(world, settings.lif_cell_size);
        lif.fill(1.);
        let height: Grid<HeightCell> = Grid::with_rect(world, settings.height_cell_size);
        let mut ru_grid: Grid<Option<usize>> = Grid::with_rect(world, settings.ru_cell_size);
        let mut rus = Vec::with_capacity(ru_grid.count());
        for iy in 0..ru_grid.size_y() {
            for ix in 0..ru_grid.size_x() {
                let id = rus.len();
                let x1 = world.x1 + ix as f64 * settings.ru_cell_size;
                let y1 = world.y1 + iy as f64 * settings.ru_cell_size;
                let rect = Rect::new(
                    x1,
                    y1,
                    x1 + settings.ru_cell_size,
                    y1 + settings.ru_cell_size,
                );
                let water = WaterCycle::setup(&settings.water)?;
                rus.push(ResourceUnit::new(
                    id,
                    (ix, iy),
                    rect,
                    0,
                    water,
                    species.len(),
                    settings.available_nitrogen,
                ));
                *ru_grid.get_mut(ix, iy)? = Some(id);
            }
        }
        let mut dispatcher = Dispatcher::new(settings.multithreaded);
        dispatcher.setup(&rus);
        let phenology = if phenology.is_empty() {
            vec![Phenology::evergreen()]
        } else {
            phenology
        };
        let rng = SmallRng::seed_from_u64(settings.seed);
        log::info!(
            "model: {} resource units, {} species, {} light cells",
            rus.len(),
            species.len(),
            lif.count()
        );
        Ok(Self {
            settings,
            species,
            climate,
            phenology,
            rus,
            ru_grid,
            lif,
            height,
            dispatcher,
            year: 0,
            begun: -1,
            next_tree_id: 1,
            rng,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
    pub fn species(&self) -> &SpeciesSet {
        &self.species
    }
    pub fn species_mut(&mut self) -> &mut SpeciesSet {
        &mut self.species
    }
    pub fn climate(&self) -> &Climate {
        &self.climate
    }
    pub fn phenology(&self) -> &[Phenology] {
        &self.phenology
    }
    pub fn resource_units(&self) -> &[ResourceUnit] {
        &self.rus
    }
    pub fn resource_units_mut(&mut self) -> &mut [ResourceUnit] {
        &mut self.rus
    }
    pub fn light_grid(&self) -> &Grid<f32> {
        &self.lif
    }
    pub fn height_grid(&self) -> &Grid<HeightCell> {
        &self.height
    }
    pub fn height_grid_mut(&mut self) -> &mut Grid<HeightCell> {
        &mut self.height
    }
    pub fn year(&self) -> i32 {
        self.year
    }
    pub fn context(&self) -> YearContext {
        YearContext {
            year: self.year,
            co2_ppm: self.settings.climate.co2_ppm,
        }
    }
    /// cancellation flag polled at RU boundaries
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.dispatcher.cancel_flag()
    }
    pub fn set_multithreaded(&mut self, multithreaded: bool) {
        self.dispatcher.set_multithreaded(multithreaded);
    }

    /// add a tree; ownership goes to the resource unit containing the
    /// position (lower-left inclusion)
    pub fn add_tree(
        &mut self,
        x: f64,
        y: f64,
        species_id: &str,
        dbh: f32,
        height: f32,
    ) -> Result<u32> {
        let species = self
            .species
            .by_id(species_id)
            .ok_or_else(|| SylvaError::config(format!("unknown species {}", species_id)))?;
        let ru_index = self
            .ru_grid
            .index_at(x, y)
            .and_then(|(ix, iy)| *self.ru_grid.get(ix, iy).ok()?)
            .ok_or_else(|| {
                SylvaError::consistency(format!("tree position ({}, {}) outside any RU", x, y))
            })?;
        let id = self.next_tree_id;
        self.next_tree_id += 1;
        let mut tree = Tree::new(id, (x, y), species.index(), ru_index, dbh, height);
        tree.set_age(species.estimate_age(height));
        tree.setup_biomass(species)?;
        self.rus[ru_index].add_tree(tree)?;
        Ok(id)
    }

    /// refresh the statistics once after all trees are added, so the first
    /// simulated year starts from valid canopy values
    pub fn setup_complete(&mut self) -> Result<()> {
        let context = self.context();
        self.refresh_statistics(&context)
    }

    /// mark a tree dead with a cause; the narrow interface for disturbance
    /// collaborators (they never touch the shared grids)
    pub fn kill_tree(&mut self, ru: usize, tree_id: u32, cause: DeathCause) -> Result<()> {
        let unit = self
            .rus
            .get_mut(ru)
            .ok_or_else(|| SylvaError::consistency(format!("no resource unit {}", ru)))?;
        match unit.trees.iter_mut().find(|t| t.id() == tree_id) {
            Some(tree) => {
                tree.kill(cause);
                Ok(())
            }
            None => Err(SylvaError::consistency(format!(
                "no tree {} on resource unit {}",
                tree_id, ru
            ))),
        }
    }

    /// run one simulated year through the full phase sequence; the year's
    /// context is built once after the yearly reset and handed to every
    /// phase
    pub fn run_year(&mut self) -> Result<()> {
        self.year_begin()?;
        let context = self.context();
        log::debug!("year {}: begin", context.year);
        self.run_water(&context)?;
        self.apply_light_pattern(&context)?;
        self.read_light_influence(&context)?;
        // external modules (management, disturbance) run here
        self.grow(&context)?;
        self.refresh_statistics(&context)?;
        self.clean_tree_lists()?;
        log::debug!("year {}: done", context.year);
        self.year += 1;
        Ok(())
    }

    /// Phase 1: advance the climate cursor (from the second year on), draw
    /// the species seed years, recompute the phenology, and reset the light
    /// and height grids. Calling this twice for the same year is a no-op.
    pub fn year_begin(&mut self) -> Result<()> {
        if self.begun == self.year {
            return Ok(());
        }
        if self.year > 0 {
            self.climate.next_year(&mut self.rng);
        }
        self.species.new_year(&mut self.rng);
        for phenology in &mut self.phenology {
            phenology.calculate(&self.climate)?;
        }
        self.lif.fill(1.);
        for cell in self.height.iter_mut() {
            cell.height = 0.;
        }
        self.begun = self.year;
        Ok(())
    }

    /// phase 2: the daily water cycle, parallel per RU
    fn run_water(&mut self, context: &YearContext) -> Result<()> {
        let species = &self.species;
        let days = self.climate.days();
        let sun = self.climate.sun();
        let year = context.year;
        self.dispatcher
            .each_ru(&mut self.rus, |ru| ru.run_water(species, days, sun, year))
    }

    /// phases 3-6: light pass A over the checkerboard sets S1 and S2 with a
    /// barrier in between; within an RU trees apply in insertion order
    fn apply_light_pattern(&mut self, context: &YearContext) -> Result<()> {
        log::debug!("year {}: light pass A", context.year);
        let species = &self.species;
        let buffer = LightBuffer::new(&mut self.lif, &mut self.height);
        self.dispatcher.each_ru_checkerboard(&self.rus, |ru| {
            light::apply_resource_unit(ru, species, &buffer);
            Ok(())
        })
    }

    /// phase 7: light pass B, read-only on the LIF, writes tree-local state
    fn read_light_influence(&mut self, context: &YearContext) -> Result<()> {
        log::debug!("year {}: light pass B", context.year);
        let species = &self.species;
        let lif = &self.lif;
        let height = &self.height;
        self.dispatcher.each_ru(&mut self.rus, |ru| {
            light::read_resource_unit(ru, species, lif, height);
            Ok(())
        })
    }

    /// phase 9: growth, mortality and seed production, parallel per RU with
    /// a deterministic per-RU random stream
    fn grow(&mut self, context: &YearContext) -> Result<()> {
        let species = &self.species;
        let phenology = &self.phenology;
        let lif = &self.lif;
        let days = self.climate.days();
        let seed = self.settings.seed;
        let year = context.year;
        let co2_ppm = context.co2_ppm;
        self.dispatcher.each_ru(&mut self.rus, |ru| {
            let mut rng = SmallRng::seed_from_u64(
                seed.wrapping_add((year as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
                    .wrapping_add(ru.id() as u64),
            );
            // per-species growth environment of this RU and year
            let environments: Vec<GrowthEnvironment> = species
                .all()
                .iter()
                .map(|sp| {
                    let mut water = 0.;
                    let mut temperature = 0.;
                    for (doy, day) in days.iter().enumerate() {
                        water += sp.soil_atmosphere_response(ru.water.psi_kpa(doy), day.vpd);
                        temperature += sp.temperature_response(day.temp_delayed);
                    }
                    let group = sp.phenology_class().min(phenology.len() - 1);
                    GrowthEnvironment {
                        water_response: water / days.len() as f64,
                        nitrogen_response: sp.nitrogen_response(ru.available_nitrogen()),
                        temperature_response: temperature / days.len() as f64,
                        vegetation_fraction: phenology[group].vegetation_period() as f64
                            / days.len() as f64,
                        co2_ppm,
                    }
                })
                .collect();
            for tree in ru.trees.iter_mut() {
                if tree.is_dead() {
                    continue;
                }
                let sp = species.get(tree.species());
                tree.grow(sp, &environments[tree.species()], &mut rng)?;
                if tree.is_alive() {
                    if let Some(index) = light::position_index(lif, tree) {
                        species.attempt_seed_production(
                            tree.species(),
                            tree.age(),
                            tree.height(),
                            index,
                        );
                    }
                }
            }
            Ok(())
        })
    }

    /// phase 10: per-RU statistics (stocked area from the height grid, then
    /// the species aggregates), refreshed exactly once per year
    fn refresh_statistics(&mut self, context: &YearContext) -> Result<()> {
        log::debug!("year {}: statistics", context.year);
        let species = &self.species;
        let height = &self.height;
        let cell_area = self.settings.height_cell_size * self.settings.height_cell_size;
        self.dispatcher.each_ru(&mut self.rus, |ru| {
            let mut stocked = 0.;
            for (_, _, cell) in height.runner(ru.rect()) {
                if cell.valid && cell.height > 4. {
                    stocked += cell_area;
                }
            }
            ru.set_stocked_area(stocked);
            ru.refresh_statistics(species);
            Ok(())
        })
    }

    /// drop the trees that died during the year from the per-RU vectors;
    /// collaborators saw their death causes during the growth phase
    fn clean_tree_lists(&mut self) -> Result<()> {
        self.dispatcher.each_ru(&mut self.rus, |ru| {
            ru.clean_tree_list();
            Ok(())
        })
    }
}
