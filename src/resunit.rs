//! A resource unit: one 100 m x 100 m tile of the landscape, the unit of
//! parallel work. Owns its trees, its water cycle, and the per-species and
//! total statistics refreshed once per simulated year.

use crate::climate::ClimateDay;
use crate::climate::Sun;
use crate::error::Result;
use crate::error::SylvaError;
use crate::grid::Rect;
use crate::species::SpeciesSet;
use crate::tree::Tree;
use crate::water::WaterCycle;

/// per-species aggregates on a resource unit
#[derive(Debug, Clone, Copy, Default)]
pub struct RuSpeciesStat {
    pub count: usize,
    pub basal_area: f64,
    pub leaf_area: f64,
    pub lai: f64,
    /// share of the total LAI (total floored at 1), used for LAI weighting
    pub lai_factor: f64,
}

/// yearly statistics of a resource unit
#[derive(Debug, Clone, Copy, Default)]
pub struct RuStatistics {
    pub tree_count: usize,
    pub basal_area: f64,
    pub volume: f64,
    pub lai: f64,
    pub mean_aging: f64,
    pub stocked_area: f64,
}

pub struct ResourceUnit {
    id: usize,
    /// grid position of the tile, the basis of the checkerboard partition
    index: (usize, usize),
    rect: Rect,
    climate: usize,
    pub trees: Vec<Tree>,
    pub water: WaterCycle,
    species_stats: Vec<RuSpeciesStat>,
    stats: RuStatistics,
    average_aging: f64,
    available_nitrogen: f64,
}

impl ResourceUnit {
    pub fn new(
        id: usize,
        index: (usize, usize),
        rect: Rect,
        climate: usize,
        water: WaterCycle,
        species_count: usize,
        available_nitrogen: f64,
    ) -> Self {
        Self {
            id,
            index,
            rect,
            climate,
            trees: Vec::new(),
            water,
            species_stats: vec![RuSpeciesStat::default(); species_count],
            stats: RuStatistics::default(),
            average_aging: 0.,
            available_nitrogen,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }
    pub fn index(&self) -> (usize, usize) {
        self.index
    }
    pub fn rect(&self) -> Rect {
        self.rect
    }
    pub fn climate(&self) -> usize {
        self.climate
    }
    pub fn available_nitrogen(&self) -> f64 {
        self.available_nitrogen
    }
    /// stockable ground area in m2
    pub fn area(&self) -> f64 {
        self.rect.area()
    }
    /// ownership test; the lower-left edge is inclusive, so a tree on a
    /// shared boundary belongs to exactly one unit
    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.rect.contains(x, y)
    }

    /// add a tree; its position must lie within the unit's rectangle
    pub fn add_tree(&mut self, tree: Tree) -> Result<()> {
        let (x, y) = tree.position();
        if !self.contains(x, y) {
            return Err(SylvaError::consistency(format!(
                "tree {} at ({}, {}) outside resource unit {}",
                tree.id(),
                x,
                y,
                self.id
            )));
        }
        self.trees.push(tree);
        Ok(())
    }

    pub fn species_stats(&self) -> &[RuSpeciesStat] {
        &self.species_stats
    }
    pub fn statistics(&self) -> &RuStatistics {
        &self.stats
    }
    /// leaf-area weighted mean aging of the unit (0 when treeless)
    pub fn average_aging(&self) -> f64 {
        self.average_aging
    }
    pub(crate) fn set_stocked_area(&mut self, area_m2: f64) {
        self.stats.stocked_area = area_m2;
    }

    /// run the water cycle of the unit for one climate year
    pub fn run_water(
        &mut self,
        species: &SpeciesSet,
        days: &[ClimateDay],
        sun: &Sun,
        year: i32,
    ) -> Result<()> {
        let average_aging = self.average_aging;
        self.water
            .run_year(species, &self.species_stats, average_aging, days, sun, year)
    }

    /// drop dead trees from the vector (insertion order of the survivors is
    /// preserved)
    pub fn clean_tree_list(&mut self) {
        self.trees.retain(|tree| tree.is_alive());
    }

    /// Refresh the per-species aggregates and unit totals from the living
    /// trees. Called exactly once per simulated year after growth.
    pub fn refresh_statistics(&mut self, species: &SpeciesSet) {
        for stat in &mut self.species_stats {
            *stat = RuSpeciesStat::default();
        }
        let mut stats = RuStatistics {
            stocked_area: self.stats.stocked_area,
            ..RuStatistics::default()
        };
        let mut aging_sum = 0.;
        let mut leaf_area_sum = 0.;
        for tree in self.trees.iter().filter(|t| t.is_alive()) {
            let sp = species.get(tree.species());
            let leaf_area = tree.leaf_area(sp);
            let stat = &mut self.species_stats[tree.species()];
            stat.count += 1;
            stat.basal_area += tree.basal_area();
            stat.leaf_area += leaf_area;
            stats.tree_count += 1;
            stats.basal_area += tree.basal_area();
            stats.volume += tree.volume(sp);
            aging_sum += sp.aging(tree.height(), tree.age()) * leaf_area;
            leaf_area_sum += leaf_area;
        }
        let area = self.area();
        let mut total_lai = 0.;
        for stat in &mut self.species_stats {
            stat.lai = stat.leaf_area / area;
            total_lai += stat.lai;
        }
        let lai_divisor = total_lai.max(1.);
        for stat in &mut self.species_stats {
            stat.lai_factor = stat.lai / lai_divisor;
        }
        stats.lai = total_lai;
        stats.mean_aging = if leaf_area_sum > 0. {
            aging_sum / leaf_area_sum
        } else {
            0.
        };
        self.average_aging = stats.mean_aging;
        self.stats = stats;
    }
}
