//! The individual tree: per-tree state, status flags, allometric biomass
//! pools, and the annual growth/mortality step. Stamp application and
//! light read-out operate on trees from the light engine.

use crate::LightValue;
use crate::error::Result;
use crate::error::SylvaError;
use crate::limit;
use crate::species::Species;
use rand::Rng;
use rand::rngs::SmallRng;

/// why a tree died; surfaced to disturbance collaborators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeathCause {
    Natural,
    Stress,
    Fire,
    Wind,
    BarkBeetle,
    Harvest,
}

const FLAG_DEAD: u16 = 1;
const FLAG_MARKED_FOR_CUT: u16 = 2;
const FLAG_MARKED_FOR_HARVEST: u16 = 4;
const FLAG_DEAD_FIRE: u16 = 8;
const FLAG_DEAD_WIND: u16 = 16;
const FLAG_DEAD_BARKBEETLE: u16 = 32;
const FLAG_DEAD_STRESS: u16 = 64;
const FLAG_HARVESTED: u16 = 128;

/// per-RU inputs to the growth step, assembled once per resource unit and
/// year from the water cycle, the site, and the phenology tables
#[derive(Debug, Clone, Copy)]
pub struct GrowthEnvironment {
    /// annual mean of the combined soil/atmosphere response of the RU
    pub water_response: f64,
    pub nitrogen_response: f64,
    pub temperature_response: f64,
    /// leaf-on share of the year for the species' phenology group
    pub vegetation_fraction: f64,
    pub co2_ppm: f64,
}

/// An individual tree, bound for life to the resource unit whose bounding
/// rectangle contains its position. Mutated only by its owning RU within a
/// tile's growth step.
#[derive(Debug, Clone)]
pub struct Tree {
    id: u32,
    position: (f64, f64),
    species: usize,
    ru: usize,
    age: u32,
    dbh: f32,
    height: f32,
    /// light resource index from the last pass B read, 1 = no competition
    lri: f32,
    stress: f32,
    stem_mass: f32,
    branch_mass: f32,
    foliage_mass: f32,
    coarse_root_mass: f32,
    fine_root_mass: f32,
    flags: u16,
}

impl Tree {
    pub fn new(
        id: u32,
        position: (f64, f64),
        species: usize,
        ru: usize,
        dbh: f32,
        height: f32,
    ) -> Self {
        Self {
            id,
            position,
            species,
            ru,
            age: 0,
            dbh,
            height,
            lri: 1.,
            stress: 0.,
            stem_mass: 0.,
            branch_mass: 0.,
            foliage_mass: 0.,
            coarse_root_mass: 0.,
            fine_root_mass: 0.,
            flags: 0,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }
    pub fn position(&self) -> (f64, f64) {
        self.position
    }
    pub fn species(&self) -> usize {
        self.species
    }
    pub fn ru(&self) -> usize {
        self.ru
    }
    pub fn age(&self) -> u32 {
        self.age
    }
    pub fn set_age(&mut self, age: u32) {
        self.age = age;
    }
    pub fn dbh(&self) -> f32 {
        self.dbh
    }
    pub fn height(&self) -> f32 {
        self.height
    }
    pub fn hd_ratio(&self) -> f32 {
        100. * self.height / self.dbh
    }
    pub fn light_resource_index(&self) -> LightValue {
        self.lri
    }
    pub(crate) fn set_light_resource_index(&mut self, lri: LightValue) {
        self.lri = lri;
    }
    pub fn stress_index(&self) -> f32 {
        self.stress
    }
    pub fn stem_mass(&self) -> f32 {
        self.stem_mass
    }
    pub fn branch_mass(&self) -> f32 {
        self.branch_mass
    }
    pub fn foliage_mass(&self) -> f32 {
        self.foliage_mass
    }
    pub fn coarse_root_mass(&self) -> f32 {
        self.coarse_root_mass
    }
    pub fn fine_root_mass(&self) -> f32 {
        self.fine_root_mass
    }

    // status flags

    pub fn is_alive(&self) -> bool {
        self.flags & FLAG_DEAD == 0
    }
    pub fn is_dead(&self) -> bool {
        !self.is_alive()
    }
    pub fn kill(&mut self, cause: DeathCause) {
        self.flags |= FLAG_DEAD;
        self.flags |= match cause {
            DeathCause::Natural => 0,
            DeathCause::Stress => FLAG_DEAD_STRESS,
            DeathCause::Fire => FLAG_DEAD_FIRE,
            DeathCause::Wind => FLAG_DEAD_WIND,
            DeathCause::BarkBeetle => FLAG_DEAD_BARKBEETLE,
            DeathCause::Harvest => FLAG_HARVESTED,
        };
    }
    pub fn death_cause(&self) -> Option<DeathCause> {
        if self.is_alive() {
            return None;
        }
        Some(if self.flags & FLAG_DEAD_FIRE != 0 {
            DeathCause::Fire
        } else if self.flags & FLAG_DEAD_WIND != 0 {
            DeathCause::Wind
        } else if self.flags & FLAG_DEAD_BARKBEETLE != 0 {
            DeathCause::BarkBeetle
        } else if self.flags & FLAG_HARVESTED != 0 {
            DeathCause::Harvest
        } else if self.flags & FLAG_DEAD_STRESS != 0 {
            DeathCause::Stress
        } else {
            DeathCause::Natural
        })
    }
    pub fn is_marked_for_cut(&self) -> bool {
        self.flags & FLAG_MARKED_FOR_CUT != 0
    }
    pub fn mark_for_cut(&mut self, mark: bool) {
        self.set_flag(FLAG_MARKED_FOR_CUT, mark);
    }
    pub fn is_marked_for_harvest(&self) -> bool {
        self.flags & FLAG_MARKED_FOR_HARVEST != 0
    }
    pub fn mark_for_harvest(&mut self, mark: bool) {
        self.set_flag(FLAG_MARKED_FOR_HARVEST, mark);
    }
    fn set_flag(&mut self, flag: u16, value: bool) {
        if value {
            self.flags |= flag;
        } else {
            self.flags &= !flag;
        }
    }

    // derived quantities

    /// basal area in m2 (dbh in cm)
    pub fn basal_area(&self) -> f64 {
        let radius_m = self.dbh as f64 / 200.;
        std::f64::consts::PI * radius_m * radius_m
    }

    /// stem volume in m3 over the species' form factor
    pub fn volume(&self, species: &Species) -> f64 {
        let d_m = self.dbh as f64 / 100.;
        species.volume_factor() * d_m * d_m * self.height as f64
    }

    /// projected leaf area in m2
    pub fn leaf_area(&self, species: &Species) -> f64 {
        self.foliage_mass as f64 * species.specific_leaf_area()
    }

    /// derive all biomass pools from the species' allometries
    pub fn setup_biomass(&mut self, species: &Species) -> Result<()> {
        let dbh = self.dbh as f64;
        let foliage = species.biomass_foliage(dbh);
        let woody = species.biomass_woody(dbh);
        let branch = species.biomass_branch(dbh);
        let root = species.biomass_root(dbh);
        if foliage < 0. || woody < 0. || branch < 0. || root < 0. {
            return Err(SylvaError::consistency(format!(
                "tree {}: negative biomass from allometry at dbh {}",
                self.id, dbh
            )));
        }
        self.foliage_mass = foliage as f32;
        self.stem_mass = woody as f32;
        self.branch_mass = branch as f32;
        self.coarse_root_mass = root as f32;
        self.fine_root_mass = (foliage * species.fineroot_foliage_ratio()) as f32;
        Ok(())
    }

    /// Annual growth and mortality. The realized growth response combines
    /// the light resource index (filtered by the species' light response
    /// class), the RU's water/nitrogen/temperature responses, the leaf-on
    /// fraction, and the aging factor. Diameter grows up to 8 mm under
    /// optimal conditions; height follows the admissible slenderness band.
    pub fn grow(
        &mut self,
        species: &Species,
        environment: &GrowthEnvironment,
        rng: &mut SmallRng,
    ) -> Result<()> {
        if self.is_dead() {
            return Ok(());
        }
        self.age += 1;
        let aging = species.aging(self.height, self.age);
        let light = (self.lri as f64).powf(species.light_response_class() / 2.);
        let response = limit(
            light
                * environment.water_response
                * environment.nitrogen_response
                * environment.temperature_response
                * environment.vegetation_fraction
                * aging,
            0.,
            1.,
        );
        let delta_dbh = 0.8 * response;
        self.dbh += delta_dbh as f32;
        let (hd_low, hd_high) = species.hd_range(self.dbh as f64)?;
        let hd = limit(self.hd_ratio() as f64, hd_low, hd_high);
        self.height = self.height.max((hd * self.dbh as f64 / 100.) as f32);
        self.setup_biomass(species)?;
        // stress accumulates when the response stays below a fifth of the
        // optimum and relaxes otherwise
        self.stress = limit(self.stress as f64 + 0.2 - response, 0., 1.) as f32;
        let p_intrinsic = species.death_prob_intrinsic();
        let p_stress = species.death_prob_stress() * self.stress as f64;
        let draw = rng.random::<f64>();
        if draw < p_intrinsic {
            self.kill(DeathCause::Natural);
        } else if draw < p_intrinsic + p_stress {
            self.kill(DeathCause::Stress);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::species::Species;
    use crate::species::test_def;
    use crate::stamp::Stamp;
    use crate::stamp::StampContainer;
    use rand::SeedableRng;

    fn species() -> Species {
        let mut stamps = StampContainer::new("test");
        stamps
            .add_writer(Stamp::new_writer(5).unwrap(), 10., 85., 2.)
            .unwrap();
        stamps.finalize();
        Species::from_def(&test_def("pa"), 0, stamps).unwrap()
    }

    fn optimal() -> GrowthEnvironment {
        GrowthEnvironment {
            water_response: 1.,
            nitrogen_response: 1.,
            temperature_response: 1.,
            vegetation_fraction: 1.,
            co2_ppm: 380.,
        }
    }

    #[test]
    fn flags_and_death_causes() {
        let mut tree = Tree::new(1, (5., 5.), 0, 0, 20., 15.);
        assert!(tree.is_alive());
        assert_eq!(tree.death_cause(), None);
        tree.mark_for_cut(true);
        assert!(tree.is_marked_for_cut());
        tree.mark_for_cut(false);
        assert!(!tree.is_marked_for_cut());
        tree.kill(DeathCause::Wind);
        assert!(tree.is_dead());
        assert_eq!(tree.death_cause(), Some(DeathCause::Wind));
    }

    #[test]
    fn biomass_pools_from_allometries() {
        let species = species();
        let mut tree = Tree::new(1, (5., 5.), 0, 0, 20., 15.);
        tree.setup_biomass(&species).unwrap();
        assert!((tree.foliage_mass() as f64 - 0.05 * 20f64.powf(1.6)).abs() < 1e-4);
        assert!((tree.fine_root_mass() as f64 - tree.foliage_mass() as f64 * 0.8).abs() < 1e-4);
        assert!(tree.stem_mass() > 0.);
        assert!(tree.leaf_area(&species) > 0.);
    }

    #[test]
    fn growth_is_monotone_and_bounded() {
        let species = species();
        let mut tree = Tree::new(1, (5., 5.), 0, 0, 20., 12.);
        tree.set_age(species.estimate_age(12.));
        let mut rng = SmallRng::seed_from_u64(7);
        for _ in 0..20 {
            let age = tree.age();
            let dbh = tree.dbh();
            let height = tree.height();
            tree.grow(&species, &optimal(), &mut rng).unwrap();
            assert_eq!(tree.age(), age + 1);
            assert!(tree.dbh() >= dbh);
            assert!(tree.height() >= height);
            if tree.is_dead() {
                break;
            }
        }
        assert!(tree.dbh() >= 20.);
    }

    #[test]
    fn shade_slows_growth() {
        let species = species();
        let mut rng = SmallRng::seed_from_u64(1);
        let mut sunny = Tree::new(1, (5., 5.), 0, 0, 20., 12.);
        let mut shaded = Tree::new(2, (6., 6.), 0, 0, 20., 12.);
        shaded.set_light_resource_index(0.3);
        sunny.grow(&species, &optimal(), &mut rng).unwrap();
        let mut rng = SmallRng::seed_from_u64(1);
        shaded.grow(&species, &optimal(), &mut rng).unwrap();
        assert!(sunny.dbh() > shaded.dbh());
    }

    #[test]
    fn sustained_shade_raises_stress() {
        let species = species();
        let mut tree = Tree::new(1, (5., 5.), 0, 0, 20., 12.);
        tree.set_light_resource_index(0.05);
        let mut rng = SmallRng::seed_from_u64(3);
        let mut stressed = false;
        for _ in 0..10 {
            tree.grow(&species, &optimal(), &mut rng).unwrap();
            if tree.stress_index() > 0.5 {
                stressed = true;
                break;
            }
            if tree.is_dead() {
                break;
            }
        }
        assert!(stressed || tree.is_dead());
    }

    #[test]
    fn basal_area_and_volume() {
        let species = species();
        let tree = Tree::new(1, (0., 0.), 0, 0, 40., 25.);
        // r = 0.2 m
        assert!((tree.basal_area() - std::f64::consts::PI * 0.04).abs() < 1e-12);
        // 0.5 * pi/4 * 0.16 * 25
        assert!((tree.volume(&species) - 0.5 * std::f64::consts::FRAC_PI_4 * 0.16 * 25.).abs() < 1e-9);
    }
}
