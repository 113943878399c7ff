//! Species parameter bundles and the species set.
//!
//! A [`Species`] is immutable after setup: allometric coefficients, response
//! coefficients, mortality probabilities, regeneration parameters, and the
//! stamp library of the species. Yearly state (seed years, dispersal sinks)
//! lives on the [`SpeciesSet`].

use crate::SEED_PRODUCTION_MIN_HEIGHT;
use crate::error::Result;
use crate::error::SylvaError;
use crate::expr::Expression;
use crate::limit;
use crate::stamp::StampContainer;
use rand::Rng;
use rand::rngs::SmallRng;
use serde::Deserialize;
use std::sync::Mutex;

/// raw species parameters as supplied by the host; zero-valued mandatory
/// parameters are rejected during setup
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SpeciesDef {
    pub id: String,
    pub name: String,
    pub is_coniferous: bool,
    pub is_evergreen: bool,
    pub lip_file: String,
    // allometries (biomass = a * dbh^b)
    pub bm_foliage_a: f64,
    pub bm_foliage_b: f64,
    pub bm_woody_a: f64,
    pub bm_woody_b: f64,
    pub bm_root_a: f64,
    pub bm_root_b: f64,
    pub bm_branch_a: f64,
    pub bm_branch_b: f64,
    pub specific_leaf_area: f64,
    pub fineroot_foliage_ratio: f64,
    pub turnover_leaf: f64,
    pub turnover_root: f64,
    // hd-relations (expressions over dbh)
    pub hd_low: String,
    pub hd_high: String,
    // form and density
    pub wood_density: f64,
    pub form_factor: f64,
    // snags
    pub snag_ksw: f64,
    pub snag_halflife: f64,
    pub snag_kyl: f64,
    pub snag_kyr: f64,
    // aging and mortality
    pub maximum_age: f64,
    pub maximum_height: f64,
    pub aging: String,
    pub prob_intrinsic: f64,
    pub prob_stress: f64,
    // environmental responses
    pub resp_vpd_exponent: f64,
    pub resp_temp_min: f64,
    pub resp_temp_max: f64,
    pub resp_nitrogen_class: f64,
    // phenology and water
    pub phenology_class: usize,
    pub max_canopy_conductance: f64,
    pub psi_min: f64,
    // light
    pub light_response_class: f64,
    // regeneration
    pub seed_year_interval: u32,
    pub maturity_years: u32,
    pub seed_kernel_as1: f64,
    pub seed_kernel_as2: f64,
    pub seed_kernel_ks0: f64,
    pub fecundity_m2: f64,
    pub non_seed_year_fraction: f64,
    // sapling growth
    pub sap_height_growth_potential: String,
    pub sap_hd_sapling: f64,
    pub sap_stress_threshold: f64,
    pub sap_max_stress_years: u32,
    pub sap_reference_ratio: f64,
    pub sap_reinekes_r: f64,
}

/// sapling growth parameters, carried verbatim from the definition
#[derive(Debug, Clone)]
pub struct SaplingParams {
    pub height_growth_potential: Expression,
    pub hd_sapling: f64,
    pub stress_threshold: f64,
    pub max_stress_years: u32,
    pub reference_ratio: f64,
    pub reinekes_r: f64,
}

/// immutable per-species parameter bundle plus the species' stamp library
#[derive(Debug)]
pub struct Species {
    index: usize,
    id: String,
    name: String,
    coniferous: bool,
    evergreen: bool,
    foliage_a: f64,
    foliage_b: f64,
    woody_a: f64,
    woody_b: f64,
    root_a: f64,
    root_b: f64,
    branch_a: f64,
    branch_b: f64,
    specific_leaf_area: f64,
    fineroot_foliage_ratio: f64,
    turnover_leaf: f64,
    turnover_root: f64,
    hd_low: Expression,
    hd_high: Expression,
    wood_density: f64,
    form_factor: f64,
    volume_factor: f64,
    snag_ksw: f64,
    snag_halflife: f64,
    snag_kyl: f64,
    snag_kyr: f64,
    maximum_age: f64,
    maximum_height: f64,
    aging: Expression,
    death_prob_intrinsic: f64,
    death_prob_stress: f64,
    resp_vpd_exponent: f64,
    resp_temp_min: f64,
    resp_temp_max: f64,
    resp_nitrogen_class: f64,
    phenology_class: usize,
    max_canopy_conductance: f64,
    psi_min: f64,
    light_response_class: f64,
    seed_year_probability: f64,
    maturity_years: u32,
    fecundity_m2: f64,
    non_seed_year_fraction: f64,
    seed_kernel: (f64, f64, f64),
    sapling: SaplingParams,
    stamps: StampContainer,
}

impl Species {
    /// build a species from its definition and an already-loaded writer
    /// stamp library
    pub fn from_def(def: &SpeciesDef, index: usize, stamps: StampContainer) -> Result<Self> {
        let fail = |what: &str| {
            SylvaError::config(format!("species {}: {}", def.id, what))
        };
        if def.bm_foliage_a * def.bm_foliage_b * def.bm_root_a * def.bm_root_b
            * def.bm_woody_a * def.bm_woody_b * def.bm_branch_a * def.bm_branch_b
            * def.wood_density * def.form_factor
            * def.specific_leaf_area * def.fineroot_foliage_ratio
            == 0.
        {
            return Err(fail("mandatory allometric parameter missing or zero"));
        }
        if def.maximum_age * def.maximum_height == 0. {
            return Err(fail("invalid aging parameters"));
        }
        if def.prob_intrinsic * def.maximum_age * def.prob_stress == 0. {
            return Err(fail("invalid mortality parameters"));
        }
        if def.resp_vpd_exponent >= 0. {
            return Err(fail("vpd exponent must be negative"));
        }
        if def.resp_temp_max == 0. || def.resp_temp_min >= def.resp_temp_max {
            return Err(fail("temperature response parameters invalid"));
        }
        if def.resp_nitrogen_class < 1. || def.resp_nitrogen_class > 3. {
            return Err(fail("nitrogen class must be in 1..3"));
        }
        if def.light_response_class < 1. || def.light_response_class > 5. {
            return Err(fail("light response class must be in 1..5"));
        }
        if def.seed_year_interval == 0 {
            return Err(fail("seed year interval must be positive"));
        }
        let mut hd_low = Expression::parse(&def.hd_low)?;
        let mut hd_high = Expression::parse(&def.hd_high)?;
        // dbh range covered by the table; larger trees evaluate directly
        hd_low.linearize(0., 100.)?;
        hd_high.linearize(0., 100.)?;
        let mut aging = Expression::parse(&def.aging)?;
        aging.linearize(0., 1.)?;
        let sapling = SaplingParams {
            height_growth_potential: Expression::parse(&def.sap_height_growth_potential)?,
            hd_sapling: def.sap_hd_sapling,
            stress_threshold: def.sap_stress_threshold,
            max_stress_years: def.sap_max_stress_years,
            reference_ratio: def.sap_reference_ratio,
            reinekes_r: def.sap_reinekes_r,
        };
        Ok(Self {
            index,
            id: def.id.clone(),
            name: def.name.clone(),
            coniferous: def.is_coniferous,
            evergreen: def.is_evergreen,
            foliage_a: def.bm_foliage_a,
            foliage_b: def.bm_foliage_b,
            woody_a: def.bm_woody_a,
            woody_b: def.bm_woody_b,
            root_a: def.bm_root_a,
            root_b: def.bm_root_b,
            branch_a: def.bm_branch_a,
            branch_b: def.bm_branch_b,
            specific_leaf_area: def.specific_leaf_area,
            fineroot_foliage_ratio: def.fineroot_foliage_ratio,
            turnover_leaf: def.turnover_leaf,
            turnover_root: def.turnover_root,
            hd_low,
            hd_high,
            wood_density: def.wood_density,
            form_factor: def.form_factor,
            volume_factor: def.form_factor * std::f64::consts::FRAC_PI_4,
            snag_ksw: def.snag_ksw,
            snag_halflife: def.snag_halflife,
            snag_kyl: def.snag_kyl,
            snag_kyr: def.snag_kyr,
            maximum_age: def.maximum_age,
            maximum_height: def.maximum_height,
            aging,
            death_prob_intrinsic: 1. - def.prob_intrinsic.powf(1. / def.maximum_age),
            death_prob_stress: def.prob_stress,
            resp_vpd_exponent: def.resp_vpd_exponent,
            resp_temp_min: def.resp_temp_min,
            resp_temp_max: def.resp_temp_max,
            resp_nitrogen_class: def.resp_nitrogen_class,
            phenology_class: def.phenology_class,
            max_canopy_conductance: def.max_canopy_conductance,
            psi_min: -def.psi_min.abs(),
            light_response_class: def.light_response_class,
            seed_year_probability: 1. / def.seed_year_interval as f64,
            maturity_years: def.maturity_years,
            fecundity_m2: def.fecundity_m2,
            non_seed_year_fraction: def.non_seed_year_fraction,
            seed_kernel: (def.seed_kernel_as1, def.seed_kernel_as2, def.seed_kernel_ks0),
            sapling,
            stamps,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }
    pub fn id(&self) -> &str {
        &self.id
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn is_coniferous(&self) -> bool {
        self.coniferous
    }
    pub fn is_evergreen(&self) -> bool {
        self.evergreen
    }
    pub fn stamps(&self) -> &StampContainer {
        &self.stamps
    }
    pub(crate) fn stamps_mut(&mut self) -> &mut StampContainer {
        &mut self.stamps
    }
    pub fn specific_leaf_area(&self) -> f64 {
        self.specific_leaf_area
    }
    pub fn fineroot_foliage_ratio(&self) -> f64 {
        self.fineroot_foliage_ratio
    }
    pub fn turnover_leaf(&self) -> f64 {
        self.turnover_leaf
    }
    pub fn turnover_root(&self) -> f64 {
        self.turnover_root
    }
    pub fn wood_density(&self) -> f64 {
        self.wood_density
    }
    pub fn form_factor(&self) -> f64 {
        self.form_factor
    }
    /// volume = volume_factor * dbh^2 * height (dbh in m)
    pub fn volume_factor(&self) -> f64 {
        self.volume_factor
    }
    pub fn snag_decay(&self) -> (f64, f64, f64, f64) {
        (self.snag_ksw, self.snag_halflife, self.snag_kyl, self.snag_kyr)
    }
    pub fn maximum_age(&self) -> f64 {
        self.maximum_age
    }
    pub fn maximum_height(&self) -> f64 {
        self.maximum_height
    }
    pub fn death_prob_intrinsic(&self) -> f64 {
        self.death_prob_intrinsic
    }
    pub fn death_prob_stress(&self) -> f64 {
        self.death_prob_stress
    }
    pub fn phenology_class(&self) -> usize {
        self.phenology_class
    }
    pub fn max_canopy_conductance(&self) -> f64 {
        self.max_canopy_conductance
    }
    pub fn light_response_class(&self) -> f64 {
        self.light_response_class
    }
    pub fn maturity_years(&self) -> u32 {
        self.maturity_years
    }
    pub fn seed_year_probability(&self) -> f64 {
        self.seed_year_probability
    }
    pub fn fecundity_m2(&self) -> f64 {
        self.fecundity_m2
    }
    pub fn non_seed_year_fraction(&self) -> f64 {
        self.non_seed_year_fraction
    }
    pub fn seed_kernel(&self) -> (f64, f64, f64) {
        self.seed_kernel
    }
    pub fn sapling(&self) -> &SaplingParams {
        &self.sapling
    }

    // allometries

    pub fn biomass_foliage(&self, dbh: f64) -> f64 {
        self.foliage_a * dbh.powf(self.foliage_b)
    }
    pub fn biomass_woody(&self, dbh: f64) -> f64 {
        self.woody_a * dbh.powf(self.woody_b)
    }
    pub fn biomass_root(&self, dbh: f64) -> f64 {
        self.root_a * dbh.powf(self.root_b)
    }
    pub fn biomass_branch(&self, dbh: f64) -> f64 {
        self.branch_a * dbh.powf(self.branch_b)
    }

    /// stem fraction of the woody increment at the given dbh, from the
    /// first derivatives of the woody and branch allometries
    pub fn allometric_fraction_stem(&self, dbh: f64) -> f64 {
        1. - (self.branch_a * self.branch_b * dbh.powf(self.branch_b - 1.))
            / (self.woody_a * self.woody_b * dbh.powf(self.woody_b - 1.))
    }

    /// admissible hd-ratio range for a dbh (cm), from the linearized curves
    pub fn hd_range(&self, dbh: f64) -> Result<(f64, f64)> {
        Ok((self.hd_low.calculate1(dbh)?, self.hd_high.calculate1(dbh)?))
    }

    /// Relative aging factor in [0, 1]: relative height and relative age are
    /// combined by a harmonic mean and fed through the aging curve.
    pub fn aging(&self, height: f32, age: u32) -> f64 {
        let rel_height = (height as f64 / self.maximum_height).min(0.999999);
        let rel_age = (age as f64 / self.maximum_age).min(0.999999);
        let x = 1. - 2. / (1. / (1. - rel_height) + 1. / (1. - rel_age));
        let factor = self.aging.calculate1(x).unwrap_or(1.);
        limit(factor, 0., 1.)
    }

    /// rough age estimate for a tree of the given height
    pub fn estimate_age(&self, height: f32) -> u32 {
        (self.maximum_age * height as f64 / self.maximum_height) as u32
    }

    // environmental responses

    /// soil water response from the water potential (kPa)
    pub fn soilwater_response(&self, psi_kpa: f64) -> f64 {
        let psi_mpa = psi_kpa / 1000.;
        limit(1. - psi_mpa / self.psi_min, 0., 1.)
    }

    /// vpd response, exponential in the vapour pressure deficit (kPa)
    pub fn vpd_response(&self, vpd_kpa: f64) -> f64 {
        (self.resp_vpd_exponent * vpd_kpa).exp()
    }

    /// minimum of soil water and vpd response, the combined limitation used
    /// by the water cycle
    pub fn soil_atmosphere_response(&self, psi_kpa: f64, vpd_kpa: f64) -> f64 {
        self.soilwater_response(psi_kpa)
            .min(self.vpd_response(vpd_kpa))
    }

    /// temperature response over the delayed temperature: linear between the
    /// species' min and max
    pub fn temperature_response(&self, temp_delayed: f64) -> f64 {
        limit(
            (temp_delayed - self.resp_temp_min) / (self.resp_temp_max - self.resp_temp_min),
            0.,
            1.,
        )
    }

    /// nitrogen response: linear ramp to a class-dependent saturation point,
    /// interpolated for fractional classes (1 tolerant .. 3 demanding)
    pub fn nitrogen_response(&self, available_nitrogen: f64) -> f64 {
        let response = |k: f64| limit((available_nitrogen - 2.) / (k - 2.), 0., 1.);
        let class = self.resp_nitrogen_class;
        let below = response(15. + 10. * (class.floor() - 1.));
        let above = response(15. + 10. * (class.ceil() - 1.));
        let frac = class - class.floor();
        below * (1. - frac) + above * frac
    }
}

/// collaborator receiving produced-seed events; implementations live outside
/// the core (one per species, species-partitioned)
pub trait DispersalSink: Send {
    /// reset the species' seed map at the beginning of a year
    fn clear(&mut self);
    /// report a mature tree at a light-grid position index
    fn set_mature_tree(&mut self, position_index: (usize, usize));
}

/// All species of a simulation plus the shared reader stamp library and the
/// per-year species state (seed years, dispersal sinks).
pub struct SpeciesSet {
    species: Vec<Species>,
    reader_stamps: StampContainer,
    seed_year: Vec<bool>,
    dispersal: Vec<Option<Mutex<Box<dyn DispersalSink>>>>,
}

impl SpeciesSet {
    pub fn new(reader_stamps: StampContainer) -> Self {
        Self {
            species: Vec::new(),
            reader_stamps,
            seed_year: Vec::new(),
            dispersal: Vec::new(),
        }
    }

    /// build a species from its definition, attach reader stamps to its
    /// writer library, and register it
    pub fn add(&mut self, def: &SpeciesDef, stamps: StampContainer) -> Result<usize> {
        let index = self.species.len();
        let mut species = Species::from_def(def, index, stamps)?;
        species.stamps_mut().attach_readers(&self.reader_stamps);
        log::debug!("species {}: {} stamps", species.id(), species.stamps().len());
        self.species.push(species);
        self.seed_year.push(false);
        self.dispersal.push(None);
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.species.len()
    }
    pub fn is_empty(&self) -> bool {
        self.species.is_empty()
    }
    pub fn get(&self, index: usize) -> &Species {
        &self.species[index]
    }
    pub fn all(&self) -> &[Species] {
        &self.species
    }
    pub fn by_id(&self, id: &str) -> Option<&Species> {
        self.species.iter().find(|s| s.id() == id)
    }
    pub fn reader_stamps(&self) -> &StampContainer {
        &self.reader_stamps
    }

    pub fn set_dispersal(&mut self, species: usize, sink: Box<dyn DispersalSink>) {
        self.dispersal[species] = Some(Mutex::new(sink));
    }

    /// yearly reset: draw seed years (a Bernoulli per species) and clear the
    /// dispersal maps
    pub fn new_year(&mut self, rng: &mut SmallRng) {
        for (index, species) in self.species.iter().enumerate() {
            self.seed_year[index] = rng.random::<f64>() < species.seed_year_probability();
            if self.seed_year[index] {
                log::debug!("species {} has a seed year", species.id());
            }
            if let Some(sink) = &self.dispersal[index] {
                sink.lock().expect("dispersal lock").clear();
            }
        }
    }

    pub fn is_seed_year(&self, species: usize) -> bool {
        self.seed_year[species]
    }

    /// Report seed production of a tree. The event reaches the dispersal
    /// sink when the species has a sink, the year is a seed year, and the
    /// tree is past its maturity age and minimum height. Sinks are
    /// species-partitioned, so concurrent reporters of one species serialize
    /// on the species' lock; seed counts are order-independent.
    pub fn attempt_seed_production(
        &self,
        species: usize,
        age: u32,
        height: f32,
        position_index: (usize, usize),
    ) {
        if !self.seed_year[species] {
            return;
        }
        let params = &self.species[species];
        if age > params.maturity_years() && height > SEED_PRODUCTION_MIN_HEIGHT {
            if let Some(sink) = &self.dispersal[species] {
                sink.lock()
                    .expect("dispersal lock")
                    .set_mature_tree(position_index);
            }
        }
    }
}

/// a species definition with workable defaults, for tests
#[cfg(test)]
pub(crate) fn test_def(id: &str) -> SpeciesDef {
    SpeciesDef {
        id: id.to_string(),
        name: id.to_string(),
        is_coniferous: true,
        is_evergreen: true,
        bm_foliage_a: 0.05,
        bm_foliage_b: 1.6,
        bm_woody_a: 0.1,
        bm_woody_b: 2.3,
        bm_root_a: 0.04,
        bm_root_b: 2.0,
        bm_branch_a: 0.02,
        bm_branch_b: 2.2,
        specific_leaf_area: 5.,
        fineroot_foliage_ratio: 0.8,
        turnover_leaf: 0.2,
        turnover_root: 0.6,
        hd_low: "40 + dbh*0.1".to_string(),
        hd_high: "120 + dbh*0.2".to_string(),
        wood_density: 400.,
        form_factor: 0.5,
        snag_ksw: 0.04,
        snag_halflife: 20.,
        snag_kyl: 0.15,
        snag_kyr: 0.03,
        maximum_age: 300.,
        maximum_height: 40.,
        aging: "1 - x^2".to_string(),
        prob_intrinsic: 0.7,
        prob_stress: 0.1,
        resp_vpd_exponent: -0.6,
        resp_temp_min: 2.,
        resp_temp_max: 9.,
        resp_nitrogen_class: 2.,
        phenology_class: 0,
        max_canopy_conductance: 0.018,
        psi_min: 1.5,
        light_response_class: 2.,
        seed_year_interval: 4,
        maturity_years: 40,
        seed_kernel_as1: 30.,
        seed_kernel_as2: 200.,
        seed_kernel_ks0: 0.2,
        fecundity_m2: 20.,
        non_seed_year_fraction: 0.25,
        sap_height_growth_potential: "1.5".to_string(),
        sap_hd_sapling: 80.,
        sap_stress_threshold: 0.1,
        sap_max_stress_years: 3,
        sap_reference_ratio: 0.5,
        sap_reinekes_r: 1450.,
        lip_file: String::new(),
    }
}
