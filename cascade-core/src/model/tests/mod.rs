//! Scenario tests for the model module.
//!
//! These tests build complete models from small frameworks and check the integration
//! workflow: flow conversion, junctions, aggregation across populations, transfers and
//! program overwrites.

#[cfg(test)]
mod aggregation;
#[cfg(test)]
mod flows;
#[cfg(test)]
mod programs;

use crate::framework::{CharacteristicSpec, CompartmentSpec, Framework, ParameterSpec, TransitionSpec};
use crate::model::{Model, ModelBuilder};
use crate::parameter_set::ParameterSet;
use crate::settings::SimSettings;
use crate::variable::Units;

/// Susceptible, infected and recovered compartments in a closed population.
fn sir_framework() -> Framework {
    Framework {
        compartments: vec![
            CompartmentSpec::new("sus"),
            CompartmentSpec::new("inf"),
            CompartmentSpec::new("rec"),
        ],
        characteristics: vec![
            CharacteristicSpec::new("alive", &["sus", "inf", "rec"], None),
            CharacteristicSpec::new("prev", &["inf"], Some("alive")),
        ],
        parameters: vec![
            ParameterSpec::new("foi", Units::Probability),
            ParameterSpec::new("recovery", Units::Duration),
        ],
        transitions: vec![
            TransitionSpec::new("foi", "sus", "inf"),
            TransitionSpec::new("recovery", "inf", "rec"),
        ],
        interactions: vec![],
    }
}

fn sir_parameters(populations: &[&str]) -> ParameterSet {
    let mut parset = ParameterSet::new(populations);
    for pop in populations {
        parset
            .set_constant(pop, "sus", 900.0)
            .set_constant(pop, "inf", 100.0)
            .set_constant(pop, "rec", 0.0)
            .set_constant(pop, "foi", 0.1)
            .set_constant(pop, "recovery", 2.0);
    }
    parset
}

/// Annual steps from 2000 to `end`.
fn annual(end: f64) -> SimSettings {
    SimSettings::new(2000.0, end, 1.0)
}

fn build(framework: Framework, parset: ParameterSet, settings: SimSettings) -> Model {
    ModelBuilder::new()
        .with_framework(framework)
        .with_parameter_set(parset)
        .with_settings(settings)
        .build()
        .unwrap()
}

fn comp(model: &Model, population: &str, name: &str, ti: usize) -> f64 {
    let pop = model.population(population).unwrap();
    pop.comps[pop.comp_index(name).unwrap()].vals[ti]
}

fn par(model: &Model, population: &str, name: &str, ti: usize) -> f64 {
    let pop = model.population(population).unwrap();
    pop.pars[pop.par_index(name).unwrap()].vals[ti]
}
