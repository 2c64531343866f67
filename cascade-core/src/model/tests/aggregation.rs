//! Parameters aggregated across populations.

use super::{annual, build, comp, par};
use crate::errors::CascadeError;
use crate::framework::{
    CharacteristicSpec, CompartmentSpec, Framework, InteractionSpec, ParameterSpec,
    TransitionSpec,
};
use crate::model::ModelBuilder;
use crate::parameter_set::ParameterSet;
use crate::timeseries::Timeseries;
use crate::variable::Units;
use is_close::is_close;

fn framework(formula: &str) -> Framework {
    Framework {
        compartments: vec![CompartmentSpec::new("sus"), CompartmentSpec::new("inf")],
        characteristics: vec![
            CharacteristicSpec::new("alive", &["sus", "inf"], None),
            CharacteristicSpec::new("prev", &["inf"], Some("alive")),
        ],
        parameters: vec![ParameterSpec::with_formula(
            "exposure",
            Units::Probability,
            formula,
        )],
        transitions: vec![TransitionSpec::new("exposure", "sus", "inf")],
        interactions: vec![InteractionSpec {
            name: "partners".to_string(),
        }],
    }
}

/// Men and women who only have partners of the other sex.
fn parameters() -> ParameterSet {
    let mut parset = ParameterSet::new(&["men", "women"]);
    parset
        .set_constant("men", "sus", 900.0)
        .set_constant("men", "inf", 100.0)
        .set_constant("women", "sus", 700.0)
        .set_constant("women", "inf", 300.0)
        .set_interaction("partners", "men", "women", Timeseries::constant(1.0))
        .set_interaction("partners", "women", "men", Timeseries::constant(1.0));
    parset
}

#[test]
fn prevalence_of_partners() {
    let mut model = build(
        framework("TGT_POP_AVG(prev, partners)"),
        parameters(),
        annual(2002.0),
    );
    model.step().unwrap();

    assert!(is_close!(par(&model, "men", "exposure", 0), 0.3));
    assert!(is_close!(par(&model, "women", "exposure", 0), 0.1));
    assert!(is_close!(comp(&model, "men", "inf", 1), 370.0));
    assert!(is_close!(comp(&model, "women", "inf", 1), 370.0));

    let pop = model.population("men").unwrap();
    assert!(pop.characs[pop.charac_index("prev").unwrap()].dependency);
}

#[test]
fn weighted_by_population_size() {
    let mut parset = parameters();
    parset
        .set_interaction("partners", "men", "men", Timeseries::constant(1.0))
        .set_constant("women", "sus", 1700.0);
    let mut model = build(
        framework("TGT_POP_AVG(prev, partners, alive)"),
        parset,
        annual(2002.0),
    );
    model.initialise().unwrap();

    // Men: (1000 * 0.1 + 2000 * 0.15) / 3000
    assert!(is_close!(par(&model, "men", "exposure", 0), 400.0 / 3000.0));
    assert!(is_close!(par(&model, "women", "exposure", 0), 0.1));

    let pop = model.population("women").unwrap();
    assert!(pop.characs[pop.charac_index("alive").unwrap()].dependency);
}

#[test]
fn scale_factor_applies_to_aggregates() {
    let mut parset = parameters();
    parset.set_scale_factor("men", "exposure", 0.5);
    let mut model = build(
        framework("SRC_POP_AVG(prev, partners)"),
        parset,
        annual(2002.0),
    );
    model.initialise().unwrap();
    assert!(is_close!(par(&model, "men", "exposure", 0), 0.15));
    assert!(is_close!(par(&model, "women", "exposure", 0), 0.1));
}

#[test]
fn unknown_interaction() {
    let res = ModelBuilder::new()
        .with_framework(framework("TGT_POP_AVG(prev, friends)"))
        .with_parameter_set(parameters())
        .build();
    assert!(matches!(
        res,
        Err(CascadeError::UnknownInteraction(name)) if name == "friends"
    ));
}

#[test]
fn unknown_population_in_interaction() {
    let mut parset = parameters();
    parset.set_interaction("partners", "men", "children", Timeseries::constant(1.0));
    let res = ModelBuilder::new()
        .with_framework(framework("TGT_POP_AVG(prev, partners)"))
        .with_parameter_set(parset)
        .build();
    assert!(matches!(
        res,
        Err(CascadeError::UnknownPopulation(name)) if name == "children"
    ));
}
