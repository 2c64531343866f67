//! Conversion of parameter values into the number of people moved each step.

use super::{build, comp, sir_framework, sir_parameters};
use crate::errors::CascadeError;
use crate::framework::{CompartmentSpec, Framework, ParameterSpec, TransitionSpec};
use crate::parameter_set::ParameterSet;
use crate::settings::SimSettings;
use crate::variable::Units;
use approx::assert_relative_eq;
use is_close::is_close;

fn quarterly(end: f64) -> SimSettings {
    SimSettings::new(2000.0, end, 0.25)
}

fn births_framework() -> Framework {
    Framework {
        compartments: vec![
            CompartmentSpec::source("births"),
            CompartmentSpec::new("sus"),
            CompartmentSpec::sink("dead"),
        ],
        parameters: vec![
            ParameterSpec::new("b_rate", Units::Number),
            ParameterSpec::new("death", Units::Probability),
        ],
        transitions: vec![
            TransitionSpec::new("b_rate", "births", "sus"),
            TransitionSpec::new("death", "sus", "dead"),
        ],
        ..Default::default()
    }
}

fn births_parameters(death: f64) -> ParameterSet {
    let mut parset = ParameterSet::new(&["adults"]);
    parset
        .set_constant("adults", "sus", 0.0)
        .set_constant("adults", "b_rate", 100.0)
        .set_constant("adults", "death", death);
    parset
}

#[test]
fn number_from_source() {
    let mut model = build(births_framework(), births_parameters(0.0), quarterly(2001.0));
    model.step().unwrap();
    assert!(is_close!(comp(&model, "adults", "sus", 1), 25.0));
    // Sources are never depleted
    assert_eq!(comp(&model, "adults", "births", 1), 0.0);

    model.run().unwrap();
    assert!(is_close!(comp(&model, "adults", "sus", 4), 100.0));
}

#[test]
fn probability_per_step() {
    let mut parset = sir_parameters(&["adults"]);
    parset.set_constant("adults", "foi", 0.5);
    let mut model = build(sir_framework(), parset, quarterly(2001.0));
    model.step().unwrap();

    let expected = 900.0 * (1.0 - 0.5_f64.powf(0.25));
    let flow = model.population("adults").unwrap().get_variable("foi:flow").unwrap()[0].vals()[0];
    assert_relative_eq!(flow, expected, max_relative = 1e-12);
    assert_relative_eq!(
        comp(&model, "adults", "sus", 1),
        900.0 - expected,
        max_relative = 1e-12
    );
}

#[test]
fn certain_transition_moves_everyone() {
    for foi in [1.0, 1.5] {
        let mut parset = sir_parameters(&["adults"]);
        parset.set_constant("adults", "foi", foi);
        let mut model = build(sir_framework(), parset, quarterly(2001.0));
        model.step().unwrap();
        assert_eq!(comp(&model, "adults", "sus", 1), 0.0);
    }
}

#[test]
fn outflows_are_rescaled() {
    let framework = Framework {
        compartments: vec![
            CompartmentSpec::new("sus"),
            CompartmentSpec::new("a"),
            CompartmentSpec::new("b"),
        ],
        parameters: vec![
            ParameterSpec::new("to_a", Units::Probability),
            ParameterSpec::new("to_b", Units::Probability),
        ],
        transitions: vec![
            TransitionSpec::new("to_a", "sus", "a"),
            TransitionSpec::new("to_b", "sus", "b"),
        ],
        ..Default::default()
    };
    let mut parset = ParameterSet::new(&["adults"]);
    parset
        .set_constant("adults", "sus", 100.0)
        .set_constant("adults", "a", 0.0)
        .set_constant("adults", "b", 0.0)
        .set_constant("adults", "to_a", 0.8)
        .set_constant("adults", "to_b", 0.6);

    let mut model = build(framework, parset, SimSettings::new(2000.0, 2001.0, 1.0));
    model.initialise().unwrap();
    let pop = model.population("adults").unwrap();
    let to_a = pop.get_variable("to_a:flow").unwrap()[0].vals()[0];
    let to_b = pop.get_variable("to_b:flow").unwrap()[0].vals()[0];
    assert_relative_eq!(to_a, 80.0 / 1.4, max_relative = 1e-12);
    assert_relative_eq!(to_b, 60.0 / 1.4, max_relative = 1e-12);
    assert_relative_eq!(to_a + to_b, 100.0, max_relative = 1e-12);

    model.step().unwrap();
    assert!(comp(&model, "adults", "sus", 1).abs() < 1e-12);
}

#[test]
fn number_split_by_source_size() {
    let framework = Framework {
        compartments: vec![
            CompartmentSpec::new("sus"),
            CompartmentSpec::new("inf"),
            CompartmentSpec::sink("dead"),
        ],
        parameters: vec![ParameterSpec::new("deaths", Units::Number)],
        transitions: vec![
            TransitionSpec::new("deaths", "sus", "dead"),
            TransitionSpec::new("deaths", "inf", "dead"),
        ],
        ..Default::default()
    };
    let mut parset = ParameterSet::new(&["adults"]);
    parset
        .set_constant("adults", "sus", 200.0)
        .set_constant("adults", "inf", 100.0)
        .set_constant("adults", "deaths", 30.0);

    let mut model = build(framework, parset, SimSettings::new(2000.0, 2002.0, 1.0));
    model.run().unwrap();
    let result = model.into_result().unwrap();
    let flows = result.get_variable("adults", "deaths:flow").unwrap();
    assert!(is_close!(flows[0].vals()[0], 20.0));
    assert!(is_close!(flows[1].vals()[0], 10.0));
    assert!(is_close!(result.get_vals("adults", "dead").unwrap()[2], 60.0));
}

#[test]
fn number_split_equally_from_empty_sources() {
    let framework = Framework {
        compartments: vec![
            CompartmentSpec::source("imports_a"),
            CompartmentSpec::source("imports_b"),
            CompartmentSpec::new("sus"),
        ],
        parameters: vec![ParameterSpec::new("imports", Units::Number)],
        transitions: vec![
            TransitionSpec::new("imports", "imports_a", "sus"),
            TransitionSpec::new("imports", "imports_b", "sus"),
        ],
        ..Default::default()
    };
    let mut parset = ParameterSet::new(&["adults"]);
    parset
        .set_constant("adults", "sus", 0.0)
        .set_constant("adults", "imports", 100.0);

    let mut model = build(framework, parset, SimSettings::new(2000.0, 2001.0, 1.0));
    model.step().unwrap();
    let pop = model.population("adults").unwrap();
    for link in &pop.links {
        assert!(is_close!(link.vals[0], 50.0));
    }
    assert!(is_close!(comp(&model, "adults", "sus", 1), 100.0));
}

#[test]
fn sinks_accumulate() {
    let mut model = build(births_framework(), births_parameters(0.1), quarterly(2002.0));
    model.run().unwrap();
    let result = model.into_result().unwrap();

    let sus = result.get_vals("adults", "sus").unwrap();
    let dead = result.get_vals("adults", "dead").unwrap();
    let births = result.get_vals("adults", "b_rate:flow").unwrap();
    // Everyone who was born is either alive or dead
    for ti in 1..sus.len() {
        let born: f64 = births.iter().take(ti).sum();
        assert_relative_eq!(sus[ti] + dead[ti], born, max_relative = 1e-12);
    }
}

#[test]
fn unknown_units() {
    let mut framework = sir_framework();
    framework.parameters[0].units = Units::Dimensionless;
    let mut model = build(framework, sir_parameters(&["adults"]), quarterly(2001.0));
    assert!(matches!(
        model.initialise(),
        Err(CascadeError::UnknownUnits { parameter, .. }) if parameter == "foi"
    ));
}
