use super::{build, par, sir_framework, sir_parameters};
use crate::errors::CascadeError;
use crate::model::{Model, ModelBuilder};
use crate::programs::{ProgramInstructions, ProgramOutcomes, ProgramSet};
use crate::settings::SimSettings;
use crate::timeseries::{FloatValue, Time, Timeseries};
use is_close::is_close;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Treatment reduces the force of infection in proportion to its coverage.
#[derive(Debug, Serialize, Deserialize)]
struct TreatmentPrograms {
    population: String,
    baseline: FloatValue,
}

#[typetag::serde]
impl ProgramSet for TreatmentPrograms {
    fn target_parameters(&self) -> Vec<String> {
        vec!["foi".to_string()]
    }

    fn get_outcomes(&self, coverage: &HashMap<String, FloatValue>, _year: Time) -> ProgramOutcomes {
        let treatment = coverage.get("treatment").copied().unwrap_or(0.0);
        let value = self.baseline * (1.0 - treatment);
        HashMap::from([(
            "foi".to_string(),
            HashMap::from([(self.population.clone(), value)]),
        )])
    }
}

fn settings() -> SimSettings {
    SimSettings::new(2000.0, 2004.0, 1.0)
}

fn build_with_programs(instructions: ProgramInstructions) -> Model {
    ModelBuilder::new()
        .with_framework(sir_framework())
        .with_parameter_set(sir_parameters(&["adults", "children"]))
        .with_settings(settings())
        .with_programs(
            Arc::new(TreatmentPrograms {
                population: "adults".to_string(),
                baseline: 0.2,
            }),
            instructions,
        )
        .build()
        .unwrap()
}

#[test]
fn outcomes_overwrite_parameters() {
    let instructions = ProgramInstructions::new(2002.0, Some(2003.0)).with_coverage(
        "treatment",
        Timeseries::new(vec![2002.0, 2003.0], vec![0.5, 1.0]),
    );
    let mut model = build_with_programs(instructions);
    model.run().unwrap();

    let foi: Vec<f64> = (0..5).map(|ti| par(&model, "adults", "foi", ti)).collect();
    assert_eq!(foi[0], 0.1);
    assert_eq!(foi[1], 0.1);
    assert!(is_close!(foi[2], 0.1));
    assert_eq!(foi[3], 0.0);
    // Back to the data once the programs stop
    assert_eq!(foi[4], 0.1);

    // Populations without outcomes are untouched
    for ti in 0..5 {
        assert_eq!(par(&model, "children", "foi", ti), 0.1);
    }
}

#[test]
fn no_programs_is_unchanged() {
    let mut with_programs = build_with_programs(ProgramInstructions::new(2010.0, None));
    let mut without = build(sir_framework(), sir_parameters(&["adults", "children"]), settings());
    with_programs.run().unwrap();
    without.run().unwrap();

    let expected = without.into_result().unwrap();
    let result = with_programs.into_result().unwrap();
    assert_eq!(
        result.get_vals("adults", "inf").unwrap(),
        expected.get_vals("adults", "inf").unwrap()
    );
}

#[test]
fn unknown_target() {
    let mut framework = sir_framework();
    framework.parameters.retain(|p| p.name != "foi");
    framework.transitions.retain(|t| t.parameter != "foi");

    let res = ModelBuilder::new()
        .with_framework(framework)
        .with_parameter_set(sir_parameters(&["adults"]))
        .with_programs(
            Arc::new(TreatmentPrograms {
                population: "adults".to_string(),
                baseline: 0.2,
            }),
            ProgramInstructions::new(2000.0, None),
        )
        .build();
    assert!(matches!(res, Err(CascadeError::InvalidFramework(_))));
}

#[test]
fn serialise_programs() {
    let model = build_with_programs(ProgramInstructions::new(2002.0, None));
    let serialised = serde_json::to_string(&model).unwrap();
    assert!(serialised.contains(r#""type":"TreatmentPrograms""#));

    let mut restored: Model = serde_json::from_str(&serialised).unwrap();
    restored.run().unwrap();
    assert!(is_close!(par(&restored, "adults", "foi", 3), 0.2));
}
