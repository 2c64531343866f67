//! Additive program effects
//!
//! The simplest useful program model: each program moves a parameter from its baseline
//! towards the value it would have if the program reached everyone, in proportion to the
//! program's coverage.

use cascade_core::errors::{CascadeError, CascadeResult};
use cascade_core::programs::{ProgramOutcomes, ProgramSet};
use cascade_core::timeseries::{FloatValue, Time};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// The effect of programs on one parameter in one population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub parameter: String,
    pub population: String,
    /// Value of the parameter when no program reaches anyone
    pub baseline: FloatValue,
    /// Program name -> value of the parameter when that program reaches everyone
    #[serde(default)]
    pub effects: BTreeMap<String, FloatValue>,
}

/// Parameters for the additive program set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdditiveProgramSetParameters {
    #[serde(default)]
    pub outcomes: Vec<Outcome>,
}

/// Program set where the effects of programs add up
///
/// For each outcome the parameter value is
///
/// $$ v = b + \sum_p c_p (e_p - b) $$
///
/// Where:
/// - $b$ is the baseline value
/// - $c_p$ is the coverage of program $p$, clamped to $[0, 1]$
/// - $e_p$ is the value of the parameter if program $p$ reached everyone
///
/// Programs that affect the same outcome compete for the same people, so if their coverages
/// add up to more than 1 they are scaled down proportionally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdditiveProgramSet {
    parameters: AdditiveProgramSetParameters,
}

impl AdditiveProgramSet {
    pub fn from_parameters(parameters: AdditiveProgramSetParameters) -> Self {
        Self { parameters }
    }

    /// Parse a program set from a TOML document.
    ///
    /// Each outcome may only be given once per population.
    pub fn from_toml_str(input: &str) -> CascadeResult<Self> {
        let parameters: AdditiveProgramSetParameters = toml::from_str(input)?;
        let program_set = Self::from_parameters(parameters);
        program_set.validate()?;
        Ok(program_set)
    }

    pub fn parameters(&self) -> &AdditiveProgramSetParameters {
        &self.parameters
    }

    fn validate(&self) -> CascadeResult<()> {
        let mut seen = std::collections::HashSet::new();
        for outcome in &self.parameters.outcomes {
            if !seen.insert((&outcome.parameter, &outcome.population)) {
                return Err(CascadeError::Error(format!(
                    "outcome for '{}' in population '{}' is defined more than once",
                    outcome.parameter, outcome.population
                )));
            }
        }
        Ok(())
    }

    fn outcome_value(outcome: &Outcome, coverage: &HashMap<String, FloatValue>) -> FloatValue {
        let reached: Vec<(FloatValue, FloatValue)> = outcome
            .effects
            .iter()
            .map(|(program, effect)| {
                let fraction = coverage.get(program).copied().unwrap_or(0.0);
                (fraction.clamp(0.0, 1.0), *effect)
            })
            .collect();

        let total: FloatValue = reached.iter().map(|(fraction, _)| fraction).sum();
        let scale = if total > 1.0 {
            debug!(
                "Programs for '{}' in population '{}' reach {} of the population, scaling down",
                outcome.parameter, outcome.population, total
            );
            1.0 / total
        } else {
            1.0
        };

        outcome.baseline
            + reached
                .iter()
                .map(|(fraction, effect)| fraction * scale * (effect - outcome.baseline))
                .sum::<FloatValue>()
    }
}

#[typetag::serde]
impl ProgramSet for AdditiveProgramSet {
    fn target_parameters(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .parameters
            .outcomes
            .iter()
            .map(|outcome| outcome.parameter.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    fn get_outcomes(&self, coverage: &HashMap<String, FloatValue>, _year: Time) -> ProgramOutcomes {
        let mut outcomes = ProgramOutcomes::new();
        for outcome in &self.parameters.outcomes {
            outcomes
                .entry(outcome.parameter.clone())
                .or_default()
                .insert(
                    outcome.population.clone(),
                    Self::outcome_value(outcome, coverage),
                );
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use is_close::is_close;

    fn program_set() -> AdditiveProgramSet {
        AdditiveProgramSet::from_toml_str(
            r#"
            [[outcomes]]
            parameter = "test_rate"
            population = "adults"
            baseline = 0.1
            effects = { clinic = 0.5, outreach = 0.9 }

            [[outcomes]]
            parameter = "test_rate"
            population = "children"
            baseline = 0.05

            [[outcomes]]
            parameter = "treat_duration"
            population = "adults"
            baseline = 2.0
            effects = { clinic = 0.5 }
            "#,
        )
        .unwrap()
    }

    fn coverage(values: &[(&str, FloatValue)]) -> HashMap<String, FloatValue> {
        values.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn targets() {
        assert_eq!(
            program_set().target_parameters(),
            vec!["test_rate".to_string(), "treat_duration".to_string()]
        );
    }

    #[test]
    fn no_coverage_gives_baseline() {
        let outcomes = program_set().get_outcomes(&HashMap::new(), 2020.0);
        assert_eq!(outcomes["test_rate"]["adults"], 0.1);
        assert_eq!(outcomes["test_rate"]["children"], 0.05);
        assert_eq!(outcomes["treat_duration"]["adults"], 2.0);
    }

    #[test]
    fn effects_add() {
        let outcomes = program_set().get_outcomes(
            &coverage(&[("clinic", 0.5), ("outreach", 0.25)]),
            2020.0,
        );
        // 0.1 + 0.5 * 0.4 + 0.25 * 0.8
        assert!(is_close!(outcomes["test_rate"]["adults"], 0.5));
        assert!(is_close!(outcomes["treat_duration"]["adults"], 1.25));
        assert_eq!(outcomes["test_rate"]["children"], 0.05);
    }

    #[test]
    fn coverage_is_limited() {
        let program_set = program_set();
        let outcomes = program_set.get_outcomes(&coverage(&[("clinic", 1.5)]), 2020.0);
        assert!(is_close!(outcomes["test_rate"]["adults"], 0.5));

        // Combined coverage of 2 is halved
        let outcomes =
            program_set.get_outcomes(&coverage(&[("clinic", 1.0), ("outreach", 1.0)]), 2020.0);
        assert!(is_close!(outcomes["test_rate"]["adults"], 0.1 + 0.2 + 0.4));

        let outcomes = program_set.get_outcomes(&coverage(&[("clinic", -1.0)]), 2020.0);
        assert_eq!(outcomes["test_rate"]["adults"], 0.1);
    }

    #[test]
    fn duplicate_outcomes() {
        let res = AdditiveProgramSet::from_toml_str(
            r#"
            [[outcomes]]
            parameter = "test_rate"
            population = "adults"
            baseline = 0.1

            [[outcomes]]
            parameter = "test_rate"
            population = "adults"
            baseline = 0.2
            "#,
        );
        assert!(res.is_err());
    }

    #[test]
    fn serialise_as_program_set() {
        let boxed: Box<dyn ProgramSet> = Box::new(program_set());
        let serialised = serde_json::to_string(&boxed).unwrap();
        assert!(serialised.starts_with(r#"{"type":"AdditiveProgramSet""#));
        let restored: Box<dyn ProgramSet> = serde_json::from_str(&serialised).unwrap();
        assert_eq!(restored.target_parameters().len(), 2);
    }
}
