//! Framework definitions.
//!
//! A framework describes the structure shared by every population in a model: the compartments,
//! the characteristics derived from them, the parameters and the transitions they drive.
//! Frameworks are usually written as TOML:
//!
//! ```rust
//! use cascade_core::framework::Framework;
//!
//! let framework = Framework::from_toml_str(
//!     r#"
//!     [[compartments]]
//!     name = "sus"
//!
//!     [[compartments]]
//!     name = "dead"
//!     is_sink = true
//!
//!     [[parameters]]
//!     name = "death_rate"
//!     units = "probability"
//!
//!     [[transitions]]
//!     parameter = "death_rate"
//!     from = "sus"
//!     to = "dead"
//!     "#,
//! )
//! .unwrap();
//! assert_eq!(framework.compartments.len(), 2);
//! ```

use crate::errors::{CascadeError, CascadeResult};
use crate::variable::Units;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompartmentSpec {
    pub name: String,
    #[serde(default)]
    pub is_source: bool,
    #[serde(default)]
    pub is_sink: bool,
    #[serde(default)]
    pub is_junction: bool,
}

impl CompartmentSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            is_source: false,
            is_sink: false,
            is_junction: false,
        }
    }

    pub fn source(name: &str) -> Self {
        Self {
            is_source: true,
            ..Self::new(name)
        }
    }

    pub fn sink(name: &str) -> Self {
        Self {
            is_sink: true,
            ..Self::new(name)
        }
    }

    pub fn junction(name: &str) -> Self {
        Self {
            is_junction: true,
            ..Self::new(name)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacteristicSpec {
    pub name: String,
    /// Compartments or earlier characteristics that are summed
    pub includes: Vec<String>,
    #[serde(default)]
    pub denominator: Option<String>,
}

impl CharacteristicSpec {
    pub fn new(name: &str, includes: &[&str], denominator: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            includes: includes.iter().map(|s| s.to_string()).collect(),
            denominator: denominator.map(|s| s.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(default)]
    pub units: Units,
    /// Formula used to compute the parameter instead of reading it from data
    #[serde(default)]
    pub formula: Option<String>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    /// Value used when the parameter set has no data for a population
    #[serde(default)]
    pub default_value: Option<f64>,
}

impl ParameterSpec {
    pub fn new(name: &str, units: Units) -> Self {
        Self {
            name: name.to_string(),
            units,
            formula: None,
            min: None,
            max: None,
            default_value: None,
        }
    }

    pub fn with_formula(name: &str, units: Units, formula: &str) -> Self {
        Self {
            formula: Some(formula.to_string()),
            ..Self::new(name, units)
        }
    }
}

/// A transition driven by a parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransitionSpec {
    pub parameter: String,
    pub from: String,
    pub to: String,
}

impl TransitionSpec {
    pub fn new(parameter: &str, from: &str, to: &str) -> Self {
        Self {
            parameter: parameter.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

/// A named population interaction, e.g. sexual contacts.
///
/// Weights between populations come from the parameter set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionSpec {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Framework {
    #[serde(default)]
    pub compartments: Vec<CompartmentSpec>,
    #[serde(default)]
    pub characteristics: Vec<CharacteristicSpec>,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    #[serde(default)]
    pub transitions: Vec<TransitionSpec>,
    #[serde(default)]
    pub interactions: Vec<InteractionSpec>,
}

impl Framework {
    /// Parse a framework from a TOML document and validate it.
    pub fn from_toml_str(input: &str) -> CascadeResult<Self> {
        let framework: Self = toml::from_str(input)?;
        framework.validate()?;
        Ok(framework)
    }

    pub fn compartment(&self, name: &str) -> Option<&CompartmentSpec> {
        self.compartments.iter().find(|c| c.name == name)
    }

    pub fn characteristic(&self, name: &str) -> Option<&CharacteristicSpec> {
        self.characteristics.iter().find(|c| c.name == name)
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn has_interaction(&self, name: &str) -> bool {
        self.interactions.iter().any(|i| i.name == name)
    }

    /// Check that the framework is internally consistent.
    pub fn validate(&self) -> CascadeResult<()> {
        self.validate_names()?;
        self.validate_compartments()?;
        self.validate_characteristics()?;
        self.validate_parameters()?;
        self.validate_transitions()
    }

    fn validate_names(&self) -> CascadeResult<()> {
        let names = self
            .compartments
            .iter()
            .map(|c| &c.name)
            .chain(self.characteristics.iter().map(|c| &c.name))
            .chain(self.parameters.iter().map(|p| &p.name));

        let mut seen = HashSet::new();
        for name in names {
            if name.is_empty() || name.contains(':') || name.contains("__") {
                return Err(CascadeError::InvalidFramework(format!(
                    "'{name}' is not a valid variable name"
                )));
            }
            if !seen.insert(name.as_str()) {
                return Err(CascadeError::InvalidFramework(format!(
                    "the name '{name}' is used more than once"
                )));
            }
        }

        let mut interactions = HashSet::new();
        for interaction in &self.interactions {
            if !interactions.insert(interaction.name.as_str()) {
                return Err(CascadeError::InvalidFramework(format!(
                    "interaction '{}' is defined more than once",
                    interaction.name
                )));
            }
        }
        Ok(())
    }

    fn validate_compartments(&self) -> CascadeResult<()> {
        for comp in &self.compartments {
            let n_tags = [comp.is_source, comp.is_sink, comp.is_junction]
                .iter()
                .filter(|x| **x)
                .count();
            if n_tags > 1 {
                return Err(CascadeError::InvalidFramework(format!(
                    "compartment '{}' can only be one of source, sink or junction",
                    comp.name
                )));
            }
        }
        Ok(())
    }

    fn validate_characteristics(&self) -> CascadeResult<()> {
        // Characteristics may only refer to characteristics declared before them
        let mut declared: HashMap<&str, &CharacteristicSpec> = HashMap::new();

        let check_reference = |charac: &str, name: &str, declared: &HashMap<&str, _>| {
            if self.compartment(name).is_some() || declared.contains_key(name) {
                Ok(())
            } else if self.characteristic(name).is_some() {
                Err(CascadeError::InvalidFramework(format!(
                    "characteristic '{charac}' refers to '{name}', which is declared after it"
                )))
            } else {
                Err(CascadeError::InvalidFramework(format!(
                    "characteristic '{charac}' refers to unknown variable '{name}'"
                )))
            }
        };

        for charac in &self.characteristics {
            if charac.includes.is_empty() {
                return Err(CascadeError::InvalidFramework(format!(
                    "characteristic '{}' does not include anything",
                    charac.name
                )));
            }
            for include in &charac.includes {
                check_reference(&charac.name, include, &declared)?;
                if let Some(included) = declared.get(include.as_str()) {
                    if included.denominator.is_some() {
                        return Err(CascadeError::InvalidFramework(format!(
                            "characteristic '{}' includes '{}', which has a denominator",
                            charac.name, include
                        )));
                    }
                }
            }
            if let Some(denominator) = &charac.denominator {
                check_reference(&charac.name, denominator, &declared)?;
                if let Some(ratio) = declared.get(denominator.as_str()) {
                    if ratio.denominator.is_some() {
                        return Err(CascadeError::InvalidFramework(format!(
                            "characteristic '{}' is divided by '{}', which has a denominator",
                            charac.name, denominator
                        )));
                    }
                }
            }
            declared.insert(&charac.name, charac);
        }
        Ok(())
    }

    fn validate_parameters(&self) -> CascadeResult<()> {
        for par in &self.parameters {
            if let (Some(min), Some(max)) = (par.min, par.max) {
                if min > max {
                    return Err(CascadeError::InvalidFramework(format!(
                        "parameter '{}' has min {} greater than max {}",
                        par.name, min, max
                    )));
                }
            }
        }
        Ok(())
    }

    fn validate_transitions(&self) -> CascadeResult<()> {
        let mut seen = HashSet::new();

        for transition in &self.transitions {
            let invalid = |reason: &str| CascadeError::InvalidTransition {
                parameter: transition.parameter.clone(),
                from: transition.from.clone(),
                to: transition.to.clone(),
                reason: reason.to_string(),
            };

            let par = self
                .parameter(&transition.parameter)
                .ok_or_else(|| invalid("unknown parameter"))?;
            let from = self
                .compartment(&transition.from)
                .ok_or_else(|| invalid("unknown source compartment"))?;
            let to = self
                .compartment(&transition.to)
                .ok_or_else(|| invalid("unknown destination compartment"))?;

            if from.name == to.name {
                return Err(invalid("a compartment cannot transition to itself"));
            }
            if !seen.insert(transition) {
                return Err(invalid("transition is defined more than once"));
            }
            if from.is_sink {
                return Err(CascadeError::SourceSinkUnits {
                    compartment: from.name.clone(),
                    parameter: par.name.clone(),
                    units: par.units.to_string(),
                    reason: "sink compartments cannot have outflows".to_string(),
                });
            }
            if to.is_source {
                return Err(CascadeError::SourceSinkUnits {
                    compartment: to.name.clone(),
                    parameter: par.name.clone(),
                    units: par.units.to_string(),
                    reason: "source compartments cannot have inflows".to_string(),
                });
            }
            if from.is_source && par.units != Units::Number {
                return Err(CascadeError::SourceSinkUnits {
                    compartment: from.name.clone(),
                    parameter: par.name.clone(),
                    units: par.units.to_string(),
                    reason: "outflows from a source must be in number units".to_string(),
                });
            }
            if from.is_junction && par.units != Units::Proportion {
                return Err(CascadeError::JunctionUnits {
                    compartment: from.name.clone(),
                    parameter: par.name.clone(),
                    units: par.units.to_string(),
                });
            }
            if !from.is_junction && par.units == Units::Proportion {
                return Err(invalid(
                    "proportion units can only be used for outflows from a junction",
                ));
            }
        }
        Ok(())
    }
}
