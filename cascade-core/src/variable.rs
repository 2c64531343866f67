//! The variables that make up a population.
//!
//! There are four kinds of variable: [`Compartment`], [`Characteristic`], [`Parameter`] and
//! [`Link`]. All cross references between them are indices into the owning
//! [`Population`](crate::population::Population), or [`CompartmentKey`]/[`LinkKey`] when the
//! reference may cross populations. This keeps the (cyclic) graph trivially serialisable.

use crate::expression::{AggregationCall, Expression};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Units attached to a variable.
///
/// Parameters that drive transitions are converted to a number of people per step based on
/// their units.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Units {
    People,
    /// Number of people per year
    Number,
    /// Probability per year
    Probability,
    /// Average duration in years
    Duration,
    /// Fraction of a junction's contents
    Proportion,
    Dimensionless,
    Unknown(String),
}

impl Units {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "people" => Self::People,
            "number" => Self::Number,
            "probability" => Self::Probability,
            "duration" => Self::Duration,
            "proportion" => Self::Proportion,
            "" | "dimensionless" => Self::Dimensionless,
            _ => Self::Unknown(value.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::People => "people",
            Self::Number => "number",
            Self::Probability => "probability",
            Self::Duration => "duration",
            Self::Proportion => "proportion",
            Self::Dimensionless => "dimensionless",
            Self::Unknown(units) => units,
        }
    }
}

impl Default for Units {
    fn default() -> Self {
        Self::Dimensionless
    }
}

impl From<String> for Units {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<Units> for String {
    fn from(value: Units) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identifies a compartment in any population of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompartmentKey {
    pub population: usize,
    pub index: usize,
}

/// Identifies a link in any population of a model.
///
/// Links are owned by the population of their source compartment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkKey {
    pub population: usize,
    pub index: usize,
}

/// A stock of people.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Compartment {
    pub name: String,
    pub vals: Array1<f64>,
    pub is_source: bool,
    pub is_sink: bool,
    pub is_junction: bool,
    /// Indices of the links leaving this compartment
    pub outlinks: Vec<usize>,
    /// Links arriving at this compartment, possibly from other populations
    pub inlinks: Vec<LinkKey>,
}

impl Compartment {
    pub fn new(name: &str, n_time: usize) -> Self {
        Self {
            name: name.to_string(),
            vals: Array1::zeros(n_time),
            is_source: false,
            is_sink: false,
            is_junction: false,
            outlinks: vec![],
            inlinks: vec![],
        }
    }

    /// Source, sink and junction compartments are not part of the living population.
    pub fn is_ordinary(&self) -> bool {
        !(self.is_source || self.is_sink || self.is_junction)
    }
}

/// Something a characteristic can sum over or be divided by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CharacteristicInput {
    Compartment(usize),
    Characteristic(usize),
}

/// A derived quantity, e.g. the number of people alive or the prevalence of infection.
///
/// Values are computed from compartment values on read. Characteristics that parameters depend
/// on are cached in `vals` once per step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Characteristic {
    pub name: String,
    pub units: Units,
    pub includes: Vec<CharacteristicInput>,
    pub denominator: Option<CharacteristicInput>,
    pub vals: Array1<f64>,
    pub dependency: bool,
}

/// What a name used in a formula resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DependencyTarget {
    Compartment(usize),
    Characteristic(usize),
    Parameter(usize),
    /// The links matching a flow pattern such as `par:flow` or `src:dst:par`
    Links(Vec<usize>),
}

/// A quantity that is either read from data or computed from a formula.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub units: Units,
    pub vals: Array1<f64>,
    pub scale_factor: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub expression: Option<Expression>,
    /// Resolved formula dependencies, keyed by the name used in the formula
    pub deps: Vec<(String, DependencyTarget)>,
    /// Set when the formula is a cross-population aggregation
    pub aggregation: Option<AggregationCall>,
    /// Indices of the links driven by this parameter
    pub links: Vec<usize>,
    /// Another dynamically evaluated quantity reads this parameter
    pub dependency: bool,
    /// Evaluated at every step rather than after the run
    pub dynamic: bool,
    /// The formula reads transition flows, so the parameter is output only
    pub reads_flows: bool,
    #[serde(skip)]
    pub(crate) source_size_cache: Option<(usize, f64)>,
}

impl Parameter {
    pub fn new(name: &str, units: Units, n_time: usize) -> Self {
        Self {
            name: name.to_string(),
            units,
            vals: Array1::zeros(n_time),
            scale_factor: 1.0,
            min: None,
            max: None,
            expression: None,
            deps: vec![],
            aggregation: None,
            links: vec![],
            dependency: false,
            dynamic: false,
            reads_flows: false,
            source_size_cache: None,
        }
    }

    pub fn has_limits(&self) -> bool {
        self.min.is_some() || self.max.is_some()
    }

    /// Clamp a value into the `[min, max]` range of this parameter.
    pub fn constrain(&self, value: f64) -> f64 {
        let value = self.min.map_or(value, |min| value.max(min));
        self.max.map_or(value, |max| value.min(max))
    }

    pub fn is_formula(&self) -> bool {
        self.expression.is_some()
    }
}

/// A transition between two compartments carrying a number of people per step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    /// Always `<parameter>:flow`
    pub name: String,
    pub parameter: usize,
    pub source: usize,
    pub destination: CompartmentKey,
    pub vals: Array1<f64>,
}

/// A borrowed reference to any kind of variable.
#[derive(Debug, Clone, Copy)]
pub enum VariableRef<'a> {
    Compartment(&'a Compartment),
    Characteristic(&'a Characteristic),
    Parameter(&'a Parameter),
    Link(&'a Link),
}

impl<'a> VariableRef<'a> {
    pub fn name(&self) -> &'a str {
        match self {
            Self::Compartment(c) => &c.name,
            Self::Characteristic(c) => &c.name,
            Self::Parameter(p) => &p.name,
            Self::Link(l) => &l.name,
        }
    }

    pub fn units(&self) -> Units {
        match self {
            Self::Compartment(_) | Self::Link(_) => Units::People,
            Self::Characteristic(c) => c.units.clone(),
            Self::Parameter(p) => p.units.clone(),
        }
    }

    /// Values of the variable.
    ///
    /// Characteristic values are only complete once a run has been turned into a result.
    pub fn vals(&self) -> &'a Array1<f64> {
        match self {
            Self::Compartment(c) => &c.vals,
            Self::Characteristic(c) => &c.vals,
            Self::Parameter(p) => &p.vals,
            Self::Link(l) => &l.vals,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Compartment(_) => "compartment",
            Self::Characteristic(_) => "characteristic",
            Self::Parameter(_) => "parameter",
            Self::Link(_) => "link",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn units_from_str() {
        assert_eq!(Units::parse("Probability"), Units::Probability);
        assert_eq!(Units::parse(" number "), Units::Number);
        assert_eq!(Units::parse(""), Units::Dimensionless);
        assert_eq!(Units::parse("widgets"), Units::Unknown("widgets".to_string()));
        assert_eq!(Units::parse("widgets").to_string(), "widgets");
    }

    #[test]
    fn units_serialise_as_string() {
        let json = serde_json::to_string(&Units::Duration).unwrap();
        assert_eq!(json, "\"duration\"");
        let units: Units = serde_json::from_str("\"proportion\"").unwrap();
        assert_eq!(units, Units::Proportion);
    }

    #[test]
    fn parameter_limits() {
        let mut par = Parameter::new("p", Units::Probability, 3);
        assert!(!par.has_limits());
        assert_eq!(par.constrain(2.0), 2.0);

        par.min = Some(0.0);
        par.max = Some(1.0);
        assert!(par.has_limits());
        assert_eq!(par.constrain(2.0), 1.0);
        assert_eq!(par.constrain(-0.5), 0.0);
        assert_eq!(par.constrain(0.3), 0.3);
    }

    #[test]
    fn ordinary_compartments() {
        let mut comp = Compartment::new("sus", 2);
        assert!(comp.is_ordinary());
        comp.is_junction = true;
        assert!(!comp.is_ordinary());
    }
}
