use crate::expression::ExpressionError;
use thiserror::Error;

/// Error type for building and running cascade models.
#[derive(Error, Debug)]
pub enum CascadeError {
    #[error("{0}")]
    Error(String),

    // Construction
    #[error("Invalid framework: {0}")]
    InvalidFramework(String),
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),
    #[error("Invalid parameter set: {0}")]
    InvalidParameterSet(String),
    #[error("Could not parse configuration: {0}")]
    Config(#[from] toml::de::Error),
    #[error("Formula for parameter '{parameter}' is invalid: {source}")]
    Expression {
        parameter: String,
        #[source]
        source: ExpressionError,
    },
    #[error("Parameter '{parameter}' in population '{population}' depends on '{dependency}', which could not be found")]
    UnresolvedDependency {
        population: String,
        parameter: String,
        dependency: String,
    },
    #[error("Parameter '{parameter}' reads transition flow '{dependency}' and must be output only; it cannot be a dependency or drive transitions")]
    FlowDependency {
        parameter: String,
        dependency: String,
    },
    #[error("Circular dependency between parameters: {0}")]
    CircularDependency(String),
    #[error("Invalid transition '{from}' -> '{to}' for parameter '{parameter}': {reason}")]
    InvalidTransition {
        parameter: String,
        from: String,
        to: String,
        reason: String,
    },
    #[error("Parameter '{parameter}' flows out of junction '{compartment}' and must be in proportion units, got {units}")]
    JunctionUnits {
        compartment: String,
        parameter: String,
        units: String,
    },
    #[error("Parameter '{parameter}' is attached to source/sink compartment '{compartment}' with invalid units {units}: {reason}")]
    SourceSinkUnits {
        compartment: String,
        parameter: String,
        units: String,
        reason: String,
    },
    #[error("No data for '{variable}' in population '{population}'")]
    MissingData { population: String, variable: String },
    #[error("Unknown population '{0}'")]
    UnknownPopulation(String),
    #[error("Unknown interaction '{0}'")]
    UnknownInteraction(String),
    #[error("No variable named '{name}' in population '{population}'")]
    UnknownVariable { population: String, name: String },

    // Initialisation
    #[error("Initial compartment sizes in population '{population}' are not uniquely determined (rank {rank}, {required} unknowns)")]
    InitialisationRank {
        population: String,
        rank: usize,
        required: usize,
    },
    #[error("Initial compartment sizes in population '{population}' do not match the supplied characteristics (residual {residual:e} > {tolerance:e})")]
    InitialisationResidual {
        population: String,
        residual: f64,
        tolerance: f64,
    },
    #[error("Initial size of compartment '{compartment}' in population '{population}' is negative ({value})")]
    NegativeInitialValue {
        population: String,
        compartment: String,
        value: f64,
    },

    // Integration
    #[error("Junctions did not empty after {iterations} sweeps at t={time} - infinite loop suspected")]
    JunctionIterationLimit { iterations: usize, time: f64 },
    #[error("Junction '{compartment}' in population '{population}' has outflow weights summing to zero at t={time}")]
    JunctionZeroOutflow {
        population: String,
        compartment: String,
        time: f64,
    },
    #[error("Parameter '{parameter}' has units '{units}' which cannot be converted to a flow")]
    UnknownUnits { parameter: String, units: String },
}

/// Convenience type for `Result<T, CascadeError>`.
pub type CascadeResult<T> = Result<T, CascadeError>;
