//! Completed simulation output.

use crate::errors::{CascadeError, CascadeResult};
use crate::population::Population;
use crate::timeseries::{Time, TimeAxis};
use crate::variable::VariableRef;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The values of every variable in every population over a completed run.
///
/// Produced by [`Model::into_result`](crate::model::Model::into_result).
/// Characteristics and output-only parameters are fully evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimResult {
    time_axis: Arc<TimeAxis>,
    populations: Vec<Population>,
}

impl SimResult {
    pub(crate) fn new(populations: Vec<Population>, time_axis: Arc<TimeAxis>) -> Self {
        Self {
            time_axis,
            populations,
        }
    }

    pub fn time_axis(&self) -> &TimeAxis {
        &self.time_axis
    }

    pub fn t(&self) -> &Array1<Time> {
        self.time_axis.values()
    }

    pub fn dt(&self) -> Time {
        self.time_axis.dt()
    }

    pub fn population_names(&self) -> Vec<&str> {
        self.populations.iter().map(|pop| pop.name.as_str()).collect()
    }

    pub fn populations(&self) -> &[Population] {
        &self.populations
    }

    pub fn population(&self, name: &str) -> CascadeResult<&Population> {
        self.populations
            .iter()
            .find(|pop| pop.name == name)
            .ok_or_else(|| CascadeError::UnknownPopulation(name.to_string()))
    }

    /// Look up a variable in a population.
    ///
    /// Flow patterns such as `death:flow` or `inf:dead` can match more than one link.
    pub fn get_variable(&self, population: &str, name: &str) -> CascadeResult<Vec<VariableRef<'_>>> {
        self.population(population)?.get_variable(name)
    }

    /// Values of a variable in a population.
    ///
    /// Links matched by a flow pattern are summed and reported as people per step.
    pub fn get_vals(&self, population: &str, name: &str) -> CascadeResult<Array1<f64>> {
        let vars = self.get_variable(population, name)?;
        let mut total = Array1::zeros(self.time_axis.len());
        for var in vars {
            total += var.vals();
        }
        Ok(total)
    }
}
