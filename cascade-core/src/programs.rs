//! Hooks for overwriting parameters with the outcomes of programs.
//!
//! A [`ProgramSet`] maps the coverage of a number of programs (e.g. testing or treatment
//! campaigns) onto parameter values. While the window described by [`ProgramInstructions`] is
//! active, the model asks the program set for outcomes once per step and uses them instead of
//! the parameters' own values.

use crate::timeseries::{FloatValue, Time, Timeseries};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;

/// Parameter -> population -> value
pub type ProgramOutcomes = HashMap<String, HashMap<String, FloatValue>>;

#[typetag::serde(tag = "type")]
pub trait ProgramSet: Debug + Send + Sync {
    /// Parameters that this program set may overwrite.
    fn target_parameters(&self) -> Vec<String>;

    /// Calculate parameter values for the given program coverage.
    ///
    /// `coverage` holds the fraction of the eligible population reached by each program.
    fn get_outcomes(&self, coverage: &HashMap<String, FloatValue>, year: Time)
        -> ProgramOutcomes;
}

/// When programs are active and how much coverage each program has.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramInstructions {
    pub start_year: Time,
    #[serde(default)]
    pub stop_year: Option<Time>,
    /// Program name -> coverage fraction over time
    #[serde(default)]
    pub coverage: HashMap<String, Timeseries>,
}

impl ProgramInstructions {
    pub fn new(start_year: Time, stop_year: Option<Time>) -> Self {
        Self {
            start_year,
            stop_year,
            coverage: HashMap::new(),
        }
    }

    pub fn with_coverage(mut self, program: &str, coverage: Timeseries) -> Self {
        self.coverage.insert(program.to_string(), coverage);
        self
    }

    pub fn is_active(&self, t: Time) -> bool {
        t >= self.start_year && self.stop_year.map_or(true, |stop| t <= stop)
    }

    /// Coverage of every program at time `t`.
    pub fn coverage_at(&self, t: Time) -> HashMap<String, FloatValue> {
        self.coverage
            .iter()
            .filter_map(|(name, series)| series.at(t).map(|v| (name.clone(), v)))
            .collect()
    }
}
