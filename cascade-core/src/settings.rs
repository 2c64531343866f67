//! Simulation settings.
//!
//! Settings are passed explicitly into the [`ModelBuilder`](crate::model::ModelBuilder) and
//! owned by the resulting [`Model`](crate::model::Model).
//! Every field has a default so partial TOML documents are accepted:
//!
//! ```rust
//! use cascade_core::settings::SimSettings;
//!
//! let settings = SimSettings::from_toml_str("sim_end = 2020.0\nsim_dt = 1.0").unwrap();
//! assert_eq!(settings.sim_start, 2000.0);
//! assert_eq!(settings.n_steps(), 21);
//! ```

use crate::errors::{CascadeError, CascadeResult};
use crate::timeseries::TimeAxis;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimSettings {
    /// First simulated year
    pub sim_start: f64,
    /// Last simulated year (inclusive)
    pub sim_end: f64,
    /// Step size in years
    pub sim_dt: f64,
    /// Numerical tolerance used for "approximately zero" comparisons
    pub tolerance: f64,
    /// Maximum number of junction sweeps within a single time step
    pub junction_iteration_limit: usize,
    /// Largest acceptable residual when solving for initial compartment sizes
    pub init_residual_tolerance: f64,
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            sim_start: 2000.0,
            sim_end: 2035.0,
            sim_dt: 0.25,
            tolerance: 1e-6,
            junction_iteration_limit: 100,
            init_residual_tolerance: 1e-4,
        }
    }
}

impl SimSettings {
    pub fn new(sim_start: f64, sim_end: f64, sim_dt: f64) -> Self {
        Self {
            sim_start,
            sim_end,
            sim_dt,
            ..Default::default()
        }
    }

    /// Parse settings from a TOML document and validate them.
    pub fn from_toml_str(input: &str) -> CascadeResult<Self> {
        let settings: Self = toml::from_str(input)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> CascadeResult<()> {
        if !(self.sim_dt > 0.0) {
            return Err(CascadeError::InvalidSettings(format!(
                "sim_dt must be positive, got {}",
                self.sim_dt
            )));
        }
        if self.sim_end < self.sim_start {
            return Err(CascadeError::InvalidSettings(format!(
                "sim_end ({}) is before sim_start ({})",
                self.sim_end, self.sim_start
            )));
        }
        if self.tolerance < 0.0 || self.init_residual_tolerance < 0.0 {
            return Err(CascadeError::InvalidSettings(
                "tolerances must be non-negative".to_string(),
            ));
        }
        if self.junction_iteration_limit == 0 {
            return Err(CascadeError::InvalidSettings(
                "junction_iteration_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of time points, including both end points.
    pub fn n_steps(&self) -> usize {
        ((self.sim_end - self.sim_start) / self.sim_dt).round() as usize + 1
    }

    pub fn time_axis(&self) -> TimeAxis {
        TimeAxis::from_range(self.sim_start, self.sim_dt, self.n_steps())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = SimSettings::default();
        assert_eq!(settings.n_steps(), 141);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn partial_toml() {
        let settings = SimSettings::from_toml_str(
            r#"
            sim_start = 2010.0
            sim_end = 2012.0
            sim_dt = 0.5
            junction_iteration_limit = 10
            "#,
        )
        .unwrap();
        assert_eq!(settings.n_steps(), 5);
        assert_eq!(settings.junction_iteration_limit, 10);
        assert_eq!(settings.tolerance, 1e-6);
    }

    #[test]
    fn rejects_bad_step() {
        let res = SimSettings::from_toml_str("sim_dt = 0.0");
        assert!(matches!(res, Err(CascadeError::InvalidSettings(_))));

        let res = SimSettings::from_toml_str("sim_dt = \"fast\"");
        assert!(matches!(res, Err(CascadeError::Config(_))));
    }

    #[test]
    fn rejects_reversed_range() {
        let settings = SimSettings::new(2020.0, 2010.0, 1.0);
        assert!(settings.validate().is_err());
    }
}
