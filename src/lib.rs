//! Compartmental disease-cascade simulation.
//!
//! The engine lives in [`core`]; [`programs`] provides concrete program outcome models.

pub use cascade_core as core;
pub use cascade_programs as programs;

pub use cascade_core::errors::{CascadeError, CascadeResult};
pub use cascade_core::framework::Framework;
pub use cascade_core::model::{Model, ModelBuilder};
pub use cascade_core::parameter_set::ParameterSet;
pub use cascade_core::result::SimResult;
pub use cascade_core::settings::SimSettings;
