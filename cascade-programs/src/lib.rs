//! Program outcome models.
//!
//! Each model implements [`ProgramSet`](cascade_core::programs::ProgramSet) so that it can be
//! passed to a [`ModelBuilder`](cascade_core::model::ModelBuilder) to overwrite parameters with
//! the outcomes of programs while they are active.

mod additive;

pub use additive::{AdditiveProgramSet, AdditiveProgramSetParameters, Outcome};
