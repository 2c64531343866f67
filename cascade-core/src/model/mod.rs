//! A model consists of one or more populations which are solved together.
//!
//! Every population shares the same framework: the same compartments, characteristics,
//! parameters and transitions. Populations differ in their data and may interact through
//! aggregated parameters and transfers.
//!
//! Building a model resolves every formula against the variables of each population,
//! determines the order in which computed parameters are evaluated and solves for the
//! initial compartment sizes.
//! The model then moves people between compartments one time step at a time.

mod aggregation;
mod builder;
mod initialisation;
mod runtime;

#[cfg(test)]
mod tests;

// Public re-exports
pub use builder::ModelBuilder;
pub use runtime::{Model, ProgramOverwrite};
