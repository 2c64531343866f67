//! Core data model and time-stepping engine for compartmental disease-cascade models.
//!
//! A [`Framework`](framework::Framework) describes the compartments people can be in, the
//! characteristics derived from them and the parameters that move people between them.
//! A [`ParameterSet`](parameter_set::ParameterSet) supplies the data for each population.
//! The [`ModelBuilder`](model::ModelBuilder) combines the two into a runnable
//! [`Model`](model::Model).

pub mod errors;
pub mod expression;
pub mod framework;
pub mod model;
pub mod parameter_set;
pub mod population;
pub mod programs;
pub mod result;
pub mod settings;
pub mod timeseries;
pub mod variable;
