//! Model struct and the time-stepping integration loop.

use crate::errors::{CascadeError, CascadeResult};
use crate::population::Population;
use crate::programs::{ProgramInstructions, ProgramOutcomes, ProgramSet};
use crate::result::SimResult;
use crate::settings::SimSettings;
use crate::timeseries::{Time, TimeAxis};
use crate::variable::{CompartmentKey, Units};
use log::{debug, info, trace, warn};
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use super::aggregation::aggregate;

/// Programs and the window in which their outcomes replace parameter values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramOverwrite {
    pub programs: Arc<dyn ProgramSet>,
    pub instructions: ProgramInstructions,
}

/// A set of populations that are solved together on a common time axis.
///
/// Each step moves people between compartments according to the links of every population.
/// A step is made up of four phases:
///
/// 1. computed parameters (and the characteristics they read) are updated
/// 2. junctions are emptied into their destinations
/// 3. parameter values are converted into the number of people moved by each link
/// 4. compartments are updated for the next time point
///
/// The values at a time index describe the state at the start of that step.
#[derive(Debug, Serialize, Deserialize)]
pub struct Model {
    populations: Vec<Population>,
    /// Interaction name -> weights indexed by (from population, to population, time)
    interactions: HashMap<String, Array3<f64>>,
    time_axis: Arc<TimeAxis>,
    settings: SimSettings,
    /// Parameters evaluated every step, in dependency order
    execution_order: Vec<String>,
    /// Parameters that are only outputs, evaluated once the run is complete
    output_order: Vec<String>,
    programs: Option<ProgramOverwrite>,
    time_index: usize,
    initialised: bool,
}

impl Model {
    pub(crate) fn new(
        populations: Vec<Population>,
        interactions: HashMap<String, Array3<f64>>,
        time_axis: Arc<TimeAxis>,
        settings: SimSettings,
        execution_order: Vec<String>,
        output_order: Vec<String>,
        programs: Option<ProgramOverwrite>,
    ) -> Self {
        Self {
            populations,
            interactions,
            time_axis,
            settings,
            execution_order,
            output_order,
            programs,
            time_index: 0,
            initialised: false,
        }
    }

    pub fn populations(&self) -> &[Population] {
        &self.populations
    }

    pub fn population(&self, name: &str) -> Option<&Population> {
        self.populations.iter().find(|pop| pop.name == name)
    }

    pub fn time_axis(&self) -> &Arc<TimeAxis> {
        &self.time_axis
    }

    pub fn settings(&self) -> &SimSettings {
        &self.settings
    }

    pub fn time_index(&self) -> usize {
        self.time_index
    }

    /// Gets the time value at the current step.
    pub fn current_time(&self) -> Time {
        self.time_axis.values()[self.time_index]
    }

    /// Returns true if the model has no more time steps to process.
    pub fn finished(&self) -> bool {
        self.time_index + 1 >= self.time_axis.len()
    }

    fn dt(&self) -> f64 {
        self.time_axis.dt()
    }

    /// Establish the parameter values and flows for the first time point.
    ///
    /// Called automatically by [`Model::step`] and [`Model::run`] if needed.
    pub fn initialise(&mut self) -> CascadeResult<()> {
        if self.initialised {
            return Ok(());
        }
        self.update_pars()?;
        self.update_junctions()?;
        // Junctions may have moved people, so parameters are recomputed
        self.update_pars()?;
        self.update_links()?;
        self.initialised = true;
        Ok(())
    }

    /// Steps the model forward one time step.
    pub fn step(&mut self) -> CascadeResult<()> {
        assert!(!self.finished(), "the model has already finished");
        self.initialise()?;

        self.update_comps();
        self.update_pars()?;
        self.update_junctions()?;
        self.update_links()
    }

    /// Steps the model until the end of the time axis.
    pub fn run(&mut self) -> CascadeResult<()> {
        info!(
            "Running {} populations from {} to {}",
            self.populations.len(),
            self.current_time(),
            self.time_axis.values()[self.time_axis.len() - 1]
        );
        self.initialise()?;
        while !self.finished() {
            self.step()?;
        }
        Ok(())
    }

    /// Complete the output-only values and hand the populations over to a result.
    pub fn into_result(mut self) -> CascadeResult<SimResult> {
        for pop in self.populations.iter_mut() {
            pop.complete_characteristics();
        }
        self.update_output_pars()?;
        Ok(SimResult::new(self.populations, self.time_axis))
    }

    fn program_outcomes(&self) -> Option<ProgramOutcomes> {
        let overwrite = self.programs.as_ref()?;
        let t = self.current_time();
        if !overwrite.instructions.is_active(t) {
            return None;
        }
        let coverage = overwrite.instructions.coverage_at(t);
        Some(overwrite.programs.get_outcomes(&coverage, t))
    }

    /// Update every parameter that is needed during the run at the current step.
    fn update_pars(&mut self) -> CascadeResult<()> {
        let ti = self.time_index;
        let dt = self.dt();

        for pop in self.populations.iter_mut() {
            pop.update_characteristics(ti);
        }

        let outcomes = self.program_outcomes();
        if outcomes.is_some() && (ti == 0 || !self.programs_were_active(ti - 1)) {
            debug!("Programs active from t={}", self.current_time());
        }

        for name in &self.execution_order {
            let overwrites = outcomes.as_ref().and_then(|o| o.get(name));
            let computed = self.compute_parameter(name, ti, dt)?;

            for (p, value) in computed.into_iter().enumerate() {
                let pop = &mut self.populations[p];
                let Some(idx) = pop.par_index(name) else {
                    continue;
                };
                if let Some(value) = overwrites.and_then(|o| o.get(&pop.name)) {
                    pop.pars[idx].vals[ti] = *value;
                } else if let Some(value) = value {
                    let par = &mut pop.pars[idx];
                    par.vals[ti] = value * par.scale_factor;
                }
            }
        }

        for pop in self.populations.iter_mut() {
            for par in pop.pars.iter_mut().filter(|par| par.has_limits()) {
                par.vals[ti] = par.constrain(par.vals[ti]);
            }
        }
        Ok(())
    }

    fn programs_were_active(&self, ti: usize) -> bool {
        match &self.programs {
            Some(overwrite) => overwrite
                .instructions
                .is_active(self.time_axis.values()[ti]),
            None => false,
        }
    }

    /// Evaluate a computed parameter in every population at step `ti`, before scaling.
    ///
    /// Populations without the parameter, or where it is not computed, give `None`.
    fn compute_parameter(&self, name: &str, ti: usize, dt: f64) -> CascadeResult<Vec<Option<f64>>> {
        let aggregation = self.populations.iter().find_map(|pop| {
            pop.par_index(name)
                .and_then(|idx| pop.pars[idx].aggregation.clone())
        });

        if let Some(call) = aggregation {
            let interaction = self
                .interactions
                .get(&call.interaction)
                .ok_or_else(|| CascadeError::UnknownInteraction(call.interaction.clone()))?;
            let values = aggregate(&self.populations, &call, interaction, ti, dt);
            return Ok(self
                .populations
                .iter()
                .zip(values)
                .map(|(pop, value)| pop.par_index(name).map(|_| value))
                .collect());
        }

        self.populations
            .iter()
            .map(|pop| match pop.par_index(name) {
                Some(idx) if pop.pars[idx].is_formula() => {
                    pop.evaluate_parameter(idx, ti, dt).map(Some)
                }
                _ => Ok(None),
            })
            .collect()
    }

    /// Empty every junction into its destinations.
    ///
    /// Junctions that receive people from other junctions are processed again until no
    /// junction holds more than the tolerance.
    fn update_junctions(&mut self) -> CascadeResult<()> {
        let ti = self.time_index;
        let tolerance = self.settings.tolerance;

        let mut queue: Vec<CompartmentKey> = self
            .populations
            .iter()
            .flat_map(|pop| {
                pop.comps
                    .iter()
                    .enumerate()
                    .filter(|(_, comp)| comp.is_junction)
                    .map(|(index, _)| CompartmentKey {
                        population: pop.index,
                        index,
                    })
            })
            .collect();

        let mut sweeps = 0;
        while !queue.is_empty() {
            sweeps += 1;
            if sweeps > self.settings.junction_iteration_limit {
                return Err(CascadeError::JunctionIterationLimit {
                    iterations: self.settings.junction_iteration_limit,
                    time: self.current_time(),
                });
            }

            let mut next: Vec<CompartmentKey> = vec![];
            for key in queue {
                let pop = &self.populations[key.population];
                let comp = &pop.comps[key.index];
                let value = comp.vals[ti];
                if value <= tolerance {
                    self.populations[key.population].comps[key.index].vals[ti] = 0.0;
                    continue;
                }

                let weights: Vec<f64> = comp
                    .outlinks
                    .iter()
                    .map(|idx| pop.pars[pop.links[*idx].parameter].vals[ti])
                    .collect();
                let total: f64 = weights.iter().sum();
                if total <= 0.0 {
                    return Err(CascadeError::JunctionZeroOutflow {
                        population: pop.name.clone(),
                        compartment: comp.name.clone(),
                        time: self.current_time(),
                    });
                }

                let flows: Vec<(usize, CompartmentKey, f64)> = comp
                    .outlinks
                    .iter()
                    .zip(&weights)
                    .map(|(idx, weight)| (*idx, pop.links[*idx].destination, value * weight / total))
                    .collect();

                for (link_idx, destination, flow) in flows {
                    if ti > 0 {
                        self.populations[key.population].links[link_idx].vals[ti - 1] += flow;
                    }
                    let dest = &mut self.populations[destination.population].comps[destination.index];
                    dest.vals[ti] += flow;
                    if dest.is_junction && !next.contains(&destination) {
                        next.push(destination);
                    }
                }
                self.populations[key.population].comps[key.index].vals[ti] = 0.0;
            }
            queue = next;
        }
        Ok(())
    }

    /// Convert parameter values into the number of people moved by each link this step.
    fn update_links(&mut self) -> CascadeResult<()> {
        let ti = self.time_index;
        let dt = self.dt();

        for pop in self.populations.iter_mut() {
            for par_idx in 0..pop.pars.len() {
                let links = pop.pars[par_idx].links.clone();
                let Some(first) = links.first() else {
                    continue;
                };
                // Junction outflows are handled by update_junctions
                if pop.comps[pop.links[*first].source].is_junction {
                    continue;
                }

                let units = pop.pars[par_idx].units.clone();
                let value = pop.pars[par_idx].vals[ti];
                match units {
                    Units::Probability | Units::Duration => {
                        let probability = if units == Units::Duration {
                            1.0 - (-1.0 / value).exp()
                        } else {
                            value
                        };
                        if !(0.0..=1.0).contains(&probability) {
                            warn!(
                                "Probability for '{}' in population '{}' is {} at t={}, clamping to [0, 1]",
                                pop.pars[par_idx].name,
                                pop.name,
                                probability,
                                self.time_axis.values()[ti]
                            );
                        }
                        let step_probability = 1.0 - (1.0 - probability.clamp(0.0, 1.0)).powf(dt);
                        for idx in links {
                            let size = pop.comps[pop.links[idx].source].vals[ti];
                            pop.links[idx].vals[ti] = step_probability * size;
                        }
                    }
                    Units::Number => {
                        let amount = value * dt;
                        if links.len() == 1 {
                            pop.links[links[0]].vals[ti] = amount;
                            continue;
                        }
                        let total = pop.source_size(par_idx, ti);
                        let n_links = links.len() as f64;
                        for idx in links {
                            let size = pop.comps[pop.links[idx].source].vals[ti];
                            pop.links[idx].vals[ti] = if total > 0.0 {
                                amount * size / total
                            } else {
                                amount / n_links
                            };
                        }
                    }
                    units => {
                        return Err(CascadeError::UnknownUnits {
                            parameter: pop.pars[par_idx].name.clone(),
                            units: units.to_string(),
                        })
                    }
                }
            }

            // Compartments cannot lose more people than they have
            for comp_idx in 0..pop.comps.len() {
                let comp = &pop.comps[comp_idx];
                if comp.is_source || comp.is_junction {
                    continue;
                }
                let available = comp.vals[ti];
                let outflow: f64 = comp.outlinks.iter().map(|idx| pop.links[*idx].vals[ti]).sum();
                if outflow > available && outflow > 0.0 {
                    let factor = available.max(0.0) / outflow;
                    for idx in comp.outlinks.clone() {
                        pop.links[idx].vals[ti] *= factor;
                    }
                }
            }
        }
        Ok(())
    }

    /// Apply every link and advance to the next time index.
    fn update_comps(&mut self) {
        let ti = self.time_index;

        for pop in self.populations.iter_mut() {
            for comp in pop.comps.iter_mut() {
                comp.vals[ti + 1] = comp.vals[ti];
            }
        }

        // Junction outflows were already moved when the junctions were flushed
        let populations = &self.populations;
        let inflows: Vec<Vec<f64>> = populations
            .iter()
            .map(|pop| {
                pop.comps
                    .iter()
                    .map(|comp| {
                        comp.inlinks
                            .iter()
                            .filter_map(|key| {
                                let owner = &populations[key.population];
                                let link = &owner.links[key.index];
                                (!owner.comps[link.source].is_junction).then_some(link.vals[ti])
                            })
                            .sum::<f64>()
                    })
                    .collect()
            })
            .collect();

        for (pop, pop_inflows) in self.populations.iter_mut().zip(inflows) {
            for link_idx in 0..pop.links.len() {
                let source = pop.links[link_idx].source;
                let comp = &pop.comps[source];
                if comp.is_junction || comp.is_source {
                    continue;
                }
                let flow = pop.links[link_idx].vals[ti];
                pop.comps[source].vals[ti + 1] -= flow;
            }
            for (comp, inflow) in pop.comps.iter_mut().zip(pop_inflows) {
                comp.vals[ti + 1] += inflow;
            }
        }

        for pop in self.populations.iter_mut() {
            for comp in pop.comps.iter_mut() {
                let value = comp.vals[ti + 1];
                if value < 0.0 {
                    trace!(
                        "Clamping {} in population '{}' from {} to 0",
                        comp.name,
                        pop.name,
                        value
                    );
                    comp.vals[ti + 1] = 0.0;
                }
            }
        }

        self.time_index += 1;
    }

    /// Evaluate output-only parameters at every time point.
    fn update_output_pars(&mut self) -> CascadeResult<()> {
        let dt = self.dt();
        let output_order = std::mem::take(&mut self.output_order);

        for name in &output_order {
            for ti in 0..self.time_axis.len() {
                let computed = self.compute_parameter(name, ti, dt)?;
                for (p, value) in computed.into_iter().enumerate() {
                    let pop = &mut self.populations[p];
                    let Some(idx) = pop.par_index(name) else {
                        continue;
                    };
                    let par = &mut pop.pars[idx];
                    if let (Some(value), false) = (value, par.dynamic) {
                        par.vals[ti] = par.constrain(value * par.scale_factor);
                    }
                }
            }
        }
        self.output_order = output_order;
        Ok(())
    }
}
