//! A single population and the variables it owns.

use crate::errors::{CascadeError, CascadeResult};
use crate::variable::{
    Characteristic, CharacteristicInput, Compartment, DependencyTarget, Link, Parameter,
    VariableRef,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum VariableIndex {
    Compartment(usize),
    Characteristic(usize),
    Parameter(usize),
}

/// All of the compartments, characteristics, parameters and links for one population.
///
/// Populations are built once by the [`ModelBuilder`](crate::model::ModelBuilder) and their
/// structure never changes afterwards; only the values are updated as the model runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Population {
    pub name: String,
    /// Position of this population in the model
    pub index: usize,
    pub comps: Vec<Compartment>,
    pub characs: Vec<Characteristic>,
    pub pars: Vec<Parameter>,
    pub links: Vec<Link>,
    tolerance: f64,
    lookup: HashMap<String, VariableIndex>,
    /// Set once every characteristic value has been written to `vals`
    characteristics_complete: bool,
}

impl Population {
    pub fn new(name: &str, index: usize, tolerance: f64) -> Self {
        Self {
            name: name.to_string(),
            index,
            comps: vec![],
            characs: vec![],
            pars: vec![],
            links: vec![],
            tolerance,
            lookup: HashMap::new(),
            characteristics_complete: false,
        }
    }

    pub(crate) fn add_compartment(&mut self, comp: Compartment) -> usize {
        let idx = self.comps.len();
        self.lookup
            .insert(comp.name.clone(), VariableIndex::Compartment(idx));
        self.comps.push(comp);
        idx
    }

    pub(crate) fn add_characteristic(&mut self, charac: Characteristic) -> usize {
        let idx = self.characs.len();
        self.lookup
            .insert(charac.name.clone(), VariableIndex::Characteristic(idx));
        self.characs.push(charac);
        idx
    }

    pub(crate) fn add_parameter(&mut self, par: Parameter) -> usize {
        let idx = self.pars.len();
        self.lookup
            .insert(par.name.clone(), VariableIndex::Parameter(idx));
        self.pars.push(par);
        idx
    }

    /// Add a link and register it with its parameter and source compartment.
    ///
    /// The destination is registered by the caller since it may be in another population.
    pub(crate) fn add_link(&mut self, link: Link) -> usize {
        let idx = self.links.len();
        self.pars[link.parameter].links.push(idx);
        self.comps[link.source].outlinks.push(idx);
        self.links.push(link);
        idx
    }

    pub fn comp_index(&self, name: &str) -> Option<usize> {
        match self.lookup.get(name) {
            Some(VariableIndex::Compartment(idx)) => Some(*idx),
            _ => None,
        }
    }

    pub fn charac_index(&self, name: &str) -> Option<usize> {
        match self.lookup.get(name) {
            Some(VariableIndex::Characteristic(idx)) => Some(*idx),
            _ => None,
        }
    }

    pub fn par_index(&self, name: &str) -> Option<usize> {
        match self.lookup.get(name) {
            Some(VariableIndex::Parameter(idx)) => Some(*idx),
            _ => None,
        }
    }

    /// Find the links matching a flow pattern.
    ///
    /// Supported patterns are `par:flow`, `src:dst` and `src:dst:par`, where an empty field
    /// matches anything.
    pub fn find_links(&self, pattern: &str) -> Vec<usize> {
        let parts: Vec<&str> = pattern.split(':').collect();
        let (src, dst, par) = match parts.as_slice() {
            [par, "flow"] => ("", "", *par),
            [src, dst] => (*src, *dst, ""),
            [src, dst, par] => (*src, *dst, *par),
            _ => return vec![],
        };

        self.links
            .iter()
            .enumerate()
            .filter(|(_, link)| {
                // Every population shares the framework, so compartment indices map to the
                // same names in the destination population
                let dst_name = self
                    .comps
                    .get(link.destination.index)
                    .map_or("", |c| c.name.as_str());
                (src.is_empty() || self.comps[link.source].name == src)
                    && (dst.is_empty() || dst_name == dst)
                    && (par.is_empty() || self.pars[link.parameter].name == par)
            })
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Resolve a name used in a formula.
    pub fn resolve(&self, name: &str) -> Option<DependencyTarget> {
        match self.lookup.get(name) {
            Some(VariableIndex::Compartment(idx)) => Some(DependencyTarget::Compartment(*idx)),
            Some(VariableIndex::Characteristic(idx)) => {
                Some(DependencyTarget::Characteristic(*idx))
            }
            Some(VariableIndex::Parameter(idx)) => Some(DependencyTarget::Parameter(*idx)),
            None if name.contains(':') => {
                let links = self.find_links(name);
                (!links.is_empty()).then_some(DependencyTarget::Links(links))
            }
            None => None,
        }
    }

    /// Look up a variable by name.
    ///
    /// Flow patterns return every matching link.
    pub fn get_variable(&self, name: &str) -> CascadeResult<Vec<VariableRef<'_>>> {
        let found = match self.resolve(name) {
            Some(DependencyTarget::Compartment(idx)) => {
                vec![VariableRef::Compartment(&self.comps[idx])]
            }
            Some(DependencyTarget::Characteristic(idx)) => {
                vec![VariableRef::Characteristic(&self.characs[idx])]
            }
            Some(DependencyTarget::Parameter(idx)) => {
                vec![VariableRef::Parameter(&self.pars[idx])]
            }
            Some(DependencyTarget::Links(links)) => links
                .into_iter()
                .map(|idx| VariableRef::Link(&self.links[idx]))
                .collect(),
            None => vec![],
        };

        if found.is_empty() {
            return Err(CascadeError::UnknownVariable {
                population: self.name.clone(),
                name: name.to_string(),
            });
        }
        Ok(found)
    }

    /// Value of a characteristic at step `ti`.
    ///
    /// Cached values are used when available, otherwise the value is derived from the
    /// compartments.
    pub fn characteristic_value(&self, idx: usize, ti: usize) -> f64 {
        let charac = &self.characs[idx];
        if charac.dependency || self.characteristics_complete {
            charac.vals[ti]
        } else {
            self.compute_characteristic(idx, ti)
        }
    }

    fn compute_characteristic(&self, idx: usize, ti: usize) -> f64 {
        let charac = &self.characs[idx];
        let numerator: f64 = charac
            .includes
            .iter()
            .map(|input| self.compute_input(*input, ti))
            .sum();

        match charac.denominator {
            None => numerator,
            Some(input) => {
                let denominator = self.compute_input(input, ti);
                if numerator.abs() < self.tolerance && denominator.abs() < self.tolerance {
                    0.0
                } else {
                    numerator / denominator
                }
            }
        }
    }

    fn compute_input(&self, input: CharacteristicInput, ti: usize) -> f64 {
        match input {
            CharacteristicInput::Compartment(idx) => self.comps[idx].vals[ti],
            CharacteristicInput::Characteristic(idx) => self.compute_characteristic(idx, ti),
        }
    }

    /// Refresh the cached values of characteristics that parameters depend on.
    pub(crate) fn update_characteristics(&mut self, ti: usize) {
        for idx in 0..self.characs.len() {
            if self.characs[idx].dependency {
                let value = self.compute_characteristic(idx, ti);
                self.characs[idx].vals[ti] = value;
            }
        }
    }

    /// Write every characteristic value for every step.
    pub(crate) fn complete_characteristics(&mut self) {
        let n_time = self.comps.first().map_or(0, |c| c.vals.len());
        for idx in 0..self.characs.len() {
            for ti in 0..n_time {
                let value = self.compute_characteristic(idx, ti);
                self.characs[idx].vals[ti] = value;
            }
        }
        self.characteristics_complete = true;
    }

    /// Value a formula sees for a dependency at step `ti`.
    ///
    /// Links are annualised by dividing the per-step flow by `dt`.
    pub fn dependency_value(&self, target: &DependencyTarget, ti: usize, dt: f64) -> f64 {
        match target {
            DependencyTarget::Compartment(idx) => self.comps[*idx].vals[ti],
            DependencyTarget::Characteristic(idx) => self.characteristic_value(*idx, ti),
            DependencyTarget::Parameter(idx) => self.pars[*idx].vals[ti],
            DependencyTarget::Links(links) => {
                links.iter().map(|idx| self.links[*idx].vals[ti]).sum::<f64>() / dt
            }
        }
    }

    /// Value of a named variable, or `None` if this population does not have it.
    pub fn variable_value(&self, name: &str, ti: usize, dt: f64) -> Option<f64> {
        self.resolve(name)
            .map(|target| self.dependency_value(&target, ti, dt))
    }

    /// Evaluate the formula of a parameter at step `ti`, before scaling.
    pub(crate) fn evaluate_parameter(&self, idx: usize, ti: usize, dt: f64) -> CascadeResult<f64> {
        let par = &self.pars[idx];
        let Some(expression) = &par.expression else {
            return Ok(par.vals[ti]);
        };

        expression
            .evaluate_with(|name| {
                par.deps
                    .iter()
                    .find(|(dep, _)| dep == name)
                    .map(|(_, target)| self.dependency_value(target, ti, dt))
            })
            .map_err(|source| CascadeError::Expression {
                parameter: par.name.clone(),
                source,
            })
    }

    /// Total size of the compartments the links of a parameter draw from.
    ///
    /// Memoised per step.
    pub(crate) fn source_size(&mut self, par_idx: usize, ti: usize) -> f64 {
        if let Some((cached_ti, value)) = self.pars[par_idx].source_size_cache {
            if cached_ti == ti {
                return value;
            }
        }
        let value = self.pars[par_idx]
            .links
            .iter()
            .map(|idx| self.comps[self.links[*idx].source].vals[ti])
            .sum();
        self.pars[par_idx].source_size_cache = Some((ti, value));
        value
    }
}
