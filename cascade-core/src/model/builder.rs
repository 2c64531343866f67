//! Model builder for constructing models from a framework and a parameter set.

use crate::errors::{CascadeError, CascadeResult};
use crate::expression::Expression;
use crate::framework::Framework;
use crate::parameter_set::ParameterSet;
use crate::population::Population;
use crate::programs::{ProgramInstructions, ProgramSet};
use crate::settings::SimSettings;
use crate::timeseries::TimeAxis;
use crate::variable::{
    Characteristic, CharacteristicInput, Compartment, CompartmentKey, DependencyTarget, Link,
    LinkKey, Parameter, Units,
};
use log::{debug, info, warn};
use ndarray::{Array1, Array3};
use petgraph::algo::toposort;
use petgraph::Graph;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::initialisation::initialise_population;
use super::runtime::{Model, ProgramOverwrite};

/// Build a new model from a framework and a parameter set.
///
/// The framework defines the structure shared by every population and the parameter set
/// supplies the population-specific data. Building wires each population into a graph of
/// variables, determines the order in which computed parameters must be evaluated and solves for
/// the initial compartment sizes.
pub struct ModelBuilder {
    framework: Option<Framework>,
    parameter_set: Option<ParameterSet>,
    settings: SimSettings,
    programs: Option<ProgramOverwrite>,
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self {
            framework: None,
            parameter_set: None,
            settings: SimSettings::default(),
            programs: None,
        }
    }

    pub fn with_framework(&mut self, framework: Framework) -> &mut Self {
        self.framework = Some(framework);
        self
    }

    pub fn with_parameter_set(&mut self, parameter_set: ParameterSet) -> &mut Self {
        self.parameter_set = Some(parameter_set);
        self
    }

    pub fn with_settings(&mut self, settings: SimSettings) -> &mut Self {
        self.settings = settings;
        self
    }

    /// Overwrite parameters with program outcomes while the instructions are active.
    pub fn with_programs(
        &mut self,
        programs: Arc<dyn ProgramSet>,
        instructions: ProgramInstructions,
    ) -> &mut Self {
        self.programs = Some(ProgramOverwrite {
            programs,
            instructions,
        });
        self
    }

    /// Builds the concrete model.
    ///
    /// This step fails if the framework and parameter set are inconsistent, a formula is
    /// invalid or the initial compartment sizes cannot be determined.
    pub fn build(&self) -> CascadeResult<Model> {
        let framework = self
            .framework
            .as_ref()
            .ok_or_else(|| CascadeError::InvalidFramework("no framework provided".to_string()))?;
        let parset = self.parameter_set.as_ref().ok_or_else(|| {
            CascadeError::InvalidParameterSet("no parameter set provided".to_string())
        })?;

        self.settings.validate()?;
        framework.validate()?;
        parset.validate()?;
        if parset.populations.is_empty() {
            return Err(CascadeError::InvalidParameterSet(
                "at least one population is required".to_string(),
            ));
        }

        let time_axis = Arc::new(self.settings.time_axis());
        let expressions = parse_formulas(framework)?;
        let order = execution_order(framework, &expressions)?;

        let program_targets: HashSet<String> = match &self.programs {
            Some(overwrite) => overwrite.programs.target_parameters().into_iter().collect(),
            None => HashSet::new(),
        };
        for target in &program_targets {
            if framework.parameter(target).is_none() {
                return Err(CascadeError::InvalidFramework(format!(
                    "programs target unknown parameter '{target}'"
                )));
            }
        }

        let mut populations = parset
            .populations
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let mut pop = build_structure(
                    framework,
                    name,
                    idx,
                    time_axis.len(),
                    self.settings.tolerance,
                )?;
                load_parameters(&mut pop, framework, parset, &expressions, &time_axis)?;
                initialise_population(&mut pop, parset, self.settings.sim_start, &self.settings)?;
                debug!(
                    "Built population '{}' with {} compartments and {} links",
                    pop.name,
                    pop.comps.len(),
                    pop.links.len()
                );
                Ok(pop)
            })
            .collect::<CascadeResult<Vec<_>>>()?;

        add_transfers(&mut populations, parset, &time_axis)?;
        resolve_dependencies(&mut populations)?;
        flag_dependencies(&mut populations, &program_targets)?;
        let interactions = build_interactions(framework, parset, &time_axis)?;
        warn_unused_data(framework, parset);

        let any_pop = |name: &str, predicate: &dyn Fn(&Parameter) -> bool| {
            populations
                .iter()
                .filter_map(|pop| pop.par_index(name).map(|idx| &pop.pars[idx]))
                .any(predicate)
        };
        let dynamic_order: Vec<String> = order
            .iter()
            .filter(|name| any_pop(name.as_str(), &|par: &Parameter| par.dynamic))
            .cloned()
            .collect();
        let output_order: Vec<String> = order
            .iter()
            .filter(|name| {
                any_pop(name.as_str(), &|par: &Parameter| {
                    par.is_formula() && !par.dynamic
                })
            })
            .cloned()
            .collect();

        info!(
            "Built model with {} populations, {} time points, {} dynamic and {} output parameters",
            populations.len(),
            time_axis.len(),
            dynamic_order.len(),
            output_order.len()
        );

        Ok(Model::new(
            populations,
            interactions,
            time_axis,
            self.settings.clone(),
            dynamic_order,
            output_order,
            self.programs.clone(),
        ))
    }
}

impl Default for ModelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_formulas(framework: &Framework) -> CascadeResult<HashMap<String, Expression>> {
    let mut expressions = HashMap::new();
    for spec in &framework.parameters {
        let Some(formula) = &spec.formula else {
            continue;
        };
        let expression =
            Expression::parse(formula).map_err(|source| CascadeError::Expression {
                parameter: spec.name.clone(),
                source,
            })?;
        if let Some(call) = expression.aggregation() {
            if !framework.has_interaction(&call.interaction) {
                return Err(CascadeError::UnknownInteraction(call.interaction));
            }
        }
        expressions.insert(spec.name.clone(), expression);
    }
    Ok(expressions)
}

/// Order parameters so that every parameter comes after the parameters its formula reads.
fn execution_order(
    framework: &Framework,
    expressions: &HashMap<String, Expression>,
) -> CascadeResult<Vec<String>> {
    let mut graph = Graph::<&str, ()>::new();
    let nodes: HashMap<&str, _> = framework
        .parameters
        .iter()
        .map(|spec| (spec.name.as_str(), graph.add_node(spec.name.as_str())))
        .collect();

    for spec in &framework.parameters {
        let Some(expression) = expressions.get(&spec.name) else {
            continue;
        };
        for dep in expression.dependencies() {
            if let Some(dep_node) = nodes.get(dep.as_str()) {
                graph.add_edge(*dep_node, nodes[spec.name.as_str()], ());
            }
        }
    }

    let sorted = toposort(&graph, None).map_err(|cycle| {
        CascadeError::CircularDependency(format!(
            "parameter '{}' depends on itself",
            graph[cycle.node_id()]
        ))
    })?;
    Ok(sorted.into_iter().map(|nx| graph[nx].to_string()).collect())
}

fn characteristic_input(
    pop: &Population,
    charac: &str,
    name: &str,
) -> CascadeResult<CharacteristicInput> {
    pop.comp_index(name)
        .map(CharacteristicInput::Compartment)
        .or_else(|| pop.charac_index(name).map(CharacteristicInput::Characteristic))
        .ok_or_else(|| {
            CascadeError::InvalidFramework(format!(
                "characteristic '{charac}' refers to unknown variable '{name}'"
            ))
        })
}

/// Create the variables of a population and wire up the transitions between compartments.
///
/// Values are left at zero.
pub(crate) fn build_structure(
    framework: &Framework,
    name: &str,
    index: usize,
    n_time: usize,
    tolerance: f64,
) -> CascadeResult<Population> {
    let mut pop = Population::new(name, index, tolerance);

    for spec in &framework.compartments {
        let mut comp = Compartment::new(&spec.name, n_time);
        comp.is_source = spec.is_source;
        comp.is_sink = spec.is_sink;
        comp.is_junction = spec.is_junction;
        pop.add_compartment(comp);
    }

    for spec in &framework.characteristics {
        let includes = spec
            .includes
            .iter()
            .map(|include| characteristic_input(&pop, &spec.name, include))
            .collect::<CascadeResult<Vec<_>>>()?;
        let denominator = spec
            .denominator
            .as_ref()
            .map(|den| characteristic_input(&pop, &spec.name, den))
            .transpose()?;

        pop.add_characteristic(Characteristic {
            name: spec.name.clone(),
            units: if denominator.is_some() {
                Units::Dimensionless
            } else {
                Units::People
            },
            includes,
            denominator,
            vals: Array1::zeros(n_time),
            dependency: false,
        });
    }

    for spec in &framework.parameters {
        let mut par = Parameter::new(&spec.name, spec.units.clone(), n_time);
        par.min = spec.min;
        par.max = spec.max;
        pop.add_parameter(par);
    }

    for transition in &framework.transitions {
        let missing = |what: &str| CascadeError::InvalidTransition {
            parameter: transition.parameter.clone(),
            from: transition.from.clone(),
            to: transition.to.clone(),
            reason: format!("unknown {what}"),
        };
        let parameter = pop
            .par_index(&transition.parameter)
            .ok_or_else(|| missing("parameter"))?;
        let source = pop
            .comp_index(&transition.from)
            .ok_or_else(|| missing("source compartment"))?;
        let destination = pop
            .comp_index(&transition.to)
            .ok_or_else(|| missing("destination compartment"))?;

        let link_idx = pop.add_link(Link {
            name: format!("{}:flow", transition.parameter),
            parameter,
            source,
            destination: CompartmentKey {
                population: index,
                index: destination,
            },
            vals: Array1::zeros(n_time),
        });
        pop.comps[destination].inlinks.push(LinkKey {
            population: index,
            index: link_idx,
        });
    }

    Ok(pop)
}

/// Fill parameter values from the parameter set and attach formulas.
fn load_parameters(
    pop: &mut Population,
    framework: &Framework,
    parset: &ParameterSet,
    expressions: &HashMap<String, Expression>,
    time_axis: &TimeAxis,
) -> CascadeResult<()> {
    for spec in &framework.parameters {
        let Some(idx) = pop.par_index(&spec.name) else {
            continue;
        };
        let data = parset.get(&pop.name, &spec.name);
        if let Some(units) = data.and_then(|d| d.units.as_ref()) {
            if *units != spec.units {
                warn!(
                    "Data for '{}' in population '{}' is in {} but the framework uses {}; \
                     the framework units are used",
                    spec.name, pop.name, units, spec.units
                );
            }
        }

        let par = &mut pop.pars[idx];
        par.scale_factor = data.map_or(1.0, |d| d.scale_factor);

        if let Some(expression) = expressions.get(&spec.name) {
            if data.is_some_and(|d| !d.series.is_empty()) {
                warn!(
                    "Ignoring data for computed parameter '{}' in population '{}'",
                    spec.name, pop.name
                );
            }
            par.aggregation = expression.aggregation();
            par.expression = Some(expression.clone());
            continue;
        }

        let values = match data.filter(|d| !d.series.is_empty()) {
            Some(d) => d.series.interpolate_onto(time_axis),
            None => spec
                .default_value
                .map(|value| vec![value; time_axis.len()]),
        };
        let values = values.ok_or_else(|| CascadeError::MissingData {
            population: pop.name.clone(),
            variable: spec.name.clone(),
        })?;
        let scale_factor = par.scale_factor;
        par.vals = Array1::from(values).mapv(|v| v * scale_factor);
    }
    Ok(())
}

fn population_index(populations: &[Population], name: &str) -> CascadeResult<usize> {
    populations
        .iter()
        .position(|pop| pop.name == name)
        .ok_or_else(|| CascadeError::UnknownPopulation(name.to_string()))
}

/// Create the parameters and links that move people between populations.
fn add_transfers(
    populations: &mut [Population],
    parset: &ParameterSet,
    time_axis: &TimeAxis,
) -> CascadeResult<()> {
    for transfer in &parset.transfers {
        let from = population_index(populations, &transfer.from)?;
        let to = population_index(populations, &transfer.to)?;
        let name = transfer.parameter_name();
        if populations[from].resolve(&name).is_some() {
            return Err(CascadeError::InvalidParameterSet(format!(
                "transfer parameter '{name}' is defined more than once"
            )));
        }

        let values = transfer
            .series
            .interpolate_onto(time_axis)
            .ok_or_else(|| CascadeError::MissingData {
                population: transfer.from.clone(),
                variable: name.clone(),
            })?;
        let mut par = Parameter::new(&name, transfer.units.clone(), time_axis.len());
        par.vals = Array1::from(values);
        let par_idx = populations[from].add_parameter(par);

        let sources: Vec<usize> = (0..populations[from].comps.len())
            .filter(|idx| populations[from].comps[*idx].is_ordinary())
            .collect();
        for source in sources {
            let comp_name = &populations[from].comps[source].name;
            let Some(destination) = populations[to].comp_index(comp_name) else {
                continue;
            };
            let link_idx = populations[from].add_link(Link {
                name: format!("{name}:flow"),
                parameter: par_idx,
                source,
                destination: CompartmentKey {
                    population: to,
                    index: destination,
                },
                vals: Array1::zeros(time_axis.len()),
            });
            populations[to].comps[destination].inlinks.push(LinkKey {
                population: from,
                index: link_idx,
            });
        }
        debug!(
            "Added transfer '{}' from '{}' to '{}'",
            name, transfer.from, transfer.to
        );
    }
    Ok(())
}

/// Resolve the names used in each formula to variables in the same population.
fn resolve_dependencies(populations: &mut [Population]) -> CascadeResult<()> {
    let mut resolved = vec![];

    for pop in populations.iter() {
        for (idx, par) in pop.pars.iter().enumerate() {
            let Some(expression) = &par.expression else {
                continue;
            };

            if let Some(call) = &par.aggregation {
                // Aggregated variables are looked up in every population as the model runs
                let mut reads_flows = false;
                for name in [Some(&call.variable), call.weighting.as_ref()]
                    .into_iter()
                    .flatten()
                {
                    let targets: Vec<DependencyTarget> =
                        populations.iter().filter_map(|p| p.resolve(name)).collect();
                    if targets.is_empty() {
                        return Err(CascadeError::UnresolvedDependency {
                            population: pop.name.clone(),
                            parameter: par.name.clone(),
                            dependency: name.clone(),
                        });
                    }
                    reads_flows |= targets
                        .iter()
                        .any(|t| matches!(t, DependencyTarget::Links(_)));
                }
                resolved.push((pop.index, idx, vec![], reads_flows));
                continue;
            }

            let mut deps = vec![];
            let mut reads_flows = false;
            for name in expression.dependencies() {
                let target =
                    pop.resolve(name)
                        .ok_or_else(|| CascadeError::UnresolvedDependency {
                            population: pop.name.clone(),
                            parameter: par.name.clone(),
                            dependency: name.clone(),
                        })?;
                reads_flows |= matches!(target, DependencyTarget::Links(_));
                deps.push((name.clone(), target));
            }
            resolved.push((pop.index, idx, deps, reads_flows));
        }
    }

    for (pop, idx, deps, reads_flows) in resolved {
        let par = &mut populations[pop].pars[idx];
        par.deps = deps;
        par.reads_flows = reads_flows;
    }
    Ok(())
}

/// Mark everything that parameters evaluated during the run read as a dependency.
///
/// Parameters that drive links or are targeted by programs are evaluated every step, so
/// everything their formulas read (transitively) must be kept up to date as well.
fn flag_dependencies(
    populations: &mut [Population],
    program_targets: &HashSet<String>,
) -> CascadeResult<()> {
    let mut stack: Vec<(usize, usize)> = vec![];
    for pop in populations.iter() {
        for (idx, par) in pop.pars.iter().enumerate() {
            if !par.links.is_empty() || program_targets.contains(&par.name) {
                stack.push((pop.index, idx));
            }
        }
    }

    let mut visited = HashSet::new();
    while let Some((p, i)) = stack.pop() {
        if !visited.insert((p, i)) {
            continue;
        }
        let par = &populations[p].pars[i];

        if par.reads_flows {
            let flow = par
                .deps
                .iter()
                .find(|(_, target)| matches!(target, DependencyTarget::Links(_)))
                .map(|(name, _)| name.clone())
                .or_else(|| par.aggregation.as_ref().map(|call| call.variable.clone()))
                .unwrap_or_default();
            return Err(CascadeError::FlowDependency {
                parameter: par.name.clone(),
                dependency: flow,
            });
        }

        let mut targets: Vec<(usize, DependencyTarget)> = par
            .deps
            .iter()
            .map(|(_, target)| (p, target.clone()))
            .collect();
        if let Some(call) = &par.aggregation {
            for name in [Some(&call.variable), call.weighting.as_ref()]
                .into_iter()
                .flatten()
            {
                for other in populations.iter() {
                    if let Some(target) = other.resolve(name) {
                        targets.push((other.index, target));
                    }
                }
            }
        }

        for (q, target) in targets {
            match target {
                DependencyTarget::Compartment(_) | DependencyTarget::Links(_) => {}
                DependencyTarget::Characteristic(c) => {
                    populations[q].characs[c].dependency = true;
                }
                DependencyTarget::Parameter(j) => {
                    populations[q].pars[j].dependency = true;
                    stack.push((q, j));
                }
            }
        }
    }

    for pop in populations.iter_mut() {
        for par in pop.pars.iter_mut() {
            par.dynamic = program_targets.contains(&par.name)
                || (par.is_formula() && (par.dependency || !par.links.is_empty()));
        }
    }
    Ok(())
}

/// Interaction weights as `(from population, to population, time)` tensors.
fn build_interactions(
    framework: &Framework,
    parset: &ParameterSet,
    time_axis: &TimeAxis,
) -> CascadeResult<HashMap<String, Array3<f64>>> {
    let n_pops = parset.populations.len();
    let mut interactions: HashMap<String, Array3<f64>> = framework
        .interactions
        .iter()
        .map(|spec| {
            (
                spec.name.clone(),
                Array3::zeros((n_pops, n_pops, time_axis.len())),
            )
        })
        .collect();

    for (name, weights) in &parset.interactions {
        let Some(tensor) = interactions.get_mut(name) else {
            warn!("Ignoring weights for interaction '{name}', which is not in the framework");
            continue;
        };
        for weight in weights {
            let from = parset
                .population_index(&weight.from)
                .ok_or_else(|| CascadeError::UnknownPopulation(weight.from.clone()))?;
            let to = parset
                .population_index(&weight.to)
                .ok_or_else(|| CascadeError::UnknownPopulation(weight.to.clone()))?;
            let values =
                weight
                    .series
                    .interpolate_onto(time_axis)
                    .ok_or_else(|| CascadeError::MissingData {
                        population: weight.from.clone(),
                        variable: name.clone(),
                    })?;
            for (ti, value) in values.into_iter().enumerate() {
                tensor[[from, to, ti]] = value;
            }
        }
    }
    Ok(interactions)
}

fn warn_unused_data(framework: &Framework, parset: &ParameterSet) {
    for (pop, values) in &parset.values {
        for name in values.keys() {
            let known = framework.compartment(name).is_some()
                || framework.characteristic(name).is_some()
                || framework.parameter(name).is_some();
            if !known {
                warn!("Ignoring data for '{name}' in population '{pop}', which is not in the framework");
            }
        }
    }
}
