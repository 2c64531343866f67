//! Initial compartment sizes.
//!
//! Data for the first time point is usually given for characteristics (e.g. the number of
//! people alive and the prevalence of infection) rather than for each compartment. The
//! compartment sizes that reproduce all of the supplied values are found by solving a linear
//! least squares problem.

use crate::errors::{CascadeError, CascadeResult};
use crate::parameter_set::ParameterSet;
use crate::population::Population;
use crate::settings::SimSettings;
use crate::timeseries::Time;
use crate::variable::CharacteristicInput;
use log::debug;
use nalgebra::{DMatrix, DVector};

/// Coefficients of each compartment in a characteristic input.
fn expand(pop: &Population, input: CharacteristicInput, coefficients: &mut [f64], scale: f64) {
    match input {
        CharacteristicInput::Compartment(idx) => coefficients[idx] += scale,
        CharacteristicInput::Characteristic(idx) => {
            for include in &pop.characs[idx].includes {
                expand(pop, *include, coefficients, scale);
            }
        }
    }
}

/// Set the sizes of every compartment in a population at the first time point.
///
/// Source, sink and junction compartments start empty unless data is supplied for them.
/// All other compartments are solved for from compartment and characteristic data.
pub(crate) fn initialise_population(
    pop: &mut Population,
    parset: &ParameterSet,
    t0: Time,
    settings: &SimSettings,
) -> CascadeResult<()> {
    let n_comps = pop.comps.len();
    let value_at = |name: &str| parset.get(&pop.name, name).and_then(|data| data.at(t0));

    let known: Vec<Option<f64>> = pop
        .comps
        .iter()
        .map(|comp| (!comp.is_ordinary()).then(|| value_at(&comp.name).unwrap_or(0.0)))
        .collect();
    let unknowns: Vec<usize> = (0..n_comps).filter(|idx| known[*idx].is_none()).collect();

    // Each row is a set of coefficients over all compartments and a target value
    let mut rows: Vec<(Vec<f64>, f64)> = vec![];
    for &idx in &unknowns {
        if let Some(value) = value_at(&pop.comps[idx].name) {
            let mut coefficients = vec![0.0; n_comps];
            coefficients[idx] = 1.0;
            rows.push((coefficients, value));
        }
    }
    for charac in &pop.characs {
        let Some(value) = value_at(&charac.name) else {
            continue;
        };
        let mut coefficients = vec![0.0; n_comps];
        for include in &charac.includes {
            expand(pop, *include, &mut coefficients, 1.0);
        }
        match charac.denominator {
            // numerator - value * denominator = 0
            Some(denominator) => {
                expand(pop, denominator, &mut coefficients, -value);
                rows.push((coefficients, 0.0));
            }
            None => rows.push((coefficients, value)),
        }
    }

    for (idx, value) in known.iter().enumerate() {
        if let Some(value) = value {
            pop.comps[idx].vals[0] = *value;
        }
    }
    if unknowns.is_empty() {
        return Ok(());
    }

    let n_rows = rows.len();
    let a = DMatrix::from_fn(n_rows, unknowns.len(), |i, j| rows[i].0[unknowns[j]]);
    let b = DVector::from_fn(n_rows, |i, _| {
        let (coefficients, value) = &rows[i];
        let fixed: f64 = known
            .iter()
            .enumerate()
            .filter_map(|(idx, v)| v.map(|v| coefficients[idx] * v))
            .sum();
        value - fixed
    });

    let rank = if n_rows == 0 {
        0
    } else {
        let svd = a.clone().svd(true, true);
        svd.rank(rank_tolerance(svd.singular_values.max()))
    };
    if rank < unknowns.len() {
        return Err(CascadeError::InitialisationRank {
            population: pop.name.clone(),
            rank,
            required: unknowns.len(),
        });
    }

    let svd = a.clone().svd(true, true);
    let x = svd
        .solve(&b, rank_tolerance(svd.singular_values.max()))
        .map_err(|e| CascadeError::Error(e.to_string()))?;

    // Relative to the size of the targets so that large populations are treated the same
    let residual = (&a * &x - &b).norm() / b.norm().max(1.0);
    if residual > settings.init_residual_tolerance {
        return Err(CascadeError::InitialisationResidual {
            population: pop.name.clone(),
            residual,
            tolerance: settings.init_residual_tolerance,
        });
    }

    for (j, &idx) in unknowns.iter().enumerate() {
        let value = x[j];
        if value < -settings.tolerance {
            return Err(CascadeError::NegativeInitialValue {
                population: pop.name.clone(),
                compartment: pop.comps[idx].name.clone(),
                value,
            });
        }
        pop.comps[idx].vals[0] = value.max(0.0);
    }

    debug!(
        "Initialised {} compartments in population '{}' from {} constraints",
        unknowns.len(),
        pop.name,
        n_rows
    );
    Ok(())
}

fn rank_tolerance(max_singular_value: f64) -> f64 {
    1e-10 * max_singular_value.max(1.0)
}
