//! Cross-population aggregation of variables.
//!
//! Parameters such as a force of infection often depend on the state of other populations.
//! An aggregation formula like `SRC_POP_AVG(prev, contacts, alive)` combines the value of
//! `prev` in every population, weighted by the `contacts` interaction and optionally by the
//! `alive` characteristic of each population.

use crate::expression::AggregationCall;
use crate::population::Population;
use ndarray::{Array1, Array2, Array3};

/// Aggregate a variable across populations at step `ti`.
///
/// Returns one value per population, in population order.
/// Populations that do not define the variable contribute nothing.
pub(crate) fn aggregate(
    populations: &[Population],
    call: &AggregationCall,
    interaction: &Array3<f64>,
    ti: usize,
    dt: f64,
) -> Array1<f64> {
    let n_pops = populations.len();

    let values: Vec<Option<f64>> = populations
        .iter()
        .map(|pop| pop.variable_value(&call.variable, ti, dt))
        .collect();
    let vals = Array1::from_iter(values.iter().map(|v| v.unwrap_or(0.0)));

    let mut weights = Array2::from_shape_fn((n_pops, n_pops), |(i, j)| {
        if values[j].is_none() {
            return 0.0;
        }
        // Source averaging reads the interaction from the other population to this one
        if call.method.is_source() {
            interaction[[j, i, ti]]
        } else {
            interaction[[i, j, ti]]
        }
    });

    if let Some(weighting) = &call.weighting {
        for (j, pop) in populations.iter().enumerate() {
            let factor = pop.variable_value(weighting, ti, dt).unwrap_or(0.0);
            weights.column_mut(j).mapv_inplace(|w| w * factor);
        }
    }

    if call.method.is_average() {
        for mut row in weights.rows_mut() {
            let total = row.sum();
            if total > 0.0 {
                row.mapv_inplace(|w| w / total);
            } else {
                row.fill(0.0);
            }
        }
    }

    weights.dot(&vals)
}
