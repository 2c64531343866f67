//! Population-specific input data.
//!
//! A [`ParameterSet`] supplies, for every population, the data for compartments,
//! characteristics and parameters along with the weights of each framework interaction and any
//! transfers of people between populations. Series are interpolated onto the simulation time
//! axis when the model is built.

use crate::errors::{CascadeError, CascadeResult};
use crate::timeseries::{FloatValue, Time, Timeseries};
use crate::variable::Units;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

fn default_scale_factor() -> FloatValue {
    1.0
}

/// Data for a single variable in a single population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterData {
    #[serde(flatten)]
    pub series: Timeseries,
    /// Multiplier applied to the data (or the formula result for computed parameters)
    #[serde(default = "default_scale_factor")]
    pub scale_factor: FloatValue,
    /// Units of the data, if known.
    ///
    /// The units declared by the framework always take precedence.
    #[serde(default)]
    pub units: Option<Units>,
}

impl ParameterData {
    pub fn new(series: Timeseries) -> Self {
        Self {
            series,
            scale_factor: 1.0,
            units: None,
        }
    }

    /// Scaled value at time `t`.
    pub fn at(&self, t: Time) -> Option<FloatValue> {
        self.series.at(t).map(|v| v * self.scale_factor)
    }
}

/// Interaction weights from one population to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionData {
    pub from: String,
    pub to: String,
    #[serde(flatten)]
    pub series: Timeseries,
}

/// Movement of people from one population to another, e.g. ageing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferData {
    pub name: String,
    pub from: String,
    pub to: String,
    pub units: Units,
    #[serde(flatten)]
    pub series: Timeseries,
}

impl TransferData {
    /// Name of the parameter created in the source population.
    pub fn parameter_name(&self) -> String {
        format!("{}_{}_to_{}", self.name, self.from, self.to)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    pub populations: Vec<String>,
    /// Population -> variable -> data
    #[serde(default)]
    pub values: BTreeMap<String, BTreeMap<String, ParameterData>>,
    /// Interaction -> weights between pairs of populations
    #[serde(default)]
    pub interactions: BTreeMap<String, Vec<InteractionData>>,
    #[serde(default)]
    pub transfers: Vec<TransferData>,
}

impl ParameterSet {
    pub fn new(populations: &[&str]) -> Self {
        Self {
            populations: populations.iter().map(|p| p.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Parse a parameter set from a TOML document and validate it.
    pub fn from_toml_str(input: &str) -> CascadeResult<Self> {
        let parset: Self = toml::from_str(input)?;
        parset.validate()?;
        Ok(parset)
    }

    pub fn population_index(&self, name: &str) -> Option<usize> {
        self.populations.iter().position(|p| p == name)
    }

    pub fn get(&self, population: &str, name: &str) -> Option<&ParameterData> {
        self.values.get(population).and_then(|v| v.get(name))
    }

    /// Set the data for a variable, replacing any existing data.
    pub fn set_value(&mut self, population: &str, name: &str, series: Timeseries) -> &mut Self {
        self.values
            .entry(population.to_string())
            .or_default()
            .insert(name.to_string(), ParameterData::new(series));
        self
    }

    /// Set the data for a variable to a single value at all times.
    pub fn set_constant(&mut self, population: &str, name: &str, value: FloatValue) -> &mut Self {
        self.set_value(population, name, Timeseries::constant(value))
    }

    /// Set the scale factor for existing data.
    ///
    /// Computed parameters with no data get an entry holding only the scale factor.
    pub fn set_scale_factor(
        &mut self,
        population: &str,
        name: &str,
        scale_factor: FloatValue,
    ) -> &mut Self {
        self.values
            .entry(population.to_string())
            .or_default()
            .entry(name.to_string())
            .or_insert_with(|| ParameterData::new(Timeseries::new(vec![], vec![])))
            .scale_factor = scale_factor;
        self
    }

    pub fn set_interaction(
        &mut self,
        interaction: &str,
        from: &str,
        to: &str,
        series: Timeseries,
    ) -> &mut Self {
        let weights = self.interactions.entry(interaction.to_string()).or_default();
        weights.retain(|w| !(w.from == from && w.to == to));
        weights.push(InteractionData {
            from: from.to_string(),
            to: to.to_string(),
            series,
        });
        self
    }

    pub fn add_transfer(
        &mut self,
        name: &str,
        from: &str,
        to: &str,
        units: Units,
        series: Timeseries,
    ) -> &mut Self {
        self.transfers.push(TransferData {
            name: name.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            units,
            series,
        });
        self
    }

    fn check_population(&self, name: &str) -> CascadeResult<()> {
        match self.population_index(name) {
            Some(_) => Ok(()),
            None => Err(CascadeError::UnknownPopulation(name.to_string())),
        }
    }

    /// Check that every entry refers to a known population and every series is well formed.
    pub fn validate(&self) -> CascadeResult<()> {
        let mut seen = HashSet::new();
        for pop in &self.populations {
            if pop.is_empty() || !seen.insert(pop) {
                return Err(CascadeError::InvalidParameterSet(format!(
                    "population names must be unique and non-empty, got '{pop}'"
                )));
            }
        }

        for (pop, values) in &self.values {
            self.check_population(pop)?;
            for (name, data) in values {
                check_series(&format!("{pop}/{name}"), &data.series, true)?;
            }
        }
        for (interaction, weights) in &self.interactions {
            for weight in weights {
                self.check_population(&weight.from)?;
                self.check_population(&weight.to)?;
                check_series(
                    &format!("{interaction} ({} -> {})", weight.from, weight.to),
                    &weight.series,
                    false,
                )?;
            }
        }
        for transfer in &self.transfers {
            self.check_population(&transfer.from)?;
            self.check_population(&transfer.to)?;
            if transfer.from == transfer.to {
                return Err(CascadeError::InvalidParameterSet(format!(
                    "transfer '{}' moves people from '{}' to itself",
                    transfer.name, transfer.from
                )));
            }
            match transfer.units {
                Units::Number | Units::Probability => {}
                _ => {
                    return Err(CascadeError::InvalidParameterSet(format!(
                        "transfer '{}' must be in number or probability units, got {}",
                        transfer.name, transfer.units
                    )))
                }
            }
            check_series(&transfer.name, &transfer.series, false)?;
        }
        Ok(())
    }
}

fn check_series(label: &str, series: &Timeseries, allow_empty: bool) -> CascadeResult<()> {
    let valid_shape = if series.t.is_empty() {
        series.v.len() == 1 || (allow_empty && series.v.is_empty())
    } else {
        series.t.len() == series.v.len()
    };
    if !valid_shape {
        return Err(CascadeError::InvalidParameterSet(format!(
            "series for {label} has {} times and {} values",
            series.t.len(),
            series.v.len()
        )));
    }
    if series.t.windows(2).any(|w| w[1] <= w[0]) {
        return Err(CascadeError::InvalidParameterSet(format!(
            "times for {label} must be strictly increasing"
        )));
    }
    if series.v.iter().any(|v| !v.is_finite()) {
        warn!("Series for {label} contains non-finite values");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_toml() {
        let parset = ParameterSet::from_toml_str(
            r#"
            populations = ["adults", "children"]

            [values.adults.sus]
            t = [2000.0, 2010.0]
            v = [100.0, 200.0]

            [values.adults.foi]
            t = []
            v = [0.1]
            scale_factor = 2.0

            [[interactions.contacts]]
            from = "adults"
            to = "children"
            t = []
            v = [0.5]

            [[transfers]]
            name = "aging"
            from = "children"
            to = "adults"
            units = "probability"
            t = []
            v = [0.05]
            "#,
        )
        .unwrap();

        assert_eq!(parset.get("adults", "sus").unwrap().at(2005.0), Some(150.0));
        assert_eq!(parset.get("adults", "foi").unwrap().at(2020.0), Some(0.2));
        assert!(parset.get("children", "sus").is_none());
        assert_eq!(parset.interactions["contacts"].len(), 1);
        assert_eq!(
            parset.transfers[0].parameter_name(),
            "aging_children_to_adults"
        );
    }

    #[test]
    fn unknown_population() {
        let mut parset = ParameterSet::new(&["adults"]);
        parset.set_constant("kids", "sus", 1.0);
        assert!(matches!(
            parset.validate(),
            Err(CascadeError::UnknownPopulation(name)) if name == "kids"
        ));
    }

    #[test]
    fn bad_series() {
        let mut parset = ParameterSet::new(&["adults"]);
        parset.values.entry("adults".to_string()).or_default().insert(
            "sus".to_string(),
            ParameterData::new(Timeseries {
                t: vec![2000.0, 2001.0],
                v: vec![1.0],
            }),
        );
        assert!(matches!(
            parset.validate(),
            Err(CascadeError::InvalidParameterSet(_))
        ));
    }

    #[test]
    fn transfer_units() {
        let mut parset = ParameterSet::new(&["a", "b"]);
        parset.add_transfer("move", "a", "b", Units::Duration, Timeseries::constant(1.0));
        assert!(parset.validate().is_err());
    }

    #[test]
    fn scale_factor_only() {
        let mut parset = ParameterSet::new(&["a"]);
        parset.set_scale_factor("a", "foi", 0.5);
        let data = parset.get("a", "foi").unwrap();
        assert!(data.series.is_empty());
        assert_eq!(data.scale_factor, 0.5);
        assert!(parset.validate().is_ok());
    }

    #[test]
    fn replacing_interaction() {
        let mut parset = ParameterSet::new(&["a", "b"]);
        parset
            .set_interaction("contacts", "a", "b", Timeseries::constant(1.0))
            .set_interaction("contacts", "a", "b", Timeseries::constant(2.0));
        assert_eq!(parset.interactions["contacts"].len(), 1);
        assert_eq!(parset.interactions["contacts"][0].series.v, vec![2.0]);
    }
}
