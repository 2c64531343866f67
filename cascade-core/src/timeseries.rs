//! Time axes and sparse input series.

use ndarray::Array1;
use serde::{Deserialize, Serialize};

pub type FloatValue = f64;
pub type Time = f64;

/// Evenly spaced simulation time points.
///
/// A single axis is shared (via `Arc`) between the model, its populations and the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeAxis {
    values: Array1<Time>,
    dt: Time,
}

impl TimeAxis {
    /// Create an axis of `n` points starting at `start` separated by `dt`.
    pub fn from_range(start: Time, dt: Time, n: usize) -> Self {
        let values = Array1::from_iter((0..n).map(|i| start + i as Time * dt));
        Self { values, dt }
    }

    pub fn values(&self) -> &Array1<Time> {
        &self.values
    }

    pub fn at(&self, index: usize) -> Option<Time> {
        self.values.get(index).copied()
    }

    pub fn dt(&self) -> Time {
        self.dt
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A series of (time, value) pairs supplied by a parameter set.
///
/// Values are linearly interpolated between data points and held constant outside of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeseries {
    /// Empty for a constant series
    #[serde(default)]
    pub t: Vec<Time>,
    pub v: Vec<FloatValue>,
}

impl Timeseries {
    /// Create a series from matching time and value vectors.
    ///
    /// Points are sorted by time.
    ///
    /// # Panics
    /// Panics if `t` and `v` have different lengths.
    pub fn new(t: Vec<Time>, v: Vec<FloatValue>) -> Self {
        assert_eq!(t.len(), v.len(), "t and v must have the same length");
        let mut points: Vec<(Time, FloatValue)> = t.into_iter().zip(v).collect();
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        let (t, v) = points.into_iter().unzip();
        Self { t, v }
    }

    /// A series with the same value at all times.
    pub fn constant(value: FloatValue) -> Self {
        Self {
            t: vec![],
            v: vec![value],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.v.is_empty()
    }

    /// Value at time `t`.
    ///
    /// Returns `None` for an empty series.
    pub fn at(&self, t: Time) -> Option<FloatValue> {
        if self.v.is_empty() {
            return None;
        }
        if self.t.len() < 2 {
            return Some(self.v[0]);
        }

        let last = self.t.len() - 1;
        if t <= self.t[0] {
            return Some(self.v[0]);
        }
        if t >= self.t[last] {
            return Some(self.v[last]);
        }

        // First index with a time strictly greater than t
        let upper = self.t.partition_point(|x| *x <= t);
        let lower = upper - 1;
        let (t0, t1) = (self.t[lower], self.t[upper]);
        let (v0, v1) = (self.v[lower], self.v[upper]);
        Some(v0 + (v1 - v0) * (t - t0) / (t1 - t0))
    }

    /// Interpolate onto every point of a time axis.
    pub fn interpolate_onto(&self, axis: &TimeAxis) -> Option<Vec<FloatValue>> {
        axis.values().iter().map(|t| self.at(*t)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use is_close::is_close;

    #[test]
    fn time_axis_range() {
        let axis = TimeAxis::from_range(2000.0, 0.25, 5);
        assert_eq!(axis.len(), 5);
        assert_eq!(axis.at(4), Some(2001.0));
        assert_eq!(axis.at(5), None);
        assert_eq!(axis.dt(), 0.25);
    }

    #[test]
    fn interpolation() {
        let ts = Timeseries::new(vec![2010.0, 2000.0], vec![20.0, 10.0]);
        assert_eq!(ts.t, vec![2000.0, 2010.0]);
        assert_eq!(ts.at(1990.0), Some(10.0));
        assert!(is_close!(ts.at(2005.0).unwrap(), 15.0));
        assert_eq!(ts.at(2030.0), Some(20.0));
    }

    #[test]
    fn constant_series() {
        let ts = Timeseries::constant(3.0);
        let axis = TimeAxis::from_range(2000.0, 1.0, 3);
        assert_eq!(ts.interpolate_onto(&axis), Some(vec![3.0, 3.0, 3.0]));
    }

    #[test]
    fn empty_series() {
        let ts = Timeseries::new(vec![], vec![]);
        assert!(ts.is_empty());
        assert_eq!(ts.at(2000.0), None);
    }
}
