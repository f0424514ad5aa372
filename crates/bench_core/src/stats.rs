//! Profiling Statistics
//!
//! A capture window aggregates one or more named timing metrics into a
//! [`StatisticsRecord`]. Each metric is summarized as a [`MetricStats`]
//! (mean / standard deviation / min / max over the captured samples).
//!
//! [`SampleAccumulator`] builds a [`MetricStats`] in a single streaming pass
//! using Welford's update, so hosts do not have to keep every sample around.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Aggregate statistics of a single metric over a capture window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricStats {
    pub mean: f64,
    /// Population standard deviation.
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub sample_count: u64,
}

impl MetricStats {
    /// Returns the name of the first non-finite field, if any.
    #[must_use]
    pub fn first_non_finite(&self) -> Option<&'static str> {
        [
            ("mean", self.mean),
            ("std_dev", self.std_dev),
            ("min", self.min),
            ("max", self.max),
        ]
        .into_iter()
        .find(|(_, v)| !v.is_finite())
        .map(|(name, _)| name)
    }
}

/// Named metric → statistics, produced when a capture window closes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatisticsRecord {
    metrics: BTreeMap<String, MetricStats>,
}

impl StatisticsRecord {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a metric, chaining.
    #[must_use]
    pub fn with_metric(mut self, name: impl Into<String>, stats: MetricStats) -> Self {
        self.metrics.insert(name.into(), stats);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, stats: MetricStats) {
        self.metrics.insert(name.into(), stats);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&MetricStats> {
        self.metrics.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetricStats)> {
        self.metrics.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.metrics.len()
    }
}

/// Streaming mean / variance / extrema accumulator.
#[derive(Debug, Clone, Copy, Default)]
pub struct SampleAccumulator {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl SampleAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: f64) {
        self.count += 1;
        if self.count == 1 {
            self.min = sample;
            self.max = sample;
        } else {
            self.min = self.min.min(sample);
            self.max = self.max.max(sample);
        }
        let delta = sample - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (sample - self.mean);
    }

    #[inline]
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Summarizes the samples seen so far; `None` when empty.
    #[must_use]
    pub fn finish(&self) -> Option<MetricStats> {
        if self.count == 0 {
            return None;
        }
        Some(MetricStats {
            mean: self.mean,
            std_dev: (self.m2 / self.count as f64).sqrt(),
            min: self.min,
            max: self.max,
            sample_count: self.count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-9;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < EPSILON
    }

    #[test]
    fn empty_accumulator_has_no_stats() {
        assert!(SampleAccumulator::new().finish().is_none());
    }

    #[test]
    fn accumulator_matches_closed_form() {
        let mut acc = SampleAccumulator::new();
        for s in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            acc.push(s);
        }
        let stats = acc.finish().unwrap();
        assert!(approx(stats.mean, 5.0));
        assert!(approx(stats.std_dev, 2.0));
        assert!(approx(stats.min, 2.0));
        assert!(approx(stats.max, 9.0));
        assert_eq!(stats.sample_count, 8);
    }

    #[test]
    fn single_sample_has_zero_deviation() {
        let mut acc = SampleAccumulator::new();
        acc.push(3.5);
        let stats = acc.finish().unwrap();
        assert!(approx(stats.mean, 3.5));
        assert!(approx(stats.std_dev, 0.0));
        assert!(approx(stats.min, 3.5));
        assert!(approx(stats.max, 3.5));
    }

    #[test]
    fn non_finite_field_is_reported() {
        let stats = MetricStats {
            mean: 1.0,
            std_dev: f64::NAN,
            min: 0.5,
            max: 2.0,
            sample_count: 2,
        };
        assert_eq!(stats.first_non_finite(), Some("std_dev"));
    }
}
