//! Streaming continuous statistic
//!
//! A continuous statistic owns a self-calibrating [`Histogram`] plus
//! streaming moments (count, sum, running mean/variance, min, max). Samples
//! go through a three-phase lifecycle:
//!
//! 1. The first `warmup` samples are discarded.
//! 2. The next `calibration` samples are buffered; when the buffer fills,
//!    the histogram range is chosen as `[min/2, max*2]` over the buffer and
//!    synchronized across threads through the global range registry.
//! 3. Every later sample is recorded in both the histogram and the
//!    streaming scalars.
//!
//! Samples above the histogram's top bin land in a bounded exceptional
//! buffer; when it fills, the histogram is rebuilt with its upper bound
//! raised to the next power of two above the largest exceptional value and
//! the buffered samples are folded back in.

use crate::stats::histogram::{Histogram, HistogramRange};
use crate::util::random::RandomEngine;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

/// Number of bins every statistic histogram uses.
pub const NUMBER_OF_BINS: usize = 1024;

/// Capacity of the exceptional-values buffer; filling it triggers a rebin.
pub const EXCEPTIONAL_VALUES: usize = 1000;

/// Quantiles reported in summaries, JSON dumps, and counter exports.
pub const QUANTILES: [(f64, &str); 11] = [
    (0.01, "p01"),
    (0.05, "p05"),
    (0.10, "p10"),
    (0.15, "p15"),
    (0.20, "p20"),
    (0.50, "p50"),
    (0.80, "p80"),
    (0.85, "p85"),
    (0.90, "p90"),
    (0.95, "p95"),
    (0.99, "p99"),
];

/// Process-wide registry of histogram ranges, keyed by statistic name.
///
/// The first thread to finish calibrating a named statistic registers its
/// proposed range; every other thread adopts that range, so same-named
/// histograms share bin edges and combine bit-exactly. Each thread consults
/// the registry exactly once per statistic name.
struct RangeRegistry {
    ranges: Mutex<HashMap<String, HistogramRange>>,
}

impl RangeRegistry {
    fn synchronize(&self, name: &str, proposed: HistogramRange) -> HistogramRange {
        let mut ranges = self.ranges.lock().unwrap();
        *ranges.entry(name.to_string()).or_insert(proposed)
    }
}

fn range_registry() -> &'static RangeRegistry {
    static REGISTRY: OnceLock<RangeRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| RangeRegistry {
        ranges: Mutex::new(HashMap::new()),
    })
}

/// Streaming statistic over a continuous value (latencies, rates).
#[derive(Debug, Clone)]
pub struct ContinuousStatistic {
    name: String,
    histogram: Option<Histogram>,
    n_warmup_samples: usize,
    warmup_samples: usize,
    calibration_samples: Vec<f64>,
    n_calibration_samples: usize,
    /// Streaming scalars: count, sum, sum of squares
    s0: f64,
    s1: f64,
    s2: f64,
    /// Running mean (Welford)
    a: f64,
    /// Running sum of squared deviations (Welford)
    q: f64,
    min: Option<f64>,
    max: Option<f64>,
    exceptional_values: Vec<f64>,
}

impl ContinuousStatistic {
    pub fn new(name: &str, n_warmup_samples: usize, n_calibration_samples: usize) -> Self {
        Self {
            name: name.to_string(),
            histogram: None,
            n_warmup_samples,
            warmup_samples: 0,
            calibration_samples: Vec::new(),
            n_calibration_samples,
            s0: 0.0,
            s1: 0.0,
            s2: 0.0,
            a: 0.0,
            q: 0.0,
            min: None,
            max: None,
            exceptional_values: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a sample, advancing the warm-up/calibration lifecycle as needed.
    pub fn add_sample(&mut self, value: f64) {
        if self.histogram.is_none() {
            if self.warmup_samples < self.n_warmup_samples {
                self.warmup_samples += 1;
                return;
            }
            if self.calibration_samples.len() < self.n_calibration_samples {
                self.calibration_samples.push(value);
                return;
            }
            self.set_histogram_bins();
            // The calibration window only sized the histogram; the scalars
            // start clean from here.
            self.s0 = 0.0;
            self.s1 = 0.0;
            self.s2 = 0.0;
            self.a = 0.0;
            self.q = 0.0;
            self.min = None;
            self.max = None;
        }

        let histogram = self.histogram.as_mut().unwrap();
        if value > histogram.max_bin() {
            self.exceptional_values.push(value);
            if self.exceptional_values.len() == EXCEPTIONAL_VALUES {
                self.rebin_histogram(None);
            }
        } else {
            histogram.add_sample(value);
        }

        self.s0 += 1.0;
        self.s1 += value;
        self.s2 += value * value;
        let prev_a = self.a;
        self.a += (value - self.a) / self.s0;
        self.q += (value - prev_a) * (value - self.a);
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    pub fn n_samples(&self) -> u64 {
        self.s0 as u64
    }

    pub fn average(&self) -> f64 {
        if self.s0 == 0.0 {
            return 0.0;
        }
        self.s1 / self.s0
    }

    pub fn std_dev(&self) -> f64 {
        if self.s0 < 2.0 {
            return 0.0;
        }
        (self.q / (self.s0 - 1.0)).sqrt()
    }

    /// Coefficient of variation (stddev over mean).
    pub fn cv(&self) -> f64 {
        self.std_dev() / self.average()
    }

    pub fn min(&self) -> f64 {
        self.min.unwrap_or(0.0)
    }

    pub fn max(&self) -> f64 {
        self.max.unwrap_or(0.0)
    }

    /// Estimate a quantile from the histogram. Returns 0.0 before
    /// calibration completes.
    pub fn quantile(&mut self, quantile: f64) -> f64 {
        match self.histogram.as_mut() {
            Some(h) => h.quantile(quantile),
            None => 0.0,
        }
    }

    /// Half-width of the 95% confidence interval on the mean.
    pub fn mean_confidence(&self) -> f64 {
        let z = 1.96;
        if self.s0 == 0.0 {
            return 0.0;
        }
        z * self.std_dev() / self.s0.sqrt()
    }

    /// Bootstrap half-width of the 95% confidence interval on a quantile:
    /// resample the empirical CDF 100 times, take each resample's mean, and
    /// report the confidence on those means.
    pub fn quantile_confidence(&mut self) -> f64 {
        const N_RESAMPLES: usize = 100;
        let n = self.s0 as usize;
        let mut estimate = ContinuousStatistic::new("", 0, 0);
        for _ in 0..N_RESAMPLES {
            let mut resampled = ContinuousStatistic::new("", 0, 0);
            for _ in 0..n {
                let rand_quantile = RandomEngine::get_double();
                let sample = self.quantile(rand_quantile);
                resampled.add_sample(sample);
            }
            estimate.add_sample(resampled.average());
        }
        estimate.mean_confidence()
    }

    /// Fold another statistic of the same name into this one.
    ///
    /// Streaming mean/variance merge with the parallel-variance update
    /// (Chan et al.); min/max merge element-wise; histograms are rebinned
    /// up to the larger top bin when the two sides disagree, and any pending
    /// exceptional values on the right side are folded in first.
    pub fn combine(&mut self, other: &ContinuousStatistic) {
        if self.s0 + other.s0 > 0.0 {
            if self.s0 == 0.0 {
                self.a = other.a;
                self.q = other.q;
            } else if other.s0 > 0.0 {
                let delta = other.a - self.a;
                let total = self.s0 + other.s0;
                self.a += delta * (other.s0 / total);
                self.q += other.q + delta * delta * self.s0 * other.s0 / total;
            }
        }

        self.s0 += other.s0;
        self.s1 += other.s1;
        self.s2 += other.s2;

        self.min = match (self.min, other.min) {
            (Some(m), Some(o)) => Some(m.min(o)),
            (m, o) => m.or(o),
        };
        self.max = match (self.max, other.max) {
            (Some(m), Some(o)) => Some(m.max(o)),
            (m, o) => m.or(o),
        };

        if other.histogram.is_none() {
            return;
        }

        // Flush the other side's pending exceptional values into a rebinned
        // copy before merging, so nothing buffered gets dropped.
        let mut stat_to_combine = other.clone();
        if !stat_to_combine.exceptional_values.is_empty() {
            stat_to_combine.rebin_histogram(None);
        }

        if self.histogram.is_none() {
            self.histogram = stat_to_combine.histogram.clone();
        } else {
            // Rebin whichever side has the smaller top bin so both agree
            let self_max = self.histogram.as_ref().unwrap().max_bin();
            let other_max = stat_to_combine.histogram.as_ref().unwrap().max_bin();
            let new_max = self_max.max(other_max);
            if self_max != new_max {
                self.rebin_histogram(Some(new_max));
            }
            if other_max != new_max {
                stat_to_combine.rebin_histogram(Some(new_max));
            }
            self.histogram
                .as_mut()
                .unwrap()
                .combine(stat_to_combine.histogram.as_ref().unwrap());
        }
    }

    /// One summary line per metric, matching the printed report format.
    pub fn print(&mut self) {
        if self.histogram.is_none() {
            println!("  Did not collect enough samples");
            return;
        }
        println!("  N Samples: {}", self.s0);
        println!("  Average: {} +/- {}", self.average(), self.mean_confidence());
        println!("  Std. Dev.: {}", self.std_dev());
        println!("  Cv.: {}", self.cv());
        println!("  Min: {}", self.min());
        println!("  Max: {}", self.max());
        for (q, label) in QUANTILES {
            println!("  {} Percentile: {}", label, self.quantile(q));
        }
        let histogram = self.histogram.as_ref().unwrap();
        println!("  Min Bin: {}", histogram.min_bin());
        println!("  Max Bin: {}", histogram.max_bin());
    }

    pub fn to_dynamic(&mut self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert("n_samples".into(), Value::from(self.s0));
        map.insert("average".into(), Value::from(self.average()));
        map.insert("std_dev".into(), Value::from(self.std_dev()));
        if self.histogram.is_some() {
            for (q, label) in QUANTILES {
                map.insert(label.to_string(), Value::from(self.quantile(q)));
            }
            map.insert(
                "histogram".into(),
                self.histogram.as_ref().unwrap().to_dynamic(),
            );
        }
        Value::Object(map)
    }

    /// Flatten into named scalar counters (`<name>.count`, `<name>.avg`, ...).
    pub fn counters(&mut self) -> HashMap<String, i64> {
        let mut m = HashMap::new();
        m.insert(format!("{}.count", self.name), self.s0 as i64);
        m.insert(format!("{}.avg", self.name), self.average() as i64);
        m.insert(format!("{}.stddev", self.name), self.std_dev() as i64);
        if self.histogram.is_some() {
            for (q, label) in QUANTILES {
                m.insert(format!("{}.{}", self.name, label), self.quantile(q) as i64);
            }
        }
        m
    }

    fn set_histogram_bins(&mut self) {
        let mut min_value = 0.0;
        let mut max_value = 1.0;
        if !self.calibration_samples.is_empty() {
            min_value = self
                .calibration_samples
                .iter()
                .cloned()
                .fold(f64::INFINITY, f64::min);
            max_value = self
                .calibration_samples
                .iter()
                .cloned()
                .fold(f64::NEG_INFINITY, f64::max);
        }
        let proposed = HistogramRange {
            number_of_bins: NUMBER_OF_BINS,
            min_value: min_value / 2.0,
            max_value: max_value * 2.0,
        };
        let accepted = range_registry().synchronize(&self.name, proposed);
        self.histogram = Some(Histogram::from_range(accepted));
    }

    /// Rebuild the histogram with a wider upper bound, re-bucket the old
    /// counts by nearest bin, and fold in the buffered exceptional values.
    ///
    /// With no target, the new upper bound is the next power of two above
    /// the largest buffered exceptional value.
    fn rebin_histogram(&mut self, target_max_value: Option<f64>) {
        let old = self.histogram.as_ref().unwrap();
        let min_value = old.min_bin();

        let new_max_value = target_max_value.unwrap_or_else(|| {
            let max_exceptional = self
                .exceptional_values
                .iter()
                .cloned()
                .fold(0.0f64, f64::max);
            2f64.powf(max_exceptional.log2().ceil())
        });

        let mut new_histogram = Histogram::new(NUMBER_OF_BINS, min_value, new_max_value);
        new_histogram.insert_smaller_histogram_samples(old);
        for value in self.exceptional_values.drain(..) {
            new_histogram.add_sample(value);
        }
        self.histogram = Some(new_histogram);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_average() {
        let mut s = ContinuousStatistic::new("cont-test-avg", 0, 0);
        for i in 0..100 {
            s.add_sample((i + 1) as f64);
        }
        assert!((s.average() - 50.5).abs() < 0.1);
        assert_eq!(s.n_samples(), 100);
    }

    #[test]
    fn test_warmup_discard() {
        let mut s = ContinuousStatistic::new("cont-test-warmup", 10, 5);
        for i in 0..15 {
            s.add_sample(i as f64);
        }
        // 10 warm-up + 5 calibration: nothing recorded yet
        assert_eq!(s.n_samples(), 0);
        s.add_sample(100.0);
        assert_eq!(s.n_samples(), 1);
        assert_eq!(s.average(), 100.0);
    }

    #[test]
    fn test_calibration_sets_range() {
        let mut s = ContinuousStatistic::new("cont-test-calib", 0, 4);
        for v in [10.0, 20.0, 30.0, 40.0] {
            s.add_sample(v);
        }
        s.add_sample(25.0);
        // Range is [min/2, max*2] over calibration samples
        let q = s.quantile(1.0);
        assert!(q > 0.0 && q <= 80.0);
    }

    #[test]
    fn test_std_dev_known_values() {
        let mut s = ContinuousStatistic::new("cont-test-stddev", 0, 0);
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            s.add_sample(v);
        }
        assert!((s.average() - 5.0).abs() < 1e-9);
        // Sample stddev of that set is sqrt(32/7)
        assert!((s.std_dev() - (32.0f64 / 7.0).sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_combine_matches_concatenated_recompute() {
        let mut left = ContinuousStatistic::new("cont-test-combine", 0, 0);
        let mut right = ContinuousStatistic::new("cont-test-combine", 0, 0);
        let mut whole = ContinuousStatistic::new("cont-test-combine-whole", 0, 0);
        for i in 0..100 {
            let v = (i + 1) as f64;
            left.add_sample(v);
            whole.add_sample(v);
        }
        for i in 100..250 {
            let v = (i + 1) as f64 * 1.5;
            right.add_sample(v);
            whole.add_sample(v);
        }
        left.combine(&right);
        assert_eq!(left.n_samples(), whole.n_samples());
        assert!((left.average() - whole.average()).abs() < 1e-9);
        assert!((left.min() - whole.min()).abs() < 1e-9);
        assert!((left.max() - whole.max()).abs() < 1e-9);
        assert!((left.std_dev() - whole.std_dev()).abs() < 1e-6);
    }

    #[test]
    fn test_combine_into_empty() {
        let mut empty = ContinuousStatistic::new("cont-test-combine-empty", 0, 0);
        let mut full = ContinuousStatistic::new("cont-test-combine-empty", 0, 0);
        for i in 0..50 {
            full.add_sample(i as f64);
        }
        empty.combine(&full);
        assert_eq!(empty.n_samples(), 50);
        assert!((empty.average() - full.average()).abs() < 1e-9);
        assert!((empty.std_dev() - full.std_dev()).abs() < 1e-9);
    }

    #[test]
    fn test_combined_quantiles() {
        let mut s0 = ContinuousStatistic::new("cont-test-quant", 0, 0);
        let mut s1 = ContinuousStatistic::new("cont-test-quant", 0, 0);
        for i in 0..100 {
            s0.add_sample((i + 1) as f64);
            s1.add_sample((i + 1) as f64);
        }
        s0.combine(&s1);
        assert!((s0.quantile(0.5) - 50.0).abs() < 1.0);
        assert!((s0.quantile(0.95) - 95.0).abs() < 1.0);
        assert!((s0.quantile(0.99) - 99.0).abs() < 1.0);
    }

    #[test]
    fn test_rebin_on_exceptional_overflow() {
        let mut s = ContinuousStatistic::new("cont-test-rebin", 0, 10);
        // Calibrate around [0.5, 20]: samples 1..=10
        for i in 0..10 {
            s.add_sample((i + 1) as f64);
        }
        // Exceed the top bin until the exceptional buffer fills
        for _ in 0..EXCEPTIONAL_VALUES {
            s.add_sample(1000.0);
        }
        // All exceptional samples must survive the rebin
        assert_eq!(s.n_samples() as usize, EXCEPTIONAL_VALUES);
        let q = s.quantile(0.99);
        assert!(q > 500.0, "p99 {} should reflect the exceptional samples", q);
    }

    #[test]
    fn test_combine_flushes_pending_exceptionals() {
        let mut a = ContinuousStatistic::new("cont-test-pending", 0, 4);
        let mut b = ContinuousStatistic::new("cont-test-pending", 0, 4);
        for v in [1.0, 2.0, 3.0, 4.0] {
            a.add_sample(v);
            b.add_sample(v);
        }
        for v in [2.0, 3.0] {
            a.add_sample(v);
        }
        // Push values beyond b's top bin without filling its buffer
        for _ in 0..10 {
            b.add_sample(500.0);
        }
        a.combine(&b);
        let total_in_histogram = 2.0 + 10.0;
        assert_eq!(a.n_samples() as f64, total_in_histogram);
        assert!(a.quantile(0.99) > 100.0);
    }

    #[test]
    fn test_range_registry_shares_bins() {
        // Two same-named statistics on different threads must settle on the
        // same bin edges so their histograms combine bit-exactly.
        let name = "cont-test-shared-range";
        let build = move |scale: f64| {
            std::thread::spawn(move || {
                let mut s = ContinuousStatistic::new(name, 0, 4);
                for v in [1.0 * scale, 2.0 * scale, 3.0 * scale, 4.0 * scale] {
                    s.add_sample(v);
                }
                s.add_sample(2.0 * scale);
                s
            })
        };
        let first = build(1.0).join().unwrap();
        let second = build(10.0).join().unwrap();
        let mut combined = first.clone();
        combined.combine(&second);
        assert_eq!(combined.n_samples(), 2);
    }

    #[test]
    fn test_mean_confidence_shrinks_with_n() {
        let mut small = ContinuousStatistic::new("cont-test-conf-small", 0, 0);
        let mut large = ContinuousStatistic::new("cont-test-conf-large", 0, 0);
        for i in 0..20 {
            small.add_sample((i % 10) as f64);
        }
        for i in 0..2000 {
            large.add_sample((i % 10) as f64);
        }
        assert!(large.mean_confidence() < small.mean_confidence());
    }

    #[test]
    fn test_quantile_confidence_finite() {
        let mut s = ContinuousStatistic::new("cont-test-qconf", 0, 0);
        for i in 0..50 {
            s.add_sample((i + 1) as f64);
        }
        let c = s.quantile_confidence();
        assert!(c.is_finite());
        assert!(c >= 0.0);
    }

    #[test]
    fn test_to_dynamic_shape() {
        let mut s = ContinuousStatistic::new("cont-test-dynamic", 0, 0);
        for i in 0..100 {
            s.add_sample((i + 1) as f64);
        }
        let d = s.to_dynamic();
        assert_eq!(d["n_samples"], 100.0);
        assert!(d["average"].as_f64().is_some());
        assert!(d["p50"].as_f64().is_some());
        assert!(d["histogram"].is_object());
    }

    #[test]
    fn test_counters_export() {
        let mut s = ContinuousStatistic::new("lat", 0, 0);
        for i in 0..100 {
            s.add_sample((i + 1) as f64);
        }
        let counters = s.counters();
        assert_eq!(counters["lat.count"], 100);
        assert_eq!(counters["lat.avg"], 50);
        assert!(counters.contains_key("lat.p99"));
    }
}
