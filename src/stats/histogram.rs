//! Fixed-bin sample histogram
//!
//! A histogram over a half-open numeric range partitioned into equal-width
//! bins. Bins are addressed by their upper edge; a sample lands in the first
//! bin whose upper edge is >= the sample value (binary search), clamped to
//! the last bin. Quantiles come from linear interpolation over the cached
//! CDF.
//!
//! The histogram itself does not handle out-of-range samples; the owning
//! [`ContinuousStatistic`](crate::stats::continuous::ContinuousStatistic)
//! buffers those and rebins when the buffer fills.

use serde_json::Value;

/// Bin layout of a histogram: bin count plus the covered value range.
///
/// Kept separate from [`Histogram`] so that all threads recording the same
/// named statistic can agree on one layout before building their histograms
/// (bit-exact combine requires identical bin edges).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistogramRange {
    pub number_of_bins: usize,
    pub min_value: f64,
    pub max_value: f64,
}

/// Histogram of sample values with equal-width bins and a cached CDF.
#[derive(Debug, Clone)]
pub struct Histogram {
    /// Upper edge of each bin, strictly increasing
    x_values: Vec<f64>,
    /// Sample count per bin
    y_values: Vec<f64>,
    /// Cached CDF; refreshed by `update_cdf`
    cdf_values: Vec<f64>,
}

impl Histogram {
    /// Create an empty histogram with `number_of_bins` equal bins spanning
    /// `[min_value, max_value]`.
    pub fn new(number_of_bins: usize, min_value: f64, max_value: f64) -> Self {
        let delta_x = (max_value - min_value) / number_of_bins as f64;
        let x_values = (0..number_of_bins)
            .map(|i| (i + 1) as f64 * delta_x + min_value)
            .collect();
        Self {
            x_values,
            y_values: vec![0.0; number_of_bins],
            cdf_values: vec![0.0; number_of_bins],
        }
    }

    pub fn from_range(range: HistogramRange) -> Self {
        Self::new(range.number_of_bins, range.min_value, range.max_value)
    }

    /// Add a sample. Values beyond the last bin edge are clamped into the
    /// last bin; the owner is expected to divert those before calling.
    pub fn add_sample(&mut self, sample_value: f64) {
        let bin_index = find_closest_bin(&self.x_values, sample_value).min(self.y_values.len() - 1);
        self.y_values[bin_index] += 1.0;
    }

    /// Estimate the value at `quantile` (in `(0, 1]`).
    ///
    /// Refreshes the CDF, locates the first bin whose CDF reaches the
    /// quantile, and interpolates linearly between that bin and its
    /// predecessor. The CDF is the independent variable here: we map
    /// quantile -> x, so the interpolation anchors are (cdf, upper edge)
    /// pairs with `(0, 0)` as the left anchor for the first bin.
    ///
    /// Returns 0.0 when the histogram holds no samples.
    pub fn quantile(&mut self, quantile: f64) -> f64 {
        if self.total_count() == 0.0 {
            return 0.0;
        }
        self.update_cdf();

        let bin_index =
            find_closest_bin(&self.cdf_values, quantile).min(self.cdf_values.len() - 1);
        let mut bottom_x = 0.0;
        let mut bottom_y = 0.0;
        let top_x = self.cdf_values[bin_index];
        let top_y = self.x_values[bin_index];

        if bin_index != 0 {
            bottom_x = self.cdf_values[bin_index - 1];
            bottom_y = self.x_values[bin_index - 1];
        }

        linear_interpolate(bottom_x, top_x, bottom_y, top_y, quantile)
    }

    /// Pointwise-add the counts of `other`. Both histograms must share the
    /// same bin edges; combining is then associative and commutative.
    pub fn combine(&mut self, other: &Histogram) {
        debug_assert_eq!(self.x_values.len(), other.x_values.len());
        for (y, other_y) in self.y_values.iter_mut().zip(other.y_values.iter()) {
            *y += other_y;
        }
        self.update_cdf();
    }

    /// Migrate the counts of a histogram with a narrower range into this
    /// one: each of `other`'s bins is added to the nearest bin here. Used
    /// when rebinning to a wider range.
    pub fn insert_smaller_histogram_samples(&mut self, other: &Histogram) {
        for (other_x, other_y) in other.x_values.iter().zip(other.y_values.iter()) {
            let idx = find_closest_bin(&self.x_values, *other_x).min(self.y_values.len() - 1);
            self.y_values[idx] += other_y;
        }
    }

    /// Lowest bin upper edge.
    pub fn min_bin(&self) -> f64 {
        self.x_values[0]
    }

    /// Highest bin upper edge; samples above this are out of range.
    pub fn max_bin(&self) -> f64 {
        *self.x_values.last().unwrap()
    }

    /// Total number of samples recorded in range.
    pub fn total_count(&self) -> f64 {
        self.y_values.iter().sum()
    }

    /// Map of stringified bin upper edge to count, for JSON export.
    pub fn to_dynamic(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (x, y) in self.x_values.iter().zip(self.y_values.iter()) {
            map.insert(x.to_string(), Value::from(*y));
        }
        Value::Object(map)
    }

    fn update_cdf(&mut self) {
        let sample_count = self.total_count();
        if sample_count == 0.0 {
            self.cdf_values.fill(0.0);
            return;
        }
        let mut current_cdf = 0.0;
        for (y, cdf) in self.y_values.iter().zip(self.cdf_values.iter_mut()) {
            current_cdf += y / sample_count;
            *cdf = current_cdf;
        }
    }

    #[cfg(test)]
    pub(crate) fn bin_counts(&self) -> &[f64] {
        &self.y_values
    }

    #[cfg(test)]
    pub(crate) fn cdf(&mut self) -> &[f64] {
        self.update_cdf();
        &self.cdf_values
    }
}

/// Index of the first element >= `search_value` (lower bound). May return
/// `values.len()` when every element is smaller; callers clamp.
fn find_closest_bin(values: &[f64], search_value: f64) -> usize {
    values.partition_point(|v| *v < search_value)
}

fn linear_interpolate(bottom_x: f64, top_x: f64, bottom_y: f64, top_y: f64, x_value: f64) -> f64 {
    bottom_y + (top_y - bottom_y) / (top_x - bottom_x) * (x_value - bottom_x)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform_histogram() -> Histogram {
        // 100 samples 1..=100 in a [0, 100] histogram with 100 bins
        let mut hist = Histogram::new(100, 0.0, 100.0);
        for i in 1..=100 {
            hist.add_sample(i as f64);
        }
        hist
    }

    #[test]
    fn test_bin_edges() {
        let hist = Histogram::new(4, 0.0, 100.0);
        assert_eq!(hist.min_bin(), 25.0);
        assert_eq!(hist.max_bin(), 100.0);
    }

    #[test]
    fn test_add_sample_counts() {
        let mut hist = Histogram::new(10, 0.0, 10.0);
        hist.add_sample(0.5);
        hist.add_sample(1.5);
        hist.add_sample(9.5);
        // Values beyond the last edge clamp into the last bin
        hist.add_sample(1000.0);
        assert_eq!(hist.total_count(), 4.0);
        assert_eq!(hist.bin_counts()[0], 1.0);
        assert_eq!(hist.bin_counts()[1], 1.0);
        assert_eq!(hist.bin_counts()[9], 2.0);
    }

    #[test]
    fn test_cdf_monotone_and_complete() {
        let mut hist = uniform_histogram();
        let cdf = hist.cdf();
        let mut last = 0.0;
        for &c in cdf {
            assert!(c >= last);
            last = c;
        }
        assert!((cdf.last().unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_quantiles_on_uniform() {
        let mut hist = uniform_histogram();
        assert!((hist.quantile(0.50) - 50.0).abs() < 1.0);
        assert!((hist.quantile(0.90) - 90.0).abs() < 1.0);
        assert!((hist.quantile(0.99) - 99.0).abs() < 1.0);
        assert!((hist.quantile(1.0) - 100.0).abs() < 1.0);
    }

    #[test]
    fn test_quantile_empty_histogram() {
        let mut hist = Histogram::new(10, 0.0, 10.0);
        // Unspecified value, but must not panic
        let _ = hist.quantile(0.5);
    }

    #[test]
    fn test_combine_matches_concatenation() {
        let mut a = Histogram::new(100, 0.0, 100.0);
        let mut b = Histogram::new(100, 0.0, 100.0);
        let mut both = Histogram::new(100, 0.0, 100.0);
        for i in 1..=50 {
            a.add_sample(i as f64);
            both.add_sample(i as f64);
        }
        for i in 51..=100 {
            b.add_sample(i as f64);
            both.add_sample(i as f64);
        }
        a.combine(&b);
        assert_eq!(a.bin_counts(), both.bin_counts());
    }

    #[test]
    fn test_combine_commutative_associative() {
        let sample_sets: [&[f64]; 3] = [&[1.0, 2.0, 3.0], &[4.0, 5.0], &[6.0, 7.0, 8.0, 9.0]];
        let build = |samples: &[f64]| {
            let mut h = Histogram::new(10, 0.0, 10.0);
            for &s in samples {
                h.add_sample(s);
            }
            h
        };

        // (a + b) + c == a + (b + c)
        let mut left = build(sample_sets[0]);
        left.combine(&build(sample_sets[1]));
        left.combine(&build(sample_sets[2]));

        let mut bc = build(sample_sets[1]);
        bc.combine(&build(sample_sets[2]));
        let mut right = build(sample_sets[0]);
        right.combine(&bc);
        assert_eq!(left.bin_counts(), right.bin_counts());

        // a + b == b + a
        let mut ab = build(sample_sets[0]);
        ab.combine(&build(sample_sets[1]));
        let mut ba = build(sample_sets[1]);
        ba.combine(&build(sample_sets[0]));
        assert_eq!(ab.bin_counts(), ba.bin_counts());
    }

    #[test]
    fn test_insert_smaller_histogram_preserves_count() {
        let mut small = Histogram::new(64, 0.0, 100.0);
        for i in 1..=100 {
            small.add_sample(i as f64);
        }
        let mut big = Histogram::new(64, 0.0, 400.0);
        big.insert_smaller_histogram_samples(&small);
        assert_eq!(big.total_count(), small.total_count());
        // Rebinned quantiles stay close despite the coarser bins
        assert!((big.quantile(0.5) - 50.0).abs() < 10.0);
    }

    #[test]
    fn test_to_dynamic_round_trip_quantiles() {
        let mut hist = uniform_histogram();
        let dynamic = hist.to_dynamic();

        // Rebuild a histogram from the exported map and compare quantiles
        let map = dynamic.as_object().unwrap();
        let mut edges: Vec<(f64, f64)> = map
            .iter()
            .map(|(k, v)| (k.parse::<f64>().unwrap(), v.as_f64().unwrap()))
            .collect();
        edges.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());

        let n = edges.len();
        let max = edges.last().unwrap().0;
        let width = edges[1].0 - edges[0].0;
        let min = edges[0].0 - width;
        let mut rebuilt = Histogram::new(n, min, max);
        for (edge, count) in edges {
            for _ in 0..count as usize {
                rebuilt.add_sample(edge);
            }
        }

        for q in [0.5, 0.9, 0.99] {
            assert!(
                (rebuilt.quantile(q) - hist.quantile(q)).abs() < 1.5,
                "quantile {} drifted: {} vs {}",
                q,
                rebuilt.quantile(q),
                hist.quantile(q)
            );
        }
    }
}
