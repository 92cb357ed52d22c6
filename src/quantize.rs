//! Collapsing the empirical quality histogram into a few representative levels.
//!
//! The quality range is split into contiguous intervals minimizing the
//! observation-weighted squared distance of each bucket to its interval's
//! weighted mean (the weighted k-segments problem), solved exactly by dynamic
//! programming. Each interval maps to its rounded weighted mean.

use std::ops::Range;

use log::debug;

use crate::quality::{MAX_QUALITY, QUALITY_BUCKETS};
use crate::tables::RecalibrationTables;

/// Weighted squared error of representing `counts[range]` by its weighted mean
#[must_use]
pub fn interval_cost(counts: &[u64], range: Range<usize>) -> f64 {
    let total: f64 = counts[range.clone()].iter().map(|c| *c as f64).sum();
    if total == 0.0 {
        return 0.0;
    }
    let mean = weighted_mean(counts, range.clone(), total);
    range
        .map(|bucket| {
            let delta = bucket as f64 - mean;
            counts[bucket] as f64 * delta * delta
        })
        .sum()
}

fn weighted_mean(counts: &[u64], range: Range<usize>, total: f64) -> f64 {
    range
        .map(|bucket| counts[bucket] as f64 * bucket as f64)
        .sum::<f64>()
        / total
}

/// Optimal partition of `0..counts.len()` into `levels` contiguous intervals
///
/// Among equal-cost partitions the one with the earliest boundaries wins.
/// `levels` must be in `1..=counts.len()`.
#[must_use]
pub fn optimal_partition(counts: &[u64], levels: usize) -> Vec<Range<usize>> {
    let n = counts.len();
    assert!(
        (1..=n).contains(&levels),
        "cannot split {n} buckets into {levels} levels"
    );

    // cost[i][j] = cost of the interval i..j (exclusive end)
    let mut cost = vec![vec![0.0f64; n + 1]; n + 1];
    for (i, row) in cost.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate().skip(i + 1) {
            *cell = interval_cost(counts, i..j);
        }
    }

    // best[k][j] = minimum cost of splitting 0..j into k intervals
    let mut best = vec![vec![f64::INFINITY; n + 1]; levels + 1];
    let mut split = vec![vec![0usize; n + 1]; levels + 1];
    best[0][0] = 0.0;
    for k in 1..=levels {
        for j in k..=n {
            for i in (k - 1)..j {
                let candidate = best[k - 1][i] + cost[i][j];
                if candidate < best[k][j] {
                    best[k][j] = candidate;
                    split[k][j] = i;
                }
            }
        }
    }

    let mut intervals = Vec::with_capacity(levels);
    let mut end = n;
    for k in (1..=levels).rev() {
        let start = split[k][end];
        intervals.push(start..end);
        end = start;
    }
    intervals.reverse();
    intervals
}

/// Representative quality for every bucket of `counts` using at most `levels` levels
///
/// Falls back to the identity mapping when no quantization is needed: zero
/// levels, an empty histogram, or at least as many levels as populated buckets.
#[must_use]
pub fn quantize(counts: &[u64], levels: usize) -> Vec<u8> {
    let identity = || (0..counts.len()).map(|q| q as u8).collect::<Vec<u8>>();
    let populated = counts.iter().filter(|c| **c > 0).count();
    if levels == 0 || populated == 0 || levels >= populated {
        return identity();
    }

    let mut mapping = vec![0u8; counts.len()];
    for interval in optimal_partition(counts, levels) {
        let total: f64 = counts[interval.clone()].iter().map(|c| *c as f64).sum();
        let representative = if total == 0.0 {
            ((interval.start + interval.end - 1) as f64 / 2.0).round()
        } else {
            weighted_mean(counts, interval.clone(), total).round()
        };
        for bucket in interval {
            mapping[bucket] = representative as u8;
        }
    }
    mapping
}

/// The quantization map of a run: representative quality per empirical
/// quality bucket, and the histogram it was derived from
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuantizationInfo {
    quantized: Vec<u8>,
    counts: Vec<u64>,
    levels: usize,
}
impl QuantizationInfo {
    /// Quantizes the empirical quality histogram of the read group + quality table
    #[must_use]
    pub fn new(tables: &RecalibrationTables, levels: usize) -> Self {
        Self::from_histogram(tables.quality_histogram(), levels)
    }

    #[must_use]
    pub fn from_histogram(counts: Vec<u64>, levels: usize) -> Self {
        let quantized = quantize(&counts, levels);
        debug!(
            "Quantized {} buckets into {} levels",
            counts.len(),
            distinct_levels(&quantized)
        );
        Self {
            quantized,
            counts,
            levels,
        }
    }

    /// Reassembles a map read back from a report
    #[must_use]
    pub fn from_parts(quantized: Vec<u8>, counts: Vec<u64>, levels: usize) -> Self {
        Self {
            quantized,
            counts,
            levels,
        }
    }

    /// Identity mapping over the full quality range
    #[must_use]
    pub fn no_quantization() -> Self {
        Self {
            quantized: (0..=MAX_QUALITY).collect(),
            counts: vec![0; QUALITY_BUCKETS],
            levels: QUALITY_BUCKETS,
        }
    }

    /// Recomputes the map for a different number of levels
    pub fn quantize_quality_scores(&mut self, levels: usize) {
        self.quantized = quantize(&self.counts, levels);
        self.levels = levels;
    }

    /// Representative quality of `quality`
    #[inline]
    #[must_use]
    pub fn map(&self, quality: u8) -> u8 {
        self.quantized
            .get(quality as usize)
            .copied()
            .unwrap_or(quality)
    }

    #[must_use]
    pub fn quantized(&self) -> &[u8] {
        &self.quantized
    }

    #[must_use]
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Requested number of levels
    #[must_use]
    pub fn levels(&self) -> usize {
        self.levels
    }

    /// Number of distinct representative qualities in the map
    #[must_use]
    pub fn num_distinct_levels(&self) -> usize {
        distinct_levels(&self.quantized)
    }
}

fn distinct_levels(quantized: &[u8]) -> usize {
    let mut seen = [false; 256];
    quantized.iter().for_each(|q| seen[*q as usize] = true);
    seen.iter().filter(|s| **s).count()
}
