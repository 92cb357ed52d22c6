use std::cell::Cell;

use crate::quality::{error_prob_to_qual, qual_to_error_prob, MAX_QUALITY};

/// Fractional bits of the fixed-point error accumulators
pub const FIXED_POINT_BITS: u32 = 48;

const FIXED_ONE: f64 = (1u64 << FIXED_POINT_BITS) as f64;

/// Smoothing pseudo-count added to both errors and observations
pub const SMOOTHING: f64 = 1.0;

/// Converts a non-negative weight into fixed point
#[inline]
#[must_use]
pub fn to_fixed(value: f64) -> u128 {
    debug_assert!(value >= 0.0, "negative weight {value}");
    (value * FIXED_ONE).round() as u128
}

#[inline]
#[must_use]
pub fn from_fixed(value: u128) -> f64 {
    value as f64 / FIXED_ONE
}

/// Observation and error counts of one table key
///
/// Error weights and the expected errors implied by the reported qualities are
/// accumulated as fixed-point integers, so increments and combines are exactly
/// associative and commutative: the same set of updates gives bit-identical
/// cells in any order.
///
/// The reported quality given at construction is only used while the cell has
/// no observations; afterwards the estimated reported quality is derived from
/// the pooled expected errors.
#[derive(Debug, Clone)]
pub struct RecalDatum {
    observations: u64,
    errors: u128,
    expected_errors: u128,
    reported_quality: f64,
    empirical_quality: Cell<Option<f64>>,
}
impl RecalDatum {
    /// Creates a cell from `observations` observations with `errors` errors, all
    /// reported at `reported_quality`
    #[must_use]
    pub fn new(observations: u64, errors: f64, reported_quality: f64) -> Self {
        let mut datum = Self::empty(reported_quality);
        datum.record(observations, errors, reported_quality);
        datum
    }

    /// A cell with no observations
    #[must_use]
    pub fn empty(reported_quality: f64) -> Self {
        Self {
            observations: 0,
            errors: 0,
            expected_errors: 0,
            reported_quality,
            empirical_quality: Cell::new(None),
        }
    }

    /// Reassembles a cell from its raw accumulators
    #[must_use]
    pub fn from_raw(
        observations: u64,
        errors_fixed: u128,
        expected_errors_fixed: u128,
        reported_quality: f64,
    ) -> Self {
        Self {
            observations,
            errors: errors_fixed,
            expected_errors: expected_errors_fixed,
            reported_quality,
            empirical_quality: Cell::new(None),
        }
    }

    /// Adds observations and errors at the cell's own reported quality
    pub fn increment(&mut self, observations: u64, errors: f64) {
        self.record(observations, errors, self.reported_quality);
    }

    /// Adds observations and errors reported at `reported_quality`
    pub fn record(&mut self, observations: u64, errors: f64, reported_quality: f64) {
        debug_assert!(
            errors <= observations as f64,
            "errors ({errors}) exceed observations ({observations})"
        );
        self.observations += observations;
        self.errors += to_fixed(errors);
        self.expected_errors +=
            u128::from(observations) * to_fixed(qual_to_error_prob(reported_quality));
        self.empirical_quality.set(None);
    }

    /// Pools the counts of `other` into this cell
    pub fn combine(&mut self, other: &Self) {
        self.observations += other.observations;
        self.errors += other.errors;
        self.expected_errors += other.expected_errors;
        self.reported_quality = self.reported_quality.max(other.reported_quality);
        self.empirical_quality.set(None);
    }

    #[must_use]
    pub fn observations(&self) -> u64 {
        self.observations
    }

    #[must_use]
    pub fn errors(&self) -> f64 {
        from_fixed(self.errors)
    }

    #[must_use]
    pub fn expected_errors(&self) -> f64 {
        from_fixed(self.expected_errors)
    }

    #[must_use]
    pub fn errors_fixed(&self) -> u128 {
        self.errors
    }

    #[must_use]
    pub fn expected_errors_fixed(&self) -> u128 {
        self.expected_errors
    }

    /// `-10 * log10((errors + 1) / (observations + 1))`, capped at [`MAX_QUALITY`]
    #[must_use]
    pub fn empirical_quality(&self) -> f64 {
        if let Some(quality) = self.empirical_quality.get() {
            return quality;
        }
        let rate = (self.errors() + SMOOTHING) / (self.observations as f64 + SMOOTHING);
        let quality = error_prob_to_qual(rate).min(f64::from(MAX_QUALITY));
        self.empirical_quality.set(Some(quality));
        quality
    }

    /// The quality whose error probability is the mean error probability
    /// implied by every reported quality pooled into the cell
    #[must_use]
    pub fn estimated_reported_quality(&self) -> f64 {
        if self.observations == 0 || self.expected_errors == 0 {
            return self.reported_quality;
        }
        error_prob_to_qual(self.expected_errors() / self.observations as f64)
    }
}
impl PartialEq for RecalDatum {
    fn eq(&self, other: &Self) -> bool {
        self.observations == other.observations
            && self.errors == other.errors
            && self.expected_errors == other.expected_errors
            && self.estimated_reported_quality().to_bits()
                == other.estimated_reported_quality().to_bits()
    }
}
impl Eq for RecalDatum {}
