//! Phred-scale quality conversions shared by the accumulator cells, the quantizer
//! and the model application step.

use std::f64::consts::LN_10;

/// Highest quality score representable in a recalibrated read
pub const MAX_QUALITY: u8 = 93;

/// Number of distinct raw quality buckets (`0..=MAX_QUALITY`)
pub const QUALITY_BUCKETS: usize = MAX_QUALITY as usize + 1;

/// Lowest quality a recalibrated base may be assigned
pub const MIN_USABLE_QUALITY: u8 = 1;

/// Default reported quality for insertion and deletion events when the read
/// carries no dedicated quality track
pub const DEFAULT_INDEL_QUALITY: u8 = 45;

/// Converts a phred-scaled quality into its implied error probability
///
/// `P(error) = 10^(-Q/10)`
#[inline]
#[must_use]
pub fn qual_to_error_prob(qual: f64) -> f64 {
    (-qual * LN_10 / 10.0).exp()
}

/// Converts an error probability into a phred-scaled quality
///
/// The probability is expected to be in `(0, 1]`; callers are responsible for
/// smoothing so that zero never reaches this function.
#[inline]
#[must_use]
pub fn error_prob_to_qual(prob: f64) -> f64 {
    -10.0 * prob.log10()
}

/// Rounds a quality and bounds it into `[min, max]`
#[inline]
#[must_use]
pub fn bound_quality(qual: f64, min: u8, max: u8) -> u8 {
    let rounded = qual.round();
    if rounded.is_nan() || rounded <= f64::from(min) {
        min
    } else if rounded >= f64::from(max) {
        max
    } else {
        rounded as u8
    }
}
