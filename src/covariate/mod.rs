//! Covariates: per-base explanatory factors packed into table keys.
//!
//! Each covariate evaluates a whole read at once and records one value per
//! offset and event type into a [`ReadCovariates`] buffer. A missing value
//! (`None`) means the covariate has nothing to say about that base, and only
//! the table of that covariate skips it.

mod binary_tag;
mod context;
mod cycle;
mod quality_score;
mod read_group;

pub use binary_tag::BinaryTagCovariate;
pub use context::{
    ContextCovariate, DEFAULT_INDELS_CONTEXT_SIZE, DEFAULT_LOW_QUALITY_TAIL,
    DEFAULT_MISMATCHES_CONTEXT_SIZE, MAX_CONTEXT_SIZE,
};
pub use cycle::{CycleCovariate, DEFAULT_MAXIMUM_CYCLE};
pub use quality_score::QualityScoreCovariate;
pub use read_group::{ReadGroupCovariate, MAX_READ_GROUPS};

use std::fmt;
use std::str::FromStr;

use crate::config::RecalibrationArgs;
use crate::error::{ConfigError, Result};
use crate::event::EventType;
use crate::read::RecalRead;

/// Closed set of covariate kinds known to this crate
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CovariateKind {
    ReadGroup,
    QualityScore,
    Cycle,
    Context,
    BinaryTag,
}
impl CovariateKind {
    pub const ALL: [Self; 5] = [
        Self::ReadGroup,
        Self::QualityScore,
        Self::Cycle,
        Self::Context,
        Self::BinaryTag,
    ];

    /// Covariates every table is keyed by
    pub const REQUIRED: [Self; 2] = [Self::ReadGroup, Self::QualityScore];

    /// Optional covariates used when no explicit list is given
    pub const STANDARD: [Self; 2] = [Self::Cycle, Self::Context];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::ReadGroup => "ReadGroup",
            Self::QualityScore => "QualityScore",
            Self::Cycle => "Cycle",
            Self::Context => "Context",
            Self::BinaryTag => "BinaryTag",
        }
    }

    /// Stable numeric identifier used by the binary report
    #[must_use]
    pub fn id(self) -> u8 {
        match self {
            Self::ReadGroup => 0,
            Self::QualityScore => 1,
            Self::Cycle => 2,
            Self::Context => 3,
            Self::BinaryTag => 4,
        }
    }

    #[must_use]
    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.id() == id)
    }

    #[must_use]
    pub fn is_required(self) -> bool {
        Self::REQUIRED.contains(&self)
    }
}
impl fmt::Display for CovariateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
impl FromStr for CovariateKind {
    type Err = ConfigError;

    /// Case-insensitive, accepting an optional `Covariate` suffix
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let stem = lower.strip_suffix("covariate").unwrap_or(&lower);
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(stem))
            .ok_or_else(|| ConfigError::UnknownCovariate(s.to_string()))
    }
}

/// Number of bits needed to index `n` distinct values (`ceil(log2(n))`)
#[inline]
#[must_use]
pub fn bits_to_index(n: u64) -> u32 {
    if n <= 1 {
        0
    } else {
        u64::BITS - (n - 1).leading_zeros()
    }
}

/// Bits a covariate with the given maximum value occupies in a key
///
/// A value space of size one still reserves a single bit.
#[inline]
#[must_use]
pub fn bits_for_maximum(maximum: u64) -> u32 {
    if maximum == u64::MAX {
        u64::BITS
    } else {
        bits_to_index(maximum + 1).max(1)
    }
}

/// Contract shared by all covariates
pub trait Covariate {
    fn kind(&self) -> CovariateKind;

    /// Evaluates the covariate over the whole read and records its values in
    /// column `index` of `values`
    fn record_values<R: RecalRead + ?Sized>(
        &self,
        read: &R,
        values: &mut ReadCovariates,
        index: usize,
    );

    /// Largest key value this covariate can produce
    fn maximum_key_value(&self) -> u64;

    /// Converts a key back into its display value
    fn format_key(&self, key: u64) -> String;

    /// Parses a display value into a key
    fn key_from_value(&self, value: &str) -> Option<u64>;

    fn bits_required(&self) -> u32 {
        bits_for_maximum(self.maximum_key_value())
    }
}

/// Enumerated covariate variants
#[derive(Debug)]
pub enum StandardCovariate {
    ReadGroup(ReadGroupCovariate),
    QualityScore(QualityScoreCovariate),
    Cycle(CycleCovariate),
    Context(ContextCovariate),
    BinaryTag(BinaryTagCovariate),
}
impl StandardCovariate {
    /// Builds the covariate of the given kind from the run arguments
    pub fn from_kind(kind: CovariateKind, args: &RecalibrationArgs) -> Result<Self> {
        let covariate = match kind {
            CovariateKind::ReadGroup => Self::ReadGroup(ReadGroupCovariate::new()),
            CovariateKind::QualityScore => Self::QualityScore(QualityScoreCovariate::new(
                args.mismatches_default_quality,
                args.insertions_default_quality,
                args.deletions_default_quality,
            )),
            CovariateKind::Cycle => Self::Cycle(CycleCovariate::new(args.maximum_cycle_value)?),
            CovariateKind::Context => Self::Context(ContextCovariate::new(
                args.mismatches_context_size,
                args.indels_context_size,
                args.low_quality_tail,
            )?),
            CovariateKind::BinaryTag => {
                let Some(tag) = &args.binary_tag_name else {
                    return Err(ConfigError::MissingBinaryTag.into());
                };
                Self::BinaryTag(BinaryTagCovariate::new(tag.clone()))
            }
        };
        Ok(covariate)
    }

    /// Maps a key produced by `source` (a covariate of another run) into this
    /// covariate's key space
    ///
    /// Read group identifiers are translated by name; every other kind shares
    /// its key space across runs.
    #[must_use]
    pub fn translate_key(&self, source: &Self, key: u64) -> Option<u64> {
        let translated = match (self, source) {
            (Self::ReadGroup(target), Self::ReadGroup(source)) => {
                let name = source.name_of(key)?;
                target.id_for(&name)?
            }
            _ if self.kind() == source.kind() => key,
            _ => return None,
        };
        (translated <= self.maximum_key_value()).then_some(translated)
    }

    /// The read group covariate, if this is one
    #[must_use]
    pub fn as_read_group(&self) -> Option<&ReadGroupCovariate> {
        match self {
            Self::ReadGroup(covariate) => Some(covariate),
            _ => None,
        }
    }
}
impl Covariate for StandardCovariate {
    fn kind(&self) -> CovariateKind {
        match self {
            Self::ReadGroup(c) => c.kind(),
            Self::QualityScore(c) => c.kind(),
            Self::Cycle(c) => c.kind(),
            Self::Context(c) => c.kind(),
            Self::BinaryTag(c) => c.kind(),
        }
    }

    fn record_values<R: RecalRead + ?Sized>(
        &self,
        read: &R,
        values: &mut ReadCovariates,
        index: usize,
    ) {
        match self {
            Self::ReadGroup(c) => c.record_values(read, values, index),
            Self::QualityScore(c) => c.record_values(read, values, index),
            Self::Cycle(c) => c.record_values(read, values, index),
            Self::Context(c) => c.record_values(read, values, index),
            Self::BinaryTag(c) => c.record_values(read, values, index),
        }
    }

    fn maximum_key_value(&self) -> u64 {
        match self {
            Self::ReadGroup(c) => c.maximum_key_value(),
            Self::QualityScore(c) => c.maximum_key_value(),
            Self::Cycle(c) => c.maximum_key_value(),
            Self::Context(c) => c.maximum_key_value(),
            Self::BinaryTag(c) => c.maximum_key_value(),
        }
    }

    fn format_key(&self, key: u64) -> String {
        match self {
            Self::ReadGroup(c) => c.format_key(key),
            Self::QualityScore(c) => c.format_key(key),
            Self::Cycle(c) => c.format_key(key),
            Self::Context(c) => c.format_key(key),
            Self::BinaryTag(c) => c.format_key(key),
        }
    }

    fn key_from_value(&self, value: &str) -> Option<u64> {
        match self {
            Self::ReadGroup(c) => c.key_from_value(value),
            Self::QualityScore(c) => c.key_from_value(value),
            Self::Cycle(c) => c.key_from_value(value),
            Self::Context(c) => c.key_from_value(value),
            Self::BinaryTag(c) => c.key_from_value(value),
        }
    }
}

/// Per-read buffer of covariate values, indexed by offset, event type and
/// covariate column
///
/// The buffer is reused across reads by the engine's workers.
#[derive(Clone, Debug, Default)]
pub struct ReadCovariates {
    values: Vec<Option<u64>>,
    num_covariates: usize,
    len: usize,
}
impl ReadCovariates {
    #[must_use]
    pub fn new(len: usize, num_covariates: usize) -> Self {
        let mut buffer = Self::default();
        buffer.reset(len, num_covariates);
        buffer
    }

    /// Clears the buffer and resizes it for a read of `len` bases
    pub fn reset(&mut self, len: usize, num_covariates: usize) {
        self.len = len;
        self.num_covariates = num_covariates;
        self.values.clear();
        self.values
            .resize(len * EventType::COUNT * num_covariates, None);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    fn position(&self, offset: usize, event: EventType, index: usize) -> usize {
        (offset * EventType::COUNT + event.index()) * self.num_covariates + index
    }

    /// Records the values of covariate column `index` at `offset` for all three events
    #[inline]
    pub fn add_covariate(
        &mut self,
        offset: usize,
        index: usize,
        substitution: Option<u64>,
        insertion: Option<u64>,
        deletion: Option<u64>,
    ) {
        for (event, value) in EventType::ALL
            .into_iter()
            .zip([substitution, insertion, deletion])
        {
            let pos = self.position(offset, event, index);
            self.values[pos] = value;
        }
    }

    /// All covariate values of one base and event, in column order
    #[inline]
    #[must_use]
    pub fn values(&self, offset: usize, event: EventType) -> &[Option<u64>] {
        let start = self.position(offset, event, 0);
        &self.values[start..start + self.num_covariates]
    }
}
