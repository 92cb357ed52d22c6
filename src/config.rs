//! Run arguments of a recalibration and resolution of the covariate list
//!
//! [`RecalibrationArgs`] follows the builder style: every setter consumes and
//! returns the arguments so a configuration reads as one expression.
//!
//! ```rust
//! use bqsr::{CovariateKind, RecalibrationArgs};
//!
//! let args = RecalibrationArgs::default()
//!     .use_standard_covariates(false)
//!     .covariates(["CycleCovariate"])
//!     .quantizing_levels(8);
//!
//! let (required, optional) = args.resolve_covariates().unwrap();
//! assert_eq!(required, vec![CovariateKind::ReadGroup, CovariateKind::QualityScore]);
//! assert_eq!(optional, vec![CovariateKind::Cycle]);
//! ```

use std::sync::Arc;

use crate::covariate::{
    CovariateKind, StandardCovariate, DEFAULT_INDELS_CONTEXT_SIZE, DEFAULT_LOW_QUALITY_TAIL,
    DEFAULT_MAXIMUM_CYCLE, DEFAULT_MISMATCHES_CONTEXT_SIZE,
};
use crate::error::{ConfigError, Result};
use crate::parallel::resolve_threads;
use crate::quality::DEFAULT_INDEL_QUALITY;
use crate::read::Platform;

/// Default number of quantization levels
pub const DEFAULT_QUANTIZING_LEVELS: usize = 16;

/// Qualities below this are left untouched when the model is applied
pub const DEFAULT_PRESERVE_QSCORES_LESS_THAN: u8 = 6;

/// Arguments that shape the covariates, the tables and the model application
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecalibrationArgs {
    /// Optional covariates requested by name
    pub covariates: Vec<String>,
    /// Whether the standard optional covariates (Cycle, Context) are included
    pub use_standard_covariates: bool,
    pub mismatches_context_size: usize,
    pub indels_context_size: usize,
    pub maximum_cycle_value: usize,
    /// Replaces every substitution quality when set
    pub mismatches_default_quality: Option<u8>,
    pub insertions_default_quality: u8,
    pub deletions_default_quality: u8,
    /// Read-end bases below this quality are masked out of contexts
    pub low_quality_tail: u8,
    pub quantizing_levels: usize,
    pub binary_tag_name: Option<String>,
    /// Platform for reads that carry none
    pub default_platform: Option<Platform>,
    /// Platform applied to every read regardless of its own
    pub force_platform: Option<Platform>,
    pub preserve_qscores_less_than: u8,
    /// Worker threads for parallel accumulation (0 = all cores)
    pub num_threads: usize,
}
impl Default for RecalibrationArgs {
    fn default() -> Self {
        Self {
            covariates: Vec::new(),
            use_standard_covariates: true,
            mismatches_context_size: DEFAULT_MISMATCHES_CONTEXT_SIZE,
            indels_context_size: DEFAULT_INDELS_CONTEXT_SIZE,
            maximum_cycle_value: DEFAULT_MAXIMUM_CYCLE,
            mismatches_default_quality: None,
            insertions_default_quality: DEFAULT_INDEL_QUALITY,
            deletions_default_quality: DEFAULT_INDEL_QUALITY,
            low_quality_tail: DEFAULT_LOW_QUALITY_TAIL,
            quantizing_levels: DEFAULT_QUANTIZING_LEVELS,
            binary_tag_name: None,
            default_platform: None,
            force_platform: None,
            preserve_qscores_less_than: DEFAULT_PRESERVE_QSCORES_LESS_THAN,
            num_threads: 0,
        }
    }
}

/// Builder-style setters
impl RecalibrationArgs {
    #[must_use]
    pub fn covariates<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.covariates = names.into_iter().map(Into::into).collect();
        self
    }
    #[must_use]
    pub fn use_standard_covariates(mut self, value: bool) -> Self {
        self.use_standard_covariates = value;
        self
    }
    #[must_use]
    pub fn mismatches_context_size(mut self, size: usize) -> Self {
        self.mismatches_context_size = size;
        self
    }
    #[must_use]
    pub fn indels_context_size(mut self, size: usize) -> Self {
        self.indels_context_size = size;
        self
    }
    #[must_use]
    pub fn maximum_cycle_value(mut self, value: usize) -> Self {
        self.maximum_cycle_value = value;
        self
    }
    #[must_use]
    pub fn mismatches_default_quality(mut self, qual: Option<u8>) -> Self {
        self.mismatches_default_quality = qual;
        self
    }
    #[must_use]
    pub fn insertions_default_quality(mut self, qual: u8) -> Self {
        self.insertions_default_quality = qual;
        self
    }
    #[must_use]
    pub fn deletions_default_quality(mut self, qual: u8) -> Self {
        self.deletions_default_quality = qual;
        self
    }
    #[must_use]
    pub fn low_quality_tail(mut self, qual: u8) -> Self {
        self.low_quality_tail = qual;
        self
    }
    #[must_use]
    pub fn quantizing_levels(mut self, levels: usize) -> Self {
        self.quantizing_levels = levels;
        self
    }
    #[must_use]
    pub fn binary_tag_name(mut self, tag: impl Into<String>) -> Self {
        self.binary_tag_name = Some(tag.into());
        self
    }
    #[must_use]
    pub fn default_platform(mut self, platform: Platform) -> Self {
        self.default_platform = Some(platform);
        self
    }
    #[must_use]
    pub fn force_platform(mut self, platform: Platform) -> Self {
        self.force_platform = Some(platform);
        self
    }
    #[must_use]
    pub fn preserve_qscores_less_than(mut self, qual: u8) -> Self {
        self.preserve_qscores_less_than = qual;
        self
    }
    #[must_use]
    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }
}

impl RecalibrationArgs {
    /// Resolves the required and optional covariate kinds of the run
    ///
    /// Required covariates are always `ReadGroup` then `QualityScore`. The
    /// optional list holds the standard covariates (if enabled) followed by the
    /// requested ones, in request order.
    ///
    /// # Errors
    /// * [`ConfigError::UnknownCovariate`] for an unrecognized name
    /// * [`ConfigError::DuplicateCovariate`] for a covariate requested twice or
    ///   a required covariate requested explicitly
    pub fn resolve_covariates(&self) -> Result<(Vec<CovariateKind>, Vec<CovariateKind>)> {
        let required = CovariateKind::REQUIRED.to_vec();
        let mut optional: Vec<CovariateKind> = if self.use_standard_covariates {
            CovariateKind::STANDARD.to_vec()
        } else {
            Vec::new()
        };

        let mut requested = Vec::with_capacity(self.covariates.len());
        for name in &self.covariates {
            let kind: CovariateKind = name.parse()?;
            if kind.is_required() || requested.contains(&kind) {
                return Err(ConfigError::DuplicateCovariate(kind).into());
            }
            requested.push(kind);
            // standard covariates may be named again explicitly
            if !optional.contains(&kind) {
                optional.push(kind);
            }
        }
        Ok((required, optional))
    }

    /// Builds the covariate instances of the run, required first
    pub fn build_covariates(
        &self,
    ) -> Result<(Vec<Arc<StandardCovariate>>, Vec<Arc<StandardCovariate>>)> {
        let (required, optional) = self.resolve_covariates()?;
        let build = |kinds: Vec<CovariateKind>| -> Result<Vec<Arc<StandardCovariate>>> {
            kinds
                .into_iter()
                .map(|kind| StandardCovariate::from_kind(kind, self).map(Arc::new))
                .collect()
        };
        Ok((build(required)?, build(optional)?))
    }

    /// The platform a read is evaluated under
    #[must_use]
    pub fn resolve_platform(&self, read_platform: Option<Platform>) -> Option<Platform> {
        self.force_platform
            .or(read_platform)
            .or(self.default_platform)
    }

    /// Number of worker threads to use
    #[must_use]
    pub fn threads(&self) -> usize {
        resolve_threads(self.num_threads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_defaults() {
        let args = RecalibrationArgs::default();
        assert_eq!(args.mismatches_context_size, 2);
        assert_eq!(args.indels_context_size, 3);
        assert_eq!(args.maximum_cycle_value, 500);
        assert_eq!(args.mismatches_default_quality, None);
        assert_eq!(args.insertions_default_quality, 45);
        assert_eq!(args.deletions_default_quality, 45);
        assert_eq!(args.low_quality_tail, 2);
        assert_eq!(args.quantizing_levels, 16);
        assert_eq!(args.preserve_qscores_less_than, 6);
    }

    // ==================== Covariate resolution Tests ====================

    #[test]
    fn test_resolve_standard() {
        let (required, optional) = RecalibrationArgs::default().resolve_covariates().unwrap();
        assert_eq!(
            required,
            vec![CovariateKind::ReadGroup, CovariateKind::QualityScore]
        );
        assert_eq!(optional, vec![CovariateKind::Cycle, CovariateKind::Context]);
    }

    #[test]
    fn test_resolve_with_extra() {
        let args = RecalibrationArgs::default()
            .covariates(["BinaryTag"])
            .binary_tag_name("XB");
        let (_, optional) = args.resolve_covariates().unwrap();
        assert_eq!(
            optional,
            vec![
                CovariateKind::Cycle,
                CovariateKind::Context,
                CovariateKind::BinaryTag
            ]
        );
    }

    #[test]
    fn test_resolve_standard_named_again() {
        let args = RecalibrationArgs::default().covariates(["ContextCovariate"]);
        let (_, optional) = args.resolve_covariates().unwrap();
        assert_eq!(optional, vec![CovariateKind::Cycle, CovariateKind::Context]);
    }

    #[test]
    fn test_resolve_no_optional() {
        let args = RecalibrationArgs::default().use_standard_covariates(false);
        let (_, optional) = args.resolve_covariates().unwrap();
        assert!(optional.is_empty());
    }

    #[test]
    fn test_resolve_duplicate_required() {
        let args = RecalibrationArgs::default().covariates(["QualityScoreCovariate"]);
        assert!(matches!(
            args.resolve_covariates(),
            Err(Error::ConfigError(ConfigError::DuplicateCovariate(
                CovariateKind::QualityScore
            )))
        ));
    }

    #[test]
    fn test_resolve_duplicate_optional() {
        let args = RecalibrationArgs::default()
            .use_standard_covariates(false)
            .covariates(["Cycle", "cycle"]);
        assert!(matches!(
            args.resolve_covariates(),
            Err(Error::ConfigError(ConfigError::DuplicateCovariate(
                CovariateKind::Cycle
            )))
        ));
    }

    #[test]
    fn test_resolve_unknown() {
        let args = RecalibrationArgs::default().covariates(["Dinuc"]);
        assert!(matches!(
            args.resolve_covariates(),
            Err(Error::ConfigError(ConfigError::UnknownCovariate(_)))
        ));
    }

    #[test]
    fn test_build_binary_tag_without_name() {
        let args = RecalibrationArgs::default().covariates(["BinaryTag"]);
        assert!(matches!(
            args.build_covariates(),
            Err(Error::ConfigError(ConfigError::MissingBinaryTag))
        ));
    }

    // ==================== Platform Tests ====================

    #[test]
    fn test_resolve_platform() {
        let args = RecalibrationArgs::default().default_platform(Platform::Illumina);
        assert_eq!(args.resolve_platform(None), Some(Platform::Illumina));
        assert_eq!(
            args.resolve_platform(Some(Platform::Ls454)),
            Some(Platform::Ls454)
        );

        let forced = args.force_platform(Platform::PacBio);
        assert_eq!(
            forced.resolve_platform(Some(Platform::Ls454)),
            Some(Platform::PacBio)
        );
    }

    #[test]
    fn test_threads() {
        let args = RecalibrationArgs::default();
        assert_eq!(args.threads(), num_cpus::get());
        assert_eq!(args.num_threads(1).threads(), 1);
    }
}
