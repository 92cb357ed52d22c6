use std::fmt;
use std::str::FromStr;

use auto_impl::auto_impl;

use crate::error::{ConfigError, ObservationError, Result};
use crate::event::EventType;

/// How a sequencing platform advances its cycle counter
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CycleClass {
    /// One cycle per base
    Discrete,
    /// One cycle per TACG nucleotide flow
    Flow,
}

/// Sequencing platforms with known cycle semantics
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Platform {
    Illumina,
    Solid,
    PacBio,
    CompleteGenomics,
    Ls454,
    IonTorrent,
}
impl Platform {
    #[must_use]
    pub fn cycle_class(self) -> CycleClass {
        match self {
            Self::Illumina | Self::Solid | Self::PacBio | Self::CompleteGenomics => {
                CycleClass::Discrete
            }
            Self::Ls454 | Self::IonTorrent => CycleClass::Flow,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Illumina => "ILLUMINA",
            Self::Solid => "SOLID",
            Self::PacBio => "PACBIO",
            Self::CompleteGenomics => "COMPLETE",
            Self::Ls454 => "LS454",
            Self::IonTorrent => "IONTORRENT",
        }
    }
}
impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
impl FromStr for Platform {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        match upper.as_str() {
            "ILLUMINA" | "SLX" | "SOLEXA" => Ok(Self::Illumina),
            "SOLID" | "ABI_SOLID" => Ok(Self::Solid),
            "PACBIO" => Ok(Self::PacBio),
            "COMPLETE" | "COMPLETEGENOMICS" | "COMPLETE_GENOMICS" => Ok(Self::CompleteGenomics),
            "454" | "LS454" => Ok(Self::Ls454),
            "IONTORRENT" | "ION_TORRENT" => Ok(Self::IonTorrent),
            _ => Err(ConfigError::UnknownPlatform(s.to_string())),
        }
    }
}

/// Read-level information the covariates are evaluated over
///
/// Bases and qualities are stored in sequencing-instrument order as aligned,
/// i.e. reverse complemented for negative strand reads, the way aligned records
/// store them.
#[auto_impl(&, Box, Arc)]
pub trait RecalRead {
    /// Name of the read group this read belongs to
    fn read_group(&self) -> &str;

    /// Sequencing platform of the read, if known
    fn platform(&self) -> Option<Platform>;

    /// The read bases (ASCII)
    fn bases(&self) -> &[u8];

    /// The base (substitution) qualities
    fn base_qualities(&self) -> &[u8];

    /// The insertion qualities, if the read carries a dedicated track
    fn insertion_qualities(&self) -> Option<&[u8]> {
        None
    }

    /// The deletion qualities, if the read carries a dedicated track
    fn deletion_qualities(&self) -> Option<&[u8]> {
        None
    }

    fn is_negative_strand(&self) -> bool;

    fn is_second_of_pair(&self) -> bool;

    /// Per-base values of the named binary tag, if present
    #[allow(unused_variables)]
    fn binary_tag(&self, name: &str) -> Option<&[u8]> {
        None
    }

    fn len(&self) -> usize {
        self.bases().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A read together with the upstream decisions of which bases count and how
/// strongly each base is an error
#[auto_impl(&, Box, Arc)]
pub trait RecalObservation: RecalRead {
    /// Whether the base at `offset` is excluded from accumulation
    fn is_skipped(&self, offset: usize) -> bool;

    /// Fractional error weight in `[0, 1]` for the event at `offset`
    fn error_weight(&self, event: EventType, offset: usize) -> f64;
}

/// A read seen under the platform chosen by the run arguments
pub(crate) struct ResolvedRead<'a, R: ?Sized> {
    read: &'a R,
    platform: Option<Platform>,
}
impl<'a, R: RecalRead + ?Sized> ResolvedRead<'a, R> {
    pub(crate) fn new(read: &'a R, platform: Option<Platform>) -> Self {
        Self { read, platform }
    }
}
impl<R: RecalRead + ?Sized> RecalRead for ResolvedRead<'_, R> {
    fn read_group(&self) -> &str {
        self.read.read_group()
    }
    fn platform(&self) -> Option<Platform> {
        self.platform
    }
    fn bases(&self) -> &[u8] {
        self.read.bases()
    }
    fn base_qualities(&self) -> &[u8] {
        self.read.base_qualities()
    }
    fn insertion_qualities(&self) -> Option<&[u8]> {
        self.read.insertion_qualities()
    }
    fn deletion_qualities(&self) -> Option<&[u8]> {
        self.read.deletion_qualities()
    }
    fn is_negative_strand(&self) -> bool {
        self.read.is_negative_strand()
    }
    fn is_second_of_pair(&self) -> bool {
        self.read.is_second_of_pair()
    }
    fn binary_tag(&self, name: &str) -> Option<&[u8]> {
        self.read.binary_tag(name)
    }
    fn len(&self) -> usize {
        self.read.len()
    }
}

/// Owned read observation fed to the recalibration engine
#[derive(Clone, Debug, PartialEq)]
pub struct ReadObservation {
    read_group: String,
    platform: Option<Platform>,
    bases: Vec<u8>,
    quals: Vec<u8>,
    ins_quals: Option<Vec<u8>>,
    del_quals: Option<Vec<u8>>,
    negative_strand: bool,
    second_of_pair: bool,
    binary_tag: Option<(String, Vec<u8>)>,
    skips: Vec<bool>,
    errors: [Vec<f64>; EventType::COUNT],
}
impl ReadObservation {
    /// Starts building an observation for the given read group, bases and qualities
    pub fn builder(
        read_group: impl Into<String>,
        bases: impl Into<Vec<u8>>,
        quals: impl Into<Vec<u8>>,
    ) -> ReadObservationBuilder {
        ReadObservationBuilder::new(read_group, bases, quals)
    }

    /// Replaces the platform of the read
    pub fn set_platform(&mut self, platform: Option<Platform>) {
        self.platform = platform;
    }

    /// Number of bases excluded from accumulation
    #[must_use]
    pub fn num_skipped(&self) -> usize {
        self.skips.iter().filter(|skip| **skip).count()
    }
}
impl RecalRead for ReadObservation {
    fn read_group(&self) -> &str {
        &self.read_group
    }
    fn platform(&self) -> Option<Platform> {
        self.platform
    }
    fn bases(&self) -> &[u8] {
        &self.bases
    }
    fn base_qualities(&self) -> &[u8] {
        &self.quals
    }
    fn insertion_qualities(&self) -> Option<&[u8]> {
        self.ins_quals.as_deref()
    }
    fn deletion_qualities(&self) -> Option<&[u8]> {
        self.del_quals.as_deref()
    }
    fn is_negative_strand(&self) -> bool {
        self.negative_strand
    }
    fn is_second_of_pair(&self) -> bool {
        self.second_of_pair
    }
    fn binary_tag(&self, name: &str) -> Option<&[u8]> {
        match &self.binary_tag {
            Some((tag, values)) if tag == name => Some(values),
            _ => None,
        }
    }
}
impl RecalObservation for ReadObservation {
    fn is_skipped(&self, offset: usize) -> bool {
        self.skips[offset]
    }
    fn error_weight(&self, event: EventType, offset: usize) -> f64 {
        self.errors[event.index()][offset]
    }
}

/// Builder for [`ReadObservation`]
///
/// Missing skip flags default to "not skipped" and missing error arrays default
/// to "no errors". All per-base arrays are validated against the read length in
/// [`ReadObservationBuilder::build`].
#[derive(Clone, Debug)]
pub struct ReadObservationBuilder {
    read_group: String,
    platform: Option<Platform>,
    bases: Vec<u8>,
    quals: Vec<u8>,
    ins_quals: Option<Vec<u8>>,
    del_quals: Option<Vec<u8>>,
    negative_strand: bool,
    second_of_pair: bool,
    binary_tag: Option<(String, Vec<u8>)>,
    skips: Option<Vec<bool>>,
    errors: [Option<Vec<f64>>; EventType::COUNT],
}
impl ReadObservationBuilder {
    pub fn new(
        read_group: impl Into<String>,
        bases: impl Into<Vec<u8>>,
        quals: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            read_group: read_group.into(),
            platform: None,
            bases: bases.into(),
            quals: quals.into(),
            ins_quals: None,
            del_quals: None,
            negative_strand: false,
            second_of_pair: false,
            binary_tag: None,
            skips: None,
            errors: [None, None, None],
        }
    }

    #[must_use]
    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    #[must_use]
    pub fn insertion_qualities(mut self, quals: impl Into<Vec<u8>>) -> Self {
        self.ins_quals = Some(quals.into());
        self
    }

    #[must_use]
    pub fn deletion_qualities(mut self, quals: impl Into<Vec<u8>>) -> Self {
        self.del_quals = Some(quals.into());
        self
    }

    #[must_use]
    pub fn negative_strand(mut self, negative_strand: bool) -> Self {
        self.negative_strand = negative_strand;
        self
    }

    #[must_use]
    pub fn second_of_pair(mut self, second_of_pair: bool) -> Self {
        self.second_of_pair = second_of_pair;
        self
    }

    #[must_use]
    pub fn binary_tag(mut self, name: impl Into<String>, values: impl Into<Vec<u8>>) -> Self {
        self.binary_tag = Some((name.into(), values.into()));
        self
    }

    #[must_use]
    pub fn skips(mut self, skips: impl Into<Vec<bool>>) -> Self {
        self.skips = Some(skips.into());
        self
    }

    /// Marks every base of the read as skipped
    #[must_use]
    pub fn skip_all(mut self) -> Self {
        self.skips = Some(vec![true; self.bases.len()]);
        self
    }

    /// Sets the fractional error weights of one event type
    #[must_use]
    pub fn errors(mut self, event: EventType, weights: impl Into<Vec<f64>>) -> Self {
        self.errors[event.index()] = Some(weights.into());
        self
    }

    /// Sets the substitution error weights from mismatch flags
    #[must_use]
    pub fn mismatches(self, mismatches: &[bool]) -> Self {
        let weights: Vec<f64> = mismatches
            .iter()
            .map(|is_error| if *is_error { 1.0 } else { 0.0 })
            .collect();
        self.errors(EventType::Substitution, weights)
    }

    /// Validates the per-base arrays and builds the observation
    pub fn build(self) -> Result<ReadObservation> {
        let len = self.bases.len();
        if len == 0 {
            return Err(ObservationError::EmptyRead.into());
        }
        check_len("quals", len, self.quals.len())?;
        if let Some(quals) = &self.ins_quals {
            check_len("insertion quals", len, quals.len())?;
        }
        if let Some(quals) = &self.del_quals {
            check_len("deletion quals", len, quals.len())?;
        }
        if let Some((_, values)) = &self.binary_tag {
            check_len("binary tag", len, values.len())?;
        }
        let skips = match self.skips {
            Some(skips) => {
                check_len("skips", len, skips.len())?;
                skips
            }
            None => vec![false; len],
        };

        let [sub, ins, del] = self.errors;
        let errors = [
            validate_errors("substitution errors", len, sub)?,
            validate_errors("insertion errors", len, ins)?,
            validate_errors("deletion errors", len, del)?,
        ];

        Ok(ReadObservation {
            read_group: self.read_group,
            platform: self.platform,
            bases: self.bases,
            quals: self.quals,
            ins_quals: self.ins_quals,
            del_quals: self.del_quals,
            negative_strand: self.negative_strand,
            second_of_pair: self.second_of_pair,
            binary_tag: self.binary_tag,
            skips,
            errors,
        })
    }
}

fn check_len(field: &'static str, expected: usize, found: usize) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(ObservationError::LengthMismatch {
            field,
            expected,
            found,
        }
        .into())
    }
}

fn validate_errors(field: &'static str, len: usize, weights: Option<Vec<f64>>) -> Result<Vec<f64>> {
    let Some(weights) = weights else {
        return Ok(vec![0.0; len]);
    };
    check_len(field, len, weights.len())?;
    if let Some((offset, value)) = weights
        .iter()
        .enumerate()
        .find(|(_, w)| !(0.0..=1.0).contains(*w))
    {
        return Err(ObservationError::InvalidErrorWeight {
            field,
            offset,
            value: *value,
        }
        .into());
    }
    Ok(weights)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::Error;

    fn observation() -> ReadObservation {
        ReadObservation::builder("rg1", b"ACGT".to_vec(), vec![30, 30, 20, 10])
            .platform(Platform::Illumina)
            .mismatches(&[false, true, false, false])
            .build()
            .unwrap()
    }

    // ==================== Platform Tests ====================

    #[test]
    fn test_platform_from_str() {
        assert_eq!("illumina".parse::<Platform>().unwrap(), Platform::Illumina);
        assert_eq!("SLX".parse::<Platform>().unwrap(), Platform::Illumina);
        assert_eq!("454".parse::<Platform>().unwrap(), Platform::Ls454);
        assert_eq!("ion_torrent".parse::<Platform>().unwrap(), Platform::IonTorrent);
        assert!("nanopore".parse::<Platform>().is_err());
    }

    #[test]
    fn test_cycle_class() {
        assert_eq!(Platform::PacBio.cycle_class(), CycleClass::Discrete);
        assert_eq!(Platform::IonTorrent.cycle_class(), CycleClass::Flow);
    }

    // ==================== Builder Tests ====================

    #[test]
    fn test_builder_defaults() {
        let obs = observation();
        assert_eq!(obs.len(), 4);
        assert_eq!(obs.read_group(), "rg1");
        assert_eq!(obs.num_skipped(), 0);
        assert!(obs.insertion_qualities().is_none());
        assert_eq!(obs.error_weight(EventType::Substitution, 1), 1.0);
        assert_eq!(obs.error_weight(EventType::Insertion, 1), 0.0);
    }

    #[test]
    fn test_builder_length_mismatch() {
        let result = ReadObservation::builder("rg1", b"ACGT".to_vec(), vec![30, 30]).build();
        assert!(matches!(
            result,
            Err(Error::ObservationError(ObservationError::LengthMismatch {
                field: "quals",
                expected: 4,
                found: 2
            }))
        ));
    }

    #[test]
    fn test_builder_empty_read() {
        let result = ReadObservation::builder("rg1", Vec::new(), Vec::new()).build();
        assert!(matches!(
            result,
            Err(Error::ObservationError(ObservationError::EmptyRead))
        ));
    }

    #[test]
    fn test_builder_invalid_error_weight() {
        let result = ReadObservation::builder("rg1", b"AC".to_vec(), vec![30, 30])
            .errors(EventType::Deletion, vec![0.0, 1.5])
            .build();
        assert!(matches!(
            result,
            Err(Error::ObservationError(ObservationError::InvalidErrorWeight { offset: 1, .. }))
        ));
    }

    #[test]
    fn test_builder_skip_all() {
        let obs = ReadObservation::builder("rg1", b"ACGT".to_vec(), vec![30; 4])
            .skip_all()
            .build()
            .unwrap();
        assert_eq!(obs.num_skipped(), 4);
        assert!(obs.is_skipped(3));
    }

    #[test]
    fn test_binary_tag_lookup() {
        let obs = ReadObservation::builder("rg1", b"AC".to_vec(), vec![30, 30])
            .binary_tag("XT", vec![0, 1])
            .build()
            .unwrap();
        assert_eq!(obs.binary_tag("XT"), Some(&[0u8, 1][..]));
        assert_eq!(obs.binary_tag("YT"), None);
    }

    // ==================== auto_impl Tests ====================

    fn total_len<R: RecalObservation>(read: R) -> usize {
        read.len()
    }

    #[test]
    fn test_auto_impl_wrappers() {
        let obs = observation();
        assert_eq!(total_len(&obs), 4);
        assert_eq!(total_len(Box::new(obs.clone())), 4);
        assert_eq!(total_len(Arc::new(obs)), 4);
    }
}
