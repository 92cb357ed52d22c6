use std::error::Error as StdError;

use crate::covariate::CovariateKind;

/// Custom Result type for recalibration operations, wrapping the custom [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the bqsr library, encompassing all possible error cases
/// that can occur while building, merging, persisting, or applying recalibration tables.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Errors in the covariate configuration (fatal at construction time)
    #[error("Error in recalibration configuration: {0}")]
    ConfigError(#[from] ConfigError),

    /// Errors raised while combining independently built tables
    #[error("Error merging recalibration tables: {0}")]
    MergeError(#[from] MergeError),

    /// Errors raised while reading or writing a recalibration report
    #[error("Error processing report: {0}")]
    ReportError(#[from] ReportError),

    /// Errors raised while building a read observation
    #[error("Error building observation: {0}")]
    ObservationError(#[from] ObservationError),

    /// Standard I/O errors
    #[error("Error with IO: {0}")]
    IoError(#[from] std::io::Error),

    /// UTF-8 conversion errors
    #[error("Error with UTF8: {0}")]
    Utf8Error(#[from] std::string::FromUtf8Error),

    /// Errors from the bitnuc dependency for nucleotide encoding/decoding
    #[error("Bitnuc error: {0}")]
    BitnucError(#[from] bitnuc::NucleotideError),

    /// Generic errors for other unexpected situations
    #[error("Generic error: {0}")]
    GenericError(#[from] Box<dyn StdError + Send + Sync>),
}
impl Error {
    /// Checks if the error is a merge incompatibility
    ///
    /// Batch-merge tooling uses this to report which shard could not be folded in
    /// without aborting on unrelated failures.
    #[must_use]
    pub fn is_merge_incompatibility(&self) -> bool {
        matches!(self, Self::MergeError(_))
    }

    /// Checks if the error was raised while resolving the covariate configuration
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::ConfigError(_))
    }
}

/// Errors in the requested covariate configuration
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The packed key would need more than 64 bits
    ///
    /// # Arguments
    /// * `usize` - The number of bits the layout requires
    #[error("Covariate key layout requires {0} bits but keys are limited to 64 bits")]
    BitBudgetExceeded(usize),

    /// The requested covariate name does not match any known covariate
    #[error(
        "The requested covariate type ({0}) isn't a valid covariate option. Options are: ReadGroup, QualityScore, Cycle, Context, BinaryTag"
    )]
    UnknownCovariate(String),

    /// A covariate was requested more than once (or a required covariate was requested again)
    #[error("Covariate {0} was requested more than once")]
    DuplicateCovariate(CovariateKind),

    /// The binary tag covariate was requested without naming the tag
    #[error("The BinaryTag covariate requires a binary tag name")]
    MissingBinaryTag,

    /// Context sizes must fit within the key budget of the context covariate
    #[error("Invalid context size: {0} - expecting [1,13]")]
    InvalidContextSize(usize),

    /// The cycle limit must be positive
    #[error("Invalid maximum cycle value: {0}")]
    InvalidCycleLimit(usize),

    /// The platform string could not be recognized
    #[error("Unknown sequencing platform: {0}")]
    UnknownPlatform(String),

    /// The event type string could not be recognized
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),
}

/// Errors raised when combining independently accumulated tables
#[derive(thiserror::Error, Debug)]
pub enum MergeError {
    /// The two table hierarchies hold a different number of tables
    #[error("Cannot merge tables: expected {expected} tables but found {found}")]
    TableCountMismatch { expected: usize, found: usize },

    /// The codecs of a table position are not structurally equivalent
    #[error("Incompatible covariates in table {table}: expected ({expected}) found ({found})")]
    IncompatibleCodecs {
        table: usize,
        expected: String,
        found: String,
    },

    /// A key of the incoming tables is not valid for its own codec
    #[error("Key {0:#x} cannot be decoded by the codec of its table")]
    UndecodableKey(u64),

    /// A value could not be translated into the receiving codec
    #[error("Unable to translate value {value} of covariate {covariate} into the target tables")]
    UntranslatableValue { covariate: CovariateKind, value: u64 },
}

/// Errors that can occur while reading or writing a binary recalibration report
#[derive(thiserror::Error, Debug)]
pub enum ReportError {
    /// The magic bytes in the header do not match the expected value
    #[error("Invalid report magic")]
    InvalidMagic,

    /// The format version in the header is not supported
    #[error("Invalid report version: {0}")]
    UnsupportedVersion(u8),

    /// The report ended before all declared content was read
    ///
    /// # Arguments
    /// * `usize` - The number of bytes that were available
    #[error("Report is truncated - only {0} bytes available")]
    Truncated(usize),

    /// A covariate descriptor names a covariate this build does not know
    #[error("Unknown covariate kind id: {0}")]
    UnknownCovariateKind(u8),

    /// An event type index outside the known event types
    #[error("Unknown event type index: {0}")]
    UnknownEventIndex(u8),

    /// The quantization table does not cover the full quality range
    #[error("Invalid quantization table with {found} entries (expected {expected})")]
    InvalidQuantizationTable { expected: usize, found: usize },

    /// The stored covariate list differs from the one the stored arguments resolve to
    #[error("Report covariates ({found}) do not match its arguments ({expected})")]
    CovariateMismatch { expected: String, found: String },

    /// A stored key cannot be decoded with the reconstructed codec
    #[error("Stored key {key:#x} is not valid for table {table}")]
    InvalidKey { table: usize, key: u64 },
}

/// Errors that can occur while building a read observation
#[derive(thiserror::Error, Debug)]
pub enum ObservationError {
    /// A per-base array does not match the read length
    #[error("Length of {field} ({found}) does not match the read length ({expected})")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        found: usize,
    },

    /// The observation has no bases
    #[error("Observation has no bases")]
    EmptyRead,

    /// A fractional error weight outside of [0, 1]
    #[error("Error weight {value} at offset {offset} in {field} is outside [0, 1]")]
    InvalidErrorWeight {
        field: &'static str,
        offset: usize,
        value: f64,
    },
}

/// Trait for converting arbitrary errors into `Error`
pub trait IntoBqsrError {
    fn into_bqsr_error(self) -> Error;
}

// Implement conversion for Box<dyn Error>
impl<E> IntoBqsrError for E
where
    E: StdError + Send + Sync + 'static,
{
    fn into_bqsr_error(self) -> Error {
        Error::GenericError(Box::new(self))
    }
}
