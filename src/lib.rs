//! # bqsr
//!
//! Covariate-keyed base quality score recalibration tables.
//!
//! Every base of an aligned read is described by a set of covariates (read
//! group, reported quality, machine cycle, sequence context, ...). The values
//! of those covariates are packed into a single `u64` key per table, and each
//! table accumulates how often bases with that key were observed and how
//! often they were errors. The empirical error rate of each cell then
//! replaces the quality the instrument reported.
//!
//! ## Overview
//!
//! * [`RecalibrationArgs`] resolves which covariates a run uses
//! * [`KeyCodec`] packs covariate values into table keys
//! * [`RecalibrationEngine`] accumulates [`ReadObservation`]s into shared
//!   [`RecalibrationTables`], from any number of threads
//! * [`RecalibrationTables::merge`] and [`RecalibrationReport::gather`] fold
//!   independently accumulated shards together in any order
//! * [`QuantizationInfo`] collapses the empirical qualities into a few levels
//! * [`RecalibrationReport`] persists a finished run and
//!   [`BaseRecalibration`] applies it to new reads
//!
//! ## Example
//!
//! ```rust
//! use bqsr::{EventType, Platform, ReadObservation, RecalibrationArgs, RecalibrationEngine};
//!
//! let engine = RecalibrationEngine::new(RecalibrationArgs::default()).unwrap();
//!
//! let observation = ReadObservation::builder("lane1", b"ACGTACGTAC".to_vec(), vec![30; 10])
//!     .platform(Platform::Illumina)
//!     .mismatches(&[false, false, true, false, false, false, false, false, false, false])
//!     .build()
//!     .unwrap();
//! engine.update(&observation);
//!
//! let datum = engine
//!     .tables()
//!     .get_by_values(0, &["lane1"], EventType::Substitution, None)
//!     .unwrap();
//! assert_eq!(datum.observations(), 10);
//! assert_eq!(datum.errors(), 1.0);
//!
//! let (_tables, quantization) = engine.finalize();
//! assert_eq!(quantization.quantized().len(), 94);
//! ```

/// Run arguments and covariate resolution
pub mod config;

/// Covariates and their per-read evaluation
pub mod covariate;

/// Accumulator cells of the tables
pub mod datum;

/// Per-read accumulation
pub mod engine;

/// Error definitions
pub mod error;

/// Event types (substitution, insertion, deletion)
pub mod event;

/// Bit layout of table keys
pub mod key;

/// Parallel accumulation driver
pub mod parallel;

/// Phred-scale quality helpers
pub mod quality;

/// Quantization of empirical qualities
pub mod quantize;

/// Read-level observation model
pub mod read;

/// Applying a model to reads
pub mod recalibrate;

/// Report persistence and gathering
pub mod report;

/// Concurrent key to cell table
pub mod table;

/// The table hierarchy of one run
pub mod tables;

pub use config::RecalibrationArgs;
pub use covariate::{Covariate, CovariateKind, ReadCovariates, StandardCovariate};
pub use datum::RecalDatum;
pub use engine::{EngineStats, RecalibrationEngine, UpdateBuffer};
pub use error::{Error, IntoBqsrError, Result};
pub use event::EventType;
pub use key::{DecodedKey, KeyCodec};
pub use parallel::{process_parallel, ObservationProcessor, ParallelRecalibrator};
pub use quantize::QuantizationInfo;
pub use read::{Platform, ReadObservation, ReadObservationBuilder, RecalObservation, RecalRead};
pub use recalibrate::{BaseRecalibration, RecalibratedQualities};
pub use report::{RecalibrationReport, ReportHeader};
pub use table::RecalTable;
pub use tables::{RecalibrationTables, TableRow};
