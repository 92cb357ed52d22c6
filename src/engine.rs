//! Per-read accumulation into a shared table hierarchy.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, info};

use crate::config::RecalibrationArgs;
use crate::covariate::{Covariate, CovariateKind, ReadCovariates, StandardCovariate};
use crate::error::Result;
use crate::event::EventType;
use crate::quantize::QuantizationInfo;
use crate::read::{RecalObservation, ResolvedRead};
use crate::report::RecalibrationReport;
use crate::tables::{RecalibrationTables, OPTIONAL_TABLE_START, QUALITY_SCORE_TABLE, READ_GROUP_TABLE};

/// Column of the read group covariate in a [`ReadCovariates`] buffer
const READ_GROUP_COLUMN: usize = 0;

/// Column of the quality score covariate in a [`ReadCovariates`] buffer
const QUALITY_COLUMN: usize = 1;

/// First optional covariate column in a [`ReadCovariates`] buffer
const OPTIONAL_COLUMN_START: usize = 2;

/// Accumulation counters of an engine
///
/// All counters are relaxed atomics; they are exact once accumulation is over.
#[derive(Debug)]
pub struct EngineStats {
    reads: AtomicU64,
    bases: AtomicU64,
    skipped_bases: AtomicU64,
    kinds: Vec<CovariateKind>,
    missing: Box<[AtomicU64]>,
}
impl EngineStats {
    fn new(kinds: Vec<CovariateKind>) -> Self {
        let missing = kinds.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            reads: AtomicU64::new(0),
            bases: AtomicU64::new(0),
            skipped_bases: AtomicU64::new(0),
            kinds,
            missing,
        }
    }

    /// Number of reads seen
    #[must_use]
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of bases accumulated
    #[must_use]
    pub fn bases(&self) -> u64 {
        self.bases.load(Ordering::Relaxed)
    }

    /// Number of bases excluded upstream
    #[must_use]
    pub fn skipped_bases(&self) -> u64 {
        self.skipped_bases.load(Ordering::Relaxed)
    }

    /// Number of (base, event) pairs for which `kind` had no value
    #[must_use]
    pub fn missing_values(&self, kind: CovariateKind) -> u64 {
        self.kinds
            .iter()
            .position(|k| *k == kind)
            .map_or(0, |column| self.missing[column].load(Ordering::Relaxed))
    }

    /// Missing value counts of every covariate, in column order
    #[must_use]
    pub fn missing(&self) -> Vec<(CovariateKind, u64)> {
        self.kinds
            .iter()
            .zip(self.missing.iter())
            .map(|(kind, count)| (*kind, count.load(Ordering::Relaxed)))
            .collect()
    }

    fn record_missing(&self, column: usize) {
        self.missing[column].fetch_add(1, Ordering::Relaxed);
    }

    fn log_summary(&self) {
        info!(
            "Accumulated {} bases from {} reads ({} bases skipped)",
            self.bases(),
            self.reads(),
            self.skipped_bases()
        );
        for (kind, count) in self.missing() {
            if count > 0 {
                info!("{kind}: {count} base events without a value");
            }
        }
    }
}

/// Reusable per-worker buffers for [`RecalibrationEngine::update_with`]
#[derive(Clone, Debug, Default)]
pub struct UpdateBuffer {
    covariates: ReadCovariates,
    present: Vec<usize>,
    keys: Vec<u64>,
}
impl UpdateBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Accumulates read observations into the recalibration tables of one run
///
/// The engine is shared by reference between workers: every method but
/// [`RecalibrationEngine::finalize`] takes `&self`.
#[derive(Debug)]
pub struct RecalibrationEngine {
    args: RecalibrationArgs,
    covariates: Vec<Arc<StandardCovariate>>,
    tables: RecalibrationTables,
    stats: EngineStats,
}
impl RecalibrationEngine {
    /// Builds an engine with empty tables
    ///
    /// # Errors
    /// Any [`crate::error::ConfigError`] raised while resolving the covariates
    /// or laying out the keys.
    pub fn new(args: RecalibrationArgs) -> Result<Self> {
        let (required, optional) = args.build_covariates()?;
        let covariates: Vec<_> = required.iter().chain(&optional).cloned().collect();
        let tables = RecalibrationTables::from_covariates(required, optional)?;
        let kinds: Vec<CovariateKind> = covariates.iter().map(|c| c.kind()).collect();
        info!(
            "Recalibrating with covariates: {}",
            kinds
                .iter()
                .map(|kind| kind.name())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(Self {
            args,
            covariates,
            tables,
            stats: EngineStats::new(kinds),
        })
    }

    #[must_use]
    pub fn args(&self) -> &RecalibrationArgs {
        &self.args
    }

    #[must_use]
    pub fn tables(&self) -> &RecalibrationTables {
        &self.tables
    }

    #[must_use]
    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Accumulates one read
    pub fn update<O: RecalObservation + ?Sized>(&self, observation: &O) {
        let mut buffer = UpdateBuffer::new();
        self.update_with(observation, &mut buffer);
    }

    /// Accumulates one read reusing the caller's buffers
    ///
    /// Every unskipped base posts one increment per event type into the read
    /// group table, the read group + quality table and each optional table
    /// for which its covariate has a value.
    pub fn update_with<O: RecalObservation + ?Sized>(
        &self,
        observation: &O,
        buffer: &mut UpdateBuffer,
    ) {
        self.stats.reads.fetch_add(1, Ordering::Relaxed);
        let len = observation.len();
        let skipped = (0..len).filter(|offset| observation.is_skipped(*offset)).count();
        self.stats
            .skipped_bases
            .fetch_add(skipped as u64, Ordering::Relaxed);
        if skipped == len {
            return;
        }

        let platform = self.args.resolve_platform(observation.platform());
        let read = ResolvedRead::new(observation, platform);
        buffer.covariates.reset(len, self.covariates.len());
        for (column, covariate) in self.covariates.iter().enumerate() {
            covariate.record_values(&read, &mut buffer.covariates, column);
        }

        let rg_codec = self.tables.codec(READ_GROUP_TABLE);
        let qual_codec = self.tables.codec(QUALITY_SCORE_TABLE);
        let full_codec = self.tables.full_codec();

        for offset in (0..len).filter(|offset| !observation.is_skipped(*offset)) {
            self.stats.bases.fetch_add(1, Ordering::Relaxed);
            for event in EventType::ALL {
                let values = buffer.covariates.values(offset, event);
                let Some(group) = values[READ_GROUP_COLUMN] else {
                    self.stats.record_missing(READ_GROUP_COLUMN);
                    continue;
                };
                let Some(qual) = values[QUALITY_COLUMN] else {
                    self.stats.record_missing(QUALITY_COLUMN);
                    continue;
                };
                let reported = qual as f64;
                let errors = observation.error_weight(event, offset);
                let required = [group, qual];

                self.tables.table(READ_GROUP_TABLE).increment_or_insert(
                    rg_codec.pack(&required[..1], event, None),
                    reported,
                    1,
                    errors,
                );
                self.tables.table(QUALITY_SCORE_TABLE).increment_or_insert(
                    qual_codec.pack(&required, event, None),
                    reported,
                    1,
                    errors,
                );

                let optional = &values[OPTIONAL_COLUMN_START..];
                if optional.is_empty() {
                    continue;
                }
                buffer.present.clear();
                for (index, value) in optional.iter().enumerate() {
                    if value.is_some() {
                        buffer.present.push(index);
                    } else {
                        self.stats.record_missing(OPTIONAL_COLUMN_START + index);
                    }
                }
                buffer.keys.clear();
                full_codec.encode_all_optional_into(&required, event, optional, &mut buffer.keys);
                for (index, key) in buffer.present.iter().zip(&buffer.keys) {
                    self.tables
                        .table(OPTIONAL_TABLE_START + index)
                        .increment_or_insert(*key, reported, 1, errors);
                }
            }
        }
    }

    /// Folds the tables of a previously written report into this engine
    ///
    /// # Errors
    /// [`crate::error::MergeError`] if the report was built with other covariates.
    pub fn merge(&self, report: &RecalibrationReport) -> Result<()> {
        debug!("Merging report tables into the engine");
        self.tables.merge(report.tables())
    }

    /// Folds another table hierarchy into this engine
    pub fn merge_tables(&self, tables: &RecalibrationTables) -> Result<()> {
        self.tables.merge(tables)
    }

    /// Ends accumulation and quantizes the empirical qualities
    #[must_use]
    pub fn finalize(self) -> (RecalibrationTables, QuantizationInfo) {
        self.stats.log_summary();
        let quantization = QuantizationInfo::new(&self.tables, self.args.quantizing_levels);
        info!(
            "Quantized empirical qualities into {} levels",
            quantization.num_distinct_levels()
        );
        (self.tables, quantization)
    }

    /// Ends accumulation and bundles the result with the run arguments
    #[must_use]
    pub fn into_report(self) -> RecalibrationReport {
        let args = self.args.clone();
        let (tables, quantization) = self.finalize();
        RecalibrationReport::new(args, quantization, tables)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::read::{Platform, ReadObservation};
    use crate::tables::TableRow;

    fn engine() -> RecalibrationEngine {
        RecalibrationEngine::new(RecalibrationArgs::default()).unwrap()
    }

    fn read(rg: &str) -> ReadObservation {
        ReadObservation::builder(rg, b"ACGTACGTAC".to_vec(), vec![30; 10])
            .platform(Platform::Illumina)
            .mismatches(&[false, false, true, false, false, false, false, false, false, false])
            .build()
            .unwrap()
    }

    fn total_observations(tables: &RecalibrationTables, table: usize) -> u64 {
        tables
            .table(table)
            .snapshot()
            .iter()
            .map(|(_, datum)| datum.observations())
            .sum()
    }

    // ==================== Accumulation Tests ====================

    #[test]
    fn test_update_reaches_every_table() {
        let engine = engine();
        engine.update(&read("rg1"));
        let tables = engine.tables();

        // one increment per base and event
        assert_eq!(total_observations(tables, READ_GROUP_TABLE), 30);
        assert_eq!(total_observations(tables, QUALITY_SCORE_TABLE), 30);

        let substitutions = tables
            .get_by_values(READ_GROUP_TABLE, &["rg1"], EventType::Substitution, None)
            .unwrap();
        assert_eq!(substitutions.observations(), 10);
        assert_eq!(substitutions.errors(), 1.0);

        let insertions = tables
            .get_by_values(QUALITY_SCORE_TABLE, &["rg1", "45"], EventType::Insertion, None)
            .unwrap();
        assert_eq!(insertions.observations(), 10);
        assert_eq!(insertions.errors(), 0.0);

        // the first base is cycle 1
        let cycle = tables
            .get_by_values(OPTIONAL_TABLE_START, &["rg1", "30"], EventType::Substitution, Some("1"))
            .unwrap();
        assert_eq!(cycle.observations(), 1);
        assert_eq!(engine.stats().reads(), 1);
        assert_eq!(engine.stats().bases(), 10);
    }

    #[test]
    fn test_missing_value_skips_only_its_table() {
        let engine = engine();
        engine.update(&read("rg1"));
        let tables = engine.tables();

        // cycle always has a value for substitutions, context misses the first base
        let cycle_subs: u64 = tables
            .rows()
            .iter()
            .filter(|row| row.table == OPTIONAL_TABLE_START && row.event == EventType::Substitution)
            .map(|row| row.observations)
            .sum();
        let context_subs: u64 = tables
            .rows()
            .iter()
            .filter(|row| {
                row.table == OPTIONAL_TABLE_START + 1 && row.event == EventType::Substitution
            })
            .map(|row| row.observations)
            .sum();
        assert_eq!(cycle_subs, 10);
        assert_eq!(context_subs, 9);
        assert!(engine.stats().missing_values(CovariateKind::Context) > 0);
        assert_eq!(engine.stats().missing_values(CovariateKind::ReadGroup), 0);
    }

    #[test]
    fn test_unknown_platform_without_default() {
        let engine = engine();
        let observation = ReadObservation::builder("rg", b"ACGTACGTAC".to_vec(), vec![30; 10])
            .build()
            .unwrap();
        engine.update(&observation);
        let tables = engine.tables();
        assert_eq!(total_observations(tables, READ_GROUP_TABLE), 30);
        assert!(tables.table(OPTIONAL_TABLE_START).is_empty());
        assert_eq!(engine.stats().missing_values(CovariateKind::Cycle), 30);
    }

    #[test]
    fn test_force_platform() {
        let args = RecalibrationArgs::default().force_platform(Platform::Illumina);
        let engine = RecalibrationEngine::new(args).unwrap();
        let observation = ReadObservation::builder("rg", b"ACGTACGTAC".to_vec(), vec![30; 10])
            .platform(Platform::IonTorrent)
            .build()
            .unwrap();
        engine.update(&observation);
        // discrete cycles leave the indel cushion empty
        let insertions: u64 = engine
            .tables()
            .rows()
            .iter()
            .filter(|row| row.table == OPTIONAL_TABLE_START && row.event == EventType::Insertion)
            .map(|row| row.observations)
            .sum();
        assert_eq!(insertions, 2);
    }

    // ==================== Skip Tests ====================

    #[test]
    fn test_skipped_observation_leaves_tables_unchanged() {
        let engine = engine();
        engine.update(&read("rg1"));
        let before: Vec<TableRow> = engine.tables().rows();

        let skipped = ReadObservation::builder("rg1", b"ACGTACGTAC".to_vec(), vec![30; 10])
            .platform(Platform::Illumina)
            .skip_all()
            .build()
            .unwrap();
        engine.update(&skipped);
        assert_eq!(engine.tables().rows(), before);
        assert_eq!(engine.stats().skipped_bases(), 10);

        let fresh = self::engine();
        fresh.update(&skipped);
        assert!(fresh.tables().is_empty());
        assert_eq!(fresh.tables().read_group_covariate().num_read_groups(), 0);
    }

    #[test]
    fn test_partially_skipped_read() {
        let engine = engine();
        let mut skips = vec![false; 10];
        skips[0] = true;
        skips[9] = true;
        let observation = ReadObservation::builder("rg", b"ACGTACGTAC".to_vec(), vec![30; 10])
            .platform(Platform::Illumina)
            .skips(skips)
            .build()
            .unwrap();
        engine.update(&observation);
        assert_eq!(total_observations(engine.tables(), READ_GROUP_TABLE), 24);
        assert_eq!(engine.stats().bases(), 8);
        assert_eq!(engine.stats().skipped_bases(), 2);
    }

    // ==================== Concurrency Tests ====================

    #[test]
    fn test_concurrent_updates_match_sequential() {
        let sequential = engine();
        let concurrent = engine();
        let reads: Vec<ReadObservation> = (0..64).map(|i| read(&format!("rg{}", i % 3))).collect();
        for observation in &reads {
            sequential.update(observation);
        }

        thread::scope(|scope| {
            for chunk in reads.chunks(8) {
                let engine = &concurrent;
                scope.spawn(move || {
                    let mut buffer = UpdateBuffer::new();
                    for observation in chunk {
                        engine.update_with(observation, &mut buffer);
                    }
                });
            }
        });
        assert_eq!(concurrent.tables().rows(), sequential.tables().rows());
        assert_eq!(concurrent.stats().bases(), 64 * 10);
    }

    // ==================== Finalize Tests ====================

    #[test]
    fn test_finalize_quantizes() {
        let engine = engine();
        for i in 0..20 {
            engine.update(&read(&format!("rg{}", i % 2)));
        }
        let (tables, quantization) = engine.finalize();
        assert_eq!(quantization.quantized().len(), crate::quality::QUALITY_BUCKETS);
        assert_eq!(
            quantization.counts().iter().sum::<u64>(),
            total_observations(&tables, QUALITY_SCORE_TABLE)
        );
    }

    #[test]
    fn test_merge_tables_into_engine() {
        let a = engine();
        let b = engine();
        a.update(&read("x"));
        b.update(&read("y"));
        a.merge_tables(b.tables()).unwrap();
        assert_eq!(a.tables().read_group_covariate().num_read_groups(), 2);
        assert_eq!(total_observations(a.tables(), READ_GROUP_TABLE), 60);
    }
}
