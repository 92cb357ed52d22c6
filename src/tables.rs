//! The hierarchy of recalibration tables of one run and its merge.

use std::cmp::Ordering;
use std::sync::Arc;
use std::thread;

use log::debug;

use crate::config::RecalibrationArgs;
use crate::covariate::{Covariate, CovariateKind, ReadGroupCovariate, StandardCovariate};
use crate::datum::RecalDatum;
use crate::error::{MergeError, Result};
use crate::event::EventType;
use crate::key::KeyCodec;
use crate::quality::QUALITY_BUCKETS;
use crate::table::RecalTable;

/// Index of the table keyed by read group
pub const READ_GROUP_TABLE: usize = 0;

/// Index of the table keyed by read group and reported quality
pub const QUALITY_SCORE_TABLE: usize = 1;

/// Index of the first optional covariate table
pub const OPTIONAL_TABLE_START: usize = 2;

/// One decoded cell of a table, in display form
#[derive(Clone, Debug, PartialEq)]
pub struct TableRow {
    pub table: usize,
    /// Display values of the table's required covariates
    pub values: Vec<String>,
    /// The optional covariate of the table and its display value
    pub optional: Option<(CovariateKind, String)>,
    pub event: EventType,
    pub observations: u64,
    pub errors: f64,
    pub empirical_quality: f64,
    pub estimated_reported_quality: f64,
}
impl TableRow {
    fn sort_cmp(&self, other: &Self) -> Ordering {
        self.table
            .cmp(&other.table)
            .then_with(|| self.values.cmp(&other.values))
            .then_with(|| self.optional.cmp(&other.optional))
            .then_with(|| self.event.cmp(&other.event))
    }
}

/// Table hierarchy: read group, read group + quality, then one table per
/// optional covariate (read group + quality + that covariate)
///
/// All codecs of one hierarchy share the same covariate instances, so the read
/// group numbering is consistent across its tables.
#[derive(Debug)]
pub struct RecalibrationTables {
    codecs: Vec<KeyCodec>,
    tables: Vec<RecalTable>,
}
impl RecalibrationTables {
    /// Builds empty tables for the covariates resolved from `args`
    pub fn new(args: &RecalibrationArgs) -> Result<Self> {
        let (required, optional) = args.build_covariates()?;
        Self::from_covariates(required, optional)
    }

    /// Builds empty tables over explicit covariate instances
    ///
    /// `required` must start with the read group covariate followed by the
    /// quality score covariate.
    pub(crate) fn from_covariates(
        required: Vec<Arc<StandardCovariate>>,
        optional: Vec<Arc<StandardCovariate>>,
    ) -> Result<Self> {
        let read_group = required[..1].to_vec();
        let full = KeyCodec::build(required.clone(), optional.clone())?;
        let mut codecs = vec![
            KeyCodec::build(read_group, Vec::new())?,
            KeyCodec::build(required, Vec::new())?,
        ];
        codecs.extend((0..optional.len()).map(|_| full.clone()));

        let tables = codecs.iter().map(|_| RecalTable::new()).collect();
        Ok(Self { codecs, tables })
    }

    #[must_use]
    pub fn num_tables(&self) -> usize {
        self.tables.len()
    }

    #[must_use]
    pub fn codec(&self, index: usize) -> &KeyCodec {
        &self.codecs[index]
    }

    #[must_use]
    pub fn table(&self, index: usize) -> &RecalTable {
        &self.tables[index]
    }

    /// The full codec shared by the optional tables, or the read group +
    /// quality codec when there are no optional covariates
    #[must_use]
    pub fn full_codec(&self) -> &KeyCodec {
        self.codecs.last().unwrap_or(&self.codecs[QUALITY_SCORE_TABLE])
    }

    /// The read group covariate owning the run's read group numbering
    #[must_use]
    pub fn read_group_covariate(&self) -> &ReadGroupCovariate {
        self.codecs[READ_GROUP_TABLE].required()[0]
            .as_read_group()
            .unwrap_or_else(|| unreachable!("first required covariate is always the read group"))
    }

    #[must_use]
    pub fn optional_covariates(&self) -> &[Arc<StandardCovariate>] {
        self.full_codec().optional()
    }

    /// Whether every table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.iter().all(RecalTable::is_empty)
    }

    /// Looks up a cell by raw covariate values
    #[must_use]
    pub fn get(
        &self,
        table: usize,
        required: &[u64],
        event: EventType,
        optional: Option<u64>,
    ) -> Option<RecalDatum> {
        let optional = match table.checked_sub(OPTIONAL_TABLE_START) {
            Some(index) => Some((index, optional?)),
            None => None,
        };
        let key = self.codecs[table].pack(required, event, optional);
        self.tables[table].get(key)
    }

    /// Looks up a cell by display values
    ///
    /// Returns `None` if a value does not parse for its covariate (an unknown
    /// read group, for example) or if the cell is absent.
    #[must_use]
    pub fn get_by_values(
        &self,
        table: usize,
        required: &[&str],
        event: EventType,
        optional: Option<&str>,
    ) -> Option<RecalDatum> {
        let codec = &self.codecs[table];
        if required.len() != codec.required().len() {
            return None;
        }
        let values = codec
            .required()
            .iter()
            .zip(required)
            .map(|(covariate, value)| covariate.key_from_value(value))
            .collect::<Option<Vec<u64>>>()?;
        let optional = match table.checked_sub(OPTIONAL_TABLE_START) {
            Some(index) => Some(codec.optional()[index].key_from_value(optional?)?),
            None => None,
        };
        self.get(table, &values, event, optional)
    }

    /// Observations per rounded empirical quality of the read group + quality table
    #[must_use]
    pub fn quality_histogram(&self) -> Vec<u64> {
        let mut histogram = vec![0u64; QUALITY_BUCKETS];
        for (_, datum) in self.tables[QUALITY_SCORE_TABLE].snapshot() {
            let bucket = (datum.empirical_quality().round() as usize).min(QUALITY_BUCKETS - 1);
            histogram[bucket] += datum.observations();
        }
        histogram
    }

    /// Every cell decoded to display values, in a canonical order that does not
    /// depend on run-local numbering
    #[must_use]
    pub fn rows(&self) -> Vec<TableRow> {
        let mut rows = Vec::new();
        for (index, (codec, table)) in self.codecs.iter().zip(&self.tables).enumerate() {
            for (key, datum) in table.snapshot() {
                let Some(decoded) = codec.decode(key) else {
                    continue;
                };
                let (values, optional) = codec.format(&decoded);
                rows.push(TableRow {
                    table: index,
                    values,
                    optional,
                    event: decoded.event,
                    observations: datum.observations(),
                    errors: datum.errors(),
                    empirical_quality: datum.empirical_quality(),
                    estimated_reported_quality: datum.estimated_reported_quality(),
                });
            }
        }
        rows.sort_by(TableRow::sort_cmp);
        rows
    }

    /// Checks that `other` has the same table layout and covariate kinds
    pub fn check_compatible(&self, other: &Self) -> Result<()> {
        if self.num_tables() != other.num_tables() {
            return Err(MergeError::TableCountMismatch {
                expected: self.num_tables(),
                found: other.num_tables(),
            }
            .into());
        }
        for (index, (ours, theirs)) in self.codecs.iter().zip(&other.codecs).enumerate() {
            if !ours.is_compatible(theirs) {
                return Err(MergeError::IncompatibleCodecs {
                    table: index,
                    expected: ours.describe(),
                    found: theirs.describe(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Folds every cell of `other` into these tables
    ///
    /// Keys of `other` are decoded with its own codecs, translated (read groups
    /// by name) and re-encoded with these codecs before combining.
    ///
    /// # Errors
    /// [`MergeError`] if the hierarchies are not structurally equivalent or a
    /// key of `other` has no counterpart here. Every key is translated before
    /// any cell is combined, so on error no table cell has changed.
    pub fn merge(&self, other: &Self) -> Result<()> {
        self.check_compatible(other)?;
        let translated = self
            .codecs
            .iter()
            .zip(&other.codecs)
            .zip(&other.tables)
            .map(|((ours, theirs), table)| {
                table
                    .snapshot()
                    .into_iter()
                    .map(|(key, datum)| Ok((ours.translate(theirs, key)?, datum)))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;

        for (index, cells) in translated.into_iter().enumerate() {
            debug!("Merging {} cells into table {index}", cells.len());
            for (key, datum) in cells {
                self.tables[index].combine_or_insert(key, &datum);
            }
        }
        Ok(())
    }

    /// Tree-reduces any number of hierarchies into one
    ///
    /// Pairs at each level are merged on separate threads. Returns `None` for an
    /// empty input.
    pub fn merge_all(mut shards: Vec<Self>) -> Result<Option<Self>> {
        while shards.len() > 1 {
            let mut next = Vec::with_capacity(shards.len().div_ceil(2));
            let mut pairs = Vec::with_capacity(shards.len() / 2);
            let mut iter = shards.into_iter();
            while let Some(left) = iter.next() {
                match iter.next() {
                    Some(right) => pairs.push((left, right)),
                    None => next.push(left),
                }
            }

            let merged: Vec<Result<Self>> = thread::scope(|scope| {
                let handles: Vec<_> = pairs
                    .into_iter()
                    .map(|(left, right)| {
                        scope.spawn(move || -> Result<Self> {
                            left.merge(&right)?;
                            Ok(left)
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| match handle.join() {
                        Ok(result) => result,
                        Err(panic) => std::panic::resume_unwind(panic),
                    })
                    .collect()
            });
            let mut level = merged.into_iter().collect::<Result<Vec<Self>>>()?;
            level.append(&mut next);
            shards = level;
        }
        Ok(shards.pop())
    }
}
