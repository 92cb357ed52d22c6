//! Applying a finished model to the qualities of a read.

use std::path::Path;
use std::sync::Arc;

use ahash::AHashMap;
use log::debug;

use crate::config::RecalibrationArgs;
use crate::covariate::{Covariate, ReadCovariates, StandardCovariate};
use crate::error::Result;
use crate::event::EventType;
use crate::quality::{bound_quality, MAX_QUALITY, MIN_USABLE_QUALITY};
use crate::quantize::QuantizationInfo;
use crate::read::{RecalRead, ResolvedRead};
use crate::report::RecalibrationReport;
use crate::tables::{RecalibrationTables, OPTIONAL_TABLE_START, QUALITY_SCORE_TABLE, READ_GROUP_TABLE};

/// Recalibrated qualities of one read, one track per event type
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecalibratedQualities {
    tracks: [Vec<u8>; EventType::COUNT],
}
impl RecalibratedQualities {
    #[must_use]
    pub fn get(&self, event: EventType) -> &[u8] {
        &self.tracks[event.index()]
    }

    #[must_use]
    pub fn substitution(&self) -> &[u8] {
        self.get(EventType::Substitution)
    }

    #[must_use]
    pub fn insertion(&self) -> &[u8] {
        self.get(EventType::Insertion)
    }

    #[must_use]
    pub fn deletion(&self) -> &[u8] {
        self.get(EventType::Deletion)
    }

    #[must_use]
    pub fn into_inner(self) -> [Vec<u8>; EventType::COUNT] {
        self.tracks
    }
}

/// Rewrites base qualities with a recalibration model
///
/// The quality of a base is shifted by the read group's global shift, the
/// shift of its reported quality within the read group and the shift of every
/// optional covariate cell it falls in. Missing cells shift by nothing.
#[derive(Debug)]
pub struct BaseRecalibration {
    args: RecalibrationArgs,
    quantization: QuantizationInfo,
    tables: RecalibrationTables,
    covariates: Vec<Arc<StandardCovariate>>,

    /// `empirical - estimated reported` per read group table key
    global_deltas: AHashMap<u64, f64>,

    /// `empirical - reported - global` per read group + quality table key
    reported_deltas: AHashMap<u64, f64>,
}
impl BaseRecalibration {
    #[must_use]
    pub fn new(report: RecalibrationReport) -> Self {
        let (args, quantization, tables) = report.into_parts();
        let covariates: Vec<Arc<StandardCovariate>> = tables
            .codec(QUALITY_SCORE_TABLE)
            .required()
            .iter()
            .chain(tables.optional_covariates())
            .cloned()
            .collect();

        let global_deltas: AHashMap<u64, f64> = tables
            .table(READ_GROUP_TABLE)
            .snapshot()
            .into_iter()
            .map(|(key, datum)| {
                (
                    key,
                    datum.empirical_quality() - datum.estimated_reported_quality(),
                )
            })
            .collect();

        let rg_codec = tables.codec(READ_GROUP_TABLE);
        let qual_codec = tables.codec(QUALITY_SCORE_TABLE);
        let mut reported_deltas = AHashMap::new();
        for (key, datum) in tables.table(QUALITY_SCORE_TABLE).snapshot() {
            let Some(decoded) = qual_codec.decode(key) else {
                continue;
            };
            let global_key = rg_codec.pack(&decoded.required[..1], decoded.event, None);
            let global = global_deltas.get(&global_key).copied().unwrap_or(0.0);
            let reported = decoded.required[1] as f64;
            reported_deltas.insert(key, datum.empirical_quality() - reported - global);
        }
        debug!(
            "Precomputed {} read group and {} quality shifts",
            global_deltas.len(),
            reported_deltas.len()
        );

        Self {
            args,
            quantization,
            tables,
            covariates,
            global_deltas,
            reported_deltas,
        }
    }

    /// Loads the model from a report file
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(RecalibrationReport::from_path(path)?))
    }

    #[must_use]
    pub fn quantization(&self) -> &QuantizationInfo {
        &self.quantization
    }

    /// Quality of `event` at `offset` as the read reports it
    fn original_quality<R: RecalRead + ?Sized>(&self, read: &R, event: EventType, offset: usize) -> u8 {
        match event {
            EventType::Substitution => read.base_qualities()[offset],
            EventType::Insertion => read
                .insertion_qualities()
                .map_or(self.args.insertions_default_quality, |quals| quals[offset]),
            EventType::Deletion => read
                .deletion_qualities()
                .map_or(self.args.deletions_default_quality, |quals| quals[offset]),
        }
    }

    /// Recalibrated quality of one base event from its covariate values, or
    /// `None` if the required covariates have no value
    fn recalibrate_event(&self, values: &[Option<u64>], event: EventType) -> Option<u8> {
        let group = values[0]?;
        let qual = values[1]?;
        let reported = qual as f64;

        let rg_key = self.tables.codec(READ_GROUP_TABLE).pack(&[group], event, None);
        let global = self.global_deltas.get(&rg_key).copied().unwrap_or(0.0);

        let required = [group, qual];
        let qual_key = self
            .tables
            .codec(QUALITY_SCORE_TABLE)
            .pack(&required, event, None);
        let reported_delta = self.reported_deltas.get(&qual_key).copied().unwrap_or(0.0);

        let full_codec = self.tables.full_codec();
        let covariate_delta: f64 = values[2..]
            .iter()
            .enumerate()
            .filter_map(|(index, value)| {
                let key = full_codec.pack(&required, event, Some((index, (*value)?)));
                let datum = self.tables.table(OPTIONAL_TABLE_START + index).get(key)?;
                Some(datum.empirical_quality() - reported - (global + reported_delta))
            })
            .sum();

        let recalibrated = reported + global + reported_delta + covariate_delta;
        let bounded = bound_quality(recalibrated, MIN_USABLE_QUALITY, MAX_QUALITY);
        Some(self.quantization.map(bounded))
    }

    /// Recalibrates every event track of `read`
    ///
    /// Qualities below the configured preservation threshold are kept as they
    /// are, as are bases whose read group or quality has no covariate value.
    /// Read groups absent from the model are never added to it.
    pub fn recalibrate_read<R: RecalRead + ?Sized>(&self, read: &R) -> RecalibratedQualities {
        let len = read.len();
        let platform = self.args.resolve_platform(read.platform());
        let resolved = ResolvedRead::new(read, platform);

        let mut values = ReadCovariates::new(len, self.covariates.len());
        for (column, covariate) in self.covariates.iter().enumerate() {
            match covariate.as_read_group() {
                Some(read_group) => read_group.record_known_values(&resolved, &mut values, column),
                None => covariate.record_values(&resolved, &mut values, column),
            }
        }

        let tracks = EventType::ALL.map(|event| {
            (0..len)
                .map(|offset| {
                    let original = self.original_quality(read, event, offset);
                    if original < self.args.preserve_qscores_less_than {
                        return original;
                    }
                    self.recalibrate_event(values.values(offset, event), event)
                        .unwrap_or(original)
                })
                .collect::<Vec<u8>>()
        });
        RecalibratedQualities { tracks }
    }
}
