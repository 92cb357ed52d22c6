use super::{Covariate, CovariateKind, ReadCovariates};
use crate::quality::MAX_QUALITY;
use crate::read::RecalRead;

/// The reported quality of each event
///
/// Insertion and deletion events fall back to fixed defaults when the read has
/// no dedicated quality track. A configured mismatch default replaces the
/// substitution qualities altogether.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QualityScoreCovariate {
    mismatches_default: Option<u8>,
    insertions_default: u8,
    deletions_default: u8,
}
impl QualityScoreCovariate {
    #[must_use]
    pub fn new(mismatches_default: Option<u8>, insertions_default: u8, deletions_default: u8) -> Self {
        Self {
            mismatches_default,
            insertions_default,
            deletions_default,
        }
    }
}
impl Covariate for QualityScoreCovariate {
    fn kind(&self) -> CovariateKind {
        CovariateKind::QualityScore
    }

    fn record_values<R: RecalRead + ?Sized>(
        &self,
        read: &R,
        values: &mut ReadCovariates,
        index: usize,
    ) {
        let quals = read.base_qualities();
        let ins_quals = read.insertion_qualities();
        let del_quals = read.deletion_qualities();
        let bounded = |q: u8| (q <= MAX_QUALITY).then_some(u64::from(q));

        for offset in 0..read.len() {
            let sub = self.mismatches_default.unwrap_or(quals[offset]);
            let ins = ins_quals.map_or(self.insertions_default, |q| q[offset]);
            let del = del_quals.map_or(self.deletions_default, |q| q[offset]);
            values.add_covariate(offset, index, bounded(sub), bounded(ins), bounded(del));
        }
    }

    fn maximum_key_value(&self) -> u64 {
        u64::from(MAX_QUALITY)
    }

    fn format_key(&self, key: u64) -> String {
        key.to_string()
    }

    fn key_from_value(&self, value: &str) -> Option<u64> {
        value
            .parse::<u64>()
            .ok()
            .filter(|q| *q <= self.maximum_key_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;
    use crate::quality::DEFAULT_INDEL_QUALITY;
    use crate::read::ReadObservation;

    fn default_covariate() -> QualityScoreCovariate {
        QualityScoreCovariate::new(None, DEFAULT_INDEL_QUALITY, DEFAULT_INDEL_QUALITY)
    }

    #[test]
    fn test_default_indel_qualities() {
        let read = ReadObservation::builder("rg", b"AC".to_vec(), vec![30, 12])
            .build()
            .unwrap();
        let mut values = ReadCovariates::new(2, 1);
        default_covariate().record_values(&read, &mut values, 0);

        assert_eq!(values.values(1, EventType::Substitution), &[Some(12)]);
        assert_eq!(values.values(1, EventType::Insertion), &[Some(45)]);
        assert_eq!(values.values(1, EventType::Deletion), &[Some(45)]);
    }

    #[test]
    fn test_explicit_indel_tracks() {
        let read = ReadObservation::builder("rg", b"AC".to_vec(), vec![30, 12])
            .insertion_qualities(vec![40, 41])
            .deletion_qualities(vec![42, 43])
            .build()
            .unwrap();
        let mut values = ReadCovariates::new(2, 1);
        default_covariate().record_values(&read, &mut values, 0);

        assert_eq!(values.values(0, EventType::Insertion), &[Some(40)]);
        assert_eq!(values.values(1, EventType::Deletion), &[Some(43)]);
    }

    #[test]
    fn test_mismatches_default_overrides() {
        let read = ReadObservation::builder("rg", b"AC".to_vec(), vec![30, 12])
            .build()
            .unwrap();
        let mut values = ReadCovariates::new(2, 1);
        QualityScoreCovariate::new(Some(20), 45, 45).record_values(&read, &mut values, 0);
        assert_eq!(values.values(0, EventType::Substitution), &[Some(20)]);
        assert_eq!(values.values(1, EventType::Substitution), &[Some(20)]);
    }

    #[test]
    fn test_out_of_range_quality_has_no_value() {
        let read = ReadObservation::builder("rg", b"A".to_vec(), vec![120])
            .build()
            .unwrap();
        let mut values = ReadCovariates::new(1, 1);
        default_covariate().record_values(&read, &mut values, 0);
        assert_eq!(values.values(0, EventType::Substitution), &[None]);
    }

    #[test]
    fn test_key_from_value() {
        let covariate = default_covariate();
        assert_eq!(covariate.key_from_value("37"), Some(37));
        assert_eq!(covariate.key_from_value("94"), None);
        assert_eq!(covariate.key_from_value("abc"), None);
        assert_eq!(covariate.bits_required(), 7);
    }
}
