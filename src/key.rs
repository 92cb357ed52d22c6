//! Packing of covariate values into single `u64` table keys.
//!
//! Layout, least significant bits first:
//!
//! ```text
//! [ required 1 ][ required 2 ]...[ required R ][ event ][ optional value ][ optional id ]
//! ```
//!
//! Required covariates sit at fixed offsets whatever the optional covariates
//! are, so the required prefix of any key reads the same in every codec built
//! from the same required list. Only one optional value is embedded per key;
//! the optional id field stores `index + 1` so that a key without an optional
//! covariate (id `0`) decodes unambiguously.

use std::sync::Arc;

use crate::covariate::{bits_to_index, Covariate, CovariateKind, StandardCovariate};
use crate::error::{ConfigError, MergeError, Result};
use crate::event::EventType;

/// Widest key the codec may produce
pub const MAX_KEY_BITS: u32 = u64::BITS;

#[inline]
fn mask(bits: u32) -> u64 {
    if bits >= u64::BITS {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// A key unpacked into its covariate values
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DecodedKey {
    /// Values of the required covariates, in codec order
    pub required: Vec<u64>,
    /// Index (into the codec's optional covariates) and value of the embedded
    /// optional covariate
    pub optional: Option<(usize, u64)>,
    pub event: EventType,
}

/// Fixed bit layout over an ordered list of required and optional covariates
#[derive(Debug, Clone)]
pub struct KeyCodec {
    required: Vec<Arc<StandardCovariate>>,
    optional: Vec<Arc<StandardCovariate>>,

    required_offsets: Vec<u32>,
    required_bits: Vec<u32>,

    event_offset: u32,
    event_bits: u32,

    optional_offset: u32,
    optional_bits: u32,

    optional_id_offset: u32,
    optional_id_bits: u32,

    total_bits: u32,
}
impl KeyCodec {
    /// Computes the layout for the given covariates
    ///
    /// # Errors
    /// [`ConfigError::BitBudgetExceeded`] if the layout needs more than
    /// [`MAX_KEY_BITS`] bits.
    pub fn build(
        required: Vec<Arc<StandardCovariate>>,
        optional: Vec<Arc<StandardCovariate>>,
    ) -> Result<Self> {
        let mut offset: usize = 0;
        let mut required_offsets = Vec::with_capacity(required.len());
        let mut required_bits = Vec::with_capacity(required.len());
        for covariate in &required {
            let bits = covariate.bits_required();
            required_offsets.push(offset as u32);
            required_bits.push(bits);
            offset += bits as usize;
        }

        let event_offset = offset;
        let event_bits = bits_to_index(EventType::COUNT as u64);
        offset += event_bits as usize;

        let optional_offset = offset;
        let optional_bits = optional
            .iter()
            .map(|covariate| covariate.bits_required())
            .max()
            .unwrap_or(0);
        offset += optional_bits as usize;

        let optional_id_offset = offset;
        let optional_id_bits = if optional.is_empty() {
            0
        } else {
            bits_to_index(optional.len() as u64 + 1)
        };
        offset += optional_id_bits as usize;

        if offset > MAX_KEY_BITS as usize {
            return Err(ConfigError::BitBudgetExceeded(offset).into());
        }

        Ok(Self {
            required,
            optional,
            required_offsets,
            required_bits,
            event_offset: event_offset as u32,
            event_bits,
            optional_offset: optional_offset as u32,
            optional_bits,
            optional_id_offset: optional_id_offset as u32,
            optional_id_bits,
            total_bits: offset as u32,
        })
    }

    #[must_use]
    pub fn required(&self) -> &[Arc<StandardCovariate>] {
        &self.required
    }

    #[must_use]
    pub fn optional(&self) -> &[Arc<StandardCovariate>] {
        &self.optional
    }

    /// Number of bits used by keys of this codec
    #[must_use]
    pub fn total_bits(&self) -> u32 {
        self.total_bits
    }

    /// Packs the values into a key
    ///
    /// `values` holds one value per required covariate followed by one value
    /// per optional covariate; only the optional value at `optional_index` is
    /// embedded.
    ///
    /// # Panics
    /// If `values` has the wrong length, `optional_index` is out of range, or a
    /// value does not fit its covariate's bit width.
    #[must_use]
    pub fn encode(&self, values: &[u64], event: EventType, optional_index: Option<usize>) -> u64 {
        assert_eq!(
            values.len(),
            self.required.len() + self.optional.len(),
            "expected one value per covariate"
        );
        let (required, optional) = values.split_at(self.required.len());
        self.pack(
            required,
            event,
            optional_index.map(|index| (index, optional[index])),
        )
    }

    /// Packs required values, the event and at most one optional value
    ///
    /// # Panics
    /// If a value does not fit its bit width or the optional index is out of range.
    #[must_use]
    pub fn pack(&self, required: &[u64], event: EventType, optional: Option<(usize, u64)>) -> u64 {
        assert_eq!(
            required.len(),
            self.required.len(),
            "expected one value per required covariate"
        );
        let mut key = 0u64;
        for ((value, offset), bits) in required
            .iter()
            .zip(&self.required_offsets)
            .zip(&self.required_bits)
        {
            assert!(
                *value <= mask(*bits),
                "covariate value {value} exceeds its {bits}-bit width"
            );
            key |= value << offset;
        }
        key |= (event.index() as u64) << self.event_offset;

        if let Some((index, value)) = optional {
            assert!(
                index < self.optional.len(),
                "optional covariate index {index} out of range"
            );
            assert!(
                value <= mask(self.optional_bits),
                "optional covariate value {value} exceeds its {}-bit width",
                self.optional_bits
            );
            key |= value << self.optional_offset;
            key |= (index as u64 + 1) << self.optional_id_offset;
        }
        key
    }

    /// Produces one key per present optional value, all sharing the required
    /// and event prefix
    ///
    /// A codec without optional covariates produces exactly the prefix key.
    #[must_use]
    pub fn encode_all_optional(
        &self,
        required: &[u64],
        event: EventType,
        optional: &[Option<u64>],
    ) -> Vec<u64> {
        let mut keys = Vec::with_capacity(optional.len().max(1));
        self.encode_all_optional_into(required, event, optional, &mut keys);
        keys
    }

    /// Same as [`KeyCodec::encode_all_optional`], appending into `keys`
    pub fn encode_all_optional_into(
        &self,
        required: &[u64],
        event: EventType,
        optional: &[Option<u64>],
        keys: &mut Vec<u64>,
    ) {
        if self.optional.is_empty() {
            keys.push(self.pack(required, event, None));
            return;
        }
        assert_eq!(
            optional.len(),
            self.optional.len(),
            "expected one slot per optional covariate"
        );
        let prefix = self.pack(required, event, None);
        for (index, value) in optional.iter().enumerate() {
            if let Some(value) = value {
                assert!(
                    *value <= mask(self.optional_bits),
                    "optional covariate value {value} exceeds its {}-bit width",
                    self.optional_bits
                );
                keys.push(
                    prefix
                        | (value << self.optional_offset)
                        | ((index as u64 + 1) << self.optional_id_offset),
                );
            }
        }
    }

    /// Unpacks a key produced by this codec
    ///
    /// Returns `None` for keys that no encode call of this codec could produce.
    #[must_use]
    pub fn decode(&self, key: u64) -> Option<DecodedKey> {
        if self.total_bits < u64::BITS && key >> self.total_bits != 0 {
            return None;
        }
        let required = self
            .required_offsets
            .iter()
            .zip(&self.required_bits)
            .map(|(offset, bits)| (key >> offset) & mask(*bits))
            .collect();
        let event_index = (key >> self.event_offset) & mask(self.event_bits);
        let event = EventType::from_index(event_index as usize)?;

        let optional_id = (key >> self.optional_id_offset) & mask(self.optional_id_bits);
        let optional_value = (key >> self.optional_offset) & mask(self.optional_bits);
        let optional = if self.optional_id_bits == 0 || optional_id == 0 {
            if optional_value != 0 {
                return None;
            }
            None
        } else {
            let index = optional_id as usize - 1;
            if index >= self.optional.len() {
                return None;
            }
            Some((index, optional_value))
        };

        Some(DecodedKey {
            required,
            optional,
            event,
        })
    }

    /// Whether two codecs are equivalent for merging
    ///
    /// Codecs are compared by covariate kinds only; run-local identity maps
    /// such as read group numbering are ignored.
    #[must_use]
    pub fn is_compatible(&self, other: &Self) -> bool {
        self.required_kinds().eq(other.required_kinds())
            && self.optional_kinds().eq(other.optional_kinds())
    }

    pub fn required_kinds(&self) -> impl Iterator<Item = CovariateKind> + '_ {
        self.required.iter().map(|c| c.kind())
    }

    pub fn optional_kinds(&self) -> impl Iterator<Item = CovariateKind> + '_ {
        self.optional.iter().map(|c| c.kind())
    }

    /// Comma separated list of covariate names, required first
    #[must_use]
    pub fn describe(&self) -> String {
        self.required_kinds()
            .chain(self.optional_kinds())
            .map(CovariateKind::name)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Re-encodes a key of `source` into this codec
    ///
    /// The codecs must be compatible; values are translated covariate by
    /// covariate (read groups by name).
    pub fn translate(&self, source: &Self, key: u64) -> Result<u64> {
        let decoded = source
            .decode(key)
            .ok_or(MergeError::UndecodableKey(key))?;

        let mut required = Vec::with_capacity(decoded.required.len());
        for ((target, origin), value) in self
            .required
            .iter()
            .zip(&source.required)
            .zip(&decoded.required)
        {
            required.push(translate_value(target, origin, *value)?);
        }

        let optional = match decoded.optional {
            Some((index, value)) => {
                let target = &self.optional[index];
                let origin = &source.optional[index];
                let value = translate_value(target, origin, value)?;
                if value > mask(self.optional_bits) {
                    return Err(MergeError::UntranslatableValue {
                        covariate: target.kind(),
                        value,
                    }
                    .into());
                }
                Some((index, value))
            }
            None => None,
        };
        Ok(self.pack(&required, decoded.event, optional))
    }

    /// Display values of a decoded key: the required values, then the embedded
    /// optional covariate's kind and value
    #[must_use]
    pub fn format(&self, decoded: &DecodedKey) -> (Vec<String>, Option<(CovariateKind, String)>) {
        let required = self
            .required
            .iter()
            .zip(&decoded.required)
            .map(|(covariate, value)| covariate.format_key(*value))
            .collect();
        let optional = decoded.optional.map(|(index, value)| {
            let covariate = &self.optional[index];
            (covariate.kind(), covariate.format_key(value))
        });
        (required, optional)
    }
}

fn translate_value(
    target: &StandardCovariate,
    origin: &StandardCovariate,
    value: u64,
) -> Result<u64> {
    target.translate_key(origin, value).ok_or_else(|| {
        MergeError::UntranslatableValue {
            covariate: origin.kind(),
            value,
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::config::RecalibrationArgs;
    use crate::error::Error;

    fn covariates(args: &RecalibrationArgs) -> (Vec<Arc<StandardCovariate>>, Vec<Arc<StandardCovariate>>) {
        args.build_covariates().unwrap()
    }

    fn full_codec(args: &RecalibrationArgs) -> KeyCodec {
        let (required, optional) = covariates(args);
        KeyCodec::build(required, optional).unwrap()
    }

    // ==================== Layout Tests ====================

    #[test]
    fn test_standard_layout() {
        let codec = full_codec(&RecalibrationArgs::default());
        // 15 (rg) + 7 (qual) + 2 (event) + 10 (cycle/context) + 2 (id)
        assert_eq!(codec.total_bits(), 36);
        assert_eq!(codec.describe(), "ReadGroup,QualityScore,Cycle,Context");
    }

    #[test]
    fn test_required_prefix_is_fixed() {
        let args = RecalibrationArgs::default();
        let (required, optional) = covariates(&args);
        let full = KeyCodec::build(required.clone(), optional).unwrap();
        let bare = KeyCodec::build(required, Vec::new()).unwrap();

        let key = full.pack(&[3, 30], EventType::Deletion, Some((1, 17)));
        let prefix = bare.pack(&[3, 30], EventType::Deletion, None);
        let prefix_mask = (1u64 << bare.total_bits()) - 1;
        assert_eq!(key & prefix_mask, prefix);
    }

    #[test]
    fn test_bit_budget_exceeded() {
        let args = RecalibrationArgs::default().maximum_cycle_value(1 << 40);
        let (required, optional) = covariates(&args);
        let result = KeyCodec::build(required, optional);
        assert!(matches!(
            result,
            Err(Error::ConfigError(ConfigError::BitBudgetExceeded(bits))) if bits > 64
        ));
    }

    #[test]
    fn test_bit_budget_boundary() {
        // 15 + 7 + 2 + 39 + 1 = 64 bits with a single optional covariate
        let args = RecalibrationArgs::default()
            .use_standard_covariates(false)
            .covariates(["Cycle"])
            .maximum_cycle_value((1 << 38) - 1);
        let codec = full_codec(&args);
        assert_eq!(codec.total_bits(), 64);
        let max_key = codec.optional()[0].maximum_key_value();
        let key = codec.pack(&[0, 0], EventType::Substitution, Some((0, max_key)));
        assert_eq!(codec.decode(key).unwrap().optional, Some((0, max_key)));

        let args = args.maximum_cycle_value(1 << 38);
        let (required, optional) = covariates(&args);
        assert!(KeyCodec::build(required, optional).is_err());
    }

    // ==================== Encode/Decode Tests ====================

    #[test]
    fn test_round_trip_random() {
        let args = RecalibrationArgs::default()
            .covariates(["BinaryTag"])
            .binary_tag_name("XB");
        let codec = full_codec(&args);
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..10_000 {
            let mut values: Vec<u64> = codec
                .required()
                .iter()
                .chain(codec.optional())
                .map(|c| rng.random_range(0..=c.maximum_key_value()))
                .collect();
            let event = EventType::ALL[rng.random_range(0..EventType::COUNT)];
            let optional_index = if rng.random_bool(0.2) {
                None
            } else {
                Some(rng.random_range(0..codec.optional().len()))
            };

            let key = codec.encode(&values, event, optional_index);
            let decoded = codec.decode(key).unwrap();

            let optional = optional_index.map(|i| (i, values[codec.required().len() + i]));
            values.truncate(codec.required().len());
            assert_eq!(decoded.required, values);
            assert_eq!(decoded.event, event);
            assert_eq!(decoded.optional, optional);
        }
    }

    #[test]
    fn test_encode_all_optional() {
        let codec = full_codec(&RecalibrationArgs::default());
        let keys = codec.encode_all_optional(&[1, 20], EventType::Insertion, &[Some(9), None]);
        assert_eq!(keys.len(), 1);
        let decoded = codec.decode(keys[0]).unwrap();
        assert_eq!(decoded.optional, Some((0, 9)));
        assert_eq!(decoded.required, vec![1, 20]);

        let keys = codec.encode_all_optional(&[1, 20], EventType::Insertion, &[Some(9), Some(33)]);
        assert_eq!(keys.len(), 2);
        assert_eq!(codec.decode(keys[1]).unwrap().optional, Some((1, 33)));
        assert!(codec.encode_all_optional(&[1, 20], EventType::Insertion, &[None, None]).is_empty());
    }

    #[test]
    fn test_encode_all_optional_without_optional_covariates() {
        let (required, _) = covariates(&RecalibrationArgs::default());
        let codec = KeyCodec::build(required, Vec::new()).unwrap();
        let keys = codec.encode_all_optional(&[2, 31], EventType::Substitution, &[]);
        assert_eq!(keys.len(), 1);
        let decoded = codec.decode(keys[0]).unwrap();
        assert_eq!(decoded.required, vec![2, 31]);
        assert_eq!(decoded.optional, None);
    }

    #[test]
    #[should_panic(expected = "exceeds")]
    fn test_encode_overflow_panics() {
        let codec = full_codec(&RecalibrationArgs::default());
        let _ = codec.pack(&[0, 200], EventType::Substitution, None);
    }

    #[test]
    fn test_decode_rejects_foreign_keys() {
        let codec = full_codec(&RecalibrationArgs::default());
        // event index 3 does not exist
        let bad_event = 3u64 << 22;
        assert!(codec.decode(bad_event).is_none());
        assert!(codec.decode(u64::MAX).is_none());
    }

    // ==================== Compatibility Tests ====================

    #[test]
    fn test_compatibility_ignores_read_group_numbering() {
        let args = RecalibrationArgs::default();
        let a = full_codec(&args);
        let b = full_codec(&args);
        a.required()[0].as_read_group().unwrap().id_for("x");
        b.required()[0].as_read_group().unwrap().id_for("y");
        assert!(a.is_compatible(&b));
    }

    #[test]
    fn test_incompatible_codecs() {
        let a = full_codec(&RecalibrationArgs::default());
        let b = full_codec(&RecalibrationArgs::default().use_standard_covariates(false));
        assert!(!a.is_compatible(&b));
    }

    #[test]
    fn test_translate_read_groups() {
        let args = RecalibrationArgs::default();
        let a = full_codec(&args);
        let b = full_codec(&args);
        a.required()[0].as_read_group().unwrap().id_for("first");
        let rg_b = b.required()[0].as_read_group().unwrap().id_for("second").unwrap();

        let key_b = b.pack(&[rg_b, 25], EventType::Substitution, Some((0, 7)));
        let key_a = a.translate(&b, key_b).unwrap();
        let decoded = a.decode(key_a).unwrap();
        assert_eq!(decoded.required, vec![1, 25]);
        assert_eq!(decoded.optional, Some((0, 7)));
        let (values, optional) = a.format(&decoded);
        assert_eq!(values, vec!["second".to_string(), "25".to_string()]);
        assert_eq!(optional, Some((CovariateKind::Cycle, "-3".to_string())));
    }
}
