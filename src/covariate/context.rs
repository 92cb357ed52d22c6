use super::{Covariate, CovariateKind, ReadCovariates};
use crate::error::{ConfigError, Error, Result};
use crate::read::RecalRead;

/// Default k-mer length for substitution contexts
pub const DEFAULT_MISMATCHES_CONTEXT_SIZE: usize = 2;

/// Default k-mer length for insertion and deletion contexts
pub const DEFAULT_INDELS_CONTEXT_SIZE: usize = 3;

/// Default quality below which read-end bases are masked out of contexts
pub const DEFAULT_LOW_QUALITY_TAIL: u8 = 2;

/// Bits holding the context length in the low end of each key
const LENGTH_BITS: u32 = 4;

/// Longest context whose packed key fits the key budget
pub const MAX_CONTEXT_SIZE: usize = 13;

/// The k-mer ending at each base, in sequencing orientation
///
/// Keys store the context length in the low [`LENGTH_BITS`] bits and the
/// bases, 2-bit encoded with `bitnuc` (first base lowest), above them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContextCovariate {
    mismatches_context_size: usize,
    indels_context_size: usize,
    low_quality_tail: u8,
}
impl ContextCovariate {
    pub fn new(
        mismatches_context_size: usize,
        indels_context_size: usize,
        low_quality_tail: u8,
    ) -> Result<Self> {
        for size in [mismatches_context_size, indels_context_size] {
            if size == 0 || size > MAX_CONTEXT_SIZE {
                return Err(ConfigError::InvalidContextSize(size).into());
            }
        }
        Ok(Self {
            mismatches_context_size,
            indels_context_size,
            low_quality_tail,
        })
    }

    /// Packs a context of regular bases into a key
    ///
    /// # Errors
    /// [`ConfigError::InvalidContextSize`] for an empty or too long context,
    /// and the `bitnuc` error for a base outside of `ACGT`.
    pub fn try_key_from_context(context: &[u8]) -> Result<u64> {
        if context.is_empty() || context.len() > MAX_CONTEXT_SIZE {
            return Err(ConfigError::InvalidContextSize(context.len()).into());
        }
        let mut packed = Vec::with_capacity(1);
        bitnuc::encode(context, &mut packed).map_err(Error::from)?;
        let bases = packed
            .first()
            .copied()
            .ok_or(ConfigError::InvalidContextSize(context.len()))?;
        Ok((bases << LENGTH_BITS) | context.len() as u64)
    }

    /// Like [`Self::try_key_from_context`], with no value for contexts that
    /// cannot be packed
    #[must_use]
    pub fn key_from_context(context: &[u8]) -> Option<u64> {
        Self::try_key_from_context(context).ok()
    }

    /// Unpacks a key into its context bases
    #[must_use]
    pub fn context_from_key(key: u64) -> Option<Vec<u8>> {
        let len = (key & ((1 << LENGTH_BITS) - 1)) as usize;
        if len == 0 || len > MAX_CONTEXT_SIZE {
            return None;
        }
        let mut context = Vec::with_capacity(len);
        bitnuc::decode(&[key >> LENGTH_BITS], len, &mut context).ok()?;
        Some(context)
    }

    /// Bases of the read with low quality tails masked to `N`, reverse
    /// complemented for negative strand reads
    fn masked_bases<R: RecalRead + ?Sized>(&self, read: &R) -> Vec<u8> {
        let quals = read.base_qualities();
        let mut bases: Vec<u8> = read.bases().iter().map(u8::to_ascii_uppercase).collect();

        let mut start = 0;
        while start < bases.len() && quals[start] < self.low_quality_tail {
            bases[start] = b'N';
            start += 1;
        }
        let mut end = bases.len();
        while end > start && quals[end - 1] < self.low_quality_tail {
            bases[end - 1] = b'N';
            end -= 1;
        }

        if read.is_negative_strand() {
            bases.reverse();
            for base in &mut bases {
                *base = complement(*base);
            }
        }
        bases
    }

    /// Keys of the `k`-mer ending at each position
    fn contexts(bases: &[u8], k: usize) -> Vec<Option<u64>> {
        (0..bases.len())
            .map(|i| {
                if i + 1 < k {
                    None
                } else {
                    Self::key_from_context(&bases[i + 1 - k..=i])
                }
            })
            .collect()
    }
}
impl Covariate for ContextCovariate {
    fn kind(&self) -> CovariateKind {
        CovariateKind::Context
    }

    fn record_values<R: RecalRead + ?Sized>(
        &self,
        read: &R,
        values: &mut ReadCovariates,
        index: usize,
    ) {
        let bases = self.masked_bases(read);
        let mismatch_keys = Self::contexts(&bases, self.mismatches_context_size);
        let indel_keys = Self::contexts(&bases, self.indels_context_size);

        let len = bases.len();
        let negative = read.is_negative_strand();
        for i in 0..len {
            let offset = if negative { len - i - 1 } else { i };
            values.add_covariate(offset, index, mismatch_keys[i], indel_keys[i], indel_keys[i]);
        }
    }

    fn maximum_key_value(&self) -> u64 {
        let k = self.mismatches_context_size.max(self.indels_context_size) as u32;
        (1 << (LENGTH_BITS + 2 * k)) - 1
    }

    fn format_key(&self, key: u64) -> String {
        Self::context_from_key(key)
            .map_or_else(|| key.to_string(), |context| String::from_utf8_lossy(&context).into_owned())
    }

    fn key_from_value(&self, value: &str) -> Option<u64> {
        Self::key_from_context(value.as_bytes())
    }
}

fn complement(base: u8) -> u8 {
    match base {
        b'A' => b'T',
        b'C' => b'G',
        b'G' => b'C',
        b'T' => b'A',
        other => other,
    }
}
