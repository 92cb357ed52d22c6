use super::{Covariate, CovariateKind, ReadCovariates};
use crate::read::RecalRead;

/// A producer-supplied per-base 0/1 tag
///
/// Reads without the tag, and tag values other than 0 or 1, yield no value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BinaryTagCovariate {
    tag: String,
}
impl BinaryTagCovariate {
    #[must_use]
    pub fn new(tag: String) -> Self {
        Self { tag }
    }

    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }
}
impl Covariate for BinaryTagCovariate {
    fn kind(&self) -> CovariateKind {
        CovariateKind::BinaryTag
    }

    fn record_values<R: RecalRead + ?Sized>(
        &self,
        read: &R,
        values: &mut ReadCovariates,
        index: usize,
    ) {
        let tags = read.binary_tag(&self.tag);
        for offset in 0..read.len() {
            let key = tags
                .and_then(|t| t.get(offset))
                .and_then(|v| (*v <= 1).then_some(u64::from(*v)));
            values.add_covariate(offset, index, key, key, key);
        }
    }

    fn maximum_key_value(&self) -> u64 {
        1
    }

    fn format_key(&self, key: u64) -> String {
        key.to_string()
    }

    fn key_from_value(&self, value: &str) -> Option<u64> {
        match value {
            "0" => Some(0),
            "1" => Some(1),
            _ => None,
        }
    }
}
