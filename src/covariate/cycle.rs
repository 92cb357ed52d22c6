use std::sync::atomic::{AtomicBool, Ordering};

use log::warn;

use super::{Covariate, CovariateKind, ReadCovariates};
use crate::error::{ConfigError, Result};
use crate::read::{CycleClass, RecalRead};

/// Default limit on the absolute cycle value
pub const DEFAULT_MAXIMUM_CYCLE: usize = 500;

/// Indel keys are withheld this many bases from either read end on
/// discrete-cycle platforms
const CUSHION: usize = 4;

/// Order of nucleotide flows on flow-cycle platforms
const FLOW_ORDER: [u8; 4] = [b'T', b'A', b'C', b'G'];

/// Machine cycle of each base
///
/// Cycles are 1-based, counted from the sequenced start of the read, and
/// negated for the second read of a pair.
#[derive(Debug)]
pub struct CycleCovariate {
    maximum_cycle: u64,
    warned_unknown_platform: AtomicBool,
}
impl CycleCovariate {
    pub fn new(maximum_cycle: usize) -> Result<Self> {
        if maximum_cycle == 0 || maximum_cycle as u64 >= u64::MAX >> 1 {
            return Err(ConfigError::InvalidCycleLimit(maximum_cycle).into());
        }
        Ok(Self {
            maximum_cycle: maximum_cycle as u64,
            warned_unknown_platform: AtomicBool::new(false),
        })
    }

    /// Packs a signed cycle as `|cycle| << 1 | sign`
    #[must_use]
    pub fn key_from_cycle(&self, cycle: i64) -> Option<u64> {
        let magnitude = cycle.unsigned_abs();
        if magnitude > self.maximum_cycle {
            return None;
        }
        Some((magnitude << 1) | u64::from(cycle < 0))
    }

    /// Inverse of [`CycleCovariate::key_from_cycle`]
    #[must_use]
    pub fn cycle_from_key(key: u64) -> i64 {
        let magnitude = (key >> 1) as i64;
        if key & 1 == 0 {
            magnitude
        } else {
            -magnitude
        }
    }

    fn record_discrete<R: RecalRead + ?Sized>(
        &self,
        read: &R,
        values: &mut ReadCovariates,
        index: usize,
    ) {
        let len = read.len();
        let order_factor: i64 = if read.is_second_of_pair() { -1 } else { 1 };
        let (mut cycle, increment) = if read.is_negative_strand() {
            (len as i64 * order_factor, -order_factor)
        } else {
            (order_factor, order_factor)
        };

        for offset in 0..len {
            let key = self.key_from_cycle(cycle);
            let indel_key = if offset < CUSHION || offset + CUSHION + 1 > len {
                None
            } else {
                key
            };
            values.add_covariate(offset, index, key, indel_key, indel_key);
            cycle += increment;
        }
    }

    fn record_flow<R: RecalRead + ?Sized>(
        &self,
        read: &R,
        values: &mut ReadCovariates,
        index: usize,
    ) {
        let bases = read.bases();
        let len = bases.len();
        let step: i64 = if read.is_second_of_pair() { -1 } else { 1 };
        let mut cycle = step;

        // offsets in the order the instrument sequenced them
        let order: Box<dyn Iterator<Item = usize>> = if read.is_negative_strand() {
            Box::new((0..len).rev())
        } else {
            Box::new(0..len)
        };
        let mut offsets = order.peekable();

        while offsets.peek().is_some() {
            for flow in FLOW_ORDER {
                while let Some(offset) = offsets.next_if(|o| bases[*o].to_ascii_uppercase() == flow) {
                    let key = self.key_from_cycle(cycle);
                    values.add_covariate(offset, index, key, key, key);
                }
            }
            if offsets.peek().is_some() {
                cycle += step;
            }
            // a non-regular base is assigned to the current flow cycle
            if let Some(offset) = offsets.next_if(|o| !is_regular_base(bases[*o])) {
                let key = self.key_from_cycle(cycle);
                values.add_covariate(offset, index, key, key, key);
            }
        }
    }
}
impl Covariate for CycleCovariate {
    fn kind(&self) -> CovariateKind {
        CovariateKind::Cycle
    }

    fn record_values<R: RecalRead + ?Sized>(
        &self,
        read: &R,
        values: &mut ReadCovariates,
        index: usize,
    ) {
        match read.platform().map(|p| p.cycle_class()) {
            Some(CycleClass::Discrete) => self.record_discrete(read, values, index),
            Some(CycleClass::Flow) => self.record_flow(read, values, index),
            None => {
                if !self.warned_unknown_platform.swap(true, Ordering::Relaxed) {
                    warn!(
                        "Read group {} has no recognized platform; cycle values are unavailable",
                        read.read_group()
                    );
                }
                for offset in 0..read.len() {
                    values.add_covariate(offset, index, None, None, None);
                }
            }
        }
    }

    fn maximum_key_value(&self) -> u64 {
        (self.maximum_cycle << 1) | 1
    }

    fn format_key(&self, key: u64) -> String {
        Self::cycle_from_key(key).to_string()
    }

    fn key_from_value(&self, value: &str) -> Option<u64> {
        value
            .parse::<i64>()
            .ok()
            .and_then(|cycle| self.key_from_cycle(cycle))
    }
}

fn is_regular_base(base: u8) -> bool {
    matches!(base.to_ascii_uppercase(), b'A' | b'C' | b'G' | b'T')
}
