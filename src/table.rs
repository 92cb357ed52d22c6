//! Concurrent `u64 -> RecalDatum` map.
//!
//! Keys are spread over a fixed number of shards, each a read-write locked
//! map of individually locked cells. Updating an existing cell only takes the
//! shard's read lock plus the cell's own lock, so concurrent updates of
//! different keys never serialize on a write lock. The write lock is taken
//! only to insert a new cell, and insertion goes through `entry`, so when two
//! writers race to create the same cell the first insert wins and the second
//! increments the winner's cell.

use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};

use crate::datum::RecalDatum;

/// Number of independently locked shards (power of two)
pub const NUM_SHARDS: usize = 64;

const SHARD_SHIFT: u32 = u64::BITS - NUM_SHARDS.trailing_zeros();

type Shard = RwLock<AHashMap<u64, Mutex<RecalDatum>>>;

#[inline]
fn shard_index(key: u64) -> usize {
    // fibonacci hashing; table keys are dense in their low bits
    (key.wrapping_mul(0x9E37_79B9_7F4A_7C15) >> SHARD_SHIFT) as usize
}

/// A thread-safe table of accumulator cells
pub struct RecalTable {
    shards: Box<[Shard]>,
}
impl Default for RecalTable {
    fn default() -> Self {
        Self::new()
    }
}
impl RecalTable {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates a table sized for roughly `capacity` keys
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let per_shard = capacity.div_ceil(NUM_SHARDS);
        let shards = (0..NUM_SHARDS)
            .map(|_| RwLock::new(AHashMap::with_capacity(per_shard)))
            .collect();
        Self { shards }
    }

    #[inline]
    fn shard(&self, key: u64) -> &Shard {
        &self.shards[shard_index(key)]
    }

    /// Records observations into the cell of `key`, creating the cell on first touch
    pub fn increment_or_insert(&self, key: u64, reported_quality: f64, observations: u64, errors: f64) {
        let shard = self.shard(key);
        {
            let cells = shard.read();
            if let Some(cell) = cells.get(&key) {
                cell.lock().record(observations, errors, reported_quality);
                return;
            }
        }
        let mut cells = shard.write();
        cells
            .entry(key)
            .or_insert_with(|| Mutex::new(RecalDatum::empty(reported_quality)))
            .get_mut()
            .record(observations, errors, reported_quality);
    }

    /// Combines `datum` into the cell of `key`, inserting a copy if absent
    pub fn combine_or_insert(&self, key: u64, datum: &RecalDatum) {
        let shard = self.shard(key);
        {
            let cells = shard.read();
            if let Some(cell) = cells.get(&key) {
                cell.lock().combine(datum);
                return;
            }
        }
        let mut cells = shard.write();
        match cells.entry(key) {
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                entry.get_mut().get_mut().combine(datum);
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(Mutex::new(datum.clone()));
            }
        }
    }

    /// Replaces the cell of `key`
    pub fn insert(&self, key: u64, datum: RecalDatum) {
        self.shard(key).write().insert(key, Mutex::new(datum));
    }

    /// A copy of the cell of `key`
    #[must_use]
    pub fn get(&self, key: u64) -> Option<RecalDatum> {
        self.shard(key)
            .read()
            .get(&key)
            .map(|cell| cell.lock().clone())
    }

    #[must_use]
    pub fn contains_key(&self, key: u64) -> bool {
        self.shard(key).read().contains_key(&key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.read().is_empty())
    }

    /// Copies of every cell, sorted by key
    #[must_use]
    pub fn snapshot(&self) -> Vec<(u64, RecalDatum)> {
        let mut cells: Vec<(u64, RecalDatum)> = Vec::with_capacity(self.len());
        for shard in &*self.shards {
            cells.extend(
                shard
                    .read()
                    .iter()
                    .map(|(key, cell)| (*key, cell.lock().clone())),
            );
        }
        cells.sort_unstable_by_key(|(key, _)| *key);
        cells
    }
}
impl std::fmt::Debug for RecalTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecalTable")
            .field("len", &self.len())
            .finish()
    }
}
