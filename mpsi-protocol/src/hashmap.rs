//! Oblivious slot maps.
//!
//! Every map in the protocol has exactly `2^n_bits` slots and labels are
//! placed by an unkeyed hash of the label, so the layout reveals nothing
//! beyond the table size. When two labels of one participant land in the
//! same slot the first one (in sorted order) wins and the other is dropped.

use blake2::{Blake2s256, Digest};
use std::ops::Index;

const HASH_PREFIX_DOMAIN: &[u8] = b"HashPrefix";

/// The low `bits` bits of the first eight bytes (big endian) of
/// `BLAKE2s-256("HashPrefix" || msg)`.
///
/// # Panics
/// If `bits >= 64`.
pub fn hash_prefix(msg: &[u8], bits: u32) -> u64 {
    assert!(bits < 64, "hash prefix must be shorter than 64 bits");
    let mut hasher = Blake2s256::new();
    hasher.update(HASH_PREFIX_DOMAIN);
    hasher.update(msg);
    let digest = hasher.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix) & ((1u64 << bits) - 1)
}

pub fn slot_index(label: &str, n_bits: u32) -> u64 {
    hash_prefix(label.as_bytes(), n_bits)
}

/// Fixed-size arena of `2^n_bits` slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotMap<T> {
    n_bits: u32,
    slots: Vec<T>,
}

impl<T> SlotMap<T> {
    pub fn from_fn(n_bits: u32, f: impl FnMut(u64) -> T) -> Self {
        let slots = (0..1u64 << n_bits).map(f).collect();
        Self { n_bits, slots }
    }

    /// Builds a map from the outputs of a worker pool that covered every
    /// slot exactly once.
    ///
    /// Returns `None` if a slot is missing or out of range.
    pub fn from_outputs(n_bits: u32, outputs: impl IntoIterator<Item = (u64, T)>) -> Option<Self> {
        let size = 1usize << n_bits;
        let mut slots: Vec<Option<T>> = (0..size).map(|_| None).collect();
        for (idx, value) in outputs {
            *slots.get_mut(idx as usize)? = Some(value);
        }
        let slots = slots.into_iter().collect::<Option<Vec<T>>>()?;
        Some(Self { n_bits, slots })
    }

    pub fn n_bits(&self) -> u32 {
        self.n_bits
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, idx: u64) -> Option<&T> {
        self.slots.get(idx as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter()
    }

    /// Overwrites the given slots.
    ///
    /// # Panics
    /// If an index is out of range.
    pub fn apply(&mut self, updates: impl IntoIterator<Item = (u64, T)>) {
        for (idx, value) in updates {
            self.slots[idx as usize] = value;
        }
    }

    pub fn into_vec(self) -> Vec<T> {
        self.slots
    }
}

impl<T> Index<u64> for SlotMap<T> {
    type Output = T;

    fn index(&self, idx: u64) -> &T {
        &self.slots[idx as usize]
    }
}

/// Tracks which slots have not been written yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occupancy {
    size: u64,
    words: Vec<u64>,
    untouched: u64,
}

impl Occupancy {
    /// All `size` slots start untouched.
    pub fn new(size: u64) -> Self {
        let mut words = vec![u64::MAX; size.div_ceil(64) as usize];
        if size % 64 != 0 {
            if let Some(last) = words.last_mut() {
                *last = (1u64 << (size % 64)) - 1;
            }
        }
        Self {
            size,
            words,
            untouched: size,
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_untouched(&self, idx: u64) -> bool {
        idx < self.size && self.words[(idx / 64) as usize] & (1 << (idx % 64)) != 0
    }

    /// Marks `idx` as touched. Returns `false` if it already was, so the
    /// caller can skip later writers of the same slot.
    pub fn checked_remove(&mut self, idx: u64) -> bool {
        if !self.is_untouched(idx) {
            return false;
        }
        self.words[(idx / 64) as usize] &= !(1 << (idx % 64));
        self.untouched -= 1;
        true
    }

    pub fn untouched_count(&self) -> u64 {
        self.untouched
    }

    pub fn touched_count(&self) -> u64 {
        self.size - self.untouched
    }

    pub fn untouched(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.size).filter(move |&idx| self.is_untouched(idx))
    }
}

/// Places `items` into a map of `2^n_bits` slots, first writer wins.
///
/// Returns the winning `(slot, item)` pairs and the resulting occupancy.
pub fn assign_slots<T>(
    items: impl IntoIterator<Item = T>,
    key: impl Fn(&T) -> &str,
    n_bits: u32,
) -> (Vec<(u64, T)>, Occupancy) {
    let mut occupancy = Occupancy::new(1u64 << n_bits);
    let mut winners = Vec::new();
    for item in items {
        let idx = slot_index(key(&item), n_bits);
        if occupancy.checked_remove(idx) {
            winners.push((idx, item));
        }
    }
    (winners, occupancy)
}
