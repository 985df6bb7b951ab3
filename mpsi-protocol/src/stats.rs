//! Expected-collision estimates and the cost model of one session.
//!
//! First-writer-wins slot assignment drops colliding labels, so the
//! computed cardinality deviates from the plaintext one. These formulas
//! give the expected deviation for uniformly hashed labels.

use crate::messages::Variant;

/// Expected number of occupied slots after hashing `items` labels into
/// `slots` slots: `m * (1 - ((m-1)/m)^x)`.
pub fn expected_full_slots(slots: f64, items: f64) -> f64 {
    slots * (1.0 - ((slots - 1.0) / slots).powf(items))
}

/// Expected number of labels dropped by collisions: `x - m + m(1 - 1/m)^x`.
pub fn expected_collisions(slots: f64, items: f64) -> f64 {
    items - slots + slots * (1.0 - 1.0 / slots).powf(items)
}

/// Share of `items` labels dropped by collisions; 0 for an empty set.
fn loss_rate(slots: f64, items: f64) -> f64 {
    if items <= 0.0 {
        return 0.0;
    }
    1.0 - expected_full_slots(slots, items) / items
}

/// Inputs to the intersection estimates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub slots: f64,
    pub delegate_set_size: f64,
    pub party_set_size: f64,
    /// Labels the delegate shares with some party but that are not in the
    /// result.
    pub delegate_overlap: f64,
    pub intersection: f64,
    pub parties: usize,
}

impl Estimate {
    /// Expected true matches that survive slot collisions.
    pub fn expected_true_matches(&self, variant: Variant) -> f64 {
        if self.intersection <= 0.0 {
            return 0.0;
        }
        let mut party_items = self.party_set_size;
        if variant.is_union() {
            party_items = party_items * self.parties as f64 - self.intersection;
        }
        let rate = loss_rate(self.slots, self.delegate_set_size) + loss_rate(self.slots, party_items);
        self.intersection * (1.0 - rate)
    }

    /// Expected false positives: delegate labels whose slot is occupied by
    /// a match in every other party by chance. Union sessions have none.
    pub fn expected_false_positives(&self, variant: Variant) -> f64 {
        if variant.is_union() {
            return 0.0;
        }
        let parties = self.parties.saturating_sub(1) as i32;
        expected_full_slots(self.slots, self.delegate_overlap - self.intersection)
            * (expected_full_slots(self.slots, self.party_set_size - self.intersection)
                / self.slots)
                .powi(parties)
    }

    /// Expected false negatives.
    pub fn expected_false_negatives(&self, variant: Variant) -> f64 {
        self.intersection - self.expected_true_matches(variant)
    }

    /// Expected computed cardinality.
    pub fn expected_intersection(&self, variant: Variant) -> f64 {
        self.expected_true_matches(variant) + self.expected_false_positives(variant)
    }
}

/// EC scalar multiplications performed by a participant in one session.
///
/// `participant` 0 is the delegate, `1..=parties` are the parties.
pub fn computation_cost(variant: Variant, participant: usize, slots: u64, set_size: u64) -> u64 {
    let touched = set_size.min(slots);
    let untouched = slots - touched;
    let (blinds, randoms, reductions) = match participant {
        // blind the offset, the touched slots, then every slot on unblind
        0 => (1 + touched + slots, untouched, 0),
        1 => (0, untouched, touched),
        _ if variant.is_union() => (0, 0, slots),
        _ => (0, untouched, touched),
    };
    blinds + randoms + 4 * reductions
}

/// Bytes a participant sends in its round: the `2 * slots + 1` points of a
/// map of `(Q, S)` pairs plus the offset, each both ways.
pub fn communication_cost(slots: u64, point_len: usize) -> u64 {
    2 * (2 * slots + 1) * point_len as u64
}
