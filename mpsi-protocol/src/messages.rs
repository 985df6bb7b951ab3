//! Message types exchanged between the delegate and the parties.

use crate::elgamal::Ciphertext;
use crate::error::PsiError;
use crate::group::Point;
use crate::hashmap::SlotMap;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which set function a session computes.
///
/// With `X0` the delegate's set and `X1..Xn` the parties' sets:
/// - `Mpsi`: `|X0 ∩ X1 ∩ ... ∩ Xn|`
/// - `Mpsiu`: `|X0 ∩ (X1 ∪ ... ∪ Xn)|`
///
/// The `Sum` forms also add up the delegate's associated values over the
/// same set, revealing only the total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Variant {
    Mpsi,
    MpsiSum,
    Mpsiu,
    MpsiuSum,
}

impl Variant {
    pub const ALL: [Variant; 4] = [
        Variant::Mpsi,
        Variant::MpsiSum,
        Variant::Mpsiu,
        Variant::MpsiuSum,
    ];

    /// Whether the delegate's values are summed homomorphically.
    pub fn is_sum(&self) -> bool {
        matches!(self, Variant::MpsiSum | Variant::MpsiuSum)
    }

    /// Whether the parties' sets are combined by union.
    pub fn is_union(&self) -> bool {
        matches!(self, Variant::Mpsiu | Variant::MpsiuSum)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Variant::Mpsi => "mpsi",
            Variant::MpsiSum => "mpsi-sum",
            Variant::Mpsiu => "mpsiu",
            Variant::MpsiuSum => "mpsiu-sum",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Variant {
    type Err = PsiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Variant::ALL
            .into_iter()
            .find(|v| v.name() == s)
            .ok_or_else(|| PsiError::InvalidConfig(format!("unknown protocol variant '{s}'")))
    }
}

/// What the delegate attaches to each slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Encryption of the label's value under the aggregate key (sum variants).
    ElGamal(Ciphertext),
    /// AEAD-sealed label digest (cardinality variants).
    Sealed(Vec<u8>),
}

/// One slot of the delegate's published map.
///
/// Only the blinded companion `S = alpha * H(x)` is published; `H(x)` itself
/// stays with the delegate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegateSlot {
    pub s: Point,
    pub payload: Payload,
}

/// Output of DelegateStart, sent to every party.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegateMessage {
    /// `L = alpha * G`
    pub offset: Point,
    pub map: SlotMap<DelegateSlot>,
}

impl DelegateMessage {
    /// Create a new delegate message.
    ///
    /// # Arguments
    /// * `offset` - The delegate's public offset `L = alpha * G`
    /// * `map` - Blinded companions and payloads, one per slot
    pub fn new(offset: Point, map: SlotMap<DelegateSlot>) -> Self {
        Self { offset, map }
    }

    pub fn n_bits(&self) -> u32 {
        self.map.n_bits()
    }

    /// Returns the number of slots.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// A handle `Q` and its companion `S`. The pair encodes a match exactly when
/// `S = alpha * Q`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub q: Point,
    pub s: Point,
}

/// The map passed from party to party.
pub type RunningMap = SlotMap<Slot>;

/// A handle and the payload sealed under `SHA-256(encode(S))`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShuffledEntry {
    pub q: Point,
    pub sealed: Vec<u8>,
}

/// Output of BlindEncrypt: the last party's map, shuffled, sent back to the
/// delegate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShuffledMap {
    pub entries: Vec<ShuffledEntry>,
}

impl ShuffledMap {
    /// Create a new shuffled map.
    ///
    /// # Arguments
    /// * `entries` - Already shuffled `(Q, sealed)` entries
    pub fn new(entries: Vec<ShuffledEntry>) -> Self {
        Self { entries }
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the map contains no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Final result of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsiOutcome {
    /// Number of slots that unblinded successfully.
    pub cardinality: usize,
    /// Decrypted sum of the delegate's values (sum variants only).
    pub sum: Option<BigUint>,
}

impl PsiOutcome {
    /// Create a new outcome.
    ///
    /// # Arguments
    /// * `cardinality` - The computed set cardinality
    /// * `sum` - The jointly decrypted sum, if the variant computes one
    pub fn new(cardinality: usize, sum: Option<BigUint>) -> Self {
        Self { cardinality, sum }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_flags() {
        assert!(!Variant::Mpsi.is_sum());
        assert!(!Variant::Mpsi.is_union());
        assert!(Variant::MpsiSum.is_sum());
        assert!(Variant::Mpsiu.is_union());
        assert!(Variant::MpsiuSum.is_sum() && Variant::MpsiuSum.is_union());
    }

    #[test]
    fn test_variant_parse() {
        for variant in Variant::ALL {
            assert_eq!(variant.to_string().parse::<Variant>().unwrap(), variant);
        }
        assert!(matches!(
            "psi".parse::<Variant>(),
            Err(PsiError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_variant_serde() {
        let json = serde_json::to_string(&Variant::MpsiuSum).unwrap();
        assert_eq!(json, "\"mpsiu-sum\"");
        let back: Variant = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Variant::MpsiuSum);
    }

    #[test]
    fn test_delegate_message() {
        let map = SlotMap::from_fn(2, |_| DelegateSlot {
            s: Point::Infinity,
            payload: Payload::Sealed(vec![0u8; 48]),
        });
        let msg = DelegateMessage::new(Point::Infinity, map);
        assert_eq!(msg.len(), 4);
        assert_eq!(msg.n_bits(), 2);
        assert!(!msg.is_empty());
    }

    #[test]
    fn test_shuffled_map() {
        let entry = ShuffledEntry {
            q: Point::Infinity,
            sealed: vec![1, 2, 3],
        };
        let map = ShuffledMap::new(vec![entry.clone()]);
        assert_eq!(map.len(), 1);
        assert!(!map.is_empty());
        assert_eq!(map.entries[0], entry);

        assert!(ShuffledMap::new(vec![]).is_empty());
    }

    #[test]
    fn test_psi_outcome() {
        let outcome = PsiOutcome::new(2, Some(BigUint::from(50u32)));
        assert_eq!(outcome.cardinality, 2);
        assert_eq!(outcome.sum, Some(BigUint::from(50u32)));
    }
}
