//! The delegate: owner of the blinding exponent and of the final result.

use crate::aead::AeadKey;
use crate::config::MAX_N_BITS;
use crate::dataset::{normalize, Label};
use crate::elgamal::{Ciphertext, ElGamal};
use crate::error::{PsiError, Result};
use crate::group::{Point, Scalar};
use crate::hash_to_curve::HashToCurve;
use crate::hashmap::assign_slots;
use crate::jobs::{collect_slots, delegate_worker, DelegateContext, DelegateJob, DelegateOutput, PayloadMode};
use crate::messages::{DelegateMessage, ShuffledMap, Variant};
use crate::pool::WorkerPool;
use crate::stats::expected_collisions;
use num_bigint::BigUint;
use rand::{CryptoRng, RngCore};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct Delegate {
    labels: Vec<Label>,
    alpha: Scalar,
    offset: Point,
    payload_key: AeadKey,
    secret: Scalar,
    public_key: Point,
    aggregate_key: Option<Point>,
    elgamal: Arc<ElGamal>,
    h2c: HashToCurve,
}

/// What DelegateFinish learned from the shuffled map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tally {
    pub cardinality: usize,
    /// Homomorphic sum of the matching payloads (sum variants only).
    pub sum: Option<Ciphertext>,
}

impl Delegate {
    /// Create a delegate with a fresh blinding exponent `alpha`, payload key
    /// and ElGamal key share.
    ///
    /// # Errors
    /// Returns `PsiError::EmptyInput` if `labels` is empty.
    pub fn new<R: RngCore + CryptoRng>(
        labels: Vec<Label>,
        elgamal: Arc<ElGamal>,
        rng: &mut R,
    ) -> Result<Self> {
        if labels.is_empty() {
            return Err(PsiError::EmptyInput);
        }
        let group = elgamal.group();
        let alpha = group.random_scalar(rng);
        let offset = group.base_multiply(&alpha);
        let mut payload_key = AeadKey::default();
        rng.fill_bytes(&mut payload_key);
        let secret = group.random_scalar(rng);
        let public_key = elgamal.public_key(&secret);
        let h2c = HashToCurve::for_protocol(group);

        Ok(Self {
            labels: normalize(labels),
            alpha,
            offset,
            payload_key,
            secret,
            public_key,
            aggregate_key: None,
            elgamal,
            h2c,
        })
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    /// `L = alpha * G`
    pub fn offset(&self) -> &Point {
        &self.offset
    }

    pub fn public_key(&self) -> &Point {
        &self.public_key
    }

    pub fn set_aggregate_key(&mut self, key: Point) {
        self.aggregate_key = Some(key);
    }

    fn payload_mode(&self, variant: Variant) -> Result<PayloadMode<'_>> {
        if variant.is_sum() {
            let aggregate_key = self
                .aggregate_key
                .as_ref()
                .ok_or(PsiError::MissingAggregateKey)?;
            Ok(PayloadMode::Sum { aggregate_key })
        } else {
            Ok(PayloadMode::Cardinality {
                payload_key: &self.payload_key,
            })
        }
    }

    fn context(&self, variant: Variant) -> Result<DelegateContext<'_>> {
        Ok(DelegateContext {
            elgamal: &self.elgamal,
            h2c: &self.h2c,
            alpha: &self.alpha,
            payload: self.payload_mode(variant)?,
        })
    }

    /// Blinds the delegate's labels into a map of `2^n_bits` slots.
    ///
    /// Each touched slot carries `S = alpha * H(x)` and the label's payload;
    /// every other slot carries a random point and a decoy payload of the
    /// same shape. Of labels sharing a slot, the first in sorted order wins.
    ///
    /// # Errors
    /// Returns `PsiError::InvalidConfig` if `n_bits` exceeds the supported
    /// map size and `PsiError::MissingAggregateKey` for a sum variant
    /// without an aggregate key.
    pub fn delegate_start<R: RngCore + CryptoRng>(
        &self,
        variant: Variant,
        n_bits: u32,
        rng: &mut R,
    ) -> Result<DelegateMessage> {
        if n_bits > MAX_N_BITS {
            return Err(PsiError::InvalidConfig(format!(
                "n_bits must be at most {MAX_N_BITS}, got {n_bits}"
            )));
        }
        let ctx = self.context(variant)?;

        let (winners, occupancy) = assign_slots(self.labels.iter(), |l| l.name.as_str(), n_bits);
        let mut pool = WorkerPool::new(occupancy.size() as usize);
        for (slot, label) in winners {
            pool.submit(
                slot,
                DelegateJob::Blind {
                    slot,
                    label: label.name.clone(),
                    value: label.value.unwrap_or(0),
                },
            );
        }
        for slot in occupancy.untouched() {
            pool.submit(slot, DelegateJob::Randomize);
        }

        let outputs = pool.run(delegate_worker, &ctx, rng);
        let map = collect_slots(n_bits, outputs, |out| match out {
            DelegateOutput::Slot(slot) => Some(slot),
            DelegateOutput::Unblinded(_) => None,
        })?;

        info!(
            variant = %variant,
            slots = map.len(),
            labels = self.labels.len(),
            "delegate map published"
        );
        debug!(
            dropped = self.labels.len() as u64 - occupancy.touched_count(),
            expected = expected_collisions(map.len() as f64, self.labels.len() as f64),
            "delegate slot collisions"
        );
        Ok(DelegateMessage::new(self.offset.clone(), map))
    }

    /// Unblinds the shuffled map: an entry counts when its payload opens
    /// under `SHA-256(encode(alpha * Q))`.
    ///
    /// Sum variants add the opened ciphertexts homomorphically; with no
    /// match the sum is a fresh encryption of zero.
    ///
    /// # Errors
    /// Returns `PsiError::InvalidCiphertextLength` or `PsiError::InvalidPoint`
    /// if an opened payload is not a well-formed ciphertext, and
    /// `PsiError::InvalidModuli` if more payloads matched than the moduli
    /// can sum.
    pub fn delegate_finish<R: RngCore + CryptoRng>(
        &self,
        variant: Variant,
        shuffled: &ShuffledMap,
        rng: &mut R,
    ) -> Result<Tally> {
        let ctx = self.context(variant)?;
        let mut pool = WorkerPool::new(shuffled.len());
        for (id, entry) in (0u64..).zip(&shuffled.entries) {
            pool.submit(
                id,
                DelegateJob::Unblind {
                    q: entry.q.clone(),
                    sealed: entry.sealed.clone(),
                },
            );
        }

        let mut opened = Vec::new();
        for (id, out) in pool.run(delegate_worker, &ctx, rng) {
            match out? {
                DelegateOutput::Unblinded(Some(plaintext)) => opened.push(plaintext),
                DelegateOutput::Unblinded(None) => {}
                DelegateOutput::Slot(_) => {
                    return Err(PsiError::UnexpectedOutput(format!(
                        "unblind job {id} produced a slot"
                    )))
                }
            }
        }
        let cardinality = opened.len();

        let sum = match ctx.payload {
            PayloadMode::Sum { aggregate_key } => {
                if cardinality as u64 > self.elgamal.max_additions() {
                    return Err(PsiError::InvalidModuli(format!(
                        "{cardinality} matching payloads overflow the discrete-log reach of the CRT moduli"
                    )));
                }
                let mut acc = self.elgamal.encrypt(aggregate_key, &BigUint::default(), rng);
                for plaintext in &opened {
                    let ct = self.elgamal.from_bytes(plaintext)?;
                    self.elgamal.add_assign(&mut acc, &ct);
                }
                Some(acc)
            }
            PayloadMode::Cardinality { .. } => None,
        };

        info!(variant = %variant, cardinality, entries = shuffled.len(), "delegate finished");
        Ok(Tally { cardinality, sum })
    }

    /// This delegate's share of the joint decryption of `ct`.
    pub fn partial_decrypt(&self, ct: &Ciphertext) -> Vec<Point> {
        self.elgamal.partial_decrypt(&self.secret, ct)
    }

    /// Combines the delegate's own partial decryption with the parties' and
    /// recovers the sum.
    ///
    /// # Errors
    /// Returns `PsiError::DiscreteLogNotFound` if a partial is missing or
    /// wrong, or the sum is out of range.
    pub fn joint_decryption(&self, ct: &Ciphertext, partials: &[Vec<Point>]) -> Result<BigUint> {
        let mut all = Vec::with_capacity(partials.len() + 1);
        all.push(self.partial_decrypt(ct));
        all.extend_from_slice(partials);
        let sum = self.elgamal.combine_partials(ct, &all)?;
        info!(shares = all.len(), "joint decryption done");
        Ok(sum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::EcGroup;
    use crate::hashmap::slot_index;
    use crate::messages::{Payload, ShuffledEntry};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const N_BITS: u32 = 8;

    fn elgamal(rng: &mut StdRng) -> Arc<ElGamal> {
        Arc::new(ElGamal::new(EcGroup::p256(), 2, 16, rng).unwrap())
    }

    fn labels() -> Vec<Label> {
        vec![
            Label::with_value("c", 30),
            Label::with_value("a", 10),
            Label::with_value("b", 20),
        ]
    }

    #[test]
    fn test_new_rejects_empty_set() {
        let mut rng = StdRng::seed_from_u64(1);
        let eg = elgamal(&mut rng);
        assert!(matches!(
            Delegate::new(vec![], eg, &mut rng),
            Err(PsiError::EmptyInput)
        ));
    }

    #[test]
    fn test_delegate_start_blinds_touched_slots() {
        let mut rng = StdRng::seed_from_u64(2);
        let eg = elgamal(&mut rng);
        let delegate = Delegate::new(labels(), eg.clone(), &mut rng).unwrap();
        assert_eq!(delegate.labels()[0].name, "a");

        let msg = delegate.delegate_start(Variant::Mpsi, N_BITS, &mut rng).unwrap();
        assert_eq!(msg.len(), 1 << N_BITS);
        assert_eq!(&msg.offset, delegate.offset());

        let group = eg.group();
        let h2c = HashToCurve::for_protocol(group);
        for label in ["a", "b", "c"] {
            let slot = &msg.map[slot_index(label, N_BITS)];
            assert_eq!(
                slot.s,
                group.multiply(&delegate.alpha, &h2c.hash_to_curve(label.as_bytes()))
            );
        }
        assert!(msg
            .map
            .iter()
            .all(|slot| matches!(&slot.payload, Payload::Sealed(b) if b.len() == 48)));
    }

    #[test]
    fn test_delegate_start_requires_aggregate_key_for_sums() {
        let mut rng = StdRng::seed_from_u64(3);
        let eg = elgamal(&mut rng);
        let mut delegate = Delegate::new(labels(), eg, &mut rng).unwrap();

        assert_eq!(
            delegate.delegate_start(Variant::MpsiSum, N_BITS, &mut rng),
            Err(PsiError::MissingAggregateKey)
        );
        delegate.set_aggregate_key(delegate.public_key().clone());
        let msg = delegate.delegate_start(Variant::MpsiSum, N_BITS, &mut rng).unwrap();
        assert!(msg
            .map
            .iter()
            .all(|slot| matches!(&slot.payload, Payload::ElGamal(ct) if ct.len() == 2)));
    }

    #[test]
    fn test_delegate_start_rejects_huge_maps() {
        let mut rng = StdRng::seed_from_u64(4);
        let eg = elgamal(&mut rng);
        let delegate = Delegate::new(labels(), eg, &mut rng).unwrap();
        assert!(matches!(
            delegate.delegate_start(Variant::Mpsi, MAX_N_BITS + 1, &mut rng),
            Err(PsiError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_delegate_finish_counts_and_sums() {
        let mut rng = StdRng::seed_from_u64(5);
        let eg = elgamal(&mut rng);
        let mut delegate = Delegate::new(labels(), eg.clone(), &mut rng).unwrap();
        let apk = delegate.public_key().clone();
        delegate.set_aggregate_key(apk.clone());
        let group = eg.group();

        // two matching entries and one decoy, sealed the way the last party does
        let entry = |value: u64, matching: bool, rng: &mut StdRng| {
            let q = group.random_point(rng);
            let s = if matching {
                group.multiply(&delegate.alpha, &q)
            } else {
                group.random_point(rng)
            };
            let ct = eg.encrypt(&apk, &BigUint::from(value), rng);
            let key = crate::aead::derive_key(&group.encode(&s));
            ShuffledEntry {
                q,
                sealed: crate::aead::seal(&eg.to_bytes(&ct), &key).unwrap(),
            }
        };
        let shuffled = ShuffledMap::new(vec![
            entry(20, true, &mut rng),
            entry(99, false, &mut rng),
            entry(30, true, &mut rng),
        ]);

        let result = delegate
            .delegate_finish(Variant::MpsiSum, &shuffled, &mut rng)
            .unwrap();
        assert_eq!(result.cardinality, 2);
        let sum = result.sum.expect("sum variant should produce a ciphertext");
        assert_eq!(delegate.joint_decryption(&sum, &[]).unwrap(), BigUint::from(50u32));
    }

    #[test]
    fn test_delegate_finish_rejects_unsummable_matches() {
        let mut rng = StdRng::seed_from_u64(8);
        // 26-bit moduli: a second summand can already leave the BSGS range
        let eg = Arc::new(ElGamal::new(EcGroup::p256(), 2, 50, &mut rng).unwrap());
        assert!(eg.max_additions() < 3);
        let mut delegate = Delegate::new(labels(), eg.clone(), &mut rng).unwrap();
        let apk = delegate.public_key().clone();
        delegate.set_aggregate_key(apk.clone());
        let group = eg.group();

        let entries = (0..3)
            .map(|_| {
                let q = group.random_point(&mut rng);
                let key = crate::aead::derive_key(&group.encode(&group.multiply(&delegate.alpha, &q)));
                let ct = eg.encrypt(&apk, &BigUint::from(1u64 << 40), &mut rng);
                ShuffledEntry {
                    q,
                    sealed: crate::aead::seal(&eg.to_bytes(&ct), &key).unwrap(),
                }
            })
            .collect();
        assert!(matches!(
            delegate.delegate_finish(Variant::MpsiSum, &ShuffledMap::new(entries), &mut rng),
            Err(PsiError::InvalidModuli(_))
        ));
    }

    #[test]
    fn test_delegate_finish_without_matches() {
        let mut rng = StdRng::seed_from_u64(6);
        let eg = elgamal(&mut rng);
        let mut delegate = Delegate::new(labels(), eg.clone(), &mut rng).unwrap();
        delegate.set_aggregate_key(delegate.public_key().clone());

        let shuffled = ShuffledMap::new(vec![ShuffledEntry {
            q: eg.group().random_point(&mut rng),
            sealed: vec![0u8; 64],
        }]);
        let result = delegate
            .delegate_finish(Variant::MpsiuSum, &shuffled, &mut rng)
            .unwrap();
        assert_eq!(result.cardinality, 0);
        let sum = result.sum.unwrap();
        assert_eq!(delegate.joint_decryption(&sum, &[]).unwrap(), BigUint::default());

        let card = delegate
            .delegate_finish(Variant::Mpsi, &shuffled, &mut rng)
            .unwrap();
        assert_eq!(card, Tally { cardinality: 0, sum: None });
    }

    #[test]
    fn test_joint_decryption_needs_every_share() {
        let mut rng = StdRng::seed_from_u64(7);
        let eg = elgamal(&mut rng);
        let delegate = Delegate::new(labels(), eg.clone(), &mut rng).unwrap();
        let other = eg.group().random_scalar(&mut rng);
        let apk = eg.aggregate_public_key(&[delegate.public_key().clone(), eg.public_key(&other)]);
        let ct = eg.encrypt(&apk, &BigUint::from(123u32), &mut rng);

        let share = eg.partial_decrypt(&other, &ct);
        assert_eq!(
            delegate.joint_decryption(&ct, &[share]).unwrap(),
            BigUint::from(123u32)
        );
        assert_eq!(
            delegate.joint_decryption(&ct, &[]),
            Err(PsiError::DiscreteLogNotFound)
        );
    }
}
