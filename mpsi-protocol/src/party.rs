//! A party holding one private set.
//!
//! Parties `1..=n` run their rounds in order, each turning the previous
//! party's running map into a new one. Party `n` then blind-encrypts the
//! payloads and shuffles the result for the delegate.

use crate::dataset::{normalize, Label};
use crate::elgamal::{Ciphertext, ElGamal};
use crate::error::{PsiError, Result};
use crate::group::{Point, Scalar};
use crate::hash_to_curve::HashToCurve;
use crate::hashmap::assign_slots;
use crate::jobs::{collect_slots, party_worker, PartyContext, PartyJob, PartyOutput};
use crate::messages::{DelegateMessage, RunningMap, ShuffledEntry, ShuffledMap, Variant};
use crate::pool::WorkerPool;
use crate::stats::expected_full_slots;
use rand::seq::SliceRandom;
use rand::{CryptoRng, RngCore};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct Party {
    id: usize,
    parties: usize,
    labels: Vec<Label>,
    secret: Scalar,
    public_key: Point,
    aggregate_key: Option<Point>,
    elgamal: Arc<ElGamal>,
    h2c: HashToCurve,
}

impl Party {
    /// Create party `id` of `parties` with a fresh ElGamal key share.
    ///
    /// # Arguments
    /// * `id` - Position in the round order, starting at 1
    /// * `parties` - Number of parties, not counting the delegate
    /// * `labels` - The private set; sorted and de-duplicated here
    /// * `elgamal` - Encryption context shared by the whole session
    ///
    /// # Errors
    /// Returns `PsiError::InvalidConfig` if `id` is not in `1..=parties`.
    pub fn new<R: RngCore + CryptoRng>(
        id: usize,
        parties: usize,
        labels: Vec<Label>,
        elgamal: Arc<ElGamal>,
        rng: &mut R,
    ) -> Result<Self> {
        if id == 0 || id > parties {
            return Err(PsiError::InvalidConfig(format!(
                "party id {id} is outside 1..={parties}"
            )));
        }
        let secret = elgamal.group().random_scalar(rng);
        let public_key = elgamal.public_key(&secret);
        let h2c = HashToCurve::for_protocol(elgamal.group());
        Ok(Self {
            id,
            parties,
            labels: normalize(labels),
            secret,
            public_key,
            aggregate_key: None,
            elgamal,
            h2c,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_last(&self) -> bool {
        self.id == self.parties
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    /// This party's share of the aggregate public key.
    pub fn public_key(&self) -> &Point {
        &self.public_key
    }

    pub fn set_aggregate_key(&mut self, key: Point) {
        self.aggregate_key = Some(key);
    }

    /// This party's share of the joint decryption of `ct`.
    pub fn partial_decrypt(&self, ct: &Ciphertext) -> Vec<Point> {
        self.elgamal.partial_decrypt(&self.secret, ct)
    }

    /// Intersection round: only slots every party so far touched with a
    /// matching label keep `S = alpha * Q`.
    pub fn mpsi<R: RngCore + CryptoRng>(
        &self,
        msg: &DelegateMessage,
        running: Option<&RunningMap>,
        rng: &mut R,
    ) -> Result<RunningMap> {
        self.round(Variant::Mpsi, msg, running, rng)
    }

    /// Union round: a matching label in any party keeps `S = alpha * Q`.
    pub fn mpsiu<R: RngCore + CryptoRng>(
        &self,
        msg: &DelegateMessage,
        running: Option<&RunningMap>,
        rng: &mut R,
    ) -> Result<RunningMap> {
        self.round(Variant::Mpsiu, msg, running, rng)
    }

    /// Runs this party's round of `variant` over the delegate's map and the
    /// previous party's running map.
    ///
    /// # Arguments
    /// * `variant` - Decides intersection or union semantics
    /// * `msg` - The delegate's published map
    /// * `running` - Output of party `id - 1`; `None` for party 1
    ///
    /// # Errors
    /// Returns `PsiError::InvalidConfig` if a later party has no running map
    /// or the two maps differ in size.
    pub fn round<R: RngCore + CryptoRng>(
        &self,
        variant: Variant,
        msg: &DelegateMessage,
        running: Option<&RunningMap>,
        rng: &mut R,
    ) -> Result<RunningMap> {
        let n_bits = msg.n_bits();
        let previous = match running {
            Some(map) if map.n_bits() != n_bits => {
                return Err(PsiError::InvalidConfig(format!(
                    "running map has 2^{} slots, delegate map has 2^{n_bits}",
                    map.n_bits()
                )))
            }
            Some(_) if self.id == 1 => {
                return Err(PsiError::InvalidConfig(
                    "party 1 starts the round and takes no running map".to_string(),
                ))
            }
            None if self.id > 1 => {
                return Err(PsiError::InvalidConfig(format!(
                    "party {} needs the running map of party {}",
                    self.id,
                    self.id - 1
                )))
            }
            other => other,
        };

        let (winners, occupancy) = assign_slots(self.labels.iter(), |l| l.name.as_str(), n_bits);
        let mut pool = WorkerPool::new(msg.len());
        for (slot, label) in winners {
            let label = label.name.clone();
            let m_s = msg.map[slot].s.clone();
            let job = match previous {
                Some(r) if !variant.is_union() => PartyJob::MpsiReduce {
                    label,
                    previous: r[slot].clone(),
                    m_s,
                },
                _ => PartyJob::HashAndReduce { label, m_s },
            };
            pool.submit(slot, job);
        }
        for slot in occupancy.untouched() {
            let job = match previous {
                Some(r) if variant.is_union() => PartyJob::Reduce {
                    slot: r[slot].clone(),
                },
                _ => PartyJob::Randomize,
            };
            pool.submit(slot, job);
        }

        let ctx = PartyContext {
            elgamal: &self.elgamal,
            h2c: &self.h2c,
            offset: &msg.offset,
            aggregate_key: self.aggregate_key.as_ref(),
        };
        let outputs = pool.run(party_worker, &ctx, rng);
        let map = collect_slots(n_bits, outputs, |out| match out {
            PartyOutput::Slot(slot) => Some(slot),
            PartyOutput::Sealed(_) => None,
        })?;

        info!(
            party = self.id,
            variant = %variant,
            slots = map.len(),
            touched = occupancy.touched_count(),
            "party round done"
        );
        debug!(
            party = self.id,
            labels = self.labels.len(),
            filled = occupancy.touched_count(),
            expected = expected_full_slots(map.len() as f64, self.labels.len() as f64),
            "slot occupancy"
        );
        Ok(map)
    }

    /// Seals every slot payload under `SHA-256(encode(S))` and shuffles the
    /// `(Q, sealed)` entries.
    ///
    /// Sum payloads are re-randomized under the aggregate key first so the
    /// delegate cannot link them to its own ciphertexts.
    ///
    /// # Errors
    /// Returns `PsiError::NotLastParty` unless this is party `n`, and
    /// `PsiError::MissingAggregateKey` if a sum payload arrives before the
    /// aggregate key was set.
    pub fn blind_encrypt<R: RngCore + CryptoRng>(
        &self,
        msg: &DelegateMessage,
        running: &RunningMap,
        rng: &mut R,
    ) -> Result<ShuffledMap> {
        if !self.is_last() {
            return Err(PsiError::NotLastParty {
                id: self.id,
                last: self.parties,
            });
        }
        if running.n_bits() != msg.n_bits() {
            return Err(PsiError::InvalidConfig(format!(
                "running map has 2^{} slots, delegate map has 2^{}",
                running.n_bits(),
                msg.n_bits()
            )));
        }

        let mut pool = WorkerPool::new(running.len());
        for ((slot, pair), delegate_slot) in (0u64..).zip(running.iter()).zip(msg.map.iter()) {
            pool.submit(
                slot,
                PartyJob::Encrypt {
                    s: pair.s.clone(),
                    payload: delegate_slot.payload.clone(),
                },
            );
        }

        let ctx = PartyContext {
            elgamal: &self.elgamal,
            h2c: &self.h2c,
            offset: &msg.offset,
            aggregate_key: self.aggregate_key.as_ref(),
        };
        let outputs = pool.run(party_worker, &ctx, rng);
        let sealed = collect_slots(running.n_bits(), outputs, |out| match out {
            PartyOutput::Sealed(bytes) => Some(bytes),
            PartyOutput::Slot(_) => None,
        })?;

        let mut entries: Vec<ShuffledEntry> = running
            .iter()
            .zip(sealed.into_vec())
            .map(|(pair, sealed)| ShuffledEntry {
                q: pair.q.clone(),
                sealed,
            })
            .collect();
        entries.shuffle(rng);

        info!(party = self.id, entries = entries.len(), "blind-encrypted running map");
        Ok(ShuffledMap::new(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::EcGroup;
    use crate::hashmap::{slot_index, SlotMap};
    use crate::messages::{DelegateSlot, Payload};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    // "a" to "e" land in distinct slots at this size
    const N_BITS: u32 = 8;

    struct Setup {
        elgamal: Arc<ElGamal>,
        h2c: HashToCurve,
        alpha: Scalar,
        msg: DelegateMessage,
    }

    /// A delegate map for `labels` built directly: `S = alpha * H(x)` on
    /// touched slots, random points elsewhere.
    fn setup(labels: &[&str], rng: &mut StdRng) -> Setup {
        let group = EcGroup::p256();
        let elgamal = Arc::new(ElGamal::new(group.clone(), 1, 8, rng).unwrap());
        let h2c = HashToCurve::for_protocol(&group);
        let alpha = group.random_scalar(rng);
        let offset = group.base_multiply(&alpha);

        let mut map = SlotMap::from_fn(N_BITS, |_| DelegateSlot {
            s: group.random_point(rng),
            payload: Payload::Sealed(vec![0u8; 48]),
        });
        map.apply(labels.iter().map(|label| {
            (
                slot_index(label, N_BITS),
                DelegateSlot {
                    s: group.multiply(&alpha, &h2c.hash_to_curve(label.as_bytes())),
                    payload: Payload::Sealed(vec![1u8; 48]),
                },
            )
        }));
        Setup {
            elgamal,
            h2c,
            alpha,
            msg: DelegateMessage::new(offset, map),
        }
    }

    fn party(id: usize, parties: usize, labels: &[&str], setup: &Setup, rng: &mut StdRng) -> Party {
        let labels = labels.iter().map(|l| Label::new(*l)).collect();
        Party::new(id, parties, labels, setup.elgamal.clone(), rng).unwrap()
    }

    fn matching_slot(setup: &Setup, map: &RunningMap, label: &str) -> bool {
        let slot = &map[slot_index(label, N_BITS)];
        slot.s == setup.elgamal.group().multiply(&setup.alpha, &slot.q)
    }

    fn count_matches(setup: &Setup, map: &RunningMap) -> usize {
        let group = setup.elgamal.group();
        map.iter()
            .filter(|slot| slot.s == group.multiply(&setup.alpha, &slot.q))
            .count()
    }

    #[test]
    fn test_new_rejects_bad_ids() {
        let mut rng = StdRng::seed_from_u64(1);
        let setup = setup(&[], &mut rng);
        for id in [0, 3] {
            let result = Party::new(id, 2, vec![], setup.elgamal.clone(), &mut rng);
            assert!(matches!(result, Err(PsiError::InvalidConfig(_))));
        }
    }

    #[test]
    fn test_mpsi_rounds() {
        let mut rng = StdRng::seed_from_u64(2);
        let setup = setup(&["a", "b", "c"], &mut rng);
        let p1 = party(1, 2, &["b", "c", "d"], &setup, &mut rng);
        let p2 = party(2, 2, &["c", "d", "e"], &setup, &mut rng);

        let r1 = p1.mpsi(&setup.msg, None, &mut rng).unwrap();
        assert_eq!(r1.len(), 1 << N_BITS);
        assert!(matching_slot(&setup, &r1, "b"));
        assert!(matching_slot(&setup, &r1, "c"));
        assert!(!matching_slot(&setup, &r1, "a"));

        let r2 = p2.mpsi(&setup.msg, Some(&r1), &mut rng).unwrap();
        assert!(matching_slot(&setup, &r2, "c"));
        assert!(!matching_slot(&setup, &r2, "b"), "b is missing from party 2");
        assert_eq!(count_matches(&setup, &r2), 1);
    }

    #[test]
    fn test_mpsiu_rounds() {
        let mut rng = StdRng::seed_from_u64(3);
        let setup = setup(&["a", "b", "c"], &mut rng);
        let p1 = party(1, 2, &["b", "c", "d"], &setup, &mut rng);
        let p2 = party(2, 2, &["c", "d", "e"], &setup, &mut rng);

        let r1 = p1.mpsiu(&setup.msg, None, &mut rng).unwrap();
        let r2 = p2.mpsiu(&setup.msg, Some(&r1), &mut rng).unwrap();
        assert!(matching_slot(&setup, &r2, "b"), "b should survive party 2");
        assert!(matching_slot(&setup, &r2, "c"));
        assert_eq!(count_matches(&setup, &r2), 2);
        assert_ne!(r1[slot_index("b", N_BITS)], r2[slot_index("b", N_BITS)]);
    }

    #[test]
    fn test_round_checks_running_map() {
        let mut rng = StdRng::seed_from_u64(4);
        let setup = setup(&["a"], &mut rng);
        let p1 = party(1, 2, &["a"], &setup, &mut rng);
        let p2 = party(2, 2, &["a"], &setup, &mut rng);

        assert!(matches!(
            p2.mpsi(&setup.msg, None, &mut rng),
            Err(PsiError::InvalidConfig(_))
        ));

        let r1 = p1.mpsi(&setup.msg, None, &mut rng).unwrap();
        assert!(matches!(
            p1.mpsi(&setup.msg, Some(&r1), &mut rng),
            Err(PsiError::InvalidConfig(_))
        ));

        let small = SlotMap::from_fn(N_BITS - 1, |i| r1[i].clone());
        assert!(matches!(
            p2.mpsi(&setup.msg, Some(&small), &mut rng),
            Err(PsiError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_blind_encrypt_only_last_party() {
        let mut rng = StdRng::seed_from_u64(5);
        let setup = setup(&["a"], &mut rng);
        let p1 = party(1, 2, &["a"], &setup, &mut rng);
        let r1 = p1.mpsi(&setup.msg, None, &mut rng).unwrap();

        assert_eq!(
            p1.blind_encrypt(&setup.msg, &r1, &mut rng),
            Err(PsiError::NotLastParty { id: 1, last: 2 })
        );
    }

    #[test]
    fn test_blind_encrypt_shuffles_and_seals() {
        let mut rng = StdRng::seed_from_u64(6);
        let setup = setup(&["a", "b"], &mut rng);
        let p1 = party(1, 1, &["a", "b"], &setup, &mut rng);
        let r1 = p1.mpsi(&setup.msg, None, &mut rng).unwrap();
        let shuffled = p1.blind_encrypt(&setup.msg, &r1, &mut rng).unwrap();

        assert_eq!(shuffled.len(), 1 << N_BITS);
        let in_order: Vec<&Point> = r1.iter().map(|slot| &slot.q).collect();
        let after: Vec<&Point> = shuffled.entries.iter().map(|e| &e.q).collect();
        assert_ne!(in_order, after, "Entries should be shuffled");

        // only the two matching entries open under alpha * Q
        let group = setup.elgamal.group();
        let opened = shuffled
            .entries
            .iter()
            .filter_map(|e| {
                let key = crate::aead::derive_key(&group.encode(&group.multiply(&setup.alpha, &e.q)));
                crate::aead::open(&e.sealed, &key).ok()
            })
            .collect::<Vec<_>>();
        assert_eq!(opened, vec![vec![1u8; 48]; 2]);
        // the hasher is shared with the delegate side
        assert_eq!(setup.h2c.suite(), p1.h2c.suite());
    }

    #[test]
    fn test_partial_decrypt_matches_key() {
        let mut rng = StdRng::seed_from_u64(7);
        let setup = setup(&[], &mut rng);
        let p = party(1, 1, &[], &setup, &mut rng);
        let ct = setup
            .elgamal
            .encrypt(p.public_key(), &num_bigint::BigUint::from(5u32), &mut rng);
        let partial = p.partial_decrypt(&ct);
        assert_eq!(
            setup.elgamal.combine_partials(&ct, &[partial]).unwrap(),
            num_bigint::BigUint::from(5u32)
        );
    }
}
