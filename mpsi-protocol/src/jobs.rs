//! Worker inputs, outputs and worker functions for the slot-parallel phases.
//!
//! Each phase submits one job per slot (or per shuffled entry) to a
//! [`WorkerPool`](crate::pool::WorkerPool). Contexts are read-only for the
//! whole phase. A payload that fails to open is a `None` output, not an
//! error.

use crate::aead::{self, AeadKey};
use crate::elgamal::ElGamal;
use crate::error::{PsiError, Result};
use crate::group::{Point, Scalar};
use crate::hash_to_curve::HashToCurve;
use crate::hashmap::SlotMap;
use crate::messages::{DelegateSlot, Payload, Slot};
use num_bigint::BigUint;
use rand::RngCore;
use rand_chacha::ChaCha20Rng;
use sha2::{Digest, Sha256};

/// Decoy payload size in cardinality sessions: a sealed SHA-256 digest.
pub const SEALED_DIGEST_LEN: usize = 32 + aead::TAG_SIZE;

/// How the delegate fills slot payloads.
#[derive(Debug, Clone, Copy)]
pub enum PayloadMode<'a> {
    /// Encrypt label values under the aggregate public key.
    Sum { aggregate_key: &'a Point },
    /// Seal label digests under per-slot keys.
    Cardinality { payload_key: &'a AeadKey },
}

pub struct DelegateContext<'a> {
    pub elgamal: &'a ElGamal,
    pub h2c: &'a HashToCurve,
    pub alpha: &'a Scalar,
    pub payload: PayloadMode<'a>,
}

#[derive(Debug, Clone)]
pub enum DelegateJob {
    /// A slot holding one of the delegate's labels.
    Blind { slot: u64, label: String, value: u64 },
    /// A slot no label landed in.
    Randomize,
    /// One entry of the shuffled map.
    Unblind { q: Point, sealed: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelegateOutput {
    Slot(DelegateSlot),
    Unblinded(Option<Vec<u8>>),
}

pub fn delegate_worker(
    ctx: &DelegateContext<'_>,
    job: DelegateJob,
    rng: &mut ChaCha20Rng,
) -> Result<DelegateOutput> {
    let group = ctx.elgamal.group();
    match job {
        DelegateJob::Blind { slot, label, value } => {
            let s = group.multiply(ctx.alpha, &ctx.h2c.hash_to_curve(label.as_bytes()));
            let payload = match ctx.payload {
                PayloadMode::Sum { aggregate_key } => {
                    Payload::ElGamal(ctx.elgamal.encrypt(aggregate_key, &BigUint::from(value), rng))
                }
                PayloadMode::Cardinality { payload_key } => {
                    let key = aead::derive_slot_key(payload_key, slot);
                    Payload::Sealed(aead::seal(&Sha256::digest(label.as_bytes()), &key)?)
                }
            };
            Ok(DelegateOutput::Slot(DelegateSlot { s, payload }))
        }
        DelegateJob::Randomize => {
            let s = group.random_point(rng);
            let payload = match ctx.payload {
                PayloadMode::Sum { aggregate_key } => {
                    Payload::ElGamal(ctx.elgamal.random_ciphertext(aggregate_key, rng))
                }
                PayloadMode::Cardinality { .. } => {
                    let mut decoy = vec![0u8; SEALED_DIGEST_LEN];
                    rng.fill_bytes(&mut decoy);
                    Payload::Sealed(decoy)
                }
            };
            Ok(DelegateOutput::Slot(DelegateSlot { s, payload }))
        }
        DelegateJob::Unblind { q, sealed } => {
            let s = group.multiply(ctx.alpha, &q);
            let key = aead::derive_key(&group.encode(&s));
            Ok(DelegateOutput::Unblinded(aead::open(&sealed, &key).ok()))
        }
    }
}

pub struct PartyContext<'a> {
    pub elgamal: &'a ElGamal,
    pub h2c: &'a HashToCurve,
    /// The delegate's `L = alpha * G`.
    pub offset: &'a Point,
    pub aggregate_key: Option<&'a Point>,
}

#[derive(Debug, Clone)]
pub enum PartyJob {
    /// Replace the slot with a fresh random pair.
    Randomize,
    /// Re-randomize a pair while keeping whether it matches.
    Reduce { slot: Slot },
    /// Start a slot from the party's own label and the delegate's companion.
    HashAndReduce { label: String, m_s: Point },
    /// Fold the party's label into the running pair of an intersection
    /// session.
    MpsiReduce { label: String, previous: Slot, m_s: Point },
    /// Seal a slot payload under a key derived from the final companion.
    Encrypt { s: Point, payload: Payload },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartyOutput {
    Slot(Slot),
    Sealed(Vec<u8>),
}

pub fn party_worker(
    ctx: &PartyContext<'_>,
    job: PartyJob,
    rng: &mut ChaCha20Rng,
) -> Result<PartyOutput> {
    let group = ctx.elgamal.group();
    let offset = ctx.offset;
    let slot = |(q, s): (Point, Point)| Ok(PartyOutput::Slot(Slot { q, s }));

    match job {
        PartyJob::Randomize => slot((group.random_point(rng), group.random_point(rng))),
        PartyJob::Reduce { slot: previous } => {
            slot(group.reduce(offset, &previous.q, &previous.s, rng))
        }
        PartyJob::HashAndReduce { label, m_s } => {
            let h = ctx.h2c.hash_to_curve(label.as_bytes());
            slot(group.reduce(offset, &h, &m_s, rng))
        }
        PartyJob::MpsiReduce {
            label,
            previous,
            m_s,
        } => {
            let h = ctx.h2c.hash_to_curve(label.as_bytes());
            slot(group.reduce_pair(offset, (&previous.q, &previous.s), (&h, &m_s), rng))
        }
        PartyJob::Encrypt { s, payload } => {
            let plaintext = match payload {
                Payload::Sealed(bytes) => bytes,
                Payload::ElGamal(mut ct) => {
                    let apk = ctx.aggregate_key.ok_or(PsiError::MissingAggregateKey)?;
                    ctx.elgamal.rerandomize(apk, &mut ct, rng);
                    ctx.elgamal.to_bytes(&ct)
                }
            };
            let key = aead::derive_key(&group.encode(&s));
            Ok(PartyOutput::Sealed(aead::seal(&plaintext, &key)?))
        }
    }
}

/// Reassembles a map from pool outputs that must all be slots.
pub(crate) fn collect_slots<T, O>(
    n_bits: u32,
    outputs: Vec<(u64, Result<O>)>,
    unwrap: impl Fn(O) -> Option<T>,
) -> Result<SlotMap<T>> {
    let slots = outputs
        .into_iter()
        .map(|(id, out)| {
            let value = unwrap(out?)
                .ok_or_else(|| PsiError::UnexpectedOutput(format!("job {id} did not produce a slot")))?;
            Ok((id, value))
        })
        .collect::<Result<Vec<_>>>()?;
    SlotMap::from_outputs(n_bits, slots)
        .ok_or_else(|| PsiError::UnexpectedOutput("worker outputs do not cover every slot".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::EcGroup;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    struct Fixture {
        elgamal: ElGamal,
        h2c: HashToCurve,
        alpha: Scalar,
        offset: Point,
        secret: Scalar,
        public_key: Point,
    }

    fn fixture() -> Fixture {
        let mut rng = StdRng::seed_from_u64(11);
        let group = EcGroup::p256();
        let elgamal = ElGamal::new(group.clone(), 2, 16, &mut rng).unwrap();
        let h2c = HashToCurve::for_protocol(&group);
        let alpha = group.random_scalar(&mut rng);
        let offset = group.base_multiply(&alpha);
        let secret = group.random_scalar(&mut rng);
        let public_key = elgamal.public_key(&secret);
        Fixture {
            elgamal,
            h2c,
            alpha,
            offset,
            secret,
            public_key,
        }
    }

    fn job_rng() -> ChaCha20Rng {
        ChaCha20Rng::seed_from_u64(3)
    }

    fn as_slot(out: Result<DelegateOutput>) -> DelegateSlot {
        match out.unwrap() {
            DelegateOutput::Slot(slot) => slot,
            other => panic!("expected a slot, got {other:?}"),
        }
    }

    #[test]
    fn test_blind_relates_to_hash() {
        let f = fixture();
        let key = [7u8; 32];
        let ctx = DelegateContext {
            elgamal: &f.elgamal,
            h2c: &f.h2c,
            alpha: &f.alpha,
            payload: PayloadMode::Cardinality { payload_key: &key },
        };
        let job = DelegateJob::Blind {
            slot: 5,
            label: "c".to_string(),
            value: 0,
        };
        let slot = as_slot(delegate_worker(&ctx, job, &mut job_rng()));

        let group = f.elgamal.group();
        let h = f.h2c.hash_to_curve(b"c");
        assert_eq!(slot.s, group.multiply(&f.alpha, &h));

        let Payload::Sealed(sealed) = slot.payload else {
            panic!("cardinality payloads should be sealed");
        };
        assert_eq!(sealed.len(), SEALED_DIGEST_LEN);
        let opened = aead::open(&sealed, &aead::derive_slot_key(&key, 5)).unwrap();
        assert_eq!(opened, Sha256::digest(b"c").to_vec());
    }

    #[test]
    fn test_decoys_match_real_shapes() {
        let f = fixture();
        let key = [7u8; 32];
        let card = DelegateContext {
            elgamal: &f.elgamal,
            h2c: &f.h2c,
            alpha: &f.alpha,
            payload: PayloadMode::Cardinality { payload_key: &key },
        };
        let decoy = as_slot(delegate_worker(&card, DelegateJob::Randomize, &mut job_rng()));
        assert!(matches!(decoy.payload, Payload::Sealed(ref b) if b.len() == SEALED_DIGEST_LEN));
        assert!(f.elgamal.group().is_on_curve(&decoy.s));

        let sum = DelegateContext {
            payload: PayloadMode::Sum {
                aggregate_key: &f.public_key,
            },
            ..card
        };
        let real = as_slot(delegate_worker(
            &sum,
            DelegateJob::Blind {
                slot: 0,
                label: "a".to_string(),
                value: 10,
            },
            &mut job_rng(),
        ));
        let decoy = as_slot(delegate_worker(&sum, DelegateJob::Randomize, &mut job_rng()));
        match (real.payload, decoy.payload) {
            (Payload::ElGamal(real), Payload::ElGamal(decoy)) => {
                assert_eq!(real.len(), decoy.len());
                assert_eq!(f.elgamal.decrypt(&f.secret, &real).unwrap(), BigUint::from(10u32));
                assert_eq!(f.elgamal.decrypt(&f.secret, &decoy).unwrap(), BigUint::from(0u32));
            }
            other => panic!("sum payloads should be ciphertexts, got {other:?}"),
        }
    }

    #[test]
    fn test_party_jobs_preserve_relation() {
        let f = fixture();
        let group = f.elgamal.group();
        let ctx = PartyContext {
            elgamal: &f.elgamal,
            h2c: &f.h2c,
            offset: &f.offset,
            aggregate_key: None,
        };
        let m_s = group.multiply(&f.alpha, &f.h2c.hash_to_curve(b"c"));
        let matches = |out: Result<PartyOutput>| match out.unwrap() {
            PartyOutput::Slot(slot) => slot.s == group.multiply(&f.alpha, &slot.q),
            PartyOutput::Sealed(_) => panic!("expected a slot"),
        };
        let mut rng = job_rng();

        let first = party_worker(
            &ctx,
            PartyJob::HashAndReduce {
                label: "c".to_string(),
                m_s: m_s.clone(),
            },
            &mut rng,
        );
        let PartyOutput::Slot(previous) = first.clone().unwrap() else {
            panic!("expected a slot");
        };
        assert!(matches(first), "Same label should keep the relation");

        let folded = party_worker(
            &ctx,
            PartyJob::MpsiReduce {
                label: "c".to_string(),
                previous: previous.clone(),
                m_s: m_s.clone(),
            },
            &mut rng,
        );
        assert!(matches(folded));

        let wrong = party_worker(
            &ctx,
            PartyJob::MpsiReduce {
                label: "d".to_string(),
                previous: previous.clone(),
                m_s,
            },
            &mut rng,
        );
        assert!(!matches(wrong), "A different label should break the relation");

        assert!(matches(party_worker(&ctx, PartyJob::Reduce { slot: previous }, &mut rng)));
        assert!(!matches(party_worker(&ctx, PartyJob::Randomize, &mut rng)));
    }

    #[test]
    fn test_encrypt_then_unblind() {
        let f = fixture();
        let group = f.elgamal.group();
        let party_ctx = PartyContext {
            elgamal: &f.elgamal,
            h2c: &f.h2c,
            offset: &f.offset,
            aggregate_key: Some(&f.public_key),
        };
        let delegate_ctx = DelegateContext {
            elgamal: &f.elgamal,
            h2c: &f.h2c,
            alpha: &f.alpha,
            payload: PayloadMode::Sum {
                aggregate_key: &f.public_key,
            },
        };
        let q = group.random_point(&mut StdRng::seed_from_u64(1));
        let s = group.multiply(&f.alpha, &q);
        let ct = f.elgamal.encrypt(&f.public_key, &BigUint::from(42u32), &mut job_rng());
        let encrypt = |s: Point| {
            let job = PartyJob::Encrypt {
                s,
                payload: Payload::ElGamal(ct.clone()),
            };
            match party_worker(&party_ctx, job, &mut job_rng()).unwrap() {
                PartyOutput::Sealed(bytes) => bytes,
                PartyOutput::Slot(_) => panic!("expected sealed bytes"),
            }
        };
        let unblind = |sealed: Vec<u8>| {
            let job = DelegateJob::Unblind {
                q: q.clone(),
                sealed,
            };
            match delegate_worker(&delegate_ctx, job, &mut job_rng()).unwrap() {
                DelegateOutput::Unblinded(opened) => opened,
                DelegateOutput::Slot(_) => panic!("expected an unblind result"),
            }
        };

        let opened = unblind(encrypt(s)).expect("matching slot should open");
        let rerandomized = f.elgamal.from_bytes(&opened).unwrap();
        assert_ne!(rerandomized, ct, "Payload should be re-randomized");
        assert_eq!(
            f.elgamal.decrypt(&f.secret, &rerandomized).unwrap(),
            BigUint::from(42u32)
        );

        assert_eq!(unblind(encrypt(group.random_point(&mut job_rng()))), None);
    }

    #[test]
    fn test_encrypt_requires_aggregate_key() {
        let f = fixture();
        let ctx = PartyContext {
            elgamal: &f.elgamal,
            h2c: &f.h2c,
            offset: &f.offset,
            aggregate_key: None,
        };
        let ct = f.elgamal.random_ciphertext(&f.public_key, &mut job_rng());
        let job = PartyJob::Encrypt {
            s: f.offset.clone(),
            payload: Payload::ElGamal(ct),
        };
        assert_eq!(
            party_worker(&ctx, job, &mut job_rng()),
            Err(PsiError::MissingAggregateKey)
        );
    }

    #[test]
    fn test_collect_slots() {
        let outputs: Vec<(u64, Result<u32>)> = vec![(1, Ok(10)), (0, Ok(20))];
        let map = collect_slots(1, outputs, Some).unwrap();
        assert_eq!(map.into_vec(), vec![20, 10]);

        let missing: Vec<(u64, Result<u32>)> = vec![(0, Ok(1))];
        assert!(matches!(
            collect_slots(1, missing, Some),
            Err(PsiError::UnexpectedOutput(_))
        ));

        let failed: Vec<(u64, Result<u32>)> = vec![(0, Ok(1)), (1, Err(PsiError::AuthenticationFailed))];
        assert_eq!(
            collect_slots(1, failed, Some).unwrap_err(),
            PsiError::AuthenticationFailed
        );

        let wrong_kind: Vec<(u64, Result<u32>)> = vec![(0, Ok(1)), (1, Ok(2))];
        assert!(matches!(
            collect_slots(1, wrong_kind, |v: u32| (v == 1).then_some(v)),
            Err(PsiError::UnexpectedOutput(_))
        ));
    }
}
