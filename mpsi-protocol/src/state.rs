//! Protocol state management for a multiparty session.
//!
//! A [`Session`] owns the delegate and every party and moves through the
//! rounds in their only valid order, enforced by its type parameter:
//!
//! `Initialized -> Blinded -> Reduced -> Unblinded -> PsiOutcome`

use crate::config::ProtocolConfig;
use crate::dataset::{Label, SampleData};
use crate::delegate::{Delegate, Tally};
use crate::elgamal::ElGamal;
use crate::error::{PsiError, Result};
use crate::group::EcGroup;
use crate::messages::{DelegateMessage, PsiOutcome, RunningMap, ShuffledMap, Variant};
use crate::party::Party;
use rand::{CryptoRng, RngCore};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Participants are set up and share the aggregate public key.
#[derive(Debug)]
pub struct Initialized;

/// The delegate published its map.
#[derive(Debug)]
pub struct Blinded {
    message: DelegateMessage,
}

/// Every party ran its round and the last one returned the shuffled map.
#[derive(Debug)]
pub struct Reduced {
    shuffled: ShuffledMap,
}

/// The delegate counted the matching entries.
#[derive(Debug)]
pub struct Unblinded {
    tally: Tally,
}

#[derive(Debug)]
pub struct Session<S> {
    variant: Variant,
    n_bits: u32,
    delegate: Delegate,
    parties: Vec<Party>,
    state: S,
}

impl<S> Session<S> {
    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn n_bits(&self) -> u32 {
        self.n_bits
    }

    pub fn delegate(&self) -> &Delegate {
        &self.delegate
    }

    pub fn parties(&self) -> &[Party] {
        &self.parties
    }

    fn advance<T>(self, state: T) -> Session<T> {
        Session {
            variant: self.variant,
            n_bits: self.n_bits,
            delegate: self.delegate,
            parties: self.parties,
            state,
        }
    }
}

impl Session<Initialized> {
    /// Create a session over the delegate's set and one set per party.
    ///
    /// Every participant draws an ElGamal key share; the aggregate public
    /// key is handed to all of them before any round starts.
    ///
    /// # Arguments
    /// * `variant` - The set function to compute
    /// * `n_bits` - The hash map has `2^n_bits` slots
    /// * `delegate_labels` - The delegate's set, with values for sum variants
    /// * `party_labels` - One set per party, in round order
    /// * `elgamal` - Shared encryption context
    ///
    /// # Errors
    /// Returns `PsiError::InvalidConfig` without parties and
    /// `PsiError::EmptyInput` for an empty delegate set.
    pub fn new<R: RngCore + CryptoRng>(
        variant: Variant,
        n_bits: u32,
        delegate_labels: Vec<Label>,
        party_labels: Vec<Vec<Label>>,
        elgamal: Arc<ElGamal>,
        rng: &mut R,
    ) -> Result<Self> {
        if party_labels.is_empty() {
            return Err(PsiError::InvalidConfig(
                "a session needs at least one party".to_string(),
            ));
        }
        let n = party_labels.len();
        let mut delegate = Delegate::new(delegate_labels, elgamal.clone(), rng)?;
        let mut parties = party_labels
            .into_iter()
            .enumerate()
            .map(|(i, labels)| Party::new(i + 1, n, labels, elgamal.clone(), rng))
            .collect::<Result<Vec<_>>>()?;

        let keys: Vec<_> = std::iter::once(delegate.public_key().clone())
            .chain(parties.iter().map(|p| p.public_key().clone()))
            .collect();
        let aggregate_key = elgamal.aggregate_public_key(&keys);
        delegate.set_aggregate_key(aggregate_key.clone());
        for party in parties.iter_mut() {
            party.set_aggregate_key(aggregate_key.clone());
        }

        info!(variant = %variant, parties = n, n_bits, "session initialized");
        Ok(Self {
            variant,
            n_bits,
            delegate,
            parties,
            state: Initialized,
        })
    }

    /// Builds the ElGamal context from `config` and a session over `data`.
    ///
    /// # Errors
    /// Returns `PsiError::InvalidConfig` if `config` does not validate or
    /// `data` does not hold `config.parties + 1` sets, and
    /// `PsiError::InvalidModuli` if no moduli can be generated.
    pub fn from_config<R: RngCore + CryptoRng>(
        config: &ProtocolConfig,
        data: &SampleData,
        rng: &mut R,
    ) -> Result<Self> {
        config.validate()?;
        if data.sets.len() != config.parties + 1 {
            return Err(PsiError::InvalidConfig(format!(
                "expected {} input sets, got {}",
                config.parties + 1,
                data.sets.len()
            )));
        }
        let start = Instant::now();
        let elgamal = ElGamal::new(
            EcGroup::p256(),
            config.num_moduli,
            config.max_bits as usize,
            rng,
        )?;
        debug!(elapsed = ?start.elapsed(), "encryption context ready");

        Self::new(
            config.variant,
            config.n_bits,
            data.delegate().to_vec(),
            data.parties().to_vec(),
            Arc::new(elgamal),
            rng,
        )
    }

    /// DelegateStart.
    pub fn delegate_start<R: RngCore + CryptoRng>(self, rng: &mut R) -> Result<Session<Blinded>> {
        let start = Instant::now();
        let message = self.delegate.delegate_start(self.variant, self.n_bits, rng)?;
        debug!(elapsed = ?start.elapsed(), "delegate start");
        Ok(self.advance(Blinded { message }))
    }

    /// Runs DelegateStart through DelegateFinish and the joint decryption.
    pub fn run<R: RngCore + CryptoRng>(self, rng: &mut R) -> Result<PsiOutcome> {
        self.delegate_start(rng)?
            .party_rounds(rng)?
            .delegate_finish(rng)?
            .joint_decryption()
    }
}

impl Session<Blinded> {
    pub fn message(&self) -> &DelegateMessage {
        &self.state.message
    }

    /// Every party's round in order, then BlindEncrypt by the last party.
    pub fn party_rounds<R: RngCore + CryptoRng>(self, rng: &mut R) -> Result<Session<Reduced>> {
        let message = &self.state.message;
        let mut running: Option<RunningMap> = None;
        for party in &self.parties {
            let start = Instant::now();
            let next = party.round(self.variant, message, running.as_ref(), rng)?;
            debug!(party = party.id(), elapsed = ?start.elapsed(), "party round");
            running = Some(next);
        }

        let (last, running) = self
            .parties
            .last()
            .zip(running)
            .ok_or_else(|| PsiError::InvalidConfig("a session needs at least one party".to_string()))?;
        let start = Instant::now();
        let shuffled = last.blind_encrypt(message, &running, rng)?;
        debug!(elapsed = ?start.elapsed(), "blind encrypt");

        Ok(self.advance(Reduced { shuffled }))
    }
}

impl Session<Reduced> {
    pub fn shuffled(&self) -> &ShuffledMap {
        &self.state.shuffled
    }

    /// DelegateFinish.
    pub fn delegate_finish<R: RngCore + CryptoRng>(self, rng: &mut R) -> Result<Session<Unblinded>> {
        let start = Instant::now();
        let tally = self
            .delegate
            .delegate_finish(self.variant, &self.state.shuffled, rng)?;
        debug!(elapsed = ?start.elapsed(), "delegate finish");
        Ok(self.advance(Unblinded { tally }))
    }
}

impl Session<Unblinded> {
    pub fn cardinality(&self) -> usize {
        self.state.tally.cardinality
    }

    /// Collects every party's partial decryption of the summed payloads and
    /// lets the delegate recover the sum. Cardinality variants finish
    /// without decrypting.
    pub fn joint_decryption(self) -> Result<PsiOutcome> {
        let cardinality = self.state.tally.cardinality;
        let sum = match &self.state.tally.sum {
            Some(ct) => {
                let start = Instant::now();
                let partials: Vec<_> = self.parties.iter().map(|p| p.partial_decrypt(ct)).collect();
                let sum = self.delegate.joint_decryption(ct, &partials)?;
                debug!(elapsed = ?start.elapsed(), "joint decryption");
                Some(sum)
            }
            None => None,
        };

        info!(variant = %self.variant, cardinality, sum = ?sum, "session finished");
        Ok(PsiOutcome::new(cardinality, sum))
    }
}
