//! # Multiparty Private Set Intersection (MPSI) Protocol
//!
//! This library implements delegated multiparty PSI cardinality and sum on
//! the NIST P-256 curve. A *delegate* holds a set of labels (optionally with
//! integer values); `n` *parties* each hold a set of labels. Together they
//! compute
//!
//! - **MPSI**: `|X0 ∩ X1 ∩ ... ∩ Xn|`
//! - **MPSIU**: `|X0 ∩ (X1 ∪ ... ∪ Xn)|`
//! - **MPSI-Sum / MPSIU-Sum**: the sum of the delegate's values over the same
//!   set, via threshold ElGamal
//!
//! without anyone learning which labels matched.
//!
//! ## Features
//!
//! - **Oblivious Hash Map**: Every participant places its labels into a map
//!   of exactly `2^n_bits` slots; untouched slots are filled with random
//!   decoys of the same shape.
//! - **In-Process Rounds**: Parties exchange plain Rust values; moving them
//!   over a network is left to the caller.
//! - **Slot-Parallel Phases**: Each phase runs one job per slot on a rayon
//!   pool, with per-job ChaCha20 streams derived from the caller's RNG so a
//!   seeded run is reproducible.
//! - **Type-State Pattern**: [`Session`] enforces the round order at compile
//!   time.
//!
//! ## Protocol Overview
//!
//! 1. **DelegateStart**: The delegate blinds its labels, `S = alpha * H(x)`,
//!    and attaches an encrypted payload to every slot.
//! 2. **Party Rounds**: Party 1 to party `n`, strictly in order, fold their
//!    own labels into the running map with randomized Diffie-Hellman
//!    reductions. A slot keeps `S = alpha * Q` only if the variant's
//!    condition holds for its label.
//! 3. **BlindEncrypt**: The last party seals each payload under a key derived
//!    from `S` and shuffles the `(Q, sealed)` entries.
//! 4. **DelegateFinish**: The delegate recomputes `alpha * Q`; the payloads
//!    that open are the matches.
//! 5. **JointDecryption** (sum variants): Every participant contributes a
//!    partial decryption of the summed payloads.
//!
//! ## Example Usage
//!
//! ```ignore
//! use mpsi_protocol::{ElGamal, EcGroup, Label, Session, Variant};
//! use std::sync::Arc;
//!
//! let mut rng = rand::rngs::OsRng;
//! let elgamal = Arc::new(ElGamal::new(EcGroup::p256(), 3, 33, &mut rng)?);
//!
//! let delegate = vec![Label::with_value("a", 10), Label::with_value("c", 30)];
//! let parties = vec![
//!     vec![Label::new("b"), Label::new("c")],
//!     vec![Label::new("c"), Label::new("d")],
//! ];
//!
//! let outcome = Session::new(Variant::MpsiSum, 10, delegate, parties, elgamal, &mut rng)?
//!     .run(&mut rng)?;
//! assert_eq!(outcome.cardinality, 1);
//! # Ok::<(), mpsi_protocol::PsiError>(())
//! ```
//!
//! ## Security Considerations
//!
//! - Labels sharing a slot within one set are dropped (first in sorted order
//!   wins), so results are approximate; see [`stats`] for the expected error.
//! - Every AEAD key seals exactly one plaintext, which the key-derived GCM
//!   nonce relies on.
//! - Participants are assumed honest-but-curious.
//!
//! ## Modules
//!
//! - [`group`] - P-256/P-384/P-521 arithmetic and point encoding
//! - [`hash_to_curve`] - SSWU hash-to-curve suites
//! - [`elgamal`] - CRT threshold ElGamal
//! - [`aead`] - AES-256-GCM sealing
//! - [`hashmap`] - Slot index and slot maps
//! - [`pool`] - Worker pool
//! - [`jobs`] - Worker inputs and outputs
//! - [`messages`] - Round messages
//! - [`delegate`] / [`party`] - The two roles
//! - [`state`] - Session type-state
//! - [`config`], [`dataset`], [`stats`] - Runs, input sets and estimates
//! - [`error`] - Error types

pub use config::ProtocolConfig;
pub use dataset::{ground_truth, Label, SampleData};
pub use delegate::{Delegate, Tally};
pub use elgamal::{Ciphertext, ElGamal};
pub use error::{PsiError, Result};
pub use group::{EcGroup, Point, Scalar};
pub use hash_to_curve::{HashToCurve, Suite};
pub use messages::{DelegateMessage, PsiOutcome, RunningMap, ShuffledMap, Variant};
pub use party::Party;
pub use state::{Blinded, Initialized, Reduced, Session, Unblinded};

pub mod aead;
pub mod config;
pub mod dataset;
pub mod delegate;
pub mod elgamal;
pub mod error;
pub mod group;
pub mod hash_to_curve;
pub mod hashmap;
pub mod jobs;
pub mod messages;
pub mod party;
pub mod pool;
pub mod state;
pub mod stats;
