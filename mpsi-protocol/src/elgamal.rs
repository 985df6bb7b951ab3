//! Additively homomorphic, threshold ElGamal over curve points.
//!
//! A plaintext `m` is split into its residues modulo a handful of small,
//! pairwise coprime moduli `n_i`, and each residue is encrypted "in the
//! exponent" as `(k*G, k*pk + (m mod n_i)*G)`. Decryption recovers every
//! residue with a baby-step giant-step discrete log and recombines them with
//! the Chinese remainder theorem, so the plaintext space is `Z_N` with
//! `N = prod(n_i)` while each discrete log stays small.
//!
//! Ciphertexts add component-wise. Because CRT recombination reduces modulo
//! `N` at the end, residues that have grown past `n_i` through homomorphic
//! additions still decode correctly as long as they stay inside the
//! discrete-log search range.

use crate::error::{PsiError, Result};
use crate::group::{EcGroup, Point, Scalar};
use num_bigint::{BigUint, RandBigInt};
use num_integer::Integer;
use num_traits::{One, ToPrimitive, Zero};
use rand::{CryptoRng, RngCore};
use std::collections::HashMap;
use tracing::debug;

/// The baby-step table holds `k*G` for `k` in `[0, 2^DLOG_TABLE_BITS)`.
pub const DLOG_TABLE_BITS: u32 = 13;

/// Residues of `2 * DLOG_TABLE_BITS` bits or more are out of BSGS reach.
const MAX_MODULUS_BITS: usize = 2 * DLOG_TABLE_BITS as usize;

const MILLER_RABIN_BASES: [u32; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];

/// One `(C1, C2)` pair per CRT modulus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ciphertext {
    pairs: Vec<(Point, Point)>,
}

impl Ciphertext {
    pub fn pairs(&self) -> &[(Point, Point)] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Shared encryption context: curve, CRT moduli and the discrete-log table.
///
/// Built once per session and shared read-only between participants.
#[derive(Debug)]
pub struct ElGamal {
    group: EcGroup,
    moduli: Vec<BigUint>,
    modulus: BigUint,
    crt_coefficients: Vec<BigUint>,
    table: HashMap<Point, u64>,
    /// `-(m*G)` where `m` is the table size.
    giant_step: Point,
}

impl ElGamal {
    /// Create a context with `num_moduli` random primes covering sums of up
    /// to `max_bits` bits.
    ///
    /// Each prime has `ceil(max_bits / num_moduli) + 1` bits; primes are
    /// re-sampled until they are pairwise coprime.
    ///
    /// Homomorphic additions do not reduce residues: a sum of `k`
    /// ciphertexts carries residues up to `k * (n_i - 1)`, which must stay
    /// below `2^(2 * DLOG_TABLE_BITS)` to decrypt. Leave `log2(k)` bits of
    /// headroom under that bound when choosing `max_bits`; see
    /// [`ElGamal::max_additions`].
    ///
    /// # Errors
    /// Returns `PsiError::InvalidModuli` if the parameters cannot produce
    /// enough distinct primes, or if the primes would be too large for the
    /// discrete-log table.
    pub fn new<R: RngCore + CryptoRng>(
        group: EcGroup,
        num_moduli: usize,
        max_bits: usize,
        rng: &mut R,
    ) -> Result<Self> {
        if num_moduli == 0 || max_bits < num_moduli {
            return Err(PsiError::InvalidModuli(format!(
                "cannot split {max_bits} bits across {num_moduli} moduli"
            )));
        }
        let bits = max_bits.div_ceil(num_moduli) + 1;
        if bits > MAX_MODULUS_BITS {
            return Err(PsiError::InvalidModuli(format!(
                "{bits}-bit moduli exceed the {MAX_MODULUS_BITS}-bit discrete-log range"
            )));
        }

        let mut moduli: Vec<BigUint> = Vec::with_capacity(num_moduli);
        let mut attempts = 0usize;
        while moduli.len() < num_moduli {
            attempts += 1;
            if attempts > 64 * num_moduli {
                return Err(PsiError::InvalidModuli(format!(
                    "could not find {num_moduli} distinct {bits}-bit primes"
                )));
            }
            let candidate = random_prime(bits, rng);
            if moduli.iter().all(|m| m.gcd(&candidate).is_one()) {
                moduli.push(candidate);
            }
        }

        debug!(bits, moduli = ?moduli, "generated CRT moduli");
        Self::with_moduli(group, moduli)
    }

    /// Create a context with explicit moduli.
    ///
    /// # Errors
    /// Returns `PsiError::InvalidModuli` if the list is empty, contains a
    /// modulus below 2, or is not pairwise coprime.
    pub fn with_moduli(group: EcGroup, moduli: Vec<BigUint>) -> Result<Self> {
        if moduli.is_empty() {
            return Err(PsiError::InvalidModuli("no moduli given".to_string()));
        }
        for (i, a) in moduli.iter().enumerate() {
            if a < &BigUint::from(2u32) {
                return Err(PsiError::InvalidModuli(format!("modulus {a} is below 2")));
            }
            if let Some(b) = moduli[i + 1..].iter().find(|b| !a.gcd(b).is_one()) {
                return Err(PsiError::InvalidModuli(format!(
                    "moduli {a} and {b} are not coprime"
                )));
            }
        }

        let modulus: BigUint = moduli.iter().product();
        let crt_coefficients = moduli
            .iter()
            .map(|n_i| {
                let cofactor = &modulus / n_i;
                let inverse = (&cofactor % n_i)
                    .modinv(n_i)
                    .ok_or_else(|| PsiError::InvalidModuli(format!("no inverse modulo {n_i}")))?;
                Ok(cofactor * inverse)
            })
            .collect::<Result<Vec<_>>>()?;

        let (table, giant_step) = build_table(&group);
        debug!(modulus = %modulus, table = table.len(), "ElGamal context ready");

        Ok(Self {
            group,
            moduli,
            modulus,
            crt_coefficients,
            table,
            giant_step,
        })
    }

    pub fn group(&self) -> &EcGroup {
        &self.group
    }

    pub fn moduli(&self) -> &[BigUint] {
        &self.moduli
    }

    /// The plaintext modulus `N`.
    pub fn modulus(&self) -> &BigUint {
        &self.modulus
    }

    pub fn num_moduli(&self) -> usize {
        self.moduli.len()
    }

    /// How many fresh ciphertexts can be summed and still decrypt.
    pub fn max_additions(&self) -> u64 {
        let reach = (1u64 << MAX_MODULUS_BITS) - 1;
        self.moduli
            .iter()
            .filter_map(|n_i| (n_i - 1u32).to_u64())
            .max()
            .filter(|&step| step > 0)
            .map_or(reach, |step| reach / step)
    }

    /// Serialized ciphertext size: two compressed points per modulus.
    pub fn ciphertext_len(&self) -> usize {
        2 * self.group.encoded_len() * self.num_moduli()
    }

    pub fn public_key(&self, secret: &Scalar) -> Point {
        self.group.base_multiply(secret)
    }

    /// The sum of every participant's public key; decrypting under it needs
    /// every matching secret.
    pub fn aggregate_public_key(&self, keys: &[Point]) -> Point {
        self.group.sum(keys)
    }

    /// `(k*G, k*pk)` for a fresh `k`.
    pub fn encrypt_zero<R: RngCore + CryptoRng>(&self, pk: &Point, rng: &mut R) -> (Point, Point) {
        let k = self.group.random_scalar(rng);
        (self.group.base_multiply(&k), self.group.multiply(&k, pk))
    }

    pub fn encrypt<R: RngCore + CryptoRng>(
        &self,
        pk: &Point,
        message: &BigUint,
        rng: &mut R,
    ) -> Ciphertext {
        let pairs = self
            .moduli
            .iter()
            .map(|n_i| {
                let (c1, c2) = self.encrypt_zero(pk, rng);
                let residue = Scalar::new(message % n_i);
                (c1, self.group.add(&c2, &self.group.base_multiply(&residue)))
            })
            .collect();
        Ciphertext { pairs }
    }

    /// A decoy with the shape of a real ciphertext: a fresh encryption of
    /// zero, indistinguishable from any other encryption under `pk`.
    pub fn random_ciphertext<R: RngCore + CryptoRng>(&self, pk: &Point, rng: &mut R) -> Ciphertext {
        let pairs = (0..self.num_moduli())
            .map(|_| self.encrypt_zero(pk, rng))
            .collect();
        Ciphertext { pairs }
    }

    /// Single-key decryption.
    ///
    /// # Errors
    /// Returns `PsiError::DiscreteLogNotFound` if a residue is out of reach.
    pub fn decrypt(&self, secret: &Scalar, ct: &Ciphertext) -> Result<BigUint> {
        let partial = self.partial_decrypt(secret, ct);
        self.combine_partials(ct, &[partial])
    }

    pub fn add(&self, a: &Ciphertext, b: &Ciphertext) -> Ciphertext {
        let mut sum = a.clone();
        self.add_assign(&mut sum, b);
        sum
    }

    pub fn add_assign(&self, acc: &mut Ciphertext, other: &Ciphertext) {
        debug_assert_eq!(acc.len(), other.len());
        for ((a1, a2), (b1, b2)) in acc.pairs.iter_mut().zip(&other.pairs) {
            *a1 = self.group.add(a1, b1);
            *a2 = self.group.add(a2, b2);
        }
    }

    /// Adds a fresh encryption of zero to every pair.
    pub fn rerandomize<R: RngCore + CryptoRng>(&self, pk: &Point, ct: &mut Ciphertext, rng: &mut R) {
        for (c1, c2) in ct.pairs.iter_mut() {
            let (z1, z2) = self.encrypt_zero(pk, rng);
            *c1 = self.group.add(c1, &z1);
            *c2 = self.group.add(c2, &z2);
        }
    }

    /// One participant's share of a joint decryption: `sk * C1` per modulus.
    pub fn partial_decrypt(&self, secret: &Scalar, ct: &Ciphertext) -> Vec<Point> {
        ct.pairs
            .iter()
            .map(|(c1, _)| self.group.multiply(secret, c1))
            .collect()
    }

    /// Strip every partial decryption from `C2` and decode the result.
    ///
    /// # Arguments
    /// * `ct` - The ciphertext under the aggregate public key
    /// * `partials` - One [`ElGamal::partial_decrypt`] output per key holder
    ///
    /// # Errors
    /// Returns `PsiError::DiscreteLogNotFound` if a partial is missing (the
    /// residue then looks random) or a residue is out of reach.
    pub fn combine_partials(&self, ct: &Ciphertext, partials: &[Vec<Point>]) -> Result<BigUint> {
        let residues = ct
            .pairs
            .iter()
            .enumerate()
            .map(|(i, (_, c2))| {
                let shares: Vec<Point> = partials
                    .iter()
                    .filter_map(|p| p.get(i))
                    .map(|share| self.group.negate(share))
                    .collect();
                let point = self.group.add(c2, &self.group.sum(&shares));
                self.discrete_log(&point)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(self.crt_combine(&residues))
    }

    /// Baby-step giant-step search for `k` with `k*G = point`,
    /// `k < table_size^2`.
    pub fn discrete_log(&self, point: &Point) -> Result<BigUint> {
        let m = self.table.len() as u64;
        let mut gamma = point.clone();
        for i in 0..m {
            if let Some(&j) = self.table.get(&gamma) {
                return Ok(BigUint::from(i * m + j));
            }
            gamma = self.group.add(&gamma, &self.giant_step);
        }
        Err(PsiError::DiscreteLogNotFound)
    }

    /// `sum(r_i * Ny_i) mod N`.
    pub fn crt_combine(&self, residues: &[BigUint]) -> BigUint {
        residues
            .iter()
            .zip(&self.crt_coefficients)
            .fold(BigUint::zero(), |acc, (r, c)| (acc + r * c) % &self.modulus)
    }

    /// `C1_0 || C2_0 || C1_1 || C2_1 || ...`, compressed points.
    pub fn to_bytes(&self, ct: &Ciphertext) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.ciphertext_len());
        for (c1, c2) in &ct.pairs {
            out.extend_from_slice(&self.group.encode(c1));
            out.extend_from_slice(&self.group.encode(c2));
        }
        out
    }

    /// # Errors
    /// Returns `PsiError::InvalidCiphertextLength` unless `bytes` is exactly
    /// [`ElGamal::ciphertext_len`] long, and `PsiError::InvalidPoint` if any
    /// point fails to decode.
    pub fn from_bytes(&self, bytes: &[u8]) -> Result<Ciphertext> {
        if bytes.len() != self.ciphertext_len() {
            return Err(PsiError::InvalidCiphertextLength {
                expected: self.ciphertext_len(),
                actual: bytes.len(),
            });
        }
        let point_len = self.group.encoded_len();
        let pairs = bytes
            .chunks(2 * point_len)
            .map(|chunk| {
                Ok((
                    self.group.decode(&chunk[..point_len])?,
                    self.group.decode(&chunk[point_len..])?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Ciphertext { pairs })
    }
}

fn build_table(group: &EcGroup) -> (HashMap<Point, u64>, Point) {
    let size = 1u64 << DLOG_TABLE_BITS;
    let mut table = HashMap::with_capacity(size as usize);
    let mut acc = Point::Infinity;
    for k in 0..size {
        table.insert(acc.clone(), k);
        acc = group.add(&acc, group.generator());
    }
    // acc = size * G
    let giant_step = group.negate(&acc);
    (table, giant_step)
}

fn random_prime<R: RngCore + CryptoRng>(bits: usize, rng: &mut R) -> BigUint {
    let top = BigUint::one() << (bits - 1);
    loop {
        let candidate = rng.gen_biguint(bits as u64) | &top | BigUint::one();
        if is_prime(&candidate) {
            return candidate;
        }
    }
}

/// Miller-Rabin with the first twelve primes as bases, which is exact below
/// 3.3 * 10^24.
fn is_prime(n: &BigUint) -> bool {
    if n < &BigUint::from(2u32) {
        return false;
    }
    for base in MILLER_RABIN_BASES {
        if n.to_u32() == Some(base) {
            return true;
        }
        if (n % base).is_zero() {
            return false;
        }
    }

    let n_minus_one = n - 1u32;
    let s = n_minus_one.trailing_zeros().unwrap_or(0);
    let d = &n_minus_one >> s;
    'witness: for base in MILLER_RABIN_BASES {
        let mut x = BigUint::from(base).modpow(&d, n);
        if x.is_one() || x == n_minus_one {
            continue;
        }
        for _ in 1..s {
            x = x.modpow(&BigUint::from(2u32), n);
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }
    true
}
