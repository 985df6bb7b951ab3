//! Prime-order short-Weierstrass curve arithmetic.
//!
//! Points are kept in affine form outside this module. All additions go
//! through Jacobian coordinates, where `Z = 0` marks the point at infinity,
//! and are converted back with a single modular inverse at the end.
//!
//! Only curves with `a = -3` are supported, which covers the NIST prime
//! curves P-256 (used by the protocol), P-384 and P-521.

use crate::error::{PsiError, Result};
use num_bigint::{BigUint, RandBigInt};
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::{CryptoRng, RngCore};
use std::sync::{Arc, OnceLock};

/// Window width (in bits) of both scalar multiplication routines.
const WINDOW_BITS: usize = 4;
const WINDOW_SIZE: usize = 1 << WINDOW_BITS;

/// Domain parameters of a curve `y^2 = x^3 - 3x + b` over `GF(p)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurveParams {
    pub name: &'static str,
    /// Field prime.
    pub p: BigUint,
    /// Order of the generator.
    pub n: BigUint,
    /// Curve constant `b`.
    pub b: BigUint,
    pub gx: BigUint,
    pub gy: BigUint,
}

fn from_hex(digits: &str) -> BigUint {
    digits
        .chars()
        .filter_map(|c| c.to_digit(16))
        .fold(BigUint::zero(), |acc, d| (acc << 4u32) + d)
}

impl CurveParams {
    pub fn p256() -> Self {
        Self {
            name: "P-256",
            p: from_hex("ffffffff00000001000000000000000000000000ffffffffffffffffffffffff"),
            n: from_hex("ffffffff00000000ffffffffffffffffbce6faada7179e84f3b9cac2fc632551"),
            b: from_hex("5ac635d8aa3a93e7b3ebbd55769886bc651d06b0cc53b0f63bce3c3e27d2604b"),
            gx: from_hex("6b17d1f2e12c4247f8bce6e563a440f277037d812deb33a0f4a13945d898c296"),
            gy: from_hex("4fe342e2fe1a7f9b8ee7eb4a7c0f9e162bce33576b315ececbb6406837bf51f5"),
        }
    }

    pub fn p384() -> Self {
        Self {
            name: "P-384",
            p: from_hex(
                "fffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffe\
                 ffffffff0000000000000000ffffffff",
            ),
            n: from_hex(
                "ffffffffffffffffffffffffffffffffffffffffffffffffc7634d81f4372ddf\
                 581a0db248b0a77aecec196accc52973",
            ),
            b: from_hex(
                "b3312fa7e23ee7e4988e056be3f82d19181d9c6efe8141120314088f5013875a\
                 c656398d8a2ed19d2a85c8edd3ec2aef",
            ),
            gx: from_hex(
                "aa87ca22be8b05378eb1c71ef320ad746e1d3b628ba79b9859f741e082542a38\
                 5502f25dbf55296c3a545e3872760ab7",
            ),
            gy: from_hex(
                "3617de4a96262c6f5d9e98bf9292dc29f8f41dbd289a147ce9da3113b5f0b8c0\
                 0a60b1ce1d7e819d7a431d7c90ea0e5f",
            ),
        }
    }

    pub fn p521() -> Self {
        Self {
            name: "P-521",
            p: from_hex(
                "01ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff\
                 ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
            ),
            n: from_hex(
                "01ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff\
                 fa51868783bf2f966b7fcc0148f709a5d03bb5c9b8899c47aebb6fb71e91386409",
            ),
            b: from_hex(
                "0051953eb9618e1c9a1f929a21a0b68540eea2da725b99b315f3b8b489918ef109\
                 e156193951ec7e937b1652c0bd3bb1bf073573df883d2c34f1ef451fd46b503f00",
            ),
            gx: from_hex(
                "00c6858e06b70404e9cd9e3ecb662395b4429c648139053fb521f828af606b4d3d\
                 baa14b5e77efe75928fe1dc127a2ffa8de3348b3c1856a429bf97e7e31c2e5bd66",
            ),
            gy: from_hex(
                "011839296a789a3bc0045c8a5fb42c7d1bd998f54449579b446817afbd17273e66\
                 2c97ee72995ef42640c550b9013fad0761353c7086a272c24088be94769fd16650",
            ),
        }
    }
}

/// An exponent in `[0, n)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scalar(BigUint);

impl Scalar {
    pub fn new(value: BigUint) -> Self {
        Self(value)
    }

    pub fn as_biguint(&self) -> &BigUint {
        &self.0
    }
}

impl From<u64> for Scalar {
    fn from(value: u64) -> Self {
        Self(BigUint::from(value))
    }
}

impl From<BigUint> for Scalar {
    fn from(value: BigUint) -> Self {
        Self(value)
    }
}

/// A curve point in affine coordinates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum Point {
    #[default]
    Infinity,
    Affine {
        x: BigUint,
        y: BigUint,
    },
}

impl Point {
    pub fn is_infinity(&self) -> bool {
        matches!(self, Point::Infinity)
    }

    pub fn x(&self) -> Option<&BigUint> {
        match self {
            Point::Infinity => None,
            Point::Affine { x, .. } => Some(x),
        }
    }

    pub fn y(&self) -> Option<&BigUint> {
        match self {
            Point::Infinity => None,
            Point::Affine { y, .. } => Some(y),
        }
    }
}

#[derive(Debug, Clone)]
struct Jacobian {
    x: BigUint,
    y: BigUint,
    z: BigUint,
}

impl Jacobian {
    fn infinity() -> Self {
        Self {
            x: BigUint::one(),
            y: BigUint::one(),
            z: BigUint::zero(),
        }
    }

    fn is_infinity(&self) -> bool {
        self.z.is_zero()
    }

    fn from_affine(point: &Point) -> Self {
        match point {
            Point::Infinity => Self::infinity(),
            Point::Affine { x, y } => Self {
                x: x.clone(),
                y: y.clone(),
                z: BigUint::one(),
            },
        }
    }
}

#[derive(Debug)]
struct GroupInner {
    params: CurveParams,
    generator: Point,
    field_len: usize,
    /// `(p + 1) / 4`, the square-root exponent for `p = 3 mod 4`.
    sqrt_exp: BigUint,
    /// `comb[w][j - 1] = j * 16^w * G`, built on first use.
    comb: OnceLock<Vec<Vec<Jacobian>>>,
}

/// Group operations on one curve.
///
/// Cloning is cheap; clones share the parameters and the fixed-base table.
#[derive(Debug, Clone)]
pub struct EcGroup {
    inner: Arc<GroupInner>,
}

impl EcGroup {
    pub fn new(params: CurveParams) -> Self {
        let generator = Point::Affine {
            x: params.gx.clone(),
            y: params.gy.clone(),
        };
        let field_len = (params.p.bits() as usize + 7) / 8;
        let sqrt_exp = (&params.p + 1u32) >> 2u32;
        Self {
            inner: Arc::new(GroupInner {
                params,
                generator,
                field_len,
                sqrt_exp,
                comb: OnceLock::new(),
            }),
        }
    }

    /// The protocol curve.
    pub fn p256() -> Self {
        Self::new(CurveParams::p256())
    }

    pub fn p384() -> Self {
        Self::new(CurveParams::p384())
    }

    pub fn p521() -> Self {
        Self::new(CurveParams::p521())
    }

    pub fn params(&self) -> &CurveParams {
        &self.inner.params
    }

    pub fn generator(&self) -> &Point {
        &self.inner.generator
    }

    pub fn order(&self) -> &BigUint {
        &self.inner.params.n
    }

    /// Byte length of one field element.
    pub fn field_len(&self) -> usize {
        self.inner.field_len
    }

    /// Byte length of a compressed point (33 on P-256).
    pub fn encoded_len(&self) -> usize {
        self.inner.field_len + 1
    }

    // ---------------------------------------------------------------------
    // Field helpers. Every argument is already reduced mod p.

    fn p(&self) -> &BigUint {
        &self.inner.params.p
    }

    pub(crate) fn fmul(&self, a: &BigUint, b: &BigUint) -> BigUint {
        (a * b) % self.p()
    }

    pub(crate) fn fadd(&self, a: &BigUint, b: &BigUint) -> BigUint {
        let sum = a + b;
        if &sum >= self.p() {
            sum - self.p()
        } else {
            sum
        }
    }

    pub(crate) fn fsub(&self, a: &BigUint, b: &BigUint) -> BigUint {
        if a >= b {
            a - b
        } else {
            a + self.p() - b
        }
    }

    pub(crate) fn fneg(&self, a: &BigUint) -> BigUint {
        if a.is_zero() {
            BigUint::zero()
        } else {
            self.p() - a
        }
    }

    fn fsmall(&self, a: &BigUint, k: u32) -> BigUint {
        (a * k) % self.p()
    }

    /// Right-hand side of the curve equation, `x^3 - 3x + b`.
    pub fn rhs(&self, x: &BigUint) -> BigUint {
        let x3 = x.modpow(&BigUint::from(3u32), self.p());
        let three_x = self.fsmall(x, 3);
        self.fadd(&self.fsub(&x3, &three_x), &self.inner.params.b)
    }

    /// Square root of `x^3 - 3x + b`, valid because `p = 3 mod 4`.
    ///
    /// The result is meaningless when the right-hand side is a non-residue;
    /// callers that care check it with [`EcGroup::is_on_curve`].
    pub fn y_from_x(&self, x: &BigUint) -> BigUint {
        self.sqrt(&self.rhs(x))
    }

    pub(crate) fn sqrt(&self, v: &BigUint) -> BigUint {
        v.modpow(&self.inner.sqrt_exp, self.p())
    }

    pub fn is_on_curve(&self, point: &Point) -> bool {
        match point {
            Point::Infinity => true,
            Point::Affine { x, y } => {
                x < self.p() && y < self.p() && self.fmul(y, y) == self.rhs(x)
            }
        }
    }

    // ---------------------------------------------------------------------
    // Jacobian arithmetic

    fn affine_from_jacobian(&self, point: &Jacobian) -> Point {
        if point.is_infinity() {
            return Point::Infinity;
        }
        let Some(zinv) = point.z.modinv(self.p()) else {
            return Point::Infinity;
        };
        let zinv_sq = self.fmul(&zinv, &zinv);
        let x = self.fmul(&point.x, &zinv_sq);
        let y = self.fmul(&point.y, &self.fmul(&zinv_sq, &zinv));
        Point::Affine { x, y }
    }

    /// See https://hyperelliptic.org/EFD/g1p/auto-shortw-jacobian-3.html#addition-add-2007-bl
    fn add_jacobian(&self, a: &Jacobian, b: &Jacobian) -> Jacobian {
        if a.is_infinity() {
            return b.clone();
        }
        if b.is_infinity() {
            return a.clone();
        }

        let z1z1 = self.fmul(&a.z, &a.z);
        let z2z2 = self.fmul(&b.z, &b.z);
        let u1 = self.fmul(&a.x, &z2z2);
        let u2 = self.fmul(&b.x, &z1z1);
        let s1 = self.fmul(&self.fmul(&a.y, &b.z), &z2z2);
        let s2 = self.fmul(&self.fmul(&b.y, &a.z), &z1z1);

        let h = self.fsub(&u2, &u1);
        let r = self.fsub(&s2, &s1);
        if h.is_zero() {
            // Same x: either the same point or its negation.
            if r.is_zero() {
                return self.double_jacobian(a);
            }
            return Jacobian::infinity();
        }

        let r = self.fadd(&r, &r);
        let h2 = self.fadd(&h, &h);
        let i = self.fmul(&h2, &h2);
        let j = self.fmul(&h, &i);
        let v = self.fmul(&u1, &i);

        let x3 = self.fsub(&self.fsub(&self.fsub(&self.fmul(&r, &r), &j), &v), &v);
        let s1j = self.fmul(&s1, &j);
        let y3 = self.fsub(
            &self.fmul(&r, &self.fsub(&v, &x3)),
            &self.fadd(&s1j, &s1j),
        );
        let zsum = self.fadd(&a.z, &b.z);
        let z3 = self.fmul(
            &self.fsub(&self.fsub(&self.fmul(&zsum, &zsum), &z1z1), &z2z2),
            &h,
        );

        Jacobian {
            x: x3,
            y: y3,
            z: z3,
        }
    }

    /// See https://hyperelliptic.org/EFD/g1p/auto-shortw-jacobian-3.html#doubling-dbl-2001-b
    fn double_jacobian(&self, a: &Jacobian) -> Jacobian {
        if a.is_infinity() || a.y.is_zero() {
            return Jacobian::infinity();
        }

        let delta = self.fmul(&a.z, &a.z);
        let gamma = self.fmul(&a.y, &a.y);
        let beta = self.fmul(&a.x, &gamma);
        let alpha = self.fsmall(
            &self.fmul(&self.fsub(&a.x, &delta), &self.fadd(&a.x, &delta)),
            3,
        );

        let x3 = self.fsub(&self.fmul(&alpha, &alpha), &self.fsmall(&beta, 8));
        let ysum = self.fadd(&a.y, &a.z);
        let z3 = self.fsub(&self.fsub(&self.fmul(&ysum, &ysum), &gamma), &delta);
        let y3 = self.fsub(
            &self.fmul(&alpha, &self.fsub(&self.fsmall(&beta, 4), &x3)),
            &self.fsmall(&self.fmul(&gamma, &gamma), 8),
        );

        Jacobian {
            x: x3,
            y: y3,
            z: z3,
        }
    }

    fn comb(&self) -> &[Vec<Jacobian>] {
        self.inner.comb.get_or_init(|| {
            let windows = (self.order().bits() as usize).div_ceil(WINDOW_BITS);
            let mut base = Jacobian::from_affine(self.generator());
            let mut table = Vec::with_capacity(windows);
            for _ in 0..windows {
                let mut row: Vec<Jacobian> = Vec::with_capacity(WINDOW_SIZE - 1);
                row.push(base.clone());
                for j in 1..WINDOW_SIZE - 1 {
                    let next = self.add_jacobian(&row[j - 1], &base);
                    row.push(next);
                }
                base = self.add_jacobian(&row[WINDOW_SIZE - 2], &base);
                table.push(row);
            }
            table
        })
    }

    // ---------------------------------------------------------------------
    // Group operations

    pub fn add(&self, a: &Point, b: &Point) -> Point {
        let sum = self.add_jacobian(&Jacobian::from_affine(a), &Jacobian::from_affine(b));
        self.affine_from_jacobian(&sum)
    }

    /// Negation computes `p - y`.
    pub fn negate(&self, point: &Point) -> Point {
        match point {
            Point::Infinity => Point::Infinity,
            Point::Affine { x, y } => Point::Affine {
                x: x.clone(),
                y: self.fneg(y),
            },
        }
    }

    /// Sum of any number of points.
    pub fn sum<'a>(&self, points: impl IntoIterator<Item = &'a Point>) -> Point {
        let total = points.into_iter().fold(Jacobian::infinity(), |acc, p| {
            self.add_jacobian(&acc, &Jacobian::from_affine(p))
        });
        self.affine_from_jacobian(&total)
    }

    /// `k * G` using the precomputed comb.
    pub fn base_multiply(&self, k: &Scalar) -> Point {
        let k = k.as_biguint() % self.order();
        let comb = self.comb();
        let mut acc = Jacobian::infinity();
        for (window, digit) in nibbles_le(&k).enumerate() {
            if digit != 0 {
                acc = self.add_jacobian(&acc, &comb[window][digit - 1]);
            }
        }
        self.affine_from_jacobian(&acc)
    }

    /// `k * P` with a fixed 4-bit window.
    pub fn multiply(&self, k: &Scalar, point: &Point) -> Point {
        let k = k.as_biguint() % self.order();
        if k.is_zero() || point.is_infinity() {
            return Point::Infinity;
        }

        let base = Jacobian::from_affine(point);
        let mut table = Vec::with_capacity(WINDOW_SIZE);
        table.push(Jacobian::infinity());
        table.push(base.clone());
        for i in 2..WINDOW_SIZE {
            let next = self.add_jacobian(&table[i - 1], &base);
            table.push(next);
        }

        let digits: Vec<usize> = nibbles_le(&k).collect();
        let mut acc = Jacobian::infinity();
        for &digit in digits.iter().rev() {
            for _ in 0..WINDOW_BITS {
                acc = self.double_jacobian(&acc);
            }
            if digit != 0 {
                acc = self.add_jacobian(&acc, &table[digit]);
            }
        }
        self.affine_from_jacobian(&acc)
    }

    /// Uniform scalar in `[1, n)`.
    pub fn random_scalar<R: RngCore + CryptoRng>(&self, rng: &mut R) -> Scalar {
        Scalar(rng.gen_biguint_range(&BigUint::one(), self.order()))
    }

    pub fn random_point<R: RngCore + CryptoRng>(&self, rng: &mut R) -> Point {
        self.base_multiply(&self.random_scalar(rng))
    }

    pub fn random_points<R: RngCore + CryptoRng>(&self, count: usize, rng: &mut R) -> Vec<Point> {
        (0..count).map(|_| self.random_point(rng)).collect()
    }

    // ---------------------------------------------------------------------
    // Encoding

    /// Big-endian x followed by one byte holding `(y mod 2) + 2`.
    ///
    /// The point at infinity encodes as an all-zero x, which [`EcGroup::decode`]
    /// rejects.
    pub fn encode(&self, point: &Point) -> Vec<u8> {
        let field_len = self.field_len();
        let mut out = vec![0u8; field_len + 1];
        out[field_len] = 2;
        if let Point::Affine { x, y } = point {
            let bytes = x.to_bytes_be();
            out[field_len - bytes.len()..field_len].copy_from_slice(&bytes);
            if y.is_odd() {
                out[field_len] = 3;
            }
        }
        out
    }

    /// Inverse of [`EcGroup::encode`].
    ///
    /// # Errors
    /// Returns `PsiError::InvalidPoint` for a wrong length, a parity byte
    /// other than 2 or 3, the all-zero x of infinity, or an x-coordinate
    /// that is not on the curve.
    pub fn decode(&self, bytes: &[u8]) -> Result<Point> {
        let field_len = self.field_len();
        if bytes.len() != field_len + 1 {
            return Err(PsiError::InvalidPoint(format!(
                "expected {} bytes, got {}",
                field_len + 1,
                bytes.len()
            )));
        }
        let parity = bytes[field_len];
        if parity != 2 && parity != 3 {
            return Err(PsiError::InvalidPoint(format!(
                "invalid parity byte {parity}"
            )));
        }

        let x = BigUint::from_bytes_be(&bytes[..field_len]);
        // the encoding of infinity; x = 0 may otherwise be on the curve
        if x.is_zero() {
            return Err(PsiError::InvalidPoint(
                "the point at infinity has no affine encoding".to_string(),
            ));
        }
        if &x >= self.p() {
            return Err(PsiError::InvalidPoint(
                "x-coordinate exceeds the field prime".to_string(),
            ));
        }
        let rhs = self.rhs(&x);
        let mut y = self.sqrt(&rhs);
        if self.fmul(&y, &y) != rhs {
            return Err(PsiError::InvalidPoint(
                "x-coordinate is not on the curve".to_string(),
            ));
        }
        if u8::from(y.is_odd()) != parity - 2 {
            if y.is_zero() {
                return Err(PsiError::InvalidPoint(
                    "odd parity requested for y = 0".to_string(),
                ));
            }
            y = self.p() - y;
        }
        Ok(Point::Affine { x, y })
    }

    // ---------------------------------------------------------------------
    // Diffie-Hellman reductions

    /// Randomly re-blinds a handle/companion pair `(T, P)` against the offset
    /// `L = alpha * G`:
    ///
    /// `Q = beta*T + gamma*G`, `S = beta*P + gamma*L`.
    ///
    /// `S = alpha*Q` holds exactly when `P = alpha*T`; otherwise `(Q, S)` is a
    /// fresh random-looking pair.
    pub fn reduce<R: RngCore + CryptoRng>(
        &self,
        offset: &Point,
        handle: &Point,
        companion: &Point,
        rng: &mut R,
    ) -> (Point, Point) {
        let beta = self.random_scalar(rng);
        let gamma = self.random_scalar(rng);
        let q = self.add(&self.multiply(&beta, handle), &self.base_multiply(&gamma));
        let s = self.add(
            &self.multiply(&beta, companion),
            &self.multiply(&gamma, offset),
        );
        (q, s)
    }

    /// Folds two pairs into one with independent random weights:
    ///
    /// `Q = b1*T1 + b2*T2 + gamma*G`, `S = b1*P1 + b2*P2 + gamma*L`.
    ///
    /// The result satisfies `S = alpha*Q` only if both inputs do.
    pub fn reduce_pair<R: RngCore + CryptoRng>(
        &self,
        offset: &Point,
        first: (&Point, &Point),
        second: (&Point, &Point),
        rng: &mut R,
    ) -> (Point, Point) {
        let b1 = self.random_scalar(rng);
        let b2 = self.random_scalar(rng);
        let gamma = self.random_scalar(rng);
        let q = self.sum(&[
            self.multiply(&b1, first.0),
            self.multiply(&b2, second.0),
            self.base_multiply(&gamma),
        ]);
        let s = self.sum(&[
            self.multiply(&b1, first.1),
            self.multiply(&b2, second.1),
            self.multiply(&gamma, offset),
        ]);
        (q, s)
    }
}

/// Little-endian base-16 digits of `k`.
fn nibbles_le(k: &BigUint) -> impl Iterator<Item = usize> {
    k.to_bytes_le()
        .into_iter()
        .flat_map(|byte| [(byte & 0x0f) as usize, (byte >> 4) as usize])
}
