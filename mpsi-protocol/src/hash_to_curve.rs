//! Hashing arbitrary byte strings onto the NIST prime curves.
//!
//! Implements the random-oracle construction of
//! <https://datatracker.ietf.org/doc/html/draft-irtf-cfrg-hash-to-curve-13>
//! (`expand_message_xmd`, `hash_to_field`, simplified SWU for `q = 3 mod 4`),
//! plus a try-and-increment fallback.

use crate::error::{PsiError, Result};
use crate::group::{EcGroup, Point};
use num_bigint::BigUint;
use num_integer::Integer;
use num_traits::{One, Zero};
use sha2::{Digest, Sha256, Sha384, Sha512};

/// Domain separation tag used by the protocol for hashing labels.
pub const PROTOCOL_DST: &[u8] = b"MPSI-V01-CS01-with-P256_XMD:SHA-256_SSWU_RO_";

const BRUTE_FORCE_ATTEMPTS: u32 = 256;

/// A hash-to-curve suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suite {
    P256Sha256,
    P384Sha384,
    P521Sha512,
}

impl Suite {
    pub fn id(&self) -> &'static str {
        match self {
            Suite::P256Sha256 => "P256_XMD:SHA-256_SSWU_RO_",
            Suite::P384Sha384 => "P384_XMD:SHA-384_SSWU_RO_",
            Suite::P521Sha512 => "P521_XMD:SHA-512_SSWU_RO_",
        }
    }

    /// The DST used by the published test vectors.
    pub fn test_dst(&self) -> Vec<u8> {
        format!("QUUX-V01-CS02-with-{}", self.id()).into_bytes()
    }

    pub fn group(&self) -> EcGroup {
        match self {
            Suite::P256Sha256 => EcGroup::p256(),
            Suite::P384Sha384 => EcGroup::p384(),
            Suite::P521Sha512 => EcGroup::p521(),
        }
    }

    /// Magnitude of the SWU constant; the suite uses `Z = -z`.
    fn z(&self) -> u32 {
        match self {
            Suite::P256Sha256 => 10,
            Suite::P384Sha384 => 12,
            Suite::P521Sha512 => 4,
        }
    }

    /// Target security level `k` in bits.
    fn security_bits(&self) -> usize {
        match self {
            Suite::P256Sha256 => 128,
            Suite::P384Sha384 => 192,
            Suite::P521Sha512 => 256,
        }
    }

    /// Output size of the hash in bytes.
    fn b_in_bytes(&self) -> usize {
        match self {
            Suite::P256Sha256 => 32,
            Suite::P384Sha384 => 48,
            Suite::P521Sha512 => 64,
        }
    }

    /// Input block size of the hash in bytes.
    fn s_in_bytes(&self) -> usize {
        match self {
            Suite::P256Sha256 => 64,
            Suite::P384Sha384 | Suite::P521Sha512 => 128,
        }
    }

    fn hash(&self, parts: &[&[u8]]) -> Vec<u8> {
        fn digest<D: Digest>(parts: &[&[u8]]) -> Vec<u8> {
            let mut hasher = D::new();
            for part in parts {
                hasher.update(part);
            }
            hasher.finalize().to_vec()
        }
        match self {
            Suite::P256Sha256 => digest::<Sha256>(parts),
            Suite::P384Sha384 => digest::<Sha384>(parts),
            Suite::P521Sha512 => digest::<Sha512>(parts),
        }
    }
}

/// A configured hasher: suite, curve and domain separation tag.
#[derive(Debug, Clone)]
pub struct HashToCurve {
    suite: Suite,
    group: EcGroup,
    dst_prime: Vec<u8>,
    /// Bytes per field element, `ceil((ceil(log2(p)) + k) / 8)`.
    l: usize,
    z: BigUint,
    a: BigUint,
    c1: BigUint,
    c2: BigUint,
}

impl HashToCurve {
    /// Hasher with the suite's test-vector DST.
    pub fn new(suite: Suite) -> Self {
        Self::build(suite, suite.group(), suite.test_dst())
    }

    /// Hasher with an application DST.
    ///
    /// # Errors
    /// Returns `PsiError::InvalidConfig` if the DST is empty or longer than
    /// 255 bytes.
    pub fn with_dst(suite: Suite, dst: &[u8]) -> Result<Self> {
        if dst.is_empty() || dst.len() > 255 {
            return Err(PsiError::InvalidConfig(format!(
                "hash-to-curve DST must be 1..=255 bytes, got {}",
                dst.len()
            )));
        }
        Ok(Self::build(suite, suite.group(), dst.to_vec()))
    }

    /// The label hasher of the protocol, sharing `group`'s tables.
    pub fn for_protocol(group: &EcGroup) -> Self {
        debug_assert_eq!(group.params().name, "P-256");
        Self::build(Suite::P256Sha256, group.clone(), PROTOCOL_DST.to_vec())
    }

    fn build(suite: Suite, group: EcGroup, dst: Vec<u8>) -> Self {
        let p = group.params().p.clone();
        let l = (p.bits() as usize + suite.security_bits()).div_ceil(8);
        let z = &p - suite.z();
        let a = &p - 3u32;
        let c1 = (&p - 3u32) >> 2u32;
        let c2 = group.sqrt(&BigUint::from(suite.z()));

        let mut dst_prime = dst;
        let dst_len = dst_prime.len() as u8;
        dst_prime.push(dst_len);

        Self {
            suite,
            group,
            dst_prime,
            l,
            z,
            a,
            c1,
            c2,
        }
    }

    pub fn suite(&self) -> Suite {
        self.suite
    }

    pub fn group(&self) -> &EcGroup {
        &self.group
    }

    /// # Errors
    /// Returns `PsiError::CryptoError` if more than 255 hash blocks or more
    /// than 65535 bytes are requested.
    pub fn expand_message_xmd(&self, msg: &[u8], len_in_bytes: usize) -> Result<Vec<u8>> {
        let ell = len_in_bytes.div_ceil(self.suite.b_in_bytes());
        if ell > 255 || len_in_bytes > u16::MAX as usize {
            return Err(PsiError::CryptoError(format!(
                "expand_message_xmd cannot produce {len_in_bytes} bytes"
            )));
        }
        Ok(self.expand(msg, len_in_bytes))
    }

    fn expand(&self, msg: &[u8], len_in_bytes: usize) -> Vec<u8> {
        let suite = self.suite;
        let ell = len_in_bytes.div_ceil(suite.b_in_bytes());
        let z_pad = vec![0u8; suite.s_in_bytes()];
        let l_i_b_str = (len_in_bytes as u16).to_be_bytes();

        let b0 = suite.hash(&[&z_pad, msg, &l_i_b_str, &[0u8], &self.dst_prime]);
        let mut bi = suite.hash(&[&b0, &[1u8], &self.dst_prime]);
        let mut uniform = Vec::with_capacity(ell * suite.b_in_bytes());
        uniform.extend_from_slice(&bi);
        for i in 2..=ell {
            let mixed: Vec<u8> = b0.iter().zip(&bi).map(|(x, y)| x ^ y).collect();
            bi = suite.hash(&[&mixed, &[i as u8], &self.dst_prime]);
            uniform.extend_from_slice(&bi);
        }
        uniform.truncate(len_in_bytes);
        uniform
    }

    /// `count` field elements derived from `msg`.
    pub fn hash_to_field(&self, msg: &[u8], count: usize) -> Result<Vec<BigUint>> {
        let uniform = self.expand_message_xmd(msg, count * self.l)?;
        Ok(self.field_elements(&uniform))
    }

    fn field_elements(&self, uniform: &[u8]) -> Vec<BigUint> {
        let p = &self.group.params().p;
        uniform
            .chunks(self.l)
            .map(|chunk| BigUint::from_bytes_be(chunk) % p)
            .collect()
    }

    /// Returns `(true, sqrt(u/v))` if `u/v` is square, otherwise
    /// `(false, sqrt(Z * u/v))`.
    pub fn sqrt_ratio_3mod4(&self, u: &BigUint, v: &BigUint) -> (bool, BigUint) {
        let g = &self.group;
        let p = &g.params().p;

        let tv1 = g.fmul(v, v);
        let tv2 = g.fmul(u, v);
        let tv1 = g.fmul(&tv1, &tv2);
        let y1 = g.fmul(&tv1.modpow(&self.c1, p), &tv2);
        let y2 = g.fmul(&y1, &self.c2);
        let tv3 = g.fmul(&g.fmul(&y1, &y1), v);
        let is_qr = &tv3 == u;
        (is_qr, if is_qr { y1 } else { y2 })
    }

    /// Simplified SWU map, straight-line version.
    pub fn map_to_curve_simple_swu(&self, u: &BigUint) -> Point {
        let g = &self.group;
        let p = &g.params().p;
        let b = &g.params().b;

        let tv1 = g.fmul(&self.z, &g.fmul(u, u));
        let tv2 = g.fadd(&g.fmul(&tv1, &tv1), &tv1);
        let tv3 = g.fmul(b, &g.fadd(&tv2, &BigUint::one()));
        let tv4 = if tv2.is_zero() {
            self.z.clone()
        } else {
            g.fneg(&tv2)
        };
        let tv4 = g.fmul(&self.a, &tv4);
        let tv6 = g.fmul(&tv4, &tv4);
        let tv5 = g.fmul(&self.a, &tv6);
        let gx_num = g.fmul(&g.fadd(&g.fmul(&tv3, &tv3), &tv5), &tv3);
        let tv6 = g.fmul(&tv6, &tv4);
        let gx_num = g.fadd(&gx_num, &g.fmul(b, &tv6));

        let x = g.fmul(&tv1, &tv3);
        let (is_gx1_square, y1) = self.sqrt_ratio_3mod4(&gx_num, &tv6);
        let y = g.fmul(&g.fmul(&tv1, u), &y1);
        let (x, y) = if is_gx1_square { (tv3, y1) } else { (x, y) };
        let y = if u.is_odd() == y.is_odd() { y } else { g.fneg(&y) };

        // tv4 = A * (Z or -tv2) with both factors nonzero.
        let tv4_inv = tv4.modpow(&(p - 2u32), p);
        Point::Affine {
            x: g.fmul(&x, &tv4_inv),
            y,
        }
    }

    pub fn hash_to_curve(&self, msg: &[u8]) -> Point {
        let uniform = self.expand(msg, 2 * self.l);
        let u = self.field_elements(&uniform);
        let q0 = self.map_to_curve_simple_swu(&u[0]);
        let q1 = self.map_to_curve_simple_swu(&u[1]);
        debug_assert!(self.group.is_on_curve(&q0));
        debug_assert!(self.group.is_on_curve(&q1));

        // cofactor is 1 on every supported curve
        self.group.add(&q0, &q1)
    }

    /// Try-and-increment: `x = H(DST || ctr || msg) mod p` until `x` lands on
    /// the curve, taking the even root.
    ///
    /// Slower than [`HashToCurve::hash_to_curve`] and not constant time; kept
    /// as an independent oracle.
    pub fn hash_to_curve_brute_force(&self, msg: &[u8]) -> Result<Point> {
        let g = &self.group;
        let p = &g.params().p;
        for counter in 0..BRUTE_FORCE_ATTEMPTS {
            let digest = self
                .suite
                .hash(&[&self.dst_prime, &counter.to_be_bytes(), msg]);
            let x = BigUint::from_bytes_be(&digest) % p;
            let rhs = g.rhs(&x);
            let y = g.sqrt(&rhs);
            if g.fmul(&y, &y) != rhs {
                continue;
            }
            let y = if y.is_odd() { g.fneg(&y) } else { y };
            let point = Point::Affine { x, y };
            debug_assert!(g.is_on_curve(&point));
            return Ok(point);
        }
        Err(PsiError::HashToCurveExhausted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages() -> [Vec<u8>; 5] {
        [
            b"".to_vec(),
            b"abc".to_vec(),
            b"abcdef0123456789".to_vec(),
            [b"q128_".as_slice(), &[b'q'; 128][..]].concat(),
            [b"a512_".as_slice(), &[b'a'; 512][..]].concat(),
        ]
    }

    fn check_vectors(suite: Suite, expected: [(&str, &str); 5]) {
        let h2c = HashToCurve::new(suite);
        for (msg, (x, y)) in messages().iter().zip(expected) {
            let point = h2c.hash_to_curve(msg);
            assert!(h2c.group().is_on_curve(&point));
            assert_eq!(
                point.x().unwrap().to_str_radix(16),
                x,
                "{} x mismatch for message of length {}",
                suite.id(),
                msg.len()
            );
            assert_eq!(
                point.y().unwrap().to_str_radix(16),
                y,
                "{} y mismatch for message of length {}",
                suite.id(),
                msg.len()
            );
        }
    }

    #[test]
    fn test_p256_vectors() {
        check_vectors(
            Suite::P256Sha256,
            [
                (
                    "2c15230b26dbc6fc9a37051158c95b79656e17a1a920b11394ca91c44247d3e4",
                    "8a7a74985cc5c776cdfe4b1f19884970453912e9d31528c060be9ab5c43e8415",
                ),
                (
                    "bb8b87485551aa43ed54f009230450b492fead5f1cc91658775dac4a3388a0f",
                    "5c41b3d0731a27a7b14bc0bf0ccded2d8751f83493404c84a88e71ffd424212e",
                ),
                (
                    "65038ac8f2b1def042a5df0b33b1f4eca6bff7cb0f9c6c1526811864e544ed80",
                    "cad44d40a656e7aff4002a8de287abc8ae0482b5ae825822bb870d6df9b56ca3",
                ),
                (
                    "4be61ee205094282ba8a2042bcb48d88dfbb609301c49aa8b078533dc65a0b5d",
                    "98f8df449a072c4721d241a3b1236d3caccba603f916ca680f4539d2bfb3c29e",
                ),
                (
                    "457ae2981f70ca85d8e24c308b14db22f3e3862c5ea0f652ca38b5e49cd64bc5",
                    "ecb9f0eadc9aeed232dabc53235368c1394c78de05dd96893eefa62b0f4757dc",
                ),
            ],
        );
    }

    #[test]
    fn test_p384_vectors() {
        check_vectors(
            Suite::P384Sha384,
            [
                (
                    "eb9fe1b4f4e14e7140803c1d99d0a93cd823d2b024040f9c067a8eca1f5a2eeac9ad604973527a356f3fa3aeff0e4d83",
                    "c21708cff382b7f4643c07b105c2eaec2cead93a917d825601e63c8f21f6abd9abc22c93c2bed6f235954b25048bb1a",
                ),
                (
                    "e02fc1a5f44a7519419dd314e29863f30df55a514da2d655775a81d413003c4d4e7fd59af0826dfaad4200ac6f60abe1",
                    "1f638d04d98677d65bef99aef1a12a70a4cbb9270ec55248c04530d8bc1f8f90f8a6a859a7c1f1ddccedf8f96d675f6",
                ),
                (
                    "bdecc1c1d870624965f19505be50459d363c71a699a496ab672f9a5d6b78676400926fbceee6fcd1780fe86e62b2aa89",
                    "57cf1f99b5ee00f3c201139b3bfe4dd30a653193778d89a0accc5e0f47e46e4e4b85a0595da29c9494c1814acafe183c",
                ),
                (
                    "3c3a9f401b78c6c36a52f07eeee0ec1289f178adf78448f43a3850e0456f5dd7f7633dd31676d990eda32882ab486c0",
                    "cc183d0d7bdfd0a3af05f50e16a3f2de4abbc523215bf57c848d5ea662482b8c1f43dc453a93b94a8026db58f3f5d878",
                ),
                (
                    "7b18d210b1f090ac701f65f606f6ca18fb8d081e3bc6cbd937c5604325f1cdea4c15c10a54ef303aabf2ea58bd9947a4",
                    "ea857285a33abb516732915c353c75c576bf82ccc96adb63c094dde580021eddeafd91f8c0bfee6f636528f3d0c47fd2",
                ),
            ],
        );
    }

    #[test]
    fn test_p521_vectors() {
        check_vectors(
            Suite::P521Sha512,
            [
                (
                    "fd767cebb2452030358d0e9cf907f525f50920c8f607889a6a35680727f64f4d66b161fafeb2654bea0d35086bec0a10b30b14adef3556ed9f7f1bc23cecc9c088",
                    "169ba78d8d851e930680322596e39c78f4fe31b97e57629ef6460ddd68f8763fd7bd767a4e94a80d3d21a3c2ee98347e024fc73ee1c27166dc3fe5eeef782be411d",
                ),
                (
                    "2f89a1677b28054b50d15e1f81ed6669b5a2158211118ebdef8a6efc77f8ccaa528f698214e4340155abc1fa08f8f613ef14a043717503d57e267d57155cf784a4",
                    "10e0be5dc8e753da8ce51091908b72396d3deed14ae166f66d8ebf0a4e7059ead169ea4bead0232e9b700dd380b316e9361cfdba55a08c73545563a80966ecbb86d",
                ),
                (
                    "6e200e276a4a81760099677814d7f8794a4a5f3658442de63c18d2244dcc957c645e94cb0754f95fcf103b2aeaf94411847c24187b89fb7462ad3679066337cbc4",
                    "1dd8dfa9775b60b1614f6f169089d8140d4b3e4012949b52f98db2deff3e1d97bf73a1fa4d437d1dcdf39b6360cc518d8ebcc0f899018206fded7617b654f6b168",
                ),
                (
                    "1b264a630bd6555be537b000b99a06761a9325c53322b65bdc41bf196711f9708d58d34b3b90faf12640c27b91c70a507998e55940648caa8e71098bf2bc8d24664",
                    "1ea9f445bee198b3ee4c812dcf7b0f91e0881f0251aab272a12201fd89b1a95733fd2a699c162b639e9acdcc54fdc2f6536129b6beb0432be01aa8da02df5e59aaa",
                ),
                (
                    "c12bc3e28db07b6b4d2a2b1167ab9e26fc2fa85c7b0498a17b0347edf52392856d7e28b8fa7a2dd004611159505835b687ecf1a764857e27e9745848c436ef3925",
                    "1cd287df9a50c22a9231beb452346720bb163344a41c5f5a24e8335b6ccc595fd436aea89737b1281aecb411eb835f0b939073fdd1dd4d5a2492e91ef4a3c55bcbd",
                ),
            ],
        );
    }

    #[test]
    fn test_expand_message_lengths() {
        let h2c = HashToCurve::new(Suite::P256Sha256);
        for len in [1, 32, 33, 96, 200] {
            assert_eq!(h2c.expand_message_xmd(b"abc", len).unwrap().len(), len);
        }
        // the requested length is bound into b_0
        assert_ne!(
            h2c.expand_message_xmd(b"abc", 32).unwrap(),
            h2c.expand_message_xmd(b"abc", 64).unwrap()[..32]
        );
        assert!(matches!(
            h2c.expand_message_xmd(b"abc", 256 * 32),
            Err(PsiError::CryptoError(_))
        ));
    }

    #[test]
    fn test_hash_to_field_is_reduced() {
        let h2c = HashToCurve::new(Suite::P256Sha256);
        let u = h2c.hash_to_field(b"abc", 2).unwrap();
        assert_eq!(u.len(), 2);
        assert!(u.iter().all(|e| e < &h2c.group().params().p));
        assert_ne!(u[0], u[1]);
    }

    #[test]
    fn test_sqrt_ratio() {
        let h2c = HashToCurve::new(Suite::P256Sha256);
        let g = h2c.group().clone();
        let u = BigUint::from(49u32);
        let v = BigUint::from(4u32);
        let (is_qr, y) = h2c.sqrt_ratio_3mod4(&u, &v);
        assert!(is_qr);
        assert_eq!(g.fmul(&g.fmul(&y, &y), &v), u);
    }

    #[test]
    fn test_swu_output_on_curve() {
        let h2c = HashToCurve::new(Suite::P256Sha256);
        for seed in 0u32..20 {
            let u = h2c.hash_to_field(&seed.to_be_bytes(), 1).unwrap();
            let point = h2c.map_to_curve_simple_swu(&u[0]);
            assert!(h2c.group().is_on_curve(&point), "SWU output {seed} off curve");
        }
        let zero = h2c.map_to_curve_simple_swu(&BigUint::zero());
        assert!(h2c.group().is_on_curve(&zero));
    }

    #[test]
    fn test_dst_separates_domains() {
        let test = HashToCurve::new(Suite::P256Sha256);
        let protocol = HashToCurve::for_protocol(&EcGroup::p256());
        assert_ne!(test.hash_to_curve(b"abc"), protocol.hash_to_curve(b"abc"));
        assert_eq!(
            protocol.hash_to_curve(b"abc"),
            protocol.hash_to_curve(b"abc"),
            "Hashing should be deterministic"
        );
    }

    #[test]
    fn test_with_dst_rejects_bad_tags() {
        assert!(HashToCurve::with_dst(Suite::P256Sha256, b"").is_err());
        assert!(HashToCurve::with_dst(Suite::P256Sha256, &[b'x'; 256]).is_err());
        assert!(HashToCurve::with_dst(Suite::P256Sha256, PROTOCOL_DST).is_ok());
    }

    #[test]
    fn test_brute_force() {
        for suite in [Suite::P256Sha256, Suite::P384Sha384] {
            let h2c = HashToCurve::new(suite);
            let a = h2c.hash_to_curve_brute_force(b"alice").unwrap();
            let b = h2c.hash_to_curve_brute_force(b"bob").unwrap();
            assert!(h2c.group().is_on_curve(&a));
            assert!(h2c.group().is_on_curve(&b));
            assert_ne!(a, b);
            assert!(a.y().unwrap().is_even());
            assert_eq!(a, h2c.hash_to_curve_brute_force(b"alice").unwrap());
        }
    }
}
