//! Textbook RSA
//!
//! Key generation uses Miller-Rabin over random odd candidates and the
//! extended Euclidean algorithm for the private exponent. Encryption is
//! unpadded: deterministic, malleable, and only correct while the message
//! integer stays below the modulus. Nothing here checks that bound; callers
//! keep their messages short (the wrapped session key is 44 bytes).

use num_bigint::{BigInt, BigUint, RandBigInt, Sign};
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::rngs::OsRng;

use super::error::{CryptoError, CryptoResult};

/// Fixed public exponent
pub const PUBLIC_EXPONENT: u32 = 65537;

/// Modulus size used when none is configured
pub const DEFAULT_KEY_BITS: u64 = 512;

/// Smallest modulus that still fits a wrapped session key
pub const MIN_KEY_BITS: u64 = 384;

/// Miller-Rabin rounds per candidate
const MILLER_RABIN_ROUNDS: usize = 40;

const SMALL_PRIMES: [u32; 24] = [
    3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89, 97,
];

/// Public half of a key pair
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKey {
    /// Modulus `n`
    pub n: BigUint,
    /// Public exponent `e`
    pub e: BigUint,
}

impl PublicKey {
    /// Build a public key from big-endian modulus and exponent bytes
    pub fn from_be_bytes(n: &[u8], e: &[u8]) -> Self {
        Self {
            n: BigUint::from_bytes_be(n),
            e: BigUint::from_bytes_be(e),
        }
    }

    /// Modulus size in bits
    pub fn bits(&self) -> u64 {
        self.n.bits()
    }

    /// Encrypt `message` as a big-endian integer: `c = m^e mod n`
    pub fn encrypt(&self, message: &[u8]) -> Vec<u8> {
        let m = BigUint::from_bytes_be(message);
        m.modpow(&self.e, &self.n).to_bytes_be()
    }
}

/// RSA key pair, generated once per running node
#[derive(Clone)]
pub struct KeyPair {
    public: PublicKey,
    d: BigUint,
}

impl KeyPair {
    /// Generate a key pair with a modulus of roughly `bits` bits
    ///
    /// # Errors
    ///
    /// Returns an error for sizes below [`MIN_KEY_BITS`].
    pub fn generate(bits: u64) -> CryptoResult<Self> {
        Self::generate_with_factors(bits).map(|(keys, _, _)| keys)
    }

    /// Generate a key pair and also hand back its prime factors `p, q`
    pub(crate) fn generate_with_factors(bits: u64) -> CryptoResult<(Self, BigUint, BigUint)> {
        if bits < MIN_KEY_BITS {
            return Err(CryptoError::InvalidKeySize(bits));
        }

        let e = BigUint::from(PUBLIC_EXPONENT);
        let one = BigUint::one();
        loop {
            let p = generate_prime(bits / 2);
            let q = generate_prime(bits - bits / 2);
            if p == q {
                continue;
            }

            let phi = (&p - &one) * (&q - &one);
            if !e.gcd(&phi).is_one() {
                continue;
            }

            let d = mod_inverse(&e, &phi)?;
            let n = &p * &q;
            let keys = Self {
                public: PublicKey { n, e },
                d,
            };
            return Ok((keys, p, q));
        }
    }

    /// Rebuild a key pair from its parts
    pub fn from_parts(n: BigUint, e: BigUint, d: BigUint) -> Self {
        Self {
            public: PublicKey { n, e },
            d,
        }
    }

    /// Public half
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Private exponent `d`
    pub fn private_exponent(&self) -> &BigUint {
        &self.d
    }

    /// Decrypt `ciphertext`: `m = c^d mod n`
    pub fn decrypt(&self, ciphertext: &[u8]) -> Vec<u8> {
        let c = BigUint::from_bytes_be(ciphertext);
        c.modpow(&self.d, &self.public.n).to_bytes_be()
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("bits", &self.public.bits())
            .field("e", &self.public.e)
            .field("d", &"[REDACTED]")
            .finish()
    }
}

/// Sample random odd `bits`-bit integers until one is a probable prime.
/// The top two bits are forced so a product of two such primes has exactly
/// the sum of their sizes.
fn generate_prime(bits: u64) -> BigUint {
    let mut rng = OsRng;
    let high = BigUint::from(3u32) << (bits - 2);
    loop {
        let candidate = rng.gen_biguint(bits) | &high | BigUint::one();
        if is_probable_prime(&candidate, MILLER_RABIN_ROUNDS) {
            return candidate;
        }
    }
}

/// Miller-Rabin with `rounds` random witnesses
pub fn is_probable_prime(n: &BigUint, rounds: usize) -> bool {
    let two = BigUint::from(2u32);
    let three = BigUint::from(3u32);
    if *n < two {
        return false;
    }
    if *n == two || *n == three {
        return true;
    }
    if n.is_even() {
        return false;
    }
    for &p in SMALL_PRIMES.iter() {
        let p = BigUint::from(p);
        if *n == p {
            return true;
        }
        if (n % &p).is_zero() {
            return false;
        }
    }

    // n - 1 = d * 2^s
    let n_minus_one = n - 1u32;
    let s = n_minus_one.trailing_zeros().unwrap_or(0);
    let d = &n_minus_one >> s;

    let mut rng = OsRng;
    'witness: for _ in 0..rounds {
        let a = rng.gen_biguint_range(&two, &(n - 2u32));
        let mut x = a.modpow(&d, n);
        if x.is_one() || x == n_minus_one {
            continue;
        }
        for _ in 1..s {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

/// Inverse of `a` modulo `m` via the extended Euclidean algorithm
///
/// # Errors
///
/// Returns [`CryptoError::NoModularInverse`] when `gcd(a, m) != 1` or `m` is
/// zero or one.
pub fn mod_inverse(a: &BigUint, m: &BigUint) -> CryptoResult<BigUint> {
    if m <= &BigUint::one() {
        return Err(CryptoError::NoModularInverse);
    }

    let modulus = BigInt::from_biguint(Sign::Plus, m.clone());
    let (mut old_r, mut r) = (BigInt::from_biguint(Sign::Plus, a % m), modulus.clone());
    let (mut old_s, mut s) = (BigInt::one(), BigInt::zero());

    while !r.is_zero() {
        let q = &old_r / &r;
        let next_r = &old_r - &q * &r;
        old_r = std::mem::replace(&mut r, next_r);
        let next_s = &old_s - &q * &s;
        old_s = std::mem::replace(&mut s, next_s);
    }

    if !old_r.is_one() {
        return Err(CryptoError::NoModularInverse);
    }

    old_s
        .mod_floor(&modulus)
        .to_biguint()
        .ok_or(CryptoError::NoModularInverse)
}
