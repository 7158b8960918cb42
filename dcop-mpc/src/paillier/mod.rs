//! # Homomorphic cryptosystem
//!
//! Paillier-style public-key layer used by the shuffle ring: randomized
//! encryption, a non-randomized "direct" variant, and ciphertext addition.
//!
//! Ciphertext components live in Z_{n²} with an arbitrary-precision
//! representation. They are a separate numeric domain from the Shamir field
//! and the two never mix; conversions go through explicit, range-checked
//! plaintext embeddings.

use crate::errors::DcopMpcError;
use crate::field::Field;

use num_bigint::{BigInt, BigUint, ToBigInt};
use num_integer::Integer;
use num_traits::{One, ToPrimitive, Zero};

use rand::Rng;

use serde::{Deserialize, Serialize};

/// Cap on the generator search. The acceptance probability per candidate is
/// overwhelming for valid moduli, so hitting the cap indicates broken key
/// material rather than bad luck.
const GENERATOR_ATTEMPTS: usize = 128;
/// Cap on prime sampling per prime.
const PRIME_ATTEMPTS: usize = 16_384;

/// An element of Z_{n²} produced by encryption or homomorphic addition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ciphertext(BigUint);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    n: BigUint,
    n_squared: BigUint,
    g: BigUint,
}

/// Decryption half of the key pair. Never serialized; it must not leave the
/// agent that generated it.
#[derive(Debug, Clone)]
pub struct PrivateKey {
    lambda: BigUint,
    mu: BigUint,
    n: BigUint,
    n_squared: BigUint,
}

#[derive(Debug, Clone)]
pub struct KeyPair {
    public: PublicKey,
    private: PrivateKey,
}

impl KeyPair {
    /// Generates a fresh key pair.
    ///
    /// Samples two `bits/2`-bit primes with `certainty` Miller-Rabin rounds
    /// each, then searches for a generator g whose L(g^λ mod n²) is
    /// invertible mod n. Both loops are bounded.
    ///
    /// # Errors
    ///
    /// Returns `DcopMpcError::KeyGenerationFailed` if prime sampling or the
    /// generator search exhausts its attempt budget, and
    /// `DcopMpcError::InvalidParameters` for a bit length below 16.
    pub fn generate(
        bits: usize,
        certainty: u32,
        rng: &mut impl Rng,
    ) -> Result<Self, DcopMpcError> {
        if bits < 16 {
            return Err(DcopMpcError::InvalidParameters(format!(
                "Key length {} is too small",
                bits
            )));
        }

        let half = bits / 2;
        let p = random_prime(half, certainty, rng)?;
        let q = loop {
            let candidate = random_prime(half, certainty, rng)?;
            if candidate != p {
                break candidate;
            }
        };

        let n = &p * &q;
        let n_squared = &n * &n;
        let lambda = (&p - 1u32).lcm(&(&q - 1u32));

        for _ in 0..GENERATOR_ATTEMPTS {
            let g = random_below(&n_squared, rng);
            if g.is_zero() {
                continue;
            }
            let u = g.modpow(&lambda, &n_squared);
            let Some(l) = l_function(&u, &n) else {
                continue;
            };
            let Some(mu) = mod_inverse(&l, &n) else {
                continue;
            };

            return Ok(KeyPair {
                public: PublicKey {
                    n: n.clone(),
                    n_squared: n_squared.clone(),
                    g,
                },
                private: PrivateKey {
                    lambda,
                    mu,
                    n,
                    n_squared,
                },
            });
        }

        Err(DcopMpcError::KeyGenerationFailed(GENERATOR_ATTEMPTS))
    }

    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    pub fn private(&self) -> &PrivateKey {
        &self.private
    }
}

impl PublicKey {
    /// Encrypts a canonical field element with fresh randomness:
    /// `g^m · r^n mod n²`.
    pub fn encrypt(&self, m: i64, rng: &mut impl Rng) -> Result<Ciphertext, DcopMpcError> {
        let m = embed(m)?;
        let r = loop {
            let candidate = random_below(&self.n, rng);
            if !candidate.is_zero() && candidate.gcd(&self.n).is_one() {
                break candidate;
            }
        };

        let gm = self.g.modpow(&m, &self.n_squared);
        let rn = r.modpow(&self.n, &self.n_squared);
        Ok(Ciphertext((gm * rn) % &self.n_squared))
    }

    /// Non-randomized encryption: `g^m mod n²`.
    ///
    /// Sound only when the encrypting party immediately masks the result
    /// with its own fresh randomness, or is the last party stripping a
    /// layer only it contributed; anywhere else it forfeits semantic
    /// security.
    pub fn direct_encrypt(&self, m: i64) -> Result<Ciphertext, DcopMpcError> {
        let m = embed(m)?;
        Ok(Ciphertext(self.g.modpow(&m, &self.n_squared)))
    }

    /// Homomorphic plaintext addition: multiplication of ciphertexts
    /// modulo n².
    ///
    /// # Errors
    ///
    /// Returns `DcopMpcError::MalformedCiphertext` if either component is
    /// not an element of Z_{n²}.
    pub fn add(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext, DcopMpcError> {
        if a.0 >= self.n_squared || b.0 >= self.n_squared {
            return Err(DcopMpcError::MalformedCiphertext);
        }
        Ok(Ciphertext((&a.0 * &b.0) % &self.n_squared))
    }
}

impl PrivateKey {
    /// Decrypts a ciphertext: `L(c^λ mod n²) · μ mod n`.
    ///
    /// # Errors
    ///
    /// Returns `DcopMpcError::MalformedCiphertext` if the component is not
    /// an element of Z_{n²} or decryption leaves the plaintext group.
    pub fn decrypt(&self, c: &Ciphertext) -> Result<BigUint, DcopMpcError> {
        if c.0 >= self.n_squared {
            return Err(DcopMpcError::MalformedCiphertext);
        }
        let u = c.0.modpow(&self.lambda, &self.n_squared);
        let l = l_function(&u, &self.n).ok_or(DcopMpcError::MalformedCiphertext)?;
        Ok((l * &self.mu) % &self.n)
    }

    /// Decrypts and reduces into the Shamir field.
    ///
    /// The plaintext is a sum of canonical field elements accumulated
    /// homomorphically; the sum never approaches n, so the reduction mod p
    /// is the only wraparound involved.
    pub fn decrypt_element(&self, c: &Ciphertext, field: &Field) -> Result<i64, DcopMpcError> {
        let plain = self.decrypt(c)?;
        let reduced = (plain % BigUint::from(field.modulus()))
            .to_i64()
            .ok_or_else(|| {
                DcopMpcError::ValueOutOfRange("Decrypted value does not fit a word".into())
            })?;
        Ok(field.normalize(reduced))
    }
}

/// `L(u) = (u - 1) / n`, defined only when n divides u - 1.
fn l_function(u: &BigUint, n: &BigUint) -> Option<BigUint> {
    if u.is_zero() {
        return None;
    }
    let shifted = u - 1u32;
    let (quotient, remainder) = shifted.div_rem(n);
    if remainder.is_zero() { Some(quotient) } else { None }
}

fn embed(m: i64) -> Result<BigUint, DcopMpcError> {
    if m < 0 {
        return Err(DcopMpcError::ValueOutOfRange(format!(
            "Plaintext {} is not a canonical field element",
            m
        )));
    }
    Ok(BigUint::from(m as u64))
}

/// Uniform sample from [0, bound) by oversampling and reduction.
fn random_below(bound: &BigUint, rng: &mut impl Rng) -> BigUint {
    let bytes = (bound.bits() as usize).div_ceil(8) + 8;
    let mut buf = vec![0u8; bytes];
    rng.fill_bytes(&mut buf);
    BigUint::from_bytes_be(&buf) % bound
}

fn random_prime(
    bits: usize,
    certainty: u32,
    rng: &mut impl Rng,
) -> Result<BigUint, DcopMpcError> {
    for _ in 0..PRIME_ATTEMPTS {
        let mut candidate_bytes = vec![0u8; bits.div_ceil(8)];
        rng.fill_bytes(&mut candidate_bytes);
        let mut candidate = BigUint::from_bytes_be(&candidate_bytes);
        candidate.set_bit(bits as u64 - 1, true);
        candidate.set_bit(0, true);
        if is_probable_prime(&candidate, certainty, rng) {
            return Ok(candidate);
        }
    }
    Err(DcopMpcError::KeyGenerationFailed(PRIME_ATTEMPTS))
}

/// Miller-Rabin with `certainty` random witnesses, preceded by trial
/// division against small primes.
fn is_probable_prime(n: &BigUint, certainty: u32, rng: &mut impl Rng) -> bool {
    let two = BigUint::from(2u32);
    if n < &two {
        return false;
    }
    for &p in &[2u32, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47] {
        let small = BigUint::from(p);
        if n == &small {
            return true;
        }
        if (n % &small).is_zero() {
            return false;
        }
    }

    let n_minus_one = n - 1u32;
    let mut d = n_minus_one.clone();
    let mut s = 0u64;
    while d.is_even() {
        d >>= 1;
        s += 1;
    }

    'round: for _ in 0..certainty {
        let a = random_below(&(n - 3u32), rng) + &two;
        let mut x = a.modpow(&d, n);
        if x.is_one() || x == n_minus_one {
            continue;
        }
        for _ in 1..s {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                continue 'round;
            }
        }
        return false;
    }
    true
}

fn mod_inverse(a: &BigUint, m: &BigUint) -> Option<BigUint> {
    let a = a.to_bigint()?;
    let m_int = m.to_bigint()?;
    let ext = a.extended_gcd(&m_int);
    if !ext.gcd.is_one() {
        return None;
    }
    let x: BigInt = ext.x.mod_floor(&m_int);
    x.to_biguint()
}
