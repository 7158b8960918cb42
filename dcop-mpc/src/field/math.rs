//! Prime-field scalar arithmetic over machine integers.

use crate::errors::DcopMpcError;

use super::extended_gcd;
use super::helper::is_prime_u64;

use serde::{Deserialize, Serialize};

/// The largest admissible modulus. Shares are serialized as 32-bit signed
/// integers by downstream transports, so every field element must fit one.
pub const MAX_MODULUS: u64 = 1 << 31;

/// Represents the prime field Z_p for a modulus below [`MAX_MODULUS`].
///
/// All protocol scalars (shares, Lagrange coefficients, reduction-matrix
/// entries) live in this field. Ciphertext components of the homomorphic
/// layer never do; they are arbitrary-precision and have their own type.
#[derive(Default, Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Field {
    modulus: u64,
}

impl Field {
    /// Create a new field with the given prime modulus.
    ///
    /// # Errors
    ///
    /// Returns `DcopMpcError::InvalidModulus` if the modulus is not a prime
    /// in the range `(1, 2^31)`.
    pub fn try_with(modulus: u64) -> Result<Self, DcopMpcError> {
        if modulus <= 1 {
            return Err(DcopMpcError::InvalidModulus(format!(
                "Modulus must be greater than 1, got {}",
                modulus
            )));
        }
        if modulus >= MAX_MODULUS {
            return Err(DcopMpcError::InvalidModulus(format!(
                "Modulus {} does not fit the 31-bit share bound",
                modulus
            )));
        }
        if !is_prime_u64(modulus) {
            return Err(DcopMpcError::InvalidModulus(format!(
                "Modulus {} is not prime",
                modulus
            )));
        }

        Ok(Field { modulus })
    }

    /// Returns the modulus of the field.
    pub fn modulus(&self) -> u64 {
        self.modulus
    }

    /// Normalizes a value to be within the range `[0, modulus - 1]`.
    ///
    /// Handles negative values correctly by adding the modulus.
    pub fn normalize(&self, value: i64) -> i64 {
        let m = self.modulus as i64;

        let rem = value % m;
        if rem < 0 {
            return rem + m;
        }

        rem
    }

    /// Computes `(a + b) mod modulus`.
    pub fn add(&self, a: i64, b: i64) -> i64 {
        let a_norm = self.normalize(a);
        let b_norm = self.normalize(b);

        self.normalize(a_norm.wrapping_add(b_norm))
    }

    /// Computes `(a - b) mod modulus`.
    pub fn sub(&self, a: i64, b: i64) -> i64 {
        let a_norm = self.normalize(a);
        let b_norm = self.normalize(b);

        self.normalize(a_norm.wrapping_sub(b_norm))
    }

    /// Computes `(a * b) mod modulus`.
    ///
    /// Uses `i128` internally to prevent overflow during multiplication
    /// before the modulo operation.
    pub fn mul(&self, a: i64, b: i64) -> i64 {
        let a_norm = self.normalize(a);
        let b_norm = self.normalize(b);

        let result = (a_norm as i128 * b_norm as i128) % (self.modulus as i128);

        self.normalize(result as i64)
    }

    /// Computes the additive inverse `-a mod modulus`.
    pub fn neg(&self, a: i64) -> i64 {
        self.sub(0, a)
    }

    /// Computes `base^exp mod modulus` by square-and-multiply.
    pub fn pow(&self, base: i64, exp: u64) -> i64 {
        let mut acc = 1i64;
        let mut base = self.normalize(base);
        let mut exp = exp;
        while exp > 0 {
            if exp & 1 == 1 {
                acc = self.mul(acc, base);
            }
            base = self.mul(base, base);
            exp >>= 1;
        }
        acc
    }

    /// Computes the modular multiplicative inverse `a^-1 mod modulus`.
    ///
    /// # Errors
    ///
    /// Returns `DcopMpcError::NoInverse` if `a` is congruent to 0; every
    /// nonzero residue is invertible because the modulus is prime.
    pub fn inv(&self, a: i64) -> Result<i64, DcopMpcError> {
        let a_norm = self.normalize(a);
        if a_norm == 0 {
            return Err(DcopMpcError::NoInverse(format!(
                "Cannot invert 0 in mod {}",
                self.modulus
            )));
        }

        let (g, x, _) = extended_gcd(a_norm, self.modulus as i64);
        if g != 1 {
            return Err(DcopMpcError::NoInverse(format!(
                "Modular inverse does not exist for {} mod {} (gcd={})",
                a_norm, self.modulus, g
            )));
        }

        Ok(self.normalize(x))
    }

    /// Checks that a received value is a canonical field element.
    ///
    /// # Errors
    ///
    /// Returns `DcopMpcError::ValueOutOfRange` for anything outside
    /// `[0, modulus)`; out-of-range wire values are rejected rather than
    /// silently reduced.
    pub fn check_element(&self, value: i64) -> Result<(), DcopMpcError> {
        if value < 0 || value >= self.modulus as i64 {
            return Err(DcopMpcError::ValueOutOfRange(format!(
                "{} is not a canonical element of Z_{}",
                value, self.modulus
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_creation() {
        assert!(Field::try_with(11).is_ok());
        assert!(Field::try_with(97).is_ok());
        assert!(Field::try_with(1).is_err());
        assert!(Field::try_with(25).is_err()); // not prime
        assert!(Field::try_with(1 << 31).is_err()); // over the cap
    }

    #[test]
    fn test_element_normalization() -> Result<(), DcopMpcError> {
        let field = Field::try_with(11)?;
        assert_eq!(field.normalize(5), 5);
        assert_eq!(field.normalize(16), 5);
        assert_eq!(field.normalize(-6), 5);
        Ok(())
    }

    #[test]
    fn test_arithmetic() -> Result<(), DcopMpcError> {
        let field = Field::try_with(11)?;
        assert_eq!(field.add(5, 8), 2);
        assert_eq!(field.sub(5, 8), 8);
        assert_eq!(field.mul(5, 8), 7);
        assert_eq!(field.neg(5), 6);
        assert_eq!(field.neg(0), 0);
        Ok(())
    }

    #[test]
    fn test_pow() -> Result<(), DcopMpcError> {
        let field = Field::try_with(97)?;
        assert_eq!(field.pow(3, 0), 1);
        assert_eq!(field.pow(3, 5), field.normalize(243));
        // Fermat: a^(p-1) = 1
        assert_eq!(field.pow(17, 96), 1);
        Ok(())
    }

    #[test]
    fn test_inversion() -> Result<(), DcopMpcError> {
        let field = Field::try_with(11)?;
        assert_eq!(field.inv(5)?, 9);
        for a in 1..11 {
            assert_eq!(field.mul(a, field.inv(a)?), 1);
        }
        assert!(field.inv(0).is_err());
        Ok(())
    }

    #[test]
    fn test_check_element() -> Result<(), DcopMpcError> {
        let field = Field::try_with(11)?;
        assert!(field.check_element(0).is_ok());
        assert!(field.check_element(10).is_ok());
        assert!(field.check_element(11).is_err());
        assert!(field.check_element(-1).is_err());
        Ok(())
    }
}
