//! # Secret-sharing primitives
//!
//! Polynomial sharing of scalars and vectors over the Shamir field, plus
//! Lagrange-based reconstruction from one share per agent.

use crate::errors::DcopMpcError;
use crate::field::{Field, Vector};

use itertools::izip;
use rand::Rng;

/// Shares a secret with a random polynomial of the given degree.
///
/// The constant term is the secret; the remaining coefficients are uniform
/// in [0, p). Returns one evaluation per entry of `x_values`, in order.
pub fn share(
    secret: i64,
    degree: usize,
    x_values: &[i64],
    field: &Field,
    rng: &mut impl Rng,
) -> Vector {
    let mut coeffs = Vector::with_capacity(degree + 1);
    coeffs.push(field.normalize(secret));
    for _ in 0..degree {
        coeffs.push(rng.random_range(0..field.modulus()) as i64);
    }

    x_values
        .iter()
        .map(|&x| eval_polynomial(&coeffs, x, field))
        .collect()
}

/// Shares every slot of a vector independently and batches the result by
/// recipient: row r of the output is the share vector destined for the
/// agent evaluated at `x_values[r]`.
pub fn share_vector(
    secrets: &Vector,
    degree: usize,
    x_values: &[i64],
    field: &Field,
    rng: &mut impl Rng,
) -> Vec<Vector> {
    let mut rows = vec![Vector::with_capacity(secrets.len()); x_values.len()];
    for &secret in secrets {
        let evaluations = share(secret, degree, x_values, field, rng);
        for (row, evaluation) in izip!(rows.iter_mut(), evaluations) {
            row.push(evaluation);
        }
    }
    rows
}

/// Horner evaluation of the coefficient vector at x.
pub fn eval_polynomial(coeffs: &[i64], x: i64, field: &Field) -> i64 {
    coeffs
        .iter()
        .rev()
        .fold(0, |acc, &c| field.add(field.mul(acc, x), c))
}

/// Precomputes the full-basis Lagrange coefficients at x = 0, one per
/// agent. With these, the dot product against a complete share row
/// reconstructs the constant term of any polynomial of degree below the
/// agent count.
///
/// # Errors
///
/// Returns `DcopMpcError::InvalidParameters` if the evaluation points are
/// not distinct nonzero residues.
pub fn lagrange_coefficients(x_values: &[i64], field: &Field) -> Result<Vector, DcopMpcError> {
    let mut coefficients = Vector::with_capacity(x_values.len());
    for (i, &xi) in x_values.iter().enumerate() {
        let mut numerator = 1i64;
        let mut denominator = 1i64;
        for (j, &xj) in x_values.iter().enumerate() {
            if i == j {
                continue;
            }
            numerator = field.mul(numerator, xj);
            denominator = field.mul(denominator, field.sub(xj, xi));
        }
        let inv = field.inv(denominator).map_err(|_| {
            DcopMpcError::InvalidParameters(
                "Evaluation points must be distinct for interpolation".into(),
            )
        })?;
        if field.normalize(xi) == 0 {
            return Err(DcopMpcError::InvalidParameters(
                "Evaluation points must be nonzero".into(),
            ));
        }
        coefficients.push(field.mul(numerator, inv));
    }
    Ok(coefficients)
}

/// Reconstructs a secret as `Σ shares[i] · coefficients[i] mod p`.
///
/// # Errors
///
/// Returns `DcopMpcError::DimensionMismatch` if the share row and the
/// coefficient row disagree in length.
pub fn reconstruct(shares: &[i64], coefficients: &[i64], field: &Field) -> Result<i64, DcopMpcError> {
    if shares.len() != coefficients.len() {
        return Err(DcopMpcError::DimensionMismatch(format!(
            "{} shares against {} Lagrange coefficients",
            shares.len(),
            coefficients.len()
        )));
    }
    Ok(izip!(shares, coefficients).fold(0, |acc, (&s, &c)| field.add(acc, field.mul(s, c))))
}
