//! # Prime-field module
//!
//! Provides the [`Field`] struct for the bounded-width Shamir field Z_p and
//! the dense matrix algebra used to build the degree-reduction operator.

pub mod helper;
pub mod math;
pub mod matrix_ops;

/// Represents a mathematical vector using a `Vec<i64>`.
pub type Vector = Vec<i64>;
/// Represents a mathematical matrix using a `Vec<Vec<i64>>`.
pub type Matrix = Vec<Vec<i64>>;

pub use helper::{extended_gcd, gcd};
pub use math::{Field, MAX_MODULUS};
