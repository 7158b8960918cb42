use crate::errors::DcopMpcError;
use crate::field::{Field, Matrix, Vector};

/// A·x where A is an m×n matrix and x is a length–n vector.
/// Returns an m‐vector.
pub fn matrix_vector_mul(a: &Matrix, x: &Vector, field: &Field) -> Result<Vector, DcopMpcError> {
    let m = a.len();
    if m == 0 {
        return Ok(Vec::new());
    }
    let n = a[0].len();
    if x.len() != n {
        return Err(DcopMpcError::DimensionMismatch(format!(
            "Matrix columns ({}) must match vector length ({})",
            n,
            x.len()
        )));
    }

    let mut y = vec![0i64; m];
    for i in 0..m {
        if a[i].len() != n {
            return Err(DcopMpcError::DimensionMismatch(format!(
                "Row {} has length {} but expected {}",
                i,
                a[i].len(),
                n
            )));
        }
        let mut sum = 0i64;
        for j in 0..n {
            let term = field.mul(a[i][j], x[j]);
            sum = field.add(sum, term);
        }
        y[i] = sum;
    }
    Ok(y)
}

/// Computes the vector sum `c = a + b` in the field.
///
/// # Errors
///
/// Returns `DcopMpcError::DimensionMismatch` if the vectors have different lengths.
pub fn vector_add(a: &Vector, b: &Vector, field: &Field) -> Result<Vector, DcopMpcError> {
    if a.len() != b.len() {
        return Err(DcopMpcError::DimensionMismatch(format!(
            "Vector lengths must match for addition ({} vs {})",
            a.len(),
            b.len()
        )));
    }
    Ok(a.iter().zip(b).map(|(&x, &y)| field.add(x, y)).collect())
}

/// Computes the vector difference `c = a - b` in the field.
///
/// # Errors
///
/// Returns `DcopMpcError::DimensionMismatch` if the vectors have different lengths.
pub fn vector_sub(a: &Vector, b: &Vector, field: &Field) -> Result<Vector, DcopMpcError> {
    if a.len() != b.len() {
        return Err(DcopMpcError::DimensionMismatch(format!(
            "Vector lengths must match for subtraction ({} vs {})",
            a.len(),
            b.len()
        )));
    }
    Ok(a.iter().zip(b).map(|(&x, &y)| field.sub(x, y)).collect())
}

/// Computes the matrix product `C = AB` in the field.
///
/// # Errors
///
/// Returns `DcopMpcError::DimensionMismatch` if the inner dimensions of the
/// matrices do not match or if rows have inconsistent lengths.
pub fn matrix_mul(a: &Matrix, b: &Matrix, field: &Field) -> Result<Matrix, DcopMpcError> {
    let n = a.len(); // rows in A
    if n == 0 {
        return Ok(Matrix::new());
    }
    let p = b[0].len(); // cols in B
    let m_common = a[0].len(); // cols in A

    if b.len() != m_common {
        return Err(DcopMpcError::DimensionMismatch(format!(
            "Inner dimensions must match for matrix multiplication ({} vs {})",
            m_common,
            b.len()
        )));
    }

    let mut c = vec![vec![0; p]; n];

    for i in 0..n {
        if a[i].len() != m_common {
            return Err(DcopMpcError::DimensionMismatch(format!(
                "Matrix A row {} has incorrect length (expected {})",
                i, m_common
            )));
        }
        for j in 0..p {
            let mut sum = 0i64;
            #[allow(clippy::needless_range_loop)]
            for k in 0..m_common {
                if b[k].len() != p {
                    return Err(DcopMpcError::DimensionMismatch(format!(
                        "Matrix B row {} has incorrect length (expected {})",
                        k, p
                    )));
                }
                let term = field.mul(a[i][k], b[k][j]);
                sum = field.add(sum, term);
            }
            c[i][j] = sum;
        }
    }
    Ok(c)
}

/// Creates an identity matrix of size `n`.
pub fn identity_matrix(n: usize) -> Matrix {
    let mut identity = vec![vec![0; n]; n];
    #[allow(clippy::needless_range_loop)]
    for i in 0..n {
        identity[i][i] = 1;
    }
    identity
}

/// Inverts a square matrix over the field via LU decomposition.
///
/// Row pivoting selects the first nonzero residue in the column; over a
/// prime field any nonzero pivot is exact, so no magnitude comparison is
/// involved.
///
/// # Errors
///
/// Returns `DcopMpcError::DimensionMismatch` for non-square input and
/// `DcopMpcError::InternalError` if the matrix is singular. Callers that
/// uphold the Vandermonde precondition (distinct nonzero points, n below
/// the modulus) never hit the singular case.
pub fn lu_inverse(matrix: &Matrix, field: &Field) -> Result<Matrix, DcopMpcError> {
    let n = matrix.len();
    if n == 0 {
        return Ok(Vec::new());
    }
    for row in matrix.iter() {
        if row.len() != n {
            return Err(DcopMpcError::DimensionMismatch(
                "lu_inverse: matrix must be square".into(),
            ));
        }
    }

    // Working copy, normalized; below the diagonal it accumulates the L
    // multipliers, on and above it the U factor.
    let mut a: Matrix = matrix
        .iter()
        .map(|row| row.iter().map(|&v| field.normalize(v)).collect())
        .collect();
    let mut perm: Vec<usize> = (0..n).collect();

    for k in 0..n {
        let pivot = (k..n).find(|&r| a[r][k] != 0).ok_or_else(|| {
            DcopMpcError::InternalError(format!(
                "lu_inverse: singular matrix, no pivot in column {}",
                k
            ))
        })?;
        if pivot != k {
            a.swap(k, pivot);
            perm.swap(k, pivot);
        }
        let inv_pivot = field.inv(a[k][k])?;
        for i in (k + 1)..n {
            let factor = field.mul(a[i][k], inv_pivot);
            a[i][k] = factor;
            for j in (k + 1)..n {
                let term = field.mul(factor, a[k][j]);
                a[i][j] = field.sub(a[i][j], term);
            }
        }
    }

    // Solve A·x = e_j column by column: L·y = P·e_j, then U·x = y.
    let mut inv = vec![vec![0i64; n]; n];
    for j in 0..n {
        let mut y = vec![0i64; n];
        for i in 0..n {
            let mut s = if perm[i] == j { 1 } else { 0 };
            for k in 0..i {
                s = field.sub(s, field.mul(a[i][k], y[k]));
            }
            y[i] = s;
        }
        let mut x = vec![0i64; n];
        for i in (0..n).rev() {
            let mut s = y[i];
            for k in (i + 1)..n {
                s = field.sub(s, field.mul(a[i][k], x[k]));
            }
            x[i] = field.mul(s, field.inv(a[i][i])?);
        }
        for i in 0..n {
            inv[i][j] = x[i];
        }
    }

    Ok(inv)
}

/// Builds the n×n Vandermonde matrix `V[i][j] = x_j^i` of the evaluation
/// points.
pub fn vandermonde(x_values: &[i64], field: &Field) -> Matrix {
    let n = x_values.len();
    let mut v = vec![vec![0i64; n]; n];
    for (j, &x) in x_values.iter().enumerate() {
        let mut power = 1i64;
        for row in v.iter_mut() {
            row[j] = power;
            power = field.mul(power, x);
        }
    }
    v
}

/// Builds the degree-reduction operator `R = V⁻¹·P·V`, where P is the
/// diagonal projector keeping polynomial coefficients of degree ≤ `deg`.
///
/// Applied to the share vector of a degree-2·deg polynomial it yields the
/// share vector of the truncated degree-`deg` polynomial with the same
/// value at x = 0.
///
/// # Errors
///
/// Returns `DcopMpcError::InvalidParameters` if the evaluation points are
/// not distinct nonzero residues or the agent count reaches the modulus
/// (either would make the Vandermonde matrix singular).
pub fn reduction_matrix(
    x_values: &[i64],
    field: &Field,
    deg: usize,
) -> Result<Matrix, DcopMpcError> {
    let n = x_values.len();
    if n as u64 >= field.modulus() {
        return Err(DcopMpcError::InvalidParameters(format!(
            "{} evaluation points do not fit in Z_{}",
            n,
            field.modulus()
        )));
    }
    for (j, &x) in x_values.iter().enumerate() {
        let x = field.normalize(x);
        if x == 0 || x_values[..j].iter().any(|&y| field.normalize(y) == x) {
            return Err(DcopMpcError::InvalidParameters(
                "Evaluation points must be distinct and nonzero".into(),
            ));
        }
    }

    let v = vandermonde(x_values, field);
    let v_inv = lu_inverse(&v, field)?;

    // P·V zeroes the coefficient rows above `deg`.
    let mut pv = v;
    for row in pv.iter_mut().skip(deg + 1) {
        row.iter_mut().for_each(|e| *e = 0);
    }

    matrix_mul(&v_inv, &pv, field)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_field() -> Field {
        Field::try_with(97).unwrap()
    }

    fn eval_poly(coeffs: &[i64], x: i64, field: &Field) -> i64 {
        coeffs
            .iter()
            .rev()
            .fold(0, |acc, &c| field.add(field.mul(acc, x), c))
    }

    #[test]
    fn test_vector_add_sub() {
        let field = Field::try_with(13).unwrap();
        let a = vec![1, 2, 3];
        let b = vec![10, 11, 12];
        assert_eq!(vector_add(&a, &b, &field).unwrap(), vec![11, 0, 2]);
        assert_eq!(vector_sub(&a, &b, &field).unwrap(), vec![4, 4, 4]);
        assert!(vector_add(&a, &vec![1, 2], &field).is_err());
    }

    #[test]
    fn test_matrix_vector_mul() {
        let field = Field::try_with(13).unwrap();
        let a = vec![vec![1, 2], vec![3, 4]];
        let x = vec![5, 6];
        assert_eq!(matrix_vector_mul(&a, &x, &field).unwrap(), vec![4, 0]);
        assert!(matrix_vector_mul(&a, &vec![5, 6, 7], &field).is_err());
    }

    #[test]
    fn test_matrix_mul_and_identity() {
        let field = Field::try_with(13).unwrap();
        let a = vec![vec![1, 2], vec![3, 4]];
        let b = vec![vec![5, 6], vec![7, 8]];
        assert_eq!(
            matrix_mul(&a, &b, &field).unwrap(),
            vec![vec![6, 9], vec![4, 11]]
        );
        assert_eq!(
            matrix_mul(&a, &identity_matrix(2), &field).unwrap(),
            vec![vec![1, 2], vec![3, 4]]
        );
    }

    #[test]
    fn test_lu_inverse_round_trip() {
        let field = test_field();
        let m = vec![vec![2, 7, 1], vec![9, 4, 3], vec![5, 5, 8]];
        let inv = lu_inverse(&m, &field).unwrap();
        let product = matrix_mul(&m, &inv, &field).unwrap();
        assert_eq!(product, identity_matrix(3));
    }

    #[test]
    fn test_lu_inverse_needs_pivoting() {
        let field = test_field();
        // Zero in the top-left corner forces a row swap.
        let m = vec![vec![0, 1], vec![1, 0]];
        let inv = lu_inverse(&m, &field).unwrap();
        assert_eq!(matrix_mul(&m, &inv, &field).unwrap(), identity_matrix(2));
    }

    #[test]
    fn test_lu_inverse_singular() {
        let field = test_field();
        let m = vec![vec![1, 2], vec![2, 4]];
        assert!(lu_inverse(&m, &field).is_err());
    }

    #[test]
    fn test_vandermonde_layout() {
        let field = test_field();
        let v = vandermonde(&[1, 2, 3], &field);
        assert_eq!(v[0], vec![1, 1, 1]);
        assert_eq!(v[1], vec![1, 2, 3]);
        assert_eq!(v[2], vec![1, 4, 9]);
    }

    #[test]
    fn test_reduction_matrix_truncates_and_preserves_constant() {
        let field = test_field();
        let x_values = vec![1, 2, 3, 4, 5];
        let deg = 2;
        let r = reduction_matrix(&x_values, &field, deg).unwrap();

        // Degree-4 polynomial with constant term 42.
        let coeffs = vec![42, 17, 5, 88, 23];
        let shares: Vec<i64> = x_values
            .iter()
            .map(|&x| eval_poly(&coeffs, x, &field))
            .collect();

        // Reduced share of point i is column i of R against the shares.
        let n = x_values.len();
        let reduced: Vec<i64> = (0..n)
            .map(|i| {
                (0..n).fold(0, |acc, k| field.add(acc, field.mul(r[k][i], shares[k])))
            })
            .collect();

        // The reduced shares must lie on a single degree-`deg` polynomial;
        // recover it from the first deg+1 points and check the rest.
        let truncated = vec![coeffs[0], coeffs[1], coeffs[2]];
        for (i, &x) in x_values.iter().enumerate() {
            assert_eq!(reduced[i], eval_poly(&truncated, x, &field));
        }
    }

    #[test]
    fn test_reduction_matrix_rejects_bad_points() {
        let field = test_field();
        assert!(reduction_matrix(&[0, 1, 2], &field, 1).is_err());
        assert!(reduction_matrix(&[1, 2, 2], &field, 1).is_err());
    }
}
