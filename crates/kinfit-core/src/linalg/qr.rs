use log::debug;
use num::Float;

use crate::{
    linalg::{MatrixLike, MatrixLikeMut, VectorLike},
    KinfitError, KinfitResult,
};

/// A Householder QR decomposition of a dense square matrix.
///
/// The decomposition is computed eagerly by [`QRDecomposition::new`]. Row pivoting is recorded
/// in a permutation array rather than by swapping rows of the internal buffer, so a pivot costs
/// $`O(1)`$ instead of an $`O(n)`$ row copy.
///
/// Singular (or numerically singular) input is not an error. A pivot whose column has no entry
/// larger than `eps` times the largest absolute entry of the whole matrix is skipped. The
/// corresponding direction contributes nothing to solutions, and the number of skipped
/// directions is available from [`QRDecomposition::n_sing`]:
///
/// ```
/// use kinfit_core::QRDecomposition;
///
/// let a = [[2.0, 1.0, 0.0], [0.0, 0.0, 0.0], [1.0, 3.0, 1.0]];
/// let qr = QRDecomposition::new(3, &a, None).unwrap();
/// assert!(!qr.ok());
/// assert_eq!(qr.rank(), 2);
/// ```
#[derive(Clone, Debug)]
pub struct QRDecomposition<F> {
    n: usize,
    eps: F,
    // Row-major, rows addressed through `perm`. On and below the diagonal: the (scaled)
    // Householder vectors. Above the diagonal: the strictly upper part of R.
    data: Vec<F>,
    perm: Vec<usize>,
    rdiag: Vec<F>,
    // Householder factors; zero marks a step without a reflection.
    beta: Vec<F>,
    n_sing: usize,
}

impl<F: Float> QRDecomposition<F> {
    /// Decompose the `n` x `n` matrix `matrix`.
    ///
    /// `eps` is the relative tolerance below which a pivot counts as zero. `None` (or a negative
    /// value) selects the machine epsilon of `F`.
    ///
    /// # Errors
    ///
    /// Returns [`KinfitError::EmptySystem`] if `n == 0`, [`KinfitError::DimensionMismatch`] if
    /// `matrix` is not `n` x `n` and [`KinfitError::NonFiniteEntry`] if it holds a NaN or an
    /// infinity.
    pub fn new<M>(n: usize, matrix: &M, eps: Option<F>) -> KinfitResult<Self>
    where
        M: MatrixLike<F> + ?Sized,
    {
        if n == 0 {
            return Err(KinfitError::EmptySystem);
        }
        if matrix.nrows() != n || matrix.ncols() != n {
            return Err(KinfitError::DimensionMismatch {
                expected: format!("{n}x{n}"),
                found: format!("{}x{}", matrix.nrows(), matrix.ncols()),
            });
        }
        let eps = match eps {
            Some(eps) if eps >= F::zero() => eps,
            _ => F::epsilon(),
        };
        let mut data = Vec::with_capacity(n * n);
        for i in 0..n {
            for j in 0..n {
                let value = matrix.at(i, j);
                if !value.is_finite() {
                    return Err(KinfitError::NonFiniteEntry { row: i, col: j });
                }
                data.push(value);
            }
        }
        let mut qr = Self {
            n,
            eps,
            data,
            perm: (0..n).collect(),
            rdiag: vec![F::zero(); n],
            beta: vec![F::zero(); n],
            n_sing: 0,
        };
        qr.decompose();
        Ok(qr)
    }

    #[inline]
    fn a(&self, row: usize, col: usize) -> F {
        self.data[self.perm[row] * self.n + col]
    }

    #[inline]
    fn a_mut(&mut self, row: usize, col: usize) -> &mut F {
        &mut self.data[self.perm[row] * self.n + col]
    }

    fn decompose(&mut self) {
        let n = self.n;
        let mut max = self
            .data
            .iter()
            .fold(F::zero(), |acc, x| Float::max(acc, x.abs()));
        if max == F::zero() {
            max = F::one();
        }
        let tol = self.eps * max;

        for i in 0..n - 1 {
            let mut scale = F::zero();
            for k in i..n {
                scale = Float::max(scale, self.a(k, i).abs());
            }
            if Float::max(scale, self.a(i, i).abs()) <= tol {
                self.n_sing += 1;
                self.rdiag[i] = F::zero();
                self.beta[i] = F::zero();
                continue;
            }

            // Move the smallest entry which is not negligible onto the diagonal, so that the
            // worst-conditioned row is eliminated first.
            let mut pivot = i;
            let mut smallest = F::infinity();
            for k in i..n {
                let v = self.a(k, i).abs();
                if v > tol && v < smallest {
                    smallest = v;
                    pivot = k;
                }
            }
            self.perm.swap(i, pivot);

            let inv_scale = F::one() / scale;
            let mut norm2 = F::zero();
            for k in i..n {
                let x = self.a(k, i) * inv_scale;
                *self.a_mut(k, i) = x;
                norm2 = norm2 + x * x;
            }
            let sigma = norm2.sqrt();
            let x0 = self.a(i, i);
            let alpha = if x0 >= F::zero() { -sigma } else { sigma };
            *self.a_mut(i, i) = x0 - alpha;
            let beta = F::one() / (sigma * (sigma + x0.abs()));

            for j in i + 1..n {
                let mut s = F::zero();
                for k in i..n {
                    s = s + self.a(k, i) * self.a(k, j);
                }
                s = s * beta;
                for k in i..n {
                    let v = self.a(k, i);
                    let entry = self.a_mut(k, j);
                    *entry = *entry - s * v;
                }
            }
            self.rdiag[i] = alpha * scale;
            self.beta[i] = beta;
        }

        let last = self.a(n - 1, n - 1);
        self.beta[n - 1] = F::zero();
        if last.abs() <= tol {
            self.n_sing += 1;
            self.rdiag[n - 1] = F::zero();
        } else {
            self.rdiag[n - 1] = last;
        }
        if self.n_sing > 0 {
            debug!(
                "{n}x{n} decomposition is rank deficient: {} singular directions (tolerance {:e})",
                self.n_sing,
                tol.to_f64().unwrap_or(f64::NAN)
            );
        }
    }

    /// Solve $`A x = b`$ in place: `b` is overwritten with `x`.
    ///
    /// Directions flagged as singular during the decomposition are set to zero in the
    /// solution. Returns the number of singular directions.
    ///
    /// # Errors
    ///
    /// Returns [`KinfitError::DimensionMismatch`] if `b` does not have length `n`.
    pub fn solve<V>(&self, b: &mut V) -> KinfitResult<usize>
    where
        V: VectorLike<F> + ?Sized,
    {
        let n = self.n;
        if b.len() != n {
            return Err(KinfitError::DimensionMismatch {
                expected: format!("{n}"),
                found: format!("{}", b.len()),
            });
        }
        let mut y: Vec<F> = self.perm.iter().map(|&k| b.get(k)).collect();

        // y <- Q^T P b
        for i in 0..n {
            let beta = self.beta[i];
            if beta == F::zero() {
                continue;
            }
            let mut s = F::zero();
            for (k, yk) in y.iter().enumerate().skip(i) {
                s = s + self.a(k, i) * *yk;
            }
            s = s * beta;
            for k in i..n {
                y[k] = y[k] - s * self.a(k, i);
            }
        }

        // R x = y
        for i in (0..n).rev() {
            if self.rdiag[i] == F::zero() {
                y[i] = F::zero();
                continue;
            }
            let mut s = y[i];
            for j in i + 1..n {
                s = s - self.a(i, j) * y[j];
            }
            y[i] = s / self.rdiag[i];
        }

        for (i, yi) in y.into_iter().enumerate() {
            b.set(i, yi);
        }
        Ok(self.n_sing)
    }

    /// Solve $`A x = b`$ and return `x`, leaving `b` untouched.
    pub fn solve_copy(&self, b: &[F]) -> KinfitResult<Vec<F>> {
        let mut x = b.to_vec();
        self.solve(&mut x)?;
        Ok(x)
    }

    /// Write the inverse of the decomposed matrix into `m`, one column per solve.
    ///
    /// Returns the number of singular directions; if it is nonzero, `m` holds a
    /// pseudo-inverse-like matrix with the singular directions projected out, not a true inverse.
    ///
    /// # Errors
    ///
    /// Returns [`KinfitError::DimensionMismatch`] if `m` is not `n` x `n`.
    pub fn invert<M>(&self, m: &mut M) -> KinfitResult<usize>
    where
        M: MatrixLikeMut<F> + ?Sized,
    {
        let n = self.n;
        if m.nrows() != n || m.ncols() != n {
            return Err(KinfitError::DimensionMismatch {
                expected: format!("{n}x{n}"),
                found: format!("{}x{}", m.nrows(), m.ncols()),
            });
        }
        let mut column = vec![F::zero(); n];
        for j in 0..n {
            column.iter_mut().for_each(|x| *x = F::zero());
            column[j] = F::one();
            self.solve(&mut column)?;
            for (i, x) in column.iter().enumerate() {
                m.set(i, j, *x);
            }
        }
        Ok(self.n_sing)
    }

    /// `true` if no direction was found to be singular.
    pub fn ok(&self) -> bool {
        self.n_sing == 0
    }

    /// The numerical rank, `n - n_sing`.
    pub fn rank(&self) -> usize {
        self.n - self.n_sing
    }

    /// The number of directions found to be singular.
    pub fn n_sing(&self) -> usize {
        self.n_sing
    }

    /// The dimension `n` of the decomposed matrix.
    pub fn dim(&self) -> usize {
        self.n
    }

    /// The relative tolerance used to decide singularity.
    pub fn eps(&self) -> F {
        self.eps
    }

    /// The row permutation chosen by pivoting: row `i` of the triangular factor was built from
    /// row `permutation()[i]` of the input.
    pub fn permutation(&self) -> &[usize] {
        &self.perm
    }
}

#[cfg(test)]
mod tests {
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use nalgebra::{DMatrix, DVector};

    use super::*;
    use crate::linalg::DenseMatrix;

    fn random_matrix(rng: &mut fastrand::Rng, n: usize) -> DenseMatrix<f64> {
        // diagonally dominant, hence well-conditioned
        DenseMatrix::from_fn(n, n, |i, j| {
            let x = 2.0 * rng.f64() - 1.0;
            if i == j {
                x + n as f64
            } else {
                x
            }
        })
    }

    fn residual_norm(a: &DenseMatrix<f64>, x: &[f64], b: &[f64]) -> f64 {
        let n = b.len();
        let mut r2 = 0.0;
        for i in 0..n {
            let ax: f64 = (0..n).map(|j| a.at(i, j) * x[j]).sum();
            r2 += (ax - b[i]).powi(2);
        }
        r2.sqrt()
    }

    #[test]
    fn test_solve_random() {
        let mut rng = fastrand::Rng::with_seed(0x5eed);
        for n in 3..=16 {
            let a = random_matrix(&mut rng, n);
            let b: Vec<f64> = (0..n).map(|_| 10.0 * rng.f64() - 5.0).collect();
            let qr = QRDecomposition::new(n, &a, None).unwrap();
            assert!(qr.ok());
            assert_eq!(qr.rank(), n);
            let x = qr.solve_copy(&b).unwrap();
            let b_norm = b.iter().map(|v| v * v).sum::<f64>().sqrt();
            assert!(residual_norm(&a, &x, &b) / b_norm < 1e-9, "n = {n}");
        }
    }

    #[test]
    fn test_solve_matches_nalgebra() {
        let mut rng = fastrand::Rng::with_seed(17);
        let n = 12;
        let a = random_matrix(&mut rng, n);
        let b: Vec<f64> = (0..n).map(|_| rng.f64()).collect();
        let na = DMatrix::from_row_slice(n, n, a.as_slice());
        let mut x = DVector::from_column_slice(&b);
        let expected = na.clone().lu().solve(&x).unwrap();
        let qr = QRDecomposition::new(n, &na, None).unwrap();
        assert_eq!(qr.solve(&mut x).unwrap(), 0);
        for i in 0..n {
            assert_relative_eq!(x[i], expected[i], epsilon = 1e-12, max_relative = 1e-10);
        }
    }

    #[test]
    fn test_invert_random() {
        let mut rng = fastrand::Rng::with_seed(42);
        for n in [3, 7, 12, 16] {
            let a = random_matrix(&mut rng, n);
            let qr = QRDecomposition::new(n, &a, None).unwrap();
            let mut inv = DenseMatrix::zeros(n, n);
            assert_eq!(qr.invert(&mut inv).unwrap(), 0);
            for i in 0..n {
                for j in 0..n {
                    let prod: f64 = (0..n).map(|k| a.at(i, k) * inv.at(k, j)).sum();
                    let expected = if i == j { 1.0 } else { 0.0 };
                    assert_abs_diff_eq!(prod, expected, epsilon = 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_zero_row_is_singular() {
        let a = [[2.0, 1.0, 0.0], [0.0, 0.0, 0.0], [1.0, 3.0, 1.0]];
        let qr = QRDecomposition::new(3, &a, None).unwrap();
        assert!(!qr.ok());
        assert!(qr.n_sing() > 0);
        assert_eq!(qr.rank(), 3 - qr.n_sing());

        // consistent right-hand side: the remaining equations are still satisfied
        let mut b = [3.0, 0.0, 5.0];
        assert_eq!(qr.solve(&mut b).unwrap(), qr.n_sing());
        assert_eq!(b[2], 0.0);
        assert_abs_diff_eq!(2.0 * b[0] + b[1], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(b[0] + 3.0 * b[1] + b[2], 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_matrix() {
        let a = DenseMatrix::<f64>::zeros(4, 4);
        let qr = QRDecomposition::new(4, &a, None).unwrap();
        assert_eq!(qr.n_sing(), 4);
        assert_eq!(qr.rank(), 0);
        let x = qr.solve_copy(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert!(x.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_tolerance_is_relative_to_largest_entry() {
        let a = [[1e10, 0.0], [0.0, 1.0]];
        assert!(QRDecomposition::new(2, &a, None).unwrap().ok());
        let qr = QRDecomposition::new(2, &a, Some(1e-9)).unwrap();
        assert_eq!(qr.n_sing(), 1);
        assert_eq!(qr.eps(), 1e-9);
        // negative tolerance selects the machine epsilon
        let qr = QRDecomposition::new(2, &a, Some(-1.0)).unwrap();
        assert_eq!(qr.eps(), f64::EPSILON);
    }

    #[test]
    fn test_pivot_is_recorded_not_swapped() {
        let a = [[4.0, 1.0], [1.0, 3.0]];
        let qr = QRDecomposition::new(2, &a, None).unwrap();
        assert_eq!(qr.permutation(), &[1, 0]);
        let x = qr.solve_copy(&[1.0, 2.0]).unwrap();
        assert_relative_eq!(x[0], 1.0 / 11.0, epsilon = 1e-15);
        assert_relative_eq!(x[1], 7.0 / 11.0, epsilon = 1e-15);
    }

    #[test]
    fn test_single_precision() {
        let a = [[3.0_f32, 1.0], [1.0, 2.0]];
        let qr = QRDecomposition::new(2, &a, None).unwrap();
        assert_eq!(qr.eps(), f32::EPSILON);
        let x = qr.solve_copy(&[9.0, 8.0]).unwrap();
        assert_relative_eq!(x[0], 2.0, epsilon = 1e-5);
        assert_relative_eq!(x[1], 3.0, epsilon = 1e-5);
    }

    #[test]
    fn test_dimension_checks() {
        let a = [[1.0, 0.0], [0.0, 1.0]];
        assert!(matches!(
            QRDecomposition::new(3, &a, None),
            Err(KinfitError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            QRDecomposition::<f64>::new(0, &a, None),
            Err(KinfitError::EmptySystem)
        ));
        let ragged = vec![vec![1.0, 0.0], vec![0.0]];
        assert!(QRDecomposition::new(2, &ragged, None).is_err());

        let qr = QRDecomposition::new(2, &a, None).unwrap();
        let mut b = vec![1.0; 3];
        assert!(matches!(
            qr.solve(&mut b),
            Err(KinfitError::DimensionMismatch { .. })
        ));
        let mut m = DenseMatrix::<f64>::zeros(2, 3);
        assert!(qr.invert(&mut m).is_err());
    }

    #[test]
    fn test_non_finite_entries_are_rejected() {
        let a = [[f64::NAN, 1.0], [1.0, 1.0]];
        assert!(matches!(
            QRDecomposition::new(2, &a, None),
            Err(KinfitError::NonFiniteEntry { row: 0, col: 0 })
        ));
        let b = [[1.0, 2.0], [f64::INFINITY, 1.0]];
        assert!(matches!(
            QRDecomposition::new(2, &b, None),
            Err(KinfitError::NonFiniteEntry { row: 1, col: 0 })
        ));
    }
}
