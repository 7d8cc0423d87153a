use nalgebra::{DMatrix, DVector, SMatrix, Scalar};
use serde::{Deserialize, Serialize};

/// Householder QR decomposition with pivoting and rank-deficiency tolerance.
pub mod qr;

/// Read access to a two-dimensional array of scalars.
///
/// This is the single seam through which [`QRDecomposition`](crate::QRDecomposition) reads
/// its input, so any dense matrix type can be decomposed without conversion by the caller.
pub trait MatrixLike<F: Copy> {
    /// Number of rows.
    fn nrows(&self) -> usize;
    /// Number of columns.
    fn ncols(&self) -> usize;
    /// The entry at row `i`, column `j`.
    fn at(&self, i: usize, j: usize) -> F;
}

/// Write access to a two-dimensional array of scalars.
pub trait MatrixLikeMut<F: Copy>: MatrixLike<F> {
    /// Overwrite the entry at row `i`, column `j`.
    fn set(&mut self, i: usize, j: usize, value: F);
}

/// Read/write access to a one-dimensional array of scalars.
pub trait VectorLike<F: Copy> {
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn get(&self, i: usize) -> F;
    fn set(&mut self, i: usize, value: F);
}

/// A dense, row-major matrix backed by a flat buffer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DenseMatrix<F> {
    nrows: usize,
    ncols: usize,
    data: Vec<F>,
}

impl<F: Copy + num::Zero> DenseMatrix<F> {
    /// A matrix of the given shape filled with zeros.
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self {
            nrows,
            ncols,
            data: vec![F::zero(); nrows * ncols],
        }
    }
    /// Build a matrix by evaluating `f(i, j)` for every entry.
    pub fn from_fn(nrows: usize, ncols: usize, mut f: impl FnMut(usize, usize) -> F) -> Self {
        let mut data = Vec::with_capacity(nrows * ncols);
        for i in 0..nrows {
            for j in 0..ncols {
                data.push(f(i, j));
            }
        }
        Self { nrows, ncols, data }
    }
    /// Set every entry to zero, keeping the shape.
    pub fn fill_zero(&mut self) {
        self.data.iter_mut().for_each(|x| *x = F::zero());
    }
    /// The underlying row-major buffer.
    pub fn as_slice(&self) -> &[F] {
        &self.data
    }
}

impl<F> std::ops::Index<(usize, usize)> for DenseMatrix<F> {
    type Output = F;
    fn index(&self, (i, j): (usize, usize)) -> &Self::Output {
        &self.data[i * self.ncols + j]
    }
}
impl<F> std::ops::IndexMut<(usize, usize)> for DenseMatrix<F> {
    fn index_mut(&mut self, (i, j): (usize, usize)) -> &mut Self::Output {
        &mut self.data[i * self.ncols + j]
    }
}

impl<F: Copy> MatrixLike<F> for DenseMatrix<F> {
    fn nrows(&self) -> usize {
        self.nrows
    }
    fn ncols(&self) -> usize {
        self.ncols
    }
    fn at(&self, i: usize, j: usize) -> F {
        self.data[i * self.ncols + j]
    }
}
impl<F: Copy> MatrixLikeMut<F> for DenseMatrix<F> {
    fn set(&mut self, i: usize, j: usize, value: F) {
        self.data[i * self.ncols + j] = value;
    }
}

impl<F: Copy, const N: usize, const M: usize> MatrixLike<F> for [[F; M]; N] {
    fn nrows(&self) -> usize {
        N
    }
    fn ncols(&self) -> usize {
        M
    }
    fn at(&self, i: usize, j: usize) -> F {
        self[i][j]
    }
}
impl<F: Copy, const N: usize, const M: usize> MatrixLikeMut<F> for [[F; M]; N] {
    fn set(&mut self, i: usize, j: usize, value: F) {
        self[i][j] = value;
    }
}

// Ragged rows report zero columns so they never pass a shape check.
impl<F: Copy> MatrixLike<F> for Vec<Vec<F>> {
    fn nrows(&self) -> usize {
        self.len()
    }
    fn ncols(&self) -> usize {
        match self.first() {
            Some(first) if self.iter().all(|row| row.len() == first.len()) => first.len(),
            _ => 0,
        }
    }
    fn at(&self, i: usize, j: usize) -> F {
        self[i][j]
    }
}
impl<F: Copy> MatrixLikeMut<F> for Vec<Vec<F>> {
    fn set(&mut self, i: usize, j: usize, value: F) {
        self[i][j] = value;
    }
}

impl<F: Scalar + Copy> MatrixLike<F> for DMatrix<F> {
    fn nrows(&self) -> usize {
        self.shape().0
    }
    fn ncols(&self) -> usize {
        self.shape().1
    }
    fn at(&self, i: usize, j: usize) -> F {
        self[(i, j)]
    }
}
impl<F: Scalar + Copy> MatrixLikeMut<F> for DMatrix<F> {
    fn set(&mut self, i: usize, j: usize, value: F) {
        self[(i, j)] = value;
    }
}

impl<F: Scalar + Copy, const R: usize, const C: usize> MatrixLike<F> for SMatrix<F, R, C> {
    fn nrows(&self) -> usize {
        R
    }
    fn ncols(&self) -> usize {
        C
    }
    fn at(&self, i: usize, j: usize) -> F {
        self[(i, j)]
    }
}
impl<F: Scalar + Copy, const R: usize, const C: usize> MatrixLikeMut<F> for SMatrix<F, R, C> {
    fn set(&mut self, i: usize, j: usize, value: F) {
        self[(i, j)] = value;
    }
}

impl<F: Copy> VectorLike<F> for [F] {
    fn len(&self) -> usize {
        <[F]>::len(self)
    }
    fn get(&self, i: usize) -> F {
        self[i]
    }
    fn set(&mut self, i: usize, value: F) {
        self[i] = value;
    }
}
impl<F: Copy> VectorLike<F> for Vec<F> {
    fn len(&self) -> usize {
        Vec::len(self)
    }
    fn get(&self, i: usize) -> F {
        self[i]
    }
    fn set(&mut self, i: usize, value: F) {
        self[i] = value;
    }
}
impl<F: Copy, const N: usize> VectorLike<F> for [F; N] {
    fn len(&self) -> usize {
        N
    }
    fn get(&self, i: usize) -> F {
        self[i]
    }
    fn set(&mut self, i: usize, value: F) {
        self[i] = value;
    }
}
impl<F: Scalar + Copy> VectorLike<F> for DVector<F> {
    fn len(&self) -> usize {
        self.nrows()
    }
    fn get(&self, i: usize) -> F {
        self[i]
    }
    fn set(&mut self, i: usize, value: F) {
        self[i] = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dense_matrix_layout() {
        let m = DenseMatrix::from_fn(2, 3, |i, j| (10 * i + j) as f64);
        assert_eq!(m.nrows(), 2);
        assert_eq!(m.ncols(), 3);
        assert_eq!(m.as_slice(), &[0.0, 1.0, 2.0, 10.0, 11.0, 12.0]);
        assert_eq!(m[(1, 2)], 12.0);
        assert_eq!(m.at(0, 1), 1.0);
    }

    #[test]
    fn test_matrix_adapters_agree() {
        let nested = [[1.0, 2.0], [3.0, 4.0]];
        let ragged = vec![vec![1.0, 2.0], vec![3.0, 4.0]];
        let dynamic = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let fixed = nalgebra::Matrix2::new(1.0, 2.0, 3.0, 4.0);
        for i in 0..2 {
            for j in 0..2 {
                let expected = nested.at(i, j);
                assert_eq!(ragged.at(i, j), expected);
                assert_eq!(dynamic.at(i, j), expected);
                assert_eq!(fixed.at(i, j), expected);
            }
        }
    }

    #[test]
    fn test_vector_adapters() {
        let mut v = vec![1.0, 2.0, 3.0];
        VectorLike::set(&mut v, 1, 5.0);
        assert_eq!(VectorLike::get(&v, 1), 5.0);
        let mut d = DVector::from_vec(vec![0.0; 4]);
        VectorLike::set(&mut d, 3, 1.5);
        assert_eq!(VectorLike::len(&d), 4);
        assert_eq!(d[3], 1.5);
        let mut a = [0.0_f32; 2];
        a.set(0, 2.0);
        assert_eq!(a, [2.0, 0.0]);
    }

    #[test]
    fn test_fill_zero_keeps_shape() {
        let mut m = DenseMatrix::from_fn(3, 2, |i, j| (i + j) as f64 + 1.0);
        m.fill_zero();
        assert_eq!(m.nrows(), 3);
        assert_eq!(m.ncols(), 2);
        assert!(m.as_slice().iter().all(|x| *x == 0.0));
    }
}
