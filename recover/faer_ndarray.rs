use dyn_stack::{MemBuffer, MemStack};
use faer::diag::{Diag, DiagRef};
use faer::linalg::solvers::{self, ColPivQr, Solve};
use faer::linalg::svd::{self, ComputeSvdVectors};
use faer::{Mat, MatRef, Side, get_global_parallelism};
use ndarray::{Array1, Array2, ArrayBase, Data, Ix1, Ix2};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FaerLinalgError {
    #[error("SVD failed to converge")]
    SvdNoConvergence,
    #[error("Cholesky factorization failed: {0:?}")]
    Cholesky(solvers::LltError),
}

fn mat_to_array(mat: MatRef<'_, f64>) -> Array2<f64> {
    Array2::from_shape_fn((mat.nrows(), mat.ncols()), |(i, j)| mat[(i, j)])
}

fn diag_to_array(diag: DiagRef<'_, f64>) -> Array1<f64> {
    let mat = diag.column_vector().as_mat();
    Array1::from_shape_fn(mat.nrows(), |i| mat[(i, 0)])
}

enum FaerStorage<'a> {
    Borrowed(MatRef<'a, f64>),
    Owned(Mat<f64>),
}

impl<'a> FaerStorage<'a> {
    #[inline]
    fn as_ref(&self) -> MatRef<'_, f64> {
        match self {
            FaerStorage::Borrowed(view) => *view,
            FaerStorage::Owned(mat) => mat.as_ref(),
        }
    }
}

/// Zero-copy view of a standard-layout (or transposed) ndarray matrix as a faer `MatRef`.
/// Arbitrary strides fall back to an owned copy.
pub struct FaerArrayView<'a> {
    storage: FaerStorage<'a>,
}

impl<'a> FaerArrayView<'a> {
    pub fn new<S: Data<Elem = f64>>(array: &'a ArrayBase<S, Ix2>) -> Self {
        let storage = if let Some(slice) = array.as_slice_memory_order() {
            if array.is_standard_layout() {
                FaerStorage::Borrowed(MatRef::from_row_major_slice(
                    slice,
                    array.nrows(),
                    array.ncols(),
                ))
            } else if array.t().is_standard_layout() {
                FaerStorage::Borrowed(MatRef::from_column_major_slice(
                    slice,
                    array.nrows(),
                    array.ncols(),
                ))
            } else {
                let (rows, cols) = array.dim();
                FaerStorage::Owned(Mat::from_fn(rows, cols, |i, j| array[(i, j)]))
            }
        } else {
            let (rows, cols) = array.dim();
            FaerStorage::Owned(Mat::from_fn(rows, cols, |i, j| array[(i, j)]))
        };
        Self { storage }
    }

    #[inline]
    pub fn as_ref(&self) -> MatRef<'_, f64> {
        self.storage.as_ref()
    }
}

pub struct FaerColView<'a> {
    storage: FaerStorage<'a>,
}

impl<'a> FaerColView<'a> {
    pub fn new<S: Data<Elem = f64>>(array: &'a ArrayBase<S, Ix1>) -> Self {
        let len = array.len();
        let storage = if let Some(slice) = array.as_slice() {
            FaerStorage::Borrowed(MatRef::from_row_major_slice(slice, len, 1))
        } else {
            FaerStorage::Owned(Mat::from_fn(len, 1, |i, _| array[i]))
        };
        Self { storage }
    }

    #[inline]
    pub fn as_ref(&self) -> MatRef<'_, f64> {
        self.storage.as_ref()
    }
}

pub trait FaerSvd {
    /// Singular values and, optionally, the full `V^T` factor.
    fn singular_values_and_vt(
        &self,
        compute_vt: bool,
    ) -> Result<(Array1<f64>, Option<Array2<f64>>), FaerLinalgError>;
}

impl<S: Data<Elem = f64>> FaerSvd for ArrayBase<S, Ix2> {
    fn singular_values_and_vt(
        &self,
        compute_vt: bool,
    ) -> Result<(Array1<f64>, Option<Array2<f64>>), FaerLinalgError> {
        let faer_view = FaerArrayView::new(self);
        let faer_mat = faer_view.as_ref();
        let (rows, cols) = faer_mat.shape();

        let compute_v_flag = if compute_vt {
            ComputeSvdVectors::Full
        } else {
            ComputeSvdVectors::No
        };

        let mut singular = Diag::<f64>::zeros(rows.min(cols));
        let mut v_storage = compute_vt.then(|| Mat::<f64>::zeros(cols, cols));

        let par = get_global_parallelism();
        let mut mem = MemBuffer::new(svd::svd_scratch::<f64>(
            rows,
            cols,
            ComputeSvdVectors::No,
            compute_v_flag,
            par,
            Default::default(),
        ));
        let mut stack = MemStack::new(&mut mem);

        svd::svd(
            faer_mat,
            singular.as_mut(),
            None,
            v_storage.as_mut().map(|mat| mat.as_mut()),
            par,
            &mut stack,
            Default::default(),
        )
        .map_err(|_| FaerLinalgError::SvdNoConvergence)?;

        let singular_values = diag_to_array(singular.as_ref());
        let vt = v_storage.map(|mat| mat_to_array(mat.as_ref().transpose()));

        Ok((singular_values, vt))
    }
}

/// Factors of a column-pivoted QR decomposition `A P = Q R`.
///
/// * `q`: thin orthonormal factor, `m × k` with `k = min(m, n)`.
/// * `r`: upper-trapezoidal factor, `k × n`, entries below the diagonal zeroed.
/// * `pivot`: `pivot[j]` is the original index of the j-th column of `A P`.
pub struct ColPivQrFactors {
    pub q: Array2<f64>,
    pub r: Array2<f64>,
    pub pivot: Vec<usize>,
}

pub trait FaerColPivQr {
    fn col_piv_qr(&self) -> ColPivQrFactors;
}

impl<S: Data<Elem = f64>> FaerColPivQr for ArrayBase<S, Ix2> {
    fn col_piv_qr(&self) -> ColPivQrFactors {
        let faer_view = FaerArrayView::new(self);
        let a = faer_view.as_ref();
        let (m, n) = a.shape();
        let k = m.min(n);

        let qr = ColPivQr::new(a);

        let q = mat_to_array(qr.compute_thin_Q().as_ref());

        // Only the upper trapezoid is meaningful; the storage below it is not part of R.
        let r_faer = qr.R();
        let r = Array2::from_shape_fn((k, n), |(i, j)| if j >= i { r_faer[(i, j)] } else { 0.0 });

        let pivot = qr.P().arrays().0.to_vec();

        ColPivQrFactors { q, r, pivot }
    }
}

pub struct FaerCholeskyFactor {
    factor: solvers::Llt<f64>,
}

impl FaerCholeskyFactor {
    pub fn solve_vec(&self, rhs: &Array1<f64>) -> Array1<f64> {
        let rhs_view = FaerColView::new(rhs);
        let sol = self.factor.solve(rhs_view.as_ref());
        Array1::from_shape_fn(rhs.len(), |i| sol[(i, 0)])
    }
}

pub trait FaerCholesky {
    fn cholesky(&self, side: Side) -> Result<FaerCholeskyFactor, FaerLinalgError>;
}

impl<S: Data<Elem = f64>> FaerCholesky for ArrayBase<S, Ix2> {
    fn cholesky(&self, side: Side) -> Result<FaerCholeskyFactor, FaerLinalgError> {
        let faer_view = FaerArrayView::new(self);
        let factor = faer_view
            .as_ref()
            .llt(side)
            .map_err(FaerLinalgError::Cholesky)?;
        Ok(FaerCholeskyFactor { factor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn col_piv_qr_reconstructs_permuted_matrix() {
        let a = array![[1.0, 4.0, 0.5], [2.0, -1.0, 3.0], [0.0, 2.0, 1.0], [1.0, 1.0, 1.0]];
        let ColPivQrFactors { q, r, pivot } = a.col_piv_qr();
        assert_eq!(q.dim(), (4, 3));
        assert_eq!(r.dim(), (3, 3));

        let qr = q.dot(&r);
        for (j, &original) in pivot.iter().enumerate() {
            for i in 0..a.nrows() {
                assert_abs_diff_eq!(qr[[i, j]], a[[i, original]], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn svd_of_rank_one_matrix_has_one_nonzero_value() {
        let a = array![[1.0, 2.0], [2.0, 4.0], [3.0, 6.0]];
        let (values, vt) = a.singular_values_and_vt(true).unwrap();
        let vt = vt.unwrap();
        assert_eq!(vt.dim(), (2, 2));
        let zero_count = values.iter().filter(|v| v.abs() < 1e-10).count();
        assert_eq!(zero_count, 1);

        // The right singular vector of the zero value spans [2, -1] up to sign.
        let idx = values.iter().position(|v| v.abs() < 1e-10).unwrap();
        let row = vt.row(idx);
        assert_abs_diff_eq!(row[0] * 1.0 + row[1] * 2.0, 0.0, epsilon = 1e-10);
    }

    #[test]
    fn cholesky_solves_spd_system() {
        let a = array![[4.0, 1.0], [1.0, 3.0]];
        let b = array![1.0, 2.0];
        let x = a.cholesky(Side::Lower).unwrap().solve_vec(&b);
        let back = a.dot(&x);
        assert_abs_diff_eq!(back[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(back[1], 2.0, epsilon = 1e-12);
    }
}
