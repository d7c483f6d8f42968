//! # Linear Inversion of the Censoring Map
//!
//! The aggregation matrix `M` is rank deficient (rank 7 of 8 for the standard
//! triple), so `M · v = obs` has a family of solutions. This module produces
//! the two ingredients that describe that family:
//!
//! 1.  A particular least-squares solution `v0`, computed with a
//!     column-pivoted QR factorization and explicit rank detection. The
//!     trailing, numerically zero part of `R` is dropped and the matching
//!     free coordinates are set to zero, which yields the basic solution.
//! 2.  A basis of the null space `{v : M · v = 0}`, read off the right
//!     singular vectors whose singular values vanish.
//!
//! Neither step requires the observations to be consistent; the residual norm
//! is returned so the caller can decide what "consistent" means.

use crate::recover::faer_ndarray::{ColPivQrFactors, FaerColPivQr, FaerLinalgError, FaerSvd};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

/// Result of the least-squares solve.
#[derive(Debug, Clone)]
pub struct LinearSolution {
    /// A particular solution; not guaranteed non-negative.
    pub solution: Array1<f64>,
    /// `‖M · solution − obs‖₂`.
    pub residual_norm: f64,
    /// Numerical rank detected from the diagonal of `R`.
    pub rank: usize,
}

pub fn residual_norm(m: ArrayView2<f64>, v: ArrayView1<f64>, obs: ArrayView1<f64>) -> f64 {
    let residual = &m.dot(&v) - &obs;
    residual.dot(&residual).sqrt()
}

/// Least-squares solution of `M · v = obs` via column-pivoted QR.
///
/// Columns whose pivoted diagonal entry satisfies `|R_jj| <= rank_tolerance · |R_00|`
/// are treated as dependent and their coefficients pinned to zero.
pub fn solve_linear(m: ArrayView2<f64>, obs: ArrayView1<f64>, rank_tolerance: f64) -> LinearSolution {
    let n = m.ncols();
    let ColPivQrFactors { q, r, pivot } = m.col_piv_qr();
    let k = r.nrows();

    let leading = if k > 0 { r[[0, 0]].abs() } else { 0.0 };
    let rank = (0..k)
        .take_while(|&j| leading > 0.0 && r[[j, j]].abs() > rank_tolerance * leading)
        .count();

    let qtb = q.t().dot(&obs);

    // Back substitution on the leading rank×rank block of R.
    let mut pivoted = Array1::<f64>::zeros(n);
    for i in (0..rank).rev() {
        let mut acc = qtb[i];
        for j in (i + 1)..rank {
            acc -= r[[i, j]] * pivoted[j];
        }
        pivoted[i] = acc / r[[i, i]];
    }

    let mut solution = Array1::<f64>::zeros(n);
    for (j, &original) in pivot.iter().enumerate() {
        solution[original] = pivoted[j];
    }

    let residual_norm = residual_norm(m, solution.view(), obs);
    log::debug!(
        "[Linear] {}x{} system: rank {}, residual norm {:.3e}",
        m.nrows(),
        n,
        rank,
        residual_norm
    );

    LinearSolution {
        solution,
        residual_norm,
        rank,
    }
}

/// Basis of `{v : M · v = 0}` as the columns of an `n × d` matrix.
///
/// Right singular vectors whose singular value is at most
/// `rank_tolerance · σ_max` span the null space; when `M` has fewer rows than
/// columns the surplus right singular vectors are included as well. A
/// one-dimensional result is rescaled so its mean absolute entry is one and its
/// first non-zero entry is positive, which makes reports reproducible. Higher
/// dimensional bases are returned orthonormal.
pub fn null_space_basis(
    m: ArrayView2<f64>,
    rank_tolerance: f64,
) -> Result<Array2<f64>, FaerLinalgError> {
    let n = m.ncols();
    let (singular, vt) = m.singular_values_and_vt(true)?;
    let vt = vt.ok_or(FaerLinalgError::SvdNoConvergence)?;

    let sigma_max = singular.iter().fold(0.0_f64, |acc, &s| acc.max(s.abs()));
    let threshold = rank_tolerance * sigma_max;

    let mut null_rows: Vec<usize> = singular
        .iter()
        .enumerate()
        .filter(|&(_, &s)| s.abs() <= threshold)
        .map(|(i, _)| i)
        .collect();
    null_rows.extend(singular.len()..n);

    let mut basis = Array2::<f64>::zeros((n, null_rows.len()));
    for (col, &row) in null_rows.iter().enumerate() {
        basis.column_mut(col).assign(&vt.row(row));
    }

    if basis.ncols() == 1 {
        let mut direction = basis.column_mut(0);
        let mean_abs = direction.iter().map(|x| x.abs()).sum::<f64>() / n as f64;
        let scale_floor = f64::EPSILON * mean_abs.max(1.0) * 16.0;
        let sign = direction
            .iter()
            .find(|x| x.abs() > scale_floor)
            .map_or(1.0, |x| x.signum());
        direction.mapv_inplace(|x| sign * x / mean_abs);
    }

    log::debug!(
        "[Linear] Null space dimension {} (σ_max = {:.3e}, threshold = {:.3e})",
        basis.ncols(),
        sigma_max,
        threshold
    );

    Ok(basis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recover::aggregation::AggregationMatrix;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn binary_triple_has_rank_seven() {
        let m = AggregationMatrix::binary_triple();
        let obs = m.censor(Array1::from_elem(8, 0.125).view()).unwrap();
        let sol = solve_linear(m.matrix().view(), obs.view(), 1e-10);
        assert_eq!(sol.rank, 7);
        assert!(sol.residual_norm < 1e-12);
    }

    #[test]
    fn null_space_is_the_three_way_contrast() {
        let m = AggregationMatrix::binary_triple();
        let ns = null_space_basis(m.matrix().view(), 1e-10).unwrap();
        assert_eq!(ns.ncols(), 1);

        let expected = array![1.0, -1.0, -1.0, 1.0, -1.0, 1.0, 1.0, -1.0];
        for (got, want) in ns.column(0).iter().zip(expected.iter()) {
            assert_abs_diff_eq!(*got, *want, epsilon = 1e-10);
        }

        let image = m.matrix().dot(&ns.column(0));
        assert!(image.iter().all(|x| x.abs() < 1e-8));
    }

    #[test]
    fn full_rank_system_has_empty_null_space_and_exact_solution() {
        let m = array![[2.0, 0.0], [0.0, 3.0], [1.0, 1.0]];
        let truth = array![0.25, 0.75];
        let obs = m.dot(&truth);
        let ns = null_space_basis(m.view(), 1e-10).unwrap();
        assert_eq!(ns.ncols(), 0);
        let sol = solve_linear(m.view(), obs.view(), 1e-10);
        assert_eq!(sol.rank, 2);
        assert_abs_diff_eq!(sol.solution[0], 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(sol.solution[1], 0.75, epsilon = 1e-12);
    }

    #[test]
    fn wide_matrix_reports_surplus_null_directions() {
        let m = array![[1.0, 1.0, 1.0]];
        let ns = null_space_basis(m.view(), 1e-10).unwrap();
        assert_eq!(ns.ncols(), 2);
        let image = m.dot(&ns);
        assert!(image.iter().all(|x| x.abs() < 1e-10));
    }

    #[test]
    fn inconsistent_system_reports_least_squares_residual() {
        // x = 1 and x = 3 cannot both hold; the best fit is x = 2 with residual sqrt(2).
        let m = array![[1.0], [1.0]];
        let obs = array![1.0, 3.0];
        let sol = solve_linear(m.view(), obs.view(), 1e-10);
        assert_abs_diff_eq!(sol.solution[0], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(sol.residual_norm, 2.0_f64.sqrt(), epsilon = 1e-12);
    }
}
