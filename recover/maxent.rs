use crate::recover::cells::{CellLayout, ProbabilityError, ProbabilityVector, entropy_bits};
use ndarray::{Array1, ArrayView1};
use serde::Serialize;
use std::fmt;

/// Why no non-negative member of `v0 + z · ns` exists.
#[derive(Debug, Clone, PartialEq)]
pub enum Infeasibility {
    /// The per-cell bounds cross: `lower > upper`.
    EmptyInterval { lower: f64, upper: f64 },
    /// A cell the null direction cannot move is already negative.
    NegativeFixedCell { cell: usize, value: f64 },
    /// The null direction has a single sign, so one side is unbounded.
    Unbounded { lower: f64, upper: f64 },
}

impl fmt::Display for Infeasibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Infeasibility::EmptyInterval { lower, upper } => {
                write!(f, "feasible interval [{lower:.6e}, {upper:.6e}] is empty")
            }
            Infeasibility::NegativeFixedCell { cell, value } => write!(
                f,
                "cell {cell} is fixed by the observations at {value:.6e}, which is negative"
            ),
            Infeasibility::Unbounded { lower, upper } => write!(
                f,
                "null direction leaves the family unbounded: [{lower:.6e}, {upper:.6e}]"
            ),
        }
    }
}

/// Closed range of the null-space coordinate that keeps every cell non-negative.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeasibleInterval {
    pub lower: f64,
    pub upper: f64,
}

impl FeasibleInterval {
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }

    pub fn contains(&self, z: f64) -> bool {
        z >= self.lower && z <= self.upper
    }
}

/// Every entry of `v0 + z · ns` is `>= 0` exactly when `z` lies in the returned interval.
///
/// Entries with `|ns_k| <= zero_tolerance · max|ns|` impose no bound; they must
/// already satisfy `v0_k >= -negativity_tolerance`. A boundary point is allowed
/// because a zero probability is a valid cell value.
pub fn feasible_z_interval(
    v0: ArrayView1<f64>,
    ns: ArrayView1<f64>,
    negativity_tolerance: f64,
) -> Result<FeasibleInterval, Infeasibility> {
    let scale = ns.iter().fold(0.0_f64, |acc, x| acc.max(x.abs()));
    let zero_tolerance = 1e-12 * scale;

    let mut lower = f64::NEG_INFINITY;
    let mut upper = f64::INFINITY;
    for (k, (&base, &dir)) in v0.iter().zip(ns.iter()).enumerate() {
        if dir.abs() <= zero_tolerance {
            if base < -negativity_tolerance {
                return Err(Infeasibility::NegativeFixedCell {
                    cell: k,
                    value: base,
                });
            }
            continue;
        }
        let crossing = -base / dir;
        if dir > 0.0 {
            lower = lower.max(crossing);
        } else {
            upper = upper.min(crossing);
        }
    }

    if !lower.is_finite() || !upper.is_finite() {
        return Err(Infeasibility::Unbounded { lower, upper });
    }
    if lower > upper {
        // Rounding can make a single-point family look empty.
        if lower - upper <= negativity_tolerance {
            let mid = 0.5 * (lower + upper);
            return Ok(FeasibleInterval {
                lower: mid,
                upper: mid,
            });
        }
        return Err(Infeasibility::EmptyInterval { lower, upper });
    }
    Ok(FeasibleInterval { lower, upper })
}

/// Convergence state of the bounded scalar search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OptimizerStatus {
    Converged,
    /// The iteration cap was hit; the best point seen is returned.
    IterationCapReached,
}

#[derive(Debug, Clone, Copy)]
pub struct ScalarMinimum {
    pub x: f64,
    pub value: f64,
    pub iterations: usize,
    pub status: OptimizerStatus,
}

/// Brent's bounded minimization on `[a, b]`: golden-section steps safeguarded
/// by parabolic interpolation. Never evaluates `f` at the endpoints.
///
/// Stops once the bracket around the best point is within
/// `sqrt(eps)·|x| + x_tolerance / 3` on each side, or once `max_iterations`
/// function evaluations have been spent. A cap of zero is treated as one; the
/// first evaluation always happens.
pub fn minimize_bounded<F>(
    mut f: F,
    bounds: (f64, f64),
    x_tolerance: f64,
    max_iterations: usize,
) -> ScalarMinimum
where
    F: FnMut(f64) -> f64,
{
    let max_iterations = max_iterations.max(1);
    let (mut a, mut b) = bounds;
    if a == b {
        return ScalarMinimum {
            x: a,
            value: f(a),
            iterations: 1,
            status: OptimizerStatus::Converged,
        };
    }

    let sqrt_eps = f64::EPSILON.sqrt();
    let golden_mean = 0.5 * (3.0 - 5.0_f64.sqrt());

    let mut fulc = a + golden_mean * (b - a);
    let mut nfc = fulc;
    let mut xf = fulc;
    let mut rat = 0.0_f64;
    let mut e = 0.0_f64;
    let mut fx = f(xf);
    let mut evaluations = 1;
    let mut ffulc = fx;
    let mut fnfc = fx;
    let mut xm = 0.5 * (a + b);
    let mut tol1 = sqrt_eps * xf.abs() + x_tolerance / 3.0;
    let mut tol2 = 2.0 * tol1;
    let mut status = OptimizerStatus::Converged;

    while (xf - xm).abs() > tol2 - 0.5 * (b - a) {
        if evaluations >= max_iterations {
            status = OptimizerStatus::IterationCapReached;
            break;
        }
        let mut golden = true;

        if e.abs() > tol1 {
            golden = false;
            let mut r = (xf - nfc) * (fx - ffulc);
            let mut q = (xf - fulc) * (fx - fnfc);
            let mut p = (xf - fulc) * q - (xf - nfc) * r;
            q = 2.0 * (q - r);
            if q > 0.0 {
                p = -p;
            }
            q = q.abs();
            r = e;
            e = rat;

            if p.abs() < (0.5 * q * r).abs() && p > q * (a - xf) && p < q * (b - xf) {
                rat = p / q;
                let x = xf + rat;
                if (x - a) < tol2 || (b - x) < tol2 {
                    let si = if xm - xf >= 0.0 { 1.0 } else { -1.0 };
                    rat = tol1 * si;
                }
            } else {
                golden = true;
            }
        }

        if golden {
            e = if xf >= xm { a - xf } else { b - xf };
            rat = golden_mean * e;
        }

        let si = if rat >= 0.0 { 1.0 } else { -1.0 };
        let x = xf + si * rat.abs().max(tol1);
        let fu = f(x);
        evaluations += 1;

        if fu <= fx {
            if x >= xf {
                a = xf;
            } else {
                b = xf;
            }
            fulc = nfc;
            ffulc = fnfc;
            nfc = xf;
            fnfc = fx;
            xf = x;
            fx = fu;
        } else {
            if x < xf {
                a = x;
            } else {
                b = x;
            }
            if fu <= fnfc || nfc == xf {
                fulc = nfc;
                ffulc = fnfc;
                nfc = x;
                fnfc = fu;
            } else if fu <= ffulc || fulc == xf || fulc == nfc {
                fulc = x;
                ffulc = fu;
            }
        }

        xm = 0.5 * (a + b);
        tol1 = sqrt_eps * xf.abs() + x_tolerance / 3.0;
        tol2 = 2.0 * tol1;
    }

    ScalarMinimum {
        x: xf,
        value: fx,
        iterations: evaluations,
        status,
    }
}

/// The maximum-entropy member of the solution family.
#[derive(Debug, Clone)]
pub struct MaxEntSelection {
    pub z: f64,
    pub probabilities: ProbabilityVector,
    pub entropy_bits: f64,
    pub iterations: usize,
    pub status: OptimizerStatus,
}

/// Point on the family `v0 + z · ns`.
pub fn family_point(v0: ArrayView1<f64>, ns: ArrayView1<f64>, z: f64) -> Array1<f64> {
    &v0 + &(&ns * z)
}

/// Maximizes the entropy of `v0 + z · ns` over `interval`.
///
/// The stationary point satisfies `Σ ns_k · log v_k = 0`, which for the
/// standard triple is the "no three-way interaction" condition.
pub fn select_maxent(
    layout: CellLayout,
    v0: ArrayView1<f64>,
    ns: ArrayView1<f64>,
    interval: FeasibleInterval,
    z_tolerance: f64,
    max_iterations: usize,
    negativity_tolerance: f64,
) -> Result<MaxEntSelection, ProbabilityError> {
    let minimum = minimize_bounded(
        |z| -entropy_bits(family_point(v0, ns, z).view()),
        (interval.lower, interval.upper),
        z_tolerance,
        max_iterations,
    );

    if minimum.status == OptimizerStatus::IterationCapReached {
        log::warn!(
            "Entropy search hit the cap of {} evaluations; returning best z = {:.6e}",
            max_iterations,
            minimum.x
        );
    }

    let point = family_point(v0, ns, minimum.x);
    let probabilities = ProbabilityVector::new(layout, point.view(), negativity_tolerance)?;
    let entropy_bits = probabilities.entropy_bits();

    Ok(MaxEntSelection {
        z: minimum.x,
        probabilities,
        entropy_bits,
        iterations: minimum.iterations,
        status: minimum.status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn brent_finds_parabola_vertex() {
        let result = minimize_bounded(|x| (x - 0.3).powi(2) + 1.0, (-2.0, 5.0), 1e-10, 500);
        assert_eq!(result.status, OptimizerStatus::Converged);
        assert_abs_diff_eq!(result.x, 0.3, epsilon = 1e-7);
        assert_abs_diff_eq!(result.value, 1.0, epsilon = 1e-14);
    }

    #[test]
    fn brent_respects_bounds_for_monotone_objective() {
        let result = minimize_bounded(|x| x, (1.0, 2.0), 1e-10, 500);
        assert!(result.x >= 1.0 && result.x < 1.0 + 1e-6);
    }

    #[test]
    fn brent_reports_iteration_cap() {
        let result = minimize_bounded(|x| (x - 0.123456).abs().sqrt(), (-10.0, 10.0), 1e-14, 5);
        assert_eq!(result.status, OptimizerStatus::IterationCapReached);
        assert_eq!(result.iterations, 5);
        assert!(result.x.is_finite());
    }

    #[test]
    fn brent_never_exceeds_a_tiny_cap() {
        for cap in [0, 1] {
            let result = minimize_bounded(|x| (x - 0.3).powi(2), (-2.0, 5.0), 1e-10, cap);
            assert_eq!(result.status, OptimizerStatus::IterationCapReached);
            assert_eq!(result.iterations, 1);
        }
        let result = minimize_bounded(|x| (x - 0.3).powi(2), (-2.0, 5.0), 1e-10, 3);
        assert_eq!(result.iterations, 3);
    }

    #[test]
    fn interval_bounds_are_tight() {
        let v0 = array![0.2, 0.1, 0.3, 0.4];
        let ns = array![1.0, -1.0, -1.0, 1.0];
        let interval = feasible_z_interval(v0.view(), ns.view(), 1e-9).unwrap();
        assert_abs_diff_eq!(interval.lower, -0.2, epsilon = 1e-15);
        assert_abs_diff_eq!(interval.upper, 0.1, epsilon = 1e-15);

        for z in [interval.lower, interval.upper] {
            let p = family_point(v0.view(), ns.view(), z);
            assert!(p.iter().any(|x| x.abs() < 1e-12));
            assert!(p.iter().all(|&x| x >= -1e-12));
        }
        let inside = family_point(v0.view(), ns.view(), -0.05);
        assert!(inside.iter().all(|&x| x > 0.0));
    }

    #[test]
    fn interval_rejects_negative_fixed_cell() {
        let v0 = array![0.5, -0.01, 0.51];
        let ns = array![1.0, 0.0, -1.0];
        let err = feasible_z_interval(v0.view(), ns.view(), 1e-9).unwrap_err();
        assert_eq!(
            err,
            Infeasibility::NegativeFixedCell {
                cell: 1,
                value: -0.01
            }
        );
    }

    #[test]
    fn interval_rejects_crossed_bounds() {
        // Cells 0 and 1 both need z to move in opposite, incompatible directions.
        let v0 = array![-0.3, -0.3, 1.6];
        let ns = array![1.0, -1.0, 0.0];
        let err = feasible_z_interval(v0.view(), ns.view(), 1e-9).unwrap_err();
        assert!(matches!(err, Infeasibility::EmptyInterval { .. }));
    }

    #[test]
    fn interval_rejects_single_signed_direction() {
        let v0 = array![0.5, 0.5];
        let ns = array![1.0, 1.0];
        let err = feasible_z_interval(v0.view(), ns.view(), 1e-9).unwrap_err();
        assert!(matches!(err, Infeasibility::Unbounded { .. }));
    }

    #[test]
    fn maxent_on_symmetric_family_lands_on_uniform() {
        let layout = CellLayout { n_variables: 2 };
        let v0 = array![0.4, 0.1, 0.1, 0.4];
        let ns = array![1.0, -1.0, -1.0, 1.0];
        let interval = feasible_z_interval(v0.view(), ns.view(), 1e-9).unwrap();
        let selection =
            select_maxent(layout, v0.view(), ns.view(), interval, 1e-12, 500, 1e-9).unwrap();
        assert_eq!(selection.status, OptimizerStatus::Converged);
        assert_abs_diff_eq!(selection.z, -0.15, epsilon = 1e-7);
        for k in 0..4 {
            assert_abs_diff_eq!(selection.probabilities.get(k), 0.25, epsilon = 1e-7);
        }
        assert_abs_diff_eq!(selection.entropy_bits, 2.0, epsilon = 1e-10);
    }
}
