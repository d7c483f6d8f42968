//! # Weighted Logistic Regression on Cell Tables
//!
//! A recovered joint table is consumed by fitting a logistic regression with
//! one row per cell and the cell probability as the row weight. With only a
//! handful of rows this is a plain IRLS loop: form the working response,
//! solve the weighted normal equations by Cholesky, halve the step whenever
//! the deviance rises.
//!
//! The same fitter drives the omitted-variable comparison: dropping `x2`
//! from an additive logit model shifts the `x1` coefficient toward zero even
//! when `x1` and `x2` are independent, because the logit link is not
//! collapsible.

use crate::recover::cells::{CellLayout, ProbabilityVector, X1, X2};
use crate::recover::faer_ndarray::{FaerCholesky, FaerLinalgError};
use faer::Side;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GlmError {
    #[error("Design has {design_rows} rows, outcome has {outcome_len}, weights have {weights_len}.")]
    DimensionMismatch {
        design_rows: usize,
        outcome_len: usize,
        weights_len: usize,
    },
    #[error("The weighted normal equations could not be solved: {0}")]
    Linalg(#[from] FaerLinalgError),
    #[error("Non-finite values appeared in the coefficient vector at iteration {0}.")]
    NonFinite(usize),
}

/// The status of the IRLS convergence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum IrlsStatus {
    /// Deviance change fell below tolerance.
    Converged,
    /// Reached maximum iterations without converging.
    MaxIterationsReached,
    /// Step-halving could not reduce the deviance, typically separation.
    Unstable,
}

#[derive(Clone, Copy, Debug)]
pub struct IrlsOptions {
    pub max_iterations: usize,
    pub convergence_tolerance: f64,
}

impl Default for IrlsOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            convergence_tolerance: 1e-12,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct LogisticFit {
    pub coefficients: Array1<f64>,
    pub deviance: f64,
    pub iterations: usize,
    pub status: IrlsStatus,
}

const PROB_EPS: f64 = 1e-12;
const MIN_WEIGHT: f64 = 1e-12;
const MAX_STEP_HALVINGS: usize = 30;

fn sigmoid(eta: f64) -> f64 {
    let clamped = eta.clamp(-700.0, 700.0);
    1.0 / (1.0 + (-clamped).exp())
}

/// `-2 · Σ w_i [y_i ln μ_i + (1 − y_i) ln(1 − μ_i)]`.
pub fn binomial_deviance(y: ArrayView1<f64>, mu: &Array1<f64>, weights: ArrayView1<f64>) -> f64 {
    let mut total = 0.0;
    for ((&yi, &mui), &wi) in y.iter().zip(mu.iter()).zip(weights.iter()) {
        if wi == 0.0 {
            continue;
        }
        let m = mui.clamp(PROB_EPS, 1.0 - PROB_EPS);
        total += wi * (yi * m.ln() + (1.0 - yi) * (1.0 - m).ln());
    }
    -2.0 * total
}

/// Fits `logit P(y=1) = X β` with prior row weights by IRLS.
pub fn fit_weighted_logistic(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    weights: ArrayView1<f64>,
    options: IrlsOptions,
) -> Result<LogisticFit, GlmError> {
    if x.nrows() != y.len() || x.nrows() != weights.len() {
        return Err(GlmError::DimensionMismatch {
            design_rows: x.nrows(),
            outcome_len: y.len(),
            weights_len: weights.len(),
        });
    }

    let p = x.ncols();
    let mut beta = Array1::<f64>::zeros(p);
    let mut mu = x.dot(&beta).mapv(sigmoid);
    let mut deviance = binomial_deviance(y, &mu, weights);
    let mut status = IrlsStatus::MaxIterationsReached;
    let mut iteration = 0;

    while iteration < options.max_iterations {
        iteration += 1;

        let eta = x.dot(&beta);
        let variance = mu.mapv(|m| (m * (1.0 - m)).max(MIN_WEIGHT));
        let z = &eta + &((&y - &mu) / &variance);
        let w = &weights * &variance;

        let xw = &x * &w.view().insert_axis(Axis(1));
        let xtwx: Array2<f64> = xw.t().dot(&x);
        let xtwz = xw.t().dot(&z);
        let proposal = xtwx.cholesky(Side::Lower)?.solve_vec(&xtwz);
        if proposal.iter().any(|b| !b.is_finite()) {
            return Err(GlmError::NonFinite(iteration));
        }

        // Step-halving toward the previous iterate until the deviance stops rising.
        let mut step = &proposal - &beta;
        let mut candidate = &beta + &step;
        let mut candidate_mu = x.dot(&candidate).mapv(sigmoid);
        let mut candidate_dev = binomial_deviance(y, &candidate_mu, weights);
        let slack = 1e-12 * (deviance.abs() + 1.0);
        let mut halvings = 0;
        while candidate_dev > deviance + slack && halvings < MAX_STEP_HALVINGS {
            step *= 0.5;
            candidate = &beta + &step;
            candidate_mu = x.dot(&candidate).mapv(sigmoid);
            candidate_dev = binomial_deviance(y, &candidate_mu, weights);
            halvings += 1;
        }
        if candidate_dev > deviance + slack {
            log::warn!(
                "IRLS could not reduce deviance at iteration {} ({:.6e} > {:.6e})",
                iteration,
                candidate_dev,
                deviance
            );
            status = IrlsStatus::Unstable;
            break;
        }

        let change = (deviance - candidate_dev).abs();
        beta = candidate;
        mu = candidate_mu;
        deviance = candidate_dev;
        log::debug!("[IRLS] iteration {iteration}: deviance {deviance:.12e}, change {change:.3e}");

        if change < options.convergence_tolerance * (deviance.abs() + 0.1) {
            status = IrlsStatus::Converged;
            break;
        }
    }

    if status == IrlsStatus::MaxIterationsReached {
        log::warn!(
            "IRLS stopped after {} iterations without meeting the deviance tolerance",
            options.max_iterations
        );
    }

    Ok(LogisticFit {
        coefficients: beta,
        deviance,
        iterations: iteration,
        status,
    })
}

/// Regresses the outcome on `explanatory` variables, one weighted row per cell.
///
/// The design starts with an intercept column followed by the listed
/// variables in order.
pub fn fit_cells(
    p: &ProbabilityVector,
    explanatory: &[usize],
    options: IrlsOptions,
) -> Result<LogisticFit, GlmError> {
    let layout: CellLayout = p.layout();
    let n = layout.n_cells();
    let outcome = layout.outcome();
    let x = Array2::from_shape_fn((n, explanatory.len() + 1), |(cell, col)| {
        if col == 0 {
            1.0
        } else {
            layout.value(cell, explanatory[col - 1]) as f64
        }
    });
    let y = Array1::from_shape_fn(n, |cell| layout.value(cell, outcome) as f64);
    fit_weighted_logistic(x.view(), y.view(), p.values(), options)
}

/// Coefficients of `y ~ x1 + x2` against `y ~ x1` on the same table.
#[derive(Clone, Debug, Serialize)]
pub struct OmittedVariableReport {
    /// `[intercept, β_x1, β_x2]`.
    pub full: LogisticFit,
    /// `[intercept, β_x1]`.
    pub reduced: LogisticFit,
}

impl OmittedVariableReport {
    /// `β_x1(reduced) − β_x1(full)`.
    pub fn x1_shift(&self) -> f64 {
        self.reduced.coefficients[1] - self.full.coefficients[1]
    }
}

pub fn omitted_variable_comparison(
    p: &ProbabilityVector,
    options: IrlsOptions,
) -> Result<OmittedVariableReport, GlmError> {
    let full = fit_cells(p, &[X1, X2], options)?;
    let reduced = fit_cells(p, &[X1], options)?;
    Ok(OmittedVariableReport { full, reduced })
}
