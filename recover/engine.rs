// recover/engine.rs

//! # Margin Recovery
//!
//! Reconstructs a joint distribution over `(x1, x2, y)` from what two
//! experimenters could observe separately:
//!
//! - experimenter 1 saw `(x1, y)` but not `x2`,
//! - experimenter 2 saw `(x2, y)` but not `x1`,
//! - both know the prevalence of their own explanatory variable.
//!
//! Assuming `x1` and `x2` are independent, the `(x1, x2)` table is the outer
//! product of the two prevalences. The twelve observed sums then pin the
//! eight cells down to a one-parameter family `v0 + z · ns`, and the member
//! with maximal entropy is reported. That member is the unique one without a
//! three-way interaction, so it reproduces any truth generated by an additive
//! logit model with independent explanatory variables.
//!
//! The engine holds no mutable state; every call is an independent computation.

use crate::recover::aggregation::AggregationMatrix;
use crate::recover::cells::{CellLayout, ProbabilityError, ProbabilityVector, X1, X2, Y};
use crate::recover::config::RecoveryConfig;
use crate::recover::faer_ndarray::FaerLinalgError;
use crate::recover::linear::{null_space_basis, solve_linear};
use crate::recover::maxent::{
    FeasibleInterval, Infeasibility, OptimizerStatus, feasible_z_interval, select_maxent,
};
use ndarray::{Array1, ArrayView1, concatenate};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Invalid input '{field}': {reason}")]
    InvalidInput { field: &'static str, reason: String },

    #[error(
        "Observations are inconsistent with any joint table: least-squares residual {residual:.3e} exceeds tolerance {tolerance:.1e}."
    )]
    InconsistentObservations { residual: f64, tolerance: f64 },

    #[error("No non-negative reconstruction exists: {0}.")]
    InfeasibleReconstruction(Infeasibility),

    #[error(
        "The solution family has {dimension} free directions; only a one-dimensional null space is supported."
    )]
    DegenerateNullSpace { dimension: usize },

    #[error("Entropy search did not converge within {iterations} evaluations (best z = {z:.6e}).")]
    OptimizerDidNotConverge { iterations: usize, z: f64 },

    #[error("A matrix factorization failed: {0}")]
    Linalg(#[from] FaerLinalgError),

    #[error("The selected point is not a valid distribution: {0}")]
    Probability(#[from] ProbabilityError),
}

/// What the two experimenters report, in cell order with `x` fastest and `y` slowest.
///
/// `d1 = [P(x1=0,y=0), P(x1=1,y=0), P(x1=0,y=1), P(x1=1,y=1)]`, likewise `d2`
/// for `x2`. `x1`/`x2` are the prevalences `[P(x=0), P(x=1)]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarginalObservations {
    pub d1: [f64; 4],
    pub d2: [f64; 4],
    pub x1: [f64; 2],
    pub x2: [f64; 2],
}

impl MarginalObservations {
    /// Prevalences are summed out of each experimenter's own table.
    pub fn from_tables(d1: [f64; 4], d2: [f64; 4]) -> Self {
        Self {
            d1,
            d2,
            x1: [d1[0] + d1[2], d1[1] + d1[3]],
            x2: [d2[0] + d2[2], d2[1] + d2[3]],
        }
    }

    /// What the experimenters would observe if `joint` were the truth.
    pub fn from_joint(joint: &ProbabilityVector) -> Self {
        let p = |x1: usize, x2: usize, y: usize| joint.get(x1 | (x2 << 1) | (y << 2));
        let d1 = [
            p(0, 0, 0) + p(0, 1, 0),
            p(1, 0, 0) + p(1, 1, 0),
            p(0, 0, 1) + p(0, 1, 1),
            p(1, 0, 1) + p(1, 1, 1),
        ];
        let d2 = [
            p(0, 0, 0) + p(1, 0, 0),
            p(0, 1, 0) + p(1, 1, 0),
            p(0, 0, 1) + p(1, 0, 1),
            p(0, 1, 1) + p(1, 1, 1),
        ];
        Self::from_tables(d1, d2)
    }

    fn validate(&self) -> Result<(), RecoveryError> {
        let fields: [(&'static str, &[f64]); 4] =
            [("d1", &self.d1), ("d2", &self.d2), ("x1", &self.x1), ("x2", &self.x2)];
        for (field, values) in fields {
            if let Some(bad) = values.iter().find(|v| !v.is_finite() || **v < 0.0) {
                return Err(RecoveryError::InvalidInput {
                    field,
                    reason: format!("entries must be finite and non-negative, found {bad}"),
                });
            }
        }
        Ok(())
    }
}

/// Joint `(x1, x2)` table under independence, ordered
/// `[(0,0), (1,0), (0,1), (1,1)]`: the outer product of the two prevalences.
pub fn estimate_joint_xx(marginal_x1: &[f64; 2], marginal_x2: &[f64; 2]) -> [f64; 4] {
    [
        marginal_x1[0] * marginal_x2[0],
        marginal_x1[1] * marginal_x2[0],
        marginal_x1[0] * marginal_x2[1],
        marginal_x1[1] * marginal_x2[1],
    ]
}

/// The 12-entry observation vector in the row order of
/// [`AggregationMatrix::binary_triple`]. Nothing is renormalized.
pub fn assemble_observations(d1: &[f64; 4], d2: &[f64; 4], xx_joint: &[f64; 4]) -> Array1<f64> {
    let parts = [
        ArrayView1::from(&d1[..]),
        ArrayView1::from(&d2[..]),
        ArrayView1::from(&xx_joint[..]),
    ];
    match concatenate(ndarray::Axis(0), &parts) {
        Ok(obs) => obs,
        Err(e) => unreachable!("fixed-length parts always concatenate: {e}"),
    }
}

/// Everything the engine learned on one call.
#[derive(Debug, Clone)]
pub struct Recovery {
    /// The selected, normalized joint distribution.
    pub probabilities: ProbabilityVector,
    /// Least-squares particular solution `v0`.
    pub particular: Array1<f64>,
    /// Normalized null-space direction, absent when the solution is unique.
    pub null_direction: Option<Array1<f64>>,
    pub interval: Option<FeasibleInterval>,
    pub z_opt: Option<f64>,
    pub residual_norm: f64,
    pub entropy_bits: f64,
    pub optimizer_status: OptimizerStatus,
    pub iterations: usize,
}

/// Stateless margin-recovery engine for the standard `(x1, x2, y)` triple.
#[derive(Debug, Clone)]
pub struct MarginRecoveryEngine {
    config: RecoveryConfig,
    aggregation: AggregationMatrix,
}

impl Default for MarginRecoveryEngine {
    fn default() -> Self {
        Self::new(RecoveryConfig::default())
    }
}

impl MarginRecoveryEngine {
    pub fn new(config: RecoveryConfig) -> Self {
        Self {
            config,
            aggregation: AggregationMatrix::binary_triple(),
        }
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    pub fn aggregation(&self) -> &AggregationMatrix {
        &self.aggregation
    }

    /// Runs the full pipeline on one set of observations.
    pub fn recover(&self, observations: &MarginalObservations) -> Result<Recovery, RecoveryError> {
        observations.validate()?;
        let xx = estimate_joint_xx(&observations.x1, &observations.x2);
        let obs = assemble_observations(&observations.d1, &observations.d2, &xx);
        self.recover_observations(&self.aggregation, obs.view())
    }

    /// Recovers a table from any censoring map and its observed sums.
    ///
    /// `obs` follows the row order of `aggregation`. Entries must be finite;
    /// a negative entry is not rejected here but surfaces as an infeasible
    /// reconstruction if it forces a negative cell.
    pub fn recover_observations(
        &self,
        aggregation: &AggregationMatrix,
        obs: ArrayView1<f64>,
    ) -> Result<Recovery, RecoveryError> {
        let cfg = &self.config;
        let layout: CellLayout = aggregation.layout();
        let m = aggregation.matrix().view();

        if obs.len() != aggregation.n_rows() {
            return Err(RecoveryError::InvalidInput {
                field: "obs",
                reason: format!(
                    "expected {} observed sums, found {}",
                    aggregation.n_rows(),
                    obs.len()
                ),
            });
        }
        if let Some(bad) = obs.iter().find(|v| !v.is_finite()) {
            return Err(RecoveryError::InvalidInput {
                field: "obs",
                reason: format!("entries must be finite, found {bad}"),
            });
        }
        log::info!(
            "Recovering joint table from {} observed sums over {} cells",
            obs.len(),
            layout.n_cells()
        );

        let null_space = null_space_basis(m, cfg.rank_tolerance)?;
        if null_space.ncols() > 1 {
            return Err(RecoveryError::DegenerateNullSpace {
                dimension: null_space.ncols(),
            });
        }

        let linear = solve_linear(m, obs, cfg.rank_tolerance);
        if linear.residual_norm >= cfg.consistency_tolerance {
            return Err(RecoveryError::InconsistentObservations {
                residual: linear.residual_norm,
                tolerance: cfg.consistency_tolerance,
            });
        }
        let v0 = linear.solution;

        if null_space.ncols() == 0 {
            log::info!("Null space is trivial; the observations determine the table uniquely");
            if let Some((cell, &value)) = v0
                .iter()
                .enumerate()
                .find(|&(_, &v)| v < -cfg.negativity_tolerance)
            {
                return Err(RecoveryError::InfeasibleReconstruction(
                    Infeasibility::NegativeFixedCell { cell, value },
                ));
            }
            let probabilities = ProbabilityVector::new(layout, v0.view(), cfg.negativity_tolerance)?;
            let entropy_bits = probabilities.entropy_bits();
            return Ok(Recovery {
                probabilities,
                particular: v0,
                null_direction: None,
                interval: None,
                z_opt: None,
                residual_norm: linear.residual_norm,
                entropy_bits,
                optimizer_status: OptimizerStatus::Converged,
                iterations: 0,
            });
        }

        let ns = null_space.column(0).to_owned();
        let interval = feasible_z_interval(v0.view(), ns.view(), cfg.negativity_tolerance)
            .map_err(RecoveryError::InfeasibleReconstruction)?;
        log::debug!(
            "Feasible z interval [{:.6e}, {:.6e}]",
            interval.lower,
            interval.upper
        );

        let selection = select_maxent(
            layout,
            v0.view(),
            ns.view(),
            interval,
            cfg.z_tolerance,
            cfg.max_iterations,
            cfg.negativity_tolerance,
        )?;

        if selection.status == OptimizerStatus::IterationCapReached && cfg.require_convergence {
            return Err(RecoveryError::OptimizerDidNotConverge {
                iterations: selection.iterations,
                z: selection.z,
            });
        }

        log::info!(
            "Maximum-entropy point z = {:.6e} ({:.6} bits, {} evaluations)",
            selection.z,
            selection.entropy_bits,
            selection.iterations
        );

        Ok(Recovery {
            probabilities: selection.probabilities,
            particular: v0,
            null_direction: Some(ns),
            interval: Some(interval),
            z_opt: Some(selection.z),
            residual_norm: linear.residual_norm,
            entropy_bits: selection.entropy_bits,
            optimizer_status: selection.status,
            iterations: selection.iterations,
        })
    }
}

/// Signed log-linear three-way contrast, `Σ ns_k · ln p_k`.
///
/// Zero exactly when the table has no three-way `x1 × x2 × y` interaction,
/// which is the stationarity condition of the entropy search. Undefined, and
/// `None`, when any cell is zero.
pub fn three_way_interaction(p: &ProbabilityVector) -> Option<f64> {
    let layout = p.layout();
    if p.values().iter().any(|&v| v <= 0.0) {
        return None;
    }
    let contrast = (0..layout.n_cells())
        .map(|k| {
            let parity = layout.value(k, X1) + layout.value(k, X2) + layout.value(k, Y);
            let sign = if parity % 2 == 0 { 1.0 } else { -1.0 };
            sign * p.get(k).ln()
        })
        .sum();
    Some(contrast)
}
