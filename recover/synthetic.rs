use crate::recover::cells::{CellLayout, ProbabilityError, ProbabilityVector};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// An additive logit outcome model over two independent binary explanatory variables.
///
/// `P(x1, x2, y) = P(x1) · P(x2) · σ(η)^y · (1 − σ(η))^(1−y)` with
/// `η = intercept + β1·x1 + β2·x2` and `prevalence[i] = P(x_i = 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdditiveLogitModel {
    pub intercept: f64,
    pub beta: [f64; 2],
    pub prevalence: [f64; 2],
}

impl AdditiveLogitModel {
    pub fn log_odds(&self, x1: bool, x2: bool) -> f64 {
        self.intercept + self.beta[0] * f64::from(u8::from(x1)) + self.beta[1] * f64::from(u8::from(x2))
    }

    /// The full joint table in the crate's cell order.
    pub fn joint(&self) -> Result<ProbabilityVector, ProbabilityError> {
        let layout = CellLayout::binary_triple();
        let raw = Array1::from_shape_fn(layout.n_cells(), |k| {
            let x1 = k & 1 == 1;
            let x2 = (k >> 1) & 1 == 1;
            let y = (k >> 2) & 1 == 1;
            let px1 = if x1 { self.prevalence[0] } else { 1.0 - self.prevalence[0] };
            let px2 = if x2 { self.prevalence[1] } else { 1.0 - self.prevalence[1] };
            let eta = self.log_odds(x1, x2);
            // ln σ(η) and ln(1 − σ(η)) computed without cancellation.
            let log_py = if y {
                -softplus(-eta)
            } else {
                -softplus(eta)
            };
            px1 * px2 * log_py.exp()
        });
        ProbabilityVector::new(layout, raw.view(), 0.0)
    }
}

/// `ln(1 + e^x)` without overflow.
fn softplus(x: f64) -> f64 {
    if x > 0.0 {
        x + (-x).exp().ln_1p()
    } else {
        x.exp().ln_1p()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recover::cells::Cell;
    use approx::assert_abs_diff_eq;

    #[test]
    fn joint_has_requested_prevalences_and_conditional_odds() {
        let model = AdditiveLogitModel {
            intercept: -1.0,
            beta: [2.0, 0.5],
            prevalence: [0.3, 0.6],
        };
        let joint = model.joint().unwrap();

        let px1: f64 = Cell::all().filter(|c| c.x1).map(|c| joint.cell(c)).sum();
        let px2: f64 = Cell::all().filter(|c| c.x2).map(|c| joint.cell(c)).sum();
        assert_abs_diff_eq!(px1, 0.3, epsilon = 1e-14);
        assert_abs_diff_eq!(px2, 0.6, epsilon = 1e-14);

        let yes = joint.cell(Cell { x1: true, x2: false, y: true });
        let no = joint.cell(Cell { x1: true, x2: false, y: false });
        assert_abs_diff_eq!((yes / no).ln(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn softplus_is_stable_at_extremes() {
        assert_abs_diff_eq!(softplus(800.0), 800.0, epsilon = 1e-12);
        assert!(softplus(-800.0) >= 0.0 && softplus(-800.0) < 1e-300);
        assert_abs_diff_eq!(softplus(0.0), 2.0_f64.ln(), epsilon = 1e-15);
    }
}
