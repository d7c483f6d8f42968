use approx::assert_abs_diff_eq;
use marginal::recover::aggregation::AggregationMatrix;
use marginal::recover::cells::{Cell, ProbabilityVector};
use marginal::recover::config::{RecoveryConfig, Scenario};
use marginal::recover::engine::{
    MarginRecoveryEngine, MarginalObservations, RecoveryError, three_way_interaction,
};
use marginal::recover::glm::{IrlsOptions, IrlsStatus, omitted_variable_comparison};
use marginal::recover::maxent::{Infeasibility, OptimizerStatus, family_point};
use marginal::recover::synthetic::AdditiveLogitModel;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const D1: [f64; 4] = [0.6100538, 0.2386123, 0.0899462, 0.0613877];
const D2: [f64; 4] = [0.0517616, 0.7969046, 0.1482384, 0.0030954];

fn worked_example() -> MarginalObservations {
    MarginalObservations::from_tables(D1, D2)
}

fn moderate_model() -> AdditiveLogitModel {
    AdditiveLogitModel {
        intercept: -1.0,
        beta: [1.5, -2.0],
        prevalence: [0.3, 0.8],
    }
}

#[test]
fn worked_example_matches_reference_table() {
    let recovery = MarginRecoveryEngine::default()
        .recover(&worked_example())
        .unwrap();
    let expected = [
        0.05034, 0.00142, 0.55971, 0.23719, 0.08966, 0.05858, 0.00029, 0.00281,
    ];
    for (k, want) in expected.iter().enumerate() {
        assert_abs_diff_eq!(recovery.probabilities.get(k), *want, epsilon = 1e-4);
    }
    assert_eq!(recovery.optimizer_status, OptimizerStatus::Converged);
    assert!(recovery.residual_norm < 1e-6);
    assert_abs_diff_eq!(recovery.probabilities.values().sum(), 1.0, epsilon = 1e-12);
}

#[test]
fn recovered_table_reproduces_every_observed_sum() {
    let obs = worked_example();
    let recovery = MarginRecoveryEngine::default().recover(&obs).unwrap();
    let censored = AggregationMatrix::binary_triple()
        .censor(recovery.probabilities.values())
        .unwrap();
    for k in 0..4 {
        assert_abs_diff_eq!(censored[k], obs.d1[k], epsilon = 1e-6);
        assert_abs_diff_eq!(censored[4 + k], obs.d2[k], epsilon = 1e-6);
    }
    let xx = [0.14, 0.06, 0.56, 0.24];
    for k in 0..4 {
        assert_abs_diff_eq!(censored[8 + k], xx[k], epsilon = 1e-6);
    }
}

#[test]
fn null_direction_is_the_signed_three_way_contrast() {
    let recovery = MarginRecoveryEngine::default()
        .recover(&worked_example())
        .unwrap();
    let ns = recovery.null_direction.unwrap();
    let expected = [1.0, -1.0, -1.0, 1.0, -1.0, 1.0, 1.0, -1.0];
    for (got, want) in ns.iter().zip(expected.iter()) {
        assert_abs_diff_eq!(*got, *want, epsilon = 1e-10);
    }

    let m = AggregationMatrix::binary_triple();
    let image = m.matrix().dot(&ns);
    assert!(image.iter().all(|v| v.abs() < 1e-10));
}

#[test]
fn feasible_interval_is_tight_at_both_ends() {
    let recovery = MarginRecoveryEngine::default()
        .recover(&worked_example())
        .unwrap();
    let ns = recovery.null_direction.unwrap();
    let interval = recovery.interval.unwrap();
    assert!(interval.lower < recovery.z_opt.unwrap());
    assert!(recovery.z_opt.unwrap() < interval.upper);

    for z in [interval.lower, interval.upper] {
        let point = family_point(recovery.particular.view(), ns.view(), z);
        let min = point.iter().copied().fold(f64::INFINITY, f64::min);
        assert_abs_diff_eq!(min, 0.0, epsilon = 1e-12);
    }
}

#[test]
fn selected_table_has_no_three_way_interaction() {
    let recovery = MarginRecoveryEngine::default()
        .recover(&worked_example())
        .unwrap();
    let contrast = three_way_interaction(&recovery.probabilities).unwrap();
    assert_abs_diff_eq!(contrast, 0.0, epsilon = 1e-4);
}

#[test]
fn additive_logit_truth_is_recovered_exactly() {
    let mut rng = StdRng::seed_from_u64(0x4D41_5247);
    let engine = MarginRecoveryEngine::default();
    for _ in 0..50 {
        let model = AdditiveLogitModel {
            intercept: rng.gen_range(-2.0..2.0),
            beta: [rng.gen_range(-3.0..3.0), rng.gen_range(-3.0..3.0)],
            prevalence: [rng.gen_range(0.1..0.9), rng.gen_range(0.1..0.9)],
        };
        let truth = model.joint().unwrap();
        let recovery = engine
            .recover(&MarginalObservations::from_joint(&truth))
            .unwrap();
        let err = recovery.probabilities.max_abs_diff(&truth);
        assert!(err < 1e-6, "model {model:?} recovered with error {err:.3e}");
    }
}

#[test]
fn recovery_is_idempotent() {
    let engine = MarginRecoveryEngine::default();
    let first = engine.recover(&worked_example()).unwrap();
    let again = engine
        .recover(&MarginalObservations::from_joint(&first.probabilities))
        .unwrap();
    assert!(first.probabilities.max_abs_diff(&again.probabilities) < 1e-7);
}

#[test]
fn repeated_calls_give_identical_results() {
    let engine = MarginRecoveryEngine::default();
    let a = engine.recover(&worked_example()).unwrap();
    let b = engine.recover(&worked_example()).unwrap();
    assert_eq!(a.probabilities, b.probabilities);
    assert_eq!(a.z_opt, b.z_opt);
}

#[test]
fn conflicting_prevalence_is_inconsistent() {
    let mut obs = worked_example();
    obs.x1 = [0.5, 0.5];
    let err = MarginRecoveryEngine::default().recover(&obs).unwrap_err();
    match err {
        RecoveryError::InconsistentObservations { residual, tolerance } => {
            assert!(residual > tolerance);
        }
        other => panic!("expected inconsistent observations, got {other:?}"),
    }
}

#[test]
fn margins_too_extreme_for_independence_are_infeasible() {
    // x1 = 1 always carries y = 1, x2 = 1 always carries y = 0, yet both are common.
    let d1 = [0.5, 0.0, 0.0, 0.5];
    let d2 = [0.0, 0.5, 0.5, 0.0];
    let obs = MarginalObservations::from_tables(d1, d2);
    let err = MarginRecoveryEngine::default().recover(&obs).unwrap_err();
    match err {
        RecoveryError::InfeasibleReconstruction(Infeasibility::EmptyInterval { lower, upper }) => {
            assert!(lower > upper);
        }
        other => panic!("expected an empty feasible interval, got {other:?}"),
    }
}

#[test]
fn scenario_file_drives_the_engine() {
    let text = format!(
        "[observations]\nd1 = {:?}\nd2 = {:?}\n\n[recovery]\nz_tolerance = 1e-12\n",
        D1, D2
    );
    let scenario = Scenario::from_toml_str(&text).unwrap();
    assert_ne!(scenario.recovery, RecoveryConfig::default());
    let recovery = MarginRecoveryEngine::new(scenario.recovery)
        .recover(&scenario.observations)
        .unwrap();
    let cell = recovery.probabilities.cell(Cell {
        x1: false,
        x2: true,
        y: false,
    });
    assert_abs_diff_eq!(cell, 0.55971, epsilon = 1e-4);
}

#[test]
fn logistic_fit_on_recovered_table_returns_true_coefficients() {
    let model = moderate_model();
    let truth = model.joint().unwrap();
    let recovery = MarginRecoveryEngine::default()
        .recover(&MarginalObservations::from_joint(&truth))
        .unwrap();

    let report = omitted_variable_comparison(&recovery.probabilities, IrlsOptions::default()).unwrap();
    assert_eq!(report.full.status, IrlsStatus::Converged);
    assert_abs_diff_eq!(report.full.coefficients[0], model.intercept, epsilon = 1e-5);
    assert_abs_diff_eq!(report.full.coefficients[1], model.beta[0], epsilon = 1e-5);
    assert_abs_diff_eq!(report.full.coefficients[2], model.beta[1], epsilon = 1e-5);
}

#[test]
fn omitting_an_independent_variable_attenuates_the_other() {
    let truth: ProbabilityVector = moderate_model().joint().unwrap();
    let report = omitted_variable_comparison(&truth, IrlsOptions::default()).unwrap();
    assert!(report.x1_shift().abs() > 1e-3);
    assert!(report.reduced.coefficients[1].abs() < report.full.coefficients[1].abs());
}
