#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use itertools::iproduct;
use rayon::prelude::*;
use serde::Serialize;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process;

use marginal::recover::cells::{Cell, ProbabilityVector};
use marginal::recover::config::{RecoveryConfig, Scenario};
use marginal::recover::engine::{
    MarginRecoveryEngine, MarginalObservations, Recovery, three_way_interaction,
};
use marginal::recover::glm::{IrlsOptions, OmittedVariableReport, omitted_variable_comparison};
use marginal::recover::maxent::{FeasibleInterval, OptimizerStatus};
use marginal::recover::report::{write_cells_tsv, write_coefficients_tsv};
use marginal::recover::synthetic::AdditiveLogitModel;

#[derive(Parser)]
#[command(
    name = "marginal",
    about = "Recover a joint (x1, x2, y) table from two experimenters' partial margins",
    long_about = "Each experimenter observed one explanatory variable together with the \
                 outcome. Assuming the explanatory variables are independent, the joint table \
                 is reconstructed as the maximum-entropy distribution consistent with both."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconstruct the joint table described by a scenario file
    #[command(about = "Recover a joint table from a TOML scenario file")]
    Recover(RecoverArgs),
    /// Generate margins from an additive logit model and recover them
    #[command(about = "Round-trip a synthetic additive logit model")]
    Simulate(SimulateArgs),
    /// Round-trip a grid of synthetic models and report the worst error
    #[command(about = "Sweep a grid of effect sizes in parallel")]
    Sweep(SweepArgs),
}

#[derive(Args)]
struct RecoverArgs {
    /// Path to a scenario TOML file with an [observations] table
    scenario: PathBuf,

    /// Write the recovered cells to this TSV file
    #[arg(long)]
    out: Option<PathBuf>,

    /// Write full and reduced logistic coefficients to this TSV file
    #[arg(long)]
    coefficients: Option<PathBuf>,

    /// Print a JSON summary instead of the text table
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct ModelArgs {
    /// Intercept of the true outcome model
    #[arg(long, default_value = "-1.0", allow_hyphen_values = true)]
    intercept: f64,

    /// Coefficient of x1 in the true outcome model
    #[arg(long, default_value = "1.5", allow_hyphen_values = true)]
    beta1: f64,

    /// Coefficient of x2 in the true outcome model
    #[arg(long, default_value = "-2.0", allow_hyphen_values = true)]
    beta2: f64,

    /// P(x1 = 1)
    #[arg(long, default_value = "0.3")]
    p_x1: f64,

    /// P(x2 = 1)
    #[arg(long, default_value = "0.8")]
    p_x2: f64,
}

#[derive(Args)]
struct SimulateArgs {
    #[command(flatten)]
    model: ModelArgs,

    /// Write the recovered cells to this TSV file
    #[arg(long)]
    out: Option<PathBuf>,

    /// Print a JSON summary instead of the text table
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct SweepArgs {
    /// Grid points per coefficient axis
    #[arg(long, default_value = "21")]
    steps: usize,

    /// Coefficients range over [-beta_max, beta_max]
    #[arg(long, default_value = "3.0")]
    beta_max: f64,

    /// Grid points per prevalence axis, spread over [0.1, 0.9]
    #[arg(long, default_value = "5")]
    prevalence_steps: usize,

    /// Intercept shared by every grid point
    #[arg(long, default_value = "-1.0", allow_hyphen_values = true)]
    intercept: f64,

    /// Write one row per grid point to this TSV file
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Serialize)]
struct RecoverySummary<'a> {
    observations: &'a MarginalObservations,
    probabilities: &'a ProbabilityVector,
    z_opt: Option<f64>,
    interval: Option<FeasibleInterval>,
    residual_norm: f64,
    entropy_bits: f64,
    optimizer_status: OptimizerStatus,
    iterations: usize,
    three_way_interaction: Option<f64>,
    omitted_variable: &'a OmittedVariableReport,
}

impl<'a> RecoverySummary<'a> {
    fn new(
        observations: &'a MarginalObservations,
        recovery: &'a Recovery,
        omitted_variable: &'a OmittedVariableReport,
    ) -> Self {
        Self {
            observations,
            probabilities: &recovery.probabilities,
            z_opt: recovery.z_opt,
            interval: recovery.interval,
            residual_norm: recovery.residual_norm,
            entropy_bits: recovery.entropy_bits,
            optimizer_status: recovery.optimizer_status,
            iterations: recovery.iterations,
            three_way_interaction: three_way_interaction(&recovery.probabilities),
            omitted_variable,
        }
    }
}

fn print_recovery(recovery: &Recovery, truth: Option<&ProbabilityVector>) {
    println!("Least-squares residual norm: {:.3e}", recovery.residual_norm);
    match (recovery.interval, recovery.z_opt) {
        (Some(interval), Some(z)) => {
            println!(
                "Feasible z interval: [{:.6}, {:.6}]",
                interval.lower, interval.upper
            );
            println!(
                "Selected z: {:.8} ({:?}, {} evaluations)",
                z, recovery.optimizer_status, recovery.iterations
            );
        }
        _ => println!("Null space is trivial; the table is determined uniquely."),
    }
    println!("Entropy: {:.6} bits", recovery.entropy_bits);
    match three_way_interaction(&recovery.probabilities) {
        Some(contrast) => println!("Three-way interaction: {contrast:.3e}"),
        None => println!("Three-way interaction: undefined (the table has an empty cell)"),
    }
    println!();

    match truth {
        Some(truth) => {
            println!("cell        recovered     truth");
            for cell in Cell::all() {
                println!(
                    "{cell}   {:>12.8}  {:>12.8}",
                    recovery.probabilities.cell(cell),
                    truth.cell(cell)
                );
            }
            println!(
                "\nMaximum absolute error: {:.3e}",
                recovery.probabilities.max_abs_diff(truth)
            );
        }
        None => {
            println!("cell        recovered");
            for cell in Cell::all() {
                println!("{cell}   {:>12.8}", recovery.probabilities.cell(cell));
            }
        }
    }
}

fn print_omitted_variable(report: &OmittedVariableReport) {
    let full = &report.full.coefficients;
    let reduced = &report.reduced.coefficients;
    println!("\nLogistic regression on the recovered table:");
    println!(
        "  y ~ x1 + x2: intercept {:.6}, x1 {:.6}, x2 {:.6} ({:?})",
        full[0], full[1], full[2], report.full.status
    );
    println!(
        "  y ~ x1:      intercept {:.6}, x1 {:.6} ({:?})",
        reduced[0], reduced[1], report.reduced.status
    );
    println!(
        "  Omitting x2 shifts the x1 coefficient by {:.6}",
        report.x1_shift()
    );
}

fn run_recover(args: RecoverArgs) -> Result<(), Box<dyn std::error::Error>> {
    let scenario = Scenario::load(&args.scenario)?;
    log::info!("Loaded scenario from {}", args.scenario.display());

    let engine = MarginRecoveryEngine::new(scenario.recovery.clone());
    let recovery = engine.recover(&scenario.observations)?;
    let omitted = omitted_variable_comparison(&recovery.probabilities, IrlsOptions::default())?;

    if args.json {
        let summary = RecoverySummary::new(&scenario.observations, &recovery, &omitted);
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_recovery(&recovery, None);
        print_omitted_variable(&omitted);
    }

    if let Some(path) = &args.out {
        write_cells_tsv(path, &recovery)?;
        println!("Recovered cells written to: {}", path.display());
    }
    if let Some(path) = &args.coefficients {
        write_coefficients_tsv(path, &omitted)?;
        println!("Coefficients written to: {}", path.display());
    }
    Ok(())
}

fn model_from_args(args: &ModelArgs) -> AdditiveLogitModel {
    AdditiveLogitModel {
        intercept: args.intercept,
        beta: [args.beta1, args.beta2],
        prevalence: [args.p_x1, args.p_x2],
    }
}

fn run_simulate(args: SimulateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let model = model_from_args(&args.model);
    let truth = model.joint()?;
    let observations = MarginalObservations::from_joint(&truth);

    let engine = MarginRecoveryEngine::default();
    let recovery = engine.recover(&observations)?;
    let omitted = omitted_variable_comparison(&recovery.probabilities, IrlsOptions::default())?;

    if args.json {
        let summary = RecoverySummary::new(&observations, &recovery, &omitted);
        println!("{}", serde_json::to_string_pretty(&summary)?);
        if let Some(path) = &args.out {
            write_cells_tsv(path, &recovery)?;
        }
        return Ok(());
    }

    println!(
        "True model: logit P(y) = {:.4} + {:.4}·x1 + {:.4}·x2, P(x1)={:.3}, P(x2)={:.3}",
        model.intercept, model.beta[0], model.beta[1], model.prevalence[0], model.prevalence[1]
    );
    print_recovery(&recovery, Some(&truth));
    print_omitted_variable(&omitted);

    if let Some(path) = &args.out {
        write_cells_tsv(path, &recovery)?;
        println!("Recovered cells written to: {}", path.display());
    }
    Ok(())
}

#[derive(Debug)]
struct SweepRow {
    model: AdditiveLogitModel,
    max_abs_error: Option<f64>,
    error: Option<String>,
}

fn create_progress_bar(len: u64, message: &str) -> ProgressBar {
    let draw_target = if std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };

    let pb = ProgressBar::with_draw_target(Some(len), draw_target);
    if let Ok(style) = ProgressStyle::with_template(
        "> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    ) {
        pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
    }
    pb.set_message(message.to_string());
    pb
}

fn sweep_point(engine: &MarginRecoveryEngine, model: AdditiveLogitModel) -> SweepRow {
    let outcome = model
        .joint()
        .map_err(|e| e.to_string())
        .and_then(|truth| {
            let observations = MarginalObservations::from_joint(&truth);
            engine
                .recover(&observations)
                .map(|recovery| recovery.probabilities.max_abs_diff(&truth))
                .map_err(|e| e.to_string())
        });
    let (max_abs_error, error) = match outcome {
        Ok(err) => (Some(err), None),
        Err(e) => (None, Some(e)),
    };
    SweepRow {
        model,
        max_abs_error,
        error,
    }
}

fn linspace(start: f64, end: f64, steps: usize) -> Vec<f64> {
    (0..steps)
        .map(|i| start + (end - start) * i as f64 / (steps - 1) as f64)
        .collect()
}

fn run_sweep(args: SweepArgs) -> Result<(), Box<dyn std::error::Error>> {
    if args.steps < 2 || args.prevalence_steps < 2 {
        return Err("--steps and --prevalence-steps must be at least 2".into());
    }
    let betas = linspace(-args.beta_max, args.beta_max, args.steps);
    let prevalences = linspace(0.1, 0.9, args.prevalence_steps);
    let grid: Vec<AdditiveLogitModel> = iproduct!(
        betas.iter().copied(),
        betas.iter().copied(),
        prevalences.iter().copied(),
        prevalences.iter().copied()
    )
    .map(|(beta1, beta2, p_x1, p_x2)| AdditiveLogitModel {
        intercept: args.intercept,
        beta: [beta1, beta2],
        prevalence: [p_x1, p_x2],
    })
    .collect();

    let engine = MarginRecoveryEngine::new(RecoveryConfig::default());
    let pb = create_progress_bar(grid.len() as u64, "Recovering synthetic tables");

    let rows: Vec<SweepRow> = grid
        .par_iter()
        .map(|&model| {
            let row = sweep_point(&engine, model);
            pb.inc(1);
            row
        })
        .collect();
    pb.finish_and_clear();

    let failures = rows.iter().filter(|r| r.error.is_some()).count();
    let worst = rows
        .iter()
        .filter_map(|r| r.max_abs_error.map(|e| (e, r)))
        .max_by(|a, b| a.0.total_cmp(&b.0));

    println!("Grid points: {}", rows.len());
    println!("Failures: {failures}");
    if let Some((err, row)) = worst {
        println!(
            "Worst maximum absolute error: {:.3e} at beta = [{:.3}, {:.3}], P(x=1) = [{:.3}, {:.3}]",
            err, row.model.beta[0], row.model.beta[1], row.model.prevalence[0], row.model.prevalence[1]
        );
    }
    for row in rows.iter().filter(|r| r.error.is_some()).take(5) {
        log::warn!(
            "beta = {:?}, P(x=1) = {:?}: {}",
            row.model.beta,
            row.model.prevalence,
            row.error.as_deref().unwrap_or_default()
        );
    }

    if let Some(path) = &args.out {
        let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;
        writer.write_record(["beta1", "beta2", "p_x1", "p_x2", "max_abs_error", "error"])?;
        for row in &rows {
            writer.write_record([
                row.model.beta[0].to_string(),
                row.model.beta[1].to_string(),
                row.model.prevalence[0].to_string(),
                row.model.prevalence[1].to_string(),
                row.max_abs_error
                    .map_or_else(|| "NA".to_string(), |e| format!("{e:.6e}")),
                row.error.clone().unwrap_or_default(),
            ])?;
        }
        writer.flush()?;
        println!("Sweep written to: {}", path.display());
    }
    Ok(())
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    let Cli { command } = cli;

    let result = match command {
        Some(Commands::Recover(args)) => run_recover(args),
        Some(Commands::Simulate(args)) => run_simulate(args),
        Some(Commands::Sweep(args)) => run_sweep(args),
        None => Cli::command()
            .print_help()
            .map(|()| println!())
            .map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
