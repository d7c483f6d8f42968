//! # Tolerances and Scenario Files
//!
//! A scenario is a small TOML document describing what the experimenters
//! observed, optionally with a `[recovery]` table overriding tolerances:
//!
//! ```toml
//! [observations]
//! d1 = [0.6100538, 0.2386123, 0.0899462, 0.0613877]
//! d2 = [0.0517616, 0.7969046, 0.1482384, 0.0030954]
//! x1 = [0.7, 0.3]   # optional, summed out of d1 when absent
//!
//! [recovery]
//! consistency_tolerance = 1e-6
//! ```

use crate::recover::engine::MarginalObservations;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read scenario file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML scenario file: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to serialize scenario to TOML format: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Field '{field}' must have {expected} entries, but {found} were given.")]
    WrongLength {
        field: &'static str,
        expected: usize,
        found: usize,
    },
}

/// Numerical knobs of the recovery pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Largest least-squares residual norm still treated as consistent.
    pub consistency_tolerance: f64,
    /// Relative threshold below which a singular value or pivot counts as zero.
    pub rank_tolerance: f64,
    /// How far below zero a cell may sit before it is an error rather than rounding.
    pub negativity_tolerance: f64,
    /// Absolute tolerance on the null-space coordinate `z`.
    pub z_tolerance: f64,
    /// Cap on objective evaluations in the entropy search.
    pub max_iterations: usize,
    /// Turn a capped entropy search into an error instead of a flagged result.
    pub require_convergence: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            consistency_tolerance: 1e-6,
            rank_tolerance: 1e-10,
            negativity_tolerance: 1e-9,
            z_tolerance: 1e-10,
            max_iterations: 500,
            require_convergence: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ObservationsToml {
    d1: Vec<f64>,
    d2: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    x1: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    x2: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ScenarioToml {
    observations: ObservationsToml,
    #[serde(default)]
    recovery: RecoveryConfig,
}

/// Observations plus the tolerances to recover them with.
#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    pub observations: MarginalObservations,
    pub recovery: RecoveryConfig,
}

fn fixed<const N: usize>(field: &'static str, values: &[f64]) -> Result<[f64; N], ConfigError> {
    values.try_into().map_err(|_| ConfigError::WrongLength {
        field,
        expected: N,
        found: values.len(),
    })
}

impl Scenario {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let raw: ScenarioToml = toml::from_str(text)?;
        let d1 = fixed::<4>("d1", &raw.observations.d1)?;
        let d2 = fixed::<4>("d2", &raw.observations.d2)?;
        let mut observations = MarginalObservations::from_tables(d1, d2);
        if let Some(x1) = &raw.observations.x1 {
            observations.x1 = fixed::<2>("x1", x1)?;
        }
        if let Some(x2) = &raw.observations.x2 {
            observations.x2 = fixed::<2>("x2", x2)?;
        }
        Ok(Self {
            observations,
            recovery: raw.recovery,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Renders the scenario with explicit prevalences so it reloads identically.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        let raw = ScenarioToml {
            observations: ObservationsToml {
                d1: self.observations.d1.to_vec(),
                d2: self.observations.d2.to_vec(),
                x1: Some(self.observations.x1.to_vec()),
                x2: Some(self.observations.x2.to_vec()),
            },
            recovery: self.recovery.clone(),
        };
        Ok(toml::to_string_pretty(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const WORKED: &str = r#"
[observations]
d1 = [0.6100538, 0.2386123, 0.0899462, 0.0613877]
d2 = [0.0517616, 0.7969046, 0.1482384, 0.0030954]
"#;

    #[test]
    fn missing_prevalences_are_derived_and_defaults_apply() {
        let scenario = Scenario::from_toml_str(WORKED).unwrap();
        assert!((scenario.observations.x1[0] - 0.7).abs() < 1e-12);
        assert!((scenario.observations.x2[1] - 0.8).abs() < 1e-12);
        assert_eq!(scenario.recovery, RecoveryConfig::default());
    }

    #[test]
    fn recovery_table_overrides_only_named_fields() {
        let text = format!("{WORKED}\n[recovery]\nmax_iterations = 40\nrequire_convergence = true\n");
        let scenario = Scenario::from_toml_str(&text).unwrap();
        assert_eq!(scenario.recovery.max_iterations, 40);
        assert!(scenario.recovery.require_convergence);
        assert_eq!(scenario.recovery.consistency_tolerance, 1e-6);
    }

    #[test]
    fn explicit_prevalences_win() {
        let text = format!("{WORKED}x1 = [0.5, 0.5]\n");
        let scenario = Scenario::from_toml_str(&text).unwrap();
        assert_eq!(scenario.observations.x1, [0.5, 0.5]);
    }

    #[test]
    fn wrong_length_is_reported_with_field_name() {
        let text = "[observations]\nd1 = [0.5, 0.5]\nd2 = [0.25, 0.25, 0.25, 0.25]\n";
        let err = Scenario::from_toml_str(text).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::WrongLength {
                field: "d1",
                expected: 4,
                found: 2
            }
        ));
    }

    #[test]
    fn scenario_file_survives_save_and_load() {
        let scenario = Scenario::from_toml_str(WORKED).unwrap();
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(scenario.to_toml_string().unwrap().as_bytes())
            .unwrap();
        let reloaded = Scenario::load(file.path()).unwrap();
        assert_eq!(reloaded, scenario);
    }
}
