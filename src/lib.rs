#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

#[path = "../recover/mod.rs"]
pub mod recover;

pub use recover::config::{RecoveryConfig, Scenario};
pub use recover::engine::{MarginRecoveryEngine, MarginalObservations, Recovery, RecoveryError};
