#![deny(dead_code)]
#![deny(unused_imports)]

pub mod aggregation;
pub mod cells;
pub mod config;
pub mod engine;
pub mod faer_ndarray;
pub mod glm;
pub mod linear;
pub mod maxent;
pub mod report;
pub mod synthetic;
