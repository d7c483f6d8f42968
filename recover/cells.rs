//! # Cell Enumeration and Probability Vectors
//!
//! A joint distribution over `n` binary variables is stored as a vector of
//! `2^n` cells. The enumeration rule is fixed for the whole crate: bit `i` of
//! a cell index is the value of variable `i`, so the first variable varies
//! fastest and the last (the outcome) slowest. For the standard
//! `(x1, x2, y)` triple this gives
//!
//! | index | 0 | 1 | 2 | 3 | 4 | 5 | 6 | 7 |
//! |-------|---|---|---|---|---|---|---|---|
//! | x1    | 0 | 1 | 0 | 1 | 0 | 1 | 0 | 1 |
//! | x2    | 0 | 0 | 1 | 1 | 0 | 0 | 1 | 1 |
//! | y     | 0 | 0 | 0 | 0 | 1 | 1 | 1 | 1 |
//!
//! The aggregation matrix and every probability vector must agree on this rule.

use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Index of the first explanatory variable in the standard layout.
pub const X1: usize = 0;
/// Index of the second explanatory variable in the standard layout.
pub const X2: usize = 1;
/// Index of the outcome in the standard layout.
pub const Y: usize = 2;

/// Describes a joint table over `n_variables` binary variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellLayout {
    pub n_variables: usize,
}

impl CellLayout {
    /// Two explanatory variables and one outcome.
    pub const fn binary_triple() -> Self {
        Self { n_variables: 3 }
    }

    pub fn n_cells(&self) -> usize {
        1 << self.n_variables
    }

    /// The last variable is the outcome.
    pub fn outcome(&self) -> usize {
        self.n_variables - 1
    }

    /// Value (0 or 1) of `variable` in cell `index`.
    #[inline]
    pub fn value(&self, index: usize, variable: usize) -> usize {
        (index >> variable) & 1
    }
}

/// One atomic outcome of the standard `(x1, x2, y)` triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cell {
    pub x1: bool,
    pub x2: bool,
    pub y: bool,
}

impl Cell {
    pub fn index(&self) -> usize {
        usize::from(self.x1) | (usize::from(self.x2) << 1) | (usize::from(self.y) << 2)
    }

    /// `None` for indices outside the eight cells of a binary triple.
    pub fn from_index(index: usize) -> Option<Self> {
        (index < 8).then(|| Self {
            x1: index & 1 == 1,
            x2: (index >> 1) & 1 == 1,
            y: (index >> 2) & 1 == 1,
        })
    }

    pub fn all() -> impl Iterator<Item = Cell> {
        (0..8).filter_map(Cell::from_index)
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let y = if self.y { 'T' } else { 'F' };
        write!(f, "({},{},{})", u8::from(self.x1), u8::from(self.x2), y)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProbabilityError {
    #[error("Probability vector has {found} entries, but the layout has {expected} cells.")]
    WrongLength { found: usize, expected: usize },
    #[error("Cell {index} is {value:.6e}, below the allowed tolerance of -{tolerance:.1e}.")]
    NegativeEntry {
        index: usize,
        value: f64,
        tolerance: f64,
    },
    #[error("Probability vector contains a non-finite entry at cell {0}.")]
    NonFinite(usize),
    #[error("Probability vector sums to {0:.6e}; cannot normalize.")]
    ZeroMass(f64),
}

/// A normalized joint distribution over the cells of a [`CellLayout`].
///
/// Entries are non-negative and sum to one. Construction clamps negatives
/// within `tolerance` to zero and rejects anything more negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbabilityVector {
    layout: CellLayout,
    values: Array1<f64>,
}

impl ProbabilityVector {
    pub fn new(
        layout: CellLayout,
        raw: ArrayView1<f64>,
        tolerance: f64,
    ) -> Result<Self, ProbabilityError> {
        if raw.len() != layout.n_cells() {
            return Err(ProbabilityError::WrongLength {
                found: raw.len(),
                expected: layout.n_cells(),
            });
        }
        let mut values = raw.to_owned();
        for (index, value) in values.iter_mut().enumerate() {
            if !value.is_finite() {
                return Err(ProbabilityError::NonFinite(index));
            }
            if *value < -tolerance {
                return Err(ProbabilityError::NegativeEntry {
                    index,
                    value: *value,
                    tolerance,
                });
            }
            if *value < 0.0 {
                *value = 0.0;
            }
        }
        let total = values.sum();
        if total <= 0.0 {
            return Err(ProbabilityError::ZeroMass(total));
        }
        values /= total;
        Ok(Self { layout, values })
    }

    pub fn layout(&self) -> CellLayout {
        self.layout
    }

    pub fn values(&self) -> ArrayView1<'_, f64> {
        self.values.view()
    }

    pub fn get(&self, index: usize) -> f64 {
        self.values[index]
    }

    pub fn cell(&self, cell: Cell) -> f64 {
        self.values[cell.index()]
    }

    /// Shannon entropy in bits.
    pub fn entropy_bits(&self) -> f64 {
        entropy_bits(self.values.view())
    }

    /// Largest absolute difference to another vector over the same layout.
    pub fn max_abs_diff(&self, other: &ProbabilityVector) -> f64 {
        self.values
            .iter()
            .zip(other.values.iter())
            .fold(0.0_f64, |acc, (a, b)| acc.max((a - b).abs()))
    }
}

/// Entropy in bits of `v / sum(v)`, summing only strictly positive entries.
///
/// Entries at or below zero contribute nothing rather than a penalty; the
/// search that calls this never leaves the non-negative region by more than
/// rounding error.
pub fn entropy_bits(v: ArrayView1<f64>) -> f64 {
    let total: f64 = v.iter().filter(|&&p| p > 0.0).sum();
    if total <= 0.0 {
        return 0.0;
    }
    -v.iter()
        .filter(|&&p| p > 0.0)
        .map(|&p| {
            let q = p / total;
            q * q.log2()
        })
        .sum::<f64>()
}
