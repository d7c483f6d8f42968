use crate::recover::cells::{CellLayout, X1, X2, Y};
use ndarray::{Array1, Array2, ArrayView1};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AggregationError {
    #[error("Margin #{margin} refers to variable {variable}, but the layout only has {n_variables}.")]
    UnknownVariable {
        margin: usize,
        variable: usize,
        n_variables: usize,
    },
    #[error("Margin #{margin} lists variable {variable} more than once.")]
    RepeatedVariable { margin: usize, variable: usize },
    #[error("Expected a vector of {expected} cells, found {found}.")]
    WrongLength { expected: usize, found: usize },
}

/// An observable marginal table: the listed variables, first one varying fastest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarginSpec {
    pub variables: Vec<usize>,
}

impl MarginSpec {
    pub fn new(variables: &[usize]) -> Self {
        Self {
            variables: variables.to_vec(),
        }
    }

    pub fn n_rows(&self) -> usize {
        1 << self.variables.len()
    }
}

/// The censoring map from a full joint table to the marginals an observer sees.
///
/// Row `r` of a margin's block is the indicator of all cells whose values on
/// the margin's variables equal the bits of `r` (first listed variable in bit 0).
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationMatrix {
    layout: CellLayout,
    margins: Vec<MarginSpec>,
    matrix: Array2<f64>,
}

impl AggregationMatrix {
    pub fn from_margins(
        layout: CellLayout,
        margins: Vec<MarginSpec>,
    ) -> Result<Self, AggregationError> {
        for (margin_idx, margin) in margins.iter().enumerate() {
            for (pos, &variable) in margin.variables.iter().enumerate() {
                if variable >= layout.n_variables {
                    return Err(AggregationError::UnknownVariable {
                        margin: margin_idx,
                        variable,
                        n_variables: layout.n_variables,
                    });
                }
                if margin.variables[..pos].contains(&variable) {
                    return Err(AggregationError::RepeatedVariable {
                        margin: margin_idx,
                        variable,
                    });
                }
            }
        }

        let n_rows: usize = margins.iter().map(MarginSpec::n_rows).sum();
        let mut matrix = Array2::zeros((n_rows, layout.n_cells()));
        let mut row_offset = 0;
        for margin in &margins {
            for cell in 0..layout.n_cells() {
                let row = margin
                    .variables
                    .iter()
                    .enumerate()
                    .fold(0, |acc, (bit, &var)| acc | (layout.value(cell, var) << bit));
                matrix[[row_offset + row, cell]] = 1.0;
            }
            row_offset += margin.n_rows();
        }

        Ok(Self {
            layout,
            margins,
            matrix,
        })
    }

    /// The 12×8 matrix for two explanatory variables and an outcome:
    /// `(x1, y)` rows, then `(x2, y)` rows, then `(x1, x2)` rows.
    pub fn binary_triple() -> Self {
        let margins = vec![
            MarginSpec::new(&[X1, Y]),
            MarginSpec::new(&[X2, Y]),
            MarginSpec::new(&[X1, X2]),
        ];
        match Self::from_margins(CellLayout::binary_triple(), margins) {
            Ok(m) => m,
            Err(e) => unreachable!("standard margins are valid: {e}"),
        }
    }

    pub fn layout(&self) -> CellLayout {
        self.layout
    }

    pub fn margins(&self) -> &[MarginSpec] {
        &self.margins
    }

    pub fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }

    pub fn n_rows(&self) -> usize {
        self.matrix.nrows()
    }

    /// Applies the map: the marginal sums an observer of `joint` would record.
    pub fn censor(&self, joint: ArrayView1<f64>) -> Result<Array1<f64>, AggregationError> {
        if joint.len() != self.layout.n_cells() {
            return Err(AggregationError::WrongLength {
                expected: self.layout.n_cells(),
                found: joint.len(),
            });
        }
        Ok(self.matrix.dot(&joint))
    }
}
