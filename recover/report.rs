//! Tab-separated output for recovered tables and fitted coefficients.

use crate::recover::cells::Cell;
use crate::recover::engine::Recovery;
use crate::recover::glm::OmittedVariableReport;
use csv::WriterBuilder;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to write report: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to write tab-separated row: {0}")]
    Csv(#[from] csv::Error),
}

/// One row per cell: `x1  x2  y  particular  probability`.
pub fn write_cells_tsv(path: &Path, recovery: &Recovery) -> Result<(), ReportError> {
    let mut writer = WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    writer.write_record(["x1", "x2", "y", "particular", "probability"])?;
    for cell in Cell::all() {
        let k = cell.index();
        writer.write_record([
            u8::from(cell.x1).to_string(),
            u8::from(cell.x2).to_string(),
            u8::from(cell.y).to_string(),
            format!("{:.10}", recovery.particular[k]),
            format!("{:.10}", recovery.probabilities.get(k)),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Coefficients of the full and reduced outcome models side by side.
///
/// The reduced model has no `x2` term; that entry is written as `NA`.
pub fn write_coefficients_tsv(path: &Path, report: &OmittedVariableReport) -> Result<(), ReportError> {
    let mut writer = WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    writer.write_record(["term", "full", "reduced"])?;
    for (i, term) in ["intercept", "x1", "x2"].into_iter().enumerate() {
        let full = report
            .full
            .coefficients
            .get(i)
            .map_or_else(|| "NA".to_string(), |b| format!("{b:.10}"));
        let reduced = report
            .reduced
            .coefficients
            .get(i)
            .map_or_else(|| "NA".to_string(), |b| format!("{b:.10}"));
        writer.write_record([term.to_string(), full, reduced])?;
    }
    writer.write_record([
        "deviance".to_string(),
        format!("{:.10}", report.full.deviance),
        format!("{:.10}", report.reduced.deviance),
    ])?;
    writer.flush()?;
    Ok(())
}
