//! Error types for the simulation harness.

use kaltrack_core::FitError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    /// Smearing distribution could not be built from the configured resolution
    #[error("Invalid smearing distribution: {0}")]
    Distribution(#[from] rand_distr::NormalError),

    #[error("Fit failed: {0}")]
    Fit(#[from] FitError),

    #[error("Export I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Export serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
