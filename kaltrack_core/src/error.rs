//! Error types for the track fitting engine.

use crate::hit::HitId;
use crate::surface::{DetElementId, LayerId, SurfaceId};
use thiserror::Error;

/// Errors raised by the geometry collaborator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    /// No measurement surface matches the hit's detector element and position
    #[error("No measurement surface for hit {0}")]
    NoSurfaceForHit(HitId),

    /// Layer ID has no surfaces registered
    #[error("Unknown layer: {0}")]
    UnknownLayer(LayerId),

    /// Detector element ID has no surfaces registered
    #[error("Unknown detector element: {0}")]
    UnknownElement(DetElementId),

    /// Surface handle does not belong to this geometry
    #[error("Unknown surface: {0}")]
    UnknownSurface(SurfaceId),
}

/// Errors that can occur while building, fitting or querying a track.
///
/// `SiteDiscarded` and `NoIntersection` are expected outcomes the caller
/// decides on. `Invariant` is a fault: some internal relation was broken and
/// the operation was aborted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    #[error("Bad input: {0}")]
    BadInput(String),

    #[error("Insufficient hits: found {found}, need at least {required}")]
    InsufficientHits { found: usize, required: usize },

    #[error("Track fit not initialised")]
    NotInitialised,

    #[error("Track fit already initialised")]
    AlreadyInitialised,

    #[error("Track fit has already been run")]
    AlreadyFitted,

    #[error("Track fit has no filtered sites")]
    NotFitted,

    #[error("Site discarded: chi2 increment {chi2_increment}")]
    SiteDiscarded { chi2_increment: f64 },

    #[error("No intersection with target surface")]
    NoIntersection,

    #[error("Matrix is singular: {0}")]
    SingularMatrix(&'static str),

    #[error("Geometry error: {0}")]
    Geometry(#[from] GeometryError),

    #[error("Internal invariant violated: {0}")]
    Invariant(String),
}

impl FitError {
    /// Creates a bad-input error.
    pub fn bad_input(msg: impl Into<String>) -> Self {
        Self::BadInput(msg.into())
    }

    /// Creates an invariant-violation fault.
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }
}
