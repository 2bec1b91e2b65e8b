//! KalTrack Core - Kalman-filter track fitting on a helical track model
//!
//! Estimates the trajectory of a charged particle through a layered detector
//! from a sequence of position measurements:
//! 1. **Site store**: candidate hits and the filtered sites built from them
//! 2. **Fit engine**: three-point or given-state seed, filtering with outlier
//!    rejection, Rauch-Tung-Striebel smoothing
//! 3. **Queries**: propagation and extrapolation to points, layers and
//!    detector elements, crossing search, and the external track-state codec

pub mod config;
pub mod error;
pub mod fit;
pub mod geometry;
pub mod helix;
pub mod hit;
pub mod intersection;
pub mod kalman;
pub mod propagation;
pub mod site;
pub mod surface;
pub mod track_state;

// Re-export key types for convenience
pub use config::{FitConfig, FitDirection, FitOption, IntersectionMode, StateDim};
pub use error::{FitError, GeometryError};
pub use fit::{FilterOutcome, FitState, FitSystem, SiteRef, TrackFit};
pub use geometry::{Detector, Geometry, MaterialEffects};
pub use helix::Helix;
pub use hit::{HitId, TrackerHit};
pub use intersection::Crossing;
pub use surface::{DetElementId, LayerId, Material, Surface, SurfaceId};
pub use track_state::TrackState;
