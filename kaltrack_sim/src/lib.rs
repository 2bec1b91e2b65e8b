//! KalTrack simulation harness
//!
//! Generates charged particles in a toy barrel detector, refits their hits
//! with the KalTrack engine and compares the result with the truth.
//!
//! # Core Principle: Reproducibility
//!
//! All randomness is derived from a single 64-bit seed, so a failing run
//! can be replayed exactly.
//!
//! # Usage
//!
//! ```ignore
//! use kaltrack_sim::{refit, BarrelConfig, GunConfig, ParticleGun};
//! use kaltrack_core::FitSystem;
//!
//! let detector = BarrelConfig::default().build();
//! let mut gun = ParticleGun::new(42, GunConfig::default())?;
//! let track = gun.fire(&detector);
//!
//! let system = FitSystem::with_defaults(detector);
//! let result = refit(&system, &track.hits, None)?;
//! ```

mod detector;
mod error;
mod exporter;
mod gun;
mod refit;

pub use detector::{BarrelConfig, BEAM_PIPE_ELEMENT, FIRST_ELEMENT};
pub use error::SimError;
pub use exporter::{HitPosition, Pulls, RunExport, TrackRecord};
pub use gun::{GeneratedTrack, GunConfig, ParticleGun};
pub use refit::{refit, RefitResult};
