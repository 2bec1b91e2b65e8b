//! Fit configuration and the conventions shared by every module.

use serde::{Deserialize, Serialize};

/// Curvature conversion constant for GeV, Tesla and millimetres:
/// `omega [1/mm] = ALPHA * Bz [T] * kappa [1/GeV]`.
pub const ALPHA: f64 = 2.99792458e-4;

/// Charged pion mass in GeV, the default particle hypothesis.
pub const PION_MASS: f64 = 0.13957018;

/// Fields below this magnitude (Tesla) are treated as field-free.
pub const FIELD_EPSILON: f64 = 1e-9;

/// Order in which the candidate hits are filtered, relative to insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FitDirection {
    /// Filter in insertion (time) order, typically from the inside out
    Forward,
    /// Filter against insertion order, typically from the outside in
    Backward,
}

/// Dimension of the internal state vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateDim {
    /// (d_rho, phi0, kappa, dz, tan_lambda)
    Five,
    /// The five helix parameters plus a time offset t0
    Six,
}

impl StateDim {
    pub fn size(self) -> usize {
        match self {
            StateDim::Five => 5,
            StateDim::Six => 6,
        }
    }
}

/// Which crossing to pick when a trajectory meets one or more surfaces.
///
/// Path lengths are signed along the particle momentum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntersectionMode {
    /// Smallest absolute path length, in either direction
    Closest,
    /// Smallest non-negative path length
    Forward,
    /// Non-positive path length closest to zero
    Backward,
}

impl IntersectionMode {
    /// Whether a crossing at path length `s` is acceptable, within `tolerance`.
    pub fn admits(self, s: f64, tolerance: f64) -> bool {
        match self {
            IntersectionMode::Closest => true,
            IntersectionMode::Forward => s >= -tolerance,
            IntersectionMode::Backward => s <= tolerance,
        }
    }

    /// Ordering key among admitted crossings; lower wins.
    pub fn rank(self, s: f64) -> f64 {
        match self {
            IntersectionMode::Closest => s.abs(),
            IntersectionMode::Forward => s,
            IntersectionMode::Backward => -s,
        }
    }

    /// Mode that moves along `s`'s side of the trajectory.
    pub fn towards(s: f64) -> Self {
        if s < 0.0 {
            IntersectionMode::Backward
        } else {
            IntersectionMode::Forward
        }
    }
}

/// Named switches of the fit system, settable at run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FitOption {
    /// Multiple scattering noise in transport
    UseQms,
    /// Energy loss in transport
    UseDedx,
    /// Run the smoother automatically at the end of `fit()`
    UseSmoothing,
}

/// Configuration for the fit system and every track it creates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitConfig {
    /// Admission threshold on the chi2 increment of a hit (default: unbounded)
    pub max_chi2_increment: f64,

    /// Smooth automatically after filtering (default: false)
    pub use_smoothing: bool,

    /// Add multiple scattering noise when crossing material (default: true)
    pub use_multiple_scattering: bool,

    /// Apply mean energy loss when crossing material (default: true)
    pub use_energy_loss: bool,

    /// Particle mass hypothesis in GeV (default: charged pion)
    pub mass: f64,

    /// State vector layout (default: five helix parameters)
    pub state_dim: StateDim,

    /// Diagonal variance of the uninformative seed covariance (default: 1e6)
    pub seed_variance: f64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            max_chi2_increment: f64::INFINITY,
            use_smoothing: false,
            use_multiple_scattering: true,
            use_energy_loss: true,
            mass: PION_MASS,
            state_dim: StateDim::Five,
            seed_variance: 1.0e6,
        }
    }
}

impl FitConfig {
    /// Sets a named option.
    pub fn set_option(&mut self, option: FitOption, on: bool) {
        match option {
            FitOption::UseQms => self.use_multiple_scattering = on,
            FitOption::UseDedx => self.use_energy_loss = on,
            FitOption::UseSmoothing => self.use_smoothing = on,
        }
    }

    /// Reads a named option.
    pub fn option(&self, option: FitOption) -> bool {
        match option {
            FitOption::UseQms => self.use_multiple_scattering,
            FitOption::UseDedx => self.use_energy_loss,
            FitOption::UseSmoothing => self.use_smoothing,
        }
    }
}

/// Map an azimuthal angle into ]-pi, pi].
#[inline]
pub fn to_base_range(phi: f64) -> f64 {
    use std::f64::consts::PI;
    let mut phi = phi % (2.0 * PI);
    if phi <= -PI {
        phi += 2.0 * PI;
    } else if phi > PI {
        phi -= 2.0 * PI;
    }
    phi
}
