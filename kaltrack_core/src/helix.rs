//! Helical track model
//!
//! A charged particle in a uniform field along z follows a helix. It is
//! described by five parameters relative to a pivot point:
//!
//! | index | name         | meaning                                              |
//! |-------|--------------|------------------------------------------------------|
//! | 0     | `d_rho`      | signed transverse distance from pivot to the helix   |
//! | 1     | `phi0`       | azimuth of the pivot-to-helix vector                 |
//! | 2     | `kappa`      | charge over transverse momentum (1/GeV)              |
//! | 3     | `dz`         | longitudinal distance from pivot to the helix        |
//! | 4     | `tan_lambda` | dip angle slope, dz/ds                               |
//!
//! The path parameter `s` is the signed transverse arc length along the
//! momentum. The azimuth advances as `phi(s) = phi0 - omega * s`, with the
//! geometric curvature `omega = kappa * ALPHA * bz`. Field-free helices are
//! straight lines and carry the geometric curvature in `kappa` directly.

use crate::config::{to_base_range, ALPHA, FIELD_EPSILON};
use crate::error::FitError;
use nalgebra::{DMatrix, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Number of geometric helix parameters.
pub const N_HELIX_PARAMS: usize = 5;

/// Index of the azimuth in the parameter vector.
pub const PHI_INDEX: usize = 1;

/// Index of the curvature in the parameter vector.
pub const KAPPA_INDEX: usize = 2;

/// Geometric curvatures below this (1/mm) are treated as straight lines.
pub const OMEGA_EPSILON: f64 = 1e-12;

/// Minimum transverse separation (mm) of seed points.
const MIN_SEED_SEPARATION: f64 = 1e-9;

/// Converts `kappa` into geometric curvature for a given field.
///
/// Returns `ALPHA * bz` in a field, and 1 when field-free so that `kappa`
/// is the geometric curvature itself.
#[inline]
pub fn curvature_factor(bz: f64) -> f64 {
    if bz.abs() > FIELD_EPSILON {
        ALPHA * bz
    } else {
        1.0
    }
}

/// sin(u)/u, stable at small u
#[inline]
fn sinc(u: f64) -> f64 {
    if u.abs() < 1e-4 {
        1.0 - u * u / 6.0
    } else {
        u.sin() / u
    }
}

#[inline]
fn radial(phi: f64) -> Vector2<f64> {
    Vector2::new(phi.cos(), phi.sin())
}

/// A helix relative to a pivot point in a uniform field `bz` (Tesla).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Helix {
    pub d_rho: f64,
    pub phi0: f64,
    pub kappa: f64,
    pub dz: f64,
    pub tan_lambda: f64,
    pub pivot: Vector3<f64>,
    pub bz: f64,
}

impl Helix {
    pub fn new(params: [f64; N_HELIX_PARAMS], pivot: Vector3<f64>, bz: f64) -> Self {
        Self {
            d_rho: params[0],
            phi0: to_base_range(params[1]),
            kappa: params[2],
            dz: params[3],
            tan_lambda: params[4],
            pivot,
            bz,
        }
    }

    pub fn params(&self) -> [f64; N_HELIX_PARAMS] {
        [self.d_rho, self.phi0, self.kappa, self.dz, self.tan_lambda]
    }

    /// Same pivot and field, new parameters.
    pub fn with_params(&self, params: [f64; N_HELIX_PARAMS]) -> Self {
        Self::new(params, self.pivot, self.bz)
    }

    pub fn has_field(&self) -> bool {
        self.bz.abs() > FIELD_EPSILON
    }

    /// Geometric curvature in 1/mm. Positive values turn clockwise seen from +z.
    pub fn omega(&self) -> f64 {
        self.kappa * curvature_factor(self.bz)
    }

    pub fn is_straight(&self) -> bool {
        self.omega().abs() < OMEGA_EPSILON
    }

    /// Transverse path length of one full turn, `None` for straight lines.
    pub fn period(&self) -> Option<f64> {
        if self.is_straight() {
            None
        } else {
            Some(2.0 * PI / self.omega().abs())
        }
    }

    /// Centre of the transverse circle, `None` for straight lines.
    pub fn center(&self) -> Option<Vector2<f64>> {
        if self.is_straight() {
            return None;
        }
        let rho = 1.0 / self.omega();
        Some(self.pivot.xy() + (self.d_rho + rho) * radial(self.phi0))
    }

    /// Transverse momentum in GeV, known only in a field with finite curvature.
    pub fn transverse_momentum(&self) -> Option<f64> {
        if !self.has_field() || self.kappa.abs() < f64::EPSILON {
            return None;
        }
        Some(1.0 / self.kappa.abs())
    }

    pub fn momentum(&self) -> Option<f64> {
        self.transverse_momentum()
            .map(|pt| pt * (1.0 + self.tan_lambda * self.tan_lambda).sqrt())
    }

    /// Charge sign implied by the curvature, 0 when undefined.
    pub fn charge(&self) -> f64 {
        if self.kappa == 0.0 {
            0.0
        } else {
            self.kappa.signum()
        }
    }

    pub fn phi_at(&self, s: f64) -> f64 {
        to_base_range(self.phi0 - self.omega() * s)
    }

    /// Point on the helix at path parameter `s`.
    pub fn position_at(&self, s: f64) -> Vector3<f64> {
        let half = 0.5 * self.omega() * s;
        let chord = s * sinc(half);
        let angle = self.phi0 - half;
        Vector3::new(
            self.pivot.x + self.d_rho * self.phi0.cos() - chord * angle.sin(),
            self.pivot.y + self.d_rho * self.phi0.sin() + chord * angle.cos(),
            self.pivot.z + self.dz + s * self.tan_lambda,
        )
    }

    /// Derivative of the position with respect to `s`.
    pub fn direction_at(&self, s: f64) -> Vector3<f64> {
        let phi = self.phi0 - self.omega() * s;
        Vector3::new(-phi.sin(), phi.cos(), self.tan_lambda)
    }

    pub fn unit_direction_at(&self, s: f64) -> Vector3<f64> {
        self.direction_at(s).normalize()
    }

    /// Point of the helix closest to the pivot.
    pub fn reference_point(&self) -> Vector3<f64> {
        self.position_at(0.0)
    }

    /// Path parameter of the transverse point of closest approach to `point`.
    ///
    /// For curved helices the result lies within half a turn of the pivot.
    pub fn closest_approach(&self, point: &Vector3<f64>) -> f64 {
        match self.center() {
            None => {
                let start = self.position_at(0.0).xy();
                let tangent = Vector2::new(-self.phi0.sin(), self.phi0.cos());
                (point.xy() - start).dot(&tangent)
            }
            Some(center) => {
                let omega = self.omega();
                let to_center = center - point.xy();
                let dist = to_center.norm();
                if dist < f64::EPSILON {
                    return 0.0;
                }
                let u = to_center * (omega.signum() / dist);
                let phi = u.y.atan2(u.x);
                -to_base_range(phi - self.phi0) / omega
            }
        }
    }

    /// Like [`Helix::closest_approach`], choosing the turn nearest to `hint`.
    pub fn closest_approach_near(&self, point: &Vector3<f64>, hint: f64) -> f64 {
        let s = self.closest_approach(point);
        match self.period() {
            None => s,
            Some(period) => s + period * ((hint - s) / period).round(),
        }
    }

    /// Re-expresses the helix about `pivot`, taking the point at `s` as the
    /// new reference point.
    ///
    /// `s` must be the path parameter of the closest approach to `pivot`;
    /// see [`Helix::move_pivot`].
    pub fn moved_to(&self, pivot: &Vector3<f64>, s: f64) -> Self {
        let point = self.position_at(s);
        let phi = self.phi_at(s);
        let offset = (point - pivot).xy();
        Self {
            d_rho: offset.dot(&radial(phi)),
            phi0: phi,
            kappa: self.kappa,
            dz: point.z - pivot.z,
            tan_lambda: self.tan_lambda,
            pivot: *pivot,
            bz: self.bz,
        }
    }

    /// Moves the pivot to `pivot`, using the turn nearest to `hint`.
    ///
    /// Returns the moved helix and the path parameter of the new reference
    /// point along the old helix.
    pub fn move_pivot(&self, pivot: &Vector3<f64>, hint: f64) -> (Self, f64) {
        let s = self.closest_approach_near(pivot, hint);
        (self.moved_to(pivot, s), s)
    }

    /// Jacobian of [`Helix::move_pivot`] with respect to the parameters,
    /// embedded in a `dim x dim` identity so a time parameter passes through.
    pub fn move_jacobian(&self, pivot: &Vector3<f64>, hint: f64, dim: usize) -> DMatrix<f64> {
        numerical_jacobian(self, dim, |helix| helix.move_pivot(pivot, hint).0.params())
    }

    /// Helix through three space points given in flight order.
    ///
    /// The pivot is the first point. The transverse circle passes through
    /// all three points; the slope joins the first and last points.
    pub fn from_three_points(
        first: &Vector3<f64>,
        middle: &Vector3<f64>,
        last: &Vector3<f64>,
        bz: f64,
    ) -> Result<Self, FitError> {
        let a = (middle - first).xy();
        let b = (last - first).xy();
        let l12 = a.norm();
        let l13 = b.norm();
        let l23 = (last - middle).xy().norm();
        if l12 < MIN_SEED_SEPARATION || l13 < MIN_SEED_SEPARATION || l23 < MIN_SEED_SEPARATION {
            return Err(FitError::bad_input("seed points coincide in the transverse plane"));
        }

        // Signed Menger curvature, positive when turning counter-clockwise
        let cross = a.x * b.y - a.y * b.x;
        let omega = -2.0 * cross / (l12 * l23 * l13);

        let phi0 = if omega.abs() > OMEGA_EPSILON {
            let d = 2.0 * cross;
            let cx = (b.y * a.norm_squared() - a.y * b.norm_squared()) / d;
            let cy = (a.x * b.norm_squared() - b.x * a.norm_squared()) / d;
            (omega * cy).atan2(omega * cx)
        } else {
            (-b.x).atan2(b.y)
        };

        let mut helix = Self {
            d_rho: 0.0,
            phi0,
            kappa: omega / curvature_factor(bz),
            dz: 0.0,
            tan_lambda: 0.0,
            pivot: *first,
            bz,
        };

        let s_middle = helix.closest_approach(middle);
        let s_last = helix.closest_approach_near(last, 2.0 * s_middle);
        if s_last.abs() < MIN_SEED_SEPARATION {
            return Err(FitError::bad_input("seed points span no path length"));
        }
        helix.tan_lambda = (last.z - first.z) / s_last;
        Ok(helix)
    }
}

/// Central-difference Jacobian of a parameter map `f` at `helix`.
///
/// Rows and columns beyond the five helix parameters are identity. The
/// azimuth row is wrapped.
pub fn numerical_jacobian<F>(helix: &Helix, dim: usize, f: F) -> DMatrix<f64>
where
    F: Fn(&Helix) -> [f64; N_HELIX_PARAMS],
{
    let mut jacobian = DMatrix::identity(dim, dim);
    let base = helix.params();
    for j in 0..N_HELIX_PARAMS {
        let step = 1e-6 * base[j].abs().max(1.0);
        let mut up = base;
        let mut down = base;
        up[j] += step;
        down[j] -= step;
        let plus = f(&helix.with_params(up));
        let minus = f(&helix.with_params(down));
        for i in 0..N_HELIX_PARAMS {
            let diff = if i == PHI_INDEX {
                to_base_range(plus[i] - minus[i])
            } else {
                plus[i] - minus[i]
            };
            jacobian[(i, j)] = diff / (2.0 * step);
        }
    }
    jacobian
}
