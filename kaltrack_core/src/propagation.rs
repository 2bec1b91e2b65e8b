//! Propagation and extrapolation of fitted states
//!
//! Propagation transports a state through the material between its site and
//! the target, adding multiple-scattering noise and energy loss. Extrapolation
//! only moves the helix pivot and transports the covariance through the
//! Jacobian of the move.

use crate::config::IntersectionMode;
use crate::error::FitError;
use crate::fit::{SiteRef, TrackFit};
use crate::geometry::{Geometry, MaterialEffects};
use crate::intersection::{find_intersection, Crossing};
use crate::kalman::{self, StateEstimate};
use crate::surface::{DetElementId, LayerId, SurfaceId};
use crate::track_state::TrackState;
use nalgebra::Vector3;
use tracing::trace;

/// Propagates `estimate` to the point of closest approach to `point`.
///
/// `hint` selects the turn of a curved track: the closest approach nearest
/// to that path length is used. Material surfaces crossed before the target
/// contribute per `effects`.
pub fn propagate_state<G: Geometry + ?Sized>(
    geometry: &G,
    estimate: &StateEstimate,
    point: &Vector3<f64>,
    hint: f64,
    effects: &MaterialEffects,
) -> Result<StateEstimate, FitError> {
    let dim = estimate.dim();
    let s_target = estimate.helix.closest_approach_near(point, hint);

    let mut current = estimate.clone();
    let mut remaining = s_target;
    if let Some(last) = geometry.last_surface_before(&estimate.helix, s_target) {
        let transport = geometry.transport(
            &estimate.helix,
            dim,
            last,
            IntersectionMode::towards(s_target),
            effects,
            true,
        )?;
        remaining = s_target - transport.path_length;
        current = kalman::predict(&current, &transport);
        trace!("Propagated through material up to surface {}", last);
    }

    Ok(extrapolate_state(&current, point, remaining))
}

/// Moves `estimate` to the point of closest approach to `point` without
/// material effects.
pub fn extrapolate_state(estimate: &StateEstimate, point: &Vector3<f64>, hint: f64) -> StateEstimate {
    let jacobian = estimate.helix.move_jacobian(point, hint, estimate.dim());
    let (helix, _) = estimate.helix.move_pivot(point, hint);
    let covariance = &jacobian * &estimate.covariance * jacobian.transpose();
    StateEstimate::new(helix, estimate.time, covariance)
}

impl<'a, G: Geometry> TrackFit<'a, G> {
    fn crossing_with(&self, surfaces: &[SurfaceId], at: SiteRef, mode: IntersectionMode) -> Result<Crossing, FitError> {
        let helix = &self.estimate_at(at)?.helix;
        find_intersection(self.geometry(), helix, surfaces, mode)
    }

    /// Propagates the state at `at` to the point of closest approach to
    /// `point`, through material.
    pub fn propagate_to_point(&self, point: &Vector3<f64>, at: SiteRef) -> Result<TrackState, FitError> {
        let estimate = self.estimate_at(at)?;
        let state = propagate_state(self.geometry(), estimate, point, 0.0, &self.effects())?;
        Ok(self.encode(&state))
    }

    /// Extrapolates the state at `at` to the point of closest approach to
    /// `point`, ignoring material.
    pub fn extrapolate_to_point(&self, point: &Vector3<f64>, at: SiteRef) -> Result<TrackState, FitError> {
        let estimate = self.estimate_at(at)?;
        Ok(self.encode(&extrapolate_state(estimate, point, 0.0)))
    }

    /// Propagates to the crossing with a logical layer. Also returns the
    /// detector element crossed.
    pub fn propagate_to_layer(
        &self,
        layer: LayerId,
        at: SiteRef,
        mode: IntersectionMode,
    ) -> Result<(TrackState, DetElementId), FitError> {
        let surfaces = self.geometry().surfaces_for_layer(layer)?;
        let crossing = self.crossing_with(&surfaces, at, mode)?;
        let estimate = self.estimate_at(at)?;
        let state = propagate_state(
            self.geometry(),
            estimate,
            &crossing.point,
            crossing.path_length,
            &self.effects(),
        )?;
        Ok((self.encode(&state), crossing.element_id))
    }

    /// Extrapolates to the crossing with a logical layer. Also returns the
    /// detector element crossed.
    pub fn extrapolate_to_layer(
        &self,
        layer: LayerId,
        at: SiteRef,
        mode: IntersectionMode,
    ) -> Result<(TrackState, DetElementId), FitError> {
        let surfaces = self.geometry().surfaces_for_layer(layer)?;
        let crossing = self.crossing_with(&surfaces, at, mode)?;
        let estimate = self.estimate_at(at)?;
        let state = extrapolate_state(estimate, &crossing.point, crossing.path_length);
        Ok((self.encode(&state), crossing.element_id))
    }

    /// Propagates to the crossing with a detector element.
    pub fn propagate_to_element(
        &self,
        element: DetElementId,
        at: SiteRef,
        mode: IntersectionMode,
    ) -> Result<TrackState, FitError> {
        let surfaces = self.geometry().surfaces_for_element(element)?;
        let crossing = self.crossing_with(&surfaces, at, mode)?;
        let estimate = self.estimate_at(at)?;
        let state = propagate_state(
            self.geometry(),
            estimate,
            &crossing.point,
            crossing.path_length,
            &self.effects(),
        )?;
        Ok(self.encode(&state))
    }

    /// Extrapolates to the crossing with a detector element.
    pub fn extrapolate_to_element(
        &self,
        element: DetElementId,
        at: SiteRef,
        mode: IntersectionMode,
    ) -> Result<TrackState, FitError> {
        let surfaces = self.geometry().surfaces_for_element(element)?;
        let crossing = self.crossing_with(&surfaces, at, mode)?;
        let estimate = self.estimate_at(at)?;
        Ok(self.encode(&extrapolate_state(estimate, &crossing.point, crossing.path_length)))
    }
}
