//! Crossing search over sets of surfaces
//!
//! Each candidate surface is asked for its crossing under the requested
//! mode, within its bounds. Among the surfaces that are crossed, the one with
//! the best mode rank wins: the smallest non-negative path length for
//! `Forward`, the non-positive one closest to zero for `Backward`, and the
//! smallest absolute path length for `Closest`.

use crate::config::IntersectionMode;
use crate::error::FitError;
use crate::fit::{SiteRef, TrackFit};
use crate::geometry::Geometry;
use crate::helix::Helix;
use crate::surface::{DetElementId, LayerId, SurfaceId};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Where a helix crosses a surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Crossing {
    pub surface: SurfaceId,
    pub element_id: DetElementId,
    pub point: Vector3<f64>,
    /// Signed transverse path length from the helix pivot
    pub path_length: f64,
}

/// Crossing of `helix` with a single surface.
pub fn find_surface_intersection<G: Geometry + ?Sized>(
    geometry: &G,
    helix: &Helix,
    surface: SurfaceId,
    mode: IntersectionMode,
) -> Result<Crossing, FitError> {
    let target = geometry.surface(surface)?;
    let (point, path_length) = target
        .intersect(helix, mode, true)
        .ok_or(FitError::NoIntersection)?;
    Ok(Crossing {
        surface,
        element_id: target.element_id,
        point,
        path_length,
    })
}

/// Best crossing of `helix` among `surfaces` under `mode`.
pub fn find_intersection<G: Geometry + ?Sized>(
    geometry: &G,
    helix: &Helix,
    surfaces: &[SurfaceId],
    mode: IntersectionMode,
) -> Result<Crossing, FitError> {
    let mut best: Option<Crossing> = None;
    for id in surfaces {
        let crossing = match find_surface_intersection(geometry, helix, *id, mode) {
            Ok(crossing) => crossing,
            Err(FitError::NoIntersection) => continue,
            Err(e) => return Err(e),
        };
        let better = best
            .as_ref()
            .map_or(true, |b| mode.rank(crossing.path_length) < mode.rank(b.path_length));
        if better {
            best = Some(crossing);
        }
    }
    best.ok_or(FitError::NoIntersection)
}

impl<'a, G: Geometry> TrackFit<'a, G> {
    /// Crossing of the fitted track with a logical layer.
    pub fn intersection_with_layer(
        &self,
        layer: LayerId,
        at: SiteRef,
        mode: IntersectionMode,
    ) -> Result<Crossing, FitError> {
        let surfaces = self.geometry().surfaces_for_layer(layer)?;
        let helix = &self.estimate_at(at)?.helix;
        let crossing = find_intersection(self.geometry(), helix, &surfaces, mode)?;
        debug!(
            "Layer {} crossed at element {} (s={:.3})",
            layer, crossing.element_id, crossing.path_length
        );
        Ok(crossing)
    }

    /// Crossing of the fitted track with a detector element.
    pub fn intersection_with_element(
        &self,
        element: DetElementId,
        at: SiteRef,
        mode: IntersectionMode,
    ) -> Result<Crossing, FitError> {
        let surfaces = self.geometry().surfaces_for_element(element)?;
        let helix = &self.estimate_at(at)?.helix;
        find_intersection(self.geometry(), helix, &surfaces, mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GeometryError;
    use crate::geometry::Detector;
    use crate::surface::{Material, Surface};
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    /// Layer 1 holds two barrel cylinders, layer 2 one inner cylinder.
    fn detector() -> Detector {
        Detector::new(0.0)
            .with_surface(Surface::cylinder(DetElementId(10), LayerId(1), 100.0, 500.0, Material::vacuum()))
            .with_surface(Surface::cylinder(DetElementId(20), LayerId(1), 200.0, 500.0, Material::vacuum()))
            .with_surface(Surface::cylinder(DetElementId(30), LayerId(2), 50.0, 500.0, Material::vacuum()))
    }

    /// Straight track from (120, 0, 0) moving along +x.
    fn track() -> Helix {
        Helix::new([0.0, -PI / 2.0, 0.0, 0.0, 0.0], Vector3::new(120.0, 0.0, 0.0), 0.0)
    }

    #[test]
    fn test_mode_selects_winner() {
        let det = detector();
        let helix = track();
        let layer = [SurfaceId(0), SurfaceId(1)];

        let forward = find_intersection(&det, &helix, &layer, IntersectionMode::Forward).unwrap();
        assert_eq!(forward.element_id, DetElementId(20));
        assert_relative_eq!(forward.path_length, 80.0, epsilon = 1e-9);

        let closest = find_intersection(&det, &helix, &layer, IntersectionMode::Closest).unwrap();
        assert_eq!(closest.element_id, DetElementId(10));
        assert_relative_eq!(closest.path_length, -20.0, epsilon = 1e-9);

        let backward = find_intersection(&det, &helix, &layer, IntersectionMode::Backward).unwrap();
        assert_eq!(backward.element_id, DetElementId(10));
        assert_relative_eq!(backward.point, Vector3::new(100.0, 0.0, 0.0), epsilon = 1e-9);
    }

    #[test]
    fn test_crossed_beats_uncrossed() {
        let det = detector();
        let helix = track();
        // the r = 50 cylinder lies entirely behind the pivot
        let crossing = find_intersection(&det, &helix, &[SurfaceId(2), SurfaceId(1)], IntersectionMode::Forward).unwrap();
        assert_eq!(crossing.surface, SurfaceId(1));
    }

    #[test]
    fn test_no_intersection() {
        let det = detector();
        let helix = track();
        assert_eq!(
            find_intersection(&det, &helix, &[SurfaceId(0), SurfaceId(2)], IntersectionMode::Forward),
            Err(FitError::NoIntersection)
        );
        assert_eq!(
            find_intersection(&det, &helix, &[], IntersectionMode::Closest),
            Err(FitError::NoIntersection)
        );
    }

    #[test]
    fn test_plane_crossing_ahead_when_nearer_one_is_behind() {
        let det = Detector::new(0.0).with_surface(Surface::plane(
            DetElementId(40),
            LayerId(4),
            Vector3::new(5.0, 0.0, 0.0),
            Vector3::new(1.0, -0.1, 0.0),
            Vector3::y(),
            1000.0,
            1000.0,
            Material::vacuum(),
        ));
        let helix = Helix::new([0.0, 0.0, 0.01, 0.0, 0.0], Vector3::zeros(), 0.0);

        let forward = find_intersection(&det, &helix, &[SurfaceId(0)], IntersectionMode::Forward).unwrap();
        assert_eq!(forward.element_id, DetElementId(40));
        assert_relative_eq!(forward.path_length, 43.1997, epsilon = 1e-3);
        let closest = find_intersection(&det, &helix, &[SurfaceId(0)], IntersectionMode::Closest).unwrap();
        assert!(closest.path_length < 0.0);
    }

    #[test]
    fn test_unknown_surface() {
        let det = detector();
        assert_eq!(
            find_surface_intersection(&det, &track(), SurfaceId(9), IntersectionMode::Closest),
            Err(FitError::Geometry(GeometryError::UnknownSurface(SurfaceId(9))))
        );
    }
}
