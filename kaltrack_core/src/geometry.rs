//! Geometry lookup and the transport primitive
//!
//! The fit engine sees the detector only through the [`Geometry`] trait:
//! a list of surfaces, a field value, and lookups from hits, layers and
//! detector elements to surfaces. Transport of a helix and its covariance
//! between surfaces is a provided method built on those.

use crate::config::{FitConfig, IntersectionMode};
use crate::error::{FitError, GeometryError};
use crate::helix::{Helix, KAPPA_INDEX, PHI_INDEX};
use crate::hit::TrackerHit;
use crate::surface::{DetElementId, LayerId, Surface, SurfaceId, ON_SURFACE_TOLERANCE, PATH_TOLERANCE};
use nalgebra::{DMatrix, Vector3};
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

/// Highland formula constant (GeV)
const HIGHLAND_SCALE: f64 = 0.0136;
const HIGHLAND_LOG: f64 = 0.038;

/// Minimum |cos| between track and surface normal
const MIN_INCIDENCE: f64 = 1e-3;

/// Index of tan(lambda) in the parameter vector
const TANL_INDEX: usize = 4;

// ============================================================================
// MATERIAL EFFECTS
// ============================================================================

/// Which material effects transport applies, and for which particle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaterialEffects {
    pub multiple_scattering: bool,
    pub energy_loss: bool,
    /// Particle mass hypothesis (GeV)
    pub mass: f64,
}

impl MaterialEffects {
    pub fn from_config(config: &FitConfig) -> Self {
        Self {
            multiple_scattering: config.use_multiple_scattering,
            energy_loss: config.use_energy_loss,
            mass: config.mass,
        }
    }

    /// Pure geometry: no noise, no energy loss.
    pub fn none() -> Self {
        Self {
            multiple_scattering: false,
            energy_loss: false,
            mass: 0.0,
        }
    }
}

/// Effect of crossing one surface's material at the helix pivot.
///
/// `travel` is the direction of motion relative to the momentum; moving
/// along it loses energy, moving against it gains energy. Returns the
/// updated helix, the Jacobian of the update and the process noise, already
/// expressed in the updated parameters.
pub fn material_step(
    helix: &Helix,
    surface: &Surface,
    travel: IntersectionMode,
    effects: &MaterialEffects,
    dim: usize,
) -> (Helix, DMatrix<f64>, DMatrix<f64>) {
    let mut jacobian = DMatrix::identity(dim, dim);
    let mut noise = DMatrix::zeros(dim, dim);
    let material = &surface.material;

    let Some(p) = helix.momentum() else {
        return (helix.clone(), jacobian, noise);
    };
    if material.is_vacuum() {
        return (helix.clone(), jacobian, noise);
    }

    let point = helix.reference_point();
    let cos_incidence = helix
        .unit_direction_at(0.0)
        .dot(&surface.normal_at(&point))
        .abs()
        .max(MIN_INCIDENCE);

    let mass = effects.mass;
    let energy = (p * p + mass * mass).sqrt();

    if effects.multiple_scattering {
        let xl = material.radiation_lengths() / cos_incidence;
        let beta = p / energy;
        let sigma = HIGHLAND_SCALE / (beta * p) * xl.sqrt() * (1.0 + HIGHLAND_LOG * xl.ln());
        let sigma2 = sigma * sigma;
        let tanl = helix.tan_lambda;
        let kappa = helix.kappa;
        let secl2 = 1.0 + tanl * tanl;

        noise[(PHI_INDEX, PHI_INDEX)] = sigma2 * secl2;
        noise[(KAPPA_INDEX, KAPPA_INDEX)] = sigma2 * (kappa * tanl).powi(2);
        noise[(KAPPA_INDEX, TANL_INDEX)] = sigma2 * kappa * tanl * secl2;
        noise[(TANL_INDEX, KAPPA_INDEX)] = noise[(KAPPA_INDEX, TANL_INDEX)];
        noise[(TANL_INDEX, TANL_INDEX)] = sigma2 * secl2 * secl2;
    }

    let mut updated = helix.clone();
    if effects.energy_loss {
        let loss = material.de_dx * material.thickness / cos_incidence;
        let new_energy = match travel {
            IntersectionMode::Backward => energy + loss,
            _ => energy - loss,
        };
        if new_energy > mass {
            let new_p = (new_energy * new_energy - mass * mass).sqrt();
            let ratio = p / new_p;
            updated.kappa = helix.kappa * ratio;
            jacobian[(KAPPA_INDEX, KAPPA_INDEX)] = ratio;
            noise = &jacobian * &noise * jacobian.transpose();
        } else {
            warn!(
                element = %surface.element_id,
                energy,
                loss,
                "Particle would stop in material, energy loss skipped"
            );
        }
    }

    (updated, jacobian, noise)
}

// ============================================================================
// TRANSPORT
// ============================================================================

/// Result of transporting a helix to a target surface.
#[derive(Debug, Clone)]
pub struct Transport {
    /// Crossing point on the target surface
    pub point: Vector3<f64>,
    /// Transverse path length travelled, signed along the momentum
    pub path_length: f64,
    /// Helix pivoted at `point`
    pub helix: Helix,
    /// d(new parameters)/d(old parameters)
    pub jacobian: DMatrix<f64>,
    /// Process noise accumulated from traversed material, in new parameters
    pub noise: DMatrix<f64>,
}

impl Transport {
    /// Transports a covariance: `J * C * J^T + Q`.
    pub fn apply(&self, covariance: &DMatrix<f64>) -> DMatrix<f64> {
        &self.jacobian * covariance * self.jacobian.transpose() + &self.noise
    }
}

// ============================================================================
// GEOMETRY
// ============================================================================

/// Detector geometry and magnetic field, as seen by the fit.
pub trait Geometry {
    /// All surfaces; a `SurfaceId` indexes this slice.
    fn surfaces(&self) -> &[Surface];

    /// Longitudinal field component at `point` (Tesla).
    fn field_z(&self, point: &Vector3<f64>) -> f64;

    fn surface(&self, id: SurfaceId) -> Result<&Surface, GeometryError> {
        self.surfaces().get(id.0).ok_or(GeometryError::UnknownSurface(id))
    }

    /// Sensitive surface of the hit's detector element on which the hit lies.
    fn find_surface_for_hit(&self, hit: &TrackerHit) -> Result<SurfaceId, GeometryError> {
        self.surfaces()
            .iter()
            .position(|s| {
                s.sensitive
                    && s.element_id == hit.element_id
                    && s.is_on_surface(&hit.position, ON_SURFACE_TOLERANCE)
            })
            .map(SurfaceId)
            .ok_or(GeometryError::NoSurfaceForHit(hit.id))
    }

    fn surfaces_for_layer(&self, layer: LayerId) -> Result<Vec<SurfaceId>, GeometryError> {
        let ids: Vec<SurfaceId> = self
            .surfaces()
            .iter()
            .enumerate()
            .filter(|(_, s)| s.layer_id == layer)
            .map(|(i, _)| SurfaceId(i))
            .collect();
        if ids.is_empty() {
            Err(GeometryError::UnknownLayer(layer))
        } else {
            Ok(ids)
        }
    }

    fn surfaces_for_element(&self, element: DetElementId) -> Result<Vec<SurfaceId>, GeometryError> {
        let ids: Vec<SurfaceId> = self
            .surfaces()
            .iter()
            .enumerate()
            .filter(|(_, s)| s.element_id == element)
            .map(|(i, _)| SurfaceId(i))
            .collect();
        if ids.is_empty() {
            Err(GeometryError::UnknownElement(element))
        } else {
            Ok(ids)
        }
    }

    /// Material surfaces crossed strictly between the pivot and `s_target`,
    /// ordered by distance travelled.
    fn material_crossings(&self, helix: &Helix, s_target: f64, exclude: Option<SurfaceId>) -> Vec<(f64, SurfaceId)> {
        let travel = IntersectionMode::towards(s_target);
        let limit = s_target.abs() - PATH_TOLERANCE;
        let mut crossings: Vec<(f64, SurfaceId)> = self
            .surfaces()
            .iter()
            .enumerate()
            .filter(|(i, s)| !s.material.is_vacuum() && Some(SurfaceId(*i)) != exclude)
            .filter_map(|(i, s)| {
                s.path_to(helix, travel, true)
                    .filter(|path| path.abs() > PATH_TOLERANCE && path.abs() < limit)
                    .map(|path| (path, SurfaceId(i)))
            })
            .collect();
        crossings.sort_by(|a, b| a.0.abs().total_cmp(&b.0.abs()));
        crossings
    }

    /// Last material surface crossed before reaching `s_target`.
    fn last_surface_before(&self, helix: &Helix, s_target: f64) -> Option<SurfaceId> {
        self.material_crossings(helix, s_target, None)
            .last()
            .map(|(_, id)| *id)
    }

    /// Transports `helix` to `target`, crossing under `mode`.
    ///
    /// Every material surface on the way contributes noise and energy loss
    /// per `effects`. The target's own material is applied only when
    /// `include_target_material` is set. `dim` is the state dimension; a
    /// time parameter is carried through unchanged.
    fn transport(
        &self,
        helix: &Helix,
        dim: usize,
        target: SurfaceId,
        mode: IntersectionMode,
        effects: &MaterialEffects,
        include_target_material: bool,
    ) -> Result<Transport, FitError> {
        self.transport_along(helix, dim, target, mode, None, effects, include_target_material)
    }

    /// [`Geometry::transport`] with an explicit direction of travel for the
    /// material effects.
    ///
    /// Without `travel`, directed modes travel their own way and `Closest`
    /// travels towards the crossing it finds.
    #[allow(clippy::too_many_arguments)]
    fn transport_along(
        &self,
        helix: &Helix,
        dim: usize,
        target: SurfaceId,
        mode: IntersectionMode,
        travel: Option<IntersectionMode>,
        effects: &MaterialEffects,
        include_target_material: bool,
    ) -> Result<Transport, FitError> {
        let target_surface = self.surface(target)?;
        let s_target = target_surface
            .path_to(helix, mode, false)
            .ok_or(FitError::NoIntersection)?;
        let travel = travel.unwrap_or(match mode {
            IntersectionMode::Closest => IntersectionMode::towards(s_target),
            directed => directed,
        });

        let mut current = helix.clone();
        let mut jacobian = DMatrix::identity(dim, dim);
        let mut noise = DMatrix::zeros(dim, dim);
        let mut travelled = 0.0;
        let mut crossed = false;

        for (_, id) in self.material_crossings(helix, s_target, Some(target)) {
            let surface = self.surface(id)?;
            // Crossings are recomputed from the updated helix
            let Some(s) = surface.path_to(&current, travel, true) else {
                continue;
            };
            let point = current.position_at(s);
            let step = current.move_jacobian(&point, s, dim);
            let (moved, s) = current.move_pivot(&point, s);
            jacobian = &step * jacobian;
            noise = &step * noise * step.transpose();
            travelled += s;

            let (after, loss, scatter) = material_step(&moved, surface, travel, effects, dim);
            jacobian = &loss * jacobian;
            noise = &loss * noise * loss.transpose() + scatter;
            current = after;
            crossed = true;
            trace!(surface = %id, path = s, "Crossed material");
        }

        let s = if crossed {
            target_surface
                .path_to(&current, travel, false)
                .ok_or(FitError::NoIntersection)?
        } else {
            s_target
        };
        let point = current.position_at(s);
        let step = current.move_jacobian(&point, s, dim);
        let (moved, s) = current.move_pivot(&point, s);
        jacobian = &step * jacobian;
        noise = &step * noise * step.transpose();
        travelled += s;
        current = moved;

        if include_target_material {
            let (after, loss, scatter) = material_step(&current, target_surface, travel, effects, dim);
            jacobian = &loss * jacobian;
            noise = &loss * noise * loss.transpose() + scatter;
            current = after;
        }

        Ok(Transport {
            point,
            path_length: travelled,
            helix: current,
            jacobian,
            noise,
        })
    }
}

/// In-memory detector with a uniform longitudinal field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Detector {
    surfaces: Vec<Surface>,
    bz: f64,
}

impl Detector {
    pub fn new(bz: f64) -> Self {
        Self {
            surfaces: Vec::new(),
            bz,
        }
    }

    pub fn add_surface(&mut self, surface: Surface) -> SurfaceId {
        self.surfaces.push(surface);
        SurfaceId(self.surfaces.len() - 1)
    }

    pub fn with_surface(mut self, surface: Surface) -> Self {
        self.add_surface(surface);
        self
    }

    pub fn bz(&self) -> f64 {
        self.bz
    }
}

impl Geometry for Detector {
    fn surfaces(&self) -> &[Surface] {
        &self.surfaces
    }

    fn field_z(&self, _point: &Vector3<f64>) -> f64 {
        self.bz
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::Material;
    use approx::assert_relative_eq;

    fn barrel(radii: &[f64], material: Material) -> Detector {
        radii.iter().enumerate().fold(Detector::new(3.5), |det, (i, r)| {
            det.with_surface(Surface::cylinder(
                DetElementId(i as u32),
                LayerId(i as u32),
                *r,
                2000.0,
                material,
            ))
        })
    }

    fn track() -> Helix {
        Helix::new([0.0, 0.3, 0.5, 0.0, 0.5], Vector3::zeros(), 3.5)
    }

    #[test]
    fn test_find_surface_for_hit() {
        let det = barrel(&[100.0, 200.0], Material::vacuum());
        let hit = TrackerHit::new(7, DetElementId(1), Vector3::new(0.0, 200.0, 5.0), [0.01, 0.01]);
        assert_eq!(det.find_surface_for_hit(&hit).unwrap(), SurfaceId(1));

        let off = TrackerHit::new(8, DetElementId(1), Vector3::new(0.0, 150.0, 5.0), [0.01, 0.01]);
        assert_eq!(
            det.find_surface_for_hit(&off),
            Err(GeometryError::NoSurfaceForHit(off.id))
        );
    }

    #[test]
    fn test_unknown_layer_and_element() {
        let det = barrel(&[100.0], Material::vacuum());
        assert_eq!(det.surfaces_for_layer(LayerId(0)).unwrap(), vec![SurfaceId(0)]);
        assert_eq!(det.surfaces_for_layer(LayerId(9)), Err(GeometryError::UnknownLayer(LayerId(9))));
        assert_eq!(
            det.surfaces_for_element(DetElementId(9)),
            Err(GeometryError::UnknownElement(DetElementId(9)))
        );
    }

    #[test]
    fn test_transport_without_material_is_a_pivot_move() {
        let det = barrel(&[100.0, 200.0, 300.0], Material::vacuum());
        let helix = track();
        let result = det
            .transport(&helix, 5, SurfaceId(2), IntersectionMode::Forward, &MaterialEffects::none(), true)
            .unwrap();
        assert_relative_eq!(result.point.xy().norm(), 300.0, epsilon = 1e-6);
        assert_relative_eq!(result.noise.norm(), 0.0);
        assert_relative_eq!(result.helix.kappa, helix.kappa);
        assert_relative_eq!(result.helix.d_rho, 0.0, epsilon = 1e-9);
        assert!(result.path_length > 300.0);
    }

    #[test]
    fn test_transport_through_material() {
        let det = barrel(&[100.0, 200.0, 300.0], Material::silicon(0.3));
        let helix = track();
        let effects = MaterialEffects::from_config(&FitConfig::default());

        let forward = det
            .transport(&helix, 5, SurfaceId(2), IntersectionMode::Forward, &effects, false)
            .unwrap();
        assert!(forward.noise[(PHI_INDEX, PHI_INDEX)] > 0.0);
        assert!(forward.helix.kappa.abs() > helix.kappa.abs());

        let with_target = det
            .transport(&helix, 5, SurfaceId(2), IntersectionMode::Forward, &effects, true)
            .unwrap();
        assert!(with_target.helix.kappa.abs() > forward.helix.kappa.abs());
        assert!(with_target.noise[(PHI_INDEX, PHI_INDEX)] > forward.noise[(PHI_INDEX, PHI_INDEX)]);
    }

    #[test]
    fn test_backward_transport_gains_energy() {
        let det = barrel(&[100.0, 200.0, 300.0], Material::silicon(0.3));
        let outer = track();
        let effects = MaterialEffects::from_config(&FitConfig::default());
        let start = det
            .transport(&outer, 5, SurfaceId(2), IntersectionMode::Forward, &MaterialEffects::none(), false)
            .unwrap()
            .helix;
        let back = det
            .transport(&start, 5, SurfaceId(0), IntersectionMode::Backward, &effects, false)
            .unwrap();
        assert!(back.path_length < 0.0);
        assert!(back.helix.kappa.abs() < start.kappa.abs());
    }

    #[test]
    fn test_target_at_pivot_follows_requested_direction() {
        let det = barrel(&[100.0, 200.0, 300.0], Material::silicon(0.3));
        let effects = MaterialEffects::from_config(&FitConfig::default());
        let on_surface = det
            .transport(&track(), 5, SurfaceId(2), IntersectionMode::Forward, &MaterialEffects::none(), false)
            .unwrap()
            .helix;

        let backward = det
            .transport(&on_surface, 5, SurfaceId(2), IntersectionMode::Backward, &effects, true)
            .unwrap();
        assert!(backward.path_length.abs() < 1e-6);
        assert!(backward.helix.kappa.abs() < on_surface.kappa.abs());

        let forward = det
            .transport(&on_surface, 5, SurfaceId(2), IntersectionMode::Forward, &effects, true)
            .unwrap();
        assert!(forward.helix.kappa.abs() > on_surface.kappa.abs());

        // closest crossing, travelling as requested
        let seeded_backward = det
            .transport_along(
                &on_surface,
                5,
                SurfaceId(2),
                IntersectionMode::Closest,
                Some(IntersectionMode::Backward),
                &effects,
                true,
            )
            .unwrap();
        assert_relative_eq!(seeded_backward.helix.kappa, backward.helix.kappa, max_relative = 1e-9);
        let seeded_forward = det
            .transport_along(
                &on_surface,
                5,
                SurfaceId(2),
                IntersectionMode::Closest,
                Some(IntersectionMode::Forward),
                &effects,
                true,
            )
            .unwrap();
        assert_relative_eq!(seeded_forward.helix.kappa, forward.helix.kappa, max_relative = 1e-9);
    }

    #[test]
    fn test_no_material_step_without_momentum() {
        let surface = Surface::cylinder(DetElementId(0), LayerId(0), 100.0, 100.0, Material::silicon(0.3));
        let straight = Helix::new([0.0, 0.0, 0.0, 0.0, 0.0], Vector3::new(0.0, 100.0, 0.0), 0.0);
        let effects = MaterialEffects::from_config(&FitConfig::default());
        let (after, jac, noise) = material_step(&straight, &surface, IntersectionMode::Forward, &effects, 5);
        assert_eq!(after, straight);
        assert_eq!(jac, DMatrix::identity(5, 5));
        assert_relative_eq!(noise.norm(), 0.0);
    }
}
