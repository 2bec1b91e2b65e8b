//! Measurement surfaces, material and the measurement model
//!
//! Two closed shapes are supported: barrel cylinders around the z axis and
//! bounded planes. Each surface knows how a helix crosses it and how a point
//! on it maps to the two local coordinates a hit measures.

use crate::config::{to_base_range, IntersectionMode};
use crate::helix::{Helix, N_HELIX_PARAMS};
use crate::hit::TrackerHit;
use nalgebra::{DMatrix, DVector, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Path length tolerance (mm) when classifying crossings as ahead or behind.
pub const PATH_TOLERANCE: f64 = 1e-6;

/// Newton iterations for plane crossings
const MAX_NEWTON_ITERATIONS: usize = 50;
const NEWTON_TOLERANCE: f64 = 1e-10;
/// Samples per turn when bracketing plane crossings.
const PLANE_SCAN_STEPS: usize = 128;

/// Distance (mm) within which a hit is considered to lie on a surface.
pub const ON_SURFACE_TOLERANCE: f64 = 1e-2;

// ============================================================================
// IDENTIFIERS
// ============================================================================

/// Handle of a surface inside a geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SurfaceId(pub usize);

/// Detector element identifier, as carried by hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DetElementId(pub u32);

/// Logical layer identifier, grouping the elements of one detector layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LayerId(pub u32);

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for DetElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// MATERIAL
// ============================================================================

/// Material of a thin surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Material {
    /// Thickness along the surface normal (mm)
    pub thickness: f64,
    /// Radiation length (mm)
    pub radiation_length: f64,
    /// Mean energy loss of a minimum ionising particle (GeV/mm)
    pub de_dx: f64,
}

impl Material {
    pub fn vacuum() -> Self {
        Self {
            thickness: 0.0,
            radiation_length: f64::INFINITY,
            de_dx: 0.0,
        }
    }

    pub fn silicon(thickness: f64) -> Self {
        Self {
            thickness,
            radiation_length: 93.7,
            de_dx: 3.876e-4,
        }
    }

    pub fn beryllium(thickness: f64) -> Self {
        Self {
            thickness,
            radiation_length: 352.8,
            de_dx: 2.946e-4,
        }
    }

    pub fn is_vacuum(&self) -> bool {
        self.thickness <= 0.0
    }

    /// Thickness in radiation lengths.
    pub fn radiation_lengths(&self) -> f64 {
        if self.is_vacuum() {
            0.0
        } else {
            self.thickness / self.radiation_length
        }
    }
}

impl Default for Material {
    fn default() -> Self {
        Self::vacuum()
    }
}

// ============================================================================
// SURFACES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SurfaceShape {
    /// Cylinder around the z axis, centred at z = 0
    Cylinder { radius: f64, half_length: f64 },
    /// Rectangle with orthonormal in-plane axes `u_axis` and `normal x u_axis`
    Plane {
        origin: Vector3<f64>,
        normal: Vector3<f64>,
        u_axis: Vector3<f64>,
        half_u: f64,
        half_v: f64,
    },
}

/// A detector surface: shape, material and identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Surface {
    pub element_id: DetElementId,
    pub layer_id: LayerId,
    pub shape: SurfaceShape,
    pub material: Material,
    /// Passive surfaces (beam pipe, supports) only contribute material
    pub sensitive: bool,
}

impl Surface {
    pub fn cylinder(
        element_id: DetElementId,
        layer_id: LayerId,
        radius: f64,
        half_length: f64,
        material: Material,
    ) -> Self {
        Self {
            element_id,
            layer_id,
            shape: SurfaceShape::Cylinder { radius, half_length },
            material,
            sensitive: true,
        }
    }

    /// Bounded plane. `u_axis` is projected into the plane and normalised.
    #[allow(clippy::too_many_arguments)]
    pub fn plane(
        element_id: DetElementId,
        layer_id: LayerId,
        origin: Vector3<f64>,
        normal: Vector3<f64>,
        u_axis: Vector3<f64>,
        half_u: f64,
        half_v: f64,
        material: Material,
    ) -> Self {
        let normal = normal.normalize();
        let u_axis = (u_axis - normal * u_axis.dot(&normal)).normalize();
        Self {
            element_id,
            layer_id,
            shape: SurfaceShape::Plane {
                origin,
                normal,
                u_axis,
                half_u,
                half_v,
            },
            material,
            sensitive: true,
        }
    }

    /// Marks the surface as material only.
    pub fn passive(mut self) -> Self {
        self.sensitive = false;
        self
    }

    /// Unit normal at a point on the surface, pointing away from the z axis
    /// for cylinders.
    pub fn normal_at(&self, point: &Vector3<f64>) -> Vector3<f64> {
        match &self.shape {
            SurfaceShape::Cylinder { .. } => {
                let r = point.xy().norm();
                if r < f64::EPSILON {
                    Vector3::x()
                } else {
                    Vector3::new(point.x / r, point.y / r, 0.0)
                }
            }
            SurfaceShape::Plane { normal, .. } => *normal,
        }
    }

    pub fn is_on_surface(&self, point: &Vector3<f64>, tolerance: f64) -> bool {
        let distance = match &self.shape {
            SurfaceShape::Cylinder { radius, .. } => point.xy().norm() - radius,
            SurfaceShape::Plane { origin, normal, .. } => (point - origin).dot(normal),
        };
        distance.abs() <= tolerance && self.is_within_bounds(point)
    }

    pub fn is_within_bounds(&self, point: &Vector3<f64>) -> bool {
        match &self.shape {
            SurfaceShape::Cylinder { half_length, .. } => point.z.abs() <= half_length + PATH_TOLERANCE,
            SurfaceShape::Plane { half_u, half_v, .. } => {
                let local = self.local_coordinates(point);
                local[0].abs() <= half_u + PATH_TOLERANCE && local[1].abs() <= half_v + PATH_TOLERANCE
            }
        }
    }

    /// The two measured coordinates of a point: (r*phi, z) or (u, v).
    pub fn local_coordinates(&self, point: &Vector3<f64>) -> [f64; 2] {
        match &self.shape {
            SurfaceShape::Cylinder { radius, .. } => [radius * point.y.atan2(point.x), point.z],
            SurfaceShape::Plane {
                origin,
                normal,
                u_axis,
                ..
            } => {
                let offset = point - origin;
                let v_axis = normal.cross(u_axis);
                [offset.dot(u_axis), offset.dot(&v_axis)]
            }
        }
    }

    /// Global position of a pair of local coordinates.
    pub fn measured_position(&self, local: &[f64; 2]) -> Vector3<f64> {
        match &self.shape {
            SurfaceShape::Cylinder { radius, .. } => {
                let phi = local[0] / radius;
                Vector3::new(radius * phi.cos(), radius * phi.sin(), local[1])
            }
            SurfaceShape::Plane {
                origin,
                normal,
                u_axis,
                ..
            } => origin + u_axis * local[0] + normal.cross(u_axis) * local[1],
        }
    }

    pub fn measurement_kind(&self) -> MeasurementKind {
        match &self.shape {
            SurfaceShape::Cylinder { radius, .. } => MeasurementKind::CylinderRPhiZ { radius: *radius },
            SurfaceShape::Plane { .. } => MeasurementKind::PlanarUV,
        }
    }

    /// Native measurement of `hit` on this surface.
    pub fn measurement_from_hit(&self, id: SurfaceId, hit: &TrackerHit) -> Measurement {
        let local = self.local_coordinates(&hit.position);
        let [sigma_a, sigma_b] = hit.resolution;
        Measurement {
            surface: id,
            kind: self.measurement_kind(),
            coordinates: DVector::from_row_slice(&local),
            covariance: DMatrix::from_diagonal(&DVector::from_vec(vec![
                sigma_a * sigma_a,
                sigma_b * sigma_b,
            ])),
        }
    }

    // ------------------------------------------------------------------------
    // Crossings
    // ------------------------------------------------------------------------

    /// Path parameter at which `helix` crosses this surface under `mode`.
    ///
    /// Cylinders are solved analytically, including further turns of curved
    /// tracks. Planes are bracketed over one turn either side of the pivot.
    pub fn path_to(&self, helix: &Helix, mode: IntersectionMode, check_bounds: bool) -> Option<f64> {
        let turns: &[f64] = match (&self.shape, helix.period()) {
            (SurfaceShape::Cylinder { .. }, Some(_)) => &[-1.0, 0.0, 1.0],
            _ => &[0.0],
        };
        let period = helix.period().unwrap_or(0.0);

        let mut best: Option<f64> = None;
        for base in self.base_paths(helix) {
            for turn in turns {
                let s = base + turn * period;
                if !mode.admits(s, PATH_TOLERANCE) {
                    continue;
                }
                if check_bounds && !self.is_within_bounds(&helix.position_at(s)) {
                    continue;
                }
                if best.map_or(true, |b| mode.rank(s) < mode.rank(b)) {
                    best = Some(s);
                }
            }
        }
        best
    }

    /// Crossing point and path parameter.
    pub fn intersect(
        &self,
        helix: &Helix,
        mode: IntersectionMode,
        check_bounds: bool,
    ) -> Option<(Vector3<f64>, f64)> {
        self.path_to(helix, mode, check_bounds)
            .map(|s| (helix.position_at(s), s))
    }

    fn base_paths(&self, helix: &Helix) -> Vec<f64> {
        match &self.shape {
            SurfaceShape::Cylinder { radius, .. } => cylinder_paths(helix, *radius),
            SurfaceShape::Plane { origin, normal, .. } => plane_paths(helix, origin, normal),
        }
    }

    // ------------------------------------------------------------------------
    // Measurement model
    // ------------------------------------------------------------------------

    /// Expected measurement of `helix`: the local coordinates of its nearest
    /// crossing, ignoring bounds.
    pub fn predicted_measurement(&self, helix: &Helix) -> Option<DVector<f64>> {
        let s = self.path_to(helix, IntersectionMode::Closest, false)?;
        let local = self.local_coordinates(&helix.position_at(s));
        Some(DVector::from_row_slice(&local))
    }

    /// Central-difference Jacobian of [`Surface::predicted_measurement`],
    /// `2 x dim`, with zero columns beyond the helix parameters.
    pub fn measurement_jacobian(&self, helix: &Helix, dim: usize) -> Option<DMatrix<f64>> {
        let kind = self.measurement_kind();
        let base = helix.params();
        let mut jacobian = DMatrix::zeros(2, dim);
        for j in 0..N_HELIX_PARAMS {
            let step = 1e-6 * base[j].abs().max(1.0);
            let mut up = base;
            let mut down = base;
            up[j] += step;
            down[j] -= step;
            let plus = self.predicted_measurement(&helix.with_params(up))?;
            let minus = self.predicted_measurement(&helix.with_params(down))?;
            let diff = kind.difference(&plus, &minus);
            for i in 0..2 {
                jacobian[(i, j)] = diff[i] / (2.0 * step);
            }
        }
        Some(jacobian)
    }
}

/// Both transverse crossings of a helix with a cylinder of radius `radius`.
fn cylinder_paths(helix: &Helix, radius: f64) -> Vec<f64> {
    match helix.center() {
        None => {
            let start = helix.position_at(0.0).xy();
            let tangent = Vector2::new(-helix.phi0.sin(), helix.phi0.cos());
            let b = start.dot(&tangent);
            let c = start.norm_squared() - radius * radius;
            let disc = b * b - c;
            if disc < 0.0 {
                return Vec::new();
            }
            let root = disc.sqrt();
            vec![-b - root, -b + root]
        }
        Some(center) => {
            let rho = 1.0 / helix.omega().abs();
            let d = center.norm();
            if d < f64::EPSILON || d > radius + rho || d < (radius - rho).abs() {
                return Vec::new();
            }
            let a = (radius * radius - rho * rho + d * d) / (2.0 * d);
            let h = (radius * radius - a * a).max(0.0).sqrt();
            let e = center / d;
            let perp = Vector2::new(-e.y, e.x);
            [e * a + perp * h, e * a - perp * h]
                .iter()
                .map(|p| helix.closest_approach(&Vector3::new(p.x, p.y, 0.0)))
                .collect()
        }
    }
}

/// Crossings of a helix with a plane.
///
/// Curved tracks are scanned for sign changes over one turn either side of
/// the pivot, and each bracketed root is refined. Newton iteration from the
/// tangent line adds the crossing of steep tracks that lies further out.
fn plane_paths(helix: &Helix, origin: &Vector3<f64>, normal: &Vector3<f64>) -> Vec<f64> {
    let distance = |s: f64| (helix.position_at(s) - origin).dot(normal);
    let slope = |s: f64| helix.direction_at(s).dot(normal);

    let mut roots = Vec::new();
    if let Some(period) = helix.period() {
        let step = period / PLANE_SCAN_STEPS as f64;
        let mut lo = -period;
        let mut g_lo = distance(lo);
        for i in 1..=2 * PLANE_SCAN_STEPS {
            let hi = -period + i as f64 * step;
            let g_hi = distance(hi);
            if g_lo == 0.0 {
                roots.push(lo);
            } else if g_lo * g_hi < 0.0 {
                roots.push(refine_root(&distance, &slope, lo, hi));
            }
            lo = hi;
            g_lo = g_hi;
        }
        if g_lo == 0.0 {
            roots.push(lo);
        }
    }

    if let Some(s) = newton_from_tangent(&distance, &slope) {
        if roots.iter().all(|r| (r - s).abs() > PATH_TOLERANCE) {
            roots.push(s);
        }
    }
    roots
}

fn newton_from_tangent(g: &impl Fn(f64) -> f64, dg: &impl Fn(f64) -> f64) -> Option<f64> {
    let initial_slope = dg(0.0);
    if initial_slope.abs() < f64::EPSILON {
        return None;
    }
    let mut s = -g(0.0) / initial_slope;
    for _ in 0..MAX_NEWTON_ITERATIONS {
        let value = g(s);
        if value.abs() < NEWTON_TOLERANCE {
            return Some(s);
        }
        let derivative = dg(s);
        if derivative.abs() < f64::EPSILON {
            return None;
        }
        s -= value / derivative;
    }
    None
}

/// Root of `g` inside the sign-changing bracket `[lo, hi]`.
fn refine_root(g: &impl Fn(f64) -> f64, dg: &impl Fn(f64) -> f64, mut lo: f64, mut hi: f64) -> f64 {
    let lo_negative = g(lo) < 0.0;
    let mut s = 0.5 * (lo + hi);
    for _ in 0..MAX_NEWTON_ITERATIONS {
        let value = g(s);
        if value.abs() < NEWTON_TOLERANCE {
            break;
        }
        if (value < 0.0) == lo_negative {
            lo = s;
        } else {
            hi = s;
        }
        let derivative = dg(s);
        let newton = s - value / derivative;
        s = if derivative.abs() > f64::EPSILON && newton > lo && newton < hi {
            newton
        } else {
            0.5 * (lo + hi)
        };
    }
    s
}

// ============================================================================
// MEASUREMENTS
// ============================================================================

/// Coordinate convention of a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MeasurementKind {
    /// (r*phi, z) on a cylinder of the given radius; r*phi wraps
    CylinderRPhiZ { radius: f64 },
    /// (u, v) on a plane
    PlanarUV,
}

impl MeasurementKind {
    /// `a - b`, wrapping the azimuthal coordinate.
    pub fn difference(&self, a: &DVector<f64>, b: &DVector<f64>) -> DVector<f64> {
        let mut diff = a - b;
        if let MeasurementKind::CylinderRPhiZ { radius } = self {
            diff[0] = radius * to_base_range(diff[0] / radius);
        }
        diff
    }
}

/// A measurement expressed in its surface's native coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub surface: SurfaceId,
    pub kind: MeasurementKind,
    pub coordinates: DVector<f64>,
    pub covariance: DMatrix<f64>,
}

impl Measurement {
    pub fn dim(&self) -> usize {
        self.coordinates.len()
    }

    /// Measured minus predicted.
    pub fn residual(&self, predicted: &DVector<f64>) -> DVector<f64> {
        self.kind.difference(&self.coordinates, predicted)
    }

    /// Copy with every variance replaced by `variance`.
    pub fn with_variance(&self, variance: f64) -> Self {
        let dim = self.dim();
        Self {
            covariance: DMatrix::identity(dim, dim) * variance,
            ..self.clone()
        }
    }

    pub fn local(&self) -> [f64; 2] {
        [self.coordinates[0], self.coordinates[1]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn barrel(radius: f64) -> Surface {
        Surface::cylinder(DetElementId(1), LayerId(1), radius, 1000.0, Material::silicon(0.3))
    }

    fn straight_along_x() -> Helix {
        Helix::new([0.0, -PI / 2.0, 0.0, 0.0, 0.0], Vector3::new(120.0, 0.0, 0.0), 0.0)
    }

    #[test]
    fn test_straight_cylinder_crossings() {
        let helix = straight_along_x();
        let inner = barrel(100.0);
        let outer = barrel(200.0);
        assert_relative_eq!(inner.path_to(&helix, IntersectionMode::Closest, true).unwrap(), -20.0, epsilon = 1e-9);
        assert_relative_eq!(inner.path_to(&helix, IntersectionMode::Backward, true).unwrap(), -20.0, epsilon = 1e-9);
        assert!(inner.path_to(&helix, IntersectionMode::Forward, true).is_none());
        assert_relative_eq!(outer.path_to(&helix, IntersectionMode::Forward, true).unwrap(), 80.0, epsilon = 1e-9);
    }

    #[test]
    fn test_curved_cylinder_crossing_lies_on_surface() {
        let helix = Helix::new([0.0, 0.3, 0.5, 0.0, 0.5], Vector3::zeros(), 3.5);
        let layer = barrel(300.0);
        let (point, s) = layer.intersect(&helix, IntersectionMode::Forward, true).unwrap();
        assert!(s > 0.0);
        assert_relative_eq!(point.xy().norm(), 300.0, epsilon = 1e-6);
        assert!(layer.is_on_surface(&point, 1e-6));
        // the other crossing lies behind the origin
        let back = layer.path_to(&helix, IntersectionMode::Backward, false).unwrap();
        assert!(back < 0.0);
    }

    #[test]
    fn test_cylinder_bounds_reject_crossing() {
        let helix = Helix::new([0.0, 0.0, 0.0, 0.0, 20.0], Vector3::zeros(), 0.0);
        let short = Surface::cylinder(DetElementId(2), LayerId(2), 100.0, 50.0, Material::vacuum());
        assert!(short.path_to(&helix, IntersectionMode::Forward, true).is_none());
        assert!(short.path_to(&helix, IntersectionMode::Forward, false).is_some());
    }

    #[test]
    fn test_curved_plane_crossing_lies_on_plane() {
        let helix = Helix::new([0.0, 0.3, 0.5, 0.0, 0.5], Vector3::zeros(), 3.5);
        let plane = Surface::plane(
            DetElementId(3),
            LayerId(3),
            Vector3::new(250.0, 0.0, 0.0),
            Vector3::x(),
            Vector3::y(),
            2000.0,
            2000.0,
            Material::vacuum(),
        );
        let (point, _) = plane.intersect(&helix, IntersectionMode::Closest, true).unwrap();
        assert_relative_eq!(point.x, 250.0, epsilon = 1e-8);
    }

    #[test]
    fn test_plane_crossed_on_both_sides_of_pivot() {
        // field-free circle of radius 100 through the origin, starting along +y
        let helix = Helix::new([0.0, 0.0, 0.01, 0.0, 0.0], Vector3::zeros(), 0.0);
        let plane = Surface::plane(
            DetElementId(3),
            LayerId(3),
            Vector3::new(5.0, 0.0, 0.0),
            Vector3::new(1.0, -0.1, 0.0),
            Vector3::y(),
            1000.0,
            1000.0,
            Material::vacuum(),
        );
        let ahead = plane.path_to(&helix, IntersectionMode::Forward, true).unwrap();
        assert_relative_eq!(ahead, 43.1997, epsilon = 1e-3);
        assert!(plane.is_on_surface(&helix.position_at(ahead), 1e-8));

        let behind = plane.path_to(&helix, IntersectionMode::Backward, true).unwrap();
        assert_relative_eq!(behind, -23.2660, epsilon = 1e-3);
        let closest = plane.path_to(&helix, IntersectionMode::Closest, true).unwrap();
        assert_relative_eq!(closest, behind, epsilon = 1e-9);
    }

    #[test]
    fn test_plane_parallel_at_pivot_is_crossed_both_ways() {
        // the track runs parallel to x = 20 at the pivot and curves into it
        let helix = Helix::new([0.0, 0.0, 0.01, 0.0, 0.0], Vector3::zeros(), 0.0);
        let plane = Surface::plane(
            DetElementId(3),
            LayerId(3),
            Vector3::new(20.0, 0.0, 0.0),
            Vector3::x(),
            Vector3::y(),
            1000.0,
            1000.0,
            Material::vacuum(),
        );
        let expected = 0.8f64.acos() / 0.01;
        let ahead = plane.path_to(&helix, IntersectionMode::Forward, true).unwrap();
        let behind = plane.path_to(&helix, IntersectionMode::Backward, true).unwrap();
        assert_relative_eq!(ahead, expected, epsilon = 1e-6);
        assert_relative_eq!(behind, -expected, epsilon = 1e-6);
        assert_relative_eq!(helix.position_at(ahead).x, 20.0, epsilon = 1e-8);
    }

    #[test]
    fn test_local_coordinates_round_trip() {
        let plane = Surface::plane(
            DetElementId(4),
            LayerId(4),
            Vector3::new(0.0, 0.0, 50.0),
            Vector3::z(),
            Vector3::x(),
            100.0,
            100.0,
            Material::vacuum(),
        );
        let point = Vector3::new(3.0, -7.0, 50.0);
        let local = plane.local_coordinates(&point);
        assert_relative_eq!(local[0], 3.0);
        assert_relative_eq!(local[1], -7.0);
        assert_relative_eq!(plane.measured_position(&local), point, epsilon = 1e-12);

        let cylinder = barrel(100.0);
        let point = Vector3::new(0.0, -100.0, 12.0);
        let local = cylinder.local_coordinates(&point);
        assert_relative_eq!(cylinder.measured_position(&local), point, epsilon = 1e-9);
    }

    #[test]
    fn test_cylinder_residual_wraps() {
        let kind = MeasurementKind::CylinderRPhiZ { radius: 100.0 };
        let a = DVector::from_vec(vec![100.0 * (PI - 0.01), 0.0]);
        let b = DVector::from_vec(vec![100.0 * (-PI + 0.01), 0.0]);
        let diff = kind.difference(&a, &b);
        assert_relative_eq!(diff[0], -2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_measurement_jacobian_straight_plane() {
        // straight track along x crossing the plane x = 50; v = z
        let helix = Helix::new([0.0, -PI / 2.0, 0.0, 0.0, 0.0], Vector3::zeros(), 0.0);
        let plane = Surface::plane(
            DetElementId(5),
            LayerId(5),
            Vector3::new(50.0, 0.0, 0.0),
            Vector3::x(),
            Vector3::y(),
            100.0,
            100.0,
            Material::vacuum(),
        );
        let h = plane.measurement_jacobian(&helix, 5).unwrap();
        // dz shifts v one to one, tan_lambda by the path length
        assert_relative_eq!(h[(1, 3)], 1.0, epsilon = 1e-6);
        assert_relative_eq!(h[(1, 4)], 50.0, epsilon = 1e-4);
        // field-free kappa is the geometric curvature: sagitta -s^2/2
        assert_relative_eq!(h[(0, 2)], -1250.0, max_relative = 1e-4);
        assert_relative_eq!(h[(0, 0)], 1.0, epsilon = 1e-6);
    }
}
