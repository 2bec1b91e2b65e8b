//! External tracker hits as supplied by the caller.

use crate::surface::DetElementId;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity of an external hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HitId(pub u64);

impl fmt::Display for HitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A space point measured by one detector element.
///
/// `resolution` holds the one-sigma errors of the two local coordinates of
/// the element's surface: (r*phi, z) on cylinders, (u, v) on planes. Units are
/// millimetres.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerHit {
    pub id: HitId,
    pub element_id: DetElementId,
    pub position: Vector3<f64>,
    pub resolution: [f64; 2],
}

impl TrackerHit {
    pub fn new(id: u64, element_id: DetElementId, position: Vector3<f64>, resolution: [f64; 2]) -> Self {
        Self {
            id: HitId(id),
            element_id,
            position,
            resolution,
        }
    }

    /// Transverse radius of the hit position.
    pub fn radius(&self) -> f64 {
        self.position.xy().norm()
    }
}
