//! Particle gun: truth helices from the interaction point and the smeared
//! hits they leave on the sensitive layers.
//!
//! All randomness comes from one seeded `ChaCha8Rng`, so an event is fully
//! reproducible from the seed.

use crate::error::SimError;
use kaltrack_core::kalman::StateEstimate;
use kaltrack_core::track_state::{encode, TrackState};
use kaltrack_core::{Geometry, Helix, IntersectionMode, TrackerHit};
use nalgebra::Vector3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::trace;

/// Kinematic ranges sampled by the gun.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GunConfig {
    /// Transverse momentum range (GeV)
    pub pt_range: (f64, f64),
    pub tan_lambda_range: (f64, f64),
    /// Hit resolution in the two local coordinates (mm)
    pub resolution: [f64; 2],
}

impl Default for GunConfig {
    fn default() -> Self {
        Self {
            pt_range: (0.5, 10.0),
            tan_lambda_range: (-1.0, 1.0),
            resolution: [0.01, 0.05],
        }
    }
}

/// A generated particle with its hits, in time order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedTrack {
    pub id: u64,
    pub truth: Helix,
    pub hits: Vec<TrackerHit>,
}

impl GeneratedTrack {
    /// Truth parameters in the external track-state convention.
    pub fn truth_state(&self) -> TrackState {
        encode(&StateEstimate::seed(self.truth.clone(), 5, 0.0), 0.0, 0)
    }
}

pub struct ParticleGun {
    rng: ChaCha8Rng,
    config: GunConfig,
    smear: [Normal<f64>; 2],
    next_hit_id: u64,
    next_track_id: u64,
}

impl ParticleGun {
    pub fn new(seed: u64, config: GunConfig) -> Result<Self, SimError> {
        let smear = [
            Normal::new(0.0, config.resolution[0])?,
            Normal::new(0.0, config.resolution[1])?,
        ];
        Ok(Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            config,
            smear,
            next_hit_id: 1,
            next_track_id: 0,
        })
    }

    /// Samples a truth helix with its pivot at the origin.
    pub fn sample_helix(&mut self, bz: f64) -> Helix {
        let (pt_min, pt_max) = self.config.pt_range;
        let (tl_min, tl_max) = self.config.tan_lambda_range;
        let pt = self.rng.gen_range(pt_min..=pt_max);
        let charge = if self.rng.gen_bool(0.5) { 1.0 } else { -1.0 };
        let phi0 = self.rng.gen_range(-PI..PI);
        let tan_lambda = self.rng.gen_range(tl_min..=tl_max);
        Helix::new([0.0, phi0, charge / pt, 0.0, tan_lambda], Vector3::zeros(), bz)
    }

    /// Fires one particle through `geometry`.
    ///
    /// Each sensitive surface crossed on the way out yields one hit,
    /// smeared in the surface's local coordinates.
    pub fn fire<G: Geometry>(&mut self, geometry: &G) -> GeneratedTrack {
        let truth = self.sample_helix(geometry.field_z(&Vector3::zeros()));

        let mut crossings: Vec<(f64, usize)> = geometry
            .surfaces()
            .iter()
            .enumerate()
            .filter(|(_, s)| s.sensitive)
            .filter_map(|(i, s)| s.path_to(&truth, IntersectionMode::Forward, true).map(|path| (path, i)))
            .collect();
        crossings.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut hits = Vec::with_capacity(crossings.len());
        for (path, index) in crossings {
            let surface = &geometry.surfaces()[index];
            let [u, v] = surface.local_coordinates(&truth.position_at(path));
            let local = [
                u + self.smear[0].sample(&mut self.rng),
                v + self.smear[1].sample(&mut self.rng),
            ];
            hits.push(TrackerHit::new(
                self.next_hit_id,
                surface.element_id,
                surface.measured_position(&local),
                self.config.resolution,
            ));
            self.next_hit_id += 1;
        }

        let id = self.next_track_id;
        self.next_track_id += 1;
        trace!("Track {} left {} hits", id, hits.len());
        GeneratedTrack { id, truth, hits }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::BarrelConfig;
    use kaltrack_core::surface::ON_SURFACE_TOLERANCE;

    #[test]
    fn test_same_seed_same_event() {
        let det = BarrelConfig::default().build();
        let mut a = ParticleGun::new(42, GunConfig::default()).unwrap();
        let mut b = ParticleGun::new(42, GunConfig::default()).unwrap();
        let (ta, tb) = (a.fire(&det), b.fire(&det));
        assert_eq!(ta.truth, tb.truth);
        assert_eq!(ta.hits, tb.hits);
    }

    #[test]
    fn test_hits_lie_on_their_layers_in_time_order() {
        let det = BarrelConfig::default().build();
        let mut gun = ParticleGun::new(7, GunConfig::default()).unwrap();
        for _ in 0..10 {
            let track = gun.fire(&det);
            assert_eq!(track.hits.len(), 6);
            for hit in &track.hits {
                let surface = det.find_surface_for_hit(hit).unwrap();
                assert!(det.surface(surface).unwrap().is_on_surface(&hit.position, ON_SURFACE_TOLERANCE));
            }
            assert!(track.hits.windows(2).all(|w| w[0].radius() < w[1].radius()));
        }
    }

    #[test]
    fn test_hit_ids_are_unique_across_tracks() {
        let det = BarrelConfig::default().build();
        let mut gun = ParticleGun::new(3, GunConfig::default()).unwrap();
        let first = gun.fire(&det);
        let second = gun.fire(&det);
        assert_eq!(second.id, first.id + 1);
        assert!(first.hits.iter().all(|h| second.hits.iter().all(|g| g.id != h.id)));
    }

    #[test]
    fn test_invalid_resolution() {
        let config = GunConfig {
            resolution: [-1.0, 0.05],
            ..GunConfig::default()
        };
        assert!(matches!(ParticleGun::new(1, config), Err(SimError::Distribution(_))));
    }

    #[test]
    fn test_truth_state_convention() {
        let det = BarrelConfig::default().build();
        let mut gun = ParticleGun::new(11, GunConfig::default()).unwrap();
        let track = gun.fire(&det);
        let state = track.truth_state();
        assert_eq!(state.d0, 0.0);
        assert_eq!(state.reference_point, Vector3::zeros());
        assert!(state.transverse_momentum(3.5).unwrap() >= 0.5 - 1e-9);
    }
}
