//! KalTrack Telescope Demo - forward fit through tilted planes in a field
//!
//! Builds a six-plane telescope along x in a 1 T field, fits a track
//! through hits on the first five planes, smooths, and queries the state at
//! the first plane and at the last plane, which carries no hit.
//!
//! Run: `cargo run --example telescope_demo`

use kaltrack_core::{
    DetElementId, Detector, FitDirection, FitOption, FitSystem, Geometry, Helix, IntersectionMode, LayerId,
    Material, SiteRef, Surface, TrackerHit,
};
use nalgebra::Vector3;

// ============================================================================
// DETECTOR
// ============================================================================

fn telescope(bz: f64) -> Detector {
    (0..6).fold(Detector::new(bz), |det, i| {
        det.with_surface(Surface::plane(
            DetElementId(i),
            LayerId(i),
            Vector3::new(100.0 + 100.0 * i as f64, 0.0, 0.0),
            Vector3::new(1.0, 0.1, 0.0),
            Vector3::y(),
            500.0,
            500.0,
            Material::silicon(0.3),
        ))
    })
}

/// Hits where `truth` crosses the first five planes, nudged by a fixed pattern.
fn hits(det: &Detector, truth: &Helix) -> Vec<TrackerHit> {
    let nudges = [0.006, -0.004, 0.002, -0.007, 0.003];
    det.surfaces()[..5]
        .iter()
        .zip(nudges)
        .enumerate()
        .filter_map(|(i, (surface, nudge))| {
            let (point, _) = surface.intersect(truth, IntersectionMode::Forward, true)?;
            let [u, v] = surface.local_coordinates(&point);
            let position = surface.measured_position(&[u + nudge, v - nudge]);
            Some(TrackerHit::new(i as u64 + 1, surface.element_id, position, [0.01, 0.01]))
        })
        .collect()
}

fn main() {
    println!("\n=== KalTrack Telescope Demo ===\n");

    let bz = 1.0;
    let det = telescope(bz);
    // 1 GeV positive track along +x: the momentum azimuth is phi0 + pi/2
    let truth = Helix::new([0.0, -std::f64::consts::FRAC_PI_2, 1.0, 0.0, 0.1], Vector3::zeros(), bz);
    let hits = hits(&det, &truth);
    println!("Generated {} hits", hits.len());

    let mut system = FitSystem::with_defaults(det);
    system.set_option(FitOption::UseSmoothing, true);

    let mut track = system.create_track();
    for hit in &hits {
        if let Err(e) = track.add_hit(hit.clone()) {
            println!("  hit {} rejected: {}", hit.id, e);
        }
    }

    if let Err(e) = track.initialise(FitDirection::Forward).and_then(|_| track.fit()) {
        println!("Fit failed: {}", e);
        return;
    }
    println!("{}", track);

    // ========================================================================
    // QUERIES
    // ========================================================================

    if let Some(first) = hits.first() {
        match track.track_state_at(SiteRef::Hit(first.id)) {
            Ok(state) => println!(
                "At first hit:  d0={:+.4} phi={:+.4} omega={:+.6} z0={:+.4} tanl={:+.4}",
                state.d0, state.phi, state.omega, state.z0, state.tan_lambda
            ),
            Err(e) => println!("At first hit:  {}", e),
        }
    }

    match track.propagate_to_layer(LayerId(5), SiteRef::Last, IntersectionMode::Forward) {
        Ok((state, element)) => println!(
            "At element {}: reference=({:.2}, {:.2}, {:.2}) sigma(omega)={:.2e}",
            element,
            state.reference_point.x,
            state.reference_point.y,
            state.reference_point.z,
            state.covariance_at(2, 2).sqrt()
        ),
        Err(e) => println!("Layer 5 unreachable: {}", e),
    }

    let origin = hits
        .first()
        .and_then(|first| track.extrapolate_to_point(&Vector3::zeros(), SiteRef::Hit(first.id)).ok());
    if let Some(pt) = origin.and_then(|state| state.transverse_momentum(bz)) {
        println!("pT at the origin: {:.4} GeV (truth 1.0)", pt);
    }
}
