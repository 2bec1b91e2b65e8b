//! Refit driver: re-fits a track's hits from the outside in and reports the
//! state at the interaction point.

use kaltrack_core::track_state::TrackState;
use kaltrack_core::{FitDirection, FitError, FitSystem, Geometry, HitId, SiteRef, TrackerHit};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Outcome of one refit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefitResult {
    /// Track state at the point of closest approach to the origin
    pub state: TrackState,
    pub hits_used: Vec<HitId>,
    pub outliers: Vec<HitId>,
}

/// Sorts `hits` by transverse radius, adds them in that order, runs a
/// backward fit and propagates the result to the interaction point.
///
/// `max_chi2_increment` overrides the system's admission threshold when set.
pub fn refit<G: Geometry>(
    system: &FitSystem<G>,
    hits: &[TrackerHit],
    max_chi2_increment: Option<f64>,
) -> Result<RefitResult, FitError> {
    let mut sorted = hits.to_vec();
    sorted.sort_by(|a, b| a.radius().total_cmp(&b.radius()));

    let mut track = system.create_track();
    for hit in sorted {
        track.add_hit(hit)?;
    }
    track.initialise(FitDirection::Backward)?;
    match max_chi2_increment {
        Some(max) => track.fit_with_max_chi2(max)?,
        None => track.fit()?,
    }
    debug!("{}", track);

    let state = track.propagate_to_point(&Vector3::zeros(), SiteRef::Last)?;
    Ok(RefitResult {
        state,
        hits_used: track.hits_in_fit().into_iter().map(|(id, _)| id).collect(),
        outliers: track.outliers().into_iter().map(|(id, _)| id).collect(),
    })
}
