//! Measurement site store
//!
//! One track hypothesis owns an arena of candidate measurements (in
//! insertion order) and an arena of filtered sites (in fit order). Handles
//! index the arenas; lookup tables map external hit identities to them.

use crate::error::FitError;
use crate::hit::{HitId, TrackerHit};
use crate::kalman::StateEstimate;
use crate::surface::{Measurement, SurfaceId};
use nalgebra::DMatrix;
use std::collections::HashMap;

/// Index of a candidate in insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CandidateHandle(usize);

impl CandidateHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Index of a site in the filtered chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SiteHandle(usize);

impl SiteHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A hit offered to the track, converted to its surface's measurement.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub hit: TrackerHit,
    pub measurement: Measurement,
}

/// Filtered (and possibly smoothed) estimate at one measurement surface.
#[derive(Debug, Clone)]
pub struct Site {
    pub hit: HitId,
    pub surface: SurfaceId,
    pub measurement: Measurement,
    pub predicted: StateEstimate,
    pub filtered: StateEstimate,
    pub smoothed: Option<StateEstimate>,
    /// Transport Jacobian from the previous site in the chain
    pub transport_jacobian: DMatrix<f64>,
    pub chi2_increment: f64,
}

impl Site {
    /// Smoothed estimate if available, else filtered.
    pub fn best_estimate(&self) -> &StateEstimate {
        self.smoothed.as_ref().unwrap_or(&self.filtered)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SiteStore {
    candidates: Vec<Candidate>,
    candidate_by_hit: HashMap<HitId, CandidateHandle>,
    sites: Vec<Site>,
    site_by_hit: HashMap<HitId, SiteHandle>,
    rejected: HashMap<HitId, f64>,
}

impl SiteStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------------
    // Candidates
    // ------------------------------------------------------------------------

    pub fn add_candidate(&mut self, hit: TrackerHit, measurement: Measurement) -> Result<CandidateHandle, FitError> {
        if self.candidate_by_hit.contains_key(&hit.id) {
            return Err(FitError::bad_input(format!("hit {} already added", hit.id)));
        }
        let handle = CandidateHandle(self.candidates.len());
        self.candidate_by_hit.insert(hit.id, handle);
        self.candidates.push(Candidate { hit, measurement });
        Ok(handle)
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn candidate(&self, handle: CandidateHandle) -> &Candidate {
        &self.candidates[handle.0]
    }

    pub fn candidate_for_hit(&self, hit: HitId) -> Option<CandidateHandle> {
        self.candidate_by_hit.get(&hit).copied()
    }

    pub fn hit_for_candidate(&self, handle: CandidateHandle) -> HitId {
        self.candidates[handle.0].hit.id
    }

    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    /// Candidate handles in insertion order.
    pub fn candidate_handles(&self) -> impl DoubleEndedIterator<Item = CandidateHandle> + '_ {
        (0..self.candidates.len()).map(CandidateHandle)
    }

    // ------------------------------------------------------------------------
    // Sites
    // ------------------------------------------------------------------------

    /// Appends an accepted site to the chain.
    pub fn link_site(&mut self, site: Site) -> Result<SiteHandle, FitError> {
        if !self.candidate_by_hit.contains_key(&site.hit) {
            return Err(FitError::invariant(format!("site for hit {} has no candidate", site.hit)));
        }
        if self.is_offered(site.hit) {
            return Err(FitError::invariant(format!("hit {} offered twice", site.hit)));
        }
        let handle = SiteHandle(self.sites.len());
        self.site_by_hit.insert(site.hit, handle);
        self.sites.push(site);
        Ok(handle)
    }

    /// Records a candidate as an outlier.
    pub fn reject(&mut self, hit: HitId, chi2_increment: f64) -> Result<(), FitError> {
        if !self.candidate_by_hit.contains_key(&hit) {
            return Err(FitError::invariant(format!("rejected hit {} has no candidate", hit)));
        }
        if self.is_offered(hit) {
            return Err(FitError::invariant(format!("hit {} offered twice", hit)));
        }
        self.rejected.insert(hit, chi2_increment);
        Ok(())
    }

    /// Whether the hit was accepted or rejected.
    pub fn is_offered(&self, hit: HitId) -> bool {
        self.site_by_hit.contains_key(&hit) || self.rejected.contains_key(&hit)
    }

    /// Site of an accepted hit.
    pub fn site_for_hit(&self, hit: HitId) -> Result<SiteHandle, FitError> {
        if let Some(handle) = self.site_by_hit.get(&hit) {
            return Ok(*handle);
        }
        match self.rejected.get(&hit) {
            Some(chi2) => Err(FitError::SiteDiscarded { chi2_increment: *chi2 }),
            None => Err(FitError::bad_input(format!("hit {} is not part of the fit", hit))),
        }
    }

    pub fn site(&self, handle: SiteHandle) -> &Site {
        &self.sites[handle.0]
    }

    pub fn site_mut(&mut self, handle: SiteHandle) -> &mut Site {
        &mut self.sites[handle.0]
    }

    pub fn sites(&self) -> &[Site] {
        &self.sites
    }

    /// Site handles in chain order.
    pub fn site_handles(&self) -> impl DoubleEndedIterator<Item = SiteHandle> + '_ {
        (0..self.sites.len()).map(SiteHandle)
    }

    pub fn last_site(&self) -> Option<SiteHandle> {
        self.sites.len().checked_sub(1).map(SiteHandle)
    }

    pub fn site_count(&self) -> usize {
        self.sites.len()
    }

    /// Accepted hits and their chi2 increments, in insertion order.
    pub fn hits_in_fit(&self) -> Vec<(HitId, f64)> {
        self.candidates
            .iter()
            .filter_map(|c| {
                self.site_by_hit
                    .get(&c.hit.id)
                    .map(|h| (c.hit.id, self.sites[h.0].chi2_increment))
            })
            .collect()
    }

    /// Rejected hits and their chi2 increments, in insertion order.
    pub fn outliers(&self) -> Vec<(HitId, f64)> {
        self.candidates
            .iter()
            .filter_map(|c| self.rejected.get(&c.hit.id).map(|chi2| (c.hit.id, *chi2)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helix::Helix;
    use crate::surface::{DetElementId, MeasurementKind};
    use nalgebra::{DVector, Vector3};

    fn hit(id: u64) -> TrackerHit {
        TrackerHit::new(id, DetElementId(0), Vector3::new(id as f64, 0.0, 0.0), [0.1, 0.1])
    }

    fn measurement() -> Measurement {
        Measurement {
            surface: SurfaceId(0),
            kind: MeasurementKind::PlanarUV,
            coordinates: DVector::zeros(2),
            covariance: DMatrix::identity(2, 2),
        }
    }

    fn site(id: u64, chi2: f64) -> Site {
        let state = StateEstimate::seed(Helix::new([0.0; 5], Vector3::zeros(), 0.0), 5, 1.0);
        Site {
            hit: HitId(id),
            surface: SurfaceId(0),
            measurement: measurement(),
            predicted: state.clone(),
            filtered: state,
            smoothed: None,
            transport_jacobian: DMatrix::identity(5, 5),
            chi2_increment: chi2,
        }
    }

    fn store_with(ids: &[u64]) -> SiteStore {
        let mut store = SiteStore::new();
        for id in ids {
            store.add_candidate(hit(*id), measurement()).unwrap();
        }
        store
    }

    #[test]
    fn test_duplicate_candidate_rejected() {
        let mut store = store_with(&[1]);
        assert!(matches!(store.add_candidate(hit(1), measurement()), Err(FitError::BadInput(_))));
    }

    #[test]
    fn test_bookkeeping_in_insertion_order() {
        let mut store = store_with(&[5, 3, 9, 1]);
        // fit order differs from insertion order
        store.link_site(site(1, 0.5)).unwrap();
        store.reject(HitId(9), 42.0).unwrap();
        store.link_site(site(3, 1.5)).unwrap();

        assert_eq!(store.hits_in_fit(), vec![(HitId(3), 1.5), (HitId(1), 0.5)]);
        assert_eq!(store.outliers(), vec![(HitId(9), 42.0)]);
        assert_eq!(store.site(store.last_site().unwrap()).hit, HitId(3));
    }

    #[test]
    fn test_site_for_hit_outcomes() {
        let mut store = store_with(&[1, 2, 3]);
        store.link_site(site(1, 0.5)).unwrap();
        store.reject(HitId(2), 7.0).unwrap();

        assert_eq!(store.site_for_hit(HitId(1)).unwrap().index(), 0);
        assert_eq!(
            store.site_for_hit(HitId(2)),
            Err(FitError::SiteDiscarded { chi2_increment: 7.0 })
        );
        assert!(matches!(store.site_for_hit(HitId(3)), Err(FitError::BadInput(_))));
    }

    #[test]
    fn test_link_requires_candidate_and_single_offer() {
        let mut store = store_with(&[1]);
        assert!(matches!(store.link_site(site(4, 0.0)), Err(FitError::Invariant(_))));
        store.link_site(site(1, 0.0)).unwrap();
        assert!(matches!(store.link_site(site(1, 0.0)), Err(FitError::Invariant(_))));
        assert!(matches!(store.reject(HitId(1), 1.0), Err(FitError::Invariant(_))));
    }
}
