//! Track fit orchestration
//!
//! A [`FitSystem`] holds the detector geometry and the fit configuration.
//! Each [`TrackFit`] it creates is one track hypothesis: hits are added,
//! the fit is seeded, filtered site by site and optionally smoothed, and
//! the result is queried through [`TrackFit::track_state`] and the
//! propagation methods.
//!
//! ```text
//! Uninitialised --initialise--> Initialised --fit--> Filtered --smooth--> Smoothed
//! ```

use crate::config::{FitConfig, FitDirection, FitOption, IntersectionMode};
use crate::error::FitError;
use crate::geometry::{Geometry, MaterialEffects};
use crate::helix::{Helix, N_HELIX_PARAMS};
use crate::hit::{HitId, TrackerHit};
use crate::kalman::{self, StateEstimate};
use crate::site::{CandidateHandle, Site, SiteHandle, SiteStore};
use crate::surface::{Measurement, SurfaceId};
use crate::track_state::{self, TrackState};
use nalgebra::Vector3;
use std::fmt;
use tracing::{debug, trace, warn};

/// Minimum number of candidates for the three-point seed
pub const MIN_SEED_HITS: usize = 3;

/// Measurement variance of the seed site
const SEED_MEASUREMENT_VARIANCE: f64 = 1.0e6;

// ============================================================================
// FIT SYSTEM
// ============================================================================

/// Geometry and configuration shared by all track hypotheses.
#[derive(Debug, Clone)]
pub struct FitSystem<G: Geometry> {
    geometry: G,
    config: FitConfig,
}

impl<G: Geometry> FitSystem<G> {
    pub fn new(geometry: G, config: FitConfig) -> Self {
        Self { geometry, config }
    }

    pub fn with_defaults(geometry: G) -> Self {
        Self::new(geometry, FitConfig::default())
    }

    pub fn geometry(&self) -> &G {
        &self.geometry
    }

    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    pub fn set_option(&mut self, option: FitOption, on: bool) {
        debug!("Fit option {:?} set to {}", option, on);
        self.config.set_option(option, on);
    }

    pub fn option(&self, option: FitOption) -> bool {
        self.config.option(option)
    }

    /// New, empty track hypothesis.
    pub fn create_track(&self) -> TrackFit<'_, G> {
        TrackFit {
            system: self,
            store: SiteStore::new(),
            seed: None,
            direction: None,
            state: FitState::Uninitialised,
            mass: self.config.mass,
        }
    }
}

// ============================================================================
// TRACK FIT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitState {
    Uninitialised,
    Initialised,
    Filtered,
    Smoothed,
}

impl fmt::Display for FitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FitState::Uninitialised => "uninitialised",
            FitState::Initialised => "initialised",
            FitState::Filtered => "filtered",
            FitState::Smoothed => "smoothed",
        };
        f.write_str(name)
    }
}

/// Result of offering one hit to the filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterOutcome {
    Accepted { site: SiteHandle, chi2_increment: f64 },
    Discarded { chi2_increment: f64 },
}

/// Where a query starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteRef {
    /// Tail of the filtered chain (the seed before any hit is filtered)
    Last,
    /// Site of an accepted hit
    Hit(HitId),
}

/// Low-weight starting point of the chain.
#[derive(Debug, Clone)]
struct SeedSite {
    hit: HitId,
    measurement: Measurement,
    state: StateEstimate,
}

/// One track hypothesis.
pub struct TrackFit<'a, G: Geometry> {
    system: &'a FitSystem<G>,
    store: SiteStore,
    seed: Option<SeedSite>,
    direction: Option<FitDirection>,
    state: FitState,
    mass: f64,
}

impl<'a, G: Geometry> TrackFit<'a, G> {
    // ------------------------------------------------------------------------
    // Hit bookkeeping
    // ------------------------------------------------------------------------

    /// Adds a candidate hit. Insertion order is taken as time order.
    pub fn add_hit(&mut self, hit: TrackerHit) -> Result<CandidateHandle, FitError> {
        let measurement = self.measurement_for(&hit)?;
        let id = hit.id;
        let handle = self.store.add_candidate(hit, measurement)?;
        trace!("Added hit {} as candidate {}", id, handle.index());
        Ok(handle)
    }

    fn measurement_for(&self, hit: &TrackerHit) -> Result<Measurement, FitError> {
        let geometry = self.geometry();
        let surface_id = geometry
            .find_surface_for_hit(hit)
            .map_err(|e| FitError::bad_input(e.to_string()))?;
        let surface = geometry.surface(surface_id)?;
        Ok(surface.measurement_from_hit(surface_id, hit))
    }

    /// Candidate handles in filtering order.
    fn fit_order(&self, direction: FitDirection) -> Vec<CandidateHandle> {
        let handles = self.store.candidate_handles();
        match direction {
            FitDirection::Forward => handles.collect(),
            FitDirection::Backward => handles.rev().collect(),
        }
    }

    fn measured_position(&self, handle: CandidateHandle) -> Result<Vector3<f64>, FitError> {
        let measurement = &self.store.candidate(handle).measurement;
        let surface = self.geometry().surface(measurement.surface)?;
        Ok(surface.measured_position(&measurement.local()))
    }

    // ------------------------------------------------------------------------
    // Initialisation
    // ------------------------------------------------------------------------

    /// Seeds the fit with a helix through the first, middle and last
    /// candidates.
    ///
    /// The helix always follows the candidates in time order. It is pivoted
    /// at the first candidate in fit order: the earliest hit for forward
    /// fits, the latest for backward fits.
    pub fn initialise(&mut self, direction: FitDirection) -> Result<(), FitError> {
        if self.state != FitState::Uninitialised {
            return Err(FitError::AlreadyInitialised);
        }
        let n = self.store.candidate_count();
        if n < MIN_SEED_HITS {
            return Err(FitError::InsufficientHits {
                found: n,
                required: MIN_SEED_HITS,
            });
        }

        let order = self.fit_order(FitDirection::Forward);
        let early = self.measured_position(order[0])?;
        let middle = self.measured_position(order[(n - 1) / 2])?;
        let late = self.measured_position(order[n - 1])?;
        let bz = self.geometry().field_z(&early);
        let helix = Helix::from_three_points(&early, &middle, &late, bz)?;

        let (first, helix) = match direction {
            FitDirection::Forward => (order[0], helix),
            FitDirection::Backward => {
                let s = helix.closest_approach_near(&late, 2.0 * helix.closest_approach(&middle));
                (order[n - 1], helix.moved_to(&late, s))
            }
        };

        debug!(
            "Three-point seed: kappa={:.5} phi0={:.4} tanl={:.4} bz={}",
            helix.kappa, helix.phi0, helix.tan_lambda, bz
        );

        let state = StateEstimate::seed(
            helix,
            self.config().state_dim.size(),
            self.config().seed_variance,
        );
        self.install_seed(direction, first, state);
        Ok(())
    }

    /// Seeds the fit with an external track state.
    ///
    /// The supplied covariance is converted along with the parameters and
    /// transported to the first candidate in fit order.
    pub fn initialise_with_state(
        &mut self,
        state: &TrackState,
        bz: f64,
        direction: FitDirection,
    ) -> Result<(), FitError> {
        if self.state != FitState::Uninitialised {
            return Err(FitError::AlreadyInitialised);
        }
        let order = self.fit_order(direction);
        let first = *order.first().ok_or(FitError::InsufficientHits {
            found: 0,
            required: 1,
        })?;

        let dim = self.config().state_dim.size();
        let decoded = track_state::decode(state, bz, dim, self.config().seed_variance);
        let pivot = self.measured_position(first)?;
        let jacobian = decoded.helix.move_jacobian(&pivot, 0.0, dim);
        let (helix, _) = decoded.helix.move_pivot(&pivot, 0.0);
        let covariance = &jacobian * &decoded.covariance * jacobian.transpose();

        debug!("Seeded from track state at {:?}", state.reference_point);
        self.install_seed(direction, first, StateEstimate::new(helix, decoded.time, covariance));
        Ok(())
    }

    fn install_seed(&mut self, direction: FitDirection, first: CandidateHandle, state: StateEstimate) {
        let candidate = self.store.candidate(first);
        self.seed = Some(SeedSite {
            hit: candidate.hit.id,
            measurement: candidate.measurement.with_variance(SEED_MEASUREMENT_VARIANCE),
            state,
        });
        self.direction = Some(direction);
        self.state = FitState::Initialised;
    }

    // ------------------------------------------------------------------------
    // Filtering
    // ------------------------------------------------------------------------

    /// Estimate at the tail of the chain, the crossing mode towards the next
    /// site and the direction of travel through material.
    ///
    /// The seed sits on the first surface, so its crossing is the closest
    /// one while its material is still crossed in fit direction.
    fn tail(&self) -> Result<(&StateEstimate, IntersectionMode, IntersectionMode), FitError> {
        let travel = match self.direction {
            Some(FitDirection::Backward) => IntersectionMode::Backward,
            _ => IntersectionMode::Forward,
        };
        if let Some(last) = self.store.last_site() {
            return Ok((&self.store.site(last).filtered, travel, travel));
        }
        let seed = self.seed.as_ref().ok_or(FitError::NotInitialised)?;
        Ok((&seed.state, IntersectionMode::Closest, travel))
    }

    /// Predict and filter `measurement` against the chain tail without
    /// modifying the fit.
    fn trial_site(&self, hit: HitId, measurement: &Measurement) -> Result<Site, FitError> {
        let (from, mode, travel) = self.tail()?;
        let geometry = self.geometry();
        let surface = geometry.surface(measurement.surface)?;
        let transport = geometry.transport_along(
            &from.helix,
            from.dim(),
            measurement.surface,
            mode,
            Some(travel),
            &self.effects(),
            true,
        )?;
        let predicted = kalman::predict(from, &transport);
        let result = kalman::filter(&predicted, measurement, surface)?;
        Ok(Site {
            hit,
            surface: measurement.surface,
            measurement: measurement.clone(),
            predicted,
            filtered: result.state,
            smoothed: None,
            transport_jacobian: transport.jacobian,
            chi2_increment: result.chi2_increment,
        })
    }

    /// Filters all candidates with the configured chi2 threshold.
    pub fn fit(&mut self) -> Result<(), FitError> {
        self.fit_with_max_chi2(self.config().max_chi2_increment)
    }

    /// Filters all candidates in fit direction. A hit is accepted when its
    /// chi2 increment is below `max_chi2_increment`; the first hit is always
    /// accepted. Rejected hits become outliers.
    ///
    /// A fitted track only continues while some candidate has not been
    /// offered yet, e.g. after priming it with [`TrackFit::add_and_fit`].
    pub fn fit_with_max_chi2(&mut self, max_chi2_increment: f64) -> Result<(), FitError> {
        match self.state {
            FitState::Uninitialised => return Err(FitError::NotInitialised),
            FitState::Filtered | FitState::Smoothed if !self.has_unoffered_candidates() => {
                return Err(FitError::AlreadyFitted)
            }
            _ => {}
        }
        let direction = self.direction.ok_or(FitError::NotInitialised)?;

        for handle in self.fit_order(direction) {
            let hit = self.store.hit_for_candidate(handle);
            if self.store.is_offered(hit) {
                continue;
            }
            let measurement = self.store.candidate(handle).measurement.clone();
            match self.trial_site(hit, &measurement) {
                Ok(site) => {
                    let chi2 = site.chi2_increment;
                    if self.store.site_count() == 0 || chi2 < max_chi2_increment {
                        self.store.link_site(site)?;
                        trace!("Hit {} accepted, dchi2={:.3}", hit, chi2);
                    } else {
                        self.store.reject(hit, chi2)?;
                        debug!("Hit {} rejected, dchi2={:.3} >= {}", hit, chi2, max_chi2_increment);
                    }
                }
                Err(FitError::NoIntersection) | Err(FitError::SingularMatrix(_)) => {
                    warn!("Hit {} could not be filtered, recorded as outlier", hit);
                    self.store.reject(hit, f64::INFINITY)?;
                }
                Err(e) => return Err(e),
            }
        }

        self.state = FitState::Filtered;
        debug!("{}", self);

        if self.config().use_smoothing {
            self.smooth()?;
        }
        Ok(())
    }

    fn has_unoffered_candidates(&self) -> bool {
        self.store
            .candidate_handles()
            .any(|handle| !self.store.is_offered(self.store.hit_for_candidate(handle)))
    }

    /// Filters one more hit against the tail of the chain.
    ///
    /// A discarded hit is not recorded anywhere, so it may be offered again.
    pub fn add_and_fit(&mut self, hit: TrackerHit, max_chi2_increment: f64) -> Result<FilterOutcome, FitError> {
        if self.state == FitState::Uninitialised {
            return Err(FitError::NotInitialised);
        }
        if self.store.is_offered(hit.id) {
            return Err(FitError::bad_input(format!("hit {} already offered", hit.id)));
        }
        let measurement = match self.store.candidate_for_hit(hit.id) {
            Some(handle) => self.store.candidate(handle).measurement.clone(),
            None => self.measurement_for(&hit)?,
        };

        let site = self.trial_site(hit.id, &measurement)?;
        let chi2_increment = site.chi2_increment;
        if chi2_increment >= max_chi2_increment {
            debug!("Hit {} discarded, dchi2={:.3}", hit.id, chi2_increment);
            return Ok(FilterOutcome::Discarded { chi2_increment });
        }

        if self.store.candidate_for_hit(hit.id).is_none() {
            self.store.add_candidate(hit, measurement)?;
        }
        let handle = self.store.link_site(site)?;
        if self.state == FitState::Initialised {
            self.state = FitState::Filtered;
        }
        Ok(FilterOutcome::Accepted {
            site: handle,
            chi2_increment,
        })
    }

    /// Chi2 increment `hit` would add to the tail of the chain.
    pub fn test_chi2_increment(&self, hit: &TrackerHit) -> Result<f64, FitError> {
        if self.state == FitState::Uninitialised {
            return Err(FitError::NotInitialised);
        }
        let measurement = match self.store.candidate_for_hit(hit.id) {
            Some(handle) => self.store.candidate(handle).measurement.clone(),
            None => self.measurement_for(hit)?,
        };
        Ok(self.trial_site(hit.id, &measurement)?.chi2_increment)
    }

    // ------------------------------------------------------------------------
    // Smoothing
    // ------------------------------------------------------------------------

    /// Smooths the whole chain.
    pub fn smooth(&mut self) -> Result<(), FitError> {
        self.smooth_back_to(0)?;
        self.state = FitState::Smoothed;
        Ok(())
    }

    /// Smooths from the tail back to the site of `hit`, returning its index
    /// in the chain.
    pub fn smooth_to(&mut self, hit: HitId) -> Result<usize, FitError> {
        let handle = self.store.site_for_hit(hit)?;
        self.smooth_back_to(handle.index())?;
        Ok(handle.index())
    }

    fn smooth_back_to(&mut self, stop: usize) -> Result<(), FitError> {
        if self.state == FitState::Uninitialised {
            return Err(FitError::NotInitialised);
        }
        let handles: Vec<SiteHandle> = self.store.site_handles().collect();
        let last = *handles.last().ok_or(FitError::NotFitted)?;

        let mut next_smoothed = self.store.site(last).filtered.clone();
        self.store.site_mut(last).smoothed = Some(next_smoothed.clone());

        for pair in handles[stop..].windows(2).rev() {
            let (current, next) = (pair[0], pair[1]);
            let next_site = self.store.site(next);
            let state = kalman::smooth_step(
                &self.store.site(current).filtered,
                &next_site.predicted,
                &next_smoothed,
                &next_site.transport_jacobian,
            )?;
            self.store.site_mut(current).smoothed = Some(state.clone());
            next_smoothed = state;
        }
        debug!("Smoothed {} sites back to index {}", handles.len() - stop, stop);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Best estimate at `at`: smoothed if available, else filtered.
    pub(crate) fn estimate_at(&self, at: SiteRef) -> Result<&StateEstimate, FitError> {
        match at {
            SiteRef::Last => match self.store.last_site() {
                Some(last) => Ok(self.store.site(last).best_estimate()),
                None => self
                    .seed
                    .as_ref()
                    .map(|seed| &seed.state)
                    .ok_or(FitError::NotInitialised),
            },
            SiteRef::Hit(hit) => {
                let handle = self.store.site_for_hit(hit)?;
                Ok(self.store.site(handle).best_estimate())
            }
        }
    }

    pub(crate) fn encode(&self, estimate: &StateEstimate) -> TrackState {
        track_state::encode(estimate, self.chi2(), self.ndf())
    }

    pub(crate) fn geometry(&self) -> &'a G {
        &self.system.geometry
    }

    pub(crate) fn config(&self) -> &'a FitConfig {
        &self.system.config
    }

    pub(crate) fn effects(&self) -> MaterialEffects {
        MaterialEffects {
            mass: self.mass,
            ..MaterialEffects::from_config(self.config())
        }
    }

    /// Track state at the tail of the chain.
    pub fn track_state(&self) -> Result<TrackState, FitError> {
        self.track_state_at(SiteRef::Last)
    }

    /// Track state at the tail or at the site of a given hit.
    pub fn track_state_at(&self, at: SiteRef) -> Result<TrackState, FitError> {
        Ok(self.encode(self.estimate_at(at)?))
    }

    /// Accepted hits with their chi2 increments, in insertion order.
    pub fn hits_in_fit(&self) -> Vec<(HitId, f64)> {
        self.store.hits_in_fit()
    }

    /// Rejected hits with their chi2 increments, in insertion order.
    pub fn outliers(&self) -> Vec<(HitId, f64)> {
        self.store.outliers()
    }

    /// Sum of the chi2 increments of accepted hits.
    pub fn chi2(&self) -> f64 {
        self.store.sites().iter().map(|s| s.chi2_increment).sum()
    }

    /// Number of measured coordinates minus the five helix parameters.
    pub fn ndf(&self) -> i32 {
        let measured: usize = self.store.sites().iter().map(|s| s.measurement.dim()).sum();
        measured as i32 - N_HELIX_PARAMS as i32
    }

    /// First accepted hit, in fit order, at which the ndf becomes positive.
    pub fn hit_at_positive_ndf(&self) -> Option<HitId> {
        let mut measured = 0;
        self.store.sites().iter().find_map(|site| {
            measured += site.measurement.dim();
            (measured > N_HELIX_PARAMS).then_some(site.hit)
        })
    }

    /// Filtered sites in fit order.
    pub fn sites(&self) -> &[Site] {
        self.store.sites()
    }

    pub fn state(&self) -> FitState {
        self.state
    }

    pub fn direction(&self) -> Option<FitDirection> {
        self.direction
    }

    /// Hit the seed was placed at.
    pub fn seed_hit(&self) -> Option<HitId> {
        self.seed.as_ref().map(|seed| seed.hit)
    }

    /// Surface and measured coordinates of the seed site.
    pub fn seed_measurement(&self) -> Option<(SurfaceId, [f64; 2])> {
        self.seed
            .as_ref()
            .map(|seed| (seed.measurement.surface, seed.measurement.local()))
    }

    pub fn candidate_count(&self) -> usize {
        self.store.candidate_count()
    }

    /// Particle mass hypothesis (GeV) used for material effects.
    pub fn set_mass(&mut self, mass: f64) {
        self.mass = mass;
    }

    pub fn mass(&self) -> f64 {
        self.mass
    }
}

impl<G: Geometry> fmt::Display for TrackFit<'_, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TrackFit[{}, {:?}, hits={}, accepted={}, outliers={}, chi2/ndf={:.2}/{}]",
            self.state,
            self.direction,
            self.store.candidate_count(),
            self.store.site_count(),
            self.store.outliers().len(),
            self.chi2(),
            self.ndf()
        )
    }
}
