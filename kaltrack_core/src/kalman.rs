//! Kalman recursion primitives on helix states
//!
//! Predict, filter (gain update with Joseph-form covariance) and one
//! Rauch-Tung-Striebel smoothing step. All vectors are in the helix
//! parameter space of [`crate::helix`], optionally extended by a time offset.

use crate::config::to_base_range;
use crate::error::FitError;
use crate::geometry::Transport;
use crate::helix::{Helix, N_HELIX_PARAMS, PHI_INDEX};
use crate::surface::{Measurement, Surface};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// A helix estimate with its covariance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEstimate {
    pub helix: Helix,
    /// Time offset, present only for six-dimensional states
    pub time: Option<f64>,
    pub covariance: DMatrix<f64>,
}

impl StateEstimate {
    pub fn new(helix: Helix, time: Option<f64>, covariance: DMatrix<f64>) -> Self {
        Self {
            helix,
            time,
            covariance,
        }
    }

    /// Uninformative estimate: diagonal covariance of `variance`.
    pub fn seed(helix: Helix, dim: usize, variance: f64) -> Self {
        let time = (dim > N_HELIX_PARAMS).then_some(0.0);
        Self::new(helix, time, DMatrix::identity(dim, dim) * variance)
    }

    pub fn dim(&self) -> usize {
        self.covariance.nrows()
    }

    pub fn vector(&self) -> DVector<f64> {
        let mut v = DVector::zeros(self.dim());
        for (i, p) in self.helix.params().iter().enumerate() {
            v[i] = *p;
        }
        if let Some(t) = self.time {
            v[N_HELIX_PARAMS] = t;
        }
        v
    }

    /// Same pivot, field and covariance with a new parameter vector.
    pub fn with_vector(&self, v: &DVector<f64>) -> Self {
        let helix = self.helix.with_params([v[0], v[1], v[2], v[3], v[4]]);
        let time = self.time.map(|_| v[N_HELIX_PARAMS]);
        Self::new(helix, time, self.covariance.clone())
    }

    /// Square root of the covariance trace.
    pub fn total_error(&self) -> f64 {
        self.covariance.trace().sqrt()
    }
}

/// `a - b` on parameter vectors, wrapping the azimuth.
pub fn difference(a: &DVector<f64>, b: &DVector<f64>) -> DVector<f64> {
    let mut diff = a - b;
    diff[PHI_INDEX] = to_base_range(diff[PHI_INDEX]);
    diff
}

fn symmetrised(m: DMatrix<f64>) -> DMatrix<f64> {
    (&m + m.transpose()) * 0.5
}

fn inverse_spd(m: &DMatrix<f64>, what: &'static str) -> Result<DMatrix<f64>, FitError> {
    m.clone()
        .cholesky()
        .map(|chol| chol.inverse())
        .ok_or(FitError::SingularMatrix(what))
}

/// Prediction: `C' = J * C * J^T + Q` with the transported helix.
pub fn predict(estimate: &StateEstimate, transport: &Transport) -> StateEstimate {
    StateEstimate::new(
        transport.helix.clone(),
        estimate.time,
        symmetrised(transport.apply(&estimate.covariance)),
    )
}

/// Outcome of one measurement update.
#[derive(Debug, Clone)]
pub struct FilterResult {
    pub state: StateEstimate,
    pub chi2_increment: f64,
}

/// Measurement update of `predicted` with `measurement` on `surface`.
pub fn filter(
    predicted: &StateEstimate,
    measurement: &Measurement,
    surface: &Surface,
) -> Result<FilterResult, FitError> {
    let dim = predicted.dim();
    let expected = surface
        .predicted_measurement(&predicted.helix)
        .ok_or(FitError::NoIntersection)?;
    let h = surface
        .measurement_jacobian(&predicted.helix, dim)
        .ok_or(FitError::NoIntersection)?;

    // Step 1: residual and its covariance
    let residual = measurement.residual(&expected);
    let c = &predicted.covariance;
    let s = &measurement.covariance + &h * c * h.transpose();
    let s_inv = inverse_spd(&s, "residual covariance")?;

    // Step 2: gain and state update
    let k = c * h.transpose() * &s_inv;
    let vector = predicted.vector() + &k * &residual;

    // Step 3: covariance update (Joseph form)
    // C = (I - K*H) * C * (I - K*H)^T + K*V*K^T
    let ikh = DMatrix::identity(dim, dim) - &k * &h;
    let covariance = &ikh * c * ikh.transpose() + &k * &measurement.covariance * k.transpose();

    let chi2_increment = (residual.transpose() * &s_inv * &residual)[(0, 0)];

    let mut state = predicted.with_vector(&vector);
    state.covariance = symmetrised(covariance);
    Ok(FilterResult {
        state,
        chi2_increment,
    })
}

/// One backward smoothing step.
///
/// `jacobian` transports site k to site k+1. `next_predicted` and
/// `next_smoothed` are the predicted and smoothed estimates at k+1.
pub fn smooth_step(
    filtered: &StateEstimate,
    next_predicted: &StateEstimate,
    next_smoothed: &StateEstimate,
    jacobian: &DMatrix<f64>,
) -> Result<StateEstimate, FitError> {
    let predicted_inv = inverse_spd(&next_predicted.covariance, "predicted covariance")?;
    let gain = &filtered.covariance * jacobian.transpose() * predicted_inv;

    let diff = difference(&next_smoothed.vector(), &next_predicted.vector());
    let vector = filtered.vector() + &gain * diff;
    let covariance = &filtered.covariance
        + &gain * (&next_smoothed.covariance - &next_predicted.covariance) * gain.transpose();

    let mut state = filtered.with_vector(&vector);
    state.covariance = symmetrised(covariance);
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{DetElementId, LayerId, Material, SurfaceId};
    use approx::assert_relative_eq;
    use nalgebra::Vector3;
    use std::f64::consts::PI;

    fn plane_at(x: f64) -> Surface {
        Surface::plane(
            DetElementId(0),
            LayerId(0),
            Vector3::new(x, 0.0, 0.0),
            Vector3::x(),
            Vector3::y(),
            1000.0,
            1000.0,
            Material::vacuum(),
        )
    }

    fn measurement(u: f64, v: f64, sigma: f64) -> Measurement {
        let surface = plane_at(0.0);
        Measurement {
            surface: SurfaceId(0),
            kind: surface.measurement_kind(),
            coordinates: DVector::from_vec(vec![u, v]),
            covariance: DMatrix::identity(2, 2) * sigma * sigma,
        }
    }

    fn state_on_plane() -> StateEstimate {
        // straight track along +x through the origin
        let helix = Helix::new([0.0, -PI / 2.0, 0.0, 0.0, 0.1], Vector3::zeros(), 0.0);
        StateEstimate::seed(helix, 5, 1.0)
    }

    #[test]
    fn test_vector_round_trip_with_time() {
        let helix = Helix::new([1.0, 0.2, 0.3, 4.0, 0.5], Vector3::zeros(), 2.0);
        let state = StateEstimate::seed(helix, 6, 1e6);
        assert_eq!(state.time, Some(0.0));
        let mut v = state.vector();
        v[5] = 3.0;
        let updated = state.with_vector(&v);
        assert_eq!(updated.time, Some(3.0));
        assert_relative_eq!(updated.helix.dz, 4.0);
    }

    #[test]
    fn test_filter_exact_measurement() {
        let predicted = state_on_plane();
        let result = filter(&predicted, &measurement(0.0, 0.0, 0.1), &plane_at(0.0)).unwrap();
        assert_relative_eq!(result.chi2_increment, 0.0, epsilon = 1e-12);
        assert!(result.state.covariance.trace() < predicted.covariance.trace());
    }

    #[test]
    fn test_filter_pulls_towards_measurement() {
        let predicted = state_on_plane();
        let result = filter(&predicted, &measurement(0.0, 0.5, 0.1), &plane_at(0.0)).unwrap();
        // v measures z; unit prior variance against 0.01 measurement variance
        assert_relative_eq!(result.state.helix.dz, 0.5 / 1.01, epsilon = 1e-6);
        assert_relative_eq!(result.chi2_increment, 0.25 / 1.01, epsilon = 1e-6);
    }

    #[test]
    fn test_smooth_step_without_new_information() {
        let filtered = state_on_plane();
        let jacobian = DMatrix::identity(5, 5);
        let smoothed = smooth_step(&filtered, &filtered, &filtered, &jacobian).unwrap();
        assert_relative_eq!(smoothed.vector(), filtered.vector(), epsilon = 1e-12);
        assert_relative_eq!(smoothed.covariance, filtered.covariance, epsilon = 1e-12);
    }

    #[test]
    fn test_smooth_step_reduces_covariance() {
        let filtered = state_on_plane();
        let mut next_smoothed = filtered.clone();
        next_smoothed.covariance *= 0.25;
        let smoothed = smooth_step(&filtered, &filtered, &next_smoothed, &DMatrix::identity(5, 5)).unwrap();
        assert!(smoothed.covariance.trace() < filtered.covariance.trace());
    }

    #[test]
    fn test_singular_residual_covariance() {
        let mut predicted = state_on_plane();
        predicted.covariance = DMatrix::zeros(5, 5);
        let result = filter(&predicted, &measurement(0.0, 0.0, 0.0), &plane_at(0.0));
        assert_eq!(result.unwrap_err(), FitError::SingularMatrix("residual covariance"));
    }
}
