//! External track-state record and its conversion to and from the internal
//! helix convention.
//!
//! The record uses (d0, phi, omega, z0, tan_lambda) about a reference point,
//! with phi the momentum azimuth, d0 signed opposite to `d_rho`, and omega the
//! geometric curvature. Its covariance is packed lower-triangular: element
//! (i, j), j <= i, is stored at `i * (i + 1) / 2 + j`.

use crate::config::to_base_range;
use crate::helix::{curvature_factor, Helix, N_HELIX_PARAMS};
use crate::kalman::StateEstimate;
use nalgebra::{DMatrix, Vector3};
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_2;

/// Number of entries in a packed 5x5 covariance.
pub const PACKED_COVARIANCE_LEN: usize = 15;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackState {
    pub d0: f64,
    pub phi: f64,
    pub omega: f64,
    pub z0: f64,
    pub tan_lambda: f64,
    pub covariance: [f64; PACKED_COVARIANCE_LEN],
    pub reference_point: Vector3<f64>,
    pub chi2: f64,
    pub ndf: i32,
}

/// Packed index of element (i, j) of a symmetric matrix.
#[inline]
pub fn packed_index(i: usize, j: usize) -> usize {
    let (i, j) = if j > i { (j, i) } else { (i, j) };
    i * (i + 1) / 2 + j
}

impl TrackState {
    /// Covariance element (i, j).
    pub fn covariance_at(&self, i: usize, j: usize) -> f64 {
        self.covariance[packed_index(i, j)]
    }

    /// Transverse momentum (GeV) in field `bz`, `None` without curvature.
    pub fn transverse_momentum(&self, bz: f64) -> Option<f64> {
        if self.omega == 0.0 {
            None
        } else {
            Some((curvature_factor(bz) / self.omega).abs())
        }
    }
}

/// Sign and scale of each record parameter relative to the helix parameter.
fn parameter_scales(bz: f64) -> [f64; N_HELIX_PARAMS] {
    [-1.0, 1.0, curvature_factor(bz), 1.0, 1.0]
}

/// Converts an internal estimate into an external record.
pub fn encode(estimate: &StateEstimate, chi2: f64, ndf: i32) -> TrackState {
    let helix = &estimate.helix;
    let scale = parameter_scales(helix.bz);

    let mut covariance = [0.0; PACKED_COVARIANCE_LEN];
    for i in 0..N_HELIX_PARAMS {
        for j in 0..=i {
            covariance[packed_index(i, j)] = scale[i] * scale[j] * estimate.covariance[(i, j)];
        }
    }

    TrackState {
        d0: -helix.d_rho,
        phi: to_base_range(helix.phi0 + FRAC_PI_2),
        omega: helix.kappa * scale[2],
        z0: helix.dz,
        tan_lambda: helix.tan_lambda,
        covariance,
        reference_point: helix.pivot,
        chi2,
        ndf,
    }
}

/// Converts an external record into an internal estimate of dimension `dim`.
///
/// A time parameter, if requested, starts at zero with `time_variance`.
pub fn decode(state: &TrackState, bz: f64, dim: usize, time_variance: f64) -> StateEstimate {
    let scale = parameter_scales(bz);
    let helix = Helix::new(
        [
            -state.d0,
            state.phi - FRAC_PI_2,
            state.omega / scale[2],
            state.z0,
            state.tan_lambda,
        ],
        state.reference_point,
        bz,
    );

    let mut covariance = DMatrix::zeros(dim, dim);
    for i in 0..N_HELIX_PARAMS {
        for j in 0..=i {
            let value = state.covariance[packed_index(i, j)] / (scale[i] * scale[j]);
            covariance[(i, j)] = value;
            covariance[(j, i)] = value;
        }
    }
    let time = (dim > N_HELIX_PARAMS).then(|| {
        covariance[(N_HELIX_PARAMS, N_HELIX_PARAMS)] = time_variance;
        0.0
    });

    StateEstimate::new(helix, time, covariance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn estimate(bz: f64) -> StateEstimate {
        let helix = Helix::new([0.25, 1.2, -0.8, 3.0, 0.4], Vector3::new(1.0, 2.0, 3.0), bz);
        let mut covariance = DMatrix::from_fn(5, 5, |i, j| 0.01 * (1 + i + j) as f64);
        for i in 0..5 {
            covariance[(i, i)] = 1.0 + i as f64;
        }
        StateEstimate::new(helix, None, covariance)
    }

    #[test]
    fn test_packed_layout() {
        assert_eq!(packed_index(0, 0), 0);
        assert_eq!(packed_index(1, 0), 1);
        assert_eq!(packed_index(1, 1), 2);
        assert_eq!(packed_index(4, 4), 14);
        assert_eq!(packed_index(2, 4), packed_index(4, 2));
    }

    #[test]
    fn test_encode_conventions() {
        let bz = 3.5;
        let record = encode(&estimate(bz), 4.0, 7);
        assert_relative_eq!(record.d0, -0.25);
        assert_relative_eq!(record.phi, 1.2 + PI / 2.0, epsilon = 1e-12);
        assert_relative_eq!(record.omega, -0.8 * 2.99792458e-4 * bz, epsilon = 1e-15);
        assert_relative_eq!(record.covariance_at(0, 1), -0.02, epsilon = 1e-15);
        assert_relative_eq!(record.covariance_at(2, 2), 3.0 * (2.99792458e-4 * bz).powi(2), epsilon = 1e-15);
        assert_eq!(record.ndf, 7);
        assert_eq!(record.reference_point, Vector3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_phi_wraps_into_base_range() {
        let helix = Helix::new([0.0, 3.0, 0.1, 0.0, 0.0], Vector3::zeros(), 1.0);
        let record = encode(&StateEstimate::seed(helix, 5, 1.0), 0.0, 0);
        assert_relative_eq!(record.phi, 3.0 + PI / 2.0 - 2.0 * PI, epsilon = 1e-12);
    }

    #[test]
    fn test_decode_inverts_encode() {
        let original = estimate(2.0);
        let decoded = decode(&encode(&original, 0.0, 0), 2.0, 5, 1e6);
        assert_relative_eq!(decoded.vector(), original.vector(), epsilon = 1e-12);
        assert_relative_eq!(decoded.covariance, original.covariance, epsilon = 1e-12);
    }

    #[test]
    fn test_decode_six_dimensional() {
        let record = encode(&estimate(2.0), 0.0, 0);
        let decoded = decode(&record, 2.0, 6, 1e6);
        assert_eq!(decoded.time, Some(0.0));
        assert_relative_eq!(decoded.covariance[(5, 5)], 1e6);
        assert_relative_eq!(decoded.covariance[(5, 0)], 0.0);
    }

    #[test]
    fn test_record_json_round_trip() {
        let record = encode(&estimate(3.5), 12.5, 4);
        let json = serde_json::to_string(&record).unwrap();
        let parsed: TrackState = serde_json::from_str(&json).unwrap();

        assert_relative_eq!(parsed.d0, record.d0, max_relative = 1e-15);
        assert_relative_eq!(parsed.phi, record.phi, max_relative = 1e-15);
        assert_relative_eq!(parsed.omega, record.omega, max_relative = 1e-15);
        assert_relative_eq!(parsed.reference_point, record.reference_point);
        for (a, b) in parsed.covariance.iter().zip(record.covariance.iter()) {
            assert_relative_eq!(*a, *b, max_relative = 1e-15);
        }
        assert_eq!(parsed.chi2, 12.5);
        assert_eq!(parsed.ndf, 4);
    }

    #[test]
    fn test_transverse_momentum() {
        let helix = Helix::new([0.0, 0.0, 0.5, 0.0, 0.0], Vector3::zeros(), 3.5);
        let record = encode(&StateEstimate::seed(helix, 5, 1.0), 0.0, 0);
        assert_relative_eq!(record.transverse_momentum(3.5).unwrap(), 2.0, epsilon = 1e-12);
    }
}
