//! JSON export of a simulation run.
//!
//! One record per generated track: the truth parameters, the refitted state
//! at the interaction point (if the refit succeeded) and the hit bookkeeping.

use crate::detector::BarrelConfig;
use kaltrack_core::track_state::TrackState;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;

/// Position of a hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitPosition {
    pub id: u64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl HitPosition {
    pub fn new(id: u64, pos: Vector3<f64>) -> Self {
        Self {
            id,
            x: pos.x,
            y: pos.y,
            z: pos.z,
        }
    }
}

/// Standardised residuals (fitted - truth) / sigma of the refitted state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pulls {
    pub d0: f64,
    pub omega: f64,
    pub z0: f64,
    pub tan_lambda: f64,
}

impl Pulls {
    pub fn between(fitted: &TrackState, truth: &TrackState) -> Self {
        let pull = |i: usize, a: f64, b: f64| (a - b) / fitted.covariance_at(i, i).sqrt();
        Self {
            d0: pull(0, fitted.d0, truth.d0),
            omega: pull(2, fitted.omega, truth.omega),
            z0: pull(3, fitted.z0, truth.z0),
            tan_lambda: pull(4, fitted.tan_lambda, truth.tan_lambda),
        }
    }

    pub fn max_abs(&self) -> f64 {
        [self.d0, self.omega, self.z0, self.tan_lambda]
            .iter()
            .fold(0.0, |m, p| m.max(p.abs()))
    }
}

/// One generated track and its refit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackRecord {
    pub track_id: u64,
    pub truth: TrackState,
    pub hits: Vec<HitPosition>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub fitted: Option<TrackState>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pulls: Option<Pulls>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub outliers: Vec<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunExport {
    /// Seed used
    pub seed: u64,

    pub detector: BarrelConfig,

    /// All tracks
    pub tracks: Vec<TrackRecord>,

    /// Number of failed refits
    pub failed: usize,
}

impl RunExport {
    /// Creates a new export container.
    pub fn new(seed: u64, detector: BarrelConfig) -> Self {
        Self {
            seed,
            detector,
            tracks: Vec::new(),
            failed: 0,
        }
    }

    /// Adds a track record.
    pub fn add_track(&mut self, record: TrackRecord) {
        if record.fitted.is_none() {
            self.failed += 1;
        }
        self.tracks.push(record);
    }

    /// RMS of the curvature pulls over successful refits.
    pub fn omega_pull_rms(&self) -> Option<f64> {
        let pulls: Vec<f64> = self.tracks.iter().filter_map(|t| t.pulls).map(|p| p.omega).collect();
        if pulls.is_empty() {
            return None;
        }
        Some((pulls.iter().map(|p| p * p).sum::<f64>() / pulls.len() as f64).sqrt())
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> Result<(), crate::SimError> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
