//! Toy barrel detector.
//!
//! A beryllium beam pipe surrounded by concentric silicon cylinders in a
//! uniform solenoid field. Layer `i` (0-based) carries `LayerId(i + 1)` and
//! `DetElementId(FIRST_ELEMENT + i)`; the beam pipe is layer 0.

use kaltrack_core::{DetElementId, Detector, LayerId, Material, Surface};
use serde::{Deserialize, Serialize};

/// Element id of the innermost silicon layer
pub const FIRST_ELEMENT: u32 = 100;

/// Element id of the beam pipe
pub const BEAM_PIPE_ELEMENT: u32 = 1;

/// Geometry parameters of the toy barrel (lengths in mm, field in Tesla).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarrelConfig {
    pub bz: f64,
    pub beam_pipe_radius: f64,
    pub beam_pipe_thickness: f64,
    pub layer_radii: Vec<f64>,
    pub half_length: f64,
    pub silicon_thickness: f64,
}

impl Default for BarrelConfig {
    fn default() -> Self {
        Self {
            bz: 3.5,
            beam_pipe_radius: 15.0,
            beam_pipe_thickness: 0.5,
            layer_radii: vec![40.0, 80.0, 150.0, 250.0, 350.0, 450.0],
            half_length: 1000.0,
            silicon_thickness: 0.3,
        }
    }
}

impl BarrelConfig {
    /// `n` silicon layers evenly spread between the innermost and outermost
    /// default radii.
    pub fn with_layers(n: usize) -> Self {
        let defaults = Self::default();
        let inner = defaults.layer_radii[0];
        let outer = defaults.layer_radii[defaults.layer_radii.len() - 1];
        let layer_radii = match n {
            0 => Vec::new(),
            1 => vec![inner],
            _ => (0..n)
                .map(|i| inner + (outer - inner) * i as f64 / (n - 1) as f64)
                .collect(),
        };
        Self {
            layer_radii,
            ..defaults
        }
    }

    pub fn with_field(mut self, bz: f64) -> Self {
        self.bz = bz;
        self
    }

    /// Builds the detector.
    pub fn build(&self) -> Detector {
        let mut detector = Detector::new(self.bz);
        let pipe = Surface::cylinder(
            DetElementId(BEAM_PIPE_ELEMENT),
            LayerId(0),
            self.beam_pipe_radius,
            self.half_length,
            Material::beryllium(self.beam_pipe_thickness),
        );
        detector.add_surface(pipe.passive());

        for (i, radius) in self.layer_radii.iter().enumerate() {
            detector.add_surface(Surface::cylinder(
                DetElementId(FIRST_ELEMENT + i as u32),
                LayerId(i as u32 + 1),
                *radius,
                self.half_length,
                Material::silicon(self.silicon_thickness),
            ));
        }
        detector
    }
}
