//! Shared state/command struct definitions used by both the X-Plane plugin
//! and the sitl-protocol codec crate.
//!
//! Field order and sizes are part of the wire protocol — do not reorder.

use serde::{Deserialize, Serialize};

/// Largest channel count a remote autopilot may request.
pub const MAX_CHANNELS: usize = 16;

/// Tolerance for the attitude quaternion unit-norm invariant.
pub const QUAT_NORM_TOLERANCE: f32 = 1e-3;

/// Per-frame capture of the simulator's physical state.
///
/// Built fresh every frame by the step controller, sent once, then dropped.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Monotonic simulation time in seconds.
    pub sim_time_s: f64,
    /// Attitude quaternion [w, x, y, z], unit norm within tolerance.
    pub quaternion: [f32; 4],
    /// Geodetic latitude in degrees, [-90, 90].
    pub latitude_deg: f64,
    /// Geodetic longitude in degrees, [-180, 180].
    pub longitude_deg: f64,
}

impl StateSnapshot {
    /// Absolute deviation of the quaternion norm from 1.
    pub fn quaternion_norm_error(&self) -> f32 {
        let [w, x, y, z] = self.quaternion;
        let norm = (w * w + x * x + y * y + z * z).sqrt();
        (norm - 1.0).abs()
    }

    /// True when the quaternion is a unit quaternion within tolerance.
    pub fn quaternion_is_unit(&self) -> bool {
        self.quaternion_norm_error() <= QUAT_NORM_TOLERANCE
    }

    /// True when latitude and longitude are inside their geodetic ranges.
    pub fn position_in_range(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude_deg)
            && (-180.0..=180.0).contains(&self.longitude_deg)
    }
}

impl Default for StateSnapshot {
    fn default() -> Self {
        Self {
            sim_time_s: 0.0,
            // Identity attitude, not all-zeros, so a default snapshot still
            // satisfies the unit-norm invariant.
            quaternion: [1.0, 0.0, 0.0, 0.0],
            latitude_deg: 0.0,
            longitude_deg: 0.0,
        }
    }
}

/// Normalized actuator outputs received from the remote autopilot.
///
/// Channel count is fixed at session start; values are normalized to
/// [-1, 1]. Consumed once by the step controller, then dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActuatorCommand {
    /// Simulation time the autopilot computed this command for, in seconds.
    pub sim_time_s: f64,
    /// Normalized channel values, one per actuator channel.
    pub channels: Vec<f32>,
}

impl ActuatorCommand {
    /// All-neutral command for `n` channels (every value 0.0).
    pub fn neutral(n: usize) -> Self {
        Self {
            sim_time_s: 0.0,
            channels: vec![0.0; n],
        }
    }

    /// Copy with every channel value clamped into [-1, 1].
    pub fn clamped(&self) -> Self {
        Self {
            sim_time_s: self.sim_time_s,
            channels: self.channels.iter().map(|v| v.clamp(-1.0, 1.0)).collect(),
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
