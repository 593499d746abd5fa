//! User-facing status line.
//!
//! Recomputed every frame by the step controller and read by display
//! collaborators; rendering never blocks and the text is never parsed by
//! anything else.

/// Hard cap on the rendered status line, in bytes (ASCII only).
pub const STATUS_MAX_LEN: usize = 60;

/// Smoothing factor for the frame-rate estimate.
const RATE_ALPHA: f32 = 0.1;

#[derive(Debug)]
pub struct StatusReport {
    label: &'static str,
    rate_hz: f32,
    reconnect_in_s: Option<f32>,
    degraded: bool,
    last_error: Option<&'static str>,
}

impl StatusReport {
    pub fn new() -> Self {
        StatusReport {
            label: "idle",
            rate_hz: 0.0,
            reconnect_in_s: None,
            degraded: false,
            last_error: None,
        }
    }

    /// Fold one frame interval into the smoothed rate estimate.
    pub fn record_frame(&mut self, elapsed_real_s: f32) {
        if elapsed_real_s <= 0.0 {
            return;
        }
        let instant = 1.0 / elapsed_real_s;
        if self.rate_hz == 0.0 {
            self.rate_hz = instant;
        } else {
            self.rate_hz += RATE_ALPHA * (instant - self.rate_hz);
        }
    }

    pub fn rate_hz(&self) -> f32 {
        self.rate_hz
    }

    pub fn set_label(&mut self, label: &'static str) {
        self.label = label;
    }

    pub fn set_reconnect_in(&mut self, seconds: Option<f32>) {
        self.reconnect_in_s = seconds;
    }

    pub fn set_degraded(&mut self, degraded: bool) {
        self.degraded = degraded;
    }

    pub fn set_error(&mut self, code: &'static str) {
        self.last_error = Some(code);
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    pub fn last_error(&self) -> Option<&'static str> {
        self.last_error
    }

    /// Render the one-line summary, capped at [`STATUS_MAX_LEN`] bytes.
    pub fn line(&self) -> String {
        let mut s = match self.reconnect_in_s {
            Some(secs) => format!("SITL: reconnect in {secs:.1}s"),
            None if self.label == "idle" => "SITL: idle".to_string(),
            None => format!("SITL: {} {:.1}Hz", self.label, self.rate_hz),
        };
        if self.degraded {
            s.push_str(" [degraded]");
        }
        if let Some(err) = self.last_error {
            s.push_str(" err:");
            s.push_str(err);
        }
        s.truncate(STATUS_MAX_LEN);
        s
    }
}

impl Default for StatusReport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_line() {
        let status = StatusReport::new();
        assert_eq!(status.line(), "SITL: idle");
    }

    #[test]
    fn line_never_exceeds_cap() {
        let mut status = StatusReport::new();
        status.set_label("lockstep");
        status.set_degraded(true);
        status.set_error("link lost");
        status.set_reconnect_in(Some(12345.6789));
        for _ in 0..100 {
            status.record_frame(1.0 / 60.0);
        }
        assert!(status.line().len() <= STATUS_MAX_LEN);
    }

    #[test]
    fn rate_estimate_converges() {
        let mut status = StatusReport::new();
        for _ in 0..200 {
            status.record_frame(1.0 / 60.0);
        }
        assert!((status.rate_hz() - 60.0).abs() < 1.0);
    }

    #[test]
    fn zero_interval_frames_are_ignored() {
        let mut status = StatusReport::new();
        status.record_frame(0.0);
        status.record_frame(-1.0);
        assert_eq!(status.rate_hz(), 0.0);
    }

    #[test]
    fn error_code_is_sticky_until_cleared() {
        let mut status = StatusReport::new();
        status.set_label("free-run");
        status.set_error("timeout");
        assert!(status.line().contains("err:timeout"));
        status.clear_error();
        assert!(!status.line().contains("err:"));
    }
}
