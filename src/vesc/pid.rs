// Position hold controller driven by tachometer feedback
//
// Output is a duty cycle in [-1, 1]. The controller only runs while holding a
// target; any direct duty-cycle or velocity command drops it back to idle.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Tachometer steps for one full output rotation
pub const STEPS_PER_REVOLUTION: i32 = 42;

/// Errors within this many steps produce no correction
pub const DEAD_BAND: i32 = 1;

/// Gains for one position controller
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub kp: f32,
    #[serde(default)]
    pub ki: f32,
    #[serde(default)]
    pub kd: f32,
    /// Configured but not part of the control law yet
    #[serde(default)]
    pub gravity_compensation: f32,
}

impl PidGains {
    pub fn new(kp: f32, ki: f32, kd: f32) -> Self {
        Self {
            kp,
            ki,
            kd,
            gravity_compensation: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PositionController {
    gains: PidGains,
    target: i32,
    prev_error: i32,
    total_error: i32,
    active: bool,
}

impl PositionController {
    pub fn new(gains: PidGains) -> Self {
        Self {
            gains,
            target: 0,
            prev_error: 0,
            total_error: 0,
            active: false,
        }
    }

    /// Start (or keep) holding the given rotation.
    ///
    /// Error history is carried over from the previous target.
    pub fn set_target_rotation(&mut self, degrees: f32) {
        self.active = true;
        self.target = degrees_to_steps(degrees);
    }

    /// Stop holding. Error history is left as is and ignored until reactivated.
    pub fn deactivate(&mut self) {
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn target(&self) -> i32 {
        self.target
    }

    pub fn gains(&self) -> &PidGains {
        &self.gains
    }

    pub fn previous_error(&self) -> i32 {
        self.prev_error
    }

    pub fn accumulated_error(&self) -> i32 {
        self.total_error
    }

    /// Run one control step against the measured tachometer position.
    ///
    /// Returns `None` while idle. Inside the dead band the integral still
    /// accumulates but the output is zero and the previous error is kept.
    pub fn step(&mut self, current: i32) -> Option<f32> {
        if !self.active {
            return None;
        }

        let error = self.target.saturating_sub(current);
        self.total_error = self.total_error.saturating_add(error);

        if error.abs() <= DEAD_BAND {
            return Some(0.0);
        }

        let derivative = error.saturating_sub(self.prev_error);
        let raw = error as f32 * self.gains.kp
            + self.total_error as f32 * self.gains.ki
            + derivative as f32 * self.gains.kd;
        self.prev_error = error;

        // inf - inf
        if raw.is_nan() {
            return Some(0.0);
        }
        let output = raw.clamp(-1.0, 1.0);

        debug!(
            "PID step: target={}, current={}, error={}, total={}, output={}",
            self.target, current, error, self.total_error, output
        );
        Some(output)
    }
}

/// Convert degrees to the nearest whole tachometer step
pub fn degrees_to_steps(degrees: f32) -> i32 {
    (f64::from(degrees) / 360.0 * f64::from(STEPS_PER_REVOLUTION)).round() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holding(gains: PidGains, target_steps: i32) -> PositionController {
        let mut pid = PositionController::new(gains);
        pid.set_target_rotation(target_steps as f32 * 360.0 / STEPS_PER_REVOLUTION as f32);
        assert_eq!(pid.target(), target_steps);
        pid
    }

    #[test]
    fn test_degrees_to_steps_rounds() {
        assert_eq!(degrees_to_steps(0.0), 0);
        assert_eq!(degrees_to_steps(360.0), 42);
        assert_eq!(degrees_to_steps(-360.0), -42);
        // 10 / 360 * 42 = 1.1667
        assert_eq!(degrees_to_steps(10.0), 1);
        // 90 / 360 * 42 = 10.5
        assert_eq!(degrees_to_steps(90.0), 11);
        assert_eq!(degrees_to_steps(80.0), 9);
    }

    #[test]
    fn test_idle_produces_nothing() {
        let mut pid = PositionController::new(PidGains::new(1.0, 0.0, 0.0));
        assert!(!pid.is_active());
        assert_eq!(pid.step(100), None);
    }

    #[test]
    fn test_dead_band_outputs_zero() {
        let gains = PidGains::new(0.5, 0.1, 0.2);
        for current in [9, 10, 11] {
            let mut pid = holding(gains, 10);
            assert_eq!(pid.step(current), Some(0.0), "current={}", current);
        }
    }

    #[test]
    fn test_dead_band_still_integrates() {
        // Integral keeps accumulating inside the dead band and previous error is untouched.
        let mut pid = holding(PidGains::new(0.5, 0.1, 0.2), 10);
        pid.step(9);
        pid.step(9);
        assert_eq!(pid.accumulated_error(), 2);
        assert_eq!(pid.previous_error(), 0);
    }

    #[test]
    fn test_output_always_clamped() {
        let gains = PidGains::new(1.0e30, -1.0e30, 1.0e30);
        let mut pid = holding(gains, 42);
        for current in [-100_000, -5, 0, 40, 44, 500, i32::MAX, i32::MIN] {
            let output = pid.step(current).unwrap();
            assert!((-1.0..=1.0).contains(&output), "output {} out of range", output);
        }
    }

    #[test]
    fn test_proportional_only() {
        let mut pid = holding(PidGains::new(0.01, 0.0, 0.0), 11);
        let output = pid.step(0).unwrap();
        assert!((output - 0.11).abs() < 1e-6);

        let output = pid.step(22).unwrap();
        assert!((output + 0.11).abs() < 1e-6);
    }

    #[test]
    fn test_repeated_steps_grow_integral() {
        let mut pid = holding(PidGains::new(0.01, 0.001, 0.05), 20);

        let mut last_total = pid.accumulated_error();
        let mut outputs = Vec::new();
        for _ in 0..5 {
            outputs.push(pid.step(10).unwrap());
            assert!(pid.accumulated_error() > last_total);
            last_total = pid.accumulated_error();
            assert_eq!(pid.previous_error(), 10);
        }
        assert_eq!(pid.accumulated_error(), 50);

        // After the first step the derivative term vanishes and only the integral moves the output.
        let step = outputs[2] - outputs[1];
        assert!((step - 0.01).abs() < 1e-5);
        assert!((outputs[3] - outputs[2] - step).abs() < 1e-5);
    }

    #[test]
    fn test_retarget_keeps_error_history() {
        let mut pid = holding(PidGains::new(0.01, 0.0, 0.0), 20);
        pid.step(0);
        assert_eq!(pid.accumulated_error(), 20);
        assert_eq!(pid.previous_error(), 20);

        pid.set_target_rotation(0.0);
        assert!(pid.is_active());
        assert_eq!(pid.accumulated_error(), 20);
        assert_eq!(pid.previous_error(), 20);
    }

    #[test]
    fn test_deactivate_and_resume() {
        let mut pid = holding(PidGains::new(0.01, 0.0, 0.0), 20);
        pid.deactivate();
        assert_eq!(pid.step(0), None);
        pid.set_target_rotation(0.0);
        assert_eq!(pid.step(0), Some(0.0));
    }

    #[test]
    fn test_gravity_compensation_is_not_applied() {
        // The gain is accepted but has no effect on the output yet.
        let mut plain = holding(PidGains::new(0.01, 0.0, 0.0), 20);
        let mut compensated = holding(
            PidGains {
                gravity_compensation: 0.3,
                ..PidGains::new(0.01, 0.0, 0.0)
            },
            20,
        );
        assert_eq!(plain.step(5), compensated.step(5));
        assert_eq!(compensated.gains().gravity_compensation, 0.3);
    }
}
