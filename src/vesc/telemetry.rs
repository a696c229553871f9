// Latest telemetry per motor, with a freshness rule on reads

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use super::MotorId;
use super::codec::TelemetryUpdate;

/// Default age after which telemetry is no longer reported
pub const DEFAULT_STALE_THRESHOLD: Duration = Duration::from_secs(1);

/// Telemetry fields that can be read back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryField {
    DutyCycle,
    Velocity,
    Position,
}

/// Most recent telemetry for one motor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetrySample {
    /// Percent
    pub duty_cycle: f32,
    /// RPM
    pub velocity: f32,
    /// Raw tachometer steps
    pub position: i32,
    pub captured_at: Instant,
}

impl TelemetrySample {
    fn zeroed(captured_at: Instant) -> Self {
        Self {
            duty_cycle: 0.0,
            velocity: 0.0,
            position: 0,
            captured_at,
        }
    }

    pub fn field(&self, field: TelemetryField) -> f32 {
        match field {
            TelemetryField::DutyCycle => self.duty_cycle,
            TelemetryField::Velocity => self.velocity,
            TelemetryField::Position => self.position as f32,
        }
    }

    /// Whether the sample is younger than `threshold` at `now`
    pub fn is_fresh(&self, now: Instant, threshold: Duration) -> bool {
        now.saturating_duration_since(self.captured_at) < threshold
    }

    fn apply(&mut self, update: &TelemetryUpdate) {
        if let Some(duty_cycle) = update.duty_cycle {
            self.duty_cycle = duty_cycle;
        }
        if let Some(velocity) = update.velocity {
            self.velocity = velocity;
        }
        if let Some(position) = update.position {
            self.position = position;
        }
    }
}

#[derive(Debug, Default)]
pub struct TelemetryCache {
    samples: BTreeMap<MotorId, TelemetrySample>,
}

impl TelemetryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a decoded update and refresh the arrival time, even if no field changed
    pub fn record(&mut self, motor_id: MotorId, update: &TelemetryUpdate, now: Instant) {
        let sample = self
            .samples
            .entry(motor_id)
            .or_insert_with(|| TelemetrySample::zeroed(now));
        sample.apply(update);
        sample.captured_at = sample.captured_at.max(now);
    }

    /// Read one field, or `None` if the motor is unknown or its telemetry is stale
    pub fn read(
        &self,
        motor_id: MotorId,
        field: TelemetryField,
        now: Instant,
        threshold: Duration,
    ) -> Option<f32> {
        self.samples
            .get(&motor_id)
            .filter(|sample| sample.is_fresh(now, threshold))
            .map(|sample| sample.field(field))
    }

    pub fn sample(&self, motor_id: MotorId) -> Option<&TelemetrySample> {
        self.samples.get(&motor_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (MotorId, &TelemetrySample)> {
        self.samples.iter().map(|(&id, sample)| (id, sample))
    }
}
