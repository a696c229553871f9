// Orchestrates codec, telemetry cache, position controllers and repeater
//
// Every entry point is synchronous and takes the current time and a frame
// sink explicitly, so the caller decides how callbacks are serialized and
// where frames go.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use super::MotorId;
use super::codec::{self, CanFrame, CodecError, CommandKind, DUTY_CYCLE_SCALE};
use super::pid::{PidGains, PositionController};
use super::repeater::{CommandRepeater, OutgoingCommand};
use super::telemetry::{TelemetryCache, TelemetryField, TelemetrySample};

/// Anything that can put a frame on the bus
pub trait FrameSink {
    fn send(&mut self, frame: CanFrame);
}

impl FrameSink for Vec<CanFrame> {
    fn send(&mut self, frame: CanFrame) {
        self.push(frame);
    }
}

/// Quantity an operator can set or query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorKind {
    Velocity,
    DutyCycle,
    Position,
}

impl MotorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MotorKind::Velocity => "velocity",
            MotorKind::DutyCycle => "duty_cycle",
            MotorKind::Position => "position",
        }
    }

    fn field(self) -> TelemetryField {
        match self {
            MotorKind::Velocity => TelemetryField::Velocity,
            MotorKind::DutyCycle => TelemetryField::DutyCycle,
            MotorKind::Position => TelemetryField::Position,
        }
    }
}

impl FromStr for MotorKind {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "velocity" => Ok(MotorKind::Velocity),
            "duty_cycle" => Ok(MotorKind::DutyCycle),
            "position" => Ok(MotorKind::Position),
            other => Err(CommandError::UnknownKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("Unknown motor command type: '{0}'")]
    UnknownKind(String),

    #[error("Telemetry for motor {motor_id} is stale or missing")]
    StaleTelemetry { motor_id: MotorId },

    #[error("Motor {motor_id} has no position controller")]
    PositionUnsupported { motor_id: MotorId },
}

/// Per-motor state: telemetry, replayed commands and position controllers
#[derive(Debug, Default)]
pub struct MotorRegistry {
    telemetry: TelemetryCache,
    repeater: CommandRepeater,
    controllers: BTreeMap<MotorId, PositionController>,
}

impl MotorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a position controller for each configured motor
    pub fn with_position_control(gains: impl IntoIterator<Item = (MotorId, PidGains)>) -> Self {
        Self {
            controllers: gains
                .into_iter()
                .map(|(id, gains)| (id, PositionController::new(gains)))
                .collect(),
            ..Self::default()
        }
    }

    pub fn telemetry(&self) -> &TelemetryCache {
        &self.telemetry
    }

    pub fn repeater(&self) -> &CommandRepeater {
        &self.repeater
    }

    pub fn controller(&self, motor_id: MotorId) -> Option<&PositionController> {
        self.controllers.get(&motor_id)
    }

    fn is_holding(&self, motor_id: MotorId) -> bool {
        self.controller(motor_id).is_some_and(PositionController::is_active)
    }
}

/// Snapshot of one motor for status reporting
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorStatus {
    pub motor_id: MotorId,
    pub sample: TelemetrySample,
    pub fresh: bool,
    pub holding: bool,
}

pub struct MotorControl {
    registry: MotorRegistry,
    stale_threshold: Duration,
}

impl MotorControl {
    pub fn new(registry: MotorRegistry, stale_threshold: Duration) -> Self {
        Self {
            registry,
            stale_threshold,
        }
    }

    pub fn registry(&self) -> &MotorRegistry {
        &self.registry
    }

    /// Handle a set request by command type name
    pub fn set_motor(
        &mut self,
        motor_id: MotorId,
        kind: &str,
        value: f32,
        bus: &mut impl FrameSink,
    ) -> Result<(), CommandError> {
        let kind = kind.parse::<MotorKind>().inspect_err(|e| {
            error!("Rejected SET for motor {}: {}", motor_id, e);
        })?;
        self.set(motor_id, kind, value, bus)
    }

    pub fn set(
        &mut self,
        motor_id: MotorId,
        kind: MotorKind,
        value: f32,
        bus: &mut impl FrameSink,
    ) -> Result<(), CommandError> {
        match kind {
            MotorKind::DutyCycle => self.set_duty_cycle(motor_id, value, bus),
            MotorKind::Velocity => self.set_velocity(motor_id, value as i32, bus),
            MotorKind::Position => self.set_position(motor_id, value)?,
        }
        Ok(())
    }

    /// Set percent power in [-1, 1]; out of range values are clamped
    pub fn set_duty_cycle(&mut self, motor_id: MotorId, percent_power: f32, bus: &mut impl FrameSink) {
        let raw = codec::duty_cycle_to_raw(percent_power);
        self.send_direct(motor_id, CommandKind::DutyCycle, raw, bus);
        debug!(
            "Setting the duty cycle of CAN ID {} to {}",
            motor_id,
            percent_power.clamp(-1.0, 1.0)
        );
    }

    /// Set velocity in RPM
    pub fn set_velocity(&mut self, motor_id: MotorId, rpm: i32, bus: &mut impl FrameSink) {
        self.send_direct(motor_id, CommandKind::Velocity, rpm, bus);
        debug!("Setting the RPM of CAN ID {} to {}", motor_id, rpm);
    }

    /// Hold a rotation in degrees. Output is produced as tachometer frames arrive.
    pub fn set_position(&mut self, motor_id: MotorId, degrees: f32) -> Result<(), CommandError> {
        let controller = self
            .registry
            .controllers
            .get_mut(&motor_id)
            .ok_or(CommandError::PositionUnsupported { motor_id })?;
        controller.set_target_rotation(degrees);
        debug!(
            "Setting the position of CAN ID {} to {} degrees ({} steps)",
            motor_id,
            degrees,
            controller.target()
        );
        Ok(())
    }

    /// Duty cycle and velocity commands take over from position hold and are kept alive
    fn send_direct(&mut self, motor_id: MotorId, kind: CommandKind, raw: i32, bus: &mut impl FrameSink) {
        if let Some(controller) = self.registry.controllers.get_mut(&motor_id) {
            controller.deactivate();
        }

        let frame = codec::encode_command(motor_id, kind, raw);
        bus.send(frame);
        self.registry.repeater.remember(
            motor_id,
            OutgoingCommand {
                id: frame.id,
                payload: raw,
            },
        );
    }

    /// Handle a get request by command type name
    pub fn get_motor(&self, motor_id: MotorId, kind: &str, now: Instant) -> Result<f32, CommandError> {
        let kind = kind.parse::<MotorKind>().inspect_err(|e| {
            error!("Rejected GET for motor {}: {}", motor_id, e);
        })?;
        self.get(motor_id, kind, now)
    }

    pub fn get(&self, motor_id: MotorId, kind: MotorKind, now: Instant) -> Result<f32, CommandError> {
        self.registry
            .telemetry
            .read(motor_id, kind.field(), now, self.stale_threshold)
            .ok_or_else(|| {
                error!("GET {} for CAN ID {} read stale data", kind.as_str(), motor_id);
                CommandError::StaleTelemetry { motor_id }
            })
    }

    /// Handle one inbound status frame.
    ///
    /// Undersized frames are dropped without touching any state. A tachometer
    /// reading for a motor holding position triggers a control step and sends
    /// its correction immediately.
    pub fn handle_frame(
        &mut self,
        id: u32,
        data: &[u8],
        now: Instant,
        bus: &mut impl FrameSink,
    ) -> Result<(), CodecError> {
        let status = codec::decode_status(id, data).inspect_err(|e| {
            warn!("Dropping status frame 0x{:08X}: {}", id, e);
        })?;
        let motor_id = status.motor_id;

        self.registry.telemetry.record(motor_id, &status.update, now);
        debug!(
            "Received status frame {} from CAN ID {}: {:?}",
            status.status, motor_id, status.update
        );

        let Some(position) = status.update.position else {
            return Ok(());
        };
        let Some(controller) = self.registry.controllers.get_mut(&motor_id) else {
            return Ok(());
        };
        if let Some(output) = controller.step(position) {
            let raw = (output * DUTY_CYCLE_SCALE) as i32;
            bus.send(codec::encode_command(motor_id, CommandKind::DutyCycle, raw));
        }
        Ok(())
    }

    /// Replay the last duty cycle or velocity command of every motor
    pub fn repeat_commands(&self, bus: &mut impl FrameSink) -> usize {
        let mut sent = 0;
        for frame in self.registry.repeater.frames() {
            bus.send(frame);
            sent += 1;
        }
        sent
    }

    /// Status of every motor that has reported telemetry
    pub fn statuses(&self, now: Instant) -> impl Iterator<Item = MotorStatus> + '_ {
        self.registry.telemetry.iter().map(move |(motor_id, sample)| MotorStatus {
            motor_id,
            sample: *sample,
            fresh: sample.is_fresh(now, self.stale_threshold),
            holding: self.registry.is_holding(motor_id),
        })
    }
}
