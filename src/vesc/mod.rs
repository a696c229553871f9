// VESC motor control core
//
// Provides:
// - CAN frame codec for commands and status packets
// - Telemetry cache with staleness rule
// - Tachometer-driven position controller
// - Keep-alive command repeater
// - Orchestrator tying them together behind set/get operations

pub mod codec;
mod control;
pub mod pid;
pub mod repeater;
pub mod telemetry;

/// Bus address of one motor controller
pub type MotorId = u8;

pub use codec::{CanFrame, CodecError, CommandKind, TelemetryUpdate};
pub use control::{CommandError, FrameSink, MotorControl, MotorKind, MotorRegistry, MotorStatus};
pub use pid::{PidGains, PositionController};
pub use repeater::{CommandRepeater, OutgoingCommand};
pub use telemetry::{TelemetryCache, TelemetryField, TelemetrySample};
