// Keep-alive for fire-and-forget commands
//
// VESC firmware drops duty-cycle and RPM commands after a receive timeout, so
// the last one sent to each motor is replayed on a fixed period.

use std::collections::BTreeMap;
use std::time::Duration;

use super::MotorId;
use super::codec::{self, CanFrame};

/// Default replay period
pub const DEFAULT_REPEAT_PERIOD: Duration = Duration::from_millis(500);

/// The last command told to the bus for one motor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutgoingCommand {
    pub id: u32,
    pub payload: i32,
}

impl OutgoingCommand {
    pub fn frame(&self) -> CanFrame {
        codec::encode_raw(self.id, self.payload)
    }
}

#[derive(Debug, Default)]
pub struct CommandRepeater {
    slots: BTreeMap<MotorId, OutgoingCommand>,
}

impl CommandRepeater {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored command for a motor
    pub fn remember(&mut self, motor_id: MotorId, command: OutgoingCommand) {
        self.slots.insert(motor_id, command);
    }

    pub fn get(&self, motor_id: MotorId) -> Option<&OutgoingCommand> {
        self.slots.get(&motor_id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Frames to replay, one per motor that ever got a command
    pub fn frames(&self) -> impl Iterator<Item = CanFrame> + '_ {
        self.slots.values().map(OutgoingCommand::frame)
    }
}
