// VESC CAN frame codec
//
// Commands: extended id = motor id + command offset, value big-endian in bytes 0-3.
// Status frames: extended id = (status << 8) | motor id.

use super::MotorId;

/// Number of payload bytes a command actually uses
pub const COMMAND_DLC: u8 = 4;

/// Scale between percent power in [-1, 1] and the duty-cycle command value
pub const DUTY_CYCLE_SCALE: f32 = 100_000.0;

/// Status packet carrying RPM and duty cycle
pub const STATUS_RPM_DUTY: u8 = 9;
/// Status packet carrying the tachometer count
pub const STATUS_TACHOMETER: u8 = 27;

/// Command kinds understood by the motor controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    DutyCycle,
    Velocity,
}

impl CommandKind {
    /// Offset added to the motor id to form the extended CAN id
    pub const fn id_offset(self) -> u32 {
        match self {
            CommandKind::DutyCycle => 0x000,
            CommandKind::Velocity => 0x300,
        }
    }
}

/// A raw extended CAN frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    pub id: u32,
    pub dlc: u8,
    pub data: [u8; 8],
}

impl CanFrame {
    /// The bytes covered by the data length code
    pub fn payload(&self) -> &[u8] {
        &self.data[..usize::from(self.dlc.min(8))]
    }
}

/// Fields carried by one status frame. Unset fields leave the cached value alone.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TelemetryUpdate {
    pub duty_cycle: Option<f32>,
    pub velocity: Option<f32>,
    pub position: Option<i32>,
}

impl TelemetryUpdate {
    pub fn is_empty(&self) -> bool {
        self.duty_cycle.is_none() && self.velocity.is_none() && self.position.is_none()
    }
}

/// A decoded status frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusFrame {
    pub motor_id: MotorId,
    pub status: u8,
    pub update: TelemetryUpdate,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("Status {status} frame from motor {motor_id} too short: expected {expected} bytes, got {actual}")]
    FrameTooShort {
        motor_id: MotorId,
        status: u8,
        expected: usize,
        actual: usize,
    },
}

/// Build the frame for a command
pub fn encode_command(motor_id: MotorId, kind: CommandKind, value: i32) -> CanFrame {
    encode_raw(u32::from(motor_id) + kind.id_offset(), value)
}

/// Build a command frame from an already-offset extended id
pub fn encode_raw(id: u32, value: i32) -> CanFrame {
    let mut data = [0u8; 8];
    data[..4].copy_from_slice(&value.to_be_bytes());
    CanFrame {
        id,
        dlc: COMMAND_DLC,
        data,
    }
}

/// Convert percent power to the duty-cycle command value, clamping to [-1, 1]
pub fn duty_cycle_to_raw(percent_power: f32) -> i32 {
    (percent_power.clamp(-1.0, 1.0) * DUTY_CYCLE_SCALE) as i32
}

/// Split an extended id into (motor id, status code)
pub fn split_status_id(id: u32) -> (MotorId, u8) {
    ((id & 0xFF) as MotorId, ((id >> 8) & 0xFF) as u8)
}

/// Decode a status frame into the fields it carries
pub fn decode_status(id: u32, data: &[u8]) -> Result<StatusFrame, CodecError> {
    let (motor_id, status) = split_status_id(id);

    let require = |expected: usize| {
        if data.len() < expected {
            Err(CodecError::FrameTooShort {
                motor_id,
                status,
                expected,
                actual: data.len(),
            })
        } else {
            Ok(())
        }
    };

    let mut update = TelemetryUpdate::default();
    match status {
        STATUS_RPM_DUTY => {
            require(8)?;
            update.velocity = Some(read_i32(data) as f32);
            // Tenths of a percent
            update.duty_cycle = Some(f32::from(u16::from_be_bytes([data[6], data[7]])) / 10.0);
        }
        STATUS_TACHOMETER => {
            require(4)?;
            update.position = Some(read_i32(data));
        }
        _ => {}
    }

    Ok(StatusFrame {
        motor_id,
        status,
        update,
    })
}

fn read_i32(data: &[u8]) -> i32 {
    i32::from_be_bytes([data[0], data[1], data[2], data[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_id(status: u8, motor_id: MotorId) -> u32 {
        (u32::from(status) << 8) | u32::from(motor_id)
    }

    #[test]
    fn test_duty_cycle_command_layout() {
        let frame = encode_command(5, CommandKind::DutyCycle, duty_cycle_to_raw(0.5));
        assert_eq!(frame.id, 5);
        assert_eq!(frame.dlc, 4);
        // 50000 = 0x0000C350
        assert_eq!(frame.payload(), &[0x00, 0x00, 0xC3, 0x50]);
        assert_eq!(&frame.data[4..], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_velocity_command_offset() {
        let frame = encode_command(8, CommandKind::Velocity, -1200);
        assert_eq!(frame.id, 0x308);
        assert_eq!(frame.payload(), &(-1200i32).to_be_bytes());
    }

    #[test]
    fn test_duty_cycle_clamped() {
        assert_eq!(duty_cycle_to_raw(1.5), 100_000);
        assert_eq!(duty_cycle_to_raw(-7.0), -100_000);
        assert_eq!(duty_cycle_to_raw(0.25), 25_000);
    }

    #[test]
    fn test_zero_duty_round_trip_through_status_frame() {
        let raw = duty_cycle_to_raw(0.0);
        let command = encode_command(8, CommandKind::DutyCycle, raw);

        let status = decode_status(status_id(STATUS_RPM_DUTY, 8), &command.data).unwrap();
        assert_eq!(status.motor_id, 8);
        assert_eq!(status.update.velocity, Some(raw as f32));
    }

    #[test]
    fn test_decode_rpm_and_duty() {
        let mut data = [0u8; 8];
        data[..4].copy_from_slice(&(-3000i32).to_be_bytes());
        data[6..].copy_from_slice(&255u16.to_be_bytes());

        let status = decode_status(status_id(STATUS_RPM_DUTY, 12), &data).unwrap();
        assert_eq!(status.motor_id, 12);
        assert_eq!(status.status, STATUS_RPM_DUTY);
        assert_eq!(status.update.velocity, Some(-3000.0));
        assert_eq!(status.update.duty_cycle, Some(25.5));
        assert_eq!(status.update.position, None);
    }

    #[test]
    fn test_decode_tachometer() {
        let data = (-42i32).to_be_bytes();
        let status = decode_status(status_id(STATUS_TACHOMETER, 3), &data).unwrap();
        assert_eq!(status.update.position, Some(-42));
        assert_eq!(status.update.velocity, None);
        assert_eq!(status.update.duty_cycle, None);
    }

    #[test]
    fn test_unknown_status_carries_nothing() {
        let status = decode_status(status_id(16, 3), &[1, 2, 3]).unwrap();
        assert_eq!(status.status, 16);
        assert!(status.update.is_empty());
    }

    #[test]
    fn test_short_frames_rejected() {
        let err = decode_status(status_id(STATUS_RPM_DUTY, 4), &[0; 6]).unwrap_err();
        assert_eq!(
            err,
            CodecError::FrameTooShort {
                motor_id: 4,
                status: STATUS_RPM_DUTY,
                expected: 8,
                actual: 6,
            }
        );
        assert!(decode_status(status_id(STATUS_TACHOMETER, 4), &[0; 3]).is_err());
    }

    #[test]
    fn test_split_ignores_high_bits() {
        assert_eq!(split_status_id(0x1F00_1B2A), (0x2A, 27));
    }
}
