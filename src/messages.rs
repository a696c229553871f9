// Message types exchanged over zenoh

use serde::{Deserialize, Serialize};

use crate::vesc::{CanFrame, MotorId, MotorStatus};

/// One CAN frame as carried on the bridge topics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanFrameMsg {
    pub id: u32,
    #[serde(default)]
    pub is_extended: bool,
    #[serde(default)]
    pub is_rtr: bool,
    #[serde(default)]
    pub is_error: bool,
    pub dlc: u8,
    pub data: Vec<u8>,
}

impl From<&CanFrame> for CanFrameMsg {
    fn from(frame: &CanFrame) -> Self {
        Self {
            id: frame.id,
            is_extended: true,
            is_rtr: false,
            is_error: false,
            dlc: frame.dlc,
            data: frame.data.to_vec(),
        }
    }
}

impl CanFrameMsg {
    /// Extended data frame, or `None` for anything the status decoder should not see
    pub fn to_frame(&self) -> Option<CanFrame> {
        if !self.is_extended || self.is_rtr || self.is_error {
            return None;
        }
        let len = usize::from(self.dlc).min(self.data.len()).min(8);
        let mut data = [0u8; 8];
        data[..len].copy_from_slice(&self.data[..len]);
        Some(CanFrame {
            id: self.id,
            dlc: len as u8,
            data,
        })
    }
}

/// Operator request to command a motor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotorSetRequest {
    pub can_id: MotorId,
    #[serde(rename = "type")]
    pub kind: String,
    pub value: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotorSetResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Operator request to read back motor telemetry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotorGetRequest {
    pub can_id: MotorId,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotorGetResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Periodic per-motor status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotorState {
    pub can_id: MotorId,
    pub duty_cycle: f32,
    pub velocity: f32,
    pub position: i32,
    pub fresh: bool,
    pub holding: bool,
}

impl From<&MotorStatus> for MotorState {
    fn from(status: &MotorStatus) -> Self {
        Self {
            can_id: status.motor_id,
            duty_cycle: status.sample.duty_cycle,
            velocity: status.sample.velocity,
            position: status.sample.position,
            fresh: status.fresh,
            holding: status.holding,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vesc::codec::{self, CommandKind};

    #[test]
    fn test_outgoing_frame_is_extended() {
        let frame = codec::encode_command(8, CommandKind::Velocity, 1000);
        let msg = CanFrameMsg::from(&frame);
        assert_eq!(msg.id, 0x308);
        assert!(msg.is_extended);
        assert_eq!(msg.dlc, 4);
        assert_eq!(msg.data.len(), 8);
    }

    #[test]
    fn test_short_bridge_frame_keeps_its_length() {
        let msg: CanFrameMsg = serde_json::from_str(
            r#"{"id": 6920, "is_extended": true, "dlc": 8, "data": [0, 0, 0, 5]}"#,
        )
        .unwrap();
        let frame = msg.to_frame().unwrap();
        // Truncated data must not be zero-filled up to the dlc
        assert_eq!(frame.payload(), &[0, 0, 0, 5]);
    }

    #[test]
    fn test_non_data_frames_ignored() {
        let mut msg = CanFrameMsg::from(&codec::encode_raw(0x1B08, 1));
        assert!(msg.to_frame().is_some());
        msg.is_rtr = true;
        assert!(msg.to_frame().is_none());
        msg.is_rtr = false;
        msg.is_extended = false;
        assert!(msg.to_frame().is_none());
    }

    #[test]
    fn test_request_uses_type_field() {
        let req: MotorSetRequest =
            serde_json::from_str(r#"{"can_id": 5, "type": "duty_cycle", "value": 0.5}"#).unwrap();
        assert_eq!(req.can_id, 5);
        assert_eq!(req.kind, "duty_cycle");

        let resp = MotorGetResponse {
            success: false,
            data: None,
            error: Some("stale".to_string()),
        };
        assert_eq!(
            serde_json::to_string(&resp).unwrap(),
            r#"{"success":false,"error":"stale"}"#
        );
    }
}
