// CAN frames as JSON on zenoh topics, one message per frame

use tokio::sync::mpsc;
use tracing::{debug, warn};
use zenoh::handlers::FifoChannelHandler;
use zenoh::pubsub::Subscriber;
use zenoh::sample::Sample;

use crate::messages::CanFrameMsg;
use crate::vesc::CanFrame;

/// Parse one bridge payload into a frame the status decoder should see
pub fn decode_payload(payload: &[u8]) -> Option<CanFrame> {
    match serde_json::from_slice::<CanFrameMsg>(payload) {
        Ok(msg) => {
            let frame = msg.to_frame();
            if frame.is_none() {
                debug!("Ignoring non-extended or non-data frame 0x{:X}", msg.id);
            }
            frame
        }
        Err(e) => {
            warn!("Failed to parse CAN frame: {}", e);
            None
        }
    }
}

/// Forward received frames into the runtime until either side closes
pub async fn forward_frames(
    subscriber: Subscriber<FifoChannelHandler<Sample>>,
    frames: mpsc::Sender<CanFrame>,
) {
    while let Ok(sample) = subscriber.recv_async().await {
        let payload = sample.payload().to_bytes();
        if let Some(frame) = decode_payload(&payload) {
            if frames.send(frame).await.is_err() {
                break;
            }
        }
    }
    debug!("CAN bridge subscriber closed");
}
