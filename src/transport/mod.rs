// Bus transports
//
// Inbound frames from any transport are pushed into one channel drained by
// the runtime loop; outbound frames go through `CanTx`.

pub mod bridge;
pub mod slcan;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{error, info, warn};
use zenoh::pubsub::Publisher;

use crate::messages::CanFrameMsg;
use crate::vesc::CanFrame;

pub use slcan::{SlcanBus, SlcanError};

// Outbound frames buffered for the SLCAN writer thread
const SLCAN_WRITE_QUEUE_DEPTH: usize = 64;

/// Outbound side of the selected transport
///
/// The SLCAN variant only queues; serial writes happen on the writer thread.
pub enum CanTx<'a> {
    Zenoh(Publisher<'a>),
    Slcan(mpsc::Sender<CanFrame>),
}

impl CanTx<'_> {
    pub async fn send(&mut self, frame: &CanFrame) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        match self {
            CanTx::Zenoh(publisher) => {
                let json = serde_json::to_string(&CanFrameMsg::from(frame))?;
                publisher.put(json).await?;
            }
            CanTx::Slcan(writer) => match writer.try_send(*frame) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => return Err("SLCAN write queue full".into()),
                Err(TrySendError::Closed(_)) => return Err("SLCAN writer stopped".into()),
            },
        }
        Ok(())
    }
}

/// Read frames from the adapter on a dedicated thread
pub fn spawn_slcan_reader(mut reader: SlcanBus, frames: mpsc::Sender<CanFrame>) {
    std::thread::spawn(move || {
        info!("SLCAN reader started");
        loop {
            match reader.read_frame() {
                Ok(Some(frame)) => {
                    if frames.blocking_send(frame).is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!("SLCAN reader stopped: {}", e);
                    break;
                }
            }
        }
    });
}

/// Write queued frames to the adapter on a dedicated thread
pub fn spawn_slcan_writer(mut writer: SlcanBus) -> mpsc::Sender<CanFrame> {
    let (tx, mut rx) = mpsc::channel::<CanFrame>(SLCAN_WRITE_QUEUE_DEPTH);
    std::thread::spawn(move || {
        info!("SLCAN writer started");
        while let Some(frame) = rx.blocking_recv() {
            if let Err(e) = writer.send(&frame) {
                warn!("Failed to write frame 0x{:X}: {}", frame.id, e);
            }
        }
        info!("SLCAN writer stopped");
    });
    tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vesc::codec::{self, CommandKind};

    #[tokio::test]
    async fn test_slcan_send_queues_without_blocking() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut can_tx = CanTx::Slcan(tx);
        let frame = codec::encode_command(8, CommandKind::DutyCycle, 50_000);

        can_tx.send(&frame).await.unwrap();
        // Queue full: the send fails at once instead of waiting on the writer
        assert!(can_tx.send(&frame).await.is_err());
        assert_eq!(rx.try_recv().unwrap(), frame);
    }

    #[tokio::test]
    async fn test_slcan_send_after_writer_stopped() {
        let (tx, rx) = mpsc::channel(4);
        let mut can_tx = CanTx::Slcan(tx);
        drop(rx);

        let frame = codec::encode_command(8, CommandKind::Velocity, 1000);
        let err = can_tx.send(&frame).await.unwrap_err();
        assert!(err.to_string().contains("stopped"));
    }
}
