// Event loop: bus frames, operator requests, keep-alive and status ticks
//
// Every callback runs on this one task, so the motor state needs no locking.
// Frames produced by a callback are flushed to the transport before the next
// event is handled.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{info, warn};

use crate::config::{
    Config, TOPIC_MOTOR_GET, TOPIC_MOTOR_SET, TOPIC_MOTOR_STATE, TransportKind, can_receive_topic,
    can_transmit_topic,
};
use crate::messages::{MotorGetRequest, MotorGetResponse, MotorSetRequest, MotorSetResponse, MotorState};
use crate::transport::{self, CanTx, SlcanBus, bridge};
use crate::vesc::{CanFrame, MotorControl, MotorId, MotorRegistry};

// Inbound frames buffered between the transport and the loop
const FRAME_QUEUE_DEPTH: usize = 256;

pub struct Runtime {
    control: MotorControl,
    outbox: Vec<CanFrame>,
    freshness: BTreeMap<MotorId, bool>,
}

impl Runtime {
    pub fn new(config: &Config) -> Self {
        let registry = MotorRegistry::with_position_control(config.position_gains());
        Self {
            control: MotorControl::new(registry, config.stale_threshold()),
            outbox: Vec::new(),
            freshness: BTreeMap::new(),
        }
    }

    /// Process one inbound bus frame
    fn on_frame(&mut self, frame: &CanFrame, now: Instant) {
        // Decode errors are logged by the orchestrator and the frame dropped
        let _ = self
            .control
            .handle_frame(frame.id, frame.payload(), now, &mut self.outbox);
    }

    /// Process a JSON set request
    fn on_set(&mut self, payload: &[u8]) -> MotorSetResponse {
        let request = match serde_json::from_slice::<MotorSetRequest>(payload) {
            Ok(request) => request,
            Err(e) => {
                warn!("Failed to parse SET request: {}", e);
                return MotorSetResponse {
                    success: false,
                    error: Some(e.to_string()),
                };
            }
        };

        match self
            .control
            .set_motor(request.can_id, &request.kind, request.value, &mut self.outbox)
        {
            Ok(()) => MotorSetResponse {
                success: true,
                error: None,
            },
            Err(e) => MotorSetResponse {
                success: false,
                error: Some(e.to_string()),
            },
        }
    }

    /// Process a JSON get request
    fn on_get(&self, payload: &[u8], now: Instant) -> MotorGetResponse {
        let result = serde_json::from_slice::<MotorGetRequest>(payload)
            .map_err(|e| {
                warn!("Failed to parse GET request: {}", e);
                e.to_string()
            })
            .and_then(|request| {
                self.control
                    .get_motor(request.can_id, &request.kind, now)
                    .map_err(|e| e.to_string())
            });

        match result {
            Ok(data) => MotorGetResponse {
                success: true,
                data: Some(data),
                error: None,
            },
            Err(error) => MotorGetResponse {
                success: false,
                data: None,
                error: Some(error),
            },
        }
    }

    /// Queue the keep-alive frames
    fn on_repeat(&mut self) {
        self.control.repeat_commands(&mut self.outbox);
    }

    /// Status of every known motor, warning once when one goes stale
    fn on_control_tick(&mut self, now: Instant) -> Vec<MotorState> {
        let states: Vec<MotorState> = self.control.statuses(now).map(|s| MotorState::from(&s)).collect();

        for state in &states {
            let was_fresh = self.freshness.insert(state.can_id, state.fresh);
            if was_fresh == Some(true) && !state.fresh {
                warn!("Motor {} telemetry is stale", state.can_id);
            } else if was_fresh == Some(false) && state.fresh {
                info!("Motor {} telemetry resumed", state.can_id);
            }
        }
        states
    }
}

/// Log a failed reply or publication; the loop keeps serving
fn warn_on_error<T, E: Display>(what: &str, result: Result<T, E>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Failed to {}: {}", what, e);
            None
        }
    }
}

fn to_json<T: Serialize>(what: &str, value: &T) -> Option<String> {
    warn_on_error(what, serde_json::to_string(value))
}

pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    let (frame_tx, mut frame_rx) = mpsc::channel::<CanFrame>(FRAME_QUEUE_DEPTH);

    let mut can_tx = match config.transport {
        TransportKind::Zenoh => {
            let tx_topic = can_transmit_topic(&config.can_transmit);
            let rx_topic = can_receive_topic(&config.can_receive);
            let subscriber = session.declare_subscriber(rx_topic.clone()).await?;
            tokio::spawn(bridge::forward_frames(subscriber, frame_tx));
            info!("CAN bridge: transmit on {}, receive on {}", tx_topic, rx_topic);
            CanTx::Zenoh(session.declare_publisher(tx_topic).await?)
        }
        TransportKind::Slcan => {
            info!(
                "Opening SLCAN adapter on {} ({} baud, CAN {} bit/s)",
                config.serial_port, config.serial_baudrate, config.can_bitrate
            );
            let bus = SlcanBus::open(&config.serial_port, config.serial_baudrate, config.can_bitrate)?;
            transport::spawn_slcan_reader(bus.try_clone()?, frame_tx);
            CanTx::Slcan(transport::spawn_slcan_writer(bus))
        }
    };

    info!("Setting up operator services...");
    let set_queryable = session.declare_queryable(TOPIC_MOTOR_SET).await?;
    let get_queryable = session.declare_queryable(TOPIC_MOTOR_GET).await?;
    let pub_state = session.declare_publisher(TOPIC_MOTOR_STATE).await?;

    let mut runtime = Runtime::new(&config);
    let mut repeat_tick = interval(config.repeat_period());
    let mut control_tick = interval(config.control_period());

    info!(
        "Runtime started: {} transport, {}ms keep-alive, {}ms stale threshold, {}ms status period",
        config.transport,
        config.repeat_period_ms,
        config.stale_threshold_ms,
        config.control_period_ms
    );
    for (id, gains) in config.position_gains() {
        info!("Position control on CAN ID {}: {:?}", id, gains);
    }
    info!("Serving: {}, {}", TOPIC_MOTOR_SET, TOPIC_MOTOR_GET);

    loop {
        tokio::select! {
            frame = frame_rx.recv() => {
                let Some(frame) = frame else {
                    return Err("CAN transport closed".into());
                };
                runtime.on_frame(&frame, Instant::now());
            }
            Ok(query) = set_queryable.recv_async() => {
                let payload = query.payload().map(|p| p.to_bytes().into_owned()).unwrap_or_default();
                let response = runtime.on_set(&payload);
                if let Some(json) = to_json("encode SET response", &response) {
                    warn_on_error("reply to SET request", query.reply(query.key_expr().clone(), json).await);
                }
            }
            Ok(query) = get_queryable.recv_async() => {
                let payload = query.payload().map(|p| p.to_bytes().into_owned()).unwrap_or_default();
                let response = runtime.on_get(&payload, Instant::now());
                if let Some(json) = to_json("encode GET response", &response) {
                    warn_on_error("reply to GET request", query.reply(query.key_expr().clone(), json).await);
                }
            }
            _ = repeat_tick.tick() => {
                runtime.on_repeat();
            }
            _ = control_tick.tick() => {
                for state in runtime.on_control_tick(Instant::now()) {
                    if let Some(json) = to_json("encode motor state", &state) {
                        warn_on_error("publish motor state", pub_state.put(json).await);
                    }
                }
            }
        }

        // Sends are fire-and-forget; the repeater covers lost commands
        for frame in runtime.outbox.drain(..) {
            warn_on_error(&format!("send frame 0x{:X}", frame.id), can_tx.send(&frame).await);
        }
    }
}
