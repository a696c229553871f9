// Keyboard duty-cycle teleop for one motor: Up/Down step, Space stop, Q quit
//
// Usage: cargo run --example keyboard_duty -- [can_id]
//
// Only changes are sent; the runtime keeps the last duty cycle alive.
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

const DUTY_STEP: f32 = 0.05;
const MAX_DUTY: f32 = 0.5; // keep well below full power from the keyboard

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let can_id: u8 = match std::env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => 8,
    };

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Driving CAN ID {}", can_id);
    info!("Controls: Up/Down=duty +/-{}, Space=stop, Q=quit", DUTY_STEP);

    enable_raw_mode()?;
    let result = run_teleop(&session, can_id).await;
    disable_raw_mode()?;

    // Leave the motor stopped
    send_duty(&session, can_id, 0.0).await?;
    result
}

async fn run_teleop(
    session: &zenoh::Session,
    can_id: u8,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut duty = 0.0f32;

    loop {
        if !event::poll(Duration::from_millis(50))? {
            continue;
        }
        let Event::Key(KeyEvent { code, kind, .. }) = event::read()? else {
            continue;
        };
        if kind != KeyEventKind::Press && kind != KeyEventKind::Repeat {
            continue;
        }

        let next = match code {
            KeyCode::Up => (duty + DUTY_STEP).min(MAX_DUTY),
            KeyCode::Down => (duty - DUTY_STEP).max(-MAX_DUTY),
            KeyCode::Char(' ') => 0.0,
            KeyCode::Char('q') | KeyCode::Esc => break,
            _ => continue,
        };

        if next != duty {
            duty = next;
            send_duty(session, can_id, duty).await?;
        }
    }

    Ok(())
}

async fn send_duty(
    session: &zenoh::Session,
    can_id: u8,
    duty: f32,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let request = json!({ "can_id": can_id, "type": "duty_cycle", "value": duty });
    let replies = session.get("motor/set").payload(request.to_string()).await?;

    match replies.recv_async().await {
        Ok(reply) => match reply.result() {
            Ok(sample) => {
                let body: serde_json::Value = serde_json::from_slice(&sample.payload().to_bytes())?;
                if body["success"] == true {
                    info!("Duty cycle: {:.2}", duty);
                } else {
                    warn!("Runtime rejected duty cycle {:.2}: {}", duty, body["error"]);
                }
            }
            Err(_) => warn!("Error reply for duty cycle {:.2}", duty),
        },
        Err(_) => warn!("No runtime answered"),
    }
    Ok(())
}
