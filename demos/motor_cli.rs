// One-shot operator client for the motor/set and motor/get services
//
// Usage:
//   cargo run --example motor_cli -- set 8 duty_cycle 0.2
//   cargo run --example motor_cli -- set 8 position 90
//   cargo run --example motor_cli -- get 8 velocity
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;

#[derive(Debug, Parser)]
#[command(about = "Send a single set/get request to the motor runtime")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Command a motor: velocity (RPM), duty_cycle (-1..1) or position (degrees)
    Set { can_id: u8, kind: String, value: f32 },
    /// Read back velocity, duty_cycle or position
    Get { can_id: u8, kind: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let (topic, request) = match Cli::parse().command {
        Command::Set { can_id, kind, value } => (
            "motor/set",
            json!({ "can_id": can_id, "type": kind, "value": value }),
        ),
        Command::Get { can_id, kind } => ("motor/get", json!({ "can_id": can_id, "type": kind })),
    };

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("{} <- {}", topic, request);
    let replies = session.get(topic).payload(request.to_string()).await?;

    let mut answered = false;
    while let Ok(reply) = replies.recv_async().await {
        answered = true;
        match reply.result() {
            Ok(sample) => {
                let payload = sample.payload().to_bytes();
                println!("{}", String::from_utf8_lossy(&payload));
            }
            Err(err) => {
                let payload = err.payload().to_bytes();
                eprintln!("Error reply: {}", String::from_utf8_lossy(&payload));
            }
        }
    }

    if !answered {
        eprintln!("No runtime answered on {}", topic);
        std::process::exit(1);
    }
    Ok(())
}
