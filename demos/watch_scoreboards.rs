//! Basic example: discover nearby scoreboards and print live scores
//!
//! Run with: cargo run --example watch_scoreboards
//!
//! Set SCOREBOARD_STRICT_FILTER=1 to only connect to devices that
//! advertise the scoreboard service UUID.

use scoreboard_ble::{Event, HubConfig, Result, ScoreboardHub};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("warn,scoreboard_ble=debug")
        .init();

    let hub = ScoreboardHub::new(HubConfig::from_env()).await?;
    let mut events = hub.subscribe();
    hub.start();

    println!("Scanning for scoreboards (Ctrl-C to stop)...\n");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    Event::DeviceAdded { device } => {
                        println!("+ {} ({}) playing {}", device.name, device.id, device.game_name);
                    }
                    Event::DeviceUpdated { device } => {
                        println!("  {}: {} [{}]", device.name, device.score, device.game_name);
                    }
                    Event::DeviceRemoved { id } => {
                        println!("- {} disconnected", id);
                    }
                }
            }
        }
    }

    println!("\nShutting down ({} devices connected)...", hub.device_count());
    hub.stop().await;
    Ok(())
}
