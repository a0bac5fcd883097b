//! Connect to a processor and print every device change.
//!
//! Usage: `cargo run --example monitor -- <host> [port]`
//! (or set `CRESTRON_HOST` / `CRESTRON_PORT`).

use crestron_hub::{DeviceChange, HubClient, HubConfig, HubError, DEFAULT_PORT};
use std::env;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let mut args = env::args().skip(1);
    let host = args
        .next()
        .or_else(|| env::var("CRESTRON_HOST").ok())
        .ok_or("usage: monitor <host> [port]")?;
    let port = match args.next().or_else(|| env::var("CRESTRON_PORT").ok()) {
        Some(port) => port.parse()?,
        None => DEFAULT_PORT,
    };

    let client = HubClient::connect(HubConfig::new(host, port)).await?;

    println!("Rooms:");
    for room in client.rooms() {
        println!("  {} ({})", room.name, room.id);
    }
    println!("Lights:");
    for light in client.list_lights() {
        println!("  {:>5}  {} [{:?}]", light.id, light.display_name, light.kind);
    }
    println!("Shades:");
    for shade in client.list_shades() {
        println!("  {:>5}  {}", shade.id, shade.display_name);
    }

    let mut changes = client.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            change = changes.recv() => match change {
                Ok(DeviceChange::Light { id, brightness }) => {
                    println!("light {} -> {}%", id, brightness);
                }
                Ok(DeviceChange::Shade { id, position, movement }) => {
                    println!("shade {} -> {}% ({:?})", id, position, movement);
                }
                Ok(other) => println!("{:?}", other),
                Err(HubError::MissedChanges(missed)) => eprintln!("missed {} changes", missed),
                Err(e) => {
                    eprintln!("{}", e);
                    break;
                }
            },
        }
    }

    client.shutdown().await;
    Ok(())
}
