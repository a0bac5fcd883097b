//! Rust library for controlling lights and shades behind a Crestron control processor
//!
//! This library provides an async API for the processor's control socket. It supports:
//!
//! - Device discovery from the processor's configuration service
//! - A persistent, self-reconnecting control link
//! - Light level, power and color control
//! - Shade positioning with inferred movement state
//! - Real-time device change subscriptions
//! - The length-prefixed JSON, newline JSON and legacy join wire formats
//!
//! # Quick Start
//!
//! ```no_run
//! use crestron_hub::{HubClient, HubConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Fetch the topology and open the control link
//!     let client = HubClient::connect(HubConfig::new("192.168.0.249", 41900)).await?;
//!
//!     for light in client.list_lights() {
//!         println!("Found light: {} ({})", light.display_name, light.id);
//!     }
//!
//!     // Control devices
//!     client.set_light_level(10, 75).await?;
//!     client.set_shade_position(1032, 100).await?;
//!
//!     // Subscribe to state pushed by the hub
//!     let mut changes = client.subscribe();
//!     while let Ok(change) = changes.recv().await {
//!         println!("Change: {:?}", change);
//!         break; // Just show one change
//!     }
//!
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Known Topology
//!
//! If the device list is known up front, skip the configuration service:
//!
//! ```no_run
//! use crestron_hub::{HubClient, HubConfig, Light, LightKind, Topology};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let topology = Topology {
//!         lights: vec![Light::new(10, "Kitchen Pendant", LightKind::Rgb)],
//!         ..Topology::default()
//!     };
//!     let client = HubClient::with_topology(HubConfig::new("192.168.0.249", 41900), topology).await?;
//!     client.set_light_color(10, 120, 100, 50).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! The library is organized into several layers:
//!
//! - **Client**: Facade wiring the layers below together
//! - **Topology**: Device discovery over HTTP
//! - **Registry**: Last-known device state
//! - **Router**: Applies hub events to the registry and builds commands
//! - **Connection**: Reconnecting TCP transport
//! - **Codec**: Wire framing for the supported formats
//! - **Protocol**: Event and join structures

mod client;
mod codec;
mod color;
mod config;
mod connection;
mod error;
mod legacy;
mod protocol;
mod registry;
mod router;
mod subscription;
mod topology;
mod types;

// Public exports
pub use client::HubClient;
pub use codec::{parse_event, CodecKind, HubCodec, MAX_FRAME_LEN};
pub use color::hsl_to_rgb;
pub use config::{HubConfig, LightPolicy, PowerOnLevel, DEFAULT_CONFIG_PORT, DEFAULT_PORT};
pub use connection::{LinkState, Transport};
pub use error::{HubError, Result};
pub use protocol::{CoreDomain, EventTag, Frame, HubEvent, Join};
pub use registry::{DeviceRegistry, TopologyDiff};
pub use subscription::{DeviceChange, StateReceiver};
pub use topology::{fetch_topology, Topology};
pub use types::{
    DeviceKey, Domain, Light, LightKind, LightState, LoadId, MovementState, Percent, Room,
    RoomId, Shade,
};
