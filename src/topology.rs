//! Room and load topology served by the processor's HTTP config endpoint.
//!
//! The document is the processor's XML system config rendered as JSON:
//! `{"SysConfig": {"Room": [...], "LLoad": [...], "SLoad": [...]}}`.

use crate::error::{HubError, Result};
use crate::types::{Light, LightKind, LoadId, Room, RoomId, Shade};
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeSet;

/// Rooms, lights and shades known to the processor
#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub rooms: Vec<Room>,
    pub lights: Vec<Light>,
    pub shades: Vec<Shade>,
}

#[derive(Debug, Deserialize)]
struct ConfigDocument {
    #[serde(rename = "SysConfig")]
    sys_config: SysConfig,
}

#[derive(Debug, Deserialize)]
struct SysConfig {
    #[serde(rename = "Room", default, deserialize_with = "one_or_many")]
    rooms: Vec<ConfigRoom>,

    #[serde(rename = "LLoad", default, deserialize_with = "one_or_many")]
    light_loads: Vec<ConfigLightLoad>,

    #[serde(rename = "SLoad", default, deserialize_with = "one_or_many")]
    shade_loads: Vec<ConfigShadeLoad>,
}

#[derive(Debug, Deserialize)]
struct ConfigRoom {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "RoomID")]
    room_id: RoomId,
    #[serde(rename = "LightsID", default)]
    lights_id: Option<u32>,
    #[serde(rename = "ShadesID", default)]
    shades_id: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ConfigLightLoad {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "AreaID")]
    area_id: u32,
    #[serde(rename = "LoadID")]
    load_id: LoadId,
    #[serde(rename = "RGB", default)]
    rgb: bool,
    #[serde(rename = "Dimmable", default)]
    dimmable: bool,
}

#[derive(Debug, Deserialize)]
struct ConfigShadeLoad {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "AreaID")]
    area_id: u32,
    #[serde(rename = "LoadID")]
    load_id: LoadId,
}

/// XML-to-JSON conversion renders a single child as an object instead of an array
fn one_or_many<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        Many(Vec<T>),
        One(T),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::Many(items) => items,
        OneOrMany::One(item) => vec![item],
    })
}

impl Topology {
    /// Parse the processor's config document
    pub fn from_json(text: &str) -> Result<Self> {
        let document: ConfigDocument =
            serde_json::from_str(text).map_err(|e| HubError::InvalidTopology(e.to_string()))?;
        Ok(Self::from_sys_config(document.sys_config))
    }

    fn from_sys_config(config: SysConfig) -> Self {
        let rooms: Vec<Room> = config
            .rooms
            .into_iter()
            .map(|room| Room {
                id: room.room_id,
                name: room.name,
                lights_area: room.lights_id,
                shades_area: room.shades_id,
            })
            .collect();

        let mut seen = BTreeSet::new();
        let mut lights = Vec::new();
        for load in config.light_loads {
            if !seen.insert(load.load_id) {
                tracing::warn!("Duplicate light load {} ({}), skipping", load.load_id, load.name);
                continue;
            }
            let kind = if load.rgb {
                LightKind::Rgb
            } else if load.dimmable {
                LightKind::Dimmer
            } else {
                LightKind::Plain
            };
            let area = rooms
                .iter()
                .find(|room| room.lights_area == Some(load.area_id))
                .map(|room| room.id);
            lights.push(Light::new(load.load_id, load.name, kind).with_area(area));
        }

        seen.clear();
        let mut shades = Vec::new();
        for load in config.shade_loads {
            if !seen.insert(load.load_id) {
                tracing::warn!("Duplicate shade load {} ({}), skipping", load.load_id, load.name);
                continue;
            }
            let area = rooms
                .iter()
                .find(|room| room.shades_area == Some(load.area_id))
                .map(|room| room.id);
            shades.push(Shade::new(load.load_id, load.name).with_area(area));
        }

        Self {
            rooms,
            lights,
            shades,
        }
    }
}

/// Fetch and parse the topology document
///
/// Nothing is returned unless the whole document parsed, so callers never
/// see a partial topology.
pub async fn fetch_topology(client: &Client, url: &str) -> Result<Topology> {
    tracing::debug!("Getting config from {}", url);

    let text = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;

    let topology = Topology::from_json(&text)?;
    tracing::info!(
        "Got config with {} rooms, {} lights, {} shades",
        topology.rooms.len(),
        topology.lights.len(),
        topology.shades.len()
    );
    Ok(topology)
}
