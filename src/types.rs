use serde::{Deserialize, Serialize};
use std::fmt;

/// Hub-assigned load identifier, unique within its domain
pub type LoadId = u32;

/// Room identifier from the hub topology
pub type RoomId = u32;

/// Brightness or position in percent (0-100)
pub type Percent = u8;

/// Device category known to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Light,
    Shade,
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Domain::Light => f.write_str("light"),
            Domain::Shade => f.write_str("shade"),
        }
    }
}

/// Registry key: load ids are only unique per domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceKey {
    pub domain: Domain,
    pub id: LoadId,
}

impl DeviceKey {
    pub fn new(domain: Domain, id: LoadId) -> Self {
        Self { domain, id }
    }

    pub fn light(id: LoadId) -> Self {
        Self::new(Domain::Light, id)
    }

    pub fn shade(id: LoadId) -> Self {
        Self::new(Domain::Shade, id)
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.domain, self.id)
    }
}

/// Light capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LightKind {
    /// On/off only
    Plain,
    /// Adjustable brightness
    Dimmer,
    /// Brightness plus hue and saturation
    Rgb,
}

impl LightKind {
    pub fn is_dimmable(self) -> bool {
        matches!(self, LightKind::Dimmer | LightKind::Rgb)
    }

    pub fn is_rgb(self) -> bool {
        self == LightKind::Rgb
    }
}

/// Light load and its last-known state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Light {
    pub id: LoadId,
    pub display_name: String,

    /// Room lookup key, resolved through the registry
    pub area: Option<RoomId>,

    pub kind: LightKind,

    /// Brightness 0-100; power is derived from it
    pub brightness: Percent,

    /// Hue 0-360, meaningful for rgb lights only
    pub hue: u16,

    /// Saturation 0-100, meaningful for rgb lights only
    pub saturation: Percent,

    /// Last non-zero brightness, used when powering back on
    #[serde(skip)]
    pub(crate) last_brightness: Option<Percent>,
}

impl Light {
    pub fn new(id: LoadId, display_name: impl Into<String>, kind: LightKind) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            area: None,
            kind,
            brightness: 0,
            hue: 0,
            saturation: 0,
            last_brightness: None,
        }
    }

    pub fn with_area(mut self, area: Option<RoomId>) -> Self {
        self.area = area;
        self
    }

    pub fn key(&self) -> DeviceKey {
        DeviceKey::light(self.id)
    }

    /// A light is on iff its brightness is above zero
    pub fn power(&self) -> bool {
        self.brightness > 0
    }

    pub(crate) fn set_brightness(&mut self, brightness: Percent) {
        self.brightness = brightness;
        if brightness > 0 {
            self.last_brightness = Some(brightness);
        }
    }
}

/// Inferred shade motion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementState {
    Stopped,
    Opening,
    Closing,
}

/// Shade load and its last-known state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shade {
    pub id: LoadId,
    pub display_name: String,

    /// Room lookup key, resolved through the registry
    pub area: Option<RoomId>,

    /// Position 0-100, 0 is closed
    pub position: Percent,

    pub movement: MovementState,

    /// Bumped on every position update; a settle timer only fires for its own generation
    #[serde(skip)]
    pub(crate) settle_generation: u64,
}

impl Shade {
    pub fn new(id: LoadId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            area: None,
            position: 0,
            movement: MovementState::Stopped,
            settle_generation: 0,
        }
    }

    pub fn with_area(mut self, area: Option<RoomId>) -> Self {
        self.area = area;
        self
    }

    pub fn key(&self) -> DeviceKey {
        DeviceKey::shade(self.id)
    }
}

/// Room record from the hub topology
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,

    /// Area id used by light loads in this room
    pub lights_area: Option<u32>,

    /// Area id used by shade loads in this room
    pub shades_area: Option<u32>,
}

/// Snapshot of an rgb light's color state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightState {
    pub power: bool,
    pub brightness: Percent,
    pub hue: u16,
    pub saturation: Percent,
}

impl From<&Light> for LightState {
    fn from(light: &Light) -> Self {
        Self {
            power: light.power(),
            brightness: light.brightness,
            hue: light.hue,
            saturation: light.saturation,
        }
    }
}
