use crate::types::{Domain, LoadId};
use serde::{Deserialize, Serialize};

/// One protocol occurrence on the hub link
///
/// Field names follow the processor's JSON shape exactly:
/// `{requestTo, requestBy, etag, etype, Level, DeviceName, Domain}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubEvent {
    /// Target load id
    #[serde(rename = "requestTo")]
    pub request_to: i64,

    /// Originating load id (carries the load id on hub updates)
    #[serde(rename = "requestBy")]
    pub request_by: i64,

    pub etag: EventTag,

    /// Event subtype
    pub etype: i64,

    /// Numeric payload
    #[serde(rename = "Level")]
    pub level: i64,

    /// Device name, or an axis label such as "R"/"G"/"B" on color commands
    #[serde(rename = "DeviceName", default)]
    pub device_name: String,

    #[serde(rename = "Domain")]
    pub domain: CoreDomain,
}

impl HubEvent {
    /// Create an event with an empty name and zero subtype
    pub fn new(etag: EventTag, domain: CoreDomain, request_to: i64, level: i64) -> Self {
        Self {
            request_to,
            request_by: 0,
            etag,
            etype: 0,
            level,
            device_name: String::new(),
            domain,
        }
    }

    /// Level change for a load
    pub fn level_set(domain: Domain, id: LoadId, level: i64) -> Self {
        Self::new(EventTag::LevelSet, domain.into(), i64::from(id), level)
    }

    /// State query for a load
    pub fn query(domain: Domain, id: LoadId) -> Self {
        Self::new(EventTag::Query, domain.into(), i64::from(id), 0)
    }

    /// Set the originator id
    pub fn with_source(mut self, request_by: i64) -> Self {
        self.request_by = request_by;
        self
    }

    /// Set the name/label field
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.device_name = label.into();
        self
    }

    /// The axis label, if the name field is used as one
    pub fn label(&self) -> Option<&str> {
        if self.device_name.is_empty() {
            None
        } else {
            Some(&self.device_name)
        }
    }
}

/// Event kinds, integer-valued from 1 on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum EventTag {
    Raise,
    Lower,
    On,
    Off,
    Toggle,
    LevelSet,
    Preset,
    Query,
    Update,
    NameChange,
    AreaStatus,
    AreaVc,
    Xml,
    Open,
    Close,
    Stop,
    AreaController,
    Press,
    Release,
    ColorSet,
    StarTwinklePress,
    StarDimmPress,
    /// Tag value this crate does not know about
    Unknown(i64),
}

const EVENT_TAGS: [EventTag; 22] = [
    EventTag::Raise,
    EventTag::Lower,
    EventTag::On,
    EventTag::Off,
    EventTag::Toggle,
    EventTag::LevelSet,
    EventTag::Preset,
    EventTag::Query,
    EventTag::Update,
    EventTag::NameChange,
    EventTag::AreaStatus,
    EventTag::AreaVc,
    EventTag::Xml,
    EventTag::Open,
    EventTag::Close,
    EventTag::Stop,
    EventTag::AreaController,
    EventTag::Press,
    EventTag::Release,
    EventTag::ColorSet,
    EventTag::StarTwinklePress,
    EventTag::StarDimmPress,
];

impl From<i64> for EventTag {
    fn from(value: i64) -> Self {
        usize::try_from(value)
            .ok()
            .and_then(|v| v.checked_sub(1))
            .and_then(|index| EVENT_TAGS.get(index).copied())
            .unwrap_or(EventTag::Unknown(value))
    }
}

impl From<EventTag> for i64 {
    fn from(tag: EventTag) -> Self {
        match tag {
            EventTag::Unknown(value) => value,
            known => EVENT_TAGS
                .iter()
                .position(|t| *t == known)
                .map_or(0, |index| index as i64 + 1),
        }
    }
}

/// Core subsystem an event belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CoreDomain {
    Light,
    Area,
    Shade,
    TouchPanel,
    /// Domain tag this crate does not know about
    Other(String),
}

impl CoreDomain {
    pub fn as_str(&self) -> &str {
        match self {
            CoreDomain::Light => "LightCore",
            CoreDomain::Area => "AreaCore",
            CoreDomain::Shade => "ShadeCore",
            CoreDomain::TouchPanel => "TPCore",
            CoreDomain::Other(tag) => tag,
        }
    }

    /// Registry domain, for the cores that map onto devices
    pub fn device_domain(&self) -> Option<Domain> {
        match self {
            CoreDomain::Light => Some(Domain::Light),
            CoreDomain::Shade => Some(Domain::Shade),
            _ => None,
        }
    }
}

impl From<String> for CoreDomain {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "LightCore" => CoreDomain::Light,
            "AreaCore" => CoreDomain::Area,
            "ShadeCore" => CoreDomain::Shade,
            "TPCore" => CoreDomain::TouchPanel,
            _ => CoreDomain::Other(tag),
        }
    }
}

impl From<CoreDomain> for String {
    fn from(domain: CoreDomain) -> Self {
        match domain {
            CoreDomain::Other(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

impl From<Domain> for CoreDomain {
    fn from(domain: Domain) -> Self {
        match domain {
            Domain::Light => CoreDomain::Light,
            Domain::Shade => CoreDomain::Shade,
        }
    }
}

/// Legacy join value: a numbered digital/analog/serial channel on the processor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Join {
    Digital { join: u16, value: bool },
    Analog { join: u16, value: u16 },
    Serial { join: u16, value: String },
}

impl Join {
    pub fn number(&self) -> u16 {
        match self {
            Join::Digital { join, .. } | Join::Analog { join, .. } | Join::Serial { join, .. } => {
                *join
            }
        }
    }
}

/// Unit produced by the wire codec
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A well-formed domain event
    Event(HubEvent),

    /// A legacy join frame
    Join(Join),

    /// Bytes that were framed but could not be decoded
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_number_tags_from_one() {
        assert_eq!(i64::from(EventTag::Raise), 1);
        assert_eq!(i64::from(EventTag::LevelSet), 6);
        assert_eq!(i64::from(EventTag::Query), 8);
        assert_eq!(i64::from(EventTag::Update), 9);
        assert_eq!(i64::from(EventTag::StarDimmPress), 22);
        assert_eq!(EventTag::from(9), EventTag::Update);
    }

    #[test]
    fn should_keep_unknown_tags() {
        assert_eq!(EventTag::from(0), EventTag::Unknown(0));
        assert_eq!(EventTag::from(23), EventTag::Unknown(23));
        assert_eq!(EventTag::from(-4), EventTag::Unknown(-4));
        assert_eq!(i64::from(EventTag::Unknown(99)), 99);
    }

    #[test]
    fn should_map_core_domains() {
        assert_eq!(CoreDomain::from("ShadeCore".to_string()), CoreDomain::Shade);
        assert_eq!(CoreDomain::Light.device_domain(), Some(Domain::Light));
        assert_eq!(CoreDomain::TouchPanel.device_domain(), None);
        assert_eq!(
            CoreDomain::from("ClimateCore".to_string()),
            CoreDomain::Other("ClimateCore".to_string())
        );
    }

    #[test]
    fn should_serialize_with_processor_field_names() {
        let event = HubEvent::level_set(Domain::Light, 10, 75).with_source(3);
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "requestTo": 10,
                "requestBy": 3,
                "etag": 6,
                "etype": 0,
                "Level": 75,
                "DeviceName": "",
                "Domain": "LightCore"
            })
        );
    }

    #[test]
    fn should_treat_empty_name_as_no_label() {
        let event = HubEvent::query(Domain::Shade, 4);
        assert_eq!(event.label(), None);
        assert_eq!(event.with_label("G").label(), Some("G"));
    }
}
