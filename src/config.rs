//! Hub link configuration.

use crate::codec::CodecKind;
use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Default control socket port on the processor
pub const DEFAULT_PORT: u16 = 41900;

/// Default topology HTTP port (`4171<slot>` with slot 0)
pub const DEFAULT_CONFIG_PORT: u16 = 41710;

/// Brightness used when powering on under [`PowerOnLevel::Full`]
pub const FULL_BRIGHTNESS: u8 = 100;

/// What brightness a light comes back on at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerOnLevel {
    /// The last non-zero brightness seen, or full if none
    #[default]
    Restore,
    /// Always full brightness
    Full,
}

/// Light behaviour the processor leaves up to the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LightPolicy {
    pub power_on: PowerOnLevel,

    /// Reset hue and saturation when brightness drops to zero
    pub clear_color_on_off: bool,
}

/// Configuration for the connection to a Crestron processor.
///
/// Deserializes from the host platform's JSON config, e.g.
/// `{"ipAddress": "192.168.0.249", "port": 41900}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HubConfig {
    /// Processor IP address or host name
    #[serde(alias = "ipAddress")]
    pub host: String,

    /// Control socket port
    pub port: u16,

    /// Topology HTTP port
    pub config_port: u16,

    pub codec: CodecKind,

    /// Delay before reconnecting after the socket drops (`reconnectDelaySecs`)
    #[serde(rename = "reconnectDelaySecs", deserialize_with = "duration_secs")]
    pub reconnect_delay: Duration,

    /// Time without a position update after which a shade counts as stopped (`settleSecs`)
    #[serde(rename = "settleSecs", deserialize_with = "duration_secs")]
    pub settle_interval: Duration,

    /// Pause between startup state queries (`queryIntervalSecs`)
    #[serde(rename = "queryIntervalSecs", deserialize_with = "duration_secs")]
    pub query_interval: Duration,

    /// `requestBy` value stamped on outbound events
    pub client_id: i64,

    /// Sent once after each connect (serial join 1 on the legacy codec)
    pub greeting: Option<String>,

    pub light_policy: LightPolicy,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            config_port: DEFAULT_CONFIG_PORT,
            codec: CodecKind::default(),
            reconnect_delay: Duration::from_secs(10),
            settle_interval: Duration::from_secs(15),
            query_interval: Duration::from_secs(5),
            client_id: 0,
            greeting: None,
            light_policy: LightPolicy::default(),
        }
    }
}

impl HubConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_config_port(mut self, port: u16) -> Self {
        self.config_port = port;
        self
    }

    pub fn with_codec(mut self, codec: CodecKind) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_settle_interval(mut self, interval: Duration) -> Self {
        self.settle_interval = interval;
        self
    }

    pub fn with_query_interval(mut self, interval: Duration) -> Self {
        self.query_interval = interval;
        self
    }

    pub fn with_client_id(mut self, client_id: i64) -> Self {
        self.client_id = client_id;
        self
    }

    pub fn with_greeting(mut self, greeting: impl Into<String>) -> Self {
        self.greeting = Some(greeting.into());
        self
    }

    pub fn with_light_policy(mut self, policy: LightPolicy) -> Self {
        self.light_policy = policy;
        self
    }

    /// `host:port` of the control socket
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// URL of the topology document
    pub fn topology_url(&self) -> String {
        format!("http://{}:{}/xml/api/config", self.host, self.config_port)
    }

    pub fn reconnect_delay(&self) -> Duration {
        self.reconnect_delay
    }

    pub fn settle_interval(&self) -> Duration {
        self.settle_interval
    }

    pub fn query_interval(&self) -> Duration {
        self.query_interval
    }
}

/// Seconds in the JSON config, fractions allowed
fn duration_secs<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}
