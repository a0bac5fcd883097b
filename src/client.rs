use crate::config::HubConfig;
use crate::connection::{LinkState, Transport};
use crate::error::{HubError, Result};
use crate::registry::{DeviceRegistry, SharedRegistry, TopologyDiff};
use crate::router::EventRouter;
use crate::subscription::{DeviceChange, StateReceiver};
use crate::topology::{fetch_topology, Topology};
use crate::types::{DeviceKey, Light, LightState, LoadId, MovementState, Percent, Room, Shade};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

/// Client for a Crestron control processor
///
/// The `HubClient` owns the hub link: it seeds the device registry from the
/// processor's topology, keeps the control socket connected, applies state
/// pushed by the hub, and turns device commands into protocol events.
pub struct HubClient {
    config: HubConfig,
    http: reqwest::Client,
    registry: SharedRegistry,
    transport: Arc<Transport>,
    router: Arc<EventRouter>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl HubClient {
    /// Fetch the topology from the processor and start the hub link
    ///
    /// Fails with [`HubError::TopologyFetchFailed`] or
    /// [`HubError::InvalidTopology`] if discovery fails; the control socket is
    /// not opened in that case.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use crestron_hub::{HubClient, HubConfig};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let client = HubClient::connect(HubConfig::new("192.168.0.249", 41900)).await?;
    ///     for light in client.list_lights() {
    ///         println!("{} ({:?})", light.display_name, light.kind);
    ///     }
    ///     Ok(())
    /// }
    /// ```
    pub async fn connect(config: HubConfig) -> Result<Self> {
        let http = reqwest::Client::new();
        let topology = fetch_topology(&http, &config.topology_url()).await?;
        Self::start(config, http, topology).await
    }

    /// Start the hub link with a topology supplied by the caller
    pub async fn with_topology(config: HubConfig, topology: Topology) -> Result<Self> {
        Self::start(config, reqwest::Client::new(), topology).await
    }

    async fn start(config: HubConfig, http: reqwest::Client, topology: Topology) -> Result<Self> {
        let registry = SharedRegistry::new(DeviceRegistry::from_topology(topology));
        let transport = Arc::new(Transport::from_config(&config));
        let (changes, _) = broadcast::channel(100);

        let router = Arc::new(
            EventRouter::new(registry.clone(), transport.clone(), changes)
                .with_settle_interval(config.settle_interval())
                .with_client_id(config.client_id)
                .with_policy(config.light_policy),
        );

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        transport.start(inbound_tx).await?;

        let tasks = vec![
            tokio::spawn(router.clone().run(inbound_rx)),
            tokio::spawn(router.clone().run_state_queries(config.query_interval())),
        ];

        Ok(Self {
            config,
            http,
            registry,
            transport,
            router,
            tasks: Mutex::new(tasks),
        })
    }

    // ========== Registry Queries ==========

    /// Snapshot of all known lights
    pub fn list_lights(&self) -> Vec<Light> {
        self.registry.lock().lights().cloned().collect()
    }

    /// Snapshot of all known shades
    pub fn list_shades(&self) -> Vec<Shade> {
        self.registry.lock().shades().cloned().collect()
    }

    pub fn light(&self, id: LoadId) -> Option<Light> {
        self.registry.lock().light(id).cloned()
    }

    pub fn shade(&self, id: LoadId) -> Option<Shade> {
        self.registry.lock().shade(id).cloned()
    }

    /// Last-known brightness of a light
    pub fn get_light_level(&self, id: LoadId) -> Result<Percent> {
        self.light(id)
            .map(|light| light.brightness)
            .ok_or(HubError::UnknownDevice(DeviceKey::light(id)))
    }

    /// Last-known power, brightness and color of a light
    pub fn get_light_state(&self, id: LoadId) -> Result<LightState> {
        self.light(id)
            .map(|light| LightState::from(&light))
            .ok_or(HubError::UnknownDevice(DeviceKey::light(id)))
    }

    /// Last-known position of a shade
    pub fn get_shade_position(&self, id: LoadId) -> Result<Percent> {
        self.shade(id)
            .map(|shade| shade.position)
            .ok_or(HubError::UnknownDevice(DeviceKey::shade(id)))
    }

    /// Inferred movement of a shade
    pub fn get_shade_state(&self, id: LoadId) -> Result<MovementState> {
        self.shade(id)
            .map(|shade| shade.movement)
            .ok_or(HubError::UnknownDevice(DeviceKey::shade(id)))
    }

    pub fn rooms(&self) -> Vec<Room> {
        self.registry.lock().rooms().to_vec()
    }

    /// Room a device belongs to, if the topology places it in one
    pub fn room_for(&self, key: DeviceKey) -> Option<Room> {
        self.registry.lock().room_for(key).cloned()
    }

    // ========== Commands ==========

    /// Set a light's brightness (0-100)
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use crestron_hub::{HubClient, HubConfig};
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// # let client = HubClient::connect(HubConfig::new("192.168.0.249", 41900)).await?;
    /// client.set_light_level(10, 60).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn set_light_level(&self, id: LoadId, level: Percent) -> Result<()> {
        self.router.set_light_level(id, level).await
    }

    /// Switch a light on or off, using the configured power-on policy
    pub async fn set_light_power(&self, id: LoadId, on: bool) -> Result<()> {
        self.router.set_light_power(id, on).await
    }

    /// Set an rgb light's hue (0-360), saturation and brightness (0-100)
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use crestron_hub::{HubClient, HubConfig};
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// # let client = HubClient::connect(HubConfig::new("192.168.0.249", 41900)).await?;
    /// client.set_light_color(10, 240, 100, 50).await?; // blue
    /// # Ok(())
    /// # }
    /// ```
    pub async fn set_light_color(
        &self,
        id: LoadId,
        hue: u16,
        saturation: Percent,
        brightness: Percent,
    ) -> Result<()> {
        self.router
            .set_light_color(id, hue, saturation, brightness)
            .await
    }

    /// Move a shade (0 closed, 100 open)
    pub async fn set_shade_position(&self, id: LoadId, position: Percent) -> Result<()> {
        self.router.set_shade_position(id, position).await
    }

    /// Ask the hub to push a device's current state
    pub async fn query_device(&self, key: DeviceKey) -> Result<()> {
        self.router.query_device(key).await
    }

    // ========== Topology ==========

    /// Refetch the topology and merge it into the registry
    ///
    /// New devices are added straight away. Devices listed in
    /// [`TopologyDiff::removed`] stay registered until passed to
    /// [`HubClient::forget_device`]. On failure the registry is untouched.
    pub async fn refresh_topology(&self) -> Result<TopologyDiff> {
        let topology = fetch_topology(&self.http, &self.config.topology_url()).await?;
        let diff = self.registry.lock().reconcile(topology);

        for key in &diff.added {
            tracing::info!("Added {} from topology", key);
            self.router.publish(DeviceChange::Added(*key));
        }
        for key in &diff.removed {
            tracing::info!("{} is no longer in the topology", key);
        }
        Ok(diff)
    }

    /// Remove a device from the registry
    pub fn forget_device(&self, key: DeviceKey) -> bool {
        let removed = self.registry.lock().remove(key);
        if removed {
            tracing::info!("Removed {}", key);
            self.router.publish(DeviceChange::Removed(key));
        }
        removed
    }

    // ========== Link ==========

    /// Subscribe to device change notifications
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use crestron_hub::{HubClient, HubConfig};
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// # let client = HubClient::connect(HubConfig::new("192.168.0.249", 41900)).await?;
    /// let mut rx = client.subscribe();
    /// while let Ok(change) = rx.recv().await {
    ///     println!("Changed: {:?}", change);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn subscribe(&self) -> StateReceiver {
        StateReceiver::new(self.router.subscribe())
    }

    pub fn link_state(&self) -> LinkState {
        self.transport.state()
    }

    pub fn watch_link_state(&self) -> watch::Receiver<LinkState> {
        self.transport.watch_state()
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Close the hub link and cancel reconnects, queries and settle timers
    ///
    /// Subscribers see [`HubError::ConnectionLost`] once pending changes are drained.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down hub link");
        self.transport.stop().await;

        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }
        self.router.cancel_timers();
        self.router.close_changes();
    }
}

impl Drop for HubClient {
    fn drop(&mut self) {
        let tasks = self
            .tasks
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        for task in tasks.drain(..) {
            task.abort();
        }
        self.router.cancel_timers();
    }
}
