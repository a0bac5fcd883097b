//! Light and shade semantics on both directions of the hub link.
//!
//! Inbound, the router applies decoded [`HubEvent`]s to the registry and
//! publishes [`DeviceChange`]s. Outbound, it turns device commands into
//! protocol events and hands them to the [`Transport`].

use crate::color::hsl_to_rgb;
use crate::config::{LightPolicy, PowerOnLevel, FULL_BRIGHTNESS};
use crate::connection::{LinkState, Transport};
use crate::error::{HubError, Result};
use crate::protocol::{EventTag, Frame, HubEvent, Join};
use crate::registry::SharedRegistry;
use crate::subscription::DeviceChange;
use crate::types::{DeviceKey, Domain, LightKind, LoadId, MovementState, Percent};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};

const MAX_PERCENT: u16 = 100;
const MAX_HUE: u16 = 360;

/// Axis labels for the three color channel events, in send order
const RGB_LABELS: [&str; 3] = ["R", "G", "B"];

fn check_range(name: &'static str, value: u16, max: u16) -> Result<()> {
    if value > max {
        return Err(HubError::OutOfRange { name, value, max });
    }
    Ok(())
}

/// Hub levels are plain integers; anything outside 0-100 is clamped
fn level_to_percent(level: i64) -> Percent {
    level.clamp(0, i64::from(MAX_PERCENT)) as Percent
}

pub struct EventRouter {
    registry: SharedRegistry,
    transport: Arc<Transport>,
    /// Taken on shutdown so subscribers see the channel close
    changes: Mutex<Option<broadcast::Sender<DeviceChange>>>,
    settle_interval: Duration,
    client_id: i64,
    policy: LightPolicy,
    /// One pending settle timer per shade; re-arming replaces it
    settle_timers: Mutex<HashMap<LoadId, JoinHandle<()>>>,
}

impl EventRouter {
    pub(crate) fn new(
        registry: SharedRegistry,
        transport: Arc<Transport>,
        changes: broadcast::Sender<DeviceChange>,
    ) -> Self {
        Self {
            registry,
            transport,
            changes: Mutex::new(Some(changes)),
            settle_interval: Duration::from_secs(15),
            client_id: 0,
            policy: LightPolicy::default(),
            settle_timers: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn with_settle_interval(mut self, interval: Duration) -> Self {
        self.settle_interval = interval;
        self
    }

    pub(crate) fn with_client_id(mut self, client_id: i64) -> Self {
        self.client_id = client_id;
        self
    }

    pub(crate) fn with_policy(mut self, policy: LightPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Apply inbound frames in arrival order until the transport goes away
    pub(crate) async fn run(self: Arc<Self>, mut inbound: mpsc::UnboundedReceiver<Frame>) {
        while let Some(frame) = inbound.recv().await {
            self.handle_frame(frame);
        }
        tracing::debug!("Inbound frame channel closed, router stopping");
    }

    pub(crate) fn handle_frame(&self, frame: Frame) {
        match frame {
            Frame::Event(event) => self.handle_event(&event),
            Frame::Join(join) => self.handle_join(&join),
            Frame::Malformed(reason) => {
                tracing::warn!("{}", HubError::MalformedFrame(reason));
            }
        }
    }

    fn handle_join(&self, join: &Join) {
        match join {
            Join::Digital { join, value } => {
                tracing::info!("Received digital join {} with value of {}", join, value)
            }
            Join::Analog { join, value } => {
                tracing::info!("Received analog join {} with value of {}", join, value)
            }
            Join::Serial { join, value } => {
                tracing::info!("Received serial join {} with value of {}", join, value)
            }
        }
    }

    /// Apply one domain event to the registry
    ///
    /// Tag/domain combinations without a handler are ignored.
    pub fn handle_event(&self, event: &HubEvent) {
        match (event.domain.device_domain(), event.etag) {
            (Some(Domain::Light), EventTag::Update) => self.update_light(event),
            (Some(Domain::Shade), EventTag::Update) => self.update_shade(event),
            _ => tracing::trace!(
                "No handler for {:?} on {}, ignoring",
                event.etag,
                event.domain.as_str()
            ),
        }
    }

    fn load_id(event: &HubEvent, domain: Domain) -> Option<LoadId> {
        match LoadId::try_from(event.request_by) {
            Ok(id) => Some(id),
            Err(_) => {
                tracing::debug!("Ignoring {} update with load id {}", domain, event.request_by);
                None
            }
        }
    }

    fn update_light(&self, event: &HubEvent) {
        let Some(id) = Self::load_id(event, Domain::Light) else {
            return;
        };
        let brightness = level_to_percent(event.level);

        {
            let mut registry = self.registry.lock();
            let Some(light) = registry.light_mut(id) else {
                tracing::debug!("{}, ignoring update", HubError::UnknownDevice(DeviceKey::light(id)));
                return;
            };
            light.set_brightness(brightness);
            if brightness == 0 && self.policy.clear_color_on_off {
                light.hue = 0;
                light.saturation = 0;
            }
        }

        tracing::debug!("Light {} brightness is now {}", id, brightness);
        self.publish(DeviceChange::Light { id, brightness });
    }

    fn update_shade(&self, event: &HubEvent) {
        let Some(id) = Self::load_id(event, Domain::Shade) else {
            return;
        };
        let position = level_to_percent(event.level);

        let (movement, generation) = {
            let mut registry = self.registry.lock();
            let Some(shade) = registry.shade_mut(id) else {
                tracing::debug!("{}, ignoring update", HubError::UnknownDevice(DeviceKey::shade(id)));
                return;
            };
            shade.movement = if position > shade.position {
                MovementState::Opening
            } else {
                MovementState::Closing
            };
            shade.position = position;
            shade.settle_generation += 1;
            (shade.movement, shade.settle_generation)
        };

        tracing::debug!("Shade {} at {} ({:?})", id, position, movement);
        self.publish(DeviceChange::Shade {
            id,
            position,
            movement,
        });
        self.arm_settle_timer(id, generation);
    }

    /// Mark the shade stopped after the settle interval, replacing any pending timer
    fn arm_settle_timer(&self, id: LoadId, generation: u64) {
        let deadline = Instant::now() + self.settle_interval;
        let registry = self.registry.clone();
        let changes = self.sender();

        let handle = tokio::spawn(async move {
            sleep_until(deadline).await;

            let position = {
                let mut registry = registry.lock();
                let Some(shade) = registry.shade_mut(id) else {
                    return;
                };
                // A newer update owns the shade now
                if shade.settle_generation != generation || shade.movement == MovementState::Stopped {
                    return;
                }
                shade.movement = MovementState::Stopped;
                shade.position
            };

            tracing::debug!("Shade {} settled at {}", id, position);
            if let Some(changes) = changes {
                let _ = changes.send(DeviceChange::Shade {
                    id,
                    position,
                    movement: MovementState::Stopped,
                });
            }
        });

        let mut timers = self
            .settle_timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = timers.insert(id, handle) {
            previous.abort();
        }
    }

    fn sender(&self) -> Option<broadcast::Sender<DeviceChange>> {
        self.changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn publish(&self, change: DeviceChange) {
        if let Some(changes) = self.sender() {
            let _ = changes.send(change);
        }
    }

    /// Receiver for device changes; already closed after [`EventRouter::close_changes`]
    pub(crate) fn subscribe(&self) -> broadcast::Receiver<DeviceChange> {
        match self.sender() {
            Some(changes) => changes.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    pub(crate) fn close_changes(&self) {
        self.changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Cancel every pending settle timer
    pub(crate) fn cancel_timers(&self) {
        let mut timers = self
            .settle_timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for (_, handle) in timers.drain() {
            handle.abort();
        }
    }

    fn light_kind(&self, id: LoadId) -> Result<LightKind> {
        self.registry
            .lock()
            .light(id)
            .map(|light| light.kind)
            .ok_or(HubError::UnknownDevice(DeviceKey::light(id)))
    }

    async fn send(&self, event: HubEvent) -> Result<()> {
        self.transport
            .send_event(event.with_source(self.client_id))
            .await
    }

    /// Set a light's brightness (0-100)
    pub async fn set_light_level(&self, id: LoadId, level: Percent) -> Result<()> {
        check_range("level", u16::from(level), MAX_PERCENT)?;
        let kind = self.light_kind(id)?;
        if !kind.is_dimmable() && level != 0 && level != FULL_BRIGHTNESS {
            return Err(HubError::Unsupported(format!(
                "light {} is not dimmable, level must be 0 or {}",
                id, FULL_BRIGHTNESS
            )));
        }

        tracing::info!("Setting light {} to {}", id, level);
        self.send(HubEvent::level_set(Domain::Light, id, i64::from(level)))
            .await?;

        if level == 0 && self.policy.clear_color_on_off {
            if let Some(light) = self.registry.lock().light_mut(id) {
                light.hue = 0;
                light.saturation = 0;
            }
        }
        Ok(())
    }

    /// Switch a light on or off according to the configured power-on policy
    pub async fn set_light_power(&self, id: LoadId, on: bool) -> Result<()> {
        let level = if on {
            let registry = self.registry.lock();
            let light = registry
                .light(id)
                .ok_or(HubError::UnknownDevice(DeviceKey::light(id)))?;
            if !light.kind.is_dimmable() {
                FULL_BRIGHTNESS
            } else if light.power() {
                light.brightness
            } else {
                match self.policy.power_on {
                    PowerOnLevel::Restore => light.last_brightness.unwrap_or(FULL_BRIGHTNESS),
                    PowerOnLevel::Full => FULL_BRIGHTNESS,
                }
            }
        } else {
            0
        };

        self.set_light_level(id, level).await
    }

    /// Set an rgb light's color
    ///
    /// Emits three level events labelled R, G and B. A send failure part-way
    /// is returned as is; channels already sent are not retried or undone.
    pub async fn set_light_color(
        &self,
        id: LoadId,
        hue: u16,
        saturation: Percent,
        brightness: Percent,
    ) -> Result<()> {
        check_range("hue", hue, MAX_HUE)?;
        check_range("saturation", u16::from(saturation), MAX_PERCENT)?;
        check_range("brightness", u16::from(brightness), MAX_PERCENT)?;
        if !self.light_kind(id)?.is_rgb() {
            return Err(HubError::Unsupported(format!("light {} is not rgb", id)));
        }

        let rgb = hsl_to_rgb(hue, saturation, brightness);
        tracing::info!(
            "Setting light {} to hsl({}, {}, {}) = rgb{:?}",
            id,
            hue,
            saturation,
            brightness,
            rgb
        );

        for (label, value) in RGB_LABELS.iter().zip(rgb) {
            self.send(HubEvent::level_set(Domain::Light, id, i64::from(value)).with_label(*label))
                .await?;
        }

        // The hub only reports brightness back, so remember what was asked for
        let (hue, saturation) = if brightness == 0 && self.policy.clear_color_on_off {
            (0, 0)
        } else {
            (hue, saturation)
        };
        if let Some(light) = self.registry.lock().light_mut(id) {
            light.hue = hue;
            light.saturation = saturation;
        }
        Ok(())
    }

    /// Move a shade to a position (0 closed, 100 open)
    pub async fn set_shade_position(&self, id: LoadId, position: Percent) -> Result<()> {
        check_range("position", u16::from(position), MAX_PERCENT)?;
        if !self.registry.lock().contains(DeviceKey::shade(id)) {
            return Err(HubError::UnknownDevice(DeviceKey::shade(id)));
        }

        tracing::info!("Setting shade {} to {}", id, position);
        self.send(HubEvent::level_set(Domain::Shade, id, i64::from(position)))
            .await
    }

    /// Ask the hub to report a device's current state
    pub async fn query_device(&self, key: DeviceKey) -> Result<()> {
        if !self.registry.lock().contains(key) {
            return Err(HubError::UnknownDevice(key));
        }
        self.send(HubEvent::query(key.domain, key.id)).await
    }

    /// Query every registered device once per connection, pausing between queries
    pub(crate) async fn run_state_queries(self: Arc<Self>, interval: Duration) {
        let mut states = self.transport.watch_state();
        loop {
            let connected = states
                .wait_for(|state| *state == LinkState::Connected)
                .await
                .is_ok();
            if !connected {
                return;
            }

            let keys = self.registry.lock().keys();
            tracing::info!("Querying state of {} devices", keys.len());
            for (index, key) in keys.into_iter().enumerate() {
                if index > 0 {
                    sleep(interval).await;
                }
                match self.query_device(key).await {
                    Ok(()) => {}
                    Err(HubError::NotConnected) => break,
                    // Removed while the queries were running
                    Err(HubError::UnknownDevice(_)) => continue,
                    Err(e) => tracing::warn!("Failed to query {}: {}", key, e),
                }
            }

            let dropped = states
                .wait_for(|state| *state != LinkState::Connected)
                .await
                .is_ok();
            if !dropped {
                return;
            }
        }
    }
}

impl Drop for EventRouter {
    fn drop(&mut self) {
        self.cancel_timers();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CodecKind, HubCodec};
    use crate::protocol::CoreDomain;
    use crate::registry::DeviceRegistry;
    use crate::types::{Light, Shade};
    use tokio::io::{AsyncBufReadExt, BufReader, Lines};
    use tokio::net::{TcpListener, TcpStream};
    use tokio_util::codec::Decoder;

    type HubLines = Lines<BufReader<TcpStream>>;

    fn registry() -> SharedRegistry {
        let mut registry = DeviceRegistry::new();
        registry.insert_light(Light::new(10, "Pendant", LightKind::Rgb));
        registry.insert_light(Light::new(11, "Downlights", LightKind::Dimmer));
        registry.insert_light(Light::new(12, "Fan", LightKind::Plain));
        registry.insert_shade(Shade::new(1032, "Blind"));
        SharedRegistry::new(registry)
    }

    fn offline_router() -> (Arc<EventRouter>, SharedRegistry, broadcast::Receiver<DeviceChange>) {
        offline_router_with(LightPolicy::default())
    }

    fn offline_router_with(
        policy: LightPolicy,
    ) -> (Arc<EventRouter>, SharedRegistry, broadcast::Receiver<DeviceChange>) {
        let registry = registry();
        let (changes, rx) = broadcast::channel(32);
        let transport = Arc::new(Transport::new(
            "127.0.0.1:1",
            CodecKind::Json,
            Duration::from_secs(10),
        ));
        let router = EventRouter::new(registry.clone(), transport, changes).with_policy(policy);
        (Arc::new(router), registry, rx)
    }

    /// Router whose transport is connected to a loopback "hub"
    async fn online_router(policy: LightPolicy) -> (Arc<EventRouter>, SharedRegistry, HubLines) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let transport = Arc::new(Transport::new(addr, CodecKind::NewlineJson, Duration::from_secs(10)));
        let mut states = transport.watch_state();
        let (inbound_tx, _inbound_rx) = mpsc::unbounded_channel();
        transport.start(inbound_tx).await.unwrap();

        let (socket, _) = listener.accept().await.unwrap();
        states.wait_for(|s| *s == LinkState::Connected).await.unwrap();

        let registry = registry();
        let (changes, _) = broadcast::channel(32);
        let router = EventRouter::new(registry.clone(), transport, changes)
            .with_client_id(99)
            .with_policy(policy);
        (Arc::new(router), registry, BufReader::new(socket).lines())
    }

    async fn next_event(lines: &mut HubLines) -> HubEvent {
        let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        serde_json::from_str(&line).unwrap()
    }

    fn update(domain: CoreDomain, id: i64, level: i64) -> HubEvent {
        HubEvent::new(EventTag::Update, domain, 0, level).with_source(id)
    }

    async fn let_timers_run() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn should_apply_light_update() {
        let (router, registry, mut changes) = offline_router();

        router.handle_event(&update(CoreDomain::Light, 10, 75));

        assert_eq!(registry.lock().light(10).unwrap().brightness, 75);
        assert!(registry.lock().light(10).unwrap().power());
        assert_eq!(
            changes.try_recv().unwrap(),
            DeviceChange::Light { id: 10, brightness: 75 }
        );
    }

    #[tokio::test]
    async fn should_clamp_out_of_range_levels() {
        let (router, registry, _changes) = offline_router();

        router.handle_event(&update(CoreDomain::Light, 11, 300));
        assert_eq!(registry.lock().light(11).unwrap().brightness, 100);

        router.handle_event(&update(CoreDomain::Light, 11, -5));
        assert_eq!(registry.lock().light(11).unwrap().brightness, 0);
    }

    #[tokio::test]
    async fn should_ignore_unknown_devices_and_tags() {
        let (router, registry, mut changes) = offline_router();

        router.handle_event(&update(CoreDomain::Light, 555, 40));
        router.handle_event(&update(CoreDomain::Light, -1, 40));
        router.handle_event(&HubEvent::new(EventTag::Press, CoreDomain::Light, 0, 1).with_source(10));
        router.handle_event(&update(CoreDomain::Area, 10, 40));
        router.handle_event(&HubEvent::new(EventTag::Unknown(77), CoreDomain::Shade, 0, 5).with_source(1032));

        assert!(changes.try_recv().is_err());
        assert_eq!(registry.lock().light(10).unwrap().brightness, 0);
        assert_eq!(registry.lock().shade(1032).unwrap().position, 0);
    }

    #[tokio::test]
    async fn should_clear_color_when_policy_says_so() {
        let (router, registry, _changes) = offline_router_with(LightPolicy {
            clear_color_on_off: true,
            ..LightPolicy::default()
        });
        {
            let mut registry = registry.lock();
            let light = registry.light_mut(10).unwrap();
            light.hue = 200;
            light.saturation = 80;
        }

        router.handle_event(&update(CoreDomain::Light, 10, 0));

        let registry = registry.lock();
        let light = registry.light(10).unwrap();
        assert_eq!((light.hue, light.saturation), (0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn should_infer_shade_direction_and_settle() {
        let (router, registry, mut changes) = offline_router();
        registry.lock().shade_mut(1032).unwrap().position = 50;

        router.handle_event(&update(CoreDomain::Shade, 1032, 30));
        assert_eq!(
            changes.try_recv().unwrap(),
            DeviceChange::Shade {
                id: 1032,
                position: 30,
                movement: MovementState::Closing
            }
        );

        tokio::time::advance(Duration::from_millis(14_999)).await;
        let_timers_run().await;
        assert_eq!(registry.lock().shade(1032).unwrap().movement, MovementState::Closing);
        assert!(changes.try_recv().is_err());

        tokio::time::advance(Duration::from_millis(2)).await;
        let_timers_run().await;
        assert_eq!(registry.lock().shade(1032).unwrap().movement, MovementState::Stopped);
        assert_eq!(
            changes.try_recv().unwrap(),
            DeviceChange::Shade {
                id: 1032,
                position: 30,
                movement: MovementState::Stopped
            }
        );

        tokio::time::advance(Duration::from_secs(60)).await;
        let_timers_run().await;
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn should_rearm_settle_timer_on_newer_update() {
        let (router, registry, mut changes) = offline_router();
        registry.lock().shade_mut(1032).unwrap().position = 50;

        router.handle_event(&update(CoreDomain::Shade, 1032, 30));
        tokio::time::advance(Duration::from_secs(10)).await;
        router.handle_event(&update(CoreDomain::Shade, 1032, 10));
        let _ = changes.try_recv();
        let _ = changes.try_recv();

        // The first timer would have fired at 15s
        tokio::time::advance(Duration::from_secs(6)).await;
        let_timers_run().await;
        assert_eq!(registry.lock().shade(1032).unwrap().movement, MovementState::Closing);
        assert!(changes.try_recv().is_err());

        tokio::time::advance(Duration::from_secs(9)).await;
        let_timers_run().await;
        let shade = registry.lock().shade(1032).unwrap().clone();
        assert_eq!(shade.movement, MovementState::Stopped);
        assert_eq!(shade.position, 10);
        assert!(matches!(changes.try_recv(), Ok(DeviceChange::Shade { movement: MovementState::Stopped, .. })));
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn should_mark_opening_when_position_rises() {
        let (router, registry, _changes) = offline_router();
        router.handle_event(&update(CoreDomain::Shade, 1032, 80));
        assert_eq!(registry.lock().shade(1032).unwrap().movement, MovementState::Opening);
    }

    #[tokio::test]
    async fn should_not_touch_registry_when_disconnected() {
        let (router, registry, _changes) = offline_router();

        let err = router.set_shade_position(1032, 40).await.unwrap_err();
        assert!(matches!(err, HubError::NotConnected));

        let registry = registry.lock();
        let shade = registry.shade(1032).unwrap();
        assert_eq!(shade.position, 0);
        assert_eq!(shade.movement, MovementState::Stopped);
    }

    #[tokio::test]
    async fn should_validate_commands() {
        let (router, _registry, _changes) = offline_router();

        assert!(matches!(
            router.set_light_level(11, 101).await,
            Err(HubError::OutOfRange { name: "level", .. })
        ));
        assert!(matches!(
            router.set_light_color(10, 361, 50, 50).await,
            Err(HubError::OutOfRange { name: "hue", .. })
        ));
        assert!(matches!(
            router.set_light_color(11, 0, 100, 50).await,
            Err(HubError::Unsupported(_))
        ));
        assert!(matches!(
            router.set_light_level(12, 40).await,
            Err(HubError::Unsupported(_))
        ));
        assert!(matches!(
            router.set_shade_position(77, 10).await,
            Err(HubError::UnknownDevice(_))
        ));
        assert!(matches!(
            router.query_device(DeviceKey::light(77)).await,
            Err(HubError::UnknownDevice(_))
        ));
    }

    #[tokio::test]
    async fn should_send_level_set_for_light() {
        let (router, _registry, mut lines) = online_router(LightPolicy::default()).await;

        router.set_light_level(11, 40).await.unwrap();

        let event = next_event(&mut lines).await;
        assert_eq!(event.etag, EventTag::LevelSet);
        assert_eq!(event.domain, CoreDomain::Light);
        assert_eq!(event.request_to, 11);
        assert_eq!(event.request_by, 99);
        assert_eq!(event.level, 40);
    }

    #[tokio::test]
    async fn should_send_rgb_channels_in_order() {
        let (router, registry, mut lines) = online_router(LightPolicy::default()).await;

        router.set_light_color(10, 0, 100, 50).await.unwrap();

        let mut channels = Vec::new();
        for _ in 0..3 {
            let event = next_event(&mut lines).await;
            assert_eq!(event.etag, EventTag::LevelSet);
            assert_eq!(event.request_to, 10);
            channels.push((event.device_name, event.level));
        }
        assert_eq!(
            channels,
            vec![
                ("R".to_string(), 255),
                ("G".to_string(), 0),
                ("B".to_string(), 0)
            ]
        );

        let registry = registry.lock();
        let light = registry.light(10).unwrap();
        assert_eq!((light.hue, light.saturation), (0, 100));
    }

    #[tokio::test]
    async fn should_clear_color_when_commanded_off() {
        let policy = LightPolicy {
            clear_color_on_off: true,
            ..LightPolicy::default()
        };
        let (router, registry, _lines) = online_router(policy).await;
        let color = |registry: &SharedRegistry| {
            let registry = registry.lock();
            let light = registry.light(10).unwrap();
            (light.hue, light.saturation)
        };

        router.set_light_color(10, 200, 80, 0).await.unwrap();
        assert_eq!(color(&registry), (0, 0));

        router.set_light_color(10, 200, 80, 50).await.unwrap();
        assert_eq!(color(&registry), (200, 80));

        router.set_light_level(10, 0).await.unwrap();
        assert_eq!(color(&registry), (0, 0));
    }

    #[tokio::test]
    async fn should_keep_color_when_commanded_off_by_default() {
        let (router, registry, _lines) = online_router(LightPolicy::default()).await;

        router.set_light_color(10, 200, 80, 50).await.unwrap();
        router.set_light_level(10, 0).await.unwrap();

        let registry = registry.lock();
        let light = registry.light(10).unwrap();
        assert_eq!((light.hue, light.saturation), (200, 80));
    }

    fn decode_sent(bytes: bytes::Bytes) -> HubEvent {
        let mut buf = bytes::BytesMut::from(&bytes[..]);
        match HubCodec::new(CodecKind::Json).decode(&mut buf).unwrap() {
            Some(Frame::Event(event)) => event,
            other => panic!("Expected an event, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn should_pace_startup_queries() {
        let (router, _registry, _changes) = offline_router();
        let mut sent = router.transport.attach().await;
        let queries = tokio::spawn(router.clone().run_state_queries(Duration::from_secs(5)));
        let_timers_run().await;

        let first = decode_sent(sent.try_recv().unwrap());
        assert_eq!((first.etag, first.request_to), (EventTag::Query, 10));
        assert!(sent.try_recv().is_err());

        tokio::time::advance(Duration::from_millis(4999)).await;
        let_timers_run().await;
        assert!(sent.try_recv().is_err());

        tokio::time::advance(Duration::from_millis(2)).await;
        let_timers_run().await;
        let second = decode_sent(sent.try_recv().unwrap());
        assert_eq!((second.etag, second.request_to), (EventTag::Query, 11));

        // Link drops mid-run: the remaining devices are not queried
        router.transport.detach().await;
        tokio::time::advance(Duration::from_secs(30)).await;
        let_timers_run().await;
        assert!(!queries.is_finished());

        // A new session starts over from the first device
        let mut sent = router.transport.attach().await;
        let_timers_run().await;
        let again = decode_sent(sent.try_recv().unwrap());
        assert_eq!((again.etag, again.request_to), (EventTag::Query, 10));
        assert!(sent.try_recv().is_err());

        queries.abort();
    }

    #[tokio::test]
    async fn should_close_subscriptions_on_close_changes() {
        let (router, _registry, _changes) = offline_router();
        let mut rx = router.subscribe();

        router.publish(DeviceChange::Added(DeviceKey::light(4)));
        router.close_changes();

        assert_eq!(rx.recv().await.unwrap(), DeviceChange::Added(DeviceKey::light(4)));
        assert!(matches!(rx.recv().await, Err(broadcast::error::RecvError::Closed)));
        assert!(matches!(
            router.subscribe().recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }

    #[tokio::test]
    async fn should_send_shade_position_and_queries() {
        let (router, _registry, mut lines) = online_router(LightPolicy::default()).await;

        router.set_shade_position(1032, 60).await.unwrap();
        router.query_device(DeviceKey::shade(1032)).await.unwrap();

        let event = next_event(&mut lines).await;
        assert_eq!((event.etag, event.domain, event.level), (EventTag::LevelSet, CoreDomain::Shade, 60));
        let event = next_event(&mut lines).await;
        assert_eq!((event.etag, event.request_to), (EventTag::Query, 1032));
    }

    #[tokio::test]
    async fn should_restore_last_brightness_on_power_on() {
        let (router, _registry, mut lines) = online_router(LightPolicy::default()).await;
        router.handle_event(&update(CoreDomain::Light, 11, 35));
        router.handle_event(&update(CoreDomain::Light, 11, 0));

        router.set_light_power(11, true).await.unwrap();
        assert_eq!(next_event(&mut lines).await.level, 35);

        router.set_light_power(11, false).await.unwrap();
        assert_eq!(next_event(&mut lines).await.level, 0);
    }

    #[tokio::test]
    async fn should_power_on_full_when_configured() {
        let policy = LightPolicy {
            power_on: PowerOnLevel::Full,
            ..LightPolicy::default()
        };
        let (router, _registry, mut lines) = online_router(policy).await;
        router.handle_event(&update(CoreDomain::Light, 11, 35));
        router.handle_event(&update(CoreDomain::Light, 11, 0));

        router.set_light_power(11, true).await.unwrap();
        assert_eq!(next_event(&mut lines).await.level, 100);

        // Plain lights only know full
        router.set_light_power(12, true).await.unwrap();
        assert_eq!(next_event(&mut lines).await.level, 100);
    }
}
