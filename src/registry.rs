//! In-memory store of known lights and shades.

use crate::topology::Topology;
use crate::types::{DeviceKey, Domain, Light, LoadId, Room, RoomId, Shade};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Result of reconciling the registry against a fresh topology
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyDiff {
    /// Present in the new topology, newly inserted
    pub added: Vec<DeviceKey>,

    /// Present locally but missing from the new topology; left in place
    pub removed: Vec<DeviceKey>,

    /// Present in both; state kept, name and room refreshed
    pub unchanged: Vec<DeviceKey>,
}

impl TopologyDiff {
    /// True when the device set did not change
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Lights and shades keyed by load id, plus the rooms they reference
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    rooms: Vec<Room>,
    lights: BTreeMap<LoadId, Light>,
    shades: BTreeMap<LoadId, Shade>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry holding everything in `topology`
    pub fn from_topology(topology: Topology) -> Self {
        let mut registry = Self::new();
        registry.reconcile(topology);
        registry
    }

    /// Merge a freshly fetched topology
    ///
    /// New devices are inserted. Devices missing from `topology` are only
    /// reported; removing them is up to the caller via [`DeviceRegistry::remove`].
    pub fn reconcile(&mut self, topology: Topology) -> TopologyDiff {
        let mut diff = TopologyDiff::default();

        let incoming_lights: BTreeMap<LoadId, Light> =
            topology.lights.into_iter().map(|l| (l.id, l)).collect();
        let incoming_shades: BTreeMap<LoadId, Shade> =
            topology.shades.into_iter().map(|s| (s.id, s)).collect();

        for id in self.lights.keys() {
            if !incoming_lights.contains_key(id) {
                diff.removed.push(DeviceKey::light(*id));
            }
        }
        for id in self.shades.keys() {
            if !incoming_shades.contains_key(id) {
                diff.removed.push(DeviceKey::shade(*id));
            }
        }

        for (id, light) in incoming_lights {
            match self.lights.get_mut(&id) {
                Some(existing) => {
                    existing.display_name = light.display_name;
                    existing.area = light.area;
                    existing.kind = light.kind;
                    diff.unchanged.push(DeviceKey::light(id));
                }
                None => {
                    self.lights.insert(id, light);
                    diff.added.push(DeviceKey::light(id));
                }
            }
        }

        for (id, shade) in incoming_shades {
            match self.shades.get_mut(&id) {
                Some(existing) => {
                    existing.display_name = shade.display_name;
                    existing.area = shade.area;
                    diff.unchanged.push(DeviceKey::shade(id));
                }
                None => {
                    self.shades.insert(id, shade);
                    diff.added.push(DeviceKey::shade(id));
                }
            }
        }

        self.rooms = topology.rooms;

        tracing::debug!(
            "Reconciled topology: {} added, {} removed, {} unchanged",
            diff.added.len(),
            diff.removed.len(),
            diff.unchanged.len()
        );
        diff
    }

    /// Drop a device; returns whether it was present
    pub fn remove(&mut self, key: DeviceKey) -> bool {
        match key.domain {
            Domain::Light => self.lights.remove(&key.id).is_some(),
            Domain::Shade => self.shades.remove(&key.id).is_some(),
        }
    }

    pub fn insert_light(&mut self, light: Light) {
        self.lights.insert(light.id, light);
    }

    pub fn insert_shade(&mut self, shade: Shade) {
        self.shades.insert(shade.id, shade);
    }

    pub fn contains(&self, key: DeviceKey) -> bool {
        match key.domain {
            Domain::Light => self.lights.contains_key(&key.id),
            Domain::Shade => self.shades.contains_key(&key.id),
        }
    }

    pub fn light(&self, id: LoadId) -> Option<&Light> {
        self.lights.get(&id)
    }

    pub fn light_mut(&mut self, id: LoadId) -> Option<&mut Light> {
        self.lights.get_mut(&id)
    }

    pub fn shade(&self, id: LoadId) -> Option<&Shade> {
        self.shades.get(&id)
    }

    pub fn shade_mut(&mut self, id: LoadId) -> Option<&mut Shade> {
        self.shades.get_mut(&id)
    }

    pub fn lights(&self) -> impl Iterator<Item = &Light> {
        self.lights.values()
    }

    pub fn shades(&self) -> impl Iterator<Item = &Shade> {
        self.shades.values()
    }

    /// Every device key, lights first
    pub fn keys(&self) -> Vec<DeviceKey> {
        self.lights
            .keys()
            .map(|id| DeviceKey::light(*id))
            .chain(self.shades.keys().map(|id| DeviceKey::shade(*id)))
            .collect()
    }

    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    pub fn room(&self, id: RoomId) -> Option<&Room> {
        self.rooms.iter().find(|room| room.id == id)
    }

    /// Resolve a device's room reference
    pub fn room_for(&self, key: DeviceKey) -> Option<&Room> {
        let area = match key.domain {
            Domain::Light => self.light(key.id)?.area,
            Domain::Shade => self.shade(key.id)?.area,
        };
        self.room(area?)
    }
}

/// Registry shared between the router task, settle timers and the client facade
#[derive(Debug, Clone, Default)]
pub(crate) struct SharedRegistry(Arc<Mutex<DeviceRegistry>>);

impl SharedRegistry {
    pub(crate) fn new(registry: DeviceRegistry) -> Self {
        Self(Arc::new(Mutex::new(registry)))
    }

    /// Lock the registry; a panicked holder cannot leave it half-updated, so poison is ignored
    pub(crate) fn lock(&self) -> MutexGuard<'_, DeviceRegistry> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LightKind;

    fn topology(light_ids: &[LoadId]) -> Topology {
        Topology {
            rooms: vec![Room {
                id: 1,
                name: "Kitchen".to_string(),
                lights_area: Some(11),
                shades_area: None,
            }],
            lights: light_ids
                .iter()
                .map(|id| Light::new(*id, format!("Light {}", id), LightKind::Dimmer).with_area(Some(1)))
                .collect(),
            shades: Vec::new(),
        }
    }

    #[test]
    fn should_seed_from_topology() {
        let registry = DeviceRegistry::from_topology(topology(&[1, 2]));
        assert_eq!(registry.lights().count(), 2);
        assert_eq!(registry.keys(), vec![DeviceKey::light(1), DeviceKey::light(2)]);
    }

    #[test]
    fn should_report_added_and_removed_devices() {
        let mut registry = DeviceRegistry::from_topology(topology(&[1, 2, 3]));
        let diff = registry.reconcile(topology(&[2, 3, 4]));

        assert_eq!(diff.added, vec![DeviceKey::light(4)]);
        assert_eq!(diff.removed, vec![DeviceKey::light(1)]);
        assert_eq!(diff.unchanged, vec![DeviceKey::light(2), DeviceKey::light(3)]);
        assert!(!diff.is_empty());

        // Removal is left to the caller
        assert!(registry.contains(DeviceKey::light(1)));
        assert!(registry.remove(DeviceKey::light(1)));
        assert!(!registry.contains(DeviceKey::light(1)));
        assert!(!registry.remove(DeviceKey::light(1)));
    }

    #[test]
    fn should_keep_state_of_unchanged_devices() {
        let mut registry = DeviceRegistry::from_topology(topology(&[2]));
        registry.light_mut(2).unwrap().set_brightness(60);

        let mut renamed = topology(&[2]);
        renamed.lights[0].display_name = "Island".to_string();
        let diff = registry.reconcile(renamed);

        assert!(diff.is_empty());
        let light = registry.light(2).unwrap();
        assert_eq!(light.brightness, 60);
        assert_eq!(light.display_name, "Island");
    }

    #[test]
    fn should_keep_domains_apart() {
        let mut registry = DeviceRegistry::new();
        registry.insert_light(Light::new(7, "Lamp", LightKind::Plain));
        registry.insert_shade(Shade::new(7, "Blind"));

        assert!(registry.contains(DeviceKey::light(7)));
        assert!(registry.contains(DeviceKey::shade(7)));
        assert!(registry.remove(DeviceKey::shade(7)));
        assert!(registry.contains(DeviceKey::light(7)));
    }

    #[test]
    fn should_resolve_rooms_by_reference() {
        let registry = DeviceRegistry::from_topology(topology(&[1]));
        let room = registry.room_for(DeviceKey::light(1)).unwrap();
        assert_eq!(room.name, "Kitchen");
        assert!(registry.room_for(DeviceKey::shade(1)).is_none());
    }
}
