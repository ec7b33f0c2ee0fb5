//! Interfaces of the home-automation host the bridge runs inside.
//!
//! The coordinator needs live entity state to find the camera picture, and the
//! service dispatcher needs the device and entity registries to resolve call
//! targets. [`InMemoryHost`] backs both for the standalone runner and tests.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use serde_json::{Map, Value};

/// Attribute under which cameras publish their current picture.
pub const ENTITY_PICTURE: &str = "entity_picture";

/// Live state of one host entity.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EntityState {
    pub state: String,
    pub attributes: Map<String, Value>,
}

impl EntityState {
    /// Picture reference published by a camera or image entity, if any.
    pub fn entity_picture(&self) -> Option<&str> {
        self.attributes
            .get(ENTITY_PICTURE)
            .and_then(Value::as_str)
            .filter(|picture| !picture.is_empty())
    }
}

/// Read access to the host's state machine.
pub trait HomeState: Send + Sync {
    /// Current state of `entity_id`, or `None` if the host does not know it.
    fn entity_state(&self, entity_id: &str) -> Option<EntityState>;

    /// Base URL under which the host is reachable from outside.
    fn external_url(&self) -> String;
}

/// Read access to the host's device and entity registries.
pub trait Registry: Send + Sync {
    /// Config entries a device belongs to, or `None` for unknown devices.
    fn device_config_entries(&self, device_id: &str) -> Option<Vec<String>>;

    /// Config entry owning a registered entity.
    fn entity_config_entry(&self, entity_id: &str) -> Option<String>;
}

/// Host backed by plain maps.
pub struct InMemoryHost {
    external_url: String,
    states: RwLock<HashMap<String, EntityState>>,
    devices: RwLock<HashMap<String, Vec<String>>>,
    entities: RwLock<HashMap<String, String>>,
}

impl InMemoryHost {
    pub fn new(external_url: impl Into<String>) -> Self {
        Self {
            external_url: external_url.into(),
            states: RwLock::new(HashMap::new()),
            devices: RwLock::new(HashMap::new()),
            entities: RwLock::new(HashMap::new()),
        }
    }

    /// Publish a camera entity whose picture lives at `picture`.
    pub fn set_camera(&self, entity_id: &str, picture: &str) {
        let mut attributes = Map::new();
        attributes.insert(ENTITY_PICTURE.to_string(), Value::String(picture.to_string()));
        self.set_state(
            entity_id,
            EntityState {
                state: "idle".to_string(),
                attributes,
            },
        );
    }

    pub fn set_state(&self, entity_id: &str, state: EntityState) {
        self.states
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entity_id.to_string(), state);
    }

    pub fn remove_state(&self, entity_id: &str) {
        self.states
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(entity_id);
    }

    /// Register a device belonging to `entry_id`.
    pub fn register_device(&self, device_id: &str, entry_id: &str) {
        self.devices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(device_id.to_string())
            .or_default()
            .push(entry_id.to_string());
    }

    /// Register an entity belonging to `entry_id`.
    pub fn register_entity(&self, entity_id: &str, entry_id: &str) {
        self.entities
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entity_id.to_string(), entry_id.to_string());
    }
}

impl HomeState for InMemoryHost {
    fn entity_state(&self, entity_id: &str) -> Option<EntityState> {
        self.states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(entity_id)
            .cloned()
    }

    fn external_url(&self) -> String {
        self.external_url.clone()
    }
}

impl Registry for InMemoryHost {
    fn device_config_entries(&self, device_id: &str) -> Option<Vec<String>> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(device_id)
            .cloned()
    }

    fn entity_config_entry(&self, entity_id: &str) -> Option<String> {
        self.entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(entity_id)
            .cloned()
    }
}
