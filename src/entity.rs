//! Entities projecting a coordinator's state to the host.
//!
//! Entities never own data. Each one holds the shared coordinator and renders
//! a subset of the latest [`DetectionState`] snapshot; the button is the only
//! one that writes, by triggering a detection pass.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, TimeZone};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::watch;

use crate::binary_sensor::{ConnectivitySensor, FailureSensor};
use crate::button::TriggerButton;
use crate::camera::DetectionCamera;
use crate::config::constants::DOMAIN;
use crate::coordinator::DetectionCoordinator;
use crate::sensor::{ConfidenceSensor, InferenceTimeSensor};
use crate::state::DetectionState;

pub const STATE_ON: &str = "on";
pub const STATE_OFF: &str = "off";
pub const STATE_UNKNOWN: &str = "unknown";

/// Device all entities of one config entry are grouped under.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub identifiers: (String, String),
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    pub configuration_url: String,
}

/// Entity state persisted by the host across restarts.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RestoredState {
    pub state: String,
    pub attributes: Map<String, Value>,
}

impl RestoredState {
    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }
}

/// What every entity composes: the coordinator it reads and its device.
#[derive(Clone)]
pub struct EntityBase {
    coordinator: Arc<DetectionCoordinator>,
    device: DeviceInfo,
}

impl EntityBase {
    pub fn new(coordinator: Arc<DetectionCoordinator>, title: &str, url: &str) -> Self {
        let device = DeviceInfo {
            identifiers: (DOMAIN.to_string(), coordinator.entry_id().to_string()),
            name: title.to_string(),
            manufacturer: "Obico".to_string(),
            model: "ML API Integration".to_string(),
            configuration_url: url.to_string(),
        };
        Self {
            coordinator,
            device,
        }
    }

    pub fn coordinator(&self) -> &Arc<DetectionCoordinator> {
        &self.coordinator
    }

    pub fn snapshot(&self) -> Arc<DetectionState> {
        self.coordinator.state()
    }
}

/// Read side shared by all entity kinds.
pub trait Entity: Send + Sync {
    fn base(&self) -> &EntityBase;

    /// Suffix making the unique id distinct within one entry.
    fn key(&self) -> &'static str;

    fn name(&self) -> &'static str;

    fn translation_key(&self) -> &'static str;

    /// Rendered state value.
    fn state(&self) -> String;

    fn attributes(&self) -> Map<String, Value> {
        Map::new()
    }

    fn device_class(&self) -> Option<&'static str> {
        None
    }

    fn unit_of_measurement(&self) -> Option<&'static str> {
        None
    }

    fn icon(&self) -> Option<&'static str> {
        None
    }

    fn unique_id(&self) -> String {
        format!("{}_{}_{}", DOMAIN, self.base().coordinator().entry_id(), self.key())
    }

    fn device_info(&self) -> &DeviceInfo {
        &self.base().device
    }

    /// Receiver firing whenever the entity should re-render.
    fn subscribe(&self) -> watch::Receiver<Arc<DetectionState>> {
        self.base().coordinator().subscribe()
    }
}

/// All entities created for one config entry.
pub struct EntitySet {
    pub connectivity: ConnectivitySensor,
    pub failure: FailureSensor,
    pub confidence: ConfidenceSensor,
    pub inference_time: InferenceTimeSensor,
    pub camera: DetectionCamera,
    pub button: TriggerButton,
}

impl EntitySet {
    pub fn new(coordinator: Arc<DetectionCoordinator>, title: &str, url: &str) -> Self {
        let base = EntityBase::new(coordinator, title, url);
        Self {
            connectivity: ConnectivitySensor::new(base.clone()),
            failure: FailureSensor::new(base.clone()),
            confidence: ConfidenceSensor::new(base.clone()),
            inference_time: InferenceTimeSensor::new(base.clone()),
            camera: DetectionCamera::new(base.clone()),
            button: TriggerButton::new(base),
        }
    }

    pub fn all(&self) -> [&dyn Entity; 6] {
        [
            &self.connectivity,
            &self.failure,
            &self.confidence,
            &self.inference_time,
            &self.camera,
            &self.button,
        ]
    }

    /// Seed the coordinator from states the host persisted, keyed by unique
    /// id. Only entities whose live value is still unset take part.
    pub fn restore(&self, restored: &HashMap<String, RestoredState>) {
        self.failure
            .restore(restored.get(&self.failure.unique_id()));
        self.confidence
            .restore(restored.get(&self.confidence.unique_id()));
        self.inference_time
            .restore(restored.get(&self.inference_time.unique_id()));
    }

    /// Current state of every entity, keyed by unique id.
    pub fn render(&self) -> Map<String, Value> {
        self.all()
            .iter()
            .map(|entity| {
                let mut rendered = Map::new();
                rendered.insert("state".to_string(), Value::String(entity.state()));
                rendered.insert("attributes".to_string(), Value::Object(entity.attributes()));
                (entity.unique_id(), Value::Object(rendered))
            })
            .collect()
    }
}

/// Parse a timestamp persisted in an entity attribute.
///
/// Accepts RFC 3339 and offset-less ISO-8601 values, the latter read as
/// local time.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(raw) {
        return Some(timestamp);
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    Local
        .from_local_datetime(&naive)
        .single()
        .map(|timestamp| timestamp.fixed_offset())
}

pub(crate) fn last_run_value(state: &DetectionState) -> Value {
    state.last_run().map(Value::String).unwrap_or(Value::Null)
}
