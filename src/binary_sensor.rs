use log::debug;
use serde_json::{Map, Value};

use crate::entity::{
    Entity, EntityBase, RestoredState, STATE_OFF, STATE_ON, STATE_UNKNOWN, last_run_value,
    parse_timestamp,
};

fn on_off(value: bool) -> String {
    if value { STATE_ON } else { STATE_OFF }.to_string()
}

/// Whether the Obico API answered the last probe or detection call.
pub struct ConnectivitySensor {
    base: EntityBase,
}

impl ConnectivitySensor {
    pub fn new(base: EntityBase) -> Self {
        Self { base }
    }

    pub fn is_on(&self) -> bool {
        self.base.snapshot().api_connected
    }
}

impl Entity for ConnectivitySensor {
    fn base(&self) -> &EntityBase {
        &self.base
    }

    fn key(&self) -> &'static str {
        "connectivity"
    }

    fn name(&self) -> &'static str {
        "Obico API Connected"
    }

    fn translation_key(&self) -> &'static str {
        "api_connected"
    }

    fn state(&self) -> String {
        on_off(self.is_on())
    }

    fn device_class(&self) -> Option<&'static str> {
        Some("connectivity")
    }
}

/// Problem sensor: did the last detection pass find a print failure.
///
/// Unknown until a pass completed or a previous result was restored.
pub struct FailureSensor {
    base: EntityBase,
}

impl FailureSensor {
    pub fn new(base: EntityBase) -> Self {
        Self { base }
    }

    pub fn is_on(&self) -> Option<bool> {
        let state = self.base.snapshot();
        state
            .last_detection_timestamp
            .map(|_| state.error_detected)
    }

    /// Seed the coordinator from the state persisted before a restart.
    ///
    /// Only the detection flag and its timestamp are copied, and only while
    /// the coordinator has no timestamp of its own. States other than `on`
    /// and `off` seed nothing, `unknown` included: the sensor stays unknown
    /// instead of becoming `off`.
    pub fn restore(&self, restored: Option<&RestoredState>) -> bool {
        let Some(restored) = restored else {
            return false;
        };
        let error_detected = match restored.state.as_str() {
            STATE_ON => true,
            STATE_OFF => false,
            // unavailable, unknown
            _ => return false,
        };
        let last_run = restored.attribute_str("last_run").and_then(parse_timestamp);

        let seeded = self
            .base
            .coordinator()
            .store()
            .seed_detection(error_detected, last_run);
        if seeded {
            debug!(
                "{}: restored failure flag {} from previous run",
                self.base.coordinator().name(),
                restored.state
            );
        }
        seeded
    }
}

impl Entity for FailureSensor {
    fn base(&self) -> &EntityBase {
        &self.base
    }

    fn key(&self) -> &'static str {
        "error_detection"
    }

    fn name(&self) -> &'static str {
        "Obico ML Failure Detected"
    }

    fn translation_key(&self) -> &'static str {
        "failure_detected"
    }

    fn state(&self) -> String {
        self.is_on()
            .map(on_off)
            .unwrap_or_else(|| STATE_UNKNOWN.to_string())
    }

    fn attributes(&self) -> Map<String, Value> {
        let state = self.base.snapshot();
        Map::from_iter([
            ("avg_confidence".to_string(), Value::from(state.avg_confidence)),
            ("inference_ms".to_string(), Value::from(state.inference_ms)),
            ("provider".to_string(), Value::from(state.provider.as_str())),
            ("last_run".to_string(), last_run_value(&state)),
        ])
    }

    fn device_class(&self) -> Option<&'static str> {
        Some("problem")
    }
}
