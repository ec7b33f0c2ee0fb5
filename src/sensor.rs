use log::debug;
use serde_json::{Map, Value};

use crate::entity::{Entity, EntityBase, RestoredState, last_run_value};

fn last_run_attributes(base: &EntityBase) -> Map<String, Value> {
    let state = base.snapshot();
    Map::from_iter([("last_run".to_string(), last_run_value(&state))])
}

fn restored_number(restored: Option<&RestoredState>) -> Option<f64> {
    restored?
        .state
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

/// Average confidence of the last detection pass, in percent.
pub struct ConfidenceSensor {
    base: EntityBase,
}

impl ConfidenceSensor {
    pub fn new(base: EntityBase) -> Self {
        Self { base }
    }

    pub fn native_value(&self) -> f64 {
        self.base.snapshot().avg_confidence
    }

    /// Seed the average confidence from a restored state while the live
    /// value is still zero. Non-numeric states are ignored.
    pub fn restore(&self, restored: Option<&RestoredState>) -> bool {
        let Some(value) = restored_number(restored) else {
            return false;
        };
        let seeded = self.base.coordinator().store().seed_avg_confidence(value);
        if seeded {
            debug!(
                "{}: restored confidence {}%",
                self.base.coordinator().name(),
                value
            );
        }
        seeded
    }
}

impl Entity for ConfidenceSensor {
    fn base(&self) -> &EntityBase {
        &self.base
    }

    fn key(&self) -> &'static str {
        "confidence"
    }

    fn name(&self) -> &'static str {
        "Obico ML Confidence"
    }

    fn translation_key(&self) -> &'static str {
        "confidence"
    }

    fn state(&self) -> String {
        self.native_value().to_string()
    }

    fn attributes(&self) -> Map<String, Value> {
        last_run_attributes(&self.base)
    }

    fn unit_of_measurement(&self) -> Option<&'static str> {
        Some("%")
    }
}

/// Inference duration reported by the server for the last pass.
pub struct InferenceTimeSensor {
    base: EntityBase,
}

impl InferenceTimeSensor {
    pub fn new(base: EntityBase) -> Self {
        Self { base }
    }

    pub fn native_value(&self) -> f64 {
        self.base.snapshot().inference_ms
    }

    /// Seed the inference duration from a restored state while the live
    /// value is still zero.
    pub fn restore(&self, restored: Option<&RestoredState>) -> bool {
        let Some(value) = restored_number(restored) else {
            return false;
        };
        self.base.coordinator().store().seed_inference_ms(value)
    }
}

impl Entity for InferenceTimeSensor {
    fn base(&self) -> &EntityBase {
        &self.base
    }

    fn key(&self) -> &'static str {
        "inference_time"
    }

    fn name(&self) -> &'static str {
        "Obico ML Inference Time"
    }

    fn translation_key(&self) -> &'static str {
        "inference_time"
    }

    fn state(&self) -> String {
        self.native_value().to_string()
    }

    fn attributes(&self) -> Map<String, Value> {
        last_run_attributes(&self.base)
    }

    fn device_class(&self) -> Option<&'static str> {
        Some("duration")
    }

    fn unit_of_measurement(&self) -> Option<&'static str> {
        Some("ms")
    }

    fn icon(&self) -> Option<&'static str> {
        Some("mdi:speedometer")
    }
}
