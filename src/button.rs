use std::sync::Mutex;

use chrono::{DateTime, Local};

use crate::coordinator::DetectionOutcome;
use crate::entity::{Entity, EntityBase, STATE_UNKNOWN};

/// Button running a detection pass when pressed.
pub struct TriggerButton {
    base: EntityBase,
    last_pressed: Mutex<Option<DateTime<Local>>>,
}

impl TriggerButton {
    pub fn new(base: EntityBase) -> Self {
        Self {
            base,
            last_pressed: Mutex::new(None),
        }
    }

    pub async fn press(&self) -> DetectionOutcome {
        if let Ok(mut last_pressed) = self.last_pressed.lock() {
            *last_pressed = Some(Local::now());
        }
        self.base.coordinator().trigger_detection().await
    }

    pub fn last_pressed(&self) -> Option<DateTime<Local>> {
        self.last_pressed.lock().ok().and_then(|pressed| *pressed)
    }
}

impl Entity for TriggerButton {
    fn base(&self) -> &EntityBase {
        &self.base
    }

    fn key(&self) -> &'static str {
        "trigger_button"
    }

    fn name(&self) -> &'static str {
        "Trigger Detection"
    }

    fn translation_key(&self) -> &'static str {
        "trigger"
    }

    fn state(&self) -> String {
        self.last_pressed()
            .map(|pressed| pressed.to_rfc3339())
            .unwrap_or_else(|| STATE_UNKNOWN.to_string())
    }

    fn icon(&self) -> Option<&'static str> {
        Some("mdi:camera-iris")
    }
}
