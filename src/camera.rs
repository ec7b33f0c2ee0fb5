use std::sync::Arc;

use serde_json::{Map, Value};

use crate::entity::{Entity, EntityBase, last_run_value};
use crate::image_fetcher::content_type;

/// Camera showing the image of the last detection pass, annotated by the
/// server when it marked up defects.
pub struct DetectionCamera {
    base: EntityBase,
}

impl DetectionCamera {
    pub fn new(base: EntityBase) -> Self {
        Self { base }
    }

    /// Latest image, `None` before the first completed pass.
    pub fn camera_image(&self) -> Option<Arc<[u8]>> {
        self.base.snapshot().image_with_errors.clone()
    }

    /// MIME type of [`Self::camera_image`].
    pub fn content_type(&self) -> &'static str {
        self.camera_image()
            .map(|image| content_type(&image))
            .unwrap_or("image/jpeg")
    }
}

impl Entity for DetectionCamera {
    fn base(&self) -> &EntityBase {
        &self.base
    }

    fn key(&self) -> &'static str {
        "camera"
    }

    fn name(&self) -> &'static str {
        "Obico ML Detection Camera"
    }

    fn translation_key(&self) -> &'static str {
        "latest_analysis"
    }

    fn state(&self) -> String {
        "idle".to_string()
    }

    fn attributes(&self) -> Map<String, Value> {
        let state = self.base.snapshot();
        Map::from_iter([
            (
                "source_entity".to_string(),
                Value::from(self.base.coordinator().camera_entity()),
            ),
            (
                "last_detection_confidence".to_string(),
                Value::from(state.avg_confidence),
            ),
            ("last_run".to_string(), last_run_value(&state)),
        ])
    }
}
