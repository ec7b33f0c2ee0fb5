use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use log::debug;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::constants;
use crate::error::{GuardianError, InferenceError, NetworkError};

/// Client for a remote Obico ML API server.
///
/// The server runs the failure-detection model; this client only uploads
/// images and reads back detections. One instance is shared by a
/// coordinator's probe loop and its detection passes.
#[derive(Clone)]
pub struct ObicoClient {
    http: reqwest::Client,
}

impl ObicoClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Probe the health-check endpoint derived from `detect_url`.
    ///
    /// # Errors
    ///
    /// Returns a [`NetworkError`] if the request times out, fails in
    /// transport, or answers with anything but 200.
    pub async fn check_health(&self, detect_url: &str, timeout: Duration) -> Result<(), NetworkError> {
        let url = health_check_url(detect_url);
        let response = self
            .http
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| NetworkError::from_reqwest(&url, timeout.as_secs(), e))?;

        if response.status() != StatusCode::OK {
            return Err(NetworkError::UnexpectedStatus {
                url,
                status: response.status().as_u16(),
            });
        }

        Ok(())
    }

    /// Submit an image for failure detection.
    ///
    /// # Arguments
    ///
    /// * `detect_url` - Detection endpoint of the server
    /// * `image` - Raw image bytes, sent base64 encoded
    /// * `threshold` - Minimum confidence of reported detections (0.0 to 1.0)
    /// * `timeout` - Bound on the whole request including the response body
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The request fails or times out ([`NetworkError`])
    /// - The server answers with a non-200 status ([`InferenceError::ApiError`])
    /// - The body is not a detection document ([`InferenceError::MalformedResponse`])
    pub async fn detect(
        &self,
        detect_url: &str,
        image: &[u8],
        threshold: f64,
        timeout: Duration,
    ) -> Result<InferenceResponse, GuardianError> {
        let request = InferenceRequest::new(image, threshold);
        let network_error = |e| NetworkError::from_reqwest(detect_url, timeout.as_secs(), e);

        let response = self
            .http
            .post(detect_url)
            .timeout(timeout)
            .json(&request)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        let body = response.text().await.map_err(network_error)?;

        if status != StatusCode::OK {
            return Err(InferenceError::ApiError {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        debug!("Obico API answered with {} bytes", body.len());
        InferenceResponse::parse(&body).map_err(GuardianError::from)
    }
}

/// Derive the health-check URL from a detection URL.
///
/// Everything from the first `/detect` on is dropped and `/hc` appended; a
/// URL without the marker is used as the base unchanged.
pub fn health_check_url(detect_url: &str) -> String {
    let base = detect_url
        .split(constants::DETECT_PATH_MARKER)
        .next()
        .unwrap_or(detect_url);
    format!("{}{}", base, constants::HEALTH_CHECK_PATH)
}

/// JSON body of a detection request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferenceRequest {
    pub img: String,
    pub threshold: f64,
    pub return_annotated: bool,
    pub nms: f64,
}

impl InferenceRequest {
    pub fn new(image: &[u8], threshold: f64) -> Self {
        Self {
            img: STANDARD.encode(image),
            threshold,
            return_annotated: true,
            nms: constants::NMS_THRESHOLD,
        }
    }
}

/// Parsed answer of the detection endpoint. Absent or null fields take defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InferenceResponse {
    #[serde(default)]
    pub detections: Vec<Detection>,

    #[serde(default)]
    pub inference_ms: Option<f64>,

    #[serde(default)]
    pub provider: Option<String>,

    #[serde(default)]
    pub image_with_detections: Option<String>,
}

impl InferenceResponse {
    pub fn parse(body: &str) -> Result<Self, InferenceError> {
        serde_json::from_str(body).map_err(|e| InferenceError::MalformedResponse {
            reason: e.to_string(),
        })
    }

    /// Reported inference duration, zero when absent or null.
    pub fn inference_ms(&self) -> f64 {
        self.inference_ms.unwrap_or_default()
    }

    /// Reported inference backend, `unknown` when absent or null.
    pub fn provider(&self) -> &str {
        self.provider
            .as_deref()
            .unwrap_or(constants::UNKNOWN_PROVIDER)
    }

    /// Mean confidence of the detections in percent, rounded to two decimals;
    /// zero without detections.
    pub fn average_confidence(&self) -> f64 {
        average_confidence(&self.detections)
    }

    /// Decode the annotated image, if the server returned a non-empty one.
    pub fn annotated_image(&self) -> Result<Option<Vec<u8>>, InferenceError> {
        match self.image_with_detections.as_deref() {
            None | Some("") => Ok(None),
            Some(encoded) => STANDARD
                .decode(encoded)
                .map(Some)
                .map_err(|e| InferenceError::InvalidImage {
                    reason: e.to_string(),
                }),
        }
    }
}

/// Mean of the detections' confidences in percent, rounded to two decimals.
pub fn average_confidence(detections: &[Detection]) -> f64 {
    if detections.is_empty() {
        return 0.0;
    }
    let sum: f64 = detections.iter().map(|d| d.confidence).sum();
    let mean = sum / detections.len() as f64 * 100.0;
    (mean * 100.0).round() / 100.0
}

/// A single failure reported by the server.
///
/// The wire form is positional: `[label, confidence, [x, y, w, h]]`, where
/// only the first two entries are guaranteed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "Vec<Value>")]
pub struct Detection {
    /// The type of failure detected.
    pub label: String,

    /// Confidence score clamped to 0.0 to 1.0.
    pub confidence: f64,

    /// Bounding box, when the server supplied one.
    pub bbox: Option<BoundingBox>,
}

/// Bounding box of a detection: center coordinates and size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl TryFrom<Vec<Value>> for Detection {
    type Error = String;

    fn try_from(fields: Vec<Value>) -> Result<Self, Self::Error> {
        let label = match fields.first() {
            Some(Value::String(label)) => label.clone(),
            Some(other) => other.to_string(),
            None => return Err("detection is empty".to_string()),
        };
        let confidence = fields
            .get(1)
            .and_then(Value::as_f64)
            .ok_or_else(|| format!("detection '{}' has no numeric confidence", label))?;
        let bbox = fields.get(2).and_then(parse_bbox);

        Ok(Self {
            label,
            confidence: confidence.clamp(0.0, 1.0),
            bbox,
        })
    }
}

fn parse_bbox(value: &Value) -> Option<BoundingBox> {
    let coords = value
        .as_array()?
        .iter()
        .map(Value::as_f64)
        .collect::<Option<Vec<_>>>()?;
    match coords.as_slice() {
        [x, y, w, h] => Some(BoundingBox {
            x: *x,
            y: *y,
            w: *w,
            h: *h,
        }),
        _ => None,
    }
}

impl Detection {
    /// Get the confidence as a percentage.
    pub fn confidence_percent(&self) -> f64 {
        self.confidence * 100.0
    }
}
