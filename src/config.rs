use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Validated configuration of one monitored camera.
///
/// This is what a config entry persists. The camera entity takes part in the
/// entry's unique id, so it can never change after creation; editing the
/// other three fields goes through [`EntryOptions`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryConfig {
    /// Detection endpoint of the Obico ML API, without trailing slash.
    pub url: String,

    /// Seconds between connectivity probes.
    pub interval_secs: u64,

    /// Camera or image entity whose picture is analysed.
    pub camera_entity: String,

    /// Minimum confidence (0.0 to 1.0) the server reports detections for.
    pub threshold: f64,
}

/// Raw values submitted when a new entry is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInput {
    pub url: String,
    pub interval_secs: u64,
    pub camera_entity: String,
    #[serde(default)]
    pub threshold: Option<f64>,
}

/// Editable subset of an entry's configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryOptions {
    pub url: String,
    pub interval_secs: u64,
    pub threshold: f64,
}

impl EntryConfig {
    /// Sanitize and validate the values of a creation form.
    ///
    /// The URL loses its trailing slashes so `http://api/` and `http://api`
    /// produce the same unique id.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if:
    /// - the URL is not an absolute http(s) URL
    /// - the interval is below [`constants::MIN_INTERVAL_SECS_CREATE`]
    /// - the camera entity is not a `camera.*` or `image.*` entity
    /// - the threshold lies outside 0.0 to 1.0
    pub fn from_user_input(input: UserInput) -> Result<Self, ConfigError> {
        let url = validate_url(&input.url)?;
        let interval_secs = validate_interval(input.interval_secs, constants::MIN_INTERVAL_SECS_CREATE)?;
        let camera_entity = validate_camera_entity(&input.camera_entity)?;
        let threshold = validate_threshold(input.threshold.unwrap_or(constants::DEFAULT_THRESHOLD))?;

        Ok(Self {
            url,
            interval_secs,
            camera_entity,
            threshold,
        })
    }

    /// Composite id allowing one camera to be watched by different API hosts
    /// while rejecting the same camera on the same host twice.
    pub fn unique_id(&self) -> String {
        format!("{}-{}", self.camera_entity, self.url)
    }

    /// Human readable entry title.
    pub fn title(&self) -> String {
        format!("Obico - {}", self.camera_entity)
    }

    /// Configuration with edited options applied. The camera never changes.
    pub fn with_options(&self, options: &EntryOptions) -> Self {
        Self {
            url: options.url.clone(),
            interval_secs: options.interval_secs,
            camera_entity: self.camera_entity.clone(),
            threshold: options.threshold,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl EntryOptions {
    /// Options form pre-filled with the entry's current values.
    pub fn current(config: &EntryConfig) -> Self {
        Self {
            url: config.url.clone(),
            interval_secs: config.interval_secs,
            threshold: config.threshold,
        }
    }

    /// Validate edited options. Edits allow a shorter interval than creation.
    pub fn validate(self) -> Result<Self, ConfigError> {
        Ok(Self {
            url: validate_url(&self.url)?,
            interval_secs: validate_interval(self.interval_secs, constants::MIN_INTERVAL_SECS_EDIT)?,
            threshold: validate_threshold(self.threshold)?,
        })
    }
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn validate_url(raw: &str) -> Result<String, ConfigError> {
    let url = raw.trim().trim_end_matches('/').to_string();
    match reqwest::Url::parse(&url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(url),
        Ok(_) => Err(invalid("url", raw, "scheme must be http or https")),
        Err(e) => Err(invalid("url", raw, &e.to_string())),
    }
}

fn validate_interval(interval_secs: u64, minimum: u64) -> Result<u64, ConfigError> {
    if interval_secs < minimum {
        return Err(invalid(
            "interval",
            interval_secs,
            &format!("must be at least {} seconds", minimum),
        ));
    }
    Ok(interval_secs)
}

fn validate_camera_entity(entity_id: &str) -> Result<String, ConfigError> {
    let valid = constants::CAMERA_DOMAINS.iter().any(|domain| {
        entity_id
            .strip_prefix(domain)
            .and_then(|rest| rest.strip_prefix('.'))
            .is_some_and(|object_id| !object_id.is_empty())
    });
    if !valid {
        return Err(invalid(
            "camera_entity",
            entity_id,
            "must be a camera or image entity",
        ));
    }
    Ok(entity_id.to_string())
}

fn validate_threshold(threshold: f64) -> Result<f64, ConfigError> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(invalid("threshold", threshold, "must be between 0.0 and 1.0"));
    }
    Ok(threshold)
}

/// Per-request timeouts of the coordinator's three network calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub health_check: Duration,
    pub image_fetch: Duration,
    pub detection: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            health_check: Duration::from_secs(constants::HEALTH_CHECK_TIMEOUT_SECS),
            image_fetch: Duration::from_secs(constants::IMAGE_FETCH_TIMEOUT_SECS),
            detection: Duration::from_secs(constants::DETECTION_TIMEOUT_SECS),
        }
    }
}

/// Configuration of the standalone runner, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// The monitored entry.
    ///
    /// Environment variables: `OBICO_URL`, `OBICO_INTERVAL`, `CAMERA_ENTITY`,
    /// `OBICO_THRESHOLD`
    pub entry: EntryConfig,

    /// Picture URL published by the camera entity, absolute or relative to
    /// `external_url`.
    /// Environment variable: `CAMERA_IMAGE_URL`
    pub camera_image_url: String,

    /// Externally reachable base URL used to absolutize relative pictures.
    /// Environment variable: `EXTERNAL_URL`
    pub external_url: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are not set or
    /// cannot be parsed:
    /// - `OBICO_URL`: Obico ML detection endpoint (required)
    /// - `CAMERA_ENTITY`: camera entity id (required)
    /// - `CAMERA_IMAGE_URL`: picture URL of the camera (required)
    /// - `OBICO_INTERVAL`: probe interval in seconds (default: "60")
    /// - `OBICO_THRESHOLD`: confidence threshold (default: "0.38")
    /// - `EXTERNAL_URL`: base URL (default: "http://localhost:8123")
    pub fn load() -> Result<Self, ConfigError> {
        let url = required_env("OBICO_URL")?;
        let camera_entity = required_env("CAMERA_ENTITY")?;
        let camera_image_url = required_env("CAMERA_IMAGE_URL")?;

        let interval_raw = std::env::var("OBICO_INTERVAL")
            .unwrap_or_else(|_| constants::DEFAULT_INTERVAL_SECS.to_string());
        let interval_secs = interval_raw
            .parse::<u64>()
            .map_err(|e| invalid("OBICO_INTERVAL", &interval_raw, &e.to_string()))?;

        let threshold_raw = std::env::var("OBICO_THRESHOLD")
            .unwrap_or_else(|_| constants::DEFAULT_THRESHOLD.to_string());
        let threshold = threshold_raw
            .parse::<f64>()
            .map_err(|e| invalid("OBICO_THRESHOLD", &threshold_raw, &e.to_string()))?;

        let external_url = std::env::var("EXTERNAL_URL")
            .unwrap_or_else(|_| constants::DEFAULT_EXTERNAL_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let entry = EntryConfig::from_user_input(UserInput {
            url,
            interval_secs,
            camera_entity,
            threshold: Some(threshold),
        })?;

        Ok(Config {
            entry,
            camera_image_url,
            external_url,
        })
    }
}

fn required_env(var_name: &str) -> Result<String, ConfigError> {
    std::env::var(var_name).map_err(|_| ConfigError::MissingEnvVar {
        var_name: var_name.to_string(),
    })
}

/// Application constants used throughout the system.
pub mod constants {
    /// Integration domain, used in device identifiers and unique ids.
    pub const DOMAIN: &str = "obico_ml";

    /// Connectivity probe interval in seconds.
    pub const DEFAULT_INTERVAL_SECS: u64 = 60;

    /// Default confidence threshold sent with every detection request.
    pub const DEFAULT_THRESHOLD: f64 = 0.38;

    /// Minimum probe interval accepted when an entry is created.
    pub const MIN_INTERVAL_SECS_CREATE: u64 = 5;

    /// Minimum probe interval accepted when options are edited.
    pub const MIN_INTERVAL_SECS_EDIT: u64 = 2;

    /// Entity domains a camera binding may point to.
    pub const CAMERA_DOMAINS: [&str; 2] = ["camera", "image"];

    /// Marker the health-check URL is derived at.
    pub const DETECT_PATH_MARKER: &str = "/detect";

    /// Path appended to the API base for the health check.
    pub const HEALTH_CHECK_PATH: &str = "/hc";

    /// Non-max-suppression parameter sent with every detection request.
    pub const NMS_THRESHOLD: f64 = 0.45;

    /// Provider reported when the server does not name one.
    pub const UNKNOWN_PROVIDER: &str = "unknown";

    pub const HEALTH_CHECK_TIMEOUT_SECS: u64 = 5;
    pub const IMAGE_FETCH_TIMEOUT_SECS: u64 = 10;
    pub const DETECTION_TIMEOUT_SECS: u64 = 20;

    /// Base URL used by the runner when `EXTERNAL_URL` is not set.
    pub const DEFAULT_EXTERNAL_URL: &str = "http://localhost:8123";
}
