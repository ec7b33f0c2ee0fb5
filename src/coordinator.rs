use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use log::{debug, error, info, warn};
use tokio::sync::{Mutex, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::{EntryConfig, Timeouts};
use crate::detector::ObicoClient;
use crate::error::{GuardianError, NetworkError};
use crate::host::HomeState;
use crate::image_fetcher::{ImageFetcher, resolve_image_url};
use crate::state::{DetectionState, StateStore};

/// Mutable part of a coordinator's configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub url: String,
    pub interval: Duration,
    pub threshold: f64,
}

/// Result of one on-demand detection pass.
///
/// A pass never fails towards its caller; the outcome only tells logs and
/// tests what happened to the state.
#[derive(Debug)]
pub enum DetectionOutcome {
    /// The server answered and the state describes this pass.
    Completed(DetectionSummary),

    /// Nothing was sent to the server and the state is untouched.
    Skipped(SkipReason),

    /// The inference call failed; the state now reports disconnected.
    Disconnected(Disconnect),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionSummary {
    pub detections: usize,
    pub avg_confidence: f64,
    pub annotated: bool,
}

#[derive(Debug)]
pub enum SkipReason {
    /// The bound camera entity does not exist (yet).
    CameraMissing,

    /// The camera exposes no picture reference.
    NoImageReference,

    /// The picture could not be downloaded.
    ImageUnavailable(NetworkError),
}

#[derive(Debug)]
pub enum Disconnect {
    /// Timeouts, refused connections or non-success answers.
    Transient(GuardianError),

    /// The server answered with something that is not a detection result.
    Fatal(GuardianError),
}

impl DetectionOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, DetectionOutcome::Completed(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, DetectionOutcome::Skipped(_))
    }

    /// Connectivity this pass recorded, `None` when it recorded nothing.
    pub fn api_connected(&self) -> Option<bool> {
        match self {
            DetectionOutcome::Completed(_) => Some(true),
            DetectionOutcome::Skipped(_) => None,
            DetectionOutcome::Disconnected(_) => Some(false),
        }
    }
}

impl From<GuardianError> for Disconnect {
    fn from(err: GuardianError) -> Self {
        if err.is_transient() {
            Disconnect::Transient(err)
        } else {
            Disconnect::Fatal(err)
        }
    }
}

/// Owner of one camera's detection state.
///
/// Runs the cheap periodic connectivity probe and the expensive on-demand
/// detection pass, and publishes every state change to subscribed entities.
pub struct DetectionCoordinator {
    name: String,
    entry_id: String,
    camera_entity: String,
    settings: watch::Sender<Settings>,
    timeouts: Timeouts,
    store: StateStore,
    client: ObicoClient,
    fetcher: ImageFetcher,
    host: Arc<dyn HomeState>,
    detection_lock: Mutex<()>,
}

impl DetectionCoordinator {
    /// Create a coordinator for `config` with the default timeouts.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialised.
    pub fn new(
        entry_id: impl Into<String>,
        config: &EntryConfig,
        host: Arc<dyn HomeState>,
    ) -> Result<Self, GuardianError> {
        Self::with_timeouts(entry_id, config, host, Timeouts::default())
    }

    pub fn with_timeouts(
        entry_id: impl Into<String>,
        config: &EntryConfig,
        host: Arc<dyn HomeState>,
        timeouts: Timeouts,
    ) -> Result<Self, GuardianError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| NetworkError::RequestFailed {
                url: config.url.clone(),
                reason: format!("cannot create HTTP client: {}", e),
            })?;

        let (settings, _rx) = watch::channel(Settings {
            url: config.url.clone(),
            interval: probe_period(config.interval_secs),
            threshold: config.threshold,
        });

        Ok(Self {
            name: format!("Obico ML ({})", config.camera_entity),
            entry_id: entry_id.into(),
            camera_entity: config.camera_entity.clone(),
            settings,
            timeouts,
            store: StateStore::new(),
            client: ObicoClient::new(http.clone()),
            fetcher: ImageFetcher::new(http, timeouts.image_fetch),
            host,
            detection_lock: Mutex::new(()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry_id(&self) -> &str {
        &self.entry_id
    }

    pub fn camera_entity(&self) -> &str {
        &self.camera_entity
    }

    pub fn settings(&self) -> Settings {
        self.settings.borrow().clone()
    }

    /// Current detection state.
    pub fn state(&self) -> Arc<DetectionState> {
        self.store.snapshot()
    }

    /// Receiver notified whenever the state is published.
    pub fn subscribe(&self) -> watch::Receiver<Arc<DetectionState>> {
        self.store.subscribe()
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Replace URL, probe interval and threshold in one step. A running probe
    /// loop switches to the new interval right away.
    pub fn update_config(&self, url: &str, interval_secs: u64, threshold: f64) {
        self.settings.send_replace(Settings {
            url: url.to_string(),
            interval: probe_period(interval_secs),
            threshold,
        });
        info!(
            "{}: configuration updated (url {}, interval {}s, threshold {})",
            self.name, url, interval_secs, threshold
        );
    }

    /// Connectivity probe against the API's health-check endpoint.
    ///
    /// Records and publishes only `api_connected`; every failure counts as
    /// disconnected. Returns the recorded value.
    pub async fn refresh(&self) -> bool {
        let url = self.settings.borrow().url.clone();
        let connected = match self.client.check_health(&url, self.timeouts.health_check).await {
            Ok(()) => true,
            Err(e @ NetworkError::UnexpectedStatus { .. }) => {
                error!("{}: Obico API health check failed: {}", self.name, e);
                false
            }
            Err(e) => {
                debug!("{}: Obico API unreachable: {}", self.name, e);
                false
            }
        };

        self.store.publish(|state| state.api_connected = connected);
        connected
    }

    /// Run one full detection pass: fetch the camera picture, submit it for
    /// inference and publish the result.
    ///
    /// Passes on the same coordinator run one after another, so the state
    /// always describes the last completed one.
    pub async fn trigger_detection(&self) -> DetectionOutcome {
        let _pass = self.detection_lock.lock().await;
        debug!("{}: Triggering manual Obico detection", self.name);

        match self.run_detection().await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!("{}: Error executing Obico detection: {}", self.name, err);
                self.store.publish(|state| state.api_connected = false);
                DetectionOutcome::Disconnected(err.into())
            }
        }
    }

    async fn run_detection(&self) -> Result<DetectionOutcome, GuardianError> {
        let Some(camera) = self.host.entity_state(&self.camera_entity) else {
            warn!(
                "{}: Source camera entity {} not found",
                self.name, self.camera_entity
            );
            return Ok(DetectionOutcome::Skipped(SkipReason::CameraMissing));
        };

        let Some(picture) = camera.entity_picture() else {
            debug!(
                "{}: Camera {} has no picture yet, skipping detection",
                self.name, self.camera_entity
            );
            return Ok(DetectionOutcome::Skipped(SkipReason::NoImageReference));
        };
        let image_url = resolve_image_url(picture, &self.host.external_url());

        let original_image = match self.fetcher.fetch(&image_url).await {
            Ok(data) => data,
            Err(e) => {
                error!("{}: Error fetching camera image: {}", self.name, e);
                return Ok(DetectionOutcome::Skipped(SkipReason::ImageUnavailable(e)));
            }
        };

        let (url, threshold) = {
            let settings = self.settings.borrow();
            (settings.url.clone(), settings.threshold)
        };
        let response = self
            .client
            .detect(&url, &original_image, threshold, self.timeouts.detection)
            .await?;
        let annotated_image = response.annotated_image()?;

        for detection in &response.detections {
            debug!(
                "{}: Detected {} with {:.2}% confidence",
                self.name,
                detection.label,
                detection.confidence_percent()
            );
        }

        let summary = DetectionSummary {
            detections: response.detections.len(),
            avg_confidence: response.average_confidence(),
            annotated: annotated_image.is_some(),
        };
        let image: Arc<[u8]> = annotated_image.unwrap_or(original_image).into();
        let finished_at = Local::now().fixed_offset();

        self.store.publish(|state| {
            state.api_connected = true;
            state.error_detected = summary.detections > 0;
            state.inference_ms = response.inference_ms();
            state.provider = response.provider().to_string();
            state.avg_confidence = summary.avg_confidence;
            state.last_detection_timestamp = Some(finished_at);
            state.image_with_errors = Some(image);
        });

        info!(
            "{}: {} failure(s) detected, average confidence {:.2}%",
            self.name, summary.detections, summary.avg_confidence
        );
        Ok(DetectionOutcome::Completed(summary))
    }

    /// Probe connectivity every configured interval until `cancel` fires.
    ///
    /// Probes are awaited inline, so a slow probe delays the next tick instead
    /// of overlapping it. The first tick is one full interval away; callers
    /// run the initial probe themselves.
    pub async fn run_probe_loop(&self, cancel: CancellationToken) {
        let mut settings_rx = self.settings.subscribe();
        let mut period = settings_rx.borrow_and_update().interval;
        let mut ticker = probe_ticker(period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.refresh().await;
                }
                changed = settings_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let next = settings_rx.borrow_and_update().interval;
                    if next != period {
                        period = next;
                        ticker = probe_ticker(period);
                        debug!("{}: probing every {}s", self.name, period.as_secs());
                    }
                }
                _ = cancel.cancelled() => {
                    info!("{}: probe loop shutting down", self.name);
                    break;
                }
            }
        }
    }
}

fn probe_period(interval_secs: u64) -> Duration {
    Duration::from_secs(interval_secs.max(1))
}

fn probe_ticker(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
