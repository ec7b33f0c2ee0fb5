//! Obico Guardian - remote print-failure detection for home-automation hosts.
//!
//! This library binds a camera entity to an Obico ML API server. A
//! coordinator per camera keeps the latest detection result, probes the
//! server's health check on a fixed cadence, and runs a full detection pass
//! (fetch picture, upload, read detections) whenever a button press or a
//! service call asks for one. Entities project that result to the host.
//!
//! # Core Components
//!
//! * [`config`] - Entry configuration, validation and environment loading
//! * [`coordinator`] - Connectivity probe and on-demand detection pass
//! * [`state`] - Copy-on-write detection state with change notification
//! * [`detector`] - Obico ML API client and wire types
//! * [`image_fetcher`] - Camera picture download
//! * [`entity`] - Entity adapters ([`binary_sensor`], [`sensor`], [`camera`], [`button`])
//! * [`integration`] - Loaded entries and the detection service dispatcher
//! * [`host`] - Interfaces to the host's state machine and registries
//! * [`error`] - Error types
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! use obico_guardian::*;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let host = Arc::new(InMemoryHost::new("http://homeassistant.local:8123"));
//! host.set_camera("camera.printer", "/api/camera_proxy/camera.printer");
//!
//! let integration = Integration::new(host);
//! let entry = integration
//!     .create_entry(UserInput {
//!         url: "http://obico.local:3333/detect".to_string(),
//!         interval_secs: 60,
//!         camera_entity: "camera.printer".to_string(),
//!         threshold: None,
//!     })
//!     .await?;
//! let coordinator = integration.setup_entry(entry, &HashMap::new()).await?;
//!
//! coordinator.trigger_detection().await;
//! println!("{:?}", coordinator.state());
//! # Ok(())
//! # }
//! ```

pub mod binary_sensor;
pub mod button;
pub mod camera;
pub mod config;
pub mod coordinator;
pub mod detector;
pub mod entity;
pub mod error;
pub mod host;
pub mod image_fetcher;
pub mod integration;
pub mod sensor;
pub mod state;

// Re-export commonly used types for convenience
pub use config::{Config, EntryConfig, EntryOptions, Timeouts, UserInput};
pub use coordinator::{DetectionCoordinator, DetectionOutcome, Disconnect, SkipReason};
pub use detector::{Detection, ObicoClient};
pub use entity::{Entity, EntitySet, RestoredState};
pub use error::GuardianError;
pub use host::{EntityState, HomeState, InMemoryHost, Registry};
pub use image_fetcher::ImageFetcher;
pub use integration::{ConfigEntry, Integration, TargetSelector};
pub use state::{DetectionState, StateStore};
