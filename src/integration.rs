//! Process-wide context owning one coordinator per config entry.
//!
//! Replaces a global registry: every loaded entry lives in an explicit map
//! from entry id to its runtime (coordinator, entities and probe task), which
//! setup fills and unload tears down. The detection service dispatcher
//! resolves call targets against the same map.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{EntryConfig, EntryOptions, Timeouts, UserInput};
use crate::coordinator::{DetectionCoordinator, DetectionOutcome};
use crate::entity::{EntitySet, RestoredState};
use crate::error::{ConfigError, GuardianError, RegistryError};
use crate::host::{HomeState, Registry};

/// A persisted integration instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub entry_id: String,
    pub title: String,
    pub data: EntryConfig,
    #[serde(default)]
    pub options: Option<EntryOptions>,
}

impl ConfigEntry {
    pub fn unique_id(&self) -> String {
        self.data.unique_id()
    }

    /// Creation data with edited options applied on top.
    pub fn effective_config(&self) -> EntryConfig {
        match &self.options {
            Some(options) => self.data.with_options(options),
            None => self.data.clone(),
        }
    }
}

/// Targets of a detection service call. Empty means every loaded entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetSelector {
    #[serde(default, rename = "device_id")]
    pub device_ids: Vec<String>,
    #[serde(default, rename = "entity_id")]
    pub entity_ids: Vec<String>,
}

impl TargetSelector {
    pub fn is_empty(&self) -> bool {
        self.device_ids.is_empty() && self.entity_ids.is_empty()
    }
}

struct EntryRuntime {
    entry: ConfigEntry,
    coordinator: Arc<DetectionCoordinator>,
    entities: Arc<EntitySet>,
    cancel: CancellationToken,
    probe_task: JoinHandle<()>,
}

/// Registry of loaded entries on top of a host.
pub struct Integration<H> {
    host: Arc<H>,
    timeouts: Timeouts,
    entries: RwLock<BTreeMap<String, EntryRuntime>>,
    next_entry: AtomicU64,
}

impl<H> Integration<H>
where
    H: HomeState + Registry + 'static,
{
    pub fn new(host: Arc<H>) -> Self {
        Self::with_timeouts(host, Timeouts::default())
    }

    pub fn with_timeouts(host: Arc<H>, timeouts: Timeouts) -> Self {
        Self {
            host,
            timeouts,
            entries: RwLock::new(BTreeMap::new()),
            next_entry: AtomicU64::new(1),
        }
    }

    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    /// Turn a submitted creation form into a new config entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is invalid or an entry with the same
    /// camera and URL is already loaded.
    pub async fn create_entry(&self, input: UserInput) -> Result<ConfigEntry, ConfigError> {
        let data = EntryConfig::from_user_input(input)?;
        self.new_entry(data).await
    }

    /// Wrap already validated configuration into a new config entry.
    ///
    /// Uniqueness is checked against loaded entries here and enforced again
    /// when the entry is set up.
    pub async fn new_entry(&self, data: EntryConfig) -> Result<ConfigEntry, ConfigError> {
        let unique_id = data.unique_id();

        let entries = self.entries.read().await;
        if entries.values().any(|runtime| runtime.entry.unique_id() == unique_id) {
            return Err(ConfigError::AlreadyConfigured { unique_id });
        }

        let entry_id = format!("entry_{}", self.next_entry.fetch_add(1, Ordering::Relaxed));
        Ok(ConfigEntry {
            entry_id,
            title: data.title(),
            data,
            options: None,
        })
    }

    /// Load an entry: build its coordinator, run the first probe, attach the
    /// entities (seeding them from `restored`) and start the probe loop.
    ///
    /// # Errors
    ///
    /// Fails if the entry id is already loaded, if another loaded entry has
    /// the same unique id, or if the HTTP client cannot be built. Nothing is
    /// registered and no probe loop runs in that case.
    pub async fn setup_entry(
        &self,
        entry: ConfigEntry,
        restored: &HashMap<String, RestoredState>,
    ) -> Result<Arc<DetectionCoordinator>> {
        if self.entries.read().await.contains_key(&entry.entry_id) {
            return Err(GuardianError::from(RegistryError::AlreadyLoaded {
                entry_id: entry.entry_id.clone(),
            })
            .into());
        }

        let config = entry.effective_config();
        let host: Arc<dyn HomeState> = self.host.clone();
        let coordinator = Arc::new(
            DetectionCoordinator::with_timeouts(entry.entry_id.clone(), &config, host, self.timeouts)
                .with_context(|| format!("Cannot set up entry {}", entry.entry_id))?,
        );

        let connected = coordinator.refresh().await;
        info!(
            "{}: set up entry {} (API {})",
            coordinator.name(),
            entry.entry_id,
            if connected { "reachable" } else { "unreachable" }
        );

        let entities = Arc::new(EntitySet::new(coordinator.clone(), &entry.title, &config.url));
        entities.restore(restored);

        // Re-checked under the write lock: a concurrent setup may have won
        // while this one was probing.
        let mut entries = self.entries.write().await;
        if entries.contains_key(&entry.entry_id) {
            return Err(GuardianError::from(RegistryError::AlreadyLoaded {
                entry_id: entry.entry_id.clone(),
            })
            .into());
        }
        let unique_id = entry.unique_id();
        if entries.values().any(|runtime| runtime.entry.unique_id() == unique_id) {
            return Err(GuardianError::from(ConfigError::AlreadyConfigured { unique_id }).into());
        }

        let cancel = CancellationToken::new();
        let probe_task = tokio::spawn({
            let coordinator = coordinator.clone();
            let cancel = cancel.clone();
            async move { coordinator.run_probe_loop(cancel).await }
        });

        entries.insert(
            entry.entry_id.clone(),
            EntryRuntime {
                entry,
                coordinator: coordinator.clone(),
                entities,
                cancel,
                probe_task,
            },
        );
        Ok(coordinator)
    }

    /// Apply edited options to a loaded entry in place.
    pub async fn update_options(
        &self,
        entry_id: &str,
        options: EntryOptions,
    ) -> Result<(), GuardianError> {
        let options = options.validate()?;
        let mut entries = self.entries.write().await;
        let runtime = entries
            .get_mut(entry_id)
            .ok_or_else(|| RegistryError::UnknownEntry {
                entry_id: entry_id.to_string(),
            })?;

        runtime
            .coordinator
            .update_config(&options.url, options.interval_secs, options.threshold);
        runtime.entry.options = Some(options);
        Ok(())
    }

    /// Stop an entry's probe loop and drop its runtime. Returns the entry and
    /// the last entity states, or `None` if it was not loaded.
    pub async fn unload_entry(
        &self,
        entry_id: &str,
    ) -> Option<(ConfigEntry, HashMap<String, RestoredState>)> {
        let runtime = self.entries.write().await.remove(entry_id)?;
        runtime.cancel.cancel();
        if let Err(e) = runtime.probe_task.await {
            warn!("Probe loop of entry {} ended abnormally: {}", entry_id, e);
        }
        info!("Unloaded entry {}", entry_id);
        Some((runtime.entry, persisted_states(&runtime.entities)))
    }

    /// Unload and set up an entry again, carrying its entity states over.
    pub async fn reload_entry(&self, entry_id: &str) -> Result<Arc<DetectionCoordinator>> {
        let (entry, restored) = self
            .unload_entry(entry_id)
            .await
            .ok_or_else(|| GuardianError::from(RegistryError::UnknownEntry {
                entry_id: entry_id.to_string(),
            }))?;
        self.setup_entry(entry, &restored).await
    }

    /// Unload every entry.
    pub async fn shutdown(&self) {
        for entry_id in self.entry_ids().await {
            self.unload_entry(&entry_id).await;
        }
    }

    pub async fn entry_ids(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }

    pub async fn entry(&self, entry_id: &str) -> Option<ConfigEntry> {
        let entries = self.entries.read().await;
        entries.get(entry_id).map(|runtime| runtime.entry.clone())
    }

    pub async fn coordinator(&self, entry_id: &str) -> Option<Arc<DetectionCoordinator>> {
        let entries = self.entries.read().await;
        entries.get(entry_id).map(|runtime| runtime.coordinator.clone())
    }

    pub async fn entities(&self, entry_id: &str) -> Option<Arc<EntitySet>> {
        let entries = self.entries.read().await;
        entries.get(entry_id).map(|runtime| runtime.entities.clone())
    }

    /// Detection service: run a detection pass on every coordinator the
    /// selector resolves to, each exactly once. An empty selector targets
    /// all loaded entries.
    pub async fn trigger_detection(
        &self,
        selector: &TargetSelector,
    ) -> Vec<(String, DetectionOutcome)> {
        let targets: Vec<Arc<DetectionCoordinator>> = {
            let entries = self.entries.read().await;
            let entry_ids: BTreeSet<String> = if selector.is_empty() {
                entries.keys().cloned().collect()
            } else {
                self.resolve_targets(selector)
                    .into_iter()
                    .filter(|entry_id| entries.contains_key(entry_id))
                    .collect()
            };
            entry_ids
                .iter()
                .filter_map(|entry_id| entries.get(entry_id))
                .map(|runtime| runtime.coordinator.clone())
                .collect()
        };

        debug!("Detection requested for {} entries", targets.len());
        let mut outcomes = Vec::with_capacity(targets.len());
        for coordinator in targets {
            let outcome = coordinator.trigger_detection().await;
            outcomes.push((coordinator.entry_id().to_string(), outcome));
        }
        outcomes
    }

    fn resolve_targets(&self, selector: &TargetSelector) -> BTreeSet<String> {
        let mut entry_ids = BTreeSet::new();

        for device_id in &selector.device_ids {
            match self.host.device_config_entries(device_id) {
                Some(device_entries) => entry_ids.extend(device_entries),
                None => debug!("Ignoring unknown device {}", device_id),
            }
        }

        for entity_id in &selector.entity_ids {
            match self.host.entity_config_entry(entity_id) {
                Some(entry_id) => {
                    entry_ids.insert(entry_id);
                }
                None => debug!("Ignoring unknown entity {}", entity_id),
            }
        }

        entry_ids
    }
}

fn persisted_states(entities: &EntitySet) -> HashMap<String, RestoredState> {
    entities
        .all()
        .iter()
        .map(|entity| {
            (
                entity.unique_id(),
                RestoredState {
                    state: entity.state(),
                    attributes: entity.attributes(),
                },
            )
        })
        .collect()
}
