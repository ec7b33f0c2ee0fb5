mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use common::{CAMERA, FakeObico, SOURCE_IMAGE};
use obico_guardian::entity::parse_timestamp;
use obico_guardian::error::ConfigError;
use obico_guardian::{
    Entity, EntryOptions, GuardianError, InMemoryHost, Integration, RestoredState, TargetSelector,
};

const SECOND_CAMERA: &str = "camera.second";

const ONE_FAILURE: &str =
    r#"{"detections": [["failure", 0.8, [1.0, 2.0, 3.0, 4.0]]], "inference_ms": 120, "provider": "yolov8"}"#;

async fn with_entries(
    fake: &FakeObico,
    cameras: &[&str],
) -> (Integration<InMemoryHost>, Vec<String>) {
    let host = fake.host();
    for camera in cameras {
        host.set_camera(camera, &format!("/api/camera_proxy/{}", camera));
    }
    let integration = Integration::new(host);

    let mut entry_ids = Vec::new();
    for camera in cameras {
        let entry = integration
            .create_entry(fake.input(camera, 0.3))
            .await
            .expect("valid entry");
        entry_ids.push(entry.entry_id.clone());
        integration
            .setup_entry(entry, &HashMap::new())
            .await
            .expect("entry sets up");
    }
    (integration, entry_ids)
}

fn restored(state: &str, attributes: &[(&str, &str)]) -> RestoredState {
    RestoredState {
        state: state.to_string(),
        attributes: attributes
            .iter()
            .map(|(key, value)| (key.to_string(), Value::from(*value)))
            .collect::<Map<String, Value>>(),
    }
}

#[tokio::test]
async fn test_setup_probes_once() {
    let fake = FakeObico::start().await;
    let (integration, entry_ids) = with_entries(&fake, &[CAMERA]).await;

    assert_eq!(entry_ids, vec!["entry_1".to_string()]);
    assert_eq!(fake.health_hits(), 1);

    let coordinator = integration.coordinator("entry_1").await.expect("loaded");
    assert!(coordinator.state().api_connected);
    assert_eq!(coordinator.name(), "Obico ML (camera.printer)");

    let entry = integration.entry("entry_1").await.expect("loaded");
    assert_eq!(entry.title, "Obico - camera.printer");
    assert_eq!(entry.options, None);
    integration.shutdown().await;
}

#[tokio::test]
async fn test_empty_selector_triggers_every_entry() {
    let fake = FakeObico::start().await;
    fake.respond_with(200, ONE_FAILURE);
    let (integration, entry_ids) = with_entries(&fake, &[CAMERA, SECOND_CAMERA]).await;

    let outcomes = integration.trigger_detection(&TargetSelector::default()).await;

    let triggered: Vec<&str> = outcomes.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(triggered, vec!["entry_1", "entry_2"]);
    assert!(outcomes.iter().all(|(_, outcome)| outcome.is_completed()));
    assert_eq!(fake.detect_requests().len(), 2);

    for entry_id in &entry_ids {
        let coordinator = integration.coordinator(entry_id).await.expect("loaded");
        assert!(coordinator.state().error_detected);
    }
    integration.shutdown().await;
}

#[tokio::test]
async fn test_selector_resolves_each_entry_once() {
    let fake = FakeObico::start().await;
    let (integration, entry_ids) = with_entries(&fake, &[CAMERA, SECOND_CAMERA]).await;
    let host = integration.host().clone();
    host.register_device("device_printer", &entry_ids[0]);
    host.register_entity("button.printer_trigger_detection", &entry_ids[0]);
    host.register_entity("sensor.second_confidence", &entry_ids[1]);

    let selector = TargetSelector {
        device_ids: vec!["device_printer".to_string(), "device_missing".to_string()],
        entity_ids: vec![
            "button.printer_trigger_detection".to_string(),
            "sensor.unknown".to_string(),
        ],
    };
    let outcomes = integration.trigger_detection(&selector).await;

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].0, entry_ids[0]);
    assert_eq!(fake.detect_requests().len(), 1);

    let selector = TargetSelector {
        device_ids: vec!["device_printer".to_string()],
        entity_ids: vec!["sensor.second_confidence".to_string()],
    };
    assert_eq!(integration.trigger_detection(&selector).await.len(), 2);
    assert_eq!(fake.detect_requests().len(), 3);
    integration.shutdown().await;
}

#[tokio::test]
async fn test_unknown_targets_trigger_nothing() {
    let fake = FakeObico::start().await;
    let (integration, _) = with_entries(&fake, &[CAMERA]).await;

    let selector = TargetSelector {
        device_ids: vec!["device_missing".to_string()],
        entity_ids: Vec::new(),
    };

    assert!(integration.trigger_detection(&selector).await.is_empty());
    assert!(fake.detect_requests().is_empty());
    integration.shutdown().await;
}

#[test]
fn test_selector_deserializes_service_call() {
    let selector: TargetSelector = serde_json::from_str(
        r#"{"device_id": ["abc"], "entity_id": ["button.printer"]}"#,
    )
    .expect("valid call data");
    assert_eq!(selector.device_ids, vec!["abc".to_string()]);
    assert_eq!(selector.entity_ids, vec!["button.printer".to_string()]);

    let empty: TargetSelector = serde_json::from_str("{}").expect("valid call data");
    assert!(empty.is_empty());
}

#[tokio::test]
async fn test_duplicate_entry_is_rejected() {
    let fake = FakeObico::start().await;
    let (integration, _) = with_entries(&fake, &[CAMERA]).await;

    let mut input = fake.input(CAMERA, 0.5);
    input.url.push('/');
    let err = integration
        .create_entry(input)
        .await
        .expect_err("same camera and url");

    assert_eq!(
        err,
        ConfigError::AlreadyConfigured {
            unique_id: format!("{}-{}", CAMERA, fake.detect_url()),
        }
    );

    // A different API host may watch the same camera.
    let mut other = fake.input(CAMERA, 0.5);
    other.url = "http://other.local:3333/detect".to_string();
    assert!(integration.create_entry(other).await.is_ok());
    integration.shutdown().await;
}

#[tokio::test]
async fn test_entities_render_detection() {
    let fake = FakeObico::start().await;
    fake.respond_with(200, ONE_FAILURE);
    let (integration, entry_ids) = with_entries(&fake, &[CAMERA]).await;
    let entities = integration.entities(&entry_ids[0]).await.expect("loaded");

    assert_eq!(entities.connectivity.state(), "on");
    assert_eq!(entities.failure.state(), "unknown");
    assert_eq!(entities.failure.is_on(), None);
    assert_eq!(entities.button.state(), "unknown");
    assert!(entities.camera.camera_image().is_none());
    assert_eq!(entities.camera.content_type(), "image/jpeg");

    let outcome = entities.button.press().await;
    assert!(outcome.is_completed());

    assert_eq!(entities.failure.state(), "on");
    assert_eq!(entities.confidence.state(), "80");
    assert_eq!(entities.inference_time.state(), "120");
    assert_ne!(entities.button.state(), "unknown");
    assert_eq!(entities.camera.camera_image().as_deref(), Some(SOURCE_IMAGE));

    let attributes = entities.failure.attributes();
    assert_eq!(attributes["provider"], Value::from("yolov8"));
    assert_eq!(attributes["avg_confidence"].as_f64(), Some(80.0));
    let last_run = attributes["last_run"].as_str().expect("timestamp set");
    assert!(parse_timestamp(last_run).is_some());

    let camera = entities.camera.attributes();
    assert_eq!(camera["source_entity"], Value::from(CAMERA));
    assert_eq!(camera["last_detection_confidence"].as_f64(), Some(80.0));

    let unique_ids: Vec<String> = entities.all().iter().map(|e| e.unique_id()).collect();
    assert_eq!(
        unique_ids,
        vec![
            "obico_ml_entry_1_connectivity",
            "obico_ml_entry_1_error_detection",
            "obico_ml_entry_1_confidence",
            "obico_ml_entry_1_inference_time",
            "obico_ml_entry_1_camera",
            "obico_ml_entry_1_trigger_button",
        ]
    );
    assert_eq!(
        entities.failure.device_info().identifiers,
        ("obico_ml".to_string(), "entry_1".to_string())
    );
    integration.shutdown().await;
}

#[tokio::test]
async fn test_restored_states_seed_coordinator() {
    let fake = FakeObico::start().await;
    let host = fake.host();
    let integration = Integration::new(host);
    let entry = integration
        .create_entry(fake.input(CAMERA, 0.3))
        .await
        .expect("valid entry");

    let last_run = "2026-10-18T21:04:00+00:00";
    let states = HashMap::from([
        (
            format!("obico_ml_{}_error_detection", entry.entry_id),
            restored("on", &[("last_run", last_run)]),
        ),
        (
            format!("obico_ml_{}_confidence", entry.entry_id),
            restored("55.5", &[]),
        ),
        (
            format!("obico_ml_{}_inference_time", entry.entry_id),
            restored("not a number", &[]),
        ),
    ]);
    let entry_id = entry.entry_id.clone();
    let coordinator = integration
        .setup_entry(entry, &states)
        .await
        .expect("entry sets up");

    let state = coordinator.state();
    assert!(state.error_detected);
    assert_eq!(state.last_detection_timestamp, parse_timestamp(last_run));
    assert_eq!(state.avg_confidence, 55.5);
    assert_eq!(state.inference_ms, 0.0);

    // A later restore never overwrites a known result.
    let entities = integration.entities(&entry_id).await.expect("loaded");
    assert!(!entities.failure.restore(Some(&restored("off", &[]))));
    assert_eq!(entities.failure.is_on(), Some(true));
    assert!(!entities.confidence.restore(Some(&restored("12", &[]))));
    assert_eq!(entities.confidence.native_value(), 55.5);
    integration.shutdown().await;
}

#[tokio::test]
async fn test_unavailable_or_unknown_restore_is_ignored() {
    let fake = FakeObico::start().await;

    for previous in ["unavailable", "unknown"] {
        let integration = Integration::new(fake.host());
        let entry = integration
            .create_entry(fake.input(CAMERA, 0.3))
            .await
            .expect("valid entry");

        let states = HashMap::from([(
            format!("obico_ml_{}_error_detection", entry.entry_id),
            restored(previous, &[("last_run", "2026-10-18T21:04:00+00:00")]),
        )]);
        let entry_id = entry.entry_id.clone();
        let coordinator = integration
            .setup_entry(entry, &states)
            .await
            .expect("entry sets up");

        let entities = integration.entities(&entry_id).await.expect("loaded");
        assert_eq!(entities.failure.state(), "unknown", "restored from {}", previous);
        assert!(!coordinator.state().error_detected);
        assert!(coordinator.state().last_detection_timestamp.is_none());
        integration.shutdown().await;
    }
}

#[tokio::test]
async fn test_update_options_applies_in_place() {
    let fake = FakeObico::start().await;
    let (integration, entry_ids) = with_entries(&fake, &[CAMERA]).await;
    let before = integration.coordinator(&entry_ids[0]).await.expect("loaded");

    let options = EntryOptions {
        url: format!("{}/", fake.detect_url()),
        interval_secs: 2,
        threshold: 0.7,
    };
    integration
        .update_options(&entry_ids[0], options)
        .await
        .expect("valid options");

    let after = integration.coordinator(&entry_ids[0]).await.expect("loaded");
    assert!(Arc::ptr_eq(&before, &after));
    let settings = after.settings();
    assert_eq!(settings.url, fake.detect_url());
    assert_eq!(settings.interval, Duration::from_secs(2));
    assert_eq!(settings.threshold, 0.7);

    let entry = integration.entry(&entry_ids[0]).await.expect("loaded");
    assert_eq!(entry.effective_config().threshold, 0.7);
    assert_eq!(entry.effective_config().camera_entity, CAMERA);

    after.trigger_detection().await;
    assert_eq!(fake.detect_requests()[0]["threshold"].as_f64(), Some(0.7));
    integration.shutdown().await;
}

#[tokio::test]
async fn test_update_options_rejects_bad_values() {
    let fake = FakeObico::start().await;
    let (integration, entry_ids) = with_entries(&fake, &[CAMERA]).await;

    let too_fast = EntryOptions {
        url: fake.detect_url(),
        interval_secs: 1,
        threshold: 0.5,
    };
    let err = integration
        .update_options(&entry_ids[0], too_fast)
        .await
        .expect_err("interval below minimum");
    assert!(matches!(err, GuardianError::ConfigError(_)));

    let valid = EntryOptions {
        url: fake.detect_url(),
        interval_secs: 10,
        threshold: 0.5,
    };
    let err = integration
        .update_options("entry_404", valid)
        .await
        .expect_err("unknown entry");
    assert!(matches!(err, GuardianError::RegistryError(_)));

    let entry = integration.entry(&entry_ids[0]).await.expect("loaded");
    assert_eq!(entry.options, None);
    integration.shutdown().await;
}

#[tokio::test]
async fn test_reload_carries_state_over() {
    let fake = FakeObico::start().await;
    fake.respond_with(200, ONE_FAILURE);
    let (integration, entry_ids) = with_entries(&fake, &[CAMERA]).await;
    let before = integration.coordinator(&entry_ids[0]).await.expect("loaded");
    before.trigger_detection().await;
    let last_run = before.state().last_run();

    let after = integration
        .reload_entry(&entry_ids[0])
        .await
        .expect("entry reloads");

    assert!(!Arc::ptr_eq(&before, &after));
    let state = after.state();
    assert!(state.error_detected);
    assert_eq!(state.last_run(), last_run);
    assert_eq!(state.avg_confidence, 80.0);
    assert_eq!(state.inference_ms, 120.0);
    assert!(state.image_with_errors.is_none());
    assert_eq!(fake.health_hits(), 2);
    integration.shutdown().await;
}

#[tokio::test]
async fn test_unload_removes_entry() {
    let fake = FakeObico::start().await;
    let (integration, entry_ids) = with_entries(&fake, &[CAMERA, SECOND_CAMERA]).await;

    let (entry, states) = integration
        .unload_entry(&entry_ids[0])
        .await
        .expect("was loaded");
    assert_eq!(entry.entry_id, entry_ids[0]);
    assert_eq!(states.len(), 6);
    assert!(integration.unload_entry(&entry_ids[0]).await.is_none());
    assert!(integration.reload_entry(&entry_ids[0]).await.is_err());
    assert_eq!(integration.entry_ids().await, vec![entry_ids[1].clone()]);

    // The camera can be added again once its entry is gone.
    assert!(integration.create_entry(fake.input(CAMERA, 0.3)).await.is_ok());

    integration.shutdown().await;
    assert!(integration.entry_ids().await.is_empty());
    assert!(
        integration
            .trigger_detection(&TargetSelector::default())
            .await
            .is_empty()
    );
}

#[tokio::test]
async fn test_concurrent_setup_registers_once() {
    let fake = FakeObico::start().await;
    let integration = Integration::new(fake.host());
    let entry = integration
        .create_entry(fake.input(CAMERA, 0.3))
        .await
        .expect("valid entry");
    let no_states = HashMap::new();

    let (first, second) = tokio::join!(
        integration.setup_entry(entry.clone(), &no_states),
        integration.setup_entry(entry.clone(), &no_states),
    );
    let (loaded, rejected) = match (first, second) {
        (Ok(coordinator), Err(err)) | (Err(err), Ok(coordinator)) => (coordinator, err),
        (Ok(_), Ok(_)) => panic!("entry set up twice"),
        (Err(a), Err(b)) => panic!("both setups failed: {} / {}", a, b),
    };

    assert!(matches!(
        rejected.downcast_ref::<GuardianError>(),
        Some(GuardianError::RegistryError(_))
    ));
    assert_eq!(integration.entry_ids().await, vec![entry.entry_id.clone()]);
    let registered = integration
        .coordinator(&entry.entry_id)
        .await
        .expect("loaded");
    assert!(Arc::ptr_eq(&loaded, &registered));

    // After unload no probe loop may be left behind, even on a short interval.
    integration
        .unload_entry(&entry.entry_id)
        .await
        .expect("was loaded");
    loaded.update_config(&fake.detect_url(), 1, 0.3);
    let settled = fake.health_hits();
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(fake.health_hits(), settled);
}

#[tokio::test]
async fn test_concurrent_setup_rejects_duplicate_camera() {
    let fake = FakeObico::start().await;
    let integration = Integration::new(fake.host());
    let first_entry = integration
        .create_entry(fake.input(CAMERA, 0.3))
        .await
        .expect("valid entry");
    let second_entry = integration
        .create_entry(fake.input(CAMERA, 0.5))
        .await
        .expect("nothing loaded yet");
    assert_ne!(first_entry.entry_id, second_entry.entry_id);
    let no_states = HashMap::new();

    let (first, second) = tokio::join!(
        integration.setup_entry(first_entry, &no_states),
        integration.setup_entry(second_entry, &no_states),
    );

    let rejected: Vec<_> = [first, second]
        .into_iter()
        .filter_map(Result::err)
        .collect();
    assert_eq!(rejected.len(), 1);
    assert!(matches!(
        rejected[0].downcast_ref::<GuardianError>(),
        Some(GuardianError::ConfigError(ConfigError::AlreadyConfigured { .. }))
    ));
    assert_eq!(integration.entry_ids().await.len(), 1);
    integration.shutdown().await;
}
