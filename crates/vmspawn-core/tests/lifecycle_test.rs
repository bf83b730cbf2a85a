mod common;

use common::{EventSink, FLOATING_IP, FakeCloud, FakeProbe, Script, controller, template};
use std::sync::Arc;
use std::time::Duration;
use vmspawn_cloud::Fault;
use vmspawn_config::SpawnerConfig;
use vmspawn_core::{
    LifecycleController, MachineSettings, PollStatus, ProvisioningRecord,
    ProvisioningStateMachine, Readiness, SessionStore, SpawnError, Spawner, StateMap, StoreSink,
    TemplateBootstrap, UserSession,
};

fn tracked_state(id: &str) -> StateMap {
    ProvisioningRecord::new(id, "jhub-alice-Qx81mZpa").to_state()
}

fn no_valid_host() -> Fault {
    Fault {
        code: Some(500),
        message: "No valid host was found. There are not enough hosts available.".to_string(),
        details: None,
    }
}

#[tokio::test(start_paused = true)]
async fn test_start_returns_endpoint() {
    let cloud = FakeCloud::new(Script {
        build_reads: 2,
        address_reads: 1,
        ..Script::default()
    });
    let probe = FakeProbe::ready();
    let mut spawner = controller(cloud.clone(), probe.clone());

    let endpoint = spawner.start().await.unwrap();

    assert_eq!(endpoint, format!("http://{}:8000", FLOATING_IP));
    assert_eq!(spawner.record().server_id.as_deref(), Some("srv-1"));

    let name = spawner.record().server_name.clone().unwrap();
    let suffix = name.strip_prefix("jhub-alice-").unwrap();
    assert_eq!(suffix.len(), 8);
    assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));

    assert_eq!(
        probe.urls(),
        vec![format!("http://{}:8000/user/alice/api", FLOATING_IP)]
    );
    assert_eq!(cloud.count("allocate:public"), 1);
    assert_eq!(cloud.count(&format!("attach:srv-1:{}", FLOATING_IP)), 1);
    assert_eq!(cloud.count("delete:"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_start_succeeds_before_service_is_up() {
    let cloud = FakeCloud::new(Script::default());
    let probe = FakeProbe::new(Readiness::NotReady("connection failed".to_string()));
    let mut spawner = controller(cloud.clone(), probe);

    assert!(spawner.start().await.is_ok());
    assert!(matches!(spawner.poll().await, PollStatus::Unconfirmed(_)));
}

#[tokio::test(start_paused = true)]
async fn test_record_checkpointed_before_address_stage() {
    let cloud = FakeCloud::new(Script::default());
    let mut spawner = controller(cloud.clone(), FakeProbe::ready()).with_record_sink(Arc::new(
        EventSink {
            cloud: cloud.clone(),
            fail: false,
        },
    ));

    spawner.start().await.unwrap();

    let checkpoint = cloud.position("checkpoint:srv-1").unwrap();
    let allocate = cloud.position("allocate:public").unwrap();
    assert!(checkpoint < allocate);
    assert!(cloud.position("get:srv-1").unwrap() > checkpoint);
}

#[tokio::test(start_paused = true)]
async fn test_checkpoint_failure_deletes_server() {
    let cloud = FakeCloud::new(Script::default());
    let mut spawner = controller(cloud.clone(), FakeProbe::ready()).with_record_sink(Arc::new(
        EventSink {
            cloud: cloud.clone(),
            fail: true,
        },
    ));

    let err = spawner.start().await.unwrap_err();

    assert!(matches!(&err, SpawnError::Creation(msg) if msg.contains("disk full")));
    assert_eq!(cloud.count("delete:srv-1:true"), 1);
    assert_eq!(cloud.count("allocate:"), 0);
    assert!(!spawner.record().is_tracking());
}

#[tokio::test(start_paused = true)]
async fn test_error_state_deletes_once_and_reports_fault() {
    let cloud = FakeCloud::new(Script {
        build_reads: 1,
        fault: Some(no_valid_host()),
        ..Script::default()
    });
    let mut spawner = controller(cloud.clone(), FakeProbe::ready());

    let err = spawner.start().await.unwrap_err();

    assert!(err.is_creation_failure());
    assert!(err.to_string().contains("No valid host was found"));
    assert_eq!(cloud.count("delete:"), 1);
    assert_eq!(cloud.count("delete:srv-1:true"), 1);
    assert_eq!(cloud.count("allocate:"), 0);
    assert!(!cloud.exists("srv-1"));
    assert!(!spawner.record().is_tracking());
    assert!(spawner.serialize().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_error_state_with_failed_cleanup() {
    let cloud = FakeCloud::new(Script {
        fault: Some(no_valid_host()),
        delete_error: Some("Internal Server Error".to_string()),
        ..Script::default()
    });
    let mut spawner = controller(cloud.clone(), FakeProbe::ready());

    let err = spawner.start().await.unwrap_err();

    match &err {
        SpawnError::Cleanup { message, source } => {
            assert!(message.contains("No valid host was found"));
            assert!(source.to_string().contains("Internal Server Error"));
        }
        other => panic!("expected cleanup failure, got {:?}", other),
    }
    assert!(err.is_creation_failure());
    // The server may still exist, so it stays tracked for a later stop
    assert_eq!(spawner.record().server_id.as_deref(), Some("srv-1"));
}

#[tokio::test(start_paused = true)]
async fn test_rejected_create_is_not_retried() {
    let cloud = FakeCloud::new(Script {
        create_error: Some("Quota exceeded for cores".to_string()),
        ..Script::default()
    });
    let mut spawner = controller(cloud.clone(), FakeProbe::ready());

    let err = spawner.start().await.unwrap_err();

    assert!(matches!(&err, SpawnError::Creation(msg) if msg.contains("Quota exceeded")));
    assert_eq!(cloud.count("create:"), 1);
    assert_eq!(cloud.count("get:"), 0);
    assert_eq!(cloud.count("delete:"), 0);
    assert!(!spawner.record().is_tracking());
}

#[tokio::test(start_paused = true)]
async fn test_address_exhaustion_keeps_server() {
    let cloud = FakeCloud::new(Script {
        exhausted: true,
        ..Script::default()
    });
    let mut spawner = controller(cloud.clone(), FakeProbe::ready());

    let err = spawner.start().await.unwrap_err();

    assert!(matches!(err, SpawnError::AddressExhausted(_)));
    assert!(!err.is_creation_failure());
    assert_eq!(cloud.count("delete:"), 0);
    assert_eq!(spawner.record().server_id.as_deref(), Some("srv-1"));

    // The host is expected to stop it
    spawner.stop().await.unwrap();
    assert_eq!(cloud.count("delete:srv-1:true"), 1);
    assert!(!spawner.record().is_tracking());
}

#[tokio::test(start_paused = true)]
async fn test_transient_read_errors_are_retried() {
    let cloud = FakeCloud::new(Script {
        build_reads: 1,
        read_errors: 3,
        ..Script::default()
    });
    let mut spawner = controller(cloud.clone(), FakeProbe::ready());

    assert!(spawner.start().await.is_ok());
    assert!(cloud.count("get:srv-1") >= 5);
}

#[tokio::test(start_paused = true)]
async fn test_bootstrap_failure_creates_nothing() {
    let cloud = FakeCloud::new(Script::default());
    let probe = FakeProbe::ready();
    let machine = ProvisioningStateMachine::new(
        cloud.clone(),
        probe,
        MachineSettings::new("public"),
    );
    let mut spawner = LifecycleController::new(
        UserSession::new("alice"),
        Arc::new(machine),
        Arc::new(TemplateBootstrap::new("{{ undefined_variable }}").unwrap()),
        template(),
        8000,
    );

    let err = spawner.start().await.unwrap_err();

    assert!(matches!(err, SpawnError::Bootstrap(_)));
    assert!(err.is_creation_failure());
    assert!(cloud.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_start_deletes_server() {
    let cloud = FakeCloud::new(Script {
        build_reads: 1000,
        ..Script::default()
    });
    let mut spawner = controller(cloud.clone(), FakeProbe::ready());

    let outcome = tokio::time::timeout(Duration::from_secs(5), spawner.start()).await;
    assert!(outcome.is_err());

    // Let the background teardown run
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(cloud.count("delete:srv-1:true"), 1);
    assert!(!cloud.exists("srv-1"));
}

#[tokio::test(start_paused = true)]
async fn test_stop_after_abandoned_start_deletes_once() {
    let cloud = FakeCloud::new(Script {
        build_reads: 1000,
        ..Script::default()
    });
    let mut spawner = controller(cloud.clone(), FakeProbe::ready());

    let outcome = tokio::time::timeout(Duration::from_secs(5), spawner.start()).await;
    assert!(outcome.is_err());
    assert_eq!(spawner.record().server_id.as_deref(), Some("srv-1"));

    spawner.stop().await.unwrap();

    assert_eq!(cloud.count("delete:"), 1);
    assert!(!cloud.exists("srv-1"));
    assert!(spawner.serialize().is_empty());

    // Nothing left for a second stop to do
    spawner.stop().await.unwrap();
    assert_eq!(cloud.count("delete:"), 1);
}

#[tokio::test]
async fn test_start_abandoned_during_create_still_deletes() {
    let cloud = FakeCloud::new(Script {
        create_delay: Some(Duration::from_millis(300)),
        ..Script::default()
    });
    let mut spawner = controller(cloud.clone(), FakeProbe::ready());

    let outcome = tokio::time::timeout(Duration::from_millis(50), spawner.start()).await;
    assert!(outcome.is_err());
    assert!(spawner.record().server_id.is_none());

    spawner.stop().await.unwrap();

    assert_eq!(cloud.count("create:"), 1);
    assert_eq!(cloud.count("delete:srv-1:true"), 1);
    assert!(!cloud.exists("srv-1"));
    assert!(spawner.serialize().is_empty());
}

#[tokio::test]
async fn test_start_abandoned_during_create_cleans_up_unattended() {
    let cloud = FakeCloud::new(Script {
        create_delay: Some(Duration::from_millis(100)),
        ..Script::default()
    });
    let mut spawner = controller(cloud.clone(), FakeProbe::ready());

    let outcome = tokio::time::timeout(Duration::from_millis(20), spawner.start()).await;
    assert!(outcome.is_err());

    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(cloud.count("delete:srv-1:true"), 1);
    assert!(!cloud.exists("srv-1"));
}

#[tokio::test(start_paused = true)]
async fn test_finished_start_leaves_server_alone() {
    let cloud = FakeCloud::new(Script::default());
    let mut spawner = controller(cloud.clone(), FakeProbe::ready());

    spawner.start().await.unwrap();
    drop(spawner);
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(cloud.count("delete:"), 0);
    assert!(cloud.exists("srv-1"));
}

#[tokio::test(start_paused = true)]
async fn test_stop_without_record_makes_no_calls() {
    let cloud = FakeCloud::new(Script::default());
    let mut spawner = controller(cloud.clone(), FakeProbe::ready());

    spawner.stop().await.unwrap();

    assert!(cloud.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stop_waits_for_confirmed_deletion() {
    let cloud = FakeCloud::new(Script {
        delete_reads: 3,
        ..Script::default()
    });
    cloud.insert_active("srv-9", "jhub-alice-Qx81mZpa");
    let mut spawner = controller(cloud.clone(), FakeProbe::ready());
    spawner.restore(&tracked_state("srv-9"));

    let started = tokio::time::Instant::now();
    spawner.stop().await.unwrap();

    assert_eq!(cloud.count("delete:srv-9:true"), 1);
    assert_eq!(cloud.count("get:srv-9"), 4);
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert!(!cloud.exists("srv-9"));
    assert!(!spawner.record().is_tracking());
}

#[tokio::test(start_paused = true)]
async fn test_stop_clears_immediately_when_already_gone() {
    let cloud = FakeCloud::new(Script::default());
    let mut spawner = controller(cloud.clone(), FakeProbe::ready());
    spawner.restore(&tracked_state("srv-gone"));

    spawner.stop().await.unwrap();

    assert_eq!(cloud.count("delete:srv-gone"), 1);
    assert_eq!(cloud.count("get:"), 0);
    assert!(spawner.serialize().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stop_failure_keeps_record() {
    let cloud = FakeCloud::new(Script {
        delete_error: Some("Forbidden".to_string()),
        ..Script::default()
    });
    cloud.insert_active("srv-9", "jhub-alice-Qx81mZpa");
    let mut spawner = controller(cloud.clone(), FakeProbe::ready());
    spawner.restore(&tracked_state("srv-9"));

    assert!(matches!(
        spawner.stop().await,
        Err(SpawnError::Provider(_))
    ));
    assert!(spawner.record().is_tracking());
}

#[tokio::test(start_paused = true)]
async fn test_stop_checkpoints_cleared_record() {
    let cloud = FakeCloud::new(Script::default());
    cloud.insert_active("srv-9", "jhub-alice-Qx81mZpa");
    let mut spawner = controller(cloud.clone(), FakeProbe::ready()).with_record_sink(Arc::new(
        EventSink {
            cloud: cloud.clone(),
            fail: false,
        },
    ));
    spawner.restore(&tracked_state("srv-9"));

    spawner.stop().await.unwrap();

    assert_eq!(cloud.events().last().map(String::as_str), Some("checkpoint:"));
}

#[tokio::test(start_paused = true)]
async fn test_poll_without_record_is_exited() {
    let cloud = FakeCloud::new(Script::default());
    let probe = FakeProbe::ready();
    let spawner = controller(cloud.clone(), probe.clone());

    let status = spawner.poll().await;

    assert_eq!(status, PollStatus::Exited);
    assert_eq!(status.exit_status(), Some(0));
    assert!(cloud.events().is_empty());
    assert!(probe.urls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_poll_running() {
    let cloud = FakeCloud::new(Script::default());
    cloud.insert_active("srv-9", "jhub-alice-Qx81mZpa");
    let probe = FakeProbe::ready();
    let mut spawner = controller(cloud.clone(), probe.clone());
    spawner.restore(&tracked_state("srv-9"));

    let status = spawner.poll().await;

    assert_eq!(status, PollStatus::Running);
    assert_eq!(status.exit_status(), None);
    assert_eq!(
        probe.urls(),
        vec![format!("http://{}:8000/user/alice/api", FLOATING_IP)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_poll_service_not_ready() {
    let cloud = FakeCloud::new(Script::default());
    cloud.insert_active("srv-9", "jhub-alice-Qx81mZpa");
    let mut spawner = controller(
        cloud.clone(),
        FakeProbe::new(Readiness::NotReady("HTTP 503".to_string())),
    );
    spawner.restore(&tracked_state("srv-9"));

    let status = spawner.poll().await;

    assert_eq!(status, PollStatus::Unconfirmed("HTTP 503".to_string()));
    assert_eq!(status.exit_status(), Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_poll_server_gone_is_exited() {
    let cloud = FakeCloud::new(Script::default());
    let mut spawner = controller(cloud.clone(), FakeProbe::ready());
    spawner.restore(&tracked_state("srv-gone"));

    assert_eq!(spawner.poll().await, PollStatus::Exited);
}

#[tokio::test(start_paused = true)]
async fn test_poll_read_error_is_unconfirmed() {
    let cloud = FakeCloud::new(Script {
        read_errors: 1,
        ..Script::default()
    });
    cloud.insert_active("srv-9", "jhub-alice-Qx81mZpa");
    let probe = FakeProbe::ready();
    let mut spawner = controller(cloud.clone(), probe.clone());
    spawner.restore(&tracked_state("srv-9"));

    assert!(matches!(spawner.poll().await, PollStatus::Unconfirmed(_)));
    assert!(probe.urls().is_empty());
    assert_eq!(spawner.poll().await, PollStatus::Running);
}

#[tokio::test(start_paused = true)]
async fn test_restore_round_trip() {
    let cloud = FakeCloud::new(Script::default());
    let mut first = controller(cloud.clone(), FakeProbe::ready());
    first.start().await.unwrap();
    let saved = first.serialize();

    let mut second = controller(cloud.clone(), FakeProbe::ready());
    second.restore(&saved);

    assert_eq!(second.record(), first.record());
    assert_eq!(second.serialize(), saved);
    assert_eq!(second.poll().await, PollStatus::Running);

    second.reset();
    assert!(second.serialize().is_empty());
    assert_eq!(second.poll().await, PollStatus::Exited);
}

#[tokio::test(start_paused = true)]
async fn test_session_store_tracks_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SessionStore::new(dir.path()));
    let cloud = FakeCloud::new(Script::default());
    let mut spawner = controller(cloud.clone(), FakeProbe::ready())
        .with_record_sink(Arc::new(StoreSink::new(store.clone(), "alice")));

    spawner.start().await.unwrap();
    let saved = store.load("alice").await.unwrap();
    assert_eq!(saved, spawner.serialize());

    spawner.stop().await.unwrap();
    assert!(store.list_sessions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_from_config() {
    let cloud = FakeCloud::new(Script::default());
    let mut config = SpawnerConfig {
        os_cloud_name: "openstack".to_string(),
        os_floating_ip_network: "public".to_string(),
        os_flavor_name: "m1.small".to_string(),
        os_image_name: "ubuntu-22.04".to_string(),
        os_network_name: "private".to_string(),
        ..SpawnerConfig::default()
    };

    let spawner = LifecycleController::from_config(
        &config,
        UserSession::new("alice"),
        cloud.clone(),
        FakeProbe::ready(),
    )
    .unwrap();
    assert!(spawner.server_name().starts_with("jhub-alice-"));

    config.os_image_name.clear();
    assert!(matches!(
        LifecycleController::from_config(
            &config,
            UserSession::new("alice"),
            cloud,
            FakeProbe::ready(),
        ),
        Err(SpawnError::Config(_))
    ));
}
