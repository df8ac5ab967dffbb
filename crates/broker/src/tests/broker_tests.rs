use super::*;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use driver::{SimulatedConnector, SimulatedSwitcher};
use shared::protocol::ClientCommand;

fn sid(raw: &str) -> SessionId {
    SessionId(raw.to_string())
}

async fn test_broker(tag: &str) -> (Arc<Broker>, broadcast::Sender<ServerEvent>, PathBuf) {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let root = std::env::temp_dir().join(format!("broker_test_{tag}_{suffix}"));
    let storage = Storage::new(&root).await.expect("storage");
    let (events, _) = broadcast::channel(256);
    let broker = Broker::new(
        events.clone(),
        Arc::new(SimulatedConnector),
        Arc::new(SimulatedSwitcher::new()),
        storage,
    );
    (broker, events, root)
}

async fn add_device(broker: &Arc<Broker>, address: &str) -> DeviceId {
    let replies = broker
        .handle_command(
            &sid("rigger"),
            ClientCommand::AddDevice {
                name: "Rig".into(),
                address: address.into(),
            },
        )
        .await;
    assert!(replies.is_empty(), "add should not error: {replies:?}");
    let id = DeviceId::for_address(address);
    // The connection workflow runs in a spawned task; wait for it to land.
    for _ in 0..50 {
        if broker
            .device_state(&id)
            .await
            .map(|state| state.connected)
            .unwrap_or(false)
        {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    id
}

#[tokio::test]
async fn most_recent_selector_becomes_controller_and_displaced_intents_drop() {
    let (broker, _events, root) = test_broker("displace").await;
    let device = add_device(&broker, "192.168.0.200").await;

    broker
        .handle_command(
            &sid("alice"),
            ClientCommand::SelectDevice {
                device_id: device.clone(),
            },
        )
        .await;
    assert_eq!(broker.controller_of(&device).await.as_deref(), Some("User 1"));

    broker
        .handle_command(
            &sid("bob"),
            ClientCommand::SelectDevice {
                device_id: device.clone(),
            },
        )
        .await;
    assert_eq!(broker.controller_of(&device).await.as_deref(), Some("User 2"));

    // Displaced controller's intents are dropped with no state mutation.
    broker
        .handle_command(
            &sid("alice"),
            ClientCommand::SetSpeed {
                pitch: 1.0,
                roll: 0.0,
                yaw: 0.0,
            },
        )
        .await;
    let state = broker.device_state(&device).await.expect("state");
    assert_eq!(state.speed, Angles::ZERO);

    // The current controller's intents apply, scaled x30.
    broker
        .handle_command(
            &sid("bob"),
            ClientCommand::SetSpeed {
                pitch: 1.0,
                roll: 0.0,
                yaw: 0.0,
            },
        )
        .await;
    let state = broker.device_state(&device).await.expect("state");
    assert_eq!(state.speed.pitch, 30.0);

    // Re-selecting restores alice's control.
    broker
        .handle_command(
            &sid("alice"),
            ClientCommand::SelectDevice {
                device_id: device.clone(),
            },
        )
        .await;
    assert_eq!(broker.controller_of(&device).await.as_deref(), Some("User 1"));
    std::fs::remove_dir_all(root).expect("cleanup");
}

#[tokio::test]
async fn disconnect_releases_ownership_but_keeps_commanded_speed() {
    let (broker, _events, root) = test_broker("disconnect").await;
    let device = add_device(&broker, "192.168.0.200").await;

    broker
        .handle_command(
            &sid("alice"),
            ClientCommand::SelectDevice {
                device_id: device.clone(),
            },
        )
        .await;
    broker
        .handle_command(
            &sid("alice"),
            ClientCommand::SetSpeed {
                pitch: 0.5,
                roll: 0.0,
                yaw: 0.5,
            },
        )
        .await;

    broker.handle_disconnect(&sid("alice")).await;

    assert_eq!(broker.controller_of(&device).await, None);
    let state = broker.device_state(&device).await.expect("state");
    assert_eq!(state.speed.pitch, 15.0);
    assert_eq!(state.speed.yaw, 15.0);
    std::fs::remove_dir_all(root).expect("cleanup");
}

#[tokio::test]
async fn emergency_stop_works_without_ownership() {
    let (broker, _events, root) = test_broker("estop").await;
    let device = add_device(&broker, "192.168.0.200").await;

    broker
        .handle_command(
            &sid("alice"),
            ClientCommand::SelectDevice {
                device_id: device.clone(),
            },
        )
        .await;
    // Bob displaces alice and commands motion.
    broker
        .handle_command(
            &sid("bob"),
            ClientCommand::SelectDevice {
                device_id: device.clone(),
            },
        )
        .await;
    broker
        .handle_command(
            &sid("bob"),
            ClientCommand::SetSpeed {
                pitch: 1.0,
                roll: 0.0,
                yaw: 1.0,
            },
        )
        .await;
    assert_eq!(
        broker.device_state(&device).await.expect("state").speed.pitch,
        30.0
    );

    // Alice still has the device selected but no longer controls it; her
    // stop must be honored anyway.
    broker.handle_command(&sid("alice"), ClientCommand::Stop).await;
    let state = broker.device_state(&device).await.expect("state");
    assert_eq!(state.speed, Angles::ZERO);
    assert_eq!(broker.controller_of(&device).await.as_deref(), Some("User 2"));
    std::fs::remove_dir_all(root).expect("cleanup");
}

#[tokio::test]
async fn preset_round_trip_converges_through_the_interpolation_path() {
    let (broker, _events, root) = test_broker("preset").await;
    let alice = sid("alice");

    // Drive the virtual device to a known position: speeds are exact
    // multiples of the per-tick integration step.
    broker
        .handle_command(
            &alice,
            ClientCommand::SetSpeed {
                pitch: 20.0 / SPEED_INPUT_SCALE,
                roll: 10.0 / SPEED_INPUT_SCALE,
                yaw: 40.0 / SPEED_INPUT_SCALE,
            },
        )
        .await;
    for _ in 0..10 {
        broker.motion_tick(motion::TICK_SECONDS).await;
    }
    broker.handle_command(&alice, ClientCommand::Stop).await;

    let virtual_id = DeviceId::virtual_device();
    let saved_at = broker.device_state(&virtual_id).await.expect("state").position;
    assert!((saved_at.pitch - 10.0).abs() < 1e-9);
    assert!((saved_at.roll - 5.0).abs() < 1e-9);
    assert!((saved_at.yaw - 20.0).abs() < 1e-9);

    let replies = broker
        .handle_command(&alice, ClientCommand::SavePreset { slot: 3 })
        .await;
    assert!(matches!(replies[0], ServerEvent::PresetList { .. }));

    // Wander off, then recall.
    broker.handle_command(&alice, ClientCommand::GoHome).await;
    for _ in 0..30 {
        broker.motion_tick(motion::TICK_SECONDS).await;
    }
    let homed = broker.device_state(&virtual_id).await.expect("state").position;
    assert!(homed.pitch.abs() <= motion::ARRIVAL_TOLERANCE_DEG);

    broker
        .handle_command(&alice, ClientCommand::RecallPreset { slot: 3 })
        .await;
    for _ in 0..30 {
        broker.motion_tick(motion::TICK_SECONDS).await;
    }
    let recalled = broker.device_state(&virtual_id).await.expect("state").position;
    assert!((recalled.pitch - saved_at.pitch).abs() <= motion::ARRIVAL_TOLERANCE_DEG);
    assert!((recalled.roll - saved_at.roll).abs() <= motion::ARRIVAL_TOLERANCE_DEG);
    assert!((recalled.yaw - saved_at.yaw).abs() <= motion::ARRIVAL_TOLERANCE_DEG);
    std::fs::remove_dir_all(root).expect("cleanup");
}

#[tokio::test]
async fn invalid_preset_slots_and_empty_slots_report_validation_errors() {
    let (broker, _events, root) = test_broker("slots").await;
    let alice = sid("alice");

    let replies = broker
        .handle_command(&alice, ClientCommand::SavePreset { slot: 0 })
        .await;
    assert!(matches!(&replies[0], ServerEvent::Error(err) if matches!(err.code, shared::error::ErrorCode::Validation)));

    let replies = broker
        .handle_command(&alice, ClientCommand::RecallPreset { slot: 9 })
        .await;
    assert!(matches!(&replies[0], ServerEvent::Error(err) if matches!(err.code, shared::error::ErrorCode::Validation)));
    std::fs::remove_dir_all(root).expect("cleanup");
}

#[tokio::test]
async fn device_management_errors_surface_as_events() {
    let (broker, _events, root) = test_broker("mgmt").await;
    let alice = sid("alice");

    let replies = broker
        .handle_command(
            &alice,
            ClientCommand::AddDevice {
                name: "Rig".into(),
                address: "not-an-ip".into(),
            },
        )
        .await;
    assert!(matches!(&replies[0], ServerEvent::Error(err) if matches!(err.code, shared::error::ErrorCode::Validation)));

    add_device(&broker, "192.168.0.200").await;
    let replies = broker
        .handle_command(
            &alice,
            ClientCommand::AddDevice {
                name: "Clone".into(),
                address: "192.168.0.200".into(),
            },
        )
        .await;
    assert!(matches!(&replies[0], ServerEvent::Error(err) if matches!(err.code, shared::error::ErrorCode::DuplicateAddress)));

    let replies = broker
        .handle_command(
            &alice,
            ClientCommand::RemoveDevice {
                device_id: DeviceId::virtual_device(),
            },
        )
        .await;
    assert!(matches!(&replies[0], ServerEvent::Error(err) if matches!(err.code, shared::error::ErrorCode::ProtectedDevice)));

    let replies = broker
        .handle_command(
            &alice,
            ClientCommand::RemoveDevice {
                device_id: DeviceId::for_address("10.9.9.9"),
            },
        )
        .await;
    assert!(matches!(&replies[0], ServerEvent::Error(err) if matches!(err.code, shared::error::ErrorCode::NotFound)));
    std::fs::remove_dir_all(root).expect("cleanup");
}

#[tokio::test]
async fn removing_a_selected_device_resets_sessions_to_virtual() {
    let (broker, _events, root) = test_broker("remove").await;
    let device = add_device(&broker, "192.168.0.200").await;

    broker
        .handle_command(
            &sid("alice"),
            ClientCommand::SelectDevice {
                device_id: device.clone(),
            },
        )
        .await;
    broker
        .handle_command(
            &sid("alice"),
            ClientCommand::RemoveDevice {
                device_id: device.clone(),
            },
        )
        .await;

    assert!(broker.device_state(&device).await.is_none());
    assert_eq!(broker.controller_of(&device).await, None);
    // Subsequent untargeted intents land on the virtual device.
    broker
        .handle_command(
            &sid("alice"),
            ClientCommand::SetSpeed {
                pitch: 1.0,
                roll: 0.0,
                yaw: 0.0,
            },
        )
        .await;
    let virtual_state = broker
        .device_state(&DeviceId::virtual_device())
        .await
        .expect("virtual state");
    assert_eq!(virtual_state.speed.pitch, 30.0);
    std::fs::remove_dir_all(root).expect("cleanup");
}

#[tokio::test]
async fn telemetry_omits_hardware_readings_in_virtual_mode() {
    let (broker, events, root) = test_broker("telemetry").await;
    let mut rx = events.subscribe();

    broker.telemetry_tick().await;
    let telemetry = loop {
        match rx.recv().await.expect("event") {
            ServerEvent::Telemetry { telemetry } => break telemetry,
            _ => continue,
        }
    };
    assert_eq!(telemetry.temperature_c, None);
    assert_eq!(telemetry.battery_pct, None);

    // With a real device active the snapshot carries hardware readings.
    let device = add_device(&broker, "192.168.0.200").await;
    broker
        .handle_command(
            &sid("alice"),
            ClientCommand::SelectDevice { device_id: device },
        )
        .await;
    let mut rx = events.subscribe();
    broker.telemetry_tick().await;
    let telemetry = loop {
        match rx.recv().await.expect("event") {
            ServerEvent::Telemetry { telemetry } => break telemetry,
            _ => continue,
        }
    };
    assert!(telemetry.temperature_c.is_some());
    assert!(telemetry.battery_pct.is_some());
    std::fs::remove_dir_all(root).expect("cleanup");
}

#[tokio::test]
async fn mirrored_readback_tracks_the_active_real_device() {
    let (broker, _events, root) = test_broker("mirror").await;
    let alice = sid("alice");

    // Walk the virtual device away from origin first.
    broker
        .handle_command(
            &alice,
            ClientCommand::SetSpeed {
                pitch: 1.0,
                roll: 0.0,
                yaw: 1.0,
            },
        )
        .await;
    for _ in 0..5 {
        broker.motion_tick(motion::TICK_SECONDS).await;
    }
    let virtual_id = DeviceId::virtual_device();
    let wandered = broker.device_state(&virtual_id).await.expect("state").position;
    assert!(wandered.pitch > 0.0);

    // Selecting a connected real device makes hardware readback
    // authoritative; the virtual device mirrors it on the next tick.
    let device = add_device(&broker, "192.168.0.200").await;
    assert!(
        broker.device_state(&device).await.expect("state").connected,
        "simulated connector should have connected"
    );
    broker
        .handle_command(
            &alice,
            ClientCommand::SelectDevice {
                device_id: device.clone(),
            },
        )
        .await;
    broker.motion_tick(motion::TICK_SECONDS).await;

    let real = broker.device_state(&device).await.expect("state").position;
    let mirrored = broker
        .device_state(&virtual_id)
        .await
        .expect("virtual state")
        .position;
    assert_eq!(real, mirrored);
    assert_eq!(mirrored, Angles::ZERO, "readback overwrote the wandered mirror");
    std::fs::remove_dir_all(root).expect("cleanup");
}

#[tokio::test]
async fn rename_sanitizes_and_reports_identity() {
    let (broker, _events, root) = test_broker("rename").await;
    let replies = broker
        .handle_command(
            &sid("alice"),
            ClientCommand::Rename {
                name: "  Operator One  ".into(),
            },
        )
        .await;
    match &replies[0] {
        ServerEvent::Identity { name, .. } => assert_eq!(name, "Operator One"),
        other => panic!("unexpected reply: {other:?}"),
    }
    std::fs::remove_dir_all(root).expect("cleanup");
}

#[tokio::test]
async fn switcher_commands_require_a_connection() {
    let (broker, _events, root) = test_broker("switcher").await;
    let alice = sid("alice");

    let replies = broker
        .handle_command(&alice, ClientCommand::CameraFocus { port: 1, value: 40.0 })
        .await;
    assert!(matches!(&replies[0], ServerEvent::Error(err) if matches!(err.code, shared::error::ErrorCode::DeviceState)));

    let replies = broker
        .handle_command(
            &alice,
            ClientCommand::SwitcherConnect {
                address: "192.168.0.240".into(),
            },
        )
        .await;
    assert!(replies.is_empty(), "connect should succeed: {replies:?}");

    let replies = broker
        .handle_command(&alice, ClientCommand::CameraFocus { port: 1, value: 40.0 })
        .await;
    assert!(replies.is_empty(), "focus should succeed: {replies:?}");

    let replies = broker
        .handle_command(&alice, ClientCommand::CameraGain { port: 9, value: 6.0 })
        .await;
    assert!(matches!(&replies[0], ServerEvent::Error(err) if matches!(err.code, shared::error::ErrorCode::Validation)));
    std::fs::remove_dir_all(root).expect("cleanup");
}

#[tokio::test]
async fn persisted_configuration_survives_a_restart() {
    let (broker, _events, root) = test_broker("persist").await;
    let alice = sid("alice");
    let device = add_device(&broker, "192.168.0.200").await;
    broker
        .handle_command(
            &alice,
            ClientCommand::SetCameraPort {
                device_id: device.clone(),
                port: 4,
            },
        )
        .await;
    broker
        .handle_command(&alice, ClientCommand::SavePreset { slot: 2 })
        .await;

    // A second broker over the same data directory sees the same config.
    let storage = Storage::new(&root).await.expect("storage");
    let (events, _) = broadcast::channel(16);
    let restarted = Broker::new(
        events,
        Arc::new(SimulatedConnector),
        Arc::new(SimulatedSwitcher::new()),
        storage,
    );
    restarted.load_persisted().await.expect("load");

    let state = restarted.device_state(&device).await;
    assert!(state.is_some(), "device restored from snapshot");
    assert!(
        !state.expect("state").connected,
        "restored devices come back disconnected"
    );
    let replies = restarted
        .handle_command(&alice, ClientCommand::ListCameraPorts)
        .await;
    match &replies[0] {
        ServerEvent::CameraPorts { ports } => {
            assert_eq!(ports.len(), 1);
            assert_eq!(ports[0].port, 4);
        }
        other => panic!("unexpected reply: {other:?}"),
    }
    std::fs::remove_dir_all(root).expect("cleanup");
}
