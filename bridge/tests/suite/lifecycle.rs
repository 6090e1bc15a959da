//! Start/stop lifecycle against the in-memory engine.

use std::time::Duration;

use lulu_bridge::{Bridge, BridgeError, SessionState, deactivate};

use crate::common::{Behavior, FakeSpawner, TestHost, test_config};

fn bridge_with(behavior: Behavior) -> (Bridge, crate::common::Tracker) {
    let spawner = FakeSpawner::new(behavior);
    let tracker = spawner.tracker();
    (Bridge::with_spawner(test_config(), spawner), tracker)
}

#[tokio::test]
async fn stop_without_session_is_an_immediate_noop() {
    let (mut bridge, tracker) = bridge_with(Behavior::Cooperative);

    bridge.stop().await.unwrap();
    bridge.stop().await.unwrap();

    assert_eq!(bridge.state(), SessionState::Uninitialized);
    assert_eq!(tracker.spawned(), 0);
}

#[tokio::test]
async fn deactivate_none_completes_immediately() {
    deactivate(None).await.unwrap();
}

#[tokio::test]
async fn start_then_stop_runs_full_handshake_and_leaves_nothing_running() {
    let (mut bridge, tracker) = bridge_with(Behavior::Cooperative);
    let host = TestHost::new("/ext");

    bridge.start(&host).await.unwrap();
    assert_eq!(bridge.state(), SessionState::Running);
    assert_eq!(tracker.live(), 1);
    assert_eq!(tracker.spawned(), 1);

    bridge.stop().await.unwrap();
    assert_eq!(bridge.state(), SessionState::Uninitialized);
    assert_eq!(tracker.live(), 0);

    assert_eq!(
        tracker.log.methods(),
        ["initialize", "initialized", "shutdown", "exit"]
    );
}

#[cfg(not(windows))]
#[tokio::test]
async fn engine_is_located_two_levels_above_install_root() {
    let (mut bridge, tracker) = bridge_with(Behavior::Cooperative);
    let host = TestHost::new("/ext");

    bridge.start(&host).await.unwrap();
    bridge.stop().await.unwrap();

    assert_eq!(
        tracker.commands(),
        [std::path::PathBuf::from("/target/debug/lulu-lsp")]
    );
}

#[tokio::test]
async fn configured_engine_path_overrides_locator() {
    let spawner = FakeSpawner::new(Behavior::Cooperative);
    let tracker = spawner.tracker();
    let config = lulu_bridge::BridgeConfig {
        engine_path: Some("/opt/lulu/lulu-lsp".into()),
        ..test_config()
    };
    let mut bridge = Bridge::with_spawner(config, spawner);

    bridge.start(&TestHost::new("/ext")).await.unwrap();
    bridge.stop().await.unwrap();

    assert_eq!(
        tracker.commands(),
        [std::path::PathBuf::from("/opt/lulu/lulu-lsp")]
    );
}

#[tokio::test]
async fn initialize_params_carry_workspace_root() {
    let (mut bridge, tracker) = bridge_with(Behavior::Cooperative);
    let host = TestHost::new("/ext");

    bridge.start(&host).await.unwrap();
    let init = tracker.log.with_method("initialize").remove(0);
    let expected = url::Url::from_file_path(host.workspace()).unwrap();
    assert_eq!(init["params"]["rootUri"], expected.as_str());
    assert!(init["id"].is_number());

    bridge.stop().await.unwrap();
}

#[tokio::test]
async fn second_start_is_rejected_without_spawning() {
    let (mut bridge, tracker) = bridge_with(Behavior::Cooperative);
    let host = TestHost::new("/ext");

    bridge.start(&host).await.unwrap();
    let err = bridge.start(&host).await.unwrap_err();

    assert!(matches!(err, BridgeError::AlreadyRunning));
    assert_eq!(bridge.state(), SessionState::Running);
    assert_eq!(tracker.spawned(), 1);
    assert_eq!(tracker.live(), 1);

    bridge.stop().await.unwrap();
    assert_eq!(tracker.live(), 0);
}

#[tokio::test]
async fn handshake_failure_kills_engine_and_resets_state() {
    let (mut bridge, tracker) = bridge_with(Behavior::RejectInitialize);
    let host = TestHost::new("/ext");

    let err = bridge.start(&host).await.unwrap_err();

    match err {
        BridgeError::Handshake(msg) => assert!(msg.contains("engine refused to start")),
        other => panic!("expected handshake error, got {other}"),
    }
    assert_eq!(bridge.state(), SessionState::Uninitialized);
    assert_eq!(tracker.live(), 0);
    assert!(host.watcher_globs().is_empty());
}

#[tokio::test]
async fn bridge_can_restart_after_stop() {
    let (mut bridge, tracker) = bridge_with(Behavior::Cooperative);
    let host = TestHost::new("/ext");

    bridge.start(&host).await.unwrap();
    bridge.stop().await.unwrap();
    bridge.start(&host).await.unwrap();
    assert_eq!(tracker.live(), 1);
    bridge.stop().await.unwrap();

    assert_eq!(tracker.spawned(), 2);
    assert_eq!(tracker.live(), 0);
}

#[tokio::test]
async fn unresponsive_engine_is_killed_and_failure_reported() {
    let (mut bridge, tracker) = bridge_with(Behavior::Unresponsive);
    let host = TestHost::new("/ext");

    bridge.start(&host).await.unwrap();
    let err = bridge.stop().await.unwrap_err();

    assert!(matches!(err, BridgeError::Shutdown(_)));
    assert_eq!(bridge.state(), SessionState::Uninitialized);
    assert_eq!(tracker.live(), 0);
    assert!(tracker.log.with_method("exit").is_empty());
}

#[tokio::test]
async fn engine_crash_returns_bridge_to_uninitialized() {
    let (mut bridge, tracker) = bridge_with(Behavior::CrashAfterInit);
    let host = TestHost::new("/ext");

    bridge.start(&host).await.unwrap();

    for _ in 0..200 {
        bridge.poll_events(16);
        if bridge.state() == SessionState::Uninitialized {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(bridge.state(), SessionState::Uninitialized);
    assert_eq!(tracker.live(), 0);
    bridge.stop().await.unwrap();
}

#[tokio::test]
async fn engine_exit_is_noticed_after_event_burst() {
    let (mut bridge, tracker) = bridge_with(Behavior::FloodThenExit);
    let host = TestHost::new("/ext");

    bridge.start(&host).await.unwrap();
    // Let the burst overflow the event queue before the host looks at it.
    tokio::time::sleep(Duration::from_millis(300)).await;

    for _ in 0..200 {
        bridge.poll_events(1000);
        if bridge.state() == SessionState::Uninitialized {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(bridge.state(), SessionState::Uninitialized);
    assert_eq!(tracker.live(), 0);
    assert!(bridge.snapshot().is_empty());
    bridge.stop().await.unwrap();
}

#[tokio::test]
async fn abandoned_start_leaves_bridge_uninitialized() {
    let (mut bridge, tracker) = bridge_with(Behavior::Silent);
    let host = TestHost::new("/ext");

    let attempt = tokio::time::timeout(Duration::from_millis(100), bridge.start(&host)).await;

    assert!(attempt.is_err());
    assert_eq!(bridge.state(), SessionState::Uninitialized);
    assert_eq!(tracker.spawned(), 1);
    assert_eq!(tracker.live(), 0);
    bridge.stop().await.unwrap();
    assert_eq!(bridge.state(), SessionState::Uninitialized);
}
