mod support;

use std::time::{Duration, Instant};

use pulsoid_hr::{
    MonitorSettings, PulsoidConfig, PulsoidError, SessionController, SessionState, SharedState,
};
use tokio_util::sync::CancellationToken;

use support::mock_pulsoid::{MockPulsoidServer, STEP_TIMEOUT, eventually};

fn test_config(server: &MockPulsoidServer) -> PulsoidConfig {
    let mut config = PulsoidConfig::new("test-client-id");
    config.endpoints.stream_url = server.ws_url();
    config.endpoints.validate_url = server.validate_url();
    config.timeouts.connect_timeout_secs = 2;
    config.timeouts.validate_timeout_secs = 2;
    config.timeouts.disconnect_timeout_secs = 1;
    config
}

fn streaming_settings() -> MonitorSettings {
    MonitorSettings {
        enabled: true,
        access_token: Some("valid-token".into()),
        scan_interval_ms: 20,
        ..MonitorSettings::default()
    }
}

async fn start_server_or_skip(test_name: &str) -> Option<MockPulsoidServer> {
    match MockPulsoidServer::start().await {
        Ok(server) => Some(server),
        Err(err) => {
            eprintln!("Skipping {test_name}: unable to start mock server: {err}");
            None
        }
    }
}

#[tokio::test]
async fn invalid_token_aborts_to_stopped_with_error() {
    let Some(mut server) = start_server_or_skip("invalid_token_aborts_to_stopped_with_error").await
    else {
        return;
    };
    server.set_validate_status(401);

    let state = SharedState::new(streaming_settings());
    let controller = SessionController::new(&test_config(&server), state.clone()).unwrap();
    let mut status = controller.subscribe_status();

    let err = controller.start().await.unwrap_err();
    assert!(matches!(err, PulsoidError::InvalidToken));
    assert_eq!(controller.status(), SessionState::Stopped);
    assert!(status.has_changed().unwrap());
    assert_eq!(*status.borrow_and_update(), SessionState::Stopped);

    let out = state.outputs();
    assert!(out.access_error);
    assert!(out.access_error_text.starts_with("Invalid access token"));
    assert_eq!(
        server.last_validate_authorization().as_deref(),
        Some("Bearer valid-token")
    );
    assert!(
        server
            .try_accept_connection(Duration::from_millis(200))
            .await
            .is_none()
    );
}

#[tokio::test]
async fn start_streams_and_processes_samples() {
    let Some(mut server) = start_server_or_skip("start_streams_and_processes_samples").await
    else {
        return;
    };
    let state = SharedState::new(streaming_settings());
    state.set_access_error("previous failure");
    let controller = SessionController::new(&test_config(&server), state.clone()).unwrap();

    controller.start().await.unwrap();
    assert_eq!(controller.status(), SessionState::Streaming);
    assert!(!state.outputs().access_error);

    let connection = server.accept_connection().await;
    assert_eq!(connection.authorization(), Some("Bearer valid-token"));

    connection.push_heart_rate(82).await;
    assert!(eventually(|| state.outputs().heart_rate == 82).await);
    assert!(state.outputs().device_online);

    controller.stop().await;
}

#[tokio::test]
async fn start_is_idempotent_and_stop_releases_everything() {
    let Some(mut server) =
        start_server_or_skip("start_is_idempotent_and_stop_releases_everything").await
    else {
        return;
    };
    let state = SharedState::new(streaming_settings());
    let controller = SessionController::new(&test_config(&server), state.clone()).unwrap();

    controller.start().await.unwrap();
    let mut connection = server.accept_connection().await;

    controller.start().await.unwrap();
    assert_eq!(controller.status(), SessionState::Streaming);
    assert!(
        server
            .try_accept_connection(Duration::from_millis(200))
            .await
            .is_none()
    );

    connection.push_heart_rate(70).await;
    assert!(eventually(|| state.outputs().heart_rate == 70).await);

    controller.stop().await;
    assert_eq!(controller.status(), SessionState::Stopped);
    connection.wait_closed().await;
    assert!(!state.outputs().device_online);
    assert!(controller.slot().latest(std::time::Instant::now()).is_none());

    // The timer is gone: a late tick would flip the online flag back.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!state.outputs().device_online);

    controller.stop().await;
    assert_eq!(controller.status(), SessionState::Stopped);
}

#[tokio::test]
async fn run_follows_settings_changes() {
    let Some(mut server) = start_server_or_skip("run_follows_settings_changes").await else {
        return;
    };
    let state = SharedState::new(MonitorSettings {
        enabled: false,
        ..streaming_settings()
    });
    let controller = std::sync::Arc::new(
        SessionController::new(&test_config(&server), state.clone()).unwrap(),
    );
    let shutdown = CancellationToken::new();
    let runner = tokio::spawn({
        let controller = std::sync::Arc::clone(&controller);
        let shutdown = shutdown.clone();
        async move { controller.run(shutdown).await }
    });

    assert!(
        server
            .try_accept_connection(Duration::from_millis(200))
            .await
            .is_none()
    );

    state.update_settings(|s| s.enabled = true);
    let mut connection = server.accept_connection().await;
    assert!(eventually(|| controller.status() == SessionState::Streaming).await);

    // Desktop disabled while not in VR: should stop.
    state.update_settings(|s| s.enabled_on_desktop = false);
    connection.wait_closed().await;
    assert!(eventually(|| controller.status() == SessionState::Stopped).await);

    // Entering VR re-enables.
    state.update_settings(|s| s.in_vr = true);
    let _connection = server.accept_connection().await;
    assert!(eventually(|| controller.status() == SessionState::Streaming).await);

    shutdown.cancel();
    runner.await.unwrap();
    assert_eq!(controller.status(), SessionState::Stopped);
}

#[tokio::test]
async fn stop_during_connecting_cancels_start() {
    let Some(server) = start_server_or_skip("stop_during_connecting_cancels_start").await else {
        return;
    };
    // Validation endpoint that accepts and never answers.
    let Ok(silent) = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await else {
        eprintln!("Skipping stop_during_connecting_cancels_start: unable to bind");
        return;
    };
    let silent_addr = silent.local_addr().unwrap();
    let holder = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = silent.accept().await {
            held.push(socket);
        }
    });

    let mut config = test_config(&server);
    config.endpoints.validate_url = format!("http://{silent_addr}/validate");
    config.timeouts.validate_timeout_secs = 30;

    let state = SharedState::new(streaming_settings());
    let controller = std::sync::Arc::new(SessionController::new(&config, state.clone()).unwrap());

    let starter = tokio::spawn({
        let controller = std::sync::Arc::clone(&controller);
        async move { controller.start().await }
    });
    assert!(eventually(|| controller.status() == SessionState::Connecting).await);

    let begun = Instant::now();
    controller.stop().await;
    assert!(begun.elapsed() < Duration::from_secs(2));

    let result = tokio::time::timeout(STEP_TIMEOUT, starter)
        .await
        .expect("start did not unwind")
        .unwrap();
    assert!(matches!(result, Err(PulsoidError::Cancelled)));
    assert_eq!(controller.status(), SessionState::Stopped);
    assert!(!state.outputs().access_error);

    holder.abort();
}

#[tokio::test]
async fn connection_loss_moves_to_stopped_with_error() {
    let Some(mut server) = start_server_or_skip("connection_loss_moves_to_stopped_with_error").await
    else {
        return;
    };
    let state = SharedState::new(streaming_settings());
    let controller = std::sync::Arc::new(
        SessionController::new(&test_config(&server), state.clone()).unwrap(),
    );
    let shutdown = CancellationToken::new();
    let runner = tokio::spawn({
        let controller = std::sync::Arc::clone(&controller);
        let shutdown = shutdown.clone();
        async move { controller.run(shutdown).await }
    });

    let connection = server.accept_connection().await;
    assert!(eventually(|| controller.status() == SessionState::Streaming).await);

    connection.drop_connection().await;
    assert!(eventually(|| controller.status() == SessionState::Stopped).await);

    let out = state.outputs();
    assert!(out.access_error);
    assert!(!out.access_error_text.is_empty());
    assert!(!out.device_online);

    // No automatic retry.
    assert!(
        server
            .try_accept_connection(Duration::from_millis(200))
            .await
            .is_none()
    );

    shutdown.cancel();
    runner.await.unwrap();
}

#[tokio::test]
async fn token_change_restarts_active_session() {
    let Some(mut server) = start_server_or_skip("token_change_restarts_active_session").await
    else {
        return;
    };
    let state = SharedState::new(streaming_settings());
    let controller = std::sync::Arc::new(
        SessionController::new(&test_config(&server), state.clone()).unwrap(),
    );
    let shutdown = CancellationToken::new();
    let runner = tokio::spawn({
        let controller = std::sync::Arc::clone(&controller);
        let shutdown = shutdown.clone();
        async move { controller.run(shutdown).await }
    });

    let mut first = server.accept_connection().await;
    state.update_settings(|s| s.access_token = Some("rotated-token".into()));

    first.wait_closed().await;
    let second = server.accept_connection().await;
    assert_eq!(second.authorization(), Some("Bearer rotated-token"));

    shutdown.cancel();
    runner.await.unwrap();
}
