use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};
use yt_lounge_rs::codec::encode_batch;
use yt_lounge_rs::events::{
    DisconnectedEvent, NowPlayingEvent, PlaybackStateEvent, VolumeChangedEvent,
};
use yt_lounge_rs::{
    AuthState, EventListener, LinkStage, LoungeClient, LoungeConfig, LoungeError, LoungeEvent,
    NoopListener, PlaybackState, PlaybackStatus,
};

fn chunk(batch: Value) -> String {
    let Value::Array(batch) = batch else {
        panic!("batch must be an array")
    };
    encode_batch(&batch).unwrap()
}

fn client_for(server: &MockServer) -> LoungeClient {
    let config = LoungeConfig::default().with_api_base(server.uri());
    LoungeClient::with_config("Test Remote", config).unwrap()
}

async fn linked_client(server: &MockServer) -> LoungeClient {
    let client = client_for(server);
    client
        .load_auth_state(AuthState {
            screen_id: Some("screen-1".into()),
            lounge_id_token: Some("token-1".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    client
}

fn screen_status(client_name: &str) -> Value {
    let info = json!({"brand": "LG", "model": "OLED55", "os": "webOS", "clientName": client_name});
    let devices = json!([
        {"name": "Test Remote", "type": "REMOTE_CONTROL", "id": "r1"},
        {"name": "Living Room TV", "type": "LOUNGE_SCREEN", "id": "s1", "deviceInfo": info.to_string()}
    ]);
    json!({"devices": devices.to_string(), "queueId": "RQ1"})
}

fn bind_body() -> String {
    chunk(json!([
        [0, ["c", "SID1"]],
        [1, ["S", "GS1"]],
        [2, ["loungeStatus", screen_status("TVHTML5")]],
        [3, ["onStateChange", {"currentTime": "12.5", "duration": "200", "state": "1"}]]
    ]))
}

async fn mount_bind(server: &MockServer, body: String) {
    Mock::given(method("POST"))
        .and(path("/bc/bind"))
        .and(query_param("RID", "1"))
        .and(body_string_contains("capabilities="))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

async fn bound_client(server: &MockServer) -> LoungeClient {
    mount_bind(server, bind_body()).await;
    let client = linked_client(server).await;
    assert!(client.connect().await.unwrap());
    client
}

fn command_mock(rid: &str, ofs: &str, name: &str) -> wiremock::MockBuilder {
    Mock::given(method("POST"))
        .and(path("/bc/bind"))
        .and(query_param("RID", rid))
        .and(query_param("SID", "SID1"))
        .and(query_param("gsessionid", "GS1"))
        .and(body_string_contains(format!("ofs={}", ofs)))
        .and(body_string_contains(format!("req0__sc={}", name)))
}

async fn request_count(server: &MockServer) -> usize {
    server.received_requests().await.unwrap_or_default().len()
}

// Records listener calls in the order they arrive
#[derive(Default)]
struct RecordingListener {
    seen: Mutex<Vec<String>>,
}

impl RecordingListener {
    fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }

    fn push(&self, entry: String) {
        self.seen.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl EventListener for RecordingListener {
    async fn playback_state_changed(&self, event: &PlaybackStateEvent) {
        self.push(format!("state:{}", event.state.as_str()));
    }

    async fn now_playing_changed(&self, event: &NowPlayingEvent) {
        self.push(format!(
            "now_playing:{}",
            event.video_id.as_deref().unwrap_or_default()
        ));
    }

    async fn volume_changed(&self, event: &VolumeChangedEvent) {
        self.push(format!("volume:{}", event.volume));
    }

    async fn disconnected(&self, event: &DisconnectedEvent) {
        self.push(format!(
            "disconnected:{}",
            event.reason.as_deref().unwrap_or_default()
        ));
    }
}

// Test that commands fail fast without a bound session
#[tokio::test]
async fn test_command_without_session_makes_no_request() {
    let server = MockServer::start().await;
    let client = linked_client(&server).await;

    assert!(!client.connected().await);
    assert!(matches!(client.play().await, Err(LoungeError::NotConnected)));
    assert!(matches!(client.disconnect().await, Err(LoungeError::NotConnected)));
    let listener = RecordingListener::default();
    assert!(matches!(
        client.subscribe(&listener).await,
        Err(LoungeError::NotConnected)
    ));
    assert!(matches!(
        client.screen_device_name().await,
        Err(LoungeError::NotConnected)
    ));
    assert_eq!(request_count(&server).await, 0);
}

// Test precondition errors for unpaired clients
#[tokio::test]
async fn test_unpaired_preconditions() {
    let server = MockServer::start().await;
    let client = client_for(&server);

    assert_eq!(client.stage().await, LinkStage::Unpaired);
    assert!(matches!(client.refresh_auth().await, Err(LoungeError::NotPaired)));
    assert!(matches!(client.connect().await, Err(LoungeError::NotLinked)));
    assert!(matches!(client.is_available().await, Err(LoungeError::NotLinked)));
    assert!(matches!(client.screen_name().await, Err(LoungeError::NotLinked)));
    assert_eq!(request_count(&server).await, 0);
}

// Test pairing with a code stores screen id, token and name
#[tokio::test]
async fn test_pair_links_client() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pairing/get_screen"))
        .and(body_string_contains("pairing_code=123456789012"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "screen": {"name": "Living Room TV", "screenId": "screen-1", "loungeToken": "token-1"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert!(client.pair("123456789012").await.unwrap());
    assert_eq!(client.stage().await, LinkStage::Linked);
    assert_eq!(
        client.screen_name().await.unwrap().as_deref(),
        Some("Living Room TV")
    );
    let auth = client.auth_state().await;
    assert_eq!(auth.screen_id.as_deref(), Some("screen-1"));
    assert_eq!(auth.lounge_id_token.as_deref(), Some("token-1"));
}

// Test a rejected pairing code surfaces the status
#[tokio::test]
async fn test_pair_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pairing/get_screen"))
        .respond_with(ResponseTemplate::new(404).set_body_string("Not Found"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    match client.pair("000").await {
        Err(LoungeError::RequestRejected { status, .. }) => assert_eq!(status, 404),
        other => panic!("unexpected result {:?}", other),
    }
    assert_eq!(client.stage().await, LinkStage::Unpaired);
}

// Test pairing with a known screen id fetches a token
#[tokio::test]
async fn test_pair_with_screen_id_refreshes_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pairing/get_lounge_token_batch"))
        .and(body_string_contains("screen_ids=screen-9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "screens": [{"screenId": "screen-9", "loungeToken": "token-9", "expiration": 1700000000000u64}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert!(client
        .pair_with_screen_id("screen-9", Some("Bedroom"))
        .await
        .unwrap());
    assert_eq!(client.stage().await, LinkStage::Linked);
    assert_eq!(
        client.auth_state().await.lounge_id_token.as_deref(),
        Some("token-9")
    );
    assert_eq!(client.screen_name().await.unwrap().as_deref(), Some("Bedroom"));
}

// Test refresh with an empty screen list
#[tokio::test]
async fn test_refresh_without_screens_is_invalid() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pairing/get_lounge_token_batch"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"screens": []})))
        .mount(&server)
        .await;

    let client = linked_client(&server).await;
    assert!(matches!(
        client.refresh_auth().await,
        Err(LoungeError::InvalidResponse(_))
    ));
}

// Test availability reads the first screen status
#[tokio::test]
async fn test_is_available() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pairing/get_screen_availability"))
        .and(body_string_contains("lounge_token=token-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "screens": [{"loungeToken": "token-1", "status": "online"}]
        })))
        .mount(&server)
        .await;

    let client = linked_client(&server).await;
    assert!(client.is_available().await.unwrap());
}

#[tokio::test]
async fn test_is_available_offline() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pairing/get_screen_availability"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "screens": [{"status": "offline"}]
        })))
        .mount(&server)
        .await;

    let client = linked_client(&server).await;
    assert!(!client.is_available().await.unwrap());
}

// Test a successful bind routes the body and binds the session
#[tokio::test]
async fn test_connect_binds_session() {
    let server = MockServer::start().await;
    mount_bind(&server, bind_body()).await;
    let client = linked_client(&server).await;
    let mut events = client.event_receiver();

    assert!(client.connect().await.unwrap());
    assert_eq!(client.stage().await, LinkStage::Bound);

    let session = client.session_state().await;
    assert_eq!(session.sid(), Some("SID1"));
    assert_eq!(session.gsession(), Some("GS1"));
    assert_eq!(session.last_event_id(), Some(3));
    assert_eq!(session.command_sequence(), 1);

    assert_eq!(
        client.screen_device_name().await.unwrap().as_deref(),
        Some("LG OLED55")
    );
    assert_eq!(
        client.screen_name().await.unwrap().as_deref(),
        Some("Living Room TV")
    );

    let playback = client.playback_state().await;
    assert_eq!(playback.state, PlaybackStatus::Playing);
    assert_eq!(playback.current_time, 12.5);
    assert_eq!(playback.duration, 200.0);

    match events.try_recv().unwrap() {
        LoungeEvent::PlaybackStateChanged(e) => assert_eq!(e.state, PlaybackStatus::Playing),
        other => panic!("unexpected event {:?}", other),
    }
    assert!(events.try_recv().is_err());
}

// Test a 401 on bind drops the token
#[tokio::test]
async fn test_connect_unauthorized_clears_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bc/bind"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
        .mount(&server)
        .await;

    let client = linked_client(&server).await;
    assert!(!client.connect().await.unwrap());
    assert_eq!(client.stage().await, LinkStage::Paired);
    assert_eq!(client.auth_state().await.lounge_id_token, None);
}

// Test other bind failures return false without raising
#[tokio::test]
async fn test_connect_server_error_is_not_connected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bc/bind"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = linked_client(&server).await;
    assert!(!client.connect().await.unwrap());
    assert_eq!(client.stage().await, LinkStage::Linked);
}

// Test a kids screen is refused and the rest of the batch is skipped
#[tokio::test]
async fn test_connect_kids_screen_not_supported() {
    let server = MockServer::start().await;
    let body = chunk(json!([
        [0, ["c", "SID1"]],
        [1, ["S", "GS1"]],
        [2, ["loungeStatus", screen_status("TVHTML5_FOR_KIDS")]],
        [3, ["onStateChange", {"currentTime": "12.5", "duration": "200", "state": "1"}]]
    ]));
    mount_bind(&server, body).await;

    let client = linked_client(&server).await;
    assert!(matches!(
        client.connect().await,
        Err(LoungeError::NotSupported(_))
    ));
    assert_eq!(client.playback_state().await, PlaybackState::default());
    assert_eq!(client.screen_info().await.screen_name, None);
    // ids from the same batch must not leave a usable session behind
    assert_eq!(client.stage().await, LinkStage::Linked);
    assert!(!client.connected().await);
}

// Test commands carry the sequence in ofs and RID
#[tokio::test]
async fn test_command_sequence() {
    let server = MockServer::start().await;
    let client = bound_client(&server).await;

    command_mock("2", "1", "play")
        .and(query_param("AID", "3"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    command_mock("3", "2", "setVolume")
        .and(body_string_contains("req0_volume=35"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    assert!(client.play().await.unwrap());
    assert!(client.set_volume(35).await.unwrap());
    assert_eq!(client.session_state().await.command_sequence(), 3);
}

// Test invalid command values never reach the network
#[tokio::test]
async fn test_invalid_command_is_rejected_locally() {
    let server = MockServer::start().await;
    let client = bound_client(&server).await;
    let before = request_count(&server).await;

    assert!(matches!(
        client.set_volume(101).await,
        Err(LoungeError::InvalidCommand(_))
    ));
    assert!(matches!(
        client.set_playback_speed(3.0).await,
        Err(LoungeError::InvalidCommand(_))
    ));
    assert_eq!(request_count(&server).await, before);
    assert_eq!(client.session_state().await.command_sequence(), 1);
}

// Test 401 Expired clears session and token
#[tokio::test]
async fn test_command_expired_clears_session_and_token() {
    let server = MockServer::start().await;
    let client = bound_client(&server).await;
    command_mock("2", "1", "pause")
        .respond_with(ResponseTemplate::new(401).set_body_string("Expired"))
        .mount(&server)
        .await;

    assert!(!client.pause().await.unwrap());
    assert!(client.session_state().await.is_empty());
    assert_eq!(client.auth_state().await.lounge_id_token, None);
    assert_eq!(client.stage().await, LinkStage::Paired);
}

// Test 400 Unknown SID clears only the session
#[tokio::test]
async fn test_command_unknown_sid_keeps_token() {
    let server = MockServer::start().await;
    let client = bound_client(&server).await;
    command_mock("2", "1", "next")
        .respond_with(ResponseTemplate::new(400).set_body_string("Unknown SID"))
        .mount(&server)
        .await;

    assert!(!client.next().await.unwrap());
    assert!(client.session_state().await.is_empty());
    assert_eq!(
        client.auth_state().await.lounge_id_token.as_deref(),
        Some("token-1")
    );
    assert_eq!(client.stage().await, LinkStage::Linked);
}

// Test 410 Gone clears the session
#[tokio::test]
async fn test_command_gone_clears_session() {
    let server = MockServer::start().await;
    let client = bound_client(&server).await;
    command_mock("2", "1", "skipAd")
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;

    assert!(!client.skip_ad().await.unwrap());
    assert_eq!(client.stage().await, LinkStage::Linked);
}

// Test other failures are errors and leave state alone
#[tokio::test]
async fn test_command_server_error_is_rejected() {
    let server = MockServer::start().await;
    let client = bound_client(&server).await;
    command_mock("2", "1", "previous")
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    match client.previous().await {
        Err(LoungeError::RequestRejected { status, body }) => {
            assert_eq!(status, 500);
            assert_eq!(body, "boom");
        }
        other => panic!("unexpected result {:?}", other),
    }
    assert_eq!(client.stage().await, LinkStage::Bound);
}

// Test disconnect reuses the current sequence and drops the session
#[tokio::test]
async fn test_disconnect_uses_current_sequence() {
    let server = MockServer::start().await;
    let client = bound_client(&server).await;
    command_mock("2", "1", "play")
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/bc/bind"))
        .and(query_param("RID", "2"))
        .and(query_param("CVER", "1"))
        .and(body_string_contains("TYPE=terminate"))
        .and(body_string_contains(
            "clientDisconnectReason=MDX_SESSION_DISCONNECT_REASON_DISCONNECTED_BY_USER",
        ))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    assert!(client.play().await.unwrap());
    assert!(client.disconnect().await.unwrap());
    assert!(client.session_state().await.is_empty());
    assert_eq!(client.stage().await, LinkStage::Linked);
}

// Test the listener sees events in wire order across batches
#[tokio::test]
async fn test_subscribe_dispatches_in_order() {
    let server = MockServer::start().await;
    let client = bound_client(&server).await;
    let stream = [
        chunk(json!([
            [4, ["nowPlaying", {"videoId": "dQw4w9WgXcQ", "currentTime": "0", "duration": "212", "state": "3"}]],
            [5, ["onStateChange", {"currentTime": "1.5", "duration": "212", "state": "1"}]]
        ])),
        chunk(json!([[6, ["onVolumeChanged", {"volume": "35", "muted": "false"}]]])),
        chunk(json!([[7, ["noop"]]])),
    ]
    .concat();
    Mock::given(method("GET"))
        .and(path("/bc/bind"))
        .and(query_param("RID", "rpc"))
        .and(query_param("TYPE", "xmlhttp"))
        .and(query_param("CI", "0"))
        .and(query_param("AID", "3"))
        .and(query_param("loungeIdToken", "token-1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(stream))
        .expect(1)
        .mount(&server)
        .await;

    let listener = RecordingListener::default();
    assert!(client.subscribe(&listener).await.unwrap());
    assert_eq!(
        listener.seen(),
        vec!["now_playing:dQw4w9WgXcQ", "state:PLAYING", "volume:35"]
    );

    let playback = client.playback_state().await;
    assert_eq!(playback.video_id, "dQw4w9WgXcQ");
    assert_eq!(playback.current_time, 1.5);
    assert_eq!(client.session_state().await.last_event_id(), Some(7));
}

// Test a screen disconnect resets session, token and playback
#[tokio::test]
async fn test_subscribe_screen_disconnected() {
    let server = MockServer::start().await;
    let client = bound_client(&server).await;
    assert_eq!(client.playback_state().await.state, PlaybackStatus::Playing);

    let stream = [
        chunk(json!([[4, ["loungeScreenDisconnected", {"reason": "disconnectedByUser"}]]])),
        chunk(json!([[5, ["onVolumeChanged", {"volume": "10", "muted": "false"}]]])),
    ]
    .concat();
    Mock::given(method("GET"))
        .and(path("/bc/bind"))
        .respond_with(ResponseTemplate::new(200).set_body_string(stream))
        .mount(&server)
        .await;

    let listener = RecordingListener::default();
    assert!(!client.subscribe(&listener).await.unwrap());
    assert_eq!(listener.seen(), vec!["disconnected:disconnectedByUser"]);
    assert!(client.session_state().await.is_empty());
    assert_eq!(client.auth_state().await.lounge_id_token, None);
    assert_eq!(client.playback_state().await, PlaybackState::default());
}

// Test a lost session on the subscribe request itself
#[tokio::test]
async fn test_subscribe_unknown_sid() {
    let server = MockServer::start().await;
    let client = bound_client(&server).await;
    Mock::given(method("GET"))
        .and(path("/bc/bind"))
        .respond_with(ResponseTemplate::new(400).set_body_string("Unknown SID"))
        .mount(&server)
        .await;

    let listener = RecordingListener::default();
    assert!(!client.subscribe(&listener).await.unwrap());
    assert_eq!(client.stage().await, LinkStage::Linked);
    assert!(listener.seen().is_empty());
}

// Test a speed change asks the screen for its position
#[tokio::test]
async fn test_playback_speed_triggers_now_playing() {
    let server = MockServer::start().await;
    let client = bound_client(&server).await;
    Mock::given(method("GET"))
        .and(path("/bc/bind"))
        .respond_with(ResponseTemplate::new(200).set_body_string(chunk(json!([[
            4,
            ["onPlaybackSpeedChanged", {"playbackSpeed": "1.5"}]
        ]]))))
        .mount(&server)
        .await;
    command_mock("2", "1", "getNowPlaying")
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut events = client.event_receiver();
    let listener = RecordingListener::default();
    assert!(client.subscribe(&listener).await.unwrap());
    match events.try_recv().unwrap() {
        LoungeEvent::PlaybackSpeedChanged(e) => assert_eq!(e.playback_speed, 1.5),
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(client.session_state().await.command_sequence(), 2);
}

// Test close() stops subscribe before any request is made
#[tokio::test]
async fn test_close_before_subscribe() {
    let server = MockServer::start().await;
    let client = bound_client(&server).await;
    let before = request_count(&server).await;

    client.close();
    let listener = RecordingListener::default();
    assert!(client.subscribe(&listener).await.unwrap());
    assert_eq!(request_count(&server).await, before);
    assert_eq!(client.stage().await, LinkStage::Bound);
}

// Test a framing error in the stream is surfaced
#[tokio::test]
async fn test_subscribe_framing_error() {
    let server = MockServer::start().await;
    let client = bound_client(&server).await;
    Mock::given(method("GET"))
        .and(path("/bc/bind"))
        .respond_with(ResponseTemplate::new(200).set_body_string("nonsense\n"))
        .mount(&server)
        .await;

    let listener = RecordingListener::default();
    assert!(matches!(
        client.subscribe(&listener).await,
        Err(LoungeError::ProtocolFraming(_))
    ));
    assert_eq!(client.stage().await, LinkStage::Bound);
}

// Test the auth record survives a save/load cycle and rejects other versions
#[tokio::test]
async fn test_load_auth_state() {
    let server = MockServer::start().await;
    let client = linked_client(&server).await;
    let saved = client.auth_state().await.to_json().unwrap();

    let other = client_for(&server);
    other
        .load_auth_state(AuthState::from_json(&saved).unwrap())
        .await
        .unwrap();
    assert_eq!(other.stage().await, LinkStage::Linked);

    let err = other
        .load_auth_state(AuthState {
            version: 3,
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, LoungeError::UnsupportedAuthVersion(3)));
    assert_eq!(other.stage().await, LinkStage::Linked);
}

// Test a kids screen reported mid-stream ends the session
#[tokio::test]
async fn test_subscribe_kids_screen_not_supported() {
    let server = MockServer::start().await;
    let client = bound_client(&server).await;
    Mock::given(method("GET"))
        .and(path("/bc/bind"))
        .respond_with(ResponseTemplate::new(200).set_body_string(chunk(json!([[
            4,
            ["loungeStatus", screen_status("TVHTML5_FOR_KIDS")]
        ]]))))
        .mount(&server)
        .await;

    let listener = RecordingListener::default();
    assert!(matches!(
        client.subscribe(&listener).await,
        Err(LoungeError::NotSupported(_))
    ));
    assert_eq!(client.stage().await, LinkStage::Linked);
}

// Serves canned HTTP responses, one connection each, then closes the socket
async fn raw_server(responses: Vec<String>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        for response in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.flush().await.unwrap();
            socket.shutdown().await.ok();
        }
    });
    format!("http://{}", addr)
}

// Drain headers and body so closing the socket sends FIN, not RST
async fn read_request(socket: &mut tokio::net::TcpStream) {
    let mut request = Vec::new();
    let mut buf = [0u8; 4096];
    let header_end = loop {
        let n = socket.read(&mut buf).await.unwrap();
        assert!(n > 0, "client closed before sending a request");
        request.extend_from_slice(&buf[..n]);
        if let Some(pos) = request.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let headers = String::from_utf8_lossy(&request[..header_end]).to_lowercase();
    let content_length = headers
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .map(|v| v.trim().parse::<usize>().unwrap())
        .unwrap_or(0);
    while request.len() < header_end + content_length {
        let n = socket.read(&mut buf).await.unwrap();
        assert!(n > 0, "client closed mid-request");
        request.extend_from_slice(&buf[..n]);
    }
}

// Test a stream cut short of its Content-Length ends subscribe cleanly
#[tokio::test]
async fn test_subscribe_truncated_stream() {
    let bind = bind_body();
    let batch = chunk(json!([[4, ["onVolumeChanged", {"volume": "20", "muted": "false"}]]]));
    let base = raw_server(vec![
        format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            bind.len(),
            bind
        ),
        format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            batch.len() + 500,
            batch
        ),
    ])
    .await;

    let client = LoungeClient::with_config(
        "Test Remote",
        LoungeConfig::default().with_api_base(base),
    )
    .unwrap();
    client
        .load_auth_state(AuthState {
            screen_id: Some("screen-1".into()),
            lounge_id_token: Some("token-1".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(client.connect().await.unwrap());

    let listener = RecordingListener::default();
    assert!(client.subscribe(&listener).await.unwrap());
    assert_eq!(listener.seen(), vec!["volume:20"]);
    assert_eq!(client.session_state().await.last_event_id(), Some(4));
}

// Test close() ends a subscribe that is waiting on the server
#[tokio::test]
async fn test_close_while_subscribed() {
    let server = MockServer::start().await;
    let client = Arc::new(bound_client(&server).await);
    Mock::given(method("GET"))
        .and(path("/bc/bind"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(chunk(json!([[4, ["noop"]]])))
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let subscriber = Arc::clone(&client);
    let handle = tokio::spawn(async move { subscriber.subscribe(&NoopListener).await });
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!handle.is_finished());

    client.close();
    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("subscribe did not stop after close")
        .unwrap();
    assert!(result.unwrap());
    assert_eq!(client.stage().await, LinkStage::Bound);
}

// Test dropping the subscribe future leaves the session as it was
#[tokio::test]
async fn test_dropped_subscribe_keeps_session() {
    let server = MockServer::start().await;
    let client = bound_client(&server).await;
    Mock::given(method("GET"))
        .and(path("/bc/bind"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(chunk(json!([[4, ["noop"]]])))
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;
    let before = client.session_state().await;

    let listener = RecordingListener::default();
    let cancelled =
        tokio::time::timeout(Duration::from_millis(200), client.subscribe(&listener)).await;
    assert!(cancelled.is_err());
    assert_eq!(client.session_state().await, before);
    assert!(client.connected().await);
}

// Test commands go through while another task holds the event stream open
#[tokio::test]
async fn test_command_during_subscribe() {
    let server = MockServer::start().await;
    let client = Arc::new(bound_client(&server).await);
    Mock::given(method("GET"))
        .and(path("/bc/bind"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(chunk(json!([[4, ["noop"]]])))
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;
    command_mock("2", "1", "pause")
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let subscriber = Arc::clone(&client);
    let handle = tokio::spawn(async move { subscriber.subscribe(&NoopListener).await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(client.pause().await.unwrap());
    assert!(!handle.is_finished());
    assert_eq!(client.session_state().await.command_sequence(), 2);

    client.close();
    assert!(handle.await.unwrap().unwrap());
}

// Test CRLF bind bodies count bytes the same way the stream codec does
#[tokio::test]
async fn test_connect_crlf_body() {
    let server = MockServer::start().await;
    let payload = json!([[0, ["c", "SID1"]], [1, ["S", "GS1"]]]).to_string();
    mount_bind(&server, format!("{}\r\n{}\r\n", payload.len() + 2, payload)).await;

    let client = linked_client(&server).await;
    assert!(client.connect().await.unwrap());
    assert_eq!(client.session_state().await.last_event_id(), Some(1));
}
