
use std::sync::Arc;
use std::time::Duration;

use parley_broadcaster::TranscriptBroadcaster;
use parley_daemon::ipc::{send_command, IpcServer};
use parley_daemon::{feed, ConversationStatus};
use tempfile::tempdir;
use test_helpers::*;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::net::UnixStream;
use tokio::sync::Notify;
use tokio::time::timeout;

const REPLY_WAIT: Duration = Duration::from_secs(5);

async fn next_event(lines: &mut Lines<BufReader<UnixStream>>) -> serde_json::Value {
    let line = timeout(REPLY_WAIT, lines.next_line())
        .await
        .expect("timed out waiting for UI event")
        .unwrap()
        .unwrap();
    serde_json::from_str(&line).unwrap()
}

#[tokio::test]
async fn test_control_socket_commands() {
    let dir = tempdir().unwrap();
    let socket_path = dir.path().join("parley.sock");

    let backend = FakeBackend::default();
    let (connector, mut remotes) = MockConnector::with_remotes(1);
    let conversation = conversation(&backend, connector);
    let shutdown = Arc::new(Notify::new());

    let server = IpcServer::new(&socket_path, conversation.clone(), Arc::clone(&shutdown)).unwrap();
    let serving = tokio::spawn(async move {
        let _ = server.run().await;
    });

    let status = send_command(&socket_path, "status", REPLY_WAIT).await.unwrap();
    let status: serde_json::Value = serde_json::from_str(&status).unwrap();
    assert_eq!(status["status"], "disconnected");
    assert_eq!(status["connection"], "idle");
    assert!(status["session_id"].is_null());

    let reply = send_command(&socket_path, "bogus", REPLY_WAIT).await.unwrap();
    assert!(reply.starts_with("Error: Unknown command"));

    let stop = send_command(&socket_path, "stop", REPLY_WAIT).await.unwrap();
    assert_eq!(stop, "No conversation running");

    // `start` replies only once the session is open
    let starting = {
        let path = socket_path.clone();
        tokio::spawn(async move { send_command(&path, "start", REPLY_WAIT).await })
    };
    remotes[0].accept_setup().await;
    let reply = timeout(REPLY_WAIT, starting).await.unwrap().unwrap().unwrap();
    assert_eq!(reply, "Conversation started");
    assert_eq!(conversation.status(), ConversationStatus::Listening);

    let transcript = send_command(&socket_path, "transcript", REPLY_WAIT).await.unwrap();
    let transcript: serde_json::Value = serde_json::from_str(&transcript).unwrap();
    assert_eq!(transcript["history"], serde_json::json!([]));
    assert_eq!(transcript["pending_user"], "");

    let reply = send_command(&socket_path, "toggle", REPLY_WAIT).await.unwrap();
    assert_eq!(reply, "Conversation stopped");
    assert!(!conversation.is_active());

    let quit = shutdown.notified();
    let reply = send_command(&socket_path, "quit", REPLY_WAIT).await.unwrap();
    assert_eq!(reply, "Shutting down");
    timeout(REPLY_WAIT, quit).await.expect("quit never signalled shutdown");

    serving.abort();
}

#[tokio::test]
async fn test_toggle_reports_start_failure() {
    let dir = tempdir().unwrap();
    let socket_path = dir.path().join("parley.sock");

    let backend = FakeBackend::default();
    let conversation = conversation(&backend, MockConnector::failing("connection refused"));
    let server = IpcServer::new(&socket_path, conversation.clone(), Arc::new(Notify::new())).unwrap();
    let serving = tokio::spawn(async move {
        let _ = server.run().await;
    });

    let reply = send_command(&socket_path, "toggle", REPLY_WAIT).await.unwrap();
    assert!(reply.starts_with("Error: Connection failed"), "got {}", reply);
    assert!(reply.contains("connection refused"));
    assert!(!conversation.is_active());

    serving.abort();
}

#[tokio::test]
async fn test_ui_feed_mirrors_conversation() {
    let dir = tempdir().unwrap();
    let socket_path = dir.path().join("events.sock");

    let broadcaster = Arc::new(TranscriptBroadcaster::new(&socket_path));
    broadcaster.start().await.unwrap();

    let backend = FakeBackend::default();
    let (connector, mut remotes) = MockConnector::with_remotes(1);
    let conversation = conversation(&backend, connector);
    let bridge = feed::spawn(Arc::clone(&broadcaster), conversation.subscribe());

    let stream = UnixStream::connect(&socket_path).await.unwrap();
    let mut lines = BufReader::new(stream).lines();

    // Catch-up for an idle daemon
    assert_eq!(next_event(&mut lines).await["state"], "disconnected");

    start_listening(&conversation, &mut remotes[0]).await;
    remotes[0].push(r#"{"serverContent":{"inputTranscription":{"text":"hi"},"turnComplete":true}}"#);

    let expected = [
        ("state_change", "connecting"),
        ("session_start", ""),
        ("state_change", "listening"),
        ("partial_transcript", "hi"),
        ("transcript_entry", "hi"),
        ("transcript_entry", ""),
    ];
    for (kind, value) in expected {
        let event = next_event(&mut lines).await;
        assert_eq!(event["type"], kind, "event: {}", event);
        match kind {
            "state_change" => assert_eq!(event["state"], value),
            "partial_transcript" | "transcript_entry" => assert_eq!(event["text"], value),
            _ => assert_eq!(event["session_id"], 1),
        }
    }

    bridge.abort();
    broadcaster.stop().await.unwrap();
}
