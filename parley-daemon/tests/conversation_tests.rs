
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parley_daemon::{ConversationError, ConversationStatus, ConversationUpdate};
use parley_session::{Speaker, TranscriptEntry};
use serde_json::json;
use test_helpers::*;
use tokio::sync::Notify;
use tokio::time::timeout;

fn teardown_entries(backend: &FakeBackend) -> Vec<String> {
    backend
        .log
        .entries()
        .into_iter()
        .filter(|e| matches!(e.as_str(), "capture.stop" | "output.stop_all" | "output.close"))
        .collect()
}

#[tokio::test]
async fn test_start_reaches_listening_and_streams_microphone() {
    let backend = FakeBackend::default();
    let (connector, mut remotes) = MockConnector::with_remotes(1);
    let conversation = conversation(&backend, connector);
    let mut remote = remotes.remove(0);

    assert_eq!(conversation.status(), ConversationStatus::Disconnected);
    assert_eq!(conversation.connection_state(), "idle");

    start_listening(&conversation, &mut remote).await;

    assert_eq!(conversation.status(), ConversationStatus::Listening);
    assert_eq!(conversation.status().to_string(), "listening");
    assert_eq!(conversation.connection_state(), "active");
    assert_eq!(conversation.current_session_id(), Some(1));

    assert!(backend.microphone.speak(vec![0.5; 4096]));
    let frame = remote.next_sent().await;
    let chunk = &frame["realtimeInput"]["mediaChunks"][0];
    assert_eq!(chunk["mimeType"], "audio/pcm;rate=16000");
    assert_eq!(chunk["data"], parley_audio::encode(&vec![0.5; 4096]));
}

#[tokio::test]
async fn test_second_start_is_rejected() {
    let backend = FakeBackend::default();
    let (connector, mut remotes) = MockConnector::with_remotes(2);
    let conversation = conversation(&backend, connector);

    start_listening(&conversation, &mut remotes[0]).await;

    match conversation.start().await {
        Err(ConversationError::AlreadyActive) => {}
        other => panic!("expected AlreadyActive, got {:?}", other),
    }
    // The live conversation is untouched
    assert_eq!(conversation.status(), ConversationStatus::Listening);
    assert_eq!(backend.log.count("capture.open"), 1);
    assert_eq!(backend.log.count("output.close"), 0);
}

#[tokio::test]
async fn test_start_while_connecting_is_rejected() {
    let backend = FakeBackend::default();
    let (mut connector, _remotes) = MockConnector::with_remotes(1);
    connector.gate = Some(Arc::new(Notify::new()));
    let conversation = conversation(&backend, connector);

    let first = {
        let conversation = conversation.clone();
        tokio::spawn(async move { conversation.start().await })
    };
    assert!(eventually(|| conversation.is_active()).await);
    assert_eq!(conversation.connection_state(), "connecting");

    assert!(matches!(
        conversation.start().await,
        Err(ConversationError::AlreadyActive)
    ));

    conversation.stop();
    let result = timeout(WAIT, first).await.unwrap().unwrap();
    assert!(matches!(result, Err(ConversationError::Cancelled)));
}

#[tokio::test]
async fn test_stop_is_idempotent_in_every_state() {
    let backend = FakeBackend::default();
    let (connector, mut remotes) = MockConnector::with_remotes(1);
    let conversation = conversation(&backend, connector);
    let mut updates = conversation.subscribe();

    // Never started
    conversation.stop();
    conversation.stop();
    assert_eq!(conversation.status(), ConversationStatus::Disconnected);
    assert!(backend.log.entries().is_empty());

    start_listening(&conversation, &mut remotes[0]).await;
    conversation.stop();
    conversation.stop();

    assert_eq!(conversation.status(), ConversationStatus::Disconnected);
    assert!(!conversation.is_active());
    assert_eq!(backend.log.count("capture.stop"), 1);
    assert_eq!(backend.log.count("output.close"), 1);

    let mut ended = 0;
    while let Ok(update) = updates.try_recv() {
        if matches!(update, ConversationUpdate::SessionEnded(1)) {
            ended += 1;
        }
    }
    assert_eq!(ended, 1);
}

#[tokio::test]
async fn test_teardown_order() {
    let backend = FakeBackend::default();
    let (connector, mut remotes) = MockConnector::with_remotes(1);
    let conversation = conversation(&backend, connector);
    let mut remote = remotes.remove(0);

    start_listening(&conversation, &mut remote).await;
    conversation.stop();

    assert_eq!(
        teardown_entries(&backend),
        vec!["capture.stop", "output.stop_all", "output.close"]
    );

    // The session was closed before capture stopped, so the block the fake
    // microphone emits while stopping never goes out
    assert!(eventually(|| remote.closed.load(Ordering::SeqCst)).await);
    assert!(remote.try_next_sent().is_none());
}

#[tokio::test]
async fn test_capture_denied_reports_error_without_connecting() {
    let backend = FakeBackend::default();
    backend.deny_capture.store(true, Ordering::SeqCst);
    let connector = MockConnector::default();
    let connects = Arc::clone(&connector.connects);
    let conversation = conversation(&backend, connector);

    match conversation.start().await {
        Err(ConversationError::Capture(e)) => assert!(e.to_string().contains("denied")),
        other => panic!("expected Capture error, got {:?}", other),
    }

    assert!(conversation.status().to_string().starts_with("error: "));
    assert_eq!(conversation.connection_state(), "idle");
    assert!(!conversation.is_active());
    assert_eq!(connects.load(Ordering::SeqCst), 0);
    assert_eq!(backend.log.count("output.open"), 0);

    // Stopping after a failed start is harmless
    conversation.stop();
}

#[tokio::test]
async fn test_output_unavailable_reports_playback_error() {
    let backend = FakeBackend::default();
    backend.deny_output.store(true, Ordering::SeqCst);
    let conversation = conversation(&backend, MockConnector::default());

    assert!(matches!(
        conversation.start().await,
        Err(ConversationError::Playback(_))
    ));
    assert!(!conversation.is_active());
    assert_eq!(backend.log.count("capture.start"), 0);
}

#[tokio::test]
async fn test_capture_start_failure_releases_output() {
    let backend = FakeBackend::default();
    backend.fail_capture_start.store(true, Ordering::SeqCst);
    let (connector, _remotes) = MockConnector::with_remotes(1);
    let conversation = conversation(&backend, connector);

    assert!(matches!(
        conversation.start().await,
        Err(ConversationError::Capture(_))
    ));
    assert_eq!(backend.log.count("output.close"), 1);
    assert!(!conversation.is_active());
}

#[tokio::test]
async fn test_connection_failure_releases_devices() {
    let backend = FakeBackend::default();
    let conversation = conversation(&backend, MockConnector::failing("dns lookup failed"));

    match conversation.start().await {
        Err(ConversationError::ConnectionFailed(reason)) => {
            assert!(reason.contains("dns lookup failed"))
        }
        other => panic!("expected ConnectionFailed, got {:?}", other),
    }

    assert!(!conversation.is_active());
    assert!(matches!(conversation.status(), ConversationStatus::Error(_)));
    assert_eq!(
        teardown_entries(&backend),
        vec!["capture.stop", "output.stop_all", "output.close"]
    );
}

#[tokio::test]
async fn test_stop_while_connecting_cancels_start() {
    let backend = FakeBackend::default();
    let (mut connector, _remotes) = MockConnector::with_remotes(1);
    connector.gate = Some(Arc::new(Notify::new()));
    let conversation = conversation(&backend, connector);

    let starting = {
        let conversation = conversation.clone();
        tokio::spawn(async move { conversation.start().await })
    };
    assert!(eventually(|| conversation.is_active()).await);

    conversation.stop();

    let result = timeout(WAIT, starting).await.unwrap().unwrap();
    assert!(matches!(result, Err(ConversationError::Cancelled)));
    assert_eq!(conversation.status(), ConversationStatus::Disconnected);
    assert_eq!(backend.log.count("output.close"), 1);
}

#[tokio::test]
async fn test_remote_close_disconnects_without_error() {
    let backend = FakeBackend::default();
    let (connector, mut remotes) = MockConnector::with_remotes(1);
    let conversation = conversation(&backend, connector);
    let mut remote = remotes.remove(0);

    start_listening(&conversation, &mut remote).await;
    remote.hang_up();

    assert!(eventually(|| !conversation.is_active()).await);
    assert_eq!(conversation.status(), ConversationStatus::Disconnected);
    assert_eq!(
        teardown_entries(&backend),
        vec!["capture.stop", "output.stop_all", "output.close"]
    );
}

#[tokio::test]
async fn test_session_error_tears_down_with_reason() {
    let backend = FakeBackend::default();
    let (connector, mut remotes) = MockConnector::with_remotes(1);
    let conversation = conversation(&backend, connector);
    let mut remote = remotes.remove(0);

    start_listening(&conversation, &mut remote).await;
    remote.push(r#"{"error":{"code":429,"message":"quota exceeded"}}"#);

    assert!(eventually(|| !conversation.is_active()).await);
    let status = conversation.status().to_string();
    assert!(status.starts_with("error: "), "got {}", status);
    assert!(status.contains("quota exceeded"));
    assert_eq!(conversation.connection_state(), "idle");
    assert_eq!(backend.log.count("output.close"), 1);
}

#[tokio::test]
async fn test_transcript_commits_in_turn_order() {
    let backend = FakeBackend::default();
    let (connector, mut remotes) = MockConnector::with_remotes(1);
    let conversation = conversation(&backend, connector);
    let mut remote = remotes.remove(0);
    let mut updates = conversation.subscribe();

    start_listening(&conversation, &mut remote).await;

    remote.push_json(json!({"serverContent": {"inputTranscription": {"text": "What's the "}}}));
    remote.push_json(json!({"serverContent": {"inputTranscription": {"text": "weather"}}}));
    assert!(eventually(|| conversation.transcript().pending_user == "What's the weather").await);

    remote.push_json(json!({"serverContent": {
        "outputTranscription": {"text": "Sunny."},
        "turnComplete": true
    }}));
    assert!(eventually(|| conversation.transcript().history.len() == 2).await);

    let snapshot = conversation.transcript();
    assert_eq!(
        snapshot.history,
        vec![
            TranscriptEntry {
                speaker: Speaker::User,
                text: "What's the weather".to_string()
            },
            TranscriptEntry {
                speaker: Speaker::Model,
                text: "Sunny.".to_string()
            },
        ]
    );
    assert!(snapshot.pending_user.is_empty());
    assert!(snapshot.pending_model.is_empty());

    let mut seen = Vec::new();
    while let Ok(update) = updates.try_recv() {
        match update {
            ConversationUpdate::Partial { speaker, text } => seen.push(format!("{}~{}", speaker.as_str(), text)),
            ConversationUpdate::Committed(entry) => seen.push(format!("{}={}", entry.speaker.as_str(), entry.text)),
            _ => {}
        }
    }
    assert_eq!(
        seen,
        vec![
            "user~What's the ",
            "user~What's the weather",
            "model~Sunny.",
            "user=What's the weather",
            "model=Sunny.",
        ]
    );
}

#[tokio::test]
async fn test_restart_resets_transcript() {
    let backend = FakeBackend::default();
    let (connector, mut remotes) = MockConnector::with_remotes(2);
    let conversation = conversation(&backend, connector);

    start_listening(&conversation, &mut remotes[0]).await;
    remotes[0].push_json(json!({"serverContent": {
        "inputTranscription": {"text": "hello"},
        "turnComplete": true
    }}));
    assert!(eventually(|| !conversation.transcript().history.is_empty()).await);
    conversation.stop();

    start_listening(&conversation, &mut remotes[1]).await;
    assert_eq!(conversation.current_session_id(), Some(2));
    assert!(conversation.transcript().history.is_empty());
}

#[tokio::test]
async fn test_audio_chunks_play_and_malformed_chunks_are_dropped() {
    let backend = FakeBackend::default();
    let (connector, mut remotes) = MockConnector::with_remotes(1);
    let conversation = conversation(&backend, connector);
    let mut remote = remotes.remove(0);

    start_listening(&conversation, &mut remote).await;

    remote.push_json(audio_message(12000));
    remote.push_json(json!({"serverContent": {"modelTurn": {"parts": [
        {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAA"}}
    ]}}}));
    remote.push_json(audio_message(12000));

    assert!(eventually(|| backend.speaker.started().len() == 2).await);
    let started = backend.speaker.started();
    assert_eq!(started[0], (0, 0.0));
    assert_eq!(started[1], (1, 0.5));

    // Still healthy after the bad chunk
    assert_eq!(conversation.status(), ConversationStatus::Listening);
}

#[tokio::test]
async fn test_interruption_flushes_playback() {
    let backend = FakeBackend::default();
    let (connector, mut remotes) = MockConnector::with_remotes(1);
    let conversation = conversation(&backend, connector);
    let mut remote = remotes.remove(0);

    start_listening(&conversation, &mut remote).await;
    remote.push_json(audio_message(24000));
    assert!(eventually(|| backend.log.count("output.start") == 1).await);

    remote.push(r#"{"serverContent":{"interrupted":true}}"#);
    assert!(eventually(|| backend.log.count("output.stop_all") == 1).await);
    assert_eq!(conversation.status(), ConversationStatus::Listening);

    // Playback resumes from the device's present
    remote.push_json(audio_message(2400));
    assert!(eventually(|| backend.speaker.started().len() == 2).await);
    assert_eq!(backend.speaker.started()[1].1, 0.0);
}

#[tokio::test]
async fn test_lifecycle_updates() {
    let backend = FakeBackend::default();
    let (connector, mut remotes) = MockConnector::with_remotes(1);
    let conversation = conversation(&backend, connector);
    let mut updates = conversation.subscribe();

    start_listening(&conversation, &mut remotes[0]).await;
    conversation.stop();

    let mut seen = Vec::new();
    while let Ok(update) = updates.try_recv() {
        seen.push(update);
    }
    assert_eq!(
        seen,
        vec![
            ConversationUpdate::StatusChanged(ConversationStatus::Connecting),
            ConversationUpdate::SessionStarted(1),
            ConversationUpdate::StatusChanged(ConversationStatus::Listening),
            ConversationUpdate::StatusChanged(ConversationStatus::Disconnected),
            ConversationUpdate::SessionEnded(1),
        ]
    );
}

#[tokio::test]
async fn test_slow_device_open_keeps_the_conversation_responsive() {
    let backend = FakeBackend::default();
    let release = backend.hold_capture_open();
    let (connector, _remotes) = MockConnector::with_remotes(1);
    let connects = Arc::clone(&connector.connects);
    let conversation = conversation(&backend, connector);

    let starting = {
        let conversation = conversation.clone();
        tokio::spawn(async move { conversation.start().await })
    };

    // The microphone is still opening; queries and a second start answer at once
    assert!(eventually(|| conversation.connection_state() == "connecting").await);
    assert!(conversation.is_active());
    assert_eq!(conversation.current_session_id(), Some(1));
    assert!(matches!(
        timeout(WAIT, conversation.start()).await.expect("start blocked"),
        Err(ConversationError::AlreadyActive)
    ));

    conversation.stop();
    assert_eq!(conversation.status(), ConversationStatus::Disconnected);
    assert!(!conversation.is_active());

    release.send(()).unwrap();
    let result = timeout(WAIT, starting).await.unwrap().unwrap();
    assert!(matches!(result, Err(ConversationError::Cancelled)));

    // Whatever opened after the stop is released again
    assert_eq!(
        teardown_entries(&backend),
        vec!["capture.stop", "output.stop_all", "output.close"]
    );
    assert_eq!(conversation.status(), ConversationStatus::Disconnected);
    assert!(!conversation.is_active());
    assert!(connects.load(Ordering::SeqCst) <= 1);
}

#[tokio::test]
async fn test_error_right_after_setup_is_not_masked_by_listening() {
    for _ in 0..20 {
        let backend = FakeBackend::default();
        let (connector, mut remotes) = MockConnector::with_remotes(1);
        let conversation = conversation(&backend, connector);
        let remote = &mut remotes[0];

        let starting = {
            let conversation = conversation.clone();
            tokio::spawn(async move { conversation.start().await })
        };
        let setup = remote.next_sent().await;
        assert!(setup.get("setup").is_some());
        remote.push(r#"{"setupComplete":{}}"#);
        remote.push(r#"{"error":{"code":500,"message":"backend overloaded"}}"#);

        let result = timeout(WAIT, starting).await.unwrap().unwrap();
        assert!(
            matches!(
                result,
                Ok(()) | Err(ConversationError::Cancelled) | Err(ConversationError::ConnectionFailed(_))
            ),
            "unexpected start result {:?}",
            result
        );

        assert!(eventually(|| !conversation.is_active()).await);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        match conversation.status() {
            ConversationStatus::Error(reason) => assert!(reason.contains("backend overloaded")),
            other => panic!("status {} masks the session error", other),
        }
        assert_eq!(conversation.connection_state(), "idle");
        assert_eq!(backend.log.count("output.close"), 1);
    }
}
