// Integration tests for the STT session manager and its per-session
// connection actors, driven by the scripted provider.
//
// The scripted provider hands each connect back to the test as a
// controller, so these tests script transcripts and closures and watch
// how the actor reacts.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use meeting_relay::stt::{
    CloseReason, ConnectionConfig, ConnectionState, ProviderEvent, ProviderTranscript,
    ScriptedProvider, SttManagerConfig, SttSessionManager,
};
use tokio::time::{sleep, timeout};

fn manager_config(max_sessions: usize, reconnect_base_ms: u64) -> SttManagerConfig {
    SttManagerConfig {
        max_sessions,
        connection: ConnectionConfig {
            reconnect_base_ms,
            reconnect_cap_ms: reconnect_base_ms * 4,
            max_reconnect_attempts: 3,
            audio_queue: 32,
        },
    }
}

fn transcript(text: &str, is_final: bool, speaker: Option<i32>) -> ProviderEvent {
    ProviderEvent::Transcript(ProviderTranscript {
        transcript: text.to_string(),
        confidence: 0.9,
        speaker,
        is_final,
        start_ms: 0,
        duration_ms: 250,
    })
}

#[tokio::test]
async fn test_no_connect_until_first_audio() -> Result<()> {
    let (provider, mut sessions) = ScriptedProvider::new();
    let (manager, _transcripts) =
        SttSessionManager::new(Arc::new(provider), manager_config(4, 20));

    assert!(manager.create_session("sess-1"));
    sleep(Duration::from_millis(50)).await;
    assert!(sessions.try_recv().is_err(), "no connect before audio");
    assert_eq!(
        manager.session_state("sess-1"),
        Some(ConnectionState::Disconnected)
    );

    manager.send_audio("sess-1", vec![1]);
    let scripted = timeout(Duration::from_secs(1), sessions.recv())
        .await?
        .expect("connect after first frame");
    assert_eq!(scripted.session_id, "sess-1");
    Ok(())
}

#[tokio::test]
async fn test_trigger_frame_is_dropped() -> Result<()> {
    let (provider, mut sessions) = ScriptedProvider::new();
    let (manager, _transcripts) =
        SttSessionManager::new(Arc::new(provider), manager_config(4, 20));

    manager.create_session("sess-1");
    manager.send_audio("sess-1", vec![1]);
    let mut scripted = timeout(Duration::from_secs(1), sessions.recv())
        .await?
        .expect("connect");

    // The triggering frame never reaches the provider; the next one does.
    assert!(scripted.audio.try_recv().is_err());
    manager.send_audio("sess-1", vec![2]);
    let frame = timeout(Duration::from_secs(1), scripted.audio.recv())
        .await?
        .expect("audio after connect");
    assert_eq!(frame, vec![2]);
    Ok(())
}

#[tokio::test]
async fn test_transcripts_reach_the_engine_channel() -> Result<()> {
    let (provider, mut sessions) = ScriptedProvider::new();
    let (manager, mut transcripts) =
        SttSessionManager::new(Arc::new(provider), manager_config(4, 20));

    manager.create_session("sess-1");
    manager.send_audio("sess-1", vec![1]);
    let scripted = timeout(Duration::from_secs(1), sessions.recv())
        .await?
        .expect("connect");

    // An empty transcript is dropped at the actor; only the real one
    // comes through.
    scripted.events.send(transcript("   ", true, Some(0))).await?;
    scripted
        .events
        .send(transcript("hello there", true, None))
        .await?;

    let event = timeout(Duration::from_secs(1), transcripts.recv())
        .await?
        .expect("transcript event");
    assert_eq!(event.session_id, "sess-1");
    assert_eq!(event.transcript, "hello there");
    assert!(event.is_final);
    assert_eq!(event.diarization_index, -1);
    assert_eq!(event.duration, 250);
    assert!(event.ts > 0);
    assert!(transcripts.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn test_diarization_index_is_forwarded() -> Result<()> {
    let (provider, mut sessions) = ScriptedProvider::new();
    let (manager, mut transcripts) =
        SttSessionManager::new(Arc::new(provider), manager_config(4, 20));

    manager.create_session("sess-1");
    manager.send_audio("sess-1", vec![1]);
    let scripted = timeout(Duration::from_secs(1), sessions.recv())
        .await?
        .expect("connect");

    scripted.events.send(transcript("partial", false, Some(2))).await?;
    let event = timeout(Duration::from_secs(1), transcripts.recv())
        .await?
        .expect("transcript event");
    assert!(!event.is_final);
    assert_eq!(event.diarization_index, 2);
    Ok(())
}

#[tokio::test]
async fn test_idle_close_parks_until_next_audio() -> Result<()> {
    let (provider, mut sessions) = ScriptedProvider::new();
    let (manager, _transcripts) =
        SttSessionManager::new(Arc::new(provider), manager_config(4, 20));

    manager.create_session("sess-1");
    manager.send_audio("sess-1", vec![1]);
    let scripted = timeout(Duration::from_secs(1), sessions.recv())
        .await?
        .expect("first connect");

    scripted
        .events
        .send(ProviderEvent::Closed {
            reason: CloseReason::IdleTimeout,
        })
        .await?;

    // Idle close parks the session instead of reconnecting.
    sleep(Duration::from_millis(100)).await;
    assert!(sessions.try_recv().is_err(), "no reconnect without audio");
    assert_eq!(
        manager.session_state("sess-1"),
        Some(ConnectionState::Disconnected)
    );

    manager.send_audio("sess-1", vec![2]);
    let reopened = timeout(Duration::from_secs(1), sessions.recv())
        .await?
        .expect("reconnect after audio");
    assert_eq!(reopened.session_id, "sess-1");
    Ok(())
}

#[tokio::test]
async fn test_stream_end_reconnects_immediately() -> Result<()> {
    let (provider, mut sessions) = ScriptedProvider::new();
    let (manager, _transcripts) =
        SttSessionManager::new(Arc::new(provider), manager_config(4, 20));

    manager.create_session("sess-1");
    manager.send_audio("sess-1", vec![1]);
    let scripted = timeout(Duration::from_secs(1), sessions.recv())
        .await?
        .expect("first connect");

    scripted
        .events
        .send(ProviderEvent::Closed {
            reason: CloseReason::EndOfStream,
        })
        .await?;

    // No audio needed; the actor reopens the link on its own.
    let reopened = timeout(Duration::from_secs(1), sessions.recv())
        .await?
        .expect("reconnect after stream end");
    assert_eq!(reopened.session_id, "sess-1");
    Ok(())
}

#[tokio::test]
async fn test_dropped_event_stream_reconnects() -> Result<()> {
    let (provider, mut sessions) = ScriptedProvider::new();
    let (manager, _transcripts) =
        SttSessionManager::new(Arc::new(provider), manager_config(4, 20));

    manager.create_session("sess-1");
    manager.send_audio("sess-1", vec![1]);
    let scripted = timeout(Duration::from_secs(1), sessions.recv())
        .await?
        .expect("first connect");

    // Losing the provider without a close record counts as an error.
    drop(scripted);
    let reopened = timeout(Duration::from_secs(1), sessions.recv())
        .await?
        .expect("reconnect after lost stream");
    assert_eq!(reopened.session_id, "sess-1");
    Ok(())
}

#[tokio::test]
async fn test_gives_up_after_max_attempts() -> Result<()> {
    let (provider, mut sessions) = ScriptedProvider::new();
    let provider = Arc::new(provider);
    provider.fail_next_connects(10);
    let (manager, _transcripts) = SttSessionManager::new(provider.clone(), manager_config(4, 5));

    manager.create_session("sess-1");
    manager.send_audio("sess-1", vec![1]);

    let mut state = None;
    for _ in 0..100 {
        state = manager.session_state("sess-1");
        if state == Some(ConnectionState::Failed) {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(state, Some(ConnectionState::Failed));
    assert_eq!(provider.connect_count(), 3);
    assert!(sessions.try_recv().is_err());

    // Audio is discarded quietly; close still works.
    manager.send_audio("sess-1", vec![2]);
    manager.close_session("sess-1").await;
    assert_eq!(manager.session_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_failed_connects_recover_within_attempt_budget() -> Result<()> {
    let (provider, mut sessions) = ScriptedProvider::new();
    let provider = Arc::new(provider);
    provider.fail_next_connects(2);
    let (manager, _transcripts) = SttSessionManager::new(provider.clone(), manager_config(4, 5));

    manager.create_session("sess-1");
    manager.send_audio("sess-1", vec![1]);

    // Two failures, then the third attempt lands.
    let scripted = timeout(Duration::from_secs(2), sessions.recv())
        .await?
        .expect("connect after retries");
    assert_eq!(scripted.session_id, "sess-1");
    assert_eq!(provider.connect_count(), 3);
    Ok(())
}

#[tokio::test]
async fn test_session_cap_is_enforced() -> Result<()> {
    let (provider, _sessions) = ScriptedProvider::new();
    let (manager, _transcripts) =
        SttSessionManager::new(Arc::new(provider), manager_config(1, 20));

    assert!(manager.create_session("sess-1"));
    // Known sessions are idempotent, not double-counted.
    assert!(manager.create_session("sess-1"));
    assert!(!manager.create_session("sess-2"));
    assert_eq!(manager.session_count(), 1);

    manager.close_session("sess-1").await;
    assert!(manager.create_session("sess-2"));
    Ok(())
}

#[tokio::test]
async fn test_close_session_ends_provider_link() -> Result<()> {
    let (provider, mut sessions) = ScriptedProvider::new();
    let (manager, _transcripts) =
        SttSessionManager::new(Arc::new(provider), manager_config(4, 20));

    manager.create_session("sess-1");
    manager.send_audio("sess-1", vec![1]);
    let mut scripted = timeout(Duration::from_secs(1), sessions.recv())
        .await?
        .expect("connect");

    manager.close_session("sess-1").await;
    assert_eq!(manager.session_count(), 0);

    // The provider sees its audio feed end.
    let closed = timeout(Duration::from_secs(1), scripted.audio.recv()).await?;
    assert!(closed.is_none());
    Ok(())
}

#[tokio::test]
async fn test_unknown_session_audio_is_dropped() -> Result<()> {
    let (provider, mut sessions) = ScriptedProvider::new();
    let (manager, _transcripts) =
        SttSessionManager::new(Arc::new(provider), manager_config(4, 20));

    manager.send_audio("ghost", vec![1]);
    sleep(Duration::from_millis(50)).await;
    assert!(sessions.try_recv().is_err());
    assert_eq!(manager.session_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_close_all_ends_every_session() -> Result<()> {
    let (provider, mut sessions) = ScriptedProvider::new();
    let (manager, _transcripts) =
        SttSessionManager::new(Arc::new(provider), manager_config(4, 20));

    manager.create_session("sess-a");
    manager.create_session("sess-b");
    manager.send_audio("sess-a", vec![1]);
    manager.send_audio("sess-b", vec![1]);
    let mut first = timeout(Duration::from_secs(1), sessions.recv())
        .await?
        .expect("first connect");
    let mut second = timeout(Duration::from_secs(1), sessions.recv())
        .await?
        .expect("second connect");

    manager.close_all().await;
    assert_eq!(manager.session_count(), 0);
    assert!(timeout(Duration::from_secs(1), first.audio.recv()).await?.is_none());
    assert!(timeout(Duration::from_secs(1), second.audio.recv()).await?.is_none());
    Ok(())
}
