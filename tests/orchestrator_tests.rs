// Integration tests for the session orchestrator
//
// These tests walk the turn cycle with a recording transport, a mock
// synthesizer and a mock audio player.

mod common;

use buddy_agents::conversation::{ConversationFilter, ConversationStore, Role};
use buddy_agents::speech::SpeechInputEvent;
use buddy_agents::transport::{InboundFrame, OutboundFrame, TransportEvent};
use buddy_agents::{Agent, ChatError, InputMode, SessionEvent, TurnState};
use common::{recv_within, reply_chunk, settle, FlakyStorage, Harness, HarnessOptions, PLAYBACK};
use std::time::Duration;

#[tokio::test]
async fn test_empty_input_is_rejected() {
    let h = Harness::new(false);

    let result = h.session.submit_text("   \n ").await;

    assert!(matches!(result, Err(ChatError::Validation(_))));
    assert_eq!(h.session.state(), TurnState::Idle);
    assert!(h.transport.sent().is_empty());
    assert_eq!(h.session.stats().await.messages_sent, 0);
}

#[tokio::test]
async fn test_send_is_blocked_while_offline() {
    let h = Harness::new(false);
    h.transport.set_connected(false);

    let result = h.session.submit_text("hello").await;

    assert!(matches!(result, Err(ChatError::Connection(_))));
    assert_eq!(h.session.state(), TurnState::Idle);
    assert!(h.transport.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_full_turn_with_auto_voice() {
    let h = Harness::new(true);
    h.start().await;

    h.session.begin_typing();
    assert_eq!(h.session.state(), TurnState::UserTurn(InputMode::Typing));

    h.session.submit_text("Hello Mitra").await.unwrap();
    assert_eq!(h.session.state(), TurnState::Sending);
    assert_eq!(
        h.transport.sent(),
        vec![OutboundFrame::user_message("Hello Mitra", Agent::Mitra)]
    );

    h.session.handle_transport_event(reply_chunk("Hi ", false)).await;
    assert_eq!(h.session.state(), TurnState::AgentStreaming);
    h.session.handle_transport_event(reply_chunk("there!", true)).await;
    assert_eq!(h.session.state(), TurnState::AgentSpeaking);

    let id = h.session.current_conversation_id().await.unwrap();
    let messages = h.session.messages(&id).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].content, "Hi there!");
    assert!(!messages[1].is_streaming);

    settle().await;
    assert_eq!(h.synth.calls(), 1);
    assert_eq!(h.player.active(), 1);
    assert!(h.session.voice_session().await.speaking);

    // Playback ends, the pump returns the session to idle
    let mut state = h.session.watch_state();
    tokio::time::sleep(PLAYBACK + Duration::from_secs(1)).await;
    state.wait_for(|s| *s == TurnState::Idle).await.unwrap();

    let stats = h.session.stats().await;
    assert_eq!(stats.messages_sent, 1);
    assert_eq!(stats.replies_received, 1);
    assert_eq!(stats.replies_spoken, 1);
}

#[tokio::test]
async fn test_reply_without_auto_voice_goes_idle() {
    let h = Harness::new(false);

    h.session.submit_text("What is recursion?").await.unwrap();
    h.session
        .handle_transport_event(reply_chunk("A function calling itself.", true))
        .await;

    assert_eq!(h.session.state(), TurnState::Idle);
    assert_eq!(h.synth.calls(), 0);
    assert!(!h.session.voice_session().await.speaking);
}

#[tokio::test(start_paused = true)]
async fn test_manual_playback_of_last_reply() {
    let h = Harness::new(false);

    h.session.submit_text("Tell me a joke").await.unwrap();
    h.session
        .handle_transport_event(reply_chunk("Why did the chicken cross the road?", true))
        .await;

    assert!(h.session.play_last_reply().await.unwrap());
    assert_eq!(h.session.state(), TurnState::AgentSpeaking);
    assert_eq!(
        h.synth.requests()[0].text,
        "Why did the chicken cross the road?"
    );

    h.session.stop_speaking().await;
    assert_eq!(h.session.state(), TurnState::Idle);
    assert_eq!(h.player.active(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_new_chat_while_agent_speaking() {
    let h = Harness::new(true);

    h.session.submit_text("Hello").await.unwrap();
    let first = h.session.current_conversation_id().await.unwrap();
    h.session.handle_transport_event(reply_chunk("Hi!", true)).await;
    settle().await;
    assert_eq!(h.session.state(), TurnState::AgentSpeaking);
    assert_eq!(h.player.active(), 1);

    let second = h.session.new_chat().await.unwrap();

    assert_ne!(first, second);
    assert_eq!(h.session.state(), TurnState::Idle);
    assert_eq!(h.player.active(), 0, "playback stopped");
    assert_eq!(h.player.max_active(), 1);
    assert!(h.session.messages(&second).await.unwrap().is_empty());
    assert_eq!(h.session.messages(&first).await.unwrap().len(), 2);

    let voice = h.session.voice_session().await;
    assert!(!voice.speaking && !voice.listening && !voice.audio_ready);
}

#[tokio::test]
async fn test_new_chat_clears_voice_transcripts() {
    let h = Harness::new(false);
    let mut speech = h.session.speech_input().subscribe();

    assert!(h.session.start_voice_input().await);
    assert!(h.feed.interim("I need").await);
    assert!(h.feed.finalize("I need help", 0.9).await);

    // The event pump is not running, so the transcript is only recorded
    loop {
        match recv_within(&mut speech, Duration::from_secs(2)).await {
            Some(SpeechInputEvent::Final { .. }) => break,
            Some(_) => continue,
            None => panic!("final transcript not delivered"),
        }
    }
    let voice = h.session.voice_session().await;
    assert!(voice.listening);
    assert_eq!(voice.last_final_transcript.as_deref(), Some("I need help"));

    assert!(h.feed.interim("and also").await);
    assert!(matches!(
        recv_within(&mut speech, Duration::from_secs(2)).await,
        Some(SpeechInputEvent::Interim(_))
    ));
    assert_eq!(h.session.voice_session().await.interim_transcript, "and also");

    h.session.new_chat().await.unwrap();

    let voice = h.session.voice_session().await;
    assert_eq!(voice.interim_transcript, "");
    assert_eq!(voice.last_final_transcript, None);
    assert!(!voice.listening);
    assert_eq!(h.session.state(), TurnState::Idle);
    assert!(h.transport.sent().is_empty());
}

#[tokio::test]
async fn test_late_reply_lands_in_original_conversation() {
    let h = Harness::new(true);

    h.session.submit_text("First question").await.unwrap();
    let first = h.session.current_conversation_id().await.unwrap();

    let second = h.session.new_chat().await.unwrap();
    h.session
        .handle_transport_event(reply_chunk("Answer to the first question", true))
        .await;

    let original = h.session.messages(&first).await.unwrap();
    assert_eq!(original.len(), 2);
    assert_eq!(original[1].content, "Answer to the first question");
    assert!(h.session.messages(&second).await.unwrap().is_empty());

    assert_eq!(h.session.state(), TurnState::Idle);
    assert_eq!(h.synth.calls(), 0, "late replies are not spoken");
}

#[tokio::test]
async fn test_replies_are_routed_in_order() {
    let h = Harness::new(false);

    h.session.submit_text("to mitra").await.unwrap();
    let mitra = h.session.current_conversation_id().await.unwrap();

    h.session.switch_agent(Agent::Guru).await.unwrap();
    h.session.submit_text("to guru").await.unwrap();
    let guru = h.session.current_conversation_id().await.unwrap();

    h.session.handle_transport_event(reply_chunk("from mitra", true)).await;
    h.session.handle_transport_event(reply_chunk("from guru", true)).await;

    assert_eq!(h.session.messages(&mitra).await.unwrap()[1].content, "from mitra");
    assert_eq!(h.session.messages(&guru).await.unwrap()[1].content, "from guru");
    assert_eq!(h.session.state(), TurnState::Idle);

    match &h.transport.sent()[1] {
        OutboundFrame::UserMessage { agent, voice, .. } => {
            assert_eq!(*agent, Agent::Guru);
            assert_eq!(voice, "guru");
        }
    }
}

#[tokio::test]
async fn test_transport_close_while_sending() {
    let h = Harness::new(false);
    let mut events = h.session.subscribe();

    h.session.submit_text("Are you there?").await.unwrap();
    let id = h.session.current_conversation_id().await.unwrap();

    h.session.handle_transport_event(TransportEvent::Close).await;

    assert_eq!(h.session.state(), TurnState::Idle);
    let messages = h.session.messages(&id).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].role, Role::System);

    assert_eq!(recv_within(&mut events, Duration::from_secs(1)).await, Some(SessionEvent::Offline));
    assert!(matches!(
        recv_within(&mut events, Duration::from_secs(1)).await,
        Some(SessionEvent::SystemMessage { conversation_id, .. }) if conversation_id == id
    ));

    // Nothing outstanding any more, so no automatic retry
    assert_eq!(h.transport.sent().len(), 1);
    assert_eq!(h.session.stats().await.errors, 1);
}

#[tokio::test]
async fn test_close_while_idle_adds_nothing() {
    let h = Harness::new(false);
    let id = h.session.current_conversation_id().await.unwrap();

    h.session.handle_transport_event(TransportEvent::Close).await;
    h.session.handle_transport_event(TransportEvent::Open).await;

    assert!(h.session.messages(&id).await.unwrap().is_empty());
    assert_eq!(h.session.state(), TurnState::Idle);
}

#[tokio::test]
async fn test_send_failure_records_system_message() {
    let h = Harness::new(false);
    h.transport.fail_sends(true);

    let result = h.session.submit_text("hello").await;

    assert!(matches!(result, Err(ChatError::Connection(_))));
    assert_eq!(h.session.state(), TurnState::Idle);
    let id = h.session.current_conversation_id().await.unwrap();
    let messages = h.session.messages(&id).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[1].role, Role::System);
}

#[tokio::test]
async fn test_backend_error_frame_fails_turn() {
    let h = Harness::new(false);

    h.session.submit_text("hello").await.unwrap();
    h.session
        .handle_transport_event(TransportEvent::Message(InboundFrame::Error {
            message: "agent unavailable".to_string(),
        }))
        .await;

    assert_eq!(h.session.state(), TurnState::Idle);
    let id = h.session.current_conversation_id().await.unwrap();
    let messages = h.session.messages(&id).await.unwrap();
    assert_eq!(messages.last().unwrap().content, "agent unavailable");
    assert_eq!(messages.last().unwrap().role, Role::System);
}

#[tokio::test]
async fn test_input_rejected_while_waiting_for_reply() {
    let h = Harness::new(false);

    h.session.submit_text("one").await.unwrap();
    let result = h.session.submit_text("two").await;

    assert!(matches!(result, Err(ChatError::Validation(_))));
    assert_eq!(h.transport.sent().len(), 1);
}

#[tokio::test]
async fn test_audio_url_attaches_to_reply() {
    let h = Harness::new(false);

    h.session.submit_text("hello").await.unwrap();
    h.session.handle_transport_event(reply_chunk("hi", true)).await;
    h.session
        .handle_transport_event(TransportEvent::Message(InboundFrame::AudioUrl {
            url: "/audio/reply.mp3".to_string(),
            agent: None,
        }))
        .await;

    let id = h.session.current_conversation_id().await.unwrap();
    let messages = h.session.messages(&id).await.unwrap();
    assert_eq!(messages[1].audio_reference.as_deref(), Some("/audio/reply.mp3"));
}

#[tokio::test(start_paused = true)]
async fn test_user_speech_interrupts_agent() {
    let h = Harness::new(true);

    h.session.submit_text("Hello").await.unwrap();
    h.session.handle_transport_event(reply_chunk("Hi, how can I help?", true)).await;
    settle().await;
    assert_eq!(h.player.active(), 1);

    assert!(h.session.start_voice_input().await);

    assert_eq!(h.session.state(), TurnState::UserTurn(InputMode::Listening));
    assert_eq!(h.player.active(), 0);
    assert!(h.session.voice_session().await.listening);
}

#[tokio::test]
async fn test_final_transcript_is_sent() {
    let h = Harness::new(false);
    h.start().await;

    assert!(h.session.start_voice_input().await);
    assert!(h.feed.finalize("I am feeling anxious", 0.9).await);

    let mut state = h.session.watch_state();
    tokio::time::timeout(Duration::from_secs(2), state.wait_for(|s| *s == TurnState::Sending))
        .await
        .expect("transcript submitted")
        .unwrap();

    assert_eq!(
        h.transport.sent(),
        vec![OutboundFrame::user_message("I am feeling anxious", Agent::Mitra)]
    );
}

#[tokio::test]
async fn test_switch_agent_stops_playback_and_keeps_history() {
    let h = Harness::new(true);

    h.session.submit_text("Hello").await.unwrap();
    let mitra = h.session.current_conversation_id().await.unwrap();
    h.session.handle_transport_event(reply_chunk("Hi!", true)).await;
    settle().await;

    let guru = h.session.switch_agent(Agent::Guru).await.unwrap();

    assert_ne!(mitra, guru);
    assert_eq!(h.session.focused_agent().await, Agent::Guru);
    assert_eq!(h.session.state(), TurnState::Idle);
    assert_eq!(h.player.active(), 0);
    assert_eq!(h.session.messages(&mitra).await.unwrap().len(), 2);
    assert_eq!(h.session.speech_output().settings().agent, Agent::Guru);

    let summaries = h.session.list_conversations(&ConversationFilter::default()).await;
    assert_eq!(summaries.len(), 2);
}

#[tokio::test]
async fn test_delete_current_conversation() {
    let h = Harness::new(false);
    let id = h.session.current_conversation_id().await.unwrap();

    h.session.delete_conversation(&id).await.unwrap();

    assert!(matches!(h.session.messages(&id).await, Err(ChatError::NotFound(_))));
    assert_ne!(h.session.current_conversation_id().await.unwrap(), id);
}

#[tokio::test]
async fn test_failed_save_does_not_stall_turn() {
    let storage = FlakyStorage::new();
    let store = ConversationStore::open(Box::new(storage.clone()), Agent::Mitra).unwrap();
    let h = Harness::with_options(HarnessOptions {
        store: Some(store),
        ..HarnessOptions::default()
    });
    let mut events = h.session.subscribe();

    h.session.submit_text("Hello").await.unwrap();
    storage.set_failing(true);
    h.session.handle_transport_event(reply_chunk("Hi there", true)).await;
    storage.set_failing(false);

    assert_eq!(h.session.state(), TurnState::Idle);
    let id = h.session.current_conversation_id().await.unwrap();
    let messages = h.session.messages(&id).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].content, "Hi there");
    assert!(!messages[1].is_streaming);

    let mut storage_notices = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, SessionEvent::StorageUnavailable(_)) {
            storage_notices += 1;
        }
    }
    assert!(storage_notices > 0);

    h.session.submit_text("Thanks").await.unwrap();
    assert_eq!(h.session.state(), TurnState::Sending);
    assert_eq!(h.transport.sent().len(), 2);
}

#[tokio::test]
async fn test_voice_start_failure_is_reported_once() {
    let h = Harness::with_options(HarnessOptions {
        broken_recognizer: true,
        ..HarnessOptions::default()
    });
    h.start().await;
    let mut events = h.session.subscribe();

    assert!(!h.session.start_voice_input().await);

    assert!(matches!(
        recv_within(&mut events, Duration::from_secs(2)).await,
        Some(SessionEvent::VoiceUnavailable(_))
    ));
    assert_eq!(recv_within(&mut events, Duration::from_millis(200)).await, None);
    assert_eq!(h.session.state(), TurnState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_reply_synthesis_runs_in_background() {
    let h = Harness::with_options(HarnessOptions {
        auto_voice: true,
        synth_delay: Duration::from_secs(20),
        ..HarnessOptions::default()
    });

    h.session.submit_text("Hello").await.unwrap();
    let before = tokio::time::Instant::now();
    h.session.handle_transport_event(reply_chunk("Hi!", true)).await;

    assert!(before.elapsed() < Duration::from_secs(1));
    assert_eq!(h.session.state(), TurnState::AgentSpeaking);

    // Barge in before the synthesis task has even run
    assert!(h.session.start_voice_input().await);
    assert_eq!(h.session.state(), TurnState::UserTurn(InputMode::Listening));

    tokio::time::sleep(Duration::from_secs(30)).await;
    settle().await;
    assert_eq!(h.player.started(), 0, "superseded reply is never played");
    assert_eq!(h.session.state(), TurnState::UserTurn(InputMode::Listening));
}
