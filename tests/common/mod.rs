// Shared test doubles for the chat engine
//
// In-memory stand-ins for the WebSocket link, the TTS service, the audio
// device and the recognition engine.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use buddy_agents::audio::{AudioClip, AudioPlayer};
use buddy_agents::conversation::{ConversationStorage, ConversationStore, Snapshot};
use buddy_agents::speech::{
    ChannelRecognizer, InteractionGate, RecognitionEvent, Recognizer, SpeechInput, SpeechOutput,
    SynthesisRequest, Synthesizer, TranscriptFeed, VoiceSettings,
};
use buddy_agents::transport::{
    ChatTransport, Connector, FrameSink, FrameStream, InboundFrame, OutboundFrame, TransportEvent,
};
use buddy_agents::{Agent, ChatError, SessionConfig, SessionOrchestrator};
use futures::channel::mpsc as fmpsc;
use futures::SinkExt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

// ----------------------------------------------------------------------
// Transport
// ----------------------------------------------------------------------

/// Server side of one mock link. Dropping it closes the link.
pub struct ServerEnd {
    pub to_client: fmpsc::UnboundedSender<Result<String, ChatError>>,
    pub from_client: fmpsc::UnboundedReceiver<String>,
}

impl ServerEnd {
    pub fn push(&self, json: &str) {
        let _ = self.to_client.unbounded_send(Ok(json.to_string()));
    }

    pub fn fail(&self, message: &str) {
        let _ = self
            .to_client
            .unbounded_send(Err(ChatError::Connection(message.to_string())));
    }
}

/// Connector handing each accepted link to the test
#[derive(Clone)]
pub struct MockConnector {
    servers: mpsc::UnboundedSender<ServerEnd>,
    attempts: Arc<AtomicUsize>,
    refuse: Arc<AtomicBool>,
}

impl MockConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerEnd>) {
        let (servers, rx) = mpsc::unbounded_channel();
        (
            Self {
                servers,
                attempts: Arc::new(AtomicUsize::new(0)),
                refuse: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Make the next connection attempts fail
    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _url: &str) -> Result<(FrameSink, FrameStream), ChatError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if self.refuse.load(Ordering::SeqCst) {
            return Err(ChatError::Connection("connection refused".to_string()));
        }

        let (client_tx, server_rx) = fmpsc::unbounded::<String>();
        let (server_tx, client_rx) = fmpsc::unbounded::<Result<String, ChatError>>();

        let _ = self.servers.send(ServerEnd {
            to_client: server_tx,
            from_client: server_rx,
        });

        let sink: FrameSink =
            Box::pin(client_tx.sink_map_err(|e| ChatError::Connection(e.to_string())));
        let stream: FrameStream = Box::pin(client_rx);
        Ok((sink, stream))
    }
}

/// Transport that records frames instead of sending them
pub struct RecordingTransport {
    sent: Mutex<Vec<OutboundFrame>>,
    connected: AtomicBool,
    fail_sends: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            fail_sends: AtomicBool::new(false),
        }
    }

    pub fn sent(&self) -> Vec<OutboundFrame> {
        self.sent.lock().unwrap().clone()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send(&self, frame: OutboundFrame) -> Result<(), ChatError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ChatError::Connection("link dropped".to_string()));
        }
        self.sent.lock().unwrap().push(frame);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

pub fn reply_chunk(text: &str, done: bool) -> TransportEvent {
    TransportEvent::Message(InboundFrame::AgentResponse {
        message: text.to_string(),
        agent: None,
        done,
    })
}

// ----------------------------------------------------------------------
// Voice
// ----------------------------------------------------------------------

/// Synthesizer returning fixed bytes after an optional delay
pub struct MockSynthesizer {
    delay: Duration,
    calls: AtomicUsize,
    fail: AtomicBool,
    requests: Mutex<Vec<SynthesisRequest>>,
}

impl MockSynthesizer {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<SynthesisRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Synthesizer for MockSynthesizer {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>, ChatError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(ChatError::Synthesis("voice service unavailable".to_string()));
        }
        Ok(request.text.as_bytes().to_vec())
    }
}

/// Player that "plays" for a fixed duration and tracks overlap
pub struct MockPlayer {
    duration: Duration,
    started: AtomicUsize,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockPlayer {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            started: AtomicUsize::new(0),
            active: Arc::new(AtomicUsize::new(0)),
            max_active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioPlayer for MockPlayer {
    async fn play(&self, _clip: &AudioClip) -> Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let _guard = ActiveGuard(Arc::clone(&self.active));

        tokio::time::sleep(self.duration).await;
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Recognizer whose engine refuses to start
pub struct BrokenRecognizer;

#[async_trait]
impl Recognizer for BrokenRecognizer {
    async fn start(&mut self, _language: &str) -> Result<mpsc::Receiver<RecognitionEvent>> {
        anyhow::bail!("microphone permission denied")
    }

    async fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_active(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "broken"
    }
}

// ----------------------------------------------------------------------
// Storage
// ----------------------------------------------------------------------

/// Storage whose saves can be made to fail, as with a full disk
#[derive(Clone, Default)]
pub struct FlakyStorage {
    failing: Arc<AtomicBool>,
    saved: Arc<Mutex<Option<Snapshot>>>,
}

impl FlakyStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Last snapshot that was saved successfully
    pub fn saved(&self) -> Option<Snapshot> {
        self.saved.lock().unwrap().clone()
    }
}

impl ConversationStorage for FlakyStorage {
    fn load(&self) -> Result<Option<Snapshot>, ChatError> {
        Ok(self.saved())
    }

    fn save(&self, snapshot: &Snapshot) -> Result<(), ChatError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ChatError::Storage("no space left on device".to_string()));
        }
        *self.saved.lock().unwrap() = Some(snapshot.clone());
        Ok(())
    }
}

// ----------------------------------------------------------------------
// Session harness
// ----------------------------------------------------------------------

pub const PLAYBACK: Duration = Duration::from_secs(10);

pub struct Harness {
    pub session: Arc<SessionOrchestrator>,
    pub transport: Arc<RecordingTransport>,
    pub synth: Arc<MockSynthesizer>,
    pub player: Arc<MockPlayer>,
    pub feed: TranscriptFeed,
    pub transport_events: broadcast::Sender<TransportEvent>,
}

#[derive(Default)]
pub struct HarnessOptions {
    pub auto_voice: bool,
    pub synth_delay: Duration,
    /// In-memory store when `None`
    pub store: Option<ConversationStore>,
    pub broken_recognizer: bool,
}

impl Harness {
    pub fn new(auto_voice: bool) -> Self {
        Self::with_options(HarnessOptions {
            auto_voice,
            ..HarnessOptions::default()
        })
    }

    pub fn with_options(options: HarnessOptions) -> Self {
        let transport = Arc::new(RecordingTransport::new());
        let synth = Arc::new(MockSynthesizer::with_delay(options.synth_delay));
        let player = Arc::new(MockPlayer::new(PLAYBACK));

        let speech_out = Arc::new(SpeechOutput::new(
            synth.clone(),
            player.clone(),
            Arc::new(InteractionGate::new()),
            VoiceSettings::default(),
        ));
        let (recognizer, feed) = ChannelRecognizer::new(8);
        let recognizer: Box<dyn Recognizer> = if options.broken_recognizer {
            Box::new(BrokenRecognizer)
        } else {
            Box::new(recognizer)
        };
        let speech_in = Arc::new(SpeechInput::new(recognizer, "en"));

        let config = SessionConfig {
            default_agent: Agent::Mitra,
            auto_voice: options.auto_voice,
            continuous_listening: false,
            event_capacity: 64,
        };
        let session = SessionOrchestrator::new(
            config,
            options
                .store
                .unwrap_or_else(|| ConversationStore::in_memory(Agent::Mitra)),
            transport.clone(),
            speech_in,
            speech_out,
        );
        let (transport_events, _) = broadcast::channel(64);

        Self {
            session,
            transport,
            synth,
            player,
            feed,
            transport_events,
        }
    }

    /// Run the session's event pump, as the binary does
    pub async fn start(&self) {
        self.session.start(self.transport_events.subscribe()).await;
    }
}

/// Let spawned tasks run
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

pub async fn recv_within<T: Clone>(rx: &mut broadcast::Receiver<T>, within: Duration) -> Option<T> {
    tokio::time::timeout(within, rx.recv()).await.ok()?.ok()
}
