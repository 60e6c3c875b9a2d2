use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Event produced by a recognition engine. The engine ends an utterance
/// session by closing its channel.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEvent {
    Interim(String),
    Final { text: String, confidence: f32 },
    Error(String),
}

/// Speech recognition engine
///
/// Implementations:
/// - `ChannelRecognizer`: transcripts pushed by an external STT engine
/// - Scripted recognizers in tests
#[async_trait::async_trait]
pub trait Recognizer: Send + Sync {
    /// Start recognizing
    ///
    /// Returns a channel receiver that yields recognition events until the
    /// engine stops on its own or `stop` is called
    async fn start(&mut self, language: &str) -> Result<mpsc::Receiver<RecognitionEvent>>;

    async fn stop(&mut self) -> Result<()>;

    fn is_active(&self) -> bool;

    /// Engine name for logging
    fn name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListeningState {
    Idle,
    Listening,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SpeechInputEvent {
    Started,
    Interim(String),
    Final { text: String, confidence: f32 },
    Stopped,
    Error(String),
}

struct InputState {
    recognizer: Option<Box<dyn Recognizer>>,
    listening: ListeningState,
    interim: String,
    last_final: Option<String>,
    /// Bumped on every start/stop so stale pumps exit
    session: u64,
    pump: Option<JoinHandle<()>>,
}

/// Speech input controller
///
/// Wraps at most one active recognition instance. Without an engine every
/// operation fails softly so callers can disable voice input.
pub struct SpeechInput {
    state: Arc<Mutex<InputState>>,
    events: broadcast::Sender<SpeechInputEvent>,
    language: String,
    continuous: Arc<AtomicBool>,
    supported: bool,
}

impl SpeechInput {
    pub fn new(recognizer: Box<dyn Recognizer>, language: impl Into<String>) -> Self {
        info!("Speech input using {} recognizer", recognizer.name());
        Self::build(Some(recognizer), language.into())
    }

    /// Controller for a platform without speech recognition
    pub fn unsupported() -> Self {
        Self::build(None, String::new())
    }

    fn build(recognizer: Option<Box<dyn Recognizer>>, language: String) -> Self {
        let (events, _) = broadcast::channel(64);
        let supported = recognizer.is_some();

        Self {
            state: Arc::new(Mutex::new(InputState {
                recognizer,
                listening: ListeningState::Idle,
                interim: String::new(),
                last_final: None,
                session: 0,
                pump: None,
            })),
            events,
            language,
            continuous: Arc::new(AtomicBool::new(true)),
            supported,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.supported
    }

    /// Restart recognition when the engine ends an utterance session
    pub fn set_continuous(&self, continuous: bool) {
        self.continuous.store(continuous, Ordering::SeqCst);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SpeechInputEvent> {
        self.events.subscribe()
    }

    pub async fn listening_state(&self) -> ListeningState {
        self.state.lock().await.listening
    }

    pub async fn is_listening(&self) -> bool {
        self.listening_state().await == ListeningState::Listening
    }

    pub async fn interim_transcript(&self) -> String {
        self.state.lock().await.interim.clone()
    }

    pub async fn last_final_transcript(&self) -> Option<String> {
        self.state.lock().await.last_final.clone()
    }

    pub async fn reset_transcripts(&self) {
        let mut state = self.state.lock().await;
        state.interim.clear();
        state.last_final = None;
    }

    /// Begin capturing. Returns true when listening (including when it
    /// already was) and false when recognition is unavailable or fails.
    pub async fn start_listening(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.listening == ListeningState::Listening {
            debug!("Already listening");
            return true;
        }

        let Some(recognizer) = state.recognizer.as_mut() else {
            debug!("Speech recognition not supported");
            return false;
        };

        let rx = match recognizer.start(&self.language).await {
            Ok(rx) => rx,
            Err(e) => {
                warn!("Failed to start speech recognition: {}", e);
                state.listening = ListeningState::Error;
                let _ = self.events.send(SpeechInputEvent::Error(e.to_string()));
                return false;
            }
        };

        state.session += 1;
        state.listening = ListeningState::Listening;
        state.interim.clear();

        let pump = tokio::spawn(Self::pump(
            Arc::clone(&self.state),
            self.events.clone(),
            Arc::clone(&self.continuous),
            self.language.clone(),
            state.session,
            rx,
        ));
        if let Some(previous) = state.pump.replace(pump) {
            previous.abort();
        }

        info!("Listening for speech");
        let _ = self.events.send(SpeechInputEvent::Started);
        true
    }

    /// End capturing. Stopping while idle is a no-op returning false.
    pub async fn stop_listening(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.listening != ListeningState::Listening {
            if state.listening == ListeningState::Error {
                state.listening = ListeningState::Idle;
            }
            return false;
        }

        state.session += 1;
        state.listening = ListeningState::Idle;
        state.interim.clear();

        if let Some(recognizer) = state.recognizer.as_mut() {
            if let Err(e) = recognizer.stop().await {
                warn!("Failed to stop speech recognition: {}", e);
            }
        }
        if let Some(pump) = state.pump.take() {
            pump.abort();
        }

        info!("Stopped listening");
        let _ = self.events.send(SpeechInputEvent::Stopped);
        true
    }

    async fn pump(
        shared: Arc<Mutex<InputState>>,
        events: broadcast::Sender<SpeechInputEvent>,
        continuous: Arc<AtomicBool>,
        language: String,
        session: u64,
        mut rx: mpsc::Receiver<RecognitionEvent>,
    ) {
        loop {
            while let Some(event) = rx.recv().await {
                let mut state = shared.lock().await;
                if state.session != session {
                    return;
                }

                match event {
                    RecognitionEvent::Interim(text) => {
                        state.interim = text.clone();
                        let _ = events.send(SpeechInputEvent::Interim(text));
                    }
                    RecognitionEvent::Final { text, confidence } => {
                        debug!("Final transcript ({:.2}): {}", confidence, text);
                        state.interim.clear();
                        state.last_final = Some(text.clone());
                        let _ = events.send(SpeechInputEvent::Final { text, confidence });
                    }
                    RecognitionEvent::Error(message) => {
                        warn!("Speech recognition error: {}", message);
                        state.listening = ListeningState::Error;
                        state.interim.clear();
                        if let Some(recognizer) = state.recognizer.as_mut() {
                            let _ = recognizer.stop().await;
                        }
                        let _ = events.send(SpeechInputEvent::Error(message));
                        return;
                    }
                }
            }

            let mut state = shared.lock().await;
            if state.session != session || state.listening != ListeningState::Listening {
                return;
            }

            if continuous.load(Ordering::SeqCst) {
                let restarted = match state.recognizer.as_mut() {
                    Some(recognizer) => recognizer.start(&language).await,
                    None => return,
                };
                match restarted {
                    Ok(next) => {
                        debug!("Recognition ended, restarting (continuous mode)");
                        rx = next;
                        continue;
                    }
                    Err(e) => {
                        warn!("Failed to restart speech recognition: {}", e);
                        state.listening = ListeningState::Error;
                        let _ = events.send(SpeechInputEvent::Error(e.to_string()));
                        return;
                    }
                }
            }

            state.listening = ListeningState::Idle;
            state.interim.clear();
            info!("Speech recognition ended");
            let _ = events.send(SpeechInputEvent::Stopped);
            return;
        }
    }
}

/// Recognizer fed by an external speech-to-text engine through a
/// [`TranscriptFeed`].
pub struct ChannelRecognizer {
    slot: Arc<std::sync::Mutex<Option<mpsc::Sender<RecognitionEvent>>>>,
    capacity: usize,
}

/// Handle used by the STT engine to deliver transcripts
#[derive(Clone)]
pub struct TranscriptFeed {
    slot: Arc<std::sync::Mutex<Option<mpsc::Sender<RecognitionEvent>>>>,
}

impl ChannelRecognizer {
    pub fn new(capacity: usize) -> (Self, TranscriptFeed) {
        let slot = Arc::new(std::sync::Mutex::new(None));
        (
            Self {
                slot: Arc::clone(&slot),
                capacity: capacity.max(1),
            },
            TranscriptFeed { slot },
        )
    }

    fn take_sender(&self) -> Option<mpsc::Sender<RecognitionEvent>> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

#[async_trait::async_trait]
impl Recognizer for ChannelRecognizer {
    async fn start(&mut self, language: &str) -> Result<mpsc::Receiver<RecognitionEvent>> {
        let (tx, rx) = mpsc::channel(self.capacity);
        *self
            .slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(tx);
        debug!("Channel recognizer started ({})", language);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.take_sender();
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.slot
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    fn name(&self) -> &str {
        "channel"
    }
}

impl TranscriptFeed {
    fn sender(&self) -> Option<mpsc::Sender<RecognitionEvent>> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Deliver an event. Returns false when no recognition is running.
    pub async fn push(&self, event: RecognitionEvent) -> bool {
        match self.sender() {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    pub async fn interim(&self, text: impl Into<String>) -> bool {
        self.push(RecognitionEvent::Interim(text.into())).await
    }

    pub async fn finalize(&self, text: impl Into<String>, confidence: f32) -> bool {
        self.push(RecognitionEvent::Final {
            text: text.into(),
            confidence,
        })
        .await
    }

    /// End the current utterance session, as an engine does after silence
    pub fn end(&self) {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }
}
