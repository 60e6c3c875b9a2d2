use super::synth::{Synthesizer, VoiceSettings};
use crate::agent::Agent;
use crate::audio::{AudioClip, AudioPlayer};
use crate::error::ChatError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One-time flag recording that the user has interacted with the session.
/// Autoplay stays locked until it is set.
#[derive(Debug, Default)]
pub struct InteractionGate {
    interacted: AtomicBool,
}

impl InteractionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_interacted(&self) {
        if !self.interacted.swap(true, Ordering::SeqCst) {
            debug!("First user interaction recorded, autoplay unlocked");
        }
    }

    pub fn has_interacted(&self) -> bool {
        self.interacted.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SpeechOutputEvent {
    Started { clip_id: String },
    Ready { clip_id: String },
    Finished { clip_id: String },
    Stopped,
    Failed { message: String },
}

/// Result of a `speak` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakOutcome {
    /// Playback started
    Playing,
    /// Audio is held for `play_ready`
    Ready,
    /// A later `speak` or `stop` replaced this request before it finished
    Superseded,
}

/// Hold on the output taken before synthesis starts.
/// Any later speak or stop invalidates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeechClaim(u64);

struct Playback {
    clip_id: String,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct OutputState {
    /// Bumped by every speak/stop; stale synthesis results are dropped
    generation: u64,
    playback: Option<Playback>,
    ready: Option<AudioClip>,
}

/// Speech output controller
///
/// Owns the single playback resource of a session: a new playback always
/// stops the previous one first.
pub struct SpeechOutput {
    synthesizer: Arc<dyn Synthesizer>,
    player: Arc<dyn AudioPlayer>,
    gate: Arc<InteractionGate>,
    settings: std::sync::Mutex<VoiceSettings>,
    state: Arc<Mutex<OutputState>>,
    events: broadcast::Sender<SpeechOutputEvent>,
}

impl SpeechOutput {
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        player: Arc<dyn AudioPlayer>,
        gate: Arc<InteractionGate>,
        settings: VoiceSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(64);

        info!(
            "Speech output ready ({} player, {} voice)",
            player.name(),
            settings.agent.id()
        );

        Self {
            synthesizer,
            player,
            gate,
            settings: std::sync::Mutex::new(settings),
            state: Arc::new(Mutex::new(OutputState::default())),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SpeechOutputEvent> {
        self.events.subscribe()
    }

    pub fn gate(&self) -> &Arc<InteractionGate> {
        &self.gate
    }

    pub fn set_agent(&self, agent: Agent) {
        self.with_settings(|settings| settings.agent = agent);
    }

    pub fn settings(&self) -> VoiceSettings {
        self.with_settings(|settings| settings.clone())
    }

    fn with_settings<T>(&self, f: impl FnOnce(&mut VoiceSettings) -> T) -> T {
        let mut guard = self
            .settings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    /// Synthesize `text` and play it when allowed, otherwise keep it ready.
    pub async fn speak(&self, text: &str, auto_play: bool) -> Result<SpeakOutcome, ChatError> {
        let text = utterance(text)?;
        let claim = self.claim().await;
        self.speak_claimed(claim, text, auto_play).await
    }

    /// Stop whatever is playing and reserve the output for the next utterance
    pub async fn claim(&self) -> SpeechClaim {
        let mut state = self.state.lock().await;
        self.stop_locked(&mut state).await;
        SpeechClaim(state.generation)
    }

    /// Like [`SpeechOutput::speak`], but superseded by any speak or stop
    /// issued since `claim` was taken
    pub async fn speak_claimed(
        &self,
        claim: SpeechClaim,
        text: &str,
        auto_play: bool,
    ) -> Result<SpeakOutcome, ChatError> {
        let text = utterance(text)?;
        let SpeechClaim(generation) = claim;

        if self.state.lock().await.generation != generation {
            debug!("Output claim superseded before synthesis");
            return Ok(SpeakOutcome::Superseded);
        }

        let request = self.settings().request(text);
        let result = self.synthesizer.synthesize(&request).await;

        let mut state = self.state.lock().await;
        if state.generation != generation {
            debug!("Discarding superseded synthesis result");
            return Ok(SpeakOutcome::Superseded);
        }

        let audio = match result {
            Ok(audio) => audio,
            Err(e) => {
                warn!("Speech synthesis failed: {}", e);
                let _ = self.events.send(SpeechOutputEvent::Failed {
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        let clip = AudioClip::new(audio, request.format);

        if auto_play && self.gate.has_interacted() {
            self.start_playback(&mut state, clip);
            Ok(SpeakOutcome::Playing)
        } else {
            if auto_play {
                debug!("Autoplay locked until the user interacts; holding clip");
            }
            let clip_id = clip.id.clone();
            state.ready = Some(clip);
            let _ = self.events.send(SpeechOutputEvent::Ready { clip_id });
            Ok(SpeakOutcome::Ready)
        }
    }

    /// Play the clip held by a previous non-autoplay `speak`.
    /// Returns false when nothing is ready.
    pub async fn play_ready(&self) -> bool {
        self.gate.mark_interacted();

        let mut state = self.state.lock().await;
        let Some(clip) = state.ready.take() else {
            return false;
        };

        self.stop_locked(&mut state).await;
        self.start_playback(&mut state, clip);
        true
    }

    /// Halt playback and release held audio. Stopping when idle is a no-op.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        self.stop_locked(&mut state).await;
    }

    pub async fn is_speaking(&self) -> bool {
        self.state.lock().await.playback.is_some()
    }

    pub async fn has_ready_audio(&self) -> bool {
        self.state.lock().await.ready.is_some()
    }

    async fn stop_locked(&self, state: &mut OutputState) {
        state.generation += 1;
        state.ready = None;

        if let Some(playback) = state.playback.take() {
            playback.handle.abort();
            // Wait for the player future to drop so two clips never overlap
            let _ = playback.handle.await;
            info!("Stopped playback of clip {}", playback.clip_id);
            let _ = self.events.send(SpeechOutputEvent::Stopped);
        }
    }

    fn start_playback(&self, state: &mut OutputState, clip: AudioClip) {
        let generation = state.generation;
        let clip_id = clip.id.clone();
        let player = Arc::clone(&self.player);
        let shared = Arc::clone(&self.state);
        let events = self.events.clone();
        let task_clip_id = clip_id.clone();

        let handle = tokio::spawn(async move {
            let result = player.play(&clip).await;

            let mut state = shared.lock().await;
            if state.generation != generation {
                return;
            }
            state.playback = None;

            match result {
                Ok(()) => {
                    debug!("Finished playback of clip {}", task_clip_id);
                    let _ = events.send(SpeechOutputEvent::Finished {
                        clip_id: task_clip_id,
                    });
                }
                Err(e) => {
                    warn!("Playback of clip {} failed: {}", task_clip_id, e);
                    let _ = events.send(SpeechOutputEvent::Failed {
                        message: e.to_string(),
                    });
                }
            }
        });

        info!("Started playback of clip {}", clip_id);
        state.playback = Some(Playback {
            clip_id: clip_id.clone(),
            handle,
        });
        let _ = self.events.send(SpeechOutputEvent::Started { clip_id });
    }
}

fn utterance(text: &str) -> Result<&str, ChatError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ChatError::Validation("nothing to speak".to_string()));
    }
    Ok(text)
}
