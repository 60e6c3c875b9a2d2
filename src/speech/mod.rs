//! Voice interaction
//!
//! - `input`: speech recognition controller (interim/final transcripts)
//! - `output`: synthesized playback controller with autoplay gating
//! - `synth`: text-to-speech service client
//! - `settings`: server-side auto-voice preference

pub mod input;
pub mod output;
pub mod settings;
pub mod synth;

pub use input::{
    ChannelRecognizer, ListeningState, RecognitionEvent, Recognizer, SpeechInput,
    SpeechInputEvent, TranscriptFeed,
};
pub use output::{InteractionGate, SpeakOutcome, SpeechClaim, SpeechOutput, SpeechOutputEvent};
pub use settings::{AutoVoiceClient, AutoVoiceStatus};
pub use synth::{HttpSynthesizer, SynthesisRequest, Synthesizer, VoiceSettings, MAX_SYNTHESIS_INPUT_BYTES};
