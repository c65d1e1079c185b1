//! Speech capability seams.
//!
//! Both capabilities are optional. A missing capability degrades silently
//! to text: the terminal channel falls back to typed input, the interviewer
//! simply prints its utterance.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

/// Record one utterance from the user and transcribe it.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn record_and_transcribe(&self) -> Result<String>;
}

/// Speak one utterance to the user.
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    async fn speak(&self, text: &str) -> Result<()>;
}

pub type SharedSpeechToText = Arc<dyn SpeechToText>;
pub type SharedTextToSpeech = Arc<dyn TextToSpeech>;

/// Speak if the capability is present. Failures are logged and swallowed;
/// the conversation continues as text.
pub async fn speak_best_effort(tts: &Option<SharedTextToSpeech>, text: &str) {
    if let Some(tts) = tts {
        if let Err(err) = tts.speak(text).await {
            tracing::warn!(%err, "text-to-speech failed, continuing with text only");
        }
    }
}
