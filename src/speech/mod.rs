//! Speech backends behind one capability interface.
//!
//! Every backend turns one sentence into played audio and can be stopped at
//! any time. The registry decides which backend is live; the orchestrator
//! only ever talks to the trait.

pub mod http;
pub mod local;
pub mod registry;
pub mod sink;

#[cfg(feature = "azure")]
pub mod azure;
#[cfg(feature = "openai")]
pub mod openai;

pub use local::LocalSpeechProvider;
pub use registry::{BackendKey, ProviderFactory, ProviderRegistry};
pub use sink::{AudioSink, CommandSink};

use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::VoxError;
use crate::settings::{ProviderKind, SpeechSettings};

/// Identifies one speak request ("take").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UtteranceId(pub u64);

impl fmt::Display for UtteranceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "u{}", self.0)
    }
}

/// What to say and how.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechRequest {
    pub text: String,
    /// Empty means the backend's default voice.
    pub voice_id: String,
    pub rate: f32,
    pub pitch: f32,
}

impl SpeechRequest {
    pub fn new(text: impl Into<String>, settings: &SpeechSettings) -> Self {
        Self {
            text: text.into(),
            voice_id: settings.voice_id.trim().to_string(),
            rate: settings.rate,
            pitch: settings.pitch,
        }
    }
}

/// How a single utterance ended.
#[derive(Debug)]
pub enum SpeechOutcome {
    Completed,
    Cancelled,
    Failed(VoxError),
}

impl SpeechOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// A voice a backend can speak with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceOption {
    pub id: String,
    pub label: String,
    pub locale: String,
}

/// A backend the user can choose from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineOption {
    pub kind: ProviderKind,
    pub label: String,
    pub available: bool,
}

/// Per-utterance handle given to a backend.
///
/// Carries the cancellation token of the take and a hook the backend fires
/// once audio actually starts.
pub struct UtteranceContext {
    id: UtteranceId,
    cancel: CancellationToken,
    on_playing: Option<Box<dyn FnOnce() + Send>>,
}

impl UtteranceContext {
    pub fn new(id: UtteranceId, cancel: CancellationToken) -> Self {
        Self {
            id,
            cancel,
            on_playing: None,
        }
    }

    pub fn on_playing(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_playing = Some(Box::new(hook));
        self
    }

    pub fn id(&self) -> UtteranceId {
        self.id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Report that audio is now audible. Only the first call has an effect.
    pub fn playing(&mut self) {
        if let Some(hook) = self.on_playing.take() {
            hook();
        }
    }
}

impl fmt::Debug for UtteranceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UtteranceContext")
            .field("id", &self.id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// Uniform contract implemented by every speech backend.
#[async_trait]
pub trait SpeechProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Acquire whatever the backend needs before the first utterance.
    async fn initialize(&self) -> Result<(), VoxError> {
        Ok(())
    }

    /// Synthesize `request` and play it to the end, honouring the context's
    /// cancellation token. Failures come back as [`SpeechOutcome::Failed`].
    async fn synthesize_and_play(
        &self,
        request: &SpeechRequest,
        ctx: &mut UtteranceContext,
    ) -> SpeechOutcome;

    /// Halt anything in flight. Idempotent.
    async fn stop(&self);

    /// Best effort; empty on failure.
    async fn list_voices(&self) -> Vec<VoiceOption>;

    /// Release backend resources after the last use.
    async fn shutdown(&self) {
        self.stop().await;
    }
}

/// Tracks the token of the utterance a backend is currently working on so
/// that `stop()` can reach it.
#[derive(Debug, Default)]
pub struct ActiveUtterance {
    current: Mutex<Option<CancellationToken>>,
}

impl ActiveUtterance {
    /// Register a new utterance; any previous one is cancelled.
    ///
    /// A take whose parent is already cancelled is stale and gets an
    /// unregistered token, so it cannot displace a newer utterance.
    pub fn begin(&self, parent: &CancellationToken) -> CancellationToken {
        let token = parent.child_token();
        let previous = {
            let mut current = self.current.lock().unwrap_or_else(|p| p.into_inner());
            if parent.is_cancelled() {
                return token;
            }
            current.replace(token.clone())
        };
        if let Some(previous) = previous {
            previous.cancel();
        }
        token
    }

    pub fn cancel(&self) {
        if let Some(token) = self
            .current
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
        {
            token.cancel();
        }
    }
}
