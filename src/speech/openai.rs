//! JSON cloud backend (`POST {base}/audio/speech`).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::http::{bearer_headers, read_audio_response, shared_client, trim_trailing_slash};
use super::sink::{play_bytes, AudioSink};
use super::{ActiveUtterance, SpeechOutcome, SpeechProvider, SpeechRequest, UtteranceContext, VoiceOption};
use crate::error::VoxError;
use crate::settings::{OpenAiSettings, ProviderKind, DEFAULT_OPENAI_BASE_URL, DEFAULT_OPENAI_MODEL};
use crate::util::retry::RetryPolicy;
use crate::util::timeout::with_timeout;

pub const DEFAULT_VOICE: &str = "alloy";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const VOICES: &[&str] = &[
    "alloy", "ash", "ballad", "coral", "echo", "fable", "nova", "onyx", "sage", "shimmer",
    "verse",
];

/// OpenAI-compatible speech endpoint.
pub struct OpenAiSpeechProvider {
    api_key: String,
    base_url: String,
    model: String,
    timeout: Duration,
    retry_policy: RetryPolicy,
    sink: Arc<dyn AudioSink>,
    active: ActiveUtterance,
}

impl OpenAiSpeechProvider {
    pub fn new(settings: &OpenAiSettings, sink: Arc<dyn AudioSink>) -> Self {
        let non_blank = |value: &str, fallback: &str| {
            if value.trim().is_empty() {
                fallback.to_string()
            } else {
                value.trim().to_string()
            }
        };
        Self {
            api_key: settings.api_key.trim().to_string(),
            base_url: non_blank(&settings.base_url, DEFAULT_OPENAI_BASE_URL),
            model: non_blank(&settings.model, DEFAULT_OPENAI_MODEL),
            timeout: DEFAULT_TIMEOUT,
            retry_policy: RetryPolicy::default(),
            sink,
            active: ActiveUtterance::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    fn voice_for(&self, requested: &str) -> String {
        let requested = requested.trim().to_ascii_lowercase();
        if VOICES.contains(&requested.as_str()) {
            requested
        } else {
            if !requested.is_empty() {
                tracing::debug!(requested = %requested, "Unknown OpenAI voice, using default");
            }
            DEFAULT_VOICE.to_string()
        }
    }

    async fn fetch_once(&self, payload: &serde_json::Value) -> Result<Vec<u8>, VoxError> {
        let url = format!("{}/audio/speech", trim_trailing_slash(&self.base_url));
        with_timeout(self.timeout, async {
            let response = shared_client()
                .post(url)
                .headers(bearer_headers(&self.api_key))
                .json(payload)
                .send()
                .await?;
            read_audio_response(response).await
        })
        .await
    }
}

#[async_trait]
impl SpeechProvider for OpenAiSpeechProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    async fn initialize(&self) -> Result<(), VoxError> {
        if self.api_key.is_empty() {
            return Err(VoxError::provider_init(
                self.kind().to_string(),
                "Missing OpenAI API key",
            ));
        }
        Ok(())
    }

    async fn synthesize_and_play(
        &self,
        request: &SpeechRequest,
        ctx: &mut UtteranceContext,
    ) -> SpeechOutcome {
        let cancel = self.active.begin(ctx.cancel_token());
        let payload = serde_json::json!({
            "model": self.model,
            "input": request.text,
            "voice": self.voice_for(&request.voice_id),
            "speed": request.rate.clamp(0.25, 4.0),
            "response_format": "mp3",
        });
        tracing::debug!(utterance = %ctx.id(), model = %self.model, "Requesting OpenAI speech");

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return SpeechOutcome::Cancelled,
            fetched = self.retry_policy.execute(|| self.fetch_once(&payload)) => fetched,
        };
        match fetched {
            Ok(bytes) => {
                ctx.playing();
                play_bytes(self.sink.as_ref(), bytes, ".mp3", &cancel).await
            }
            Err(e) => SpeechOutcome::Failed(e),
        }
    }

    async fn stop(&self) {
        self.active.cancel();
    }

    async fn list_voices(&self) -> Vec<VoiceOption> {
        VOICES
            .iter()
            .map(|voice| VoiceOption {
                id: voice.to_string(),
                label: voice.to_string(),
                locale: "multilingual".to_string(),
            })
            .collect()
    }
}
