//! SSML cloud backend (`POST {base}/cognitiveservices/v1`).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::Deserialize;

use super::http::{read_audio_response, shared_client, status_to_error, trim_trailing_slash};
use super::sink::{play_bytes, AudioSink};
use super::{ActiveUtterance, SpeechOutcome, SpeechProvider, SpeechRequest, UtteranceContext, VoiceOption};
use crate::error::VoxError;
use crate::settings::{AzureSettings, ProviderKind};
use crate::util::retry::RetryPolicy;
use crate::util::timeout::with_timeout;

pub const DEFAULT_VOICE: &str = "tr-TR-EmelNeural";
pub const OUTPUT_FORMAT: &str = "audio-16khz-32kbitrate-mono-mp3";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const SUBSCRIPTION_HEADER: &str = "ocp-apim-subscription-key";
const OUTPUT_FORMAT_HEADER: &str = "x-microsoft-outputformat";

/// Azure Cognitive Services speech endpoint.
pub struct AzureSpeechProvider {
    api_key: String,
    region: String,
    timeout: Duration,
    retry_policy: RetryPolicy,
    sink: Arc<dyn AudioSink>,
    active: ActiveUtterance,
}

impl AzureSpeechProvider {
    pub fn new(settings: &AzureSettings, sink: Arc<dyn AudioSink>) -> Self {
        Self {
            api_key: settings.api_key.trim().to_string(),
            region: settings.region.trim().to_string(),
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

    /// Region name expanded to the regional host, or a stored URL as is.
    pub fn endpoint(&self) -> String {
        if self.region.starts_with("http://") || self.region.starts_with("https://") {
            trim_trailing_slash(&self.region).to_string()
        } else {
            format!("https://{}.tts.speech.microsoft.com", self.region)
        }
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&self.api_key) {
            headers.insert(SUBSCRIPTION_HEADER, val);
        }
        headers
    }

    async fn fetch_once(&self, ssml: &str) -> Result<Vec<u8>, VoxError> {
        let url = format!("{}/cognitiveservices/v1", self.endpoint());
        let mut headers = self.headers();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/ssml+xml"));
        headers.insert(
            OUTPUT_FORMAT_HEADER,
            HeaderValue::from_static(OUTPUT_FORMAT),
        );

        with_timeout(self.timeout, async {
            let response = shared_client()
                .post(url)
                .headers(headers)
                .body(ssml.to_string())
                .send()
                .await?;
            read_audio_response(response).await
        })
        .await
    }

    async fn fetch_voices(&self) -> Result<Vec<VoiceOption>, VoxError> {
        let url = format!("{}/cognitiveservices/voices/list", self.endpoint());
        let voices: Vec<AzureVoice> = with_timeout(self.timeout, async {
            let response = shared_client()
                .get(url)
                .headers(self.headers())
                .send()
                .await?;
            let status = response.status().as_u16();
            let body = response.text().await?;
            if !(200..300).contains(&status) {
                return Err(status_to_error(status, None, &body));
            }
            Ok(serde_json::from_str(&body)?)
        })
        .await?;

        Ok(voices
            .into_iter()
            .map(|v| VoiceOption {
                label: v.local_name.or(v.display_name).unwrap_or_else(|| v.short_name.clone()),
                id: v.short_name,
                locale: v.locale,
            })
            .collect())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AzureVoice {
    short_name: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    local_name: Option<String>,
    locale: String,
}

#[async_trait]
impl SpeechProvider for AzureSpeechProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Azure
    }

    async fn initialize(&self) -> Result<(), VoxError> {
        if self.api_key.is_empty() {
            return Err(VoxError::provider_init(
                self.kind().to_string(),
                "Missing Azure speech key",
            ));
        }
        if self.region.is_empty() {
            return Err(VoxError::provider_init(
                self.kind().to_string(),
                "Missing Azure region or endpoint",
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
        let ssml = build_ssml(request);
        tracing::debug!(utterance = %ctx.id(), endpoint = %self.endpoint(), "Requesting Azure speech");

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return SpeechOutcome::Cancelled,
            fetched = self.retry_policy.execute(|| self.fetch_once(&ssml)) => fetched,
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
        match self.fetch_voices().await {
            Ok(voices) => voices,
            Err(e) => {
                tracing::warn!(error = %e, "Could not list Azure voices");
                Vec::new()
            }
        }
    }
}

/// Speech markup for one sentence.
pub fn build_ssml(request: &SpeechRequest) -> String {
    let voice = if request.voice_id.trim().is_empty() {
        DEFAULT_VOICE
    } else {
        request.voice_id.trim()
    };
    format!(
        "<speak version='1.0' xmlns='http://www.w3.org/2001/10/synthesis' xml:lang='{lang}'>\
         <voice name='{voice}'><prosody rate='{rate}' pitch='{pitch}'>{text}</prosody></voice></speak>",
        lang = html_escape::encode_single_quoted_attribute(&voice_locale(voice)),
        voice = html_escape::encode_single_quoted_attribute(voice),
        rate = relative_percent(request.rate),
        pitch = relative_percent(request.pitch),
        text = html_escape::encode_text(&request.text),
    )
}

/// `tr-TR-EmelNeural` -> `tr-TR`.
fn voice_locale(voice: &str) -> String {
    let parts: Vec<&str> = voice.splitn(3, '-').collect();
    match parts.as_slice() {
        [lang, region, _] => format!("{lang}-{region}"),
        _ => "tr-TR".to_string(),
    }
}

/// Multiplier to an SSML relative change (`1.25` -> `+25%`).
fn relative_percent(value: f32) -> String {
    let percent = ((value - 1.0) * 100.0).round() as i32;
    format!("{percent:+}%")
}
