//! On-device backend driving an `espeak-ng` compatible command-line engine.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{ActiveUtterance, SpeechOutcome, SpeechProvider, SpeechRequest, UtteranceContext, VoiceOption};
use crate::error::VoxError;
use crate::settings::ProviderKind;
use crate::util::timeout::with_timeout;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const BASE_WPM: f32 = 175.0;
const BASE_PITCH: f32 = 50.0;

// ` 5  tr              --/M      Turkish            trk/tr`
static VOICE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\d+\s+(\S+)\s+\S+\s+(\S+)\s+\S+").expect("voice line regex must compile")
});

/// Speaks through a local synthesizer process.
pub struct LocalSpeechProvider {
    program: String,
    base_args: Vec<String>,
    target_locale: String,
    voices: Mutex<Option<Vec<VoiceOption>>>,
    active: ActiveUtterance,
    ready: AtomicBool,
}

impl LocalSpeechProvider {
    pub fn new(program: impl Into<String>, target_locale: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
            target_locale: target_locale.into(),
            voices: Mutex::new(None),
            active: ActiveUtterance::default(),
            ready: AtomicBool::new(false),
        }
    }

    /// Arguments placed before every engine invocation.
    pub fn with_base_args(mut self, args: Vec<String>) -> Self {
        self.base_args = args;
        self
    }

    fn command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.base_args).kill_on_drop(true);
        cmd
    }

    fn init_error(&self, message: impl Into<String>) -> VoxError {
        VoxError::provider_init(ProviderKind::Local.to_string(), message)
    }

    async fn probe(&self, flag: &str) -> Result<String, VoxError> {
        let output = with_timeout(PROBE_TIMEOUT, async {
            self.command()
                .arg(flag)
                .stdin(Stdio::null())
                .output()
                .await
                .map_err(VoxError::from)
        })
        .await
        .map_err(|e| self.init_error(format!("Cannot run '{}': {e}", self.program)))?;

        if !output.status.success() {
            return Err(self.init_error(format!(
                "'{} {flag}' exited with {}",
                self.program, output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn voices(&self) -> Vec<VoiceOption> {
        let mut cached = self.voices.lock().await;
        if let Some(voices) = cached.as_ref() {
            return voices.clone();
        }
        match self.probe("--voices").await {
            Ok(listing) => {
                let voices = parse_voices(&listing);
                *cached = Some(voices.clone());
                voices
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not list local voices");
                Vec::new()
            }
        }
    }

    async fn speak(
        &self,
        request: &SpeechRequest,
        voice: Option<String>,
        ctx: &mut UtteranceContext,
        cancel: &tokio_util::sync::CancellationToken,
    ) -> Result<SpeechOutcome, VoxError> {
        let mut cmd = self.command();
        if let Some(voice) = &voice {
            cmd.arg("-v").arg(voice);
        }
        cmd.arg("-s")
            .arg(words_per_minute(request.rate).to_string())
            .arg("-p")
            .arg(engine_pitch(request.pitch).to_string())
            .arg("--stdin")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let mut child = cmd
            .spawn()
            .map_err(|e| self.init_error(format!("Cannot start '{}': {e}", self.program)))?;

        if let Some(mut stdin) = child.stdin.take() {
            // The engine may stop reading before it drains a long sentence.
            let written = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                written = async {
                    stdin.write_all(request.text.as_bytes()).await?;
                    stdin.shutdown().await
                } => Some(written),
            };
            match written {
                Some(written) => written?,
                None => {
                    let _ = child.kill().await;
                    return Ok(SpeechOutcome::Cancelled);
                }
            }
        }
        ctx.playing();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                Ok(SpeechOutcome::Cancelled)
            }
            status = child.wait() => {
                let status = status?;
                if status.success() {
                    Ok(SpeechOutcome::Completed)
                } else {
                    Err(VoxError::Playback(format!("Speech engine exited with {status}")))
                }
            }
        }
    }
}

#[async_trait]
impl SpeechProvider for LocalSpeechProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    async fn initialize(&self) -> Result<(), VoxError> {
        let version = self.probe("--version").await?;
        tracing::info!(
            program = %self.program,
            version = version.lines().next().unwrap_or_default().trim(),
            "Local speech engine ready"
        );
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn synthesize_and_play(
        &self,
        request: &SpeechRequest,
        ctx: &mut UtteranceContext,
    ) -> SpeechOutcome {
        if !self.ready.load(Ordering::SeqCst) {
            return SpeechOutcome::Failed(self.init_error("Engine is not initialised"));
        }
        let cancel = self.active.begin(ctx.cancel_token());
        if cancel.is_cancelled() {
            return SpeechOutcome::Cancelled;
        }

        let voices = self.voices().await;
        let voice = resolve_voice(&request.voice_id, &voices, &self.target_locale);
        tracing::debug!(utterance = %ctx.id(), voice = ?voice, "Speaking with local engine");

        match self.speak(request, voice, ctx, &cancel).await {
            Ok(outcome) => outcome,
            Err(_) if cancel.is_cancelled() => SpeechOutcome::Cancelled,
            Err(e) => SpeechOutcome::Failed(e),
        }
    }

    async fn stop(&self) {
        self.active.cancel();
    }

    async fn list_voices(&self) -> Vec<VoiceOption> {
        self.voices().await
    }

    async fn shutdown(&self) {
        self.active.cancel();
        self.ready.store(false, Ordering::SeqCst);
        *self.voices.lock().await = None;
    }
}

/// Parse `--voices` output.
pub fn parse_voices(listing: &str) -> Vec<VoiceOption> {
    listing
        .lines()
        .filter_map(|line| VOICE_LINE.captures(line))
        .map(|caps| {
            let language = caps[1].to_string();
            VoiceOption {
                id: language.clone(),
                label: caps[2].replace('_', " "),
                locale: language,
            }
        })
        .collect()
}

/// Requested voice if installed, else the first voice for the target
/// locale, else any voice. `None` lets the engine use its default.
pub fn resolve_voice(requested: &str, voices: &[VoiceOption], target_locale: &str) -> Option<String> {
    let requested = requested.trim();
    if voices.is_empty() {
        return (!requested.is_empty()).then(|| requested.to_string());
    }
    if !requested.is_empty() && voices.iter().any(|v| v.id.eq_ignore_ascii_case(requested)) {
        return Some(requested.to_string());
    }

    let target = normalize_locale(target_locale);
    let language = target.split('-').next().unwrap_or_default().to_string();
    let fallback = voices
        .iter()
        .find(|v| normalize_locale(&v.locale) == target)
        .or_else(|| {
            voices
                .iter()
                .find(|v| normalize_locale(&v.locale).split('-').next() == Some(language.as_str()))
        })
        .or_else(|| voices.first())
        .map(|v| v.id.clone());

    if !requested.is_empty() {
        tracing::warn!(requested, fallback = ?fallback, "Requested voice is not installed");
    }
    fallback
}

fn normalize_locale(locale: &str) -> String {
    locale.trim().replace('_', "-").to_ascii_lowercase()
}

/// Rate multiplier to engine words per minute.
pub fn words_per_minute(rate: f32) -> u32 {
    (BASE_WPM * rate).round().clamp(80.0, 450.0) as u32
}

/// Pitch multiplier to the engine's 0..=99 scale.
pub fn engine_pitch(pitch: f32) -> u32 {
    (BASE_PITCH * pitch).round().clamp(0.0, 99.0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speech::UtteranceId;
    use tokio_util::sync::CancellationToken;

    const LISTING: &str = "Pty Language       Age/Gender VoiceName          File                 Other Languages
 5  af              --/M      Afrikaans          gmw/af
 5  en-gb           --/M      English_(Great_Britain) gmw/en            (en 2)
 5  tr              --/M      Turkish            trk/tr
";

    fn voice(id: &str) -> VoiceOption {
        VoiceOption {
            id: id.to_string(),
            label: id.to_string(),
            locale: id.to_string(),
        }
    }

    #[test]
    fn parses_voice_listing() {
        let voices = parse_voices(LISTING);
        assert_eq!(voices.len(), 3);
        assert_eq!(voices[1].id, "en-gb");
        assert_eq!(voices[1].label, "English (Great Britain)");
        assert_eq!(voices[2].locale, "tr");
    }

    #[test]
    fn voice_resolution_falls_back_by_locale_then_anything() {
        let voices = vec![voice("af"), voice("tr"), voice("en-gb")];

        assert_eq!(resolve_voice("en-gb", &voices, "tr-TR").as_deref(), Some("en-gb"));
        assert_eq!(resolve_voice("de", &voices, "tr-TR").as_deref(), Some("tr"));
        assert_eq!(resolve_voice("", &voices, "tr_TR").as_deref(), Some("tr"));
        assert_eq!(resolve_voice("de", &voices, "ja-JP").as_deref(), Some("af"));
        assert_eq!(resolve_voice("de", &[], "tr-TR").as_deref(), Some("de"));
        assert_eq!(resolve_voice("", &[], "tr-TR"), None);
    }

    #[test]
    fn prosody_mapping() {
        assert_eq!(words_per_minute(1.0), 175);
        assert_eq!(words_per_minute(2.0), 350);
        assert_eq!(words_per_minute(0.1), 80);
        assert_eq!(engine_pitch(1.0), 50);
        assert_eq!(engine_pitch(3.0), 99);
    }

    #[tokio::test]
    async fn missing_engine_fails_initialisation() {
        let provider = LocalSpeechProvider::new("voxbook-no-such-engine", "tr-TR");
        let err = provider.initialize().await.unwrap_err();
        assert!(matches!(err, VoxError::ProviderInit { ref provider, .. } if provider == "system"));
    }

    #[tokio::test]
    async fn speaking_before_initialisation_fails() {
        let provider = LocalSpeechProvider::new("voxbook-no-such-engine", "tr-TR");
        let request = SpeechRequest {
            text: "Merhaba.".to_string(),
            voice_id: String::new(),
            rate: 1.0,
            pitch: 1.0,
        };
        let mut ctx = UtteranceContext::new(UtteranceId(1), CancellationToken::new());
        let outcome = provider.synthesize_and_play(&request, &mut ctx).await;
        assert!(matches!(outcome, SpeechOutcome::Failed(VoxError::ProviderInit { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancel_interrupts_engine_that_stops_reading() {
        let script = r#"case "$1" in --version) echo fake-engine 1.0 ;; --voices) ;; *) exec sleep 30 ;; esac"#;
        let provider = LocalSpeechProvider::new("sh", "tr-TR").with_base_args(vec![
            "-c".to_string(),
            script.to_string(),
            "engine".to_string(),
        ]);
        provider.initialize().await.unwrap();

        // Far more than a pipe buffer, so the write blocks.
        let request = SpeechRequest {
            text: "Uzun bir cümle. ".repeat(100_000),
            voice_id: String::new(),
            rate: 1.0,
            pitch: 1.0,
        };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let mut ctx = UtteranceContext::new(UtteranceId(1), cancel);

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            provider.synthesize_and_play(&request, &mut ctx),
        )
        .await
        .expect("cancellation did not interrupt the engine");

        assert!(matches!(outcome, SpeechOutcome::Cancelled));
    }
}
