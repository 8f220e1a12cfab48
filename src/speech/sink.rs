//! Playing synthesized audio files.

use std::io::Write;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;

use super::SpeechOutcome;
use crate::error::VoxError;

/// Something that can play an audio file to the end.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play `audio`; return [`SpeechOutcome::Cancelled`] as soon as `cancel` fires.
    async fn play(&self, audio: &Path, cancel: &CancellationToken) -> SpeechOutcome;
}

/// Plays files through an external player process.
#[derive(Debug, Clone)]
pub struct CommandSink {
    program: String,
    args: Vec<String>,
}

impl CommandSink {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl AudioSink for CommandSink {
    async fn play(&self, audio: &Path, cancel: &CancellationToken) -> SpeechOutcome {
        let mut child = match tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(audio)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return SpeechOutcome::Failed(VoxError::Playback(format!(
                    "Cannot start audio player '{}': {e}",
                    self.program
                )))
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                SpeechOutcome::Cancelled
            }
            status = child.wait() => match status {
                Ok(status) if status.success() => SpeechOutcome::Completed,
                Ok(status) => SpeechOutcome::Failed(VoxError::Playback(format!(
                    "Audio player exited with {status}"
                ))),
                Err(e) => SpeechOutcome::Failed(VoxError::Io(e)),
            },
        }
    }
}

/// Write `bytes` to a transient file that disappears when dropped.
pub fn write_transient(bytes: &[u8], suffix: &str) -> Result<NamedTempFile, VoxError> {
    let mut file = tempfile::Builder::new()
        .prefix("voxbook-")
        .suffix(suffix)
        .tempfile()?;
    file.write_all(bytes)?;
    file.flush()?;
    Ok(file)
}

/// Persist a downloaded payload and hand it to `sink`.
pub async fn play_bytes(
    sink: &dyn AudioSink,
    bytes: Vec<u8>,
    suffix: &str,
    cancel: &CancellationToken,
) -> SpeechOutcome {
    let suffix = suffix.to_string();
    let file = match tokio::task::spawn_blocking(move || write_transient(&bytes, &suffix)).await {
        Ok(Ok(file)) => file,
        Ok(Err(e)) => return SpeechOutcome::Failed(e),
        Err(e) => {
            return SpeechOutcome::Failed(VoxError::InvalidState(format!(
                "Audio write task failed: {e}"
            )))
        }
    };
    let outcome = sink.play(file.path(), cancel).await;
    drop(file);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_file_holds_bytes_and_is_removed_on_drop() {
        let file = write_transient(b"ID3fake", ".mp3").unwrap();
        let path = file.path().to_path_buf();
        assert_eq!(std::fs::read(&path).unwrap(), b"ID3fake");
        assert!(path.to_string_lossy().ends_with(".mp3"));

        drop(file);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn missing_player_fails_with_playback_error() {
        let sink = CommandSink::new("voxbook-no-such-player", vec![]);
        let outcome = sink
            .play(Path::new("/dev/null"), &CancellationToken::new())
            .await;
        assert!(matches!(outcome, SpeechOutcome::Failed(VoxError::Playback(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancelled_player_is_killed() {
        let sink = CommandSink::new("sleep", vec!["30".to_string()]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        // `sleep 30 <path>` would run for a long time; cancellation wins.
        let outcome = sink.play(Path::new("1"), &cancel).await;
        assert!(matches!(outcome, SpeechOutcome::Cancelled));
    }
}
