//! Shared test helpers: a scripted speech backend, a recording audio sink
//! and throwaway libraries.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use voxbook::error::VoxError;
use voxbook::library::{BookCatalog, MemoryCatalog, MemoryProgressStore, NewBook, ProgressStore};
use voxbook::playback::PlaybackOrchestrator;
use voxbook::settings::{ProviderKind, SpeechSettings};
use voxbook::speech::{
    AudioSink, ProviderRegistry, SpeechOutcome, SpeechProvider, SpeechRequest, UtteranceContext,
    VoiceOption,
};
use voxbook::util::retry::RetryPolicy;

/// How the mock backend answers one utterance.
#[derive(Clone)]
pub enum Script {
    Complete,
    Fail(String),
    /// Report playing, then wait until cancelled.
    HangUntilCancelled,
    /// Report playing, wait for the release signal and complete even if
    /// cancelled in the meantime.
    IgnoreCancelThenComplete(Arc<Notify>),
    /// Panic inside the backend call.
    Panic,
}

/// Speech backend that follows a queue of scripts (default: complete).
pub struct MockProvider {
    kind: ProviderKind,
    scripts: Mutex<VecDeque<Script>>,
    spoken: Mutex<Vec<String>>,
    stops: Mutex<u32>,
    init_error: Option<String>,
}

impl MockProvider {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            scripts: Mutex::new(VecDeque::new()),
            spoken: Mutex::new(Vec::new()),
            stops: Mutex::new(0),
            init_error: None,
        }
    }

    pub fn failing_init(kind: ProviderKind, message: &str) -> Self {
        Self {
            init_error: Some(message.to_string()),
            ..Self::new(kind)
        }
    }

    pub fn queue(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn stop_count(&self) -> u32 {
        *self.stops.lock().unwrap()
    }
}

#[async_trait]
impl SpeechProvider for MockProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn initialize(&self) -> Result<(), VoxError> {
        match &self.init_error {
            Some(message) => Err(VoxError::provider_init(self.kind.to_string(), message)),
            None => Ok(()),
        }
    }

    async fn synthesize_and_play(
        &self,
        request: &SpeechRequest,
        ctx: &mut UtteranceContext,
    ) -> SpeechOutcome {
        self.spoken.lock().unwrap().push(request.text.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Complete);
        match script {
            Script::Complete => {
                ctx.playing();
                SpeechOutcome::Completed
            }
            Script::Fail(message) => SpeechOutcome::Failed(VoxError::Playback(message)),
            Script::HangUntilCancelled => {
                ctx.playing();
                ctx.cancel_token().cancelled().await;
                SpeechOutcome::Cancelled
            }
            Script::IgnoreCancelThenComplete(release) => {
                ctx.playing();
                release.notified().await;
                SpeechOutcome::Completed
            }
            Script::Panic => panic!("speech backend crashed"),
        }
    }

    async fn stop(&self) {
        *self.stops.lock().unwrap() += 1;
    }

    async fn list_voices(&self) -> Vec<VoiceOption> {
        vec![VoiceOption {
            id: "mock".to_string(),
            label: "Mock voice".to_string(),
            locale: "tr-TR".to_string(),
        }]
    }
}

/// Registry whose `kind` factory always hands out `provider`.
pub fn registry_with(kind: ProviderKind, provider: Arc<MockProvider>) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    register(&mut registry, kind, provider);
    registry
}

pub fn register(registry: &mut ProviderRegistry, kind: ProviderKind, provider: Arc<MockProvider>) {
    registry.register(kind, move |_: &SpeechSettings| {
        Ok(Arc::clone(&provider) as Arc<dyn SpeechProvider>)
    });
}

/// A text book on disk plus the in-memory stores around it.
pub struct Fixture {
    pub dir: TempDir,
    pub catalog: Arc<MemoryCatalog>,
    pub progress: Arc<MemoryProgressStore>,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            catalog: Arc::new(MemoryCatalog::new()),
            progress: Arc::new(MemoryProgressStore::new()),
        }
    }

    /// Write `content` as a .txt file and add it to the catalog.
    pub fn add_text_book(&self, name: &str, content: &str) -> u64 {
        let path = self.write(name, content.as_bytes());
        self.catalog
            .add(NewBook::from_document(path, None))
            .unwrap()
            .id
    }

    pub fn write(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn orchestrator(&self, registry: ProviderRegistry) -> PlaybackOrchestrator {
        PlaybackOrchestrator::new(
            Arc::clone(&self.catalog) as Arc<dyn BookCatalog>,
            Arc::clone(&self.progress) as Arc<dyn ProgressStore>,
            registry,
        )
    }
}

/// Audio sink that records what it was asked to play.
#[derive(Default)]
pub struct RecordingSink {
    played: Mutex<Vec<(PathBuf, Vec<u8>)>>,
}

impl RecordingSink {
    pub fn played(&self) -> Vec<(PathBuf, Vec<u8>)> {
        self.played.lock().unwrap().clone()
    }
}

#[async_trait]
impl AudioSink for RecordingSink {
    async fn play(&self, path: &Path, _cancel: &CancellationToken) -> SpeechOutcome {
        match std::fs::read(path) {
            Ok(bytes) => {
                self.played
                    .lock()
                    .unwrap()
                    .push((path.to_path_buf(), bytes));
                SpeechOutcome::Completed
            }
            Err(e) => SpeechOutcome::Failed(VoxError::Io(e)),
        }
    }
}

pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(1),
        multiplier: 1.0,
    }
}
