//! Playback orchestration: one sentence at a time through the active backend.
//!
//! Commands (`load_book`, `speak_current`, `stop`, `next`, `previous`,
//! `apply_settings`) take `&mut self` and are therefore serialized by the
//! caller. Utterances run on their own task and report back through a
//! channel; [`PlaybackOrchestrator::next_event`] applies those reports. A
//! report for anything but the current take is discarded.

pub mod session;

pub use session::{ReadingSession, SessionSnapshot};

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::error::VoxError;
use crate::extract::ContentExtractor;
use crate::library::{fingerprint_file, BookCatalog, ProgressStore};
use crate::segment::{segment_document, Sentence};
use crate::settings::SpeechSettings;
use crate::speech::{
    EngineOption, ProviderRegistry, SpeechOutcome, SpeechProvider, SpeechRequest, UtteranceContext,
    UtteranceId, VoiceOption,
};

/// Observable playback state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PlaybackState {
    #[default]
    Idle,
    Synthesizing,
    Playing,
    Stopped,
    Failed {
        reason: String,
    },
}

impl PlaybackState {
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Synthesizing | Self::Playing)
    }
}

/// Result of loading a book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Ready {
        sentence_count: usize,
        current_index: usize,
    },
    /// The document produced no sentences.
    NothingToRead,
}

/// Result of asking to speak the current sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakStatus {
    Started(UtteranceId),
    /// There is no current sentence; no backend was invoked.
    EmptyContent,
}

/// Something that happened to an utterance, as applied by the orchestrator.
#[derive(Debug)]
pub enum PlaybackEvent {
    Playing {
        id: UtteranceId,
        index: usize,
    },
    Completed {
        id: UtteranceId,
        index: usize,
        /// New current index when the completion auto-advanced.
        advanced_to: Option<usize>,
    },
    Failed {
        id: UtteranceId,
        index: usize,
        error: VoxError,
    },
    Cancelled {
        id: UtteranceId,
    },
    /// A report for a take that is no longer current.
    Discarded {
        id: UtteranceId,
    },
}

/// Final result of [`PlaybackOrchestrator::speak_current_and_wait`].
#[derive(Debug)]
pub enum SpeakOutcome {
    EmptyContent,
    Completed {
        index: usize,
        advanced_to: Option<usize>,
    },
    Failed(VoxError),
    Cancelled,
}

#[derive(Debug)]
enum Report {
    Playing(UtteranceId),
    Finished(UtteranceId, SpeechOutcome),
}

struct Take {
    id: UtteranceId,
    index: usize,
    auto_advance: bool,
    cancel: CancellationToken,
    provider: Arc<dyn SpeechProvider>,
}

/// Drives one reading session through the active speech backend.
pub struct PlaybackOrchestrator {
    catalog: Arc<dyn BookCatalog>,
    progress: Arc<dyn ProgressStore>,
    extractor: ContentExtractor,
    registry: ProviderRegistry,
    settings: SpeechSettings,
    session: Option<ReadingSession>,
    current: Option<Take>,
    next_utterance: u64,
    state_tx: watch::Sender<PlaybackState>,
    state_rx: watch::Receiver<PlaybackState>,
    reports_tx: mpsc::UnboundedSender<Report>,
    reports_rx: mpsc::UnboundedReceiver<Report>,
}

impl PlaybackOrchestrator {
    pub fn new(
        catalog: Arc<dyn BookCatalog>,
        progress: Arc<dyn ProgressStore>,
        registry: ProviderRegistry,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(PlaybackState::Idle);
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        Self {
            catalog,
            progress,
            extractor: ContentExtractor::default(),
            registry,
            settings: SpeechSettings::default(),
            session: None,
            current: None,
            next_utterance: 0,
            state_tx,
            state_rx,
            reports_tx,
            reports_rx,
        }
    }

    pub fn with_extractor(mut self, extractor: ContentExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_settings(mut self, settings: SpeechSettings) -> Self {
        self.settings = settings;
        self
    }

    // -- Observation ----------------------------------------------------

    pub fn state(&self) -> PlaybackState {
        self.state_rx.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<PlaybackState> {
        self.state_rx.clone()
    }

    pub fn session(&self) -> Option<&ReadingSession> {
        self.session.as_ref()
    }

    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        self.session
            .as_ref()
            .map(|session| SessionSnapshot::capture(session, self.state()))
    }

    /// Sentences of the loaded book; empty when nothing is loaded.
    pub fn sentences(&self) -> &[Sentence] {
        self.session
            .as_ref()
            .map(ReadingSession::sentences)
            .unwrap_or_default()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.session.as_ref().map(ReadingSession::current_index)
    }

    pub fn settings(&self) -> &SpeechSettings {
        &self.settings
    }

    /// Id of the utterance in flight, if any.
    pub fn in_flight(&self) -> Option<UtteranceId> {
        self.current.as_ref().map(|take| take.id)
    }

    pub fn engines(&self) -> Vec<EngineOption> {
        self.registry.engines()
    }

    // -- Commands -------------------------------------------------------

    /// Load `book_id` and position the cursor at its saved progress.
    ///
    /// Any previous session is discarded; a failed load leaves no session.
    pub async fn load_book(&mut self, book_id: u64) -> Result<LoadStatus, VoxError> {
        self.stop().await;
        self.session = None;

        let book = self
            .catalog
            .get(book_id)?
            .ok_or(VoxError::BookNotFound(book_id))?;
        let raw = self.extractor.extract_blocking(book.source()).await?;

        if let Some(expected) = book.fingerprint.clone() {
            let locator = book.source_ref.clone();
            let actual = tokio::task::spawn_blocking(move || fingerprint_file(&locator))
                .await
                .ok()
                .flatten();
            if actual.is_some_and(|actual| actual != expected) {
                tracing::warn!(
                    book_id,
                    "Source changed since it was added; saved position may not line up"
                );
            }
        }

        let document = segment_document(&raw);
        let stored = self.progress.get(book_id)?;
        let session = ReadingSession::new(book, document, stored);
        let status = if session.is_empty() {
            tracing::info!(book_id, "Book has nothing to read");
            LoadStatus::NothingToRead
        } else {
            if session.current_index() != stored {
                tracing::debug!(
                    book_id,
                    stored,
                    index = session.current_index(),
                    "Clamped stored position"
                );
            }
            tracing::info!(
                book_id,
                sentences = session.len(),
                index = session.current_index(),
                "Book loaded"
            );
            LoadStatus::Ready {
                sentence_count: session.len(),
                current_index: session.current_index(),
            }
        };
        self.session = Some(session);
        Ok(status)
    }

    /// Start speaking the current sentence.
    ///
    /// Returns as soon as the utterance is running; its outcome arrives
    /// through [`next_event`](Self::next_event). A take already in flight is
    /// stopped first.
    pub async fn speak_current(&mut self, auto_advance: bool) -> Result<SpeakStatus, VoxError> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| VoxError::InvalidState("No book loaded".to_string()))?;
        let Some(sentence) = session.current_sentence() else {
            tracing::debug!(book_id = session.book().id, "Nothing to speak");
            return Ok(SpeakStatus::EmptyContent);
        };
        let book_id = session.book().id;
        let index = sentence.index;
        let request = SpeechRequest::new(sentence.text.clone(), &self.settings);

        self.stop().await;

        let provider = match self.registry.activate(&self.settings).await {
            Ok(provider) => provider,
            Err(e) => {
                self.fail(&e);
                return Err(e);
            }
        };

        self.next_utterance += 1;
        let id = UtteranceId(self.next_utterance);
        let cancel = CancellationToken::new();
        self.set_state(PlaybackState::Synthesizing);

        let span = tracing::info_span!(
            "utterance",
            utterance = %id,
            book_id,
            index,
            provider = %provider.kind()
        );
        let task_provider = Arc::clone(&provider);
        let task_cancel = cancel.clone();
        let reports = self.reports_tx.clone();
        let playing = self.reports_tx.clone();
        let utterance = tokio::spawn(
            async move {
                let mut ctx = UtteranceContext::new(id, task_cancel).on_playing(move || {
                    let _ = playing.send(Report::Playing(id));
                });
                task_provider.synthesize_and_play(&request, &mut ctx).await
            }
            .instrument(span.clone()),
        );
        // A backend that panics still has to produce a terminal report.
        tokio::spawn(
            async move {
                let outcome = match utterance.await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::error!(error = %e, "Utterance task ended abnormally");
                        SpeechOutcome::Failed(VoxError::InvalidState(format!(
                            "Utterance task ended abnormally: {e}"
                        )))
                    }
                };
                tracing::debug!(outcome = ?outcome, "Utterance finished");
                let _ = reports.send(Report::Finished(id, outcome));
            }
            .instrument(span),
        );

        self.current = Some(Take {
            id,
            index,
            auto_advance,
            cancel,
            provider,
        });
        Ok(SpeakStatus::Started(id))
    }

    /// Wait for the next utterance report and apply it.
    ///
    /// `None` when nothing is in flight and no reports are pending.
    pub async fn next_event(&mut self) -> Option<PlaybackEvent> {
        let report = if self.current.is_some() {
            self.reports_rx.recv().await?
        } else {
            self.reports_rx.try_recv().ok()?
        };
        Some(self.apply(report))
    }

    /// Speak the current sentence and wait for its outcome.
    pub async fn speak_current_and_wait(
        &mut self,
        auto_advance: bool,
    ) -> Result<SpeakOutcome, VoxError> {
        let id = match self.speak_current(auto_advance).await? {
            SpeakStatus::EmptyContent => return Ok(SpeakOutcome::EmptyContent),
            SpeakStatus::Started(id) => id,
        };
        while let Some(event) = self.next_event().await {
            match event {
                PlaybackEvent::Completed {
                    id: done,
                    index,
                    advanced_to,
                } if done == id => return Ok(SpeakOutcome::Completed { index, advanced_to }),
                PlaybackEvent::Failed { id: done, error, .. } if done == id => {
                    return Ok(SpeakOutcome::Failed(error))
                }
                PlaybackEvent::Cancelled { id: done } if done == id => {
                    return Ok(SpeakOutcome::Cancelled)
                }
                _ => {}
            }
        }
        Ok(SpeakOutcome::Cancelled)
    }

    /// Stop the take in flight. No-op when idle.
    pub async fn stop(&mut self) {
        let Some(take) = self.current.take() else {
            if self.state() != PlaybackState::Idle {
                self.set_state(PlaybackState::Idle);
            }
            return;
        };
        take.cancel.cancel();
        take.provider.stop().await;
        tracing::info!(utterance = %take.id, index = take.index, "Stopped utterance");
        self.set_state(PlaybackState::Stopped);
        self.set_state(PlaybackState::Idle);
    }

    /// Move to the next sentence and commit it. No-op at the last sentence.
    pub fn next(&mut self) -> Result<usize, VoxError> {
        self.step(ReadingSession::advance)
    }

    /// Move to the previous sentence and commit it. No-op at the first one.
    pub fn previous(&mut self) -> Result<usize, VoxError> {
        self.step(ReadingSession::retreat)
    }

    fn step(&mut self, mv: fn(&mut ReadingSession) -> bool) -> Result<usize, VoxError> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| VoxError::InvalidState("No book loaded".to_string()))?;
        if mv(session) {
            let index = session.current_index();
            self.progress.set(session.book().id, index)?;
            session.record_position(index);
            tracing::debug!(book_id = session.book().id, index, "Moved reading position");
        }
        Ok(session.current_index())
    }

    /// Use `settings` from the next `speak_current` on. An utterance in
    /// flight keeps the settings it started with.
    pub fn apply_settings(&mut self, settings: SpeechSettings) -> Result<(), VoxError> {
        settings.validate()?;
        if settings.provider != self.settings.provider {
            tracing::info!(
                from = %self.settings.provider,
                to = %settings.provider,
                "Speech backend will change on next utterance"
            );
        }
        self.settings = settings;
        Ok(())
    }

    /// Voices of the backend the current settings select.
    pub async fn list_voices(&mut self) -> Result<Vec<VoiceOption>, VoxError> {
        let provider = self.registry.activate(&self.settings).await?;
        Ok(provider.list_voices().await)
    }

    /// Stop playback and release the backend.
    pub async fn shutdown(&mut self) {
        self.stop().await;
        self.registry.shutdown().await;
    }

    // -- Internals ------------------------------------------------------

    fn set_state(&self, state: PlaybackState) {
        self.state_tx.send_replace(state);
    }

    fn fail(&self, error: &VoxError) {
        self.set_state(PlaybackState::Failed {
            reason: error.to_string(),
        });
        self.set_state(PlaybackState::Idle);
    }

    fn apply(&mut self, report: Report) -> PlaybackEvent {
        let id = match &report {
            Report::Playing(id) | Report::Finished(id, _) => *id,
        };
        let take = match self.current.take() {
            Some(take) if take.id == id => take,
            other => {
                self.current = other;
                tracing::debug!(utterance = %id, "Discarding report for a stale utterance");
                return PlaybackEvent::Discarded { id };
            }
        };

        match report {
            Report::Playing(_) => {
                let index = take.index;
                self.current = Some(take);
                self.set_state(PlaybackState::Playing);
                PlaybackEvent::Playing { id, index }
            }
            Report::Finished(_, SpeechOutcome::Completed) => {
                let advanced_to = self.commit_completion(&take);
                self.set_state(PlaybackState::Idle);
                PlaybackEvent::Completed {
                    id,
                    index: take.index,
                    advanced_to,
                }
            }
            Report::Finished(_, SpeechOutcome::Cancelled) => {
                self.set_state(PlaybackState::Idle);
                PlaybackEvent::Cancelled { id }
            }
            Report::Finished(_, SpeechOutcome::Failed(error)) => {
                tracing::warn!(utterance = %id, index = take.index, error = %error, "Utterance failed");
                self.fail(&error);
                PlaybackEvent::Failed {
                    id,
                    index: take.index,
                    error,
                }
            }
        }
    }

    /// Commit the spoken index and optionally advance. Skipped when the
    /// cursor moved while the sentence was playing.
    fn commit_completion(&mut self, take: &Take) -> Option<usize> {
        let session = self.session.as_mut()?;
        if session.current_index() != take.index {
            tracing::debug!(
                spoken = take.index,
                current = session.current_index(),
                "Position moved during playback; completion not committed"
            );
            return None;
        }
        let book_id = session.book().id;
        match self.progress.set(book_id, take.index) {
            Ok(()) => session.record_position(take.index),
            Err(e) => tracing::warn!(book_id, error = %e, "Could not commit reading progress"),
        }
        if take.auto_advance && session.advance() {
            Some(session.current_index())
        } else {
            None
        }
    }
}

impl Drop for PlaybackOrchestrator {
    fn drop(&mut self) {
        if let Some(take) = self.current.take() {
            take.cancel.cancel();
        }
    }
}
