//! Convenience re-exports for common use.

pub use crate::config::VoxConfig;
pub use crate::error::{ExtractionError, Result, VoxError};
pub use crate::extract::{ContentExtractor, DocumentSource};
pub use crate::library::{
    Book, BookCatalog, CatalogProgressStore, ContentKind, FileCatalog, MemoryCatalog,
    MemoryProgressStore, NewBook, ProgressStore,
};
pub use crate::playback::{
    LoadStatus, PlaybackEvent, PlaybackOrchestrator, PlaybackState, SpeakOutcome, SpeakStatus,
};
pub use crate::segment::{segment, Sentence};
pub use crate::settings::{
    FileSettingsStore, MemorySettingsStore, ProviderKind, SettingsStore, SpeechSettings,
};
pub use crate::speech::{
    ProviderRegistry, SpeechOutcome, SpeechProvider, SpeechRequest, UtteranceContext, VoiceOption,
};
