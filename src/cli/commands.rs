//! CLI command handlers.

use std::path::Path;
use std::sync::Arc;

use crate::config::VoxConfig;
use crate::error::VoxError;
use crate::extract::ContentExtractor;
use crate::library::{BookCatalog, CatalogProgressStore, FileCatalog, NewBook};
use crate::playback::{LoadStatus, PlaybackOrchestrator, SpeakOutcome};
use crate::settings::{FileSettingsStore, SpeechSettings};
use crate::speech::ProviderRegistry;

/// Everything a command needs, built from the layered configuration.
pub struct AppContext {
    pub config: VoxConfig,
    pub catalog: Arc<dyn BookCatalog>,
    pub settings_store: FileSettingsStore,
}

impl AppContext {
    pub fn load() -> Result<Self, VoxError> {
        let config = VoxConfig::load()?;
        tracing::debug!(data_dir = %config.data_dir.display(), "Loaded configuration");
        Ok(Self {
            catalog: Arc::new(FileCatalog::new(config.library_path())),
            settings_store: FileSettingsStore::new(config.settings_path()),
            config,
        })
    }

    /// Stored settings with environment credentials filling the gaps.
    pub fn speech_settings(&self) -> Result<SpeechSettings, VoxError> {
        Ok(SpeechSettings::load(&self.settings_store)?
            .with_fallback_credentials(&self.config.credentials))
    }

    pub fn orchestrator(&self) -> Result<PlaybackOrchestrator, VoxError> {
        let progress = Arc::new(CatalogProgressStore::new(Arc::clone(&self.catalog)));
        let mut player = PlaybackOrchestrator::new(
            Arc::clone(&self.catalog),
            progress,
            ProviderRegistry::from_config(&self.config),
        )
        .with_extractor(ContentExtractor::new(&self.config.legacy_encoding)?);
        player.apply_settings(self.speech_settings()?)?;
        Ok(player)
    }
}

pub fn handle_add(
    ctx: &AppContext,
    path: &Path,
    title: Option<String>,
    mime: Option<String>,
) -> Result<(), VoxError> {
    if !path.exists() {
        return Err(VoxError::InvalidArgument(format!(
            "No such file: {}",
            path.display()
        )));
    }
    let path = path.canonicalize()?;
    let mut new = NewBook::from_document(path, mime);
    if let Some(title) = title {
        new.title = title;
    }
    let book = ctx.catalog.add(new)?;
    println!("Added #{} {} ({})", book.id, book.title, book.content_kind);
    Ok(())
}

pub fn handle_list(ctx: &AppContext) -> Result<(), VoxError> {
    let books = ctx.catalog.list()?;
    if books.is_empty() {
        println!("Library is empty. Add a book with `voxbook add <path>`.");
        return Ok(());
    }
    for book in books {
        println!(
            "{:>4}  {:<5}  sentence {:>5}  {}",
            book.id, book.content_kind, book.last_position, book.title
        );
    }
    Ok(())
}

pub async fn handle_read(ctx: &AppContext, id: u64, once: bool) -> Result<(), VoxError> {
    let mut player = ctx.orchestrator()?;
    match player.load_book(id).await? {
        LoadStatus::NothingToRead => {
            println!("Nothing to read in this book.");
            return Ok(());
        }
        LoadStatus::Ready {
            sentence_count,
            current_index,
        } => println!(
            "Reading from sentence {} of {sentence_count} (Ctrl-C to stop)",
            current_index + 1
        ),
    }

    let result = read_loop(&mut player, once).await;
    player.shutdown().await;
    result
}

async fn read_loop(player: &mut PlaybackOrchestrator, once: bool) -> Result<(), VoxError> {
    loop {
        if let Some(snapshot) = player.snapshot() {
            if let Some(text) = snapshot.current_text {
                println!("[{}] {text}", snapshot.current_index + 1);
            }
        }

        let outcome = tokio::select! {
            outcome = player.speak_current_and_wait(!once) => Some(outcome?),
            _ = tokio::signal::ctrl_c() => None,
        };

        match outcome {
            None => {
                player.stop().await;
                println!("Stopped.");
                return Ok(());
            }
            Some(SpeakOutcome::Completed {
                advanced_to: Some(_),
                ..
            }) if !once => continue,
            Some(SpeakOutcome::Completed { .. }) => {
                if !once {
                    println!("End of book.");
                }
                return Ok(());
            }
            Some(SpeakOutcome::Failed(e)) => return Err(e),
            Some(SpeakOutcome::Cancelled) | Some(SpeakOutcome::EmptyContent) => return Ok(()),
        }
    }
}

pub async fn handle_voices(ctx: &AppContext) -> Result<(), VoxError> {
    let mut player = ctx.orchestrator()?;
    for engine in player.engines() {
        let marker = if engine.kind == player.settings().provider {
            "*"
        } else {
            " "
        };
        let availability = if engine.available { "" } else { " (not built)" };
        println!("{marker} {:<7} {}{availability}", engine.kind, engine.label);
    }

    let voices = player.list_voices().await?;
    player.shutdown().await;
    if voices.is_empty() {
        println!("No voices reported by the active backend.");
    }
    for voice in voices {
        println!("  {:<24} {:<10} {}", voice.id, voice.locale, voice.label);
    }
    Ok(())
}

pub fn handle_settings_show(ctx: &AppContext) -> Result<(), VoxError> {
    for (key, value) in ctx.speech_settings()?.describe() {
        println!("{key} = {value}");
    }
    Ok(())
}

pub fn handle_settings_set(ctx: &AppContext, key: &str, value: &str) -> Result<(), VoxError> {
    let mut settings = SpeechSettings::load(&ctx.settings_store)?;
    settings.set_field(key, value)?;
    settings.save(&ctx.settings_store)?;
    println!("{key} updated");
    Ok(())
}
