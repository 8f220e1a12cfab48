//! Voxbook: read books aloud, one sentence at a time.
//!
//! Documents (plain text, PDF, EPUB) are extracted to raw text, segmented into
//! a deterministic sentence sequence and spoken through a pluggable speech
//! backend (an on-device engine or a cloud service). Reading progress is a
//! sentence index that survives backend switches and re-reads.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use voxbook::prelude::*;
//!
//! # async fn example() -> voxbook::error::Result<()> {
//! let config = VoxConfig::load()?;
//! let catalog: Arc<dyn BookCatalog> = Arc::new(FileCatalog::new(config.library_path()));
//! let book = catalog.add(NewBook::from_document("kitap.epub", None))?;
//!
//! let progress = Arc::new(CatalogProgressStore::new(Arc::clone(&catalog)));
//! let mut player = PlaybackOrchestrator::new(catalog, progress, ProviderRegistry::from_config(&config));
//! player.load_book(book.id).await?;
//! player.speak_current_and_wait(true).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod extract;
pub mod library;
pub mod playback;
pub mod prelude;
pub mod segment;
pub mod settings;
pub mod speech;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;
