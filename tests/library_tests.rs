mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;

use common::{registry_with, MockProvider};
use voxbook::library::{BookCatalog, CatalogProgressStore, FileCatalog, NewBook, ProgressStore};
use voxbook::playback::{LoadStatus, PlaybackOrchestrator};
use voxbook::settings::{FileSettingsStore, ProviderKind, SettingsStore, SpeechSettings};

fn orchestrator(catalog: Arc<dyn BookCatalog>, mock: Arc<MockProvider>) -> PlaybackOrchestrator {
    let progress = Arc::new(CatalogProgressStore::new(Arc::clone(&catalog)));
    PlaybackOrchestrator::new(catalog, progress, registry_with(ProviderKind::Local, mock))
}

#[tokio::test]
async fn progress_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("masal.txt");
    std::fs::write(&source, "Bir varmış. Bir yokmuş. Evvel zaman içinde.").unwrap();
    let library = dir.path().join("library.toml");

    let id = {
        let catalog: Arc<dyn BookCatalog> = Arc::new(FileCatalog::new(&library));
        let id = catalog.add(NewBook::from_document(&source, None)).unwrap().id;
        let mut player = orchestrator(catalog, Arc::new(MockProvider::new(ProviderKind::Local)));
        player.load_book(id).await.unwrap();
        player.speak_current_and_wait(true).await.unwrap();
        player.speak_current_and_wait(true).await.unwrap();
        player.shutdown().await;
        id
    };

    let catalog: Arc<dyn BookCatalog> = Arc::new(FileCatalog::new(&library));
    let book = catalog.get(id).unwrap().unwrap();
    assert_eq!(book.title, "masal");
    assert_eq!(book.last_position, 1);

    let mock = Arc::new(MockProvider::new(ProviderKind::Local));
    let mut player = orchestrator(Arc::clone(&catalog), Arc::clone(&mock));
    let status = player.load_book(id).await.unwrap();
    assert_eq!(
        status,
        LoadStatus::Ready {
            sentence_count: 3,
            current_index: 1
        }
    );

    player.speak_current_and_wait(false).await.unwrap();
    assert_eq!(mock.spoken(), vec!["Bir yokmuş."]);
}

#[tokio::test]
async fn progress_for_unknown_book_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let catalog: Arc<dyn BookCatalog> = Arc::new(FileCatalog::new(dir.path().join("library.toml")));
    let progress = CatalogProgressStore::new(catalog);

    assert_eq!(progress.get(9).unwrap(), 0);
    assert!(progress.set(9, 3).is_err());
}

#[test]
fn speech_settings_persist_in_the_settings_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.toml");
    let store = FileSettingsStore::new(&path);

    let mut settings = SpeechSettings::default();
    settings.set_field("tts_provider", "azure").unwrap();
    settings.set_field("tts_rate", "1.25").unwrap();
    settings.set_field("azure_region", "westeurope").unwrap();
    settings.save(&store).unwrap();

    let reopened = FileSettingsStore::new(&path);
    let loaded = SpeechSettings::load(&reopened).unwrap();
    assert_eq!(loaded.provider, ProviderKind::Azure);
    assert_eq!(loaded.rate, 1.25);
    assert_eq!(loaded.azure.region, "westeurope");
    assert_eq!(
        reopened.get_string("tts_provider").unwrap().as_deref(),
        Some("azure")
    );
}
