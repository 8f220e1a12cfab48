//! Book records and the catalog that stores them.

pub mod progress;

pub use progress::{CatalogProgressStore, MemoryProgressStore, ProgressStore};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strum::{Display, EnumString};

use crate::error::VoxError;
use crate::extract::{self, DocumentSource};

/// Document format of a book.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ContentKind {
    #[default]
    Text,
    Pdf,
    Epub,
}

impl ContentKind {
    /// Sniff the kind from a file suffix; anything unrecognised is plain text.
    pub fn from_locator(locator: &Path) -> Self {
        match locator
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("epub") => Self::Epub,
            Some("pdf") => Self::Pdf,
            _ => Self::Text,
        }
    }

    /// Kind named by a MIME type, if it names one we read.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let mime = mime.split(';').next().unwrap_or_default().trim();
        match mime.to_ascii_lowercase().as_str() {
            "application/epub+zip" => Some(Self::Epub),
            "application/pdf" => Some(Self::Pdf),
            m if m.starts_with("text/") => Some(Self::Text),
            _ => None,
        }
    }

    /// MIME hint first, then the suffix.
    pub fn detect(locator: &Path, mime_hint: Option<&str>) -> Self {
        mime_hint
            .and_then(Self::from_mime)
            .unwrap_or_else(|| Self::from_locator(locator))
    }
}

/// A book in the library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: u64,
    pub title: String,
    pub source_ref: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_hint: Option<String>,
    pub content_kind: ContentKind,
    /// Last committed sentence index.
    #[serde(default)]
    pub last_position: usize,
    pub added_at: DateTime<Utc>,
    /// SHA-256 of the source bytes when the book was added.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

impl Book {
    pub fn source(&self) -> DocumentSource {
        DocumentSource {
            locator: self.source_ref.clone(),
            mime_hint: self.mime_hint.clone(),
        }
    }
}

/// Fields supplied when adding a book.
#[derive(Debug, Clone, Builder)]
pub struct NewBook {
    #[builder(into)]
    pub title: String,
    #[builder(into)]
    pub source_ref: PathBuf,
    #[builder(into)]
    pub mime_hint: Option<String>,
    pub content_kind: Option<ContentKind>,
    pub fingerprint: Option<String>,
}

impl NewBook {
    /// Describe the document at `path`: EPUB metadata title or the file stem,
    /// plus a content fingerprint when the file is readable.
    pub fn from_document(path: impl Into<PathBuf>, mime_hint: Option<String>) -> Self {
        let path = path.into();
        let kind = ContentKind::detect(&path, mime_hint.as_deref());
        let title = match kind {
            ContentKind::Epub => extract::epub::probe_title(&path),
            _ => None,
        }
        .unwrap_or_else(|| title_from_stem(&path));

        Self {
            title,
            fingerprint: fingerprint_file(&path),
            source_ref: path,
            mime_hint,
            content_kind: Some(kind),
        }
    }
}

fn title_from_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .unwrap_or("Untitled")
        .to_string()
}

/// Hex SHA-256 of a file's bytes; `None` when it cannot be read.
pub fn fingerprint_file(path: &Path) -> Option<String> {
    fs::read(path).ok().map(|bytes| fingerprint_bytes(&bytes))
}

pub fn fingerprint_bytes(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Storage for book records.
pub trait BookCatalog: Send + Sync {
    fn add(&self, book: NewBook) -> Result<Book, VoxError>;
    fn list(&self) -> Result<Vec<Book>, VoxError>;
    fn get(&self, id: u64) -> Result<Option<Book>, VoxError>;
    /// Replace an existing record; unknown ids are an error.
    fn update(&self, book: &Book) -> Result<(), VoxError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LibraryFile {
    version: u32,
    next_id: u64,
    #[serde(default)]
    books: Vec<Book>,
}

impl LibraryFile {
    fn insert(&mut self, new: NewBook) -> Book {
        let book = Book {
            id: self.next_id,
            content_kind: new
                .content_kind
                .unwrap_or_else(|| ContentKind::detect(&new.source_ref, new.mime_hint.as_deref())),
            title: new.title,
            source_ref: new.source_ref,
            mime_hint: new.mime_hint,
            last_position: 0,
            added_at: Utc::now(),
            fingerprint: new.fingerprint,
        };
        self.next_id += 1;
        self.books.push(book.clone());
        book
    }

    fn replace(&mut self, book: &Book) -> Result<(), VoxError> {
        let slot = self
            .books
            .iter_mut()
            .find(|b| b.id == book.id)
            .ok_or(VoxError::BookNotFound(book.id))?;
        *slot = book.clone();
        Ok(())
    }
}

/// In-memory catalog.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    inner: Mutex<LibraryFile>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BookCatalog for MemoryCatalog {
    fn add(&self, book: NewBook) -> Result<Book, VoxError> {
        Ok(self
            .inner
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(book))
    }

    fn list(&self) -> Result<Vec<Book>, VoxError> {
        Ok(self
            .inner
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .books
            .clone())
    }

    fn get(&self, id: u64) -> Result<Option<Book>, VoxError> {
        Ok(self
            .inner
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .books
            .iter()
            .find(|b| b.id == id)
            .cloned())
    }

    fn update(&self, book: &Book) -> Result<(), VoxError> {
        self.inner
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .replace(book)
    }
}

/// TOML-backed catalog (`library.toml`).
#[derive(Debug)]
pub struct FileCatalog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn read(&self) -> Result<LibraryFile, VoxError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => Ok(toml::from_str(&raw)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(LibraryFile {
                version: 1,
                ..LibraryFile::default()
            }),
            Err(err) => Err(err.into()),
        }
    }

    fn write(&self, file: &LibraryFile) -> Result<(), VoxError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, toml::to_string(file)?)?;
        Ok(())
    }

    fn modify<T>(&self, f: impl FnOnce(&mut LibraryFile) -> Result<T, VoxError>) -> Result<T, VoxError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut file = self.read()?;
        let value = f(&mut file)?;
        self.write(&file)?;
        Ok(value)
    }
}

impl BookCatalog for FileCatalog {
    fn add(&self, book: NewBook) -> Result<Book, VoxError> {
        let book = self.modify(|file| Ok(file.insert(book)))?;
        tracing::info!(book_id = book.id, title = %book.title, "Added book to library");
        Ok(book)
    }

    fn list(&self) -> Result<Vec<Book>, VoxError> {
        Ok(self.read()?.books)
    }

    fn get(&self, id: u64) -> Result<Option<Book>, VoxError> {
        Ok(self.read()?.books.into_iter().find(|b| b.id == id))
    }

    fn update(&self, book: &Book) -> Result<(), VoxError> {
        self.modify(|file| file.replace(book))
    }
}
