//! Document sources to raw text.
//!
//! Format is chosen by the declared MIME hint first and the file suffix
//! second. Extraction only reads the source.

pub mod epub;
pub mod pdf;
pub mod text;

use std::path::{Path, PathBuf};

use encoding_rs::Encoding;

use crate::error::{ExtractionError, VoxError};
use crate::library::ContentKind;

/// A document locator plus an optional declared content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSource {
    pub locator: PathBuf,
    pub mime_hint: Option<String>,
}

impl DocumentSource {
    pub fn new(locator: impl Into<PathBuf>) -> Self {
        Self {
            locator: locator.into(),
            mime_hint: None,
        }
    }

    pub fn with_mime_hint(mut self, mime: impl Into<String>) -> Self {
        self.mime_hint = Some(mime.into());
        self
    }

    pub fn display_name(&self) -> String {
        self.locator.display().to_string()
    }
}

/// Turns documents into raw text.
#[derive(Debug, Clone, Copy)]
pub struct ContentExtractor {
    legacy_encoding: &'static Encoding,
}

impl Default for ContentExtractor {
    fn default() -> Self {
        Self {
            legacy_encoding: encoding_rs::WINDOWS_1254,
        }
    }
}

impl ContentExtractor {
    /// `legacy_encoding` is a WHATWG label tried for text files that are not UTF-8.
    pub fn new(legacy_encoding: &str) -> Result<Self, VoxError> {
        let legacy_encoding = Encoding::for_label(legacy_encoding.trim().as_bytes())
            .ok_or_else(|| {
                VoxError::Configuration(format!("Unknown text encoding '{legacy_encoding}'"))
            })?;
        Ok(Self { legacy_encoding })
    }

    pub fn legacy_encoding(&self) -> &'static Encoding {
        self.legacy_encoding
    }

    /// Extract raw text from `source`.
    pub fn extract(&self, source: &DocumentSource) -> Result<String, ExtractionError> {
        if let Some(mime) = source.mime_hint.as_deref() {
            reject_media_mime(mime)?;
        }
        let kind = ContentKind::detect(&source.locator, source.mime_hint.as_deref());
        tracing::debug!(source = %source.display_name(), kind = %kind, "Extracting document");

        match kind {
            ContentKind::Text => text::extract_text(&source.locator, self.legacy_encoding),
            ContentKind::Pdf => pdf::extract_pdf(&source.locator),
            ContentKind::Epub => epub::extract_epub(&source.locator),
        }
    }

    /// [`extract`](Self::extract) on the blocking pool.
    pub async fn extract_blocking(&self, source: DocumentSource) -> Result<String, VoxError> {
        let extractor = *self;
        tokio::task::spawn_blocking(move || extractor.extract(&source))
            .await
            .map_err(|e| VoxError::InvalidState(format!("Extraction task failed: {e}")))?
            .map_err(VoxError::from)
    }
}

fn reject_media_mime(mime: &str) -> Result<(), ExtractionError> {
    let top = mime.split('/').next().unwrap_or_default().trim();
    if ["image", "audio", "video"]
        .iter()
        .any(|media| top.eq_ignore_ascii_case(media))
    {
        return Err(ExtractionError::UnsupportedFormat(mime.to_string()));
    }
    Ok(())
}

pub(crate) fn read_source(path: &Path) -> Result<Vec<u8>, ExtractionError> {
    std::fs::read(path).map_err(|source| ExtractionError::SourceUnavailable {
        locator: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn unknown_encoding_label_is_a_configuration_error() {
        assert!(matches!(
            ContentExtractor::new("klingon-8"),
            Err(VoxError::Configuration(_))
        ));
        assert_eq!(
            ContentExtractor::new("latin5").unwrap().legacy_encoding(),
            encoding_rs::WINDOWS_1254
        );
    }

    #[test]
    fn media_mime_hints_are_unsupported() {
        let source = DocumentSource::new("cover.txt").with_mime_hint("image/png");
        let err = ContentExtractor::default().extract(&source).unwrap_err();
        assert!(matches!(err, ExtractionError::UnsupportedFormat(_)));
    }

    #[test]
    fn missing_file_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let source = DocumentSource::new(dir.path().join("gone.txt"));
        let err = ContentExtractor::default().extract(&source).unwrap_err();
        assert!(matches!(err, ExtractionError::SourceUnavailable { .. }));
    }

    #[test]
    fn mime_hint_routes_suffixless_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("download");
        std::fs::write(&path, b"not a pdf at all").unwrap();

        let source = DocumentSource::new(&path).with_mime_hint("application/pdf");
        let err = ContentExtractor::default().extract(&source).unwrap_err();
        assert!(matches!(err, ExtractionError::CorruptSource { .. }));

        let plain = DocumentSource::new(&path);
        assert_eq!(
            ContentExtractor::default().extract(&plain).unwrap(),
            "not a pdf at all"
        );
    }

    #[tokio::test]
    async fn blocking_extraction_matches_direct_extraction() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("book.txt");
        std::fs::write(&path, "One. Two.").unwrap();

        let extractor = ContentExtractor::default();
        let source = DocumentSource::new(&path);
        let direct = extractor.extract(&source).unwrap();
        let pooled = extractor.extract_blocking(source).await.unwrap();

        assert_eq!(direct, pooled);
    }
}
