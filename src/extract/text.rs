//! Plain text decoding.

use std::path::Path;

use encoding_rs::{Encoding, UTF_8};

use crate::error::ExtractionError;

pub fn extract_text(path: &Path, legacy: &'static Encoding) -> Result<String, ExtractionError> {
    let bytes = super::read_source(path)?;
    let text = decode(&bytes, legacy);
    if text.contains('\0') {
        return Err(ExtractionError::UnsupportedFormat(format!(
            "{} looks like binary data",
            path.display()
        )));
    }
    Ok(text)
}

/// BOM first, then strict UTF-8, then the legacy single-byte encoding.
pub fn decode(bytes: &[u8], legacy: &'static Encoding) -> String {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        let (text, _) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        return text.into_owned();
    }
    if let Ok(text) = std::str::from_utf8(bytes) {
        return text.to_string();
    }
    tracing::debug!(encoding = legacy.name(), "Text is not UTF-8, using legacy encoding");
    let (text, _) = legacy.decode_without_bom_handling(bytes);
    text.into_owned()
}
