//! EPUB text extraction in spine order.

use std::path::Path;

use ::epub::doc::EpubDoc;
use scraper::{ElementRef, Html, Node};

use crate::error::ExtractionError;

const CHAPTER_SEPARATOR: &str = "\n\n";

const SKIPPED: &[&str] = &["head", "script", "style", "title", "svg"];

const BLOCKS: &[&str] = &[
    "p", "div", "section", "article", "br", "li", "ul", "ol", "h1", "h2", "h3", "h4", "h5",
    "h6", "blockquote", "pre", "tr", "table", "hr", "dd", "dt", "figcaption",
];

pub fn extract_epub(path: &Path) -> Result<String, ExtractionError> {
    let locator = path.display().to_string();
    if !path.exists() {
        return Err(ExtractionError::SourceUnavailable {
            locator,
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        });
    }
    let mut doc = EpubDoc::new(path).map_err(|e| ExtractionError::CorruptSource {
        locator: locator.clone(),
        reason: e.to_string(),
    })?;

    let chapters = doc.get_num_pages();
    if chapters == 0 {
        return Err(ExtractionError::EmptySource(locator));
    }

    let mut parts = Vec::with_capacity(chapters);
    for index in 0..chapters {
        if !doc.set_current_page(index) {
            tracing::warn!(source = %locator, chapter = index, "Skipping unreachable EPUB chapter");
            continue;
        }
        let Some((html, _mime)) = doc.get_current_str() else {
            tracing::warn!(source = %locator, chapter = index, "Skipping undecodable EPUB chapter");
            continue;
        };
        let text = html_to_text(&html);
        if !text.trim().is_empty() {
            parts.push(text);
        }
    }

    Ok(parts.join(CHAPTER_SEPARATOR))
}

/// Title from the package metadata, if the archive opens and has one.
pub fn probe_title(path: &Path) -> Option<String> {
    EpubDoc::new(path)
        .ok()?
        .mdata("title")
        .map(|title| title.trim().to_string())
        .filter(|title| !title.is_empty())
}

/// Strip markup, keeping a line break around block-level elements.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut out = String::new();
    walk(document.root_element(), &mut out);
    out.trim().to_string()
}

fn walk(element: ElementRef<'_>, out: &mut String) {
    let name = element.value().name();
    if SKIPPED.contains(&name) {
        return;
    }
    let block = BLOCKS.contains(&name);
    if block {
        out.push('\n');
    }
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    walk(child, out);
                }
            }
            _ => {}
        }
    }
    if block {
        out.push('\n');
    }
}
