//! HTML extraction.

use std::path::Path;

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};

use super::{ExtractError, ExtractedText};

static BODY: Lazy<Selector> = Lazy::new(|| Selector::parse("body").unwrap());
static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("head > title, title").unwrap());
static ABSTRACT_META: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"meta[name="citation_abstract"], meta[name="description"]"#).unwrap()
});

/// Elements whose text is never document text.
const NON_TEXT: &[&str] = &["script", "style", "noscript", "template"];

pub fn extract_html(path: &Path) -> Result<ExtractedText, ExtractError> {
    let bytes = std::fs::read(path).map_err(|e| ExtractError::unreadable(path, e))?;
    Ok(extract_html_str(&String::from_utf8_lossy(&bytes)))
}

/// Parse an HTML document. Never fails: html5ever recovers from any input.
///
/// Must run on a blocking thread; scraper's tree is not `Send`.
pub fn extract_html_str(html: &str) -> ExtractedText {
    let document = Html::parse_document(html);
    let mut extracted = ExtractedText::default();

    if let Some(body) = document.select(&BODY).next() {
        extracted.fulltext = body_text(body);
    }

    if let Some(title) = document.select(&TITLE).next() {
        let title: String = title.text().collect();
        extracted.insert_section("title", &title);
    }

    // citation_abstract is listed first in the selector but select() yields
    // document order, so prefer it explicitly.
    let metas: Vec<ElementRef> = document.select(&ABSTRACT_META).collect();
    let abstract_ = metas
        .iter()
        .find(|m| m.value().attr("name") == Some("citation_abstract"))
        .or_else(|| metas.first())
        .and_then(|m| m.value().attr("content"));
    if let Some(abstract_) = abstract_ {
        extracted.insert_section("abstract", abstract_);
    }

    extracted
}

/// Text nodes under `body` in document order, verbatim, skipping scripts and styles.
fn body_text(body: ElementRef) -> String {
    let mut out = String::new();
    for node in body.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| NON_TEXT.contains(&e.name()))
        });
        if !hidden {
            out.push_str(text);
        }
    }
    out
}
