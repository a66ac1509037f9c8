//! Structured-markup (XML) extraction for JATS and Elsevier article dialects.

use std::borrow::Cow;
use std::path::Path;

use quick_xml::Reader;
use quick_xml::events::Event;

use super::{ExtractError, ExtractedText};
use crate::MarkupDialect;

/// Element names the dialect uses for the parts we pull out.
struct Elements {
    body: &'static [u8],
    title: &'static [u8],
    abstract_: &'static [u8],
    acknowledgements: &'static [u8],
    reference: &'static [u8],
}

fn elements(dialect: MarkupDialect) -> Elements {
    match dialect {
        MarkupDialect::Jats => Elements {
            body: b"body",
            title: b"article-title",
            abstract_: b"abstract",
            acknowledgements: b"ack",
            reference: b"ref",
        },
        MarkupDialect::Elsevier => Elements {
            body: b"ce:sections",
            title: b"ce:title",
            abstract_: b"ce:abstract",
            acknowledgements: b"ce:acknowledgment",
            reference: b"ce:bib-reference",
        },
    }
}

pub fn extract_markup(path: &Path, dialect: MarkupDialect) -> Result<ExtractedText, ExtractError> {
    let bytes = std::fs::read(path).map_err(|e| ExtractError::unreadable(path, e))?;
    extract_markup_bytes(&bytes, dialect)
}

/// Which open elements of interest we are currently inside.
#[derive(Default)]
struct Depths {
    body: usize,
    title: usize,
    abstract_: usize,
    acknowledgements: usize,
    reference: usize,
}

#[derive(Default)]
struct Buffers {
    body: String,
    all: String,
    title: Option<String>,
    title_buf: String,
    abstract_: Option<String>,
    abstract_buf: String,
    acknowledgements: Vec<String>,
    ack_buf: String,
    references: Vec<String>,
    ref_buf: String,
}

pub fn extract_markup_bytes(
    xml: &[u8],
    dialect: MarkupDialect,
) -> Result<ExtractedText, ExtractError> {
    let names = elements(dialect);
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);

    let mut open = 0usize;
    let mut seen_body = false;
    let mut depth = Depths::default();
    let mut out = Buffers::default();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                open += 1;
                let name = e.name();
                let name = name.as_ref();
                if name == names.body {
                    depth.body += 1;
                    seen_body = true;
                } else if name == names.title {
                    depth.title += 1;
                } else if name == names.abstract_ {
                    depth.abstract_ += 1;
                } else if name == names.acknowledgements {
                    depth.acknowledgements += 1;
                } else if name == names.reference {
                    depth.reference += 1;
                }
            }
            Ok(Event::End(e)) => {
                open = open.saturating_sub(1);
                let name = e.name();
                let name = name.as_ref();
                if name == names.body {
                    depth.body = depth.body.saturating_sub(1);
                } else if name == names.title {
                    depth.title = depth.title.saturating_sub(1);
                    if depth.title == 0 {
                        let text = std::mem::take(&mut out.title_buf);
                        if out.title.is_none() && !text.trim().is_empty() {
                            out.title = Some(text);
                        }
                    }
                } else if name == names.abstract_ {
                    depth.abstract_ = depth.abstract_.saturating_sub(1);
                    if depth.abstract_ == 0 {
                        let text = std::mem::take(&mut out.abstract_buf);
                        if out.abstract_.is_none() && !text.trim().is_empty() {
                            out.abstract_ = Some(text);
                        }
                    }
                } else if name == names.acknowledgements {
                    depth.acknowledgements = depth.acknowledgements.saturating_sub(1);
                    if depth.acknowledgements == 0 {
                        out.acknowledgements.push(std::mem::take(&mut out.ack_buf));
                    }
                } else if name == names.reference {
                    depth.reference = depth.reference.saturating_sub(1);
                    if depth.reference == 0 {
                        out.references.push(std::mem::take(&mut out.ref_buf));
                    }
                }
            }
            Ok(Event::Text(e)) => {
                let text = match e.unescape() {
                    Ok(text) => text,
                    // Undeclared entities (e.g. &nbsp; without a DTD) stay as written.
                    Err(_) => Cow::Owned(String::from_utf8_lossy(&e).into_owned()),
                };
                push_text(&text, &depth, &mut out);
            }
            Ok(Event::CData(e)) => {
                let text = String::from_utf8_lossy(&e);
                push_text(&text, &depth, &mut out);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(ExtractError::Parse(format!(
                    "XML error at byte {}: {e}",
                    reader.error_position()
                )));
            }
        }
        buf.clear();
    }

    if open != 0 {
        return Err(ExtractError::Parse(format!(
            "document ends with {open} unclosed element(s)"
        )));
    }

    let mut extracted = ExtractedText {
        fulltext: if seen_body { out.body } else { out.all },
        ..Default::default()
    };
    // Section titles inside the body are not the article title.
    if let Some(title) = &out.title {
        extracted.insert_section("title", title);
    }
    if let Some(abstract_) = &out.abstract_ {
        extracted.insert_section("abstract", abstract_);
    }
    extracted.insert_section("acknowledgements", &join_trimmed(&out.acknowledgements, "\n\n"));
    extracted.insert_section("references", &join_trimmed(&out.references, "\n"));
    Ok(extracted)
}

fn push_text(text: &str, depth: &Depths, out: &mut Buffers) {
    out.all.push_str(text);
    if depth.body > 0 {
        out.body.push_str(text);
    } else if depth.title > 0 {
        out.title_buf.push_str(text);
    }
    if depth.abstract_ > 0 {
        out.abstract_buf.push_str(text);
    }
    if depth.acknowledgements > 0 {
        out.ack_buf.push_str(text);
    }
    if depth.reference > 0 {
        out.ref_buf.push_str(text);
    }
}

/// Trim each entry, collapse internal whitespace, drop blanks, join.
fn join_trimmed(entries: &[String], sep: &str) -> String {
    entries
        .iter()
        .map(|e| e.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|e| !e.is_empty())
        .collect::<Vec<_>>()
        .join(sep)
}
