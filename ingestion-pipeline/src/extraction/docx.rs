use std::{
    collections::HashMap,
    io::{Cursor, Read},
};

use bytes::Bytes;
use common::error::AppError;
use quick_xml::{events::Event, Reader};
use tracing::warn;
use zip::ZipArchive;

use super::{EmbeddedImages, ExtractedContent, ExtractedImage};

const DOCUMENT_PART: &str = "word/document.xml";
const RELATIONSHIPS_PART: &str = "word/_rels/document.xml.rels";
/// Decompressed size caps; archive entries can inflate far beyond the upload size.
const MAX_PART_BYTES: u64 = 64 * 1024 * 1024;
const MAX_IMAGE_BYTES: u64 = 16 * 1024 * 1024;

/// Raw text of a Word document plus the images it references, in reading order.
pub(super) fn extract(bytes: &[u8]) -> Result<ExtractedContent, AppError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|err| AppError::Extraction(format!("Failed to open DOCX archive: {err}")))?;

    let document_xml = read_part(&mut archive, DOCUMENT_PART)?
        .ok_or_else(|| AppError::Extraction("DOCX archive has no word/document.xml".into()))?;
    let body = parse_body(&document_xml)?;

    let relationships = match read_part(&mut archive, RELATIONSHIPS_PART)? {
        Some(xml) => parse_relationships(&xml)?,
        None => HashMap::new(),
    };

    let mut images = Vec::new();
    for embed_id in &body.image_refs {
        let Some(target) = relationships.get(embed_id) else {
            warn!(embed_id = %embed_id, "DOCX image reference has no relationship");
            continue;
        };
        let path = resolve_target(target);
        match read_binary(&mut archive, &path, MAX_IMAGE_BYTES) {
            Ok(Some(data)) => images.push(ExtractedImage {
                index: images.len(),
                data: Bytes::from(data),
            }),
            Ok(None) => warn!(path = %path, "DOCX image part missing from archive"),
            Err(err) => warn!(path = %path, error = %err, "Failed to read DOCX image"),
        }
    }

    Ok(ExtractedContent {
        text: body.text.trim().to_string(),
        images: EmbeddedImages::Extracted(images),
    })
}

struct DocumentBody {
    text: String,
    image_refs: Vec<String>,
}

fn read_part<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Option<String>, AppError> {
    read_binary(archive, name, MAX_PART_BYTES)
        .map(|data| data.map(|d| String::from_utf8_lossy(&d).into_owned()))
}

/// Read one entry, failing once more than `limit` decompressed bytes come out of it.
fn read_binary<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
    limit: u64,
) -> Result<Option<Vec<u8>>, AppError> {
    let file = match archive.by_name(name) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(err) => return Err(AppError::Extraction(format!("Failed to read {name}: {err}"))),
    };
    let mut data = Vec::new();
    file.take(limit.saturating_add(1))
        .read_to_end(&mut data)
        .map_err(|err| AppError::Extraction(format!("Failed to read {name}: {err}")))?;
    if u64::try_from(data.len()).unwrap_or(u64::MAX) > limit {
        return Err(AppError::Extraction(format!(
            "{name} exceeds the {limit} byte extraction limit"
        )));
    }
    Ok(Some(data))
}

/// Walk `word/document.xml`: text runs, tabs and breaks, paragraphs separated by blank lines,
/// and the relationship ids of embedded pictures.
fn parse_body(xml: &str) -> Result<DocumentBody, AppError> {
    let mut reader = Reader::from_str(xml);
    let mut text = String::new();
    let mut image_refs = Vec::new();
    let mut in_text_run = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) => match element.local_name().as_ref() {
                b"t" => in_text_run = true,
                b"blip" => collect_embed(&element, &mut image_refs),
                _ => {}
            },
            Ok(Event::Empty(element)) => match element.local_name().as_ref() {
                b"tab" => text.push('\t'),
                b"br" | b"cr" => text.push('\n'),
                b"blip" => collect_embed(&element, &mut image_refs),
                _ => {}
            },
            Ok(Event::Text(content)) if in_text_run => {
                let unescaped = content
                    .unescape()
                    .map_err(|err| AppError::Extraction(format!("Malformed DOCX text: {err}")))?;
                text.push_str(&unescaped);
            }
            Ok(Event::End(element)) => match element.local_name().as_ref() {
                b"t" => in_text_run = false,
                b"p" => text.push_str("\n\n"),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => {
                return Err(AppError::Extraction(format!(
                    "Malformed DOCX document at position {}: {err}",
                    reader.buffer_position()
                )))
            }
        }
    }

    Ok(DocumentBody { text, image_refs })
}

fn collect_embed(element: &quick_xml::events::BytesStart<'_>, image_refs: &mut Vec<String>) {
    for attribute in element.attributes().flatten() {
        if attribute.key.local_name().as_ref() == b"embed" {
            if let Ok(value) = attribute.unescape_value() {
                image_refs.push(value.into_owned());
            }
        }
    }
}

fn parse_relationships(xml: &str) -> Result<HashMap<String, String>, AppError> {
    let mut reader = Reader::from_str(xml);
    let mut relationships = HashMap::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(element) | Event::Empty(element))
                if element.local_name().as_ref() == b"Relationship" =>
            {
                let mut id = None;
                let mut target = None;
                for attribute in element.attributes().flatten() {
                    let value = attribute
                        .unescape_value()
                        .map(|v| v.into_owned())
                        .unwrap_or_default();
                    match attribute.key.as_ref() {
                        b"Id" => id = Some(value),
                        b"Target" => target = Some(value),
                        _ => {}
                    }
                }
                if let (Some(id), Some(target)) = (id, target) {
                    relationships.insert(id, target);
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => {
                return Err(AppError::Extraction(format!(
                    "Malformed DOCX relationships: {err}"
                )))
            }
        }
    }

    Ok(relationships)
}

/// Relationship targets are relative to `word/` unless absolute within the package.
fn resolve_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("word/{target}"),
    }
}
