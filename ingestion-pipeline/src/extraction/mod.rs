//! Format-specific conversion of uploaded bytes into plain text and embedded images.

mod docx;
mod spreadsheet;

use std::path::Path;

use bytes::Bytes;
use common::error::AppError;
use regex::Regex;
use tracing::debug;

/// Raw bytes of an image found inside a document, numbered in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedImage {
    pub index: usize,
    pub data: Bytes,
}

/// Whether a format can yield embedded images at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbeddedImages {
    Extracted(Vec<ExtractedImage>),
    /// The extractor for this format reads text only.
    Unsupported,
}

impl EmbeddedImages {
    pub fn none() -> Self {
        Self::Extracted(Vec::new())
    }

    pub fn as_slice(&self) -> &[ExtractedImage] {
        match self {
            Self::Extracted(images) => images,
            Self::Unsupported => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedContent {
    pub text: String,
    pub images: EmbeddedImages,
}

impl ExtractedContent {
    fn text_only(text: String) -> Self {
        Self {
            text,
            images: EmbeddedImages::none(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Docx,
    PlainText,
    Csv,
    Spreadsheet,
    Json,
    Markup,
}

impl DocumentFormat {
    /// Pick the extractor for a file. The declared MIME type wins unless it is generic,
    /// in which case the extension decides.
    pub fn detect(mime_type: &str, file_name: &str) -> Result<Self, AppError> {
        let mime = mime_type.trim().to_ascii_lowercase();
        let extension = Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        let by_mime = Self::from_mime(&mime);
        let by_extension = Self::from_extension(&extension);

        match (by_mime, by_extension) {
            (Some(_), Some(format)) if is_generic_mime(&mime) => Ok(format),
            (Some(format), _) | (None, Some(format)) => Ok(format),
            (None, None) => {
                let label = if extension.is_empty() { mime } else { extension };
                Err(AppError::Extraction(format!("Unsupported file type: {label}")))
            }
        }
    }

    fn from_mime(mime: &str) -> Option<Self> {
        if mime.contains("pdf") {
            Some(Self::Pdf)
        } else if mime.contains("wordprocessingml") {
            Some(Self::Docx)
        } else if mime.contains("csv") {
            Some(Self::Csv)
        } else if mime.contains("spreadsheet") || mime.contains("ms-excel") {
            Some(Self::Spreadsheet)
        } else if mime.contains("json") {
            Some(Self::Json)
        } else if mime.contains("html") || mime.contains("xml") {
            Some(Self::Markup)
        } else if mime.starts_with("text/plain") || mime.starts_with("text/markdown") {
            Some(Self::PlainText)
        } else {
            None
        }
    }

    fn from_extension(extension: &str) -> Option<Self> {
        match extension {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "txt" | "md" | "markdown" => Some(Self::PlainText),
            "csv" => Some(Self::Csv),
            "xlsx" | "xls" | "ods" => Some(Self::Spreadsheet),
            "json" => Some(Self::Json),
            "xml" | "html" | "htm" => Some(Self::Markup),
            _ => None,
        }
    }

    /// Run this format's extractor. Whitespace-only output is an error.
    pub fn extract(self, bytes: &[u8]) -> Result<ExtractedContent, AppError> {
        let content = match self {
            Self::Pdf => extract_pdf(bytes)?,
            Self::Docx => docx::extract(bytes)?,
            Self::PlainText => ExtractedContent::text_only(decode_utf8(bytes)),
            Self::Csv => ExtractedContent::text_only(csv_to_text(&decode_utf8(bytes))),
            Self::Spreadsheet => ExtractedContent::text_only(spreadsheet::extract(bytes)?),
            Self::Json => ExtractedContent::text_only(pretty_json(&decode_utf8(bytes))),
            Self::Markup => ExtractedContent::text_only(strip_markup(&decode_utf8(bytes))?),
        };

        if content.text.trim().is_empty() {
            return Err(AppError::Extraction(
                "No text could be extracted from document".to_string(),
            ));
        }

        debug!(
            format = ?self,
            chars = content.text.chars().count(),
            images = content.images.as_slice().len(),
            "Extracted document content"
        );
        Ok(content)
    }
}

/// Detect the format and extract, reporting every failure as a parse error.
pub fn extract_content(
    mime_type: &str,
    file_name: &str,
    bytes: &[u8],
) -> Result<ExtractedContent, AppError> {
    DocumentFormat::detect(mime_type, file_name)
        .and_then(|format| format.extract(bytes))
        .map_err(|err| AppError::Extraction(format!("Failed to parse document: {err}")))
}

fn is_generic_mime(mime: &str) -> bool {
    mime.is_empty() || mime == "application/octet-stream" || mime.starts_with("text/plain")
}

fn decode_utf8(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_start_matches('\u{feff}')
        .to_string()
}

fn extract_pdf(bytes: &[u8]) -> Result<ExtractedContent, AppError> {
    let text = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|err| AppError::Extraction(format!("Failed to extract text from PDF: {err}")))?;
    Ok(ExtractedContent {
        text,
        images: EmbeddedImages::Unsupported,
    })
}

/// Commas become ` | ` column separators. Quoted fields containing commas are split too.
fn csv_to_text(text: &str) -> String {
    text.split('\n')
        .map(|line| {
            line.split(',')
                .map(str::trim)
                .collect::<Vec<_>>()
                .join(" | ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn pretty_json(text: &str) -> String {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|value| serde_json::to_string_pretty(&value).ok())
        .unwrap_or_else(|| text.to_string())
}

fn strip_markup(text: &str) -> Result<String, AppError> {
    let compile = |pattern: &str| {
        Regex::new(pattern).map_err(|err| AppError::InternalError(err.to_string()))
    };
    let scripts = compile(r"(?is)<script[^>]*>.*?</script>")?;
    let styles = compile(r"(?is)<style[^>]*>.*?</style>")?;
    let tags = compile(r"<[^>]+>")?;
    let whitespace = compile(r"\s+")?;

    let text = scripts.replace_all(text, "");
    let text = styles.replace_all(&text, "");
    let text = tags.replace_all(&text, " ");
    Ok(whitespace.replace_all(&text, " ").trim().to_string())
}
