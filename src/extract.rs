//! Text extraction from files on disk.
//!
//! [`TextExtractor`] is the seam the pipeline calls for every candidate file.
//! The default [`FileExtractor`] reads plain text lossily as UTF-8, parses
//! PDF with `pdf-extract` and DOCX with `zip` + `quick-xml`. Parsing is
//! CPU-bound, so it runs on the blocking pool.

use async_trait::async_trait;
use quick_xml::events::Event;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::discover::extension_of;
use crate::error::{IndexError, Result};
use crate::registry::normalize_extensions;

/// Files larger than this are refused rather than read into memory.
const MAX_FILE_BYTES: u64 = 256 * 1024 * 1024;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Whether files with this extension (lowercase, leading dot) can be read.
    fn supports(&self, extension: &str) -> bool;

    /// Plain text of the file, or [`IndexError::ExtractionFailed`].
    async fn extract(&self, path: &Path) -> Result<String>;
}

/// Extractor for the formats configured in `[indexing] supported_extensions`.
pub struct FileExtractor {
    supported: Vec<String>,
}

impl FileExtractor {
    pub fn new(supported: &[String]) -> Self {
        Self {
            supported: normalize_extensions(supported),
        }
    }
}

#[async_trait]
impl TextExtractor for FileExtractor {
    fn supports(&self, extension: &str) -> bool {
        self.supported.iter().any(|e| e == extension)
    }

    async fn extract(&self, path: &Path) -> Result<String> {
        let ext = extension_of(path).unwrap_or_default();
        if !self.supports(&ext) {
            return Err(IndexError::extraction(
                path,
                format!("unsupported file type '{}'", ext),
            ));
        }

        let owned: PathBuf = path.to_path_buf();
        tokio::task::spawn_blocking(move || extract_blocking(&owned, &ext))
            .await
            .map_err(|e| IndexError::extraction(path, e))?
    }
}

fn extract_blocking(path: &Path, ext: &str) -> Result<String> {
    let size = std::fs::metadata(path)
        .map_err(|e| IndexError::extraction(path, e))?
        .len();
    if size > MAX_FILE_BYTES {
        return Err(IndexError::extraction(
            path,
            format!("file is {} bytes, limit is {}", size, MAX_FILE_BYTES),
        ));
    }
    let bytes = std::fs::read(path).map_err(|e| IndexError::extraction(path, e))?;

    match ext {
        ".pdf" => {
            pdf_extract::extract_text_from_mem(&bytes).map_err(|e| IndexError::extraction(path, e))
        }
        ".docx" => extract_docx(&bytes).map_err(|reason| IndexError::extraction(path, reason)),
        _ => Ok(String::from_utf8_lossy(&bytes).into_owned()),
    }
}

fn extract_docx(bytes: &[u8]) -> std::result::Result<String, String> {
    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| e.to_string())?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| "word/document.xml not found".to_string())?;

    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| e.to_string())?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err("word/document.xml exceeds size limit".to_string());
    }

    document_text(&xml)
}

/// Concatenate `w:t` runs, one line per `w:p` paragraph.
fn document_text(xml: &[u8]) -> std::result::Result<String, String> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}
