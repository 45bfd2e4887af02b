//! Text extraction for the document formats the ingestion pipeline accepts.
//!
//! | Extension | Result |
//! |-----------|--------|
//! | `.pdf` | one string per page (`page_or_offset` = 0-based page) |
//! | `.docx` | paragraphs of `word/document.xml`, newline-separated |
//! | `.md`, `.txt` | file contents as-is |
//!
//! Extraction never panics: failures come back as [`ExtractError`] and the
//! pipeline skips the file without spending retry attempts on it.

use std::io::Read;
use std::path::Path;

use facilities_core::chunk::DocumentText;
use thiserror::Error;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    Unsupported(String),
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
    #[error("no extractable text")]
    Empty,
}

/// Whether `path` has an extension [`extract_document`] understands.
pub fn is_supported(path: &Path) -> bool {
    matches!(
        extension(path).as_deref(),
        Some("pdf" | "docx" | "md" | "txt")
    )
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Read and extract a document from disk.
pub fn extract_document(path: &Path) -> Result<DocumentText, ExtractError> {
    let ext = extension(path).unwrap_or_default();
    let doc = match ext.as_str() {
        "pdf" => DocumentText::paginated(extract_pdf_pages(&std::fs::read(path)?)?),
        "docx" => DocumentText::single(extract_docx(&std::fs::read(path)?)?),
        "md" | "txt" => {
            let bytes = std::fs::read(path)?;
            DocumentText::single(String::from_utf8_lossy(&bytes).into_owned())
        }
        _ => return Err(ExtractError::Unsupported(path.display().to_string())),
    };

    if doc.is_blank() {
        return Err(ExtractError::Empty);
    }
    Ok(doc)
}

/// Text of every page, in order.
///
/// pdf-extract panics on some malformed files (e.g. a content stream that
/// names a font the page never defines); the panic is caught and reported
/// as [`ExtractError::Pdf`].
pub fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes)) {
        Ok(Ok(pages)) => Ok(pages),
        Ok(Err(e)) => Err(ExtractError::Pdf(e.to_string())),
        Err(panic) => Err(ExtractError::Pdf(panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_string());
    format!("parser panicked: {}", detail)
}

pub fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Docx("word/document.xml not found".to_string()))?;

    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    docx_paragraphs(&doc_xml)
}

/// Collect `<w:t>` runs, ending each `<w:p>` paragraph with a newline so the
/// splitter can prefer paragraph boundaries.
fn docx_paragraphs(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

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
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

/// Hand-built documents shared by tests in this crate.
#[cfg(test)]
pub(crate) mod fixtures {
    /// A one-page PDF whose content stream selects `/F1` while the page has
    /// no font resources.
    pub(crate) fn pdf_with_undefined_font() -> Vec<u8> {
        let content = "BT /F1 12 Tf 72 712 Td (Shared instrumentation) Tj ET";
        let objects = [
            "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
            "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Resources << >> /Contents 4 0 R >>"
                .to_string(),
            format!(
                "<< /Length {} >>\nstream\n{}\nendstream",
                content.len(),
                content
            ),
        ];

        let mut out = b"%PDF-1.4\n".to_vec();
        let mut offsets = Vec::with_capacity(objects.len());
        for (i, body) in objects.iter().enumerate() {
            offsets.push(out.len());
            out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
        }
        let xref_at = out.len();
        out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
        out.extend_from_slice(b"0000000000 65535 f \n");
        for offset in offsets {
            out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
        }
        out.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
                objects.len() + 1,
                xref_at
            )
            .as_bytes(),
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_bytes(document_xml: &str) -> Vec<u8> {
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            let opts = zip::write::SimpleFileOptions::default();
            zip.start_file("word/document.xml", opts).unwrap();
            zip.write_all(document_xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn supported_extensions() {
        assert!(is_supported(Path::new("NSF/a.PDF")));
        assert!(is_supported(Path::new("notes.md")));
        assert!(!is_supported(Path::new("image.png")));
        assert!(!is_supported(Path::new("README")));
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_pdf_pages(b"not a pdf").unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn pdf_with_undefined_font_is_an_error_not_a_panic() {
        let bytes = fixtures::pdf_with_undefined_font();
        assert!(matches!(extract_pdf_pages(&bytes), Err(ExtractError::Pdf(_))));
    }

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let err = extract_docx(b"not a zip").unwrap_err();
        assert!(matches!(err, ExtractError::Docx(_)));
    }

    #[test]
    fn docx_paragraphs_are_newline_separated() {
        let xml = r#"<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>
            <w:p><w:r><w:t>Core lab</w:t></w:r><w:r><w:t xml:space="preserve"> space</w:t></w:r></w:p>
            <w:p><w:r><w:t>HPC cluster</w:t></w:r></w:p>
        </w:body></w:document>"#;
        let text = extract_docx(&docx_bytes(xml)).unwrap();
        assert!(text.contains("Core lab space\n"));
        assert!(text.contains("HPC cluster\n"));
    }

    #[test]
    fn text_file_is_single_unpaginated_page() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("facilities.txt");
        std::fs::write(&path, "Microscopy suite.").unwrap();
        let doc = extract_document(&path).unwrap();
        assert!(!doc.paginated);
        assert_eq!(doc.pages, vec!["Microscopy suite.".to_string()]);
    }

    #[test]
    fn blank_file_is_empty_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("blank.md");
        std::fs::write(&path, "  \n ").unwrap();
        assert!(matches!(extract_document(&path), Err(ExtractError::Empty)));
    }
}
