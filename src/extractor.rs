use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Coarse file classification used during preprocessing and ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    #[serde(rename = "md")]
    Markdown,
    Pdf,
    Text,
    Word,
    Excel,
    Image,
    Unknown,
}

impl FileType {
    /// Whether files of this type are copied into the preprocess directory
    /// and indexed.
    pub fn is_ingestible(self) -> bool {
        matches!(
            self,
            Self::Markdown | Self::Pdf | Self::Text | Self::Word | Self::Excel
        )
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Markdown => "md",
            Self::Pdf => "pdf",
            Self::Text => "text",
            Self::Word => "word",
            Self::Excel => "excel",
            Self::Image => "image",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Classifies files and extracts their text.
pub trait Extractor: Send + Sync {
    fn file_type(&self, path: &Path) -> FileType;

    fn read(&self, path: &Path) -> Result<String>;
}

const MARKDOWN_EXTENSIONS: &[&str] = &["md", "markdown"];
const TEXT_EXTENSIONS: &[&str] = &["txt", "text"];
const WORD_EXTENSIONS: &[&str] = &["doc", "docx"];
const EXCEL_EXTENSIONS: &[&str] = &["xls", "xlsx", "csv"];
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

/// Extension-based extractor for text formats.
///
/// Markdown, plain text and CSV are read as UTF-8. Binary office and PDF
/// formats are classified so they are kept in the preprocessed corpus, but
/// reading them fails with [`Error::Extraction`]; plug in a richer
/// [`Extractor`] to index them.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileOperation;

impl Extractor for FileOperation {
    fn file_type(&self, path: &Path) -> FileType {
        let Some(ext) = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
        else {
            return FileType::Unknown;
        };
        let ext = ext.as_str();

        if MARKDOWN_EXTENSIONS.contains(&ext) {
            FileType::Markdown
        } else if TEXT_EXTENSIONS.contains(&ext) {
            FileType::Text
        } else if ext == "pdf" {
            FileType::Pdf
        } else if WORD_EXTENSIONS.contains(&ext) {
            FileType::Word
        } else if EXCEL_EXTENSIONS.contains(&ext) {
            FileType::Excel
        } else if IMAGE_EXTENSIONS.contains(&ext) {
            FileType::Image
        } else {
            FileType::Unknown
        }
    }

    fn read(&self, path: &Path) -> Result<String> {
        let is_csv = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
        match self.file_type(path) {
            FileType::Markdown | FileType::Text => {
                Ok(std::fs::read_to_string(path)?)
            }
            FileType::Excel if is_csv => Ok(std::fs::read_to_string(path)?),
            other => Err(Error::Extraction {
                path: path.to_path_buf(),
                message: format!("no text extractor for {other} files"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_extension() {
        let op = FileOperation;
        assert_eq!(op.file_type(Path::new("a/README.md")), FileType::Markdown);
        assert_eq!(op.file_type(Path::new("notes.TXT")), FileType::Text);
        assert_eq!(op.file_type(Path::new("paper.pdf")), FileType::Pdf);
        assert_eq!(op.file_type(Path::new("report.docx")), FileType::Word);
        assert_eq!(op.file_type(Path::new("table.csv")), FileType::Excel);
        assert_eq!(op.file_type(Path::new("photo.JPEG")), FileType::Image);
        assert_eq!(op.file_type(Path::new("main.rs")), FileType::Unknown);
        assert_eq!(op.file_type(Path::new("Makefile")), FileType::Unknown);
    }

    #[test]
    fn images_are_not_ingestible() {
        assert!(!FileType::Image.is_ingestible());
        assert!(!FileType::Unknown.is_ingestible());
        assert!(FileType::Pdf.is_ingestible());
    }

    #[test]
    fn reads_text_formats() {
        let tmp = tempfile::tempdir().unwrap();
        let md = tmp.path().join("a.md");
        let csv = tmp.path().join("b.csv");
        std::fs::write(&md, "# Title").unwrap();
        std::fs::write(&csv, "a,b\n1,2").unwrap();

        let op = FileOperation;
        assert_eq!(op.read(&md).unwrap(), "# Title");
        assert_eq!(op.read(&csv).unwrap(), "a,b\n1,2");
    }

    #[test]
    fn binary_formats_fail_extraction() {
        let tmp = tempfile::tempdir().unwrap();
        let pdf = tmp.path().join("paper.pdf");
        std::fs::write(&pdf, b"%PDF-1.7").unwrap();

        let err = FileOperation.read(&pdf).unwrap_err();
        assert!(matches!(err, Error::Extraction { .. }));
        assert!(err.to_string().contains("pdf"));
    }

    #[test]
    fn file_type_serializes_with_short_names() {
        let json = serde_json::to_string(&FileType::Markdown).unwrap();
        assert_eq!(json, "\"md\"");
        assert_eq!(FileType::Excel.to_string(), "excel");
    }
}
