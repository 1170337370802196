//! Document references and sentence extraction.
//!
//! Extraction is deliberately thin: plain text files and URLs are split into
//! trimmed, non-empty lines. Other formats are rejected.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};

use crate::cache::CacheKey;
use crate::error::{Result, StoreError};

/// Kind of source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Pdf,
    Txt,
    Url,
}

impl DocumentType {
    /// Guess the type from a document reference.
    pub fn infer(reference: &str) -> Option<Self> {
        let lower = reference.trim().to_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Some(Self::Url)
        } else if lower.ends_with(".pdf") {
            Some(Self::Pdf)
        } else if lower.ends_with(".txt") {
            Some(Self::Txt)
        } else {
            None
        }
    }
}

impl FromStr for DocumentType {
    type Err = StoreError;

    fn from_str(tag: &str) -> Result<Self> {
        match tag.trim().to_lowercase().as_str() {
            "pdf" => Ok(Self::Pdf),
            "txt" => Ok(Self::Txt),
            "url" => Ok(Self::Url),
            other => Err(StoreError::UnsupportedDocument(format!(
                "unknown document type: {other}"
            ))),
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Self::Pdf => "pdf",
            Self::Txt => "txt",
            Self::Url => "url",
        };
        f.write_str(tag)
    }
}

/// Produces the ordered sentence list of a document.
#[async_trait]
pub trait SentenceSource: Send + Sync {
    async fn sentences(&self, doc_type: DocumentType, reference: &str) -> Result<Vec<String>>;
}

/// Reads text files and text served at URLs, one sentence per line.
pub struct TextSentenceSource {
    client: reqwest::Client,
}

impl TextSentenceSource {
    /// Create a source with a fresh HTTP client.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(StoreError::ApiRequest(format!(
                "GET {url} returned {}",
                response.status()
            )));
        }
        Ok(response.text().await?)
    }
}

impl Default for TextSentenceSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SentenceSource for TextSentenceSource {
    async fn sentences(&self, doc_type: DocumentType, reference: &str) -> Result<Vec<String>> {
        let text = match doc_type {
            DocumentType::Txt => fs::read_to_string(reference).await?,
            DocumentType::Url => self.fetch(reference).await?,
            DocumentType::Pdf => {
                return Err(StoreError::UnsupportedDocument(format!(
                    "no text extractor for pdf: {reference}"
                )));
            }
        };

        let sentences = split_lines(&text);
        debug!("Extracted {} sentences from {reference}", sentences.len());
        Ok(sentences)
    }
}

/// Split text into trimmed, non-empty lines.
pub fn split_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Cache key for a local file, derived from its canonical path.
///
/// Files that share a name but live in different directories get
/// different keys.
pub async fn local_document_key(source: impl AsRef<Path>) -> Result<CacheKey> {
    let canonical = fs::canonicalize(source.as_ref()).await?;
    CacheKey::for_document(&canonical.to_string_lossy())
}

/// Copy a local document into `<upload_dir>/<key>/`.
///
/// A file already staged under the same key is reused as-is. Returns the
/// staged path.
pub async fn stage_upload(
    upload_dir: impl AsRef<Path>,
    source: impl AsRef<Path>,
    key: &CacheKey,
) -> Result<PathBuf> {
    let source = source.as_ref();
    let file_name = source.file_name().ok_or_else(|| {
        StoreError::Precondition(format!("not a file path: {}", source.display()))
    })?;

    let staging_dir = upload_dir.as_ref().join(key.as_str());
    let staged = staging_dir.join(file_name);
    if fs::try_exists(&staged).await? {
        debug!("Document already staged at {}", staged.display());
        return Ok(staged);
    }

    fs::create_dir_all(&staging_dir).await?;
    fs::copy(source, &staged).await?;
    info!("Staged {} at {}", source.display(), staged.display());
    Ok(staged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_infer_document_type() {
        assert_eq!(DocumentType::infer("notes.TXT"), Some(DocumentType::Txt));
        assert_eq!(DocumentType::infer("paper.pdf"), Some(DocumentType::Pdf));
        assert_eq!(
            DocumentType::infer("https://example.com/book.txt"),
            Some(DocumentType::Url)
        );
        assert_eq!(DocumentType::infer("image.png"), None);
    }

    #[test]
    fn test_parse_document_tag() {
        assert_eq!("PDF".parse::<DocumentType>().unwrap(), DocumentType::Pdf);
        assert!("docx".parse::<DocumentType>().is_err());
        assert_eq!(DocumentType::Url.to_string(), "url");
    }

    #[test]
    fn test_split_lines() {
        let sentences = split_lines("  first line \n\n\tsecond\r\n   \nthird");
        assert_eq!(sentences, vec!["first line", "second", "third"]);
    }

    #[tokio::test]
    async fn test_text_file_sentences() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("doc.txt");
        fs::write(&file, "The dog barks\n\nThe cat sits\n").await.unwrap();

        let source = TextSentenceSource::new();
        let sentences = source
            .sentences(DocumentType::Txt, file.to_str().unwrap())
            .await
            .unwrap();

        assert_eq!(sentences, vec!["The dog barks", "The cat sits"]);
    }

    #[tokio::test]
    async fn test_url_sentences() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/book.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Chapter 1\nWell, Prince\n"))
            .mount(&server)
            .await;

        let source = TextSentenceSource::new();
        let sentences = source
            .sentences(DocumentType::Url, &format!("{}/book.txt", server.uri()))
            .await
            .unwrap();

        assert_eq!(sentences, vec!["Chapter 1", "Well, Prince"]);
    }

    #[tokio::test]
    async fn test_pdf_is_unsupported() {
        let source = TextSentenceSource::new();
        let err = source
            .sentences(DocumentType::Pdf, "paper.pdf")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedDocument(_)));
    }

    #[tokio::test]
    async fn test_stage_upload_copies_once() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("notes.txt");
        fs::write(&source, "original").await.unwrap();
        let upload_dir = temp_dir.path().join("UPLOAD_DIR");
        let key = CacheKey::new("notes").unwrap();

        let staged = stage_upload(&upload_dir, &source, &key).await.unwrap();
        assert_eq!(staged, upload_dir.join("notes").join("notes.txt"));
        assert_eq!(fs::read_to_string(&staged).await.unwrap(), "original");

        fs::write(&source, "changed").await.unwrap();
        let again = stage_upload(&upload_dir, &source, &key).await.unwrap();
        assert_eq!(again, staged);
        assert_eq!(fs::read_to_string(&staged).await.unwrap(), "original");
    }

    #[tokio::test]
    async fn test_same_file_name_in_different_directories() {
        let temp_dir = TempDir::new().unwrap();
        let upload_dir = temp_dir.path().join("UPLOAD_DIR");
        let a = temp_dir.path().join("a").join("notes.txt");
        let b = temp_dir.path().join("b").join("notes.txt");
        for (path, text) in [(&a, "alpha document\n"), (&b, "beta document\n")] {
            fs::create_dir_all(path.parent().unwrap()).await.unwrap();
            fs::write(path, text).await.unwrap();
        }

        let key_a = local_document_key(&a).await.unwrap();
        let key_b = local_document_key(&b).await.unwrap();
        assert_ne!(key_a, key_b);

        let staged_a = stage_upload(&upload_dir, &a, &key_a).await.unwrap();
        let staged_b = stage_upload(&upload_dir, &b, &key_b).await.unwrap();
        assert_eq!(
            fs::read_to_string(&staged_a).await.unwrap(),
            "alpha document\n"
        );
        assert_eq!(
            fs::read_to_string(&staged_b).await.unwrap(),
            "beta document\n"
        );
    }

    #[tokio::test]
    async fn test_local_key_is_stable_across_spellings() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("notes.txt");
        fs::write(&file, "x").await.unwrap();
        let dotted = temp_dir.path().join(".").join("notes.txt");

        assert_eq!(
            local_document_key(&file).await.unwrap(),
            local_document_key(&dotted).await.unwrap()
        );
        assert!(local_document_key(temp_dir.path().join("missing.txt")).await.is_err());
    }
}
