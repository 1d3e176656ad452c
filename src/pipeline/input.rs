//! Input resolution: load extracted document text from a path or URL.
//!
//! The pipeline starts from text that a PDF extractor already produced.
//! Three shapes are accepted:
//!
//! - a plain UTF-8 `.txt` file (one document, no metadata)
//! - a `.json` file or response in the extractor's format:
//!   `{"text": "...", "pages": 18, "metadata": {...}}` or
//!   `{"pages": ["page one", "page two"], "metadata": {...}}`
//! - an `http(s)://` URL serving either of the above
//!
//! PDF bytes are rejected with a clear error rather than read as garbage.

use crate::error::PapercastError;
use crate::output::DocumentMetadata;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Extracted text of one document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDocument {
    /// Page texts, in reading order.
    pub pages: Vec<String>,
    #[serde(default)]
    pub metadata: DocumentMetadata,
}

impl RawDocument {
    /// A single-page document without metadata.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            pages: vec![text.into()],
            metadata: DocumentMetadata::default(),
        }
    }

    /// All pages joined by a blank line. Blank pages are dropped.
    pub fn text(&self) -> String {
        self.pages
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Parse the extractor's JSON format.
    pub fn from_json(bytes: &[u8], source_name: &str) -> Result<Self, PapercastError> {
        let wire: DocumentWire =
            serde_json::from_slice(bytes).map_err(|e| PapercastError::InvalidDocument {
                source_name: source_name.to_string(),
                detail: format!("invalid JSON: {e}"),
            })?;
        let pages = match (wire.pages, wire.text) {
            (Some(PagesWire::Texts(pages)), _) => pages,
            (_, Some(text)) => vec![text],
            _ => {
                return Err(PapercastError::InvalidDocument {
                    source_name: source_name.to_string(),
                    detail: "expected a \"text\" string or a \"pages\" array".into(),
                })
            }
        };
        Ok(Self {
            pages,
            metadata: without_blanks(wire.metadata),
        })
    }
}

#[derive(Deserialize)]
struct DocumentWire {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    pages: Option<PagesWire>,
    #[serde(default)]
    metadata: DocumentMetadata,
}

/// `pages` is a page count in the extractor's response and a list of page
/// texts in hand-written documents.
#[derive(Deserialize)]
#[serde(untagged)]
enum PagesWire {
    Texts(Vec<String>),
    #[allow(dead_code)]
    Count(usize),
}

/// Extractors report missing fields as empty strings.
fn without_blanks(m: DocumentMetadata) -> DocumentMetadata {
    let keep = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
    DocumentMetadata {
        title: keep(m.title),
        author: keep(m.author),
        subject: keep(m.subject),
        creator: keep(m.creator),
        producer: keep(m.producer),
        creation_date: keep(m.creation_date),
        mod_date: keep(m.mod_date),
        keywords: keep(m.keywords),
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Load a document from a local path or URL.
pub async fn load_document(source: &str, timeout_secs: u64) -> Result<RawDocument, PapercastError> {
    if is_url(source) {
        download_document(source, timeout_secs).await
    } else {
        load_local(Path::new(source)).await
    }
}

async fn load_local(path: &Path) -> Result<RawDocument, PapercastError> {
    let path: PathBuf = path.to_path_buf();
    if !path.exists() {
        return Err(PapercastError::FileNotFound { path });
    }

    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(PapercastError::PermissionDenied { path });
        }
        Err(_) => return Err(PapercastError::FileNotFound { path }),
    };

    let name = path.display().to_string();
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    debug!("Loaded {} ({} bytes)", name, bytes.len());
    decode(&bytes, is_json, &name)
}

async fn download_document(url: &str, timeout_secs: u64) -> Result<RawDocument, PapercastError> {
    info!("Downloading document from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| PapercastError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| map_reqwest(url, timeout_secs, e))?;

    if !response.status().is_success() {
        return Err(PapercastError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let is_json = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("json"))
        || url_path_ends_with_json(url);

    let bytes = response
        .bytes()
        .await
        .map_err(|e| map_reqwest(url, timeout_secs, e))?;

    info!("Downloaded {} bytes", bytes.len());
    decode(&bytes, is_json, url)
}

fn map_reqwest(url: &str, timeout_secs: u64, e: reqwest::Error) -> PapercastError {
    if e.is_timeout() {
        PapercastError::DownloadTimeout {
            url: url.to_string(),
            secs: timeout_secs,
        }
    } else {
        PapercastError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        }
    }
}

fn url_path_ends_with_json(url: &str) -> bool {
    reqwest::Url::parse(url)
        .ok()
        .is_some_and(|u| u.path().to_ascii_lowercase().ends_with(".json"))
}

fn decode(bytes: &[u8], is_json: bool, source_name: &str) -> Result<RawDocument, PapercastError> {
    if bytes.starts_with(b"%PDF") {
        return Err(PapercastError::InvalidDocument {
            source_name: source_name.to_string(),
            detail: "this is a PDF; extract its text first and pass the .txt or .json output"
                .into(),
        });
    }
    if is_json {
        return RawDocument::from_json(bytes, source_name);
    }
    let text = std::str::from_utf8(bytes).map_err(|e| PapercastError::InvalidDocument {
        source_name: source_name.to_string(),
        detail: format!("not UTF-8 text: {e}"),
    })?;
    Ok(RawDocument::from_text(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/paper.json"));
        assert!(is_url("http://example.com/paper.txt"));
        assert!(!is_url("/tmp/paper.txt"));
        assert!(!is_url(""));
    }

    #[test]
    fn pages_joined_with_blank_line() {
        let doc = RawDocument {
            pages: vec!["Page one. ".into(), "  ".into(), "Page two.".into()],
            metadata: DocumentMetadata::default(),
        };
        assert_eq!(doc.text(), "Page one.\n\nPage two.");
        assert_eq!(doc.page_count(), 3);
    }

    #[test]
    fn extractor_response_parsed() {
        let json = br#"{"text":"Body text.","pages":18,"metadata":{"title":"On Sound","author":""}}"#;
        let doc = RawDocument::from_json(json, "resp").unwrap();
        assert_eq!(doc.text(), "Body text.");
        assert_eq!(doc.metadata.title.as_deref(), Some("On Sound"));
        assert_eq!(doc.metadata.author, None);
    }

    #[test]
    fn page_array_parsed() {
        let doc = RawDocument::from_json(br#"{"pages":["a","b"]}"#, "doc").unwrap();
        assert_eq!(doc.pages, vec!["a", "b"]);
    }

    #[test]
    fn json_without_text_rejected() {
        let err = RawDocument::from_json(br#"{"pages":3}"#, "doc").unwrap_err();
        assert!(matches!(err, PapercastError::InvalidDocument { .. }));
        let err = RawDocument::from_json(b"not json", "doc").unwrap_err();
        assert!(matches!(err, PapercastError::InvalidDocument { .. }));
    }

    #[test]
    fn pdf_bytes_rejected() {
        let err = decode(b"%PDF-1.7 ...", false, "paper.pdf").unwrap_err();
        assert!(err.to_string().contains("extract its text"));
    }

    #[tokio::test]
    async fn missing_file_reported() {
        let err = load_document("/definitely/not/here.txt", 5).await.unwrap_err();
        assert!(matches!(err, PapercastError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn loads_text_and_json_files() {
        let dir = tempfile::tempdir().unwrap();
        let txt = dir.path().join("paper.txt");
        std::fs::File::create(&txt)
            .unwrap()
            .write_all(b"Plain text paper.")
            .unwrap();
        let doc = load_document(txt.to_str().unwrap(), 5).await.unwrap();
        assert_eq!(doc.text(), "Plain text paper.");

        let json = dir.path().join("paper.json");
        std::fs::write(&json, br#"{"text":"Json paper.","metadata":{"title":"T"}}"#).unwrap();
        let doc = load_document(json.to_str().unwrap(), 5).await.unwrap();
        assert_eq!(doc.text(), "Json paper.");
        assert_eq!(doc.metadata.title.as_deref(), Some("T"));
    }
}
