//! Text of paged documents, extracted once per URL and kept for context lookups.

use crate::context::{DEFAULT_CONTEXT_SIZE, window_context};
use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

const PAGE_BREAK: char = '\u{c}';
const DEFAULT_CAPACITY: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentText {
    pub url: String,
    pub text: String,
    pub page_count: usize,
}

impl DocumentText {
    /// Joins pages with newlines, the way page text is laid out for lookups.
    pub fn from_pages<I, S>(url: impl Into<String>, pages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let pages: Vec<String> = pages
            .into_iter()
            .map(|page| page.as_ref().to_string())
            .collect();
        Self {
            url: url.into(),
            text: pages.join("\n"),
            page_count: pages.len(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("failed to read {url}: {source}")]
    Io {
        url: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported document location: {0}")]
    Unsupported(String),
    #[error("document {0} has no extractable text")]
    Empty(String),
}

#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn extract(&self, url: &str) -> Result<DocumentText, DocumentError>;
}

/// Reads text already extracted from a paged document, one form feed per page break.
#[derive(Debug, Clone, Default)]
pub struct PlainTextSource {
    root: Option<PathBuf>,
}

impl PlainTextSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves relative locations against `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, url: &str) -> Result<PathBuf, DocumentError> {
        if url.starts_with("http://") || url.starts_with("https://") {
            return Err(DocumentError::Unsupported(url.to_string()));
        }
        let path = PathBuf::from(url.strip_prefix("file://").unwrap_or(url));
        Ok(match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path,
        })
    }
}

#[async_trait]
impl DocumentSource for PlainTextSource {
    async fn extract(&self, url: &str) -> Result<DocumentText, DocumentError> {
        let path = self.resolve(url)?;
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| DocumentError::Io {
                url: url.to_string(),
                source,
            })?;
        let mut pages: Vec<&str> = raw.split(PAGE_BREAK).collect();
        if pages.len() > 1 && pages.last().is_some_and(|page| page.trim().is_empty()) {
            pages.pop();
        }
        let document = DocumentText::from_pages(url, pages);
        if document.text.trim().is_empty() {
            return Err(DocumentError::Empty(url.to_string()));
        }
        Ok(document)
    }
}

/// Extracted documents for the session, most recently used first.
pub struct DocumentCache {
    entries: Mutex<LruCache<String, Arc<DocumentText>>>,
    current: Mutex<Option<Arc<DocumentText>>>,
    context_size: usize,
}

impl Default for DocumentCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_CONTEXT_SIZE)
    }
}

impl DocumentCache {
    pub fn new(capacity: usize, context_size: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            current: Mutex::new(None),
            context_size,
        }
    }

    pub fn context_size(&self) -> usize {
        self.context_size
    }

    /// Makes `url` the current document, extracting it unless already cached.
    pub async fn load<S>(&self, source: &S, url: &str) -> Result<Arc<DocumentText>, DocumentError>
    where
        S: DocumentSource + ?Sized,
    {
        let cached = self.entries.lock().get(url).cloned();
        let document = match cached {
            Some(document) => {
                debug!(url, "document cache hit");
                document
            }
            None => {
                let document = Arc::new(source.extract(url).await?);
                info!(url, pages = document.page_count, chars = document.text.len(), "document extracted");
                self.entries
                    .lock()
                    .put(url.to_string(), Arc::clone(&document));
                document
            }
        };
        *self.current.lock() = Some(Arc::clone(&document));
        Ok(document)
    }

    /// Like [`load`](Self::load), but a failed extraction only logs and leaves no current document.
    pub async fn load_or_forget<S>(&self, source: &S, url: &str) -> Option<Arc<DocumentText>>
    where
        S: DocumentSource + ?Sized,
    {
        match self.load(source, url).await {
            Ok(document) => Some(document),
            Err(err) => {
                warn!(url, error = %err, "document extraction failed, selections use themselves as context");
                *self.current.lock() = None;
                None
            }
        }
    }

    pub fn current(&self) -> Option<Arc<DocumentText>> {
        self.current.lock().clone()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.entries.lock().contains(url)
    }

    /// Window context around `selected` in the current document, or the selection itself.
    pub fn context_for(&self, selected: &str) -> String {
        match self.current() {
            Some(document) => window_context(&document.text, selected, self.context_size),
            None => selected.to_string(),
        }
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
        *self.current.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        text: String,
        calls: AtomicUsize,
    }

    impl CountingSource {
        fn new(text: &str) -> Self {
            Self {
                text: text.to_string(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl DocumentSource for CountingSource {
        async fn extract(&self, url: &str) -> Result<DocumentText, DocumentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if url.ends_with("missing.pdf") {
                return Err(DocumentError::Unsupported(url.to_string()));
            }
            Ok(DocumentText::from_pages(url, [self.text.as_str()]))
        }
    }

    #[tokio::test]
    async fn extracts_each_url_once() {
        let source = CountingSource::new("Protein kinase activity regulates the cell cycle.");
        let cache = DocumentCache::default();
        cache.load(&source, "https://example.org/a.pdf").await.unwrap();
        cache.load(&source, "https://example.org/a.pdf").await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert!(cache.contains("https://example.org/a.pdf"));
    }

    #[tokio::test]
    async fn context_uses_current_document_window() {
        let source = CountingSource::new("Protein kinase activity regulates the cell cycle.");
        let cache = DocumentCache::new(2, 9);
        cache.load(&source, "https://example.org/a.pdf").await.unwrap();
        assert_eq!(cache.context_for("kinase"), "Protein kinase activity");
        assert_eq!(cache.context_for("absent"), "absent");
    }

    #[tokio::test]
    async fn failed_extraction_falls_back_to_selection() {
        let source = CountingSource::new("ignored");
        let cache = DocumentCache::default();
        cache.load(&source, "https://example.org/a.pdf").await.unwrap();
        assert!(
            cache
                .load_or_forget(&source, "https://example.org/missing.pdf")
                .await
                .is_none()
        );
        assert!(cache.current().is_none());
        assert_eq!(cache.context_for("ignored"), "ignored");
    }

    #[tokio::test]
    async fn evicts_least_recently_used() {
        let source = CountingSource::new("text");
        let cache = DocumentCache::new(1, DEFAULT_CONTEXT_SIZE);
        cache.load(&source, "a").await.unwrap();
        cache.load(&source, "b").await.unwrap();
        assert!(!cache.contains("a"));
        cache.load(&source, "a").await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn plain_text_source_splits_pages_on_form_feed() {
        let path = std::env::temp_dir().join(format!("leveler-doc-{}.txt", std::process::id()));
        tokio::fs::write(&path, "First page text.\u{c}Second page text.\u{c}")
            .await
            .unwrap();
        let url = path.to_string_lossy().into_owned();

        let document = PlainTextSource::new().extract(&url).await.unwrap();
        tokio::fs::remove_file(&path).await.unwrap();

        assert_eq!(document.page_count, 2);
        assert_eq!(document.text, "First page text.\nSecond page text.");
    }

    #[tokio::test]
    async fn plain_text_source_rejects_remote_urls() {
        let err = PlainTextSource::new()
            .extract("https://example.org/paper.pdf")
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentError::Unsupported(_)));
    }

    #[test]
    fn relative_paths_resolve_against_root() {
        let source = PlainTextSource::with_root("/srv/papers");
        assert_eq!(
            source.resolve("file://notes.txt").unwrap(),
            PathBuf::from("/srv/papers/notes.txt")
        );
        assert_eq!(
            source.resolve("/tmp/a.txt").unwrap(),
            PathBuf::from("/tmp/a.txt")
        );
    }
}
