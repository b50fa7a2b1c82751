//! Source enumeration: web crawler and local file walker backends for the
//! **enumerate** stage of §4.7's pipeline (enumerate -> fetch+parse ->
//! dedup by URL -> chunk -> embed -> store -> link -> tag).

use std::collections::VecDeque;
use std::path::Path;

use async_trait::async_trait;
use regex::Regex;
use sibyl_common::document::CrawlSource;
use tracing::{instrument, warn};
use walkdir::WalkDir;

use crate::errors::IngestError;

/// A fetched-but-not-yet-chunked document.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub url: String,
    pub title: Option<String>,
    pub content: String,
    pub language: Option<String>,
}

#[async_trait]
pub trait SourceCrawler: Send + Sync {
    async fn enumerate(&self, source: &CrawlSource) -> Result<Vec<RawDocument>, IngestError>;
}

const TEXT_EXTENSIONS: &[&str] = &["md", "markdown", "txt", "rst"];

/// Walks a local directory tree (§4.7 "local file walker"), one document
/// per text-like file under `source.url` (interpreted as a filesystem
/// path for `SourceType::LocalFiles`).
pub struct WalkdirCrawler {
    max_files: usize,
}

impl WalkdirCrawler {
    pub fn new(max_files: usize) -> Self {
        Self { max_files }
    }
}

impl Default for WalkdirCrawler {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl SourceCrawler for WalkdirCrawler {
    #[instrument(skip(self, source))]
    async fn enumerate(&self, source: &CrawlSource) -> Result<Vec<RawDocument>, IngestError> {
        let base = Path::new(&source.url);
        if !base.exists() {
            return Err(IngestError::EmptySource(source.id.clone()));
        }

        let mut docs = Vec::new();
        for entry in WalkDir::new(base)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            if docs.len() >= self.max_files {
                warn!(source_id = %source.id, max_files = self.max_files, "local walk truncated at max_files");
                break;
            }
            let path = entry.path();
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if !TEXT_EXTENSIONS.contains(&ext) && ext != "rs" && ext != "py" {
                continue;
            }
            let content = match tokio::fs::read_to_string(path).await {
                Ok(c) => c,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable file");
                    continue;
                }
            };
            if content.trim().is_empty() {
                continue;
            }
            let language = if ext == "rs" || ext == "py" { Some(ext.to_string()) } else { None };
            docs.push(RawDocument {
                url: format!("file://{}", path.display()),
                title: path.file_name().and_then(|n| n.to_str()).map(str::to_string),
                content,
                language,
            });
        }
        Ok(docs)
    }
}

/// Breadth-first same-origin web crawl up to `source.crawl_depth`, using a
/// regex over `href="..."` rather than a full HTML parser — content is
/// stored as-fetched; the chunker treats it as markdown/prose.
pub struct WebCrawler {
    client: reqwest::Client,
    max_pages: usize,
}

impl WebCrawler {
    pub fn new(max_pages: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            max_pages,
        }
    }
}

impl Default for WebCrawler {
    fn default() -> Self {
        Self::new(200)
    }
}

fn href_links(html: &str) -> Vec<String> {
    static PATTERN: &str = r#"href="([^"#]+)""#;
    let re = Regex::new(PATTERN).expect("static href regex is valid");
    re.captures_iter(html).map(|c| c[1].to_string()).collect()
}

fn same_origin(base: &url::Url, candidate: &str) -> Option<url::Url> {
    let resolved = base.join(candidate).ok()?;
    (resolved.host_str() == base.host_str()).then_some(resolved)
}

#[async_trait]
impl SourceCrawler for WebCrawler {
    #[instrument(skip(self, source))]
    async fn enumerate(&self, source: &CrawlSource) -> Result<Vec<RawDocument>, IngestError> {
        let root = url::Url::parse(&source.url).map_err(|e| IngestError::Fetch {
            url: source.url.clone(),
            reason: e.to_string(),
        })?;

        let mut seen = std::collections::HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back((root.clone(), 0u32));
        seen.insert(root.to_string());

        let mut docs = Vec::new();
        while let Some((url, depth)) = queue.pop_front() {
            if docs.len() >= self.max_pages {
                break;
            }
            let resp = match self.client.get(url.clone()).send().await {
                Ok(r) => r,
                Err(err) => {
                    warn!(url = %url, error = %err, "fetch failed, skipping");
                    continue;
                }
            };
            let body = match resp.text().await {
                Ok(b) => b,
                Err(err) => {
                    warn!(url = %url, error = %err, "failed reading response body");
                    continue;
                }
            };

            docs.push(RawDocument {
                url: url.to_string(),
                title: None,
                content: body.clone(),
                language: None,
            });

            if depth < source.crawl_depth {
                for link in href_links(&body) {
                    if let Some(next) = same_origin(&url, &link) {
                        let key = next.to_string();
                        if seen.insert(key) {
                            queue.push_back((next, depth + 1));
                        }
                    }
                }
            }
        }
        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn walkdir_crawler_skips_binary_and_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.md"), "# Hello\nworld").unwrap();
        std::fs::write(dir.path().join("empty.md"), "   ").unwrap();
        std::fs::write(dir.path().join("image.png"), [0u8, 1, 2]).unwrap();

        let source = CrawlSource {
            id: "src_1".into(),
            organization_id: "org_1".into(),
            name: "local".into(),
            url: dir.path().to_string_lossy().to_string(),
            source_type: sibyl_common::document::SourceType::LocalFiles,
            crawl_depth: 1,
            include_patterns: vec![],
            exclude_patterns: vec![],
            status: Default::default(),
            last_error: None,
            document_count: 0,
            chunk_count: 0,
            last_crawled_at: None,
            tags: vec![],
            categories: vec![],
            favicon_url: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };

        let crawler = WalkdirCrawler::default();
        let docs = crawler.enumerate(&source).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert!(docs[0].content.contains("Hello"));
    }

    #[test]
    fn href_links_extracts_quoted_attrs_only() {
        let html = r#"<a href="/docs/intro">intro</a><a href="https://other.example">ext</a>"#;
        let links = href_links(html);
        assert_eq!(links, vec!["/docs/intro", "https://other.example"]);
    }

    #[test]
    fn same_origin_rejects_cross_host_links() {
        let base = url::Url::parse("https://docs.example.com/guide").unwrap();
        assert!(same_origin(&base, "/other-page").is_some());
        assert!(same_origin(&base, "https://evil.example/").is_none());
    }
}
