//! Post-crawl tagging (§4.7 "Tagger"): aggregates tags/categories across a
//! source's documents using simple heuristics, and optionally fetches a
//! favicon.

use std::collections::HashMap;

use tracing::{instrument, warn};

const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    ("api-reference", &["endpoint", "request", "response", "api key"]),
    ("tutorial", &["step 1", "getting started", "walkthrough", "tutorial"]),
    ("configuration", &["config", "environment variable", "settings"]),
    ("troubleshooting", &["error", "debug", "troubleshoot", "known issue"]),
];

/// Aggregates tags/categories across a batch of already-stored document
/// bodies. Returns `(tags, categories)` sorted by descending frequency.
pub fn aggregate_tags(document_bodies: &[String]) -> (Vec<String>, Vec<String>) {
    let mut category_hits: HashMap<&str, u32> = HashMap::new();
    for body in document_bodies {
        let lower = body.to_lowercase();
        for (category, keywords) in CATEGORY_KEYWORDS {
            if keywords.iter().any(|kw| lower.contains(kw)) {
                *category_hits.entry(category).or_insert(0) += 1;
            }
        }
    }

    let mut categories: Vec<(&str, u32)> = category_hits.into_iter().collect();
    categories.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    let categories: Vec<String> = categories.into_iter().map(|(c, _)| c.to_string()).collect();

    let has_code = document_bodies.iter().any(|b| b.contains("```"));
    let mut tags = Vec::new();
    if has_code {
        tags.push("has-code-samples".to_string());
    }
    if document_bodies.len() > 20 {
        tags.push("large-source".to_string());
    }

    (tags, categories)
}

/// Best-effort favicon discovery; failures are logged and swallowed since
/// a missing favicon never blocks a crawl from completing.
#[instrument(skip(client))]
pub async fn fetch_favicon_url(client: &reqwest::Client, base_url: &str) -> Option<String> {
    let parsed = url::Url::parse(base_url).ok()?;
    let favicon_url = format!("{}://{}/favicon.ico", parsed.scheme(), parsed.host_str()?);
    match client.head(&favicon_url).send().await {
        Ok(resp) if resp.status().is_success() => Some(favicon_url),
        Ok(resp) => {
            warn!(status = %resp.status(), favicon_url, "favicon probe returned non-success status");
            None
        }
        Err(err) => {
            warn!(error = %err, favicon_url, "favicon probe failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_tags_detects_code_samples() {
        let bodies = vec!["Here is some ```rust\nfn main() {}\n```".to_string()];
        let (tags, _) = aggregate_tags(&bodies);
        assert!(tags.contains(&"has-code-samples".to_string()));
    }

    #[test]
    fn aggregate_tags_ranks_categories_by_frequency() {
        let bodies = vec![
            "GET /endpoint returns a response".to_string(),
            "Another API endpoint with a request body".to_string(),
            "Getting Started: step 1, install the CLI".to_string(),
        ];
        let (_, categories) = aggregate_tags(&bodies);
        assert_eq!(categories.first().map(String::as_str), Some("api-reference"));
    }
}
