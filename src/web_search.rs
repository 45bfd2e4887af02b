//! Restricted web search used to enrich drafted sections.
//!
//! One `site:<site> <query>` search is issued per allowed site. Hits are
//! kept only when their URL belongs to an allowed site (host contains the
//! domain, or URL starts with the prefix, depending on
//! [`MatchMode`]) and does not start with a blocklisted prefix.
//!
//! A missing API key yields an empty result; a provider failure mid-search
//! appends `Web search failed: ...` to the snippets and returns whatever was
//! collected so far.

use async_trait::async_trait;
use serde::Deserialize;

use facilities_core::error::ProviderError;

use crate::config::{MatchMode, WebSearchConfig};
use crate::http;

/// Snippet text ready for a prompt, plus the URLs it cites.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WebSearchResult {
    pub snippets: String,
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SearchHit {
    pub url: String,
    #[serde(default)]
    pub content: String,
}

#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str) -> WebSearchResult;
}

/// Does `url` pass the allow-list and blocklist?
pub fn is_allowed(url: &str, allowed_sites: &[String], mode: MatchMode, blocklist: &[String]) -> bool {
    if blocklist.iter().any(|b| url.starts_with(b.as_str())) {
        return false;
    }
    match mode {
        MatchMode::Prefix => allowed_sites.iter().any(|p| url.starts_with(p.as_str())),
        MatchMode::Domain => {
            let host = match reqwest::Url::parse(url) {
                Ok(parsed) => parsed.host_str().unwrap_or_default().to_string(),
                Err(_) => return false,
            };
            allowed_sites.iter().any(|d| host.contains(d.as_str()))
        }
    }
}

/// `"{content}\n(Web Source: {url})"` blocks joined by blank lines.
pub fn format_snippets(hits: &[SearchHit]) -> String {
    hits.iter()
        .map(|h| format!("{}\n(Web Source: {})", h.content, h.url))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Term used after `site:`; schemes are not valid there.
fn site_term(site: &str) -> &str {
    site.trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
}

/// Tavily-backed [`WebSearch`].
pub struct TavilySearch {
    config: WebSearchConfig,
    api_key: Option<String>,
    client: Option<reqwest::Client>,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

impl TavilySearch {
    pub fn new(config: &WebSearchConfig) -> Self {
        let api_key = http::api_key_from_env(&config.api_key_env);
        if api_key.is_none() {
            tracing::warn!(env = %config.api_key_env, "web search key not set; web snippets disabled");
        }
        Self {
            config: config.clone(),
            api_key,
            client: http::client(config.timeout_secs).ok(),
        }
    }

    async fn search_site(
        &self,
        client: &reqwest::Client,
        api_key: &str,
        site: &str,
        query: &str,
    ) -> Result<Vec<SearchHit>, ProviderError> {
        let body = serde_json::json!({
            "api_key": api_key,
            "query": format!("site:{} {}", site_term(site), query),
            "max_results": self.config.max_results,
        });
        let req = client
            .post(format!("{}/search", self.config.base_url.trim_end_matches('/')))
            .json(&body);
        let json = http::send_json("Web search", req).await?;
        let parsed: TavilyResponse = serde_json::from_value(json)
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        Ok(parsed.results)
    }
}

#[async_trait]
impl WebSearch for TavilySearch {
    async fn search(&self, query: &str) -> WebSearchResult {
        let (Some(api_key), Some(client)) = (self.api_key.as_deref(), self.client.as_ref()) else {
            return WebSearchResult::default();
        };

        let mut kept: Vec<SearchHit> = Vec::new();
        let mut failure = None;
        for site in &self.config.allowed_sites {
            match self.search_site(client, api_key, site, query).await {
                Ok(hits) => {
                    for hit in hits {
                        let allowed = is_allowed(
                            &hit.url,
                            &self.config.allowed_sites,
                            self.config.match_mode,
                            &self.config.blocklist,
                        );
                        if allowed && !kept.iter().any(|k| k.url == hit.url) {
                            kept.push(hit);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(site = %site, error = %e, "web search failed");
                    failure = Some(e);
                    break;
                }
            }
        }

        let mut snippets = format_snippets(&kept);
        if let Some(e) = failure {
            if !snippets.is_empty() {
                snippets.push_str("\n\n");
            }
            snippets.push_str(&format!("Web search failed: {}", e));
        }
        WebSearchResult {
            snippets,
            urls: kept.into_iter().map(|h| h.url).collect(),
        }
    }
}
