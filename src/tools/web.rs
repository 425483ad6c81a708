//! Web search collaborator.
//!
//! Uses the Tavily API if `TAVILY_API_KEY` is set, otherwise falls back to
//! DuckDuckGo HTML. With `WEB_SEARCH_OFFLINE` it serves a curated directory
//! of authoritative entry points instead of calling out.
//!
//! Every backend returns [`SearchHit`]s scored by [`score_relevance`] and
//! tagged by [`classify_source`], so agents never depend on the backend.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::error::{classify_http_status, classify_reqwest_error};
use super::{Tool, ToolError};
use crate::config::Config;
use crate::tools::research::{detect_domain, ResearchDomain};
use crate::util::{contains_any, query_terms, round3, truncate_chars};

const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Coarse category of the site a hit came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Medical,
    Academic,
    News,
    General,
}

/// One scored search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub query: String,
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub relevance: f64,
    pub source_type: SourceType,
}

impl SearchHit {
    fn scored(query: &str, title: String, url: String, snippet: String) -> Self {
        let relevance = score_relevance(query, &title, &snippet, &url);
        let source_type = classify_source(&url);
        Self {
            query: query.to_string(),
            title,
            url,
            snippet,
            relevance,
            source_type,
        }
    }
}

const CREDIBLE_HOSTS: &[&str] = &[
    // Healthcare
    "mayoclinic",
    "nih.gov",
    "cdc.gov",
    "who.int",
    "webmd",
    "medscape",
    "pubmed",
    "medlineplus",
    // News
    "reuters",
    "apnews",
    "bbc.",
    "npr.org",
    "pbs.org",
    // Reference
    "wikipedia",
    "britannica",
];

const NEWS_HOSTS: &[&str] = &["reuters", "apnews", "bbc.", "npr.org", "pbs.org", "cnn.com", "nytimes"];

const MEDICAL_HOSTS: &[&str] = &[
    "nih.gov",
    "pubmed",
    "who.int",
    "nejm.org",
    "thelancet",
    "bmj.com",
    "mayoclinic",
    "medlineplus",
    "cdc.gov",
];

const ACADEMIC_HOSTS: &[&str] = &["acm.org", "ieee.org", "nature.com", "sciencedirect", "springer"];

fn host_of(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
}

/// Score how well a hit matches the query, in `0.0..=1.0`.
///
/// Title term matches weigh 0.4, snippet matches 0.3, a credible host adds
/// 0.2 and a `.gov`/`.edu` host another 0.1.
pub fn score_relevance(query: &str, title: &str, snippet: &str, url: &str) -> f64 {
    let terms = query_terms(query);
    let mut score = 0.0;

    if !terms.is_empty() {
        let title = title.to_lowercase();
        let snippet = snippet.to_lowercase();
        let n = terms.len() as f64;
        let title_matches = terms.iter().filter(|t| title.contains(t.as_str())).count() as f64;
        let snippet_matches = terms.iter().filter(|t| snippet.contains(t.as_str())).count() as f64;
        score += title_matches / n * 0.4 + snippet_matches / n * 0.3;
    }

    if let Some(host) = host_of(url) {
        if CREDIBLE_HOSTS.iter().any(|c| host.contains(c)) {
            score += 0.2;
        }
        if host.ends_with(".gov") || host.ends_with(".edu") {
            score += 0.1;
        }
    }

    round3(score.min(1.0))
}

/// Classify a hit by the host it came from.
pub fn classify_source(url: &str) -> SourceType {
    let Some(host) = host_of(url) else {
        return SourceType::General;
    };
    if host.contains("arxiv") {
        SourceType::Academic
    } else if host.ends_with(".gov") || MEDICAL_HOSTS.iter().any(|m| host.contains(m)) {
        SourceType::Medical
    } else if NEWS_HOSTS.iter().any(|n| host.contains(n)) {
        SourceType::News
    } else if host.ends_with(".edu") || ACADEMIC_HOSTS.iter().any(|a| host.contains(a)) {
        SourceType::Academic
    } else {
        SourceType::General
    }
}

/// Where search results come from.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchBackend {
    Tavily { api_key: String },
    DuckDuckGo,
    Offline,
}

impl SearchBackend {
    pub fn from_config(config: &Config) -> Self {
        if config.web_search_offline {
            SearchBackend::Offline
        } else if let Some(key) = &config.tavily_api_key {
            SearchBackend::Tavily {
                api_key: key.clone(),
            }
        } else {
            SearchBackend::DuckDuckGo
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SearchBackend::Tavily { .. } => "tavily",
            SearchBackend::DuckDuckGo => "duckduckgo",
            SearchBackend::Offline => "offline",
        }
    }
}

/// Search the web for pages relevant to a query.
pub struct WebSearch {
    backend: SearchBackend,
    client: reqwest::Client,
}

/// Tavily API request body.
#[derive(Debug, Serialize)]
struct TavilySearchRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: usize,
    include_answer: bool,
    include_raw_content: bool,
}

/// Tavily API response.
#[derive(Debug, Deserialize)]
struct TavilySearchResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    title: String,
    url: String,
    #[serde(default)]
    content: String,
}

impl WebSearch {
    pub fn new(backend: SearchBackend) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("Mozilla/5.0 (compatible; HealthFinder/0.4)")
            .timeout(CLIENT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { backend, client }
    }

    pub fn backend(&self) -> &SearchBackend {
        &self.backend
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, ToolError> {
        let mut hits = match &self.backend {
            SearchBackend::Tavily { api_key } => self.search_tavily(api_key, query, max_results).await?,
            SearchBackend::DuckDuckGo => self.search_duckduckgo(query).await?,
            SearchBackend::Offline => curated_results(query),
        };
        hits.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
        hits.truncate(max_results);
        Ok(hits)
    }

    async fn search_tavily(
        &self,
        api_key: &str,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, ToolError> {
        let request = TavilySearchRequest {
            api_key,
            query,
            max_results,
            include_answer: false,
            include_raw_content: false,
        };

        let response = self
            .client
            .post("https://api.tavily.com/search")
            .json(&request)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(e, CLIENT_TIMEOUT))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_http_status(status, truncate_chars(&error_text, 200)));
        }

        let body: TavilySearchResponse = response
            .json()
            .await
            .map_err(|e| classify_reqwest_error(e, CLIENT_TIMEOUT))?;

        Ok(body
            .results
            .into_iter()
            .map(|r| SearchHit::scored(query, r.title, r.url, truncate_chars(&r.content, 400)))
            .collect())
    }

    async fn search_duckduckgo(&self, query: &str) -> Result<Vec<SearchHit>, ToolError> {
        let url = format!(
            "https://html.duckduckgo.com/html/?q={}",
            urlencoding::encode(query)
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(e, CLIENT_TIMEOUT))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            return Err(classify_http_status(status, "DuckDuckGo request failed".to_string()));
        }
        let html = response
            .text()
            .await
            .map_err(|e| classify_reqwest_error(e, CLIENT_TIMEOUT))?;

        if html.contains("anomaly-modal") || html.contains("Unfortunately, bots") {
            return Err(ToolError::Unavailable(
                "DuckDuckGo blocked the request with a CAPTCHA; configure TAVILY_API_KEY".to_string(),
            ));
        }

        Ok(extract_ddg_results(&html)
            .into_iter()
            .map(|(title, url, snippet)| SearchHit::scored(query, title, url, snippet))
            .collect())
    }
}

/// Extract `(title, url, snippet)` triples from DuckDuckGo HTML.
fn extract_ddg_results(html: &str) -> Vec<(String, String, String)> {
    let field = |chunk: &str, class: &str| -> Option<String> {
        chunk
            .split(class)
            .nth(1)
            .and_then(|s| s.split('>').nth(1))
            .and_then(|s| s.split('<').next())
            .map(|s| html_decode(s.trim()))
            .filter(|s| !s.is_empty())
    };

    html.split("class=\"result__body\"")
        .skip(1)
        .filter_map(|chunk| {
            let title = field(chunk, "class=\"result__a\"")?;
            let mut url = field(chunk, "class=\"result__url\"")?;
            if !url.starts_with("http") {
                url = format!("https://{}", url);
            }
            let snippet = field(chunk, "class=\"result__snippet\"").unwrap_or_default();
            Some((title, url, snippet))
        })
        .collect()
}

/// Basic HTML entity decoding.
fn html_decode(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ")
}

/// Curated entry points used when live search is switched off.
fn curated_results(query: &str) -> Vec<SearchHit> {
    let q = urlencoding::encode(query);
    let mut entries: Vec<(String, String, String)> = Vec::new();

    if detect_domain(query) == ResearchDomain::Healthcare {
        entries.push((
            format!("{} - Mayo Clinic", query),
            format!("https://www.mayoclinic.org/search/search-results?q={}", q),
            format!("Symptoms, causes, diagnosis and treatment information about {} from Mayo Clinic experts.", query),
        ));
        entries.push((
            format!("{}: research articles - PubMed", query),
            format!("https://pubmed.ncbi.nlm.nih.gov/?term={}", q),
            format!("Peer-reviewed biomedical literature on {} indexed by the National Library of Medicine.", query),
        ));
        entries.push((
            format!("{} | CDC", query),
            format!("https://www.cdc.gov/search/?query={}", q),
            format!("Public health guidance, statistics and prevention advice on {}.", query),
        ));
        entries.push((
            format!("{} - MedlinePlus", query),
            format!("https://medlineplus.gov/search/?query={}", q),
            format!("Plain-language health information about {} from the NIH.", query),
        ));
    }

    if contains_any(query, CURRENT_INFO_INDICATORS) {
        entries.push((
            format!("{}: latest news - Reuters", query),
            format!("https://www.reuters.com/site-search/?query={}", q),
            format!("Recent reporting and developments on {}.", query),
        ));
    }

    entries.push((
        format!("{} - Wikipedia", query),
        format!("https://en.wikipedia.org/w/index.php?search={}", q),
        format!("Encyclopedia overview of {} with references to primary sources.", query),
    ));
    entries.push((
        format!("{} | Britannica", query),
        format!("https://www.britannica.com/search?query={}", q),
        format!("Expert-reviewed background on {}.", query),
    ));

    entries
        .into_iter()
        .map(|(title, url, snippet)| SearchHit::scored(query, title, url, snippet))
        .collect()
}

/// Words that suggest the user wants current information.
pub const CURRENT_INFO_INDICATORS: &[&str] = &[
    "latest",
    "recent",
    "current",
    "new ",
    "today",
    "now",
    "breakthrough",
    "development",
    "update",
];

#[async_trait]
impl Tool for WebSearch {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for current information. Returns scored results with titles, snippets, URLs and source types."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of results to return (default: 10, max: 50)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let query = args["query"]
            .as_str()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("missing 'query' argument".to_string()))?;
        let max_results = args["max_results"].as_u64().unwrap_or(10).clamp(1, 50) as usize;

        let hits = self.search(query, max_results).await?;
        tracing::debug!(
            "web_search via {} returned {} hits for {:?}",
            self.backend.label(),
            hits.len(),
            query
        );
        Ok(json!({ "query": query, "backend": self.backend.label(), "results": hits }))
    }
}
