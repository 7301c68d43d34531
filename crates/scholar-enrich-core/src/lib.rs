use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub mod config_file;
pub mod db;
pub mod identifiers;
pub mod keywords;
pub mod orchestrator;
pub mod pipeline;
pub mod retry;
pub mod session;
pub mod stats;
pub mod text_utils;

// Re-export for convenience
pub use db::{AbstractSource, FetchContext, FetchOutcome, NotFoundReason, SourceKind};
pub use identifiers::{extract_arxiv_id, extract_doi, extract_pmid, extract_ssrn_id};
pub use orchestrator::{Attempt, EnrichmentOutcome, Waterfall};
pub use pipeline::{FullTextProvider, Harvester, Pipeline, ProgressEvent, RecordStore, StoreError};
pub use retry::{FetchError, RetryPolicy, with_retry};
pub use stats::{Completeness, RunStats};

/// Provenance tag for a Work whose harvester abstract was kept as-is.
pub const HARVESTER_SOURCE: &str = "OpenAlex";

/// Provenance tag for a Work that ended the waterfall without an abstract.
pub const NO_SOURCE: &str = "NONE";

/// One bibliographic item under enrichment.
///
/// Harvester input is loosely shaped; [`Work::from_raw`] normalizes it into
/// this struct before it reaches the waterfall. Fields this crate does not
/// interpret are carried through untouched in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Work {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_url: Option<String>,
    /// The abstract. Empty means missing.
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub summary_source: String,
    #[serde(default)]
    pub full_text: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Keys [`Work::from_raw`] consumes; everything else lands in `extra`.
const KNOWN_KEYS: &[&str] = &[
    "title",
    "display_name",
    "url",
    "doi",
    "pdfUrl",
    "pdf_url",
    "summary",
    "abstract",
    "summarySource",
    "summary_source",
    "fullText",
    "full_text",
    "tags",
    "keywords",
];

/// First non-empty string among `keys`, trimmed.
fn string_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .filter_map(|v| v.as_str())
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(String::from)
}

fn tag_field(obj: &Map<String, Value>) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();
    for key in ["tags", "keywords"] {
        match obj.get(key) {
            Some(Value::Array(items)) => {
                tags.extend(
                    items
                        .iter()
                        .filter_map(|v| v.as_str())
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from),
                );
            }
            Some(Value::String(s)) => {
                tags.extend(
                    s.split(',')
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .map(String::from),
                );
            }
            _ => {}
        }
    }
    tags
}

impl Work {
    /// Create a title-only Work.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Normalize one harvester record.
    ///
    /// Missing, `null` and empty-string optionals all become `None` (or `""`
    /// for the text fields). Accepts `abstract`, snake_case spellings and
    /// tags given either as an array or a comma-separated string. Fails only
    /// when the record is not an object or has no usable title.
    pub fn from_raw(raw: &Value) -> Result<Self, CoreError> {
        let obj = raw
            .as_object()
            .ok_or_else(|| CoreError::InvalidWork("record is not a JSON object".into()))?;

        let title = string_field(obj, &["title", "display_name"])
            .ok_or_else(|| CoreError::InvalidWork("record has no title".into()))?;

        let doi = string_field(obj, &["doi"])
            .map(|d| identifiers::normalize_doi(&d).unwrap_or(d));

        let extra = obj
            .iter()
            .filter(|(k, _)| !KNOWN_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self {
            title,
            url: string_field(obj, &["url"]),
            doi,
            pdf_url: string_field(obj, &["pdfUrl", "pdf_url"]),
            summary: string_field(obj, &["summary", "abstract"]).unwrap_or_default(),
            summary_source: string_field(obj, &["summarySource", "summary_source"])
                .unwrap_or_default(),
            full_text: string_field(obj, &["fullText", "full_text"]).unwrap_or_default(),
            tags: tag_field(obj),
            extra,
        })
    }

    /// DOI from the explicit field, else from a resolver URL.
    pub fn doi(&self) -> Option<String> {
        self.doi
            .as_deref()
            .and_then(identifiers::normalize_doi)
            .or_else(|| self.url.as_deref().and_then(identifiers::extract_doi))
    }

    /// arXiv ID from the landing URL, the PDF URL, or an arXiv DOI.
    pub fn arxiv_id(&self) -> Option<String> {
        self.url
            .as_deref()
            .and_then(identifiers::extract_arxiv_id)
            .or_else(|| self.pdf_url.as_deref().and_then(identifiers::extract_arxiv_id))
            .or_else(|| self.doi().as_deref().and_then(identifiers::arxiv_id_from_doi))
    }

    pub fn pmid(&self) -> Option<String> {
        self.url.as_deref().and_then(identifiers::extract_pmid)
    }

    /// SSRN numeric ID from the DOI, then the URL.
    pub fn ssrn_id(&self) -> Option<String> {
        self.doi()
            .as_deref()
            .and_then(identifiers::extract_ssrn_id)
            .or_else(|| self.url.as_deref().and_then(identifiers::extract_ssrn_id))
    }

    /// De-duplication key: the DOI when known, else the URL, else the title.
    pub fn identity(&self) -> String {
        if let Some(doi) = self.doi() {
            format!("doi:{}", doi.to_lowercase())
        } else if let Some(url) = &self.url {
            format!("url:{}", url.trim_end_matches('/'))
        } else {
            format!("title:{}", self.title.trim().to_lowercase())
        }
    }
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("harvester error: {0}")]
    Harvester(String),
    #[error("record store error: {0}")]
    Store(#[from] StoreError),
    #[error("invalid work record: {0}")]
    InvalidWork(String),
    #[error("configuration error: {0}")]
    Config(String),
}

/// CSS selector lists for the HTML scrapers, in priority order.
///
/// Publisher markup drifts; these are configuration rather than constants so
/// a redesign can be absorbed without a rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorConfig {
    pub ssrn: Vec<String>,
    pub acs: Vec<String>,
    pub html_meta: Vec<String>,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            ssrn: vec![".abstract-text".into()],
            acs: vec![
                "div.article_abstract-content p.articleBody_abstractText".into(),
                "p.articleBody_abstractText".into(),
                "div.article_abstract-content".into(),
            ],
            html_meta: vec![
                ".abstract".into(),
                "[class*=abstract]".into(),
                "[id*=abstract]".into(),
                "meta[name=description]".into(),
            ],
        }
    }
}

/// Configuration for an enrichment run.
#[derive(Clone)]
pub struct Config {
    /// Contact address sent to APIs that offer a polite pool.
    pub contact_email: Option<String>,
    pub s2_api_key: Option<String>,
    pub core_api_key: Option<String>,
    pub enable_fulltext: bool,
    /// Gates the generic HTML meta fetcher only.
    pub enable_html_scraping: bool,
    pub enable_nlp_keywords: bool,
    /// The ACS fetcher keeps its slot in the waterfall but is off unless set.
    pub enable_acs: bool,
    pub max_papers: usize,
    pub api_timeout_secs: u64,
    pub page_timeout_secs: u64,
    pub polite_delay_ms: u64,
    /// Sources removed from the waterfall, by label or key.
    pub disabled_sources: Vec<String>,
    pub selectors: SelectorConfig,
}

impl Config {
    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_secs)
    }

    pub fn polite_delay(&self) -> Duration {
        Duration::from_millis(self.polite_delay_ms)
    }

    /// Whether `kind` takes part in the waterfall under this configuration.
    pub fn source_enabled(&self, kind: SourceKind) -> bool {
        if self.disabled_sources.iter().any(|d| kind.matches_name(d)) {
            return false;
        }
        match kind {
            SourceKind::Acs => self.enable_acs,
            SourceKind::HtmlMeta => self.enable_html_scraping,
            _ => true,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("contact_email", &self.contact_email.as_ref().map(|_| "***"))
            .field("s2_api_key", &self.s2_api_key.as_ref().map(|_| "***"))
            .field("core_api_key", &self.core_api_key.as_ref().map(|_| "***"))
            .field("enable_fulltext", &self.enable_fulltext)
            .field("enable_html_scraping", &self.enable_html_scraping)
            .field("enable_nlp_keywords", &self.enable_nlp_keywords)
            .field("enable_acs", &self.enable_acs)
            .field("max_papers", &self.max_papers)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("page_timeout_secs", &self.page_timeout_secs)
            .field("polite_delay_ms", &self.polite_delay_ms)
            .field("disabled_sources", &self.disabled_sources)
            .field("selectors", &self.selectors)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            contact_email: None,
            s2_api_key: None,
            core_api_key: None,
            enable_fulltext: false,
            enable_html_scraping: true,
            enable_nlp_keywords: true,
            enable_acs: false,
            max_papers: 300,
            api_timeout_secs: 10,
            page_timeout_secs: 20,
            polite_delay_ms: 200,
            disabled_sources: vec![],
            selectors: SelectorConfig::default(),
        }
    }
}
