//! Abstract sources and the contract the waterfall drives them through.

pub mod acs;
pub mod arxiv;
pub mod core_ac;
pub mod crossref;
pub mod europe_pmc;
pub mod html_meta;
pub mod mock;
pub mod pubmed;
pub mod semantic_scholar;
pub mod ssrn;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::retry::{FetchError, RetryPolicy};
use crate::text_utils::is_substantial;
use crate::{Config, Work};

/// Every source the waterfall knows, declared in waterfall priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SourceKind {
    Ssrn,
    Acs,
    Arxiv,
    SemanticScholar,
    EuropePmc,
    Crossref,
    PubMed,
    Core,
    HtmlMeta,
}

impl SourceKind {
    /// Fixed priority order of the waterfall.
    pub const WATERFALL: [SourceKind; 9] = [
        SourceKind::Ssrn,
        SourceKind::Acs,
        SourceKind::Arxiv,
        SourceKind::SemanticScholar,
        SourceKind::EuropePmc,
        SourceKind::Crossref,
        SourceKind::PubMed,
        SourceKind::Core,
        SourceKind::HtmlMeta,
    ];

    /// Provenance label written to `summary_source` when this source wins.
    pub fn label(self) -> &'static str {
        match self {
            SourceKind::Ssrn => "SSRN HTML",
            SourceKind::Acs => "ACS HTML",
            SourceKind::Arxiv => "arXiv",
            SourceKind::SemanticScholar => "Semantic Scholar",
            SourceKind::EuropePmc => "Europe PMC",
            SourceKind::Crossref => "Crossref",
            SourceKind::PubMed => "PubMed",
            SourceKind::Core => "CORE",
            SourceKind::HtmlMeta => "HTML Meta",
        }
    }

    /// Short config key (`semantic_scholar`, `html_meta`, ...).
    pub fn key(self) -> &'static str {
        match self {
            SourceKind::Ssrn => "ssrn",
            SourceKind::Acs => "acs",
            SourceKind::Arxiv => "arxiv",
            SourceKind::SemanticScholar => "semantic_scholar",
            SourceKind::EuropePmc => "europe_pmc",
            SourceKind::Crossref => "crossref",
            SourceKind::PubMed => "pubmed",
            SourceKind::Core => "core",
            SourceKind::HtmlMeta => "html_meta",
        }
    }

    /// Case-insensitive match against either the label or the key.
    pub fn matches_name(self, name: &str) -> bool {
        let name = name.trim();
        name.eq_ignore_ascii_case(self.label()) || name.eq_ignore_ascii_case(self.key())
    }

    pub fn from_name(name: &str) -> Option<SourceKind> {
        Self::WATERFALL.into_iter().find(|k| k.matches_name(name))
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Why a source produced no abstract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotFoundReason {
    /// The Work carries no key this source can look up.
    NoIdentifier,
    /// The source answered but has no record or no abstract for it.
    NoMatch,
    /// An abstract came back but was shorter than the minimum (length in chars).
    TooShort(usize),
    Blocked,
    RateLimited,
    Failed(String),
}

impl std::fmt::Display for NotFoundReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotFoundReason::NoIdentifier => write!(f, "no usable identifier"),
            NotFoundReason::NoMatch => write!(f, "no match"),
            NotFoundReason::TooShort(n) => write!(f, "abstract too short ({} chars)", n),
            NotFoundReason::Blocked => write!(f, "access blocked"),
            NotFoundReason::RateLimited => write!(f, "rate limited"),
            NotFoundReason::Failed(msg) => write!(f, "{}", msg),
        }
    }
}

/// Result of one source call. Fetchers never return errors; every failure
/// is folded into `NotFound` with its reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Found {
        abstract_text: String,
        keywords: Vec<String>,
    },
    NotFound(NotFoundReason),
}

impl FetchOutcome {
    /// Build a `Found`, demoting text under the minimum length to
    /// `NotFound(TooShort)`.
    pub fn found(abstract_text: impl Into<String>, keywords: Vec<String>) -> Self {
        let abstract_text = abstract_text.into();
        let trimmed = abstract_text.trim();
        if !is_substantial(trimmed) {
            return FetchOutcome::NotFound(NotFoundReason::TooShort(trimmed.chars().count()));
        }
        FetchOutcome::Found {
            abstract_text: trimmed.to_string(),
            keywords,
        }
    }

    /// `found` when `text` is present, `NotFound(NoMatch)` otherwise.
    pub fn from_option(text: Option<String>, keywords: Vec<String>) -> Self {
        match text {
            Some(t) if !t.trim().is_empty() => Self::found(t, keywords),
            _ => FetchOutcome::NotFound(NotFoundReason::NoMatch),
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, FetchOutcome::Found { .. })
    }
}

impl From<FetchError> for FetchOutcome {
    fn from(e: FetchError) -> Self {
        let reason = match e {
            FetchError::Blocked => NotFoundReason::Blocked,
            FetchError::RateLimited { .. } => NotFoundReason::RateLimited,
            FetchError::Status(404) => NotFoundReason::NoMatch,
            other => NotFoundReason::Failed(other.to_string()),
        };
        FetchOutcome::NotFound(reason)
    }
}

impl From<Result<FetchOutcome, FetchError>> for FetchOutcome {
    fn from(result: Result<FetchOutcome, FetchError>) -> Self {
        result.unwrap_or_else(FetchOutcome::from)
    }
}

/// Shared, per-run settings every fetcher reads.
#[derive(Clone)]
pub struct FetchContext {
    pub client: reqwest::Client,
    /// Timeout for metadata APIs.
    pub api_timeout: Duration,
    /// Timeout for full HTML page fetches.
    pub page_timeout: Duration,
    /// Courtesy pause before each source's own requests.
    pub polite_delay: Duration,
    /// Policy for the sources that retry (arXiv, Crossref, PubMed).
    pub retry: RetryPolicy,
    pub contact_email: Option<String>,
}

impl FetchContext {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            api_timeout: Duration::from_secs(10),
            page_timeout: Duration::from_secs(20),
            polite_delay: Duration::from_millis(200),
            retry: RetryPolicy::default(),
            contact_email: None,
        }
    }

    pub fn from_config(config: &Config, client: reqwest::Client) -> Self {
        Self {
            client,
            api_timeout: config.api_timeout(),
            page_timeout: config.page_timeout(),
            polite_delay: config.polite_delay(),
            retry: RetryPolicy::default(),
            contact_email: config.contact_email.clone(),
        }
    }

    /// Zero delays and zero backoff, for tests against local mock servers.
    pub fn without_delays(mut self) -> Self {
        self.polite_delay = Duration::ZERO;
        self.retry.base_delay = Duration::ZERO;
        self
    }

    /// Identifying User-Agent for the public metadata APIs.
    pub fn api_user_agent(&self) -> String {
        match &self.contact_email {
            Some(email) => format!(
                "scholar-enrich/{} (mailto:{})",
                env!("CARGO_PKG_VERSION"),
                email
            ),
            None => format!("scholar-enrich/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl std::fmt::Debug for FetchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchContext")
            .field("api_timeout", &self.api_timeout)
            .field("page_timeout", &self.page_timeout)
            .field("polite_delay", &self.polite_delay)
            .field("retry", &self.retry)
            .field("contact_email", &self.contact_email.as_ref().map(|_| "***"))
            .finish()
    }
}

/// A source that may recover an abstract for a Work.
pub trait AbstractSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// The canonical name of this source (the provenance label).
    fn name(&self) -> &str {
        self.kind().label()
    }

    /// Whether the Work carries anything this source can look up.
    /// The waterfall skips the source without calling it when this is false.
    fn applies_to(&self, work: &Work) -> bool;

    /// Look up an abstract for `work`. Never fails past this boundary.
    fn fetch<'a>(
        &'a self,
        work: &'a Work,
        ctx: &'a FetchContext,
    ) -> Pin<Box<dyn Future<Output = FetchOutcome> + Send + 'a>>;
}

/// Shared sources (tests keep a handle to inspect call counts).
impl<T: AbstractSource + ?Sized> AbstractSource for std::sync::Arc<T> {
    fn kind(&self) -> SourceKind {
        (**self).kind()
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn applies_to(&self, work: &Work) -> bool {
        (**self).applies_to(work)
    }

    fn fetch<'a>(
        &'a self,
        work: &'a Work,
        ctx: &'a FetchContext,
    ) -> Pin<Box<dyn Future<Output = FetchOutcome> + Send + 'a>> {
        (**self).fetch(work, ctx)
    }
}

/// Whether the Work belongs to SSRN, by URL or DOI prefix.
pub(crate) fn is_ssrn_work(work: &Work) -> bool {
    let url_hit = work
        .url
        .as_deref()
        .is_some_and(|u| u.to_ascii_lowercase().contains("ssrn"));
    let doi_hit = work
        .doi()
        .is_some_and(|d| d.to_ascii_lowercase().starts_with("10.2139/ssrn"));
    url_hit || doi_hit
}

/// Whether the Work belongs to ACS, by URL host or DOI prefix.
pub(crate) fn is_acs_work(work: &Work) -> bool {
    let url_hit = work
        .url
        .as_deref()
        .is_some_and(|u| u.to_ascii_lowercase().contains("pubs.acs.org"));
    let doi_hit = work.doi().is_some_and(|d| d.starts_with("10.1021/"));
    url_hit || doi_hit
}

/// Run blocking HTML parsing off the async executor (scraper's DOM is `!Send`).
pub(crate) async fn parse_html<T, F>(html: String, parse: F) -> Result<T, FetchError>
where
    T: Send + 'static,
    F: FnOnce(&str) -> T + Send + 'static,
{
    tokio::task::spawn_blocking(move || parse(&html))
        .await
        .map_err(|e| FetchError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waterfall_order_is_fixed() {
        let labels: Vec<_> = SourceKind::WATERFALL.iter().map(|k| k.label()).collect();
        assert_eq!(
            labels,
            vec![
                "SSRN HTML",
                "ACS HTML",
                "arXiv",
                "Semantic Scholar",
                "Europe PMC",
                "Crossref",
                "PubMed",
                "CORE",
                "HTML Meta",
            ]
        );
        // declaration order doubles as priority order
        let mut sorted = SourceKind::WATERFALL;
        sorted.sort();
        assert_eq!(sorted, SourceKind::WATERFALL);
    }

    #[test]
    fn names_resolve() {
        assert_eq!(SourceKind::from_name("semantic scholar"), Some(SourceKind::SemanticScholar));
        assert_eq!(SourceKind::from_name("europe_pmc"), Some(SourceKind::EuropePmc));
        assert_eq!(SourceKind::from_name(" CORE "), Some(SourceKind::Core));
        assert_eq!(SourceKind::from_name("dblp"), None);
    }

    #[test]
    fn short_text_is_not_found() {
        let forty = "x".repeat(40);
        assert_eq!(
            FetchOutcome::found(forty, vec![]),
            FetchOutcome::NotFound(NotFoundReason::TooShort(40))
        );
        assert!(!FetchOutcome::found("y".repeat(99), vec![]).is_found());
        assert!(FetchOutcome::found("z".repeat(100), vec![]).is_found());
    }

    #[test]
    fn errors_fold_into_reasons() {
        assert_eq!(
            FetchOutcome::from(FetchError::Blocked),
            FetchOutcome::NotFound(NotFoundReason::Blocked)
        );
        assert_eq!(
            FetchOutcome::from(FetchError::RateLimited { retry_after: None }),
            FetchOutcome::NotFound(NotFoundReason::RateLimited)
        );
        assert_eq!(
            FetchOutcome::from(FetchError::Status(404)),
            FetchOutcome::NotFound(NotFoundReason::NoMatch)
        );
        assert!(matches!(
            FetchOutcome::from(FetchError::Timeout),
            FetchOutcome::NotFound(NotFoundReason::Failed(_))
        ));
    }

    #[test]
    fn host_membership() {
        let ssrn = Work {
            doi: Some("10.2139/ssrn-123".into()),
            ..Work::new("t")
        };
        assert!(is_ssrn_work(&ssrn));
        assert!(!is_acs_work(&ssrn));

        let acs = Work {
            url: Some("https://pubs.acs.org/doi/10.1021/acs.jpca.1234".into()),
            ..Work::new("t")
        };
        assert!(is_acs_work(&acs));
        assert!(!is_ssrn_work(&acs));
    }
}
