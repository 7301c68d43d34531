use crate::db::{
    AbstractSource, FetchContext, FetchOutcome, NotFoundReason, SourceKind, acs::Acs, arxiv::Arxiv,
    core_ac::Core, crossref::Crossref, europe_pmc::EuropePmc, html_meta::HtmlMeta,
    pubmed::PubMed, semantic_scholar::SemanticScholar, ssrn::Ssrn,
};
use crate::keywords::{DEFAULT_KEYWORD_LIMIT, extract_keywords};
use crate::pipeline::FullTextProvider;
use crate::session::{BrowserSession, SessionTiming};
use crate::stats::{Completeness, RunStats};
use crate::text_utils::is_substantial;
use crate::{Config, CoreError, HARVESTER_SOURCE, NO_SOURCE, Work};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One source invocation within a waterfall run.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    pub source: SourceKind,
    pub outcome: FetchOutcome,
    pub elapsed: Duration,
}

/// What happened to one Work.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentOutcome {
    /// The harvested abstract was sufficient; no source was called.
    pub skipped_existing: bool,
    pub winner: Option<SourceKind>,
    /// Sources actually called, in order. Sources skipped by `applies_to`
    /// are not listed.
    pub attempts: Vec<Attempt>,
    pub completeness: Completeness,
}

/// Ordered fallback over the abstract sources.
///
/// Sources run strictly one after another in [`SourceKind::WATERFALL`]
/// order and the first usable abstract ends the run for that Work.
pub struct Waterfall {
    sources: Vec<Box<dyn AbstractSource>>,
    ctx: FetchContext,
    keywords_enabled: bool,
    keyword_limit: usize,
    fulltext_enabled: bool,
    fulltext: Option<Box<dyn FullTextProvider>>,
}

impl Waterfall {
    /// Sources are put into waterfall order regardless of the order given.
    pub fn new(mut sources: Vec<Box<dyn AbstractSource>>, ctx: FetchContext) -> Self {
        sources.sort_by_key(|s| s.kind());
        Self {
            sources,
            ctx,
            keywords_enabled: true,
            keyword_limit: DEFAULT_KEYWORD_LIMIT,
            fulltext_enabled: true,
            fulltext: None,
        }
    }

    pub fn with_keywords(mut self, enabled: bool) -> Self {
        self.keywords_enabled = enabled;
        self
    }

    /// Attach the full-text hook. Only consulted for Works without full text,
    /// and never when the configuration leaves full text disabled.
    pub fn with_fulltext(mut self, provider: Box<dyn FullTextProvider>) -> Self {
        self.fulltext = Some(provider);
        self
    }

    /// Build every source enabled by `config`, in waterfall order.
    pub fn from_config(config: &Config) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;
        let ctx = FetchContext::from_config(config, client);

        let mut sources: Vec<Box<dyn AbstractSource>> = Vec::new();
        for kind in SourceKind::WATERFALL {
            if !config.source_enabled(kind) {
                tracing::debug!(source = kind.label(), "source disabled");
                continue;
            }
            let source: Box<dyn AbstractSource> = match kind {
                SourceKind::Ssrn => Box::new(Ssrn::new(config.selectors.ssrn.clone())),
                SourceKind::Acs => {
                    let session = BrowserSession::new(SessionTiming::default())?;
                    Box::new(Acs::new(Arc::new(session), config.selectors.acs.clone()))
                }
                SourceKind::Arxiv => Box::new(Arxiv::new()),
                SourceKind::SemanticScholar => {
                    Box::new(SemanticScholar::new(config.s2_api_key.clone()))
                }
                SourceKind::EuropePmc => Box::new(EuropePmc::new()),
                SourceKind::Crossref => Box::new(Crossref::new()),
                SourceKind::PubMed => Box::new(PubMed::new()),
                SourceKind::Core => {
                    if config.core_api_key.is_none() {
                        tracing::debug!("CORE_API_KEY not set; CORE will be skipped");
                    }
                    Box::new(Core::new(config.core_api_key.clone()))
                }
                SourceKind::HtmlMeta => Box::new(HtmlMeta::new(config.selectors.html_meta.clone())),
            };
            sources.push(source);
        }

        let mut waterfall = Self::new(sources, ctx).with_keywords(config.enable_nlp_keywords);
        waterfall.fulltext_enabled = config.enable_fulltext;
        Ok(waterfall)
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Enrich one Work in place and fold the result into `stats`.
    pub async fn enrich(&self, work: &mut Work, stats: &mut RunStats) -> EnrichmentOutcome {
        let mut attempts = Vec::new();
        let mut winner = None;
        let skipped_existing = is_substantial(&work.summary);

        if skipped_existing {
            if work.summary_source.is_empty() {
                work.summary_source = HARVESTER_SOURCE.to_string();
            }
            tracing::debug!(title = %work.title, source = %work.summary_source, "abstract already present");
        } else {
            for source in &self.sources {
                if !source.applies_to(work) {
                    tracing::debug!(source = source.name(), title = %work.title, "not applicable");
                    continue;
                }

                let start = Instant::now();
                let outcome = enforce_min_length(source.fetch(work, &self.ctx).await);
                let elapsed = start.elapsed();

                match &outcome {
                    FetchOutcome::Found {
                        abstract_text,
                        keywords,
                    } => {
                        tracing::info!(
                            source = source.name(),
                            title = %work.title,
                            chars = abstract_text.chars().count(),
                            "abstract recovered"
                        );
                        work.summary = abstract_text.clone();
                        work.summary_source = source.kind().label().to_string();
                        merge_tags(work, keywords.iter().map(String::as_str));
                        winner = Some(source.kind());
                    }
                    FetchOutcome::NotFound(reason) => {
                        tracing::debug!(
                            source = source.name(),
                            title = %work.title,
                            reason = %reason,
                            "no abstract"
                        );
                    }
                }

                attempts.push(Attempt {
                    source: source.kind(),
                    outcome,
                    elapsed,
                });
                if winner.is_some() {
                    break;
                }
            }

            if winner.is_none() {
                if work.summary.is_empty() {
                    work.summary_source = NO_SOURCE.to_string();
                } else if work.summary_source.is_empty() {
                    work.summary_source = HARVESTER_SOURCE.to_string();
                }
                tracing::info!(title = %work.title, tried = attempts.len(), "no source had an abstract");
            }
        }

        if self.fulltext_enabled
            && work.full_text.is_empty()
            && let Some(provider) = &self.fulltext
        {
            let text = provider.full_text(work).await;
            if let Some(text) = text {
                work.full_text = text;
            }
        }

        if self.keywords_enabled {
            let basis = if work.summary.is_empty() {
                work.title.clone()
            } else {
                work.summary.clone()
            };
            let extracted = extract_keywords(&basis, self.keyword_limit);
            merge_tags(work, extracted.iter().map(String::as_str));
        }

        let outcome = EnrichmentOutcome {
            skipped_existing,
            winner,
            attempts,
            completeness: Completeness::classify(work),
        };
        stats.absorb(&outcome);
        outcome
    }
}

/// Sources may build `Found` directly; the length rule is applied here too.
fn enforce_min_length(outcome: FetchOutcome) -> FetchOutcome {
    match outcome {
        FetchOutcome::Found { abstract_text, .. } if !is_substantial(&abstract_text) => {
            FetchOutcome::NotFound(NotFoundReason::TooShort(abstract_text.trim().chars().count()))
        }
        FetchOutcome::Found {
            abstract_text,
            keywords,
        } => FetchOutcome::Found {
            abstract_text: abstract_text.trim().to_string(),
            keywords,
        },
        other => other,
    }
}

fn merge_tags<'a>(work: &mut Work, keywords: impl Iterator<Item = &'a str>) {
    for kw in keywords {
        let kw = kw.trim();
        if !kw.is_empty() {
            work.tags.insert(kw.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock::MockSource;

    fn ctx() -> FetchContext {
        FetchContext::new(reqwest::Client::new()).without_delays()
    }

    fn boxed(source: &Arc<MockSource>) -> Box<dyn AbstractSource> {
        Box::new(Arc::clone(source))
    }

    fn long_text() -> String {
        "Recovered abstract describing measured outcomes in detail. ".repeat(3)
    }

    #[tokio::test]
    async fn stops_at_first_success() {
        let first = Arc::new(MockSource::not_found(SourceKind::Arxiv));
        let second = Arc::new(
            MockSource::found(SourceKind::Crossref, long_text()).with_keywords(&["Ecology", " "]),
        );
        let third = Arc::new(MockSource::found(SourceKind::PubMed, long_text()));
        let waterfall = Waterfall::new(
            vec![boxed(&third), boxed(&first), boxed(&second)],
            ctx(),
        )
        .with_keywords(false);

        let mut work = Work::new("t");
        let mut stats = RunStats::new();
        let outcome = waterfall.enrich(&mut work, &mut stats).await;

        assert_eq!(outcome.winner, Some(SourceKind::Crossref));
        assert_eq!(outcome.attempts.len(), 2);
        assert_eq!(work.summary_source, "Crossref");
        assert_eq!(work.tags.len(), 1);
        assert!(work.tags.contains("Ecology"));
        assert_eq!(first.call_count(), 1);
        assert_eq!(second.call_count(), 1);
        assert_eq!(third.call_count(), 0);
        assert_eq!(stats.source_count(SourceKind::Crossref), 1);
    }

    #[tokio::test]
    async fn raw_short_found_falls_through() {
        let short = Arc::new(MockSource::new(
            SourceKind::Arxiv,
            FetchOutcome::Found {
                abstract_text: "x".repeat(40),
                keywords: vec!["ignored".into()],
            },
        ));
        let crossref = Arc::new(MockSource::found(SourceKind::Crossref, long_text()));
        let waterfall =
            Waterfall::new(vec![boxed(&short), boxed(&crossref)], ctx()).with_keywords(false);

        let mut work = Work::new("t");
        let outcome = waterfall.enrich(&mut work, &mut RunStats::new()).await;

        assert_eq!(outcome.winner, Some(SourceKind::Crossref));
        assert_eq!(
            outcome.attempts[0].outcome,
            FetchOutcome::NotFound(NotFoundReason::TooShort(40))
        );
        assert_eq!(work.summary_source, "Crossref");
        assert!(!work.tags.contains("ignored"));
        assert_eq!(crossref.call_count(), 1);
    }

    #[tokio::test]
    async fn inapplicable_sources_are_not_called() {
        let skipped = Arc::new(MockSource::found(SourceKind::Ssrn, long_text()).not_applicable());
        let fallback = Arc::new(MockSource::found(SourceKind::Arxiv, long_text()));
        let waterfall = Waterfall::new(
            vec![boxed(&skipped), boxed(&fallback)],
            ctx(),
        );

        let mut work = Work::new("t");
        let outcome = waterfall.enrich(&mut work, &mut RunStats::new()).await;
        assert_eq!(skipped.call_count(), 0);
        assert_eq!(outcome.winner, Some(SourceKind::Arxiv));
        assert_eq!(outcome.attempts.len(), 1);
    }

    #[tokio::test]
    async fn sufficient_summary_skips_every_source() {
        let source = Arc::new(MockSource::found(SourceKind::Arxiv, long_text()));
        let waterfall = Waterfall::new(vec![boxed(&source)], ctx());

        let mut work = Work {
            summary: "h".repeat(100),
            ..Work::new("t")
        };
        let mut stats = RunStats::new();
        let outcome = waterfall.enrich(&mut work, &mut stats).await;

        assert!(outcome.skipped_existing);
        assert_eq!(source.call_count(), 0);
        assert_eq!(work.summary_source, HARVESTER_SOURCE);
        assert_eq!(stats.openalex_existing, 1);
    }

    #[tokio::test]
    async fn existing_provenance_is_kept() {
        let waterfall = Waterfall::new(vec![], ctx());
        let mut work = Work {
            summary: "h".repeat(150),
            summary_source: "OpenAlex:inverted_index".into(),
            ..Work::new("t")
        };
        waterfall.enrich(&mut work, &mut RunStats::new()).await;
        assert_eq!(work.summary_source, "OpenAlex:inverted_index");
    }

    #[tokio::test]
    async fn exhaustion_keeps_short_harvested_text() {
        let source = Arc::new(MockSource::new(
            SourceKind::Crossref,
            FetchOutcome::NotFound(NotFoundReason::NoMatch),
        ));
        let waterfall = Waterfall::new(vec![boxed(&source)], ctx()).with_keywords(false);

        let mut short = Work {
            summary: "Short blurb.".into(),
            ..Work::new("t")
        };
        let mut stats = RunStats::new();
        let outcome = waterfall.enrich(&mut short, &mut stats).await;
        assert_eq!(outcome.winner, None);
        assert_eq!(short.summary, "Short blurb.");
        assert_eq!(short.summary_source, HARVESTER_SOURCE);

        let mut empty = Work::new("t");
        waterfall.enrich(&mut empty, &mut stats).await;
        assert_eq!(empty.summary_source, NO_SOURCE);
        assert_eq!(stats.no_abstract, 2);
        assert_eq!(source.call_count(), 2);
    }

    #[tokio::test]
    async fn keyword_fallback_uses_title_when_summary_empty() {
        let waterfall = Waterfall::new(vec![], ctx());
        let mut work = Work::new("Quantum Entanglement Experiments");
        let outcome = waterfall.enrich(&mut work, &mut RunStats::new()).await;

        assert!(work.tags.contains("quantum"));
        assert!(work.tags.contains("entanglement"));
        assert_eq!(outcome.completeness, Completeness::MissingTwo);
    }

    struct FixedText;

    impl FullTextProvider for FixedText {
        fn full_text<'a>(
            &'a self,
            _work: &'a Work,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Option<String>> + Send + 'a>>
        {
            Box::pin(async { Some("Full body of the paper.".to_string()) })
        }
    }

    #[tokio::test]
    async fn fulltext_hook_fills_empty_full_text() {
        let waterfall = Waterfall::new(
            vec![Box::new(MockSource::found(SourceKind::Arxiv, long_text())) as Box<dyn AbstractSource>],
            ctx(),
        )
        .with_fulltext(Box::new(FixedText));

        let mut work = Work::new("Graph Neural Networks");
        let outcome = waterfall.enrich(&mut work, &mut RunStats::new()).await;
        assert_eq!(work.full_text, "Full body of the paper.");
        assert_eq!(outcome.completeness, Completeness::HasAll);
    }

    #[tokio::test]
    async fn fulltext_hook_off_unless_enabled() {
        let waterfall = Waterfall::from_config(&Config {
            disabled_sources: SourceKind::WATERFALL.iter().map(|k| k.key().to_string()).collect(),
            ..Config::default()
        })
        .unwrap()
        .with_fulltext(Box::new(FixedText));

        let mut work = Work::new("Graph Neural Networks");
        waterfall.enrich(&mut work, &mut RunStats::new()).await;
        assert!(work.full_text.is_empty());
    }

    #[test]
    fn from_config_respects_gates() {
        let config = Config {
            disabled_sources: vec!["pubmed".into(), "CORE".into()],
            ..Config::default()
        };
        let waterfall = Waterfall::from_config(&config).unwrap();
        assert_eq!(
            waterfall.source_names(),
            vec![
                "SSRN HTML",
                "arXiv",
                "Semantic Scholar",
                "Europe PMC",
                "Crossref",
                "HTML Meta"
            ]
        );

        let config = Config {
            enable_acs: true,
            enable_html_scraping: false,
            ..Config::default()
        };
        let names = Waterfall::from_config(&config).unwrap().source_names().join(",");
        assert!(names.starts_with("SSRN HTML,ACS HTML,arXiv"));
        assert!(!names.contains("HTML Meta"));
    }
}
