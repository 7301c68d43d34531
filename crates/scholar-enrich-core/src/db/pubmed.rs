use super::{AbstractSource, FetchContext, FetchOutcome, NotFoundReason, SourceKind};
use crate::Work;
use crate::retry::{FetchError, check_response_status, polite_pause, with_retry};
use crate::text_utils::collapse_whitespace;
use std::future::Future;
use std::pin::Pin;

const DEFAULT_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

/// PubMed via NCBI E-utilities: ESearch (title, top hit) when no PMID is
/// known, then EFetch for the abstract XML.
pub struct PubMed {
    base_url: String,
}

impl PubMed {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// E-utilities etiquette parameters.
    fn etiquette(ctx: &FetchContext) -> Vec<(&'static str, String)> {
        let mut params = vec![("tool", "scholar-enrich".to_string())];
        if let Some(email) = &ctx.contact_email {
            params.push(("email", email.clone()));
        }
        params
    }

    async fn search_pmid(
        &self,
        title: &str,
        ctx: &FetchContext,
    ) -> Result<Option<String>, FetchError> {
        let url = format!("{}/esearch.fcgi", self.base_url);
        let term = format!("{}[Title]", title);
        let data = with_retry(ctx.retry, "PubMed", || async {
            let resp = ctx
                .client
                .get(&url)
                .query(&[
                    ("db", "pubmed"),
                    ("term", term.as_str()),
                    ("retmode", "json"),
                    ("retmax", "1"),
                ])
                .query(&Self::etiquette(ctx))
                .header("User-Agent", ctx.api_user_agent())
                .timeout(ctx.api_timeout)
                .send()
                .await?;
            check_response_status(&resp)?;
            Ok::<_, FetchError>(resp.json::<serde_json::Value>().await?)
        })
        .await?;

        Ok(data["esearchresult"]["idlist"]
            .as_array()
            .and_then(|ids| ids.first())
            .and_then(|v| v.as_str())
            .map(String::from))
    }

    async fn fetch_abstract_xml(
        &self,
        pmid: &str,
        ctx: &FetchContext,
    ) -> Result<String, FetchError> {
        let url = format!("{}/efetch.fcgi", self.base_url);
        with_retry(ctx.retry, "PubMed", || async {
            let resp = ctx
                .client
                .get(&url)
                .query(&[
                    ("db", "pubmed"),
                    ("id", pmid),
                    ("retmode", "xml"),
                    ("rettype", "abstract"),
                ])
                .query(&Self::etiquette(ctx))
                .header("User-Agent", ctx.api_user_agent())
                .timeout(ctx.api_timeout)
                .send()
                .await?;
            check_response_status(&resp)?;
            Ok::<_, FetchError>(resp.text().await?)
        })
        .await
    }
}

impl Default for PubMed {
    fn default() -> Self {
        Self::new()
    }
}

impl AbstractSource for PubMed {
    fn kind(&self) -> SourceKind {
        SourceKind::PubMed
    }

    fn applies_to(&self, _work: &Work) -> bool {
        true
    }

    fn fetch<'a>(
        &'a self,
        work: &'a Work,
        ctx: &'a FetchContext,
    ) -> Pin<Box<dyn Future<Output = FetchOutcome> + Send + 'a>> {
        Box::pin(async move {
            polite_pause(ctx.polite_delay).await;

            let pmid = match work.pmid() {
                Some(pmid) => pmid,
                None => match self.search_pmid(&work.title, ctx).await {
                    Ok(Some(pmid)) => pmid,
                    Ok(None) => return FetchOutcome::NotFound(NotFoundReason::NoMatch),
                    Err(e) => return e.into(),
                },
            };

            match self
                .fetch_abstract_xml(&pmid, ctx)
                .await
                .and_then(|xml| parse_efetch(&xml))
            {
                Ok(article) => FetchOutcome::from_option(article.abstract_text, article.keywords),
                Err(e) => e.into(),
            }
        })
    }
}

#[derive(Debug, Default, PartialEq)]
struct PubmedArticle {
    abstract_text: Option<String>,
    keywords: Vec<String>,
}

/// First `<AbstractText>` (inline markup flattened) and every `<Keyword>`.
fn parse_efetch(xml: &str) -> Result<PubmedArticle, FetchError> {
    use quick_xml::Reader;
    use quick_xml::events::Event;

    let mut reader = Reader::from_str(xml);
    let mut article = PubmedArticle::default();

    // depth inside the first AbstractText; 0 = outside
    let mut abstract_depth = 0usize;
    let mut abstract_done = false;
    let mut abstract_buf = String::new();
    let mut in_keyword = false;
    let mut keyword_buf = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = e.local_name();
                if abstract_depth > 0 {
                    abstract_depth += 1;
                } else if name.as_ref() == b"AbstractText" && !abstract_done {
                    abstract_depth = 1;
                } else if name.as_ref() == b"Keyword" {
                    in_keyword = true;
                    keyword_buf.clear();
                }
            }
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().unwrap_or_default();
                if abstract_depth > 0 {
                    abstract_buf.push_str(&text);
                } else if in_keyword {
                    keyword_buf.push_str(&text);
                }
            }
            Ok(Event::End(ref e)) => {
                if abstract_depth > 0 {
                    abstract_depth -= 1;
                    if abstract_depth == 0 {
                        abstract_done = true;
                    }
                } else if e.local_name().as_ref() == b"Keyword" {
                    in_keyword = false;
                    let kw = collapse_whitespace(&keyword_buf);
                    if !kw.is_empty() {
                        article.keywords.push(kw);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(FetchError::Parse(format!("XML parse error: {}", e))),
            _ => {}
        }
        buf.clear();
    }

    let text = collapse_whitespace(&abstract_buf);
    if !text.is_empty() {
        article.abstract_text = Some(text);
    }
    Ok(article)
}
