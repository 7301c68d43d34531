use super::{AbstractSource, FetchContext, FetchOutcome, NotFoundReason, SourceKind};
use crate::Work;
use crate::retry::{FetchError, check_response_status, polite_pause, with_retry};
use std::future::Future;
use std::pin::Pin;

const DEFAULT_BASE_URL: &str = "http://export.arxiv.org/api/query";

pub struct Arxiv {
    base_url: String,
}

impl Arxiv {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
        }
    }
}

impl Default for Arxiv {
    fn default() -> Self {
        Self::new()
    }
}

impl AbstractSource for Arxiv {
    fn kind(&self) -> SourceKind {
        SourceKind::Arxiv
    }

    fn applies_to(&self, work: &Work) -> bool {
        work.arxiv_id().is_some()
    }

    fn fetch<'a>(
        &'a self,
        work: &'a Work,
        ctx: &'a FetchContext,
    ) -> Pin<Box<dyn Future<Output = FetchOutcome> + Send + 'a>> {
        Box::pin(async move {
            let Some(arxiv_id) = work.arxiv_id() else {
                return FetchOutcome::NotFound(NotFoundReason::NoIdentifier);
            };
            polite_pause(ctx.polite_delay).await;

            let body = with_retry(ctx.retry, "arXiv", || async {
                let resp = ctx
                    .client
                    .get(&self.base_url)
                    .query(&[("id_list", arxiv_id.as_str()), ("max_results", "1")])
                    .header("User-Agent", ctx.api_user_agent())
                    .timeout(ctx.api_timeout)
                    .send()
                    .await?;
                check_response_status(&resp)?;
                Ok::<_, FetchError>(resp.text().await?)
            })
            .await;

            match body.and_then(|xml| parse_arxiv_entry(&xml)) {
                Ok(Some(entry)) => FetchOutcome::found(entry.summary, entry.categories),
                Ok(None) => FetchOutcome::NotFound(NotFoundReason::NoMatch),
                Err(e) => e.into(),
            }
        })
    }
}

#[derive(Debug, Default, PartialEq)]
struct ArxivEntry {
    summary: String,
    categories: Vec<String>,
}

/// Pull `<summary>` and every `<category term="...">` out of the first
/// `<entry>` of an arXiv Atom feed.
fn parse_arxiv_entry(xml: &str) -> Result<Option<ArxivEntry>, FetchError> {
    use quick_xml::Reader;
    use quick_xml::events::{BytesStart, Event};

    fn category_term(e: &BytesStart) -> Option<String> {
        e.attributes()
            .flatten()
            .find(|a| a.key.as_ref() == b"term")
            .map(|a| String::from_utf8_lossy(&a.value).trim().to_string())
            .filter(|t| !t.is_empty())
    }

    let mut reader = Reader::from_str(xml);

    let mut in_entry = false;
    let mut in_summary = false;
    let mut entry = ArxivEntry::default();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"entry" => in_entry = true,
                b"summary" if in_entry => in_summary = true,
                b"category" if in_entry => entry.categories.extend(category_term(e)),
                _ => {}
            },
            Ok(Event::Empty(ref e)) => {
                if in_entry && e.local_name().as_ref() == b"category" {
                    entry.categories.extend(category_term(e));
                }
            }
            Ok(Event::Text(ref e)) if in_summary => {
                let text = e.unescape().unwrap_or_default();
                entry.summary.push_str(&text);
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"summary" => in_summary = false,
                b"entry" => break,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(FetchError::Parse(format!("XML parse error: {}", e))),
            _ => {}
        }
        buf.clear();
    }

    let summary = crate::text_utils::collapse_whitespace(&entry.summary);
    if summary.is_empty() {
        return Ok(None);
    }
    Ok(Some(ArxivEntry {
        summary,
        categories: entry.categories,
    }))
}
