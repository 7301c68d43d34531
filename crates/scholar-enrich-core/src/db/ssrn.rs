use super::{
    AbstractSource, FetchContext, FetchOutcome, NotFoundReason, SourceKind, is_ssrn_work,
    parse_html,
};
use crate::Work;
use crate::retry::{FetchError, check_response_status, polite_pause};
use crate::session::{USER_AGENTS, browser_headers};
use crate::text_utils::{collapse_whitespace, strip_abstract_heading};
use std::future::Future;
use std::pin::Pin;

const DEFAULT_BASE_URL: &str = "https://papers.ssrn.com";

/// SSRN abstract pages, scraped directly.
///
/// The numeric abstract ID is taken from the DOI (`10.2139/ssrn.NNNN`) or the
/// URL and mapped to the canonical `papers.cfm` page. Without an ID the Work's
/// own URL (or its DOI resolver URL) is requested and redirects are followed.
pub struct Ssrn {
    base_url: String,
    selectors: Vec<String>,
}

impl Ssrn {
    pub fn new(selectors: Vec<String>) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL, selectors)
    }

    pub fn with_base_url(base_url: &str, selectors: Vec<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            selectors,
        }
    }

    /// Page to request for this Work, if any.
    fn page_url(&self, work: &Work) -> Option<String> {
        if let Some(id) = work.ssrn_id() {
            return Some(format!(
                "{}/sol3/papers.cfm?abstract_id={}",
                self.base_url, id
            ));
        }
        if let Some(url) = &work.url {
            return Some(url.clone());
        }
        work.doi().map(|doi| format!("https://doi.org/{}", doi))
    }
}

/// Text of the first matching selector, heading removed.
fn parse_ssrn_abstract(html: &str, selectors: &[String]) -> Option<String> {
    let document = scraper::Html::parse_document(html);
    for raw in selectors {
        let Ok(selector) = scraper::Selector::parse(raw) else {
            tracing::debug!(selector = %raw, "invalid SSRN selector");
            continue;
        };
        if let Some(el) = document.select(&selector).next() {
            let text = collapse_whitespace(&el.text().collect::<Vec<_>>().join(" "));
            let text = strip_abstract_heading(&text);
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

impl AbstractSource for Ssrn {
    fn kind(&self) -> SourceKind {
        SourceKind::Ssrn
    }

    fn applies_to(&self, work: &Work) -> bool {
        is_ssrn_work(work)
    }

    fn fetch<'a>(
        &'a self,
        work: &'a Work,
        ctx: &'a FetchContext,
    ) -> Pin<Box<dyn Future<Output = FetchOutcome> + Send + 'a>> {
        Box::pin(async move {
            let Some(page_url) = self.page_url(work) else {
                return FetchOutcome::NotFound(NotFoundReason::NoIdentifier);
            };
            polite_pause(ctx.polite_delay).await;

            let body: Result<String, FetchError> = async {
                let resp = ctx
                    .client
                    .get(&page_url)
                    .headers(browser_headers(USER_AGENTS[0], None))
                    .timeout(ctx.page_timeout)
                    .send()
                    .await?;
                check_response_status(&resp)?;
                Ok::<_, FetchError>(resp.text().await?)
            }
            .await;

            let body = match body {
                Ok(body) => body,
                Err(e) => {
                    match e {
                        FetchError::Blocked => tracing::warn!(url = %page_url, "SSRN access blocked (403)"),
                        FetchError::RateLimited { .. } => {
                            tracing::warn!(url = %page_url, "SSRN rate limited (429)")
                        }
                        ref other => tracing::debug!(url = %page_url, error = %other, "SSRN request failed"),
                    }
                    return e.into();
                }
            };

            let selectors = self.selectors.clone();
            match parse_html(body, move |html| parse_ssrn_abstract(html, &selectors)).await {
                Ok(text) => {
                    let outcome = FetchOutcome::from_option(text, vec![]);
                    if !outcome.is_found() {
                        tracing::warn!(url = %page_url, "SSRN page has no usable abstract");
                    }
                    outcome
                }
                Err(e) => e.into(),
            }
        })
    }
}
