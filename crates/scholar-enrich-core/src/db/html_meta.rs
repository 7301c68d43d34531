use super::{
    AbstractSource, FetchContext, FetchOutcome, NotFoundReason, SourceKind, is_acs_work,
    is_ssrn_work, parse_html,
};
use crate::Work;
use crate::retry::{FetchError, check_response_status, polite_pause};
use crate::session::{USER_AGENTS, browser_headers};
use crate::text_utils::{collapse_whitespace, is_substantial, strip_abstract_heading};
use once_cell::sync::Lazy;
use std::future::Future;
use std::pin::Pin;

static KEYWORD_META: Lazy<scraper::Selector> = Lazy::new(|| {
    scraper::Selector::parse("meta[name=keywords], meta[name=citation_keywords]").unwrap()
});

/// Last-resort scraper for any landing page: abstract-ish elements first,
/// then the page description.
///
/// SSRN and ACS pages are left to their dedicated sources.
pub struct HtmlMeta {
    selectors: Vec<String>,
}

impl HtmlMeta {
    pub fn new(selectors: Vec<String>) -> Self {
        Self { selectors }
    }
}

fn landing_url(work: &Work) -> Option<String> {
    work.url
        .clone()
        .or_else(|| work.doi().map(|doi| format!("https://doi.org/{}", doi)))
}

#[derive(Debug, Default, PartialEq)]
struct PageMeta {
    abstract_text: Option<String>,
    keywords: Vec<String>,
}

/// `<meta>` matches yield their `content` attribute, anything else its text.
fn element_text(el: scraper::ElementRef<'_>) -> String {
    let raw = if el.value().name() == "meta" {
        el.value().attr("content").unwrap_or_default().to_string()
    } else {
        el.text().collect::<Vec<_>>().join(" ")
    };
    strip_abstract_heading(&collapse_whitespace(&raw))
}

fn parse_page(html: &str, selectors: &[String]) -> PageMeta {
    let document = scraper::Html::parse_document(html);

    // first substantial match wins; a short one is remembered so the
    // outcome reports TooShort rather than NoMatch
    let mut fallback: Option<String> = None;
    let mut abstract_text = None;
    'outer: for raw in selectors {
        let Ok(selector) = scraper::Selector::parse(raw) else {
            continue;
        };
        for el in document.select(&selector) {
            let text = element_text(el);
            if is_substantial(&text) {
                abstract_text = Some(text);
                break 'outer;
            }
            if fallback.is_none() && !text.is_empty() {
                fallback = Some(text);
            }
        }
    }

    let keywords = document
        .select(&KEYWORD_META)
        .filter_map(|el| el.value().attr("content"))
        .flat_map(|c| c.split([',', ';']))
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(String::from)
        .collect();

    PageMeta {
        abstract_text: abstract_text.or(fallback),
        keywords,
    }
}

impl AbstractSource for HtmlMeta {
    fn kind(&self) -> SourceKind {
        SourceKind::HtmlMeta
    }

    fn applies_to(&self, work: &Work) -> bool {
        landing_url(work).is_some() && !is_ssrn_work(work) && !is_acs_work(work)
    }

    fn fetch<'a>(
        &'a self,
        work: &'a Work,
        ctx: &'a FetchContext,
    ) -> Pin<Box<dyn Future<Output = FetchOutcome> + Send + 'a>> {
        Box::pin(async move {
            let Some(url) = landing_url(work) else {
                return FetchOutcome::NotFound(NotFoundReason::NoIdentifier);
            };
            polite_pause(ctx.polite_delay).await;

            let body: Result<String, FetchError> = async {
                let resp = ctx
                    .client
                    .get(&url)
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
                Err(e) => return e.into(),
            };

            let selectors = self.selectors.clone();
            match parse_html(body, move |html| parse_page(html, &selectors)).await {
                Ok(meta) => FetchOutcome::from_option(meta.abstract_text, meta.keywords),
                Err(e) => e.into(),
            }
        })
    }
}
