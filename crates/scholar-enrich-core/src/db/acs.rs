use super::{
    AbstractSource, FetchContext, FetchOutcome, NotFoundReason, SourceKind, is_acs_work,
    parse_html,
};
use crate::Work;
use crate::session::BrowserSession;
use crate::text_utils::strip_tags;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

const DEFAULT_HOMEPAGE: &str = "https://pubs.acs.org";

/// ACS Publications article pages, fetched through the shared
/// [`BrowserSession`] (homepage warm-up, then the article with a referer).
///
/// The publisher blocks most automated traffic, so this source is off unless
/// explicitly enabled.
pub struct Acs {
    session: Arc<BrowserSession>,
    homepage: String,
    selectors: Vec<String>,
}

impl Acs {
    pub fn new(session: Arc<BrowserSession>, selectors: Vec<String>) -> Self {
        Self::with_homepage(session, DEFAULT_HOMEPAGE, selectors)
    }

    pub fn with_homepage(
        session: Arc<BrowserSession>,
        homepage: &str,
        selectors: Vec<String>,
    ) -> Self {
        Self {
            session,
            homepage: homepage.trim_end_matches('/').to_string(),
            selectors,
        }
    }

    /// The Work URL when it already points at the publisher, else the
    /// publisher's DOI landing path.
    fn article_url(&self, work: &Work) -> Option<String> {
        if let Some(url) = &work.url
            && url.to_ascii_lowercase().contains("pubs.acs.org")
        {
            return Some(url.clone());
        }
        work.doi()
            .map(|doi| format!("{}/doi/{}", self.homepage, doi))
    }
}

/// Inner markup of the first matching abstract paragraph, tags flattened.
fn parse_acs_abstract(html: &str, selectors: &[String]) -> Option<String> {
    let document = scraper::Html::parse_document(html);
    selectors
        .iter()
        .filter_map(|raw| scraper::Selector::parse(raw).ok())
        .find_map(|selector| {
            document
                .select(&selector)
                .map(|el| strip_tags(&el.inner_html()))
                .find(|text| !text.is_empty())
        })
}

impl AbstractSource for Acs {
    fn kind(&self) -> SourceKind {
        SourceKind::Acs
    }

    fn applies_to(&self, work: &Work) -> bool {
        is_acs_work(work)
    }

    fn fetch<'a>(
        &'a self,
        work: &'a Work,
        ctx: &'a FetchContext,
    ) -> Pin<Box<dyn Future<Output = FetchOutcome> + Send + 'a>> {
        Box::pin(async move {
            let Some(article_url) = self.article_url(work) else {
                return FetchOutcome::NotFound(NotFoundReason::NoIdentifier);
            };

            // blocked / rate-limited are logged by the session
            let body = match self
                .session
                .visit(&self.homepage, &article_url, ctx.page_timeout)
                .await
            {
                Ok(body) => body,
                Err(e) => return e.into(),
            };

            let selectors = self.selectors.clone();
            match parse_html(body, move |html| parse_acs_abstract(html, &selectors)).await {
                Ok(text) => {
                    let outcome = FetchOutcome::from_option(text, vec![]);
                    if !outcome.is_found() {
                        tracing::warn!(url = %article_url, "ACS page has no usable abstract");
                    }
                    outcome
                }
                Err(e) => e.into(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SelectorConfig;
    use crate::session::SessionTiming;
    use mockito::Server;

    fn session() -> Arc<BrowserSession> {
        Arc::new(BrowserSession::new(SessionTiming::instant()).unwrap())
    }

    const ARTICLE: &str = r#"<html><body>
        <div class="article_abstract">
          <div class="article_abstract-content hlFld-Abstract">
            <p class="articleBody_abstractText">We report a <i>new</i> catalyst for
            CO<sub>2</sub> reduction.<br>Its turnover frequency exceeds prior systems
            by an order of magnitude under ambient conditions.</p>
          </div>
        </div>
        </body></html>"#;

    #[test]
    fn flattens_inline_markup() {
        let text = parse_acs_abstract(ARTICLE, &SelectorConfig::default().acs).unwrap();
        assert!(text.starts_with("We report a new catalyst for CO 2 reduction."));
        assert!(!text.contains('<'));
        assert!(!text.contains("  "));
    }

    #[test]
    fn article_url_from_doi_or_url() {
        let source = Acs::new(session(), vec![]);
        let by_doi = Work {
            doi: Some("10.1021/acs.jpca.1234".into()),
            ..Work::new("t")
        };
        assert_eq!(
            source.article_url(&by_doi).as_deref(),
            Some("https://pubs.acs.org/doi/10.1021/acs.jpca.1234")
        );

        let by_url = Work {
            url: Some("https://pubs.acs.org/doi/abs/10.1021/x".into()),
            ..Work::new("t")
        };
        assert_eq!(
            source.article_url(&by_url).as_deref(),
            Some("https://pubs.acs.org/doi/abs/10.1021/x")
        );
    }

    #[tokio::test]
    async fn warm_up_then_article() {
        let mut server = Server::new_async().await;
        let home = server
            .mock("GET", "/")
            .with_status(200)
            .with_header("set-cookie", "JSESSIONID=s1; Path=/")
            .expect(1)
            .create_async()
            .await;
        let _article = server
            .mock("GET", "/doi/10.1021/acs.jpca.1234")
            .match_header("cookie", mockito::Matcher::Regex("JSESSIONID=s1".into()))
            .with_status(200)
            .with_body(ARTICLE)
            .create_async()
            .await;

        let source = Acs::with_homepage(session(), &server.url(), SelectorConfig::default().acs);
        let ctx = FetchContext::new(reqwest::Client::new()).without_delays();
        let work = Work {
            doi: Some("10.1021/acs.jpca.1234".into()),
            ..Work::new("t")
        };

        assert!(source.fetch(&work, &ctx).await.is_found());
        home.assert_async().await;
    }

    #[tokio::test]
    async fn blocked_article_is_not_found() {
        let mut server = Server::new_async().await;
        let _home = server.mock("GET", "/").with_status(200).create_async().await;
        let _article = server
            .mock("GET", "/doi/10.1021/x")
            .with_status(403)
            .create_async()
            .await;

        let source = Acs::with_homepage(session(), &server.url(), SelectorConfig::default().acs);
        let ctx = FetchContext::new(reqwest::Client::new()).without_delays();
        let work = Work {
            doi: Some("10.1021/x".into()),
            ..Work::new("t")
        };
        assert_eq!(
            source.fetch(&work, &ctx).await,
            FetchOutcome::NotFound(NotFoundReason::Blocked)
        );
    }
}
