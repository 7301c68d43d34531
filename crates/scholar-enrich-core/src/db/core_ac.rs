use super::{AbstractSource, FetchContext, FetchOutcome, NotFoundReason, SourceKind};
use crate::Work;
use crate::retry::{FetchError, check_response_status, polite_pause};
use std::future::Future;
use std::pin::Pin;

const DEFAULT_BASE_URL: &str = "https://api.core.ac.uk/v3";

/// CORE aggregator search. The v3 API requires a key; without one the
/// source never applies.
pub struct Core {
    api_key: Option<String>,
    base_url: String,
}

impl Core {
    pub fn new(api_key: Option<String>) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL, api_key)
    }

    pub fn with_base_url(base_url: &str, api_key: Option<String>) -> Self {
        Self {
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

/// Search query for a Work: DOI, else quoted title.
fn build_query(work: &Work) -> String {
    match work.doi() {
        Some(doi) => format!("doi:\"{}\"", doi),
        None => format!("title:\"{}\"", work.title.replace('"', " ")),
    }
}

impl AbstractSource for Core {
    fn kind(&self) -> SourceKind {
        SourceKind::Core
    }

    fn applies_to(&self, _work: &Work) -> bool {
        self.api_key.is_some()
    }

    fn fetch<'a>(
        &'a self,
        work: &'a Work,
        ctx: &'a FetchContext,
    ) -> Pin<Box<dyn Future<Output = FetchOutcome> + Send + 'a>> {
        Box::pin(async move {
            let Some(key) = &self.api_key else {
                return FetchOutcome::NotFound(NotFoundReason::Failed("CORE API key not set".into()));
            };
            polite_pause(ctx.polite_delay).await;
            let query = build_query(work);

            let result: Result<serde_json::Value, FetchError> = async {
                let resp = ctx
                    .client
                    .get(format!("{}/search/works", self.base_url))
                    .query(&[("q", query.as_str()), ("limit", "1")])
                    .bearer_auth(key)
                    .header("User-Agent", ctx.api_user_agent())
                    .timeout(ctx.api_timeout)
                    .send()
                    .await?;
                check_response_status(&resp)?;
                Ok::<_, FetchError>(resp.json::<serde_json::Value>().await?)
            }
            .await;

            match result {
                Ok(data) => FetchOutcome::from_option(
                    data["results"]
                        .as_array()
                        .and_then(|r| r.first())
                        .and_then(|w| w["abstract"].as_str())
                        .map(String::from),
                    vec![],
                ),
                Err(e) => e.into(),
            }
        })
    }
}
