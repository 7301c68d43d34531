use super::{AbstractSource, FetchContext, FetchOutcome, NotFoundReason, SourceKind};
use crate::Work;
use crate::retry::{FetchError, check_response_status, polite_pause};
use crate::text_utils::strip_tags;
use once_cell::sync::Lazy;
use regex::Regex;
use std::future::Future;
use std::pin::Pin;

const DEFAULT_BASE_URL: &str = "https://www.ebi.ac.uk/europepmc/webservices/rest/search";

pub struct EuropePmc {
    base_url: String,
}

impl EuropePmc {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
        }
    }
}

impl Default for EuropePmc {
    fn default() -> Self {
        Self::new()
    }
}

/// Search query for a Work: PMID, then DOI, then title.
fn build_query(work: &Work) -> String {
    if let Some(pmid) = work.pmid() {
        return format!("EXT_ID:{} AND SRC:MED", pmid);
    }
    if let Some(doi) = work.doi() {
        return format!("DOI:\"{}\"", doi);
    }
    static SPECIAL: Lazy<Regex> = Lazy::new(|| Regex::new(r#"["\[\](){}:;]"#).unwrap());
    let clean = SPECIAL.replace_all(&work.title, " ");
    let clean: String = crate::text_utils::collapse_whitespace(&clean)
        .chars()
        .take(200)
        .collect();
    format!("TITLE:\"{}\"", clean)
}

impl AbstractSource for EuropePmc {
    fn kind(&self) -> SourceKind {
        SourceKind::EuropePmc
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
            let query = build_query(work);

            let result: Result<serde_json::Value, FetchError> = async {
                let mut req = ctx
                    .client
                    .get(&self.base_url)
                    .query(&[
                        ("query", query.as_str()),
                        ("format", "json"),
                        ("resultType", "core"),
                        ("pageSize", "1"),
                    ])
                    .header("User-Agent", ctx.api_user_agent())
                    .timeout(ctx.api_timeout);
                if let Some(email) = &ctx.contact_email {
                    req = req.query(&[("email", email.as_str())]);
                }
                let resp = req.send().await?;
                check_response_status(&resp)?;
                Ok::<_, FetchError>(resp.json::<serde_json::Value>().await?)
            }
            .await;

            let data = match result {
                Ok(data) => data,
                Err(e) => return e.into(),
            };
            let Some(item) = data["resultList"]["result"]
                .as_array()
                .and_then(|a| a.first())
            else {
                return FetchOutcome::NotFound(NotFoundReason::NoMatch);
            };

            let keywords = item["keywordList"]["keyword"]
                .as_array()
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default();
            FetchOutcome::from_option(item["abstractText"].as_str().map(strip_tags), keywords)
        })
    }
}
