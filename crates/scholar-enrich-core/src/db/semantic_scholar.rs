use super::{AbstractSource, FetchContext, FetchOutcome, NotFoundReason, SourceKind};
use crate::Work;
use crate::identifiers::doi_path;
use crate::retry::{FetchError, check_response_status, polite_pause};
use std::future::Future;
use std::pin::Pin;

const DEFAULT_BASE_URL: &str = "https://api.semanticscholar.org/graph/v1";
const FIELDS: &str = "title,abstract,fieldsOfStudy";

pub struct SemanticScholar {
    pub api_key: Option<String>,
    base_url: String,
}

/// How a Work is looked up, in priority order.
#[derive(Debug, PartialEq)]
enum Lookup {
    Doi(String),
    Arxiv(String),
    Title(String),
}

impl Lookup {
    fn for_work(work: &Work) -> Self {
        if let Some(doi) = work.doi() {
            Lookup::Doi(doi)
        } else if let Some(id) = work.arxiv_id() {
            Lookup::Arxiv(id)
        } else {
            Lookup::Title(work.title.clone())
        }
    }
}

impl SemanticScholar {
    pub fn new(api_key: Option<String>) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL, api_key)
    }

    pub fn with_base_url(base_url: &str, api_key: Option<String>) -> Self {
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn lookup(
        &self,
        lookup: &Lookup,
        ctx: &FetchContext,
    ) -> Result<Option<serde_json::Value>, FetchError> {
        let req = match lookup {
            Lookup::Doi(doi) => ctx
                .client
                .get(format!("{}/paper/DOI:{}", self.base_url, doi_path(doi)))
                .query(&[("fields", FIELDS)]),
            Lookup::Arxiv(id) => ctx
                .client
                .get(format!("{}/paper/ARXIV:{}", self.base_url, id))
                .query(&[("fields", FIELDS)]),
            Lookup::Title(title) => ctx
                .client
                .get(format!("{}/paper/search", self.base_url))
                .query(&[("query", title.as_str()), ("limit", "1"), ("fields", FIELDS)]),
        };

        let mut req = req
            .header("User-Agent", ctx.api_user_agent())
            .timeout(ctx.api_timeout);
        if let Some(key) = &self.api_key {
            req = req.header("x-api-key", key);
        }

        let resp = req.send().await?;
        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        check_response_status(&resp)?;
        let data: serde_json::Value = resp.json().await?;

        Ok(match lookup {
            Lookup::Title(_) => data["data"].as_array().and_then(|a| a.first()).cloned(),
            _ => Some(data),
        })
    }
}

impl AbstractSource for SemanticScholar {
    fn kind(&self) -> SourceKind {
        SourceKind::SemanticScholar
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
            let lookup = Lookup::for_work(work);

            match self.lookup(&lookup, ctx).await {
                Ok(Some(paper)) => {
                    let keywords = paper["fieldsOfStudy"]
                        .as_array()
                        .map(|arr| {
                            arr.iter()
                                .filter_map(|v| v.as_str().map(String::from))
                                .collect()
                        })
                        .unwrap_or_default();
                    FetchOutcome::from_option(paper["abstract"].as_str().map(String::from), keywords)
                }
                Ok(None) => FetchOutcome::NotFound(NotFoundReason::NoMatch),
                Err(e) => e.into(),
            }
        })
    }
}
