use super::{AbstractSource, FetchContext, FetchOutcome, NotFoundReason, SourceKind};
use crate::Work;
use crate::identifiers::doi_path;
use crate::retry::{FetchError, check_response_status, polite_pause, with_retry};
use std::future::Future;
use std::pin::Pin;

const DEFAULT_BASE_URL: &str = "https://api.crossref.org";

/// Crossref REST API, DOI lookups only.
///
/// Abstracts come back JATS-tagged (`<jats:p>...`); they are returned as-is.
pub struct Crossref {
    base_url: String,
}

impl Crossref {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl Default for Crossref {
    fn default() -> Self {
        Self::new()
    }
}

impl AbstractSource for Crossref {
    fn kind(&self) -> SourceKind {
        SourceKind::Crossref
    }

    fn applies_to(&self, work: &Work) -> bool {
        work.doi().is_some()
    }

    fn fetch<'a>(
        &'a self,
        work: &'a Work,
        ctx: &'a FetchContext,
    ) -> Pin<Box<dyn Future<Output = FetchOutcome> + Send + 'a>> {
        Box::pin(async move {
            let Some(doi) = work.doi() else {
                return FetchOutcome::NotFound(NotFoundReason::NoIdentifier);
            };
            polite_pause(ctx.polite_delay).await;

            let url = format!("{}/works/{}", self.base_url, doi_path(&doi));
            let data = with_retry(ctx.retry, "Crossref", || async {
                let mut req = ctx
                    .client
                    .get(&url)
                    .header("User-Agent", ctx.api_user_agent())
                    .timeout(ctx.api_timeout);
                if let Some(email) = &ctx.contact_email {
                    req = req.query(&[("mailto", email.as_str())]);
                }
                let resp = req.send().await?;
                check_response_status(&resp)?;
                Ok::<_, FetchError>(resp.json::<serde_json::Value>().await?)
            })
            .await;

            match data {
                Ok(data) => {
                    let message = &data["message"];
                    let keywords = message["subject"]
                        .as_array()
                        .map(|arr| {
                            arr.iter()
                                .filter_map(|v| v.as_str().map(String::from))
                                .collect()
                        })
                        .unwrap_or_default();
                    FetchOutcome::from_option(
                        message["abstract"].as_str().map(String::from),
                        keywords,
                    )
                }
                Err(e) => e.into(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn work_with_doi(doi: &str) -> Work {
        Work {
            doi: Some(doi.into()),
            ..Work::new("Some Title")
        }
    }

    #[tokio::test]
    async fn abstract_is_left_jats_tagged() {
        let mut server = Server::new_async().await;
        let jats = format!("<jats:p>{}</jats:p>", "Crossref abstract text. ".repeat(8));
        let body = serde_json::json!({
            "status": "ok",
            "message": {
                "DOI": "10.1000/xyz",
                "abstract": jats,
                "subject": ["Chemistry", "Physics"]
            }
        });
        let _m = server
            .mock("GET", "/works/10.1000/xyz")
            .match_query(Matcher::UrlEncoded("mailto".into(), "ops@example.org".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;

        let source = Crossref::with_base_url(&server.url());
        let mut ctx = FetchContext::new(reqwest::Client::new()).without_delays();
        ctx.contact_email = Some("ops@example.org".into());

        match source.fetch(&work_with_doi("10.1000/xyz"), &ctx).await {
            FetchOutcome::Found {
                abstract_text,
                keywords,
            } => {
                assert!(abstract_text.starts_with("<jats:p>"));
                assert_eq!(keywords, vec!["Chemistry", "Physics"]);
            }
            other => panic!("expected Found, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn missing_abstract_is_no_match() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/works/10.1000/none")
            .with_status(200)
            .with_body(r#"{"status":"ok","message":{"DOI":"10.1000/none"}}"#)
            .create_async()
            .await;

        let source = Crossref::with_base_url(&server.url());
        let ctx = FetchContext::new(reqwest::Client::new()).without_delays();
        assert_eq!(
            source.fetch(&work_with_doi("10.1000/none"), &ctx).await,
            FetchOutcome::NotFound(NotFoundReason::NoMatch)
        );
    }

    #[tokio::test]
    async fn unknown_doi_is_not_retried() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/works/10.1000/missing")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let source = Crossref::with_base_url(&server.url());
        let ctx = FetchContext::new(reqwest::Client::new()).without_delays();
        assert_eq!(
            source.fetch(&work_with_doi("10.1000/missing"), &ctx).await,
            FetchOutcome::NotFound(NotFoundReason::NoMatch)
        );
        m.assert_async().await;
    }

    #[tokio::test]
    async fn reserved_characters_stay_in_the_path() {
        let mut server = Server::new_async().await;
        let body = serde_json::json!({
            "message": { "abstract": "Recovered through an escaped DOI path. ".repeat(4) }
        });
        let m = server
            .mock("GET", "/works/10.1000/a%3Fb%23c")
            .with_status(200)
            .with_body(body.to_string())
            .expect(1)
            .create_async()
            .await;

        let source = Crossref::with_base_url(&server.url());
        let ctx = FetchContext::new(reqwest::Client::new()).without_delays();
        let work = Work {
            doi: Some("10.1000/a?b#c".into()),
            ..Work::new("Escaped")
        };
        assert!(source.fetch(&work, &ctx).await.is_found());
        m.assert_async().await;
    }

    #[test]
    fn requires_doi() {
        assert!(!Crossref::new().applies_to(&Work::new("t")));
        assert!(Crossref::new().applies_to(&work_with_doi("10.1000/x")));
    }
}
