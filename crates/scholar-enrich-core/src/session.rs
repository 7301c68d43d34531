//! Browser-like session for publisher hosts that fingerprint automated traffic.
//!
//! One cookie jar lives for the whole process and is shared by every call.
//! Each call takes the next user agent from a fixed pool (rotation advances
//! per call, not per success), warms up on the publisher homepage, waits a
//! human-looking interval, then requests the article with the homepage as
//! `Referer`. This lowers the block rate; it does not eliminate it.

use std::ops::RangeInclusive;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderValue};

use crate::retry::{FetchError, check_response_status};

/// Desktop browser identities rotated across calls.
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
];

/// Jittered pause bounds, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTiming {
    /// Before the homepage request.
    pub warmup_ms: RangeInclusive<u64>,
    /// Between homepage and article ("reading time").
    pub reading_ms: RangeInclusive<u64>,
}

impl SessionTiming {
    /// No pauses at all, for tests.
    pub fn instant() -> Self {
        Self {
            warmup_ms: 0..=0,
            reading_ms: 0..=0,
        }
    }
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            warmup_ms: 200..=400,
            reading_ms: 500..=1000,
        }
    }
}

async fn jittered_sleep(range: &RangeInclusive<u64>) {
    let ms = if range.start() >= range.end() {
        *range.start()
    } else {
        fastrand::u64(range.clone())
    };
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

/// Chromium major version and platform, for the client-hint headers.
fn chromium_hints(user_agent: &str) -> Option<(String, &'static str)> {
    static CHROME: Lazy<Regex> = Lazy::new(|| Regex::new(r"Chrome/(\d+)").unwrap());
    let major = CHROME.captures(user_agent)?.get(1)?.as_str().to_string();
    let platform = if user_agent.contains("Windows") {
        "\"Windows\""
    } else if user_agent.contains("Macintosh") {
        "\"macOS\""
    } else {
        "\"Linux\""
    };
    Some((major, platform))
}

/// The header set a real browser sends on a top-level navigation.
///
/// Sec-CH-UA client hints are only added for Chromium user agents, since
/// Firefox and Safari never send them.
pub fn browser_headers(user_agent: &str, referer: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(v) = HeaderValue::from_str(user_agent) {
        headers.insert("User-Agent", v);
    }
    headers.insert(
        "Accept",
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(
        "Accept-Language",
        HeaderValue::from_static("en-US,en;q=0.9"),
    );
    headers.insert("Upgrade-Insecure-Requests", HeaderValue::from_static("1"));
    headers.insert("Sec-Fetch-Dest", HeaderValue::from_static("document"));
    headers.insert("Sec-Fetch-Mode", HeaderValue::from_static("navigate"));
    headers.insert("Sec-Fetch-User", HeaderValue::from_static("?1"));
    headers.insert(
        "Sec-Fetch-Site",
        HeaderValue::from_static(if referer.is_some() {
            "same-origin"
        } else {
            "none"
        }),
    );

    if let Some((major, platform)) = chromium_hints(user_agent) {
        let brand = if user_agent.contains("Edg/") {
            "Microsoft Edge"
        } else {
            "Google Chrome"
        };
        let sec_ch_ua = format!(
            "\"Chromium\";v=\"{major}\", \"{brand}\";v=\"{major}\", \"Not-A.Brand\";v=\"99\""
        );
        if let Ok(v) = HeaderValue::from_str(&sec_ch_ua) {
            headers.insert("Sec-CH-UA", v);
        }
        headers.insert("Sec-CH-UA-Mobile", HeaderValue::from_static("?0"));
        headers.insert("Sec-CH-UA-Platform", HeaderValue::from_static(platform));
    }

    if let Some(referer) = referer
        && let Ok(v) = HeaderValue::from_str(referer)
    {
        headers.insert("Referer", v);
    }
    headers
}

/// Process-lifetime browser session: cookie jar, user-agent rotation, timing.
pub struct BrowserSession {
    client: reqwest::Client,
    jar: Arc<Jar>,
    next_agent: AtomicUsize,
    timing: SessionTiming,
}

impl BrowserSession {
    pub fn new(timing: SessionTiming) -> Result<Self, reqwest::Error> {
        let jar = Arc::new(Jar::default());
        let client = reqwest::Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self {
            client,
            jar,
            next_agent: AtomicUsize::new(0),
            timing,
        })
    }

    /// Next identity in the pool. Advances on every call.
    pub fn next_user_agent(&self) -> &'static str {
        let i = self.next_agent.fetch_add(1, Ordering::Relaxed);
        USER_AGENTS[i % USER_AGENTS.len()]
    }

    /// Cookies the jar would send to `url`, as a `Cookie` header value.
    pub fn cookies_for(&self, url: &str) -> Option<String> {
        use reqwest::cookie::CookieStore;
        let url = reqwest::Url::parse(url).ok()?;
        self.jar
            .cookies(&url)
            .and_then(|v| v.to_str().ok().map(String::from))
    }

    /// Homepage warm-up, reading pause, then the article page.
    ///
    /// A failed homepage visit is logged and ignored. Returns the article
    /// body on 2xx; 403 and 429 surface as `Blocked` / `RateLimited`.
    pub async fn visit(
        &self,
        homepage: &str,
        article_url: &str,
        timeout: Duration,
    ) -> Result<String, FetchError> {
        let user_agent = self.next_user_agent();

        jittered_sleep(&self.timing.warmup_ms).await;
        match self
            .client
            .get(homepage)
            .headers(browser_headers(user_agent, None))
            .timeout(timeout)
            .send()
            .await
        {
            Ok(resp) if !resp.status().is_success() => {
                tracing::debug!(homepage, status = resp.status().as_u16(), "homepage warm-up refused");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(homepage, error = %e, "homepage warm-up failed");
            }
        }

        jittered_sleep(&self.timing.reading_ms).await;
        let resp = self
            .client
            .get(article_url)
            .headers(browser_headers(user_agent, Some(homepage)))
            .timeout(timeout)
            .send()
            .await?;

        if let Err(e) = check_response_status(&resp) {
            match &e {
                FetchError::Blocked => {
                    tracing::warn!(url = article_url, "access blocked (403)");
                }
                FetchError::RateLimited { .. } => {
                    tracing::warn!(url = article_url, "rate limited (429)");
                }
                other => {
                    tracing::debug!(url = article_url, error = %other, "article request failed");
                }
            }
            return Err(e);
        }
        Ok(resp.text().await?)
    }
}
