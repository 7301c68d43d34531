//! Mock abstract source for testing.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use super::{AbstractSource, FetchContext, FetchOutcome, NotFoundReason, SourceKind};
use crate::Work;

/// A hand-rolled [`AbstractSource`] for tests.
///
/// Answers with a fixed outcome, or with a sequence of outcomes (one per
/// call, the last repeated once exhausted). Calls are counted, and
/// `applies_to` can be forced to false to exercise the skip path.
pub struct MockSource {
    kind: SourceKind,
    /// Popped from the back; stored reversed.
    responses: Mutex<Vec<FetchOutcome>>,
    fallback: FetchOutcome,
    applies: bool,
    delay: Option<Duration>,
    call_count: AtomicUsize,
}

impl MockSource {
    /// A mock that always returns `outcome`.
    pub fn new(kind: SourceKind, outcome: FetchOutcome) -> Self {
        Self {
            kind,
            responses: Mutex::new(Vec::new()),
            fallback: outcome,
            applies: true,
            delay: None,
            call_count: AtomicUsize::new(0),
        }
    }

    /// A mock that finds `abstract_text` (subject to the length rule).
    pub fn found(kind: SourceKind, abstract_text: impl Into<String>) -> Self {
        Self::new(kind, FetchOutcome::found(abstract_text, vec![]))
    }

    pub fn not_found(kind: SourceKind) -> Self {
        Self::new(kind, FetchOutcome::NotFound(NotFoundReason::NoMatch))
    }

    /// Outcomes in call order; the last one repeats.
    pub fn with_sequence(kind: SourceKind, mut outcomes: Vec<FetchOutcome>) -> Self {
        outcomes.reverse();
        let fallback = outcomes
            .first()
            .cloned()
            .unwrap_or(FetchOutcome::NotFound(NotFoundReason::NoMatch));
        Self {
            responses: Mutex::new(outcomes),
            ..Self::new(kind, fallback)
        }
    }

    /// Keywords returned alongside a `Found` outcome.
    pub fn with_keywords(mut self, keywords: &[&str]) -> Self {
        if let FetchOutcome::Found { keywords: kw, .. } = &mut self.fallback {
            *kw = keywords.iter().map(|k| k.to_string()).collect();
        }
        self
    }

    /// Make `applies_to` return false for every Work.
    pub fn not_applicable(mut self) -> Self {
        self.applies = false;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// How many times `fetch()` has been called.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    fn next_outcome(&self) -> FetchOutcome {
        let mut seq = self.responses.lock().unwrap_or_else(PoisonError::into_inner);
        seq.pop().unwrap_or_else(|| self.fallback.clone())
    }
}

impl AbstractSource for MockSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn applies_to(&self, _work: &Work) -> bool {
        self.applies
    }

    fn fetch<'a>(
        &'a self,
        _work: &'a Work,
        _ctx: &'a FetchContext,
    ) -> Pin<Box<dyn Future<Output = FetchOutcome> + Send + 'a>> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let outcome = self.next_outcome();
        let delay = self.delay;

        Box::pin(async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            outcome
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> FetchContext {
        FetchContext::new(reqwest::Client::new()).without_delays()
    }

    #[tokio::test]
    async fn sequence_repeats_last() {
        let mock = MockSource::with_sequence(
            SourceKind::Crossref,
            vec![
                FetchOutcome::NotFound(NotFoundReason::RateLimited),
                FetchOutcome::found("a".repeat(120), vec![]),
            ],
        );
        let work = Work::new("t");
        let ctx = ctx();
        assert!(!mock.fetch(&work, &ctx).await.is_found());
        assert!(mock.fetch(&work, &ctx).await.is_found());
        assert!(mock.fetch(&work, &ctx).await.is_found());
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn keywords_attach_to_found() {
        let mock = MockSource::found(SourceKind::Arxiv, "b".repeat(150)).with_keywords(&["cs.LG"]);
        match mock.fetch(&Work::new("t"), &ctx()).await {
            FetchOutcome::Found { keywords, .. } => assert_eq!(keywords, vec!["cs.LG"]),
            other => panic!("expected Found, got {:?}", other),
        }
    }
}
