//! Sequential driver: harvester pages in, enriched Works out.
//!
//! The harvester, the record store and the full-text subsystem are external
//! collaborators and appear here only as traits.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::orchestrator::Waterfall;
use crate::stats::{Completeness, RunStats};
use crate::{CoreError, Work};

/// Source of candidate Works, one page per call. `Ok(None)` ends the stream.
pub trait Harvester: Send {
    fn next_page<'a>(
        &'a mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Vec<Value>>, CoreError>> + Send + 'a>>;
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("{0}")]
    Other(String),
}

/// Persistence for enriched Works.
pub trait RecordStore {
    fn write(&mut self, work: &Work) -> Result<(), StoreError>;

    fn write_batch(&mut self, works: &[Work]) -> Result<(), StoreError> {
        for work in works {
            self.write(work)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StoreError>;

    /// Whether a Work with this URL has already been persisted.
    fn contains_url(&self, url: &str) -> bool;
}

/// Hook for the separate full-text extraction subsystem.
pub trait FullTextProvider: Send + Sync {
    fn full_text<'a>(
        &'a self,
        work: &'a Work,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>>;
}

/// Progress events emitted while a run is in flight.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Page {
        records: usize,
    },
    Enriching {
        index: usize,
        title: String,
    },
    Enriched {
        index: usize,
        title: String,
        summary_source: String,
        completeness: Completeness,
    },
    Skipped {
        title: Option<String>,
        reason: String,
    },
    CapReached {
        max_papers: usize,
    },
    /// Cancellation was requested; Works enriched so far were written.
    Interrupted {
        processed: usize,
    },
}

/// Drives harvested records through the [`Waterfall`] one at a time.
pub struct Pipeline {
    waterfall: Waterfall,
    max_papers: usize,
}

impl Pipeline {
    pub fn new(waterfall: Waterfall, max_papers: usize) -> Self {
        Self {
            waterfall,
            max_papers,
        }
    }

    /// Run until the harvester is exhausted or `max_papers` Works have been
    /// enriched. Returns the number of Works enriched.
    ///
    /// Invalid records and duplicates are skipped and counted. A harvester or
    /// store failure ends the run with an error after flushing the store.
    ///
    /// Cancelling `cancel` abandons the Work in flight, writes the ones
    /// already enriched on the current page, flushes and returns normally.
    pub async fn run(
        &self,
        harvester: &mut dyn Harvester,
        store: &mut dyn RecordStore,
        stats: &mut RunStats,
        progress: impl Fn(ProgressEvent),
        cancel: &CancellationToken,
    ) -> Result<usize, CoreError> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut processed = 0usize;

        tracing::info!(max_papers = self.max_papers, sources = ?self.waterfall.source_names(), "enrichment run started");

        let mut interrupted = false;
        'pages: loop {
            if cancel.is_cancelled() {
                interrupted = true;
                break;
            }
            if processed >= self.max_papers {
                progress(ProgressEvent::CapReached {
                    max_papers: self.max_papers,
                });
                break;
            }

            let page = match harvester.next_page().await {
                Ok(Some(page)) => page,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "harvester failed");
                    flush_after_failure(store);
                    return Err(e);
                }
            };
            progress(ProgressEvent::Page {
                records: page.len(),
            });

            let mut batch = Vec::with_capacity(page.len());
            let mut cap_hit = false;
            for raw in &page {
                if processed >= self.max_papers {
                    cap_hit = true;
                    break;
                }

                let mut work = match Work::from_raw(raw) {
                    Ok(work) => work,
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping record");
                        stats.record_invalid();
                        progress(ProgressEvent::Skipped {
                            title: None,
                            reason: e.to_string(),
                        });
                        continue;
                    }
                };

                let stored = work.url.as_deref().is_some_and(|u| store.contains_url(u));
                if stored || !seen.insert(work.identity()) {
                    tracing::debug!(title = %work.title, "duplicate skipped");
                    stats.record_duplicate();
                    progress(ProgressEvent::Skipped {
                        title: Some(work.title.clone()),
                        reason: "duplicate".into(),
                    });
                    continue;
                }

                progress(ProgressEvent::Enriching {
                    index: processed + 1,
                    title: work.title.clone(),
                });
                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    outcome = self.waterfall.enrich(&mut work, stats) => Some(outcome),
                };
                let Some(outcome) = outcome else {
                    tracing::debug!(title = %work.title, "enrichment abandoned");
                    interrupted = true;
                    break;
                };
                processed += 1;
                progress(ProgressEvent::Enriched {
                    index: processed,
                    title: work.title.clone(),
                    summary_source: work.summary_source.clone(),
                    completeness: outcome.completeness,
                });
                batch.push(work);
            }

            if !batch.is_empty()
                && let Err(e) = store.write_batch(&batch)
            {
                tracing::error!(error = %e, "record store write failed");
                flush_after_failure(store);
                return Err(e.into());
            }

            if interrupted {
                break 'pages;
            }
            if cap_hit {
                progress(ProgressEvent::CapReached {
                    max_papers: self.max_papers,
                });
                break 'pages;
            }
        }

        store.flush()?;
        if interrupted {
            tracing::warn!(processed, "enrichment run interrupted");
            progress(ProgressEvent::Interrupted { processed });
        } else {
            tracing::info!(processed, "enrichment run finished");
        }
        Ok(processed)
    }
}

fn flush_after_failure(store: &mut dyn RecordStore) {
    if let Err(e) = store.flush() {
        tracing::error!(error = %e, "flush after failure also failed");
    }
}

/// In-memory [`RecordStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    pub works: Vec<Work>,
    pub flushes: usize,
    /// Batch sizes in write order.
    pub batches: Vec<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryStore {
    fn write(&mut self, work: &Work) -> Result<(), StoreError> {
        self.works.push(work.clone());
        Ok(())
    }

    fn write_batch(&mut self, works: &[Work]) -> Result<(), StoreError> {
        self.batches.push(works.len());
        self.works.extend_from_slice(works);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        self.flushes += 1;
        Ok(())
    }

    fn contains_url(&self, url: &str) -> bool {
        self.works.iter().any(|w| w.url.as_deref() == Some(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FetchContext;
    use serde_json::json;
    use std::collections::VecDeque;

    struct Pages(VecDeque<Result<Vec<Value>, String>>);

    impl Harvester for Pages {
        fn next_page<'a>(
            &'a mut self,
        ) -> Pin<Box<dyn Future<Output = Result<Option<Vec<Value>>, CoreError>> + Send + 'a>>
        {
            let next = self.0.pop_front();
            Box::pin(async move {
                match next {
                    Some(Ok(page)) => Ok(Some(page)),
                    Some(Err(msg)) => Err(CoreError::Harvester(msg)),
                    None => Ok(None),
                }
            })
        }
    }

    fn pipeline(max_papers: usize) -> Pipeline {
        let ctx = FetchContext::new(reqwest::Client::new()).without_delays();
        Pipeline::new(Waterfall::new(vec![], ctx), max_papers)
    }

    fn record(n: usize) -> Value {
        json!({"title": format!("Paper {}", n), "url": format!("https://example.org/{}", n)})
    }

    #[tokio::test]
    async fn cap_stops_before_next_page() {
        let mut harvester = Pages(VecDeque::from(vec![
            Ok((0..3).map(record).collect()),
            Ok((3..6).map(record).collect()),
            Ok((6..9).map(record).collect()),
        ]));
        let mut store = MemoryStore::new();
        let mut stats = RunStats::new();

        let processed = pipeline(4)
            .run(&mut harvester, &mut store, &mut stats, |_| {}, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(processed, 4);
        assert_eq!(store.works.len(), 4);
        assert_eq!(store.batches, vec![3, 1]);
        assert_eq!(stats.total, 4);
        // third page never pulled
        assert_eq!(harvester.0.len(), 1);
    }

    #[tokio::test]
    async fn duplicates_and_invalid_are_skipped() {
        let mut harvester = Pages(VecDeque::from(vec![Ok(vec![
            json!({"title": "A", "doi": "10.1000/a"}),
            json!({"title": "A again", "url": "https://doi.org/10.1000/A"}),
            json!({"url": "https://example.org/no-title"}),
            json!({"title": "B", "url": "https://example.org/b"}),
        ])]));
        let mut store = MemoryStore::new();
        store.works.push(Work {
            url: Some("https://example.org/b".into()),
            ..Work::new("B")
        });
        let mut stats = RunStats::new();

        let processed = pipeline(10)
            .run(&mut harvester, &mut store, &mut stats, |_| {}, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(processed, 1);
        assert_eq!(stats.duplicates, 2);
        assert_eq!(stats.skipped_invalid, 1);
        assert_eq!(stats.total, 1);
        assert_eq!(stats.buckets_sum(), 1);
    }

    #[tokio::test]
    async fn harvester_failure_flushes_then_errors() {
        let mut harvester = Pages(VecDeque::from(vec![
            Ok(vec![record(1)]),
            Err("connection reset".to_string()),
        ]));
        let mut store = MemoryStore::new();
        let mut stats = RunStats::new();

        let result = pipeline(10)
            .run(&mut harvester, &mut store, &mut stats, |_| {}, &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(CoreError::Harvester(_))));
        assert_eq!(store.works.len(), 1);
        assert_eq!(store.flushes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_keeps_enriched_works() {
        use crate::db::mock::MockSource;
        use crate::{AbstractSource, SourceKind};
        use std::time::Duration;

        let slow = MockSource::not_found(SourceKind::Crossref).with_delay(Duration::from_secs(1));
        let ctx = FetchContext::new(reqwest::Client::new()).without_delays();
        let pipeline = Pipeline::new(
            Waterfall::new(vec![Box::new(slow) as Box<dyn AbstractSource>], ctx),
            100,
        );
        let mut harvester = Pages(VecDeque::from(vec![
            Ok((0..10).map(record).collect()),
            Ok((10..20).map(record).collect()),
        ]));
        let mut store = MemoryStore::new();
        let mut stats = RunStats::new();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5500)).await;
            trigger.cancel();
        });

        let processed = pipeline
            .run(&mut harvester, &mut store, &mut stats, |_| {}, &cancel)
            .await
            .unwrap();

        assert_eq!(processed, 5);
        assert_eq!(stats.total, 5);
        assert_eq!(store.works.len(), 5);
        assert_eq!(store.flushes, 1);
        assert_eq!(harvester.0.len(), 1);
    }

    #[tokio::test]
    async fn progress_reports_each_work() {
        let mut harvester = Pages(VecDeque::from(vec![Ok(vec![record(1), record(2)])]));
        let mut store = MemoryStore::new();
        let mut stats = RunStats::new();
        let events = std::sync::Mutex::new(Vec::new());

        pipeline(10)
            .run(
                &mut harvester,
                &mut store,
                &mut stats,
                |e| events.lock().unwrap().push(e),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let events = events.into_inner().unwrap();
        let enriched = events
            .iter()
            .filter(|e| matches!(e, ProgressEvent::Enriched { summary_source, .. } if summary_source == "NONE"))
            .count();
        assert_eq!(enriched, 2);
    }
}
