//! JSON-lines harvester and record store.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::future::Future;
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::path::Path;
use std::pin::Pin;

use scholar_enrich_core::{CoreError, Harvester, RecordStore, StoreError, Work};
use serde_json::Value;

/// Reads one harvested record per line, `page_size` lines per page.
///
/// A line that is not valid JSON is handed on as `null` so the pipeline
/// counts it as an invalid record instead of aborting the run.
pub struct JsonlHarvester {
    lines: Lines<BufReader<File>>,
    page_size: usize,
    line_no: usize,
}

impl JsonlHarvester {
    pub fn open(path: &Path, page_size: usize) -> std::io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
            page_size: page_size.max(1),
            line_no: 0,
        })
    }

    fn read_page(&mut self) -> Result<Option<Vec<Value>>, CoreError> {
        let mut page = Vec::with_capacity(self.page_size);
        while page.len() < self.page_size {
            let Some(line) = self.lines.next() else {
                break;
            };
            self.line_no += 1;
            let line = line.map_err(|e| {
                CoreError::Harvester(format!("read error at line {}: {}", self.line_no, e))
            })?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(value) => page.push(value),
                Err(e) => {
                    tracing::warn!(line = self.line_no, error = %e, "malformed JSON line");
                    page.push(Value::Null);
                }
            }
        }
        Ok(if page.is_empty() { None } else { Some(page) })
    }
}

impl Harvester for JsonlHarvester {
    fn next_page<'a>(
        &'a mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Vec<Value>>, CoreError>> + Send + 'a>> {
        let page = self.read_page();
        Box::pin(async move { page })
    }
}

/// Appends enriched Works to a JSON-lines file.
///
/// URLs already present in the file when it is opened count as persisted, so
/// re-running over the same input resumes instead of duplicating.
pub struct JsonlStore {
    writer: BufWriter<File>,
    urls: HashSet<String>,
    written: usize,
}

impl JsonlStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let mut urls = HashSet::new();
        if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            for line in reader.lines() {
                let line = line?;
                if let Ok(value) = serde_json::from_str::<Value>(&line)
                    && let Some(url) = value["url"].as_str()
                {
                    urls.insert(url.to_string());
                }
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            urls,
            written: 0,
        })
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

impl RecordStore for JsonlStore {
    fn write(&mut self, work: &Work) -> Result<(), StoreError> {
        serde_json::to_writer(&mut self.writer, work)?;
        self.writer.write_all(b"\n")?;
        if let Some(url) = &work.url {
            self.urls.insert(url.clone());
        }
        self.written += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }

    fn contains_url(&self, url: &str) -> bool {
        self.urls.contains(url)
    }
}
