//! Completeness classification and run-level counters.

use std::collections::BTreeMap;
use std::fmt;

use crate::Work;
use crate::db::SourceKind;
use crate::orchestrator::EnrichmentOutcome;

/// How many of {summary, full text, tags} a Work carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Completeness {
    HasAll,
    MissingOne,
    MissingTwo,
    MissingAll,
}

impl Completeness {
    /// Classify a Work. Full text equal to the summary does not count.
    pub fn classify(work: &Work) -> Self {
        let has_summary = !work.summary.is_empty();
        let has_full_text = !work.full_text.is_empty() && work.full_text != work.summary;
        let has_tags = !work.tags.is_empty();

        let present = [has_summary, has_full_text, has_tags]
            .iter()
            .filter(|p| **p)
            .count();
        match present {
            3 => Completeness::HasAll,
            2 => Completeness::MissingOne,
            1 => Completeness::MissingTwo,
            _ => Completeness::MissingAll,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Completeness::HasAll => "hasAll",
            Completeness::MissingOne => "missingOne",
            Completeness::MissingTwo => "missingTwo",
            Completeness::MissingAll => "missingAllThree",
        }
    }
}

/// Counters for one enrichment run. Single writer; the pipeline owns it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Works that went through enrichment (skipped duplicates and invalid
    /// records excluded).
    pub total: usize,
    /// Abstracts contributed, by winning source.
    pub per_source: BTreeMap<SourceKind, usize>,
    /// Works whose harvested abstract was already sufficient.
    pub openalex_existing: usize,
    /// Works that exhausted the waterfall.
    pub no_abstract: usize,
    pub ssrn_parsed: usize,
    pub ssrn_failed: usize,
    pub acs_parsed: usize,
    pub acs_failed: usize,
    pub has_all: usize,
    pub missing_one: usize,
    pub missing_two: usize,
    pub missing_all: usize,
    pub duplicates: usize,
    pub skipped_invalid: usize,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one Work's enrichment outcome into the counters.
    pub fn absorb(&mut self, outcome: &EnrichmentOutcome) {
        self.total += 1;

        if outcome.skipped_existing {
            self.openalex_existing += 1;
        } else if let Some(kind) = outcome.winner {
            *self.per_source.entry(kind).or_insert(0) += 1;
        } else {
            self.no_abstract += 1;
        }

        for attempt in &outcome.attempts {
            let found = attempt.outcome.is_found();
            match (attempt.source, found) {
                (SourceKind::Ssrn, true) => self.ssrn_parsed += 1,
                (SourceKind::Ssrn, false) => self.ssrn_failed += 1,
                (SourceKind::Acs, true) => self.acs_parsed += 1,
                (SourceKind::Acs, false) => self.acs_failed += 1,
                _ => {}
            }
        }

        self.record_completeness(outcome.completeness);
    }

    pub fn record_completeness(&mut self, completeness: Completeness) {
        match completeness {
            Completeness::HasAll => self.has_all += 1,
            Completeness::MissingOne => self.missing_one += 1,
            Completeness::MissingTwo => self.missing_two += 1,
            Completeness::MissingAll => self.missing_all += 1,
        }
    }

    pub fn record_duplicate(&mut self) {
        self.duplicates += 1;
    }

    pub fn record_invalid(&mut self) {
        self.skipped_invalid += 1;
    }

    /// Sum of the four completeness buckets; equals `total`.
    pub fn buckets_sum(&self) -> usize {
        self.has_all + self.missing_one + self.missing_two + self.missing_all
    }

    pub fn source_count(&self, kind: SourceKind) -> usize {
        self.per_source.get(&kind).copied().unwrap_or(0)
    }

    /// Abstracts recovered by the waterfall (harvested ones excluded).
    pub fn enriched(&self) -> usize {
        self.per_source.values().sum()
    }
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Enrichment report")?;
        writeln!(f, "  Works processed:        {}", self.total)?;
        writeln!(f, "  Harvested abstracts:    {}", self.openalex_existing)?;
        writeln!(f, "  Abstracts recovered:    {}", self.enriched())?;
        for kind in SourceKind::WATERFALL {
            let n = self.source_count(kind);
            if n > 0 {
                writeln!(f, "    {:<18} {}", kind.label(), n)?;
            }
        }
        writeln!(f, "  No abstract found:      {}", self.no_abstract)?;
        writeln!(
            f,
            "  SSRN pages:             {} parsed, {} failed",
            self.ssrn_parsed, self.ssrn_failed
        )?;
        writeln!(
            f,
            "  ACS pages:              {} parsed, {} failed",
            self.acs_parsed, self.acs_failed
        )?;
        writeln!(f, "  Completeness:")?;
        writeln!(f, "    {:<18} {}", Completeness::HasAll.label(), self.has_all)?;
        writeln!(f, "    {:<18} {}", Completeness::MissingOne.label(), self.missing_one)?;
        writeln!(f, "    {:<18} {}", Completeness::MissingTwo.label(), self.missing_two)?;
        writeln!(f, "    {:<18} {}", Completeness::MissingAll.label(), self.missing_all)?;
        writeln!(f, "  Skipped duplicates:     {}", self.duplicates)?;
        writeln!(f, "  Skipped invalid:        {}", self.skipped_invalid)?;
        write!(
            f,
            "  Works with no summary, full text or tags: {} (title-only downstream)",
            self.missing_all
        )
    }
}
