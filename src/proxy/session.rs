//! Crawl session accumulator and deduplication

use crate::proxy::models::{Candidate, OriginTag, TaggedCandidate};
use std::collections::HashMap;

/// Per-source crawl counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReport {
    pub source: String,
    pub tag: OriginTag,
    /// Requests actually sent, including the page-count probe
    pub requests: u32,
    /// Pages processed
    pub pages: u32,
    /// Raw strings the parser returned
    pub extracted: usize,
    /// Strings that survived candidate validation
    pub valid: usize,
    /// Loop ended by the consecutive empty page rule
    pub stopped_early: bool,
}

impl SourceReport {
    pub fn new(source: &str, tag: OriginTag) -> Self {
        Self {
            source: source.to_string(),
            tag,
            requests: 0,
            pages: 0,
            extracted: 0,
            valid: 0,
            stopped_early: false,
        }
    }
}

/// Everything gathered while crawling the sources of one cycle.
///
/// A session is created per cycle and consumed by [`CrawlSession::take_unique`],
/// so nothing leaks into the next cycle.
#[derive(Debug, Default)]
pub struct CrawlSession {
    pool: Vec<TaggedCandidate>,
    reports: Vec<SourceReport>,
}

impl CrawlSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append candidates from one page
    pub fn extend<I>(&mut self, tag: OriginTag, candidates: I)
    where
        I: IntoIterator<Item = Candidate>,
    {
        self.pool
            .extend(candidates.into_iter().map(|candidate| TaggedCandidate { candidate, tag }));
    }

    pub fn record(&mut self, report: SourceReport) {
        self.reports.push(report);
    }

    /// Size of the raw pool, duplicates included
    pub fn raw_len(&self) -> usize {
        self.pool.len()
    }

    pub fn reports(&self) -> &[SourceReport] {
        &self.reports
    }

    /// Drain the pool into a unique set; the pool is left empty
    pub fn take_unique(&mut self) -> CandidateSet {
        let mut set = CandidateSet::default();
        for tagged in self.pool.drain(..) {
            set.insert(tagged.candidate, tagged.tag);
        }
        set
    }
}

/// Unique candidates of one cycle, each with its merged origin tag
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateSet {
    entries: HashMap<Candidate, OriginTag>,
}

impl CandidateSet {
    /// Insert a candidate; a second sighting merges tags, anonymous winning
    pub fn insert(&mut self, candidate: Candidate, tag: OriginTag) {
        self.entries
            .entry(candidate)
            .and_modify(|existing| *existing = existing.merge(tag))
            .or_insert(tag);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn tag_of(&self, candidate: &Candidate) -> Option<OriginTag> {
        self.entries.get(candidate).copied()
    }

    /// All candidates, sorted by address
    pub fn candidates(&self) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = self.entries.keys().copied().collect();
        candidates.sort();
        candidates
    }
}
