//! Proxy module for harvesting and validating proxies
//!
//! This module provides functionality for:
//! - Describing listing sources and building their page URLs
//! - Extracting `ip:port` strings with named parser strategies
//! - Crawling sources page by page into a per-cycle session
//! - Deduplicating and probing candidates in bounded batches
//! - Splitting live proxies into normal and anonymous buckets

pub mod classify;
pub mod crawler;
pub mod fetcher;
pub mod models;
pub mod parser;
pub mod session;
pub mod source;
pub mod validator;

pub use classify::classify;
pub use crawler::{SourceCrawler, STOP_AFTER_EMPTY_PAGES};
pub use fetcher::{Fetcher, FetcherConfig, PageFetch};
pub use models::{
    Candidate, ClassifiedValidSet, OriginTag, ProbeResult, ProbeStatus, TaggedCandidate,
};
pub use parser::{CellKind, ParserKind, TableLayout};
pub use session::{CandidateSet, CrawlSession, SourceReport};
pub use source::{PageCount, SourceDescriptor, UrlJoin};
pub use validator::{HttpProbe, Probe, ValidationReport, Validator, ValidatorConfig};
