//! Source crawler: walks the pages of one listing source
//!
//! This module provides functionality for:
//! - Resolving how many pages a source has (fixed or read from a JSON API)
//! - Fetching each page with the source's rate-limit delay
//! - Stopping early once a source keeps returning nothing usable
//! - Appending validated, tagged candidates to the crawl session

use crate::proxy::fetcher::PageFetch;
use crate::proxy::models::Candidate;
use crate::proxy::parser::read_page_count;
use crate::proxy::session::{CrawlSession, SourceReport};
use crate::proxy::source::{PageCount, SourceDescriptor};
use tracing::{debug, info, warn};

/// Consecutive zero-yield pages after which a source is abandoned
pub const STOP_AFTER_EMPTY_PAGES: u32 = 3;

/// Crawls listing sources one page at a time
pub struct SourceCrawler<F> {
    fetcher: F,
}

impl<F: PageFetch> SourceCrawler<F> {
    pub fn new(fetcher: F) -> Self {
        Self { fetcher }
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Crawl every page of `source`, appending candidates to `session`
    ///
    /// Never fails: empty or unparsable pages count as zero-yield and the
    /// candidates found so far stay in the session.
    pub async fn crawl(
        &self,
        source: &SourceDescriptor,
        session: &mut CrawlSession,
    ) -> SourceReport {
        let mut report = SourceReport::new(&source.name, source.tag);
        let (total_pages, mut first_page) = self.resolve_pages(source, &mut report).await;

        let mut empty_streak = 0u32;
        for page in 1..=total_pages {
            let body = match first_page.take() {
                Some(body) if page == 1 => body,
                _ => self.request_page(source, page, &mut report).await,
            };
            report.pages += 1;

            let raw = if body.is_empty() {
                warn!(source = %source.name, page, "empty response, skipping page");
                Vec::new()
            } else {
                source.parser.extract(&body)
            };
            let valid: Vec<Candidate> = raw.iter().filter_map(|s| Candidate::parse(s)).collect();

            debug!(
                source = %source.name,
                page,
                total_pages,
                extracted = raw.len(),
                valid = valid.len(),
                "page crawled"
            );
            report.extracted += raw.len();
            report.valid += valid.len();

            if valid.is_empty() {
                empty_streak += 1;
                if empty_streak >= STOP_AFTER_EMPTY_PAGES {
                    info!(
                        source = %source.name,
                        page,
                        "{} consecutive empty pages, stopping source",
                        STOP_AFTER_EMPTY_PAGES
                    );
                    report.stopped_early = true;
                    break;
                }
            } else {
                empty_streak = 0;
                session.extend(source.tag, valid);
            }
        }

        info!(
            source = %source.name,
            tag = %source.tag,
            requests = report.requests,
            pages = report.pages,
            extracted = report.extracted,
            valid = report.valid,
            "source crawled"
        );
        report
    }

    /// Work out the page count; with `Auto` also return the page-1 body
    /// so it is not requested twice
    async fn resolve_pages(
        &self,
        source: &SourceDescriptor,
        report: &mut SourceReport,
    ) -> (u32, Option<String>) {
        match source.pages {
            PageCount::Fixed(pages) => (pages, None),
            PageCount::Auto if !source.parser.supports_auto_pages() => {
                warn!(
                    source = %source.name,
                    parser = %source.parser,
                    "pages = \"auto\" needs a JSON API parser, crawling one page"
                );
                (1, None)
            }
            PageCount::Auto => {
                let body = self.request_page(source, 1, report).await;
                if body.is_empty() {
                    warn!(source = %source.name, "could not fetch first page to read page count");
                    return (1, None);
                }
                let pages = read_page_count(&body).unwrap_or_else(|| {
                    warn!(source = %source.name, "no page count in first page, crawling one page");
                    1
                });
                info!(source = %source.name, pages, "resolved page count");
                (pages, Some(body))
            }
        }
    }

    /// One request followed by the source's delay, whatever the outcome
    async fn request_page(
        &self,
        source: &SourceDescriptor,
        page: u32,
        report: &mut SourceReport,
    ) -> String {
        let url = source.page_url(page);
        let post_body = source.page_body(page);
        debug!(source = %source.name, page, %url, "requesting page");

        let body = self.fetcher.fetch(&url, post_body.as_deref()).await;
        report.requests += 1;

        if !source.delay.is_zero() {
            tokio::time::sleep(source.delay).await;
        }
        body
    }
}
