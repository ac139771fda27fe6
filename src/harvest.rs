//! Harvest cycle: crawl, deduplicate, validate, classify, persist

use crate::config::{Category, HarvestConfig};
use crate::proxy::classify::classify;
use crate::proxy::crawler::SourceCrawler;
use crate::proxy::fetcher::{Fetcher, FetcherConfig, PageFetch};
use crate::proxy::models::{ClassifiedValidSet, OriginTag};
use crate::proxy::session::CrawlSession;
use crate::proxy::source::SourceDescriptor;
use crate::proxy::validator::{HttpProbe, Probe, ValidationReport, Validator};
use crate::sink::ResultSink;
use crate::Result;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{error, info};

/// Counters for one cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleStats {
    pub sources: usize,
    pub requests: u32,
    /// Raw strings returned by parsers
    pub extracted: usize,
    /// Valid candidates before deduplication
    pub collected: usize,
    /// Of `collected`, those found on normal sources
    pub collected_normal: usize,
    /// Of `collected`, those found on anonymous sources
    pub collected_anonymous: usize,
    /// Sources abandoned after consecutive empty pages
    pub stopped_early: usize,
    pub unique: usize,
    pub live: usize,
    pub normal: usize,
    pub anonymous: usize,
    pub failures: BTreeMap<&'static str, usize>,
}

impl CycleStats {
    /// Share of collected candidates that were repeats
    pub fn duplicate_rate(&self) -> f64 {
        if self.collected == 0 {
            0.0
        } else {
            1.0 - self.unique as f64 / self.collected as f64
        }
    }
}

/// Output of one cycle
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub classified: ClassifiedValidSet,
    pub stats: CycleStats,
}

/// Ties the crawler and validator together over a fixed source list
pub struct Harvester<F, P> {
    crawler: SourceCrawler<F>,
    validator: Validator<P>,
    sources: Vec<SourceDescriptor>,
    category: Category,
}

impl Harvester<Fetcher, HttpProbe> {
    /// Build the network-backed harvester
    pub fn from_config(config: &HarvestConfig, sources: Vec<SourceDescriptor>) -> Result<Self> {
        let fetcher =
            Fetcher::with_config(FetcherConfig::new().with_timeout(config.fetch_timeout))?;
        let validator = Validator::new(
            HttpProbe::new(config.validator.clone()),
            config.validator.workers,
        );
        Ok(Self::new(
            SourceCrawler::new(fetcher),
            validator,
            sources,
            config.category,
        ))
    }
}

impl<F: PageFetch, P: Probe> Harvester<F, P> {
    pub fn new(
        crawler: SourceCrawler<F>,
        validator: Validator<P>,
        sources: Vec<SourceDescriptor>,
        category: Category,
    ) -> Self {
        Self {
            crawler,
            validator,
            sources,
            category,
        }
    }

    /// Run one full cycle with a fresh session
    pub async fn run_cycle(&self) -> CycleReport {
        let mut session = CrawlSession::new();
        let mut stats = CycleStats::default();

        for source in self.sources.iter().filter(|s| self.category.includes(s.tag)) {
            let report = self.crawler.crawl(source, &mut session).await;
            session.record(report);
        }

        for report in session.reports() {
            stats.sources += 1;
            stats.requests += report.requests;
            stats.extracted += report.extracted;
            match report.tag {
                OriginTag::Normal => stats.collected_normal += report.valid,
                OriginTag::Anonymous => stats.collected_anonymous += report.valid,
            }
            if report.stopped_early {
                stats.stopped_early += 1;
            }
        }

        stats.collected = session.raw_len();
        let unique = session.take_unique();
        stats.unique = unique.len();
        info!(
            sources = stats.sources,
            requests = stats.requests,
            extracted = stats.extracted,
            stopped_early = stats.stopped_early,
            collected = stats.collected,
            collected_normal = stats.collected_normal,
            collected_anonymous = stats.collected_anonymous,
            unique = stats.unique,
            duplicate_rate = %format!("{:.1}%", stats.duplicate_rate() * 100.0),
            "crawl finished"
        );

        let validation = if unique.is_empty() {
            info!("no candidates to validate");
            ValidationReport::default()
        } else {
            self.validator.validate(&unique.candidates()).await
        };

        let classified = classify(&unique, &validation.live);
        stats.live = validation.live.len();
        stats.failures = validation.failures;
        stats.normal = classified.normal.len();
        stats.anonymous = classified.anonymous.len();
        info!(
            live = stats.live,
            normal = stats.normal,
            anonymous = stats.anonymous,
            failures = ?stats.failures,
            "cycle finished"
        );

        CycleReport { classified, stats }
    }

    /// One cycle, handed to `sink`
    pub async fn run_once<S: ResultSink + ?Sized>(&self, sink: &S) -> Result<CycleReport> {
        let report = self.run_cycle().await;
        sink.record(&report.classified)?;
        Ok(report)
    }

    /// Cycle forever, sleeping `interval` between cycles, until Ctrl-C
    ///
    /// Sink failures are logged and do not stop the loop.
    pub async fn run_forever<S: ResultSink + ?Sized>(
        &self,
        sink: &S,
        interval: Duration,
    ) -> Result<()> {
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        let mut cycle = 0u64;
        loop {
            cycle += 1;
            let iteration = async {
                info!(cycle, "starting harvest cycle");
                if let Err(e) = self.run_once(sink).await {
                    error!(cycle, "failed to record results: {:#}", e);
                }
                info!(cycle, "next cycle in {}s", interval.as_secs());
                tokio::time::sleep(interval).await;
            };

            tokio::select! {
                _ = &mut shutdown => {
                    info!("interrupted, stopping");
                    return Ok(());
                }
                _ = iteration => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProbeFailure;
    use crate::proxy::crawler::STOP_AFTER_EMPTY_PAGES;
    use crate::proxy::models::{Candidate, ProbeResult};
    use crate::proxy::parser::ParserKind;
    use crate::proxy::source::{PageCount, UrlJoin};
    use async_trait::async_trait;
    use std::cell::RefCell;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeFetcher {
        pages: HashMap<String, String>,
        requested: Mutex<Vec<String>>,
    }

    impl FakeFetcher {
        fn with_page(mut self, url: &str, body: &str) -> Self {
            self.pages.insert(url.to_string(), body.to_string());
            self
        }
    }

    #[async_trait]
    impl PageFetch for FakeFetcher {
        async fn fetch(&self, url: &str, _body: Option<&str>) -> String {
            self.requested.lock().unwrap().push(url.to_string());
            self.pages.get(url).cloned().unwrap_or_default()
        }
    }

    /// Live unless listed as dead
    #[derive(Default)]
    struct FakeProbe {
        dead: HashSet<String>,
    }

    #[async_trait]
    impl Probe for FakeProbe {
        async fn probe(&self, candidate: Candidate) -> ProbeResult {
            if self.dead.contains(&candidate.to_string()) {
                ProbeResult::failed(candidate, ProbeFailure::MarkerMissing)
            } else {
                ProbeResult::live(candidate, 1)
            }
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        records: RefCell<Vec<ClassifiedValidSet>>,
    }

    impl ResultSink for RecordingSink {
        fn record(&self, set: &ClassifiedValidSet) -> Result<()> {
            self.records.borrow_mut().push(set.clone());
            Ok(())
        }
    }

    fn api_source(name: &str, url: &str, tag: OriginTag) -> SourceDescriptor {
        SourceDescriptor::new(name, url, ParserKind::from_name("api1").unwrap(), tag)
            .with_pages(PageCount::Fixed(1))
            .with_join(UrlJoin::Fixed)
    }

    fn c(raw: &str) -> Candidate {
        Candidate::parse(raw).unwrap()
    }

    fn harvester(
        fetcher: FakeFetcher,
        probe: FakeProbe,
        sources: Vec<SourceDescriptor>,
        category: Category,
    ) -> Harvester<FakeFetcher, FakeProbe> {
        Harvester::new(SourceCrawler::new(fetcher), Validator::new(probe, 100), sources, category)
    }

    #[tokio::test]
    async fn test_end_to_end_single_source() {
        let fetcher = FakeFetcher::default()
            .with_page("http://api.test/free", "1.2.3.4:8080\n1.2.3.4:8080\n5.6.7.8:3128");
        let sources = vec![api_source("api", "http://api.test/free", OriginTag::Normal)];
        let harvester = harvester(fetcher, FakeProbe::default(), sources, Category::All);

        let report = harvester.run_cycle().await;

        assert_eq!(report.stats.collected, 3);
        assert_eq!(report.stats.unique, 2);
        assert_eq!(report.classified.normal, vec![c("1.2.3.4:8080"), c("5.6.7.8:3128")]);
        assert!(report.classified.anonymous.is_empty());
        assert!((report.stats.duplicate_rate() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_conflicting_tags_resolve_to_anonymous() {
        let fetcher = FakeFetcher::default()
            .with_page("http://normal.test/", "1.1.1.1:80 9.9.9.9:3128")
            .with_page("http://anon.test/", "9.9.9.9:3128 2.2.2.2:80");
        let sources = vec![
            api_source("normal", "http://normal.test/", OriginTag::Normal),
            api_source("anon", "http://anon.test/", OriginTag::Anonymous),
        ];
        let harvester = harvester(fetcher, FakeProbe::default(), sources, Category::All);

        let report = harvester.run_cycle().await;

        assert_eq!(report.classified.normal, vec![c("1.1.1.1:80")]);
        assert_eq!(report.classified.anonymous, vec![c("2.2.2.2:80"), c("9.9.9.9:3128")]);
        assert_eq!(report.stats.sources, 2);
        assert_eq!(report.stats.requests, 2);
        assert_eq!(report.stats.extracted, 4);
        assert_eq!(report.stats.collected_normal, 2);
        assert_eq!(report.stats.collected_anonymous, 2);
        assert_eq!(report.stats.collected, 4);
    }

    #[tokio::test]
    async fn test_dead_candidates_are_dropped() {
        let fetcher = FakeFetcher::default().with_page("http://api.test/", "1.1.1.1:80 2.2.2.2:80");
        let probe = FakeProbe {
            dead: HashSet::from(["2.2.2.2:80".to_string()]),
        };
        let sources = vec![api_source("api", "http://api.test/", OriginTag::Normal)];
        let harvester = harvester(fetcher, probe, sources, Category::All);

        let report = harvester.run_cycle().await;

        assert_eq!(report.classified.normal, vec![c("1.1.1.1:80")]);
        assert_eq!(report.stats.failures.get("marker_missing"), Some(&1));
    }

    #[tokio::test]
    async fn test_category_filter_skips_sources() {
        let fetcher = FakeFetcher::default()
            .with_page("http://normal.test/", "1.1.1.1:80")
            .with_page("http://anon.test/", "2.2.2.2:80");
        let sources = vec![
            api_source("normal", "http://normal.test/", OriginTag::Normal),
            api_source("anon", "http://anon.test/", OriginTag::Anonymous),
        ];
        let harvester = harvester(fetcher, FakeProbe::default(), sources, Category::Anonymous);

        let report = harvester.run_cycle().await;

        assert!(report.classified.normal.is_empty());
        assert_eq!(report.classified.anonymous, vec![c("2.2.2.2:80")]);
        let requested = harvester.crawler.fetcher().requested.lock().unwrap().clone();
        assert_eq!(requested, vec!["http://anon.test/"]);
    }

    #[tokio::test]
    async fn test_cycles_do_not_leak_candidates() {
        let fetcher = FakeFetcher::default().with_page("http://api.test/", "1.1.1.1:80");
        let sources = vec![api_source("api", "http://api.test/", OriginTag::Normal)];
        let harvester = harvester(fetcher, FakeProbe::default(), sources, Category::All);

        let first = harvester.run_cycle().await;
        let second = harvester.run_cycle().await;

        assert_eq!(first.stats.collected, 1);
        assert_eq!(second.stats.collected, 1);
        assert_eq!(second.classified, first.classified);
    }

    #[tokio::test]
    async fn test_run_once_records_to_sink() {
        let sources = vec![api_source("down", "http://down.test/", OriginTag::Normal)];
        let harvester = harvester(
            FakeFetcher::default(),
            FakeProbe::default(),
            sources,
            Category::All,
        );
        let sink = RecordingSink::default();

        let report = harvester.run_once(&sink).await.unwrap();

        assert!(report.classified.is_empty());
        assert_eq!(report.stats.live, 0);
        assert_eq!(report.stats.requests, 1);
        assert_eq!(report.stats.stopped_early, 0);
        assert_eq!(sink.records.borrow().len(), 1);
    }

    #[tokio::test]
    async fn test_stats_count_abandoned_sources() {
        let fetcher = FakeFetcher::default().with_page("http://api.test/", "1.1.1.1:80");
        let dead = SourceDescriptor::new(
            "dead",
            "http://dead.test/",
            ParserKind::from_name("api1").unwrap(),
            OriginTag::Anonymous,
        )
        .with_pages(PageCount::Fixed(5));
        let sources = vec![api_source("api", "http://api.test/", OriginTag::Normal), dead];
        let harvester = harvester(fetcher, FakeProbe::default(), sources, Category::All);

        let report = harvester.run_cycle().await;

        assert_eq!(report.stats.sources, 2);
        assert_eq!(report.stats.requests, 1 + STOP_AFTER_EMPTY_PAGES);
        assert_eq!(report.stats.stopped_early, 1);
        assert_eq!(report.stats.collected_normal, 1);
        assert_eq!(report.stats.collected_anonymous, 0);
    }

    #[test]
    fn test_duplicate_rate_without_candidates() {
        assert_eq!(CycleStats::default().duplicate_rate(), 0.0);
    }
}
