//! Concurrent liveness validation of candidates

use crate::error::ProbeFailure;
use crate::proxy::fetcher::DEFAULT_USER_AGENT;
use crate::proxy::models::{Candidate, ProbeResult, ProbeStatus};
use async_trait::async_trait;
use futures::future::join_all;
use reqwest::redirect::Policy;
use reqwest::{Client, Proxy as ReqwestProxy};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Default timeout for a single probe in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default number of probes per batch
const DEFAULT_WORKERS: usize = 300;

/// Default URL fetched through each candidate
pub const DEFAULT_TEST_URL: &str = "http://captive.apple.com/";

/// Default substring a genuine response must contain
pub const DEFAULT_MARKER: &str = "Success";

/// Configuration for liveness probing
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Timeout for each probe
    pub timeout: Duration,
    /// Maximum probes in flight, which is also the batch size
    pub workers: usize,
    /// URL to fetch through the candidate
    pub test_url: String,
    /// Substring that marks a genuine response
    pub marker: String,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            workers: DEFAULT_WORKERS,
            test_url: DEFAULT_TEST_URL.to_string(),
            marker: DEFAULT_MARKER.to_string(),
        }
    }
}

impl ValidatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_test_url(mut self, url: String) -> Self {
        self.test_url = url;
        self
    }

    pub fn with_marker(mut self, marker: String) -> Self {
        self.marker = marker;
        self
    }
}

/// One liveness check of one candidate
#[async_trait]
pub trait Probe: Send + Sync + 'static {
    async fn probe(&self, candidate: Candidate) -> ProbeResult;
}

/// Probe that fetches the test URL with the candidate as HTTP and HTTPS proxy.
///
/// Redirects are not followed and certificates are not verified: a redirect
/// means a captive or rewriting path, and public proxies rarely present a
/// matching certificate.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    config: ValidatorConfig,
}

impl HttpProbe {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    /// Create a reqwest client routed through the candidate
    fn create_client(&self, candidate: Candidate) -> reqwest::Result<Client> {
        let proxy = ReqwestProxy::all(candidate.proxy_url())?;

        Client::builder()
            .proxy(proxy)
            .redirect(Policy::none())
            .danger_accept_invalid_certs(true)
            .timeout(self.config.timeout)
            .user_agent(DEFAULT_USER_AGENT)
            .build()
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, candidate: Candidate) -> ProbeResult {
        let start = Instant::now();

        let client = match self.create_client(candidate) {
            Ok(client) => client,
            Err(e) => return ProbeResult::failed(candidate, ProbeFailure::Client(e.to_string())),
        };

        let request = async {
            let response = client.get(&self.config.test_url).send().await?;
            let status = response.status();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>((status, body))
        };

        match tokio::time::timeout(self.config.timeout, request).await {
            Ok(Ok((status, _))) if status.is_redirection() => {
                ProbeResult::failed(candidate, ProbeFailure::Redirect(status.as_u16()))
            }
            Ok(Ok((_, body))) => {
                if body.contains(&self.config.marker) {
                    ProbeResult::live(candidate, start.elapsed().as_millis() as u64)
                } else {
                    ProbeResult::failed(candidate, ProbeFailure::MarkerMissing)
                }
            }
            Ok(Err(e)) if e.is_timeout() => ProbeResult::failed(candidate, ProbeFailure::Timeout),
            Ok(Err(e)) => ProbeResult::failed(candidate, ProbeFailure::Transport(e.to_string())),
            Err(_) => ProbeResult::failed(candidate, ProbeFailure::Timeout),
        }
    }
}

/// Outcome of validating one candidate set
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    /// Confirmed-live candidates, in no particular order
    pub live: Vec<Candidate>,
    pub probed: usize,
    /// Failure counts keyed by [`ProbeFailure::kind`]
    pub failures: BTreeMap<&'static str, usize>,
    /// Sum of the response times of live candidates
    pub total_response_ms: u64,
}

impl ValidationReport {
    /// Mean response time over live candidates
    pub fn mean_response_ms(&self) -> Option<u64> {
        (!self.live.is_empty()).then(|| self.total_response_ms / self.live.len() as u64)
    }

    fn absorb(&mut self, result: ProbeResult) {
        self.probed += 1;
        match result.status {
            ProbeStatus::Live => {
                self.total_response_ms += result.response_time_ms.unwrap_or_default();
                self.live.push(result.candidate);
            }
            ProbeStatus::Failed(failure) => {
                debug!(candidate = %result.candidate, "probe failed: {}", failure);
                *self.failures.entry(failure.kind()).or_default() += 1;
            }
        }
    }
}

/// Runs probes in closed batches of at most `workers` candidates
pub struct Validator<P> {
    probe: Arc<P>,
    workers: usize,
}

impl<P: Probe> Validator<P> {
    pub fn new(probe: P, workers: usize) -> Self {
        Self {
            probe: Arc::new(probe),
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Probe every candidate once
    ///
    /// Each batch is fully spawned before it is awaited, and the next batch
    /// starts only after every probe of the current one has finished, so at
    /// most `workers` probes are ever in flight.
    pub async fn validate(&self, candidates: &[Candidate]) -> ValidationReport {
        let mut report = ValidationReport::default();

        for (index, batch) in candidates.chunks(self.workers).enumerate() {
            let handles: Vec<_> = batch
                .iter()
                .map(|candidate| {
                    let probe = Arc::clone(&self.probe);
                    let candidate = *candidate;
                    tokio::spawn(async move { probe.probe(candidate).await })
                })
                .collect();

            let outcomes = join_all(handles).await;
            for (candidate, outcome) in batch.iter().zip(outcomes) {
                let result = outcome
                    .unwrap_or_else(|_| ProbeResult::failed(*candidate, ProbeFailure::Aborted));
                report.absorb(result);
            }
            debug!(
                batch = index + 1,
                size = batch.len(),
                live = report.live.len(),
                "batch finished"
            );
        }

        info!(
            probed = report.probed,
            live = report.live.len(),
            mean_response_ms = ?report.mean_response_ms(),
            "validation finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn candidates(count: usize) -> Vec<Candidate> {
        (0..count)
            .map(|i| {
                let ip = Ipv4Addr::new(10, 0, (i / 256) as u8, (i % 256) as u8);
                Candidate::new(ip, 8080).unwrap()
            })
            .collect()
    }

    /// Tracks how many probes run at once
    #[derive(Default)]
    struct CountingProbe {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Probe for CountingProbe {
        async fn probe(&self, candidate: Candidate) -> ProbeResult {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            ProbeResult::live(candidate, 5)
        }
    }

    /// Live only when the last octet is even
    struct EvenProbe;

    #[async_trait]
    impl Probe for EvenProbe {
        async fn probe(&self, candidate: Candidate) -> ProbeResult {
            if candidate.ip().octets()[3] % 2 == 0 {
                ProbeResult::live(candidate, 1)
            } else {
                ProbeResult::failed(candidate, ProbeFailure::Timeout)
            }
        }
    }

    struct PanickingProbe;

    #[async_trait]
    impl Probe for PanickingProbe {
        async fn probe(&self, _candidate: Candidate) -> ProbeResult {
            panic!("probe blew up");
        }
    }

    #[test]
    fn test_validator_config_default() {
        let config = ValidatorConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(config.workers, DEFAULT_WORKERS);
        assert_eq!(config.test_url, DEFAULT_TEST_URL);
        assert_eq!(config.marker, DEFAULT_MARKER);
    }

    #[test]
    fn test_validator_config_builder() {
        let config = ValidatorConfig::new()
            .with_timeout(Duration::from_secs(3))
            .with_workers(20)
            .with_test_url("http://example.com".to_string())
            .with_marker("Example".to_string());

        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(config.workers, 20);
        assert_eq!(config.test_url, "http://example.com");
        assert_eq!(config.marker, "Example");
    }

    #[test]
    fn test_zero_workers_clamped() {
        let validator = Validator::new(EvenProbe, 0);
        assert_eq!(validator.workers(), 1);
    }

    #[tokio::test]
    async fn test_never_more_than_cap_in_flight() {
        let validator = Validator::new(CountingProbe::default(), 100);
        let report = validator.validate(&candidates(500)).await;

        let probe = &validator.probe;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 500);
        let peak = probe.peak.load(Ordering::SeqCst);
        assert!(peak <= 100, "peak in flight was {peak}");
        assert!(peak > 1);
        assert_eq!(report.probed, 500);
        assert_eq!(report.live.len(), 500);
        assert_eq!(report.mean_response_ms(), Some(5));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cap_holds_on_multi_thread_runtime() {
        let validator = Validator::new(CountingProbe::default(), 7);
        validator.validate(&candidates(50)).await;
        assert!(validator.probe.peak.load(Ordering::SeqCst) <= 7);
    }

    #[tokio::test]
    async fn test_failures_are_dropped_and_counted() {
        let validator = Validator::new(EvenProbe, 3);
        let report = validator.validate(&candidates(10)).await;

        assert_eq!(report.probed, 10);
        assert_eq!(report.live.len(), 5);
        assert!(report.live.iter().all(|c| c.ip().octets()[3] % 2 == 0));
        assert_eq!(report.failures.get("timeout"), Some(&5));
    }

    #[tokio::test]
    async fn test_panicking_probe_is_contained() {
        let validator = Validator::new(PanickingProbe, 4);
        let report = validator.validate(&candidates(6)).await;
        assert!(report.live.is_empty());
        assert_eq!(report.failures.get("aborted"), Some(&6));
    }

    #[tokio::test]
    async fn test_empty_input() {
        let validator = Validator::new(EvenProbe, 10);
        let report = validator.validate(&[]).await;
        assert_eq!(report.probed, 0);
        assert!(report.live.is_empty());
        assert_eq!(report.mean_response_ms(), None);
    }

    /// Minimal forward proxy answering every request with `response`
    async fn fake_proxy(response: &'static str) -> Candidate {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let mut read = 0;
                    while !String::from_utf8_lossy(&buf[..read]).contains("\r\n\r\n") {
                        match socket.read(&mut buf[read..]).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => read += n,
                        }
                    }
                    if !response.is_empty() {
                        let _ = socket.write_all(response.as_bytes()).await;
                    } else {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                    }
                });
            }
        });
        Candidate::new(Ipv4Addr::LOCALHOST, port).unwrap()
    }

    fn http_probe() -> HttpProbe {
        HttpProbe::new(ValidatorConfig::new().with_timeout(Duration::from_secs(1)))
    }

    #[tokio::test]
    async fn test_http_probe_live() {
        let candidate = fake_proxy(
            "HTTP/1.1 200 OK\r\nContent-Length: 7\r\nConnection: close\r\n\r\nSuccess",
        )
        .await;
        let result = http_probe().probe(candidate).await;
        assert!(result.is_live(), "{:?}", result.status);
        assert!(result.response_time_ms.is_some());
    }

    #[tokio::test]
    async fn test_http_probe_marker_missing() {
        let candidate = fake_proxy(
            "HTTP/1.1 200 OK\r\nContent-Length: 7\r\nConnection: close\r\n\r\nBlocked",
        )
        .await;
        let result = http_probe().probe(candidate).await;
        assert_eq!(result.status, ProbeStatus::Failed(ProbeFailure::MarkerMissing));
    }

    #[tokio::test]
    async fn test_http_probe_redirect_is_not_live() {
        let candidate = fake_proxy(
            "HTTP/1.1 302 Found\r\nLocation: http://portal.test/\r\nContent-Length: 7\r\nConnection: close\r\n\r\nSuccess",
        )
        .await;
        let result = http_probe().probe(candidate).await;
        assert_eq!(result.status, ProbeStatus::Failed(ProbeFailure::Redirect(302)));
    }

    #[tokio::test]
    async fn test_http_probe_timeout() {
        let candidate = fake_proxy("").await;
        let result = http_probe().probe(candidate).await;
        assert_eq!(result.status, ProbeStatus::Failed(ProbeFailure::Timeout));
    }

    #[tokio::test]
    async fn test_http_probe_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let candidate = Candidate::new(Ipv4Addr::LOCALHOST, port).unwrap();
        let result = http_probe().probe(candidate).await;
        assert!(!result.is_live());
        assert!(matches!(result.status, ProbeStatus::Failed(ProbeFailure::Transport(_))));
    }
}
