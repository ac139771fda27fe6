//! Proxy data models

use crate::error::ProbeFailure;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::str::FromStr;

/// Which bucket a source's proxies end up in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OriginTag {
    #[default]
    Normal,
    Anonymous,
}

impl OriginTag {
    /// Combine two tags seen for the same address; anonymous always wins.
    pub fn merge(self, other: OriginTag) -> OriginTag {
        match (self, other) {
            (OriginTag::Normal, OriginTag::Normal) => OriginTag::Normal,
            _ => OriginTag::Anonymous,
        }
    }
}

impl fmt::Display for OriginTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OriginTag::Normal => write!(f, "normal"),
            OriginTag::Anonymous => write!(f, "anonymous"),
        }
    }
}

/// A syntactically valid `ip:port` address that has not been probed yet.
///
/// Construction goes through [`Candidate::parse`] or [`Candidate::new`], so an
/// existing value always has a dotted-quad IPv4 host and a non-zero port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Candidate(SocketAddrV4);

impl Candidate {
    /// Create a candidate from parts. Returns `None` for port 0.
    pub fn new(ip: Ipv4Addr, port: u16) -> Option<Self> {
        (port != 0).then(|| Self(SocketAddrV4::new(ip, port)))
    }

    /// Parse a raw `ip:port` string as scraped from a page
    ///
    /// Surrounding whitespace is ignored. Anything else that is not a
    /// dotted quad followed by a decimal port in 1..=65535 is rejected.
    /// Zero-padded octets such as `010` are read as decimal.
    pub fn parse(raw: &str) -> Option<Self> {
        let (host, port) = raw.trim().split_once(':')?;

        let mut octets = [0u8; 4];
        let mut parts = host.split('.');
        for octet in octets.iter_mut() {
            *octet = decimal(parts.next()?)?;
        }
        if parts.next().is_some() {
            return None;
        }

        Self::new(Ipv4Addr::from(octets), decimal(port)?)
    }

    pub fn ip(&self) -> Ipv4Addr {
        *self.0.ip()
    }

    pub fn port(&self) -> u16 {
        self.0.port()
    }

    /// URL used when handing the candidate to an HTTP client as its proxy
    pub fn proxy_url(&self) -> String {
        format!("http://{}", self.0)
    }
}

/// Unsigned decimal digits only; rejects signs and empty strings
fn decimal<T: FromStr>(digits: &str) -> Option<T> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A candidate together with the tag of the source it came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaggedCandidate {
    pub candidate: Candidate,
    pub tag: OriginTag,
}

/// Outcome of probing a single candidate
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeStatus {
    Live,
    Failed(ProbeFailure),
}

/// Detailed result of a single liveness probe
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub candidate: Candidate,
    pub status: ProbeStatus,
    pub response_time_ms: Option<u64>,
}

impl ProbeResult {
    pub fn live(candidate: Candidate, response_time_ms: u64) -> Self {
        Self {
            candidate,
            status: ProbeStatus::Live,
            response_time_ms: Some(response_time_ms),
        }
    }

    pub fn failed(candidate: Candidate, failure: ProbeFailure) -> Self {
        Self {
            candidate,
            status: ProbeStatus::Failed(failure),
            response_time_ms: None,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self.status, ProbeStatus::Live)
    }
}

/// Final per-cycle output: live proxies split by origin tag.
///
/// The two sequences are disjoint and sorted by address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifiedValidSet {
    pub normal: Vec<Candidate>,
    pub anonymous: Vec<Candidate>,
}

impl ClassifiedValidSet {
    pub fn total(&self) -> usize {
        self.normal.len() + self.anonymous.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}
