//! Result sinks for the classified proxy lists

use crate::proxy::models::{Candidate, ClassifiedValidSet};
use crate::Result;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Receives the output of every cycle.
///
/// A sink replaces whatever it recorded for the previous cycle.
pub trait ResultSink {
    fn record(&self, set: &ClassifiedValidSet) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct Summary {
    pub normal_count: usize,
    pub anonymous_count: usize,
    pub total_count: usize,
    pub update_time: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ProxyLists {
    pub normal: Vec<String>,
    pub anonymous: Vec<String>,
}

/// On-disk document written by [`JsonFileSink`]
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct SavedProxies {
    pub summary: Summary,
    pub proxy_list: ProxyLists,
}

impl SavedProxies {
    pub fn new(set: &ClassifiedValidSet) -> Self {
        let strings = |list: &[Candidate]| -> Vec<String> {
            list.iter().map(Candidate::to_string).collect()
        };
        Self {
            summary: Summary {
                normal_count: set.normal.len(),
                anonymous_count: set.anonymous.len(),
                total_count: set.total(),
                update_time: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            },
            proxy_list: ProxyLists {
                normal: strings(&set.normal),
                anonymous: strings(&set.anonymous),
            },
        }
    }
}

/// Writes a pretty-printed JSON document, replacing the file atomically
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResultSink for JsonFileSink {
    fn record(&self, set: &ClassifiedValidSet) -> Result<()> {
        let document = SavedProxies::new(set);
        let json = serde_json::to_string_pretty(&document)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;

        info!(
            normal = set.normal.len(),
            anonymous = set.anonymous.len(),
            "saved proxies to {}",
            self.path.display()
        );
        Ok(())
    }
}
