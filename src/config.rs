//! Source list and run configuration.
//!
//! Sources live in a TOML file with one `[[sources]]` table per listing site.
//! Each entry is validated on its own: a bad entry is logged and skipped, the
//! rest of the file still loads.

use crate::error::ConfigError;
use crate::proxy::models::OriginTag;
use crate::proxy::parser::{ParserKind, TableLayout};
use crate::proxy::source::{PageCount, SourceDescriptor, UrlJoin};
use crate::proxy::validator::ValidatorConfig;
use crate::Result;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};

/// Parser reference as written in the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParserSpec {
    /// A preset name such as `api2` or `html3`
    Named(String),
    /// An explicit table layout
    Table { table: TableLayout },
}

/// Page count as written in the config file: an integer or `"auto"`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PagesSpec {
    Count(i64),
    Keyword(String),
}

impl Default for PagesSpec {
    fn default() -> Self {
        PagesSpec::Count(1)
    }
}

/// One `[[sources]]` entry before validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub parser: ParserSpec,
    #[serde(default)]
    pub pages: PagesSpec,
    /// Seconds to wait after each page request
    #[serde(default)]
    pub delay: f64,
    #[serde(default)]
    pub tag: OriginTag,
    #[serde(default)]
    pub join: UrlJoin,
}

impl TryFrom<SourceEntry> for SourceDescriptor {
    type Error = ConfigError;

    fn try_from(entry: SourceEntry) -> std::result::Result<Self, Self::Error> {
        let source_name = entry.name.clone();

        let parser = match &entry.parser {
            ParserSpec::Named(name) => {
                ParserKind::from_name(name).ok_or_else(|| ConfigError::UnknownParser {
                    source_name: source_name.clone(),
                    parser: name.clone(),
                })?
            }
            ParserSpec::Table { table } if table.is_valid() => ParserKind::Table(*table),
            ParserSpec::Table { .. } => {
                return Err(ConfigError::InvalidTableLayout { source_name })
            }
        };

        let pages = match &entry.pages {
            PagesSpec::Count(n) if *n > 0 && *n <= i64::from(u32::MAX) => {
                PageCount::Fixed(*n as u32)
            }
            PagesSpec::Keyword(k) if k.eq_ignore_ascii_case("auto") => PageCount::Auto,
            PagesSpec::Count(n) => {
                return Err(ConfigError::InvalidPages {
                    source_name,
                    value: n.to_string(),
                })
            }
            PagesSpec::Keyword(k) => {
                return Err(ConfigError::InvalidPages {
                    source_name,
                    value: format!("{:?}", k),
                })
            }
        };

        let delay = match Duration::try_from_secs_f64(entry.delay) {
            Ok(delay) => delay,
            Err(_) => {
                return Err(ConfigError::InvalidDelay {
                    source_name,
                    value: entry.delay.to_string(),
                })
            }
        };

        let is_http = reqwest::Url::parse(&entry.url)
            .map(|url| matches!(url.scheme(), "http" | "https"))
            .unwrap_or(false);
        if !is_http {
            return Err(ConfigError::InvalidUrl {
                source_name,
                url: entry.url,
            });
        }

        Ok(SourceDescriptor {
            name: entry.name,
            url: entry.url,
            body: entry.body,
            parser,
            pages,
            delay,
            tag: entry.tag,
            join: entry.join,
        })
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SourcesFile<T> {
    #[serde(default = "Vec::new")]
    sources: Vec<T>,
}

/// Parse a sources file, skipping entries that fail validation
pub fn parse_sources(text: &str) -> Result<Vec<SourceDescriptor>> {
    let file: SourcesFile<toml::Value> = toml::from_str(text)?;
    let mut descriptors = Vec::with_capacity(file.sources.len());

    for raw in file.sources {
        let name = raw
            .get("name")
            .and_then(toml::Value::as_str)
            .unwrap_or("<unnamed>")
            .to_string();

        let entry: SourceEntry = match raw.try_into() {
            Ok(entry) => entry,
            Err(e) => {
                error!("source '{}' skipped: {}", name, e);
                continue;
            }
        };
        match SourceDescriptor::try_from(entry) {
            Ok(descriptor) => descriptors.push(descriptor),
            Err(e) => error!("{}, skipped", e),
        }
    }

    Ok(descriptors)
}

/// Load sources from `path`, or the built-in list when no file is given or
/// the file does not exist
pub fn load_sources(path: Option<&Path>) -> Result<Vec<SourceDescriptor>> {
    let Some(path) = path.filter(|p| p.exists()) else {
        if let Some(path) = path {
            info!("{} not found, using built-in sources", path.display());
        }
        return builtin_sources()
            .into_iter()
            .map(|entry| SourceDescriptor::try_from(entry).map_err(Into::into))
            .collect();
    };

    let text = fs::read_to_string(path)
        .with_context(|| format!("reading sources from {}", path.display()))?;
    let sources = parse_sources(&text)
        .with_context(|| format!("parsing sources from {}", path.display()))?;
    info!("loaded {} sources from {}", sources.len(), path.display());
    Ok(sources)
}

/// Write the built-in source list to `path` as a starting point for editing
pub fn write_default(path: &Path) -> Result<()> {
    let file = SourcesFile {
        sources: builtin_sources(),
    };
    let text = toml::to_string_pretty(&file)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, text)?;
    info!("wrote default sources to {}", path.display());
    Ok(())
}

/// Sources used when no sources file is configured
pub fn builtin_sources() -> Vec<SourceEntry> {
    let table = |name: &str, url: &str| SourceEntry {
        name: name.to_string(),
        url: url.to_string(),
        body: None,
        parser: ParserSpec::Named("html2".to_string()),
        pages: PagesSpec::Count(1),
        delay: 1.0,
        tag: OriginTag::Normal,
        join: UrlJoin::Fixed,
    };

    vec![
        table("free-proxy-list.net", "https://free-proxy-list.net/"),
        table("sslproxies", "https://www.sslproxies.org/"),
        table("us-proxy.org", "https://www.us-proxy.org/"),
        SourceEntry {
            name: "qiyunip".to_string(),
            url: "https://www.qiyunip.com/freeProxy/".to_string(),
            body: None,
            parser: ParserSpec::Named("html4".to_string()),
            pages: PagesSpec::Count(6),
            delay: 2.0,
            tag: OriginTag::Anonymous,
            join: UrlJoin::SuffixHtml,
        },
    ]
}

/// Which sources a run crawls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    #[default]
    All,
    Normal,
    Anonymous,
}

impl Category {
    pub fn includes(&self, tag: OriginTag) -> bool {
        match self {
            Category::All => true,
            Category::Normal => tag == OriginTag::Normal,
            Category::Anonymous => tag == OriginTag::Anonymous,
        }
    }
}

/// Run parameters for the harvest loop
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    /// Pause between cycles
    pub interval: Duration,
    pub category: Category,
    /// Timeout for listing page requests
    pub fetch_timeout: Duration,
    pub validator: ValidatorConfig,
    /// Where the JSON sink writes results
    pub output: PathBuf,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            category: Category::All,
            fetch_timeout: Duration::from_secs(5),
            validator: ValidatorConfig::default(),
            output: PathBuf::from("proxy_ip.json"),
        }
    }
}

impl HarvestConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_validator(mut self, validator: ValidatorConfig) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_output(mut self, output: PathBuf) -> Self {
        self.output = output;
        self
    }
}
