//! Parser registry: named strategies that pull `ip:port` strings out of a
//! listing page body.
//!
//! Every strategy is a pure function of the body. Malformed input produces an
//! empty vector and a logged diagnostic, never an error. The strings returned
//! here are raw; the crawler filters them through [`Candidate::parse`].
//!
//! [`Candidate::parse`]: crate::proxy::models::Candidate::parse

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::{debug, warn};

/// Protocol markers accepted by the JSON list strategy
const ALLOWED_PROTOCOLS: [i64; 2] = [1, 2];

/// Regex pattern to match IP:PORT patterns in free text
static IP_PORT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+\.\d+\.\d+\.\d+:\d+)").expect("Invalid IP:PORT regex")
});

static DOTTED_QUAD_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+\.\d+\.\d+\.\d+").expect("Invalid dotted quad regex"));

/// `const fpsList = [...];` inside an inline script
static FPS_LIST_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)const fpsList = (\[.*?\]);").expect("Invalid fpsList regex")
});

static ROW_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("tr").expect("Invalid row selector"));
static TD_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("td").expect("Invalid td selector"));
static TH_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("th").expect("Invalid th selector"));

/// Table cell element a layout reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CellKind {
    #[default]
    Td,
    Th,
}

impl CellKind {
    fn selector(&self) -> &'static Selector {
        match self {
            CellKind::Td => &*TD_SELECTOR,
            CellKind::Th => &*TH_SELECTOR,
        }
    }
}

/// Column positions for tabular listings.
///
/// With `port` unset the `ip` cell is expected to hold `ip:port` on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableLayout {
    #[serde(default)]
    pub cell: CellKind,
    pub ip: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<usize>,
}

impl TableLayout {
    pub fn combined(cell: CellKind, column: usize) -> Self {
        Self {
            cell,
            ip: column,
            port: None,
        }
    }

    pub fn split(cell: CellKind, ip: usize, port: usize) -> Self {
        Self {
            cell,
            ip,
            port: Some(port),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.port != Some(self.ip)
    }
}

/// Closed set of extraction strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserKind {
    /// Free-text `ip:port` regex scan
    Regex,
    /// JSON API payload with a list of `{ip, port, protocol}` objects
    JsonList,
    /// JSON array assigned to `fpsList` in an inline script
    ScriptJson,
    /// HTML table rows
    Table(TableLayout),
}

impl ParserKind {
    /// Look up a parser by its configured name
    pub fn from_name(name: &str) -> Option<Self> {
        let kind = match name.trim().to_lowercase().as_str() {
            "api1" | "article1" | "regex" => ParserKind::Regex,
            "api2" | "json" => ParserKind::JsonList,
            "fpslist" => ParserKind::ScriptJson,
            "html1" => ParserKind::Table(TableLayout::combined(CellKind::Td, 0)),
            "html2" => ParserKind::Table(TableLayout::split(CellKind::Td, 0, 1)),
            "html3" => ParserKind::Table(TableLayout::split(CellKind::Td, 1, 2)),
            "html4" => ParserKind::Table(TableLayout::split(CellKind::Th, 0, 1)),
            _ => return None,
        };
        Some(kind)
    }

    /// Only JSON API sources report a page count we can read
    pub fn supports_auto_pages(&self) -> bool {
        matches!(self, ParserKind::JsonList)
    }

    /// Run the strategy over a response body
    pub fn extract(&self, body: &str) -> Vec<String> {
        match self {
            ParserKind::Regex => extract_regex(body),
            ParserKind::JsonList => extract_json_list(body),
            ParserKind::ScriptJson => extract_script_json(body),
            ParserKind::Table(layout) => extract_table(body, layout),
        }
    }
}

impl fmt::Display for ParserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParserKind::Regex => write!(f, "regex"),
            ParserKind::JsonList => write!(f, "json"),
            ParserKind::ScriptJson => write!(f, "fpslist"),
            ParserKind::Table(layout) => match layout.port {
                Some(port) => write!(f, "table({:?} {}/{})", layout.cell, layout.ip, port),
                None => write!(f, "table({:?} {})", layout.cell, layout.ip),
            },
        }
    }
}

/// Scan free text for anything shaped like `ip:port`
pub fn extract_regex(body: &str) -> Vec<String> {
    IP_PORT_REGEX
        .captures_iter(body)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Extract proxies from a JSON API payload
///
/// Accepted shapes: a bare list, `{"data": {"list": [...]}}` and
/// `{"list": [...]}`. Entries need a dotted-quad `ip`, a numeric `port` and a
/// `protocol` from the allow-list.
pub fn extract_json_list(body: &str) -> Vec<String> {
    let data: Value = match serde_json::from_str(body) {
        Ok(data) => data,
        Err(e) => {
            warn!("not a valid JSON payload: {}", e);
            return Vec::new();
        }
    };

    let entries = match json_entries(&data) {
        Some(entries) if !entries.is_empty() => entries,
        _ => {
            warn!("JSON payload has no proxy list");
            return Vec::new();
        }
    };

    let result: Vec<String> = entries.iter().filter_map(json_entry).collect();
    debug!(total = entries.len(), kept = result.len(), "parsed JSON proxy list");
    result
}

fn json_entries(data: &Value) -> Option<&Vec<Value>> {
    if let Some(inner) = data.get("data").filter(|v| v.is_object()) {
        return inner.get("list").and_then(Value::as_array);
    }
    data.as_array()
        .or_else(|| data.get("list").and_then(Value::as_array))
}

fn json_entry(entry: &Value) -> Option<String> {
    let protocol = entry.get("protocol")?.as_i64()?;
    if !ALLOWED_PROTOCOLS.contains(&protocol) {
        return None;
    }

    let ip = entry.get("ip")?.as_str()?;
    if !DOTTED_QUAD_PREFIX.is_match(ip) {
        return None;
    }

    let port = match entry.get("port")? {
        Value::Number(n) => n.as_u64()?.to_string(),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            s.to_string()
        }
        _ => return None,
    };

    Some(format!("{}:{}", ip, port))
}

/// Pull `ip`/`port` pairs out of a `const fpsList = [...]` script literal
pub fn extract_script_json(body: &str) -> Vec<String> {
    let Some(literal) = FPS_LIST_REGEX.captures(body).and_then(|cap| cap.get(1)) else {
        warn!("fpsList literal not found");
        return Vec::new();
    };

    let items: Vec<Value> = match serde_json::from_str(literal.as_str()) {
        Ok(items) => items,
        Err(e) => {
            warn!("fpsList is not valid JSON: {}", e);
            return Vec::new();
        }
    };

    items
        .iter()
        .filter_map(|item| {
            let ip = scalar_text(item.get("ip")?)?;
            let port = scalar_text(item.get("port")?)?;
            Some(format!("{}:{}", ip, port))
        })
        .collect()
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Read rows of an HTML table, skipping the header row
pub fn extract_table(body: &str, layout: &TableLayout) -> Vec<String> {
    let document = Html::parse_document(body);
    let mut rows = document.select(&ROW_SELECTOR).skip(1).peekable();
    if rows.peek().is_none() {
        warn!("no table rows found");
        return Vec::new();
    }

    let mut skipped = 0usize;
    let mut result = Vec::new();
    for row in rows {
        let cells: Vec<ElementRef> = row.select(layout.cell.selector()).collect();
        let entry = match layout.port {
            None => cells.get(layout.ip).map(cell_text),
            Some(port) => match (cells.get(layout.ip), cells.get(port)) {
                (Some(ip), Some(port)) => {
                    Some(format!("{}:{}", cell_text(ip), cell_text(port)))
                }
                _ => None,
            },
        };
        match entry {
            Some(entry) => result.push(entry),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        debug!(skipped, "table rows without the configured columns");
    }
    result
}

fn cell_text(cell: &ElementRef) -> String {
    cell.text().collect::<String>().trim().to_string()
}

/// Read the total page count from a JSON API first page
///
/// Looks at `data.page_count`, `data.total_pages`, `data.total_page` and
/// finally a top-level `page_count`. Returns `None` when nothing usable is
/// present.
pub fn read_page_count(body: &str) -> Option<u32> {
    let data: Value = serde_json::from_str(body).ok()?;
    let nested = data.get("data").filter(|v| v.is_object()).and_then(|inner| {
        ["page_count", "total_pages", "total_page"]
            .iter()
            .find_map(|key| inner.get(*key).and_then(positive_count))
    });
    nested.or_else(|| data.get("page_count").and_then(positive_count))
}

fn positive_count(value: &Value) -> Option<u32> {
    let count = match value {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    u32::try_from(count).ok().filter(|c| *c > 0)
}
