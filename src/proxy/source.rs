//! Listing source descriptors and page URL construction

use crate::proxy::models::OriginTag;
use crate::proxy::parser::ParserKind;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Placeholder replaced with the page number in POST body templates
pub const PAGE_PLACEHOLDER: &str = "{page}";

/// Existing `page=` query parameter, with or without a value
static PAGE_PARAM_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([?&]page=)\d*").expect("Invalid page parameter regex"));

/// How many pages a source is crawled for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageCount {
    Fixed(u32),
    /// Read the count from the first page of a JSON API
    Auto,
}

/// How the page number is joined onto the base URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UrlJoin {
    /// `{url}{page}`
    #[default]
    Suffix,
    /// `{url}{page}.html`
    SuffixHtml,
    /// Set the `page` query parameter
    QueryPage,
    /// URL is used unchanged for every page
    Fixed,
}

impl UrlJoin {
    pub fn apply(&self, base: &str, page: u32) -> String {
        match self {
            UrlJoin::Suffix => format!("{}{}", base, page),
            UrlJoin::SuffixHtml => format!("{}{}.html", base, page),
            UrlJoin::Fixed => base.to_string(),
            UrlJoin::QueryPage => {
                if PAGE_PARAM_REGEX.is_match(base) {
                    PAGE_PARAM_REGEX
                        .replace(base, |caps: &regex::Captures| format!("{}{}", &caps[1], page))
                        .into_owned()
                } else if base.contains('?') {
                    format!("{}&page={}", base, page)
                } else {
                    format!("{}?page={}", base, page)
                }
            }
        }
    }
}

/// A validated listing source
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDescriptor {
    pub name: String,
    pub url: String,
    /// POST body template; GET is used when absent
    pub body: Option<String>,
    pub parser: ParserKind,
    pub pages: PageCount,
    /// Pause after every page request
    pub delay: Duration,
    pub tag: OriginTag,
    pub join: UrlJoin,
}

impl SourceDescriptor {
    /// Create a single-page GET source
    pub fn new(name: &str, url: &str, parser: ParserKind, tag: OriginTag) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            body: None,
            parser,
            pages: PageCount::Fixed(1),
            delay: Duration::ZERO,
            tag,
            join: UrlJoin::Suffix,
        }
    }

    pub fn with_pages(mut self, pages: PageCount) -> Self {
        self.pages = pages;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_join(mut self, join: UrlJoin) -> Self {
        self.join = join;
        self
    }

    pub fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    /// URL for a 1-based page number
    pub fn page_url(&self, page: u32) -> String {
        self.join.apply(&self.url, page)
    }

    /// POST body for a page, if this source posts
    pub fn page_body(&self, page: u32) -> Option<String> {
        self.body
            .as_ref()
            .map(|template| template.replace(PAGE_PLACEHOLDER, &page.to_string()))
    }
}
