//! Decoded catalog and search over it

use crate::catalog::store::CatalogStore;
use crate::catalog::types::CatalogItem;
use crate::error::{KegError, KegResult};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use std::io::{BufReader, Read};
use tokio_util::sync::CancellationToken;

/// A stored catalog, fully decoded
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogIndex {
    pub schema: u32,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub items: Vec<CatalogItem>,
    #[serde(default)]
    pub count: usize,
}

/// How a query is matched
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchOptions {
    /// Whole-name match on name, aliases and old names only; wins over `regex`
    pub exact: bool,
    /// Treat the query as a case-insensitive regular expression
    pub regex: bool,
    /// Also match descriptions (substring and regex modes)
    pub include_desc: bool,
    /// Zero means unlimited
    pub limit: usize,
}

impl CatalogIndex {
    /// Decode a gzipped catalog blob.
    pub fn from_gzip<R: Read>(reader: R) -> KegResult<Self> {
        let decoder = BufReader::new(GzDecoder::new(reader));
        serde_json::from_reader(decoder)
            .map_err(|e| KegError::CatalogFormat(format!("stored catalog unreadable: {}", e)))
    }

    /// Decode whatever the store currently serves.
    pub fn load(store: &CatalogStore, cancel: &CancellationToken) -> KegResult<Self> {
        Self::from_gzip(store.open_index_gz(cancel)?.reader)
    }

    /// Case-insensitive search; exact name hits first, then by name.
    ///
    /// An empty query matches everything. Fails only on an invalid pattern
    /// in regex mode.
    pub fn search(&self, query: &str, options: SearchOptions) -> KegResult<Vec<&CatalogItem>> {
        let raw = query.trim();
        let query = raw.to_lowercase();
        let matcher = Matcher::new(raw, &query, options)?;
        let mut hits: Vec<&CatalogItem> = self
            .items
            .iter()
            .filter(|item| query.is_empty() || matcher.matches(item))
            .collect();

        hits.sort_by(|a, b| {
            let a_exact = a.name.eq_ignore_ascii_case(&query);
            let b_exact = b.name.eq_ignore_ascii_case(&query);
            b_exact.cmp(&a_exact).then_with(|| a.name.cmp(&b.name))
        });
        if options.limit > 0 {
            hits.truncate(options.limit);
        }
        Ok(hits)
    }

    pub fn get(&self, name: &str) -> Option<&CatalogItem> {
        self.items.iter().find(|item| item.name == name)
    }
}

enum Matcher<'q> {
    Exact(&'q str),
    Pattern { re: Regex, desc: bool },
    Substring { query: &'q str, desc: bool },
}

impl<'q> Matcher<'q> {
    /// `raw` is compiled as-is in regex mode; the other modes use `query`,
    /// which is already lowercased.
    fn new(raw: &str, query: &'q str, options: SearchOptions) -> KegResult<Self> {
        if options.exact {
            return Ok(Self::Exact(query));
        }
        if options.regex {
            let re = RegexBuilder::new(raw)
                .case_insensitive(true)
                .build()
                .map_err(|e| KegError::SearchPattern(e.to_string()))?;
            return Ok(Self::Pattern {
                re,
                desc: options.include_desc,
            });
        }
        Ok(Self::Substring {
            query,
            desc: options.include_desc,
        })
    }

    fn matches(&self, item: &CatalogItem) -> bool {
        let mut names = std::iter::once(&item.name)
            .chain(&item.aliases)
            .chain(&item.oldnames);

        match self {
            Self::Exact(query) => names.any(|n| n.to_lowercase() == *query),
            Self::Pattern { re, desc } => {
                names.any(|n| re.is_match(n)) || (*desc && re.is_match(&item.desc))
            }
            Self::Substring { query, desc } => {
                names.any(|n| n.to_lowercase().contains(query))
                    || (*desc && item.desc.to_lowercase().contains(query))
            }
        }
    }
}
