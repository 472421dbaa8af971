//! Parser for SQL dumps of the `sites` table
//!
//! The table lists every wiki of the farm with its global key (e.g. `enwiki`),
//! group, language and URL patterns. Rows are spread over extended
//! `INSERT INTO \`sites\` VALUES (...),(...);` statements with columns:
//!
//! ```text
//! site_id, site_global_key, site_type, site_group, site_source, site_language,
//! site_protocol, site_domain, site_data, site_forward, site_config
//! ```
//!
//! URL patterns live in `site_data`, a PHP-serialized array.

use super::ExtractError;
use crate::processor::SitesProcessor;
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use tracing::{debug, warn};

const INSERT_PREFIX: &str = "INSERT INTO `sites` VALUES ";

const COL_GLOBAL_KEY: usize = 1;
const COL_TYPE: usize = 2;
const COL_GROUP: usize = 3;
const COL_LANGUAGE: usize = 5;
const COL_DATA: usize = 8;
const MIN_COLUMNS: usize = 9;

/// One wiki of the farm
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    /// Global site key, e.g. "enwiki"
    pub global_id: String,
    /// Site type, usually "mediawiki"
    pub site_type: String,
    /// Site group, e.g. "wikipedia"
    pub group: String,
    /// Language code
    pub language: String,
    /// Article URL pattern with a `$1` placeholder
    pub page_path: Option<String>,
    /// Script URL pattern with a `$1` placeholder
    pub file_path: Option<String>,
}

impl Site {
    /// Article URL of a page title on this site
    pub fn page_url(&self, title: &str) -> Option<String> {
        let pattern = self.page_path.as_deref()?;
        let url = pattern.replace("$1", &title.replace(' ', "_"));
        Some(if url.starts_with("//") {
            format!("https:{}", url)
        } else {
            url
        })
    }
}

/// Streaming parser over a `sites` table dump
pub struct SitesTableParser<R> {
    reader: R,
    source_name: String,
}

impl<R: BufRead> SitesTableParser<R> {
    pub fn new(reader: R, source_name: impl Into<String>) -> Self {
        Self {
            reader,
            source_name: source_name.into(),
        }
    }

    /// Parse the whole dump; returns the number of sites delivered
    ///
    /// A malformed statement is logged and the rest of it skipped.
    pub fn run(mut self, processor: &mut dyn SitesProcessor) -> Result<u64, ExtractError> {
        let mut line = Vec::new();
        let mut delivered = 0u64;
        let mut line_number = 0u64;

        loop {
            line.clear();
            if self.reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            line_number += 1;
            let text = String::from_utf8_lossy(&line);
            let Some(values) = text.trim_start().strip_prefix(INSERT_PREFIX) else {
                continue;
            };

            let mut rows = RowCursor::new(values);
            loop {
                let row = match rows.next_row() {
                    Ok(Some(row)) => row,
                    Ok(None) => break,
                    Err(message) => {
                        warn!(
                            source = %self.source_name,
                            line = line_number,
                            error = %message,
                            "Skipping malformed sites statement"
                        );
                        break;
                    }
                };
                let Some(site) = site_from_row(row) else {
                    warn!(source = %self.source_name, line = line_number, "Skipping short sites row");
                    continue;
                };
                match processor.process_site(&site) {
                    Ok(()) => delivered += 1,
                    Err(e) if e.is_abort() => return Err(e.into()),
                    Err(e) => warn!(site = %site.global_id, error = %e, "Sites processor failed"),
                }
            }
        }

        debug!(source = %self.source_name, sites = delivered, "Sites table parsed");
        Ok(delivered)
    }
}

fn site_from_row(mut row: Vec<Option<String>>) -> Option<Site> {
    if row.len() < MIN_COLUMNS {
        return None;
    }
    let mut take = |index: usize| row[index].take().unwrap_or_default();
    let data = take(COL_DATA);
    Some(Site {
        global_id: take(COL_GLOBAL_KEY),
        site_type: take(COL_TYPE),
        group: take(COL_GROUP),
        language: take(COL_LANGUAGE),
        page_path: php_string_entry(&data, "page_path"),
        file_path: php_string_entry(&data, "file_path"),
    })
}

/// Value of a string entry `s:<len>:"<key>";s:<len>:"<value>";` in PHP-serialized data
fn php_string_entry(data: &str, key: &str) -> Option<String> {
    let marker = format!("s:{}:\"{}\";s:", key.len(), key);
    let rest = &data[data.find(&marker)? + marker.len()..];
    let (len, rest) = rest.split_once(':')?;
    let len: usize = len.parse().ok()?;
    let value = rest.strip_prefix('"')?.get(..len)?;
    Some(value.to_string())
}

/// Cursor over the tuples of an extended INSERT statement
struct RowCursor<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> RowCursor<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input: input.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek(), Some(b',' | b' ' | b'\t' | b'\r' | b'\n')) {
            self.pos += 1;
        }
    }

    /// Next row, or `None` at the end of the statement
    fn next_row(&mut self) -> Result<Option<Vec<Option<String>>>, String> {
        self.skip_separators();
        match self.peek() {
            None | Some(b';') => return Ok(None),
            Some(b'(') => self.pos += 1,
            Some(other) => return Err(format!("expected '(' at {}, found '{}'", self.pos, other as char)),
        }

        let mut row = Vec::with_capacity(11);
        loop {
            row.push(self.value()?);
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b')') => {
                    self.pos += 1;
                    return Ok(Some(row));
                }
                Some(other) => {
                    return Err(format!("unexpected '{}' at {}", other as char, self.pos))
                }
                None => return Err("row not terminated".to_string()),
            }
        }
    }

    fn value(&mut self) -> Result<Option<String>, String> {
        if self.peek() == Some(b'\'') {
            self.pos += 1;
            return self.quoted().map(Some);
        }
        let start = self.pos;
        while !matches!(self.peek(), None | Some(b',' | b')')) {
            self.pos += 1;
        }
        let raw = String::from_utf8_lossy(&self.input[start..self.pos]);
        let raw = raw.trim();
        Ok(if raw.eq_ignore_ascii_case("NULL") {
            None
        } else {
            Some(raw.to_string())
        })
    }

    fn quoted(&mut self) -> Result<String, String> {
        let mut out = Vec::new();
        loop {
            let Some(byte) = self.peek() else {
                return Err("unterminated string".to_string());
            };
            self.pos += 1;
            match byte {
                b'\\' => {
                    let escaped = self.peek().ok_or("dangling escape")?;
                    self.pos += 1;
                    out.push(match escaped {
                        b'n' => b'\n',
                        b'r' => b'\r',
                        b't' => b'\t',
                        b'0' => 0,
                        other => other,
                    });
                }
                b'\'' if self.peek() == Some(b'\'') => {
                    self.pos += 1;
                    out.push(b'\'');
                }
                b'\'' => return Ok(String::from_utf8_lossy(&out).into_owned()),
                other => out.push(other),
            }
        }
    }
}
