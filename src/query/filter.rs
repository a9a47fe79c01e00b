//! Composable entry filter
//!
//! A [`Query`] combines up to three filter categories — keywords, regex,
//! time bounds — with logical AND. Absent categories are always true.

use regex::Regex;

use crate::store::LogEntry;

/// How multiple keywords combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeywordOperator {
    /// Every keyword must be contained in the entry text.
    #[default]
    And,
    /// At least one keyword must be contained in the entry text.
    Or,
}

/// Parsed filter for one `QUERY` command.
#[derive(Debug, Clone, Default)]
pub struct Query {
    /// Case-sensitive substring keywords; empty means no keyword filter.
    pub keywords: Vec<String>,
    /// Combination operator for `keywords`.
    pub operator: KeywordOperator,
    /// Compiled pattern applied as a search against the entry text.
    pub regex: Option<Regex>,
    /// Inclusive lower timestamp bound.
    pub time_from: Option<i64>,
    /// Inclusive upper timestamp bound.
    pub time_to: Option<i64>,
}

impl Query {
    /// Whether `entry` passes every present filter category.
    pub fn matches(&self, entry: &LogEntry) -> bool {
        if let Some(from) = self.time_from {
            if entry.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.time_to {
            if entry.timestamp > to {
                return false;
            }
        }

        if let Some(regex) = &self.regex {
            if !regex.is_match(&entry.text) {
                return false;
            }
        }

        if !self.keywords.is_empty() {
            let hit = match self.operator {
                KeywordOperator::And => {
                    self.keywords.iter().all(|k| entry.text.contains(k.as_str()))
                }
                KeywordOperator::Or => {
                    self.keywords.iter().any(|k| entry.text.contains(k.as_str()))
                }
            };
            if !hit {
                return false;
            }
        }

        true
    }

    /// Filter a snapshot, preserving the original sequence order.
    pub fn evaluate<'a>(&self, entries: &'a [LogEntry]) -> Vec<&'a LogEntry> {
        entries.iter().filter(|e| self.matches(e)).collect()
    }
}
