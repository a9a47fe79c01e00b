//! Command-line grammar for the query listener
//!
//! Verbs are case-sensitive. `QUERY` takes space-separated `key=value`
//! pairs; unknown keys are ignored so older clients keep working, but a
//! recognized key with a bad value is rejected before any filter state is
//! built.

use regex::Regex;
use thiserror::Error;

use super::filter::{KeywordOperator, Query};

/// Static usage text returned for `HELP`.
pub const HELP_TEXT: &str = "\
HELP - show this text
COUNT - number of entries currently retained
STATS - totals, eviction and persistence counters, active client counts
QUERY keyword=<text> keywords=a,b operator=AND|OR regex=<pattern> time_from=<unix> time_to=<unix>";

/// A parse failure on the query grammar.
///
/// Reported to the client as a single `ERROR:` line; the connection and
/// the server stay fully usable afterwards.
#[derive(Debug, Error)]
pub enum QueryParseError {
    /// The verb was not HELP, COUNT, STATS, or QUERY.
    #[error("Unknown command. Use HELP for usage.")]
    UnknownCommand,

    /// `QUERY` with no parameters at all.
    #[error("Missing query parameters.")]
    MissingParameters,

    /// A recognized key was given an empty value.
    #[error("Empty {0} parameter.")]
    EmptyValue(&'static str),

    /// `operator=` outside {AND, OR}.
    #[error("Operator must be AND or OR.")]
    InvalidOperator,

    /// More than one keyword without an explicit operator.
    #[error("Multiple keywords require operator=AND or operator=OR.")]
    MissingOperator,

    /// `regex=` did not compile.
    #[error("Regex compile failed: {0}")]
    InvalidRegex(#[from] regex::Error),

    /// `time_from=`/`time_to=` was not a non-negative integer.
    #[error("Invalid {0} parameter.")]
    InvalidTime(&'static str),
}

/// One parsed command from a query connection.
#[derive(Debug)]
pub enum Command {
    /// Return the static usage text.
    Help,
    /// Return the number of entries currently retained.
    Count,
    /// Return store and connection counters.
    Stats,
    /// Filter the retained history.
    Query(Query),
}

impl Command {
    /// Parse one command line (already stripped of its newline).
    pub fn parse(line: &str) -> Result<Self, QueryParseError> {
        let line = line.trim_end_matches('\r');
        match line {
            "HELP" => Ok(Command::Help),
            "COUNT" => Ok(Command::Count),
            "STATS" => Ok(Command::Stats),
            "QUERY" => Err(QueryParseError::MissingParameters),
            _ => {
                if let Some(arguments) = line.strip_prefix("QUERY ") {
                    Ok(Command::Query(parse_query_arguments(arguments)?))
                } else {
                    Err(QueryParseError::UnknownCommand)
                }
            }
        }
    }
}

/// Build a [`Query`] from the `key=value` pairs after the QUERY verb.
fn parse_query_arguments(arguments: &str) -> Result<Query, QueryParseError> {
    if arguments.trim().is_empty() {
        return Err(QueryParseError::MissingParameters);
    }

    let mut query = Query::default();
    let mut operator_explicit = false;

    for token in arguments.split_whitespace() {
        let Some((key, value)) = token.split_once('=') else {
            // Bare words are unknown parameters; ignored.
            continue;
        };

        match key {
            "keyword" => {
                if value.is_empty() {
                    return Err(QueryParseError::EmptyValue("keyword"));
                }
                query.keywords.push(value.to_string());
            }
            "keywords" => {
                if value.is_empty() {
                    return Err(QueryParseError::EmptyValue("keywords"));
                }
                for keyword in value.split(',') {
                    if keyword.is_empty() {
                        return Err(QueryParseError::EmptyValue("keywords"));
                    }
                    query.keywords.push(keyword.to_string());
                }
            }
            "operator" => {
                query.operator = parse_operator(value)?;
                operator_explicit = true;
            }
            "regex" => {
                if value.is_empty() {
                    return Err(QueryParseError::EmptyValue("regex"));
                }
                query.regex = Some(Regex::new(value)?);
            }
            "time_from" => {
                query.time_from = Some(parse_time(value, "time_from")?);
            }
            "time_to" => {
                query.time_to = Some(parse_time(value, "time_to")?);
            }
            // Unknown keys are ignored.
            _ => {}
        }
    }

    if query.keywords.len() > 1 && !operator_explicit {
        return Err(QueryParseError::MissingOperator);
    }

    Ok(query)
}

fn parse_operator(value: &str) -> Result<KeywordOperator, QueryParseError> {
    if value.eq_ignore_ascii_case("AND") {
        Ok(KeywordOperator::And)
    } else if value.eq_ignore_ascii_case("OR") {
        Ok(KeywordOperator::Or)
    } else {
        Err(QueryParseError::InvalidOperator)
    }
}

fn parse_time(value: &str, param: &'static str) -> Result<i64, QueryParseError> {
    let parsed: i64 = value
        .parse()
        .map_err(|_| QueryParseError::InvalidTime(param))?;
    if parsed < 0 {
        return Err(QueryParseError::InvalidTime(param));
    }
    Ok(parsed)
}
