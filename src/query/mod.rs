//! Query command grammar and filter evaluation
//!
//! A query connection sends one command per line; [`Command::parse`]
//! recognizes the verbs and builds a composable [`Query`] filter for the
//! `QUERY` form. Evaluation runs over a store snapshot and never touches
//! the store's lock.
//!
//! Parse failures are values, not crashes: an invalid operator or an
//! uncompilable regex produces a [`QueryParseError`] that the connection
//! reports as an `ERROR:` line and then keeps serving.

mod command;
mod filter;

pub use command::{Command, QueryParseError, HELP_TEXT};
pub use filter::{KeywordOperator, Query};
