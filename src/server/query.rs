//! Query connection handler
//!
//! Greets with the command summary, then serves one response per command
//! line. The connection survives parse errors and may be reused for any
//! number of commands; a final unterminated command before EOF is still
//! served so half-closing peers get their answer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::debug;

use crate::persist::PersistHandle;
use crate::query::{Command, HELP_TEXT};
use crate::store::LogStore;

use super::{ConnectionCounters, QUERY_BANNER};

/// Everything a query handler needs, cloned per connection.
pub(crate) struct QueryContext {
    pub store: Arc<LogStore>,
    pub counters: Arc<ConnectionCounters>,
    pub persist: Option<PersistHandle>,
    pub idle_timeout: Duration,
}

pub(crate) async fn handle_query_client(
    stream: TcpStream,
    peer: SocketAddr,
    context: QueryContext,
    mut shutdown: watch::Receiver<bool>,
) {
    let (reader, mut writer) = stream.into_split();
    if writer.write_all(QUERY_BANNER.as_bytes()).await.is_err() {
        return;
    }

    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let read = tokio::select! {
            read = tokio::time::timeout(context.idle_timeout, reader.read_line(&mut line)) => read,
            _ = shutdown.changed() => {
                debug!(%peer, "closing query client for shutdown");
                break;
            }
        };

        match read {
            Err(_) => {
                debug!(%peer, "query client idle deadline passed");
                break;
            }
            Ok(Err(err)) => {
                debug!(%peer, error = %err, "query read failed");
                break;
            }
            Ok(Ok(0)) => break,
            Ok(Ok(_)) => {
                let terminated = line.ends_with('\n');
                let text = line.trim_end_matches(|c| c == '\r' || c == '\n');

                if !text.is_empty() {
                    let response = execute_command(text, &context);
                    if writer.write_all(response.as_bytes()).await.is_err() {
                        break;
                    }
                }

                if !terminated {
                    // EOF followed the command; the response above is the
                    // last thing this connection needed.
                    break;
                }
            }
        }
    }

    debug!(%peer, "query client disconnected");
}

/// Run one command against the engine and render its response.
fn execute_command(line: &str, context: &QueryContext) -> String {
    match Command::parse(line) {
        Ok(Command::Help) => format!("{}\n", HELP_TEXT),
        Ok(Command::Count) => format!("COUNT: {}\n", context.store.len()),
        Ok(Command::Stats) => render_stats(context),
        Ok(Command::Query(query)) => {
            let snapshot = context.store.snapshot();
            let matches = query.evaluate(&snapshot);
            let mut response = format!("FOUND: {} matches\n", matches.len());
            for entry in matches {
                response.push_str(&entry.text);
                response.push('\n');
            }
            response
        }
        Err(err) => format!("ERROR: {}\n", err),
    }
}

fn render_stats(context: &QueryContext) -> String {
    let store = context.store.stats();
    let persist = context
        .persist
        .as_ref()
        .map(|p| p.stats())
        .unwrap_or_default();

    format!(
        "STATS: Total={}, Evicted={}, Current={}, Persisted={}, PersistFailed={}, \
ActiveProducers={}, ActiveQueryClients={}\n",
        store.total_received,
        store.total_evicted,
        store.current_size,
        persist.persisted,
        persist.failed,
        context.counters.active_producers(),
        context.counters.active_query_clients(),
    )
}
