//! Producer connection handler
//!
//! Fire-and-forget ingestion: greet, then read newline-terminated lines
//! until the peer closes, the idle deadline passes, or shutdown begins.
//! Each complete line becomes one entry; an unterminated line at EOF is
//! discarded.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::debug;

use crate::broadcast::BroadcastHub;
use crate::persist::PersistHandle;
use crate::store::LogStore;

use super::INGEST_BANNER;

/// Everything a producer handler needs, cloned per connection.
pub(crate) struct IngestContext {
    pub store: Arc<LogStore>,
    pub hub: Arc<BroadcastHub>,
    pub persist: Option<PersistHandle>,
    pub idle_timeout: Duration,
}

pub(crate) async fn handle_producer(
    stream: TcpStream,
    peer: SocketAddr,
    context: IngestContext,
    mut shutdown: watch::Receiver<bool>,
) {
    let (reader, mut writer) = stream.into_split();
    if writer.write_all(INGEST_BANNER.as_bytes()).await.is_err() {
        return;
    }

    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let read = tokio::select! {
            read = tokio::time::timeout(context.idle_timeout, reader.read_line(&mut line)) => read,
            _ = shutdown.changed() => {
                debug!(%peer, "closing producer for shutdown");
                break;
            }
        };

        match read {
            Err(_) => {
                debug!(%peer, "producer idle deadline passed");
                break;
            }
            Ok(Err(err)) => {
                debug!(%peer, error = %err, "producer read failed");
                break;
            }
            Ok(Ok(0)) => break,
            Ok(Ok(_)) => {
                if !line.ends_with('\n') {
                    // Unterminated line at EOF: not flushed.
                    break;
                }
                let text = line.trim_end_matches(|c| c == '\r' || c == '\n');
                if text.is_empty() {
                    continue;
                }

                let entry = context.store.append(text);
                if let Some(persist) = &context.persist {
                    persist.enqueue(&entry);
                }
                context.hub.publish(&entry);
            }
        }
    }

    debug!(%peer, "producer disconnected");
}
