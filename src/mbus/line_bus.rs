//! Line-oriented event source.
//!
//! Reads one event per line in the form `<subject> <json payload>`, e.g.
//!
//! ```text
//! router.register {"host":"10.0.0.1","port":8080,"uris":["app.example.com"]}
//! ```
//!
//! The source counts as reachable until its input ends.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use super::{LivenessProbe, MessageError, RegistrySubscriber};

/// Event source fed from any async line reader.
pub struct LineBus {
    connected: AtomicBool,
}

impl LineBus {
    /// Creates a bus that reports itself reachable until [`run`](Self::run)
    /// reaches end of input.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
        }
    }

    /// Feeds every line of `reader` to `subscriber`.
    ///
    /// Malformed lines are logged and skipped. Returns when the input ends or
    /// fails; the bus is unreachable from then on.
    pub async fn run<R>(&self, reader: R, subscriber: &RegistrySubscriber) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        let result = loop {
            match lines.next_line().await {
                Ok(Some(line)) => self.dispatch_line(&line, subscriber),
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        self.connected.store(false, Ordering::SeqCst);
        tracing::info!("registration event source closed");
        result
    }

    fn dispatch_line(&self, line: &str, subscriber: &RegistrySubscriber) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        let result = match line.split_once(char::is_whitespace) {
            Some((subject, payload)) => subscriber.handle(subject, payload.trim().as_bytes()),
            None => Err(MessageError::MalformedLine(line.to_string())),
        };

        if let Err(e) = result {
            tracing::warn!(error = %e, "dropping registration event");
        }
    }

    /// Returns whether input is still being read.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Default for LineBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LivenessProbe for LineBus {
    async fn ping(&self) -> bool {
        self.is_connected()
    }
}
