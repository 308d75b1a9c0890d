//! Forwards warnings and errors to the server's device log endpoint.
//!
//! [`RemoteLogLayer`] sits in the tracing subscriber and hands entries to a
//! bounded channel; [`RemoteLogSink`] drains it on a background task. Servers
//! without the endpoint answer 404, so the sink shuts itself off after a few
//! in a row instead of retrying forever.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use super::{LogEntry, SignageApi};

const CHANNEL_CAPACITY: usize = 256;
const MAX_CONSECUTIVE_NOT_FOUND: u32 = 3;

/// Build a connected layer/sink pair.
pub fn remote_log_channel() -> (RemoteLogLayer, RemoteLogSink) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    (RemoteLogLayer { tx }, RemoteLogSink { rx })
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<String>,
}

impl MessageVisitor {
    fn finish(self) -> String {
        std::iter::once(self.message)
            .filter(|m| !m.is_empty())
            .chain(self.fields)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }
}

/// Tracing layer that queues WARN and ERROR events for upload.
///
/// Events from this module are skipped so a failing upload can't feed itself.
/// A full channel drops the entry.
pub struct RemoteLogLayer {
    tx: mpsc::Sender<LogEntry>,
}

impl<S> Layer<S> for RemoteLogLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if *meta.level() > Level::WARN || meta.target().starts_with(module_path!()) {
            return;
        }
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let _ = self.tx.try_send(LogEntry {
            level: meta.level().to_string(),
            target: meta.target().to_string(),
            message: visitor.finish(),
            timestamp: Utc::now(),
        });
    }
}

/// Receiving half; run it with [`RemoteLogSink::run`].
pub struct RemoteLogSink {
    rx: mpsc::Receiver<LogEntry>,
}

impl RemoteLogSink {
    /// Deliver queued entries until shutdown, the layer is dropped, or the
    /// server repeatedly reports the endpoint missing.
    pub async fn run(mut self, api: Arc<dyn SignageApi>, shutdown: CancellationToken) {
        let mut not_found = 0u32;
        loop {
            let entry = tokio::select! {
                () = shutdown.cancelled() => break,
                entry = self.rx.recv() => match entry {
                    Some(entry) => entry,
                    None => break,
                },
            };
            match api.send_log(&entry).await {
                Ok(()) => not_found = 0,
                Err(e) if e.status() == Some(404) => {
                    not_found += 1;
                    if not_found >= MAX_CONSECUTIVE_NOT_FOUND {
                        tracing::debug!("Server has no log endpoint, remote logging disabled");
                        break;
                    }
                }
                Err(e) => tracing::debug!(error = %e, "Failed to deliver remote log entry"),
            }
        }
    }
}
