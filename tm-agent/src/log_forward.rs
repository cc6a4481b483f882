//! Forwards formatted log lines to the Control Bus, the `tracing`
//! equivalent of the original's `RedisHandler` (a `logging.Handler` that
//! published formatted records to a Redis channel so a central collector
//! could tail every TM's log). Implemented as a `MakeWriter` fed into
//! `tracing_subscriber::fmt::layer()` rather than a bespoke `Layer`, so
//! formatting stays exactly as configured for the local log.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tm_core::bus::Bus;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// `MakeWriter` target: each write is a single formatted log line, handed
/// off to an unbounded channel instead of bytes on a stream.
#[derive(Clone)]
pub struct BusLogWriter {
    tx: UnboundedSender<String>,
}

impl BusLogWriter {
    /// Build a connected writer/forwarder pair. The writer is installed on
    /// the `fmt` layer; the forwarder is spawned once the bus connection is
    /// available.
    pub fn pair() -> (Self, BusLogForwarder) {
        let (tx, rx) = unbounded_channel();
        (Self { tx }, BusLogForwarder { rx, redis_errors: Arc::new(AtomicU64::new(0)) })
    }
}

impl io::Write for BusLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Ok(line) = std::str::from_utf8(buf) {
            // The sender side of an unbounded channel never blocks; a full
            // receiver only happens if the forwarder task has already
            // exited, in which case the line is simply dropped.
            let _ = self.tx.send(line.trim_end().to_string());
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for BusLogWriter {
    type Writer = BusLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Drains forwarded lines and publishes each to the configured channel,
/// counting publish failures the way the original counted `redis_errors`.
pub struct BusLogForwarder {
    rx: UnboundedReceiver<String>,
    redis_errors: Arc<AtomicU64>,
}

impl BusLogForwarder {
    pub async fn run(mut self, bus: Arc<dyn Bus>, channel: String) {
        while let Some(line) = self.rx.recv().await {
            if bus.publish(&channel, &line).await.is_err() {
                self.redis_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
