//! Newline-delimited JSON progress protocol.
//!
//! Operations push [`Message`]s into a bounded channel; a reporter thread
//! drains it and writes one JSON object per line. The data path never
//! blocks on a slow consumer — when the channel is full, intermediate
//! updates are dropped. `total`/`pulled` are kept for old consumers; new
//! consumers read the `layer` field.

use std::io::Write;
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::formats::humanize_bytes;

/// Channel capacity between producers and the reporter thread.
const CHANNEL_BOUND: usize = 64;
/// Minimum time between updates for one stream.
const EMIT_INTERVAL: Duration = Duration::from_millis(100);
/// Byte delta that forces an update regardless of elapsed time.
const EMIT_BYTES: u64 = 1024 * 1024;

/// Per-layer progress detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct LayerProgress {
    /// Layer digest (`sha256:…`).
    pub id: String,
    /// Layer size in bytes.
    pub size: u64,
    /// Bytes transferred so far.
    pub current: u64,
}

/// One line of the progress wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
#[non_exhaustive]
pub enum Message {
    /// Transfer progress.
    Progress {
        /// Human-readable status line.
        message: String,
        /// Total bytes of the whole operation (compat field).
        total: u64,
        /// Bytes transferred across all layers (compat field).
        pulled: u64,
        /// Per-layer detail.
        #[serde(skip_serializing_if = "Option::is_none")]
        layer: Option<LayerProgress>,
    },
    /// Terminal success.
    Success {
        /// Human-readable status line.
        message: String,
    },
    /// Terminal failure.
    Error {
        /// Human-readable failure description.
        message: String,
    },
}

/// Cloneable, non-blocking handle for emitting progress messages.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<SyncSender<Message>>,
}

impl ProgressSink {
    /// A sink that drops everything.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Sends a message without blocking; drops it if the channel is full.
    pub fn send(&self, msg: Message) {
        if let Some(tx) = &self.tx {
            match tx.try_send(msg) {
                Ok(()) | Err(TrySendError::Full(_)) => {}
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
    }

    /// Emits a terminal success line.
    pub fn success(&self, message: impl Into<String>) {
        self.send(Message::Success {
            message: message.into(),
        });
    }

    /// Emits a terminal error line.
    pub fn error(&self, message: impl Into<String>) {
        self.send(Message::Error {
            message: message.into(),
        });
    }
}

/// Drains progress messages onto a writer as JSON lines.
#[derive(Debug)]
pub struct Reporter {
    sink: ProgressSink,
    handle: Option<JoinHandle<()>>,
}

impl Reporter {
    /// Spawns the reporter thread over `writer`.
    pub fn new(mut writer: Box<dyn Write + Send>) -> Self {
        let (tx, rx) = mpsc::sync_channel(CHANNEL_BOUND);
        let handle = thread::spawn(move || {
            for msg in rx {
                let Ok(line) = serde_json::to_string(&msg) else {
                    continue;
                };
                if writeln!(writer, "{line}").is_err() {
                    break;
                }
                let _ = writer.flush();
            }
        });
        Self {
            sink: ProgressSink { tx: Some(tx) },
            handle: Some(handle),
        }
    }

    /// Handle for producers.
    pub fn sink(&self) -> ProgressSink {
        self.sink.clone()
    }

    /// Closes the channel and waits for the drain thread.
    pub fn finish(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.sink.tx = None;
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Reporter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Reader wrapper that emits throttled progress while bytes flow through.
///
/// The very first update is always emitted; afterwards updates fire at most
/// every [`EMIT_INTERVAL`] or [`EMIT_BYTES`], whichever comes first.
pub(crate) struct TrackedReader<R> {
    inner: R,
    sink: ProgressSink,
    /// Total bytes of the whole operation.
    total: u64,
    /// Bytes completed before this layer started.
    pulled_before: u64,
    layer_id: String,
    layer_size: u64,
    current: u64,
    last_emit: Instant,
    emitted_bytes: u64,
    first_sent: bool,
}

impl<R> TrackedReader<R> {
    pub(crate) fn new(
        inner: R,
        sink: ProgressSink,
        total: u64,
        pulled_before: u64,
        layer_id: String,
        layer_size: u64,
    ) -> Self {
        Self {
            inner,
            sink,
            total,
            pulled_before,
            layer_id,
            layer_size,
            current: 0,
            last_emit: Instant::now(),
            emitted_bytes: 0,
            first_sent: false,
        }
    }

    fn maybe_emit(&mut self) {
        let pulled = self.pulled_before + self.current;
        let due = !self.first_sent
            || self.last_emit.elapsed() >= EMIT_INTERVAL
            || pulled.saturating_sub(self.emitted_bytes) >= EMIT_BYTES;
        if !due {
            return;
        }
        self.first_sent = true;
        self.last_emit = Instant::now();
        self.emitted_bytes = pulled;
        self.sink.send(Message::Progress {
            message: format!("Downloaded: {}", humanize_bytes(pulled)),
            total: self.total,
            pulled,
            layer: Some(LayerProgress {
                id: self.layer_id.clone(),
                size: self.layer_size,
                current: self.current,
            }),
        });
    }
}

impl<R: std::io::Read> std::io::Read for TrackedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.current += n as u64;
            self.maybe_emit();
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Shared in-memory writer for asserting emitted lines.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().expect("lock").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn lines(buf: &SharedBuf) -> Vec<serde_json::Value> {
        let data = buf.0.lock().expect("lock").clone();
        String::from_utf8(data)
            .expect("utf8")
            .lines()
            .map(|l| serde_json::from_str(l).expect("json line"))
            .collect()
    }

    #[test]
    fn wire_format_matches_protocol() {
        let msg = Message::Progress {
            message: "Downloaded: 1.00 MB".into(),
            total: 5000,
            pulled: 1000,
            layer: Some(LayerProgress {
                id: "sha256:abc".into(),
                size: 5000,
                current: 1000,
            }),
        };
        let json = serde_json::to_string(&msg).expect("json");
        assert!(json.starts_with("{\"type\":\"progress\""));
        assert!(json.contains("\"layer\":{\"id\":\"sha256:abc\""));

        let success = serde_json::to_string(&Message::Success {
            message: "Model pulled successfully".into(),
        })
        .expect("json");
        assert_eq!(
            success,
            "{\"type\":\"success\",\"message\":\"Model pulled successfully\"}"
        );
    }

    #[test]
    fn reporter_writes_json_lines() {
        let buf = SharedBuf::default();
        let reporter = Reporter::new(Box::new(buf.clone()));
        let sink = reporter.sink();
        sink.success("done");
        reporter.finish();

        let lines = lines(&buf);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["type"], "success");
        assert_eq!(lines[0]["message"], "done");
    }

    #[test]
    fn tracked_reader_always_emits_first_update() {
        let buf = SharedBuf::default();
        let reporter = Reporter::new(Box::new(buf.clone()));
        let data = vec![0u8; 16];
        let mut reader = TrackedReader::new(
            &data[..],
            reporter.sink(),
            16,
            0,
            "sha256:abc".into(),
            16,
        );
        let mut out = Vec::new();
        reader.read_to_end(&mut out).expect("read");
        reporter.finish();

        let lines = lines(&buf);
        assert!(!lines.is_empty());
        assert_eq!(lines[0]["type"], "progress");
        assert_eq!(lines[0]["layer"]["id"], "sha256:abc");
    }

    #[test]
    fn tracked_reader_throttles_small_reads() {
        let buf = SharedBuf::default();
        let reporter = Reporter::new(Box::new(buf.clone()));
        let data = vec![0u8; 4096];
        let mut reader = TrackedReader::new(
            &data[..],
            reporter.sink(),
            4096,
            0,
            "sha256:abc".into(),
            4096,
        );
        // Read in tiny chunks; far fewer updates than reads.
        let mut chunk = [0u8; 64];
        let mut reads = 0;
        while reader.read(&mut chunk).expect("read") > 0 {
            reads += 1;
        }
        reporter.finish();

        let emitted = lines(&buf).len();
        assert!(reads > 32);
        assert!(emitted < reads / 2, "emitted {emitted} of {reads} reads");
    }

    #[test]
    fn disabled_sink_is_silent() {
        let sink = ProgressSink::disabled();
        sink.success("ignored");
        sink.error("ignored");
    }
}
