use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;

use crate::{Event, EventSink};

#[derive(Debug, Serialize)]
struct EventRecord<'a> {
    kind: &'static str,
    flow_id: u64,
    client_addr: &'a str,
    host: &'a str,
    port: u16,
    occurred_at_unix_ms: u128,
    attributes: &'a BTreeMap<String, String>,
}

/// Appends one JSON object per event to a file, for consumers that want
/// structure instead of the operator line log. The file is truncated at
/// startup; every line is flushed as it is written. Write failures are
/// counted and reported through `tracing`, never propagated.
#[derive(Debug)]
pub struct JsonLinesSink {
    writer: Mutex<BufWriter<File>>,
    write_error_count: AtomicU64,
}

impl JsonLinesSink {
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(path.as_ref())?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            write_error_count: AtomicU64::new(0),
        })
    }

    pub fn write_error_count(&self) -> u64 {
        self.write_error_count.load(Ordering::Relaxed)
    }

    fn write_event(&self, event: &Event) -> io::Result<()> {
        let record = EventRecord {
            kind: event.kind.as_str(),
            flow_id: event.context.flow_id,
            client_addr: &event.context.client_addr,
            host: &event.context.host,
            port: event.context.port,
            occurred_at_unix_ms: event.occurred_at_unix_ms,
            attributes: &event.attributes,
        };
        let mut line = serde_json::to_vec(&record)
            .map_err(|error| io::Error::other(format!("serialize event record: {error}")))?;
        line.push(b'\n');

        let mut writer = self.writer.lock().expect("lock poisoned");
        writer.write_all(&line)?;
        writer.flush()
    }
}

impl EventSink for JsonLinesSink {
    fn emit(&self, event: Event) {
        if let Err(error) = self.write_event(&event) {
            self.write_error_count.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(%error, "event log write failed");
        }
    }
}
