use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::Local;

use crate::{Event, EventSink, EventType};

/// Renders an event as the operator-facing log message.
pub fn render_line_message(event: &Event) -> String {
    let context = &event.context;
    match event.kind {
        EventType::PolicyLoaded => format!(
            "Loaded {} forbidden words and {} forbidden sites from {}",
            event.attribute("words").unwrap_or("0"),
            event.attribute("sites").unwrap_or("0"),
            event.attribute("path").unwrap_or("?"),
        ),
        EventType::PolicyMissing => format!(
            "Warning: {} not found - no filtering will apply",
            event.attribute("path").unwrap_or("?"),
        ),
        EventType::ListenerStarted => format!(
            "Proxy listening on port {}",
            event.attribute("port").unwrap_or("?"),
        ),
        EventType::RequestReceived => format!(
            "Received request-line: {}",
            event.attribute("line").unwrap_or(""),
        ),
        EventType::RequestBlockedWord => {
            "Blocking request from client: forbidden word in request".to_string()
        }
        EventType::RequestBlockedHost => {
            format!("Blocking request to forbidden host {}", context.host)
        }
        EventType::ConnectBlockedHost => {
            format!("Blocking CONNECT to forbidden site {}", context.host)
        }
        EventType::ResponseBlockedWord => {
            "Blocking response from server: forbidden content detected".to_string()
        }
        EventType::UpstreamConnected => format!(
            "{} {} -> {}:{} ({})",
            event.attribute("method").unwrap_or("?"),
            event.attribute("path").unwrap_or("?"),
            context.host,
            context.port,
            event.attribute("ip").unwrap_or("?"),
        ),
        EventType::UpstreamConnectFailed => {
            format!("Failed to connect to {}:{}", context.host, context.port)
        }
        EventType::TunnelEstablished => format!(
            "Tunnel established to {} ({}:{})",
            context.host,
            event.attribute("ip").unwrap_or("?"),
            context.port,
        ),
        EventType::TunnelClosed => format!("Tunnel closed for {}:{}", context.host, context.port),
        EventType::RequestCompleted => format!(
            "Completed request for {}:{} {}",
            context.host,
            context.port,
            event.attribute("path").unwrap_or(""),
        ),
        EventType::SessionFailed => format!(
            "Session error: {}",
            event.attribute("error").unwrap_or("unknown"),
        ),
    }
}

/// Writes one timestamped line per event to stdout and appends the same line
/// to a log file. Concurrent emitters are serialized by the internal mutex;
/// write failures never propagate to the session, they are counted and
/// reported through `tracing`.
#[derive(Debug)]
pub struct LineLogSink {
    file: Mutex<File>,
    write_error_count: AtomicU64,
}

impl LineLogSink {
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(Self {
            file: Mutex::new(file),
            write_error_count: AtomicU64::new(0),
        })
    }

    pub fn write_error_count(&self) -> u64 {
        self.write_error_count.load(Ordering::Relaxed)
    }
}

impl EventSink for LineLogSink {
    fn emit(&self, event: Event) {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let line = format!("[{timestamp}] {}\n", render_line_message(&event));

        let mut file = self.file.lock().expect("lock poisoned");
        if io::stdout().write_all(line.as_bytes()).is_err() {
            self.write_error_count.fetch_add(1, Ordering::Relaxed);
        }
        if let Err(error) = file.write_all(line.as_bytes()) {
            self.write_error_count.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(%error, "log file write failed");
        }
    }
}
