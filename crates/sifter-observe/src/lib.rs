use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

mod json_log;
mod line_log;

pub use json_log::JsonLinesSink;
pub use line_log::{render_line_message, LineLogSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    PolicyLoaded,
    PolicyMissing,
    ListenerStarted,
    RequestReceived,
    RequestBlockedWord,
    RequestBlockedHost,
    ConnectBlockedHost,
    ResponseBlockedWord,
    UpstreamConnected,
    UpstreamConnectFailed,
    TunnelEstablished,
    TunnelClosed,
    RequestCompleted,
    SessionFailed,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PolicyLoaded => "policy_loaded",
            Self::PolicyMissing => "policy_missing",
            Self::ListenerStarted => "listener_started",
            Self::RequestReceived => "request_received",
            Self::RequestBlockedWord => "request_blocked_word",
            Self::RequestBlockedHost => "request_blocked_host",
            Self::ConnectBlockedHost => "connect_blocked_host",
            Self::ResponseBlockedWord => "response_blocked_word",
            Self::UpstreamConnected => "upstream_connected",
            Self::UpstreamConnectFailed => "upstream_connect_failed",
            Self::TunnelEstablished => "tunnel_established",
            Self::TunnelClosed => "tunnel_closed",
            Self::RequestCompleted => "request_completed",
            Self::SessionFailed => "session_failed",
        }
    }
}

/// Identifies which flow an event belongs to. `flow_id` 0 is the
/// process-level sentinel used by listener and policy events; the host and
/// port stay empty until the session has resolved its target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowContext {
    pub flow_id: u64,
    pub client_addr: String,
    pub host: String,
    pub port: u16,
}

impl FlowContext {
    pub fn process() -> Self {
        Self::default()
    }

    pub fn for_flow(flow_id: u64, client_addr: impl Into<String>) -> Self {
        Self {
            flow_id,
            client_addr: client_addr.into(),
            host: String::new(),
            port: 0,
        }
    }

    pub fn with_target(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: EventType,
    pub context: FlowContext,
    pub occurred_at_unix_ms: u128,
    pub attributes: BTreeMap<String, String>,
}

impl Event {
    pub fn new(kind: EventType, context: FlowContext) -> Self {
        Self {
            kind,
            context,
            occurred_at_unix_ms: now_unix_ms(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<String>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    fn emit(&self, event: Event) {
        (**self).emit(event);
    }
}

#[derive(Debug, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: Event) {}
}

/// Captures every emitted event for test assertions.
#[derive(Debug, Default, Clone)]
pub struct VecEventSink {
    events: Arc<Mutex<Vec<Event>>>,
}

impl VecEventSink {
    pub fn snapshot(&self) -> Vec<Event> {
        self.events.lock().expect("lock poisoned").clone()
    }

    pub fn kinds(&self) -> Vec<EventType> {
        self.snapshot().into_iter().map(|event| event.kind).collect()
    }
}

impl EventSink for VecEventSink {
    fn emit(&self, event: Event) {
        self.events.lock().expect("lock poisoned").push(event);
    }
}

/// Forwards every event to each attached sink in order.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: Event) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}

fn now_unix_ms() -> u128 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis(),
        Err(_) => 0,
    }
}
