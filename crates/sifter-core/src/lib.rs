//! Engine and configuration for the sifter forwarding proxy.
//!
//! The engine owns the filtering policy and the event sink, allocates flow
//! ids, and answers the policy questions a session asks while it shepherds a
//! request. Emitting the corresponding block event is part of answering, so
//! callers cannot forget to log a refusal.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use sifter_observe::{Event, EventSink, EventType, FlowContext};
use sifter_policy::Policy;

mod config;
mod errors;

pub use config::ProxyConfig;
pub use errors::{ConfigError, ProxyError};

pub struct ProxyEngine<S: EventSink> {
    pub config: ProxyConfig,
    policy: Arc<Policy>,
    sink: S,
    next_flow_id: AtomicU64,
}

impl<S: EventSink> ProxyEngine<S> {
    pub fn new(config: ProxyConfig, policy: Arc<Policy>, sink: S) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            policy,
            sink,
            next_flow_id: AtomicU64::new(1),
        })
    }

    /// Flow ids start at 1; id 0 is reserved for process-level events.
    pub fn allocate_flow_id(&self) -> u64 {
        self.next_flow_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn emit(&self, event: Event) {
        self.sink.emit(event);
    }

    /// Records how the policy file load went, using the counts now held by
    /// the engine's policy.
    pub fn note_policy_load(&self, path: &Path, source_found: bool) {
        let path_text = path.display().to_string();
        if source_found {
            self.emit(
                Event::new(EventType::PolicyLoaded, FlowContext::process())
                    .with_attribute("words", self.policy.word_count().to_string())
                    .with_attribute("sites", self.policy.host_count().to_string())
                    .with_attribute("path", path_text),
            );
        } else {
            self.emit(
                Event::new(EventType::PolicyMissing, FlowContext::process())
                    .with_attribute("path", path_text),
            );
        }
    }

    /// Scans request text for a forbidden word. A hit emits the block event
    /// and returns the word that matched.
    pub fn scan_request_text(&self, context: &FlowContext, text: &str) -> Option<String> {
        let word = self.policy.find_forbidden_word(text)?;
        self.emit(
            Event::new(EventType::RequestBlockedWord, context.clone())
                .with_attribute("word", word),
        );
        Some(word.to_string())
    }

    /// Checks the target host of a plain forwarded request.
    pub fn check_forward_host(&self, context: &FlowContext) -> Option<String> {
        let host = self.policy.find_forbidden_host(&context.host)?;
        self.emit(
            Event::new(EventType::RequestBlockedHost, context.clone())
                .with_attribute("site", host),
        );
        Some(host.to_string())
    }

    /// Checks the target host of a CONNECT request.
    pub fn check_connect_host(&self, context: &FlowContext) -> Option<String> {
        let host = self.policy.find_forbidden_host(&context.host)?;
        self.emit(
            Event::new(EventType::ConnectBlockedHost, context.clone())
                .with_attribute("site", host),
        );
        Some(host.to_string())
    }

    /// Records a response that the body scan refused to forward.
    pub fn report_response_blocked(&self, context: &FlowContext, word: &str) {
        self.emit(
            Event::new(EventType::ResponseBlockedWord, context.clone())
                .with_attribute("word", word),
        );
    }
}
