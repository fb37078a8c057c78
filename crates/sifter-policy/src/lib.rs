use std::fs;
use std::path::{Path, PathBuf};

/// Immutable forbidden-content lists, built once at startup and shared by
/// every session.
///
/// Matching is case-insensitive substring containment with no tokenization:
/// an entry appearing anywhere inside the scanned text (for words) or the
/// hostname (for hosts) is a hit. Entries are stored lowercased; empty
/// entries are dropped at parse time so they can never match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Policy {
    words: Vec<String>,
    hosts: Vec<String>,
}

/// Result of a fail-soft policy load: startup proceeds with an empty policy
/// when the source file is unreadable, and the caller decides how loudly to
/// report that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyLoad {
    pub policy: Policy,
    pub path: PathBuf,
    pub source_found: bool,
}

impl Policy {
    /// Parses the line-oriented policy format.
    ///
    /// Blank lines and lines starting with `#` are ignored. Lines starting
    /// with a case-insensitive `site:` prefix contribute the trimmed
    /// remainder as a forbidden-host substring; every other non-empty line
    /// contributes a forbidden-word substring. All entries are lowercased.
    pub fn parse(text: &str) -> Self {
        let mut words = Vec::new();
        let mut hosts = Vec::new();
        for line in text.lines() {
            let entry = line.trim();
            if entry.is_empty() || entry.starts_with('#') {
                continue;
            }
            let lowered = entry.to_ascii_lowercase();
            if let Some(remainder) = lowered.strip_prefix("site:") {
                let host = remainder.trim();
                if !host.is_empty() {
                    hosts.push(host.to_string());
                }
            } else {
                words.push(lowered);
            }
        }
        Self { words, hosts }
    }

    /// Reads and parses a policy file, failing soft: a missing or unreadable
    /// file yields an empty policy with `source_found` cleared rather than
    /// an error.
    pub fn load(path: impl AsRef<Path>) -> PolicyLoad {
        let path = path.as_ref().to_path_buf();
        match fs::read_to_string(&path) {
            Ok(text) => PolicyLoad {
                policy: Self::parse(&text),
                path,
                source_found: true,
            },
            Err(_) => PolicyLoad {
                policy: Self::default(),
                path,
                source_found: false,
            },
        }
    }

    /// Builds a policy from explicit entry lists, applying the same
    /// lowercasing and empty-entry filtering as `parse`.
    pub fn from_lists<W, H>(words: W, hosts: H) -> Self
    where
        W: IntoIterator,
        W::Item: AsRef<str>,
        H: IntoIterator,
        H::Item: AsRef<str>,
    {
        let words = words
            .into_iter()
            .map(|word| word.as_ref().trim().to_ascii_lowercase())
            .filter(|word| !word.is_empty())
            .collect();
        let hosts = hosts
            .into_iter()
            .map(|host| host.as_ref().trim().to_ascii_lowercase())
            .filter(|host| !host.is_empty())
            .collect();
        Self { words, hosts }
    }

    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty() && self.hosts.is_empty()
    }

    /// Returns the first forbidden word contained in the text, if any.
    ///
    /// The text is lowercased before scanning, so callers may pass raw
    /// request or response bytes rendered as text.
    pub fn find_forbidden_word(&self, text: &str) -> Option<&str> {
        if self.words.is_empty() {
            return None;
        }
        let lowered = text.to_ascii_lowercase();
        self.words
            .iter()
            .find(|word| lowered.contains(word.as_str()))
            .map(String::as_str)
    }

    pub fn contains_forbidden_word(&self, text: &str) -> bool {
        self.find_forbidden_word(text).is_some()
    }

    /// Returns the first forbidden-host entry that is a substring of the
    /// lowercased hostname, if any.
    pub fn find_forbidden_host(&self, host: &str) -> Option<&str> {
        if self.hosts.is_empty() {
            return None;
        }
        let lowered = host.to_ascii_lowercase();
        self.hosts
            .iter()
            .find(|entry| lowered.contains(entry.as_str()))
            .map(String::as_str)
    }

    pub fn is_host_forbidden(&self, host: &str) -> bool {
        self.find_forbidden_host(host).is_some()
    }
}
