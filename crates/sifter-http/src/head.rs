use crate::error::ParseError;

/// Parsed request line plus the raw text it came from.
///
/// The raw form is kept so the head can be re-scanned for policy matching
/// exactly as it arrived; the parsed fields drive routing. Tokens beyond
/// the third are tolerated and ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub raw: String,
    pub method: String,
    pub target: String,
    pub version: String,
}

impl RequestLine {
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some(method), Some(target), Some(version)) => Ok(Self {
                raw: line.to_string(),
                method: method.to_string(),
                target: target.to_string(),
                version: version.to_string(),
            }),
            _ => Err(ParseError::MalformedRequestLine(line.to_string())),
        }
    }

    pub fn is_connect(&self) -> bool {
        self.method.eq_ignore_ascii_case("CONNECT")
    }
}

/// Parsed status line plus the raw text it came from. The reason phrase is
/// the whitespace-joined remainder and must be non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub raw: String,
    pub version: String,
    pub code: u16,
    pub reason: String,
}

impl StatusLine {
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let mut parts = line.split_whitespace();
        let (Some(version), Some(code_text)) = (parts.next(), parts.next()) else {
            return Err(ParseError::MalformedStatusLine(line.to_string()));
        };
        let code = code_text
            .parse::<u16>()
            .map_err(|_| ParseError::MalformedStatusLine(line.to_string()))?;
        let reason = parts.collect::<Vec<_>>().join(" ");
        if reason.is_empty() {
            return Err(ParseError::MalformedStatusLine(line.to_string()));
        }
        Ok(Self {
            raw: line.to_string(),
            version: version.to_string(),
            code,
            reason,
        })
    }
}

/// Ordered header lines kept verbatim for byte-exact re-emission, with
/// first-match name lookup layered on top.
///
/// The block enforces its own total-size cap as lines are pushed; the
/// per-line cap is enforced earlier, by the line reader. Lines without a
/// colon are kept (and re-emitted) but never match a lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderBlock {
    lines: Vec<String>,
    raw_len: usize,
    max_bytes: usize,
}

impl HeaderBlock {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            lines: Vec::new(),
            raw_len: 0,
            max_bytes,
        }
    }

    /// Appends one raw header line (terminator already stripped). Fails once
    /// the accumulated size, counting the stripped CRLFs, exceeds the cap.
    pub fn push_line(&mut self, line: &str) -> Result<(), ParseError> {
        self.raw_len += line.len() + 2;
        if self.raw_len > self.max_bytes {
            return Err(ParseError::HeaderBlockTooLarge(self.max_bytes));
        }
        self.lines.push(line.to_string());
        Ok(())
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// First-match lookup: scans the lines in order, splits each on the
    /// first `:`, trims both sides, and compares the name case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.lines.iter().find_map(|line| {
            let (candidate, value) = line.split_once(':')?;
            if candidate.trim().eq_ignore_ascii_case(name) {
                Some(value.trim())
            } else {
                None
            }
        })
    }

    /// Re-emits the block exactly as received: each line with CRLF, then the
    /// terminating blank line.
    pub fn append_to(&self, out: &mut Vec<u8>) {
        for line in &self.lines {
            out.extend_from_slice(line.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
    }
}
