//! # Fingerprint
//!
//! Module dedicated to message fingerprints. A fingerprint identifies
//! a message independently of its server UID, which makes it usable
//! as a resume key across runs and across reconnections.

use std::{collections::HashMap, fmt, ops::Deref};

use mail_parser::MessageParser;
use tracing::trace;

const MESSAGE_ID_PREFIX: &str = "mid:";
const HEADER_PREFIX: &str = "hdr:";

/// The message fingerprint.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint of a message from its raw header
    /// block and its RFC822 size.
    ///
    /// The Message-ID is used when present, otherwise a digest of
    /// the normalized header block and the size.
    pub fn compute(header: &[u8], size: u32) -> Self {
        match parse_message_id(header) {
            Some(id) => Self::from_message_id(&id),
            None => Self::from_header(header, size),
        }
    }

    pub fn from_message_id(id: &str) -> Self {
        let id = normalize_message_id(id);
        Self(format!("{MESSAGE_ID_PREFIX}{:x}", md5::compute(id)))
    }

    pub fn from_header(header: &[u8], size: u32) -> Self {
        let header = normalize_header(header);
        let mut ctx = md5::Context::new();
        ctx.consume(size.to_string());
        ctx.consume(b"\n");
        ctx.consume(header);
        Self(format!("{HEADER_PREFIX}{:x}", ctx.compute()))
    }

    /// Return `true` if the fingerprint is derived from a Message-ID.
    pub fn is_message_id(&self) -> bool {
        self.0.starts_with(MESSAGE_ID_PREFIX)
    }

    fn with_occurrence(&self, n: usize) -> Self {
        Self(format!("{}#{n}", self.0))
    }
}

impl Deref for Fingerprint {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for Fingerprint {
    fn from(fingerprint: String) -> Self {
        Self(fingerprint)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fingerprint generator scoped to the enumeration of one folder.
///
/// Physical duplicates (same Message-ID, or same headers and size)
/// receive an occurrence suffix so each copy gets its own record.
#[derive(Debug, Default)]
pub struct FingerprintScope {
    seen: HashMap<Fingerprint, usize>,
}

impl FingerprintScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self, fingerprint: Fingerprint) -> Fingerprint {
        let count = self.seen.entry(fingerprint.clone()).or_default();
        *count += 1;

        if *count == 1 {
            fingerprint
        } else {
            trace!("duplicate fingerprint {fingerprint}, occurrence {count}");
            fingerprint.with_occurrence(*count)
        }
    }
}

/// Extract the Message-ID of a raw header block, without angle
/// brackets.
pub fn parse_message_id(header: &[u8]) -> Option<String> {
    let msg = MessageParser::new().parse_headers(header)?;
    let id = msg.message_id()?.trim();

    if id.is_empty() {
        None
    } else {
        Some(normalize_message_id(id))
    }
}

fn normalize_message_id(id: &str) -> String {
    id.trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .trim()
        .to_owned()
}

fn normalize_header(header: &[u8]) -> String {
    let header = String::from_utf8_lossy(header);
    let mut lines: Vec<&str> = header.lines().map(str::trim_end).collect();

    while lines.last().map(|line| line.is_empty()).unwrap_or_default() {
        lines.pop();
    }

    lines.join("\n")
}
