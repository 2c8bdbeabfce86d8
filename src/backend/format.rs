//! Line format of the credential file.
//!
//! ```text
//! # comment
//! $12
//! alice:$2b$12$...
//! ```
//!
//! Blank or one-character lines and `#` comments are ignored. `$<n>` sets the
//! bcrypt cost for what follows. Every other line must be exactly
//! `username:hash`; anything else is skipped.

use crate::dataset::Entry;
use std::fmt::Write as _;

#[derive(Debug, PartialEq, Eq)]
pub enum Line<'a> {
    Cost(u32),
    Entry {
        username: &'a str,
        password_hash: &'a str,
    },
}

#[must_use]
pub fn parse_line(line: &str) -> Option<Line<'_>> {
    let line = line.trim();
    if line.len() < 2 || line.starts_with('#') {
        return None;
    }

    if let Some(cost) = line.strip_prefix('$') {
        return cost.parse().ok().map(Line::Cost);
    }

    let mut fields = line.split(':');
    match (fields.next(), fields.next(), fields.next()) {
        (Some(username), Some(password_hash), None) => Some(Line::Entry {
            username,
            password_hash,
        }),
        _ => None,
    }
}

/// Like [`parse_line`] for raw file content; a line that is not UTF-8 is
/// skipped like any other malformed line.
#[must_use]
pub fn parse_bytes(line: &[u8]) -> Option<Line<'_>> {
    std::str::from_utf8(line).ok().and_then(parse_line)
}

/// Serialize a generation: the cost directive first, then one line per entry.
#[must_use]
pub fn render(cost: u32, entries: &[Entry]) -> String {
    let mut out = format!("${cost}\n");
    for entry in entries {
        let _ = writeln!(out, "{}:{}", entry.username, entry.password_hash);
    }
    out
}
