//! Plain `key = value` configuration text ("kvconf").
//!
//! Lines starting with `#` are comments; blank lines are ignored.  Keys are
//! `[A-Za-z0-9_.-]+`.  Binds the typed roles for
//! `BTreeMap<String, String>` only — no streaming slot, deliberately: it is
//! the built-in exercising partial role coverage.
//!
//! Extras honored by the writer:
//!   - `header` (string) — emitted as a leading `# …` comment line.

use std::collections::BTreeMap;
use std::io::{BufRead, Read, Write};

use crate::extras::Extras;
use crate::registry::{FormatError, Registry, RegistryError};
use crate::stream::{ReadHandle, WriteHandle};

pub const NAME: &str = "kvconf";

/// Register all kvconf roles into `registry`.
pub fn register(registry: &mut Registry) -> Result<(), RegistryError> {
    registry.register_identifier(NAME, identify)?;
    registry.register_reader::<BTreeMap<String, String>>(NAME, read_map)?;
    registry.register_writer::<BTreeMap<String, String>>(NAME, write_map)?;
    Ok(())
}

// ── Identifier ───────────────────────────────────────────────────────────────

/// Claims the stream when the sniffed prefix is printable text and its first
/// content line is a well-formed `key = value` pair.
fn identify(fh: &mut ReadHandle<'_>) -> std::io::Result<bool> {
    let mut buf = [0u8; 1024];
    let n = fh.read(&mut buf)?;
    let prefix = &buf[..n];

    if prefix
        .iter()
        .any(|&b| b.is_ascii_control() && !matches!(b, b'\n' | b'\r' | b'\t'))
    {
        return Ok(false);
    }
    let Ok(text) = std::str::from_utf8(trim_split_utf8(prefix)) else {
        return Ok(false);
    };

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        return Ok(is_pair(line));
    }
    Ok(false)
}

/// Drop trailing bytes of a possibly mid-character UTF-8 cut.
fn trim_split_utf8(prefix: &[u8]) -> &[u8] {
    match std::str::from_utf8(prefix) {
        Ok(_) => prefix,
        Err(e) if e.error_len().is_none() => &prefix[..e.valid_up_to()],
        Err(_) => prefix,
    }
}

fn is_pair(line: &str) -> bool {
    let Some((key, _value)) = line.split_once('=') else {
        return false;
    };
    let key = key.trim();
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

// ── Typed roles ──────────────────────────────────────────────────────────────

fn read_map(
    fh: &mut ReadHandle<'_>,
    _extras: &Extras,
) -> Result<BTreeMap<String, String>, FormatError> {
    let mut map = BTreeMap::new();
    for (lineno, line) in fh.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(FormatError::malformed(
                NAME,
                format_args!("line {}: expected key = value", lineno + 1),
            ));
        };
        map.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(map)
}

fn write_map(
    map: &BTreeMap<String, String>,
    fh: &mut WriteHandle<'_>,
    extras: &Extras,
) -> Result<(), FormatError> {
    if let Some(header) = extras.get_str("header") {
        writeln!(fh, "# {header}")?;
    }
    for (key, value) in map {
        writeln!(fh, "{key} = {value}")?;
    }
    Ok(())
}
