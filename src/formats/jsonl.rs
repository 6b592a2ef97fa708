//! JSON Lines ("jsonl"): one compact JSON document per line.
//!
//! Blank lines are skipped on read.  Records are `serde_json::Value`; the
//! typed roles bind `Vec<serde_json::Value>`.
//!
//! Extras honored by the readers:
//!   - `max_records` (u64) — stop after this many records.

use std::io::{BufRead, Read, Write};

use serde_json::Value;

use crate::extras::Extras;
use crate::registry::{FormatError, Record, RecordIter, Registry, RegistryError};
use crate::stream::{ReadHandle, WriteHandle};

pub const NAME: &str = "jsonl";

/// Register all jsonl roles into `registry`.
pub fn register(registry: &mut Registry) -> Result<(), RegistryError> {
    registry.register_identifier(NAME, identify)?;
    registry.register_reader::<Vec<Value>>(NAME, read_values)?;
    registry.register_writer::<Vec<Value>>(NAME, write_values)?;
    registry.register_record_reader(NAME, read_records)?;
    registry.register_record_writer(NAME, write_records)?;
    Ok(())
}

// ── Identifier ───────────────────────────────────────────────────────────────

/// The first non-whitespace byte of a JSON Lines stream opens an object or
/// an array.  Cheap on purpose: ambiguity against other formats is resolved
/// by the sniffing decision rule, not here.
fn identify(fh: &mut ReadHandle<'_>) -> std::io::Result<bool> {
    let mut buf = [0u8; 512];
    let n = fh.read(&mut buf)?;
    Ok(buf[..n]
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|&b| b == b'{' || b == b'['))
}

// ── Typed roles ──────────────────────────────────────────────────────────────

fn read_values(fh: &mut ReadHandle<'_>, extras: &Extras) -> Result<Vec<Value>, FormatError> {
    let max = extras.get_u64("max_records").unwrap_or(u64::MAX);
    let mut out = Vec::new();
    for line in fh.lines() {
        if out.len() as u64 >= max {
            break;
        }
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        out.push(serde_json::from_str(trimmed).map_err(|e| FormatError::malformed(NAME, e))?);
    }
    Ok(out)
}

fn write_values(
    values: &Vec<Value>,
    fh: &mut WriteHandle<'_>,
    _extras: &Extras,
) -> Result<(), FormatError> {
    for value in values {
        write_line(value, fh)?;
    }
    Ok(())
}

fn write_line(value: &Value, fh: &mut WriteHandle<'_>) -> Result<(), FormatError> {
    let line = serde_json::to_string(value).map_err(|e| FormatError::malformed(NAME, e))?;
    fh.write_all(line.as_bytes())?;
    fh.write_all(b"\n")?;
    Ok(())
}

// ── Streaming roles ──────────────────────────────────────────────────────────

fn read_records<'a>(fh: ReadHandle<'a>, extras: &Extras) -> Result<RecordIter<'a>, FormatError> {
    Ok(Box::new(JsonlRecords {
        lines: fh.lines(),
        yielded: 0,
        max: extras.get_u64("max_records").unwrap_or(u64::MAX),
    }))
}

struct JsonlRecords<'a> {
    lines: std::io::Lines<ReadHandle<'a>>,
    yielded: u64,
    max: u64,
}

impl Iterator for JsonlRecords<'_> {
    type Item = Result<Record, FormatError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.yielded >= self.max {
            return None;
        }
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            return match serde_json::from_str::<Value>(trimmed) {
                Ok(value) => {
                    self.yielded += 1;
                    Some(Ok(Box::new(value) as Record))
                }
                Err(e) => Some(Err(FormatError::malformed(NAME, e))),
            };
        }
    }
}

fn write_records(
    records: &mut dyn Iterator<Item = Result<Record, FormatError>>,
    fh: &mut WriteHandle<'_>,
    _extras: &Extras,
) -> Result<(), FormatError> {
    for item in records {
        let record = item?;
        let value = record
            .downcast::<Value>()
            .map_err(|_| FormatError::malformed(NAME, "record is not a JSON value"))?;
        write_line(&value, fh)?;
    }
    Ok(())
}
