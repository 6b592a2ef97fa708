//! Binary-framed JSON records ("binrec").
//!
//! # Layout
//! ```text
//! magic "BRC1" (4 B)
//! per record: [ payload_len: u32 LE | crc32(payload): u32 LE | payload ]
//! ```
//! Payloads are compact JSON documents.  All integers are little-endian; the
//! CRC is verified on every decode and a mismatch is a hard error.

use std::io::{BufRead, ErrorKind, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;
use serde_json::Value;

use crate::extras::Extras;
use crate::registry::{FormatError, Record, RecordIter, Registry, RegistryError};
use crate::stream::{ReadHandle, WriteHandle};

pub const NAME: &str = "binrec";
pub const MAGIC: &[u8; 4] = b"BRC1";

/// Upper bound on a single record payload.  A length field beyond this is
/// treated as corruption rather than an allocation request.
const MAX_RECORD_LEN: u32 = 64 * 1024 * 1024;

/// Register all binrec roles into `registry`.
pub fn register(registry: &mut Registry) -> Result<(), RegistryError> {
    registry.register_identifier(NAME, identify)?;
    registry.register_reader::<Vec<Value>>(NAME, read_values)?;
    registry.register_writer::<Vec<Value>>(NAME, write_values)?;
    registry.register_record_reader(NAME, read_records)?;
    registry.register_record_writer(NAME, write_records)?;
    Ok(())
}

// ── Identifier ───────────────────────────────────────────────────────────────

fn identify(fh: &mut ReadHandle<'_>) -> std::io::Result<bool> {
    let mut magic = [0u8; 4];
    match fh.read_exact(&mut magic) {
        Ok(()) => Ok(&magic == MAGIC),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

// ── Frame codec ──────────────────────────────────────────────────────────────

fn read_magic(fh: &mut ReadHandle<'_>) -> Result<(), FormatError> {
    let mut magic = [0u8; 4];
    fh.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(FormatError::malformed(NAME, "bad magic"));
    }
    Ok(())
}

/// Decode the next record, or `None` at a clean end of stream.
fn read_one(fh: &mut ReadHandle<'_>) -> Result<Option<Value>, FormatError> {
    if fh.fill_buf()?.is_empty() {
        return Ok(None);
    }
    let len = fh.read_u32::<LittleEndian>()?;
    if len > MAX_RECORD_LEN {
        return Err(FormatError::malformed(
            NAME,
            format_args!("record length {len} exceeds limit"),
        ));
    }
    let crc = fh.read_u32::<LittleEndian>()?;
    let mut payload = vec![0u8; len as usize];
    fh.read_exact(&mut payload)?;

    let mut hasher = Hasher::new();
    hasher.update(&payload);
    if hasher.finalize() != crc {
        return Err(FormatError::malformed(NAME, "record checksum mismatch"));
    }
    serde_json::from_slice(&payload)
        .map(Some)
        .map_err(|e| FormatError::malformed(NAME, e))
}

fn write_one(value: &Value, fh: &mut WriteHandle<'_>) -> Result<(), FormatError> {
    let payload = serde_json::to_vec(value).map_err(|e| FormatError::malformed(NAME, e))?;
    if payload.len() as u64 > MAX_RECORD_LEN as u64 {
        return Err(FormatError::malformed(NAME, "record payload too large"));
    }
    let mut hasher = Hasher::new();
    hasher.update(&payload);

    fh.write_u32::<LittleEndian>(payload.len() as u32)?;
    fh.write_u32::<LittleEndian>(hasher.finalize())?;
    fh.write_all(&payload)?;
    Ok(())
}

// ── Typed roles ──────────────────────────────────────────────────────────────

fn read_values(fh: &mut ReadHandle<'_>, _extras: &Extras) -> Result<Vec<Value>, FormatError> {
    read_magic(fh)?;
    let mut out = Vec::new();
    while let Some(value) = read_one(fh)? {
        out.push(value);
    }
    Ok(out)
}

fn write_values(
    values: &Vec<Value>,
    fh: &mut WriteHandle<'_>,
    _extras: &Extras,
) -> Result<(), FormatError> {
    write_magic(fh)?;
    for value in values {
        write_one(value, fh)?;
    }
    Ok(())
}

/// Emit the stream magic, unless appending to an existing file that already
/// carries it.  A mid-stream magic would decode as a garbage length field.
fn write_magic(fh: &mut WriteHandle<'_>) -> Result<(), FormatError> {
    if !fh.is_continuation() {
        fh.write_all(MAGIC)?;
    }
    Ok(())
}

// ── Streaming roles ──────────────────────────────────────────────────────────

fn read_records<'a>(
    mut fh: ReadHandle<'a>,
    _extras: &Extras,
) -> Result<RecordIter<'a>, FormatError> {
    read_magic(&mut fh)?;
    Ok(Box::new(BinrecRecords { fh, failed: false }))
}

struct BinrecRecords<'a> {
    fh: ReadHandle<'a>,
    failed: bool,
}

impl Iterator for BinrecRecords<'_> {
    type Item = Result<Record, FormatError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match read_one(&mut self.fh) {
            Ok(Some(value)) => Some(Ok(Box::new(value) as Record)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

fn write_records(
    records: &mut dyn Iterator<Item = Result<Record, FormatError>>,
    fh: &mut WriteHandle<'_>,
    _extras: &Extras,
) -> Result<(), FormatError> {
    write_magic(fh)?;
    for item in records {
        let record = item?;
        let value = record
            .downcast::<Value>()
            .map_err(|_| FormatError::malformed(NAME, "record is not a JSON value"))?;
        write_one(&value, fh)?;
    }
    Ok(())
}
