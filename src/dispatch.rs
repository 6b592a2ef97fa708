//! Generic read/write dispatch.
//!
//! # Read
//! [`read`] resolves a value reader for `(format, T)` — sniffing the format
//! first when none is given — invokes it eagerly, releases the stream if it
//! was opened from a path, and returns the value.  [`read_records`] resolves
//! the streaming slot instead and returns a lazy [`Records`] sequence; the
//! stream moves into that sequence and is released exactly once, when the
//! sequence is exhausted, hits an element error, or is dropped early.
//!
//! # Write
//! [`write`] and [`write_records`] resolve the writer for `(format, T)` or
//! the streaming slot, acquire the destination with scoped ownership, invoke,
//! and release on every exit path.  A writer failure propagates only after
//! the stream has been released.
//!
//! Every entry point also exists in a `_with` form taking an explicit
//! [`Registry`]; the plain forms go through the process-wide instance.

use std::any::Any;

use thiserror::Error;

use crate::extras::Extras;
use crate::registry::{self, FormatError, Record, RecordIter, Registry, Target, RECORDS_LABEL};
use crate::sniff::SniffError;
use crate::stream::{ReadHandle, Sink, Source, WriteHandle, WriteMode};

#[derive(Error, Debug)]
pub enum ReadError {
    #[error(transparent)]
    Sniff(#[from] SniffError),
    #[error("Cannot read '{format}' into {target}, no reader found")]
    NoReader {
        format: String,
        target: &'static str,
    },
    #[error("Reader for '{format}' produced an unexpected type (wanted {expected})")]
    WrongType {
        format: String,
        expected: &'static str,
    },
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("Cannot write '{format}' into {destination}, no writer found")]
    NoWriter {
        format: String,
        destination: String,
    },
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// ── Records ──────────────────────────────────────────────────────────────────

/// Lazy record sequence returned by [`read_records`].
///
/// Wraps the reader-produced iterator (which owns the stream handle) and
/// drops it the moment the sequence ends — on exhaustion or on the first
/// element error — so an owned stream is released at that point rather than
/// whenever the caller gets around to dropping the sequence.  Dropping a
/// half-consumed `Records` releases the stream too; abandonment cannot leak.
pub struct Records<'a> {
    inner: Option<RecordIter<'a>>,
}

impl Records<'_> {
    /// True once the underlying stream has been released.
    pub fn finished(&self) -> bool {
        self.inner.is_none()
    }
}

// The inner iterator is an opaque trait object; report the release state.
impl std::fmt::Debug for Records<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Records")
            .field("finished", &self.finished())
            .finish()
    }
}

impl Iterator for Records<'_> {
    type Item = Result<Record, FormatError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.as_mut()?.next() {
            Some(Ok(record)) => Some(Ok(record)),
            Some(Err(e)) => {
                self.inner = None;
                Some(Err(e))
            }
            None => {
                self.inner = None;
                None
            }
        }
    }
}

// ── Read ─────────────────────────────────────────────────────────────────────

/// Read one `T` from `source` as `format`, sniffing the format when `None`.
pub fn read_with<T: Any>(
    registry: &Registry,
    source: Source<'_>,
    format: Option<&str>,
    extras: &Extras,
) -> Result<T, ReadError> {
    let mut fh = ReadHandle::acquire(source)?;
    let fmt = match format {
        Some(f) => f.to_string(),
        None => registry.sniff(&mut fh, Some(Target::of::<T>()))?,
    };
    let reader = registry
        .value_reader(&fmt, Target::of::<T>())
        .ok_or_else(|| ReadError::NoReader {
            format: fmt.clone(),
            target: std::any::type_name::<T>(),
        })?;

    let value = reader(&mut fh, extras)?;
    // Release a path-opened stream before handing the value back.
    drop(fh);

    match value.downcast::<T>() {
        Ok(v) => Ok(*v),
        Err(_) => Err(ReadError::WrongType {
            format: fmt,
            expected: std::any::type_name::<T>(),
        }),
    }
}

/// [`read_with`] against the process-wide registry.
pub fn read<T: Any>(
    source: Source<'_>,
    format: Option<&str>,
    extras: &Extras,
) -> Result<T, ReadError> {
    read_with(&registry::global_read(), source, format, extras)
}

/// Open a lazy record sequence over `source` as `format`, sniffing when
/// `None`.  The stream moves into the returned [`Records`].
pub fn read_records_with<'a>(
    registry: &Registry,
    source: Source<'a>,
    format: Option<&str>,
    extras: &Extras,
) -> Result<Records<'a>, ReadError> {
    let mut fh = ReadHandle::acquire(source)?;
    let fmt = match format {
        Some(f) => f.to_string(),
        None => registry.sniff(&mut fh, Some(Target::Records))?,
    };
    let reader = registry
        .get_record_reader(&fmt)
        .ok_or_else(|| ReadError::NoReader {
            format: fmt.clone(),
            target: RECORDS_LABEL,
        })?;

    let inner = reader(fh, extras)?;
    Ok(Records { inner: Some(inner) })
}

/// [`read_records_with`] against the process-wide registry.
pub fn read_records<'a>(
    source: Source<'a>,
    format: Option<&str>,
    extras: &Extras,
) -> Result<Records<'a>, ReadError> {
    read_records_with(&registry::global_read(), source, format, extras)
}

// ── Write ────────────────────────────────────────────────────────────────────

/// Write `value` to `sink` as `format`.
pub fn write_with<T: Any>(
    registry: &Registry,
    value: &T,
    format: &str,
    sink: Sink<'_>,
    mode: WriteMode,
    extras: &Extras,
) -> Result<(), WriteError> {
    let mut fh = WriteHandle::acquire(sink, mode)?;
    let writer = match registry.value_writer(format, Target::of::<T>()) {
        Some(w) => w,
        None => {
            let destination = fh.describe();
            // fh drops here: a path-opened sink is still released.
            return Err(WriteError::NoWriter {
                format: format.to_string(),
                destination,
            });
        }
    };

    let result = writer(value, &mut fh, extras);
    let finished = fh.finish();
    result?;
    finished?;
    Ok(())
}

/// [`write_with`] against the process-wide registry.
pub fn write<T: Any>(
    value: &T,
    format: &str,
    sink: Sink<'_>,
    mode: WriteMode,
    extras: &Extras,
) -> Result<(), WriteError> {
    write_with(&registry::global_read(), value, format, sink, mode, extras)
}

/// Drain `records` into `sink` as `format` through the streaming writer.
pub fn write_records_with(
    registry: &Registry,
    records: &mut dyn Iterator<Item = Result<Record, FormatError>>,
    format: &str,
    sink: Sink<'_>,
    mode: WriteMode,
    extras: &Extras,
) -> Result<(), WriteError> {
    let mut fh = WriteHandle::acquire(sink, mode)?;
    let writer = match registry.get_record_writer(format) {
        Some(w) => w,
        None => {
            let destination = fh.describe();
            return Err(WriteError::NoWriter {
                format: format.to_string(),
                destination,
            });
        }
    };

    let result = writer(records, &mut fh, extras);
    let finished = fh.finish();
    result?;
    finished?;
    Ok(())
}

/// [`write_records_with`] against the process-wide registry.
pub fn write_records(
    records: &mut dyn Iterator<Item = Result<Record, FormatError>>,
    format: &str,
    sink: Sink<'_>,
    mode: WriteMode,
    extras: &Extras,
) -> Result<(), WriteError> {
    write_records_with(&registry::global_read(), records, format, sink, mode, extras)
}
