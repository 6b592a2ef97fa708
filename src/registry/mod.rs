//! Format registry: named formats + role bindings keyed by target type.
//!
//! # Identity rules
//! Every format is identified by a caller-chosen, non-empty name.  Per name
//! the registry holds:
//!   - At most one **identifier** (the sniffing predicate).
//!   - At most one **reader** and one **writer** per [`Target`], where the
//!     target is either a concrete Rust type or the [`Target::Records`]
//!     streaming sentinel.
//!
//! Slots are write-once.  A second registration for an occupied slot is a
//! hard error and leaves the registry untouched — plugins from independent
//! initialization code must never silently shadow one another.
//!
//! # Lifecycle
//! Entries are inserted during process initialization and persist for the
//! life of the process; nothing is ever removed or replaced.  The process-wide
//! instance behind [`global`] is an `RwLock`: register while single-threaded,
//! then dispatch concurrently under read locks.  Whether the registered
//! functions themselves are reentrant is the plugin author's obligation.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, LazyLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::debug;
use serde::Serialize;
use thiserror::Error;

use crate::extras::Extras;
use crate::stream::{ReadHandle, WriteHandle};

/// Target label used in diagnostics for the streaming sentinel.
pub(crate) const RECORDS_LABEL: &str = "records";

// ── Target key ───────────────────────────────────────────────────────────────

/// The type a reader produces or a writer consumes.
///
/// `Records` is the streaming sentinel: readers bound to it produce a lazy
/// sequence of [`Record`]s instead of one constructed value, and writers
/// consume such a sequence.  It is a first-class key, not a null type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Typed(TypeId),
    Records,
}

impl Target {
    /// The target key for a concrete type.
    pub fn of<T: Any>() -> Self {
        Target::Typed(TypeId::of::<T>())
    }
}

// ── Role function shapes ─────────────────────────────────────────────────────

/// One element of a streaming read or write.  Each format decides what its
/// records are; consumers downcast.
pub type Record = Box<dyn Any + Send>;

/// A lazy record sequence.  The `'a` ties it to the stream it pulls from.
pub type RecordIter<'a> = Box<dyn Iterator<Item = Result<Record, FormatError>> + 'a>;

/// Sniffing predicate: does the stream look like this format?
///
/// Identifiers may read as much or as little as they need; the sniffing loop
/// rewinds the stream before and after every trial, so they never observe one
/// another's position.  They must not close the stream (they cannot — they
/// only borrow the handle).
pub type Identifier = Arc<dyn Fn(&mut ReadHandle<'_>) -> io::Result<bool> + Send + Sync>;

/// Type-erased value reader as stored in the registry.
pub type ValueReader =
    Arc<dyn Fn(&mut ReadHandle<'_>, &Extras) -> Result<Box<dyn Any>, FormatError> + Send + Sync>;

/// Record reader as stored in the registry.
///
/// Takes the handle by value: the handle moves into the returned iterator, so
/// dropping the iterator is what releases an owned stream — exactly once, on
/// every path.
pub type RecordReader = Arc<
    dyn for<'a> Fn(ReadHandle<'a>, &Extras) -> Result<RecordIter<'a>, FormatError> + Send + Sync,
>;

/// Type-erased value writer as stored in the registry.
pub type ValueWriter =
    Arc<dyn Fn(&dyn Any, &mut WriteHandle<'_>, &Extras) -> Result<(), FormatError> + Send + Sync>;

/// Record writer as stored in the registry.  Must drain the sequence it is
/// given, so any stream backing the sequence is released.
pub type RecordWriter = Arc<
    dyn Fn(
            &mut dyn Iterator<Item = Result<Record, FormatError>>,
            &mut WriteHandle<'_>,
            &Extras,
        ) -> Result<(), FormatError>
        + Send
        + Sync,
>;

// ── Error types ──────────────────────────────────────────────────────────────

/// Which role a binding error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Reader,
    Writer,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Reader => write!(f, "reader"),
            Role::Writer => write!(f, "writer"),
        }
    }
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("'{format}' already has an identifier")]
    DuplicateIdentifier { format: String },
    #[error("'{format}' already has a {role} for {target}")]
    DuplicateBinding {
        format: String,
        role: Role,
        target: String,
    },
    #[error("Format name cannot be empty")]
    EmptyFormatName,
}

/// Failure raised by registered reader/writer/identifier bodies.
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("Malformed {format} data: {detail}")]
    Malformed { format: String, detail: String },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl FormatError {
    pub fn malformed(format: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        FormatError::Malformed {
            format: format.into(),
            detail: detail.to_string(),
        }
    }
}

// ── Registry store ───────────────────────────────────────────────────────────

pub(crate) enum ReaderFn {
    Value(ValueReader),
    Records(RecordReader),
}

pub(crate) enum WriterFn {
    Value(ValueWriter),
    Records(RecordWriter),
}

#[derive(Default)]
struct Slot {
    reader: Option<ReaderFn>,
    writer: Option<WriterFn>,
}

/// Listing row for one format, as reported by [`Registry::entries`].
#[derive(Debug, Clone, Serialize)]
pub struct FormatEntry {
    pub name: String,
    pub identifier: bool,
    pub record_reader: bool,
    pub record_writer: bool,
    pub typed_readers: usize,
    pub typed_writers: usize,
}

/// The registry itself: one identifier map, one `(format, target)` slot map.
#[derive(Default)]
pub struct Registry {
    identifiers: HashMap<String, Identifier>,
    formats: HashMap<String, HashMap<Target, Slot>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Registration ────────────────────────────────────────────────────────

    /// Bind the sniffing predicate for `format`.
    pub fn register_identifier(
        &mut self,
        format: &str,
        identifier: impl Fn(&mut ReadHandle<'_>) -> io::Result<bool> + Send + Sync + 'static,
    ) -> Result<(), RegistryError> {
        check_name(format)?;
        if self.identifiers.contains_key(format) {
            return Err(RegistryError::DuplicateIdentifier {
                format: format.to_string(),
            });
        }
        self.identifiers
            .insert(format.to_string(), Arc::new(identifier));
        debug!("registered identifier for '{format}'");
        Ok(())
    }

    /// Bind a reader producing one `T` for `format`.
    pub fn register_reader<T: Any>(
        &mut self,
        format: &str,
        reader: impl Fn(&mut ReadHandle<'_>, &Extras) -> Result<T, FormatError> + Send + Sync + 'static,
    ) -> Result<(), RegistryError> {
        let erased: ValueReader = Arc::new(move |fh, extras| {
            reader(fh, extras).map(|v| Box::new(v) as Box<dyn Any>)
        });
        self.bind_reader(
            format,
            Target::of::<T>(),
            std::any::type_name::<T>(),
            ReaderFn::Value(erased),
        )
    }

    /// Bind a streaming reader for `format` (the [`Target::Records`] slot).
    pub fn register_record_reader(
        &mut self,
        format: &str,
        reader: impl for<'a> Fn(ReadHandle<'a>, &Extras) -> Result<RecordIter<'a>, FormatError>
            + Send
            + Sync
            + 'static,
    ) -> Result<(), RegistryError> {
        self.bind_reader(
            format,
            Target::Records,
            RECORDS_LABEL,
            ReaderFn::Records(Arc::new(reader)),
        )
    }

    /// Bind a writer consuming a `T` for `format`.
    pub fn register_writer<T: Any>(
        &mut self,
        format: &str,
        writer: impl Fn(&T, &mut WriteHandle<'_>, &Extras) -> Result<(), FormatError>
            + Send
            + Sync
            + 'static,
    ) -> Result<(), RegistryError> {
        let fmt = format.to_string();
        let erased: ValueWriter = Arc::new(move |value, fh, extras| {
            // Dispatch keys on TypeId, so the downcast holds by construction.
            match value.downcast_ref::<T>() {
                Some(v) => writer(v, fh, extras),
                None => Err(FormatError::malformed(
                    &fmt,
                    format_args!("writer expected a {}", std::any::type_name::<T>()),
                )),
            }
        });
        self.bind_writer(
            format,
            Target::of::<T>(),
            std::any::type_name::<T>(),
            WriterFn::Value(erased),
        )
    }

    /// Bind a streaming writer for `format` (the [`Target::Records`] slot).
    pub fn register_record_writer(
        &mut self,
        format: &str,
        writer: impl Fn(
                &mut dyn Iterator<Item = Result<Record, FormatError>>,
                &mut WriteHandle<'_>,
                &Extras,
            ) -> Result<(), FormatError>
            + Send
            + Sync
            + 'static,
    ) -> Result<(), RegistryError> {
        self.bind_writer(
            format,
            Target::Records,
            RECORDS_LABEL,
            WriterFn::Records(Arc::new(writer)),
        )
    }

    fn bind_reader(
        &mut self,
        format: &str,
        target: Target,
        label: &str,
        f: ReaderFn,
    ) -> Result<(), RegistryError> {
        check_name(format)?;
        if self.slot(format, target).is_some_and(|s| s.reader.is_some()) {
            return Err(RegistryError::DuplicateBinding {
                format: format.to_string(),
                role: Role::Reader,
                target: label.to_string(),
            });
        }
        self.formats
            .entry(format.to_string())
            .or_default()
            .entry(target)
            .or_default()
            .reader = Some(f);
        debug!("registered reader for '{format}' ({label})");
        Ok(())
    }

    fn bind_writer(
        &mut self,
        format: &str,
        target: Target,
        label: &str,
        f: WriterFn,
    ) -> Result<(), RegistryError> {
        check_name(format)?;
        if self.slot(format, target).is_some_and(|s| s.writer.is_some()) {
            return Err(RegistryError::DuplicateBinding {
                format: format.to_string(),
                role: Role::Writer,
                target: label.to_string(),
            });
        }
        self.formats
            .entry(format.to_string())
            .or_default()
            .entry(target)
            .or_default()
            .writer = Some(f);
        debug!("registered writer for '{format}' ({label})");
        Ok(())
    }

    // ── Lookup ──────────────────────────────────────────────────────────────

    /// The identifier bound to `format`, if any.  Absence is not an error.
    pub fn get_identifier(&self, format: &str) -> Option<Identifier> {
        self.identifiers.get(format).cloned()
    }

    /// The reader producing `T` bound to `format`, if any.
    pub fn get_reader<T: Any>(&self, format: &str) -> Option<ValueReader> {
        self.value_reader(format, Target::of::<T>())
    }

    /// The streaming reader bound to `format`, if any.
    pub fn get_record_reader(&self, format: &str) -> Option<RecordReader> {
        match self.slot(format, Target::Records)?.reader.as_ref()? {
            ReaderFn::Records(f) => Some(f.clone()),
            ReaderFn::Value(_) => None,
        }
    }

    /// The writer consuming `T` bound to `format`, if any.
    pub fn get_writer<T: Any>(&self, format: &str) -> Option<ValueWriter> {
        self.value_writer(format, Target::of::<T>())
    }

    /// The streaming writer bound to `format`, if any.
    pub fn get_record_writer(&self, format: &str) -> Option<RecordWriter> {
        match self.slot(format, Target::Records)?.writer.as_ref()? {
            WriterFn::Records(f) => Some(f.clone()),
            WriterFn::Value(_) => None,
        }
    }

    pub(crate) fn value_reader(&self, format: &str, target: Target) -> Option<ValueReader> {
        match self.slot(format, target)?.reader.as_ref()? {
            ReaderFn::Value(f) => Some(f.clone()),
            ReaderFn::Records(_) => None,
        }
    }

    pub(crate) fn value_writer(&self, format: &str, target: Target) -> Option<ValueWriter> {
        match self.slot(format, target)?.writer.as_ref()? {
            WriterFn::Value(f) => Some(f.clone()),
            WriterFn::Records(_) => None,
        }
    }

    /// Format names with a reader bound to `target`, sorted.
    pub fn list_read_formats(&self, target: Target) -> Vec<String> {
        self.list_role(target, Role::Reader)
    }

    /// Format names with a writer bound to `target`, sorted.
    pub fn list_write_formats(&self, target: Target) -> Vec<String> {
        self.list_role(target, Role::Writer)
    }

    fn list_role(&self, target: Target, role: Role) -> Vec<String> {
        let mut out: Vec<String> = self
            .formats
            .iter()
            .filter(|(_, targets)| {
                targets.get(&target).is_some_and(|s| match role {
                    Role::Reader => s.reader.is_some(),
                    Role::Writer => s.writer.is_some(),
                })
            })
            .map(|(name, _)| name.clone())
            .collect();
        out.sort();
        out
    }

    /// One row per known format name, sorted.  For listings and diagnostics.
    pub fn entries(&self) -> Vec<FormatEntry> {
        let mut names: Vec<&String> = self
            .identifiers
            .keys()
            .chain(self.formats.keys())
            .collect();
        names.sort();
        names.dedup();

        names
            .into_iter()
            .map(|name| {
                let targets = self.formats.get(name);
                let record_slot = targets.and_then(|t| t.get(&Target::Records));
                let count = |role: Role| {
                    targets.map_or(0, |t| {
                        t.iter()
                            .filter(|(target, s)| {
                                matches!(target, Target::Typed(_))
                                    && match role {
                                        Role::Reader => s.reader.is_some(),
                                        Role::Writer => s.writer.is_some(),
                                    }
                            })
                            .count()
                    })
                };
                FormatEntry {
                    name: name.clone(),
                    identifier: self.identifiers.contains_key(name),
                    record_reader: record_slot.is_some_and(|s| s.reader.is_some()),
                    record_writer: record_slot.is_some_and(|s| s.writer.is_some()),
                    typed_readers: count(Role::Reader),
                    typed_writers: count(Role::Writer),
                }
            })
            .collect()
    }

    // ── Internal helpers ────────────────────────────────────────────────────

    fn slot(&self, format: &str, target: Target) -> Option<&Slot> {
        self.formats.get(format)?.get(&target)
    }

    /// True when `format` has any role bound to `target`.  Sniffing uses this
    /// to restrict the identifier trials.
    pub(crate) fn has_target(&self, format: &str, target: Target) -> bool {
        self.slot(format, target)
            .is_some_and(|s| s.reader.is_some() || s.writer.is_some())
    }

    pub(crate) fn identifier_iter(&self) -> impl Iterator<Item = (&String, &Identifier)> {
        self.identifiers.iter()
    }
}

// ── Process-wide instance ────────────────────────────────────────────────────

static GLOBAL: LazyLock<RwLock<Registry>> = LazyLock::new(|| RwLock::new(Registry::new()));

/// The process-wide registry.  Plugins register here from their own
/// initialization code; the free functions below are shorthands over it.
pub fn global() -> &'static RwLock<Registry> {
    &GLOBAL
}

// A poisoned lock cannot hold a torn registry: every mutation is one HashMap
// insert into an empty slot.  Recover the guard instead of propagating.
pub(crate) fn global_read() -> RwLockReadGuard<'static, Registry> {
    GLOBAL.read().unwrap_or_else(|e| e.into_inner())
}

pub(crate) fn global_write() -> RwLockWriteGuard<'static, Registry> {
    GLOBAL.write().unwrap_or_else(|e| e.into_inner())
}

/// [`Registry::register_identifier`] against the process-wide registry.
pub fn register_identifier(
    format: &str,
    identifier: impl Fn(&mut ReadHandle<'_>) -> io::Result<bool> + Send + Sync + 'static,
) -> Result<(), RegistryError> {
    global_write().register_identifier(format, identifier)
}

/// [`Registry::register_reader`] against the process-wide registry.
pub fn register_reader<T: Any>(
    format: &str,
    reader: impl Fn(&mut ReadHandle<'_>, &Extras) -> Result<T, FormatError> + Send + Sync + 'static,
) -> Result<(), RegistryError> {
    global_write().register_reader(format, reader)
}

/// [`Registry::register_record_reader`] against the process-wide registry.
pub fn register_record_reader(
    format: &str,
    reader: impl for<'a> Fn(ReadHandle<'a>, &Extras) -> Result<RecordIter<'a>, FormatError>
        + Send
        + Sync
        + 'static,
) -> Result<(), RegistryError> {
    global_write().register_record_reader(format, reader)
}

/// [`Registry::register_writer`] against the process-wide registry.
pub fn register_writer<T: Any>(
    format: &str,
    writer: impl Fn(&T, &mut WriteHandle<'_>, &Extras) -> Result<(), FormatError>
        + Send
        + Sync
        + 'static,
) -> Result<(), RegistryError> {
    global_write().register_writer(format, writer)
}

/// [`Registry::register_record_writer`] against the process-wide registry.
pub fn register_record_writer(
    format: &str,
    writer: impl Fn(
            &mut dyn Iterator<Item = Result<Record, FormatError>>,
            &mut WriteHandle<'_>,
            &Extras,
        ) -> Result<(), FormatError>
        + Send
        + Sync
        + 'static,
) -> Result<(), RegistryError> {
    global_write().register_record_writer(format, writer)
}

/// [`Registry::get_identifier`] against the process-wide registry.
pub fn get_identifier(format: &str) -> Option<Identifier> {
    global_read().get_identifier(format)
}

/// [`Registry::get_reader`] against the process-wide registry.
pub fn get_reader<T: Any>(format: &str) -> Option<ValueReader> {
    global_read().get_reader::<T>(format)
}

/// [`Registry::get_record_reader`] against the process-wide registry.
pub fn get_record_reader(format: &str) -> Option<RecordReader> {
    global_read().get_record_reader(format)
}

/// [`Registry::get_writer`] against the process-wide registry.
pub fn get_writer<T: Any>(format: &str) -> Option<ValueWriter> {
    global_read().get_writer::<T>(format)
}

/// [`Registry::get_record_writer`] against the process-wide registry.
pub fn get_record_writer(format: &str) -> Option<RecordWriter> {
    global_read().get_record_writer(format)
}

/// [`Registry::list_read_formats`] against the process-wide registry.
pub fn list_read_formats(target: Target) -> Vec<String> {
    global_read().list_read_formats(target)
}

/// [`Registry::list_write_formats`] against the process-wide registry.
pub fn list_write_formats(target: Target) -> Vec<String> {
    global_read().list_write_formats(target)
}

fn check_name(format: &str) -> Result<(), RegistryError> {
    if format.is_empty() {
        return Err(RegistryError::EmptyFormatName);
    }
    Ok(())
}
