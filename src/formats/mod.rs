//! Built-in format plugins.
//!
//! Each submodule is an ordinary plugin: it defines identifier, reader and
//! writer functions and registers them under its format name.  Nothing here
//! is special-cased by the dispatch layer — third-party formats register
//! through exactly the same calls.
//!
//! The record-capable built-ins (`jsonl`, `binrec`) agree on
//! `serde_json::Value` as their record type, so streaming conversion between
//! them works out of the box.  `kvconf` binds typed roles only.

pub mod binrec;
pub mod jsonl;
pub mod kvconf;

use crate::registry::{self, Registry, RegistryError};

/// Register every built-in format into `registry`.
pub fn register_builtins(registry: &mut Registry) -> Result<(), RegistryError> {
    jsonl::register(registry)?;
    kvconf::register(registry)?;
    binrec::register(registry)?;
    Ok(())
}

/// Register every built-in format into the process-wide registry.
///
/// Call once during startup; a second call fails with duplicate-registration.
pub fn install() -> Result<(), RegistryError> {
    register_builtins(&mut registry::global_write())
}
