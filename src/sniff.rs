//! Format identification ("sniffing").
//!
//! Every applicable identifier is tried against the stream from position 0;
//! the stream is rewound after each trial so identifiers cannot interfere
//! with one another.  The trial set is exhaustive and unordered on purpose:
//! identifiers carry no priority, so two formats claiming the same stream is
//! a configuration error surfaced to the caller, never resolved silently.

use log::trace;
use thiserror::Error;

use crate::registry::{self, Registry, Target};
use crate::stream::{ReadHandle, Source};

#[derive(Error, Debug)]
pub enum SniffError {
    #[error("Cannot determine the format of {input}")]
    NoMatch { input: String },
    #[error("Format is ambiguous, may be one of: {}", candidates.join(", "))]
    Ambiguous { candidates: Vec<String> },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Registry {
    /// Run the identifier trials against an already-acquired handle.
    ///
    /// When `target` is given, only formats with a reader or writer bound to
    /// that target are tried; otherwise every registered identifier runs.
    /// Exactly one positive verdict names the format; zero or several fail.
    pub fn sniff(
        &self,
        fh: &mut ReadHandle<'_>,
        target: Option<Target>,
    ) -> Result<String, SniffError> {
        fh.rewind_to_start()?;

        let mut matches: Vec<String> = Vec::new();
        for (format, identifier) in self.identifier_iter() {
            if let Some(t) = target {
                if !self.has_target(format, t) {
                    continue;
                }
            }
            let verdict = identifier(fh)?;
            trace!("sniff '{format}': {verdict}");
            // Rewind unconditionally: the next identifier (and the eventual
            // reader) must observe the stream from the start.
            fh.rewind_to_start()?;
            if verdict {
                matches.push(format.clone());
            }
        }

        match matches.len() {
            0 => Err(SniffError::NoMatch {
                input: fh.describe(),
            }),
            1 => Ok(matches.remove(0)),
            _ => {
                matches.sort();
                Err(SniffError::Ambiguous {
                    candidates: matches,
                })
            }
        }
    }
}

/// Guess the format of `source`, restricted to `target` when given.
///
/// A path source is opened and closed here; a borrowed stream is rewound but
/// never closed.
pub fn guess_format_with(
    registry: &Registry,
    source: Source<'_>,
    target: Option<Target>,
) -> Result<String, SniffError> {
    let mut fh = ReadHandle::acquire(source)?;
    registry.sniff(&mut fh, target)
}

/// [`guess_format_with`] against the process-wide registry.
pub fn guess_format(source: Source<'_>, target: Option<Target>) -> Result<String, SniffError> {
    guess_format_with(&registry::global_read(), source, target)
}
