//! Scoped stream acquisition for the dispatch layer.
//!
//! Every public entry point accepts either a filesystem path or an
//! already-open stream.  Paths are opened here and **owned** by the resulting
//! handle: dropping the handle closes the file.  Caller-supplied streams are
//! **borrowed**: the handle never closes them, whatever happens downstream.
//!
//! The owned/borrowed distinction is the enum variant itself, so it cannot be
//! threaded incorrectly — there is no boolean to forget.
//!
//! Read handles require `BufRead + Seek` because sniffing rewinds the stream
//! between identifier trials.  Write handles only require `Write`.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Requirements on a caller-supplied readable stream.
///
/// Blanket-implemented; `Cursor<Vec<u8>>`, `BufReader<File>` and friends all
/// qualify automatically.
pub trait SourceStream: BufRead + Seek {}
impl<T: BufRead + Seek> SourceStream for T {}

/// Requirements on a caller-supplied writable stream.
pub trait SinkStream: Write {}
impl<T: Write> SinkStream for T {}

// ── Source / Sink ────────────────────────────────────────────────────────────

/// A readable input: a path to open, or a borrowed open stream.
pub enum Source<'a> {
    Path(&'a Path),
    Stream(&'a mut dyn SourceStream),
}

impl<'a> Source<'a> {
    pub fn stream<S: SourceStream>(s: &'a mut S) -> Self {
        Source::Stream(s)
    }
}

impl<'a> From<&'a Path> for Source<'a> {
    fn from(p: &'a Path) -> Self {
        Source::Path(p)
    }
}

impl<'a> From<&'a PathBuf> for Source<'a> {
    fn from(p: &'a PathBuf) -> Self {
        Source::Path(p.as_path())
    }
}

impl<'a> From<&'a str> for Source<'a> {
    fn from(p: &'a str) -> Self {
        Source::Path(Path::new(p))
    }
}

/// A writable output: a path to create, or a borrowed open stream.
pub enum Sink<'a> {
    Path(&'a Path),
    Stream(&'a mut dyn SinkStream),
}

impl<'a> Sink<'a> {
    pub fn stream<S: SinkStream>(s: &'a mut S) -> Self {
        Sink::Stream(s)
    }
}

impl<'a> From<&'a Path> for Sink<'a> {
    fn from(p: &'a Path) -> Self {
        Sink::Path(p)
    }
}

impl<'a> From<&'a PathBuf> for Sink<'a> {
    fn from(p: &'a PathBuf) -> Self {
        Sink::Path(p.as_path())
    }
}

impl<'a> From<&'a str> for Sink<'a> {
    fn from(p: &'a str) -> Self {
        Sink::Path(Path::new(p))
    }
}

/// How a path-backed [`WriteHandle`] is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Create the file, truncating any existing content.
    #[default]
    Truncate,
    /// Create the file if absent, append otherwise.
    Append,
}

// ── ReadHandle ───────────────────────────────────────────────────────────────

/// A readable stream with scoped ownership.
///
/// `Owned` closes the file on drop; `Borrowed` leaves the caller's stream
/// untouched.  Registered readers and identifiers receive this type and must
/// not assume either variant.
pub enum ReadHandle<'a> {
    Owned { file: BufReader<File>, path: PathBuf },
    Borrowed(&'a mut dyn SourceStream),
}

impl<'a> ReadHandle<'a> {
    /// Acquire a handle for the given source.  Paths are opened buffered.
    pub fn acquire(source: Source<'a>) -> io::Result<Self> {
        match source {
            Source::Path(p) => Ok(ReadHandle::Owned {
                file: BufReader::new(File::open(p)?),
                path: p.to_path_buf(),
            }),
            Source::Stream(s) => Ok(ReadHandle::Borrowed(s)),
        }
    }

    /// True when dropping this handle closes the underlying file.
    pub fn is_owned(&self) -> bool {
        matches!(self, ReadHandle::Owned { .. })
    }

    /// Human-readable description of the source, for error messages.
    pub fn describe(&self) -> String {
        match self {
            ReadHandle::Owned { path, .. } => path.display().to_string(),
            ReadHandle::Borrowed(_) => "<stream>".to_string(),
        }
    }

    /// Rewind to the start of the stream.
    pub fn rewind_to_start(&mut self) -> io::Result<()> {
        self.seek(SeekFrom::Start(0)).map(|_| ())
    }
}

impl Read for ReadHandle<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ReadHandle::Owned { file, .. } => file.read(buf),
            ReadHandle::Borrowed(s) => s.read(buf),
        }
    }
}

impl BufRead for ReadHandle<'_> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        match self {
            ReadHandle::Owned { file, .. } => file.fill_buf(),
            ReadHandle::Borrowed(s) => s.fill_buf(),
        }
    }

    fn consume(&mut self, amt: usize) {
        match self {
            ReadHandle::Owned { file, .. } => file.consume(amt),
            ReadHandle::Borrowed(s) => s.consume(amt),
        }
    }
}

impl Seek for ReadHandle<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            ReadHandle::Owned { file, .. } => file.seek(pos),
            ReadHandle::Borrowed(s) => s.seek(pos),
        }
    }
}

// ── WriteHandle ──────────────────────────────────────────────────────────────

/// A writable stream with scoped ownership, mirroring [`ReadHandle`].
pub enum WriteHandle<'a> {
    Owned {
        file: BufWriter<File>,
        path: PathBuf,
        continued: bool,
    },
    Borrowed(&'a mut dyn SinkStream),
}

impl<'a> WriteHandle<'a> {
    /// Acquire a handle for the given sink.  Paths are opened buffered,
    /// truncating or appending per `mode`.
    pub fn acquire(sink: Sink<'a>, mode: WriteMode) -> io::Result<Self> {
        match sink {
            Sink::Path(p) => {
                let (file, continued) = match mode {
                    WriteMode::Truncate => (File::create(p)?, false),
                    WriteMode::Append => {
                        let file = OpenOptions::new().create(true).append(true).open(p)?;
                        // Appending to a fresh or empty file is not a
                        // continuation; the writer still owns the preamble.
                        let continued = file.metadata()?.len() > 0;
                        (file, continued)
                    }
                };
                Ok(WriteHandle::Owned {
                    file: BufWriter::new(file),
                    path: p.to_path_buf(),
                    continued,
                })
            }
            Sink::Stream(s) => Ok(WriteHandle::Borrowed(s)),
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, WriteHandle::Owned { .. })
    }

    /// True when this handle appends to existing content, so the writer must
    /// not emit a stream preamble (magic, header line) again.  Borrowed
    /// streams are never a continuation: their position is the caller's.
    pub fn is_continuation(&self) -> bool {
        matches!(self, WriteHandle::Owned { continued: true, .. })
    }

    /// Human-readable description of the destination, for error messages.
    pub fn describe(&self) -> String {
        match self {
            WriteHandle::Owned { path, .. } => path.display().to_string(),
            WriteHandle::Borrowed(_) => "<stream>".to_string(),
        }
    }

    /// Flush (owned handles) and release the stream.
    ///
    /// Borrowed streams are left exactly as the writer left them — flushing a
    /// caller-owned stream is the caller's decision.
    pub fn finish(self) -> io::Result<()> {
        match self {
            WriteHandle::Owned { mut file, .. } => file.flush(),
            WriteHandle::Borrowed(_) => Ok(()),
        }
    }
}

impl Write for WriteHandle<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            WriteHandle::Owned { file, .. } => file.write(buf),
            WriteHandle::Borrowed(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            WriteHandle::Owned { file, .. } => file.flush(),
            WriteHandle::Borrowed(s) => s.flush(),
        }
    }
}
