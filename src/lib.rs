pub mod dispatch;
pub mod extras;
pub mod formats;
pub mod registry;
pub mod sniff;
pub mod stream;

pub use dispatch::{read, read_records, write, write_records, ReadError, Records, WriteError};
pub use extras::Extras;
pub use registry::{FormatError, Record, RecordIter, Registry, RegistryError, Target};
pub use sniff::{guess_format, SniffError};
pub use stream::{ReadHandle, Sink, Source, WriteHandle, WriteMode};
