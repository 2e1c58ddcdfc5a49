pub mod header;
pub mod codec;
pub mod mode;
pub mod error;
pub mod io_stream;
pub mod fs;
pub mod archive;
pub mod compat;

pub use header::{FileType, FormatError, HeaderLimits, Member};
pub use codec::{CodecError, CodecId};
pub use mode::{Mode, ModeError};
pub use error::ArchiveError;
pub use io_stream::{CpioReader, CpioWriter};
pub use archive::{ArchiveOptions, CpioFile};
pub use compat::{CompressionPreset, CpioFileCompat};
