use std::io;

use thiserror::Error;

use crate::codec::{CodecError, DetectError};
use crate::header::FormatError;
use crate::mode::ModeError;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Compression(#[from] CodecError),
    #[error(transparent)]
    Mode(#[from] ModeError),
    /// The payload source ended before `size` bytes were produced.  Output
    /// written so far is not rolled back.
    #[error("payload for {name:?} ended after {actual} of {expected} bytes")]
    ShortWrite { name: String, expected: u64, actual: u64 },
    #[error("archive handle is closed")]
    UseAfterClose,
    #[error("archive is open for {0}")]
    WrongDirection(&'static str),
    /// No member payload can be read right now: nothing is pending, the
    /// payload was already handed out, or a different member was asked for.
    #[error("payload of {0:?} is not available (streaming archives are read once, in order)")]
    PayloadUnavailable(String),
    #[error("direct mode requires a seekable stream; use a \"|\" mode for pipes")]
    NotSeekable,
    #[error("archive was opened from a stream and cannot be read a second time")]
    NotRestartable,
    #[error("IO error: {0}")]
    Io(io::Error),
}

/// Decoders raise codec failures through `io::Read`; unwrap them back into
/// [`ArchiveError::Compression`] so callers see the codec diagnostic.
impl From<io::Error> for ArchiveError {
    fn from(err: io::Error) -> Self {
        if !err.get_ref().is_some_and(|inner| inner.is::<CodecError>()) {
            return ArchiveError::Io(err);
        }
        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<CodecError>()) {
            Some(Ok(codec))  => ArchiveError::Compression(*codec),
            Some(Err(inner)) => ArchiveError::Io(io::Error::new(kind, inner)),
            None             => ArchiveError::Io(kind.into()),
        }
    }
}

impl From<DetectError> for ArchiveError {
    fn from(err: DetectError) -> Self {
        match err {
            DetectError::Io(e)    => e.into(),
            DetectError::Codec(e) => ArchiveError::Compression(e),
        }
    }
}
