//! Mode strings: `mode := ("r" | "w") ("|" ("" | "*" | "gz" | "bz2" | "xz"))?`
//!
//! Without `|` the archive is opened in direct (seekable, uncompressed)
//! mode.  Any `|` forces single-pass streaming, even with an empty codec
//! token.  `*` asks for auto-detection and is only meaningful when reading.
//!
//! The parsed [`Mode`] is validated once at open time; nothing downstream
//! inspects the string again.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::codec::CodecId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
}

/// Which codec wraps the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compression {
    Codec(CodecId),
    /// Resolve from the stream's magic bytes (read only).
    Auto,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ModeError {
    #[error("unrecognized mode {0:?}")]
    Unknown(String),
    #[error("mode {0:?}: auto-detected compression is only valid for reading")]
    AmbiguousCompression(String),
}

/// Parsed mode descriptor.  Fields are private so the `Auto`-only-on-read
/// rule cannot be bypassed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mode {
    direction:   Direction,
    streaming:   bool,
    compression: Compression,
}

impl Mode {
    pub fn parse(s: &str) -> Result<Self, ModeError> {
        let (head, tail) = match s.split_once('|') {
            Some((head, tail)) => (head, Some(tail)),
            None               => (s, None),
        };
        let direction = match head {
            "r" => Direction::Read,
            "w" => Direction::Write,
            _   => return Err(ModeError::Unknown(s.to_owned())),
        };
        let Some(token) = tail else {
            return Ok(Self::direct(direction));
        };
        let compression = match token {
            "*" if direction == Direction::Write => {
                return Err(ModeError::AmbiguousCompression(s.to_owned()))
            }
            "*" => Compression::Auto,
            other => match CodecId::from_name(other) {
                Some(codec) => Compression::Codec(codec),
                None        => return Err(ModeError::Unknown(s.to_owned())),
            },
        };
        Ok(Self { direction, streaming: true, compression })
    }

    /// Seekable, uncompressed.
    pub fn direct(direction: Direction) -> Self {
        Self { direction, streaming: false, compression: Compression::Codec(CodecId::None) }
    }

    /// Single pass through `codec`.
    pub fn streaming(direction: Direction, codec: CodecId) -> Self {
        Self { direction, streaming: true, compression: Compression::Codec(codec) }
    }

    pub fn direction(&self)   -> Direction   { self.direction }
    pub fn is_streaming(&self) -> bool       { self.streaming }
    pub fn compression(&self) -> Compression { self.compression }
    pub fn is_read(&self)     -> bool        { self.direction == Direction::Read }

    /// The codec, once known.  `None` while auto-detection is pending.
    pub fn codec(&self) -> Option<CodecId> {
        match self.compression {
            Compression::Codec(codec) => Some(codec),
            Compression::Auto         => None,
        }
    }

    /// Replace `Auto` with the detected codec, yielding the short form used
    /// to reopen the same stream (`"r|*"` resolved to gzip is `"r|gz"`).
    pub fn resolve(self, codec: CodecId) -> Self {
        match self.compression {
            Compression::Auto => Self { compression: Compression::Codec(codec), ..self },
            Compression::Codec(_) => self,
        }
    }
}

impl FromStr for Mode {
    type Err = ModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Mode::parse(s)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self.direction {
            Direction::Read  => "r",
            Direction::Write => "w",
        })?;
        if self.streaming {
            f.write_str("|")?;
            match self.compression {
                Compression::Auto         => f.write_str("*")?,
                Compression::Codec(codec) => f.write_str(codec.name())?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_forms() {
        let cases = [
            ("r",     Direction::Read,  false, Compression::Codec(CodecId::None)),
            ("r|",    Direction::Read,  true,  Compression::Codec(CodecId::None)),
            ("r|gz",  Direction::Read,  true,  Compression::Codec(CodecId::Gzip)),
            ("r|bz2", Direction::Read,  true,  Compression::Codec(CodecId::Bzip2)),
            ("r|xz",  Direction::Read,  true,  Compression::Codec(CodecId::Xz)),
            ("r|*",   Direction::Read,  true,  Compression::Auto),
            ("w",     Direction::Write, false, Compression::Codec(CodecId::None)),
            ("w|",    Direction::Write, true,  Compression::Codec(CodecId::None)),
            ("w|gz",  Direction::Write, true,  Compression::Codec(CodecId::Gzip)),
            ("w|bz2", Direction::Write, true,  Compression::Codec(CodecId::Bzip2)),
            ("w|xz",  Direction::Write, true,  Compression::Codec(CodecId::Xz)),
        ];
        for (s, direction, streaming, compression) in cases {
            let mode: Mode = s.parse().unwrap();
            assert_eq!(mode.direction(), direction, "{s}");
            assert_eq!(mode.is_streaming(), streaming, "{s}");
            assert_eq!(mode.compression(), compression, "{s}");
            assert_eq!(mode.to_string(), s);
        }
    }

    #[test]
    fn auto_on_write_is_rejected() {
        assert_eq!(
            Mode::parse("w|*"),
            Err(ModeError::AmbiguousCompression("w|*".into()))
        );
    }

    #[test]
    fn unknown_modes() {
        for s in ["", "a", "rw", "r:gz", "r|zstd", "w|gz|", "R", "r |gz", "r|GZ", "x|"] {
            assert!(matches!(Mode::parse(s), Err(ModeError::Unknown(_))), "{s:?}");
        }
    }

    #[test]
    fn resolve_auto() {
        let mode = Mode::parse("r|*").unwrap();
        assert_eq!(mode.codec(), None);
        let resolved = mode.resolve(CodecId::Gzip);
        assert_eq!(resolved.to_string(), "r|gz");
        assert_eq!(Mode::parse(&resolved.to_string()).unwrap(), resolved);
        // Explicit selectors are left alone.
        assert_eq!(Mode::parse("r|xz").unwrap().resolve(CodecId::Gzip).to_string(), "r|xz");
    }
}
