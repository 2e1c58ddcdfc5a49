//! High-level [`CpioFile`] handle, the primary embedding surface.
//!
//! ```no_run
//! use cpiofile::archive::CpioFile;
//! use cpiofile::header::{FileType, Member};
//!
//! // Write
//! let mut ar = CpioFile::open("out.cpio.gz", "w|gz")?;
//! let mut member = Member::new("readme.txt", FileType::Regular, 0o644);
//! member.size = 13;
//! ar.add_member(&member, &mut &b"Hello, world!"[..])?;
//! ar.close()?;
//!
//! // Read, letting the codec be detected
//! let mut ar = CpioFile::open("out.cpio.gz", "r|*")?;
//! while let Some(member) = ar.next_member()? {
//!     println!("{}", member.name_lossy());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};

use log::debug;

use crate::codec::{
    CodecError, CodecId, Decoder, Encoder, DEFAULT_COMPRESSION_LEVEL, DEFAULT_XZ_MEMORY_LIMIT,
};
use crate::error::ArchiveError;
use crate::fs::{self as archive_fs, ExtractStats, FileSystem, HostFs};
use crate::header::{HeaderLimits, Member};
use crate::io_stream::{
    CpioReader, CpioWriter, Members, PayloadReader, Seekable, Source, DEFAULT_RECORD_SIZE,
};
use crate::mode::{Direction, Mode};

// ── ArchiveOptions ────────────────────────────────────────────────────────────

/// Configuration for [`CpioFile::open_with_options`] and friends.
#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    /// Ceilings applied to every decoded header.
    pub limits:            HeaderLimits,
    /// Passed to the compressor when writing (1..=9).
    pub compression_level: u32,
    /// The finished archive is zero-padded to a multiple of this.
    pub record_size:       u64,
    /// Largest decoded xz stream accepted when reading.
    pub xz_memory_limit:   u64,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            limits:            HeaderLimits::default(),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            record_size:       DEFAULT_RECORD_SIZE,
            xz_memory_limit:   DEFAULT_XZ_MEMORY_LIMIT,
        }
    }
}

// ── Handle state ──────────────────────────────────────────────────────────────

type BoxedReader = CpioReader<Box<dyn Source>>;
type BoxedWriter = CpioWriter<Box<dyn Write>>;

enum Origin {
    Path(PathBuf),
    Stream,
}

enum State {
    Read(BoxedReader),
    Write(BoxedWriter),
    Closed,
}

// ── CpioFile ──────────────────────────────────────────────────────────────────

pub struct CpioFile {
    origin:  Origin,
    mode:    Mode,
    options: ArchiveOptions,
    state:   State,
}

impl CpioFile {
    // ── Constructors ─────────────────────────────────────────────────────────

    pub fn open<P: AsRef<Path>>(path: P, mode: &str) -> Result<Self, ArchiveError> {
        Self::open_with_options(path, mode, ArchiveOptions::default())
    }

    pub fn open_with_options<P: AsRef<Path>>(
        path:    P,
        mode:    &str,
        options: ArchiveOptions,
    ) -> Result<Self, ArchiveError> {
        let path = path.as_ref().to_owned();
        let mode = Mode::parse(mode)?;
        let (state, mode) = match mode.direction() {
            Direction::Read => {
                let file = BufReader::new(File::open(&path)?);
                if mode.is_streaming() {
                    stream_reader(file, mode, &options)?
                } else {
                    (seekable_reader(file, &options), mode)
                }
            }
            Direction::Write => {
                writable_codec(mode)?;
                let file: Box<dyn Write> = Box::new(BufWriter::new(File::create(&path)?));
                (writer_state(file, mode, &options)?, mode)
            }
        };
        debug!("opened {} in mode {mode}", path.display());
        Ok(Self { origin: Origin::Path(path), mode, options, state })
    }

    /// Read from a non-seekable source.  Only `r|...` modes are accepted;
    /// direct mode fails with [`ArchiveError::NotSeekable`].
    pub fn from_reader<R: Read + 'static>(reader: R, mode: &str) -> Result<Self, ArchiveError> {
        let mode = Mode::parse(mode)?;
        if mode.direction() != Direction::Read {
            return Err(ArchiveError::WrongDirection("reading"));
        }
        if !mode.is_streaming() {
            return Err(ArchiveError::NotSeekable);
        }
        let options = ArchiveOptions::default();
        let (state, mode) = stream_reader(reader, mode, &options)?;
        Ok(Self { origin: Origin::Stream, mode, options, state })
    }

    /// Read from a seekable source in any read mode.
    pub fn from_seekable<R: Read + Seek + 'static>(reader: R, mode: &str) -> Result<Self, ArchiveError> {
        let mode = Mode::parse(mode)?;
        if mode.direction() != Direction::Read {
            return Err(ArchiveError::WrongDirection("reading"));
        }
        let options = ArchiveOptions::default();
        let (state, mode) = if mode.is_streaming() {
            stream_reader(reader, mode, &options)?
        } else {
            (seekable_reader(reader, &options), mode)
        };
        Ok(Self { origin: Origin::Stream, mode, options, state })
    }

    /// Write into any sink.  Writing never seeks, so `w` and `w|...` both
    /// work on pipes.
    pub fn from_writer<W: Write + 'static>(writer: W, mode: &str) -> Result<Self, ArchiveError> {
        let mode = Mode::parse(mode)?;
        if mode.direction() != Direction::Write {
            return Err(ArchiveError::WrongDirection("writing"));
        }
        let options = ArchiveOptions::default();
        let state = writer_state(Box::new(writer), mode, &options)?;
        Ok(Self { origin: Origin::Stream, mode, options, state })
    }

    // ── Metadata ─────────────────────────────────────────────────────────────

    /// The effective mode.  After `r|*` this names the detected codec.
    pub fn mode(&self) -> Mode { self.mode }

    pub fn path(&self) -> Option<&Path> {
        match &self.origin {
            Origin::Path(p) => Some(p),
            Origin::Stream  => None,
        }
    }

    pub fn is_closed(&self) -> bool { matches!(self.state, State::Closed) }

    fn reader(&mut self) -> Result<&mut BoxedReader, ArchiveError> {
        match &mut self.state {
            State::Read(r)  => Ok(r),
            State::Write(_) => Err(ArchiveError::WrongDirection("writing")),
            State::Closed   => Err(ArchiveError::UseAfterClose),
        }
    }

    fn writer(&mut self) -> Result<&mut BoxedWriter, ArchiveError> {
        match &mut self.state {
            State::Write(w) => Ok(w),
            State::Read(_)  => Err(ArchiveError::WrongDirection("reading")),
            State::Closed   => Err(ArchiveError::UseAfterClose),
        }
    }

    // ── Read ──────────────────────────────────────────────────────────────────

    /// Decode the next header; the trailer is returned once, then `None`.
    pub fn next_member(&mut self) -> Result<Option<Member>, ArchiveError> {
        self.reader()?.next_member()
    }

    pub fn members(&mut self) -> Result<Members<'_, Box<dyn Source>>, ArchiveError> {
        Ok(self.reader()?.members())
    }

    /// Payload of the member last returned by [`CpioFile::next_member`].
    pub fn payload(&mut self) -> Result<PayloadReader<'_, Box<dyn Source>>, ArchiveError> {
        self.reader()?.payload()
    }

    /// Payload of `member`, which must be the one whose data is next in the
    /// stream.
    pub fn extract_file(&mut self, member: &Member)
        -> Result<PayloadReader<'_, Box<dyn Source>>, ArchiveError>
    {
        let reader = self.reader()?;
        if reader.pending() != Some(member) {
            return Err(ArchiveError::PayloadUnavailable(member.name_lossy()));
        }
        reader.payload()
    }

    /// Extract every remaining member under `dest`.
    pub fn extract_all<P: AsRef<Path>>(&mut self, dest: P) -> Result<ExtractStats, ArchiveError> {
        self.extract_all_with(&HostFs, dest)
    }

    pub fn extract_all_with<F, P>(&mut self, fs: &F, dest: P) -> Result<ExtractStats, ArchiveError>
    where
        F: FileSystem + ?Sized,
        P: AsRef<Path>,
    {
        archive_fs::extract_all(self.reader()?, fs, dest.as_ref())
    }

    /// Start reading again from the first member by reopening the file.
    /// Handles built over a stream cannot do this.
    pub fn reopen(&mut self) -> Result<(), ArchiveError> {
        self.reader()?;
        let Origin::Path(path) = &self.origin else {
            return Err(ArchiveError::NotRestartable);
        };
        let file = BufReader::new(File::open(path)?);
        let (state, _) = if self.mode.is_streaming() {
            stream_reader(file, self.mode, &self.options)?
        } else {
            (seekable_reader(file, &self.options), self.mode)
        };
        debug!("reopened {}", path.display());
        self.state = state;
        Ok(())
    }

    // ── Write ─────────────────────────────────────────────────────────────────

    /// Append a record, taking exactly `member.size` bytes from `payload`.
    pub fn add_member<R: Read + ?Sized>(&mut self, member: &Member, payload: &mut R)
        -> Result<(), ArchiveError>
    {
        self.writer()?.add_member(member, payload)
    }

    /// Build a record for `path` from its metadata without writing it.
    pub fn member_from_path<P: AsRef<Path>>(&mut self, path: P, arcname: Option<&Path>)
        -> Result<Member, ArchiveError>
    {
        self.writer()?;
        Ok(archive_fs::member_from_path(&HostFs, path.as_ref(), arcname)?)
    }

    /// Append one filesystem entry, stored as `arcname` if given.
    pub fn add_path<P: AsRef<Path>>(&mut self, path: P, arcname: Option<&Path>)
        -> Result<Member, ArchiveError>
    {
        archive_fs::add_path(self.writer()?, &HostFs, path.as_ref(), arcname)
    }

    /// Append `root` and everything under it.  Returns the record count.
    pub fn add_tree<P: AsRef<Path>>(&mut self, root: P) -> Result<usize, ArchiveError> {
        self.add_tree_with(&HostFs, root)
    }

    pub fn add_tree_with<F, P>(&mut self, fs: &F, root: P) -> Result<usize, ArchiveError>
    where
        F: FileSystem + ?Sized,
        P: AsRef<Path>,
    {
        archive_fs::add_tree(self.writer()?, fs, root.as_ref())
    }

    // ── Close ─────────────────────────────────────────────────────────────────

    /// Finish the archive (writing) or release the source (reading).  Calling
    /// it again does nothing.
    pub fn close(&mut self) -> Result<(), ArchiveError> {
        match std::mem::replace(&mut self.state, State::Closed) {
            State::Write(mut writer) => {
                let mut sink = writer.close()?;
                sink.flush()?;
                debug!("closed archive after {} bytes", writer.offset());
            }
            State::Read(_) | State::Closed => {}
        }
        Ok(())
    }
}

fn seekable_reader<R: Read + Seek + 'static>(source: R, options: &ArchiveOptions) -> State {
    let source: Box<dyn Source> = Box::new(Seekable(source));
    State::Read(CpioReader::with_limits(source, options.limits))
}

/// Wrap `source` in the mode's decoder, detecting it for `r|*`.  Returns the
/// mode with the codec resolved.
fn stream_reader<R: Read + 'static>(
    source:  R,
    mode:    Mode,
    options: &ArchiveOptions,
) -> Result<(State, Mode), ArchiveError> {
    let (decoder, mode) = match mode.codec() {
        Some(codec) => (Decoder::with_memory_limit(codec, source, options.xz_memory_limit)?, mode),
        None => {
            let (decoder, codec) = Decoder::detect_with_memory_limit(source, options.xz_memory_limit)?;
            debug!("detected compression: {codec}");
            (decoder, mode.resolve(codec))
        }
    };
    let source: Box<dyn Source> = Box::new(decoder);
    Ok((State::Read(CpioReader::with_limits(source, options.limits)), mode))
}

/// The codec a write mode names, refused when it is ambiguous or compiled out.
fn writable_codec(mode: Mode) -> Result<CodecId, ArchiveError> {
    let codec = mode.codec().ok_or_else(|| ArchiveError::Mode(
        crate::mode::ModeError::AmbiguousCompression(mode.to_string()),
    ))?;
    if !codec.is_available() {
        return Err(CodecError::Unavailable(codec).into());
    }
    Ok(codec)
}

fn writer_state(sink: Box<dyn Write>, mode: Mode, options: &ArchiveOptions) -> Result<State, ArchiveError> {
    let codec = writable_codec(mode)?;
    let encoder = Encoder::new(codec, sink, options.compression_level)?;
    Ok(State::Write(CpioWriter::with_record_size(encoder, options.record_size)))
}
