//! Streaming cpio engine: record reader and writer.
//!
//! # Reader
//! [`CpioReader`] walks an uncompressed newc stream strictly forward:
//!
//! ```text
//! Header ──next_member()──▶ Payload ──payload EOF / skip──▶ Header … ──▶ Trailer
//! ```
//!
//! `next_member()` yields each [`Member`], the trailer included, then `None`.
//! A member's payload is read through the borrowed [`PayloadReader`], which
//! is clamped to the declared size; once it hits EOF the payload padding is
//! consumed and the engine is back at a header boundary.  Unread payload is
//! skipped by the next `next_member()` call through [`Source::skip`], which
//! reads and discards on pipes and seeks in direct mode.
//!
//! # Writer
//! [`CpioWriter`] appends records: header, name, name padding, exactly
//! `size` payload bytes, payload padding.  `close()` appends the trailer
//! through the same path, pads to the record size and finalizes the codec.
//!
//! Both sides count the logical (uncompressed) offset; every header and
//! every payload ends on a 4-byte boundary of that offset.

use std::io::{self, Read, Seek, SeekFrom, Write};

use log::{debug, warn};

use crate::codec::{Decoder, Encoder};
use crate::error::ArchiveError;
use crate::header::{
    pad_len, parse_name, FormatError, HeaderLimits, Member, RawHeader, HEADER_LEN,
};

/// Default record size.  The finished stream is zero-padded to a multiple
/// of it, as the system `cpio` tool does.
pub const DEFAULT_RECORD_SIZE: u64 = 512;

const COPY_BUF_SIZE: usize = 64 * 1024;

// ── Source ───────────────────────────────────────────────────────────────────

/// A byte source the reader can move forward in without looking at the
/// skipped bytes.
pub trait Source: Read {
    /// Advance `n` bytes.  Returns how many were actually skipped, which is
    /// less than `n` only at end of stream.
    fn skip(&mut self, n: u64) -> io::Result<u64> {
        discard(self, n)
    }
}

/// Read and drop `n` bytes.
pub fn discard<R: Read + ?Sized>(reader: &mut R, n: u64) -> io::Result<u64> {
    io::copy(&mut (&mut *reader).take(n), &mut io::sink())
}

impl<R: Read> Source for Decoder<R> {}

impl Source for &[u8] {}

impl<S: Source + ?Sized> Source for Box<S> {
    fn skip(&mut self, n: u64) -> io::Result<u64> {
        (**self).skip(n)
    }
}

/// Direct-mode source: skipping is a relative seek.
pub struct Seekable<R>(pub R);

impl<R: Read> Read for Seekable<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl<R: Read + Seek> Source for Seekable<R> {
    fn skip(&mut self, n: u64) -> io::Result<u64> {
        let delta = i64::try_from(n)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "skip too large"))?;
        self.0.seek(SeekFrom::Current(delta))?;
        Ok(n)
    }
}

// ── Reader ───────────────────────────────────────────────────────────────────

#[derive(Debug)]
enum ReadState {
    Header,
    Payload(Pending),
    Trailer,
}

#[derive(Debug)]
struct Pending {
    member:     Member,
    remaining:  u64,
    padding:    u64,
    handed_out: bool,
}

pub struct CpioReader<S> {
    source: S,
    limits: HeaderLimits,
    offset: u64,
    state:  ReadState,
}

impl<S: Source> CpioReader<S> {
    pub fn new(source: S) -> Self {
        Self::with_limits(source, HeaderLimits::default())
    }

    pub fn with_limits(source: S, limits: HeaderLimits) -> Self {
        Self { source, limits, offset: 0, state: ReadState::Header }
    }

    /// Logical offset in the uncompressed stream.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The member whose payload is next in the stream, if any.
    pub fn pending(&self) -> Option<&Member> {
        match &self.state {
            ReadState::Payload(p) => Some(&p.member),
            _ => None,
        }
    }

    pub fn reached_trailer(&self) -> bool {
        matches!(self.state, ReadState::Trailer)
    }

    /// Decode the next header.  Any unread payload of the previous member is
    /// skipped first.  Yields the trailer once, then `None`.
    pub fn next_member(&mut self) -> Result<Option<Member>, ArchiveError> {
        match std::mem::replace(&mut self.state, ReadState::Header) {
            ReadState::Trailer => {
                self.state = ReadState::Trailer;
                return Ok(None);
            }
            ReadState::Payload(p) => self.skip_forward(p.remaining + p.padding)?,
            ReadState::Header => {}
        }

        let header_start = self.offset;
        let mut buf = [0u8; HEADER_LEN];
        self.read_exact(&mut buf)?;
        let raw = RawHeader::parse(&buf)?;
        self.limits.check(&raw)?;

        let mut name = vec![0u8; raw.namesize as usize];
        self.read_exact(&mut name)?;
        let name = parse_name(&name)?;
        self.skip_forward(raw.name_padding())?;

        let member = raw.into_member(name);
        debug!(
            "member {:?} at offset {header_start}: mode {:o}, {} bytes",
            member.name_lossy(), member.mode, member.size
        );

        self.state = if member.is_trailer() {
            ReadState::Trailer
        } else {
            ReadState::Payload(Pending {
                member:     member.clone(),
                remaining:  member.size,
                padding:    pad_len(member.size),
                handed_out: false,
            })
        };
        Ok(Some(member))
    }

    /// Reader over the pending member's payload.  Handed out at most once
    /// per member.
    pub fn payload(&mut self) -> Result<PayloadReader<'_, S>, ArchiveError> {
        let unavailable = match &mut self.state {
            ReadState::Payload(p) if !p.handed_out => {
                p.handed_out = true;
                None
            }
            ReadState::Payload(p) => Some(p.member.name_lossy()),
            ReadState::Header | ReadState::Trailer => Some("<no pending member>".to_owned()),
        };
        match unavailable {
            None       => Ok(PayloadReader { engine: self }),
            Some(name) => Err(ArchiveError::PayloadUnavailable(name)),
        }
    }

    /// Drop whatever is left of the pending payload.
    pub fn skip_payload(&mut self) -> Result<(), ArchiveError> {
        if let ReadState::Payload(p) = &self.state {
            let rest = p.remaining + p.padding;
            self.state = ReadState::Header;
            self.skip_forward(rest)?;
        }
        Ok(())
    }

    /// Lazy iterator over the remaining members.  Stops after the first
    /// error.
    pub fn members(&mut self) -> Members<'_, S> {
        Members { engine: self, done: false }
    }

    pub fn into_inner(self) -> S {
        self.source
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), ArchiveError> {
        match self.source.read_exact(buf) {
            Ok(()) => {
                self.offset += buf.len() as u64;
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Err(FormatError::Truncated { offset: self.offset }.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn skip_forward(&mut self, n: u64) -> Result<(), ArchiveError> {
        if n == 0 {
            return Ok(());
        }
        let skipped = self.source.skip(n)?;
        self.offset += skipped;
        if skipped < n {
            return Err(FormatError::Truncated { offset: self.offset }.into());
        }
        Ok(())
    }

    /// Consume the padding after a fully read payload.
    fn finish_payload(&mut self) -> io::Result<()> {
        if let ReadState::Payload(p) = &self.state {
            let padding = p.padding;
            self.skip_forward(padding).map_err(|e| match e {
                ArchiveError::Io(e) => e,
                other => io::Error::new(io::ErrorKind::UnexpectedEof, other.to_string()),
            })?;
            self.state = ReadState::Header;
        }
        Ok(())
    }
}

/// Forward-only reader over exactly one member's payload.
pub struct PayloadReader<'a, S: Source> {
    engine: &'a mut CpioReader<S>,
}

impl<S: Source> PayloadReader<'_, S> {
    /// Bytes not yet read.
    pub fn remaining(&self) -> u64 {
        match &self.engine.state {
            ReadState::Payload(p) => p.remaining,
            _ => 0,
        }
    }

    /// Skip the rest of the payload.
    pub fn discard(self) -> Result<(), ArchiveError> {
        self.engine.skip_payload()
    }
}

impl<S: Source> Read for PayloadReader<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let engine = &mut *self.engine;
        let ReadState::Payload(p) = &mut engine.state else {
            return Ok(0);
        };
        if p.remaining == 0 {
            engine.finish_payload()?;
            return Ok(0);
        }
        if buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min(usize::try_from(p.remaining).unwrap_or(usize::MAX));
        let n = engine.source.read(&mut buf[..want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("payload of {:?} truncated", p.member.name_lossy()),
            ));
        }
        p.remaining -= n as u64;
        let done = p.remaining == 0;
        engine.offset += n as u64;
        if done {
            engine.finish_payload()?;
        }
        Ok(n)
    }
}

pub struct Members<'a, S> {
    engine: &'a mut CpioReader<S>,
    done:   bool,
}

impl<S: Source> Iterator for Members<'_, S> {
    type Item = Result<Member, ArchiveError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.engine.next_member() {
            Ok(Some(member)) => Some(Ok(member)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

// ── Writer ───────────────────────────────────────────────────────────────────

/// Sequential record writer.  Dropping it without [`CpioWriter::close`]
/// leaves an archive with no trailer and an unfinished codec stream.
pub struct CpioWriter<W: Write> {
    encoder:     Option<Encoder<W>>,
    offset:      u64,
    record_size: u64,
}

impl<W: Write> CpioWriter<W> {
    pub fn new(encoder: Encoder<W>) -> Self {
        Self::with_record_size(encoder, DEFAULT_RECORD_SIZE)
    }

    /// `record_size` of 0 or 1 disables end-of-archive padding.
    pub fn with_record_size(encoder: Encoder<W>, record_size: u64) -> Self {
        Self { encoder: Some(encoder), offset: 0, record_size }
    }

    /// Logical offset in the uncompressed stream.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn is_closed(&self) -> bool {
        self.encoder.is_none()
    }

    /// Append one record.  Exactly `member.size` bytes are taken from
    /// `payload`; a shorter source is fatal, a longer one is truncated with
    /// a warning.
    pub fn add_member<R: Read + ?Sized>(
        &mut self,
        member:  &Member,
        payload: &mut R,
    ) -> Result<(), ArchiveError> {
        let sink = self.encoder.as_mut().ok_or(ArchiveError::UseAfterClose)?;
        let header = member.encode()?;
        sink.write_all(&header)?;
        self.offset += header.len() as u64;

        let mut buf = vec![0u8; COPY_BUF_SIZE.min(member.size as usize).max(1)];
        let mut copied = 0u64;
        while copied < member.size {
            let want = buf.len().min((member.size - copied) as usize);
            let n = match payload.read(&mut buf[..want]) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            sink.write_all(&buf[..n])?;
            copied += n as u64;
        }
        self.offset += copied;
        if copied < member.size {
            return Err(ArchiveError::ShortWrite {
                name:     member.name_lossy(),
                expected: member.size,
                actual:   copied,
            });
        }
        if has_more(payload)? {
            warn!(
                "payload of {:?} is longer than its declared {} bytes; excess discarded",
                member.name_lossy(), member.size
            );
        }

        let padding = pad_len(member.size) as usize;
        sink.write_all(&[0u8; 4][..padding])?;
        self.offset += padding as u64;

        debug!("wrote {:?}: {} bytes, now at offset {}", member.name_lossy(), member.size, self.offset);
        Ok(())
    }

    /// Write the trailer, pad to the record size, finalize the codec and
    /// return the sink.
    pub fn close(&mut self) -> Result<W, ArchiveError> {
        if self.is_closed() {
            return Err(ArchiveError::UseAfterClose);
        }
        self.add_member(&Member::trailer(), &mut io::empty())?;
        let mut encoder = self.encoder.take().ok_or(ArchiveError::UseAfterClose)?;
        if self.record_size > 1 {
            let fill = (self.record_size - self.offset % self.record_size) % self.record_size;
            io::copy(&mut io::repeat(0).take(fill), &mut encoder)?;
            self.offset += fill;
        }
        debug!("archive closed at offset {}", self.offset);
        Ok(encoder.finish()?)
    }
}

impl<W: Write> Drop for CpioWriter<W> {
    fn drop(&mut self) {
        if self.encoder.is_some() {
            warn!("cpio writer dropped without close(); archive has no trailer");
        }
    }
}

fn has_more<R: Read + ?Sized>(payload: &mut R) -> io::Result<bool> {
    let mut probe = [0u8; 1];
    loop {
        match payload.read(&mut probe) {
            Ok(n) => return Ok(n > 0),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}
