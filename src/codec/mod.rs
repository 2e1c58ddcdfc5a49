//! Compression filter: codec identities, magic-byte detection and the
//! streaming decoder/encoder pair layered under the cpio engine.
//!
//! # Detection
//! Auto-detection peeks at most [`MAX_MAGIC_LEN`] bytes through a
//! [`PeekReader`] and probes [`SIGNATURES`] in order.  The peeked bytes stay
//! in the push-back buffer, so the chosen decoder sees the full stream and
//! the source never has to seek.
//!
//! # Availability
//! Each codec sits behind a cargo feature (`gzip`, `bzip2`, `xz`).  Asking
//! for a codec that was compiled out yields [`CodecError::Unavailable`]; the
//! filter never falls back to passthrough.

use std::fmt;
use std::io::{self, Read, Write};

use log::trace;
use thiserror::Error;

/// Default compression level (the `-9` setting of the gzip and bzip2 tools).
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 9;

/// Ceiling on the decoded size of an xz stream.  lzma-rs only decodes whole
/// streams, so the entire uncompressed archive is held in memory.
pub const DEFAULT_XZ_MEMORY_LIMIT: u64 = 1 << 30;

// ── CodecId ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecId {
    None,
    Gzip,
    Bzip2,
    Xz,
}

impl CodecId {
    /// Short name as used in mode strings (`"r|gz"`).  Empty for `None`.
    pub fn name(self) -> &'static str {
        match self {
            CodecId::None  => "",
            CodecId::Gzip  => "gz",
            CodecId::Bzip2 => "bz2",
            CodecId::Xz    => "xz",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            ""    => Some(CodecId::None),
            "gz"  => Some(CodecId::Gzip),
            "bz2" => Some(CodecId::Bzip2),
            "xz"  => Some(CodecId::Xz),
            _     => None,
        }
    }

    /// Whether this build can encode and decode the codec.
    pub fn is_available(self) -> bool {
        match self {
            CodecId::None  => true,
            CodecId::Gzip  => cfg!(feature = "gzip"),
            CodecId::Bzip2 => cfg!(feature = "bzip2"),
            CodecId::Xz    => cfg!(feature = "xz"),
        }
    }
}

impl fmt::Display for CodecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecId::None => f.write_str("none"),
            other         => f.write_str(other.name()),
        }
    }
}

// ── Signatures ───────────────────────────────────────────────────────────────

pub const GZIP_MAGIC:  &[u8] = &[0x1f, 0x8b];
pub const BZIP2_MAGIC: &[u8] = b"BZh";
pub const XZ_MAGIC:    &[u8] = &[0xfd, b'7', b'z', b'X', b'Z', 0x00];

/// Longest signature in [`SIGNATURES`].
pub const MAX_MAGIC_LEN: usize = 6;

/// Probed in order; the first match wins.
pub const SIGNATURES: &[(&[u8], CodecId)] = &[
    (GZIP_MAGIC,  CodecId::Gzip),
    (BZIP2_MAGIC, CodecId::Bzip2),
    (XZ_MAGIC,    CodecId::Xz),
];

/// Resolve the codec wrapping a stream from its leading bytes.
pub fn detect(prefix: &[u8]) -> CodecId {
    SIGNATURES
        .iter()
        .find(|(magic, _)| prefix.starts_with(magic))
        .map(|&(_, codec)| codec)
        .unwrap_or(CodecId::None)
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone)]
pub enum CodecError {
    #[error("{codec} compression error: {message}")]
    Compression { codec: CodecId, message: String },
    #[error("{codec} decompression error: {message}")]
    Decompression { codec: CodecId, message: String },
    /// The codec was compiled out of this build.
    #[error("codec `{0}` is not available in this build")]
    Unavailable(CodecId),
}

impl CodecError {
    fn decompression(codec: CodecId, err: impl fmt::Display) -> Self {
        CodecError::Decompression { codec, message: err.to_string() }
    }

    fn compression(codec: CodecId, err: impl fmt::Display) -> Self {
        CodecError::Compression { codec, message: err.to_string() }
    }

    /// Carry the error through an `io::Read`/`io::Write` boundary.
    fn into_io(self) -> io::Error {
        io::Error::new(io::ErrorKind::InvalidData, self)
    }
}

// ── PeekReader ───────────────────────────────────────────────────────────────

/// A reader with a small push-back buffer, so a prefix can be inspected
/// without being consumed and without seeking.
pub struct PeekReader<R> {
    inner: R,
    buf:   Vec<u8>,
    pos:   usize,
}

impl<R: Read> PeekReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, buf: Vec::new(), pos: 0 }
    }

    /// Return up to `n` leading bytes.  Fewer are returned only at EOF.
    pub fn peek(&mut self, n: usize) -> io::Result<&[u8]> {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        let mut chunk = [0u8; MAX_MAGIC_LEN];
        while self.buf.len() < n {
            let want = (n - self.buf.len()).min(chunk.len());
            match self.inner.read(&mut chunk[..want]) {
                Ok(0)  => break,
                Ok(k)  => self.buf.extend_from_slice(&chunk[..k]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(&self.buf[..self.buf.len().min(n)])
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for PeekReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.pos < self.buf.len() {
            let n = (self.buf.len() - self.pos).min(out.len());
            out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
            self.pos += n;
            if self.pos == self.buf.len() {
                self.buf.clear();
                self.pos = 0;
            }
            return Ok(n);
        }
        self.inner.read(out)
    }
}

// ── Decoder ──────────────────────────────────────────────────────────────────

/// Read side of the filter.
pub enum Decoder<R: Read> {
    Plain(PeekReader<R>),
    #[cfg(feature = "gzip")]
    Gzip(flate2::read::MultiGzDecoder<PeekReader<R>>),
    #[cfg(feature = "bzip2")]
    Bzip2(bzip2::read::MultiBzDecoder<PeekReader<R>>),
    #[cfg(feature = "xz")]
    Xz(XzDecoder<PeekReader<R>>),
}

impl<R: Read> Decoder<R> {
    pub fn new(codec: CodecId, source: R) -> Result<Self, CodecError> {
        Self::with_peek(codec, PeekReader::new(source))
    }

    /// Like [`Decoder::new`], with an explicit ceiling for codecs that buffer
    /// the decoded stream (xz).
    pub fn with_memory_limit(codec: CodecId, source: R, limit: u64) -> Result<Self, CodecError> {
        Self::build(codec, PeekReader::new(source), limit)
    }

    /// Wrap a reader whose prefix may already sit in the push-back buffer.
    pub fn with_peek(codec: CodecId, source: PeekReader<R>) -> Result<Self, CodecError> {
        Self::build(codec, source, DEFAULT_XZ_MEMORY_LIMIT)
    }

    #[allow(unused_variables)]
    fn build(codec: CodecId, source: PeekReader<R>, limit: u64) -> Result<Self, CodecError> {
        match codec {
            CodecId::None  => Ok(Decoder::Plain(source)),
            #[cfg(feature = "gzip")]
            CodecId::Gzip  => Ok(Decoder::Gzip(flate2::read::MultiGzDecoder::new(source))),
            #[cfg(feature = "bzip2")]
            CodecId::Bzip2 => Ok(Decoder::Bzip2(bzip2::read::MultiBzDecoder::new(source))),
            #[cfg(feature = "xz")]
            CodecId::Xz    => Ok(Decoder::Xz(XzDecoder::new(source, limit))),
            #[allow(unreachable_patterns)]
            other          => Err(CodecError::Unavailable(other)),
        }
    }

    /// Peek at the stream, pick the codec from [`SIGNATURES`], and wrap.
    pub fn detect(source: R) -> Result<(Self, CodecId), DetectError> {
        Self::detect_with_memory_limit(source, DEFAULT_XZ_MEMORY_LIMIT)
    }

    pub fn detect_with_memory_limit(source: R, limit: u64) -> Result<(Self, CodecId), DetectError> {
        let mut peek = PeekReader::new(source);
        let codec = detect(peek.peek(MAX_MAGIC_LEN).map_err(DetectError::Io)?);
        trace!("detected compression: {codec}");
        let decoder = Self::build(codec, peek, limit).map_err(DetectError::Codec)?;
        Ok((decoder, codec))
    }

    pub fn codec(&self) -> CodecId {
        match self {
            Decoder::Plain(_) => CodecId::None,
            #[cfg(feature = "gzip")]
            Decoder::Gzip(_)  => CodecId::Gzip,
            #[cfg(feature = "bzip2")]
            Decoder::Bzip2(_) => CodecId::Bzip2,
            #[cfg(feature = "xz")]
            Decoder::Xz(_)    => CodecId::Xz,
        }
    }
}

/// Failure while sniffing the stream prefix.
#[derive(Error, Debug)]
pub enum DetectError {
    #[error(transparent)]
    Io(io::Error),
    #[error(transparent)]
    Codec(CodecError),
}

impl<R: Read> Read for Decoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Decoder::Plain(r) => r.read(buf),
            #[cfg(feature = "gzip")]
            Decoder::Gzip(r)  => r.read(buf).map_err(|e| codec_read_error(CodecId::Gzip, e)),
            #[cfg(feature = "bzip2")]
            Decoder::Bzip2(r) => r.read(buf).map_err(|e| codec_read_error(CodecId::Bzip2, e)),
            #[cfg(feature = "xz")]
            Decoder::Xz(r)    => r.read(buf),
        }
    }
}

#[allow(dead_code)]
fn codec_read_error(codec: CodecId, err: io::Error) -> io::Error {
    match err.kind() {
        io::ErrorKind::Interrupted => err,
        _ => CodecError::decompression(codec, err).into_io(),
    }
}

// ── Encoder ──────────────────────────────────────────────────────────────────

/// Write side of the filter.  [`Encoder::finish`] must be called to emit the
/// codec footer; dropping an unfinished encoder leaves a truncated stream.
pub enum Encoder<W: Write> {
    Plain(W),
    #[cfg(feature = "gzip")]
    Gzip(flate2::write::GzEncoder<W>),
    #[cfg(feature = "bzip2")]
    Bzip2(bzip2::write::BzEncoder<W>),
    #[cfg(feature = "xz")]
    Xz(XzEncoder<W>),
}

impl<W: Write> Encoder<W> {
    pub fn new(codec: CodecId, sink: W, level: u32) -> Result<Self, CodecError> {
        #[allow(unused_variables)]
        let level = level.clamp(1, 9);
        match codec {
            CodecId::None  => Ok(Encoder::Plain(sink)),
            #[cfg(feature = "gzip")]
            CodecId::Gzip  => Ok(Encoder::Gzip(flate2::write::GzEncoder::new(
                sink,
                flate2::Compression::new(level),
            ))),
            #[cfg(feature = "bzip2")]
            CodecId::Bzip2 => Ok(Encoder::Bzip2(bzip2::write::BzEncoder::new(
                sink,
                bzip2::Compression::new(level),
            ))),
            #[cfg(feature = "xz")]
            CodecId::Xz    => Ok(Encoder::Xz(XzEncoder::new(sink))),
            #[allow(unreachable_patterns)]
            other          => Err(CodecError::Unavailable(other)),
        }
    }

    pub fn codec(&self) -> CodecId {
        match self {
            Encoder::Plain(_) => CodecId::None,
            #[cfg(feature = "gzip")]
            Encoder::Gzip(_)  => CodecId::Gzip,
            #[cfg(feature = "bzip2")]
            Encoder::Bzip2(_) => CodecId::Bzip2,
            #[cfg(feature = "xz")]
            Encoder::Xz(_)    => CodecId::Xz,
        }
    }

    /// Flush and finalize the codec, then hand back the sink.
    pub fn finish(self) -> Result<W, CodecError> {
        let codec = self.codec();
        let sink: io::Result<W> = match self {
            Encoder::Plain(w) => Ok(w),
            #[cfg(feature = "gzip")]
            Encoder::Gzip(w)  => w.finish(),
            #[cfg(feature = "bzip2")]
            Encoder::Bzip2(w) => w.finish(),
            #[cfg(feature = "xz")]
            Encoder::Xz(w)    => w.finish(),
        };
        let mut sink = sink.map_err(|e| CodecError::compression(codec, e))?;
        sink.flush().map_err(|e| CodecError::compression(codec, e))?;
        Ok(sink)
    }
}

impl<W: Write> Write for Encoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Encoder::Plain(w) => w.write(buf),
            #[cfg(feature = "gzip")]
            Encoder::Gzip(w)  => w.write(buf),
            #[cfg(feature = "bzip2")]
            Encoder::Bzip2(w) => w.write(buf),
            #[cfg(feature = "xz")]
            Encoder::Xz(w)    => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Encoder::Plain(w) => w.flush(),
            #[cfg(feature = "gzip")]
            Encoder::Gzip(w)  => w.flush(),
            #[cfg(feature = "bzip2")]
            Encoder::Bzip2(w) => w.flush(),
            #[cfg(feature = "xz")]
            Encoder::Xz(w)    => w.flush(),
        }
    }
}

// ── xz ───────────────────────────────────────────────────────────────────────
//
// lzma-rs exposes xz as whole-stream functions over BufRead/Write.  The
// decoder runs on first read, bounded by `limit`, and serves the result from
// memory; the encoder collects the plain stream and compresses it in
// `finish`.  A failed decode keeps failing on every later read.

#[cfg(feature = "xz")]
pub struct XzDecoder<R> {
    source:  Option<R>,
    limit:   u64,
    decoded: io::Cursor<Vec<u8>>,
    failure: Option<CodecError>,
}

#[cfg(feature = "xz")]
impl<R: Read> XzDecoder<R> {
    fn new(source: R, limit: u64) -> Self {
        Self { source: Some(source), limit, decoded: io::Cursor::new(Vec::new()), failure: None }
    }
}

#[cfg(feature = "xz")]
impl<R: Read> Read for XzDecoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(failure) = &self.failure {
            return Err(failure.clone().into_io());
        }
        if let Some(source) = self.source.take() {
            let mut input = io::BufReader::new(source);
            let mut out = BoundedSink { buf: Vec::new(), limit: self.limit };
            if let Err(e) = lzma_rs::xz_decompress(&mut input, &mut out) {
                let failure = CodecError::decompression(CodecId::Xz, e);
                self.failure = Some(failure.clone());
                return Err(failure.into_io());
            }
            self.decoded = io::Cursor::new(out.buf);
        }
        self.decoded.read(buf)
    }
}

/// In-memory sink that refuses to grow past `limit` bytes.
#[cfg(feature = "xz")]
struct BoundedSink {
    buf:   Vec<u8>,
    limit: u64,
}

#[cfg(feature = "xz")]
impl Write for BoundedSink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.buf.len() as u64 + data.len() as u64 > self.limit {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("decoded stream exceeds the {} byte limit", self.limit),
            ));
        }
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(feature = "xz")]
pub struct XzEncoder<W> {
    sink:  W,
    plain: Vec<u8>,
}

#[cfg(feature = "xz")]
impl<W: Write> XzEncoder<W> {
    fn new(sink: W) -> Self {
        Self { sink, plain: Vec::new() }
    }

    fn finish(mut self) -> io::Result<W> {
        let mut input: &[u8] = &self.plain;
        lzma_rs::xz_compress(&mut input, &mut self.sink)?;
        Ok(self.sink)
    }
}

#[cfg(feature = "xz")]
impl<W: Write> Write for XzEncoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.plain.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(codec: CodecId, data: &[u8]) -> Vec<u8> {
        let mut enc = Encoder::new(codec, Vec::new(), DEFAULT_COMPRESSION_LEVEL).unwrap();
        enc.write_all(data).unwrap();
        let compressed = enc.finish().unwrap();

        let (mut dec, detected) = Decoder::detect(&compressed[..]).unwrap();
        assert_eq!(detected, codec);
        let mut out = Vec::new();
        dec.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn detect_by_signature() {
        assert_eq!(detect(&[0x1f, 0x8b, 0x08, 0x00]), CodecId::Gzip);
        assert_eq!(detect(b"BZh91AY&SY"), CodecId::Bzip2);
        assert_eq!(detect(&[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00]), CodecId::Xz);
        assert_eq!(detect(b"070701"), CodecId::None);
        assert_eq!(detect(b""), CodecId::None);
        // Partial signatures do not match.
        assert_eq!(detect(&[0xfd, 0x37, 0x7a]), CodecId::None);
        assert_eq!(detect(&[0x1f]), CodecId::None);
    }

    #[test]
    fn peek_does_not_consume() {
        let mut r = PeekReader::new(&b"abcdefgh"[..]);
        assert_eq!(r.peek(3).unwrap(), b"abc");
        assert_eq!(r.peek(6).unwrap(), b"abcdef");
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abcdefgh");
    }

    #[test]
    fn peek_short_stream() {
        let mut r = PeekReader::new(&b"ab"[..]);
        assert_eq!(r.peek(MAX_MAGIC_LEN).unwrap(), b"ab");
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"ab");
    }

    #[test]
    fn plain_passthrough() {
        assert_eq!(roundtrip(CodecId::None, b"070701 plain bytes"), b"070701 plain bytes");
    }

    #[cfg(feature = "gzip")]
    #[test]
    fn gzip_roundtrip() {
        let data = vec![7u8; 100_000];
        assert_eq!(roundtrip(CodecId::Gzip, &data), data);
    }

    #[cfg(feature = "bzip2")]
    #[test]
    fn bzip2_roundtrip() {
        let data: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
        assert_eq!(roundtrip(CodecId::Bzip2, &data), data);
    }

    #[cfg(feature = "xz")]
    #[test]
    fn xz_roundtrip_and_magic() {
        let data = b"xz framed payload".repeat(100);
        let mut enc = Encoder::new(CodecId::Xz, Vec::new(), DEFAULT_COMPRESSION_LEVEL).unwrap();
        enc.write_all(&data).unwrap();
        let compressed = enc.finish().unwrap();
        assert_eq!(&compressed[..6], XZ_MAGIC);
        assert_eq!(roundtrip(CodecId::Xz, &data), data);
    }

    #[cfg(feature = "gzip")]
    #[test]
    fn gzip_concatenated_members() {
        let mut stream = Vec::new();
        for part in [&b"first "[..], &b"second"[..]] {
            let mut enc = Encoder::new(CodecId::Gzip, Vec::new(), 6).unwrap();
            enc.write_all(part).unwrap();
            stream.extend(enc.finish().unwrap());
        }
        let mut out = Vec::new();
        Decoder::new(CodecId::Gzip, &stream[..]).unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"first second");
    }

    #[cfg(feature = "gzip")]
    #[test]
    fn corrupt_stream_is_a_codec_error() {
        let mut bogus = GZIP_MAGIC.to_vec();
        bogus.extend_from_slice(&[0xff; 32]);
        let mut dec = Decoder::new(CodecId::Gzip, &bogus[..]).unwrap();
        let err = dec.read_to_end(&mut Vec::new()).unwrap_err();
        let inner = err.into_inner().unwrap();
        assert!(matches!(
            inner.downcast_ref::<CodecError>(),
            Some(CodecError::Decompression { codec: CodecId::Gzip, .. })
        ));
    }

    #[cfg(feature = "xz")]
    #[test]
    fn xz_decoding_is_bounded() {
        let mut enc = Encoder::new(CodecId::Xz, Vec::new(), DEFAULT_COMPRESSION_LEVEL).unwrap();
        enc.write_all(&vec![0u8; 1 << 20]).unwrap();
        let compressed = enc.finish().unwrap();
        assert!(compressed.len() < 64 * 1024);

        let mut dec = Decoder::with_memory_limit(CodecId::Xz, &compressed[..], 64 * 1024).unwrap();
        let err = dec.read(&mut [0u8; 16]).unwrap_err();
        let inner = err.into_inner().unwrap();
        match inner.downcast_ref::<CodecError>() {
            Some(CodecError::Decompression { codec: CodecId::Xz, message }) => {
                assert!(message.contains("limit"), "{message}");
            }
            other => panic!("unexpected {other:?}"),
        }

        let mut out = Vec::new();
        Decoder::with_memory_limit(CodecId::Xz, &compressed[..], 1 << 20)
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out.len(), 1 << 20);
    }

    #[cfg(feature = "xz")]
    #[test]
    fn xz_failure_is_sticky() {
        let mut bogus = XZ_MAGIC.to_vec();
        bogus.extend_from_slice(&[0x55; 64]);
        let mut dec = Decoder::new(CodecId::Xz, &bogus[..]).unwrap();
        for _ in 0..3 {
            let err = dec.read(&mut [0u8; 16]).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidData);
            assert!(err.get_ref().is_some_and(|e| e.is::<CodecError>()));
        }
    }

    #[test]
    fn names_match_mode_tokens() {
        for codec in [CodecId::None, CodecId::Gzip, CodecId::Bzip2, CodecId::Xz] {
            assert_eq!(CodecId::from_name(codec.name()), Some(codec));
        }
        assert_eq!(CodecId::from_name("zstd"), None);
    }
}
