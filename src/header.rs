//! newc member header: layout, parsing, rendering and padding rules.
//!
//! # Layout
//! A record is a 110-byte ASCII header, the NUL-terminated name, padding up
//! to a 4-byte boundary (measured from the header start), then `filesize`
//! payload bytes padded to a 4-byte boundary (measured from the payload
//! start).
//!
//! ```text
//! offset  len  field
//! 0       6    magic "070701"
//! 6       8    inode        54      8    filesize
//! 14      8    mode         62      8    devmajor
//! 22      8    uid          70      8    devminor
//! 30      8    gid          78      8    rdevmajor
//! 38      8    nlink        86      8    rdevminor
//! 46      8    mtime        94      8    namesize
//!                           102     8    checksum
//! ```
//!
//! Nothing in this module performs I/O; the engine in `io_stream` feeds it
//! byte slices and owns the stream position.

use thiserror::Error;

pub const MAGIC:       &[u8; 6] = b"070701";
pub const HEADER_LEN:  usize    = 110;
pub const TRAILER_NAME: &[u8]   = b"TRAILER!!!";
/// Records and payloads are aligned to this many bytes.
pub const ALIGNMENT:   u64      = 4;

/// Largest value an 8-digit hex field can carry.
const FIELD_MAX: u64 = u32::MAX as u64;

const FIELD_NAMES: [&str; 13] = [
    "inode", "mode", "uid", "gid", "nlink", "mtime", "filesize",
    "devmajor", "devminor", "rdevmajor", "rdevminor", "namesize", "checksum",
];

// ── Mode bits ────────────────────────────────────────────────────────────────

pub const S_IFMT:   u32 = 0o170000;
pub const S_IFSOCK: u32 = 0o140000;
pub const S_IFLNK:  u32 = 0o120000;
pub const S_IFREG:  u32 = 0o100000;
pub const S_IFBLK:  u32 = 0o060000;
pub const S_IFDIR:  u32 = 0o040000;
pub const S_IFCHR:  u32 = 0o020000;
pub const S_IFIFO:  u32 = 0o010000;

/// Permission, setuid/setgid and sticky bits.
pub const PERM_MASK: u32 = 0o7777;

/// The closed set of member types a newc `mode` can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
}

impl FileType {
    /// Decode the `S_IFMT` bits.  `None` for the trailer (mode 0) and for
    /// type bits outside the closed set.
    pub fn from_mode(mode: u32) -> Option<Self> {
        match mode & S_IFMT {
            S_IFREG  => Some(FileType::Regular),
            S_IFDIR  => Some(FileType::Directory),
            S_IFLNK  => Some(FileType::Symlink),
            S_IFCHR  => Some(FileType::CharDevice),
            S_IFBLK  => Some(FileType::BlockDevice),
            S_IFIFO  => Some(FileType::Fifo),
            S_IFSOCK => Some(FileType::Socket),
            _        => None,
        }
    }

    pub fn mode_bits(self) -> u32 {
        match self {
            FileType::Regular     => S_IFREG,
            FileType::Directory   => S_IFDIR,
            FileType::Symlink     => S_IFLNK,
            FileType::CharDevice  => S_IFCHR,
            FileType::BlockDevice => S_IFBLK,
            FileType::Fifo        => S_IFIFO,
            FileType::Socket      => S_IFSOCK,
        }
    }

    /// Single-character tag as printed by `ls -l`.
    pub fn tag(self) -> char {
        match self {
            FileType::Regular     => '-',
            FileType::Directory   => 'd',
            FileType::Symlink     => 'l',
            FileType::CharDevice  => 'c',
            FileType::BlockDevice => 'b',
            FileType::Fifo        => 'p',
            FileType::Socket      => 's',
        }
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("bad magic {found:?}, expected \"070701\" (only newc archives are supported)")]
    BadMagic { found: String },
    #[error("field `{field}` is not an 8-digit hex number: {value:?}")]
    InvalidHex { field: &'static str, value: String },
    #[error("namesize is zero; a name must at least hold its NUL terminator")]
    EmptyName,
    #[error("name is not NUL-terminated")]
    NameNotTerminated,
    #[error("name contains an embedded NUL byte")]
    EmbeddedNul,
    #[error("namesize {size} exceeds the limit of {limit} bytes")]
    NameTooLarge { size: u64, limit: u32 },
    #[error("filesize {size} exceeds the limit of {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },
    #[error("field `{field}` value {value} does not fit in 8 hex digits")]
    FieldOverflow { field: &'static str, value: u64 },
    #[error("archive truncated at offset {offset}")]
    Truncated { offset: u64 },
}

// ── Limits ───────────────────────────────────────────────────────────────────

/// Ceilings applied to untrusted headers before anything is allocated from
/// their declared sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderLimits {
    /// Maximum `namesize`, terminator included.
    pub max_name_size: u32,
    /// Maximum `filesize`.
    pub max_file_size: u64,
}

impl Default for HeaderLimits {
    fn default() -> Self {
        Self {
            max_name_size: 64 * 1024,
            max_file_size: FIELD_MAX,
        }
    }
}

impl HeaderLimits {
    pub fn check(&self, raw: &RawHeader) -> Result<(), FormatError> {
        if raw.namesize == 0 {
            return Err(FormatError::EmptyName);
        }
        if raw.namesize > self.max_name_size {
            return Err(FormatError::NameTooLarge {
                size:  raw.namesize as u64,
                limit: self.max_name_size,
            });
        }
        if raw.filesize as u64 > self.max_file_size {
            return Err(FormatError::FileTooLarge {
                size:  raw.filesize as u64,
                limit: self.max_file_size,
            });
        }
        Ok(())
    }
}

// ── Raw header ───────────────────────────────────────────────────────────────

/// The 13 numeric fields of a header exactly as stored on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawHeader {
    pub inode:     u32,
    pub mode:      u32,
    pub uid:       u32,
    pub gid:       u32,
    pub nlink:     u32,
    pub mtime:     u32,
    pub filesize:  u32,
    pub devmajor:  u32,
    pub devminor:  u32,
    pub rdevmajor: u32,
    pub rdevminor: u32,
    pub namesize:  u32,
    pub checksum:  u32,
}

impl RawHeader {
    /// Validate the magic and decode the hex fields of a 110-byte header.
    pub fn parse(buf: &[u8; HEADER_LEN]) -> Result<Self, FormatError> {
        if &buf[..6] != MAGIC {
            return Err(FormatError::BadMagic {
                found: String::from_utf8_lossy(&buf[..6]).into_owned(),
            });
        }
        let mut fields = [0u32; 13];
        for (i, field) in fields.iter_mut().enumerate() {
            let start = 6 + i * 8;
            *field = parse_hex(&buf[start..start + 8], FIELD_NAMES[i])?;
        }
        let [inode, mode, uid, gid, nlink, mtime, filesize,
             devmajor, devminor, rdevmajor, rdevminor, namesize, checksum] = fields;
        Ok(Self {
            inode, mode, uid, gid, nlink, mtime, filesize,
            devmajor, devminor, rdevmajor, rdevminor, namesize, checksum,
        })
    }

    /// Bytes of name padding following a header with this `namesize`.
    pub fn name_padding(&self) -> u64 {
        pad_len(HEADER_LEN as u64 + self.namesize as u64)
    }

    pub fn into_member(self, name: Vec<u8>) -> Member {
        Member {
            name,
            inode:     self.inode,
            mode:      self.mode,
            uid:       self.uid,
            gid:       self.gid,
            nlink:     self.nlink,
            mtime:     self.mtime as u64,
            size:      self.filesize as u64,
            devmajor:  self.devmajor,
            devminor:  self.devminor,
            rdevmajor: self.rdevmajor,
            rdevminor: self.rdevminor,
            checksum:  self.checksum,
        }
    }
}

fn parse_hex(field: &[u8], name: &'static str) -> Result<u32, FormatError> {
    let mut value = 0u32;
    for &b in field {
        let digit = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            _ => {
                return Err(FormatError::InvalidHex {
                    field: name,
                    value: String::from_utf8_lossy(field).into_owned(),
                })
            }
        };
        value = (value << 4) | digit as u32;
    }
    Ok(value)
}

/// Extract the name from its `namesize` bytes (terminator included).
pub fn parse_name(buf: &[u8]) -> Result<Vec<u8>, FormatError> {
    match buf.split_last() {
        None                => Err(FormatError::EmptyName),
        Some((&0, name))    => Ok(name.iter().take_while(|&&b| b != 0).copied().collect()),
        Some(_)             => Err(FormatError::NameNotTerminated),
    }
}

/// Bytes needed after `len` bytes to reach the next 4-byte boundary.
#[inline]
pub fn pad_len(len: u64) -> u64 {
    (ALIGNMENT - len % ALIGNMENT) % ALIGNMENT
}

// ── Member ───────────────────────────────────────────────────────────────────

/// Metadata of one archive entry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Member {
    pub name:      Vec<u8>,
    pub inode:     u32,
    /// File-type tag plus permission bits.
    pub mode:      u32,
    pub uid:       u32,
    pub gid:       u32,
    pub nlink:     u32,
    pub mtime:     u64,
    pub size:      u64,
    pub devmajor:  u32,
    pub devminor:  u32,
    pub rdevmajor: u32,
    pub rdevminor: u32,
    /// Unused by newc; carried through unchanged.
    pub checksum:  u32,
}

impl Member {
    pub fn new(name: impl Into<Vec<u8>>, file_type: FileType, permissions: u32) -> Self {
        Self {
            name:  name.into(),
            mode:  file_type.mode_bits() | (permissions & PERM_MASK),
            nlink: if file_type == FileType::Directory { 2 } else { 1 },
            ..Self::default()
        }
    }

    /// The end-of-archive sentinel.
    pub fn trailer() -> Self {
        Self {
            name:  TRAILER_NAME.to_vec(),
            nlink: 1,
            ..Self::default()
        }
    }

    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }

    pub fn file_type(&self) -> Option<FileType> { FileType::from_mode(self.mode) }
    pub fn permissions(&self) -> u32            { self.mode & PERM_MASK }

    pub fn is_file(&self)         -> bool { self.file_type() == Some(FileType::Regular) }
    pub fn is_dir(&self)          -> bool { self.file_type() == Some(FileType::Directory) }
    pub fn is_symlink(&self)      -> bool { self.file_type() == Some(FileType::Symlink) }
    pub fn is_char_device(&self)  -> bool { self.file_type() == Some(FileType::CharDevice) }
    pub fn is_block_device(&self) -> bool { self.file_type() == Some(FileType::BlockDevice) }
    pub fn is_fifo(&self)         -> bool { self.file_type() == Some(FileType::Fifo) }
    pub fn is_socket(&self)       -> bool { self.file_type() == Some(FileType::Socket) }

    pub fn is_trailer(&self) -> bool {
        self.name == TRAILER_NAME && self.size == 0
    }

    /// Total encoded length of header, name and name padding.
    pub fn header_len(&self) -> u64 {
        let raw = HEADER_LEN as u64 + self.name.len() as u64 + 1;
        raw + pad_len(raw)
    }

    /// Render the header, NUL-terminated name and name padding.
    pub fn encode(&self) -> Result<Vec<u8>, FormatError> {
        if self.name.contains(&0) {
            return Err(FormatError::EmbeddedNul);
        }
        let namesize = self.name.len() as u64 + 1;
        if namesize > FIELD_MAX {
            return Err(FormatError::FieldOverflow { field: "namesize", value: namesize });
        }
        let size  = fit_field("filesize", self.size)?;
        let mtime = fit_field("mtime", self.mtime)?;

        let fields = [
            self.inode, self.mode, self.uid, self.gid, self.nlink, mtime, size,
            self.devmajor, self.devminor, self.rdevmajor, self.rdevminor,
            namesize as u32, self.checksum,
        ];

        let mut out = Vec::with_capacity(self.header_len() as usize);
        out.extend_from_slice(MAGIC);
        for field in fields {
            out.extend_from_slice(format!("{field:08x}").as_bytes());
        }
        out.extend_from_slice(&self.name);
        out.push(0);
        out.resize(out.len() + pad_len(out.len() as u64) as usize, 0);
        Ok(out)
    }
}

fn fit_field(field: &'static str, value: u64) -> Result<u32, FormatError> {
    u32::try_from(value).map_err(|_| FormatError::FieldOverflow { field, value })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(member: &Member) -> [u8; HEADER_LEN] {
        member.encode().unwrap()[..HEADER_LEN].try_into().unwrap()
    }

    #[test]
    fn encodes_known_layout() {
        let member = Member {
            inode: 0x1234,
            uid:   1000,
            gid:   1000,
            mtime: 0x5f5e_1000,
            size:  5,
            ..Member::new("hello", FileType::Regular, 0o644)
        };
        let bytes = member.encode().unwrap();
        assert_eq!(
            &bytes[..HEADER_LEN],
            &b"070701\
               00001234000081a4000003e8000003e8000000015f5e100000000005\
               000000000000000000000000000000000000000600000000"[..]
        );
        assert_eq!(&bytes[HEADER_LEN..HEADER_LEN + 6], b"hello\0");
        // 110 + 6 = 116, already aligned.
        assert_eq!(bytes.len(), 116);
    }

    #[test]
    fn name_padding_reaches_boundary() {
        for len in 0..12 {
            let member = Member::new(vec![b'x'; len + 1], FileType::Regular, 0o600);
            let bytes = member.encode().unwrap();
            assert_eq!(bytes.len() % 4, 0, "name length {}", len + 1);
            assert_eq!(bytes.len() as u64, member.header_len());
        }
    }

    #[test]
    fn parse_reads_back_fields() {
        let member = Member {
            rdevmajor: 8,
            rdevminor: 1,
            ..Member::new("dev/sda1", FileType::BlockDevice, 0o660)
        };
        let raw = RawHeader::parse(&header_bytes(&member)).unwrap();
        assert_eq!(raw.namesize, 9);
        assert_eq!(raw.rdevmajor, 8);
        assert_eq!(raw.rdevminor, 1);
        assert_eq!(raw.into_member(b"dev/sda1".to_vec()), member);
    }

    #[test]
    fn parse_accepts_uppercase_hex() {
        let mut buf = header_bytes(&Member::new("a", FileType::Regular, 0o644));
        buf[14..22].copy_from_slice(b"000081A4");
        assert_eq!(RawHeader::parse(&buf).unwrap().mode, 0o100644);
    }

    #[test]
    fn rejects_other_cpio_variants() {
        let mut buf = header_bytes(&Member::new("a", FileType::Regular, 0o644));
        buf[..6].copy_from_slice(b"070702");
        assert!(matches!(RawHeader::parse(&buf), Err(FormatError::BadMagic { .. })));
        buf[..6].copy_from_slice(b"070707");
        assert!(matches!(RawHeader::parse(&buf), Err(FormatError::BadMagic { .. })));
    }

    #[test]
    fn rejects_non_hex_in_every_field() {
        let good = header_bytes(&Member::new("a", FileType::Regular, 0o644));
        for (i, name) in FIELD_NAMES.iter().enumerate() {
            let mut buf = good;
            buf[6 + i * 8 + 3] = b'g';
            match RawHeader::parse(&buf) {
                Err(FormatError::InvalidHex { field, .. }) => assert_eq!(field, *name),
                other => panic!("field {name}: unexpected {other:?}"),
            }
        }
        let mut buf = good;
        buf[6] = b'+';
        assert!(matches!(RawHeader::parse(&buf), Err(FormatError::InvalidHex { .. })));
    }

    #[test]
    fn limits_reject_hostile_sizes() {
        let limits = HeaderLimits { max_name_size: 256, max_file_size: 1024 };
        let mut raw = RawHeader { namesize: 10, filesize: 10, ..RawHeader::default() };
        assert!(limits.check(&raw).is_ok());

        raw.namesize = 0;
        assert!(matches!(limits.check(&raw), Err(FormatError::EmptyName)));
        raw.namesize = 0xffff_ffff;
        assert!(matches!(limits.check(&raw), Err(FormatError::NameTooLarge { .. })));
        raw.namesize = 10;
        raw.filesize = 4096;
        assert!(matches!(limits.check(&raw), Err(FormatError::FileTooLarge { .. })));
    }

    #[test]
    fn name_parsing() {
        assert_eq!(parse_name(b"abc\0").unwrap(), b"abc");
        assert_eq!(parse_name(b"\0").unwrap(), b"");
        assert_eq!(parse_name(b"ab\0\0").unwrap(), b"ab");
        assert!(matches!(parse_name(b"abc"), Err(FormatError::NameNotTerminated)));
        assert!(matches!(parse_name(b""), Err(FormatError::EmptyName)));
    }

    #[test]
    fn encode_rejects_out_of_range_fields() {
        let member = Member { size: 1 << 32, ..Member::new("big", FileType::Regular, 0o644) };
        assert!(matches!(
            member.encode(),
            Err(FormatError::FieldOverflow { field: "filesize", .. })
        ));
        let member = Member { mtime: u64::MAX, ..Member::new("old", FileType::Regular, 0o644) };
        assert!(matches!(
            member.encode(),
            Err(FormatError::FieldOverflow { field: "mtime", .. })
        ));
        let member = Member::new(&b"a\0b"[..], FileType::Regular, 0o644);
        assert!(matches!(member.encode(), Err(FormatError::EmbeddedNul)));
    }

    #[test]
    fn trailer_shape() {
        let trailer = Member::trailer();
        assert!(trailer.is_trailer());
        assert_eq!(trailer.nlink, 1);
        assert_eq!(trailer.file_type(), None);
        let bytes = trailer.encode().unwrap();
        // 110 + 11 = 121, padded to 124.
        assert_eq!(bytes.len(), 124);
        assert_eq!(&bytes[HEADER_LEN..HEADER_LEN + 11], b"TRAILER!!!\0");
    }

    #[test]
    fn type_predicates_follow_mode() {
        let cases = [
            (FileType::Regular, 0o100000),
            (FileType::Directory, 0o040000),
            (FileType::Symlink, 0o120000),
            (FileType::CharDevice, 0o020000),
            (FileType::BlockDevice, 0o060000),
            (FileType::Fifo, 0o010000),
            (FileType::Socket, 0o140000),
        ];
        for (ft, bits) in cases {
            let member = Member::new("x", ft, 0o4755);
            assert_eq!(member.mode, bits | 0o4755);
            assert_eq!(member.file_type(), Some(ft));
            assert_eq!(member.permissions(), 0o4755);
        }
        assert!(Member::new("x", FileType::Fifo, 0).is_fifo());
        assert!(!Member::new("x", FileType::Fifo, 0).is_file());
    }

    #[test]
    fn pad_len_values() {
        assert_eq!(pad_len(0), 0);
        assert_eq!(pad_len(1), 3);
        assert_eq!(pad_len(2), 2);
        assert_eq!(pad_len(3), 1);
        assert_eq!(pad_len(10491), 1);
    }
}
