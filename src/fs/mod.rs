//! Filesystem side of the archive: turning paths into records and records
//! back into files.
//!
//! Everything that touches real filesystem semantics (symlinks, device
//! nodes, permission and mtime restoration) goes through the narrow
//! [`FileSystem`] trait.  [`HostFs`] implements it for the running unix host.
//!
//! # Walking
//! [`add_tree`] visits the root, then its entries in lexicographic order,
//! depth first, using an explicit stack.  Symlinks are archived as links
//! and never followed.
//!
//! # Extraction
//! [`extract_all`] recreates members under a destination directory.
//! Directory permissions and mtimes are applied last, deepest first, so
//! creating children cannot disturb them.  Before anything is created, the
//! nearest existing ancestor of the target is resolved through any symlinks
//! and must still lie under the destination.  Regular files sharing an
//! inode (`nlink > 1`) are restored as hard links of the member that
//! carries the data.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};

use log::{debug, warn};

use crate::error::ArchiveError;
use crate::header::{FileType, Member, PERM_MASK};
use crate::io_stream::{CpioReader, CpioWriter, Source};

// ── Collaborator contract ────────────────────────────────────────────────────

/// `lstat`-style metadata, reduced to what a newc header can carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    pub file_type:   FileType,
    pub permissions: u32,
    pub size:        u64,
    pub mtime:       i64,
    pub uid:         u32,
    pub gid:         u32,
    pub nlink:       u32,
    pub inode:       u64,
    pub dev:         (u32, u32),
    pub rdev:        (u32, u32),
}

pub trait FileSystem {
    /// Metadata of `path` itself (symlinks are not followed).
    fn stat(&self, path: &Path) -> io::Result<Stat>;
    /// Entry names of a directory, in any order.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<OsString>>;
    fn open(&self, path: &Path) -> io::Result<Box<dyn Read>>;
    fn read_link(&self, path: &Path) -> io::Result<PathBuf>;
    /// Absolute path with every symlink resolved.  Fails with `NotFound`
    /// when any component is missing.
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;

    fn create_dir_all(&self, path: &Path) -> io::Result<()>;
    /// Create or truncate `path` and fill it from `contents`.
    fn write_file(&self, path: &Path, contents: &mut dyn Read) -> io::Result<u64>;
    /// Create a symlink at `path`, replacing a non-directory already there.
    fn symlink(&self, target: &Path, path: &Path) -> io::Result<()>;
    /// Hard-link `link` to `original`, replacing a non-directory at `link`.
    fn hard_link(&self, original: &Path, link: &Path) -> io::Result<()>;
    /// Create a device node, fifo or socket.  Hosts that cannot report
    /// `Unsupported` or `PermissionDenied`.
    fn mknod(&self, path: &Path, file_type: FileType, permissions: u32, rdev: (u32, u32))
        -> io::Result<()>;
    fn set_permissions(&self, path: &Path, permissions: u32) -> io::Result<()>;
    /// Set the modification time of `path` itself, not a symlink's target.
    fn set_mtime(&self, path: &Path, mtime: u64) -> io::Result<()>;
}

/// The running unix host.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostFs;

impl FileSystem for HostFs {
    fn stat(&self, path: &Path) -> io::Result<Stat> {
        let md = fs::symlink_metadata(path)?;
        let ft = md.file_type();
        use std::os::unix::fs::FileTypeExt;
        let file_type = if ft.is_symlink() {
            FileType::Symlink
        } else if ft.is_dir() {
            FileType::Directory
        } else if ft.is_file() {
            FileType::Regular
        } else if ft.is_char_device() {
            FileType::CharDevice
        } else if ft.is_block_device() {
            FileType::BlockDevice
        } else if ft.is_fifo() {
            FileType::Fifo
        } else if ft.is_socket() {
            FileType::Socket
        } else {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("{}: unknown file type", path.display()),
            ));
        };
        Ok(Stat {
            file_type,
            permissions: md.mode() & PERM_MASK,
            size:        md.size(),
            mtime:       md.mtime(),
            uid:         md.uid(),
            gid:         md.gid(),
            nlink:       u32::try_from(md.nlink()).unwrap_or(u32::MAX),
            inode:       md.ino(),
            dev:         split_dev(md.dev()),
            rdev:        split_dev(md.rdev()),
        })
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<OsString>> {
        fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.file_name()))
            .collect()
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read>> {
        Ok(Box::new(File::open(path)?))
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        fs::read_link(path)
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        fs::canonicalize(path)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn write_file(&self, path: &Path, contents: &mut dyn Read) -> io::Result<u64> {
        remove_non_dir(path)?;
        let mut file = OpenOptions::new().write(true).create(true).truncate(true).open(path)?;
        io::copy(contents, &mut file)
    }

    fn symlink(&self, target: &Path, path: &Path) -> io::Result<()> {
        remove_non_dir(path)?;
        std::os::unix::fs::symlink(target, path)
    }

    fn hard_link(&self, original: &Path, link: &Path) -> io::Result<()> {
        remove_non_dir(link)?;
        fs::hard_link(original, link)
    }

    fn mknod(&self, path: &Path, file_type: FileType, permissions: u32, rdev: (u32, u32))
        -> io::Result<()>
    {
        use rustix::fs::{makedev, mknodat, FileType as NodeType, Mode, CWD};
        let node_type = match file_type {
            FileType::CharDevice  => NodeType::CharacterDevice,
            FileType::BlockDevice => NodeType::BlockDevice,
            FileType::Fifo        => NodeType::Fifo,
            FileType::Socket      => NodeType::Socket,
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{other:?} is not a special file type"),
                ))
            }
        };
        remove_non_dir(path)?;
        mknodat(
            CWD,
            path,
            node_type,
            Mode::from_raw_mode(permissions as _),
            makedev(rdev.0, rdev.1),
        )?;
        Ok(())
    }

    fn set_permissions(&self, path: &Path, permissions: u32) -> io::Result<()> {
        fs::set_permissions(path, fs::Permissions::from_mode(permissions))
    }

    fn set_mtime(&self, path: &Path, mtime: u64) -> io::Result<()> {
        use rustix::fs::{utimensat, AtFlags, Timespec, Timestamps, CWD};
        let secs = i64::try_from(mtime).unwrap_or(i64::MAX);
        let stamp = Timespec { tv_sec: secs as _, tv_nsec: 0 };
        let times = Timestamps { last_access: stamp, last_modification: stamp };
        utimensat(CWD, path, &times, AtFlags::SYMLINK_NOFOLLOW)?;
        Ok(())
    }
}

fn split_dev(dev: u64) -> (u32, u32) {
    let dev = dev as rustix::fs::Dev;
    (rustix::fs::major(dev), rustix::fs::minor(dev))
}

fn remove_non_dir(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(md) if !md.is_dir() => fs::remove_file(path),
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

// ── Writing ──────────────────────────────────────────────────────────────────

/// Build a record for `path` from its metadata.  `name` is the name stored
/// in the archive.
pub fn member_from_stat(name: &[u8], stat: &Stat, link_target: Option<&[u8]>) -> Member {
    let size = match stat.file_type {
        FileType::Regular => stat.size,
        FileType::Symlink => link_target.map_or(0, |t| t.len() as u64),
        _                 => 0,
    };
    Member {
        name:      name.to_vec(),
        // Inode numbers wider than the field keep their low 32 bits.
        inode:     stat.inode as u32,
        mode:      stat.file_type.mode_bits() | stat.permissions,
        uid:       stat.uid,
        gid:       stat.gid,
        nlink:     stat.nlink,
        mtime:     u64::try_from(stat.mtime).unwrap_or(0),
        size,
        devmajor:  stat.dev.0,
        devminor:  stat.dev.1,
        rdevmajor: stat.rdev.0,
        rdevminor: stat.rdev.1,
        checksum:  0,
    }
}

/// Stat `path` and build its record, stored under `arcname` (default: the
/// path as given).
pub fn member_from_path<F: FileSystem + ?Sized>(
    fs:      &F,
    path:    &Path,
    arcname: Option<&Path>,
) -> io::Result<Member> {
    describe(fs, path, arcname).map(|(member, _)| member)
}

/// The record for `path` together with the symlink target it was sized from.
fn describe<F: FileSystem + ?Sized>(
    fs:      &F,
    path:    &Path,
    arcname: Option<&Path>,
) -> io::Result<(Member, Option<Vec<u8>>)> {
    let stat = fs.stat(path)?;
    let target = match stat.file_type {
        FileType::Symlink => Some(fs.read_link(path)?.into_os_string().into_vec()),
        _ => None,
    };
    let name = arcname.unwrap_or(path).as_os_str().as_bytes();
    Ok((member_from_stat(name, &stat, target.as_deref()), target))
}

/// Append one filesystem entry.  Regular files carry their content, symlinks
/// their target; everything else has an empty payload.
pub fn add_path<W, F>(
    writer:  &mut CpioWriter<W>,
    fs:      &F,
    path:    &Path,
    arcname: Option<&Path>,
) -> Result<Member, ArchiveError>
where
    W: io::Write,
    F: FileSystem + ?Sized,
{
    let (member, target) = describe(fs, path, arcname)?;
    match (member.file_type(), target) {
        (Some(FileType::Regular), _) => {
            let mut content = fs.open(path)?;
            writer.add_member(&member, &mut content)?;
        }
        (_, Some(target)) => writer.add_member(&member, &mut &target[..])?,
        _ => writer.add_member(&member, &mut io::empty())?,
    }
    debug!("added {}", path.display());
    Ok(member)
}

/// Append `root` and everything below it.  Returns the number of records
/// written.
pub fn add_tree<W, F>(writer: &mut CpioWriter<W>, fs: &F, root: &Path) -> Result<usize, ArchiveError>
where
    W: io::Write,
    F: FileSystem + ?Sized,
{
    let mut count = 0;
    for path in walk(fs, root) {
        add_path(writer, fs, &path?, None)?;
        count += 1;
    }
    Ok(count)
}

/// Pre-order traversal of `root` with lexicographically sorted siblings.
pub fn walk<'a, F: FileSystem + ?Sized>(fs: &'a F, root: &Path) -> Walk<'a, F> {
    Walk { fs, stack: vec![root.to_path_buf()] }
}

pub struct Walk<'a, F: ?Sized> {
    fs:    &'a F,
    stack: Vec<PathBuf>,
}

impl<F: FileSystem + ?Sized> Iterator for Walk<'_, F> {
    type Item = io::Result<PathBuf>;

    fn next(&mut self) -> Option<Self::Item> {
        let path = self.stack.pop()?;
        let stat = match self.fs.stat(&path) {
            Ok(stat) => stat,
            Err(e) => return Some(Err(e)),
        };
        if stat.file_type == FileType::Directory {
            let mut names = match self.fs.read_dir(&path) {
                Ok(names) => names,
                Err(e) => return Some(Err(e)),
            };
            names.sort_by(|a, b| a.as_bytes().cmp(b.as_bytes()));
            self.stack.extend(names.iter().rev().map(|name| path.join(name)));
        }
        Some(Ok(path))
    }
}

// ── Extraction ───────────────────────────────────────────────────────────────

/// Counters reported by [`extract_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractStats {
    pub files:       usize,
    pub directories: usize,
    pub symlinks:    usize,
    pub special:     usize,
    pub skipped:     usize,
    pub bytes:       u64,
}

/// Map an archive name onto `dest`.  Leading `/` and `.` components are
/// dropped; names that would climb out of `dest` yield `None`.
pub fn sanitize_path(dest: &Path, name: &[u8]) -> Option<PathBuf> {
    let mut out = dest.to_path_buf();
    for component in Path::new(std::ffi::OsStr::from_bytes(name)).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}

/// Whether `path` resolves to somewhere under `root`, which must already be
/// canonical.  Missing trailing components are allowed; a dangling symlink
/// on the way is not, since creating through it would land wherever it
/// points.
fn resolves_within<F: FileSystem + ?Sized>(fs: &F, root: &Path, path: &Path) -> io::Result<bool> {
    let mut ancestor = path;
    loop {
        match fs.canonicalize(ancestor) {
            Ok(real) => return Ok(real.starts_with(root)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if fs.stat(ancestor).is_ok() {
                    return Ok(false);
                }
                match ancestor.parent() {
                    Some(parent) => ancestor = parent,
                    None => return Ok(false),
                }
            }
            Err(e) => return Err(e),
        }
    }
}

/// Members of one hard-link group seen so far.
#[derive(Default)]
struct LinkGroup {
    /// The extracted member that carried the data.
    data:    Option<PathBuf>,
    /// Empty members seen before the data arrived.
    pending: Vec<PathBuf>,
}

/// Extract every remaining member under `dest`.
pub fn extract_all<S, F>(
    reader: &mut CpioReader<S>,
    fs:     &F,
    dest:   &Path,
) -> Result<ExtractStats, ArchiveError>
where
    S: Source,
    F: FileSystem + ?Sized,
{
    fs.create_dir_all(dest)?;
    let root = fs.canonicalize(dest)?;
    let mut stats = ExtractStats::default();
    let mut directories: Vec<(PathBuf, u32, u64)> = Vec::new();
    let mut links: HashMap<(u32, u32, u32), LinkGroup> = HashMap::new();
    let mut verified: Option<PathBuf> = None;

    while let Some(member) = reader.next_member()? {
        if member.is_trailer() {
            break;
        }
        let Some(path) = sanitize_path(dest, &member.name) else {
            warn!("skipping {:?}: path escapes the destination", member.name_lossy());
            stats.skipped += 1;
            continue;
        };
        // A directory may itself be a symlink already on disk; anything else
        // replaces whatever sits at `path`, so only its parent matters.
        let anchor = if member.is_dir() { path.as_path() } else { path.parent().unwrap_or(dest) };
        if verified.as_deref() != Some(anchor) {
            if !resolves_within(fs, &root, anchor)? {
                warn!("skipping {:?}: path leads outside the destination through a symlink", member.name_lossy());
                stats.skipped += 1;
                continue;
            }
            verified = Some(anchor.to_path_buf());
        }
        if let Some(parent) = path.parent() {
            fs.create_dir_all(parent)?;
        }

        match member.file_type() {
            Some(FileType::Directory) => {
                fs.create_dir_all(&path)?;
                directories.push((path, member.permissions(), member.mtime));
                stats.directories += 1;
            }
            Some(FileType::Regular) => {
                let key = (member.devmajor, member.devminor, member.inode);
                let group = if member.nlink > 1 { Some(links.entry(key).or_default()) } else { None };
                match group {
                    Some(LinkGroup { data: Some(original), .. }) if member.size == 0 => {
                        fs.hard_link(original, &path)?;
                    }
                    group => {
                        let mut payload = reader.payload()?;
                        stats.bytes += fs.write_file(&path, &mut payload)?;
                        fs.set_permissions(&path, member.permissions())?;
                        fs.set_mtime(&path, member.mtime)?;
                        if let Some(group) = group {
                            if member.size == 0 {
                                group.pending.push(path.clone());
                            } else {
                                for pending in group.pending.drain(..) {
                                    fs.hard_link(&path, &pending)?;
                                }
                                group.data = Some(path.clone());
                            }
                        }
                    }
                }
                stats.files += 1;
            }
            Some(FileType::Symlink) => {
                let mut target = Vec::with_capacity(member.size as usize);
                reader.payload()?.read_to_end(&mut target)?;
                fs.symlink(Path::new(std::ffi::OsStr::from_bytes(&target)), &path)?;
                verified = None;
                fs.set_mtime(&path, member.mtime)?;
                stats.symlinks += 1;
            }
            Some(special) => {
                let rdev = (member.rdevmajor, member.rdevminor);
                match fs.mknod(&path, special, member.permissions(), rdev) {
                    Ok(()) => {
                        fs.set_permissions(&path, member.permissions())?;
                        fs.set_mtime(&path, member.mtime)?;
                        stats.special += 1;
                    }
                    Err(e) if matches!(
                        e.kind(),
                        io::ErrorKind::Unsupported | io::ErrorKind::PermissionDenied
                    ) => {
                        warn!("skipping {:?}: cannot create {special:?} node: {e}", member.name_lossy());
                        stats.skipped += 1;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            None => {
                warn!("skipping {:?}: unknown file type in mode {:o}", member.name_lossy(), member.mode);
                stats.skipped += 1;
            }
        }
    }

    // Deepest first, so a read-only parent is restored after its children.
    directories.sort_by(|a, b| b.0.cmp(&a.0));
    for (path, permissions, mtime) in directories {
        fs.set_permissions(&path, permissions)?;
        fs.set_mtime(&path, mtime)?;
    }
    debug!("extracted into {}: {stats:?}", dest.display());
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Encoder;
    use std::collections::BTreeMap;

    /// Directory listing only; enough to exercise the walker.
    #[derive(Default)]
    struct ListingFs {
        dirs: BTreeMap<PathBuf, Vec<&'static str>>,
    }

    impl FileSystem for ListingFs {
        fn stat(&self, path: &Path) -> io::Result<Stat> {
            let file_type = if self.dirs.contains_key(path) {
                FileType::Directory
            } else {
                FileType::Regular
            };
            Ok(Stat {
                file_type,
                permissions: 0o755,
                size: 0,
                mtime: 0,
                uid: 0,
                gid: 0,
                nlink: 1,
                inode: 0,
                dev: (0, 0),
                rdev: (0, 0),
            })
        }
        fn read_dir(&self, path: &Path) -> io::Result<Vec<OsString>> {
            Ok(self.dirs[path].iter().map(OsString::from).collect())
        }
        fn open(&self, _: &Path) -> io::Result<Box<dyn Read>> {
            Ok(Box::new(io::empty()))
        }
        fn read_link(&self, _: &Path) -> io::Result<PathBuf> {
            Err(io::ErrorKind::InvalidInput.into())
        }
        fn canonicalize(&self, _: &Path) -> io::Result<PathBuf> { unimplemented!() }
        fn create_dir_all(&self, _: &Path) -> io::Result<()> { unimplemented!() }
        fn write_file(&self, _: &Path, _: &mut dyn Read) -> io::Result<u64> { unimplemented!() }
        fn symlink(&self, _: &Path, _: &Path) -> io::Result<()> { unimplemented!() }
        fn hard_link(&self, _: &Path, _: &Path) -> io::Result<()> { unimplemented!() }
        fn mknod(&self, _: &Path, _: FileType, _: u32, _: (u32, u32)) -> io::Result<()> {
            unimplemented!()
        }
        fn set_permissions(&self, _: &Path, _: u32) -> io::Result<()> { unimplemented!() }
        fn set_mtime(&self, _: &Path, _: u64) -> io::Result<()> { unimplemented!() }
    }

    /// A single symlink whose target grows every time it is read.
    #[derive(Default)]
    struct GrowingLinkFs {
        reads: std::cell::Cell<usize>,
    }

    impl FileSystem for GrowingLinkFs {
        fn stat(&self, _: &Path) -> io::Result<Stat> {
            Ok(Stat {
                file_type: FileType::Symlink,
                permissions: 0o777,
                size: 0,
                mtime: 0,
                uid: 0,
                gid: 0,
                nlink: 1,
                inode: 9,
                dev: (0, 0),
                rdev: (0, 0),
            })
        }
        fn read_dir(&self, _: &Path) -> io::Result<Vec<OsString>> { unimplemented!() }
        fn open(&self, _: &Path) -> io::Result<Box<dyn Read>> { unimplemented!() }
        fn read_link(&self, _: &Path) -> io::Result<PathBuf> {
            let reads = self.reads.get() + 1;
            self.reads.set(reads);
            Ok(PathBuf::from("t".repeat(reads)))
        }
        fn canonicalize(&self, _: &Path) -> io::Result<PathBuf> { unimplemented!() }
        fn create_dir_all(&self, _: &Path) -> io::Result<()> { unimplemented!() }
        fn write_file(&self, _: &Path, _: &mut dyn Read) -> io::Result<u64> { unimplemented!() }
        fn symlink(&self, _: &Path, _: &Path) -> io::Result<()> { unimplemented!() }
        fn hard_link(&self, _: &Path, _: &Path) -> io::Result<()> { unimplemented!() }
        fn mknod(&self, _: &Path, _: FileType, _: u32, _: (u32, u32)) -> io::Result<()> {
            unimplemented!()
        }
        fn set_permissions(&self, _: &Path, _: u32) -> io::Result<()> { unimplemented!() }
        fn set_mtime(&self, _: &Path, _: u64) -> io::Result<()> { unimplemented!() }
    }

    #[test]
    fn symlink_target_is_read_once() {
        let fs = GrowingLinkFs::default();
        let mut writer = CpioWriter::new(Encoder::Plain(Vec::new()));
        let member = add_path(&mut writer, &fs, Path::new("link"), None).unwrap();
        assert_eq!(fs.reads.get(), 1);
        assert_eq!(member.size, 1);
        let bytes = writer.close().unwrap();

        let mut reader = CpioReader::new(&bytes[..]);
        let stored = reader.next_member().unwrap().unwrap();
        assert!(stored.is_symlink());
        let mut target = Vec::new();
        reader.payload().unwrap().read_to_end(&mut target).unwrap();
        assert_eq!(target, b"t");
        assert!(reader.next_member().unwrap().unwrap().is_trailer());
    }

    #[test]
    fn walk_is_preorder_and_sorted() {
        let mut fs = ListingFs::default();
        fs.dirs.insert("r".into(), vec!["b", "a", "c"]);
        fs.dirs.insert("r/b".into(), vec!["z", "y"]);
        fs.dirs.insert("r/c".into(), vec![]);
        let order: Vec<_> = walk(&fs, Path::new("r")).map(|p| p.unwrap()).collect();
        let expected: Vec<PathBuf> =
            ["r", "r/a", "r/b", "r/b/y", "r/b/z", "r/c"].iter().map(PathBuf::from).collect();
        assert_eq!(order, expected);
    }

    #[test]
    fn walk_handles_deep_trees_without_recursion() {
        let mut fs = ListingFs::default();
        let mut path = PathBuf::from("d");
        for _ in 0..10_000 {
            fs.dirs.insert(path.clone(), vec!["d"]);
            path.push("d");
        }
        assert_eq!(walk(&fs, Path::new("d")).count(), 10_001);
    }

    #[test]
    fn add_tree_writes_every_entry() {
        let mut fs = ListingFs::default();
        fs.dirs.insert("top".into(), vec!["f1", "f2"]);
        let mut writer = CpioWriter::new(Encoder::Plain(Vec::new()));
        assert_eq!(add_tree(&mut writer, &fs, Path::new("top")).unwrap(), 3);
        let bytes = writer.close().unwrap();

        let mut reader = CpioReader::new(&bytes[..]);
        let names: Vec<_> = reader
            .members()
            .map(|m| m.unwrap().name_lossy())
            .collect();
        assert_eq!(names, ["top", "top/f1", "top/f2", "TRAILER!!!"]);
    }

    #[test]
    fn sanitize_strips_and_guards() {
        let dest = Path::new("/out");
        assert_eq!(sanitize_path(dest, b"./data"), Some(PathBuf::from("/out/data")));
        assert_eq!(sanitize_path(dest, b"/etc/passwd"), Some(PathBuf::from("/out/etc/passwd")));
        assert_eq!(sanitize_path(dest, b"."), Some(PathBuf::from("/out")));
        assert_eq!(sanitize_path(dest, b"a/../../x"), None);
    }

    #[test]
    fn member_sizes_follow_type() {
        let stat = Stat {
            file_type: FileType::Directory,
            permissions: 0o755,
            size: 4096,
            mtime: -5,
            uid: 1,
            gid: 2,
            nlink: 3,
            inode: (1 << 40) | 7,
            dev: (8, 1),
            rdev: (0, 0),
        };
        let dir = member_from_stat(b"d", &stat, None);
        assert_eq!(dir.size, 0);
        assert_eq!(dir.mtime, 0);
        assert_eq!(dir.inode, 7);
        assert!(dir.is_dir());

        let link = member_from_stat(b"l", &Stat { file_type: FileType::Symlink, ..stat.clone() }, Some(&b"target"[..]));
        assert_eq!(link.size, 6);
        let file = member_from_stat(b"f", &Stat { file_type: FileType::Regular, ..stat }, None);
        assert_eq!(file.size, 4096);
    }
}
