//! Name-addressed facade over [`CpioFile`] for callers that think in terms
//! of "give me the file called X".
//!
//! Reading scans the archive once on open to build the member list.  Each
//! [`CpioFileCompat::read`] reopens the file and walks forward to the
//! requested record, so it works for compressed archives too.  When a name
//! occurs more than once the last occurrence wins.

use std::io::{self, Read};
use std::path::{Path, PathBuf};

use log::debug;

use crate::archive::CpioFile;
use crate::error::ArchiveError;
use crate::header::Member;
use crate::mode::{Direction, ModeError};

/// The fixed set of on-disk layouts the facade offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionPreset {
    #[default]
    Plain,
    Gzipped,
}

impl CompressionPreset {
    fn mode(self, direction: Direction) -> &'static str {
        match (self, direction) {
            (Self::Plain,   Direction::Read)  => "r",
            (Self::Plain,   Direction::Write) => "w",
            (Self::Gzipped, Direction::Read)  => "r|gz",
            (Self::Gzipped, Direction::Write) => "w|gz",
        }
    }
}

pub struct CpioFileCompat {
    path:    PathBuf,
    preset:  CompressionPreset,
    members: Vec<Member>,
    writer:  Option<CpioFile>,
    closed:  bool,
}

impl CpioFileCompat {
    /// `mode` is `"r"` or `"w"`.
    pub fn open<P: AsRef<Path>>(path: P, mode: &str, preset: CompressionPreset)
        -> Result<Self, ArchiveError>
    {
        let path = path.as_ref().to_owned();
        let direction = match mode {
            "r" => Direction::Read,
            "w" => Direction::Write,
            _   => return Err(ModeError::Unknown(mode.to_owned()).into()),
        };
        let mut this = Self { path, preset, members: Vec::new(), writer: None, closed: false };
        match direction {
            Direction::Read => {
                let mut ar = CpioFile::open(&this.path, preset.mode(direction))?;
                while let Some(member) = ar.next_member()? {
                    if !member.is_trailer() {
                        this.members.push(member);
                    }
                }
                ar.close()?;
                debug!("{}: {} members", this.path.display(), this.members.len());
            }
            Direction::Write => {
                this.writer = Some(CpioFile::open(&this.path, preset.mode(direction))?);
            }
        }
        Ok(this)
    }

    fn check_read(&self) -> Result<(), ArchiveError> {
        if self.closed {
            Err(ArchiveError::UseAfterClose)
        } else if self.writer.is_some() {
            Err(ArchiveError::WrongDirection("writing"))
        } else {
            Ok(())
        }
    }

    fn writer(&mut self) -> Result<&mut CpioFile, ArchiveError> {
        if self.closed {
            return Err(ArchiveError::UseAfterClose);
        }
        self.writer.as_mut().ok_or(ArchiveError::WrongDirection("reading"))
    }

    /// Position of the last member called `name`.
    fn locate(&self, name: &str) -> Result<usize, ArchiveError> {
        self.members
            .iter()
            .rposition(|m| m.name == name.as_bytes())
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("File not found: {name}")).into()
            })
    }

    /// Member names in archive order, duplicates included.
    pub fn list_names(&self) -> Result<Vec<String>, ArchiveError> {
        self.check_read()?;
        Ok(self.members.iter().map(Member::name_lossy).collect())
    }

    pub fn get_info(&self, name: &str) -> Result<Member, ArchiveError> {
        self.check_read()?;
        Ok(self.members[self.locate(name)?].clone())
    }

    /// Full payload of `name`.
    pub fn read(&self, name: &str) -> Result<Vec<u8>, ArchiveError> {
        self.check_read()?;
        let index = self.locate(name)?;
        let mut ar = CpioFile::open(&self.path, self.preset.mode(Direction::Read))?;
        let mut seen = 0;
        while let Some(member) = ar.next_member()? {
            if member.is_trailer() {
                break;
            }
            if seen == index {
                let mut data = Vec::with_capacity(member.size as usize);
                ar.payload()?.read_to_end(&mut data)?;
                return Ok(data);
            }
            seen += 1;
        }
        // The file changed underneath us.
        Err(io::Error::new(io::ErrorKind::NotFound, format!("File not found: {name}")).into())
    }

    /// Add `path` under its own name.
    pub fn write<P: AsRef<Path>>(&mut self, path: P) -> Result<(), ArchiveError> {
        self.writer()?.add_path(path, None)?;
        Ok(())
    }

    pub fn write_as<P: AsRef<Path>, A: AsRef<Path>>(&mut self, path: P, arcname: A)
        -> Result<(), ArchiveError>
    {
        self.writer()?.add_path(path, Some(arcname.as_ref()))?;
        Ok(())
    }

    /// Finish the archive.  Idempotent.
    pub fn close(&mut self) -> Result<(), ArchiveError> {
        self.closed = true;
        match self.writer.take() {
            Some(mut ar) => ar.close(),
            None         => Ok(()),
        }
    }
}
