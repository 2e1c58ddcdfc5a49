use chrono::DateTime;
use clap::{Parser, Subcommand};
use cpiofile::archive::CpioFile;
use cpiofile::header::Member;
use serde::Serialize;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "cpiofile", about = "Create, extract and list newc cpio archives")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack files and directory trees into an archive
    Create {
        /// Output archive, or - for stdout
        #[arg(short, long)]
        output: PathBuf,
        /// Write mode: w, w|, w|gz, w|bz2, w|xz
        #[arg(short, long, default_value = "w")]
        mode: String,
        #[arg(required = true, num_args = 1..)]
        paths: Vec<PathBuf>,
    },
    /// Unpack an archive
    Extract {
        /// Archive, or - for stdin
        input: PathBuf,
        /// Read mode: r, r|, r|gz, r|bz2, r|xz, r|*
        #[arg(short, long, default_value = "r|*")]
        mode: String,
        #[arg(short = 'C', long, default_value = ".")]
        directory: PathBuf,
    },
    /// List archive contents
    List {
        /// Archive, or - for stdin
        input: PathBuf,
        #[arg(short, long, default_value = "r|*")]
        mode: String,
        /// Show type, permissions, owner, size and mtime
        #[arg(short, long)]
        long: bool,
        /// One JSON object per line
        #[arg(long, conflicts_with = "long")]
        json: bool,
    },
}

#[derive(Serialize)]
struct ListEntry {
    name:  String,
    #[serde(rename = "type")]
    kind:  char,
    mode:  String,
    uid:   u32,
    gid:   u32,
    nlink: u32,
    size:  u64,
    mtime: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    link_target: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    match Cli::parse().command {

        // ── Create ───────────────────────────────────────────────────────────
        Commands::Create { output, mode, paths } => {
            let mut ar = if is_stdio(&output) {
                CpioFile::from_writer(io::stdout(), &mode)?
            } else {
                CpioFile::open(&output, &mode)?
            };
            let mut count = 0;
            for path in &paths {
                count += ar.add_tree(path)?;
            }
            ar.close()?;
            if !is_stdio(&output) {
                eprintln!("Created: {} ({count} entries)", output.display());
            }
        }

        // ── Extract ──────────────────────────────────────────────────────────
        Commands::Extract { input, mode, directory } => {
            let mut ar = open_input(&input, &mode)?;
            let stats = ar.extract_all(&directory)?;
            eprintln!(
                "Extracted {} files, {} directories, {} symlinks, {} special ({} skipped) to {}",
                stats.files, stats.directories, stats.symlinks, stats.special, stats.skipped,
                directory.display(),
            );
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { input, mode, long, json } => {
            let mut ar = open_input(&input, &mode)?;
            let stdout = io::stdout();
            let mut out = stdout.lock();
            while let Some(member) = ar.next_member()? {
                if member.is_trailer() {
                    break;
                }
                let link_target = if member.is_symlink() {
                    let mut target = Vec::new();
                    ar.payload()?.read_to_end(&mut target)?;
                    Some(String::from_utf8_lossy(&target).into_owned())
                } else {
                    None
                };
                if json {
                    serde_json::to_writer(&mut out, &entry(&member, link_target))?;
                    writeln!(out)?;
                } else if long {
                    writeln!(out, "{}", long_line(&member, link_target.as_deref()))?;
                } else {
                    writeln!(out, "{}", member.name_lossy())?;
                }
            }
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn is_stdio(path: &Path) -> bool {
    path.as_os_str() == "-"
}

fn open_input(path: &Path, mode: &str) -> Result<CpioFile, Box<dyn std::error::Error>> {
    Ok(if is_stdio(path) {
        CpioFile::from_reader(io::stdin(), mode)?
    } else {
        CpioFile::open(path, mode)?
    })
}

fn entry(member: &Member, link_target: Option<String>) -> ListEntry {
    ListEntry {
        name:  member.name_lossy(),
        kind:  member.file_type().map_or('?', |t| t.tag()),
        mode:  format!("{:04o}", member.permissions()),
        uid:   member.uid,
        gid:   member.gid,
        nlink: member.nlink,
        size:  member.size,
        mtime: member.mtime,
        link_target,
    }
}

/// `drwxr-xr-x  0/0      0 2024-01-01 00:00 name`
fn long_line(member: &Member, link_target: Option<&str>) -> String {
    let kind = member.file_type().map_or('?', |t| t.tag());
    let perms = member.permissions();
    let mut rwx = String::with_capacity(9);
    for shift in [6, 3, 0] {
        let bits = (perms >> shift) & 0o7;
        rwx.push(if bits & 4 != 0 { 'r' } else { '-' });
        rwx.push(if bits & 2 != 0 { 'w' } else { '-' });
        rwx.push(if bits & 1 != 0 { 'x' } else { '-' });
    }
    let mtime = i64::try_from(member.mtime)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "?".into());
    let mut line = format!(
        "{kind}{rwx} {:>5}/{:<5} {:>10} {mtime} {}",
        member.uid, member.gid, member.size, member.name_lossy(),
    );
    if let Some(target) = link_target {
        line.push_str(" -> ");
        line.push_str(target);
    }
    line
}
