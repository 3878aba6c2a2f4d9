//! Staging file lifecycle.
//!
//! Bytes for an in-flight download land in `<final name>.part`. The file's
//! length is the resume offset for the next attempt; on success it is
//! fsynced and atomically renamed over the final name.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Staging file suffix used before atomic rename.
pub const STAGING_SUFFIX: &str = ".part";

/// Path for the staging file: appends `.part` to the final path (e.g. `model.gguf` → `model.gguf.part`).
pub fn staging_path(final_path: &Path) -> PathBuf {
    let mut o = final_path.as_os_str().to_owned();
    o.push(STAGING_SUFFIX);
    PathBuf::from(o)
}

/// Current length of the staging file, or 0 if it does not exist.
pub fn resume_offset(staging: &Path) -> io::Result<u64> {
    match fs::metadata(staging) {
        Ok(m) => Ok(m.len()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e),
    }
}

/// Remove a staging file; a missing file is not an error.
pub fn discard(staging: &Path) -> io::Result<()> {
    match fs::remove_file(staging) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Sequential writer for a staging file.
pub struct StagingWriter {
    file: File,
    path: PathBuf,
    written: u64,
}

impl StagingWriter {
    /// Open for append (resume) or create/truncate (fresh start).
    pub fn open(path: &Path, append: bool) -> io::Result<Self> {
        let mut opts = File::options();
        opts.create(true);
        if append {
            opts.append(true);
        } else {
            opts.write(true).truncate(true);
        }
        let file = opts.open(path)?;
        let written = if append { file.metadata()?.len() } else { 0 };
        Ok(Self {
            file,
            path: path.to_path_buf(),
            written,
        })
    }

    pub fn append(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data)?;
        self.written += data.len() as u64;
        Ok(())
    }

    /// Bytes in the file (existing prefix plus everything appended).
    pub fn len(&self) -> u64 {
        self.written
    }

    pub fn is_empty(&self) -> bool {
        self.written == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sync file data to disk. Call before `commit` for durability.
    pub fn sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }
}

/// Atomically rename the staging file to `final_path`; returns the committed
/// file's length as reported by the filesystem.
pub fn commit(staging: &Path, final_path: &Path) -> io::Result<u64> {
    fs::rename(staging, final_path)?;
    Ok(fs::metadata(final_path)?.len())
}

/// A leftover staging file that a new job for the same file would resume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialFile {
    /// Final name the file will be committed under.
    pub filename: String,
    pub path: PathBuf,
    pub bytes: u64,
}

/// List staging files under `dir` and its subdirectories, sorted by name.
/// Nested names are relative to `dir` and joined with `/`.
pub fn list_partials(dir: &Path) -> io::Result<Vec<PartialFile>> {
    let mut out = Vec::new();
    collect_partials(dir, "", &mut out)?;
    out.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(out)
}

fn collect_partials(dir: &Path, prefix: &str, out: &mut Vec<PartialFile>) -> io::Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_partials(&entry.path(), &format!("{}{}/", prefix, name), out)?;
            continue;
        }
        let Some(filename) = name.strip_suffix(STAGING_SUFFIX) else {
            continue;
        };
        if !file_type.is_file() || filename.is_empty() {
            continue;
        }
        out.push(PartialFile {
            filename: format!("{}{}", prefix, filename),
            path: entry.path(),
            bytes: entry.metadata()?.len(),
        });
    }
    Ok(())
}
