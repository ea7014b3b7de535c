//! Version chain allocation for script artifacts.
//!
//! Every automatic modification lands in a new sibling file named
//! `<stem>_v<N><.ext>`, starting at N = 2. Existing files are never
//! overwritten: the first unused index is claimed with an exclusive create.

use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// First index of a version chain. The upload itself is implicitly v1.
pub const FIRST_VERSION: u32 = 2;

/// Path of version `index` of `path` (`dir/name.py` -> `dir/name_v3.py`).
pub fn versioned_path(path: &Path, index: u32) -> PathBuf {
    let mut name: OsString = path.file_stem().map(OsString::from).unwrap_or_default();
    name.push(format!("_v{index}"));
    if let Some(ext) = path.extension() {
        name.push(".");
        name.push(ext);
    }
    path.with_file_name(name)
}

/// First version path for which `exists` returns false.
pub fn next_version_path(path: &Path, exists: impl Fn(&Path) -> bool) -> PathBuf {
    let mut index = FIRST_VERSION;
    loop {
        let candidate = versioned_path(path, index);
        if !exists(&candidate) {
            return candidate;
        }
        index += 1;
    }
}

/// Copy `path` to the next unused version path and return that path.
pub fn backup_and_version(path: &Path) -> io::Result<PathBuf> {
    let contents = std::fs::read(path)?;
    claim_next_version(path, |file| {
        file.write_all(&contents)?;
        file.flush()
    })
}

/// Exclusively create the first unused version path and fill it.
///
/// If `fill` fails the claimed file is removed again, so a partial write
/// never shows up as a version.
fn claim_next_version(
    path: &Path,
    fill: impl Fn(&mut File) -> io::Result<()>,
) -> io::Result<PathBuf> {
    let mut index = FIRST_VERSION;
    loop {
        let candidate = versioned_path(path, index);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(mut file) => {
                if let Err(e) = fill(&mut file) {
                    drop(file);
                    if let Err(rm) = std::fs::remove_file(&candidate) {
                        return Err(io::Error::new(
                            e.kind(),
                            format!("{e} (and failed to remove {}: {rm})", candidate.display()),
                        ));
                    }
                    return Err(e);
                }
                return Ok(candidate);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => index += 1,
            Err(e) => return Err(e),
        }
    }
}
