//! Durable file replacement.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::runtime::constants::filenames;

/// Replace `path` with `contents` so that readers see either the old or the new file,
/// never a partial write.
///
/// Writes `<path>.tmp`, flushes and fsyncs it, renames it over `path`, then fsyncs the
/// parent directory. The directory fsync is best-effort.
pub fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} has no parent directory", path.display()),
        )
    })?;
    fs::create_dir_all(dir)?;

    let tmp = tmp_path(path);
    let file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(&tmp)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(contents)?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, path)?;
    sync_dir(dir);
    Ok(())
}

/// Remove a file, treating absence as success.
pub fn remove_file_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(filenames::TMP_SUFFIX);
    PathBuf::from(name)
}

fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}
