//! Crash-safe file replacement used for every state-of-record write.

use std::{
    fs,
    io::{self, Write},
    path::Path,
};

/// Replace `path` with `contents` atomically: write a temporary file in the
/// same directory, fsync it, rename over `path`, then fsync the directory so
/// the rename itself is durable. After an error the previous contents of
/// `path` are still intact.
pub fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    fs::create_dir_all(dir)?;

    let tmp = path.with_extension(match path.extension() {
        Some(ext) => format!("{}.tmp", ext.to_string_lossy()),
        None => "tmp".to_string(),
    });

    let result = (|| {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, path)?;
        fs::File::open(dir)?.sync_all()
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}
