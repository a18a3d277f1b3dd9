//! Copy-and-rename: the only way bytes are written into the archive.
//! - copy into a unique temp file in the destination directory (fsynced)
//! - carry the source's timestamps and mode onto the temp file
//! - atomically rename temp -> dest, removing the temp on failure
//!
//! A reader of the destination directory sees either no file or the complete file.

use anyhow::{Context, Result, anyhow};
use std::fs;
use std::path::Path;

use super::atomic::try_atomic_move;
use super::helpers::io_error_with_help;
use super::{io_copy, meta, util};

/// Copy `src` to `dest` through a temp file. Replaces `dest` if it exists.
pub fn safe_copy_and_rename(src: &Path, dest: &Path) -> Result<u64> {
    let dest_dir = dest
        .parent()
        .ok_or_else(|| anyhow!("destination has no parent: {}", dest.display()))?;
    let src_meta = fs::metadata(src).map_err(io_error_with_help("stat source", src))?;

    let tmp_path = util::unique_temp_path(dest_dir);
    let bytes = match io_copy::copy_streaming(src, &tmp_path) {
        Ok(n) => n,
        Err(e) => {
            let _ = fs::remove_file(&tmp_path);
            return Err(io_error_with_help("copy to temporary file", &tmp_path)(e));
        }
    };
    meta::preserve_metadata(&tmp_path, &src_meta);

    if let Err(e) = try_atomic_move(&tmp_path, dest) {
        let _ = fs::remove_file(&tmp_path);
        return Err(io_error_with_help("rename temporary file into place", dest)(e))
            .with_context(|| format!("temp file was '{}'", tmp_path.display()));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use tempfile::tempdir;

    #[test]
    fn copies_keeps_source_and_mtime() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("P0000001.ORF");
        let dest_dir = dir.path().join("archive");
        fs::create_dir(&dest_dir).unwrap();
        let dest = dest_dir.join("P0000001.ORF");
        fs::write(&src, b"frame").unwrap();
        filetime::set_file_mtime(&src, FileTime::from_unix_time(1_600_000_000, 0)).unwrap();

        assert_eq!(safe_copy_and_rename(&src, &dest).unwrap(), 5);
        assert!(src.exists());
        assert_eq!(fs::read(&dest).unwrap(), b"frame");
        let mt = FileTime::from_last_modification_time(&fs::metadata(&dest).unwrap());
        assert_eq!(mt.unix_seconds(), 1_600_000_000);
        // no temp file left behind
        let leftovers: Vec<_> = fs::read_dir(&dest_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(util::TEMP_PREFIX))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn missing_destination_dir_fails_cleanly() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("s.jpg");
        fs::write(&src, b"x").unwrap();
        let err = safe_copy_and_rename(&src, &dir.path().join("absent/s.jpg")).unwrap_err();
        assert!(err.to_string().contains("copy to temporary file"));
    }
}
