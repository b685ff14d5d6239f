#![forbid(unsafe_code)]

//! Filesystem primitives for the reconciliation controller.
//!
//! Reads are "stable": the metadata signature must be identical before and
//! after the read, otherwise we retry, so a half-written external save never
//! becomes document state. Writes go through a temp file and rename.

use std::{
    fs,
    io::{self, Write as _},
    path::Path,
    time::{Duration, SystemTime},
};

#[cfg(unix)]
use std::os::unix::fs::MetadataExt as _;

const STABLE_READ_RETRIES: usize = 3;
const STABLE_READ_RETRY_SLEEP: Duration = Duration::from_millis(5);

/// Last known on-disk signature of the open file. An editor rewrite changes
/// the inode even when content is equal, which is exactly what
/// reconciliation needs to detect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct DiskRevision {
    pub(crate) modified: SystemTime,
    pub(crate) len: u64,
    #[cfg(unix)]
    pub(crate) dev: u64,
    #[cfg(unix)]
    pub(crate) inode: u64,
}

pub(crate) fn disk_revision(path: &Path) -> io::Result<DiskRevision> {
    let meta = fs::metadata(path)?;
    Ok(DiskRevision {
        modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        len: meta.len(),
        #[cfg(unix)]
        dev: meta.dev(),
        #[cfg(unix)]
        inode: meta.ino(),
    })
}

/// Read the file as UTF-8 together with the revision the text corresponds to.
pub(crate) fn read_stable_utf8(path: &Path) -> io::Result<(String, DiskRevision)> {
    let mut last_err = None;

    for attempt in 0..STABLE_READ_RETRIES {
        if attempt > 0 {
            std::thread::sleep(STABLE_READ_RETRY_SLEEP);
        }

        let before = disk_revision(path)?;
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) => {
                last_err = Some(err);
                continue;
            }
        };
        let after = match disk_revision(path) {
            Ok(revision) => revision,
            Err(err) => {
                last_err = Some(err);
                continue;
            }
        };

        if before == after {
            return Ok((text, after));
        }
    }

    Err(last_err.unwrap_or_else(|| io::Error::other("file kept changing while reading")))
}

/// Write `contents` through a uniquely named temp file in the target
/// directory, then rename over `path`.
pub(crate) fn atomic_write_utf8(path: &Path, contents: &str) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file_name = path.file_name().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "path is missing a file name")
    })?;
    let file_name = file_name.to_string_lossy();

    let pid = u128::from(std::process::id());
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos());

    for attempt in 0..10u128 {
        let suffix = pid ^ nanos ^ attempt;
        let tmp_path = dir.join(format!(".inkdown-tmp-{file_name}-{suffix}"));

        let open = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path);
        let mut file = match open {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        };

        let result = (|| -> io::Result<()> {
            file.write_all(contents.as_bytes())?;
            file.sync_all()?;

            if fs::rename(&tmp_path, path).is_ok() {
                return Ok(());
            }

            // Some platforms/filesystems won't replace an existing path via
            // rename. Move the original aside first so it can be restored if
            // the second rename fails.
            if path.exists() {
                let backup_path = dir.join(format!(".inkdown-backup-{file_name}-{suffix}"));
                fs::rename(path, &backup_path)?;
                match fs::rename(&tmp_path, path) {
                    Ok(()) => {
                        let _ = fs::remove_file(&backup_path);
                        Ok(())
                    }
                    Err(err) => {
                        let _ = fs::rename(&backup_path, path);
                        Err(err)
                    }
                }
            } else {
                fs::rename(&tmp_path, path)?;
                Ok(())
            }
        })();

        if let Err(err) = result {
            let _ = fs::remove_file(&tmp_path);
            return Err(err);
        }

        return Ok(());
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        "failed to create a temporary file",
    ))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::path::PathBuf;

    pub(crate) fn make_temp_dir(name: &str) -> PathBuf {
        let mut dir = std::env::temp_dir();
        let nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map_or(0, |d| d.as_nanos());
        dir.push(format!("{name}-{nanos}-{}", std::process::id()));
        let _ = fs::create_dir_all(&dir);
        dir
    }

    #[test]
    fn disk_revision_reads_metadata() {
        let dir = make_temp_dir("inkdown-disk-rev-test");
        let path = dir.join("test.md");
        fs::write(&path, "hello").ok();

        let rev = disk_revision(&path);
        assert!(rev.is_ok());
        assert_eq!(rev.ok().map(|r| r.len), Some(5));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn disk_revision_changes_when_content_changes() {
        let dir = make_temp_dir("inkdown-disk-rev-change-test");
        let path = dir.join("test.md");
        fs::write(&path, "one").ok();
        let first = disk_revision(&path).ok();
        fs::write(&path, "longer content").ok();
        let second = disk_revision(&path).ok();
        assert!(first.is_some() && second.is_some());
        assert_ne!(first, second);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn disk_revision_missing_file_returns_error() {
        assert!(disk_revision(Path::new("/tmp/inkdown-nonexistent-12345.md")).is_err());
    }

    #[test]
    fn read_stable_utf8_reads_content_and_revision() {
        let dir = make_temp_dir("inkdown-stable-read-test");
        let path = dir.join("test.md");
        fs::write(&path, "content").ok();

        let result = read_stable_utf8(&path);
        assert!(result.is_ok(), "read_stable_utf8 failed: {result:?}");
        if let Ok((text, rev)) = result {
            assert_eq!(text, "content");
            assert_eq!(rev.len, 7);
        }

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn atomic_write_creates_and_overwrites() {
        let dir = make_temp_dir("inkdown-atomic-test");
        let path = dir.join("test.md");

        assert!(atomic_write_utf8(&path, "first").is_ok());
        assert_eq!(fs::read_to_string(&path).unwrap_or_default(), "first");

        assert!(atomic_write_utf8(&path, "second").is_ok());
        assert_eq!(fs::read_to_string(&path).unwrap_or_default(), "second");

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn atomic_write_leaves_no_temp_files_behind() {
        let dir = make_temp_dir("inkdown-atomic-clean-test");
        let path = dir.join("test.md");
        assert!(atomic_write_utf8(&path, "data").is_ok());

        let leftovers = fs::read_dir(&dir)
            .map(|entries| {
                entries
                    .flatten()
                    .filter(|e| e.file_name().to_string_lossy().starts_with(".inkdown-"))
                    .count()
            })
            .unwrap_or(0);
        assert_eq!(leftovers, 0);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn atomic_write_rejects_missing_filename() {
        assert!(atomic_write_utf8(Path::new("/"), "data").is_err());
    }
}
