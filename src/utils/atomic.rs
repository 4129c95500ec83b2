use std::{
    fs, io,
    path::{Path, PathBuf},
};

/// Temporary sibling used while a file is being replaced.
fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Replaces `path` with `contents` via temp file + rename.
///
/// Readers either see the previous file or the complete new one.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut staged = StagedFiles::default();
    staged.stage(path, contents)?;
    staged.commit().map(|_| ())
}

/// A group of files written to temporaries first and renamed into place
/// together.
///
/// Dropping without `commit` removes every temporary, leaving the targets
/// untouched.
#[derive(Debug, Default)]
pub struct StagedFiles {
    pending: Vec<(PathBuf, PathBuf)>,
}

impl StagedFiles {
    pub fn stage(&mut self, path: &Path, contents: &[u8]) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = tmp_path(path);
        // Registered before writing so a failed write is cleaned up as well.
        self.pending.push((tmp.clone(), path.to_path_buf()));
        fs::write(&tmp, contents)?;
        Ok(())
    }

    /// Renames every staged temporary onto its target and returns how many
    /// files were replaced.
    pub fn commit(mut self) -> io::Result<usize> {
        let pending = std::mem::take(&mut self.pending);
        let count = pending.len();
        let mut iter = pending.into_iter();
        while let Some((tmp, target)) = iter.next() {
            if let Err(e) = fs::rename(&tmp, &target) {
                // Remaining temporaries must not linger next to the artifacts.
                let _ = fs::remove_file(&tmp);
                for (rest, _) in iter.by_ref() {
                    let _ = fs::remove_file(&rest);
                }
                return Err(e);
            }
        }
        Ok(count)
    }
}

impl Drop for StagedFiles {
    fn drop(&mut self) {
        for (tmp, _) in self.pending.drain(..) {
            let _ = fs::remove_file(&tmp);
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.json");
        write_atomic(&path, b"[1]").unwrap();
        write_atomic(&path, b"[2]").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"[2]");
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn test_dropped_stage_leaves_no_temporaries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.json");
        fs::write(&path, b"old").unwrap();
        {
            let mut staged = StagedFiles::default();
            staged.stage(&path, b"new").unwrap();
            assert!(tmp_path(&path).exists());
        }
        assert!(!tmp_path(&path).exists());
        assert_eq!(fs::read(&path).unwrap(), b"old");
    }

    #[test]
    fn test_staged_files_commit_together() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("nested/a.json");
        let b = dir.path().join("b.json");
        let mut staged = StagedFiles::default();
        staged.stage(&a, b"a").unwrap();
        staged.stage(&b, b"b").unwrap();
        assert!(!a.exists());
        assert_eq!(staged.commit().unwrap(), 2);
        assert_eq!(fs::read(&a).unwrap(), b"a");
        assert_eq!(fs::read(&b).unwrap(), b"b");
    }
}
