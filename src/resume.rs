//! Smart-Resume: decide whether a destination file already matches its source.

use crate::file_ops::FileStat;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeVerdict {
    Identical,
    Differs,
}

/// Sizes must match exactly and mtimes must be closer than `tolerance_ms`.
/// A failed stat on either side is `Differs`.
pub fn compare(
    source: &std::io::Result<FileStat>,
    destination: &std::io::Result<FileStat>,
    tolerance_ms: u64,
) -> ResumeVerdict {
    match (source, destination) {
        (Ok(src), Ok(dst)) => {
            let drift = src.modified_ms.abs_diff(dst.modified_ms);
            if src.size == dst.size && drift < tolerance_ms {
                ResumeVerdict::Identical
            } else {
                ResumeVerdict::Differs
            }
        }
        _ => ResumeVerdict::Differs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_SMART_RESUME_TOLERANCE_MS;
    use crate::file_ops::stat_file_async;
    use std::path::Path;

    async fn compare_paths(source: &Path, destination: &Path, tolerance_ms: u64) -> ResumeVerdict {
        compare(
            &stat_file_async(source).await,
            &stat_file_async(destination).await,
            tolerance_ms,
        )
    }

    fn stat(size: u64, modified_ms: i64) -> std::io::Result<FileStat> {
        Ok(FileStat {
            size,
            modified_ms,
            is_dir: false,
        })
    }

    fn missing() -> std::io::Result<FileStat> {
        Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"))
    }

    #[test]
    fn test_tolerance_boundary() {
        let tol = DEFAULT_SMART_RESUME_TOLERANCE_MS;
        let base = 1_700_000_000_000;
        assert_eq!(compare(&stat(10, base), &stat(10, base + 2999), tol), ResumeVerdict::Identical);
        assert_eq!(compare(&stat(10, base + 2999), &stat(10, base), tol), ResumeVerdict::Identical);
        assert_eq!(compare(&stat(10, base), &stat(10, base + 3000), tol), ResumeVerdict::Differs);
        assert_eq!(compare(&stat(10, base), &stat(10, base + 3001), tol), ResumeVerdict::Differs);
    }

    #[test]
    fn test_size_must_match_exactly() {
        assert_eq!(compare(&stat(10, 0), &stat(11, 0), 3000), ResumeVerdict::Differs);
    }

    #[test]
    fn test_stat_failure_fails_open() {
        assert_eq!(compare(&missing(), &stat(10, 0), 3000), ResumeVerdict::Differs);
        assert_eq!(compare(&stat(10, 0), &missing(), 3000), ResumeVerdict::Differs);
    }

    #[tokio::test]
    async fn test_compare_paths_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.mp4");
        let dst = dir.path().join("dst.mp4");
        std::fs::write(&src, b"same").unwrap();
        std::fs::write(&dst, b"same").unwrap();
        filetime::set_file_mtime(&src, filetime::FileTime::from_unix_time(1_700_000_000, 0)).unwrap();
        filetime::set_file_mtime(&dst, filetime::FileTime::from_unix_time(1_700_000_002, 0)).unwrap();

        assert_eq!(compare_paths(&src, &dst, 3000).await, ResumeVerdict::Identical);

        filetime::set_file_mtime(&dst, filetime::FileTime::from_unix_time(1_700_000_010, 0)).unwrap();
        assert_eq!(compare_paths(&src, &dst, 3000).await, ResumeVerdict::Differs);
        assert_eq!(
            compare_paths(&src, &dir.path().join("nope.mp4"), 3000).await,
            ResumeVerdict::Differs
        );
    }
}
