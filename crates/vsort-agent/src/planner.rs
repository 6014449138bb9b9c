//! Destination planning and no-clobber relocation.
//!
//! Names are `{timestamp}_{smart}{ext}`; on collision `{timestamp}_{smart}_{n}{ext}`
//! with n = 1, 2, ... Existing files are never overwritten: the move itself
//! fails with `AlreadyExists` and the next suffix is tried.

use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDateTime, Timelike};
use vsort_config::log_pipeline_warn;

/// Attempts before giving up on finding a free name.
const MAX_SUFFIX: u32 = 100_000;

/// Moves a file without ever replacing an existing destination.
pub trait FileMover: Send + Sync {
    /// Must fail with `ErrorKind::AlreadyExists` if `to` exists.
    fn move_file(&self, from: &Path, to: &Path) -> io::Result<()>;
}

/// Hard link then unlink (a rename that refuses to clobber). Falls back to
/// an exclusive-create copy when linking is not possible, e.g. across devices.
/// If the source cannot be removed the destination is removed again, so a
/// failed move leaves exactly one file behind: the source.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoClobberMover;

impl NoClobberMover {
    fn move_with<U>(from: &Path, to: &Path, unlink: U) -> io::Result<()>
    where
        U: Fn(&Path) -> io::Result<()>,
    {
        match fs::hard_link(from, to) {
            Ok(()) => return finish_or_undo(from, to, unlink),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Err(e),
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(e),
            Err(_) => {}
        }
        copy_exclusive(from, to)?;
        finish_or_undo(from, to, unlink)
    }
}

impl FileMover for NoClobberMover {
    fn move_file(&self, from: &Path, to: &Path) -> io::Result<()> {
        Self::move_with(from, to, |p| fs::remove_file(p))
    }
}

fn copy_exclusive(from: &Path, to: &Path) -> io::Result<()> {
    let mut src = fs::File::open(from)?;
    let mut dst = OpenOptions::new().write(true).create_new(true).open(to)?;
    if let Err(e) = io::copy(&mut src, &mut dst).and_then(|_| dst.sync_all()) {
        drop(dst);
        let _ = fs::remove_file(to);
        return Err(e);
    }
    Ok(())
}

/// Remove the source; on failure take the placed copy back out.
fn finish_or_undo<U>(from: &Path, to: &Path, unlink: U) -> io::Result<()>
where
    U: Fn(&Path) -> io::Result<()>,
{
    if let Err(e) = unlink(from) {
        if let Err(undo) = fs::remove_file(to) {
            log_pipeline_warn!(
                "Failed to remove destination after a failed move",
                path = %to.display(),
                error = %undo
            );
        }
        return Err(e);
    }
    Ok(())
}

/// Render a timestamp pattern. Tokens: `YYYY MM DD HH mm SS`; anything
/// else is copied through. `MM` after `HH` means minutes, so the default
/// `YYYYMMDD_HHMMSS` reads as date then time.
pub fn format_timestamp(pattern: &str, at: &NaiveDateTime) -> String {
    let mut out = String::with_capacity(pattern.len() + 4);
    let mut rest = pattern;
    let mut in_time = false;
    while !rest.is_empty() {
        let (rendered, len) = if rest.starts_with("YYYY") {
            (format!("{:04}", at.year()), 4)
        } else if rest.starts_with("MM") && in_time {
            (format!("{:02}", at.minute()), 2)
        } else if rest.starts_with("MM") {
            (format!("{:02}", at.month()), 2)
        } else if rest.starts_with("DD") {
            (format!("{:02}", at.day()), 2)
        } else if rest.starts_with("HH") {
            in_time = true;
            (format!("{:02}", at.hour()), 2)
        } else if rest.starts_with("mm") {
            (format!("{:02}", at.minute()), 2)
        } else if rest.starts_with("SS") {
            (format!("{:02}", at.second()), 2)
        } else {
            let c = rest.chars().next().unwrap_or_default();
            (c.to_string(), c.len_utf8())
        };
        out.push_str(&rendered);
        rest = &rest[len..];
    }
    out
}

/// `.ext` of a path, original case kept, or empty.
pub fn dotted_extension(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default()
}

/// Try `dir/base{ext}`, then `dir/base_1{ext}`, ... handing each candidate to
/// `place` until it stops failing with `AlreadyExists`.
pub fn place_without_clobber<F>(dir: &Path, base: &str, ext: &str, mut place: F) -> io::Result<PathBuf>
where
    F: FnMut(&Path) -> io::Result<()>,
{
    for n in 0..MAX_SUFFIX {
        let name = if n == 0 {
            format!("{}{}", base, ext)
        } else {
            format!("{}_{}{}", base, n, ext)
        };
        let candidate = dir.join(name);
        if fs::symlink_metadata(&candidate).is_ok() {
            continue;
        }
        match place(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        ErrorKind::AlreadyExists,
        format!("no free name for {} in {}", base, dir.display()),
    ))
}

/// Computes destinations under the organized root.
#[derive(Debug, Clone)]
pub struct RelocationPlanner {
    organized_root: PathBuf,
    pattern: String,
}

impl RelocationPlanner {
    pub fn new(organized_root: impl Into<PathBuf>, pattern: impl Into<String>) -> Self {
        Self {
            organized_root: organized_root.into(),
            pattern: pattern.into(),
        }
    }

    pub fn organized_root(&self) -> &Path {
        &self.organized_root
    }

    /// `{timestamp}_{smart}` without extension or suffix.
    pub fn base_name(&self, smart: &str, at: &NaiveDateTime) -> String {
        format!("{}_{}", format_timestamp(&self.pattern, at), smart)
    }

    /// Move `from` into `category/`, creating the folder on demand.
    pub fn relocate(
        &self,
        from: &Path,
        category: &str,
        smart: &str,
        at: &NaiveDateTime,
        mover: &dyn FileMover,
    ) -> io::Result<PathBuf> {
        let dir = self.organized_root.join(category);
        fs::create_dir_all(&dir)?;
        let base = self.base_name(smart, at);
        let ext = dotted_extension(from);
        place_without_clobber(&dir, &base, &ext, |to| mover.move_file(from, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 7)
            .unwrap()
            .and_hms_opt(9, 5, 2)
            .unwrap()
    }

    #[test]
    fn test_default_pattern() {
        assert_eq!(format_timestamp("YYYYMMDD_HHMMSS", &at()), "20240307_090502");
    }

    #[test]
    fn test_minute_token_distinct_from_month() {
        assert_eq!(format_timestamp("YYYY-MM-DD HH.mm.SS", &at()), "2024-03-07 09.05.02");
        assert_eq!(format_timestamp("MMmm", &at()), "0305");
        assert_eq!(format_timestamp("été-YYYY", &at()), "été-2024");
    }

    #[test]
    fn test_collisions_get_distinct_paths() {
        let temp = tempfile::tempdir().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(&src).unwrap();
        let planner = RelocationPlanner::new(temp.path().join("organized"), "YYYYMMDD_HHMMSS");

        let mut destinations = Vec::new();
        for i in 0..5 {
            let from = src.join(format!("in{}.txt", i));
            fs::write(&from, format!("content {}", i)).unwrap();
            let to = planner
                .relocate(&from, "Documents", "notes", &at(), &NoClobberMover)
                .unwrap();
            assert!(!from.exists());
            destinations.push(to);
        }

        let names: Vec<String> = destinations
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "20240307_090502_notes.txt",
                "20240307_090502_notes_1.txt",
                "20240307_090502_notes_2.txt",
                "20240307_090502_notes_3.txt",
                "20240307_090502_notes_4.txt",
            ]
        );
        for (i, dest) in destinations.iter().enumerate() {
            assert_eq!(fs::read_to_string(dest).unwrap(), format!("content {}", i));
        }
    }

    #[test]
    fn test_mover_refuses_to_clobber() {
        let temp = tempfile::tempdir().unwrap();
        let from = temp.path().join("a");
        let to = temp.path().join("b");
        fs::write(&from, b"new").unwrap();
        fs::write(&to, b"old").unwrap();

        let err = NoClobberMover.move_file(&from, &to).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(fs::read(&to).unwrap(), b"old");
        assert!(from.exists());
    }

    fn locked(_: &Path) -> io::Result<()> {
        Err(io::Error::new(ErrorKind::PermissionDenied, "source folder is locked"))
    }

    #[test]
    fn test_failed_unlink_leaves_no_destination() {
        let temp = tempfile::tempdir().unwrap();
        let from = temp.path().join("locked.txt");
        let to = temp.path().join("placed.txt");
        fs::write(&from, b"keep me").unwrap();

        let err = NoClobberMover::move_with(&from, &to, locked).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert!(!to.exists());
        assert_eq!(fs::read(&from).unwrap(), b"keep me");
    }

    #[test]
    fn test_failed_unlink_after_copy_leaves_no_destination() {
        let temp = tempfile::tempdir().unwrap();
        let from = temp.path().join("locked.txt");
        let to = temp.path().join("copied.txt");
        fs::write(&from, b"keep me").unwrap();

        copy_exclusive(&from, &to).unwrap();
        let err = finish_or_undo(&from, &to, locked).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert!(!to.exists());
        assert!(from.exists());
    }

    /// Every retry fails at the unlink; the organized tree must stay empty.
    #[test]
    fn test_repeated_failed_moves_leave_no_copies() {
        struct LockedSource;
        impl FileMover for LockedSource {
            fn move_file(&self, from: &Path, to: &Path) -> io::Result<()> {
                NoClobberMover::move_with(from, to, locked)
            }
        }

        let temp = tempfile::tempdir().unwrap();
        let from = temp.path().join("locked.txt");
        fs::write(&from, b"keep me").unwrap();
        let planner = RelocationPlanner::new(temp.path().join("organized"), "YYYYMMDD_HHMMSS");

        for _ in 0..3 {
            planner
                .relocate(&from, "Documents", "locked", &at(), &LockedSource)
                .unwrap_err();
        }
        let left: Vec<_> = fs::read_dir(temp.path().join("organized/Documents"))
            .unwrap()
            .collect();
        assert!(left.is_empty());
        assert!(from.exists());
    }

    #[test]
    fn test_missing_source_is_error() {
        let temp = tempfile::tempdir().unwrap();
        let planner = RelocationPlanner::new(temp.path(), "YYYY");
        let err = planner
            .relocate(&temp.path().join("gone.txt"), "Other", "gone", &at(), &NoClobberMover)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
