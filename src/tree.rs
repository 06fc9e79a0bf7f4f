//! Whole-subtree delete and copy
//!
//! Both walks are iterative (`walkdir` keeps the pending directories), never
//! follow symlinks, and record one outcome per entry. A failing entry never
//! stops the walk.

use crate::error::VfsError;
use crate::logger::Logger;
use crate::vfs::Root;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const NOT_COPYABLE: &str = "not a regular file or directory";

/// What happened to a single entry of a tree operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOutcome {
    Done(PathBuf),
    Failed { path: PathBuf, reason: String },
}

/// Statistics and per-entry results for a tree operation
#[derive(Debug, Default, Clone)]
pub struct TreeReport {
    entries: Vec<EntryOutcome>,
    bytes: u64,
}

impl TreeReport {
    fn done(&mut self, path: &Path) {
        self.entries.push(EntryOutcome::Done(path.to_path_buf()));
    }

    fn failed(&mut self, path: &Path, reason: impl ToString) {
        self.entries.push(EntryOutcome::Failed {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        });
    }

    fn walk_failed(&mut self, fallback: &Path, err: walkdir::Error) {
        let path = err.path().unwrap_or(fallback).to_path_buf();
        self.failed(&path, err);
    }

    pub fn entries(&self) -> &[EntryOutcome] {
        &self.entries
    }

    pub fn failures(&self) -> impl Iterator<Item = (&Path, &str)> {
        self.entries.iter().filter_map(|e| match e {
            EntryOutcome::Failed { path, reason } => Some((path.as_path(), reason.as_str())),
            EntryOutcome::Done(_) => None,
        })
    }

    pub fn succeeded(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, EntryOutcome::Done(_)))
            .count()
    }

    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn bytes_copied(&self) -> u64 {
        self.bytes
    }
}

/// Delete `target` and everything below it, children before their parent.
///
/// The root itself, and any target whose final name equals the root's name,
/// is refused. A symlink target is removed as a link.
pub fn remove_tree(root: &Root, target: &Path, logger: &dyn Logger) -> Result<TreeReport, VfsError> {
    if target == root.path() || target.file_name().is_some_and(|n| n == root.name()) {
        return Err(VfsError::RootProtected);
    }
    let meta = fs::symlink_metadata(target).map_err(|e| VfsError::io(target, e))?;

    let mut report = TreeReport::default();
    if !meta.is_dir() {
        remove_entry(target, &mut report, logger, |p: &Path| fs::remove_file(p));
        return Ok(report);
    }

    for entry in WalkDir::new(target).follow_links(false).contents_first(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                report.walk_failed(target, e);
                continue;
            }
        };
        if entry.file_type().is_dir() {
            remove_entry(entry.path(), &mut report, logger, |p: &Path| fs::remove_dir(p));
        } else {
            remove_entry(entry.path(), &mut report, logger, |p: &Path| fs::remove_file(p));
        }
    }
    Ok(report)
}

fn remove_entry(
    path: &Path,
    report: &mut TreeReport,
    logger: &dyn Logger,
    remove: impl Fn(&Path) -> io::Result<()>,
) {
    match remove(path) {
        Ok(()) => {
            logger.delete(path);
            report.done(path);
        }
        Err(e) => {
            logger.error("delete", path, &e.to_string());
            report.failed(path, e);
        }
    }
}

/// Copy `src` (file or directory) to `dst_dir/<name of src>`, parents before
/// children, siblings in name order.
///
/// Existing destination files are never overwritten; such collisions are
/// recorded as failures. A directory that already exists is recorded too,
/// but its children are still copied into it. Symlinks are recorded as
/// failures and never followed.
pub fn copy_tree(
    src: &Path,
    dst_dir: &Path,
    logger: &dyn Logger,
) -> Result<TreeReport, VfsError> {
    let meta = fs::symlink_metadata(src).map_err(|e| VfsError::io(src, e))?;
    if !dst_dir.is_dir() {
        return Err(VfsError::NotADirectory(dst_dir.to_path_buf()));
    }
    let name = src
        .file_name()
        .ok_or_else(|| VfsError::NotFound(src.to_path_buf()))?;
    let dest_root = dst_dir.join(name);
    if meta.is_dir() && dest_root.starts_with(src) {
        return Err(VfsError::CopyIntoSelf(src.to_path_buf()));
    }

    let mut report = TreeReport::default();
    if meta.file_type().is_symlink() {
        report.failed(src, NOT_COPYABLE);
        return Ok(report);
    }

    let mut walk = WalkDir::new(src)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();
    while let Some(entry) = walk.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                report.walk_failed(src, e);
                continue;
            }
        };
        let from = entry.path();
        let to = match from.strip_prefix(src) {
            Ok(rel) if entry.depth() > 0 => dest_root.join(rel),
            _ => dest_root.clone(),
        };

        let ft = entry.file_type();
        if ft.is_dir() {
            match fs::create_dir(&to) {
                Ok(()) => report.done(&to),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists && to.is_dir() => {
                    report.failed(&to, e);
                }
                Err(e) => {
                    logger.error("copy", &to, &e.to_string());
                    report.failed(&to, e);
                    walk.skip_current_dir();
                }
            }
        } else if ft.is_file() {
            match copy_file(from, &to) {
                Ok(bytes) => {
                    logger.copy_done(from, &to, bytes);
                    report.bytes += bytes;
                    report.done(&to);
                }
                Err(e) => {
                    logger.error("copy", from, &e.to_string());
                    report.failed(&to, e);
                }
            }
        } else {
            report.failed(from, NOT_COPYABLE);
        }
    }
    Ok(report)
}

/// Byte-for-byte copy into a file that must not exist yet
fn copy_file(src: &Path, dst: &Path) -> io::Result<u64> {
    let mut reader = BufReader::new(File::open(src)?);
    let out = OpenOptions::new().write(true).create_new(true).open(dst)?;
    let mut writer = BufWriter::new(out);
    let result = io::copy(&mut reader, &mut writer).and_then(|n| writer.flush().map(|_| n));
    if result.is_err() {
        drop(writer);
        let _ = fs::remove_file(dst);
    }
    result
}
