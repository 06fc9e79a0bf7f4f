//! Virtual filesystem navigation
//!
//! A [`Root`] is the canonicalized directory the daemon serves. Every shell
//! connection owns a [`Session`] holding its nickname and working directory.
//! All paths handed out by this module are canonical and lie under the root.

use crate::error::VfsError;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Root {
    path: PathBuf,
    name: String,
}

impl Root {
    /// Open the served directory. It must exist and be a directory.
    pub fn open(path: &Path) -> Result<Self, VfsError> {
        let canonical = path.canonicalize().map_err(|e| VfsError::io(path, e))?;
        if !canonical.is_dir() {
            return Err(VfsError::NotADirectory(canonical));
        }
        let name = canonical
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "/".to_string());
        Ok(Self {
            path: canonical,
            name,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Final segment of the root, used as the visible top of every path
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contains(&self, p: &Path) -> bool {
        p.starts_with(&self.path)
    }

    /// Resolve a client path argument against `cwd`.
    ///
    /// Arguments starting with `/` or whose first segment is the root's name
    /// are anchored at the root; everything else is relative to `cwd`. The
    /// result is canonical (symlinks resolved for the existing part) and must
    /// stay under the root.
    pub fn resolve(&self, cwd: &Path, arg: &str) -> Result<PathBuf, VfsError> {
        self.locate(cwd, arg, true)
    }

    /// Like [`Root::resolve`], but a symlink in the final segment stays a
    /// link: the result names the entry itself, not what it points to.
    /// Used wherever the entry is removed, replaced, created or copied.
    pub fn resolve_entry(&self, cwd: &Path, arg: &str) -> Result<PathBuf, VfsError> {
        self.locate(cwd, arg, false)
    }

    fn locate(&self, cwd: &Path, arg: &str, follow_last: bool) -> Result<PathBuf, VfsError> {
        if arg.contains('\0') {
            return Err(VfsError::OutsideRoot(PathBuf::from(arg)));
        }
        let (base, rest) = self.anchor(cwd, arg);
        let joined = lexical_join(base, rest);
        let canonical = match (joined.parent(), joined.file_name()) {
            (Some(parent), Some(name)) if !follow_last && joined != self.path => {
                canonicalize_existing_prefix(parent)?.join(name)
            }
            _ => canonicalize_existing_prefix(&joined)?,
        };
        if !self.contains(&canonical) {
            return Err(VfsError::OutsideRoot(PathBuf::from(arg)));
        }
        Ok(canonical)
    }

    fn anchor<'a>(&'a self, cwd: &'a Path, arg: &'a str) -> (&'a Path, &'a str) {
        if arg.starts_with('/') {
            return (self.path.as_path(), arg.trim_start_matches('/'));
        }
        match arg.split_once('/') {
            Some((first, rest)) if first == self.name => (self.path.as_path(), rest),
            None if arg == self.name => (self.path.as_path(), ""),
            _ => (cwd, arg),
        }
    }

    /// Client-facing form of a path: `<root name>/<relative path>`
    pub fn display(&self, p: &Path) -> String {
        let mut out = self.name.clone();
        if let Ok(rel) = p.strip_prefix(&self.path) {
            for comp in rel.components() {
                out.push('/');
                out.push_str(&comp.as_os_str().to_string_lossy());
            }
        }
        out
    }
}

/// Join `rest` onto `base` resolving `.` and `..` without touching the disk
fn lexical_join(base: &Path, rest: &str) -> PathBuf {
    let mut out = base.to_path_buf();
    for comp in Path::new(rest).components() {
        match comp {
            Component::Normal(s) => out.push(s),
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    out
}

/// Canonicalize the longest existing ancestor and re-append the missing tail.
/// A dangling symlink anywhere in the path is refused, since creating through
/// it would land wherever it points.
fn canonicalize_existing_prefix(path: &Path) -> Result<PathBuf, VfsError> {
    let mut existing = path.to_path_buf();
    let mut tail = Vec::new();
    loop {
        match existing.canonicalize() {
            Ok(mut canonical) => {
                for seg in tail.iter().rev() {
                    canonical.push(seg);
                }
                return Ok(canonical);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if fs::symlink_metadata(&existing).is_ok() {
                    return Err(VfsError::OutsideRoot(path.to_path_buf()));
                }
                match (existing.file_name(), existing.parent()) {
                    (Some(name), Some(parent)) => {
                        tail.push(name.to_os_string());
                        existing = parent.to_path_buf();
                    }
                    _ => return Err(VfsError::io(path, e)),
                }
            }
            Err(e) => return Err(VfsError::io(path, e)),
        }
    }
}

/// Result of a `cd`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CdOutcome {
    Moved,
    AlreadyAtRoot,
    Unchanged,
}

/// Per-connection shell state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    nick: String,
    cwd: PathBuf,
}

impl Session {
    pub fn new(root: &Root, nick: &str) -> Self {
        Self {
            nick: nick.to_string(),
            cwd: root.path().to_path_buf(),
        }
    }

    pub fn nick(&self) -> &str {
        &self.nick
    }

    pub fn set_nick(&mut self, nick: &str) {
        self.nick = nick.to_string();
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// `<nick>:<root name>/<cwd>/$ `
    pub fn prompt(&self, root: &Root) -> String {
        format!("{}:{}/$ ", self.nick, root.display(&self.cwd))
    }

    pub fn resolve(&self, root: &Root, arg: &str) -> Result<PathBuf, VfsError> {
        root.resolve(&self.cwd, arg)
    }

    pub fn resolve_entry(&self, root: &Root, arg: &str) -> Result<PathBuf, VfsError> {
        root.resolve_entry(&self.cwd, arg)
    }

    pub fn change_dir(&mut self, root: &Root, arg: &str) -> CdOutcome {
        match arg {
            "~" => {
                self.cwd = root.path().to_path_buf();
                CdOutcome::Moved
            }
            ".." => {
                if self.cwd == root.path() {
                    return CdOutcome::AlreadyAtRoot;
                }
                match self.cwd.parent() {
                    Some(parent) if root.contains(parent) => {
                        self.cwd = parent.to_path_buf();
                        CdOutcome::Moved
                    }
                    _ => CdOutcome::Unchanged,
                }
            }
            _ => match self.resolve(root, strip_trailing_dot(arg)) {
                Ok(target) if target.is_dir() => {
                    self.cwd = target;
                    CdOutcome::Moved
                }
                _ => CdOutcome::Unchanged,
            },
        }
    }

    /// Move up until the working directory exists again. Returns true when
    /// the directory had to change.
    pub fn repair_cwd(&mut self, root: &Root) -> bool {
        let mut changed = false;
        while !self.cwd.is_dir() && self.cwd != root.path() {
            changed = true;
            match self.cwd.parent() {
                Some(parent) if root.contains(parent) => self.cwd = parent.to_path_buf(),
                _ => {
                    self.cwd = root.path().to_path_buf();
                    break;
                }
            }
        }
        changed
    }
}

// A lone trailing "." segment is dropped; ".." is left alone
fn strip_trailing_dot(arg: &str) -> &str {
    if arg == "." {
        ""
    } else {
        arg.strip_suffix("/.").unwrap_or(arg)
    }
}
