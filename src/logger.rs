//! Audit trail of client activity, separate from `tracing` diagnostics

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;

/// Every hook defaults to a no-op.
pub trait Logger: Send + Sync {
    fn connect(&self, _peer: SocketAddr, _service: &str) {}
    fn disconnect(&self, _peer: SocketAddr, _service: &str) {}
    fn command(&self, _peer: SocketAddr, _line: &str) {}
    fn copy_done(&self, _src: &Path, _dst: &Path, _bytes: u64) {}
    fn delete(&self, _path: &Path) {}
    fn upload(&self, _peer: SocketAddr, _path: &Path, _bytes: u64) {}
    fn download(&self, _peer: SocketAddr, _path: &Path, _bytes: u64) {}
    fn error(&self, _context: &str, _path: &Path, _msg: &str) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

/// Append-only text log, one timestamped line per event
pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open audit log {}", path.display()))?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        let mut f = self.file.lock();
        let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
    }
}

impl Logger for TextLogger {
    fn connect(&self, peer: SocketAddr, service: &str) {
        self.line(&format!("CONNECT peer={peer} service={service}"));
    }
    fn disconnect(&self, peer: SocketAddr, service: &str) {
        self.line(&format!("DISCONNECT peer={peer} service={service}"));
    }
    fn command(&self, peer: SocketAddr, line: &str) {
        self.line(&format!("COMMAND peer={peer} line={line:?}"));
    }
    fn copy_done(&self, src: &Path, dst: &Path, bytes: u64) {
        self.line(&format!(
            "COPY src={} dst={} bytes={}",
            src.display(),
            dst.display(),
            bytes
        ));
    }
    fn delete(&self, path: &Path) {
        self.line(&format!("DELETE path={}", path.display()));
    }
    fn upload(&self, peer: SocketAddr, path: &Path, bytes: u64) {
        self.line(&format!(
            "UPLOAD peer={} path={} bytes={}",
            peer,
            path.display(),
            bytes
        ));
    }
    fn download(&self, peer: SocketAddr, path: &Path, bytes: u64) {
        self.line(&format!(
            "DOWNLOAD peer={} path={} bytes={}",
            peer,
            path.display(),
            bytes
        ));
    }
    fn error(&self, context: &str, path: &Path, msg: &str) {
        self.line(&format!("ERROR ctx={} path={} msg={}", context, path.display(), msg));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_logger_appends_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("logs/audit.log");
        let logger = TextLogger::new(&path).unwrap();
        let peer: SocketAddr = "127.0.0.1:4000".parse().unwrap();

        logger.connect(peer, "shell");
        logger.delete(Path::new("/srv/a.txt"));
        logger.error("copy", Path::new("/srv/b"), "boom");
        drop(logger);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("CONNECT peer=127.0.0.1:4000 service=shell"));
        assert!(lines[1].contains("DELETE path=/srv/a.txt"));
        assert!(lines[2].contains("ERROR ctx=copy"));
        assert!(lines.iter().all(|l| l.starts_with('[')));
    }

    #[test]
    fn test_text_logger_reopens_in_append_mode() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("audit.log");
        TextLogger::new(&path).unwrap().delete(Path::new("one"));
        TextLogger::new(&path).unwrap().delete(Path::new("two"));
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
    }
}
