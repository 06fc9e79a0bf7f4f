//! Blocking transfer service: one thread per connection
//!
//! Session states:
//!   AwaitCommand --upload--> Uploading --> AwaitCommand
//!   AwaitCommand --download--> Downloading --> AwaitCommand
//!   AwaitCommand --exit / EOF--> Closed
//!
//! Every request gets exactly one framed reply, including unknown tokens.

use super::wire;
use crate::logger::Logger;
use crate::protocol::transfer::{
    CHUNK_SIZE, DONE, DOWNLOAD, EXIT, FILE_FOUND, FNF, OK, UNKNOWN, UPLOAD, WRONG,
};
use crate::vfs::Root;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Upload,
    Download,
    Exit,
    Unknown(String),
}

impl Request {
    pub fn parse(token: &str) -> Self {
        match token {
            UPLOAD => Request::Upload,
            DOWNLOAD => Request::Download,
            EXIT => Request::Exit,
            other => Request::Unknown(other.to_string()),
        }
    }
}

pub struct TransferServer {
    listener: TcpListener,
    root: Arc<Root>,
    logger: Arc<dyn Logger>,
}

impl TransferServer {
    pub fn bind(addr: &str, root: Arc<Root>, logger: Arc<dyn Logger>) -> Result<Self> {
        let listener = TcpListener::bind(addr).with_context(|| format!("bind {}", addr))?;
        Ok(Self {
            listener,
            root,
            logger,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept forever, handing each connection to its own thread
    pub fn serve(self) -> Result<()> {
        info!(
            "transfer listening on {} root={}",
            self.local_addr()?,
            self.root.path().display()
        );
        for conn in self.listener.incoming() {
            match conn {
                Ok(stream) => {
                    let peer = match stream.peer_addr() {
                        Ok(peer) => peer,
                        Err(e) => {
                            warn!("dropping connection without peer address: {}", e);
                            continue;
                        }
                    };
                    let _ = stream.set_nodelay(true);
                    let root = Arc::clone(&self.root);
                    let logger = Arc::clone(&self.logger);
                    let spawned = thread::Builder::new()
                        .name(format!("burrow-xfer-{peer}"))
                        .spawn(move || {
                            logger.connect(peer, "transfer");
                            if let Err(e) = handle_session(stream, peer, &root, logger.as_ref()) {
                                warn!(%peer, "transfer session ended with error: {:#}", e);
                            }
                            logger.disconnect(peer, "transfer");
                        });
                    if let Err(e) = spawned {
                        warn!(%peer, "failed to spawn transfer worker: {}", e);
                    }
                }
                Err(e) => warn!("accept error: {}", e),
            }
        }
        Ok(())
    }
}

pub fn handle_session(
    stream: TcpStream,
    peer: SocketAddr,
    root: &Root,
    logger: &dyn Logger,
) -> Result<()> {
    info!(%peer, "transfer client connected");
    let mut reader = BufReader::new(stream.try_clone().context("clone transfer stream")?);
    let mut writer = BufWriter::new(stream);

    loop {
        let token = match wire::read_str(&mut reader) {
            Ok(token) => token,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                info!(%peer, "transfer client disconnected");
                return Ok(());
            }
            Err(e) => return Err(e).context("read command token"),
        };

        match Request::parse(&token) {
            Request::Upload => match receive_upload(&mut reader, root) {
                Ok(Upload::Stored { path, bytes }) => {
                    info!(%peer, "stored {} ({} bytes)", path.display(), bytes);
                    logger.upload(peer, &path, bytes);
                    reply(&mut writer, OK)?;
                }
                Ok(Upload::Rejected { name, reason }) => {
                    warn!(%peer, "upload of {:?} rejected: {}", name, reason);
                    logger.error("upload", root.path(), &format!("{name}: {reason}"));
                    reply(&mut writer, WRONG)?;
                }
                Err(e) => {
                    // stream is no longer aligned on frames; best effort and stop
                    let _ = reply(&mut writer, WRONG);
                    return Err(e).context("upload payload");
                }
            },
            Request::Download => {
                let name = wire::read_str(&mut reader).context("read download name")?;
                match send_download(&mut writer, root, &name)? {
                    Some((path, bytes)) => {
                        info!(%peer, "sent {} ({} bytes)", path.display(), bytes);
                        logger.download(peer, &path, bytes);
                    }
                    None => debug!(%peer, "download of {:?}: not found", name),
                }
            }
            Request::Exit => {
                reply(&mut writer, DONE)?;
                info!(%peer, "transfer client disconnected correctly");
                return Ok(());
            }
            Request::Unknown(token) => {
                warn!(%peer, "unknown transfer command {:?}", token);
                reply(&mut writer, UNKNOWN)?;
            }
        }
    }
}

fn reply<W: Write>(writer: &mut W, token: &str) -> Result<()> {
    wire::write_str(writer, token)?;
    writer.flush().context("flush reply")
}

enum Upload {
    Stored { path: PathBuf, bytes: u64 },
    Rejected { name: String, reason: String },
}

/// Read one upload frame. `Err` means the stream itself failed; file-side
/// failures are `Rejected` after the payload has been consumed.
///
/// The payload lands in a temporary file next to the target, which only
/// replaces the target once every byte has arrived and been synced.
fn receive_upload<R: Read>(reader: &mut R, root: &Root) -> io::Result<Upload> {
    let name = wire::read_str(reader)?;
    let len = wire::read_len(reader)?;

    let path = match root.resolve_entry(root.path(), &name) {
        Ok(path) if path != root.path() => path,
        resolved => {
            wire::drain(reader, len)?;
            let reason = match resolved {
                Err(e) => e.reason(),
                Ok(_) => "is the root folder".to_string(),
            };
            return Ok(Upload::Rejected { name, reason });
        }
    };
    let staged = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no parent directory"))
        .and_then(|dir| {
            tempfile::Builder::new()
                .prefix(".burrow-upload")
                .tempfile_in(dir)
        });
    let mut staged = match staged {
        Ok(file) => file,
        Err(e) => {
            wire::drain(reader, len)?;
            return Ok(Upload::Rejected {
                name,
                reason: e.to_string(),
            });
        }
    };

    // a short read drops `staged`, which deletes it
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut remaining = len;
    let mut write_error = None;
    while remaining > 0 {
        let n = remaining.min(CHUNK_SIZE as u64) as usize;
        reader.read_exact(&mut buf[..n])?;
        if write_error.is_none() {
            if let Err(e) = staged.write_all(&buf[..n]) {
                write_error = Some(e);
            }
        }
        remaining -= n as u64;
    }

    if let Some(e) = write_error.or_else(|| staged.as_file().sync_all().err()) {
        return Ok(Upload::Rejected {
            name,
            reason: e.to_string(),
        });
    }
    match staged.persist(&path) {
        Ok(_) => Ok(Upload::Stored { path, bytes: len }),
        Err(e) => Ok(Upload::Rejected {
            name,
            reason: e.error.to_string(),
        }),
    }
}

/// Answer a download request. `None` when the file is unavailable (only
/// `FNF` was sent).
fn send_download<W: Write>(
    writer: &mut W,
    root: &Root,
    name: &str,
) -> Result<Option<(PathBuf, u64)>> {
    let opened = root
        .resolve(root.path(), name)
        .ok()
        .filter(|p| p.is_file())
        .and_then(|p| {
            let file = File::open(&p).ok()?;
            let len = file.metadata().ok()?.len();
            Some((p, file, len))
        });
    let Some((path, file, len)) = opened else {
        reply(writer, FNF)?;
        return Ok(None);
    };

    wire::write_str(writer, FILE_FOUND)?;
    wire::write_len(writer, len)?;
    wire::copy_exact(&mut BufReader::new(file), writer, len)
        .with_context(|| format!("stream {}", path.display()))?;
    writer.flush().context("flush download")?;
    Ok(Some((path, len)))
}
