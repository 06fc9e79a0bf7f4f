//! Connection multiplexer for the line shell
//!
//! One dispatch task owns every session. It waits on two things only: the
//! listener and an event channel fed by per-connection reader tasks and by
//! the worker pool. Commands for a connection run one at a time, in arrival
//! order; filesystem work never runs on the dispatch task itself.

use super::command::{run_line, Reply};
use crate::logger::Logger;
use crate::protocol::shell::{
    greeting, DEFAULT_MAX_LINE, DEFAULT_MAX_PENDING, HELP_HINT, OUTBOUND_QUEUE, READ_BUFFER,
};
use crate::protocol::DEFAULT_NICK;
use crate::vfs::{Root, Session};
use anyhow::{Context, Result};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct ShellOptions {
    /// Nickname every new session starts with
    pub nick: String,
    /// Worker pool size (0 = one per CPU)
    pub workers: usize,
    pub max_line: usize,
    /// Queued lines per connection before it is dropped
    pub max_pending: usize,
}

impl Default for ShellOptions {
    fn default() -> Self {
        Self {
            nick: DEFAULT_NICK.to_string(),
            workers: 0,
            max_line: DEFAULT_MAX_LINE,
            max_pending: DEFAULT_MAX_PENDING,
        }
    }
}

/// Splits a byte stream into command lines.
///
/// `\n`, `\r` and `\r\n` all end a line. Overlong lines are dropped and come
/// out as an empty line.
#[derive(Debug)]
pub struct LineDecoder {
    buf: Vec<u8>,
    max_line: usize,
    overflow: bool,
    after_cr: bool,
}

impl LineDecoder {
    pub fn new(max_line: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_line,
            overflow: false,
            after_cr: false,
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in bytes {
            match b {
                // second half of CRLF, or telnet's CR NUL
                b'\n' | b'\0' if self.after_cr => self.after_cr = false,
                b'\n' | b'\r' => {
                    self.after_cr = b == b'\r';
                    lines.push(self.take_line());
                }
                _ => {
                    self.after_cr = false;
                    if self.buf.len() < self.max_line {
                        self.buf.push(b);
                    } else {
                        self.overflow = true;
                    }
                }
            }
        }
        lines
    }

    fn take_line(&mut self) -> String {
        let line = if self.overflow {
            String::new()
        } else {
            String::from_utf8_lossy(&self.buf).into_owned()
        };
        self.buf.clear();
        self.overflow = false;
        line
    }
}

enum Event {
    Line { peer: SocketAddr, line: String },
    Closed { peer: SocketAddr },
    Finished { peer: SocketAddr, session: Session, reply: Reply },
}

struct Connection {
    // None while a worker holds the session
    session: Option<Session>,
    pending: VecDeque<String>,
    outbound: mpsc::Sender<Vec<u8>>,
    reader: JoinHandle<()>,
    closing: bool,
}

impl Connection {
    /// Queue output for the writer task. False when the peer has stopped
    /// reading and the queue is full, or the writer is gone.
    fn send(&self, bytes: Vec<u8>) -> bool {
        self.outbound.try_send(bytes).is_ok()
    }
}

pub struct Multiplexer {
    listener: TcpListener,
    root: Arc<Root>,
    opts: ShellOptions,
    pool: rayon::ThreadPool,
    logger: Arc<dyn Logger>,
    connections: HashMap<SocketAddr, Connection>,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
}

impl Multiplexer {
    pub async fn bind(
        addr: &str,
        root: Arc<Root>,
        opts: ShellOptions,
        logger: Arc<dyn Logger>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("bind {}", addr))?;
        let workers = if opts.workers == 0 {
            num_cpus::get()
        } else {
            opts.workers
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("burrow-fs-{i}"))
            .build()
            .context("Failed to build worker pool")?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(Self {
            listener,
            root,
            opts,
            pool,
            logger,
            connections: HashMap::new(),
            events_tx,
            events_rx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(mut self) -> Result<()> {
        info!(
            "shell listening on {} root={}",
            self.local_addr()?,
            self.root.path().display()
        );
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.accept(stream, peer),
                    Err(e) => warn!("accept error: {}", e),
                },
                Some(event) = self.events_rx.recv() => self.handle_event(event),
            }
        }
    }

    fn accept(&mut self, stream: TcpStream, peer: SocketAddr) {
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        tokio::spawn(write_loop(write_half, outbound_rx, peer));
        let reader = tokio::spawn(read_loop(
            read_half,
            peer,
            self.opts.max_line,
            self.events_tx.clone(),
        ));

        let session = Session::new(&self.root, &self.opts.nick);
        let _ = outbound.try_send(greeting(session.nick()).into_bytes());
        let _ = outbound.try_send(HELP_HINT.as_bytes().to_vec());

        info!(%peer, "client accepted");
        self.logger.connect(peer, "shell");
        self.connections.insert(
            peer,
            Connection {
                session: Some(session),
                pending: VecDeque::new(),
                outbound,
                reader,
                closing: false,
            },
        );
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Line { peer, line } => {
                let Some(conn) = self.connections.get_mut(&peer) else {
                    return;
                };
                conn.pending.push_back(line);
                if conn.pending.len() > self.opts.max_pending {
                    warn!(%peer, "more than {} commands queued, dropping", self.opts.max_pending);
                    self.remove(peer);
                    return;
                }
                self.pump(peer);
            }
            Event::Closed { peer } => {
                if let Some(conn) = self.connections.get_mut(&peer) {
                    debug!(%peer, "peer closed");
                    conn.closing = true;
                }
                self.pump(peer);
            }
            Event::Finished {
                peer,
                session,
                reply,
            } => {
                let Some(conn) = self.connections.get_mut(&peer) else {
                    return;
                };
                if !reply.output.is_empty() && !conn.send(reply.output.into_bytes()) {
                    warn!(%peer, "peer is not reading replies, dropping");
                    self.remove(peer);
                    return;
                }
                if reply.close {
                    info!(%peer, "client logged out");
                    self.remove(peer);
                    return;
                }
                conn.session = Some(session);
                self.pump(peer);
            }
        }
    }

    /// Start the next queued command if the connection is idle
    fn pump(&mut self, peer: SocketAddr) {
        let Some(conn) = self.connections.get_mut(&peer) else {
            return;
        };
        let Some(session) = conn.session.take() else {
            return;
        };
        match conn.pending.pop_front() {
            Some(line) => self.dispatch(peer, session, line),
            None => {
                conn.session = Some(session);
                if conn.closing {
                    self.remove(peer);
                }
            }
        }
    }

    fn dispatch(&self, peer: SocketAddr, mut session: Session, line: String) {
        debug!(%peer, line = %line, "dispatching command");
        self.logger.command(peer, &line);
        let root = Arc::clone(&self.root);
        let logger = Arc::clone(&self.logger);
        let events = self.events_tx.clone();
        self.pool.spawn(move || {
            let before = session.clone();
            let reply = match panic::catch_unwind(AssertUnwindSafe(|| {
                run_line(&line, &mut session, &root, logger.as_ref())
            })) {
                Ok(reply) => reply,
                Err(_) => {
                    error!(%peer, "command panicked: {:?}", line);
                    session = before;
                    Reply {
                        output: session.prompt(&root),
                        close: false,
                    }
                }
            };
            let _ = events.send(Event::Finished {
                peer,
                session,
                reply,
            });
        });
    }

    fn remove(&mut self, peer: SocketAddr) {
        if let Some(conn) = self.connections.remove(&peer) {
            conn.reader.abort();
            self.logger.disconnect(peer, "shell");
            info!(%peer, "connection closed");
        }
    }
}

async fn read_loop(
    mut half: OwnedReadHalf,
    peer: SocketAddr,
    max_line: usize,
    events: mpsc::UnboundedSender<Event>,
) {
    let mut buf = [0u8; READ_BUFFER];
    let mut decoder = LineDecoder::new(max_line);
    loop {
        match half.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                for line in decoder.feed(&buf[..n]) {
                    if events.send(Event::Line { peer, line }).is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                debug!(%peer, "read failed: {}", e);
                break;
            }
        }
    }
    let _ = events.send(Event::Closed { peer });
}

// Drains queued replies; closes the socket once the connection is dropped
async fn write_loop(
    mut half: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<Vec<u8>>,
    peer: SocketAddr,
) {
    while let Some(buf) = outbound.recv().await {
        if let Err(e) = half.write_all(&buf).await {
            debug!(%peer, "write failed: {}", e);
            break;
        }
    }
    let _ = half.shutdown().await;
}
