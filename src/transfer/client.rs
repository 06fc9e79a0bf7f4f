//! Blocking client for the transfer protocol

use super::wire;
use crate::protocol::transfer::{DONE, DOWNLOAD, EXIT, FILE_FOUND, FNF, OK, UPLOAD, WRONG};
use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;

pub struct TransferClient {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl TransferClient {
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = TcpStream::connect(addr).context("connect to transfer service")?;
        let _ = stream.set_nodelay(true);
        Ok(Self {
            reader: BufReader::new(stream.try_clone()?),
            writer: BufWriter::new(stream),
        })
    }

    pub fn upload(&mut self, name: &str, data: &[u8]) -> Result<()> {
        self.upload_from(name, &mut &data[..], data.len() as u64)
    }

    pub fn upload_file(&mut self, local: &Path, name: &str) -> Result<u64> {
        let file = File::open(local).with_context(|| format!("open {}", local.display()))?;
        let len = file.metadata()?.len();
        self.upload_from(name, &mut BufReader::new(file), len)?;
        Ok(len)
    }

    /// Send `len` bytes from `source` as `name`
    pub fn upload_from<R: Read>(&mut self, name: &str, source: &mut R, len: u64) -> Result<()> {
        wire::write_str(&mut self.writer, UPLOAD)?;
        wire::write_str(&mut self.writer, name)?;
        wire::write_len(&mut self.writer, len)?;
        wire::copy_exact(source, &mut self.writer, len).context("send upload payload")?;
        self.writer.flush()?;

        match self.read_reply()?.as_str() {
            OK => Ok(()),
            WRONG => bail!("server rejected upload of {}", name),
            other => bail!("unexpected reply to upload: {:?}", other),
        }
    }

    pub fn download(&mut self, name: &str) -> Result<Option<Vec<u8>>> {
        let mut data = Vec::new();
        Ok(self.download_to(name, &mut data)?.map(|_| data))
    }

    pub fn download_file(&mut self, name: &str, local: &Path) -> Result<Option<u64>> {
        // only create the local file once the server has it
        self.request_download(name)?;
        match self.read_reply()?.as_str() {
            FNF => Ok(None),
            FILE_FOUND => {
                let mut out = BufWriter::new(
                    File::create(local).with_context(|| format!("create {}", local.display()))?,
                );
                let n = self.receive_payload(&mut out)?;
                out.flush()?;
                Ok(Some(n))
            }
            other => bail!("unexpected reply to download: {:?}", other),
        }
    }

    /// Stream `name` into `sink`. `None` when the server reports `FNF`.
    pub fn download_to<W: Write>(&mut self, name: &str, sink: &mut W) -> Result<Option<u64>> {
        self.request_download(name)?;
        match self.read_reply()?.as_str() {
            FNF => Ok(None),
            FILE_FOUND => Ok(Some(self.receive_payload(sink)?)),
            other => bail!("unexpected reply to download: {:?}", other),
        }
    }

    /// Send an arbitrary command token and return the server's reply token
    pub fn send_token(&mut self, token: &str) -> Result<String> {
        wire::write_str(&mut self.writer, token)?;
        self.writer.flush()?;
        self.read_reply()
    }

    pub fn exit(mut self) -> Result<()> {
        match self.send_token(EXIT)?.as_str() {
            DONE => Ok(()),
            other => bail!("unexpected reply to exit: {:?}", other),
        }
    }

    fn request_download(&mut self, name: &str) -> Result<()> {
        wire::write_str(&mut self.writer, DOWNLOAD)?;
        wire::write_str(&mut self.writer, name)?;
        self.writer.flush()?;
        Ok(())
    }

    fn receive_payload<W: Write>(&mut self, sink: &mut W) -> Result<u64> {
        let len = wire::read_len(&mut self.reader).context("read download length")?;
        wire::copy_exact(&mut self.reader, sink, len).context("receive download payload")
    }

    fn read_reply(&mut self) -> Result<String> {
        wire::read_str(&mut self.reader).context("read reply")
    }
}
