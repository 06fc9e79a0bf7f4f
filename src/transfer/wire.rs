//! Wire encoding for the transfer protocol
//!
//! Strings: u16 big-endian byte length | UTF-8 bytes
//! Lengths: u64 big-endian
//! Payloads: raw bytes, moved in `CHUNK_SIZE` pieces

use crate::protocol::transfer::CHUNK_SIZE;
use std::io::{self, Read, Write};

pub fn read_str<R: Read>(r: &mut R) -> io::Result<String> {
    let mut len = [0u8; 2];
    r.read_exact(&mut len)?;
    let mut buf = vec![0u8; u16::from_be_bytes(len) as usize];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

pub fn write_str<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    let len = u16::try_from(s.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("string of {} bytes does not fit a frame", s.len()),
        )
    })?;
    w.write_all(&len.to_be_bytes())?;
    w.write_all(s.as_bytes())
}

pub fn read_len<R: Read>(r: &mut R) -> io::Result<u64> {
    let mut len = [0u8; 8];
    r.read_exact(&mut len)?;
    Ok(u64::from_be_bytes(len))
}

pub fn write_len<W: Write>(w: &mut W, len: u64) -> io::Result<()> {
    w.write_all(&len.to_be_bytes())
}

/// Move exactly `len` bytes from `r` to `w`. Running out early is
/// `UnexpectedEof`.
pub fn copy_exact<R: Read, W: Write>(r: &mut R, w: &mut W, len: u64) -> io::Result<u64> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut remaining = len;
    while remaining > 0 {
        let n = remaining.min(CHUNK_SIZE as u64) as usize;
        r.read_exact(&mut buf[..n])?;
        w.write_all(&buf[..n])?;
        remaining -= n as u64;
    }
    Ok(len)
}

/// Consume and discard `len` bytes to keep the stream aligned on frames
pub fn drain<R: Read>(r: &mut R, len: u64) -> io::Result<()> {
    copy_exact(r, &mut io::sink(), len).map(|_| ())
}
