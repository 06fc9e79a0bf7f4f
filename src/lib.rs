//! Burrow library
//!
//! A remote line-oriented shell and a framed whole-file transfer service,
//! both confined to one served directory root.

pub mod cli;
pub mod config;
pub mod error;
pub mod logger;
pub mod protocol;
pub mod shell;
pub mod transfer;
pub mod tree;
pub mod vfs;
