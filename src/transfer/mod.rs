//! Framed whole-file upload/download service

pub mod client;
pub mod server;
pub mod wire;

pub use client::TransferClient;
pub use server::{Request, TransferServer};
