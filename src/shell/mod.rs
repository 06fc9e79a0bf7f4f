//! Line-oriented remote shell over the served root

pub mod command;
pub mod server;

pub use command::{execute, run_line, Command, Reply};
pub use server::{LineDecoder, Multiplexer, ShellOptions};
