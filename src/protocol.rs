//! Shared protocol constants for the shell and transfer services

pub const DEFAULT_SHELL_BIND: &str = "0.0.0.0:5678";
pub const DEFAULT_TRANSFER_BIND: &str = "0.0.0.0:5679";
pub const DEFAULT_ROOT: &str = "server";
pub const DEFAULT_NICK: &str = "User";

/// Line-oriented shell protocol
pub mod shell {
    /// Every response line ends with this (newline, then carriage return)
    pub const LINE_END: &str = "\n\r";

    // Bytes requested per socket read
    pub const READ_BUFFER: usize = 512;

    // Longer lines are discarded and answered with a bare prompt
    pub const DEFAULT_MAX_LINE: usize = 4096;

    // Lines a connection may have waiting behind the running command
    pub const DEFAULT_MAX_PENDING: usize = 256;

    // Replies queued for a peer that is not reading; past this it is dropped
    pub const OUTBOUND_QUEUE: usize = 64;

    pub const HELP_HINT: &str = "Enter --help for support info\n\r";
    pub const FILE_EXISTS: &str = "File already exist\n\r";
    pub const ALREADY_AT_ROOT: &str = "You are already in root folder\n\r";
    pub const CANT_READ: &str = "Can't read file\n\r";

    /// `--help` entries: (usage, description)
    pub const HELP: &[(&str, &str)] = &[
        ("ls", "view all files and directories"),
        ("mkdir [dirname]", "create directory"),
        ("nick [name]", "change nickname"),
        ("touch [filename]", "create new file"),
        ("cat [filename]", "print file contents"),
        ("rm [file | directory]", "delete file or directory"),
        ("cd [path | .. | ~]", "moving through a folder"),
        ("copy [src] [target]", "copy file or folder"),
        ("exit", "close connection"),
    ];

    pub fn greeting(nick: &str) -> String {
        format!("Hello, {}!{}", nick, LINE_END)
    }
}

/// Framed transfer protocol tokens
pub mod transfer {
    // Requests
    pub const UPLOAD: &str = "upload";
    pub const DOWNLOAD: &str = "download";
    pub const EXIT: &str = "exit";

    // Replies
    pub const OK: &str = "OK";
    pub const WRONG: &str = "WRONG";
    pub const DONE: &str = "DONE";
    pub const FNF: &str = "FNF";
    pub const FILE_FOUND: &str = "File found";
    pub const UNKNOWN: &str = "UNKNOWN";

    /// Payload bytes moved per read/write iteration
    pub const CHUNK_SIZE: usize = 8 * 1024;
}
