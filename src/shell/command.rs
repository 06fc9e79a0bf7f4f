//! Command parsing and execution for the line shell

use crate::error::VfsError;
use crate::logger::Logger;
use crate::protocol::shell::{ALREADY_AT_ROOT, CANT_READ, FILE_EXISTS, HELP, LINE_END};
use crate::tree::{self, TreeReport};
use crate::vfs::{CdOutcome, Root, Session};
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    List,
    Exit,
    Nick(String),
    Touch(String),
    Remove(String),
    MakeDir(String),
    ChangeDir(String),
    Cat(String),
    Copy { src: String, dst: String },
    Unknown,
}

impl Command {
    /// Split on whitespace and dispatch on arity + verb
    pub fn parse(line: &str) -> Self {
        let args: Vec<&str> = line.split_whitespace().collect();
        match args.as_slice() {
            ["--help"] => Command::Help,
            ["ls"] => Command::List,
            ["exit"] => Command::Exit,
            ["nick", name] => Command::Nick(name.to_string()),
            ["touch", name] => Command::Touch(name.to_string()),
            ["rm", path] => Command::Remove(path.to_string()),
            ["mkdir", name] => Command::MakeDir(name.to_string()),
            ["cd", path] => Command::ChangeDir(path.to_string()),
            ["cat", name] => Command::Cat(name.to_string()),
            ["copy", src, dst] => Command::Copy {
                src: src.to_string(),
                dst: dst.to_string(),
            },
            _ => Command::Unknown,
        }
    }
}

/// Text to send back, and whether the connection should close afterwards
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reply {
    pub output: String,
    pub close: bool,
}

impl Reply {
    fn line(&mut self, text: &str) {
        self.output.push_str(text);
        self.output.push_str(LINE_END);
    }
}

/// Parse and execute one received line, appending the prompt unless the
/// connection is closing.
pub fn run_line(line: &str, session: &mut Session, root: &Root, logger: &dyn Logger) -> Reply {
    if session.repair_cwd(root) {
        debug!(cwd = %session.cwd().display(), "working directory vanished, moved up");
    }
    let mut reply = execute(&Command::parse(line), session, root, logger);
    if !reply.close {
        reply.output.push_str(&session.prompt(root));
    }
    reply
}

pub fn execute(cmd: &Command, session: &mut Session, root: &Root, logger: &dyn Logger) -> Reply {
    let mut reply = Reply::default();
    match cmd {
        Command::Help => {
            for (usage, desc) in HELP {
                reply.output.push_str(&format!("\t{usage}    {desc}{LINE_END}"));
            }
        }
        Command::List => match list(session) {
            Ok(names) => reply.line(&names.join(" ")),
            Err(e) => warn!(cwd = %session.cwd().display(), "ls failed: {}", e),
        },
        Command::Exit => reply.close = true,
        Command::Nick(name) => session.set_nick(name),
        Command::Touch(name) => touch(session, root, name, &mut reply),
        Command::Remove(path) => remove(session, root, path, logger, &mut reply),
        Command::MakeDir(name) => match session.resolve(root, name) {
            Ok(dir) => {
                if let Err(e) = fs::create_dir_all(&dir) {
                    reply.line(&format!("mkdir failed: {}: {}", name, e));
                }
            }
            Err(e) => rejected("mkdir", name, &e, &mut reply),
        },
        Command::ChangeDir(path) => {
            if session.change_dir(root, path) == CdOutcome::AlreadyAtRoot {
                reply.output.push_str(ALREADY_AT_ROOT);
            }
        }
        Command::Cat(name) => match session.resolve(root, name).and_then(|p| read_lines(&p)) {
            Ok(lines) => {
                for l in lines {
                    reply.line(&l);
                }
            }
            Err(e) => {
                debug!("cat {} failed: {}", name, e);
                reply.output.push_str(CANT_READ);
            }
        },
        Command::Copy { src, dst } => copy(session, root, src, dst, logger, &mut reply),
        Command::Unknown => {}
    }
    reply
}

fn list(session: &Session) -> io::Result<Vec<String>> {
    let mut names: Vec<String> = fs::read_dir(session.cwd())?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    Ok(names)
}

fn touch(session: &Session, root: &Root, name: &str, reply: &mut Reply) {
    let path = match session.resolve_entry(root, name) {
        Ok(p) => p,
        Err(e) => return rejected("touch", name, &e, reply),
    };
    match OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => reply.output.push_str(FILE_EXISTS),
        Err(e) => reply.line(&format!("touch failed: {}: {}", name, e)),
    }
}

fn remove(session: &mut Session, root: &Root, arg: &str, logger: &dyn Logger, reply: &mut Reply) {
    let result = session
        .resolve_entry(root, arg)
        .and_then(|target| tree::remove_tree(root, &target, logger));
    match result {
        Ok(report) => report_failures("rm", root, &report, reply),
        Err(VfsError::RootProtected) => warn!("refusing to remove root via {:?}", arg),
        Err(VfsError::NotFound(_)) => debug!("rm {}: nothing to remove", arg),
        Err(e) => rejected("rm", arg, &e, reply),
    }
    session.repair_cwd(root);
}

fn copy(
    session: &Session,
    root: &Root,
    src: &str,
    dst: &str,
    logger: &dyn Logger,
    reply: &mut Reply,
) {
    let from = match session.resolve_entry(root, src) {
        Ok(p) => p,
        Err(e) => return rejected("copy", src, &e, reply),
    };
    let to = match session.resolve(root, dst) {
        Ok(p) => p,
        Err(e) => return rejected("copy", dst, &e, reply),
    };
    match tree::copy_tree(&from, &to, logger) {
        Ok(report) => report_failures("copy", root, &report, reply),
        Err(e) => rejected("copy", src, &e, reply),
    }
}

fn read_lines(path: &std::path::Path) -> Result<Vec<String>, VfsError> {
    let file = fs::File::open(path).map_err(|e| VfsError::io(path, e))?;
    BufReader::new(file)
        .lines()
        .collect::<io::Result<Vec<String>>>()
        .map_err(|e| VfsError::io(path, e))
}

/// Top-level failure of a command. Paths outside the root get no reply.
fn rejected(op: &str, arg: &str, err: &VfsError, reply: &mut Reply) {
    match err {
        VfsError::OutsideRoot(_) => warn!("{} {:?} rejected: {}", op, arg, err),
        _ => reply.line(&format!("{} failed: {}: {}", op, arg, err.reason())),
    }
}

fn report_failures(op: &str, root: &Root, report: &TreeReport, reply: &mut Reply) {
    for (path, reason) in report.failures() {
        reply.line(&format!("{} failed: {}: {}", op, root.display(path), reason));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::NoopLogger;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Root, Session) {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("server");
        fs::create_dir(&dir).unwrap();
        let root = Root::open(&dir).unwrap();
        let session = Session::new(&root, "User");
        (tmp, root, session)
    }

    fn run(line: &str, session: &mut Session, root: &Root) -> String {
        run_line(line, session, root, &NoopLogger).output
    }

    #[test]
    fn test_parse_by_arity() {
        assert_eq!(Command::parse("ls\r\n"), Command::List);
        assert_eq!(Command::parse("  cd   docs "), Command::ChangeDir("docs".into()));
        assert_eq!(
            Command::parse("copy a b"),
            Command::Copy {
                src: "a".into(),
                dst: "b".into()
            }
        );
        assert_eq!(Command::parse("ls extra"), Command::Unknown);
        assert_eq!(Command::parse("copy a"), Command::Unknown);
        assert_eq!(Command::parse("cd"), Command::Unknown);
        assert_eq!(Command::parse(""), Command::Unknown);
        assert_eq!(Command::parse("rmdir x"), Command::Unknown);
    }

    #[test]
    fn test_unknown_yields_only_prompt() {
        let (_tmp, root, mut s) = setup();
        assert_eq!(run("frobnicate", &mut s, &root), "User:server/$ ");
        assert_eq!(run("", &mut s, &root), "User:server/$ ");
        assert_eq!(run("touch a b c", &mut s, &root), "User:server/$ ");
    }

    #[test]
    fn test_help_lists_every_command() {
        let (_tmp, root, mut s) = setup();
        let out = run("--help", &mut s, &root);
        for verb in ["ls", "mkdir", "nick", "touch", "cat", "rm", "cd", "copy", "exit"] {
            assert!(out.contains(&format!("\t{verb}")), "missing {verb}");
        }
        assert!(out.ends_with("\n\rUser:server/$ "));
    }

    #[test]
    fn test_mkdir_then_ls() {
        let (_tmp, root, mut s) = setup();
        run("mkdir foo", &mut s, &root);
        run("mkdir a/b/c", &mut s, &root);
        assert_eq!(run("ls", &mut s, &root), "a foo\n\rUser:server/$ ");
        assert!(root.path().join("a/b/c").is_dir());
    }

    #[test]
    fn test_cd_up_at_root() {
        let (_tmp, root, mut s) = setup();
        assert_eq!(
            run("cd ..", &mut s, &root),
            "You are already in root folder\n\rUser:server/$ "
        );
        assert_eq!(s.cwd(), root.path());
    }

    #[test]
    fn test_touch_existing_keeps_contents() {
        let (_tmp, root, mut s) = setup();
        assert_eq!(run("touch a.txt", &mut s, &root), "User:server/$ ");
        fs::write(root.path().join("a.txt"), "data").unwrap();
        assert_eq!(
            run("touch a.txt", &mut s, &root),
            "File already exist\n\rUser:server/$ "
        );
        assert_eq!(fs::read_to_string(root.path().join("a.txt")).unwrap(), "data");
    }

    #[test]
    fn test_nick_changes_prompt() {
        let (_tmp, root, mut s) = setup();
        assert_eq!(run("nick alice", &mut s, &root), "alice:server/$ ");
    }

    #[test]
    fn test_cat_lines_and_failures() {
        let (_tmp, root, mut s) = setup();
        fs::write(root.path().join("notes.txt"), "one\ntwo\n").unwrap();
        fs::create_dir(root.path().join("dir")).unwrap();

        assert_eq!(
            run("cat notes.txt", &mut s, &root),
            "one\n\rtwo\n\rUser:server/$ "
        );
        assert_eq!(run("cat missing", &mut s, &root), "Can't read file\n\rUser:server/$ ");
        assert_eq!(run("cat dir", &mut s, &root), "Can't read file\n\rUser:server/$ ");
        fs::write(root.path().join("bin"), [0xffu8, 0xfe, 0x00]).unwrap();
        assert_eq!(run("cat bin", &mut s, &root), "Can't read file\n\rUser:server/$ ");
    }

    #[test]
    fn test_rm_root_is_noop() {
        let (_tmp, root, mut s) = setup();
        fs::write(root.path().join("keep.txt"), "x").unwrap();
        for arg in ["server", "/", ".", "~"] {
            assert_eq!(run(&format!("rm {arg}"), &mut s, &root), "User:server/$ ");
        }
        assert!(root.path().join("keep.txt").exists());
    }

    #[test]
    fn test_rm_cwd_moves_to_nearest_ancestor() {
        let (_tmp, root, mut s) = setup();
        run("mkdir a/b/c", &mut s, &root);
        run("cd a/b/c", &mut s, &root);
        assert_eq!(run("rm server/a/b", &mut s, &root), "User:server/a/$ ");
        assert!(!root.path().join("a/b").exists());
    }

    #[test]
    fn test_other_session_is_repaired_on_next_command() {
        let (_tmp, root, mut s) = setup();
        let mut other = Session::new(&root, "Bob");
        run("mkdir x/y", &mut s, &root);
        run("cd x/y", &mut other, &root);
        run("rm x", &mut s, &root);
        assert_eq!(run("ls", &mut other, &root), "\n\rBob:server/$ ");
    }

    #[test]
    fn test_copy_and_failure_lines() {
        let (_tmp, root, mut s) = setup();
        run("mkdir src/inner", &mut s, &root);
        fs::write(root.path().join("src/inner/f.txt"), "payload").unwrap();
        run("mkdir dst", &mut s, &root);

        assert_eq!(run("copy src dst", &mut s, &root), "User:server/$ ");
        assert_eq!(
            fs::read_to_string(root.path().join("dst/src/inner/f.txt")).unwrap(),
            "payload"
        );

        let out = run("copy src/inner/f.txt dst/src/inner", &mut s, &root);
        assert!(out.starts_with("copy failed: server/dst/src/inner/f.txt: "), "{out}");
        assert!(out.ends_with("\n\rUser:server/$ "));
        assert_eq!(out.matches("\n\r").count(), 1);
        assert_eq!(
            run("copy nope dst", &mut s, &root),
            "copy failed: nope: no such file or directory\n\rUser:server/$ "
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_rm_and_copy_do_not_follow_symlinks() {
        let (_tmp, root, mut s) = setup();
        fs::create_dir_all(root.path().join("docs")).unwrap();
        fs::write(root.path().join("docs/keep.txt"), "keep").unwrap();
        fs::create_dir(root.path().join("dst")).unwrap();
        std::os::unix::fs::symlink(root.path().join("docs"), root.path().join("link")).unwrap();

        let out = run("copy link dst", &mut s, &root);
        assert!(out.starts_with("copy failed: server/link: "), "{out}");
        assert!(fs::symlink_metadata(root.path().join("dst/link")).is_err());
        assert!(!root.path().join("dst/docs").exists());

        assert_eq!(run("rm link", &mut s, &root), "User:server/$ ");
        assert!(fs::symlink_metadata(root.path().join("link")).is_err());
        assert_eq!(
            fs::read_to_string(root.path().join("docs/keep.txt")).unwrap(),
            "keep"
        );
    }

    #[test]
    fn test_outside_root_is_silent() {
        let (tmp, root, mut s) = setup();
        assert_eq!(run("mkdir ../escape", &mut s, &root), "User:server/$ ");
        assert_eq!(run("touch ../escape.txt", &mut s, &root), "User:server/$ ");
        assert!(!tmp.path().join("escape").exists());
        assert!(!tmp.path().join("escape.txt").exists());
    }

    #[test]
    fn test_exit_closes_without_prompt() {
        let (_tmp, root, mut s) = setup();
        let reply = run_line("exit", &mut s, &root, &NoopLogger);
        assert!(reply.close);
        assert!(reply.output.is_empty());
    }
}
