use anyhow::Result;
use burrow::logger::NoopLogger;
use burrow::shell::{Multiplexer, ShellOptions};
use burrow::vfs::Root;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const GREETING: &str = "Hello, tester!\n\rEnter --help for support info\n\r";

async fn start_shell() -> Result<(tempfile::TempDir, SocketAddr)> {
    start_shell_with(ShellOptions {
        nick: "tester".to_string(),
        workers: 2,
        ..ShellOptions::default()
    })
    .await
}

async fn start_shell_with(opts: ShellOptions) -> Result<(tempfile::TempDir, SocketAddr)> {
    let tmp = tempfile::tempdir()?;
    let dir = tmp.path().join("server");
    std::fs::create_dir(&dir)?;
    let root = Arc::new(Root::open(&dir)?);
    let shell = Multiplexer::bind("127.0.0.1:0", root, opts, Arc::new(NoopLogger)).await?;
    let addr = shell.local_addr()?;
    tokio::spawn(shell.run());
    Ok((tmp, addr))
}

struct Client {
    stream: TcpStream,
    pending: Vec<u8>,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Result<Self> {
        let mut client = Self {
            stream: TcpStream::connect(addr).await?,
            pending: Vec::new(),
        };
        let hello = client.read_until(GREETING).await?;
        assert_eq!(hello, GREETING);
        Ok(client)
    }

    /// Read until the accumulated text ends with `suffix`
    async fn read_until(&mut self, suffix: &str) -> Result<String> {
        let mut buf = [0u8; 1024];
        tokio::time::timeout(Duration::from_secs(5), async {
            while !self.pending.ends_with(suffix.as_bytes()) {
                let n = self.stream.read(&mut buf).await?;
                if n == 0 {
                    anyhow::bail!("connection closed, got {:?}", String::from_utf8_lossy(&self.pending));
                }
                self.pending.extend_from_slice(&buf[..n]);
            }
            Ok::<(), anyhow::Error>(())
        })
        .await??;
        let text = String::from_utf8(std::mem::take(&mut self.pending))?;
        Ok(text)
    }

    async fn command(&mut self, line: &str) -> Result<String> {
        self.stream.write_all(format!("{line}\r\n").as_bytes()).await?;
        self.read_until("$ ").await
    }
}

#[tokio::test]
async fn greeting_and_unknown_command() -> Result<()> {
    let (_tmp, addr) = start_shell().await?;
    let mut c = Client::connect(addr).await?;
    assert_eq!(c.command("frobnicate now please").await?, "tester:server/$ ");
    assert_eq!(c.command("").await?, "tester:server/$ ");
    Ok(())
}

#[tokio::test]
async fn mkdir_ls_cd_scenario() -> Result<()> {
    let (_tmp, addr) = start_shell().await?;
    let mut c = Client::connect(addr).await?;

    assert_eq!(c.command("mkdir foo").await?, "tester:server/$ ");
    assert_eq!(c.command("ls").await?, "foo\n\rtester:server/$ ");
    assert_eq!(
        c.command("cd ..").await?,
        "You are already in root folder\n\rtester:server/$ "
    );
    assert_eq!(c.command("cd foo").await?, "tester:server/foo/$ ");
    assert_eq!(c.command("cd ~").await?, "tester:server/$ ");
    Ok(())
}

#[tokio::test]
async fn touch_twice_and_cat() -> Result<()> {
    let (tmp, addr) = start_shell().await?;
    let mut c = Client::connect(addr).await?;

    assert_eq!(c.command("touch a.txt").await?, "tester:server/$ ");
    assert_eq!(
        c.command("touch a.txt").await?,
        "File already exist\n\rtester:server/$ "
    );
    std::fs::write(tmp.path().join("server/a.txt"), "first\nsecond\n")?;
    assert_eq!(
        c.command("cat a.txt").await?,
        "first\n\rsecond\n\rtester:server/$ "
    );
    assert_eq!(
        c.command("cat nothing").await?,
        "Can't read file\n\rtester:server/$ "
    );
    Ok(())
}

#[tokio::test]
async fn rm_root_is_refused_and_copy_works() -> Result<()> {
    let (tmp, addr) = start_shell().await?;
    let root = tmp.path().join("server");
    let mut c = Client::connect(addr).await?;

    c.command("mkdir src/inner").await?;
    std::fs::write(root.join("src/inner/data.bin"), [1u8, 2, 3])?;
    c.command("mkdir dst").await?;

    assert_eq!(c.command("rm server").await?, "tester:server/$ ");
    assert!(root.join("src/inner/data.bin").exists());

    assert_eq!(c.command("copy src dst").await?, "tester:server/$ ");
    assert_eq!(std::fs::read(root.join("dst/src/inner/data.bin"))?, [1u8, 2, 3]);

    c.command("cd dst/src/inner").await?;
    assert_eq!(c.command("rm server/dst/src").await?, "tester:server/dst/$ ");
    assert!(!root.join("dst/src").exists());
    Ok(())
}

#[tokio::test]
async fn sessions_are_independent() -> Result<()> {
    let (_tmp, addr) = start_shell().await?;
    let mut alice = Client::connect(addr).await?;
    let mut bob = Client::connect(addr).await?;

    alice.command("mkdir shared").await?;
    assert_eq!(alice.command("nick alice").await?, "alice:server/$ ");
    assert_eq!(alice.command("cd shared").await?, "alice:server/shared/$ ");

    assert_eq!(bob.command("ls").await?, "shared\n\rtester:server/$ ");

    // bob deletes alice's working directory; she lands on the parent
    bob.command("rm shared").await?;
    assert_eq!(alice.command("ls").await?, "\n\ralice:server/$ ");
    Ok(())
}

#[tokio::test]
async fn pipelined_commands_answer_in_order() -> Result<()> {
    let (_tmp, addr) = start_shell().await?;
    let mut c = Client::connect(addr).await?;

    c.stream
        .write_all(b"mkdir a\r\nmkdir b\r\ncd a\r\nls\r\n")
        .await?;
    // the last reply is an empty listing followed by the prompt
    let text = c.read_until("tester:server/a/$ \n\rtester:server/a/$ ").await?;
    assert_eq!(
        text,
        "tester:server/$ tester:server/$ tester:server/a/$ \n\rtester:server/a/$ "
    );
    Ok(())
}

#[tokio::test]
async fn exit_closes_connection() -> Result<()> {
    let (_tmp, addr) = start_shell().await?;
    let mut c = Client::connect(addr).await?;
    c.stream.write_all(b"exit\r\n").await?;

    let mut buf = [0u8; 64];
    let n = tokio::time::timeout(Duration::from_secs(5), c.stream.read(&mut buf)).await??;
    assert_eq!(n, 0, "expected EOF, got {:?}", String::from_utf8_lossy(&buf[..n]));

    // a new connection starts fresh at the root
    let mut again = Client::connect(addr).await?;
    assert_eq!(again.command("ls").await?, "\n\rtester:server/$ ");
    Ok(())
}

#[tokio::test]
async fn flooding_commands_drops_the_connection() -> Result<()> {
    let (_tmp, addr) = start_shell_with(ShellOptions {
        nick: "tester".to_string(),
        workers: 1,
        max_pending: 4,
        ..ShellOptions::default()
    })
    .await?;
    let mut c = Client::connect(addr).await?;
    c.stream.write_all("ls\r\n".repeat(50).as_bytes()).await?;

    let mut buf = [0u8; 1024];
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match c.stream.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
        }
    })
    .await?;

    // other clients are unaffected
    let mut other = Client::connect(addr).await?;
    assert_eq!(other.command("ls").await?, "\n\rtester:server/$ ");
    Ok(())
}
