use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use burrow::cli::{ClientCommand, ClientOpts};
use burrow::transfer::TransferClient;

fn main() -> Result<()> {
    let opts = ClientOpts::parse();
    let mut client = TransferClient::connect(opts.server.as_str())
        .with_context(|| format!("Failed to connect to {}", opts.server))?;

    match opts.command {
        ClientCommand::Upload { local, name } => {
            let name = match name {
                Some(name) => name,
                None => local
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .context("local path has no file name; pass --name")?,
            };
            let bytes = client.upload_file(&local, &name)?;
            println!("uploaded {} -> {} ({} bytes)", local.display(), name, bytes);
        }
        ClientCommand::Download { name, out } => {
            let out = out.unwrap_or_else(|| {
                PathBuf::from(name.rsplit('/').next().unwrap_or(name.as_str()))
            });
            match client.download_file(&name, &out)? {
                Some(bytes) => println!("downloaded {} -> {} ({} bytes)", name, out.display(), bytes),
                None => anyhow::bail!("{}: file not found on server", name),
            }
        }
    }
    client.exit()
}
