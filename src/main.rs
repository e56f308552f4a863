//! Command line client for the drive filesystem core.
//!
//! Restores stored credentials (or runs the browser login flow) and exposes
//! the filesystem operations as subcommands.

use anyhow::{anyhow, Context, Result};
use clap::{Arg, ArgMatches, Command};
use drive_dav::auth::credentials::CredentialManager;
use drive_dav::auth::login::LoginServer;
use drive_dav::auth::token_store::TokenStore;
use drive_dav::config::ProjectConfig;
use drive_dav::drive_service::blob_client::HttpBlobStore;
use drive_dav::drive_service::drive_client::DriveClient;
use drive_dav::drive_service::http_client::RestClient;
use drive_dav::log_appender::setup_logging;
use drive_dav::vfs::{DriveFs, Metadata, OpenOptions};
use log::{error, info, warn};
use std::io::Write;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::watch;

/// Local copy buffer for `cat` and `put`
const COPY_BUFFER_LEN: usize = 1024 * 1024;

fn cli() -> Command {
    let path = |name: &'static str| Arg::new(name).value_name("PATH").required(true).num_args(1);
    Command::new("drive-dav")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Browse and edit a cloud drive as a filesystem")
        .subcommand_required(true)
        .subcommand(Command::new("login").about("Run the browser login flow"))
        .subcommand(Command::new("ls").about("List a folder").arg(path("path")))
        .subcommand(Command::new("stat").about("Show item attributes").arg(path("path")))
        .subcommand(Command::new("cat").about("Print file content").arg(path("path")))
        .subcommand(
            Command::new("put")
                .about("Upload a local file")
                .arg(Arg::new("local").value_name("FILE").required(true).num_args(1))
                .arg(path("remote")),
        )
        .subcommand(Command::new("mkdir").about("Create a folder").arg(path("path")))
        .subcommand(
            Command::new("mv")
                .about("Rename or move an item")
                .arg(path("from"))
                .arg(path("to")),
        )
        .subcommand(Command::new("rm").about("Delete an item").arg(path("path")))
}

fn arg<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a str> {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("missing argument {}", name))
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    let project_config = ProjectConfig::new().context("Failed to load project configuration")?;
    let settings = project_config.settings.clone();
    setup_logging(&project_config.data_dir(), &settings.log_level)
        .context("Failed to setup logging")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        info!("Received interrupt signal, shutting down...");
        let _ = shutdown_tx.send(true);
    })
    .context("Error setting Ctrl-C handler")?;

    let store = || TokenStore::new(project_config.credentials_dir());
    let force_login = matches.subcommand_name() == Some("login");
    let restored = if force_login {
        None
    } else {
        CredentialManager::from_disk(settings.oauth.clone(), store())
            .context("Failed to read stored credentials")?
    };
    let credentials = match restored {
        Some(manager) => Arc::new(manager),
        None => {
            let manager = Arc::new(CredentialManager::new(settings.oauth.clone(), store()));
            let server = LoginServer::bind(&settings.listen_address, manager.clone())
                .context("Failed to start login server")?;
            let url = server.login_url().to_string();
            info!("Please open {} to log in", url);
            if let Err(e) = webbrowser::open(&url) {
                warn!("Failed to open browser: {}", e);
            }
            if !server.wait_for_login(shutdown_rx.clone()).await? {
                return Err(anyhow!("Login was interrupted"));
            }
            manager
        }
    };
    if force_login {
        println!("Logged in");
        return Ok(());
    }

    let rest = RestClient::new(&settings.api.rest_base, credentials, settings.request_timeout)?;
    let backend = Arc::new(DriveClient::new(rest));
    let blobs = Arc::new(HttpBlobStore::new(settings.request_timeout)?);
    let fs = DriveFs::new(backend, blobs, settings.page_size);

    let result = match matches.subcommand() {
        Some(("ls", m)) => list(&fs, arg(m, "path")?).await,
        Some(("stat", m)) => {
            let meta = fs.stat(arg(m, "path")?).await?;
            print_entry(&meta);
            Ok(())
        }
        Some(("cat", m)) => cat(&fs, arg(m, "path")?).await,
        Some(("put", m)) => put(&fs, arg(m, "local")?, arg(m, "remote")?).await,
        Some(("mkdir", m)) => fs.mkdir(arg(m, "path")?).await.map(|_| ()).map_err(Into::into),
        Some(("mv", m)) => fs
            .rename(arg(m, "from")?, arg(m, "to")?)
            .await
            .map_err(Into::into),
        Some(("rm", m)) => fs.remove(arg(m, "path")?).await.map_err(Into::into),
        _ => Err(anyhow!("unknown command")),
    };
    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}

fn print_entry(meta: &Metadata) {
    let modified = meta
        .modified
        .map(|m| m.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{:o}\t{:>12}\t{}\t{}{}",
        meta.mode,
        meta.size,
        modified,
        meta.name,
        if meta.is_dir() { "/" } else { "" }
    );
}

async fn list(fs: &DriveFs, path: &str) -> Result<()> {
    let mut dir = fs.read_dir(path).await?;
    loop {
        let batch = dir.next_batch(100);
        if batch.is_empty() {
            return Ok(());
        }
        batch.iter().for_each(print_entry);
    }
}

async fn cat(fs: &DriveFs, path: &str) -> Result<()> {
    let mut handle = fs.open(path, OpenOptions::new().read(true)).await?;
    let mut buf = vec![0u8; COPY_BUFFER_LEN];
    let mut stdout = std::io::stdout().lock();
    loop {
        let n = handle.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        stdout.write_all(&buf[..n])?;
    }
    stdout.flush()?;
    handle.close().await?;
    Ok(())
}

async fn put(fs: &DriveFs, local: &str, remote: &str) -> Result<()> {
    let mut file = tokio::fs::File::open(local)
        .await
        .with_context(|| format!("Failed to open {}", local))?;
    let options = OpenOptions::new().write(true).create(true).truncate(true);
    let mut handle = fs.open(remote, options).await?;
    let mut buf = vec![0u8; COPY_BUFFER_LEN];
    let mut total = 0u64;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        handle.write(&buf[..n]).await?;
        total += n as u64;
    }
    let meta = handle.stat().await?;
    handle.close().await?;
    info!("Uploaded {} bytes to {}", total, remote);
    print_entry(&meta);
    Ok(())
}
