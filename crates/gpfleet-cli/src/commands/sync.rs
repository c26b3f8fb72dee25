use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::BufReader;
use tokio::net::UnixStream;

use fleet_sync::{list_backups, AgentSync, BackupKind, SyncOptions};
use gpfleet_core::ipc::resolve_socket_path;

use super::load_config;

pub fn execute(config_path: Option<PathBuf>, socket: Option<PathBuf>, timeout_secs: Option<u64>) -> Result<()> {
    let config = load_config(config_path.as_ref())?;
    let socket = socket.unwrap_or_else(resolve_socket_path);
    let timeout = Duration::from_secs(timeout_secs.unwrap_or(config.agent.sync_timeout_secs));
    let agent = AgentSync::from_config(&config.agent);

    let runtime = tokio::runtime::Runtime::new().context("start async runtime")?;
    let outcome = runtime.block_on(async {
        let stream = UnixStream::connect(&socket)
            .await
            .with_context(|| format!("connect to daemon at {}", socket.display()))?;
        let (read, mut write) = stream.into_split();
        let mut read = BufReader::new(read);

        let options = SyncOptions::new(timeout);
        let cancel = options.cancel.clone();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
        let result = agent.sync(&mut read, &mut write, &options).await;
        interrupt.abort();
        result.context("sync with master")
    })?;

    match outcome.previous_revision {
        Some(previous) if previous == outcome.revision => {
            println!("Working store refreshed at {}.", outcome.revision)
        }
        Some(previous) => println!("Working store moved from {previous} to {}.", outcome.revision),
        None => println!("Working store created at {}.", outcome.revision),
    }
    println!("{} policies, {} bytes, sha256 {}.", outcome.policies, outcome.size, outcome.sha256);
    if let Some(backup) = outcome.backup {
        println!("Previous store kept at {}.", backup.display());
    }
    Ok(())
}

pub fn list(config_path: Option<PathBuf>, json: bool) -> Result<()> {
    let config = load_config(config_path.as_ref())?;
    let backups = list_backups(&config.agent.backup_dir)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&backups).context("render backups")?);
        return Ok(());
    }
    if backups.is_empty() {
        println!("No backups under {}.", config.agent.backup_dir.display());
        return Ok(());
    }
    for entry in &backups {
        let kind = match entry.kind {
            BackupKind::WorkingStore => "working",
            BackupKind::ReceivedChunks => "chunks",
            BackupKind::VerifiedPayload => "payload",
        };
        println!("{kind:<8} {:>10}  {}", entry.size, entry.path.display());
    }
    Ok(())
}
