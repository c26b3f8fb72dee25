use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tracing::info;

use fleet_sync::MasterSync;
use gpfleet_core::config::{Config, ConfigPaths};
use gpfleet_core::ipc::{resolve_pid_path, resolve_socket_path};
use gpfleet_core::logging;
use payload::PayloadCache;

mod ipc;

use ipc::{Daemon, DaemonState};

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config(std::env::var_os("GPFLEET_CONFIG").map(PathBuf::from).as_ref())?;
    logging::init(&config.logging);

    let socket_path = resolve_socket_path();
    let pid_path = resolve_pid_path();

    let cache = PayloadCache::new(&config.master.catalog_path, &config.master.payload_dir);
    let daemon = Arc::new(Daemon {
        state: Mutex::new(DaemonState::new()),
        master: MasterSync::new(Arc::new(cache), config.master.chunk_size),
        catalog_path: config.master.catalog_path.clone(),
        report_dir: config.master.report_dir.clone(),
    });

    write_pid_file(&pid_path)?;
    info!(
        catalog = %config.master.catalog_path.display(),
        chunk_size = config.master.chunk_size,
        pid = std::process::id(),
        "gpfleet daemon starting"
    );
    ipc::serve(&socket_path, daemon).await
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path),
        None => {
            let paths = ConfigPaths::resolve()?;
            Config::load(&paths.config_path).or_else(|_| Ok(Config::default_config()))
        }
    }
}

fn write_pid_file(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create pid dir {}", parent.display()))?;
    }
    let pid = std::process::id();
    std::fs::write(path, pid.to_string())
        .with_context(|| format!("write pid file {}", path.display()))?;
    let perms = std::fs::Permissions::from_mode(0o600);
    std::fs::set_permissions(path, perms)
        .with_context(|| format!("set pid permissions {}", path.display()))?;
    Ok(())
}
