use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use gpfleet_core::ipc::{
    resolve_pid_path, resolve_socket_path, send_request, FleetRequest, FleetResponse, StatusPayload,
};

const STARTUP_WAIT: Duration = Duration::from_secs(5);
const STARTUP_POLL: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub enum DaemonAction {
    Start {
        socket: Option<PathBuf>,
        pid: Option<PathBuf>,
    },
    Stop {
        pid: Option<PathBuf>,
    },
    Ping {
        socket: Option<PathBuf>,
    },
    Status {
        socket: Option<PathBuf>,
    },
    SocketPath,
    PidPath,
}

pub fn execute(config_path: Option<PathBuf>, action: DaemonAction) -> Result<()> {
    match action {
        DaemonAction::Start { socket, pid } => start_daemon(config_path, socket, pid),
        DaemonAction::Stop { pid } => stop_daemon(pid),
        DaemonAction::Ping { socket } => ping(socket),
        DaemonAction::Status { socket } => status(socket),
        DaemonAction::SocketPath => {
            println!("{}", resolve_socket_path().display());
            Ok(())
        }
        DaemonAction::PidPath => {
            println!("{}", resolve_pid_path().display());
            Ok(())
        }
    }
}

/// Spawns the master daemon and waits until it answers on its socket.
fn start_daemon(config: Option<PathBuf>, socket: Option<PathBuf>, pid: Option<PathBuf>) -> Result<()> {
    let socket_path = socket.clone().unwrap_or_else(resolve_socket_path);
    let mut cmd = Command::new("gpfleet-daemon");
    if let Some(config) = config {
        cmd.env("GPFLEET_CONFIG", config);
    }
    if let Some(socket) = socket {
        cmd.env("GPFLEET_SOCKET", socket);
    }
    if let Some(pid) = pid {
        cmd.env("GPFLEET_PID", pid);
    }
    let mut child = cmd.spawn().context("start gpfleet-daemon")?;

    let deadline = Instant::now() + STARTUP_WAIT;
    loop {
        if let Ok(FleetResponse::Status(payload)) = send_request(&socket_path, &FleetRequest::Status) {
            println!(
                "gpfleet master up (pid {}), serving {}.",
                child.id(),
                revision_label(&payload)
            );
            return Ok(());
        }
        if let Some(exit) = child.try_wait().context("poll gpfleet-daemon")? {
            return Err(anyhow::anyhow!("gpfleet-daemon exited during startup ({exit})"));
        }
        if Instant::now() >= deadline {
            return Err(anyhow::anyhow!(
                "gpfleet-daemon did not answer on {} within {}s",
                socket_path.display(),
                STARTUP_WAIT.as_secs()
            ));
        }
        thread::sleep(STARTUP_POLL);
    }
}

fn stop_daemon(pid_override: Option<PathBuf>) -> Result<()> {
    let pid_path = pid_override.unwrap_or_else(resolve_pid_path);
    let pid_text = std::fs::read_to_string(&pid_path)
        .with_context(|| format!("read pid file {}", pid_path.display()))?;
    let pid = parse_pid(&pid_text).with_context(|| format!("pid file {}", pid_path.display()))?;

    if unsafe { libc::kill(pid, 0) } != 0 {
        remove_stale(&pid_path);
        return Err(anyhow::anyhow!("no gpfleet master running as pid {pid}; removed stale pid file"));
    }
    if unsafe { libc::kill(pid, libc::SIGTERM) } != 0 {
        return Err(anyhow::anyhow!("failed to signal gpfleet master (pid {pid})"));
    }
    remove_stale(&pid_path);
    println!("gpfleet master (pid {pid}) stopping.");
    Ok(())
}

fn remove_stale(path: &Path) {
    if let Err(err) = std::fs::remove_file(path) {
        tracing::debug!(path = %path.display(), error = %err, "pid file not removed");
    }
}

/// Only positive pids; `0` and negatives would signal whole process groups.
fn parse_pid(text: &str) -> Result<i32> {
    let pid: i32 = text.trim().parse().context("parse pid")?;
    if pid <= 0 {
        return Err(anyhow::anyhow!("refusing to signal pid {pid}"));
    }
    Ok(pid)
}

fn ping(socket_override: Option<PathBuf>) -> Result<()> {
    let socket = socket_override.unwrap_or_else(resolve_socket_path);
    let sent = Instant::now();
    let response = send_request(&socket, &FleetRequest::Ping)?;
    match response {
        FleetResponse::Pong => {
            println!(
                "gpfleet master answered on {} in {}ms.",
                socket.display(),
                sent.elapsed().as_millis()
            );
            Ok(())
        }
        FleetResponse::Error(error) => Err(anyhow::anyhow!(error.message)),
        other => Err(anyhow::anyhow!("unexpected response: {other:?}")),
    }
}

fn status(socket_override: Option<PathBuf>) -> Result<()> {
    let socket = socket_override.unwrap_or_else(resolve_socket_path);
    match send_request(&socket, &FleetRequest::Status)? {
        FleetResponse::Status(payload) => {
            print!("{}", render_status(&payload));
            Ok(())
        }
        FleetResponse::Error(error) => Err(anyhow::anyhow!(error.message)),
        other => Err(anyhow::anyhow!("unexpected response: {other:?}")),
    }
}

fn revision_label(payload: &StatusPayload) -> String {
    match payload.catalog_revision {
        Some(revision) => format!("catalog {revision}"),
        None => "an empty catalog".to_string(),
    }
}

fn render_status(payload: &StatusPayload) -> String {
    let mut out = String::new();
    out.push_str(&format!("gpfleet master serving {}\n", revision_label(payload)));
    out.push_str(&format!("  up:       {}\n", format_uptime(payload.uptime_seconds)));
    out.push_str(&format!("  syncs:    {}\n", payload.syncs_served));
    out.push_str(&format!("  reports:  {}\n", payload.reports_received));
    out
}

fn format_uptime(seconds: u64) -> String {
    let (hours, rest) = (seconds / 3600, seconds % 3600);
    let (minutes, seconds) = (rest / 60, rest % 60);
    if hours > 0 {
        format!("{hours}h {minutes:02}m {seconds:02}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds:02}s")
    } else {
        format!("{seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpfleet_core::ids::Revision;
    use time::OffsetDateTime;

    #[test]
    fn test_parse_pid_rejects_group_targets() {
        assert_eq!(parse_pid("4242\n").unwrap(), 4242);
        assert!(parse_pid("0").is_err());
        assert!(parse_pid("-1").is_err());
        assert!(parse_pid("gpfleet").is_err());
    }

    #[test]
    fn test_render_status_reports_revision_and_counters() {
        let payload = StatusPayload {
            started_at: OffsetDateTime::UNIX_EPOCH,
            uptime_seconds: 3 * 3600 + 5 * 60 + 9,
            catalog_revision: Some(Revision(12)),
            syncs_served: 40,
            reports_received: 7,
        };
        let rendered = render_status(&payload);
        assert!(rendered.starts_with("gpfleet master serving catalog r12\n"));
        assert!(rendered.contains("up:       3h 05m 09s"));
        assert!(rendered.contains("syncs:    40"));
        assert!(rendered.contains("reports:  7"));

        let empty = StatusPayload {
            catalog_revision: None,
            uptime_seconds: 42,
            ..payload
        };
        assert!(render_status(&empty).contains("serving an empty catalog"));
        assert_eq!(format_uptime(42), "42s");
        assert_eq!(format_uptime(61), "1m 01s");
    }
}
