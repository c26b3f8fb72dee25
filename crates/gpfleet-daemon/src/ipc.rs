use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use time::OffsetDateTime;
use tokio::io::{AsyncWrite, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use fleet_sync::MasterSync;
use gpfleet_core::ipc::{self, ErrorPayload, FleetRequest, FleetResponse, ReportAccepted, StatusPayload};
use gpfleet_core::report::ComplianceReport;
use payload::CatalogReader;
use reporting::ComplianceStats;

pub struct DaemonState {
    pub started_at: OffsetDateTime,
    pub syncs_served: u32,
    pub reports_received: u32,
}

impl DaemonState {
    pub fn new() -> Self {
        Self {
            started_at: OffsetDateTime::now_utc(),
            syncs_served: 0,
            reports_received: 0,
        }
    }
}

/// What every connection handler needs.
pub struct Daemon {
    pub state: Mutex<DaemonState>,
    pub master: MasterSync,
    pub catalog_path: PathBuf,
    pub report_dir: PathBuf,
}

pub async fn serve(socket_path: &Path, daemon: Arc<Daemon>) -> Result<()> {
    if let Some(parent) = socket_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create socket dir {}", parent.display()))?;
    }
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .with_context(|| format!("remove stale socket {}", socket_path.display()))?;
    }

    let listener = UnixListener::bind(socket_path)
        .with_context(|| format!("bind socket {}", socket_path.display()))?;
    fs::set_permissions(socket_path, fs::Permissions::from_mode(0o600))
        .with_context(|| format!("set socket permissions {}", socket_path.display()))?;
    info!(socket = %socket_path.display(), "daemon listening");

    loop {
        let (stream, _) = listener.accept().await.context("accept connection")?;
        if let Err(err) = check_peer_uid(&stream) {
            warn!(error = %err, "connection refused");
            continue;
        }
        let daemon = Arc::clone(&daemon);
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, &daemon).await {
                warn!(error = %err, "connection failed");
            }
        });
    }
}

async fn handle_connection(stream: UnixStream, daemon: &Daemon) -> Result<()> {
    let (read, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read);
    let Some(request) = ipc::read_message::<_, FleetRequest>(&mut reader).await? else {
        return Ok(());
    };

    match request {
        FleetRequest::Ping => reply(&mut writer, FleetResponse::Pong).await,
        FleetRequest::Status => {
            let status = build_status(daemon).await;
            reply(&mut writer, FleetResponse::Status(status)).await
        }
        FleetRequest::Sync(request) => {
            daemon.master.respond(&mut writer, &request).await?;
            let mut state = daemon.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            state.syncs_served = state.syncs_served.saturating_add(1);
            Ok(())
        }
        FleetRequest::SubmitReport(report) => {
            let response = match store_report(&daemon.report_dir, &report) {
                Ok(stored_as) => {
                    let mut state = daemon.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                    state.reports_received = state.reports_received.saturating_add(1);
                    FleetResponse::ReportAccepted(ReportAccepted { stored_as })
                }
                Err(err) => {
                    warn!(agent = %report.agent_id, error = %err, "report not stored");
                    FleetResponse::Error(ErrorPayload {
                        message: format!("{err:#}"),
                    })
                }
            };
            reply(&mut writer, response).await
        }
    }
}

async fn reply<W>(writer: &mut W, response: FleetResponse) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    ipc::write_message(writer, &response).await.context("write response")?;
    Ok(())
}

async fn build_status(daemon: &Daemon) -> StatusPayload {
    let catalog = daemon.catalog_path.clone();
    let catalog_revision = tokio::task::spawn_blocking(move || {
        CatalogReader::open(&catalog).and_then(|reader| reader.revision())
    })
    .await
    .ok()
    .and_then(|result| result.ok())
    .flatten();

    let state = daemon.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let uptime = OffsetDateTime::now_utc() - state.started_at;
    StatusPayload {
        started_at: state.started_at,
        uptime_seconds: uptime.whole_seconds().max(0) as u64,
        catalog_revision,
        syncs_served: state.syncs_served,
        reports_received: state.reports_received,
    }
}

/// Writes the report as `{agent}-{revision}-{timestamp}.json` under
/// `report_dir`.
pub fn store_report(report_dir: &Path, report: &ComplianceReport) -> Result<PathBuf> {
    fs::create_dir_all(report_dir)
        .with_context(|| format!("create report dir {}", report_dir.display()))?;

    let agent: String = report
        .agent_id
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect();
    let stamp = report.generated_at.unix_timestamp();
    let report_path = report_dir.join(format!("{agent}-{}-{stamp}.json", report.revision));
    let contents = serde_json::to_string_pretty(report).context("render report JSON")?;
    fs::write(&report_path, contents)
        .with_context(|| format!("write report {}", report_path.display()))?;

    let stats = ComplianceStats::from_reports(&report.reports);
    info!(
        agent = %report.agent_id,
        revision = %report.revision,
        applied = stats.applied,
        drifted = stats.drifted,
        not_applied = stats.not_applied,
        "compliance report stored"
    );
    debug!(path = %report_path.display(), "report path");
    Ok(report_path)
}

fn check_peer_uid(stream: &UnixStream) -> Result<()> {
    let cred = stream.peer_cred().context("read peer credentials")?;
    let current = unsafe { libc::geteuid() };
    if cred.uid() != current {
        return Err(anyhow::anyhow!("unauthorized peer uid {}", cred.uid()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpfleet_core::ids::Revision;
    use gpfleet_core::report::{AgentPolicyReport, ReportState};
    use tempfile::TempDir;

    #[test]
    fn test_store_report_names_file_after_agent_and_revision() {
        let dir = TempDir::new().unwrap();
        let report = ComplianceReport {
            agent_id: "host/01".to_string(),
            revision: Revision(4),
            generated_at: OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap(),
            reports: vec![AgentPolicyReport {
                name: "Banner".to_string(),
                state: ReportState::Applied,
                actual_value: Some("1".to_string()),
                expected_value: Some("1".to_string()),
                reason: "value matches".to_string(),
                user_sid: None,
                child_reports: Vec::new(),
            }],
        };

        let path = store_report(dir.path(), &report).unwrap();
        assert_eq!(path.file_name().unwrap(), "host_01-r4-1700000000.json");
        let stored: ComplianceReport = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(stored.agent_id, "host/01");
        assert_eq!(stored.reports.len(), 1);
    }
}
