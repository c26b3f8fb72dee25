//! Agent side of a sync session: request, receive, verify, stage, commit.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs::{self, File};
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use gpfleet_core::config::{AgentConfig, MAX_CHUNK_SIZE};
use gpfleet_core::ids::{Revision, SyncSessionId};
use gpfleet_core::ipc::{self, FleetRequest, FleetResponse, SyncInit, SyncRequestPayload};
use payload::CatalogReader;

use crate::backups::{CHUNKS_FILE, PAYLOAD_FILE};
use crate::error::SyncError;
use crate::merge::{self, StageSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    Requested,
    Transferred,
    Verified,
    Staged,
    Committed,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SyncPhase::Requested => "requested",
            SyncPhase::Transferred => "transferred",
            SyncPhase::Verified => "verified",
            SyncPhase::Staged => "staged",
            SyncPhase::Committed => "committed",
        };
        write!(f, "{label}")
    }
}

pub type PhaseHook = Arc<dyn Fn(SyncPhase) + Send + Sync>;

#[derive(Clone)]
pub struct SyncOptions {
    pub timeout: Duration,
    pub cancel: CancellationToken,
    pub on_phase: Option<PhaseHook>,
}

impl SyncOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            cancel: CancellationToken::new(),
            on_phase: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_phase_hook(mut self, hook: PhaseHook) -> Self {
        self.on_phase = Some(hook);
        self
    }

    /// Reports the phase, then refuses to go further if cancelled.
    fn reached(&self, session: SyncSessionId, phase: SyncPhase) -> Result<(), SyncError> {
        debug!(%session, %phase, "sync phase");
        if let Some(hook) = &self.on_phase {
            hook(phase);
        }
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }
}

impl fmt::Debug for SyncOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncOptions")
            .field("timeout", &self.timeout)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("on_phase", &self.on_phase.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub session: SyncSessionId,
    pub revision: Revision,
    pub previous_revision: Option<Revision>,
    pub sha256: String,
    pub size: u64,
    pub policies: u64,
    pub session_dir: PathBuf,
    pub backup: Option<PathBuf>,
}

/// Everything verified and staged, waiting for the swap.
struct Prepared {
    init: SyncInit,
    previous: Option<Revision>,
    session_dir: PathBuf,
    staged: StageSummary,
}

pub struct AgentSync {
    agent_id: String,
    working_store: PathBuf,
    backup_dir: PathBuf,
}

impl AgentSync {
    pub fn new(agent_id: &str, working_store: &Path, backup_dir: &Path) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            working_store: working_store.to_path_buf(),
            backup_dir: backup_dir.to_path_buf(),
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(&config.agent_id, &config.working_store, &config.backup_dir)
    }

    pub fn working_store(&self) -> &Path {
        &self.working_store
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Revision of the live working store, `None` before the first sync.
    pub fn local_revision(&self) -> Result<Option<Revision>, SyncError> {
        store_revision(&self.working_store)
    }

    /// Runs one full sync over an established connection to the master.
    ///
    /// Everything up to and including staging honours `options.cancel` and
    /// `options.timeout`; on either the live store is left as it was. The
    /// commit step runs to completion once started.
    pub async fn sync<R, W>(&self, reader: &mut R, writer: &mut W, options: &SyncOptions) -> Result<SyncOutcome, SyncError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let session = SyncSessionId::new();
        let staging = merge::staging_path(&self.working_store, session);
        // Held by the staging task for as long as it may touch `staging`.
        let staging_lock = Arc::new(Mutex::new(()));
        info!(agent = %self.agent_id, %session, "sync started");

        let prepared = {
            let pipeline = self.prepare(reader, writer, options, session, &staging, &staging_lock);
            tokio::select! {
                biased;
                _ = options.cancel.cancelled() => Err(SyncError::Cancelled),
                result = tokio::time::timeout(options.timeout, pipeline) => match result {
                    Ok(result) => result,
                    Err(_) => Err(SyncError::TimedOut(options.timeout)),
                },
            }
        };
        let prepared = match prepared {
            Ok(prepared) => prepared,
            Err(err) => {
                // A cancelled pipeline does not stop a staging task already running.
                let _settled = staging_lock.lock().await;
                if let Err(cleanup) = fs::remove_file(&staging).await {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        warn!(staging = %staging.display(), error = %cleanup, "staging file left behind");
                    }
                }
                warn!(agent = %self.agent_id, %session, error = %err, "sync aborted; working store unchanged");
                return Err(err);
            }
        };

        let live = self.working_store.clone();
        let backup_dir = self.backup_dir.clone();
        let previous = prepared.previous;
        let commit_staging = staging.clone();
        let backup = tokio::task::spawn_blocking(move || merge::commit(&live, &commit_staging, &backup_dir, previous))
            .await??;
        if let Some(hook) = &options.on_phase {
            hook(SyncPhase::Committed);
        }

        info!(
            agent = %self.agent_id,
            %session,
            revision = %prepared.init.master_revision,
            previous = ?prepared.previous,
            policies = prepared.staged.policies,
            "sync committed"
        );
        Ok(SyncOutcome {
            session,
            revision: prepared.init.master_revision,
            previous_revision: prepared.previous,
            sha256: prepared.init.sha256,
            size: prepared.init.payload_size,
            policies: prepared.staged.policies,
            session_dir: prepared.session_dir,
            backup,
        })
    }

    async fn prepare<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
        options: &SyncOptions,
        session: SyncSessionId,
        staging: &Path,
        staging_lock: &Arc<Mutex<()>>,
    ) -> Result<Prepared, SyncError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let previous = {
            let live = self.working_store.clone();
            tokio::task::spawn_blocking(move || store_revision(&live)).await??
        };

        let request = FleetRequest::Sync(SyncRequestPayload {
            agent_id: self.agent_id.clone(),
            known_revision: previous,
        });
        ipc::write_message(writer, &request).await?;
        options.reached(session, SyncPhase::Requested)?;

        let init = match ipc::read_message::<_, FleetResponse>(reader).await? {
            Some(FleetResponse::SyncInit(init)) => init,
            Some(FleetResponse::Error(error)) => return Err(SyncError::Rejected(error.message)),
            Some(other) => {
                return Err(SyncError::Transfer(format!("expected sync init, got {other:?}")));
            }
            None => return Err(SyncError::Transfer("master closed the connection".to_string())),
        };
        if let Some(local) = previous {
            if init.master_revision < local {
                return Err(SyncError::Stale {
                    offered: init.master_revision,
                    local,
                });
            }
        }
        if init.chunk_size == 0 || init.chunk_size > MAX_CHUNK_SIZE {
            return Err(SyncError::Transfer(format!("unacceptable chunk size {}", init.chunk_size)));
        }

        let session_dir = self.backup_dir.join(format!("sync-{session}"));
        fs::create_dir_all(&session_dir).await?;
        let chunks = session_dir.join(CHUNKS_FILE);
        receive_chunks(reader, &init, &chunks).await?;
        options.reached(session, SyncPhase::Transferred)?;

        let payload_copy = session_dir.join(PAYLOAD_FILE);
        let verified = {
            let chunks = chunks.clone();
            let payload_copy = payload_copy.clone();
            let expected = init.sha256.clone();
            tokio::task::spawn_blocking(move || -> Result<payload::VerifiedPayload, SyncError> {
                let verified = payload::verify(&chunks, &expected)?;
                std::fs::copy(&chunks, &payload_copy)?;
                Ok(verified)
            })
            .await??
        };
        if verified.revision != init.master_revision {
            return Err(SyncError::RevisionMismatch {
                declared: init.master_revision,
                embedded: verified.revision,
            });
        }
        options.reached(session, SyncPhase::Verified)?;

        let staged = {
            let live = self.working_store.clone();
            let staging = staging.to_path_buf();
            let revision = init.master_revision;
            let guard = Arc::clone(staging_lock).lock_owned().await;
            tokio::task::spawn_blocking(move || {
                let _guard = guard;
                merge::stage(&live, &payload_copy, &staging, revision)
            })
            .await??
        };
        options.reached(session, SyncPhase::Staged)?;

        Ok(Prepared {
            init,
            previous,
            session_dir,
            staged,
        })
    }
}

fn store_revision(path: &Path) -> Result<Option<Revision>, SyncError> {
    if !path.exists() {
        return Ok(None);
    }
    Ok(CatalogReader::open(path)?.revision()?)
}

/// Writes every chunk to `target`, checking order, sizes and the declared
/// total.
async fn receive_chunks<R>(reader: &mut R, init: &SyncInit, target: &Path) -> Result<u64, SyncError>
where
    R: AsyncBufRead + Unpin,
{
    let mut file = File::create(target).await?;
    let mut received = 0u64;
    let mut expected_seq = 0u64;
    loop {
        let (header, bytes) = ipc::read_chunk(reader, init.chunk_size).await?;
        if header.seq != expected_seq {
            return Err(SyncError::Transfer(format!(
                "chunk {} arrived, expected {expected_seq}",
                header.seq
            )));
        }
        received += bytes.len() as u64;
        if received > init.payload_size {
            return Err(SyncError::Transfer(format!(
                "received more than the declared {} bytes",
                init.payload_size
            )));
        }
        file.write_all(&bytes).await?;
        expected_seq += 1;
        if header.last {
            break;
        }
    }
    file.flush().await?;
    file.sync_all().await?;

    if received != init.payload_size {
        return Err(SyncError::Transfer(format!(
            "received {received} of {} declared bytes",
            init.payload_size
        )));
    }
    debug!(bytes = received, chunks = expected_seq, target = %target.display(), "payload received");
    Ok(received)
}
