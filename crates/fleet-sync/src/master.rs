//! Master side of a sync session.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tracing::{debug, info, warn};

use gpfleet_core::ids::Revision;
use gpfleet_core::ipc::{self, ErrorPayload, FleetResponse, SyncInit, SyncMode, SyncRequestPayload};
use payload::{CachedPayload, PayloadCache};

use crate::error::SyncError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncServed {
    pub revision: Revision,
    pub sha256: String,
    pub bytes: u64,
    pub chunks: u64,
}

/// Answers sync requests from the payload cache.
pub struct MasterSync {
    cache: Arc<PayloadCache>,
    chunk_size: u32,
}

impl MasterSync {
    pub fn new(cache: Arc<PayloadCache>, chunk_size: u32) -> Self {
        Self {
            cache,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Ensures a payload exists for the current revision and streams it.
    /// A build failure is reported to the agent before it is returned.
    pub async fn respond<W>(&self, writer: &mut W, request: &SyncRequestPayload) -> Result<SyncServed, SyncError>
    where
        W: AsyncWrite + Unpin,
    {
        debug!(agent = %request.agent_id, known = ?request.known_revision, "sync requested");
        let cache = Arc::clone(&self.cache);
        let prepared = match tokio::task::spawn_blocking(move || cache.current()).await {
            Ok(result) => result.map_err(SyncError::from),
            Err(err) => Err(SyncError::from(err)),
        };
        let payload = match prepared {
            Ok(payload) => payload,
            Err(err) => {
                warn!(agent = %request.agent_id, error = %err, "payload unavailable");
                let response = FleetResponse::Error(ErrorPayload {
                    message: err.to_string(),
                });
                ipc::write_message(writer, &response).await?;
                return Err(err);
            }
        };

        let served = serve_sync(writer, &payload, self.chunk_size).await?;
        info!(
            agent = %request.agent_id,
            revision = %served.revision,
            bytes = served.bytes,
            chunks = served.chunks,
            "payload served"
        );
        Ok(served)
    }
}

/// Writes the `SyncInit` response followed by the payload bytes in
/// `chunk_size` pieces, the final one flagged `last`.
pub async fn serve_sync<W>(writer: &mut W, payload: &CachedPayload, chunk_size: u32) -> Result<SyncServed, SyncError>
where
    W: AsyncWrite + Unpin,
{
    let chunk_size = chunk_size.max(1);
    let init = SyncInit {
        mode: SyncMode::Full,
        master_revision: payload.revision,
        sha256: payload.sha256.clone(),
        payload_size: payload.size,
        chunk_size,
    };
    ipc::write_message(writer, &FleetResponse::SyncInit(init)).await?;

    let mut file = File::open(&payload.path).await?;
    let mut buffer = vec![0u8; chunk_size as usize];
    let mut sent = 0u64;
    let mut seq = 0u64;
    loop {
        let read = fill(&mut file, &mut buffer).await?;
        let last = read < buffer.len() || sent + read as u64 >= payload.size;
        ipc::write_chunk(writer, seq, &buffer[..read], last).await?;
        sent += read as u64;
        seq += 1;
        if last {
            break;
        }
    }

    if sent != payload.size {
        return Err(SyncError::Transfer(format!(
            "payload {} changed while streaming: sent {sent} of {} bytes",
            payload.path.display(),
            payload.size
        )));
    }
    Ok(SyncServed {
        revision: payload.revision,
        sha256: payload.sha256.clone(),
        bytes: sent,
        chunks: seq,
    })
}

/// Reads until `buffer` is full or the file ends.
async fn fill<R>(reader: &mut R, buffer: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buffer.len() {
        let read = reader.read(&mut buffer[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}
