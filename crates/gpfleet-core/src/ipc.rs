//! Master/agent wire contract.
//!
//! Requests and responses are single JSON lines. A sync response is a
//! `SyncInit` line followed by payload chunks; each chunk is a JSON
//! `ChunkHeader` line immediately followed by `len` raw bytes.

use std::io::{BufRead, BufReader, BufWriter, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::FleetError;
use crate::ids::Revision;
use crate::report::ComplianceReport;

/// Upper bound for one JSON line; chunk bytes are not lines.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Full,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncInit {
    pub mode: SyncMode,
    pub master_revision: Revision,
    pub sha256: String,
    pub payload_size: u64,
    pub chunk_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkHeader {
    pub seq: u64,
    pub len: u32,
    pub last: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequestPayload {
    pub agent_id: String,
    pub known_revision: Option<Revision>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusPayload {
    pub started_at: OffsetDateTime,
    pub uptime_seconds: u64,
    pub catalog_revision: Option<Revision>,
    pub syncs_served: u32,
    pub reports_received: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportAccepted {
    pub stored_as: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum FleetRequest {
    Ping,
    Status,
    Sync(SyncRequestPayload),
    SubmitReport(ComplianceReport),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum FleetResponse {
    Pong,
    Status(StatusPayload),
    SyncInit(SyncInit),
    ReportAccepted(ReportAccepted),
    Error(ErrorPayload),
}

pub fn default_socket_path() -> PathBuf {
    if let Ok(runtime) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime).join("gpfleet").join("gpfleet.sock");
    }
    PathBuf::from("/tmp").join("gpfleet.sock")
}

pub fn default_pid_path() -> PathBuf {
    if let Ok(runtime) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime).join("gpfleet").join("gpfleet.pid");
    }
    PathBuf::from("/tmp").join("gpfleet.pid")
}

pub fn resolve_socket_path() -> PathBuf {
    if let Ok(value) = std::env::var("GPFLEET_SOCKET") {
        return PathBuf::from(value);
    }
    default_socket_path()
}

pub fn resolve_pid_path() -> PathBuf {
    if let Ok(value) = std::env::var("GPFLEET_PID") {
        return PathBuf::from(value);
    }
    default_pid_path()
}

/// Blocking one-shot request for the simple request/response kinds.
pub fn send_request(socket_path: &Path, request: &FleetRequest) -> Result<FleetResponse> {
    let stream = UnixStream::connect(socket_path)
        .with_context(|| format!("connect to daemon at {}", socket_path.display()))?;
    let mut writer = BufWriter::new(stream.try_clone()?);
    let payload = serde_json::to_string(request).context("serialize request")?;
    writer.write_all(payload.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    let response = serde_json::from_str(&line).context("parse response")?;
    Ok(response)
}

pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), FleetError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(message)
        .map_err(|err| FleetError::Protocol(format!("serialize message: {err}")))?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one JSON line. `Ok(None)` means the peer closed the stream.
pub async fn read_message<R, T>(reader: &mut R) -> Result<Option<T>, FleetError>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = Vec::new();
    let read = (&mut *reader)
        .take(MAX_LINE_BYTES as u64 + 1)
        .read_until(b'\n', &mut line)
        .await?;
    if read == 0 {
        return Ok(None);
    }
    if line.len() > MAX_LINE_BYTES {
        return Err(FleetError::Protocol("message line too long".to_string()));
    }
    let message = serde_json::from_slice(&line)
        .map_err(|err| FleetError::Protocol(format!("parse message: {err}")))?;
    Ok(Some(message))
}

pub async fn write_chunk<W>(writer: &mut W, seq: u64, bytes: &[u8], last: bool) -> Result<(), FleetError>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(bytes.len())
        .map_err(|_| FleetError::Protocol("chunk larger than u32::MAX".to_string()))?;
    let header = ChunkHeader { seq, len, last };
    let mut line = serde_json::to_vec(&header)
        .map_err(|err| FleetError::Protocol(format!("serialize chunk header: {err}")))?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one chunk, refusing anything larger than `max_len`.
pub async fn read_chunk<R>(reader: &mut R, max_len: u32) -> Result<(ChunkHeader, Vec<u8>), FleetError>
where
    R: AsyncBufRead + Unpin,
{
    let header: ChunkHeader = read_message(reader)
        .await?
        .ok_or_else(|| FleetError::Protocol("stream closed before final chunk".to_string()))?;
    if header.len > max_len {
        return Err(FleetError::Protocol(format!(
            "chunk {} is {} bytes, limit is {max_len}",
            header.seq, header.len
        )));
    }
    let mut bytes = vec![0u8; header.len as usize];
    reader.read_exact(&mut bytes).await?;
    Ok((header, bytes))
}
