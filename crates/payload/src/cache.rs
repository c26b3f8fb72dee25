//! Per-revision payload cache in the master's payload directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use gpfleet_core::ids::Revision;

use crate::builder::PayloadBuilder;
use crate::error::PayloadError;
use crate::integrity::compute_hash;
use crate::reader::CatalogReader;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedPayload {
    pub path: PathBuf,
    pub revision: Revision,
    pub sha256: String,
    pub size: u64,
}

pub struct PayloadCache {
    catalog: PathBuf,
    dir: PathBuf,
    build_lock: Mutex<()>,
}

impl PayloadCache {
    pub fn new(catalog: &Path, dir: &Path) -> Self {
        Self {
            catalog: catalog.to_path_buf(),
            dir: dir.to_path_buf(),
            build_lock: Mutex::new(()),
        }
    }

    pub fn payload_path(&self, revision: Revision) -> PathBuf {
        self.dir.join(format!("payload-{revision}.db"))
    }

    fn sidecar_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(".sha256");
        PathBuf::from(name)
    }

    /// Payload for the catalog's current revision, building it when the
    /// cache has none or its sidecar no longer matches the file.
    pub fn current(&self) -> Result<CachedPayload, PayloadError> {
        let _guard = self.build_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let revision = CatalogReader::open(&self.catalog)?
            .revision()?
            .ok_or_else(|| PayloadError::NoRevision(self.catalog.clone()))?;
        let path = self.payload_path(revision);
        let sidecar = Self::sidecar_path(&path);

        if path.exists() {
            match fs::read_to_string(&sidecar) {
                Ok(recorded) => {
                    let digest = compute_hash(&path)?;
                    if digest.eq_ignore_ascii_case(recorded.trim()) {
                        debug!(path = %path.display(), %revision, "reusing cached payload");
                        let size = fs::metadata(&path)?.len();
                        return Ok(CachedPayload {
                            path,
                            revision,
                            sha256: digest,
                            size,
                        });
                    }
                    warn!(path = %path.display(), "cached payload does not match its sidecar; rebuilding");
                }
                Err(_) => warn!(path = %path.display(), "cached payload has no sidecar; rebuilding"),
            }
            fs::remove_file(&path)?;
        }

        fs::create_dir_all(&self.dir)?;
        let partial = path.with_extension("db.partial");
        if partial.exists() {
            fs::remove_file(&partial)?;
        }
        let summary = PayloadBuilder::new(&self.catalog).build(&partial)?;
        fs::rename(&partial, &path)?;

        let sha256 = compute_hash(&path)?;
        let sidecar_partial = sidecar.with_extension("sha256.partial");
        fs::write(&sidecar_partial, format!("{sha256}\n"))?;
        fs::rename(&sidecar_partial, &sidecar)?;

        let size = fs::metadata(&path)?.len();
        info!(path = %path.display(), revision = %summary.revision, size, "payload cached");
        Ok(CachedPayload {
            path,
            revision: summary.revision,
            sha256,
            size,
        })
    }
}
