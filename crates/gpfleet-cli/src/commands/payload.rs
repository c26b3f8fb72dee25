use std::path::PathBuf;

use anyhow::{Context, Result};

use payload::{compute_hash, verify, PayloadBuilder, PayloadCache};

use super::load_config;

#[derive(Debug)]
pub enum PayloadAction {
    /// Without an output path the payload lands in the master's cache.
    Build { output: Option<PathBuf> },
    Hash { path: PathBuf },
    Verify { path: PathBuf, sha256: String },
}

pub fn execute(config_path: Option<PathBuf>, action: PayloadAction) -> Result<()> {
    match action {
        PayloadAction::Build { output } => {
            let config = load_config(config_path.as_ref())?;
            match output {
                Some(output) => {
                    let summary = PayloadBuilder::new(&config.master.catalog_path)
                        .build(&output)
                        .with_context(|| format!("build payload {}", output.display()))?;
                    let digest = compute_hash(&summary.path)?;
                    println!(
                        "Payload {} built at {}: {} policies, {} elements, {} items.",
                        summary.revision,
                        summary.path.display(),
                        summary.policies,
                        summary.elements,
                        summary.items
                    );
                    println!("sha256 {digest}");
                }
                None => {
                    let cache = PayloadCache::new(&config.master.catalog_path, &config.master.payload_dir);
                    let cached = cache.current().context("prepare cached payload")?;
                    println!("Payload {} at {} ({} bytes).", cached.revision, cached.path.display(), cached.size);
                    println!("sha256 {}", cached.sha256);
                }
            }
        }
        PayloadAction::Hash { path } => {
            let digest = compute_hash(&path).with_context(|| format!("hash {}", path.display()))?;
            println!("{digest}  {}", path.display());
        }
        PayloadAction::Verify { path, sha256 } => {
            let verified = verify(&path, &sha256).with_context(|| format!("verify {}", path.display()))?;
            println!(
                "Payload {} is intact: {}, {} bytes.",
                path.display(),
                verified.revision,
                verified.size
            );
        }
    }
    Ok(())
}
