use std::path::PathBuf;

use anyhow::{Context, Result};

use gpfleet_core::model::PolicyDefinition;
use payload::CatalogStore;

use super::{load_config, read_json};

#[derive(Debug)]
pub enum CatalogAction {
    Import { input: PathBuf, note: Option<String> },
    Revision,
    List,
}

pub fn execute(config_path: Option<PathBuf>, action: CatalogAction) -> Result<()> {
    let config = load_config(config_path.as_ref())?;
    let catalog_path = &config.master.catalog_path;
    let mut store = CatalogStore::open(catalog_path)
        .with_context(|| format!("open catalog {}", catalog_path.display()))?;

    match action {
        CatalogAction::Import { input, note } => {
            let definitions: Vec<PolicyDefinition> = read_json(&input)?;
            let summary = store
                .import(&definitions, note.as_deref())
                .with_context(|| format!("import {}", input.display()))?;
            if summary.changed() {
                println!(
                    "Catalog now at {}: {} inserted, {} updated, {} unchanged.",
                    summary.revision, summary.inserted, summary.updated, summary.unchanged
                );
            } else {
                println!("Catalog unchanged at {} ({} policies).", summary.revision, summary.unchanged);
            }
        }
        CatalogAction::Revision => match store.latest_revision()? {
            Some(revision) => println!("{revision}"),
            None => println!("Catalog is empty."),
        },
        CatalogAction::List => {
            for record in store.revisions()? {
                println!(
                    "{}  {}  {} policies{}",
                    record.revision,
                    record.created_at,
                    record.policy_count,
                    record.note.map(|note| format!("  {note}")).unwrap_or_default()
                );
            }
        }
    }
    Ok(())
}
