use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;

use gpfleet_core::config::{Config, ConfigPaths};
use gpfleet_core::logging;
use gpfleet_core::model::PolicyDefinition;
use ::payload::CatalogReader;
use policy_engine::PolicyEngine;

pub mod catalog;
pub mod check;
pub mod config;
pub mod daemon;
pub mod payload;
pub mod policy;
pub mod report;
pub mod rsop;
pub mod sync;

/// Loads the config (falling back to defaults when the default file is
/// missing) and installs logging.
pub fn load_config(config_path: Option<&PathBuf>) -> Result<Config> {
    let config = match config_path {
        Some(path) => Config::load(path)?,
        None => {
            let paths = ConfigPaths::resolve()?;
            if paths.config_path.exists() {
                Config::load(&paths.config_path)?
            } else {
                Config::default_config()
            }
        }
    };
    logging::init(&config.logging);
    Ok(config)
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse JSON {}", path.display()))
}

/// Policies from a catalog, payload or working store; the agent working
/// store by default.
pub fn load_policies(store: Option<&Path>, config: &Config) -> Result<Vec<PolicyDefinition>> {
    let path = store.unwrap_or(&config.agent.working_store);
    let reader = CatalogReader::open(path)
        .with_context(|| format!("open policy store {} (run `gpfleet sync` first?)", path.display()))?;
    reader
        .policies()
        .with_context(|| format!("read policies from {}", path.display()))
}

/// `--supported-on` wins over `agent.supported_on_catalog`.
pub fn policy_engine(supported_on: Option<&Path>, config: &Config) -> Result<PolicyEngine> {
    let path = supported_on.or(config.agent.supported_on_catalog.as_deref());
    PolicyEngine::from_catalog_file(path)
}

pub fn find_policy<'a>(policies: &'a [PolicyDefinition], name: &str) -> Result<&'a PolicyDefinition> {
    policies
        .iter()
        .find(|policy| policy.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| anyhow::anyhow!("policy {name} not found"))
}
