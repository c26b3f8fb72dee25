use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::FleetError;
use crate::model::{OsProduct, OsVersion, PolicyEvaluationContext};

pub const MIN_CHUNK_SIZE: u32 = 1024;
pub const MAX_CHUNK_SIZE: u32 = 4 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub master: MasterConfig,
    pub agent: AgentConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterConfig {
    pub catalog_path: PathBuf,
    pub payload_dir: PathBuf,
    pub report_dir: PathBuf,
    pub chunk_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub agent_id: String,
    pub working_store: PathBuf,
    pub backup_dir: PathBuf,
    pub registry_path: PathBuf,
    pub sync_timeout_secs: u64,
    pub os_version: String,
    pub os_product: OsProduct,
    /// JSON supported-on definitions consulted next to the built-in platform rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supported_on_catalog: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub filter: String,
    pub json: bool,
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_path: PathBuf,
    pub data_dir: PathBuf,
    pub catalog_path: PathBuf,
    pub payload_dir: PathBuf,
    pub report_dir: PathBuf,
    pub working_store: PathBuf,
    pub backup_dir: PathBuf,
    pub registry_path: PathBuf,
}

impl Config {
    pub fn default_config() -> Self {
        match ConfigPaths::resolve() {
            Ok(paths) => Self::with_paths(&paths),
            Err(_) => Self::with_paths(&ConfigPaths::under(Path::new("/var/lib/gpfleet"))),
        }
    }

    pub fn with_paths(paths: &ConfigPaths) -> Self {
        Self {
            master: MasterConfig {
                catalog_path: paths.catalog_path.clone(),
                payload_dir: paths.payload_dir.clone(),
                report_dir: paths.report_dir.clone(),
                chunk_size: 64 * 1024,
            },
            agent: AgentConfig {
                agent_id: "agent-local".to_string(),
                working_store: paths.working_store.clone(),
                backup_dir: paths.backup_dir.clone(),
                registry_path: paths.registry_path.clone(),
                sync_timeout_secs: 120,
                os_version: "10.0.19045".to_string(),
                os_product: OsProduct::Workstation,
                supported_on_catalog: None,
            },
            logging: LoggingConfig {
                filter: "info".to_string(),
                json: false,
            },
        }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        let output = toml::to_string_pretty(self).context("render config TOML")?;
        Ok(output)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("read config at {}", path.display()))?;
        Self::from_toml_str(&contents)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create config dir {}", parent.display()))?;
        }
        let contents = self.to_toml_string()?;
        fs::write(path, contents).with_context(|| format!("write config at {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), FleetError> {
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&self.master.chunk_size) {
            return Err(FleetError::InvalidConfig(format!(
                "master.chunk_size must be between {MIN_CHUNK_SIZE} and {MAX_CHUNK_SIZE}"
            )));
        }
        if self.agent.sync_timeout_secs == 0 {
            return Err(FleetError::InvalidConfig(
                "agent.sync_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.agent.agent_id.trim().is_empty() {
            return Err(FleetError::InvalidConfig("agent.agent_id is empty".to_string()));
        }
        self.agent.os_version.parse::<OsVersion>()?;
        Ok(())
    }
}

impl AgentConfig {
    pub fn evaluation_context(&self) -> Result<PolicyEvaluationContext, FleetError> {
        Ok(PolicyEvaluationContext {
            os_version: self.os_version.parse()?,
            os_product: Some(self.os_product),
        })
    }
}

impl ConfigPaths {
    pub fn resolve() -> Result<Self> {
        let project_dirs = ProjectDirs::from("io", "gpfleet", "gpfleet")
            .ok_or_else(|| anyhow::anyhow!("unable to determine project directories"))?;
        let mut paths = Self::under(project_dirs.data_dir());
        paths.config_path = project_dirs.config_dir().join("config.toml");
        Ok(paths)
    }

    /// Lays every default path out under one data directory.
    pub fn under(data_dir: &Path) -> Self {
        Self {
            config_path: data_dir.join("config.toml"),
            data_dir: data_dir.to_path_buf(),
            catalog_path: data_dir.join("master").join("catalog.db"),
            payload_dir: data_dir.join("master").join("payloads"),
            report_dir: data_dir.join("master").join("reports"),
            working_store: data_dir.join("agent").join("working.db"),
            backup_dir: data_dir.join("agent").join("backups"),
            registry_path: data_dir.join("agent").join("registry.json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_round_trips_through_toml() {
        let config = Config::with_paths(&ConfigPaths::under(Path::new("/srv/gpfleet")));
        let rendered = config.to_toml_string().unwrap();
        let parsed = Config::from_toml_str(&rendered).unwrap();
        assert_eq!(parsed.master.chunk_size, 64 * 1024);
        assert_eq!(parsed.agent.working_store, PathBuf::from("/srv/gpfleet/agent/working.db"));
        assert_eq!(parsed.agent.os_product, OsProduct::Workstation);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::with_paths(&ConfigPaths::under(Path::new("/srv/gpfleet")));
        config.master.chunk_size = 10;
        assert!(config.validate().is_err());

        let mut config = Config::with_paths(&ConfigPaths::under(Path::new("/srv/gpfleet")));
        config.agent.sync_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::with_paths(&ConfigPaths::under(Path::new("/srv/gpfleet")));
        config.agent.os_version = "vista".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config::with_paths(&ConfigPaths::under(dir.path()));
        config.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.agent.agent_id, "agent-local");
        assert_eq!(loaded.logging.filter, "info");
    }
}
