// ⚙️ Engine configuration
//
// Resolution order: explicit `--config` path, then `bed-census.toml` in the
// working directory, then built-in defaults. `BED_CENSUS_DB` and
// `BED_CENSUS_ADDR` override whatever the file said.

use crate::entities::SectorType;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "bed-census.toml";
pub const ENV_DATABASE: &str = "BED_CENSUS_DB";
pub const ENV_SERVER_ADDR: &str = "BED_CENSUS_ADDR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// SQLite file holding the census
    pub database_path: PathBuf,

    /// Actor name written to audit entries
    pub audit_actor: String,

    /// Characters of the bed code that name its room (room back-fill only)
    pub room_prefix_len: usize,

    /// Sector types whose rooms carry sex/isolation restrictions
    pub cohort_sector_types: Vec<SectorType>,

    /// A transferred patient's admission timestamp restarts at the
    /// reconciliation time
    pub reset_admission_on_transfer: bool,

    pub server_addr: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            database_path: PathBuf::from("bed_census.db"),
            audit_actor: "bed-census".to_string(),
            room_prefix_len: 3,
            cohort_sector_types: vec![SectorType::Ward],
            reset_admission_on_transfer: true,
            server_addr: "127.0.0.1:3000".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("Invalid engine configuration")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("in {}", path.display()))
    }

    /// File (explicit or default) plus environment overrides
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(db) = lookup(ENV_DATABASE).filter(|v| !v.trim().is_empty()) {
            self.database_path = PathBuf::from(db);
        }
        if let Some(addr) = lookup(ENV_SERVER_ADDR).filter(|v| !v.trim().is_empty()) {
            self.server_addr = addr;
        }
    }

    pub fn is_cohort_sector(&self, sector_type: SectorType) -> bool {
        self.cohort_sector_types.contains(&sector_type)
    }

    /// Builder pattern: use another database file
    pub fn with_database(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = path.into();
        self
    }

    pub fn with_actor(mut self, actor: &str) -> Self {
        self.audit_actor = actor.to_string();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.room_prefix_len, 3);
        assert!(config.reset_admission_on_transfer);
        assert!(config.is_cohort_sector(SectorType::Ward));
        assert!(!config.is_cohort_sector(SectorType::Emergency));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            database_path = "/var/lib/census.db"
            cohort_sector_types = ["Ward", "Icu"]
            reset_admission_on_transfer = false
            "#,
        )
        .unwrap();

        assert_eq!(config.database_path, PathBuf::from("/var/lib/census.db"));
        assert!(config.is_cohort_sector(SectorType::Icu));
        assert!(!config.reset_admission_on_transfer);
        assert_eq!(config.audit_actor, "bed-census");
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(EngineConfig::from_toml_str("room_prefix_len = \"three\"").is_err());
    }

    #[test]
    fn test_load_from_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "audit_actor = \"night-shift\"").unwrap();
        writeln!(file, "room_prefix_len = 2").unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.audit_actor, "night-shift");
        assert_eq!(config.room_prefix_len, 2);

        assert!(EngineConfig::from_file(Path::new("/nonexistent/bed-census.toml")).is_err());
    }

    #[test]
    fn test_overrides() {
        let mut config = EngineConfig::default();
        config.apply_overrides(|key| match key {
            ENV_DATABASE => Some("/tmp/other.db".to_string()),
            ENV_SERVER_ADDR => Some("  ".to_string()),
            _ => None,
        });

        assert_eq!(config.database_path, PathBuf::from("/tmp/other.db"));
        assert_eq!(config.server_addr, "127.0.0.1:3000");
    }
}
