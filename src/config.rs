// ABOUTME: TOML configuration for endpoints, tables, batch sizing and timeouts
// ABOUTME: Loaded once at startup and validated before any store is opened

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::store::{Dialect, LEGACY_IDENTIFIER_LIMIT};

pub const DEFAULT_CONFIG_PATH: &str = "archive-replicator.toml";

/// Largest insert batch; one commit per batch.
pub const MAX_BATCH_SIZE: usize = 100;

/// Tables kept current by `sync` when the file lists none.
pub const DEFAULT_TABLES: [&str; 4] = ["hV37_vD1", "hV37_vD50", "fV66_vD1", "fV66_vD15"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Line-oriented column definitions for every replicated table
    pub schema_file: PathBuf,
    /// Directory of `IFDB<YYYYMMDD>.txt` scan index files
    #[serde(default)]
    pub scan_index_dir: Option<PathBuf>,
    #[serde(default = "default_tables")]
    pub tables: Vec<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub parallel_destinations: bool,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    pub source: EndpointConfig,
    #[serde(default)]
    pub destinations: Vec<EndpointConfig>,
    #[serde(default)]
    pub triple_write: Option<TripleWriteConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_probe_secs")]
    pub probe_secs: u64,
    #[serde(default = "default_bulk_secs")]
    pub bulk_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            probe_secs: default_probe_secs(),
            bulk_secs: default_bulk_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    Mssql,
    Mysql,
    Postgres,
    Sqlite,
}

impl EndpointKind {
    pub fn dialect(self) -> Dialect {
        match self {
            EndpointKind::Mssql => Dialect::MsSql,
            EndpointKind::Mysql => Dialect::MySql,
            EndpointKind::Postgres => Dialect::Postgres,
            EndpointKind::Sqlite => Dialect::Sqlite,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub name: String,
    pub kind: EndpointKind,
    pub url: String,
    #[serde(default = "default_identifier_limit")]
    pub identifier_limit: usize,
    #[serde(default)]
    pub allow_self_signed_certs: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripleWriteConfig {
    pub known_tags: Vec<String>,
}

/// Per-call deadlines applied to every store interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Watermark and metadata probes
    pub probe: Duration,
    /// Chunk reads and batch writes
    pub bulk: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        TimeoutConfig::default().into()
    }
}

impl From<TimeoutConfig> for Timeouts {
    fn from(config: TimeoutConfig) -> Self {
        Self {
            probe: Duration::from_secs(config.probe_secs),
            bulk: Duration::from_secs(config.bulk_secs),
        }
    }
}

fn default_tables() -> Vec<String> {
    DEFAULT_TABLES.iter().map(|t| t.to_string()).collect()
}

fn default_batch_size() -> usize {
    MAX_BATCH_SIZE
}

fn default_probe_secs() -> u64 {
    1
}

fn default_bulk_secs() -> u64 {
    600
}

fn default_identifier_limit() -> usize {
    LEGACY_IDENTIFIER_LIMIT
}

impl Config {
    /// Read and validate a configuration file.
    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_toml(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        tracing::debug!(
            "Loaded config from {} ({} destinations, {} tables)",
            path.display(),
            config.destinations.len(),
            config.tables.len()
        );
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            bail!(
                "batch_size must be between 1 and {}, got {}",
                MAX_BATCH_SIZE,
                self.batch_size
            );
        }
        if self.destinations.is_empty() {
            bail!("At least one [[destinations]] entry is required");
        }
        if self.tables.is_empty() {
            bail!("tables must not be empty");
        }
        for table in &self.tables {
            crate::utils::validate_identifier(table)
                .with_context(|| format!("Invalid table name '{}'", table))?;
        }

        let mut names = HashSet::new();
        for endpoint in std::iter::once(&self.source).chain(&self.destinations) {
            if endpoint.name.trim().is_empty() {
                bail!("Endpoint names must not be empty");
            }
            if !names.insert(endpoint.name.as_str()) {
                bail!("Duplicate endpoint name '{}'", endpoint.name);
            }
            if endpoint.identifier_limit == 0 {
                bail!("identifier_limit for '{}' must be positive", endpoint.name);
            }
        }

        if let Some(triple) = &self.triple_write {
            if self.destinations.len() < 2 {
                bail!("[triple_write] needs at least two destinations to use as replicas");
            }
            if triple.known_tags.is_empty() {
                bail!("[triple_write] known_tags must not be empty");
            }
        }
        Ok(())
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts.clone().into()
    }

    /// Destinations filtered by name; all of them when `names` is empty.
    pub fn select_destinations(&self, names: &[String]) -> Result<Vec<&EndpointConfig>> {
        if names.is_empty() {
            return Ok(self.destinations.iter().collect());
        }
        names
            .iter()
            .map(|name| {
                self.destinations
                    .iter()
                    .find(|d| &d.name == name)
                    .with_context(|| format!("Unknown destination '{}'", name))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
schema_file = "mysql_tables.txt"

[source]
name = "archive"
kind = "postgres"
url = "postgresql://reader@archive/eovsa"

[[destinations]]
name = "cloud"
kind = "mysql"
url = "mysql://writer@cloud/eOVSA06"
"#;

    #[test]
    fn test_defaults_applied() {
        let config = Config::from_toml(MINIMAL).unwrap();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.tables, default_tables());
        assert_eq!(config.destinations[0].identifier_limit, 30);
        assert!(!config.parallel_destinations);
        assert!(config.scan_index_dir.is_none());
        let timeouts = config.timeouts();
        assert_eq!(timeouts.probe, Duration::from_secs(1));
        assert_eq!(timeouts.bulk, Duration::from_secs(600));
    }

    #[test]
    fn test_batch_size_bounds() {
        let text = format!("batch_size = 101\n{}", MINIMAL);
        assert!(Config::from_toml(&text).is_err());
        let text = format!("batch_size = 0\n{}", MINIMAL);
        assert!(Config::from_toml(&text).is_err());
        let text = format!("batch_size = 25\n{}", MINIMAL);
        assert_eq!(Config::from_toml(&text).unwrap().batch_size, 25);
    }

    #[test]
    fn test_duplicate_endpoint_names_rejected() {
        let text = format!(
            "{}\n[[destinations]]\nname = \"cloud\"\nkind = \"sqlite\"\nurl = \"x.db\"\n",
            MINIMAL
        );
        let err = Config::from_toml(&text).unwrap_err();
        assert!(format!("{:#}", err).contains("Duplicate endpoint name"));
    }

    #[test]
    fn test_triple_write_needs_two_replicas() {
        let text = format!("{}\n[triple_write]\nknown_tags = [\"DCM\"]\n", MINIMAL);
        assert!(Config::from_toml(&text).is_err());

        let text = format!(
            "{}\n[[destinations]]\nname = \"site\"\nkind = \"mysql\"\nurl = \"mysql://w@site/db\"\n\n[triple_write]\nknown_tags = [\"DCM\", \"TPCAL\"]\n",
            MINIMAL
        );
        let config = Config::from_toml(&text).unwrap();
        assert_eq!(config.triple_write.unwrap().known_tags.len(), 2);
    }

    #[test]
    fn test_mssql_source_kind() {
        let text = MINIMAL.replace(
            "kind = \"postgres\"\nurl = \"postgresql://reader@archive/eovsa\"",
            "kind = \"mssql\"\nurl = \"server=tcp:sqlserver,1433;user=aa;password=x\"",
        );
        let config = Config::from_toml(&text).unwrap();
        assert_eq!(config.source.kind, EndpointKind::Mssql);
        assert_eq!(config.source.kind.dialect(), Dialect::MsSql);
    }

    #[test]
    fn test_select_destinations() {
        let config = Config::from_toml(MINIMAL).unwrap();
        assert_eq!(config.select_destinations(&[]).unwrap().len(), 1);
        assert_eq!(
            config.select_destinations(&["cloud".to_string()]).unwrap()[0].kind,
            EndpointKind::Mysql
        );
        assert!(config.select_destinations(&["nope".to_string()]).is_err());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive-replicator.toml");
        std::fs::write(&path, MINIMAL).unwrap();
        let config = Config::load(&path).await.unwrap();
        assert_eq!(config.source.name, "archive");
        assert!(Config::load(&dir.path().join("missing.toml")).await.is_err());
    }
}
