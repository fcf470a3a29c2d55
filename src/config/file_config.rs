use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,

    // Policy tables
    pub job_scheduling: Option<JobSchedulingConfig>,
    /// vo -> registry entry
    pub registry: BTreeMap<String, VoRegistryConfig>,
    /// vo -> operations switches
    pub operations: BTreeMap<String, VoOperationsConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct JobSchedulingConfig {
    pub max_rescheduling: Option<u32>,
    pub default_cpu_time: Option<i64>,
    pub input_data_module: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct VoRegistryConfig {
    pub groups: BTreeMap<String, GroupConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct GroupConfig {
    pub job_share: Option<f64>,
    pub properties: Vec<String>,
    pub allow_background_tqs: Option<bool>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct VoOperationsConfig {
    pub enable_shares_correction: Option<bool>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config: FileConfig = toml::from_str(
            r#"
            db_dir = "/var/lib/wms"

            [job_scheduling]
            max_rescheduling = 5
            input_data_module = "InputDataByProtocol"

            [registry.lhcb.groups.lhcb_user]
            job_share = 2.5
            properties = ["JobSharing"]

            [registry.lhcb.groups.lhcb_prod]
            allow_background_tqs = true

            [operations.lhcb]
            enable_shares_correction = true
            "#,
        )
        .unwrap();

        assert_eq!(config.db_dir.as_deref(), Some("/var/lib/wms"));
        let scheduling = config.job_scheduling.unwrap();
        assert_eq!(scheduling.max_rescheduling, Some(5));
        assert_eq!(scheduling.default_cpu_time, None);
        let groups = &config.registry["lhcb"].groups;
        assert_eq!(groups["lhcb_user"].job_share, Some(2.5));
        assert_eq!(groups["lhcb_user"].properties, vec!["JobSharing"]);
        assert_eq!(groups["lhcb_prod"].allow_background_tqs, Some(true));
        assert_eq!(
            config.operations["lhcb"].enable_shares_correction,
            Some(true)
        );
    }

    #[test]
    fn test_empty_config() {
        let config: FileConfig = toml::from_str("").unwrap();
        assert!(config.db_dir.is_none());
        assert!(config.job_scheduling.is_none());
        assert!(config.registry.is_empty());
    }

    #[test]
    fn test_load_missing_file() {
        let err = FileConfig::load(Path::new("/nonexistent/jobstate.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
