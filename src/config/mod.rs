mod file_config;

pub use file_config::{
    FileConfig, GroupConfig, JobSchedulingConfig, VoOperationsConfig, VoRegistryConfig,
};

use crate::job_store::AdmissionSettings;
use crate::policy::{GroupPolicy, PolicyConfig, DEFAULT_MAX_RESCHEDULING};
use anyhow::{bail, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub max_rescheduling: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    pub policy: PolicyConfig,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let scheduling = file.job_scheduling.unwrap_or_default();
        let max_rescheduling = scheduling
            .max_rescheduling
            .or(cli.max_rescheduling)
            .unwrap_or(DEFAULT_MAX_RESCHEDULING);

        let mut admission = AdmissionSettings::default();
        if let Some(cpu_time) = scheduling.default_cpu_time {
            if cpu_time <= 0 {
                bail!("default_cpu_time must be positive, got {}", cpu_time);
            }
            admission.default_cpu_time = cpu_time;
        }
        admission.input_data_module = scheduling.input_data_module;

        let registry = file
            .registry
            .into_iter()
            .map(|(vo, entry)| {
                let groups = entry
                    .groups
                    .into_iter()
                    .map(|(group, config)| (group, group_policy(config)))
                    .collect::<BTreeMap<_, _>>();
                (vo, groups)
            })
            .collect();

        let shares_correction = file
            .operations
            .into_iter()
            .map(|(vo, ops)| (vo, ops.enable_shares_correction.unwrap_or(false)))
            .collect();

        Ok(Self {
            db_dir,
            policy: PolicyConfig {
                max_rescheduling,
                admission,
                registry,
                shares_correction,
            },
        })
    }

    pub fn jobs_db_path(&self) -> PathBuf {
        self.db_dir.join("jobs.db")
    }

    pub fn job_logging_db_path(&self) -> PathBuf {
        self.db_dir.join("job_logging.db")
    }

    pub fn task_queue_db_path(&self) -> PathBuf {
        self.db_dir.join("task_queue.db")
    }

    pub fn sandbox_metadata_db_path(&self) -> PathBuf {
        self.db_dir.join("sandbox_metadata.db")
    }
}

fn group_policy(config: GroupConfig) -> GroupPolicy {
    let defaults = GroupPolicy::default();
    GroupPolicy {
        job_share: config.job_share.unwrap_or(defaults.job_share),
        properties: config.properties,
        allow_background_tqs: config
            .allow_background_tqs
            .unwrap_or(defaults.allow_background_tqs),
    }
}
