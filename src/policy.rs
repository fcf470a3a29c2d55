//! Read-only scheduling policy snapshot handed to every bulk call.

use crate::job_store::AdmissionSettings;
use std::collections::BTreeMap;

/// Group property granting the job share to the whole group instead of
/// splitting it between the group's owners.
pub const JOB_SHARING: &str = "JobSharing";

pub const DEFAULT_MAX_RESCHEDULING: u32 = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct GroupPolicy {
    pub job_share: f64,
    pub properties: Vec<String>,
    pub allow_background_tqs: bool,
}

impl Default for GroupPolicy {
    fn default() -> Self {
        Self {
            job_share: 1.0,
            properties: Vec::new(),
            allow_background_tqs: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PolicyConfig {
    pub max_rescheduling: u32,
    pub admission: AdmissionSettings,
    /// vo -> group -> policy
    pub registry: BTreeMap<String, BTreeMap<String, GroupPolicy>>,
    /// vo -> shares correction switch
    pub shares_correction: BTreeMap<String, bool>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_rescheduling: DEFAULT_MAX_RESCHEDULING,
            admission: AdmissionSettings::default(),
            registry: BTreeMap::new(),
            shares_correction: BTreeMap::new(),
        }
    }
}

impl PolicyConfig {
    pub fn group_policy(&self, vo: &str, group: &str) -> Option<&GroupPolicy> {
        self.registry.get(vo).and_then(|groups| groups.get(group))
    }

    pub fn shares_correction_enabled(&self, vo: &str) -> bool {
        self.shares_correction.get(vo).copied().unwrap_or(false)
    }

    pub fn with_group(mut self, vo: &str, group: &str, policy: GroupPolicy) -> Self {
        self.registry
            .entry(vo.to_string())
            .or_default()
            .insert(group.to_string(), policy);
        self
    }
}
