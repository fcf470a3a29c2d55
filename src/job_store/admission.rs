use super::models::{Admission, JobId};
use crate::jdl::{list_expression, JobDescription};

pub const DEFAULT_CPU_TIME: i64 = 86400;

/// Settings applied to every description that passes admission.
#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionSettings {
    pub default_cpu_time: i64,
    pub input_data_module: Option<String>,
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        Self {
            default_cpu_time: DEFAULT_CPU_TIME,
            input_data_module: None,
        }
    }
}

/// Check a job description against the job's identity and derive its
/// scheduling requirements.
///
/// On acceptance the identity attributes are stamped into both documents and
/// `requirements` holds `UserPriority`, `CPUTime` and the site constraints.
#[allow(clippy::too_many_arguments)]
pub fn prepare_admission(
    settings: &AdmissionSettings,
    job_id: JobId,
    job_description: &mut dyn JobDescription,
    requirements: &mut dyn JobDescription,
    owner: &str,
    owner_group: &str,
    job_vo: &str,
    requested_vo: Option<&str>,
) -> Admission {
    if let Some(group) = job_description.get_attribute_string("OwnerGroup") {
        if group != owner_group {
            return Admission::Rejected(format!(
                "Job {} description group {} does not match owner group {}",
                job_id, group, owner_group
            ));
        }
    }
    if let Some(vo) = requested_vo.filter(|vo| !vo.is_empty()) {
        if vo != job_vo {
            return Admission::Rejected(format!(
                "Job {} description VirtualOrganization {} does not match {}",
                job_id, vo, job_vo
            ));
        }
    }

    let sites = job_description.get_list_from_expression("Site");
    let banned_sites = job_description.get_list_from_expression("BannedSites");
    let conflicting: Vec<&String> = sites.iter().filter(|s| banned_sites.contains(s)).collect();
    if !conflicting.is_empty() {
        return Admission::Rejected(format!(
            "Job {} has sites both requested and banned: {}",
            job_id,
            conflicting
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }

    stamp_identity(job_description, owner, owner_group, job_vo);
    stamp_identity(requirements, owner, owner_group, job_vo);

    if let Some(module) = &settings.input_data_module {
        if !job_description.lookup_attribute("InputDataModule") {
            job_description.insert_attribute_string("InputDataModule", module);
        }
    }

    let priority = job_description.get_attribute_int("Priority").unwrap_or(1);
    requirements.insert_attribute_int("UserPriority", priority);
    let cpu_time = job_description
        .get_attribute_int("CPUTime")
        .unwrap_or(settings.default_cpu_time);
    requirements.insert_attribute_int("CPUTime", cpu_time);
    if !sites.is_empty() {
        requirements.insert_expression("Sites", &list_expression(&sites));
    }
    if !banned_sites.is_empty() {
        requirements.insert_expression("BannedSites", &list_expression(&banned_sites));
    }

    Admission::Accepted
}

fn stamp_identity(doc: &mut dyn JobDescription, owner: &str, owner_group: &str, vo: &str) {
    doc.insert_attribute_string("Owner", owner);
    doc.insert_attribute_string("OwnerGroup", owner_group);
    doc.insert_attribute_string("VirtualOrganization", vo);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jdl::ClassAd;

    fn run(jdl: &str, settings: &AdmissionSettings, vo: Option<&str>) -> (Admission, ClassAd, ClassAd) {
        let mut job = ClassAd::parse(jdl).unwrap();
        let mut req = ClassAd::new();
        let admission = prepare_admission(settings, 1, &mut job, &mut req, "alice", "lhcb_user", "lhcb", vo);
        (admission, job, req)
    }

    #[test]
    fn test_accepts_and_fills_requirements() {
        let settings = AdmissionSettings {
            default_cpu_time: 1000,
            input_data_module: Some("InputDataByProtocol".to_string()),
        };
        let (admission, job, req) = run(
            "[Priority = 4; Site = {\"CERN\", \"FNAL\"}]",
            &settings,
            Some("lhcb"),
        );
        assert_eq!(admission, Admission::Accepted);
        assert_eq!(job.get_attribute_string("Owner"), Some("alice".to_string()));
        assert_eq!(
            job.get_attribute_string("InputDataModule"),
            Some("InputDataByProtocol".to_string())
        );
        assert_eq!(req.get_attribute_int("UserPriority"), Some(4));
        assert_eq!(req.get_attribute_int("CPUTime"), Some(1000));
        assert_eq!(req.get_list_from_expression("Sites").len(), 2);
        assert_eq!(
            req.get_attribute_string("VirtualOrganization"),
            Some("lhcb".to_string())
        );
        assert_eq!(req.get_attribute_string("Owner"), Some("alice".to_string()));
        assert_eq!(
            job.get_attribute_string("OwnerGroup"),
            Some("lhcb_user".to_string())
        );
    }

    #[test]
    fn test_rejects_group_mismatch() {
        let (admission, _, _) = run("[OwnerGroup = \"other\"]", &AdmissionSettings::default(), None);
        assert!(matches!(admission, Admission::Rejected(msg) if msg.contains("other")));
    }

    #[test]
    fn test_rejects_vo_mismatch() {
        let (admission, _, _) = run("[JobName = \"x\"]", &AdmissionSettings::default(), Some("atlas"));
        assert!(matches!(admission, Admission::Rejected(_)));
    }

    #[test]
    fn test_rejects_banned_requested_site() {
        let (admission, _, _) = run(
            "[Site = \"CERN\"; BannedSites = {\"CERN\", \"RAL\"}]",
            &AdmissionSettings::default(),
            None,
        );
        assert!(matches!(admission, Admission::Rejected(msg) if msg.contains("CERN")));
    }
}
