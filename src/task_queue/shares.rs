//! Priority computation for the task queues of one scheduling entity.

use super::models::{
    TaskQueueDefinition, TaskQueueId, BACKGROUND_PRIORITY_THRESHOLD, TQ_MIN_SHARE,
};
use std::collections::BTreeMap;

/// Distribute `share` over queues in proportion to their average job
/// priority.
///
/// With `allow_background_tqs`, background queues are left out of the
/// distribution and pinned to [`TQ_MIN_SHARE`].
pub fn calculate_priorities(
    average_priorities: &BTreeMap<TaskQueueId, f64>,
    share: f64,
    allow_background_tqs: bool,
) -> BTreeMap<TaskQueueId, f64> {
    let counts = |avg: f64| avg > BACKGROUND_PRIORITY_THRESHOLD || !allow_background_tqs;
    let total: f64 = average_priorities
        .values()
        .copied()
        .filter(|avg| counts(*avg))
        .sum();

    average_priorities
        .iter()
        .map(|(tq_id, avg)| {
            let priority = if counts(*avg) && total > 0.0 {
                share / total * avg
            } else {
                TQ_MIN_SHARE
            };
            (*tq_id, priority.max(TQ_MIN_SHARE))
        })
        .collect()
}

/// Queues with equal definitions get the sum of their priorities.
pub fn merge_equivalent_queues(
    priorities: &BTreeMap<TaskQueueId, f64>,
    definitions: &BTreeMap<TaskQueueId, TaskQueueDefinition>,
) -> BTreeMap<TaskQueueId, f64> {
    let mut groups: Vec<(&TaskQueueDefinition, Vec<TaskQueueId>)> = Vec::new();
    for tq_id in priorities.keys() {
        let Some(definition) = definitions.get(tq_id) else {
            continue;
        };
        match groups.iter_mut().find(|(d, _)| *d == definition) {
            Some((_, members)) => members.push(*tq_id),
            None => groups.push((definition, vec![*tq_id])),
        }
    }

    let mut merged = priorities.clone();
    for (_, members) in groups.iter().filter(|(_, m)| m.len() > 1) {
        let sum: f64 = members.iter().filter_map(|id| priorities.get(id)).sum();
        for id in members {
            merged.insert(*id, sum);
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(requirements: &str) -> TaskQueueDefinition {
        TaskQueueDefinition {
            owner: "alice".to_string(),
            owner_group: "lhcb_user".to_string(),
            vo: "lhcb".to_string(),
            cpu_time: 3600,
            requirements: requirements.to_string(),
        }
    }

    #[test]
    fn test_share_split_proportionally() {
        let averages = BTreeMap::from([(1, 1.0), (2, 3.0)]);
        let priorities = calculate_priorities(&averages, 4.0, false);
        assert!((priorities[&1] - 1.0).abs() < 1e-9);
        assert!((priorities[&2] - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_background_queues_pinned_to_min_share() {
        let averages = BTreeMap::from([(1, 0.05), (2, 2.0)]);

        let with_background = calculate_priorities(&averages, 1.0, true);
        assert_eq!(with_background[&1], TQ_MIN_SHARE);
        assert!((with_background[&2] - 1.0).abs() < 1e-9);

        let without_background = calculate_priorities(&averages, 1.0, false);
        assert!(without_background[&1] > TQ_MIN_SHARE);
    }

    #[test]
    fn test_zero_total_falls_back_to_min_share() {
        let averages = BTreeMap::from([(1, 0.0)]);
        assert_eq!(calculate_priorities(&averages, 1.0, false)[&1], TQ_MIN_SHARE);
    }

    #[test]
    fn test_equivalent_queues_share_summed_priority() {
        let priorities = BTreeMap::from([(1, 0.25), (2, 0.5), (3, 0.25)]);
        let definitions = BTreeMap::from([
            (1, definition("a")),
            (2, definition("b")),
            (3, definition("a")),
        ]);
        let merged = merge_equivalent_queues(&priorities, &definitions);
        assert_eq!(merged[&1], 0.5);
        assert_eq!(merged[&3], 0.5);
        assert_eq!(merged[&2], 0.5);
    }
}
