//! Helper spawn policy: which specializations deserve a dedicated helper.

use std::collections::BTreeMap;

use ag_core::types::{HelperAgent, Task, TaskStatus};
use ag_harness::skill::JOURNAL_SKILL;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecializationGap {
    pub skill: String,
    pub completed: usize,
}

/// Skills with at least `threshold` completed tasks and no helper yet,
/// ordered by completed count descending, then name.
pub fn specialization_gaps(
    tasks: &[Task],
    helpers: &[HelperAgent],
    threshold: usize,
) -> Vec<SpecializationGap> {
    let mut completed: BTreeMap<String, usize> = BTreeMap::new();
    for task in tasks.iter().filter(|t| t.status == TaskStatus::Completed) {
        if let Some(skill) = task.skill.as_deref() {
            let skill = skill.trim().to_ascii_lowercase();
            if !skill.is_empty() && skill != JOURNAL_SKILL {
                *completed.entry(skill).or_default() += 1;
            }
        }
    }

    let mut gaps: Vec<SpecializationGap> = completed
        .into_iter()
        .filter(|(skill, n)| {
            *n >= threshold
                && !helpers
                    .iter()
                    .any(|h| h.specialization.eq_ignore_ascii_case(skill))
        })
        .map(|(skill, completed)| SpecializationGap { skill, completed })
        .collect();
    gaps.sort_by(|a, b| b.completed.cmp(&a.completed).then(a.skill.cmp(&b.skill)));
    gaps
}

/// At most one helper per gap and at most `cap` in total.
pub fn plan_spawns(gaps: Vec<SpecializationGap>, cap: usize) -> Vec<SpecializationGap> {
    gaps.into_iter().take(cap).collect()
}
