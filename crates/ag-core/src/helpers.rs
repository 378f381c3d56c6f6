use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::{HelperError, StoreError};
use crate::fsio;
use crate::types::{HelperAgent, TaskId};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RegistryFile {
    helpers: Vec<HelperAgent>,
    /// Task id -> helper credited with it. Makes completion replay a no-op.
    #[serde(default)]
    completions: BTreeMap<TaskId, Uuid>,
}

/// Helpers spawned by one owning agent, persisted in `helpers.json`.
pub struct HelperRegistry {
    path: PathBuf,
    parent_id: String,
    state: RegistryFile,
}

impl HelperRegistry {
    pub fn open(path: impl Into<PathBuf>, parent_id: impl Into<String>) -> Result<Self, StoreError> {
        let path = path.into();
        let state = fsio::read_json(&path)?.unwrap_or_default();
        Ok(Self {
            path,
            parent_id: parent_id.into(),
            state,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn spawn(
        &mut self,
        specialization: &str,
        mission: &str,
        now: DateTime<Utc>,
    ) -> Result<HelperAgent, StoreError> {
        let helper = HelperAgent {
            id: Uuid::new_v4(),
            parent_id: self.parent_id.clone(),
            name: helper_name(specialization),
            specialization: specialization.to_string(),
            mission: mission.to_string(),
            tasks_completed: 0,
            created_at: now,
        };
        let mut next = self.state.clone();
        next.helpers.push(helper.clone());
        self.commit(next)?;
        info!(helper_id = %helper.id, name = %helper.name, %specialization, "helper spawned");
        Ok(helper)
    }

    /// Credit `task_id` to `helper_id`. Returns `false` when the task was
    /// already credited, in which case nothing changes.
    pub fn record_task_completion(
        &mut self,
        helper_id: Uuid,
        task_id: TaskId,
    ) -> Result<bool, HelperError> {
        if self.state.completions.contains_key(&task_id) {
            return Ok(false);
        }
        let idx = self
            .state
            .helpers
            .iter()
            .position(|h| h.id == helper_id)
            .ok_or(HelperError::NotFound(helper_id))?;
        let mut next = self.state.clone();
        next.helpers[idx].tasks_completed += 1;
        next.completions.insert(task_id, helper_id);
        self.commit(next)?;
        Ok(true)
    }

    pub fn list(&self) -> &[HelperAgent] {
        &self.state.helpers
    }

    pub fn get(&self, id: &Uuid) -> Option<&HelperAgent> {
        self.state.helpers.iter().find(|h| &h.id == id)
    }

    /// First helper whose specialization matches, ignoring case.
    pub fn find_by_specialization(&self, specialization: &str) -> Option<&HelperAgent> {
        self.state
            .helpers
            .iter()
            .find(|h| h.specialization.eq_ignore_ascii_case(specialization))
    }

    pub fn len(&self) -> usize {
        self.state.helpers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.helpers.is_empty()
    }

    fn commit(&mut self, next: RegistryFile) -> Result<(), StoreError> {
        fsio::write_json_atomic(&self.path, &next)?;
        self.state = next;
        Ok(())
    }
}

/// `"data-analysis"` becomes `"Data Analysis Helper"`.
fn helper_name(specialization: &str) -> String {
    let words: Vec<String> = specialization
        .split(|c: char| c == '-' || c == '_' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect();
    if words.is_empty() {
        "Helper".to_string()
    } else {
        format!("{} Helper", words.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_is_counted_once_per_task() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = HelperRegistry::open(dir.path().join("helpers.json"), "garden").unwrap();
        let helper = registry.spawn("research", "dig", Utc::now()).unwrap();

        assert!(registry.record_task_completion(helper.id, 7).unwrap());
        assert!(!registry.record_task_completion(helper.id, 7).unwrap());
        assert!(registry.record_task_completion(helper.id, 8).unwrap());

        let reopened = HelperRegistry::open(dir.path().join("helpers.json"), "garden").unwrap();
        assert_eq!(reopened.get(&helper.id).unwrap().tasks_completed, 2);
        assert!(!reopened.state.completions.is_empty());
    }

    #[test]
    fn unknown_helper_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = HelperRegistry::open(dir.path().join("helpers.json"), "garden").unwrap();
        let err = registry.record_task_completion(Uuid::new_v4(), 1).unwrap_err();
        assert!(matches!(err, HelperError::NotFound(_)));
    }

    #[test]
    fn specialization_lookup_ignores_case() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = HelperRegistry::open(dir.path().join("helpers.json"), "garden").unwrap();
        let helper = registry.spawn("Research", "dig", Utc::now()).unwrap();
        assert_eq!(helper.parent_id, "garden");
        assert_eq!(helper.name, "Research Helper");
        assert_eq!(
            registry.find_by_specialization("research").map(|h| h.id),
            Some(helper.id)
        );
        assert!(registry.find_by_specialization("monitoring").is_none());
    }

    #[test]
    fn helper_names() {
        assert_eq!(helper_name("data-analysis"), "Data Analysis Helper");
        assert_eq!(helper_name("content_creation"), "Content Creation Helper");
        assert_eq!(helper_name(""), "Helper");
    }
}
