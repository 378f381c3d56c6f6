//! Nightly reflection document and the perception digest it embeds.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{MemoryCategory, TaskCounts};

// ---------------------------------------------------------------------------
// Perception
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Headline {
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

/// Typed shapes for what a perception source returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PerceptionData {
    News { headlines: Vec<Headline> },
    Metrics { values: BTreeMap<String, f64> },
    Opaque { value: serde_json::Value },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerceptionSummary {
    pub source: String,
    pub fetched_at: DateTime<Utc>,
    #[serde(default)]
    pub insights: Vec<String>,
    pub data: PerceptionData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceStatus {
    Healthy { summary: PerceptionSummary },
    Unavailable { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceReport {
    pub source: String,
    pub status: SourceStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerceptionDigest {
    pub sources: Vec<SourceReport>,
}

impl PerceptionDigest {
    pub fn healthy(&self) -> usize {
        self.sources
            .iter()
            .filter(|s| matches!(s.status, SourceStatus::Healthy { .. }))
            .count()
    }

    pub fn total(&self) -> usize {
        self.sources.len()
    }

    pub fn unavailable(&self) -> impl Iterator<Item = (&str, &str)> {
        self.sources.iter().filter_map(|s| match &s.status {
            SourceStatus::Unavailable { reason } => Some((s.source.as_str(), reason.as_str())),
            SourceStatus::Healthy { .. } => None,
        })
    }

    pub fn headline(&self) -> String {
        format!(
            "{}/{} perception sources healthy",
            self.healthy(),
            self.total()
        )
    }
}

// ---------------------------------------------------------------------------
// Reflection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelperReport {
    pub helper_id: Uuid,
    pub name: String,
    pub specialization: String,
    pub tasks_completed: u64,
    /// Delegated tasks completed since the previous night began.
    pub completed_recently: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentNote {
    pub entry_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub category: MemoryCategory,
    pub summary: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SelfAssessment {
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub completion_rate: f64,
}

impl From<TaskCounts> for SelfAssessment {
    fn from(c: TaskCounts) -> Self {
        Self {
            pending: c.pending,
            in_progress: c.in_progress,
            completed: c.completed,
            failed: c.failed,
            completion_rate: c.completion_rate(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reflection {
    /// Date on which the night began.
    pub night: NaiveDate,
    pub revision: u32,
    #[serde(default)]
    pub supersedes: Option<Uuid>,
    pub generated_at: DateTime<Utc>,
    pub perception: PerceptionDigest,
    pub helper_reports: Vec<HelperReport>,
    pub recent: Vec<RecentNote>,
    pub assessment: SelfAssessment,
    pub improvements: Vec<String>,
    pub focus: Vec<String>,
}

impl Reflection {
    /// Render the reflection as the markdown report sent by the notifier.
    pub fn to_markdown(&self, agent_name: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# {agent_name}: nightly reflection for {}", self.night);
        if self.revision > 1 {
            let _ = writeln!(out, "\n_Revision {}_", self.revision);
        }

        let a = &self.assessment;
        let _ = writeln!(out, "\n## Self-assessment\n");
        let _ = writeln!(out, "- completed: {}", a.completed);
        let _ = writeln!(out, "- failed: {}", a.failed);
        let _ = writeln!(out, "- open: {}", a.pending + a.in_progress);
        let _ = writeln!(out, "- completion rate: {:.1}%", a.completion_rate * 100.0);

        let _ = writeln!(out, "\n## Perception\n");
        let _ = writeln!(out, "{}", self.perception.headline());
        for report in &self.perception.sources {
            match &report.status {
                SourceStatus::Healthy { summary } => {
                    let _ = writeln!(out, "\n### {}", report.source);
                    for insight in &summary.insights {
                        let _ = writeln!(out, "- {insight}");
                    }
                    if let PerceptionData::News { headlines } = &summary.data {
                        for h in headlines.iter().take(5) {
                            let _ = writeln!(out, "- {}", h.title);
                        }
                    }
                }
                SourceStatus::Unavailable { reason } => {
                    let _ = writeln!(out, "\n### {} (unavailable)\n- {reason}", report.source);
                }
            }
        }

        if !self.helper_reports.is_empty() {
            let _ = writeln!(out, "\n## Helpers\n");
            for h in &self.helper_reports {
                let _ = writeln!(
                    out,
                    "- {} ({}): {} completed, {} recently",
                    h.name, h.specialization, h.tasks_completed, h.completed_recently
                );
            }
        }

        if !self.recent.is_empty() {
            let _ = writeln!(out, "\n## Recent memory\n");
            for note in &self.recent {
                let _ = writeln!(
                    out,
                    "- {} [{}] {}",
                    note.timestamp.format("%Y-%m-%d %H:%M"),
                    note.category,
                    note.summary
                );
            }
        }

        let _ = writeln!(out, "\n## Improvements\n");
        for item in &self.improvements {
            let _ = writeln!(out, "- {item}");
        }
        let _ = writeln!(out, "\n## Focus for tomorrow\n");
        for item in &self.focus {
            let _ = writeln!(out, "- {item}");
        }
        out
    }
}
