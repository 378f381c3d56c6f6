use std::path::PathBuf;

use ag_core::types::PulsePhase;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("notification not delivered: {0}")]
pub struct NotifyError(pub String);

/// A report handed to the notifier after a night pulse.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub subject: String,
    /// Markdown.
    pub body: String,
    pub recipient: Option<String>,
    pub phase: PulsePhase,
    pub created_at: DateTime<Utc>,
}

/// Outbound delivery, e.g. an email transport.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, report: &Report) -> Result<(), NotifyError>;
}

/// Writes each report as a markdown file into an outbox directory for an
/// external mailer to pick up.
pub struct OutboxNotifier {
    dir: PathBuf,
}

impl OutboxNotifier {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn file_name(report: &Report) -> String {
        let slug: String = report
            .subject
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
            .collect::<String>()
            .split('-')
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("-");
        format!("{}-{slug}.md", report.created_at.format("%Y%m%dT%H%M%S"))
    }
}

#[async_trait]
impl Notifier for OutboxNotifier {
    async fn send(&self, report: &Report) -> Result<(), NotifyError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| NotifyError(format!("{}: {e}", self.dir.display())))?;
        let mut doc = String::new();
        if let Some(to) = &report.recipient {
            doc.push_str(&format!("To: {to}\n"));
        }
        doc.push_str(&format!("Subject: {}\n\n{}", report.subject, report.body));

        let path = self.dir.join(Self::file_name(report));
        tokio::fs::write(&path, doc)
            .await
            .map_err(|e| NotifyError(format!("{}: {e}", path.display())))?;
        info!(path = %path.display(), "report written to outbox");
        Ok(())
    }
}
