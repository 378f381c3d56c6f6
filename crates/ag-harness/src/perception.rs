use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use ag_core::clock::Clock;
use ag_core::config::{expand_home, PerceptionConfig};
use ag_core::reflection::{
    Headline, PerceptionData, PerceptionDigest, PerceptionSummary, SourceReport, SourceStatus,
};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PerceptionFailure {
    #[error("source unavailable: {0}")]
    Unavailable(String),
    #[error("malformed data: {0}")]
    Malformed(String),
}

/// A third-party data feed consulted during the night phase.
#[async_trait]
pub trait PerceptionSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self) -> Result<PerceptionSummary, PerceptionFailure>;
}

// ---------------------------------------------------------------------------
// JsonFileSource
// ---------------------------------------------------------------------------

/// Shape accepted from a feed document. Anything else is kept as opaque JSON.
#[derive(Debug, Default, Deserialize)]
struct FeedDocument {
    #[serde(default)]
    insights: Vec<String>,
    #[serde(default)]
    headlines: Vec<Headline>,
    #[serde(default)]
    metrics: BTreeMap<String, f64>,
}

/// Reads a JSON document that an external poller keeps up to date.
pub struct JsonFileSource {
    name: String,
    path: PathBuf,
    clock: Arc<dyn Clock>,
}

impl JsonFileSource {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            clock,
        }
    }
}

#[async_trait]
impl PerceptionSource for JsonFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<PerceptionSummary, PerceptionFailure> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| PerceptionFailure::Unavailable(format!("{}: {e}", self.path.display())))?;
        let value: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| PerceptionFailure::Malformed(format!("{}: {e}", self.path.display())))?;

        let (insights, data) = match serde_json::from_value::<FeedDocument>(value.clone()) {
            Ok(doc) if !doc.headlines.is_empty() => (
                doc.insights,
                PerceptionData::News {
                    headlines: doc.headlines,
                },
            ),
            Ok(doc) if !doc.metrics.is_empty() => (
                doc.insights,
                PerceptionData::Metrics {
                    values: doc.metrics,
                },
            ),
            Ok(doc) => (doc.insights, PerceptionData::Opaque { value }),
            Err(_) => (Vec::new(), PerceptionData::Opaque { value }),
        };
        Ok(PerceptionSummary {
            source: self.name.clone(),
            fetched_at: self.clock.now(),
            insights,
            data,
        })
    }
}

// ---------------------------------------------------------------------------
// PerceptionManager
// ---------------------------------------------------------------------------

/// Fetches every source through the retry policy and never fails as a whole.
#[derive(Default)]
pub struct PerceptionManager {
    sources: Vec<Arc<dyn PerceptionSource>>,
}

impl PerceptionManager {
    pub fn new(sources: Vec<Arc<dyn PerceptionSource>>) -> Self {
        Self { sources }
    }

    pub fn from_config(config: &PerceptionConfig, clock: Arc<dyn Clock>) -> Self {
        let sources = config
            .sources
            .iter()
            .map(|s| {
                Arc::new(JsonFileSource::new(
                    s.name.clone(),
                    expand_home(&s.path),
                    Arc::clone(&clock),
                )) as Arc<dyn PerceptionSource>
            })
            .collect();
        Self::new(sources)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// One report per source; failures become `Unavailable` markers.
    pub async fn gather(&self, policy: &RetryPolicy) -> PerceptionDigest {
        let mut reports = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            let name = source.name().to_string();
            let status = match policy.run(&name, || source.fetch()).await {
                Ok(summary) => SourceStatus::Healthy { summary },
                Err(e) => {
                    warn!(source = %name, error = %e, "perception source unavailable");
                    SourceStatus::Unavailable {
                        reason: e.to_string(),
                    }
                }
            };
            reports.push(SourceReport {
                source: name,
                status,
            });
        }
        let digest = PerceptionDigest { sources: reports };
        info!(healthy = digest.healthy(), total = digest.total(), "perception gathered");
        digest
    }
}
