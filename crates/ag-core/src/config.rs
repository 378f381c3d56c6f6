use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// Top-level configuration loaded from `~/.agent-garden/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub pulse: PulseConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub helpers: HelpersConfig,
    #[serde(default)]
    pub collaborators: CollaboratorsConfig,
    #[serde(default)]
    pub perception: PerceptionConfig,
    /// Skill name -> external command executing it.
    #[serde(default)]
    pub skills: BTreeMap<String, SkillConfig>,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub backup: BackupConfig,
}

impl Config {
    /// Load config from `~/.agent-garden/config.toml`, falling back to
    /// defaults when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            let cfg = Config::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// `--config` when given, otherwise the default location.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::load_from(p),
            None => Self::load(),
        }
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Semantic validation for settings that are not fully expressible via type checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.general.validate()?;
        self.pulse.validate()?;
        if self.memory.recent_window == 0 {
            return Err(invalid("memory.recent_window must be greater than zero"));
        }
        if self.helpers.spawn_threshold == 0 {
            return Err(invalid("helpers.spawn_threshold must be greater than zero"));
        }
        self.collaborators.validate()?;
        self.perception.validate()?;
        for (name, skill) in &self.skills {
            if skill.command.trim().is_empty() {
                return Err(invalid(format!("skills.{name}.command must not be empty")));
            }
        }
        if self.backup.keep == 0 {
            return Err(invalid("backup.keep must be greater than zero"));
        }
        Ok(())
    }

    /// `general.state_dir` with a leading `~` expanded.
    pub fn state_dir(&self) -> PathBuf {
        expand_home(&self.general.state_dir)
    }

    /// `notifier.outbox_dir`, relative paths resolved under the state dir.
    pub fn outbox_dir(&self) -> PathBuf {
        self.resolve_under_state(&self.notifier.outbox_dir)
    }

    /// `backup.dir`, relative paths resolved under the state dir.
    pub fn backup_dir(&self) -> PathBuf {
        self.resolve_under_state(&self.backup.dir)
    }

    fn resolve_under_state(&self, raw: &str) -> PathBuf {
        let p = expand_home(raw);
        if p.is_absolute() {
            p
        } else {
            self.state_dir().join(p)
        }
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".agent-garden")
            .join("config.toml")
    }
}

pub fn expand_home(raw: &str) -> PathBuf {
    match raw.strip_prefix("~/").or_else(|| (raw == "~").then_some("")) {
        Some(rest) => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest),
        None => PathBuf::from(raw),
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_agent_id")]
    pub agent_id: String,
    #[serde(default = "default_agent_name")]
    pub agent_name: String,
    #[serde(default = "default_mission")]
    pub mission: String,
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// `human` or `json`.
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            agent_id: default_agent_id(),
            agent_name: default_agent_name(),
            mission: default_mission(),
            state_dir: default_state_dir(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl GeneralConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let id_ok = !self.agent_id.is_empty()
            && self
                .agent_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !id_ok {
            return Err(invalid(format!(
                "general.agent_id '{}' may only contain letters, digits, '-' and '_'",
                self.agent_id
            )));
        }
        if self.state_dir.trim().is_empty() {
            return Err(invalid("general.state_dir must not be empty"));
        }
        match self.log_format.as_str() {
            "human" | "json" => Ok(()),
            other => Err(invalid(format!(
                "general.log_format must be 'human' or 'json', got '{other}'"
            ))),
        }
    }

    pub fn json_logs(&self) -> bool {
        self.log_format == "json"
    }
}

fn default_agent_id() -> String {
    "garden".into()
}
fn default_agent_name() -> String {
    "Garden".into()
}
fn default_mission() -> String {
    "Work through the task queue by day and learn from the results by night".into()
}
fn default_state_dir() -> String {
    "~/.agent-garden".into()
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "human".into()
}

/// What a second night pulse for the same night does when a reflection exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReflectionPolicy {
    /// Keep the existing reflection; nothing is re-sent.
    #[default]
    Skip,
    /// Write a new revision that supersedes the previous one.
    Supersede,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulseConfig {
    /// Start of the day window, UTC.
    #[serde(default = "default_day_start", with = "time_of_day")]
    pub day_start: NaiveTime,
    #[serde(default = "default_day_end", with = "time_of_day")]
    pub day_end: NaiveTime,
    /// Optional explicit night window; must be the complement of the day window.
    #[serde(default, with = "opt_time_of_day", skip_serializing_if = "Option::is_none")]
    pub night_start: Option<NaiveTime>,
    #[serde(default, with = "opt_time_of_day", skip_serializing_if = "Option::is_none")]
    pub night_end: Option<NaiveTime>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_tasks")]
    pub max_tasks_per_pulse: usize,
    #[serde(default)]
    pub reflection_policy: ReflectionPolicy,
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            day_start: default_day_start(),
            day_end: default_day_end(),
            night_start: None,
            night_end: None,
            poll_interval_secs: default_poll_interval(),
            max_tasks_per_pulse: default_max_tasks(),
            reflection_policy: ReflectionPolicy::default(),
        }
    }
}

impl PulseConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.day_start == self.day_end {
            return Err(invalid("pulse.day_start and pulse.day_end must differ"));
        }
        match (self.night_start, self.night_end) {
            (None, None) => {}
            (Some(ns), Some(ne)) => {
                if ns != self.day_end || ne != self.day_start {
                    return Err(invalid(format!(
                        "pulse night window {}-{} must be the complement of the day window {}-{}",
                        ns.format("%H:%M"),
                        ne.format("%H:%M"),
                        self.day_start.format("%H:%M"),
                        self.day_end.format("%H:%M"),
                    )));
                }
            }
            _ => {
                return Err(invalid("pulse.night_start and pulse.night_end must be set together"));
            }
        }
        if self.poll_interval_secs == 0 {
            return Err(invalid("pulse.poll_interval_secs must be greater than zero"));
        }
        if self.max_tasks_per_pulse == 0 {
            return Err(invalid("pulse.max_tasks_per_pulse must be greater than zero"));
        }
        Ok(())
    }
}

fn default_day_start() -> NaiveTime {
    NaiveTime::from_hms_opt(8, 0, 0).unwrap_or_default()
}
fn default_day_end() -> NaiveTime {
    NaiveTime::from_hms_opt(20, 0, 0).unwrap_or_default()
}
fn default_poll_interval() -> u64 {
    900
}
fn default_max_tasks() -> usize {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Entries pulled into each reflection.
    #[serde(default = "default_recent_window")]
    pub recent_window: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            recent_window: default_recent_window(),
        }
    }
}

fn default_recent_window() -> usize {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelpersConfig {
    #[serde(default = "default_max_spawns")]
    pub max_spawns_per_night: usize,
    /// Completed tasks of one skill before a specialist is spawned for it.
    #[serde(default = "default_spawn_threshold")]
    pub spawn_threshold: usize,
}

impl Default for HelpersConfig {
    fn default() -> Self {
        Self {
            max_spawns_per_night: default_max_spawns(),
            spawn_threshold: default_spawn_threshold(),
        }
    }
}

fn default_max_spawns() -> usize {
    1
}
fn default_spawn_threshold() -> usize {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaboratorsConfig {
    /// Per-attempt timeout for skills, perception, notifier and backup.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for CollaboratorsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl CollaboratorsConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 {
            return Err(invalid("collaborators.timeout_secs must be greater than zero"));
        }
        if self.retry_attempts == 0 {
            return Err(invalid("collaborators.retry_attempts must be greater than zero"));
        }
        Ok(())
    }
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    500
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerceptionConfig {
    #[serde(default)]
    pub sources: Vec<PerceptionSourceConfig>,
}

impl PerceptionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let mut names = BTreeSet::new();
        for source in &self.sources {
            let name = source.name.trim();
            if name.is_empty() {
                return Err(invalid("perception.sources entries must have a non-empty name"));
            }
            if !names.insert(name.to_string()) {
                return Err(invalid(format!(
                    "perception.sources contains duplicate source '{name}'"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerceptionSourceConfig {
    pub name: String,
    /// JSON document refreshed by an external poller.
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Other skill names routed to this command.
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    #[serde(default = "default_outbox_dir")]
    pub outbox_dir: String,
    #[serde(default)]
    pub recipient: Option<String>,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            outbox_dir: default_outbox_dir(),
            recipient: None,
        }
    }
}

fn default_outbox_dir() -> String {
    "outbox".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    #[serde(default = "default_backup_dir")]
    pub dir: String,
    /// Snapshots retained; older ones are pruned.
    #[serde(default = "default_backup_keep")]
    pub keep: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: default_backup_dir(),
            keep: default_backup_keep(),
        }
    }
}

fn default_backup_dir() -> String {
    "backups".into()
}
fn default_backup_keep() -> usize {
    7
}

// ---------------------------------------------------------------------------
// Time-of-day (de)serialization as "HH:MM"
// ---------------------------------------------------------------------------

pub(crate) fn parse_time_of_day(raw: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw.trim(), "%H:%M:%S"))
        .map_err(|_| format!("invalid time of day '{raw}', expected HH:MM"))
}

mod time_of_day {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_time_of_day(&raw).map_err(serde::de::Error::custom)
    }
}

mod opt_time_of_day {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &Option<NaiveTime>, s: S) -> Result<S::Ok, S::Error> {
        match t {
            Some(t) => s.serialize_str(&t.format("%H:%M").to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveTime>, D::Error> {
        match Option::<String>::deserialize(d)? {
            Some(raw) => super::parse_time_of_day(&raw)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_of_day_accepts_seconds() {
        assert_eq!(
            parse_time_of_day("07:30:15").unwrap(),
            NaiveTime::from_hms_opt(7, 30, 15).unwrap()
        );
        assert!(parse_time_of_day("25:00").is_err());
    }

    #[test]
    fn relative_dirs_resolve_under_state_dir() {
        let mut cfg = Config::default();
        cfg.general.state_dir = "/var/lib/garden".into();
        assert_eq!(cfg.outbox_dir(), PathBuf::from("/var/lib/garden/outbox"));
        cfg.backup.dir = "/mnt/backups".into();
        assert_eq!(cfg.backup_dir(), PathBuf::from("/mnt/backups"));
    }

    #[test]
    fn home_is_expanded() {
        let expanded = expand_home("~/.agent-garden");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert_eq!(expand_home("/abs/path"), PathBuf::from("/abs/path"));
    }
}
