use ag_core::config::{Config, ReflectionPolicy};
use chrono::NaiveTime;

fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

#[test]
fn default_config() {
    let cfg = Config::default();
    assert_eq!(cfg.general.agent_id, "garden");
    assert_eq!(cfg.general.log_level, "info");
    assert_eq!(cfg.general.log_format, "human");
    assert_eq!(cfg.pulse.day_start, hm(8, 0));
    assert_eq!(cfg.pulse.day_end, hm(20, 0));
    assert_eq!(cfg.pulse.poll_interval_secs, 900);
    assert_eq!(cfg.pulse.max_tasks_per_pulse, 10);
    assert_eq!(cfg.pulse.reflection_policy, ReflectionPolicy::Skip);
    assert_eq!(cfg.memory.recent_window, 10);
    assert_eq!(cfg.helpers.max_spawns_per_night, 1);
    assert_eq!(cfg.helpers.spawn_threshold, 3);
    assert_eq!(cfg.collaborators.retry_attempts, 3);
    assert!(cfg.perception.sources.is_empty());
    assert!(cfg.skills.is_empty());
    cfg.validate().expect("defaults validate");
}

#[test]
fn config_roundtrip() {
    let mut cfg = Config::default();
    cfg.pulse.day_start = hm(6, 30);
    cfg.pulse.reflection_policy = ReflectionPolicy::Supersede;
    let toml_str = cfg.to_toml().expect("serialize to toml");
    assert!(toml_str.contains("day_start = \"06:30\""));
    assert!(toml_str.contains("reflection_policy = \"supersede\""));

    let parsed: Config = toml::from_str(&toml_str).expect("parse toml back");
    assert_eq!(parsed.pulse.day_start, hm(6, 30));
    assert_eq!(parsed.pulse.reflection_policy, ReflectionPolicy::Supersede);
    parsed.validate().expect("config validates");
}

#[test]
fn config_partial_toml() {
    let partial = r#"
[general]
agent_id = "aurora"
agent_name = "Aurora"

[pulse]
day_start = "07:00"
day_end = "21:00"
max_tasks_per_pulse = 3

[[perception.sources]]
name = "news"
path = "/var/lib/feeds/news.json"

[skills.research]
command = "/usr/local/bin/research"
args = ["--brief"]
aliases = ["search", "lookup"]
"#;
    let cfg: Config = toml::from_str(partial).expect("parse partial");
    assert_eq!(cfg.general.agent_id, "aurora");
    assert_eq!(cfg.pulse.day_start, hm(7, 0));
    assert_eq!(cfg.pulse.max_tasks_per_pulse, 3);
    assert_eq!(cfg.perception.sources[0].name, "news");
    assert_eq!(cfg.skills["research"].aliases, vec!["search", "lookup"]);
    // defaults should fill in the rest
    assert_eq!(cfg.pulse.poll_interval_secs, 900);
    assert_eq!(cfg.backup.keep, 7);
    cfg.validate().expect("config validates");
}

#[test]
fn empty_day_window_fails_validation() {
    let mut cfg = Config::default();
    cfg.pulse.day_end = cfg.pulse.day_start;
    let err = cfg.validate().expect_err("validation should fail");
    assert!(err.to_string().contains("day_start"));
}

#[test]
fn night_window_must_complement_day_window() {
    let mut cfg = Config::default();
    cfg.pulse.night_start = Some(hm(20, 0));
    cfg.pulse.night_end = Some(hm(8, 0));
    cfg.validate().expect("exact complement is fine");

    cfg.pulse.night_start = Some(hm(22, 0));
    let err = cfg.validate().expect_err("gap between day and night");
    assert!(err.to_string().contains("complement"));

    cfg.pulse.night_end = None;
    let err = cfg.validate().expect_err("half a window");
    assert!(err.to_string().contains("together"));
}

#[test]
fn zero_budgets_fail_validation() {
    let mut cfg = Config::default();
    cfg.pulse.max_tasks_per_pulse = 0;
    assert!(cfg.validate().is_err());

    let mut cfg = Config::default();
    cfg.pulse.poll_interval_secs = 0;
    assert!(cfg.validate().is_err());

    let mut cfg = Config::default();
    cfg.memory.recent_window = 0;
    assert!(cfg.validate().is_err());

    let mut cfg = Config::default();
    cfg.collaborators.retry_attempts = 0;
    assert!(cfg.validate().is_err());
}

#[test]
fn malformed_time_is_a_parse_error() {
    let bad = "[pulse]\nday_start = \"8am\"\n";
    assert!(toml::from_str::<Config>(bad).is_err());
}

#[test]
fn load_from_reports_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::load_from(dir.path().join("absent.toml")).expect_err("missing file");
    assert!(err.to_string().starts_with("io:"));
}

#[test]
fn load_from_validates() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[general]\nagent_id = \"../escape\"\n").unwrap();
    let err = Config::load_from(&path).expect_err("bad agent id");
    assert!(err.to_string().contains("agent_id"));
}
