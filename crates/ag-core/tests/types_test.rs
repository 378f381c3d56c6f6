use ag_core::types::*;
use chrono::{TimeZone, Utc};

#[test]
fn task_status_valid_transitions() {
    assert!(TaskStatus::Pending.can_transition_to(&TaskStatus::InProgress));
    assert!(TaskStatus::Pending.can_transition_to(&TaskStatus::Failed));
    assert!(TaskStatus::InProgress.can_transition_to(&TaskStatus::Completed));
    assert!(TaskStatus::InProgress.can_transition_to(&TaskStatus::Failed));
    assert!(TaskStatus::InProgress.can_transition_to(&TaskStatus::Pending));
}

#[test]
fn task_status_invalid_transitions() {
    assert!(!TaskStatus::Pending.can_transition_to(&TaskStatus::Completed));
    assert!(!TaskStatus::Pending.can_transition_to(&TaskStatus::Pending));
    assert!(!TaskStatus::Completed.can_transition_to(&TaskStatus::Failed));
    assert!(!TaskStatus::Failed.can_transition_to(&TaskStatus::Pending));
}

#[test]
fn status_and_phase_parse_from_cli_text() {
    assert_eq!("in-progress".parse::<TaskStatus>().unwrap(), TaskStatus::InProgress);
    assert_eq!("NIGHT".parse::<PulsePhase>().unwrap(), PulsePhase::Night);
    assert!("dusk".parse::<PulsePhase>().is_err());
    assert_eq!(
        "system-event".parse::<MemoryCategory>().unwrap(),
        MemoryCategory::SystemEvent
    );
}

#[test]
fn memory_entry_json_shape() {
    let at = Utc.with_ymd_and_hms(2024, 3, 1, 21, 0, 0).unwrap();
    let entry = MemoryEntry::new(
        MemoryCategory::SystemEvent,
        Payload::PulseEvent {
            phase: PulsePhase::Night,
            event: PulseEventKind::Started,
            detail: None,
        },
        at,
    )
    .with_tags(["pulse", "night"]);

    let json = serde_json::to_value(&entry).unwrap();
    assert_eq!(json["category"], "system_event");
    assert_eq!(json["content"]["kind"], "pulse_event");
    assert_eq!(json["content"]["phase"], "night");
    assert_eq!(json["tags"], serde_json::json!(["night", "pulse"]));

    let back: MemoryEntry = serde_json::from_value(json).unwrap();
    assert_eq!(back, entry);
    assert_eq!(back.summary(), "night pulse started");
}

#[test]
fn outcome_summary_mentions_result_or_error() {
    let at = Utc::now();
    let outcome = |to, result, error| {
        MemoryEntry::new(
            MemoryCategory::TaskOutcome,
            Payload::TaskOutcome(TaskOutcome {
                task_id: 4,
                revision: 2,
                from: TaskStatus::InProgress,
                to,
                description: "scan feeds".into(),
                skill: Some("research".into()),
                delegated_to: None,
                result,
                error,
            }),
            at,
        )
    };
    assert_eq!(
        outcome(TaskStatus::Completed, Some(TaskResult::new("3 leads")), None).summary(),
        "task #4 completed: 3 leads"
    );
    assert_eq!(
        outcome(TaskStatus::Failed, None, Some("timeout".into())).summary(),
        "task #4 failed: timeout"
    );
}

#[test]
fn completion_rate_of_empty_queue_is_zero() {
    assert_eq!(TaskCounts::default().completion_rate(), 0.0);
    let counts = TaskCounts {
        pending: 1,
        in_progress: 0,
        completed: 3,
        failed: 0,
    };
    assert!((counts.completion_rate() - 0.75).abs() < f64::EPSILON);
}
