use ag_core::config::Config;
use ag_core::tasks::queue_order;
use ag_core::types::{parse_priority, NewTask, Task, TaskStatus};
use anyhow::anyhow;
use chrono::Utc;

use super::{clip, open_context, print_json};

pub fn add(
    config: &Config,
    description: &str,
    priority: Option<&str>,
    skill: Option<String>,
    tags: Vec<String>,
) -> anyhow::Result<()> {
    let id = enqueue(config, description, priority, skill, tags)?;
    println!("queued task #{id}");
    Ok(())
}

fn enqueue(
    config: &Config,
    description: &str,
    priority: Option<&str>,
    skill: Option<String>,
    tags: Vec<String>,
) -> anyhow::Result<u64> {
    let description = description.trim();
    if description.is_empty() {
        anyhow::bail!("task description must not be empty");
    }
    let mut task = NewTask::new(description);
    if let Some(raw) = priority {
        let priority = parse_priority(raw)
            .ok_or_else(|| anyhow!("invalid priority '{raw}': use high, medium, low or an integer"))?;
        task = task.priority(priority);
    }
    if let Some(skill) = skill {
        task = task.skill(skill);
    }
    for tag in tags {
        task = task.tag(tag);
    }

    let mut ctx = open_context(config)?;
    Ok(ctx.tasks.enqueue(task, Utc::now())?)
}

pub fn list(config: &Config, all: bool, json: bool) -> anyhow::Result<()> {
    let ctx = open_context(config)?;
    let tasks = select(ctx.tasks.list(), all);

    if json {
        return print_json(&tasks);
    }
    if tasks.is_empty() {
        println!("{}", if all { "No tasks." } else { "No pending tasks." });
        return Ok(());
    }
    println!("{:<6} {:<12} {:>4}  {:<12} DESCRIPTION", "ID", "STATUS", "PRI", "SKILL");
    for t in &tasks {
        println!(
            "{:<6} {:<12} {:>4}  {:<12} {}",
            format!("#{}", t.id),
            t.status,
            t.priority,
            clip(t.skill.as_deref().unwrap_or("-"), 12),
            clip(&t.description, 60)
        );
    }
    let counts = ctx.tasks.counts();
    println!(
        "\n{} pending, {} in progress, {} completed, {} failed",
        counts.pending, counts.in_progress, counts.completed, counts.failed
    );
    Ok(())
}

/// Pending tasks in execution order, or every task by id with `all`.
fn select(tasks: &[Task], all: bool) -> Vec<Task> {
    let mut out: Vec<Task> = tasks
        .iter()
        .filter(|t| all || t.status == TaskStatus::Pending)
        .cloned()
        .collect();
    if all {
        out.sort_by_key(|t| t.id);
    } else {
        out.sort_by(queue_order);
    }
    out
}
