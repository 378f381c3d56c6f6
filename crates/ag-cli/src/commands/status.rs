use ag_core::config::Config;
use ag_core::context::AgentContext;
use ag_core::memory::MemoryFilter;
use ag_core::types::{MemoryCategory, PulsePhase};
use ag_daemon::phase::phase_at;
use chrono::{DateTime, Utc};

use super::open_context;

/// Run the `status` subcommand: phase, queue counts, helpers and the last reflection.
pub fn run(config: &Config) -> anyhow::Result<()> {
    let ctx = open_context(config)?;
    print!("{}", render(config, &ctx, Utc::now()));
    Ok(())
}

fn render(config: &Config, ctx: &AgentContext, now: DateTime<Utc>) -> String {
    let phase = phase_at(&config.pulse, now);
    let counts = ctx.tasks.counts();
    let last_reflection = ctx
        .memory
        .query(&MemoryFilter::new().category(MemoryCategory::Reflection).limit(1))
        .into_iter()
        .next();

    let mut out = String::new();
    out.push_str(&format!("{} ({})\n", config.general.agent_name, ctx.agent_id()));
    out.push_str(&format!("{}\n", "-".repeat(40)));
    out.push_str(&format!("Mission:        {}\n", config.general.mission));
    out.push_str(&format!(
        "Phase:          {} (day {}-{} UTC)\n",
        phase,
        config.pulse.day_start.format("%H:%M"),
        config.pulse.day_end.format("%H:%M")
    ));
    out.push_str(&format!("Tasks:          {}\n", counts.total()));
    out.push_str(&format!("  pending:      {}\n", counts.pending));
    out.push_str(&format!("  in progress:  {}\n", counts.in_progress));
    out.push_str(&format!("  completed:    {}\n", counts.completed));
    out.push_str(&format!("  failed:       {}\n", counts.failed));
    out.push_str(&format!("Helpers:        {}\n", ctx.helpers.len()));
    out.push_str(&format!("Memory entries: {}\n", ctx.memory.len()));
    if ctx.memory.skipped() > 0 {
        out.push_str(&format!("  unreadable:   {}\n", ctx.memory.skipped()));
    }
    match last_reflection.as_ref().and_then(|e| e.as_reflection()) {
        Some(r) => out.push_str(&format!(
            "Last reflection: {} (revision {}, {})\n",
            r.night,
            r.revision,
            r.perception.headline()
        )),
        None => out.push_str("Last reflection: none\n"),
    }
    if phase == PulsePhase::Day && counts.pending > 0 {
        out.push_str(&format!(
            "\n{} task(s) will run on the next day pulse.\n",
            counts.pending.min(config.pulse.max_tasks_per_pulse)
        ));
    }
    out
}
