use ag_core::config::Config;
use ag_core::types::HelperAgent;
use chrono::Utc;

use super::{clip, open_context, print_json};

pub fn list(config: &Config, json: bool) -> anyhow::Result<()> {
    let ctx = open_context(config)?;
    let helpers = ctx.helpers.list();
    if json {
        return print_json(helpers);
    }
    if helpers.is_empty() {
        println!("No helpers yet.");
        return Ok(());
    }
    println!("{:<28} {:<16} {:>6}  {:<10} MISSION", "NAME", "SPECIALIZATION", "DONE", "CREATED");
    for h in helpers {
        println!(
            "{:<28} {:<16} {:>6}  {:<10} {}",
            clip(&h.name, 28),
            clip(&h.specialization, 16),
            h.tasks_completed,
            h.created_at.format("%Y-%m-%d"),
            clip(&h.mission, 60)
        );
    }
    Ok(())
}

pub fn spawn(config: &Config, specialization: &str, mission: Option<&str>) -> anyhow::Result<()> {
    let helper = spawn_helper(config, specialization, mission)?;
    println!("spawned {} ({})", helper.name, helper.id);
    Ok(())
}

fn spawn_helper(
    config: &Config,
    specialization: &str,
    mission: Option<&str>,
) -> anyhow::Result<HelperAgent> {
    let specialization = specialization.trim();
    if specialization.is_empty() {
        anyhow::bail!("specialization must not be empty");
    }
    let mut ctx = open_context(config)?;
    if let Some(existing) = ctx.helpers.find_by_specialization(specialization) {
        anyhow::bail!("{} already covers '{specialization}'", existing.name);
    }
    let mission = match mission {
        Some(m) => m.to_string(),
        None => format!(
            "Handle {specialization} tasks delegated by {}",
            config.general.agent_name
        ),
    };
    Ok(ctx.spawn_helper(specialization, &mission, Utc::now())?)
}
