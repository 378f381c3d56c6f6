use ag_core::config::Config;
use ag_core::memory::MemoryFilter;
use ag_core::types::{MemoryCategory, MemoryEntry};
use anyhow::anyhow;
use chrono::{DateTime, NaiveDate, Utc};

use super::{clip, open_context, print_json};

pub struct QueryArgs {
    pub category: Option<MemoryCategory>,
    pub tags: Vec<String>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub limit: Option<usize>,
}

pub fn recent(config: &Config, count: usize, json: bool) -> anyhow::Result<()> {
    let ctx = open_context(config)?;
    print_entries(&ctx.memory.recent(count), json)
}

pub fn query(config: &Config, args: QueryArgs, json: bool) -> anyhow::Result<()> {
    let filter = build_filter(args)?;
    let ctx = open_context(config)?;
    print_entries(&ctx.memory.query(&filter), json)
}

fn build_filter(args: QueryArgs) -> anyhow::Result<MemoryFilter> {
    let mut filter = MemoryFilter::new();
    if let Some(category) = args.category {
        filter = filter.category(category);
    }
    for tag in args.tags {
        filter = filter.tag(tag);
    }
    if let Some(raw) = args.since.as_deref() {
        filter = filter.since(parse_instant(raw)?);
    }
    if let Some(raw) = args.until.as_deref() {
        filter = filter.until(parse_instant(raw)?);
    }
    if let Some(limit) = args.limit {
        filter = filter.limit(limit);
    }
    Ok(filter)
}

/// RFC 3339, or a bare date meaning midnight UTC.
fn parse_instant(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
        .ok_or_else(|| anyhow!("invalid date '{raw}': use YYYY-MM-DD or RFC 3339"))
}

fn print_entries(entries: &[MemoryEntry], json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(entries);
    }
    if entries.is_empty() {
        println!("No memory entries.");
        return Ok(());
    }
    for e in entries {
        let tags: Vec<&str> = e.tags.iter().map(String::as_str).collect();
        println!(
            "{}  {:<12} {}",
            e.timestamp.format("%Y-%m-%d %H:%M:%S"),
            e.category,
            clip(&e.summary(), 100)
        );
        if !tags.is_empty() {
            println!("{:>33}[{}]", "", tags.join(", "));
        }
    }
    Ok(())
}
