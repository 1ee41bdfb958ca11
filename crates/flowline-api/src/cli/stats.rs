//! Read-only views: per-state statistics, executors, definitions.

use anyhow::Result;
use comfy_table::{Cell, CellAlignment, Color, ContentArrangement, Table, presets};
use console::style;
use flowline_types::query::StatisticsFilter;

use super::instance::format_time;
use crate::state::AppState;

pub async fn stats(state: &AppState, filter: StatisticsFilter, json: bool) -> Result<()> {
    let stats = state.instance_service.statistics(&filter).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    if stats.is_empty() {
        println!();
        println!(
            "  {} No instances of {}",
            style("i").blue().bold(),
            style(&filter.workflow_type).cyan()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("State").fg(Color::White),
        Cell::new("Executing").fg(Color::White),
        Cell::new("Queued").fg(Color::White),
        Cell::new("Sleeping").fg(Color::White),
        Cell::new("Not Scheduled").fg(Color::White),
        Cell::new("Total").fg(Color::White),
    ]);

    let count = |n: u64| Cell::new(n).set_alignment(CellAlignment::Right);
    for (name, s) in &stats {
        table.add_row(vec![
            Cell::new(name).fg(Color::Cyan),
            count(s.executing),
            count(s.queued),
            count(s.sleeping),
            count(s.non_scheduled),
            count(s.total()).fg(Color::White),
        ]);
    }

    println!();
    println!("  {}", style(&filter.workflow_type).cyan().bold());
    println!("{table}");
    println!();
    Ok(())
}

pub async fn executors(state: &AppState, group: Option<&str>, json: bool) -> Result<()> {
    let executors = state.instance_service.executors(group).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&executors)?);
        return Ok(());
    }

    if executors.is_empty() {
        println!();
        println!(
            "  {} No executors registered. Start one with: {}",
            style("i").blue().bold(),
            style("flowline serve").yellow()
        );
        println!();
        return Ok(());
    }

    let now = state.instance_service.now();
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Id").fg(Color::White),
        Cell::new("Group").fg(Color::White),
        Cell::new("Host").fg(Color::White),
        Cell::new("Pid").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Last Heartbeat").fg(Color::White),
        Cell::new("Expires").fg(Color::White),
    ]);

    for executor in &executors {
        let status = if executor.stopped.is_some() {
            Cell::new("○ stopped").fg(Color::DarkGrey)
        } else if executor.is_alive(now) {
            Cell::new("● alive").fg(Color::Green)
        } else {
            Cell::new("✗ dead").fg(Color::Red)
        };
        table.add_row(vec![
            Cell::new(executor.id).fg(Color::Cyan),
            Cell::new(&executor.executor_group),
            Cell::new(&executor.host),
            Cell::new(executor.pid),
            status,
            Cell::new(format_time(Some(executor.active))).fg(Color::DarkGrey),
            Cell::new(format_time(Some(executor.expires))).fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

pub async fn definitions(state: &AppState, json: bool) -> Result<()> {
    let definitions = state.instance_service.definitions();

    if json {
        println!("{}", serde_json::to_string_pretty(&definitions)?);
        return Ok(());
    }

    for definition in &definitions {
        println!();
        println!(
            "  {} {}",
            style(&definition.workflow_type).cyan().bold(),
            style(&definition.description).dim()
        );

        let mut table = Table::new();
        table.load_preset(presets::UTF8_FULL_CONDENSED);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec![
            Cell::new("State").fg(Color::White),
            Cell::new("Kind").fg(Color::White),
            Cell::new("Description").fg(Color::White),
        ]);
        for s in &definition.states {
            let name = if s.name == definition.initial_state {
                Cell::new(format!("{} (initial)", s.name)).fg(Color::Green)
            } else {
                Cell::new(&s.name)
            };
            table.add_row(vec![name, Cell::new(s.kind), Cell::new(&s.description)]);
        }
        println!("{table}");
    }
    println!();
    Ok(())
}
