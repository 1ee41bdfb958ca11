//! Instance commands: create, show, update, wakeup, list.

use anyhow::{Result, bail};
use chrono::{DateTime, Duration, Utc};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use flowline_core::service::instance::{NewInstanceRequest, UpdateInstanceRequest};
use flowline_types::instance::{WorkflowInstance, WorkflowInstanceStatus};
use flowline_types::query::{InstanceIncludes, InstanceQuery};

use crate::state::AppState;

/// Options of `flowline create`.
pub struct CreateArgs {
    pub workflow_type: String,
    pub business_key: Option<String>,
    pub external_id: Option<String>,
    pub state: Option<String>,
    pub variables: Vec<(String, String)>,
    pub delay_secs: Option<u64>,
    pub sleep: bool,
    pub group: Option<String>,
}

pub async fn create(state: &AppState, args: CreateArgs, json: bool) -> Result<()> {
    let service = &state.instance_service;
    let next_activation = args
        .delay_secs
        .map(|secs| service.now() + Duration::seconds(secs as i64));

    let request = NewInstanceRequest {
        workflow_type: args.workflow_type,
        business_key: args.business_key,
        external_id: args.external_id,
        start_state: args.state,
        executor_group: args.group,
        next_activation,
        sleep: args.sleep,
        state_variables: args.variables.into_iter().collect(),
    };
    let id = service.create(request).await?;
    let instance = service.get(id, InstanceIncludes::variables()).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&instance)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Created instance {} of {}",
        style("✓").green().bold(),
        style(instance.id).cyan().bold(),
        style(&instance.workflow_type).cyan()
    );
    println!("  {} {}", style("State:").bold(), instance.state);
    println!(
        "  {} {}",
        style("Next activation:").bold(),
        format_time(instance.next_activation)
    );
    println!("  {} {}", style("External id:").bold(), style(&instance.external_id).dim());
    println!();
    Ok(())
}

pub async fn show(state: &AppState, id: i64, actions: bool, json: bool) -> Result<()> {
    let includes = if actions {
        InstanceIncludes::all()
    } else {
        InstanceIncludes::variables()
    };
    let instance = state.instance_service.get(id, includes).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&instance)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} {} {}",
        style(&instance.workflow_type).cyan().bold(),
        style(format!("#{}", instance.id)).bold(),
        status_label(instance.status)
    );
    if let Some(text) = &instance.state_text {
        println!("  {}", style(text).dim());
    }
    println!();
    println!("  {}", style("── Details ──").dim());
    println!("  {} {}", style("State:").bold(), instance.state);
    println!("  {} {}", style("Retries:").bold(), instance.retries);
    println!(
        "  {} {}",
        style("Business key:").bold(),
        instance.business_key.as_deref().unwrap_or("-")
    );
    println!("  {} {}", style("External id:").bold(), instance.external_id);
    println!("  {} {}", style("Group:").bold(), instance.executor_group);
    println!(
        "  {} {}",
        style("Executor:").bold(),
        instance
            .executor_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    println!(
        "  {} {}",
        style("Next activation:").bold(),
        format_time(instance.next_activation)
    );
    println!("  {} {}", style("Created:").bold(), format_time(Some(instance.created)));
    println!("  {} {}", style("Modified:").bold(), format_time(Some(instance.modified)));

    if !instance.state_variables.is_empty() {
        println!();
        println!("  {}", style("── Variables ──").dim());
        for (key, value) in &instance.state_variables {
            println!("  {} {}", style(format!("{key}:")).bold(), value);
        }
    }

    if actions {
        println!();
        println!("  {}", style("── History ──").dim());
        print_actions(&instance);
    }
    println!();
    Ok(())
}

fn print_actions(instance: &WorkflowInstance) {
    if instance.actions.is_empty() {
        println!("  {}", style("(no actions)").dim());
        return;
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Action").fg(Color::White),
        Cell::new("Type").fg(Color::White),
        Cell::new("State").fg(Color::White),
        Cell::new("Retry").fg(Color::White),
        Cell::new("Executor").fg(Color::White),
        Cell::new("Ended").fg(Color::White),
        Cell::new("Text").fg(Color::White),
    ]);

    for action in &instance.actions {
        table.add_row(vec![
            Cell::new(action.id).fg(Color::DarkGrey),
            Cell::new(action.action_type.as_str()),
            Cell::new(&action.state).fg(Color::Cyan),
            Cell::new(action.retry_no),
            Cell::new(
                action
                    .executor_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Cell::new(format_time(Some(action.execution_end))).fg(Color::DarkGrey),
            Cell::new(action.state_text.as_deref().unwrap_or("")),
        ]);
    }
    println!("{table}");
}

/// Options of `flowline update`.
pub struct UpdateArgs {
    pub state: Option<String>,
    pub status: Option<WorkflowInstanceStatus>,
    pub text: Option<String>,
    pub activate: bool,
    pub sleep: bool,
}

pub async fn update(state: &AppState, id: i64, args: UpdateArgs, json: bool) -> Result<()> {
    let service = &state.instance_service;
    let next_activation = match (args.activate, args.sleep) {
        (true, _) => Some(Some(service.now())),
        (false, true) => Some(None),
        (false, false) => None,
    };
    let request = UpdateInstanceRequest {
        state: args.state,
        status: args.status,
        next_activation,
        state_text: args.text,
    };

    let applied = service.update(id, request).await?;

    if json {
        println!("{}", serde_json::json!({ "id": id, "updated": applied }));
        return Ok(());
    }
    if !applied {
        bail!("instance {id} is currently executing; try again when it is released");
    }
    println!();
    println!("  {} Updated instance {}", style("✓").green().bold(), style(id).cyan().bold());
    println!();
    Ok(())
}

pub async fn wakeup(state: &AppState, id: i64, states: Vec<String>, json: bool) -> Result<()> {
    let woken = state.instance_service.wakeup(id, &states).await?;

    if json {
        println!("{}", serde_json::json!({ "id": id, "woken": woken }));
        return Ok(());
    }

    println!();
    if woken {
        println!("  {} Instance {} scheduled now", style("✓").green().bold(), style(id).cyan().bold());
    } else {
        println!(
            "  {} Instance {} not woken (executing, finished or in another state)",
            style("i").blue().bold(),
            style(id).cyan().bold()
        );
    }
    println!();
    Ok(())
}

pub async fn list(state: &AppState, query: InstanceQuery, json: bool) -> Result<()> {
    let instances = state.instance_service.query(&query).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&instances)?);
        return Ok(());
    }

    if instances.is_empty() {
        println!();
        println!(
            "  {} No instances found. Create one with: {}",
            style("i").blue().bold(),
            style("flowline create <type>").yellow()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Id").fg(Color::White),
        Cell::new("Type").fg(Color::White),
        Cell::new("State").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Retries").fg(Color::White),
        Cell::new("Next Activation").fg(Color::White),
        Cell::new("Business Key").fg(Color::White),
    ]);

    for instance in &instances {
        table.add_row(vec![
            Cell::new(instance.id).fg(Color::Cyan),
            Cell::new(&instance.workflow_type),
            Cell::new(&instance.state),
            status_cell(instance.status),
            Cell::new(instance.retries),
            Cell::new(format_time(instance.next_activation)).fg(Color::DarkGrey),
            Cell::new(instance.business_key.as_deref().unwrap_or("-")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    println!(
        "  {} instance{}",
        style(instances.len()).bold(),
        if instances.len() == 1 { "" } else { "s" }
    );
    println!();
    Ok(())
}

fn status_cell(status: WorkflowInstanceStatus) -> Cell {
    let color = match status {
        WorkflowInstanceStatus::Created | WorkflowInstanceStatus::InProgress => Color::White,
        WorkflowInstanceStatus::Executing => Color::Cyan,
        WorkflowInstanceStatus::Manual => Color::Yellow,
        WorkflowInstanceStatus::Finished => Color::Green,
        WorkflowInstanceStatus::Stopped => Color::DarkGrey,
    };
    Cell::new(status.as_str()).fg(color)
}

fn status_label(status: WorkflowInstanceStatus) -> String {
    let label = status.as_str();
    match status {
        WorkflowInstanceStatus::Finished => style(label).green().to_string(),
        WorkflowInstanceStatus::Manual => style(label).yellow().to_string(),
        WorkflowInstanceStatus::Executing => style(label).cyan().to_string(),
        _ => style(label).dim().to_string(),
    }
}

/// `-` for unset times.
pub(crate) fn format_time(time: Option<DateTime<Utc>>) -> String {
    match time {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "-".to_string(),
    }
}
