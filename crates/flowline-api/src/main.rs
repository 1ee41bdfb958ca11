//! Flowline worker node and administration CLI.
//!
//! Binary name: `flowline`
//!
//! Parses CLI arguments, opens the instance store, then either runs a worker
//! node (`serve`) or performs a one-shot command.

mod cli;
mod demo;
mod state;

use clap::Parser;
use clap_complete::generate;
use flowline_observe::tracing_setup::{init_tracing, shutdown_tracing};
use flowline_types::query::{InstanceQuery, StatisticsFilter};

use cli::instance::{CreateArgs, UpdateArgs};
use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // A node logs its lifecycle by default; one-shot commands stay quiet.
    let serving = matches!(cli.command, Commands::Serve { .. });
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 if serving => "info",
        0 => "warn",
        1 => "info,flowline=debug",
        _ => "trace",
    };
    init_tracing(filter, cli.otel).map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "flowline", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init(&cli.config, cli.database_url.as_deref()).await?;
    let result = run(&state, cli.command, cli.json, cli.quiet).await;

    shutdown_tracing();
    result
}

async fn run(state: &AppState, command: Commands, json: bool, quiet: bool) -> anyhow::Result<()> {
    match command {
        Commands::Serve { group, threads } => cli::node::serve(state, group, threads, quiet).await,

        Commands::Create {
            workflow_type,
            business_key,
            external_id,
            state: start_state,
            variables,
            delay,
            sleep,
            group,
        } => {
            let args = CreateArgs {
                workflow_type,
                business_key,
                external_id,
                state: start_state,
                variables,
                delay_secs: delay,
                sleep,
                group,
            };
            cli::instance::create(state, args, json).await
        }

        Commands::Show { id, actions } => cli::instance::show(state, id, actions, json).await,

        Commands::Update {
            id,
            state: new_state,
            status,
            text,
            activate,
            sleep,
        } => {
            let args = UpdateArgs {
                state: new_state,
                status,
                text,
                activate,
                sleep,
            };
            cli::instance::update(state, id, args, json).await
        }

        Commands::Wakeup { id, states } => cli::instance::wakeup(state, id, states, json).await,

        Commands::List {
            types,
            states,
            statuses,
            business_key,
            limit,
        } => {
            let query = InstanceQuery {
                types,
                states,
                statuses,
                business_key,
                max_results: Some(limit),
                ..Default::default()
            };
            cli::instance::list(state, query, json).await
        }

        Commands::Stats {
            workflow_type,
            created_after,
            created_before,
            modified_after,
            modified_before,
        } => {
            let filter = StatisticsFilter {
                workflow_type,
                created_after,
                created_before,
                modified_after,
                modified_before,
            };
            cli::stats::stats(state, filter, json).await
        }

        Commands::Executors { group } => cli::stats::executors(state, group.as_deref(), json).await,

        Commands::Definitions => cli::stats::definitions(state, json).await,

        Commands::Completions { .. } => unreachable!("handled before state init"),
    }
}
