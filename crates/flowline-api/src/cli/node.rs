//! `flowline serve`: run a worker node in the foreground.

use std::sync::Arc;

use anyhow::Result;
use console::style;
use flowline_core::engine::node::Engine;

use crate::state::AppState;

pub async fn serve(state: &AppState, group: Option<String>, threads: Option<usize>, quiet: bool) -> Result<()> {
    let mut config = state.config.clone();
    if let Some(group) = group {
        config.executor.group = group;
    }
    if let Some(threads) = threads {
        config.executor.thread_count = threads;
    }
    let group = config.executor.group.clone();
    let threads = config.executor.thread_count;

    let engine = Engine::new(
        Arc::clone(&state.instances),
        Arc::clone(&state.executors),
        Arc::clone(&state.definitions),
        Arc::clone(&state.registry),
        config,
    );
    let handle = engine.start().await?;

    if !quiet {
        println!();
        println!(
            "  {} Executor {} running in group {} with {} threads",
            style("⚡").bold(),
            style(handle.executor_id()).cyan().bold(),
            style(&group).cyan(),
            threads
        );
        println!(
            "  {} {}",
            style("Workflow types:").dim(),
            state.registry.types().join(", ")
        );
        println!("  {}", style("Press Ctrl+C to stop").dim());
        println!();
    }

    shutdown_signal().await;

    if !quiet {
        println!("  Stopping, waiting for running instances...");
    }
    handle.shutdown().await;
    state.db_pool.close().await;

    if !quiet {
        println!("  {} Node stopped.", style("✓").green().bold());
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
