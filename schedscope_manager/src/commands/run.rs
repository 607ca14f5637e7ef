//! Run command - launch the scheduler and watch it live

use crate::display;
use anyhow::{bail, Context, Result};
use colored::*;
use schedscope_core::{
    reconstruct_metrics, reconstruct_timeline, LaunchConfig, LiveMessage, RunStatus,
    SchedulerSummary, ScopeConfig, Supervisor, Topic,
};
use std::path::PathBuf;

pub struct RunOptions {
    pub launch_file: PathBuf,
    /// Overrides `scheduler.binary`
    pub binary: Option<String>,
    pub quiet: bool,
}

pub fn run_scheduler(mut config: ScopeConfig, options: RunOptions) -> Result<()> {
    let launch = LaunchConfig::from_file(&options.launch_file)
        .with_context(|| format!("loading {}", options.launch_file.display()))?;
    if let Some(binary) = options.binary {
        config.scheduler.binary = binary;
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(watch_run(config, launch, options.quiet))
}

async fn watch_run(config: ScopeConfig, launch: LaunchConfig, quiet: bool) -> Result<()> {
    let supervisor = Supervisor::from_config(&config);

    // Subscribe before starting so the first events are not missed
    let mut subscription = supervisor.broadcaster().subscribe(Topic::All);
    let run_id = supervisor.start(launch).await?;

    println!(
        "{} run {} ({})",
        "Started".green().bold(),
        run_id.to_string().bright_blue(),
        config.scheduler.binary
    );

    loop {
        tokio::select! {
            message = subscription.recv() => match message {
                Ok(LiveMessage::Event(event)) if event.run_id == run_id => {
                    if !quiet {
                        println!("{}", display::render_event(&event));
                    }
                }
                Ok(LiveMessage::Stderr { run_id: id, line }) if id == run_id => {
                    eprintln!("  {} {}", "stderr".red().dimmed(), line);
                }
                Ok(LiveMessage::RunFinished { run_id: id, .. })
                | Ok(LiveMessage::RunKilled { run_id: id }) if id == run_id => break,
                Ok(_) => {}
                Err(reason) => {
                    // Fell behind; the log still has everything
                    tracing::warn!("Live output interrupted: {}", reason);
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                println!("\n{} stopping run...", "Ctrl+C".bright_red());
                supervisor.stop(run_id).await?;
            }
        }
    }

    let run = supervisor.wait(run_id).await?;
    let events = supervisor.log().read(run_id, 0)?;
    let timeline = reconstruct_timeline(&events);
    let metrics = reconstruct_metrics(&events);

    println!("\n{}", "Timeline".cyan().bold());
    println!("{}", display::render_gantt(&timeline));
    println!("\n{}", "Metrics".cyan().bold());
    println!("{}", display::render_metrics(&metrics));

    if let Some(summary) = run.summary.as_ref().and_then(SchedulerSummary::from_event) {
        println!(
            "\n  {} {} reported avg turnaround {:.2}, waiting {:.2}",
            "Scheduler".dimmed(),
            summary.algorithm.unwrap_or_else(|| run.algorithm.clone()),
            summary.averages.turnaround_time,
            summary.averages.waiting_time
        );
    }

    println!(
        "\n{} {} after {} events. Replay with: schedscope replay {}",
        "Run".bold(),
        display::render_status(run.status),
        run.event_count,
        run_id
    );

    if run.status == RunStatus::Error {
        bail!("scheduler exited with code {:?}", run.exit_code);
    }
    Ok(())
}
