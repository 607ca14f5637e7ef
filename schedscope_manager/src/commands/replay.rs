//! Replay command - scrub or animate a stored run, export reports

use super::parse_run_id;
use crate::display;
use anyhow::{Context, Result};
use colored::*;
use schedscope_core::playback::visible_at;
use schedscope_core::{
    export_report, reconstruct_metrics, reconstruct_timeline, PlaybackFrame, PlaybackSession,
    PlaybackState, ReportFormat, ScopeConfig, Supervisor,
};
use std::path::PathBuf;

pub struct ReplayOptions {
    pub run_id: String,
    /// Cursor position; defaults to the end of the run
    pub tick: Option<u64>,
    /// Animate from the start instead of printing one frame
    pub play: bool,
    pub speed: Option<f64>,
    pub export: Option<ReportFormat>,
    pub output: Option<PathBuf>,
}

pub fn run_replay(config: ScopeConfig, options: ReplayOptions) -> Result<()> {
    let run_id = parse_run_id(&options.run_id)?;
    let supervisor = Supervisor::from_config(&config);
    let run = supervisor.find(run_id)?;
    supervisor
        .ensure_loaded(run_id)
        .with_context(|| format!("loading events of run {}", run_id))?;
    let events = supervisor.log().read(run_id, 0)?;

    if let Some(format) = options.export {
        let visible = match options.tick {
            Some(tick) => visible_at(&events, tick),
            None => events.clone(),
        };
        let timeline = reconstruct_timeline(&visible);
        let metrics = reconstruct_metrics(&visible);
        let report = export_report(&metrics, Some(&timeline), format)?;
        match &options.output {
            Some(path) => {
                std::fs::write(path, report)
                    .with_context(|| format!("writing {}", path.display()))?;
                println!("{} report to {}", "Wrote".green(), path.display());
            }
            None => print!("{}", report),
        }
        return Ok(());
    }

    println!(
        "{} {} ({}, {}, {} events)",
        "Replaying".cyan().bold(),
        run_id.to_string().bright_blue(),
        run.algorithm,
        display::render_status(run.status),
        events.len()
    );

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let session = PlaybackSession::new(events, config.playback.base_period());
        session.set_speed(options.speed.unwrap_or(config.playback.default_speed))?;

        if !options.play {
            session.seek(options.tick.unwrap_or(u64::MAX));
            print_frame(&session.frame());
            return Ok(());
        }

        let mut frames = session.frames();
        session.play();
        loop {
            let frame = frames.borrow_and_update().clone();
            print_frame(&frame);
            if frame.state != Some(PlaybackState::Playing) {
                break;
            }
            tokio::select! {
                changed = frames.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }
        session.close();
        Ok::<(), anyhow::Error>(())
    })
}

fn print_frame(frame: &PlaybackFrame) {
    println!(
        "\n{} {}/{}",
        "tick".bold(),
        frame.cursor,
        frame.max_tick
    );
    println!("{}", display::render_gantt(&frame.timeline));
    println!("{}", display::render_metrics(&frame.metrics));
}
