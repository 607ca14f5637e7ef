//! # schedscope core
//!
//! Captures the event stream of an external CPU scheduler simulator and
//! turns it into something a viewer can watch live or replay.
//!
//! - **Events**: normalization of whatever the scheduler prints into [`SchedulerEvent`]
//! - **Run log**: append-only per-run log with file-backed persistence
//! - **Live**: bounded fan-out of appended events to subscribers
//! - **Reconstruct**: Gantt timeline and per-process metrics from any prefix
//! - **Playback**: cursor, timer and frames for replay and live viewing
//! - **Supervisor**: launches the scheduler and feeds its output into the log
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use schedscope_core::{LaunchConfig, JobSpec, ScopeConfig, Supervisor, reconstruct_timeline};
//!
//! # async fn demo() -> schedscope_core::ScopeResult<()> {
//! let supervisor = Supervisor::from_config(&ScopeConfig::default());
//! let launch = LaunchConfig::new("rr")
//!     .with_quantum(2)
//!     .with_job(JobSpec::new(0, 5))
//!     .with_job(JobSpec::new(1, 3));
//!
//! let run_id = supervisor.start(launch).await?;
//! supervisor.wait(run_id).await?;
//!
//! let events = supervisor.log().read(run_id, 0)?;
//! let timeline = reconstruct_timeline(&events);
//! println!("{} segments", timeline.segments.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod live;
pub mod playback;
pub mod reconstruct;
pub mod runlog;
pub mod supervisor;

pub use config::ScopeConfig;
pub use error::{ScopeError, ScopeResult};
pub use event::{normalize, EventKind, Pid, RawEvent, RunId, SchedulerEvent};
pub use live::{Broadcaster, DisconnectReason, Envelope, LiveMessage, Subscription, Topic};
pub use playback::{Playback, PlaybackFrame, PlaybackSession, PlaybackState};
pub use reconstruct::{
    export_report, reconstruct_metrics, reconstruct_timeline, MetricsReport, ProcessMetrics,
    ReportFormat, SchedulerSummary, Segment, Timeline, TimelineStats,
};
pub use runlog::store::RunStore;
pub use runlog::{AppendListener, RunLog};
pub use supervisor::{FailureReason, JobSpec, LaunchConfig, Run, RunStatus, Supervisor};
