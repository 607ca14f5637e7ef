//! Cursor over a run's events
//!
//! [`Playback`] is the state machine; it owns no timer and is driven by
//! [`PlaybackSession`], which ticks it while playing. At cursor `T` the
//! visible events are those with `tick <= T` plus every event without a
//! tick, and both reconstructors run over exactly that prefix. Replay
//! and live viewing therefore share one code path.

mod session;

pub use session::PlaybackSession;

use crate::error::{ScopeError, ScopeResult};
use crate::event::SchedulerEvent;
use crate::reconstruct::{reconstruct_metrics, reconstruct_timeline, MetricsReport, Timeline};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::time::Duration;

pub const DEFAULT_BASE_PERIOD: Duration = Duration::from_millis(1000);

/// Accepted range for the playback speed multiplier
pub const MIN_SPEED: f64 = 0.01;
pub const MAX_SPEED: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
    /// Reached the last tick with looping off
    Stopped,
}

/// Events visible with the cursor at `tick`
pub fn visible_at<E: Borrow<SchedulerEvent> + Clone>(events: &[E], tick: u64) -> Vec<E> {
    events
        .iter()
        .filter(|e| <E as Borrow<SchedulerEvent>>::borrow(*e).tick.map_or(true, |t| t <= tick))
        .cloned()
        .collect()
}

/// Largest tick in the sequence, 0 when none carry a tick
pub fn max_tick_of<E: Borrow<SchedulerEvent>>(events: &[E]) -> u64 {
    events.iter().filter_map(|e| e.borrow().tick).max().unwrap_or(0)
}

/// Reconstructed state at one cursor position
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaybackFrame {
    pub cursor: u64,
    pub max_tick: u64,
    pub state: Option<PlaybackState>,
    pub speed: f64,
    pub looping: bool,
    pub visible_events: usize,
    pub timeline: Timeline,
    pub metrics: MetricsReport,
}

#[derive(Debug, Clone)]
pub struct Playback {
    state: PlaybackState,
    cursor: u64,
    max_tick: u64,
    speed: f64,
    looping: bool,
    base_period: Duration,
}

impl Default for Playback {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_PERIOD)
    }
}

impl Playback {
    pub fn new(base_period: Duration) -> Self {
        Self {
            state: PlaybackState::Idle,
            cursor: 0,
            max_tick: 0,
            speed: 1.0,
            looping: false,
            base_period,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn max_tick(&self) -> u64 {
        self.max_tick
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    /// Interval between automatic advances: `base_period / speed`
    pub fn period(&self) -> Duration {
        Duration::try_from_secs_f64(self.base_period.as_secs_f64() / self.speed)
            .unwrap_or(Duration::MAX)
    }

    /// Start or resume. Playing from the end rewinds first.
    pub fn play(&mut self) {
        if self.state == PlaybackState::Playing {
            return;
        }
        if self.state == PlaybackState::Stopped && self.cursor >= self.max_tick {
            self.cursor = 0;
        }
        self.state = PlaybackState::Playing;
    }

    pub fn pause(&mut self) {
        if self.state == PlaybackState::Playing {
            self.state = PlaybackState::Paused;
        }
    }

    /// Back to idle with the cursor at 0
    pub fn stop(&mut self) {
        self.state = PlaybackState::Idle;
        self.cursor = 0;
    }

    pub fn step_forward(&mut self) -> u64 {
        self.cursor = (self.cursor + 1).min(self.max_tick);
        self.cursor
    }

    pub fn step_backward(&mut self) -> u64 {
        self.cursor = self.cursor.saturating_sub(1);
        self.cursor
    }

    pub fn seek(&mut self, tick: u64) -> u64 {
        self.cursor = tick.min(self.max_tick);
        self.cursor
    }

    pub fn set_speed(&mut self, multiplier: f64) -> ScopeResult<()> {
        if !(MIN_SPEED..=MAX_SPEED).contains(&multiplier) {
            return Err(ScopeError::invalid_input(format!(
                "playback speed must be between {} and {}, got {}",
                MIN_SPEED, MAX_SPEED, multiplier
            )));
        }
        self.speed = multiplier;
        Ok(())
    }

    pub fn toggle_loop(&mut self) -> bool {
        self.looping = !self.looping;
        self.looping
    }

    /// Timer step while playing.
    ///
    /// Moves one tick forward. At the end it stops, or with looping on
    /// wraps to 0 on the following step.
    pub fn advance(&mut self) {
        if self.state != PlaybackState::Playing {
            return;
        }
        if self.cursor >= self.max_tick {
            if self.looping {
                self.cursor = 0;
            } else {
                self.state = PlaybackState::Stopped;
            }
            return;
        }
        self.cursor += 1;
        if self.cursor >= self.max_tick && !self.looping {
            self.state = PlaybackState::Stopped;
        }
    }

    /// Adopt a new last tick. A cursor sitting at the old tip follows.
    pub fn set_max_tick(&mut self, max_tick: u64) {
        let at_tip = self.cursor >= self.max_tick;
        self.max_tick = max_tick;
        if at_tip || self.cursor > max_tick {
            self.cursor = max_tick;
        }
    }

    /// Reconstruct timeline and metrics at the cursor
    pub fn frame<E: Borrow<SchedulerEvent> + Clone>(&self, events: &[E]) -> PlaybackFrame {
        let visible = visible_at(events, self.cursor);
        PlaybackFrame {
            cursor: self.cursor,
            max_tick: self.max_tick,
            state: Some(self.state),
            speed: self.speed,
            looping: self.looping,
            visible_events: visible.len(),
            timeline: reconstruct_timeline(&visible),
            metrics: reconstruct_metrics(&visible),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    fn playback(max_tick: u64) -> Playback {
        let mut p = Playback::default();
        p.set_max_tick(max_tick);
        p.seek(0);
        p
    }

    #[test]
    fn test_transitions() {
        let mut p = playback(3);
        assert_eq!(p.state(), PlaybackState::Idle);
        p.pause();
        assert_eq!(p.state(), PlaybackState::Idle);

        p.play();
        p.play();
        assert_eq!(p.state(), PlaybackState::Playing);
        p.pause();
        assert_eq!(p.state(), PlaybackState::Paused);
        p.play();
        p.advance();
        p.advance();
        assert_eq!(p.cursor(), 2);

        p.stop();
        assert_eq!(p.state(), PlaybackState::Idle);
        assert_eq!(p.cursor(), 0);
    }

    #[test]
    fn test_reaching_end_without_loop_stops() {
        let mut p = playback(2);
        p.play();
        p.advance();
        p.advance();
        assert_eq!(p.cursor(), 2);
        assert_eq!(p.state(), PlaybackState::Stopped);
        p.advance();
        assert_eq!(p.cursor(), 2);

        // Playing again from the end rewinds
        p.play();
        assert_eq!(p.cursor(), 0);
        assert!(p.is_playing());
    }

    #[test]
    fn test_loop_wraps_to_start() {
        let mut p = playback(2);
        assert!(p.toggle_loop());
        p.play();
        p.advance();
        p.advance();
        assert_eq!(p.cursor(), 2);
        assert!(p.is_playing());
        p.advance();
        assert_eq!(p.cursor(), 0);
        assert!(p.is_playing());
    }

    #[test]
    fn test_step_and_seek_clamp() {
        let mut p = playback(5);
        assert_eq!(p.step_backward(), 0);
        assert_eq!(p.seek(42), 5);
        assert_eq!(p.step_forward(), 5);
        assert_eq!(p.step_backward(), 4);
        assert_eq!(p.seek(1), 1);
    }

    #[test]
    fn test_speed_and_period() {
        let mut p = Playback::new(Duration::from_millis(1000));
        p.set_speed(4.0).unwrap();
        assert_eq!(p.period(), Duration::from_millis(250));
        assert!(p.set_speed(0.0).unwrap_err().is_invalid_input());
        assert!(p.set_speed(f64::NAN).is_err());
        assert_eq!(p.speed(), 4.0);
    }

    #[test]
    fn test_speed_bounds_keep_period_finite() {
        let mut p = Playback::new(Duration::from_millis(1000));
        assert!(p.set_speed(1e-30).unwrap_err().is_invalid_input());
        assert!(p.set_speed(1e30).is_err());
        assert!(p.set_speed(f64::INFINITY).is_err());
        assert_eq!(p.speed(), 1.0);

        p.set_speed(MIN_SPEED).unwrap();
        assert_eq!(p.period(), Duration::from_secs(100));
        p.set_speed(MAX_SPEED).unwrap();
        assert_eq!(p.period(), Duration::from_millis(1));

        let slow = Playback::new(Duration::MAX);
        assert_eq!(slow.period(), Duration::MAX);
    }

    #[test]
    fn test_cursor_at_tip_follows_growth() {
        let mut p = playback(3);
        p.seek(3);
        p.set_max_tick(5);
        assert_eq!(p.cursor(), 5);

        p.seek(2);
        p.set_max_tick(8);
        assert_eq!(p.cursor(), 2);
    }

    #[test]
    fn test_visible_at() {
        let events = vec![
            SchedulerEvent::new(EventKind::JobStarted).at(0).with_pid(1),
            SchedulerEvent::raw("banner"),
            SchedulerEvent::new(EventKind::JobFinished).at(4).with_pid(1),
        ];
        assert_eq!(visible_at(&events, 0).len(), 2);
        assert_eq!(visible_at(&events, 4).len(), 3);
        assert_eq!(max_tick_of(&events), 4);
    }

    #[test]
    fn test_seek_matches_truncated_reconstruction() {
        let events = vec![
            SchedulerEvent::new(EventKind::JobStarted).at(0).with_pid(1),
            SchedulerEvent::new(EventKind::JobPreempted).at(3).with_pid(1),
            SchedulerEvent::new(EventKind::JobStarted).at(3).with_pid(2),
            SchedulerEvent::new(EventKind::JobFinished).at(5).with_pid(2),
            SchedulerEvent::new(EventKind::JobResumed).at(5).with_pid(1),
            SchedulerEvent::new(EventKind::JobFinished).at(7).with_pid(1),
        ];
        let mut p = Playback::default();
        p.set_max_tick(max_tick_of(&events));

        for t in 0..=7 {
            p.seek(t);
            let frame = p.frame(&events);
            let truncated: Vec<SchedulerEvent> = events
                .iter()
                .filter(|e| e.tick.map_or(true, |tick| tick <= t))
                .cloned()
                .collect();
            assert_eq!(frame.timeline, reconstruct_timeline(&truncated));
            assert_eq!(frame.metrics, reconstruct_metrics(&truncated));
        }

        // Process 2 has started but no later tick is visible yet
        p.seek(4);
        let frame = p.frame(&events);
        assert_eq!(frame.visible_events, 3);
        assert_eq!(frame.timeline.segments.len(), 1);
        assert_eq!(frame.metrics.get(2).unwrap().start_time, Some(3));
        assert_eq!(frame.metrics.get(2).unwrap().finish_time, None);
    }
}
