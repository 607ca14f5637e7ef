//! Timer-driven playback for one viewer

use super::{max_tick_of, Playback, PlaybackFrame};
use crate::error::ScopeResult;
use crate::event::{RunId, SchedulerEvent};
use crate::live::{LiveMessage, Subscription};
use crate::runlog::RunLog;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

struct State {
    playback: Playback,
    events: Vec<Arc<SchedulerEvent>>,
    timer: Option<JoinHandle<()>>,
    follower: Option<JoinHandle<()>>,
    /// Bumped whenever the timer is cancelled; stale timers see a mismatch
    generation: u64,
    closed: bool,
}

struct Inner {
    state: Mutex<State>,
    frames: watch::Sender<PlaybackFrame>,
}

impl Inner {
    fn publish(&self, state: &State) {
        self.frames.send_replace(state.playback.frame(&state.events));
    }

    fn push_events(&self, events: impl IntoIterator<Item = Arc<SchedulerEvent>>) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        let last = state.events.last().map_or(0, |e| e.sequence);
        state
            .events
            .extend(events.into_iter().filter(|e| e.sequence > last));
        let max_tick = max_tick_of(&state.events);
        state.playback.set_max_tick(max_tick);
        self.publish(&state);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        if let Some(follower) = state.follower.take() {
            follower.abort();
        }
    }
}

/// One viewing session: a [`Playback`] plus at most one timer task.
///
/// Every control call is idempotent. Stopping, pausing and closing
/// cancel the timer; after [`close`](Self::close) no frame is published.
/// Must be used inside a tokio runtime.
pub struct PlaybackSession {
    inner: Arc<Inner>,
}

impl PlaybackSession {
    pub fn new(events: Vec<Arc<SchedulerEvent>>, base_period: Duration) -> Self {
        let mut playback = Playback::new(base_period);
        playback.set_max_tick(max_tick_of(&events));
        playback.seek(0);

        let frame = playback.frame(&events);
        let (frames, _) = watch::channel(frame);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    playback,
                    events,
                    timer: None,
                    follower: None,
                    generation: 0,
                    closed: false,
                }),
                frames,
            }),
        }
    }

    /// Session over a snapshot of the run's log
    pub fn from_log(log: &RunLog, run_id: RunId, base_period: Duration) -> ScopeResult<Self> {
        Ok(Self::new(log.read(run_id, 0)?, base_period))
    }

    /// Frames published after every change
    pub fn frames(&self) -> watch::Receiver<PlaybackFrame> {
        self.inner.frames.subscribe()
    }

    pub fn frame(&self) -> PlaybackFrame {
        self.inner.frames.borrow().clone()
    }

    pub fn playback(&self) -> Playback {
        self.inner.state.lock().playback.clone()
    }

    pub fn play(&self) {
        self.control(|playback| playback.play());
    }

    pub fn pause(&self) {
        self.control(|playback| playback.pause());
    }

    pub fn stop(&self) {
        self.control(|playback| playback.stop());
    }

    pub fn step_forward(&self) -> u64 {
        self.control(|playback| playback.step_forward())
    }

    pub fn step_backward(&self) -> u64 {
        self.control(|playback| playback.step_backward())
    }

    pub fn seek(&self, tick: u64) -> u64 {
        self.control(|playback| playback.seek(tick))
    }

    pub fn toggle_loop(&self) -> bool {
        self.control(|playback| playback.toggle_loop())
    }

    pub fn set_speed(&self, multiplier: f64) -> ScopeResult<()> {
        self.control(|playback| playback.set_speed(multiplier))
    }

    /// Add newly appended events (live mode)
    pub fn push_events(&self, events: impl IntoIterator<Item = Arc<SchedulerEvent>>) {
        self.inner.push_events(events);
    }

    /// Feed events from a live subscription until it ends
    pub fn follow(&self, mut subscription: Subscription) {
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            while let Ok(message) = subscription.recv().await {
                let LiveMessage::Event(event) = message else {
                    continue;
                };
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.push_events(std::iter::once(event));
            }
        });

        let mut state = self.inner.state.lock();
        if state.closed {
            handle.abort();
            return;
        }
        if let Some(previous) = state.follower.replace(handle) {
            previous.abort();
        }
    }

    /// Cancel the timer and any live feed. No frames are published after.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        state.closed = true;
        cancel_timer(&mut state);
        if let Some(follower) = state.follower.take() {
            follower.abort();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Apply a control, then reconcile the timer and publish a frame
    fn control<R>(&self, f: impl FnOnce(&mut Playback) -> R) -> R {
        let mut state = self.inner.state.lock();
        if state.closed {
            return f(&mut state.playback.clone());
        }
        let was_period = state.playback.period();
        let result = f(&mut state.playback);

        if state.playback.is_playing() {
            if state.timer.is_none() || state.playback.period() != was_period {
                cancel_timer(&mut state);
                let generation = state.generation;
                let period = state.playback.period();
                state.timer = Some(spawn_timer(Arc::downgrade(&self.inner), generation, period));
            }
        } else {
            cancel_timer(&mut state);
        }

        self.inner.publish(&state);
        result
    }
}

fn cancel_timer(state: &mut State) {
    state.generation += 1;
    if let Some(timer) = state.timer.take() {
        timer.abort();
    }
}

fn spawn_timer(inner: Weak<Inner>, generation: u64, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(period).await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let mut state = inner.state.lock();
            if state.closed || state.generation != generation || !state.playback.is_playing() {
                return;
            }
            state.playback.advance();
            inner.publish(&state);
            if !state.playback.is_playing() {
                state.timer = None;
                return;
            }
        }
    })
}
