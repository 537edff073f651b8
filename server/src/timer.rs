//! Cancellable countdowns that pace the session
//!
//! A `Countdown` is the bare primitive: a lazy sequence of remaining seconds
//! that ends either because it ran out (`Finished`) or because its token was
//! cancelled (`Cancelled`). `TimerSet` owns the countdowns of one session,
//! at most one per `TimerKind`, and runs each of them as its own task.
//!
//! Timer tasks never touch session state. Every tick and the single final
//! outcome are sent back over the session's signal channel tagged with a
//! `TimerId`, so a countdown that was replaced in the meantime can be
//! recognised and ignored by the loop.

use log::{debug, warn};
use shared::TimerKind;
use std::collections::HashMap;
use std::future::Future;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{interval_at, Duration, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOutcome {
    Finished,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    Tick { remaining: u32 },
    Done(TimerOutcome),
}

/// What a timer task reports back to the session loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSignal {
    pub kind: TimerKind,
    pub id: TimerId,
    pub event: TimerEvent,
}

pub struct Countdown {
    remaining: u32,
    interval: Interval,
    token: CancellationToken,
    outcome: Option<TimerOutcome>,
}

impl Countdown {
    pub fn new(seconds: u32, token: CancellationToken) -> Self {
        // First tick one period from now, not immediately
        let mut interval = interval_at(Instant::now() + TICK, TICK);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            remaining: seconds,
            interval,
            token,
            outcome: None,
        }
    }

    /// Waits for the next second and returns the time left, or `None` once
    /// the countdown is over. The reason it ended is then in `outcome()`.
    pub async fn next_tick(&mut self) -> Option<u32> {
        if self.outcome.is_some() {
            return None;
        }
        if self.token.is_cancelled() {
            self.outcome = Some(TimerOutcome::Cancelled);
            return None;
        }
        if self.remaining == 0 {
            self.outcome = Some(TimerOutcome::Finished);
            return None;
        }

        tokio::select! {
            biased;
            _ = self.token.cancelled() => {
                self.outcome = Some(TimerOutcome::Cancelled);
                None
            }
            _ = self.interval.tick() => {
                self.remaining -= 1;
                Some(self.remaining)
            }
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn outcome(&self) -> Option<TimerOutcome> {
        self.outcome
    }
}

async fn run_countdown<S>(
    kind: TimerKind,
    id: TimerId,
    seconds: u32,
    token: CancellationToken,
    tx: mpsc::UnboundedSender<S>,
) where
    S: From<TimerSignal> + Send + 'static,
{
    let mut countdown = Countdown::new(seconds, token);

    while let Some(remaining) = countdown.next_tick().await {
        let signal = TimerSignal {
            kind,
            id,
            event: TimerEvent::Tick { remaining },
        };
        if tx.send(signal.into()).is_err() {
            // Loop is gone, nobody left to report to
            return;
        }
    }

    let outcome = countdown.outcome().unwrap_or(TimerOutcome::Cancelled);
    debug!("Timer {} ({:?}) done: {:?}", kind, id, outcome);
    let _ = tx.send(
        TimerSignal {
            kind,
            id,
            event: TimerEvent::Done(outcome),
        }
        .into(),
    );
}

#[derive(Debug)]
struct ActiveTimer {
    id: TimerId,
    duration: u32,
    remaining: u32,
    token: CancellationToken,
}

/// The countdowns and helper tasks owned by one session
pub struct TimerSet {
    active: HashMap<TimerKind, ActiveTimer>,
    next_id: u64,
    parent: CancellationToken,
    tasks: JoinSet<()>,
}

impl TimerSet {
    /// Every task spawned through this set is cancelled together with `parent`
    pub fn new(parent: CancellationToken) -> Self {
        Self {
            active: HashMap::new(),
            next_id: 1,
            parent,
            tasks: JoinSet::new(),
        }
    }

    /// Starts a countdown of `kind`, cancelling and replacing any running one
    pub fn start<S>(&mut self, kind: TimerKind, seconds: u32, tx: &mpsc::UnboundedSender<S>) -> TimerId
    where
        S: From<TimerSignal> + Send + 'static,
    {
        self.reap_finished();
        self.cancel(kind);

        let id = TimerId(self.next_id);
        self.next_id += 1;

        let token = self.parent.child_token();
        self.active.insert(
            kind,
            ActiveTimer {
                id,
                duration: seconds,
                remaining: seconds,
                token: token.clone(),
            },
        );
        self.tasks
            .spawn(run_countdown(kind, id, seconds, token, tx.clone()));

        debug!("Started timer {} ({:?}) for {}s", kind, id, seconds);
        id
    }

    /// Cancelling a timer that is not running is a no-op
    pub fn cancel(&mut self, kind: TimerKind) -> bool {
        match self.active.remove(&kind) {
            Some(timer) => {
                debug!("Cancelling timer {} ({:?})", kind, timer.id);
                timer.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self) {
        for (kind, timer) in self.active.drain() {
            debug!("Cancelling timer {} ({:?})", kind, timer.id);
            timer.token.cancel();
        }
    }

    /// True when `id` is the countdown currently registered for `kind`
    pub fn is_current(&self, kind: TimerKind, id: TimerId) -> bool {
        self.active.get(&kind).is_some_and(|timer| timer.id == id)
    }

    pub fn is_active(&self, kind: TimerKind) -> bool {
        self.active.contains_key(&kind)
    }

    /// Stores the latest remaining time. Returns false for stale timers.
    pub fn record_tick(&mut self, kind: TimerKind, id: TimerId, remaining: u32) -> bool {
        match self.active.get_mut(&kind) {
            Some(timer) if timer.id == id => {
                timer.remaining = remaining;
                true
            }
            _ => false,
        }
    }

    /// Unregisters a countdown that reported its outcome. Returns false for
    /// stale timers, which must not apply their effects.
    pub fn complete(&mut self, kind: TimerKind, id: TimerId) -> bool {
        if self.is_current(kind, id) {
            self.active.remove(&kind);
            true
        } else {
            false
        }
    }

    pub fn remaining(&self, kind: TimerKind) -> Option<u32> {
        self.active.get(&kind).map(|timer| timer.remaining)
    }

    pub fn duration(&self, kind: TimerKind) -> Option<u32> {
        self.active.get(&kind).map(|timer| timer.duration)
    }

    /// Token for helper tasks that must stop when the session does
    pub fn child_token(&self) -> CancellationToken {
        self.parent.child_token()
    }

    /// Runs a helper task (grace periods, start delay) alongside the timers
    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.reap_finished();
        self.tasks.spawn(task);
    }

    /// Cancels everything and waits for the tasks to wind down. Tasks still
    /// running after `timeout` are aborted. Returns true on a clean drain.
    pub async fn shutdown(&mut self, timeout: Duration) -> bool {
        self.cancel_all();
        self.parent.cancel();

        let drain = async {
            while self.tasks.join_next().await.is_some() {}
        };
        if tokio::time::timeout(timeout, drain).await.is_ok() {
            return true;
        }

        warn!(
            "Timer tasks did not stop within {:?}, aborting {} task(s)",
            timeout,
            self.tasks.len()
        );
        self.tasks.abort_all();
        false
    }

    fn reap_finished(&mut self) {
        while self.tasks.try_join_next().is_some() {}
    }
}
