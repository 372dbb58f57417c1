use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Polling,
}

/// Owns a device's repeating timer and its single-flight state.
///
/// A tick that finds a poll still running is dropped rather than queued.
#[derive(Debug)]
pub struct PollController {
    state: PollState,
    timer: Option<JoinHandle<()>>,
}

impl Default for PollController {
    fn default() -> Self {
        Self {
            state: PollState::Idle,
            timer: None,
        }
    }
}

impl PollController {
    pub fn state(&self) -> PollState {
        self.state
    }

    /// Idle -> Polling. False if a poll is already in flight.
    pub fn begin(&mut self) -> bool {
        match self.state {
            PollState::Idle => {
                self.state = PollState::Polling;
                true
            }
            PollState::Polling => false,
        }
    }

    pub fn finish(&mut self) {
        self.state = PollState::Idle;
    }

    pub fn is_running(&self) -> bool {
        self.timer.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Starts calling `tick` every `period`, first call immediately.
    /// Returns false, and does nothing, when a timer is already running.
    pub fn start<F, Fut>(&mut self, period: Duration, mut tick: F) -> bool
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        if self.is_running() {
            return false;
        }

        self.timer = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                tokio::spawn(tick());
            }
        }));
        true
    }

    /// Cancels the timer. A poll already in flight is left to finish.
    pub fn stop(&mut self) -> bool {
        match self.timer.take() {
            Some(timer) => {
                timer.abort();
                true
            }
            None => false,
        }
    }
}

/// Marks the end of an in-flight poll when dropped, including on early return.
pub struct InFlight(Arc<Mutex<PollController>>);

impl InFlight {
    pub fn begin(controller: &Arc<Mutex<PollController>>) -> Option<Self> {
        let mut guard = controller.lock().unwrap_or_else(|e| e.into_inner());
        if guard.begin() {
            Some(Self(controller.clone()))
        } else {
            None
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).finish();
    }
}
