use parking_lot::{Condvar, Mutex};

/// Why a waiter on [`ChainUpdateSignal`] woke up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakeup {
    ChainUpdate,
    Stop,
}

#[derive(Debug, Default)]
struct SignalState {
    generation: u64,
    stopped: bool,
}

/// Progress notification between the chain follower and callers waiting for
/// the wallet to reach a height.
///
/// Each pulse bumps a generation counter, so a pulse that lands between a
/// waiter's condition check and its wait is never lost. Stopping is sticky:
/// every current and future waiter returns [`Wakeup::Stop`].
#[derive(Debug, Default)]
pub struct ChainUpdateSignal {
    state: Mutex<SignalState>,
    cond: Condvar,
}

impl ChainUpdateSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pulse(&self) {
        let mut state = self.state.lock();
        state.generation = state.generation.wrapping_add(1);
        self.cond.notify_all();
    }

    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.stopped = true;
        self.cond.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Block until `done` returns true or the signal is stopped.
    ///
    /// `done` is evaluated without the signal's lock held and re-evaluated
    /// after every pulse.
    pub fn wait_until(&self, mut done: impl FnMut() -> bool) -> Wakeup {
        loop {
            let seen = {
                let state = self.state.lock();
                if state.stopped {
                    return Wakeup::Stop;
                }
                state.generation
            };
            if done() {
                return Wakeup::ChainUpdate;
            }
            let mut state = self.state.lock();
            while state.generation == seen && !state.stopped {
                self.cond.wait(&mut state);
            }
        }
    }
}
