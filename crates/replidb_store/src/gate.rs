//! Writer gate: many shared writers or one exclusive writer.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

#[derive(Debug, Default)]
struct GateState {
    writers: usize,
    exclusive: bool,
    exclusive_waiting: usize,
}

/// Admission control for write transactions.
///
/// Shared writers run concurrently. An exclusive writer waits for every
/// shared writer to leave and keeps new ones out until it is done. A waiting
/// exclusive writer takes precedence over new shared writers.
#[derive(Debug, Default)]
pub struct WriteGate {
    state: Mutex<GateState>,
    released: Condvar,
}

impl WriteGate {
    /// Creates an open gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enters as a shared writer, blocking while an exclusive writer is
    /// active or waiting.
    pub fn enter_shared(self: &Arc<Self>) -> GatePermit {
        let mut state = self.state.lock();
        while state.exclusive || state.exclusive_waiting > 0 {
            self.released.wait(&mut state);
        }
        state.writers += 1;
        GatePermit {
            gate: Arc::clone(self),
            exclusive: false,
        }
    }

    /// Enters as the exclusive writer, blocking until the gate is empty.
    pub fn enter_exclusive(self: &Arc<Self>) -> GatePermit {
        let mut state = self.state.lock();
        state.exclusive_waiting += 1;
        while state.exclusive || state.writers > 0 {
            self.released.wait(&mut state);
        }
        state.exclusive_waiting -= 1;
        state.exclusive = true;
        GatePermit {
            gate: Arc::clone(self),
            exclusive: true,
        }
    }

    /// Returns the number of shared writers inside the gate.
    pub fn shared_writers(&self) -> usize {
        self.state.lock().writers
    }

    /// Returns true if an exclusive writer holds the gate.
    pub fn is_exclusive(&self) -> bool {
        self.state.lock().exclusive
    }

    fn leave(&self, exclusive: bool) {
        let mut state = self.state.lock();
        if exclusive {
            state.exclusive = false;
        } else {
            state.writers -= 1;
        }
        drop(state);
        self.released.notify_all();
    }
}

/// Proof of admission through a [`WriteGate`]; leaves the gate on drop.
#[derive(Debug)]
pub struct GatePermit {
    gate: Arc<WriteGate>,
    exclusive: bool,
}

impl GatePermit {
    /// Returns true if this permit holds the gate exclusively.
    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.gate.leave(self.exclusive);
    }
}
