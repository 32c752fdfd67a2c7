// SPDX-License-Identifier: MIT OR Apache-2.0
//! Coalescing of bursty recompute triggers into single delayed firings.
//!
//! Expensive nodes (GPU filter passes) are not recomputed synchronously.
//! Each trigger cancels and restarts a per-node single-shot timer; only a
//! timer that survives the quiescence window undisturbed delivers its node
//! id, so a burst of edits collapses onto one recompute reflecting the
//! latest state. Expirations are handed over a channel and observed by
//! polling from the thread that owns the graph (the GPU-context thread).

use crate::node::NodeId;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

#[derive(Default)]
struct State {
    deadlines: HashMap<NodeId, Instant>,
    shutdown: bool,
}

struct Shared {
    state: Mutex<State>,
    wake: Condvar,
}

/// Cancel-and-restart debounce timer for node recomputes.
pub struct Debouncer {
    shared: Arc<Shared>,
    fired: Receiver<NodeId>,
    window: Duration,
    worker: Option<JoinHandle<()>>,
}

impl Debouncer {
    /// Default quiescence window.
    pub const DEFAULT_WINDOW: Duration = Duration::from_millis(100);

    /// Create a debouncer with the given quiescence window.
    pub fn new(window: Duration) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::default()),
            wake: Condvar::new(),
        });
        let (tx, rx) = channel();
        let worker = {
            let shared = Arc::clone(&shared);
            std::thread::spawn(move || run_worker(&shared, &tx))
        };
        Self {
            shared,
            fired: rx,
            window,
            worker: Some(worker),
        }
    }

    /// Schedule (or reschedule) a node. A pending timer for the same node
    /// is superseded: last write wins.
    pub fn trigger(&self, id: NodeId) {
        let mut state = self.shared.state.lock();
        state.deadlines.insert(id, Instant::now() + self.window);
        self.shared.wake.notify_one();
    }

    /// Drop any pending timer for a node.
    pub fn cancel(&self, id: NodeId) {
        self.shared.state.lock().deadlines.remove(&id);
    }

    /// Number of timers still pending.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().deadlines.len()
    }

    /// Drain every node whose window has elapsed undisturbed.
    pub fn expired(&self) -> Vec<NodeId> {
        self.fired.try_iter().collect()
    }
}

fn run_worker(shared: &Shared, tx: &Sender<NodeId>) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            return;
        }
        let now = Instant::now();
        let mut due: Vec<NodeId> = state
            .deadlines
            .iter()
            .filter(|(_, when)| **when <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in &due {
            state.deadlines.remove(id);
        }
        due.sort_by_key(|id| id.0);
        for id in due {
            // Receiver outlives the worker; a send only fails at teardown.
            if tx.send(id).is_err() {
                return;
            }
        }

        match state.deadlines.values().min().copied() {
            Some(earliest) => {
                let _ = shared.wake.wait_until(&mut state, earliest);
            }
            None => shared.wake.wait(&mut state),
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.shared.state.lock().shutdown = true;
        self.shared.wake.notify_one();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
