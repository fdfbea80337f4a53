// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: FIFO of device-originated (async) messages with blocking consumption
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 7 unit tests
//!
//! ERROR CONDITIONS:
//!   - Error::NoEvent: non-blocking pop on an empty queue
//!   - Error::Timeout: timed pop expired with the queue still empty
//!   - Error::Cancelled: waiter interrupted, or the queue was closed by channel teardown

use std::collections::VecDeque;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::{Error, Result, Wait};

/// Snapshot of one unsolicited message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AsyncMsg {
    pub opcode: u32,
    pub payload: Vec<u8>,
}

#[derive(Default)]
struct QueueState {
    msgs: VecDeque<AsyncMsg>,
    /// Bumped by `interrupt()`; a waiter that sees it change gives up.
    interrupts: u64,
    closed: bool,
}

#[derive(Default)]
pub struct AsyncQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl AsyncQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.lock().msgs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends `msg` and wakes one waiter. Dropped silently once the queue is closed.
    pub fn push(&self, msg: AsyncMsg) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.msgs.push_back(msg);
        drop(state);
        self.ready.notify_one();
    }

    pub fn pop(&self, wait: Wait) -> Result<AsyncMsg> {
        let deadline = wait.timeout().map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        let epoch = state.interrupts;
        loop {
            if let Some(msg) = state.msgs.pop_front() {
                return Ok(msg);
            }
            if state.closed || state.interrupts != epoch {
                return Err(Error::Cancelled);
            }
            match (wait, deadline) {
                (Wait::NonBlocking, _) => return Err(Error::NoEvent),
                (_, Some(deadline)) => {
                    if self.ready.wait_until(&mut state, deadline).timed_out() {
                        return state.msgs.pop_front().ok_or(Error::Timeout);
                    }
                }
                _ => self.ready.wait(&mut state),
            }
        }
    }

    /// Cancels every waiter currently blocked in [`AsyncQueue::pop`]. Queued messages stay.
    /// Not latched: pops that start later are unaffected.
    pub fn interrupt(&self) {
        let mut state = self.state.lock();
        state.interrupts = state.interrupts.wrapping_add(1);
        drop(state);
        self.ready.notify_all();
    }

    /// Refuses further messages, wakes all waiters with `Cancelled`, and hands back what was
    /// still queued.
    pub fn close(&self) -> Vec<AsyncMsg> {
        let mut state = self.state.lock();
        state.closed = true;
        let pending = state.msgs.drain(..).collect();
        drop(state);
        self.ready.notify_all();
        pending
    }
}
