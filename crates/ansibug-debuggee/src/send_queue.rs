use std::collections::VecDeque;
use std::time::Duration;

use ansibug_dap::ServerMessage;
use parking_lot::{Condvar, Mutex};
use tokio_util::sync::CancellationToken;

pub(crate) enum Next {
    Message(ServerMessage),
    /// The session is over: the reader hit EOF or the queue was deactivated.
    Closed,
    Cancelled,
}

#[derive(Default)]
struct QueueState {
    active: bool,
    closing: bool,
    in_flight: bool,
    pending: VecDeque<ServerMessage>,
}

/// FIFO of outbound messages for the current transport session.
///
/// Messages are only accepted while a session is active; everything else is
/// dropped on the floor.
#[derive(Default)]
pub(crate) struct SendQueue {
    state: Mutex<QueueState>,
    changed: Condvar,
}

impl SendQueue {
    pub(crate) fn activate(&self) {
        let mut state = self.state.lock();
        state.active = true;
        state.closing = false;
        state.in_flight = false;
        state.pending.clear();
    }

    /// Stop accepting messages and drop anything undelivered.
    ///
    /// Returns the number of dropped messages.
    pub(crate) fn deactivate(&self) -> usize {
        let mut state = self.state.lock();
        state.active = false;
        state.in_flight = false;
        let dropped = state.pending.len();
        state.pending.clear();
        self.changed.notify_all();
        dropped
    }

    pub(crate) fn is_active(&self) -> bool {
        self.state.lock().active
    }

    /// Returns `false` if the message was discarded.
    pub(crate) fn push(&self, message: ServerMessage) -> bool {
        let mut state = self.state.lock();
        if !state.active {
            tracing::debug!(
                target: "ansibug.debuggee",
                message = message.name(),
                "no active debug session; discarding message"
            );
            return false;
        }
        state.pending.push_back(message);
        self.changed.notify_all();
        true
    }

    /// Mark the session as closing. Messages already queued are still handed
    /// out before [`Next::Closed`].
    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        state.closing = true;
        self.changed.notify_all();
    }

    /// Block until there is something to write, the session closes, or
    /// `cancel` fires.
    pub(crate) fn next(&self, cancel: &CancellationToken) -> Next {
        let mut state = self.state.lock();
        loop {
            if cancel.is_cancelled() {
                return Next::Cancelled;
            }
            if let Some(message) = state.pending.pop_front() {
                state.in_flight = true;
                return Next::Message(message);
            }
            if state.closing || !state.active {
                return Next::Closed;
            }
            self.changed.wait(&mut state);
        }
    }

    /// Called by the writer once the message returned by [`Self::next`] has
    /// been written (or failed to).
    pub(crate) fn message_written(&self) {
        let mut state = self.state.lock();
        state.in_flight = false;
        self.changed.notify_all();
    }

    /// Wait until the active session has nothing left to write.
    ///
    /// Returns `false` on timeout. An inactive queue counts as drained.
    pub(crate) fn wait_drained(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        let result = self.changed.wait_while_for(
            &mut state,
            |state| state.active && (state.in_flight || !state.pending.is_empty()),
            timeout,
        );
        !result.timed_out()
    }

    /// Wake the writer so it re-checks cancellation.
    pub(crate) fn wake(&self) {
        let _state = self.state.lock();
        self.changed.notify_all();
    }

    #[cfg(test)]
    pub(crate) fn try_pop(&self) -> Option<ServerMessage> {
        self.state.lock().pending.pop_front()
    }
}
