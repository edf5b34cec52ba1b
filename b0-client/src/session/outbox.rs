//! Per-conversation bookkeeping for in-flight optimistic sends.
//!
//! Tracks two things per temp id: the original content (kept until
//! reconciliation or retry so a failed send can be retried without
//! re-prompting the user) and the timeout timer handle (cleared by
//! whichever of reconciliation, retry, or the timeout itself happens
//! first). The timeout/reconciliation race resolves here: the timer checks
//! for its own entry before acting, and reconciliation aborts the timer it
//! finds, so exactly one side wins.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::cache::TempId;

#[derive(Default)]
struct OutboxState {
    /// Original content per pending send, for retry.
    contents: HashMap<TempId, String>,
    /// Armed timeout timer per pending send.
    timers: HashMap<TempId, JoinHandle<()>>,
}

/// In-flight send registry for one conversation.
#[derive(Default)]
pub(crate) struct Outbox {
    state: Mutex<OutboxState>,
}

impl Outbox {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record the content of a send that is about to be transmitted.
    pub(crate) fn record(&self, temp_id: TempId, content: String) {
        self.state.lock().contents.insert(temp_id, content);
    }

    /// Arm the timeout timer for a pending send.
    pub(crate) fn arm(&self, temp_id: TempId, timer: JoinHandle<()>) {
        if let Some(old) = self.state.lock().timers.insert(temp_id, timer) {
            old.abort();
        }
    }

    /// Claim the timer slot from within the firing timer itself.
    ///
    /// Returns `true` when the timer was still armed — the caller may then
    /// mark the send failed. `false` means reconciliation or retry got
    /// there first. The content record is kept so retry stays possible.
    pub(crate) fn disarm(&self, temp_id: &TempId) -> bool {
        self.state.lock().timers.remove(temp_id).is_some()
    }

    /// Settle a send that was confirmed by the server: abort its timer and
    /// drop its content record.
    pub(crate) fn complete(&self, temp_id: &TempId) {
        let mut state = self.state.lock();
        if let Some(timer) = state.timers.remove(temp_id) {
            timer.abort();
        }
        state.contents.remove(temp_id);
    }

    /// Content recorded for a pending or failed send, if any.
    pub(crate) fn peek_content(&self, temp_id: &TempId) -> Option<String> {
        self.state.lock().contents.get(temp_id).cloned()
    }

    /// Remove a send entirely (retry path), returning its content.
    pub(crate) fn discard(&self, temp_id: &TempId) -> Option<String> {
        let mut state = self.state.lock();
        if let Some(timer) = state.timers.remove(temp_id) {
            timer.abort();
        }
        state.contents.remove(temp_id)
    }

    /// Abort every armed timer, returning the temp ids that were still
    /// pending. Content records are kept so those sends can be retried.
    pub(crate) fn abort_timers(&self) -> Vec<TempId> {
        let mut state = self.state.lock();
        let mut orphaned = Vec::with_capacity(state.timers.len());
        for (temp_id, timer) in state.timers.drain() {
            timer.abort();
            orphaned.push(temp_id);
        }
        orphaned
    }

    /// Abort every timer and drop all records (full teardown).
    pub(crate) fn clear(&self) {
        let mut state = self.state.lock();
        for (_, timer) in state.timers.drain() {
            timer.abort();
        }
        state.contents.clear();
    }

    /// Number of sends with a recorded content (pending or failed).
    #[cfg(test)]
    pub(crate) fn recorded_count(&self) -> usize {
        self.state.lock().contents.len()
    }
}
